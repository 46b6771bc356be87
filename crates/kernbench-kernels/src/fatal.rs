//! Fail-fast adapter
//!
//! Library routines return typed errors. Harness drivers and the C surface
//! want the opposite contract: print where things went wrong and stop the
//! process. [`must`] bridges the two.

use std::error::Error;
use std::panic::Location;

/// Unwrap `result`, or report the error with the caller's location and exit
/// with status 1.
#[track_caller]
pub fn must<T, E: Error>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => fatal(e),
    }
}

/// Report `err` with the caller's location and exit with status 1.
#[track_caller]
pub fn fatal<E: Error>(err: E) -> ! {
    let location = Location::caller();
    let message = render(&err);
    log::error!("{} at {}:{}", message, location.file(), location.line());
    eprintln!("[KERNBENCH ERROR] at file {}:{}:\n{}", location.file(), location.line(), message);
    std::process::exit(1);
}

/// The error followed by each of its sources. A source whose text already
/// appears in the error wrapping it is not repeated.
fn render(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut outer = message.clone();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !outer.contains(&text) {
            message.push_str(&format!("\n  caused by: {}", text));
        }
        outer = text;
        source = cause.source();
    }
    message
}
