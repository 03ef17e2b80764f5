//! Helpers for turning interceptor panics into failure causes.

use std::any::Any;

/// Render a panic payload as a failure cause.
///
/// The payload is downcast to `String` or `&'static str` if possible and
/// falls back to `Debug` formatting otherwise.
///
/// ```
/// use interceptor_chain::panic::panic_cause;
///
/// assert_eq!(panic_cause(&*Box::new("boom")), "boom");
/// assert_eq!(panic_cause(&*Box::new(String::from("boom"))), "boom");
/// assert!(panic_cause(&*Box::new(5_u32)).contains("Any"));
/// ```
#[must_use]
pub fn panic_cause(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else {
        format!("{payload:?}")
    }
}
