//! Cross-cutting behavior wrapped around a stage's transform.
//!
//! A modifier takes the next handler inward and returns a new handler.
//! [`compose`] stacks a list of modifiers with the last one outermost.

mod bulkhead;
mod chain;
mod delay;
mod fallback;
mod retry;
mod spec;
mod throttle;
mod timeout;

pub use bulkhead::Bulkhead;
pub use chain::{compose, Handler, ItemFuture, ItemResult, Modifier};
pub use delay::Delay;
pub use fallback::Fallback;
pub use retry::{BackoffStrategy, JitterStrategy, Retry, RetryPolicy};
pub use spec::ModifierSpec;
pub use throttle::Throttle;
pub use timeout::Timeout;
