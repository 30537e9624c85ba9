//! Reliability subsystem: idempotency guard, fan-in checker,
//! hard-stopper, and retry policy.

mod fanin;
mod hardstop;
mod idempotency;
mod retry;

pub use fanin::FanInChecker;
pub use hardstop::HardStopper;
pub use idempotency::{Decision, IdempotencyGuard};
pub use retry::RetryPolicy;
