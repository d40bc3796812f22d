//! Per-call session state: the bounded context window, the concurrent
//! session store, and the sweeper that evicts abandoned calls.

pub mod context_window;
pub mod store;
pub mod sweep;

pub use context_window::WindowLimits;
pub use store::{CallSession, SessionStore};
pub use sweep::{SweepScheduler, SweepTiming};
