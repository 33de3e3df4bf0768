//! Per-call session state for callrelay.
//!
//! A [`Session`] is the bridging context of one call. It is owned by a
//! [`SessionHandle`] that serializes mutation behind an async mutex and
//! carries the one-shot termination flag. Handles are kept in a
//! [`SessionRegistry`]; outbound identities come from a [`CallerNumberPool`].

/// Outbound queues feeding each live link.
pub mod link;
/// Caller-number allocation shared across sessions.
pub mod pool;
/// Session lookup keyed by call id.
pub mod registry;
/// The session record and its mutations.
pub mod session;
/// Lifecycle state machine.
pub mod state;

pub use link::{LinkHandle, LinkReceiver, LinkRole};
pub use pool::CallerNumberPool;
pub use registry::{InMemorySessionRegistry, SessionRegistry};
pub use session::{playback_elapsed, Links, Session, SessionHandle, Truncation};
pub use state::{CallEvent, CallState};
