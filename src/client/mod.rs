//! Cryo client session API.
//!
//! [`CryoSession`] is the handle; [`SessionEvents`] carries what the session
//! reports back. The frame routing and per-connection state live in
//! [`FrameRouter`] and a crate-private state machine, both free of I/O.

mod config;
mod events;
mod router;
mod session;
mod state;

pub use config::*;
pub use events::*;
pub use router::*;
pub use session::*;
