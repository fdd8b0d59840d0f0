//! Wake-mode session state machine.
//!
//! Decides, per captured chunk, whether audio is buffered locally
//! (sleeping), streamed to the service (waiting for a response), or
//! streamed with end-of-utterance silence detection (active conversation).

pub mod manager;
pub mod state;

pub use manager::{SessionManager, SessionTransport};
pub use state::SessionState;
