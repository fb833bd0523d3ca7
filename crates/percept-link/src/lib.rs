//! Transport seam for the live conversational session.
//!
//! [`LiveConnector`] and [`LiveSession`] abstract the remote service so the
//! rest of the pipeline never touches a network client directly. The crate
//! also owns the JSON wire types, the [`TransmitGate`] that holds captured
//! frames until the session opens, and a scriptable [`MockConnector`] for
//! tests.

pub mod gate;
pub mod mock;
pub mod session;
pub mod types;

pub use gate::*;
pub use mock::*;
pub use session::*;
pub use types::*;
