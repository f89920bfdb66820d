//! Cross-device pairing: token derivation, the live channel registry,
//! the channel wire format and the per-attempt login state machine.
//!
//! A desktop page opens a duplex channel and announces a pairing token.
//! The mobile side derives the same token from shared inputs and finishes
//! registration or login over HTTP; the service then pushes the result to
//! whichever channel is bound to that token.

pub mod attempt;
pub mod message;
pub mod registry;
pub mod token;

pub use attempt::{LoginAttempt, LoginEvent, LoginStage};
pub use message::ServerMessage;
pub use registry::{ConnectionId, ConnectionRegistry, Delivery, MessageOutcome};
pub use token::{login_token, registration_token, PairingToken, ServerSecret};
