mod connection;
pub mod discovery;
mod message;

pub use connection::{HomeAssistant, Initiator};
pub use message::{Incoming, Outgoing, Publication};
