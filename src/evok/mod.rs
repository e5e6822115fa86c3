mod connection;
pub mod message;

pub use connection::{connect, Evok};
pub use message::{Command, Identity, Record, Snapshot};
