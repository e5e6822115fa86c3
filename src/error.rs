/// Local failures of the controller side and of command routing.
///
/// Snapshot errors are fatal at startup. Everything else is logged by the
/// caller and the offending message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("snapshot request failed")]
    Snapshot(#[source] reqwest::Error),

    #[error("snapshot is not a list of points")]
    SnapshotFormat(#[source] serde_json::Error),

    #[error("snapshot has no '{0}' identity record")]
    MissingIdentity(&'static str),

    #[error("malformed event frame")]
    EventFrame(#[source] serde_json::Error),

    #[error("command payload '{0}' is not a number")]
    NotANumber(String),

    #[error("address key '{0}' has no kind separator")]
    AddressKey(String),
}

pub type Result<T> = std::result::Result<T, Error>;
