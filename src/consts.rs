use std::time::Duration;

/// Software version
pub const GATE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GATE_NAME: &str = "unipi-gate";

pub const HA_DISCOVERY_TOPIC: &str = "homeassistant";
/// Last topic segment HA uses for commands: <entity topic>/set
pub const HA_SET_SUFFIX: &str = "set";

pub const MANUFACTURER: &str = "UniPi";

/// EVOK point type carrying the controller identity (model, serial).
pub const IDENTITY_DEV: &str = "neuron";
/// Used when the identity record lacks a model.
pub const UNKNOWN_MODEL: &str = "Unknown";
/// Used when the identity record lacks a serial number.
pub const UNKNOWN_SERIAL: u64 = 99999;
/// Circuit id for snapshot points that have none.
pub const UNKNOWN_CIRCUIT: &str = "NONE";

/// Fixed delay between websocket/MQTT reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Limit for the startup REST snapshot.
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Queue depths between tasks.
pub const QUEUE_SIZE: usize = 64;
