use super::discovery::{Attributes, Category, DeviceInfo, Registration};
use crate::{address, consts};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Things we sent to HA.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Remember device metadata and subscribe to commands of all its
    /// entities. Replayed on every reconnect.
    AddDevice(DeviceInfo),
    /// Current entity value, retained.
    State {
        device_id: String,
        category: Category,
        key: String,
        value: String,
    },
    /// Discovery message, to be sent to
    /// homeassistant/<category>/<device_id>/<kind>_<circuit>/config
    Register {
        device_id: String,
        category: Category,
        key: String,
        attributes: Attributes,
    },
    /// Empty retained discovery message - HA forgets the entity.
    Remove {
        device_id: String,
        category: Category,
        key: String,
    },
    /// Flush queued messages and close the connection.
    Disconnect,
}

/// Things HA sends to us.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Set entity `key` of a device to a raw payload value.
    Set {
        device_id: String,
        key: String,
        payload: Vec<u8>,
    },
}

/// A single MQTT publish derived from an [`Outgoing`] message.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl Outgoing {
    /// Render a message into the publish it causes. Control messages
    /// (subscriptions, disconnect) yield `None`.
    pub fn publication(&self, devices: &HashMap<String, DeviceInfo>) -> Option<Publication> {
        match self {
            Outgoing::AddDevice(_) | Outgoing::Disconnect => None,
            Outgoing::State {
                device_id,
                category,
                key,
                value,
            } => Some(Publication {
                topic: address::state_topic(*category, device_id, key),
                payload: value.clone(),
                retain: true,
            }),
            Outgoing::Register {
                device_id,
                category,
                key,
                attributes,
            } => {
                let Some(device) = devices.get(device_id) else {
                    warn!("Entity {} registered before its device {}", key, device_id);
                    return None;
                };
                let registration = Registration::new(device, *category, key, attributes);
                Some(Publication {
                    topic: address::config_topic(*category, device_id, key),
                    payload: registration.serialize(),
                    retain: true,
                })
            }
            Outgoing::Remove {
                device_id,
                category,
                key,
            } => Some(Publication {
                topic: address::config_topic(*category, device_id, key),
                payload: String::new(),
                retain: true,
            }),
        }
    }
}

impl Incoming {
    /// Parse a message received on a device command filter:
    /// homeassistant/<category>/<device_id>/<key>/set
    pub fn from_publish(topic: &str, payload: &[u8]) -> Option<Self> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 4 {
            warn!("Command topic too short, ignoring: {}", topic);
            return None;
        }
        let action = parts.get(4).copied().unwrap_or_default();
        if action != consts::HA_SET_SUFFIX {
            // Still passed on. The subscription filter should not let these
            // through in the first place.
            debug!("Unknown command received: {:?} in {}", action, topic);
        }
        Some(Incoming::Set {
            device_id: parts[2].to_string(),
            key: parts[3].to_string(),
            payload: payload.to_vec(),
        })
    }

    pub fn device_id(&self) -> &str {
        match self {
            Incoming::Set { device_id, .. } => device_id,
        }
    }
}
