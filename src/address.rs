//! Names shared between EVOK and Home Assistant.
//!
//! A controller point is addressed on the HA side by `<kind>_<circuit>`. Kinds
//! never contain `_`, circuits may (`1_01`), so the key is split on the first
//! separator only.

use crate::consts;
use crate::error::{Error, Result};
use crate::homeassistant::discovery::Category;
use crate::mapping::PointKind;

pub const SEPARATOR: char = '_';

pub fn address_key(kind: PointKind, circuit: &str) -> String {
    format!("{}{}{}", kind.as_str(), SEPARATOR, circuit)
}

/// Reverse of [`address_key`]: `relay_1_01` -> (`relay`, `1_01`).
pub fn split_address_key(key: &str) -> Result<(&str, &str)> {
    key.split_once(SEPARATOR)
        .ok_or_else(|| Error::AddressKey(key.to_string()))
}

/// Base topic of an entity; `/config`, `/state` and `/set` hang below it.
pub fn entity_topic(category: Category, device_id: &str, key: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        consts::HA_DISCOVERY_TOPIC,
        category.as_str(),
        device_id,
        key
    )
}

pub fn config_topic(category: Category, device_id: &str, key: &str) -> String {
    format!("{}/config", entity_topic(category, device_id, key))
}

pub fn state_topic(category: Category, device_id: &str, key: &str) -> String {
    format!("{}/state", entity_topic(category, device_id, key))
}

pub fn command_topic(category: Category, device_id: &str, key: &str) -> String {
    format!(
        "{}/{}",
        entity_topic(category, device_id, key),
        consts::HA_SET_SUFFIX
    )
}

/// Filter matching command topics of every entity of a device.
pub fn command_filter(device_id: &str) -> String {
    format!(
        "{}/+/{}/+/{}/#",
        consts::HA_DISCOVERY_TOPIC,
        device_id,
        consts::HA_SET_SUFFIX
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique_within_device() {
        let circuits = ["1", "2", "1_01", "1_02", "A", "28FF0011"];
        let mut seen = HashSet::new();
        for kind in PointKind::ALL {
            for circuit in circuits {
                assert!(seen.insert(address_key(kind, circuit)));
            }
        }
        assert_eq!(seen.len(), PointKind::ALL.len() * circuits.len());
    }

    #[test]
    fn split_inverts_key() {
        for kind in PointKind::ALL {
            for circuit in ["1", "2_03", "a_b_c", "NONE"] {
                let key = address_key(kind, circuit);
                let (k, c) = split_address_key(&key).unwrap();
                assert_eq!(k, kind.as_str());
                assert_eq!(c, circuit);
            }
        }
    }

    #[test]
    fn split_rejects_key_without_separator() {
        assert!(matches!(
            split_address_key("relay"),
            Err(Error::AddressKey(key)) if key == "relay"
        ));
    }

    #[test]
    fn builds_topics() {
        assert_eq!(
            config_topic(Category::Switch, "M523-12345", "relay_1"),
            "homeassistant/switch/M523-12345/relay_1/config"
        );
        assert_eq!(
            state_topic(Category::Sensor, "M523-12345", "temp_A"),
            "homeassistant/sensor/M523-12345/temp_A/state"
        );
        assert_eq!(
            command_topic(Category::Number, "M523-12345", "ao_1"),
            "homeassistant/number/M523-12345/ao_1/set"
        );
        assert_eq!(
            command_filter("M523-12345"),
            "homeassistant/+/M523-12345/+/set/#"
        );
    }
}
