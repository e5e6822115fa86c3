use crate::{address, consts};
use serde::Serialize;

/// HA entity platform an EVOK point is exposed as.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Category {
    BinarySensor,
    Switch,
    Sensor,
    Number,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::BinarySensor => "binary_sensor",
            Category::Switch => "switch",
            Category::Sensor => "sensor",
            Category::Number => "number",
        }
    }
}

/// Category specific part of the discovery message. Empty fields are left
/// out of the payload.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl Attributes {
    /// Binary entity driven by "1"/"0" payloads.
    pub fn on_off() -> Self {
        Self {
            payload_on: Some("1"),
            payload_off: Some("0"),
            ..Self::default()
        }
    }

    pub fn measurement(device_class: &'static str, unit: &'static str) -> Self {
        Self {
            device_class: Some(device_class),
            state_class: Some("measurement"),
            unit_of_measurement: Some(unit),
            ..Self::default()
        }
    }
}

/// Device block included in every entity registration.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn new(id: &str, model: &str, serial_number: &str) -> Self {
        Self {
            name: format!("{} {}-{}", consts::MANUFACTURER, model, serial_number),
            identifiers: vec![id.to_string()],
            manufacturer: consts::MANUFACTURER.to_string(),
            model: model.to_string(),
            serial_number: serial_number.to_string(),
        }
    }

    pub fn id(&self) -> &str {
        self.identifiers.first().map(String::as_str).unwrap_or_default()
    }
}

// config topic: homeassistant/<component>/<node_id>/<object_id>/config
// component == category, node_id == device id, object_id == address key.
#[derive(Serialize, Debug)]
pub struct Registration<'a> {
    pub unique_id: String,
    pub name: &'a str,
    pub state_topic: String,
    pub command_topic: String,
    pub device: &'a DeviceInfo,
    #[serde(flatten)]
    pub attributes: &'a Attributes,
}

impl<'a> Registration<'a> {
    pub fn new(
        device: &'a DeviceInfo,
        category: Category,
        key: &'a str,
        attributes: &'a Attributes,
    ) -> Self {
        let device_id = device.id();
        Self {
            unique_id: format!("{}_{}", device_id, key),
            name: key,
            state_topic: address::state_topic(category, device_id, key),
            command_topic: address::command_topic(category, device_id, key),
            device,
            attributes,
        }
    }

    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("All should be serializable")
    }
}
