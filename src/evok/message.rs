//! EVOK JSON shapes: the `/rest/all` snapshot, websocket events and commands.

use crate::consts;
use crate::error::{Error, Result};
use crate::mapping::PointKind;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One point as reported by EVOK, either in the snapshot or in an event.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Record {
    #[serde(default)]
    pub dev: String,
    /// Numeric circuits are kept in their decimal text form.
    #[serde(default, deserialize_with = "text")]
    pub circuit: Option<String>,
    #[serde(default)]
    pub value: Value,

    // Identity record only.
    #[serde(default, deserialize_with = "text")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub sn: Option<String>,
}

fn text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

impl Record {
    pub fn circuit(&self) -> &str {
        self.circuit.as_deref().unwrap_or(consts::UNKNOWN_CIRCUIT)
    }
}

/// Controller identity, taken from the `neuron` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub model: String,
    pub serial_number: String,
}

impl Identity {
    fn from_record(record: &Record) -> Self {
        Self {
            model: record
                .model
                .clone()
                .unwrap_or_else(|| consts::UNKNOWN_MODEL.to_string()),
            serial_number: record
                .sn
                .clone()
                .unwrap_or_else(|| consts::UNKNOWN_SERIAL.to_string()),
        }
    }

    /// `<model>-<serial>`; unique per physical controller.
    pub fn id(&self) -> String {
        format!("{}-{}", self.model, self.serial_number)
    }
}

/// Result of the startup `/rest/all` request.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub identity: Identity,
    pub records: Vec<Record>,
}

impl Snapshot {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let records: Vec<Record> = serde_json::from_slice(body).map_err(Error::SnapshotFormat)?;
        let identity = records
            .iter()
            .find(|record| record.dev == consts::IDENTITY_DEV)
            .map(Identity::from_record)
            .ok_or(Error::MissingIdentity(consts::IDENTITY_DEV))?;
        Ok(Self { identity, records })
    }
}

/// Websocket frames carry either a list of changes or, for some point
/// types (temperature), a single bare object.
#[derive(Deserialize)]
#[serde(untagged)]
enum Frame {
    Many(Vec<Record>),
    One(Record),
}

/// Parse a websocket text frame into a flat list of point changes.
pub fn parse_frame(text: &str) -> Result<Vec<Record>> {
    let frame: Frame = serde_json::from_str(text).map_err(Error::EventFrame)?;
    Ok(match frame {
        Frame::Many(records) => records,
        Frame::One(record) => vec![record],
    })
}

/// Command sent over the websocket:
/// {"cmd": "set", "dev": "relay", "circuit": "1", "value": 1.0}
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Command {
    cmd: &'static str,
    pub dev: &'static str,
    pub circuit: String,
    pub value: f64,
}

impl Command {
    pub fn set(kind: PointKind, circuit: &str, value: f64) -> Self {
        Self {
            cmd: "set",
            dev: kind.as_str(),
            circuit: circuit.to_string(),
            value,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Command should serialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_from_snapshot() {
        let body = json!([
            {"dev": "neuron", "circuit": "1", "model": "M523", "sn": 12345},
            {"dev": "relay", "circuit": "1", "value": 0},
        ])
        .to_string();
        let snapshot = Snapshot::parse(body.as_bytes()).unwrap();
        assert_eq!(snapshot.identity.model, "M523");
        assert_eq!(snapshot.identity.serial_number, "12345");
        assert_eq!(snapshot.identity.id(), "M523-12345");
        assert_eq!(snapshot.records.len(), 2);
    }

    #[test]
    fn identity_defaults() {
        let body = json!([{"dev": "neuron"}]).to_string();
        let snapshot = Snapshot::parse(body.as_bytes()).unwrap();
        assert_eq!(snapshot.identity.id(), "Unknown-99999");
    }

    #[test]
    fn missing_identity_is_fatal() {
        let body = json!([{"dev": "relay", "circuit": "1", "value": 0}]).to_string();
        assert!(matches!(
            Snapshot::parse(body.as_bytes()),
            Err(Error::MissingIdentity("neuron"))
        ));
    }

    #[test]
    fn snapshot_must_be_a_list() {
        assert!(matches!(
            Snapshot::parse(br#"{"dev": "neuron"}"#),
            Err(Error::SnapshotFormat(_))
        ));
    }

    #[test]
    fn circuit_text_form() {
        let body = json!([
            {"dev": "neuron", "model": "S103", "sn": "77"},
            {"dev": "input", "circuit": 3, "value": 1},
            {"dev": "input", "circuit": "1_01", "value": 0},
            {"dev": "wd"},
        ])
        .to_string();
        let snapshot = Snapshot::parse(body.as_bytes()).unwrap();
        assert_eq!(snapshot.identity.id(), "S103-77");
        assert_eq!(snapshot.records[1].circuit(), "3");
        assert_eq!(snapshot.records[2].circuit(), "1_01");
        assert_eq!(snapshot.records[3].circuit(), "NONE");
        assert_eq!(snapshot.records[3].value, Value::Null);
    }

    #[test]
    fn bare_object_and_list_frames_are_equivalent() {
        let event = json!({"dev": "temp", "circuit": "A", "value": 21.5});
        let bare = parse_frame(&event.to_string()).unwrap();
        let wrapped = parse_frame(&json!([event]).to_string()).unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].dev, "temp");
        assert_eq!(bare[0].circuit(), "A");
        assert_eq!(bare[0].value, json!(21.5));
    }

    #[test]
    fn multi_event_frame() {
        let frame = json!([
            {"dev": "input", "circuit": "1_01", "value": 1},
            {"dev": "relay", "circuit": "2_01", "value": 0},
        ]);
        let records = parse_frame(&frame.to_string()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].circuit(), "2_01");
    }

    #[test]
    fn rejects_garbage_frame() {
        assert!(matches!(parse_frame("not json"), Err(Error::EventFrame(_))));
        assert!(parse_frame("42").is_err());
    }

    #[test]
    fn set_command_wire_format() {
        let command = Command::set(PointKind::Relay, "1", 1.0);
        assert_eq!(
            command.to_json(),
            r#"{"cmd":"set","dev":"relay","circuit":"1","value":1.0}"#
        );
    }
}
