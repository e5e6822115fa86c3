//! EVOK <-> HA synchronization.
//!
//! Per controller: `Discovering -> Registered -> Synchronizing`, or in
//! cleanup mode `Discovering -> Unregistering -> Done`. Runtime errors are
//! logged and the message is dropped; the bridge never stops on its own.

use crate::address;
use crate::error::{Error, Result};
use crate::evok::{Command, Identity, Record, Snapshot};
use crate::homeassistant::discovery::DeviceInfo;
use crate::homeassistant::{Incoming, Outgoing};
use crate::mapping::{self, PointKind};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Mode {
    /// Register entities and keep them synchronized.
    Normal,
    /// Remove every discovered entity from HA.
    Cleanup,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DeviceState {
    Discovering,
    Registered,
    Synchronizing,
    Unregistering,
    Done,
}

/// Last known state of a controller point.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub kind: PointKind,
    pub circuit: String,
    pub value: Value,
    pub last_update: DateTime<Utc>,
}

type PointTable = HashMap<(PointKind, String), Point>;

struct Device {
    identity: Identity,
    commands: mpsc::Sender<Command>,
    state: Mutex<DeviceState>,
    /// Written by the event handler of this device and by reverse sync.
    points: Mutex<PointTable>,
}

impl Device {
    async fn set_state(&self, state: DeviceState) {
        let mut current = self.state.lock().await;
        debug!(
            "Device {}: {:?} -> {:?}",
            self.identity.id(),
            *current,
            state
        );
        *current = state;
    }
}

pub struct Bridge {
    ha: mpsc::Sender<Outgoing>,
    mode: Mode,
    devices: RwLock<HashMap<String, Arc<Device>>>,
}

/// HA state payload for an EVOK value.
pub fn state_payload(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(on) => (if *on { "1" } else { "0" }).to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Numeric value of a HA command payload. NaN and infinities have no JSON
/// form, so they are rejected too.
pub fn command_value(payload: &[u8]) -> Result<f64> {
    let text = String::from_utf8_lossy(payload);
    match text.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(Error::NotANumber(text.into_owned())),
    }
}

impl Bridge {
    pub fn new(ha: mpsc::Sender<Outgoing>, mode: Mode) -> Self {
        info!("Initializing HA<->UniPi bridge in {:?} mode", mode);
        Self {
            ha,
            mode,
            devices: RwLock::new(HashMap::new()),
        }
    }

    async fn send(&self, msg: Outgoing) -> anyhow::Result<()> {
        self.ha.send(msg).await?;
        Ok(())
    }

    /// Announce a controller and all of its recognized points to HA (or, in
    /// cleanup mode, remove them). Fails only when the HA queue is gone.
    pub async fn discover(
        &self,
        snapshot: &Snapshot,
        commands: mpsc::Sender<Command>,
    ) -> anyhow::Result<()> {
        let identity = snapshot.identity.clone();
        let device_id = identity.id();
        let device = Arc::new(Device {
            identity: identity.clone(),
            commands,
            state: Mutex::new(DeviceState::Discovering),
            points: Mutex::new(HashMap::new()),
        });
        self.devices
            .write()
            .await
            .insert(device_id.clone(), device.clone());

        self.send(Outgoing::AddDevice(DeviceInfo::new(
            &device_id,
            &identity.model,
            &identity.serial_number,
        )))
        .await?;

        if self.mode == Mode::Cleanup {
            device.set_state(DeviceState::Unregistering).await;
        }

        let now = Utc::now();
        let mut count = 0;
        for record in &snapshot.records {
            let Some((kind, mapping)) = mapping::lookup(&record.dev) else {
                continue;
            };
            let circuit = record.circuit();
            let key = address::address_key(kind, circuit);
            debug!(
                "Detected entity: {}/{} -> {}/{}/{}",
                record.dev,
                circuit,
                mapping.category.as_str(),
                device_id,
                key
            );
            device.points.lock().await.insert(
                (kind, circuit.to_string()),
                Point {
                    kind,
                    circuit: circuit.to_string(),
                    value: record.value.clone(),
                    last_update: now,
                },
            );

            match self.mode {
                Mode::Cleanup => {
                    self.send(Outgoing::Remove {
                        device_id: device_id.clone(),
                        category: mapping.category,
                        key,
                    })
                    .await?;
                }
                Mode::Normal => {
                    // Value first, so a new entity never shows a default.
                    self.send(Outgoing::State {
                        device_id: device_id.clone(),
                        category: mapping.category,
                        key: key.clone(),
                        value: state_payload(&record.value),
                    })
                    .await?;
                    self.send(Outgoing::Register {
                        device_id: device_id.clone(),
                        category: mapping.category,
                        key,
                        attributes: mapping.attributes,
                    })
                    .await?;
                }
            }
            count += 1;
        }

        match self.mode {
            Mode::Normal => {
                info!("Registered {} entities of {}", count, device_id);
                device.set_state(DeviceState::Registered).await;
            }
            Mode::Cleanup => {
                info!("Removed {} entities of {}", count, device_id);
                device.set_state(DeviceState::Done).await;
            }
        }
        Ok(())
    }

    async fn device(&self, device_id: &str) -> Option<Arc<Device>> {
        self.devices.read().await.get(device_id).cloned()
    }

    pub async fn device_state(&self, device_id: &str) -> Option<DeviceState> {
        let device = self.device(device_id).await?;
        let state = *device.state.lock().await;
        Some(state)
    }

    /// Stored state of a point, if it was ever seen.
    pub async fn point(&self, device_id: &str, kind: PointKind, circuit: &str) -> Option<Point> {
        let device = self.device(device_id).await?;
        let points = device.points.lock().await;
        points.get(&(kind, circuit.to_string())).cloned()
    }

    /// Controller -> HA: store and publish a point change.
    pub async fn forward(&self, device_id: &str, record: Record) {
        let Some((kind, mapping)) = mapping::lookup(&record.dev) else {
            debug!("Ignoring update of unhandled point type {}", record.dev);
            return;
        };
        let Some(device) = self.device(device_id).await else {
            warn!("Update from unknown device {}", device_id);
            return;
        };
        let circuit = record.circuit().to_string();
        let key = address::address_key(kind, &circuit);

        {
            let mut points = device.points.lock().await;
            let point = points.entry((kind, circuit.clone())).or_insert_with(|| {
                info!("New point {} on {} after discovery", key, device_id);
                Point {
                    kind,
                    circuit: circuit.clone(),
                    value: Value::Null,
                    last_update: Utc::now(),
                }
            });
            point.value = record.value.clone();
            point.last_update = Utc::now();
        }

        debug!(
            "Sending state update to HomeAssistant: {}/{}: {}",
            device_id, key, record.value
        );
        let result = self
            .send(Outgoing::State {
                device_id: device_id.to_string(),
                category: mapping.category,
                key,
                value: state_payload(&record.value),
            })
            .await;
        if let Err(err) = result {
            warn!("Unable to queue state update: {}", err);
        }
    }

    /// HA -> controller: route a set command to its controller.
    pub async fn reverse(&self, incoming: Incoming) {
        let Incoming::Set {
            device_id,
            key,
            payload,
        } = incoming;
        debug!(
            "Got update from HomeAssistant for {}/{}: {:?}",
            device_id,
            key,
            String::from_utf8_lossy(&payload)
        );

        let Some(device) = self.device(&device_id).await else {
            warn!("Command for unknown device {}", device_id);
            return;
        };
        let (kind, circuit) = match address::split_address_key(&key) {
            Ok(parts) => parts,
            Err(err) => {
                warn!("Ignoring command for {}: {}", device_id, err);
                return;
            }
        };
        let Some(kind) = PointKind::from_dev(kind) else {
            warn!("Ignoring command for unhandled point type {}", kind);
            return;
        };
        let value = match command_value(&payload) {
            Ok(value) => value,
            Err(err) => {
                warn!("Ignoring command for {}/{}: {}", device_id, key, err);
                return;
            }
        };

        let command = Command::set(kind, circuit, value);
        // Never wait on a controller: an offline one must not hold up the
        // others or the MQTT loop behind us.
        match device.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                warn!("Controller {} is not keeping up, dropping {:?}", device_id, command);
                return;
            }
            Err(TrySendError::Closed(command)) => {
                warn!("Controller {} is gone, dropping {:?}", device_id, command);
                return;
            }
        }

        if kind.is_actuator() {
            let mut points = device.points.lock().await;
            let point = points
                .entry((kind, circuit.to_string()))
                .or_insert_with(|| Point {
                    kind,
                    circuit: circuit.to_string(),
                    value: Value::Null,
                    last_update: Utc::now(),
                });
            point.value = serde_json::Number::from_f64(value)
                .map(Value::Number)
                .unwrap_or(Value::Null);
            point.last_update = Utc::now();
        }
    }

    /// Feed controller events into HA until the controller stream ends.
    pub async fn run_forward(self: Arc<Self>, device_id: String, mut events: mpsc::Receiver<Record>) {
        if let Some(device) = self.device(&device_id).await {
            device.set_state(DeviceState::Synchronizing).await;
        }
        while let Some(record) = events.recv().await {
            self.forward(&device_id, record).await;
        }
        info!("UniPi->MQTT task for {} finishing", device_id);
    }
}
