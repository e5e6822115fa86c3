use super::discovery::{Category, DeviceInfo};
use super::{Incoming, Outgoing};
use crate::{address, consts};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use rumqttc::{Event, Outgoing as MqttOutgoing, Packet};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{sync::Mutex, task};

use tracing::{debug, error, info, warn};

/// What was announced to HA during this process lifetime.
#[derive(Debug, Default)]
struct Registry {
    /// Device metadata by device id. Also the list of devices we accept
    /// commands for.
    devices: HashMap<String, DeviceInfo>,
    /// Command filters. Not kept by the broker across a reconnect (clean
    /// session), so they are replayed on every ConnAck.
    subscriptions: Vec<String>,
    /// (device id, address key) of registered entities.
    entities: HashMap<(String, String), Category>,
}

impl Registry {
    /// Remember a device and return its command filter. A device announced
    /// twice still has a single filter.
    fn add_device(&mut self, device: &DeviceInfo) -> String {
        let filter = address::command_filter(device.id());
        self.devices.insert(device.id().to_string(), device.clone());
        if !self.subscriptions.contains(&filter) {
            self.subscriptions.push(filter.clone());
        }
        filter
    }

    /// Filters to subscribe again after the broker accepted a new session.
    fn subscriptions_to_replay(&self) -> Vec<String> {
        self.subscriptions.clone()
    }
}

pub struct Initiator {
    client: AsyncClient,
    event_loop: EventLoop,
}

/// HA interfacing via MQTT
pub struct HomeAssistant {
    /// Outgoing event queue: things we sent to HA.
    outgoing: mpsc::Sender<Outgoing>,
    /// Incoming event queue: commands read from HA.
    incoming: Mutex<mpsc::Receiver<Incoming>>,
}

impl Initiator {
    pub async fn new(
        id: &str,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> anyhow::Result<Self> {
        let mut mqttoptions = MqttOptions::new(id, host, port);
        mqttoptions.set_keep_alive(consts::MQTT_KEEP_ALIVE);
        mqttoptions.set_clean_session(true);
        if !username.is_empty() {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(mqttoptions, 10);

        // Fail early if parameters are invalid.
        if let Err(err) = event_loop.poll().await {
            anyhow::bail!(
                "Initial connection to MQTT {}:{} failed: {}. Check connection parameters",
                host,
                port,
                err
            );
        }
        info!("Connected to MQTT server {}:{} as {}", host, port, id);

        Ok(Initiator { client, event_loop })
    }

    async fn receiver(
        mut event_loop: EventLoop,
        client: AsyncClient,
        registry: Arc<Mutex<Registry>>,
        queue: mpsc::Sender<Incoming>,
    ) {
        loop {
            let notification = event_loop.poll().await;
            match notification {
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    debug!("RX message to {} with payload '{:?}'", msg.topic, msg.payload);
                    let Some(incoming) = Incoming::from_publish(&msg.topic, &msg.payload) else {
                        continue;
                    };
                    let known = registry
                        .lock()
                        .await
                        .devices
                        .contains_key(incoming.device_id());
                    if !known {
                        warn!("This device is not known: {}", incoming.device_id());
                        continue;
                    }
                    if let Err(err) = queue.send(incoming).await {
                        error!(
                            "Error while sending received message to queue: {:?}. Quitting loop",
                            err
                        );
                        return;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("MQTT reconnected: {:?}", ack.code);
                    let filters = registry.lock().await.subscriptions_to_replay();
                    for filter in &filters {
                        info!("Re-subscribing to: {}", filter);
                        // Never wait on the request queue here: this task is
                        // the one draining it.
                        if let Err(err) = client.try_subscribe(filter, QoS::AtLeastOnce) {
                            error!("Unable to re-subscribe to {}: {:?}", filter, err);
                        }
                    }
                }
                Ok(Event::Outgoing(MqttOutgoing::Disconnect)) => {
                    info!("MQTT disconnect sent");
                    return;
                }
                Ok(Event::Outgoing(_))
                | Ok(Event::Incoming(Packet::PingResp))
                | Ok(Event::Incoming(Packet::SubAck(_)))
                | Ok(Event::Incoming(Packet::PubAck(_))) => {
                    // Silence common messages
                    continue;
                }
                Ok(other) => {
                    debug!("Received other message = {:?}", other);
                }
                Err(err) => {
                    warn!(
                        "MQTT connection error: {}. Retrying in {:?}",
                        err,
                        consts::RECONNECT_DELAY
                    );
                    tokio::time::sleep(consts::RECONNECT_DELAY).await;
                }
            }
        }
    }

    async fn sender(
        client: AsyncClient,
        registry: Arc<Mutex<Registry>>,
        mut queue: mpsc::Receiver<Outgoing>,
    ) {
        while let Some(command) = queue.recv().await {
            let publication = {
                let mut registry = registry.lock().await;
                match &command {
                    Outgoing::AddDevice(device) => {
                        let filter = registry.add_device(device);
                        drop(registry);

                        info!("Subscribing for {}", filter);
                        if let Err(err) = client.subscribe(&filter, QoS::AtLeastOnce).await {
                            error!("Unable to subscribe to a topic {}: {:?}", filter, err);
                        }
                        continue;
                    }
                    Outgoing::Disconnect => {
                        info!(
                            "Disconnecting from MQTT with {} registered entities",
                            registry.entities.len()
                        );
                        drop(registry);
                        if let Err(err) = client.disconnect().await {
                            error!("Unable to disconnect cleanly: {:?}", err);
                        }
                        return;
                    }
                    Outgoing::Register {
                        device_id,
                        category,
                        key,
                        ..
                    } => {
                        registry
                            .entities
                            .insert((device_id.clone(), key.clone()), *category);
                    }
                    Outgoing::Remove { device_id, key, .. } => {
                        registry.entities.remove(&(device_id.clone(), key.clone()));
                    }
                    Outgoing::State { .. } => {}
                }
                command.publication(&registry.devices)
            };

            let Some(publication) = publication else {
                continue;
            };
            debug!(
                "Publishing to {}: '{}'",
                publication.topic, publication.payload
            );
            let result = client
                .publish(
                    publication.topic,
                    QoS::AtLeastOnce,
                    publication.retain,
                    publication.payload,
                )
                .await;
            if let Err(err) = result {
                error!("Unable to publish message {:?}", err);
            }
        }
        // Channel end closed - quit.
    }

    pub async fn start(self) -> HomeAssistant {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let (out_sender, out_receiver) = mpsc::channel::<Outgoing>(consts::QUEUE_SIZE);
        let (in_sender, in_receiver) = mpsc::channel::<Incoming>(consts::QUEUE_SIZE);
        task::spawn(Self::receiver(
            self.event_loop,
            self.client.clone(),
            registry.clone(),
            in_sender,
        ));
        task::spawn(Self::sender(self.client, registry, out_receiver));

        HomeAssistant {
            outgoing: out_sender,
            incoming: Mutex::new(in_receiver),
        }
    }
}

impl HomeAssistant {
    /// Receive incoming message (from MQTT). None means the HA reading loop
    /// finished.
    pub async fn recv(&self) -> Option<Incoming> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await
    }

    pub async fn send(&self, msg: Outgoing) -> anyhow::Result<()> {
        self.outgoing.send(msg).await?;
        Ok(())
    }

    /// Handle for other tasks to queue outgoing messages.
    pub fn sender(&self) -> mpsc::Sender<Outgoing> {
        self.outgoing.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> DeviceInfo {
        let (model, serial) = id.split_once('-').unwrap();
        DeviceInfo::new(id, model, serial)
    }

    #[test]
    fn device_added_twice_has_one_filter() {
        let mut registry = Registry::default();
        let first = registry.add_device(&device("M523-12345"));
        let second = registry.add_device(&device("M523-12345"));

        assert_eq!(first, "homeassistant/+/M523-12345/+/set/#");
        assert_eq!(first, second);
        assert_eq!(registry.devices.len(), 1);
        assert_eq!(registry.subscriptions_to_replay(), vec![first]);
    }

    #[test]
    fn reconnect_replays_every_device() {
        let mut registry = Registry::default();
        assert!(registry.subscriptions_to_replay().is_empty());

        registry.add_device(&device("M523-12345"));
        registry.add_device(&device("S103-2"));

        assert_eq!(
            registry.subscriptions_to_replay(),
            vec![
                "homeassistant/+/M523-12345/+/set/#".to_string(),
                "homeassistant/+/S103-2/+/set/#".to_string(),
            ]
        );
        assert!(registry.devices.contains_key("S103-2"));
    }
}
