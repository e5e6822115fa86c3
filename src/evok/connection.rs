use super::message::{self, Command, Record, Snapshot};
use crate::config::ControllerConfig;
use crate::consts;
use crate::error::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// A connected EVOK controller.
pub struct Evok {
    /// Startup `/rest/all` result.
    pub snapshot: Snapshot,
    /// Point changes pushed by the controller.
    pub events: mpsc::Receiver<Record>,
    /// Commands to send to the controller.
    pub commands: mpsc::Sender<Command>,
    /// Websocket loop; runs until `events` and `commands` are dropped.
    pub task: JoinHandle<()>,
}

/// How a websocket session ended.
#[derive(Debug, PartialEq)]
enum Ended {
    /// Controller side went away; reconnect.
    Closed,
    /// Our side dropped the channels; stop.
    Finished,
}

/// Fetch the snapshot and start the websocket loop.
///
/// Fails when the snapshot can't be read or has no identity record. There is
/// no other way to learn the controller id.
#[tracing::instrument(skip_all, fields(host = %config.host))]
pub async fn connect(config: &ControllerConfig) -> Result<Evok> {
    info!("Initializing UniPi EVOK on {}", config.host);
    let snapshot = fetch_snapshot(&config.rest_url()).await?;
    let identity = &snapshot.identity;
    info!(
        "UniPi device detected; Model: {}; Serial: {}; ID: {}",
        identity.model,
        identity.serial_number,
        identity.id()
    );

    let (event_tx, event_rx) = mpsc::channel(consts::QUEUE_SIZE);
    let (command_tx, command_rx) = mpsc::channel(consts::QUEUE_SIZE);
    let task = tokio::spawn(run(config.ws_url(), event_tx, command_rx));

    Ok(Evok {
        snapshot,
        events: event_rx,
        commands: command_tx,
        task,
    })
}

async fn fetch_snapshot(rest_url: &str) -> Result<Snapshot> {
    let url = format!("{}/all", rest_url);
    debug!("Getting REST endpoint: {}", url);

    let client = reqwest::Client::builder()
        .timeout(consts::SNAPSHOT_TIMEOUT)
        .build()
        .map_err(Error::Snapshot)?;
    let body = client
        .get(&url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(Error::Snapshot)?
        .bytes()
        .await
        .map_err(Error::Snapshot)?;

    Snapshot::parse(&body)
}

/// Run websocket sessions forever, with a fixed delay between them.
async fn run(url: String, events: mpsc::Sender<Record>, mut commands: mpsc::Receiver<Command>) {
    debug!("Starting up EVOK websocket loop for {}", url);
    loop {
        match session(&url, &events, &mut commands).await {
            Ok(Ended::Finished) => {
                info!("Websocket {} no longer needed", url);
                return;
            }
            Ok(Ended::Closed) => {
                info!("Websocket {} closed", url);
            }
            Err(err) => {
                error!("Websocket {} error: {:#}", url, err);
            }
        }
        tokio::time::sleep(consts::RECONNECT_DELAY).await;
        drop_pending(&mut commands);
    }
}

/// Discard commands issued while the websocket was down. They are lost,
/// not replayed into the next session.
fn drop_pending(commands: &mut mpsc::Receiver<Command>) -> usize {
    let mut dropped = 0;
    while let Ok(command) = commands.try_recv() {
        warn!("Websocket down, dropping command {:?}", command);
        dropped += 1;
    }
    dropped
}

/// Websocket handshake bounded by `limit`, so an unreachable controller
/// costs one reconnect delay and not the OS TCP timeout.
async fn open(
    url: &str,
    limit: Duration,
) -> anyhow::Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let (stream, _response) = tokio::time::timeout(limit, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| anyhow::anyhow!("connecting to {} timed out after {:?}", url, limit))??;
    Ok(stream)
}

async fn session(
    url: &str,
    events: &mpsc::Sender<Record>,
    commands: &mut mpsc::Receiver<Command>,
) -> anyhow::Result<Ended> {
    let stream = open(url, consts::RECONNECT_DELAY).await?;
    info!("Websocket opened: {}", url);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let records = match message::parse_frame(text.as_str()) {
                        Ok(records) => records,
                        Err(err) => {
                            warn!("Ignoring websocket frame '{}': {:#}", text.as_str(), err);
                            continue;
                        }
                    };
                    for record in records {
                        debug!(
                            "UniPi update received: {}/{}: {}",
                            record.dev,
                            record.circuit(),
                            record.value
                        );
                        if events.send(record).await.is_err() {
                            return Ok(Ended::Finished);
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("Websocket close frame received: {:?}", frame);
                    return Ok(Ended::Closed);
                }
                Some(Ok(_)) => {
                    // Ping/pong is answered by tungstenite; binary is unused.
                }
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(Ended::Closed),
            },
            command = commands.recv() => {
                let Some(command) = command else {
                    return Ok(Ended::Finished);
                };
                debug!("Sending command to UniPi: {:?}", command);
                if let Err(err) = write.send(Message::text(command.to_json())).await {
                    error!("Unable to send command {:?}: {}", command, err);
                    return Err(err.into());
                }
            }
        }
    }
}
