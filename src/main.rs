use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};
use unipi_gate::bridge::{Bridge, Mode};
use unipi_gate::config::{Args, Config, LogLevel};
use unipi_gate::homeassistant::{self, Outgoing};
use unipi_gate::{consts, evok};

fn init_log(level: LogLevel) {
    let timer = fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string());

    // Configure a custom event formatter
    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_source_location(true)
        .with_timer(timer)
        .compact();

    let level = LevelFilter::from(level);
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    if level > LevelFilter::INFO {
        // Transport crates are too chatty below info.
        for directive in [
            "rumqttc=info",
            "tungstenite=info",
            "tokio_tungstenite=info",
            "reqwest=info",
            "hyper_util=info",
        ] {
            filter = filter.add_directive(directive.parse().expect("Static directive is valid"));
        }
    }

    fmt().event_format(format).with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;
    init_log(config.log_level);

    let mqtt = &config.mqtt;
    info!(
        "Starting {} {}. MQTT: {}:{}, controllers: {:?}",
        consts::GATE_NAME,
        consts::GATE_VERSION,
        mqtt.host,
        mqtt.port,
        config
            .controllers
            .iter()
            .map(|c| c.host.as_str())
            .collect::<Vec<_>>()
    );

    let ha_init = homeassistant::Initiator::new(
        &mqtt.client_id(),
        &mqtt.host,
        mqtt.port,
        &mqtt.username,
        &mqtt.password,
    )
    .await?;
    let ha = Arc::new(ha_init.start().await);

    let mode = if config.cleanup {
        Mode::Cleanup
    } else {
        Mode::Normal
    };
    let bridge = Arc::new(Bridge::new(ha.sender(), mode));

    let mut controllers = Vec::with_capacity(config.controllers.len());
    for controller in &config.controllers {
        let evok = evok::connect(controller)
            .await
            .with_context(|| format!("UniPi {} startup failed", controller.host))?;
        bridge.discover(&evok.snapshot, evok.commands.clone()).await?;
        controllers.push(evok);
    }

    if mode == Mode::Cleanup {
        ha.send(Outgoing::Disconnect).await?;
        // The reading loop ends once the disconnect (queued after all
        // removals) went out.
        while ha.recv().await.is_some() {}
        info!("Cleanup finished");
        return Ok(());
    }

    // UniPi -> MQTT, one task per controller
    let mut tasks = Vec::with_capacity(controllers.len());
    for controller in controllers {
        let device_id = controller.snapshot.identity.id();
        tasks.push(tokio::spawn(
            bridge.clone().run_forward(device_id, controller.events),
        ));
    }

    info!("unipi-gate initialized.");

    // MQTT -> UniPi
    let task_mqtt_to_unipi = async move {
        while let Some(msg) = ha.recv().await {
            bridge.reverse(msg).await;
        }
        info!("MQTT->UniPi task finishing");
    };

    // Both sides are meant to run forever; if one finishes, quit.
    tokio::select! {
        _ = task_mqtt_to_unipi => error!("MQTT side died"),
        _ = futures_util::future::join_all(tasks) => error!("All UniPi controllers died"),
    }
    anyhow::bail!("Bridge stopped")
}
