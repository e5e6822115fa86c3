use crate::consts;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::LevelFilter;
use uuid::Uuid;

/// Locations searched when no config file is given explicitly.
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["/etc/unipi-gate.yaml", "./unipi-gate.yaml"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    pub host: String,
    #[serde(default = "default_rest_port")]
    pub rest_port: u16,
    #[serde(default)]
    pub rest_ssl: bool,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default)]
    pub log_level: Option<LogLevel>,
}

/// Configuration after the file and the command line are combined.
#[derive(Debug, PartialEq)]
pub struct Settings {
    pub mqtt: MqttConfig,
    pub controllers: Vec<ControllerConfig>,
    pub cleanup: bool,
    pub log_level: LogLevel,
}

fn default_mqtt_port() -> u16 {
    1883
}
fn default_rest_port() -> u16 {
    8080
}
fn default_ws_port() -> u16 {
    80
}

impl ControllerConfig {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            rest_port: default_rest_port(),
            rest_ssl: false,
            ws_port: default_ws_port(),
        }
    }

    pub fn rest_url(&self) -> String {
        let scheme = if self.rest_ssl { "https" } else { "http" };
        format!("{}://{}:{}/rest", scheme, self.host, self.rest_port)
    }

    pub fn ws_url(&self) -> String {
        if self.ws_port == default_ws_port() {
            format!("ws://{}/ws", self.host)
        } else {
            format!("ws://{}:{}/ws", self.host, self.ws_port)
        }
    }
}

impl MqttConfig {
    /// Configured client id, or a fresh one per process so two gates never
    /// kick each other off the broker.
    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("{}-{}", consts::GATE_NAME, Uuid::new_v4().simple()),
        }
    }
}

/// Command line surface. Everything is optional here as long as the
/// config file fills the gaps.
#[derive(clap::Parser, Debug, Default)]
#[command(name = "unipi-gate", about = "UniPi EVOK <-> HomeAssistant MQTT bridge")]
pub struct Args {
    /// YAML config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    // MQTT connection
    #[arg(long, alias = "ha-ip")]
    pub mqtt_host: Option<String>,
    #[arg(long)]
    pub mqtt_port: Option<u16>,
    #[arg(long)]
    pub mqtt_username: Option<String>,
    #[arg(long)]
    pub mqtt_password: Option<String>,
    #[arg(long)]
    pub mqtt_client_id: Option<String>,

    /// UniPi controller host, may be repeated
    #[arg(long = "unipi-host", alias = "unipi-ip")]
    pub unipi_hosts: Vec<String>,

    /// Unregister all entities of configured controllers and exit
    #[arg(long)]
    pub cleanup: bool,

    #[arg(short, long, value_enum)]
    pub log_level: Option<LogLevel>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(filename: P) -> anyhow::Result<Self> {
        let handle = File::open(filename)?;
        let data: Config = serde_yaml::from_reader(handle)?;

        Ok(data)
    }

    /// Load the config file (explicit or the first default that exists) and
    /// apply command line overrides.
    pub fn load(args: &Args) -> anyhow::Result<Settings> {
        let path = args.config.clone().or_else(|| {
            DEFAULT_CONFIG_FILES
                .iter()
                .map(PathBuf::from)
                .find(|path| path.exists())
        });
        let config = match path {
            Some(path) => Config::from_file(&path)
                .map_err(|err| anyhow::anyhow!("Unable to read {}: {}", path.display(), err))?,
            None => Config::default(),
        };
        config.merge(args)
    }

    fn merge(mut self, args: &Args) -> anyhow::Result<Settings> {
        if let Some(host) = &args.mqtt_host {
            match &mut self.mqtt {
                Some(mqtt) => mqtt.host = host.clone(),
                None => {
                    self.mqtt = Some(MqttConfig {
                        host: host.clone(),
                        port: default_mqtt_port(),
                        username: String::new(),
                        password: String::new(),
                        client_id: None,
                    })
                }
            }
        }
        let Some(mut mqtt) = self.mqtt.take() else {
            anyhow::bail!("MQTT host is not configured");
        };
        if let Some(port) = args.mqtt_port {
            mqtt.port = port;
        }
        if let Some(username) = &args.mqtt_username {
            mqtt.username = username.clone();
        }
        if let Some(password) = &args.mqtt_password {
            mqtt.password = password.clone();
        }
        if let Some(client_id) = &args.mqtt_client_id {
            mqtt.client_id = Some(client_id.clone());
        }

        self.controllers
            .extend(args.unipi_hosts.iter().map(|host| ControllerConfig::new(host)));
        if self.controllers.is_empty() {
            anyhow::bail!("No UniPi controllers configured");
        }

        Ok(Settings {
            mqtt,
            controllers: self.controllers,
            cleanup: self.cleanup || args.cleanup,
            log_level: args.log_level.or(self.log_level).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const YAML: &str = r#"
mqtt:
  host: broker.lan
  username: gate
  password: secret
controllers:
  - host: 10.0.0.5
  - host: 10.0.0.6
    rest_port: 8443
    rest_ssl: true
    ws_port: 8081
log_level: debug
"#;

    #[test]
    fn parses_yaml() {
        let config: Config = serde_yaml::from_str(YAML).unwrap();
        let mqtt = config.mqtt.as_ref().unwrap();
        assert_eq!(mqtt.host, "broker.lan");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(config.controllers.len(), 2);
        assert_eq!(config.controllers[0], ControllerConfig::new("10.0.0.5"));
        assert_eq!(config.log_level, Some(LogLevel::Debug));
        assert!(!config.cleanup);
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = "controllers:\n  - host: a\n    port: 1\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn controller_urls() {
        let config: Config = serde_yaml::from_str(YAML).unwrap();
        assert_eq!(config.controllers[0].rest_url(), "http://10.0.0.5:8080/rest");
        assert_eq!(config.controllers[0].ws_url(), "ws://10.0.0.5/ws");
        assert_eq!(
            config.controllers[1].rest_url(),
            "https://10.0.0.6:8443/rest"
        );
        assert_eq!(config.controllers[1].ws_url(), "ws://10.0.0.6:8081/ws");
    }

    #[test]
    fn command_line_only() {
        let args = Args::parse_from([
            "unipi-gate",
            "--ha-ip",
            "192.168.1.2",
            "--unipi-ip",
            "192.168.1.10",
            "--unipi-host",
            "192.168.1.11",
            "--cleanup",
        ]);
        let config = Config::default().merge(&args).unwrap();
        assert_eq!(config.mqtt.host, "192.168.1.2");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(
            config.controllers,
            vec![
                ControllerConfig::new("192.168.1.10"),
                ControllerConfig::new("192.168.1.11"),
            ]
        );
        assert!(config.cleanup);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn command_line_overrides_file() {
        let file: Config = serde_yaml::from_str(YAML).unwrap();
        let args = Args::parse_from([
            "unipi-gate",
            "--mqtt-host",
            "other.lan",
            "--mqtt-port",
            "8883",
            "--unipi-host",
            "10.0.0.7",
            "--log-level",
            "trace",
        ]);
        let config = file.merge(&args).unwrap();
        assert_eq!(config.mqtt.host, "other.lan");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.username, "gate");
        assert_eq!(config.controllers.len(), 3);
        assert_eq!(config.log_level, LogLevel::Trace);
    }

    #[test]
    fn requires_mqtt_and_controllers() {
        let args = Args::parse_from(["unipi-gate", "--unipi-host", "10.0.0.5"]);
        assert!(Config::default().merge(&args).is_err());

        let args = Args::parse_from(["unipi-gate", "--mqtt-host", "broker"]);
        assert!(Config::default().merge(&args).is_err());
    }

    #[test]
    fn log_levels() {
        assert_eq!(LevelFilter::from(LogLevel::default()), LevelFilter::INFO);
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::TRACE);
    }

    #[test]
    fn client_id() {
        let mut mqtt = MqttConfig {
            host: "broker".into(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: Some("fixed".into()),
        };
        assert_eq!(mqtt.client_id(), "fixed");
        mqtt.client_id = None;
        let first = mqtt.client_id();
        let second = mqtt.client_id();
        assert!(first.starts_with("unipi-gate-"));
        assert_eq!(first.len(), "unipi-gate-".len() + 32);
        assert_ne!(first, second);

        mqtt.client_id = Some(String::new());
        assert_ne!(mqtt.client_id(), "");
    }

    #[test]
    fn file_log_level_applies_without_override() {
        let file: Config = serde_yaml::from_str(YAML).unwrap();
        let args = Args::parse_from(["unipi-gate"]);
        let settings = file.merge(&args).unwrap();
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.mqtt.username, "gate");
    }
}
