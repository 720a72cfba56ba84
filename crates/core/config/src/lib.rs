use std::time::Duration;
use std::{env, fs, path::Path, str::FromStr};

use cached::proc_macro::cached;
use futures_locks::RwLock;
use once_cell::sync::Lazy;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Kafka {
  pub brokers: Vec<String>,
  pub client_id: String,
  pub group_id: String,
  pub from_beginning: bool,
  pub session_timeout_ms: u32,
  pub probe_timeout_ms: u64,
}

impl Default for Kafka {
  fn default() -> Self {
    Self {
      brokers: vec!["localhost:9092".to_string()],
      client_id: "tidb-cdc-consumer".to_string(),
      group_id: "tidb-cdc-consumer-group".to_string(),
      from_beginning: false,
      session_timeout_ms: 30000,
      probe_timeout_ms: 5000,
    }
  }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Topics {
  pub cdc_changes: String,
}

impl Default for Topics {
  fn default() -> Self {
    Self { cdc_changes: "tidb-cdc-changes".to_string() }
  }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Hosts {
  pub liveness: String,
}

impl Default for Hosts {
  fn default() -> Self {
    Self { liveness: "0.0.0.0:3002".to_string() }
  }
}

impl Hosts {
  /// Replace the port of the liveness address, keeping its interface
  pub fn set_liveness_port(&mut self, port: u16) {
    let host = match self.liveness.rsplit_once(':') {
      Some((host, _)) => host.to_string(),
      None => self.liveness.clone(),
    };
    self.liveness = format!("{}:{}", host, port);
  }
}

/// Bounded retry applied while the broker is unreachable at boot
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Startup {
  pub max_attempts: u32,
  pub retry_delay_secs: u64,
}

impl Default for Startup {
  fn default() -> Self {
    Self { max_attempts: 10, retry_delay_secs: 15 }
  }
}

impl Startup {
  pub fn retry_delay(&self) -> Duration {
    Duration::from_secs(self.retry_delay_secs)
  }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Shutdown {
  pub grace_period_secs: u64,
}

impl Default for Shutdown {
  fn default() -> Self {
    Self { grace_period_secs: 30 }
  }
}

impl Shutdown {
  pub fn grace_period(&self) -> Duration {
    Duration::from_secs(self.grace_period_secs)
  }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
  #[default]
  Json,
  Pretty,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Logging {
  pub format: LogFormat,
  pub level: String,
}

impl Default for Logging {
  fn default() -> Self {
    Self { format: LogFormat::Json, level: "info".to_string() }
  }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
  pub service_name: String,
  pub kafka: Kafka,
  pub topics: Topics,
  pub hosts: Hosts,
  pub startup: Startup,
  pub shutdown: Shutdown,
  pub logging: Logging,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      service_name: "tidb-cdc-consumer".to_string(),
      kafka: Kafka::default(),
      topics: Topics::default(),
      hosts: Hosts::default(),
      startup: Startup::default(),
      shutdown: Shutdown::default(),
      logging: Logging::default(),
    }
  }
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str, warnings: &mut Vec<String>) -> Option<T> {
  match raw.trim().parse::<T>() {
    Ok(v) => Some(v),
    Err(_) => {
      warnings.push(format!("ignoring invalid environment override {}={:?}", key, raw));
      None
    }
  }
}

impl Settings {
  /// Apply environment-style overrides on top of the file/default values.
  /// `lookup` is `std::env::var` in production. Rejected overrides are
  /// described in `warnings`; they are logged once logging is set up.
  pub fn apply_env<F>(&mut self, lookup: F, warnings: &mut Vec<String>)
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(brokers) = lookup("KAFKA_BROKERS") {
      let list: Vec<String> =
        brokers.split(',').map(|b| b.trim().to_string()).filter(|b| !b.is_empty()).collect();
      if list.is_empty() {
        let kept = &self.kafka.brokers;
        warnings.push(format!("KAFKA_BROKERS is set but empty, keeping {:?}", kept));
      } else {
        self.kafka.brokers = list;
      }
    }

    if let Some(topic) = lookup("KAFKA_TOPIC").filter(|t| !t.trim().is_empty()) {
      self.topics.cdc_changes = topic.trim().to_string();
    }

    if let Some(group) = lookup("KAFKA_GROUP_ID").filter(|g| !g.trim().is_empty()) {
      self.kafka.group_id = group.trim().to_string();
    }

    if let Some(v) = lookup("KAFKA_FROM_BEGINNING") {
      if let Some(b) = parse_or_warn::<bool>("KAFKA_FROM_BEGINNING", &v, warnings) {
        self.kafka.from_beginning = b;
      }
    }

    if let Some(v) = lookup("HEALTH_PORT").or_else(|| lookup("PORT")) {
      if let Some(port) = parse_or_warn::<u16>("HEALTH_PORT", &v, warnings) {
        self.hosts.set_liveness_port(port);
      }
    }

    if let Some(v) = lookup("CONNECT_MAX_ATTEMPTS") {
      match parse_or_warn::<u32>("CONNECT_MAX_ATTEMPTS", &v, warnings) {
        Some(0) => warnings.push("CONNECT_MAX_ATTEMPTS must be at least 1, ignoring".into()),
        Some(n) => self.startup.max_attempts = n,
        None => {}
      }
    }

    if let Some(v) = lookup("CONNECT_RETRY_DELAY_SECS") {
      if let Some(secs) = parse_or_warn::<u64>("CONNECT_RETRY_DELAY_SECS", &v, warnings) {
        self.startup.retry_delay_secs = secs;
      }
    }

    if let Some(v) = lookup("SHUTDOWN_GRACE_SECS") {
      if let Some(secs) = parse_or_warn::<u64>("SHUTDOWN_GRACE_SECS", &v, warnings) {
        self.shutdown.grace_period_secs = secs;
      }
    }

    if let Some(v) = lookup("LOG_FORMAT") {
      match v.trim().to_ascii_lowercase().as_str() {
        "json" => self.logging.format = LogFormat::Json,
        "pretty" | "text" => self.logging.format = LogFormat::Pretty,
        other => warnings.push(format!(
          "unknown LOG_FORMAT {:?}, keeping {:?}",
          other, self.logging.format
        )),
      }
    }

    if let Some(name) = lookup("SERVICE_NAME").filter(|n| !n.trim().is_empty()) {
      self.service_name = name.trim().to_string();
    }
  }

  /// Read settings from a YAML file, falling back to defaults when the file
  /// is missing or unreadable
  pub fn from_file(path: &Path, warnings: &mut Vec<String>) -> Settings {
    if !path.exists() {
      return Settings::default();
    }

    match fs::read_to_string(path) {
      Ok(raw) => match serde_yaml::from_str::<Settings>(&raw) {
        Ok(settings) => settings,
        Err(err) => {
          let path = path.display();
          warnings.push(format!("failed to deserialize {}: {}, using defaults", path, err));
          Settings::default()
        }
      },
      Err(err) => {
        warnings.push(format!("failed to read {}: {}, using defaults", path.display(), err));
        Settings::default()
      }
    }
  }
}

/// Settings together with what went wrong while loading them
#[derive(Debug, Clone, Default)]
pub struct LoadedSettings {
  pub settings: Settings,
  pub warnings: Vec<String>,
}

impl LoadedSettings {
  pub fn load<F>(path: &Path, lookup: F) -> LoadedSettings
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut warnings = Vec::new();
    let mut settings = Settings::from_file(path, &mut warnings);
    settings.apply_env(lookup, &mut warnings);
    LoadedSettings { settings, warnings }
  }
}

/// Configuration builder
static CONFIG_BUILDER: Lazy<RwLock<LoadedSettings>> = Lazy::new(|| {
  RwLock::new({
    let path = env::var("CONFIG_PATH").unwrap_or_else(|_| {
      let env_mode = env::var("ENV").unwrap_or("dev".to_string());
      format!("/cdcwatch.{}.yaml", env_mode)
    });

    LoadedSettings::load(Path::new(&path), |key| env::var(key).ok())
  })
});

pub async fn read() -> Settings {
  CONFIG_BUILDER.read().await.settings.clone()
}

/// Problems met while loading the configuration, for logging once a
/// subscriber is installed
pub async fn load_warnings() -> Vec<String> {
  CONFIG_BUILDER.read().await.warnings.clone()
}

#[cached(time = 300)]
pub async fn config() -> Settings {
  read().await
}
