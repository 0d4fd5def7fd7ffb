// Relay process configuration.
//
// Settings are layered, later layers winning:
//
//   1. built-in defaults (`RelayConfig::default`)
//   2. an optional JSON file (`--config <path>`)
//   3. environment variables
//   4. command-line flags (applied by the binary)
//
// Environment variables:
//
//   JWT_SECRET_KEY      HS256 secret for bearer tokens
//   UDP_PORT            listen port
//   CONNECTION_TIMEOUT  session idle timeout
//   RELAY_BIND_ADDRESS  listen address
//   SWEEP_INTERVAL      time between expiry sweeps
//   ORPHAN_GRACE        how long peers wait for a replacement owner
//   RELAY_WORKERS       datagram worker threads
//   RELAY_QUEUE_DEPTH   received datagrams buffered ahead of the workers
//   RELAY_REGISTRY      path of the user/lobby registry file
//
// Durations are written as `500ms`, `30s`, `2m`, `1h`, or a bare number of
// seconds. The same forms are accepted in the JSON file, where a plain JSON
// number also means seconds.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::sweeper::SweepPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    BadValue { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Everything the relay process needs to start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    pub port: u16,
    pub bind_address: IpAddr,
    /// Sessions idle for longer than this are evicted.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// How long peer edges outlive their owner's session.
    pub orphan_grace: Duration,
    pub workers: usize,
    pub queue_depth: usize,
    pub jwt_secret: String,
    pub registry_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            idle_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            orphan_grace: Duration::from_secs(10),
            workers: 4,
            queue_depth: 1024,
            jwt_secret: String::new(),
            registry_path: None,
        }
    }
}

/// On-disk form. Every field is optional and overrides the default.
#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    port: Option<u16>,
    bind_address: Option<IpAddr>,
    idle_timeout: Option<DurationValue>,
    sweep_interval: Option<DurationValue>,
    orphan_grace: Option<DurationValue>,
    workers: Option<usize>,
    queue_depth: Option<usize>,
    jwt_secret: Option<String>,
    registry_path: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    fn resolve(self, key: &str) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(secs)),
            DurationValue::Text(text) => parse_duration(&text).ok_or(ConfigError::BadValue {
                key: key.into(),
                value: text,
            }),
        }
    }
}

impl RelayConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overridden by a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::default();
        if let Some(port) = file.port {
            config.port = port;
        }
        if let Some(addr) = file.bind_address {
            config.bind_address = addr;
        }
        if let Some(value) = file.idle_timeout {
            config.idle_timeout = value.resolve("idle_timeout")?;
        }
        if let Some(value) = file.sweep_interval {
            config.sweep_interval = value.resolve("sweep_interval")?;
        }
        if let Some(value) = file.orphan_grace {
            config.orphan_grace = value.resolve("orphan_grace")?;
        }
        if let Some(workers) = file.workers {
            config.workers = workers;
        }
        if let Some(depth) = file.queue_depth {
            config.queue_depth = depth;
        }
        if let Some(secret) = file.jwt_secret {
            config.jwt_secret = secret;
        }
        if let Some(registry) = file.registry_path {
            config.registry_path = Some(registry);
        }
        Ok(config)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(secret) = lookup("JWT_SECRET_KEY") {
            self.jwt_secret = secret;
        }
        if let Some(value) = lookup("UDP_PORT") {
            self.port = parse_value("UDP_PORT", value)?;
        }
        if let Some(value) = lookup("CONNECTION_TIMEOUT") {
            self.idle_timeout = duration_value("CONNECTION_TIMEOUT", value)?;
        }
        if let Some(value) = lookup("RELAY_BIND_ADDRESS") {
            self.bind_address = parse_value("RELAY_BIND_ADDRESS", value)?;
        }
        if let Some(value) = lookup("SWEEP_INTERVAL") {
            self.sweep_interval = duration_value("SWEEP_INTERVAL", value)?;
        }
        if let Some(value) = lookup("ORPHAN_GRACE") {
            self.orphan_grace = duration_value("ORPHAN_GRACE", value)?;
        }
        if let Some(value) = lookup("RELAY_WORKERS") {
            self.workers = parse_value("RELAY_WORKERS", value)?;
        }
        if let Some(value) = lookup("RELAY_QUEUE_DEPTH") {
            self.queue_depth = parse_value("RELAY_QUEUE_DEPTH", value)?;
        }
        if let Some(path) = lookup("RELAY_REGISTRY") {
            self.registry_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid("JWT secret is empty"));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("worker count must be at least 1"));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue depth must be at least 1"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("sweep interval must be positive"));
        }
        Ok(())
    }

    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            idle_timeout: self.idle_timeout,
            orphan_grace: self.orphan_grace,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::BadValue {
        key: key.into(),
        value,
    })
}

fn duration_value(key: &str, value: String) -> Result<Duration, ConfigError> {
    parse_duration(&value).ok_or(ConfigError::BadValue {
        key: key.into(),
        value,
    })
}

/// Parse a duration in Go's `time.ParseDuration` form (`500ms`, `1m30s`,
/// `1.5s`, `100us`), or a bare number of seconds. Signs are not accepted.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().ok().map(Duration::from_secs);
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = text;
    let mut total_ns: u128 = 0;
    while !rest.is_empty() {
        let (number, tail) = rest.split_at(rest.find(|c| !is_number(c)).unwrap_or(rest.len()));
        let (unit, tail) = tail.split_at(tail.find(is_number).unwrap_or(tail.len()));
        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3600 * NANOS_PER_SEC,
            _ => return None,
        };
        total_ns = total_ns.checked_add(scaled(number, scale)?)?;
        rest = tail;
    }

    let secs = u64::try_from(total_ns / NANOS_PER_SEC).ok()?;
    let nanos = u32::try_from(total_ns % NANOS_PER_SEC).ok()?;
    Some(Duration::new(secs, nanos))
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// `number` (digits with at most one `.`) times `scale` nanoseconds.
/// Fraction digits below one nanosecond are truncated.
fn scaled(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut value = whole.checked_mul(scale)?;
    let mut place = scale;
    for digit in fraction.bytes() {
        place /= 10;
        value = value.checked_add(u128::from(digit - b'0') * place)?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.json", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.workers, 4);
        // An empty secret must be supplied before the relay can start.
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duration_forms() {
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 2m "), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("10 parsecs"), None);
        assert_eq!(parse_duration("-5s"), None);
    }

    #[test]
    fn compound_and_fractional_durations() {
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration(".5s"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("100us"), Some(Duration::from_micros(100)));
        assert_eq!(parse_duration("100µs"), Some(Duration::from_micros(100)));
        assert_eq!(parse_duration("250ns"), Some(Duration::from_nanos(250)));
        assert_eq!(
            parse_duration("2h45m0.5s"),
            Some(Duration::from_secs(2 * 3600 + 45 * 60) + Duration::from_millis(500))
        );
        assert_eq!(parse_duration("1.5"), None);
        assert_eq!(parse_duration("1.2.3s"), None);
        assert_eq!(parse_duration(".s"), None);
        assert_eq!(parse_duration("1m30"), None);
        assert_eq!(parse_duration("+5s"), None);
    }

    #[test]
    fn environment_overrides() {
        let mut config = RelayConfig::default();
        config
            .apply_env(env(&[
                ("JWT_SECRET_KEY", "hunter2"),
                ("UDP_PORT", "9000"),
                ("CONNECTION_TIMEOUT", "45s"),
                ("RELAY_BIND_ADDRESS", "127.0.0.1"),
                ("RELAY_WORKERS", "8"),
                ("RELAY_REGISTRY", "/etc/relay/registry.json"),
            ]))
            .unwrap();

        assert_eq!(config.jwt_secret, "hunter2");
        assert_eq!(config.port, 9000);
        assert_eq!(config.idle_timeout, Duration::from_secs(45));
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.workers, 8);
        assert_eq!(
            config.registry_path,
            Some(PathBuf::from("/etc/relay/registry.json"))
        );
        // Untouched settings keep their defaults.
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_environment_value_is_reported() {
        let mut config = RelayConfig::default();
        let err = config.apply_env(env(&[("UDP_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { ref key, .. } if key == "UDP_PORT"));

        let err = config
            .apply_env(env(&[("CONNECTION_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { .. }));
    }

    #[test]
    fn file_then_environment_precedence() {
        let path = temp_file(
            "lobby-relay-config",
            r#"{ "port": 7000, "jwt_secret": "from-file", "idle_timeout": 60,
                 "orphan_grace": "3s", "queue_depth": 16 }"#,
        );
        let mut config = RelayConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.port, 7000);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.orphan_grace, Duration::from_secs(3));
        assert_eq!(config.queue_depth, 16);

        config
            .apply_env(env(&[("JWT_SECRET_KEY", "from-env"), ("UDP_PORT", "7001")]))
            .unwrap();
        assert_eq!(config.jwt_secret, "from-env");
        assert_eq!(config.port, 7001);
        assert_eq!(config.queue_depth, 16);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let path = temp_file("lobby-relay-config-typo", r#"{ "prot": 7000 }"#);
        let result = RelayConfig::from_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let valid = RelayConfig {
            jwt_secret: "s".into(),
            ..RelayConfig::default()
        };
        assert!(valid.validate().is_ok());

        for broken in [
            RelayConfig {
                workers: 0,
                ..valid.clone()
            },
            RelayConfig {
                queue_depth: 0,
                ..valid.clone()
            },
            RelayConfig {
                sweep_interval: Duration::ZERO,
                ..valid.clone()
            },
        ] {
            assert!(broken.validate().is_err());
        }
    }
}
