//! Daemon configuration.
//!
//! Loaded from a TOML file with a `[server]` table and a `[[sources]]`
//! array. Every field of `[server]` has a default, and a missing
//! `[[sources]]` array falls back to the built-in fleet, so an empty file
//! is a valid configuration.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:9000"
//! broadcast_interval_ms = 500
//!
//! [[sources]]
//! id = 101
//! kind = "temperature"
//! interval_ms = 2000
//! current = 20.0
//! min = -10.0
//! max = 40.0
//! max_step = 0.5
//!
//! [[sources]]
//! id = 333
//! kind = "status"
//! interval_ms = 5000
//! statuses = ["OK", "WARNING"]
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tsim_core::{
    DomainError, GpsState, ScalarState, Source, SourceId, SourceKind, SourceState, StatusState,
    StatusText,
};

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid source: {0}")]
    Source(#[from] DomainError),

    #[error("Status {text:?} of source {id} exceeds {max} bytes")]
    StatusTooLong {
        id: SourceId,
        text: String,
        max: usize,
    },

    #[error("Duplicate source id {0}")]
    DuplicateId(SourceId),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Server settings
// ============================================================================

/// Listener and event-loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub backlog: i32,
    pub broadcast_interval_ms: u64,
    /// Upper bound on a single readiness wait.
    pub poll_timeout_ms: u64,
    pub initial_watch_capacity: usize,
    /// Unsent bytes a client may accumulate before it is dropped.
    pub max_outbox_bytes: usize,
    /// Seed for the process-wide random generator; random if absent.
    pub seed: Option<u64>,
}

pub const DEFAULT_BACKLOG: i32 = 10;
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_WATCH_CAPACITY: usize = 10;
pub const DEFAULT_MAX_OUTBOX_BYTES: usize = 64 * 1024;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            backlog: DEFAULT_BACKLOG,
            broadcast_interval_ms: DEFAULT_BROADCAST_INTERVAL_MS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            initial_watch_capacity: DEFAULT_WATCH_CAPACITY,
            max_outbox_bytes: DEFAULT_MAX_OUTBOX_BYTES,
            seed: None,
        }
    }
}

impl ServerConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid(format!(
                "backlog must be positive, got {}",
                self.backlog
            )));
        }
        if self.broadcast_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "broadcast_interval_ms must be positive".into(),
            ));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_timeout_ms must be positive".into(),
            ));
        }
        if self.initial_watch_capacity == 0 {
            return Err(ConfigError::Invalid(
                "initial_watch_capacity must be at least 1".into(),
            ));
        }
        if self.max_outbox_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_outbox_bytes must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Source definitions
// ============================================================================

/// One `[[sources]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub id: u32,
    pub interval_ms: u64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(flatten)]
    pub params: SourceParams,
}

/// Per-kind parameters, selected by the `kind` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceParams {
    Temperature(ScalarParams),
    Pressure(ScalarParams),
    Humidity(ScalarParams),
    Gps(GpsParams),
    Status(StatusParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarParams {
    pub current: f32,
    pub min: f32,
    pub max: f32,
    pub max_step: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsParams {
    pub lat: f64,
    pub lon: f64,
    pub max_step: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusParams {
    #[serde(default)]
    pub statuses: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl SourceParams {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Temperature(_) => SourceKind::Temperature,
            Self::Pressure(_) => SourceKind::Pressure,
            Self::Humidity(_) => SourceKind::Humidity,
            Self::Gps(_) => SourceKind::Gps,
            Self::Status(_) => SourceKind::Status,
        }
    }
}

impl From<ScalarParams> for ScalarState {
    fn from(p: ScalarParams) -> Self {
        Self {
            current: p.current,
            min: p.min,
            max: p.max,
            max_step: p.max_step,
        }
    }
}

impl From<GpsParams> for GpsState {
    fn from(p: GpsParams) -> Self {
        Self {
            lat: p.lat,
            lon: p.lon,
            max_step: p.max_step,
        }
    }
}

impl SourceSpec {
    pub fn new(id: u32, interval_ms: u64, params: SourceParams) -> Self {
        Self {
            id,
            interval_ms,
            active: true,
            params,
        }
    }

    /// Builds a validated [`Source`].
    pub fn build(&self) -> Result<Source, ConfigError> {
        let id = SourceId::new(self.id);
        let state = match &self.params {
            SourceParams::Temperature(p)
            | SourceParams::Pressure(p)
            | SourceParams::Humidity(p) => SourceState::Scalar((*p).into()),
            SourceParams::Gps(p) => SourceState::Gps((*p).into()),
            SourceParams::Status(p) => {
                if let Some(text) = p.statuses.iter().find(|s| !StatusText::fits(s)) {
                    return Err(ConfigError::StatusTooLong {
                        id,
                        text: text.clone(),
                        max: StatusText::MAX_LEN,
                    });
                }
                SourceState::Status(StatusState::new(id, &p.statuses)?)
            }
        };

        let source = Source::new(
            id,
            self.params.kind(),
            state,
            Duration::from_millis(self.interval_ms),
        )?;
        Ok(source.with_active(self.active))
    }
}

/// The built-in fleet used when no `[[sources]]` are configured.
pub fn default_fleet() -> Vec<SourceSpec> {
    let status = SourceSpec::new(
        333,
        5000,
        SourceParams::Status(StatusParams {
            statuses: ["OK", "WARNING", "ERROR", "IDLE", "BUSY"]
                .into_iter()
                .map(String::from)
                .collect(),
        }),
    );
    let ambient = ScalarParams {
        current: 20.0,
        min: -10.0,
        max: 40.0,
        max_step: 0.5,
    };

    vec![
        SourceSpec::new(101, 2000, SourceParams::Temperature(ambient)),
        SourceSpec::new(
            205,
            1000,
            SourceParams::Gps(GpsParams {
                lat: 55.75,
                lon: 37.61,
                max_step: 0.001,
            }),
        ),
        status,
        SourceSpec::new(102, 3000, SourceParams::Temperature(ambient)),
        SourceSpec::new(
            401,
            1500,
            SourceParams::Pressure(ScalarParams {
                current: 1013.25,
                min: 950.0,
                max: 1100.0,
                max_step: 0.5,
            }),
        ),
        SourceSpec::new(
            501,
            2500,
            SourceParams::Humidity(ScalarParams {
                current: 50.0,
                min: 0.0,
                max: 100.0,
                max_step: 1.0,
            }),
        ),
    ]
}

// ============================================================================
// Top-level config
// ============================================================================

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default = "default_fleet")]
    pub sources: Vec<SourceSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            sources: default_fleet(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every setting and every source without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.build_sources().map(|_| ())
    }

    /// Builds the ordered source list for the registry.
    ///
    /// # Errors
    ///
    /// Fails on an empty list, a duplicate id or any invalid source.
    pub fn build_sources(&self) -> Result<Vec<Source>, ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("No sources configured".into()));
        }

        let mut seen = HashSet::with_capacity(self.sources.len());
        let mut sources = Vec::with_capacity(self.sources.len());
        for spec in &self.sources {
            let id = SourceId::new(spec.id);
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateId(id));
            }
            sources.push(spec.build()?);
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_fleet_is_valid() {
        let config = Config::default();
        config.validate().unwrap();

        let sources = config.build_sources().unwrap();
        let ids: Vec<u32> = sources.iter().map(|s| s.id.get()).collect();
        assert_eq!(ids, vec![101, 205, 333, 102, 401, 501]);
        assert!(sources.iter().all(|s| s.active));
        assert_eq!(sources[1].kind, SourceKind::Gps);
        assert_eq!(sources[2].update_interval, Duration::from_millis(5000));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.server.poll_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_parses_every_kind() {
        let config = Config::from_toml_str(
            r#"
            [server]
            bind = "127.0.0.1:9000"
            seed = 42

            [[sources]]
            id = 1
            kind = "pressure"
            interval_ms = 100
            current = 1000
            min = 950
            max = 1100
            max_step = 0.5

            [[sources]]
            id = 2
            kind = "gps"
            interval_ms = 100
            active = false
            lat = -33.9
            lon = 151.2
            max_step = 0.01

            [[sources]]
            id = 3
            kind = "status"
            interval_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.server.seed, Some(42));
        assert_eq!(config.server.backlog, DEFAULT_BACKLOG);

        let sources = config.build_sources().unwrap();
        assert_eq!(sources[0].kind, SourceKind::Pressure);
        assert!(!sources[1].active);
        match &sources[2].state {
            SourceState::Status(s) => assert!(s.is_empty()),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let mut config = Config::default();
        config.sources[3].id = 101;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateId(id)) if id.get() == 101
        ));
    }

    #[test]
    fn test_rejects_empty_source_list() {
        let config = Config {
            sources: Vec::new(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_out_of_range_scalar() {
        let result = Config::from_toml_str(
            r#"
            [[sources]]
            id = 1
            kind = "humidity"
            interval_ms = 100
            current = 150
            min = 0
            max = 100
            max_step = 1
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Source(_))));
    }

    #[test]
    fn test_rejects_long_status() {
        let result = Config::from_toml_str(
            r#"
            [[sources]]
            id = 9
            kind = "status"
            interval_ms = 100
            statuses = ["OK", "THIS STATUS STRING IS FAR TOO LONG FOR THE FIELD"]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::StatusTooLong { .. })));
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let result = Config::from_toml_str(
            r#"
            [[sources]]
            id = 1
            kind = "radiation"
            interval_ms = 100
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_rejects_zero_broadcast_interval() {
        let result = Config::from_toml_str("[server]\nbroadcast_interval_ms = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let toml = "[server]\nbind = \"127.0.0.1:0\"\nmax_outbox_bytes = 1024";
        writeln!(file, "{toml}").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.max_outbox_bytes, 1024);
        assert_eq!(config.sources.len(), 6);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
