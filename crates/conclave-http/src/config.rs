//! Validated configuration for the coordinator and participant servers.
//!
//! Defaults live here and nowhere else. Both configs load from a JSON file
//! and are validated as a whole before a server binds; every violation has
//! its own error so startup failures name the offending knob.

use std::path::{Path, PathBuf};
use std::time::Duration;

use conclave_core::coordinator::CoordinatorSettings;
use conclave_core::msg::Endpoint;
use conclave_core::participant::ParticipantSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid JSON")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("min_participants must be at least 1")]
    MinParticipants,
    #[error("max_participants ({max}) must be at least min_participants ({min})")]
    ParticipantBounds { min: usize, max: usize },
    #[error("{field} must be at least 1 second")]
    ZeroInterval { field: &'static str },
    #[error("client_timeout ({client_timeout}s) must be at least ping_interval ({ping_interval}s)")]
    LivenessWindow {
        client_timeout: u64,
        ping_interval: u64,
    },
    #[error(
        "coordinator_timeout ({coordinator_timeout}s) must be at least health_check_interval ({health_check_interval}s)"
    )]
    HealthWindow {
        coordinator_timeout: u64,
        health_check_interval: u64,
    },
    #[error("TLS file {0} does not exist")]
    MissingTlsFile(PathBuf),
    #[error("TLS termination is delegated to a fronting proxy; unset tls and terminate there")]
    TlsUnsupported,
}

/// Certificate material for a deployment that fronts the server with a
/// TLS-terminating proxy. Validated for existence so a broken deployment
/// fails at startup instead of at the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Coordinator knobs. All intervals are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    /// Fewest connected participants an event may be created with.
    pub min_participants: usize,
    /// Most participants selected into one event.
    pub max_participants: usize,
    /// Cadence of the announce rounds driven by the binary.
    pub event_announce_interval: u64,
    /// How long an active event may wait for partials before eviction.
    pub event_timeout: u64,
    /// Cadence of the liveness loop.
    pub ping_interval: u64,
    /// How long a roster entry stays alive without a ping.
    pub client_timeout: u64,
    pub tls: Option<TlsConfig>,
    /// Hex-encoded Ed25519 seed; a fresh identity is generated when absent.
    pub private_key: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            min_participants: 3,
            max_participants: 10,
            event_announce_interval: 40,
            event_timeout: 120,
            ping_interval: 10,
            client_timeout: 30,
            tls: None,
            private_key: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_participants < 1 {
            return Err(ConfigError::MinParticipants);
        }
        if self.max_participants < self.min_participants {
            return Err(ConfigError::ParticipantBounds {
                min: self.min_participants,
                max: self.max_participants,
            });
        }
        for (field, value) in [
            ("event_announce_interval", self.event_announce_interval),
            ("event_timeout", self.event_timeout),
            ("ping_interval", self.ping_interval),
        ] {
            if value < 1 {
                return Err(ConfigError::ZeroInterval { field });
            }
        }
        if self.client_timeout < self.ping_interval {
            return Err(ConfigError::LivenessWindow {
                client_timeout: self.client_timeout,
                ping_interval: self.ping_interval,
            });
        }
        if let Some(tls) = &self.tls {
            for file in [&tls.cert_file, &tls.key_file] {
                if !file.exists() {
                    return Err(ConfigError::MissingTlsFile(file.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            min_participants: self.min_participants,
            max_participants: self.max_participants,
            event_timeout: Duration::from_secs(self.event_timeout),
            ping_interval: Duration::from_secs(self.ping_interval),
            client_timeout: Duration::from_secs(self.client_timeout),
        }
    }
}

/// Participant knobs. All intervals are in seconds unless suffixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParticipantConfig {
    pub coordinator_host: String,
    pub coordinator_port: u16,
    pub listen_host: String,
    /// Port to listen on; 0 binds an ephemeral port.
    pub listen_port: u16,
    /// Cadence of the liveness ping towards the coordinator.
    pub health_check_interval: u64,
    /// How long the coordinator may stay unreachable before re-registering.
    pub coordinator_timeout: u64,
    pub connect_timeout: u64,
    pub read_timeout: u64,
    /// Pause between accepting an event and fanning out shares, so peers
    /// have likely registered the event first.
    pub share_delay_ms: u64,
    /// Stable participant id; generated per process when absent.
    pub participant_id: Option<String>,
    /// Hex-encoded Ed25519 seed; a fresh identity is generated when absent.
    pub private_key: Option<String>,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            coordinator_host: "127.0.0.1".into(),
            coordinator_port: 8080,
            listen_host: "127.0.0.1".into(),
            listen_port: 0,
            health_check_interval: 10,
            coordinator_timeout: 30,
            connect_timeout: 2,
            read_timeout: 5,
            share_delay_ms: 100,
            participant_id: None,
            private_key: None,
        }
    }
}

impl ParticipantConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("health_check_interval", self.health_check_interval),
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
        ] {
            if value < 1 {
                return Err(ConfigError::ZeroInterval { field });
            }
        }
        if self.coordinator_timeout < self.health_check_interval {
            return Err(ConfigError::HealthWindow {
                coordinator_timeout: self.coordinator_timeout,
                health_check_interval: self.health_check_interval,
            });
        }
        Ok(())
    }

    pub fn coordinator_endpoint(&self) -> Endpoint {
        Endpoint::new(self.coordinator_host.clone(), self.coordinator_port)
    }

    pub fn settings(&self) -> ParticipantSettings {
        ParticipantSettings {
            share_delay: Duration::from_millis(self.share_delay_ms),
            ping_interval: Duration::from_secs(self.health_check_interval),
            coordinator_timeout: Duration::from_secs(self.coordinator_timeout),
            ..ParticipantSettings::default()
        }
    }
}
