//! Application configuration
//!
//! Everything has a default matching a stock trunk-recorder `simplestream`
//! setup. Values can come from a TOML file and be overridden from the
//! command line.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::pan::OutputLayout;
use crate::constants::*;
use crate::error::{ConfigError, NetworkError};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub mixer: MixerConfig,
    pub status: StatusConfig,
}

/// UDP ingest settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub listen_address: String,
    pub udp_port: u16,
    /// Bounded wait for one datagram before re-checking shutdown
    pub recv_timeout_ms: u64,
    pub max_packet_size: usize,
    /// SO_RCVBUF request; the kernel may clamp it
    pub recv_buffer_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            udp_port: DEFAULT_UDP_PORT,
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
            max_packet_size: MAX_PACKET_SIZE,
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
        }
    }
}

impl NetworkConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, NetworkError> {
        let ip: IpAddr = self
            .listen_address
            .parse()
            .map_err(|_| NetworkError::InvalidAddress(self.listen_address.clone()))?;
        Ok(SocketAddr::new(ip, self.udp_port))
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

/// Mix loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MixerConfig {
    pub sample_rate: u32,
    pub tick_ms: u64,
    pub layout: OutputLayout,
    pub stale_timeout_ms: u64,
    /// Audio payloads below this many bytes only refresh liveness
    pub keepalive_threshold: usize,
    pub lag_slack_ms: u64,
    pub max_buffered_ms: u64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            tick_ms: DEFAULT_TICK_MS,
            layout: OutputLayout::Quad,
            stale_timeout_ms: DEFAULT_STALE_TIMEOUT_MS,
            keepalive_threshold: DEFAULT_KEEPALIVE_THRESHOLD,
            lag_slack_ms: DEFAULT_LAG_SLACK_MS,
            max_buffered_ms: DEFAULT_MAX_BUFFERED_MS,
        }
    }
}

impl MixerConfig {
    /// Mono samples consumed from one channel per tick
    pub fn quantum_samples(&self) -> usize {
        (self.sample_rate as u64 * self.tick_ms / 1000) as usize
    }

    /// Mono bytes consumed from one channel per tick
    pub fn quantum_bytes(&self) -> usize {
        self.quantum_samples() * SAMPLE_WIDTH
    }

    /// Bytes written to the output per tick
    pub fn frame_bytes(&self) -> usize {
        self.quantum_bytes() * self.layout.channels()
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn lag_slack(&self) -> Duration {
        Duration::from_millis(self.lag_slack_ms)
    }

    /// Per-channel buffer cap in bytes, always a whole number of samples
    pub fn max_buffered_bytes(&self) -> usize {
        (self.sample_rate as u64 * self.max_buffered_ms / 1000) as usize * SAMPLE_WIDTH
    }
}

/// Status file rendering
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusFormat {
    Text,
    Json,
}

/// Status notifier settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub format: StatusFormat,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(DEFAULT_STATUS_FILE),
            format: StatusFormat::Text,
        }
    }
}

impl AppConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text, &path.display().to_string())
    }

    /// Load an explicit file, else the per-user config file if it exists,
    /// else defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Per-user config location, e.g. `~/.config/quad-stream-mixer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "quad-stream-mixer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject settings the loops cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mixer = &self.mixer;

        if mixer.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be non-zero".into()));
        }
        if mixer.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be non-zero".into()));
        }
        let tick_samples = (mixer.sample_rate as u64)
            .checked_mul(mixer.tick_ms)
            .ok_or_else(|| ConfigError::Invalid("tick_ms is too large".into()))?;
        if tick_samples % 1000 != 0 {
            return Err(ConfigError::Invalid(format!(
                "tick of {} ms at {} Hz is not a whole number of samples",
                mixer.tick_ms, mixer.sample_rate
            )));
        }
        (tick_samples / 1000)
            .checked_mul((SAMPLE_WIDTH * mixer.layout.channels()) as u64)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| ConfigError::Invalid("tick_ms is too large".into()))?;
        if mixer.stale_timeout_ms == 0 {
            return Err(ConfigError::Invalid("stale_timeout_ms must be non-zero".into()));
        }
        (mixer.sample_rate as u64)
            .checked_mul(mixer.max_buffered_ms)
            .and_then(|samples| (samples / 1000).checked_mul(SAMPLE_WIDTH as u64))
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| ConfigError::Invalid("max_buffered_ms is too large".into()))?;
        if mixer.max_buffered_ms < mixer.tick_ms {
            return Err(ConfigError::Invalid(
                "max_buffered_ms must hold at least one tick of audio".into(),
            ));
        }
        if self.network.max_packet_size <= 8192 {
            return Err(ConfigError::Invalid(
                "max_packet_size must exceed 8192 bytes".into(),
            ));
        }
        if self.network.recv_timeout_ms == 0 {
            return Err(ConfigError::Invalid("recv_timeout_ms must be non-zero".into()));
        }
        self.network
            .listen_addr()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quantum() {
        let mixer = MixerConfig::default();
        assert_eq!(mixer.quantum_samples(), 320);
        assert_eq!(mixer.quantum_bytes(), 640);
        assert_eq!(mixer.frame_bytes(), 2560);
        assert_eq!(mixer.max_buffered_bytes(), 8000 * 60 * 2);
    }

    #[test]
    fn test_default_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [network]
            udp_port = 9000

            [mixer]
            layout = "stereo"
            tick_ms = 20

            [status]
            format = "json"
            "#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.network.udp_port, 9000);
        assert_eq!(config.network.listen_address, DEFAULT_LISTEN_ADDRESS);
        assert_eq!(config.mixer.layout, OutputLayout::Stereo);
        assert_eq!(config.mixer.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.mixer.frame_bytes(), 160 * 2 * 2);
        assert_eq!(config.status.format, StatusFormat::Json);
    }

    #[test]
    fn test_validate_rejects_fractional_quantum() {
        let mut config = AppConfig::default();
        config.mixer.sample_rate = 44_100;
        config.mixer.tick_ms = 15;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_durations() {
        let mut config = AppConfig::default();
        config.mixer.tick_ms = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.mixer.max_buffered_ms = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_address() {
        let mut config = AppConfig::default();
        config.network.listen_address = "not-an-ip".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[mixer]\nstale_timeout_ms = 2500\n").unwrap();

        let config = AppConfig::load_or_default(Some(path.as_path())).unwrap();
        assert_eq!(config.mixer.stale_timeout(), Duration::from_millis(2500));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            AppConfig::load(&missing),
            Err(ConfigError::Read { .. })
        ));
    }
}
