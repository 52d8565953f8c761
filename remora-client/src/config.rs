//! Viewer configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use remora_core::client::ClientConfig;
use remora_core::protocol::{AuthConfig, CandidateSessionConfig, Codec};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub network: NetworkConfig,
    pub auth: AuthConfig,
    pub video: VideoConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host signaling address (IP:port).
    pub host_address: String,
    /// Jid of the host to connect to.
    pub host_jid: String,
    /// Jid this viewer signs its stanzas with.
    pub local_jid: String,
    /// Signaling connect timeout in milliseconds.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Video codecs offered, most preferred first.
    pub codecs: Vec<Codec>,
}

/// What to do with the received screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Seconds between statistics reports; 0 disables them.
    pub stats_interval_secs: u64,
    /// Print statistics as JSON lines on stdout instead of logging them.
    pub json_stats: bool,
    /// Write the last frame here (binary PPM) on exit; empty disables.
    pub dump_path: String,
    /// Disconnect after this many seconds; 0 runs until the host closes.
    pub run_for_secs: u64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_address: "127.0.0.1:7340".into(),
            host_jid: "host@remora.local/desktop".into(),
            local_jid: "viewer@remora.local/cli".into(),
            timeout_ms: 5000,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codecs: vec![Codec::Zlib, Codec::Verbatim],
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: 2,
            json_stats: false,
            dump_path: String::new(),
            run_for_secs: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ViewerConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.timeout_ms.max(1))
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.output.stats_interval_secs > 0).then(|| Duration::from_secs(self.output.stats_interval_secs))
    }

    pub fn run_for(&self) -> Option<Duration> {
        (self.output.run_for_secs > 0).then(|| Duration::from_secs(self.output.run_for_secs))
    }

    pub fn dump_path(&self) -> Option<PathBuf> {
        let path = self.output.dump_path.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    /// Convert into the core client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.network.host_jid.clone(), self.auth.clone());
        if !self.video.codecs.is_empty() {
            config.session_config = Some(CandidateSessionConfig::with_video_codecs(&self.video.codecs));
        }
        config
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ViewerConfig::default()).unwrap();
        assert!(text.contains("host_address"));
        assert!(text.contains("stats_interval_secs"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ViewerConfig::default()).unwrap();
        let parsed: ViewerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.host_address, "127.0.0.1:7340");
        assert_eq!(parsed.video.codecs, vec![Codec::Zlib, Codec::Verbatim]);
    }

    #[test]
    fn empty_values_disable_outputs() {
        let cfg: ViewerConfig = toml::from_str(
            r#"
            [output]
            stats_interval_secs = 0
            run_for_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.stats_interval(), None);
        assert_eq!(cfg.run_for(), Some(Duration::from_secs(10)));
        assert_eq!(cfg.dump_path(), None);
    }

    #[test]
    fn codec_preference_reaches_the_offer() {
        let mut cfg = ViewerConfig::default();
        cfg.video.codecs = vec![Codec::Verbatim];
        let offer = cfg.to_client_config().session_config.unwrap();
        assert_eq!(offer.video.len(), 1);
        assert_eq!(offer.video[0].codec, Codec::Verbatim);
    }
}
