//! Configuration for the host service.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use remora_core::host::{
    Capturer, HostConfig, PatternSource, ScreenRecorderConfig, status::DEFAULT_MAX_FAILED_LOGINS,
};
use remora_core::protocol::{
    AuthConfig, CandidateSessionConfig, Codec, SessionManagerConfig, TransportConfig,
};
use remora_core::video::differ::{DEFAULT_BLOCK_SIZE, Differ};
use remora_core::video::encoder::DEFAULT_PACKET_SIZE;
use remora_core::video::packet::Encoding;
use remora_core::video::Size;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostFileConfig {
    pub network: NetworkConfig,
    pub auth: AuthConfig,
    pub screen: ScreenConfig,
    pub host: LimitsConfig,
    pub nat: NatConfig,
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP address the signaling listener binds to.
    pub listen_address: String,
    /// Address channel listeners bind to.
    pub channel_bind_address: IpAddr,
    /// Address advertised in channel candidates, if different.
    pub advertise_address: Option<IpAddr>,
    /// Jid this host answers to.
    pub local_jid: String,
    /// Seconds a channel may take to connect.
    pub channel_timeout_secs: u64,
}

/// Synthetic screen and video settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: u32,
    pub height: u32,
    pub max_fps: u32,
    /// Upper bound on the payload of one video packet, in bytes.
    pub packet_size: usize,
    /// Video codecs accepted, most preferred first.
    pub codecs: Vec<Codec>,
    /// Block size for change detection (pixels).
    pub block_size: u32,
    /// Movement of the test pattern per frame (pixels).
    pub pattern_step: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_connections: usize,
    /// Access-denied notifications before the host shuts itself down.
    pub max_failed_logins: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NatConfig {
    /// `host:port` of a STUN server; empty disables relay discovery.
    pub stun_server: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:7340".into(),
            channel_bind_address: IpAddr::from([127, 0, 0, 1]),
            advertise_address: None,
            local_jid: "host@remora.local/desktop".into(),
            channel_timeout_secs: 15,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            max_fps: 30,
            packet_size: DEFAULT_PACKET_SIZE,
            codecs: vec![Codec::Zlib, Codec::Verbatim],
            block_size: DEFAULT_BLOCK_SIZE,
            pattern_step: 8,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 1,
            max_failed_logins: DEFAULT_MAX_FAILED_LOGINS,
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

impl HostFileConfig {
    /// Load configuration from a TOML file, falling back to defaults.
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

    /// Codecs the host accepts, restricted to the ones it can encode.
    fn codecs(&self) -> Vec<Codec> {
        let codecs: Vec<Codec> = self
            .screen
            .codecs
            .iter()
            .copied()
            .filter(|c| c.encoding().is_some())
            .collect();
        if codecs.is_empty() {
            vec![Codec::Zlib]
        } else {
            codecs
        }
    }

    /// Convert into the core host configuration.
    pub fn to_host_config(&self) -> HostConfig {
        let codecs = self.codecs();
        let encoding = codecs
            .first()
            .and_then(|c| c.encoding())
            .unwrap_or(Encoding::Zlib);

        let mut config = HostConfig::new(self.auth.clone());
        config.max_connections = self.host.max_connections.max(1);
        config.session = SessionManagerConfig {
            transport: TransportConfig {
                bind_address: self.network.channel_bind_address,
                advertise_address: self.network.advertise_address,
                connect_timeout: Duration::from_secs(self.network.channel_timeout_secs.max(1)),
            },
            session_config: CandidateSessionConfig::with_video_codecs(&codecs),
            ..SessionManagerConfig::default()
        };
        config.recorder = ScreenRecorderConfig {
            max_fps: self.screen.max_fps.clamp(1, 60),
            packet_size: self.screen.packet_size.max(1024),
            encoding,
        };
        config
    }

    /// The synthetic screen this host shares.
    pub fn capturer(&self) -> Capturer {
        let size = Size::new(self.screen.width.max(64), self.screen.height.max(64));
        Capturer::with_differ(
            Box::new(PatternSource::with_step(size, self.screen.pattern_step.max(1))),
            Differ::new(self.screen.block_size.max(8)),
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&HostFileConfig::default()).unwrap();
        assert!(text.contains("listen_address"));
        assert!(text.contains("max_failed_logins"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: HostFileConfig = toml::from_str(
            r#"
            [auth]
            secret = "271828"
            method = "legacy-token"

            [screen]
            max_fps = 120
            codecs = ["vp8", "verbatim"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.auth.secret, "271828");
        assert_eq!(cfg.network.local_jid, "host@remora.local/desktop");

        let host = cfg.to_host_config();
        assert_eq!(host.recorder.max_fps, 60);
        assert_eq!(host.recorder.encoding, Encoding::Verbatim);
        assert_eq!(host.session.session_config.video.len(), 1);
    }

    #[test]
    fn capturer_uses_screen_size() {
        let mut cfg = HostFileConfig::default();
        cfg.screen.width = 320;
        cfg.screen.height = 200;
        assert_eq!(cfg.capturer().size(), Size::new(320, 200));
    }
}
