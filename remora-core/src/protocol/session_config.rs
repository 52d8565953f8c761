//! Offered and negotiated channel configurations.
//!
//! The initiator offers a [`CandidateSessionConfig`] (lists in preference
//! order); the responder picks one entry per channel and answers with a
//! [`SessionConfig`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::video::Encoding;
use crate::xml::XmlElement;

pub const CONTROL_CHANNEL: &str = "control";
pub const EVENT_CHANNEL: &str = "event";
pub const VIDEO_CHANNEL: &str = "video";

/// Current channel protocol version.
pub const PROTOCOL_VERSION: u32 = 2;

// ── ChannelConfig ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Stream,
    Datagram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Undefined,
    Verbatim,
    Zlib,
    Vp8,
}

impl Codec {
    /// The packet encoding produced for a video channel using this codec.
    pub fn encoding(self) -> Option<Encoding> {
        match self {
            Codec::Verbatim => Some(Encoding::Verbatim),
            Codec::Zlib => Some(Encoding::Zlib),
            Codec::Vp8 => Some(Encoding::Vp8),
            Codec::Undefined => None,
        }
    }
}

macro_rules! wire_enum {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const fn as_str(self) -> &'static str {
                match self { $(Self::$variant => $name),+ }
            }
        }

        impl FromStr for $ty {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(ParseError::InvalidPayload(format!(
                        "unknown {} {other:?}",
                        stringify!($ty)
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(TransportType { Stream => "stream", Datagram => "datagram" });
wire_enum!(Codec { Undefined => "undefined", Verbatim => "verbatim", Zlib => "zlib", Vp8 => "vp8" });

/// Transport, version and codec of one logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub transport: TransportType,
    pub version: u32,
    pub codec: Codec,
}

impl ChannelConfig {
    pub const fn new(transport: TransportType, version: u32, codec: Codec) -> Self {
        Self {
            transport,
            version,
            codec,
        }
    }

    /// Stream transport at the current version without a codec.
    pub const fn stream() -> Self {
        Self::new(TransportType::Stream, PROTOCOL_VERSION, Codec::Undefined)
    }

    fn to_xml(self, name: &str) -> XmlElement {
        XmlElement::new(name)
            .with_attr("transport", self.transport.as_str())
            .with_attr("version", self.version.to_string())
            .with_attr("codec", self.codec.as_str())
    }

    fn from_xml(element: &XmlElement) -> Result<Self, ParseError> {
        let transport = element
            .attr("transport")
            .ok_or(ParseError::MissingField("transport"))?
            .parse()?;
        let version = element
            .attr("version")
            .ok_or(ParseError::MissingField("version"))?
            .parse()
            .map_err(|_| ParseError::InvalidPayload("bad channel version".into()))?;
        let codec = match element.attr("codec") {
            Some(codec) => codec.parse()?,
            None => Codec::Undefined,
        };
        Ok(Self::new(transport, version, codec))
    }
}

impl fmt::Display for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/v{}/{}", self.transport, self.version, self.codec)
    }
}

// ── SessionConfig ────────────────────────────────────────────────

/// The negotiated configuration: exactly one entry per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionConfig {
    pub control: ChannelConfig,
    pub event: ChannelConfig,
    pub video: ChannelConfig,
}

impl SessionConfig {
    pub fn to_candidate(self) -> CandidateSessionConfig {
        CandidateSessionConfig {
            control: vec![self.control],
            event: vec![self.event],
            video: vec![self.video],
        }
    }

    /// Encoding used for video packets, if the video codec is row-based
    /// or external.
    pub fn video_encoding(&self) -> Option<Encoding> {
        self.video.codec.encoding()
    }
}

// ── CandidateSessionConfig ───────────────────────────────────────

/// The offered configurations, most preferred first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSessionConfig {
    pub control: Vec<ChannelConfig>,
    pub event: Vec<ChannelConfig>,
    pub video: Vec<ChannelConfig>,
}

impl Default for CandidateSessionConfig {
    /// Everything this implementation supports, zlib video preferred.
    fn default() -> Self {
        Self {
            control: vec![ChannelConfig::stream()],
            event: vec![ChannelConfig::stream()],
            video: vec![
                ChannelConfig::new(TransportType::Stream, PROTOCOL_VERSION, Codec::Zlib),
                ChannelConfig::new(TransportType::Stream, PROTOCOL_VERSION, Codec::Verbatim),
            ],
        }
    }
}

impl CandidateSessionConfig {
    /// A default set with video restricted to `codecs`, in that order.
    pub fn with_video_codecs(codecs: &[Codec]) -> Self {
        Self {
            video: codecs
                .iter()
                .map(|&c| ChannelConfig::new(TransportType::Stream, PROTOCOL_VERSION, c))
                .collect(),
            ..Self::default()
        }
    }

    /// Pick, per channel, the first entry of `client`'s list that `self`
    /// (the responder) also supports.
    pub fn select(&self, client: &CandidateSessionConfig) -> Option<SessionConfig> {
        fn first_common(ours: &[ChannelConfig], theirs: &[ChannelConfig]) -> Option<ChannelConfig> {
            theirs.iter().find(|c| ours.contains(c)).copied()
        }
        Some(SessionConfig {
            control: first_common(&self.control, &client.control)?,
            event: first_common(&self.event, &client.event)?,
            video: first_common(&self.video, &client.video)?,
        })
    }

    /// Whether `config` only uses entries that were offered here.
    pub fn is_supported(&self, config: &SessionConfig) -> bool {
        self.control.contains(&config.control)
            && self.event.contains(&config.event)
            && self.video.contains(&config.video)
    }

    /// Append one element per entry to a `<description>` element.
    pub fn write_xml(&self, description: &mut XmlElement) {
        for (name, list) in [
            (CONTROL_CHANNEL, &self.control),
            (EVENT_CHANNEL, &self.event),
            (VIDEO_CHANNEL, &self.video),
        ] {
            for config in list {
                description.add_child(config.to_xml(name));
            }
        }
    }

    /// Read channel entries back from a `<description>` element. Every
    /// channel must be listed at least once.
    pub fn read_xml(description: &XmlElement) -> Result<Self, ParseError> {
        let read = |name: &'static str| -> Result<Vec<ChannelConfig>, ParseError> {
            let list = description
                .children_named(name)
                .map(ChannelConfig::from_xml)
                .collect::<Result<Vec<_>, _>>()?;
            if list.is_empty() {
                return Err(ParseError::MissingField(name));
            }
            Ok(list)
        };
        Ok(Self {
            control: read(CONTROL_CHANNEL)?,
            event: read(EVENT_CHANNEL)?,
            video: read(VIDEO_CHANNEL)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(codec: Codec) -> ChannelConfig {
        ChannelConfig::new(TransportType::Stream, PROTOCOL_VERSION, codec)
    }

    #[test]
    fn select_follows_client_preference() {
        let host = CandidateSessionConfig::with_video_codecs(&[Codec::Verbatim, Codec::Zlib]);
        let client = CandidateSessionConfig::with_video_codecs(&[Codec::Vp8, Codec::Zlib, Codec::Verbatim]);

        let chosen = host.select(&client).unwrap();
        assert_eq!(chosen.video, video(Codec::Zlib));
        assert_eq!(chosen.control, ChannelConfig::stream());
        assert!(client.is_supported(&chosen));
        assert!(host.is_supported(&chosen));
    }

    #[test]
    fn select_fails_without_common_entry() {
        let host = CandidateSessionConfig::with_video_codecs(&[Codec::Verbatim]);
        let client = CandidateSessionConfig::with_video_codecs(&[Codec::Vp8]);
        assert!(host.select(&client).is_none());
    }

    #[test]
    fn xml_preserves_order() {
        let offer = CandidateSessionConfig::with_video_codecs(&[Codec::Verbatim, Codec::Zlib]);
        let mut description = XmlElement::new("description");
        offer.write_xml(&mut description);
        assert_eq!(CandidateSessionConfig::read_xml(&description).unwrap(), offer);
    }

    #[test]
    fn missing_channel_is_rejected() {
        let mut description = XmlElement::new("description");
        description.add_child(ChannelConfig::stream().to_xml(CONTROL_CHANNEL));
        assert_eq!(
            CandidateSessionConfig::read_xml(&description),
            Err(ParseError::MissingField(EVENT_CHANNEL))
        );
    }

    #[test]
    fn unknown_codec_is_invalid() {
        let el = XmlElement::new("video")
            .with_attr("transport", "stream")
            .with_attr("version", "2")
            .with_attr("codec", "h264");
        assert!(matches!(
            ChannelConfig::from_xml(&el),
            Err(ParseError::InvalidPayload(_))
        ));
    }
}
