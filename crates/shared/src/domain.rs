use std::{fmt, net::IpAddr, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Host;

macro_rules! string_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id_newtype!(PeerId);
string_id_newtype!(DeviceId);
string_id_newtype!(TrackId);

/// A remote peer announced by the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
}

impl Peer {
    pub fn new(id: impl Into<PeerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("server address must not be empty")]
    EmptyAddress,
    #[error("invalid server address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("server port '{0}' is not a number")]
    PortNotNumeric(String),
    #[error("server port {0} is outside 0..=65535")]
    PortOutOfRange(i64),
}

/// Validated signaling server address and port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub address: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn parse(address: &str, port: &str) -> Result<Self, EndpointError> {
        let address = parse_address(address)?;
        let port = parse_port(port)?;
        Ok(Self { address, port })
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

fn parse_address(raw: &str) -> Result<String, EndpointError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EndpointError::EmptyAddress);
    }

    // Bare IPv6 literals are accepted without brackets.
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }

    match Host::parse(trimmed) {
        Ok(Host::Domain(domain)) => Ok(domain),
        Ok(Host::Ipv4(ip)) => Ok(ip.to_string()),
        Ok(Host::Ipv6(ip)) => Ok(ip.to_string()),
        Err(err) => Err(EndpointError::InvalidAddress {
            address: trimmed.to_string(),
            reason: err.to_string(),
        }),
    }
}

fn parse_port(raw: &str) -> Result<u16, EndpointError> {
    let trimmed = raw.trim();
    let value = trimmed
        .parse::<i64>()
        .map_err(|_| EndpointError::PortNotNumeric(trimmed.to_string()))?;
    u16::try_from(value).map_err(|_| EndpointError::PortOutOfRange(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    VideoCapture,
    AudioCapture,
    AudioPlayout,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 3] = [
        DeviceKind::VideoCapture,
        DeviceKind::AudioCapture,
        DeviceKind::AudioPlayout,
    ];
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceKind::VideoCapture => "video_capture",
            DeviceKind::AudioCapture => "audio_capture",
            DeviceKind::AudioPlayout => "audio_playout",
        };
        f.write_str(label)
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "video" | "camera" | "video_capture" => Ok(DeviceKind::VideoCapture),
            "mic" | "microphone" | "audio_capture" => Ok(DeviceKind::AudioCapture),
            "speaker" | "speakers" | "audio_playout" => Ok(DeviceKind::AudioPlayout),
            other => Err(format!("unknown device kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDevice {
    pub id: DeviceId,
    pub name: String,
}

impl MediaDevice {
    pub fn new(id: impl Into<DeviceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One resolution/frame-rate pair a capture device can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl CaptureFormat {
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.frame_rate)
    }
}

/// Parses `WIDTHxHEIGHT@FPS`, e.g. `1280x720@30`.
impl FromStr for CaptureFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("expected WIDTHxHEIGHT@FPS, got '{value}'");
        let (resolution, frame_rate) = value.trim().split_once('@').ok_or_else(invalid)?;
        let (width, height) = resolution.split_once('x').ok_or_else(invalid)?;
        Ok(CaptureFormat {
            width: width.parse().map_err(|_| invalid())?,
            height: height.parse().map_err(|_| invalid())?,
            frame_rate: frame_rate.parse().map_err(|_| invalid())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOrigin {
    Local,
    Remote,
}

/// Handle to a media track owned by the engine for the current peer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: TrackId,
    pub kind: TrackKind,
    pub origin: TrackOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}
