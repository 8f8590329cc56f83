//! Core value types shared by the caches, the service and the control plane

use std::fmt;

/// Action requested by MediaMTX that routes to the publish-side API
pub const ACTION_PUBLISH: &str = "publish";

/// Read-side actions routed to the primary API
pub const ACTION_READ: &str = "read";
pub const ACTION_PLAYBACK: &str = "playback";

/// The `(action, path, query token)` triple identifying one authorization claim.
///
/// Two requests carrying the same triple are indistinguishable and share a
/// single cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorizationKey {
    pub action: String,
    pub path: String,
    pub query_token: String,
}

impl AuthorizationKey {
    pub fn new(
        action: impl Into<String>,
        path: impl Into<String>,
        query_token: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            path: path.into(),
            query_token: query_token.into(),
        }
    }
}

impl fmt::Display for AuthorizationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The token is a credential; never print it.
        write!(f, "{}:{}", self.action, self.path)
    }
}

/// Connection type labels reported by MediaMTX.
///
/// Auth requests carry the generic label (`rtmp`), while connect
/// notifications carry the concrete one (`rtmpConn`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    Hls,
    HlsMuxer,
    Rtmp,
    RtmpConn,
    RtmpsConn,
    Rtsp,
    RtspSession,
    RtspsSession,
    Srt,
    SrtConn,
    WebRtc,
    WebRtcSession,
    Unknown(String),
}

impl Protocol {
    /// Parse a MediaMTX label. Unrecognized labels are kept as `Unknown`.
    pub fn parse(label: &str) -> Self {
        match label {
            "hls" => Protocol::Hls,
            "hlsMuxer" => Protocol::HlsMuxer,
            "rtmp" => Protocol::Rtmp,
            "rtmpConn" => Protocol::RtmpConn,
            "rtmpsConn" => Protocol::RtmpsConn,
            "rtsp" => Protocol::Rtsp,
            "rtspSession" => Protocol::RtspSession,
            "rtspsSession" => Protocol::RtspsSession,
            "srt" => Protocol::Srt,
            "srtConn" => Protocol::SrtConn,
            "webrtc" => Protocol::WebRtc,
            "webRTCSession" => Protocol::WebRtcSession,
            other => Protocol::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Hls => "hls",
            Protocol::HlsMuxer => "hlsMuxer",
            Protocol::Rtmp => "rtmp",
            Protocol::RtmpConn => "rtmpConn",
            Protocol::RtmpsConn => "rtmpsConn",
            Protocol::Rtsp => "rtsp",
            Protocol::RtspSession => "rtspSession",
            Protocol::RtspsSession => "rtspsSession",
            Protocol::Srt => "srt",
            Protocol::SrtConn => "srtConn",
            Protocol::WebRtc => "webrtc",
            Protocol::WebRtcSession => "webRTCSession",
            Protocol::Unknown(label) => label,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live connection at the media server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque id assigned by MediaMTX
    pub id: String,

    /// Connection type, refined by the connect notification
    pub protocol: Protocol,
}

impl Session {
    pub fn new(id: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            id: id.into(),
            protocol,
        }
    }
}

/// A tracked session and the claim that authorized it.
///
/// The referenced key may already have expired from the credential cache;
/// that is an expected transient state, not corruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session: Session,

    /// Absent for non-persistent protocols (HLS)
    pub authorization: Option<AuthorizationKey>,
}

impl SessionRecord {
    /// Action of the owning claim, used to pick the control-plane base
    pub fn action(&self) -> Option<&str> {
        self.authorization.as_ref().map(|key| key.action.as_str())
    }
}
