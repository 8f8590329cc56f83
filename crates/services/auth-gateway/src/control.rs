//! MediaMTX control-plane calls for liveness checks and kicks
//!
//! Every protocol label maps through a static table to the API collections
//! that may hold the connection. Ambiguous generic labels (`rtmp`, `rtsp`)
//! map to both the plain and the TLS collection. Calls are best effort:
//! failures are logged and never retried inline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use url::Url;

use crate::metrics::global_metrics;
use crate::model::{Protocol, Session, ACTION_PLAYBACK, ACTION_PUBLISH, ACTION_READ};

/// Control-plane errors
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid control plane URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// HTTP surface used to reach the media server
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// GET `url`; true on a 2xx response
    async fn get(&self, url: &Url) -> Result<bool, ControlPlaneError>;

    /// Bodyless POST to `url`; returns the status code
    async fn post(&self, url: &Url) -> Result<u16, ControlPlaneError>;
}

/// `reqwest` implementation with a per-request timeout
pub struct HttpControlPlane {
    client: Client,
}

impl HttpControlPlane {
    pub fn new(timeout: Duration) -> Result<Self, ControlPlaneError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("remotemedia-auth-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ControlPlaneClient for HttpControlPlane {
    async fn get(&self, url: &Url) -> Result<bool, ControlPlaneError> {
        let response = self.client.get(url.clone()).send().await?;
        Ok(response.status().is_success())
    }

    async fn post(&self, url: &Url) -> Result<u16, ControlPlaneError> {
        let response = self.client.post(url.clone()).send().await?;
        Ok(response.status().as_u16())
    }
}

/// Where a protocol's connections live in the control-plane API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub collections: &'static [&'static str],

    /// Non-persistent connections (HLS) are never tracked or kicked
    pub persistent: bool,
}

const NON_PERSISTENT: Route = Route {
    collections: &[],
    persistent: false,
};

/// Look up the route for a protocol. `None` for unknown labels.
pub fn route(protocol: &Protocol) -> Option<Route> {
    let collections: &'static [&'static str] = match protocol {
        Protocol::Hls | Protocol::HlsMuxer => return Some(NON_PERSISTENT),
        Protocol::Rtmp => &["rtmpconns", "rtmpsconns"],
        Protocol::RtmpConn => &["rtmpconns"],
        Protocol::RtmpsConn => &["rtmpsconns"],
        Protocol::Rtsp => &["rtspsessions", "rtspssessions"],
        Protocol::RtspSession => &["rtspsessions"],
        Protocol::RtspsSession => &["rtspssessions"],
        Protocol::Srt | Protocol::SrtConn => &["srtconns"],
        Protocol::WebRtc | Protocol::WebRtcSession => &["webrtcsessions"],
        Protocol::Unknown(_) => return None,
    };
    Some(Route {
        collections,
        persistent: true,
    })
}

/// Whether sessions on this protocol can be tracked for revocation.
///
/// Unknown labels count as persistent: a later connect notification may
/// refine them into a routable protocol.
pub fn is_persistent(protocol: &Protocol) -> bool {
    route(protocol).map_or(true, |route| route.persistent)
}

/// Issues liveness checks and kicks against the right API base
pub struct RevocationController {
    primary_base: Url,
    publish_base: Url,
    client: Arc<dyn ControlPlaneClient>,
}

impl RevocationController {
    pub fn new(
        primary_base: &str,
        publish_base: &str,
        client: Arc<dyn ControlPlaneClient>,
    ) -> Result<Self, ControlPlaneError> {
        Ok(Self {
            primary_base: parse_base(primary_base)?,
            publish_base: parse_base(publish_base)?,
            client,
        })
    }

    /// Publish traffic may terminate at a different API than read traffic
    pub fn base_for(&self, action: Option<&str>) -> &Url {
        match action {
            Some(ACTION_PUBLISH) => &self.publish_base,
            Some(ACTION_READ) | Some(ACTION_PLAYBACK) => &self.primary_base,
            Some(other) => {
                tracing::debug!(action = other, "Unrecognized action, using primary API base");
                &self.primary_base
            }
            None => &self.primary_base,
        }
    }

    /// Endpoint URLs for `op` (`get` or `kick`) across every mapped collection
    pub fn endpoints(&self, session: &Session, action: Option<&str>, op: &str) -> Vec<Url> {
        let Some(route) = route(&session.protocol) else {
            tracing::warn!(
                session_id = %session.id,
                protocol = %session.protocol,
                "Unknown connection type"
            );
            return Vec::new();
        };

        let base = self.base_for(action);
        route
            .collections
            .iter()
            .filter_map(|collection| endpoint(base, collection, op, &session.id))
            .collect()
    }

    /// Whether the media server still knows the session.
    ///
    /// Alive if any mapped collection answers the GET with success.
    pub async fn is_alive(&self, session: &Session, action: Option<&str>) -> bool {
        global_metrics().liveness_checked();

        for url in self.endpoints(session, action, "get") {
            match self.client.get(&url).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id,
                        url = %url,
                        error = %e,
                        "Liveness check failed"
                    );
                }
            }
        }
        false
    }

    /// Ask the media server to close the session.
    ///
    /// Returns the number of kick calls issued.
    pub async fn kick(&self, session: &Session, action: Option<&str>) -> usize {
        let urls = self.endpoints(session, action, "kick");
        if urls.is_empty() {
            return 0;
        }

        let calls = urls.iter().map(|url| async move {
            global_metrics().kick_attempted();
            match self.client.post(url).await {
                Ok(status) => {
                    tracing::info!(
                        session_id = %session.id,
                        url = %url,
                        status,
                        "Kicked session"
                    );
                }
                Err(e) => {
                    global_metrics().kick_failed();
                    tracing::warn!(
                        session_id = %session.id,
                        url = %url,
                        error = %e,
                        "Kick failed"
                    );
                }
            }
        });
        join_all(calls).await;
        urls.len()
    }
}

fn parse_base(raw: &str) -> Result<Url, ControlPlaneError> {
    let url = Url::parse(raw).map_err(|e| ControlPlaneError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ControlPlaneError::InvalidUrl {
            url: raw.to_string(),
            reason: "not a base URL".to_string(),
        });
    }
    Ok(url)
}

fn endpoint(base: &Url, collection: &str, op: &str, id: &str) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(["v3", collection, op, id]);
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingControlPlane;

    fn controller(client: Arc<RecordingControlPlane>) -> RevocationController {
        RevocationController::new("http://primary:9997", "http://publish:9998/", client).unwrap()
    }

    #[test]
    fn test_route_table() {
        assert_eq!(route(&Protocol::Hls), Some(NON_PERSISTENT));
        assert_eq!(route(&Protocol::HlsMuxer), Some(NON_PERSISTENT));
        assert_eq!(
            route(&Protocol::Rtmp).unwrap().collections,
            &["rtmpconns", "rtmpsconns"]
        );
        assert_eq!(route(&Protocol::RtmpsConn).unwrap().collections, &["rtmpsconns"]);
        assert_eq!(
            route(&Protocol::Rtsp).unwrap().collections,
            &["rtspsessions", "rtspssessions"]
        );
        assert_eq!(route(&Protocol::Srt).unwrap().collections, &["srtconns"]);
        assert_eq!(
            route(&Protocol::WebRtcSession).unwrap().collections,
            &["webrtcsessions"]
        );
        assert_eq!(route(&Protocol::Unknown("moq".into())), None);
    }

    #[test]
    fn test_persistence() {
        assert!(!is_persistent(&Protocol::Hls));
        assert!(is_persistent(&Protocol::SrtConn));
        assert!(is_persistent(&Protocol::Unknown("moq".into())));
    }

    #[test]
    fn test_base_selection_by_action() {
        let c = controller(Arc::new(RecordingControlPlane::default()));
        assert_eq!(c.base_for(Some("publish")).host_str(), Some("publish"));
        assert_eq!(c.base_for(Some("read")).host_str(), Some("primary"));
        assert_eq!(c.base_for(Some("playback")).host_str(), Some("primary"));
        assert_eq!(c.base_for(Some("api")).host_str(), Some("primary"));
        assert_eq!(c.base_for(None).host_str(), Some("primary"));
    }

    #[test]
    fn test_endpoint_urls() {
        let c = controller(Arc::new(RecordingControlPlane::default()));
        let session = Session::new("abc-123", Protocol::Rtmp);

        let urls: Vec<String> = c
            .endpoints(&session, Some("publish"), "kick")
            .iter()
            .map(Url::to_string)
            .collect();
        assert_eq!(
            urls,
            vec![
                "http://publish:9998/v3/rtmpconns/kick/abc-123",
                "http://publish:9998/v3/rtmpsconns/kick/abc-123",
            ]
        );
    }

    #[tokio::test]
    async fn test_is_alive_when_any_collection_answers() {
        let client = Arc::new(RecordingControlPlane::default());
        client.set_alive("http://primary:9997/v3/rtmpsconns/get/s1");
        let c = controller(client.clone());

        assert!(c.is_alive(&Session::new("s1", Protocol::Rtmp), Some("read")).await);
        assert!(!c.is_alive(&Session::new("s1", Protocol::RtmpConn), Some("read")).await);
    }

    #[tokio::test]
    async fn test_non_persistent_and_unknown_are_not_alive() {
        let client = Arc::new(RecordingControlPlane::default());
        let c = controller(client.clone());

        assert!(!c.is_alive(&Session::new("s1", Protocol::Hls), None).await);
        assert!(!c.is_alive(&Session::new("s1", Protocol::Unknown("x".into())), None).await);
        assert!(client.gets().is_empty());
    }

    #[tokio::test]
    async fn test_kick_posts_every_mapped_collection() {
        let client = Arc::new(RecordingControlPlane::default());
        let c = controller(client.clone());

        let issued = c.kick(&Session::new("s1", Protocol::Rtsp), Some("read")).await;
        assert_eq!(issued, 2);

        let mut posts = client.posts();
        posts.sort();
        assert_eq!(
            posts,
            vec![
                "http://primary:9997/v3/rtspsessions/kick/s1",
                "http://primary:9997/v3/rtspssessions/kick/s1",
            ]
        );
    }

    #[tokio::test]
    async fn test_kick_failures_are_swallowed() {
        let client = Arc::new(RecordingControlPlane::failing());
        let c = controller(client.clone());

        let issued = c.kick(&Session::new("s1", Protocol::SrtConn), Some("publish")).await;
        assert_eq!(issued, 1);
        assert_eq!(client.posts(), vec!["http://publish:9998/v3/srtconns/kick/s1"]);
    }

    #[test]
    fn test_invalid_base_rejected() {
        let client = Arc::new(RecordingControlPlane::default());
        assert!(RevocationController::new("not a url", "http://ok", client.clone()).is_err());
        assert!(RevocationController::new("mailto:ops@example.com", "http://ok", client).is_err());
    }
}
