//! Instagram reels through the public GraphQL endpoint, with an optional
//! logged-in session that is refreshed once when the endpoint demands it.

mod login;
mod session;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::extract::VideoDescriptor;
use crate::fetch::{ensure_success, FetchError, FetchResult, RetryPolicy};
use crate::source::{Platform, SourcePage, VideoSource};

pub use login::WebLoginAuthenticator;
pub use session::{
    Authenticator, FileSessionStore, InstagramSession, SessionError, SessionManager,
    SessionResult, SessionStore,
};

pub(crate) const INSTAGRAM_BASE: &str = "https://www.instagram.com";
pub(crate) const IG_APP_ID: &str = "936619743392459";
const FB_LSD_TOKEN: &str = "AVqbxe3J_YA";
const FB_ASBD_ID: &str = "129477";
const CONTENT_KINDS: [&str; 4] = ["p", "reel", "reels", "tv"];

/// Shortcode of a post URL: `/reel/<code>`, `/p/<code>`, `/<user>/reel/<code>`...
pub fn shortcode_from_url(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let code = match segments.as_slice() {
        [kind, code, ..] if CONTENT_KINDS.contains(kind) => code,
        [_, kind, code, ..] if CONTENT_KINDS.contains(kind) => code,
        _ => return None,
    };
    let code = code.trim();
    (!code.is_empty()).then(|| code.to_string())
}

pub struct InstagramClient {
    client: Client,
    endpoint: String,
    doc_id: String,
    retry: RetryPolicy,
    sessions: Option<Arc<SessionManager>>,
}

impl InstagramClient {
    pub fn new(client: Client, doc_id: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            endpoint: format!("{INSTAGRAM_BASE}/api/graphql"),
            doc_id: doc_id.into(),
            retry,
            sessions: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Looks up a reel and maps it to a descriptor in one step.
    pub async fn fetch_descriptor(&self, shortcode: &str) -> FetchResult<VideoDescriptor> {
        let body = self.lookup(shortcode).await?;
        descriptor_from_graphql(&body, shortcode)
    }

    async fn lookup(&self, shortcode: &str) -> FetchResult<String> {
        let session = match &self.sessions {
            Some(sessions) => sessions
                .current()
                .await
                .map_err(|err| session_failure(&self.endpoint, err))?,
            None => None,
        };
        let result = self.query_with_retry(shortcode, session.as_deref()).await;
        let Some(sessions) = &self.sessions else {
            return result;
        };
        match result {
            Err(FetchError::AuthRequired { .. }) => {
                info!(shortcode, "instagram requires login, refreshing session");
                let fresh = sessions
                    .refresh(session.as_ref())
                    .await
                    .map_err(|err| session_failure(&self.endpoint, err))?;
                self.query_with_retry(shortcode, Some(fresh.as_ref())).await
            }
            other => other,
        }
    }

    async fn query_with_retry(
        &self,
        shortcode: &str,
        session: Option<&InstagramSession>,
    ) -> FetchResult<String> {
        let outcome = self
            .retry
            .run("instagram_graphql", |_| self.query(shortcode, session))
            .await?;
        Ok(outcome.result)
    }

    async fn query(&self, shortcode: &str, session: Option<&InstagramSession>) -> FetchResult<String> {
        let variables = serde_json::json!({ "shortcode": shortcode }).to_string();
        let body = format!(
            "doc_id={}&variables={}&lsd={}",
            self.doc_id,
            urlencoding::encode(&variables),
            FB_LSD_TOKEN
        );
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("X-IG-App-ID", IG_APP_ID)
            .header("X-FB-LSD", FB_LSD_TOKEN)
            .header("X-ASBD-ID", FB_ASBD_ID)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Referer", format!("{INSTAGRAM_BASE}/"))
            .header("Origin", INSTAGRAM_BASE)
            .header("Sec-Fetch-Site", "same-origin")
            .header("Sec-Fetch-Mode", "cors")
            .header("Sec-Fetch-Dest", "empty");
        if let Some(session) = session {
            request = request.header("Cookie", session.cookie_header());
            if let Some(csrf) = &session.csrf_token {
                request = request.header("X-CSRFToken", csrf);
            }
        }
        let response = request
            .body(body)
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(&self.endpoint, err))?;
        let response = ensure_success(&self.endpoint, response)?;
        let text = response
            .text()
            .await
            .map_err(|err| FetchError::from_reqwest(&self.endpoint, err))?;
        if requires_login(&text) {
            return Err(FetchError::AuthRequired {
                url: self.endpoint.clone(),
            });
        }
        debug!(shortcode, bytes = text.len(), authenticated = session.is_some(), "graphql lookup done");
        Ok(text)
    }
}

#[async_trait]
impl VideoSource for InstagramClient {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn fetch_page(&self, url: &str) -> FetchResult<SourcePage> {
        let parsed = Url::parse(url).map_err(|err| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        let shortcode = shortcode_from_url(&parsed).ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "not a reel or post link".into(),
        })?;
        let body = self.lookup(&shortcode).await?;
        Ok(SourcePage {
            final_url: parsed,
            body,
            canonical_id: shortcode,
        })
    }

    fn extract(&self, page: &SourcePage) -> FetchResult<VideoDescriptor> {
        descriptor_from_graphql(&page.body, &page.canonical_id)
    }
}

fn media_node(root: &Value) -> Option<&Value> {
    root.pointer("/data/xdt_shortcode_media")
        .or_else(|| root.pointer("/data/shortcode_media"))
        .filter(|media| media.is_object())
}

fn requires_login(body: &str) -> bool {
    let Ok(root) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    if media_node(&root).is_some() {
        return false;
    }
    root.get("message")
        .and_then(Value::as_str)
        .map(|message| message.contains("login_required") || message.contains("checkpoint_required"))
        .unwrap_or(false)
        || root.get("require_login").and_then(Value::as_bool).unwrap_or(false)
}

fn descriptor_from_graphql(body: &str, shortcode: &str) -> FetchResult<VideoDescriptor> {
    let root: Value = serde_json::from_str(body)
        .map_err(|err| FetchError::NoData(format!("graphql response is not json: {err}")))?;
    let media = media_node(&root)
        .ok_or_else(|| FetchError::NoData(format!("post {shortcode} not found or unavailable")))?;
    let id = media
        .get("shortcode")
        .and_then(Value::as_str)
        .unwrap_or(shortcode);
    if id != shortcode {
        return Err(FetchError::NoData(format!(
            "graphql returned {id} for requested {shortcode}"
        )));
    }
    if !media.get("is_video").and_then(Value::as_bool).unwrap_or(false) {
        return Err(FetchError::NoData(format!("post {shortcode} is not a video")));
    }
    let playable_url = media
        .get("video_url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| FetchError::NoData(format!("post {shortcode} has no video url")))?;
    let caption = media
        .pointer("/edge_media_to_caption/edges/0/node/text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);
    Ok(VideoDescriptor {
        id: shortcode.to_string(),
        playable_url: playable_url.to_string(),
        caption,
    })
}

fn session_failure(url: &str, error: SessionError) -> FetchError {
    match error {
        SessionError::Io { source, path } => FetchError::Io { source, path },
        other => {
            debug!(error = %other, "instagram session unavailable");
            FetchError::AuthRequired {
                url: url.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySection;
    use httpmock::prelude::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn reel_json(shortcode: &str, is_video: bool) -> String {
        serde_json::json!({
            "data": {
                "xdt_shortcode_media": {
                    "shortcode": shortcode,
                    "is_video": is_video,
                    "video_url": format!("https://cdn.test/{shortcode}.mp4"),
                    "edge_media_to_caption": {"edges": [{"node": {"text": "sunset"}}]}
                }
            }
        })
        .to_string()
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy::new(RetrySection {
            max_attempts: 1,
            ..RetrySection::default()
        })
    }

    #[test]
    fn shortcodes_are_parsed_from_known_layouts() {
        let code = |raw: &str| shortcode_from_url(&Url::parse(raw).unwrap());
        assert_eq!(code("https://www.instagram.com/reel/DAqS5YtO10X/").as_deref(), Some("DAqS5YtO10X"));
        assert_eq!(code("https://instagram.com/reels/abc?igsh=1").as_deref(), Some("abc"));
        assert_eq!(code("https://www.instagram.com/p/xyz/").as_deref(), Some("xyz"));
        assert_eq!(code("https://www.instagram.com/someone/reel/zzz/").as_deref(), Some("zzz"));
        assert_eq!(code("https://www.instagram.com/someone/"), None);
    }

    #[test]
    fn graphql_payload_maps_to_descriptor() {
        let descriptor = descriptor_from_graphql(&reel_json("abc", true), "abc").unwrap();
        assert_eq!(descriptor.id, "abc");
        assert_eq!(descriptor.playable_url, "https://cdn.test/abc.mp4");
        assert_eq!(descriptor.caption.as_deref(), Some("sunset"));

        assert!(matches!(
            descriptor_from_graphql(&reel_json("abc", false), "abc"),
            Err(FetchError::NoData(_))
        ));
        assert!(matches!(
            descriptor_from_graphql(&reel_json("other", true), "abc"),
            Err(FetchError::NoData(_))
        ));
    }

    struct StaticAuthenticator {
        logins: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for StaticAuthenticator {
        async fn login(&self, username: &str, _password: &str) -> SessionResult<InstagramSession> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(InstagramSession::new(
                username,
                BTreeMap::from([
                    ("sessionid".to_string(), "fresh".to_string()),
                    ("csrftoken".to_string(), "tok".to_string()),
                ]),
            ))
        }
    }

    #[tokio::test]
    async fn login_required_refreshes_session_once_and_retries() {
        let server = MockServer::start_async().await;
        let authed = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/graphql")
                    .header("cookie", "csrftoken=tok; sessionid=fresh")
                    .header("x-csrftoken", "tok");
                then.status(200).body(reel_json("abc", true));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/graphql");
                then.status(200)
                    .body(r#"{"message": "login_required", "status": "fail"}"#);
            })
            .await;

        let dir = tempdir().unwrap();
        let authenticator = Arc::new(StaticAuthenticator {
            logins: AtomicUsize::new(0),
        });
        let sessions = Arc::new(
            SessionManager::new("reels", Some("pw".into()), Arc::new(FileSessionStore::new(dir.path())))
                .with_authenticator(authenticator.clone()),
        );
        let client = InstagramClient::new(Client::new(), "123", no_retry())
            .with_endpoint(server.url("/api/graphql"))
            .with_sessions(sessions);

        let page = client
            .fetch_page("https://www.instagram.com/reel/abc/")
            .await
            .unwrap();
        authed.assert_async().await;
        assert_eq!(authenticator.logins.load(Ordering::SeqCst), 1);
        let descriptor = client.extract(&page).unwrap();
        assert_eq!(descriptor.id, "abc");
    }

    #[tokio::test]
    async fn anonymous_login_required_is_surfaced() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/graphql");
                then.status(200).body(r#"{"message": "checkpoint_required"}"#);
            })
            .await;
        let client = InstagramClient::new(Client::new(), "123", no_retry())
            .with_endpoint(server.url("/api/graphql"));
        assert!(matches!(
            client.fetch_descriptor("abc").await,
            Err(FetchError::AuthRequired { .. })
        ));
    }
}
