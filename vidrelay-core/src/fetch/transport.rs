use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, Response};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use super::error::{FetchError, FetchResult};
use crate::config::FetchSection;

pub const SESSION_COOKIE_NAME: &str = "tt_webid_v2";

const SESSION_COOKIE_MIN: u64 = 1_000_000_000_000_000_000;
const SESSION_COOKIE_MAX: u64 = 9_999_999_999_999_999_999;

/// A page returned by [`HttpTransport::fetch`] after redirects were followed.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: Url,
    pub body: String,
    pub status: u16,
}

/// HTTP client with a fixed browser identity.
///
/// The session cookie is drawn once per instance, so every request made
/// through the same transport looks like one returning visitor.
///
/// Page requests carry a total timeout. Media downloads share the identity
/// but are only cut when no data arrives for `request_timeout_seconds`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    download_client: Client,
    idle_timeout: Duration,
    session_cookie: u64,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("session_cookie", &self.session_cookie)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &FetchSection) -> FetchResult<Self> {
        let session_cookie = rand::thread_rng().gen_range(SESSION_COOKIE_MIN..=SESSION_COOKIE_MAX);
        let jar = Arc::new(session_jar(&config.cookie_domain, session_cookie)?);
        let request_timeout = Duration::from_secs(config.request_timeout_seconds.max(1));

        let client = browser_client(config, jar.clone())?
            .timeout(request_timeout)
            .build()
            .map_err(|err| FetchError::Client(err.to_string()))?;
        let download_client = browser_client(config, jar)?
            .build()
            .map_err(|err| FetchError::Client(err.to_string()))?;

        Ok(Self {
            client,
            download_client,
            idle_timeout: request_timeout,
            session_cookie,
        })
    }

    pub fn session_cookie(&self) -> u64 {
        self.session_cookie
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Issues a GET and returns the final URL, body and status.
    ///
    /// Non-2xx statuses are surfaced as structured errors. Nothing is retried here.
    pub async fn fetch(&self, url: &str) -> FetchResult<FetchedPage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(url, err))?;
        let response = ensure_success(url, response)?;
        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| FetchError::from_reqwest(url, err))?;
        debug!(url, final_url = %final_url, status, bytes = body.len(), "fetched page");
        Ok(FetchedPage {
            final_url,
            body,
            status,
        })
    }

    /// Streams `url` into `path`, returning the number of bytes written.
    pub async fn download_to(&self, url: &str, path: &Path) -> FetchResult<u64> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        let response = timeout(self.idle_timeout, self.download_client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
            })?
            .map_err(|err| FetchError::from_reqwest(url, err))?;
        let response = ensure_success(url, response)?;

        let mut file = fs::File::create(path)
            .await
            .map_err(|source| FetchError::Io {
                source,
                path: path.to_path_buf(),
            })?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        loop {
            let next = timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| FetchError::Timeout {
                    url: url.to_string(),
                })?;
            let Some(chunk) = next else {
                break;
            };
            let data = chunk.map_err(|err| FetchError::from_reqwest(url, err))?;
            file.write_all(&data)
                .await
                .map_err(|source| FetchError::Io {
                    source,
                    path: path.to_path_buf(),
                })?;
            written += data.len() as u64;
        }
        file.flush().await.map_err(|source| FetchError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        if written == 0 {
            return Err(FetchError::NoData(format!("empty media body from {url}")));
        }
        debug!(url, path = %path.display(), bytes = written, "downloaded media");
        Ok(written)
    }
}

pub(crate) fn ensure_success(url: &str, response: Response) -> FetchResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    Err(FetchError::from_status(status.as_u16(), url, retry_after))
}

fn browser_client(config: &FetchSection, jar: Arc<Jar>) -> FetchResult<ClientBuilder> {
    Ok(Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(browser_headers(config)?)
        .cookie_provider(jar)
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(Duration::from_secs(config.connect_timeout_seconds.max(1))))
}

/// Scopes the session cookie to `domain` and its subdomains. Bare addresses
/// and `localhost` get a host-only cookie instead.
fn session_jar(domain: &str, session_cookie: u64) -> FetchResult<Jar> {
    let domain = domain.trim().trim_start_matches('.');
    let (origin, cookie) = if domain == "localhost" || domain.parse::<IpAddr>().is_ok() {
        (
            format!("http://{domain}/"),
            format!("{SESSION_COOKIE_NAME}={session_cookie}; Path=/"),
        )
    } else {
        (
            format!("https://www.{domain}/"),
            format!("{SESSION_COOKIE_NAME}={session_cookie}; Domain=.{domain}; Path=/"),
        )
    };
    let origin = Url::parse(&origin).map_err(|err| FetchError::InvalidUrl {
        url: origin.clone(),
        reason: err.to_string(),
    })?;
    let jar = Jar::default();
    jar.add_cookie_str(&cookie, &origin);
    Ok(jar)
}

fn browser_headers(config: &FetchSection) -> FetchResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let pairs: [(header::HeaderName, &str); 8] = [
        (header::REFERER, config.referer.as_str()),
        (
            header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
        (header::ACCEPT_LANGUAGE, config.accept_language.as_str()),
        (header::UPGRADE_INSECURE_REQUESTS, "1"),
        (header::HeaderName::from_static("sec-fetch-dest"), "document"),
        (header::HeaderName::from_static("sec-fetch-mode"), "navigate"),
        (header::HeaderName::from_static("sec-fetch-site"), "none"),
        (header::HeaderName::from_static("sec-fetch-user"), "?1"),
    ];
    for (name, value) in pairs {
        let value =
            HeaderValue::from_str(value).map_err(|err| FetchError::Client(err.to_string()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchErrorKind;
    use httpmock::prelude::*;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn transport() -> HttpTransport {
        HttpTransport::new(&FetchSection::default()).unwrap()
    }

    #[test]
    fn session_cookie_is_stable_and_in_range() {
        let transport = transport();
        let cookie = transport.session_cookie();
        assert!((SESSION_COOKIE_MIN..=SESSION_COOKIE_MAX).contains(&cookie));
        assert_eq!(transport.clone().session_cookie(), cookie);
    }

    #[tokio::test]
    async fn fetch_follows_redirects_and_sends_browser_headers() {
        let server = MockServer::start_async().await;
        let redirect = server
            .mock_async(|when, then| {
                when.method(GET).path("/t/short");
                then.status(302)
                    .header("location", server.url("/@user/video/7123456789"));
            })
            .await;
        let page = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/@user/video/7123456789")
                    .header("accept-language", "en-US,en;q=0.5")
                    .header("sec-fetch-mode", "navigate");
                then.status(200).body("<html>ok</html>");
            })
            .await;

        let fetched = transport().fetch(&server.url("/t/short")).await.unwrap();
        redirect.assert_async().await;
        page.assert_async().await;
        assert_eq!(fetched.status, 200);
        assert_eq!(fetched.body, "<html>ok</html>");
        assert_eq!(fetched.final_url.path(), "/@user/video/7123456789");
    }

    #[tokio::test]
    async fn non_success_status_is_structured() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/limited");
                then.status(429).header("retry-after", "7");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.path("/broken");
                then.status(503);
            })
            .await;

        let transport = transport();
        let limited = transport.fetch(&server.url("/limited")).await.unwrap_err();
        match limited {
            FetchError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        let broken = transport.fetch(&server.url("/broken")).await.unwrap_err();
        assert_eq!(broken.kind(), FetchErrorKind::BadResponse);
    }

    #[tokio::test]
    async fn download_streams_body_to_disk() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/video.mp4");
                then.status(200).body("fake-mp4-bytes");
            })
            .await;
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("video.mp4");
        let written = transport()
            .download_to(&server.url("/video.mp4"), &target)
            .await
            .unwrap();
        assert_eq!(written, 14);
        assert_eq!(std::fs::read(&target).unwrap(), b"fake-mp4-bytes");
    }

    #[tokio::test]
    async fn session_cookie_goes_out_on_every_request() {
        let config = FetchSection {
            cookie_domain: "127.0.0.1".into(),
            ..FetchSection::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let server = MockServer::start_async().await;
        let page = server
            .mock_async(|when, then| {
                when.method(GET).path("/@user/video/1").header(
                    "cookie",
                    format!("{SESSION_COOKIE_NAME}={}", transport.session_cookie()),
                );
                then.status(200).body("ok");
            })
            .await;

        let url = server.url("/@user/video/1");
        assert_eq!(transport.fetch(&url).await.unwrap().body, "ok");
        assert_eq!(transport.fetch(&url).await.unwrap().body, "ok");
        page.assert_async().await;
    }

    /// Serves `total` body bytes one at a time, `gap` apart.
    async fn trickling_server(total: usize, gap: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = [0u8; 4096];
            if socket.read(&mut request).await.is_err() {
                return;
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: video/mp4\r\ncontent-length: {total}\r\nconnection: close\r\n\r\n"
            );
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            for _ in 0..total {
                tokio::time::sleep(gap).await;
                if socket.write_all(b"x").await.is_err() || socket.flush().await.is_err() {
                    return;
                }
            }
        });
        format!("http://{addr}/v.mp4")
    }

    fn one_second_transport() -> HttpTransport {
        HttpTransport::new(&FetchSection {
            request_timeout_seconds: 1,
            ..FetchSection::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn slow_but_steady_download_outlives_the_request_timeout() {
        let url = trickling_server(10, Duration::from_millis(300)).await;
        let dir = tempdir().unwrap();
        let target = dir.path().join("v.mp4");
        let written = one_second_transport()
            .download_to(&url, &target)
            .await
            .unwrap();
        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&target).unwrap(), vec![b'x'; 10]);
    }

    #[tokio::test]
    async fn stalled_download_times_out() {
        let url = trickling_server(3, Duration::from_secs(3)).await;
        let dir = tempdir().unwrap();
        let err = one_second_transport()
            .download_to(&url, &dir.path().join("v.mp4"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Timeout);
    }
}
