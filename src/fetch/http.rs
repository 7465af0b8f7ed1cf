use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, DNT, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, RequestBuilder};
use tracing::warn;

use super::{BrowserProfile, DelayRange, FetchMethod, FetchTier};
use crate::config::FetchSettings;
use crate::error::TierError;

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8";
const PLAIN_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderSet {
    /// Full navigation header set a desktop browser sends.
    Browser,
    /// User-Agent, Accept, Accept-Language and no-cache only.
    Minimal,
}

/// One reqwest-backed tier. The variants differ in client configuration only.
pub struct HttpTier {
    method: FetchMethod,
    client: Client,
    headers: HeaderSet,
    retries: u32,
    backoff: Duration,
    pre_delay: Option<DelayRange>,
}

impl HttpTier {
    /// Primary attempt: rustls, HTTP/2 negotiation, browser headers, retries.
    pub fn direct(settings: &FetchSettings) -> Result<Self, TierError> {
        let client = base_builder(settings).use_rustls_tls().build()?;
        Ok(Self::browser_like(
            FetchMethod::DirectClient,
            client,
            settings,
            Some(settings.initial_delay_secs.into()),
        ))
    }

    /// Same request pinned to HTTP/1.1.
    pub fn http1(settings: &FetchSettings) -> Result<Self, TierError> {
        let client = base_builder(settings).use_rustls_tls().http1_only().build()?;
        Ok(Self::browser_like(FetchMethod::ProtocolFallback, client, settings, None))
    }

    /// HTTP/1.1 with certificate validation disabled.
    pub fn insecure(settings: &FetchSettings) -> Result<Self, TierError> {
        let client = base_builder(settings)
            .use_rustls_tls()
            .http1_only()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self::browser_like(FetchMethod::InsecureFallback, client, settings, None))
    }

    /// Separate client on the platform TLS stack, minimal headers, no retries.
    pub fn alt_client(settings: &FetchSettings) -> Result<Self, TierError> {
        let client = base_builder(settings).use_native_tls().build()?;
        Ok(Self {
            method: FetchMethod::AltClient,
            client,
            headers: HeaderSet::Minimal,
            retries: 0,
            backoff: Duration::ZERO,
            pre_delay: Some(settings.fallback_delay_secs.into()),
        })
    }

    fn browser_like(
        method: FetchMethod,
        client: Client,
        settings: &FetchSettings,
        pre_delay: Option<DelayRange>,
    ) -> Self {
        Self {
            method,
            client,
            headers: HeaderSet::Browser,
            retries: settings.retries,
            backoff: settings.retry_backoff(),
            pre_delay,
        }
    }

    fn request(&self, url: &str, profile: &BrowserProfile) -> RequestBuilder {
        let req = self
            .client
            .get(url)
            .header(USER_AGENT, profile.user_agent)
            .header(ACCEPT_LANGUAGE, profile.accept_language);
        match self.headers {
            HeaderSet::Browser => req
                .header(ACCEPT, BROWSER_ACCEPT)
                .header(DNT, "1")
                .header(UPGRADE_INSECURE_REQUESTS, "1")
                .header("Sec-Fetch-Dest", "document")
                .header("Sec-Fetch-Mode", "navigate")
                .header("Sec-Fetch-Site", "none")
                .header(CACHE_CONTROL, "max-age=0"),
            HeaderSet::Minimal => req
                .header(ACCEPT, PLAIN_ACCEPT)
                .header(CACHE_CONTROL, "no-cache"),
        }
    }

    async fn fetch_once(&self, url: &str, profile: &BrowserProfile) -> Result<String, TierError> {
        let response = self.request(url, profile).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TierError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(TierError::EmptyBody);
        }
        Ok(body)
    }
}

/// `base * 2^attempt`, saturating instead of overflowing on large retry counts.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

fn base_builder(settings: &FetchSettings) -> ClientBuilder {
    // Accept-Encoding is negotiated by the gzip/brotli/deflate features.
    Client::builder()
        .connect_timeout(settings.connect_timeout())
        .timeout(settings.request_timeout())
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .deflate(true)
}

#[async_trait]
impl FetchTier for HttpTier {
    fn method(&self) -> FetchMethod {
        self.method
    }

    fn pre_delay(&self) -> Option<DelayRange> {
        self.pre_delay
    }

    async fn attempt(&self, url: &str, profile: &BrowserProfile) -> Result<String, TierError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, profile).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    let backoff = backoff_delay(self.backoff, attempt);
                    warn!(
                        url,
                        tier = %self.method,
                        error = %e,
                        "Transient error (attempt {}/{}), backing off {:.1}s",
                        attempt + 1,
                        self.retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::fetch::ProfilePool;

    fn settings() -> FetchSettings {
        FetchSettings {
            retries: 2,
            retry_backoff_ms: 1,
            initial_delay_secs: (0.0, 0.0),
            fallback_delay_secs: (0.0, 0.0),
            connect_timeout_secs: 2,
            request_timeout_secs: 5,
            ..Default::default()
        }
    }

    fn profile() -> BrowserProfile {
        use rand::SeedableRng;
        ProfilePool::default().pick(&mut rand::rngs::StdRng::seed_from_u64(0))
    }

    #[tokio::test]
    async fn direct_sends_browser_headers() {
        let server = MockServer::start().await;
        let p = profile();
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("sec-fetch-mode", "navigate"))
            .and(header("dnt", "1"))
            .and(header_exists("accept-encoding"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let tier = HttpTier::direct(&settings()).unwrap();
        let body = tier.attempt(&format!("{}/page", server.uri()), &p).await.unwrap();
        assert_eq!(body, "<html>hi</html>");

        let requests = server.received_requests().await.unwrap();
        let sent = &requests[0].headers;
        assert_eq!(sent.get("user-agent").unwrap().to_str().unwrap(), p.user_agent);
        assert_eq!(
            sent.get("accept-language").unwrap().to_str().unwrap(),
            p.accept_language
        );
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(2000);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(8000));
        assert_eq!(backoff_delay(base, 40), base * u32::MAX);
        assert_eq!(backoff_delay(Duration::from_secs(u64::MAX / 2), 3), Duration::MAX);
        assert_eq!(backoff_delay(Duration::ZERO, 64), Duration::ZERO);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let tier = HttpTier::http1(&settings()).unwrap();
        let err = tier
            .attempt(&format!("{}/missing", server.uri()), &profile())
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::Status(404)));
    }

    #[tokio::test]
    async fn server_error_is_retried_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let tier = HttpTier::direct(&settings()).unwrap();
        let err = tier
            .attempt(&format!("{}/flaky", server.uri()), &profile())
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::Status(503)));
    }

    #[tokio::test]
    async fn blank_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(path("/blank"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  \n"))
            .mount(&server)
            .await;

        let tier = HttpTier::alt_client(&settings()).unwrap();
        let err = tier
            .attempt(&format!("{}/blank", server.uri()), &profile())
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::EmptyBody));
    }

    #[tokio::test]
    async fn alt_client_uses_minimal_headers() {
        let server = MockServer::start().await;
        Mock::given(path("/alt"))
            .and(header("cache-control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>alt</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let tier = HttpTier::alt_client(&settings()).unwrap();
        assert_eq!(tier.method(), FetchMethod::AltClient);
        assert!(tier.pre_delay().is_some());
        let body = tier
            .attempt(&format!("{}/alt", server.uri()), &profile())
            .await
            .unwrap();
        assert_eq!(body, "<p>alt</p>");
    }
}
