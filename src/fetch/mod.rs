//! Ordered fetch fallback chain.
//!
//! A cached copy short-circuits everything. Otherwise each [`FetchTier`] is
//! tried in order with one [`BrowserProfile`] per URL, and the first tier that
//! returns a non-blank body wins. Tier errors never escape the chain.

pub mod browser;
pub mod http;
pub mod profile;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::FetchSettings;
use crate::error::TierError;
use browser::BrowserTier;
use http::HttpTier;
pub use profile::{BrowserProfile, ProfilePool};

pub const FETCH_EXHAUSTED: &str = "All fetch attempts failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Cache,
    DirectClient,
    ProtocolFallback,
    InsecureFallback,
    AltClient,
    ScriptedBrowser,
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchMethod::Cache => "cache",
            FetchMethod::DirectClient => "direct_client",
            FetchMethod::ProtocolFallback => "protocol_fallback",
            FetchMethod::InsecureFallback => "insecure_fallback",
            FetchMethod::AltClient => "alt_client",
            FetchMethod::ScriptedBrowser => "scripted_browser",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched { html: String, method: FetchMethod },
    Failed { reason: String },
}

/// Raw-HTML cache consulted before any network attempt.
pub trait HtmlCache {
    fn lookup(&self, url: &str) -> Option<String>;
}

/// Uniform random pause, in seconds, taken before a tier runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min: f64,
    pub max: f64,
}

impl From<(f64, f64)> for DelayRange {
    fn from((min, max): (f64, f64)) -> Self {
        Self { min, max }
    }
}

impl DelayRange {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Duration> {
        if self.max <= 0.0 {
            return None;
        }
        let secs = if self.max > self.min {
            rng.gen_range(self.min.max(0.0)..self.max)
        } else {
            self.max
        };
        Some(Duration::from_secs_f64(secs))
    }
}

#[async_trait]
pub trait FetchTier: Send + Sync {
    fn method(&self) -> FetchMethod;

    fn pre_delay(&self) -> Option<DelayRange> {
        None
    }

    /// Whether the tier's backing resource exists. Unavailable tiers are skipped.
    fn is_available(&self) -> bool {
        true
    }

    async fn attempt(&self, url: &str, profile: &BrowserProfile) -> Result<String, TierError>;
}

pub struct PageFetcher {
    tiers: Vec<Box<dyn FetchTier>>,
    profiles: ProfilePool,
    rng: StdRng,
}

impl PageFetcher {
    pub fn new(tiers: Vec<Box<dyn FetchTier>>, profiles: ProfilePool, rng: StdRng) -> Self {
        Self {
            tiers,
            profiles,
            rng,
        }
    }

    /// Build the standard chain: direct, HTTP/1.1, insecure (opt-in), alt client, browser.
    pub fn from_settings(settings: &FetchSettings) -> Result<Self, TierError> {
        let mut tiers: Vec<Box<dyn FetchTier>> = vec![
            Box::new(HttpTier::direct(settings)?),
            Box::new(HttpTier::http1(settings)?),
        ];
        if settings.allow_insecure_tls {
            warn!("Insecure TLS fallback enabled: certificates will not be validated on that tier");
            tiers.push(Box::new(HttpTier::insecure(settings)?));
        }
        tiers.push(Box::new(HttpTier::alt_client(settings)?));
        tiers.push(Box::new(BrowserTier::from_settings(settings)));

        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self::new(tiers, ProfilePool::default(), rng))
    }

    #[cfg(test)]
    pub fn tier_methods(&self) -> Vec<FetchMethod> {
        self.tiers.iter().map(|t| t.method()).collect()
    }

    pub async fn fetch(&mut self, url: &str, cache: &dyn HtmlCache) -> FetchOutcome {
        if let Some(html) = cache.lookup(url) {
            info!(url, bytes = html.len(), "Cache hit (raw HTML)");
            return FetchOutcome::Fetched {
                html,
                method: FetchMethod::Cache,
            };
        }

        let profile = self.profiles.pick(&mut self.rng);
        info!(url, user_agent = profile.user_agent, "Fetching");

        for tier in &self.tiers {
            let method = tier.method();
            if !tier.is_available() {
                info!(tier = %method, "Backing helper not found, skipping tier");
                continue;
            }
            if let Some(delay) = tier.pre_delay().and_then(|d| d.sample(&mut self.rng)) {
                info!(tier = %method, "Waiting {:.1}s before request", delay.as_secs_f64());
                tokio::time::sleep(delay).await;
            }

            match tier.attempt(url, &profile).await {
                Ok(html) => {
                    if method == FetchMethod::InsecureFallback {
                        warn!(url, insecure = true, bytes = html.len(), "Fetched without certificate validation");
                    } else {
                        info!(url, tier = %method, bytes = html.len(), "Fetch succeeded");
                    }
                    return FetchOutcome::Fetched { html, method };
                }
                Err(e) => warn!(url, tier = %method, error = %e, "Fetch attempt failed"),
            }
        }

        FetchOutcome::Failed {
            reason: FETCH_EXHAUSTED.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Tier stub that returns a fixed body (or fails) and counts its calls.
    pub struct StubTier {
        pub method: FetchMethod,
        pub body: Option<String>,
        pub available: bool,
        pub calls: Arc<AtomicUsize>,
    }

    impl StubTier {
        pub fn ok(method: FetchMethod, body: &str) -> Self {
            Self {
                method,
                body: Some(body.to_string()),
                available: true,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing(method: FetchMethod) -> Self {
            Self {
                method,
                body: None,
                available: true,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl FetchTier for StubTier {
        fn method(&self) -> FetchMethod {
            self.method
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn attempt(&self, _url: &str, _profile: &BrowserProfile) -> Result<String, TierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.body {
                Some(b) if !b.trim().is_empty() => Ok(b.clone()),
                Some(_) => Err(TierError::EmptyBody),
                None => Err(TierError::Status(503)),
            }
        }
    }

    pub fn fetcher(tiers: Vec<Box<dyn FetchTier>>) -> PageFetcher {
        PageFetcher::new(tiers, ProfilePool::default(), StdRng::seed_from_u64(42))
    }

    pub struct NoCache;

    impl HtmlCache for NoCache {
        fn lookup(&self, _url: &str) -> Option<String> {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::*;
    use super::*;

    struct FixedCache(&'static str);

    impl HtmlCache for FixedCache {
        fn lookup(&self, _url: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let first = StubTier::failing(FetchMethod::DirectClient);
        let second = StubTier::ok(FetchMethod::ProtocolFallback, "<p>ok</p>");
        let third = StubTier::ok(FetchMethod::AltClient, "<p>never</p>");
        let third_calls = third.calls.clone();

        let mut f = fetcher(vec![Box::new(first), Box::new(second), Box::new(third)]);
        let outcome = f.fetch("https://x.test/", &NoCache).await;

        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                html: "<p>ok</p>".into(),
                method: FetchMethod::ProtocolFallback
            }
        );
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_body_counts_as_failure() {
        let blank = StubTier::ok(FetchMethod::DirectClient, "   ");
        let real = StubTier::ok(FetchMethod::AltClient, "<p>body</p>");
        let mut f = fetcher(vec![Box::new(blank), Box::new(real)]);
        match f.fetch("https://x.test/", &NoCache).await {
            FetchOutcome::Fetched { method, .. } => assert_eq!(method, FetchMethod::AltClient),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn all_tiers_failing() {
        let mut f = fetcher(vec![
            Box::new(StubTier::failing(FetchMethod::DirectClient)),
            Box::new(StubTier::failing(FetchMethod::ScriptedBrowser)),
        ]);
        assert_eq!(
            f.fetch("https://x.test/", &NoCache).await,
            FetchOutcome::Failed {
                reason: FETCH_EXHAUSTED.into()
            }
        );
    }

    #[tokio::test]
    async fn unavailable_tier_is_skipped() {
        let mut browser = StubTier::ok(FetchMethod::ScriptedBrowser, "<p>hidden</p>");
        browser.available = false;
        let calls = browser.calls.clone();
        let mut f = fetcher(vec![Box::new(browser)]);

        assert!(matches!(
            f.fetch("https://x.test/", &NoCache).await,
            FetchOutcome::Failed { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_hit_skips_network() {
        let tier = StubTier::ok(FetchMethod::DirectClient, "<p>net</p>");
        let calls = tier.calls.clone();
        let mut f = fetcher(vec![Box::new(tier)]);

        let outcome = f.fetch("https://x.test/", &FixedCache("<p>cached</p>")).await;
        assert_eq!(
            outcome,
            FetchOutcome::Fetched {
                html: "<p>cached</p>".into(),
                method: FetchMethod::Cache
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn insecure_tier_is_opt_in() {
        let mut settings = FetchSettings {
            browser_helper: None,
            ..Default::default()
        };
        let f = PageFetcher::from_settings(&settings).unwrap();
        assert!(!f.tier_methods().contains(&FetchMethod::InsecureFallback));

        settings.allow_insecure_tls = true;
        let f = PageFetcher::from_settings(&settings).unwrap();
        assert_eq!(
            f.tier_methods(),
            vec![
                FetchMethod::DirectClient,
                FetchMethod::ProtocolFallback,
                FetchMethod::InsecureFallback,
                FetchMethod::AltClient,
                FetchMethod::ScriptedBrowser,
            ]
        );
    }

    #[test]
    fn delay_range_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let range = DelayRange::from((0.5, 1.5));
        for _ in 0..100 {
            let d = range.sample(&mut rng).unwrap().as_secs_f64();
            assert!((0.5..1.5).contains(&d));
        }
        assert!(DelayRange::from((0.0, 0.0)).sample(&mut rng).is_none());
    }

    #[test]
    fn method_names() {
        assert_eq!(FetchMethod::InsecureFallback.to_string(), "insecure_fallback");
        assert_eq!(
            serde_json::to_string(&FetchMethod::ScriptedBrowser).unwrap(),
            "\"scripted_browser\""
        );
    }
}
