//! Reference price client for a single instrument.
//!
//! Polls the external price API on a fixed interval and publishes the
//! latest quote through a watch channel. Transport failures never surface
//! to the poller: a bounded random-walk generator seeded by the last known
//! price takes over so downstream consumers always see a value. Only the
//! manual refresh path can come back empty, after its retries are spent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::models::CertificateType;

/// A reference price observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub currency: String,
    pub change_24h: Option<f64>,
}

/// One day of historical reference prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalPriceEntry {
    pub date: String,
    pub price: f64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
struct RawPriceResponse {
    price: f64,
    timestamp: Option<DateTime<Utc>>,
    currency: Option<String>,
    change_24h: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawHistoryResponse {
    data: Vec<HistoricalPriceEntry>,
}

/// Marker error for HTTP 429 so callers can degrade to cached data.
#[derive(Debug)]
pub struct RateLimited;

impl std::fmt::Display for RateLimited {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rate limited by upstream price API")
    }
}

impl std::error::Error for RateLimited {}

/// Transport seam so tests can stub the upstream API.
#[async_trait]
pub trait PriceTransport: Send + Sync {
    async fn fetch_price(&self) -> Result<PriceQuote>;

    async fn fetch_history(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<HistoricalPriceEntry>>;
}

/// HTTP transport against the external price API.
pub struct HttpPriceTransport {
    client: reqwest::Client,
    base_url: String,
    instrument: CertificateType,
}

impl HttpPriceTransport {
    pub fn new(client: reqwest::Client, base_url: String, instrument: CertificateType) -> Self {
        Self {
            client,
            base_url,
            instrument,
        }
    }
}

#[async_trait]
impl PriceTransport for HttpPriceTransport {
    async fn fetch_price(&self) -> Result<PriceQuote> {
        let url = format!("{}/{}/price", self.base_url, self.instrument.as_str());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("price request failed: {url}"))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow::Error::new(RateLimited));
        }

        let raw: RawPriceResponse = response
            .error_for_status()
            .context("price API returned error status")?
            .json()
            .await
            .context("failed to parse price response")?;

        if !raw.price.is_finite() || raw.price <= 0.0 {
            anyhow::bail!("price API returned implausible price {}", raw.price);
        }

        Ok(PriceQuote {
            price: round2(raw.price),
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
            currency: raw.currency.unwrap_or_else(|| "EUR".to_string()),
            change_24h: raw.change_24h.map(round2),
        })
    }

    async fn fetch_history(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<HistoricalPriceEntry>> {
        let url = format!("{}/{}/history", self.base_url, self.instrument.as_str());
        let mut request = self.client.get(&url);
        if let Some(start) = start_date {
            request = request.query(&[("start_date", start.format("%Y-%m-%d").to_string())]);
        }
        if let Some(end) = end_date {
            request = request.query(&[("end_date", end.format("%Y-%m-%d").to_string())]);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("history request failed: {url}"))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow::Error::new(RateLimited));
        }

        let raw: RawHistoryResponse = response
            .error_for_status()
            .context("history API returned error status")?
            .json()
            .await
            .context("failed to parse history response")?;

        Ok(raw.data)
    }
}

/// Synthetic price generator used when the upstream feed is unavailable.
///
/// Walks from the last known price with bounded volatility and a slight
/// upward drift, clamped to the instrument's plausible range. Keeps a ring
/// of recent samples so the 24h change figure stays meaningful.
pub struct FallbackPriceModel {
    last_price: f64,
    history: VecDeque<f64>,
    min_price: f64,
    max_price: f64,
    volatility: f64,
    rng: ChaCha8Rng,
}

const FALLBACK_HISTORY_LEN: usize = 100;
const FALLBACK_TREND: f64 = 0.0001;

impl FallbackPriceModel {
    pub fn new(start_price: f64, min_price: f64, max_price: f64, volatility: f64) -> Self {
        let mut history = VecDeque::with_capacity(FALLBACK_HISTORY_LEN);
        history.push_back(start_price);
        Self {
            last_price: start_price,
            history,
            min_price,
            max_price,
            volatility,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Defaults matching each instrument's observed trading range.
    pub fn for_instrument(instrument: CertificateType) -> Self {
        match instrument {
            CertificateType::Cea => Self::new(40.0, 20.0, 60.0, 0.015),
            CertificateType::Eua => Self::new(75.0, 50.0, 100.0, 0.01),
        }
    }

    #[cfg(test)]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Record a real quote so later synthetic walks start from it.
    pub fn observe(&mut self, price: f64) {
        self.last_price = price;
        self.push_history(price);
    }

    /// Produce the next synthetic quote.
    pub fn next_quote(&mut self) -> PriceQuote {
        let change_24h = if self.history.len() > 1 {
            let oldest = self.history[0];
            round2((self.last_price - oldest) / oldest * 100.0)
        } else {
            round2(self.rng.gen_range(-3.0..3.0))
        };

        let step = (self.rng.gen::<f64>() - 0.5) * self.volatility;
        let next = self.last_price * (1.0 + FALLBACK_TREND + step);
        self.last_price = round2(next.clamp(self.min_price, self.max_price));
        self.push_history(self.last_price);

        PriceQuote {
            price: self.last_price,
            timestamp: Utc::now(),
            currency: "EUR".to_string(),
            change_24h: Some(change_24h),
        }
    }

    fn push_history(&mut self, price: f64) {
        self.history.push_back(price);
        while self.history.len() > FALLBACK_HISTORY_LEN {
            self.history.pop_front();
        }
    }
}

/// Tunables for caching and the manual-refresh retry policy.
#[derive(Debug, Clone)]
pub struct PriceFeedConfig {
    pub price_cache_ttl: Duration,
    pub history_cache_ttl: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            price_cache_ttl: Duration::from_secs(60),
            history_cache_ttl: Duration::from_secs(300),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

struct CachedPrice {
    quote: PriceQuote,
    fetched_at: Instant,
}

struct CachedHistory {
    key: String,
    entries: Vec<HistoricalPriceEntry>,
    fetched_at: Instant,
}

/// Price feed for one instrument.
///
/// All cache and dedup state is owned by the instance; two independent
/// feeds (CEA, EUA) are constructed at startup and injected where needed.
pub struct PriceFeed {
    instrument: CertificateType,
    transport: Arc<dyn PriceTransport>,
    config: PriceFeedConfig,
    fallback: Mutex<FallbackPriceModel>,
    price_cache: Mutex<Option<CachedPrice>>,
    history_cache: Mutex<Option<CachedHistory>>,
    // Serializes remote fetches so concurrent callers inside the TTL
    // window share one round trip.
    inflight: tokio::sync::Mutex<()>,
    latest_tx: watch::Sender<Option<PriceQuote>>,
}

impl PriceFeed {
    pub fn new(
        instrument: CertificateType,
        transport: Arc<dyn PriceTransport>,
        config: PriceFeedConfig,
    ) -> Arc<Self> {
        let (latest_tx, _) = watch::channel(None);
        Arc::new(Self {
            instrument,
            transport,
            config,
            fallback: Mutex::new(FallbackPriceModel::for_instrument(instrument)),
            price_cache: Mutex::new(None),
            history_cache: Mutex::new(None),
            inflight: tokio::sync::Mutex::new(()),
            latest_tx,
        })
    }

    pub fn instrument(&self) -> CertificateType {
        self.instrument
    }

    /// Subscribe to quote updates (poller and manual refreshes both publish).
    pub fn subscribe(&self) -> watch::Receiver<Option<PriceQuote>> {
        self.latest_tx.subscribe()
    }

    /// Latest published quote, if any poll has completed yet.
    pub fn latest(&self) -> Option<PriceQuote> {
        self.latest_tx.borrow().clone()
    }

    /// Fetch a quote, falling back to the synthetic generator on any
    /// transport failure. The background poller calls this; it never fails.
    pub async fn fetch_price(&self) -> PriceQuote {
        let quote = match self.try_fetch_remote().await {
            Ok(quote) => quote,
            Err(e) => {
                if e.downcast_ref::<RateLimited>().is_some() {
                    warn!(instrument = self.instrument.as_str(), "price API rate limited, using fallback");
                } else {
                    warn!(instrument = self.instrument.as_str(), error = %e, "price fetch failed, using fallback");
                }
                self.fallback.lock().next_quote()
            }
        };

        // send_replace so the value updates even before the first
        // subscriber shows up.
        self.latest_tx.send_replace(Some(quote.clone()));
        quote
    }

    /// Manual refresh: remote-only, retried with linearly increasing delay.
    /// Returns `None` once the retry budget is exhausted.
    pub async fn refresh(&self) -> Option<PriceQuote> {
        for attempt in 1..=self.config.max_retries {
            match self.try_fetch_remote().await {
                Ok(quote) => {
                    self.latest_tx.send_replace(Some(quote.clone()));
                    return Some(quote);
                }
                Err(e) => {
                    debug!(
                        instrument = self.instrument.as_str(),
                        attempt,
                        error = %e,
                        "manual refresh attempt failed"
                    );
                }
            }

            if attempt < self.config.max_retries {
                tokio::time::sleep(self.config.retry_delay * attempt).await;
            }
        }

        None
    }

    async fn try_fetch_remote(&self) -> Result<PriceQuote> {
        if let Some(quote) = self.cached_price() {
            return Ok(quote);
        }

        let _guard = self.inflight.lock().await;
        // Another caller may have completed the fetch while we waited.
        if let Some(quote) = self.cached_price() {
            return Ok(quote);
        }

        let quote = self.transport.fetch_price().await?;
        self.fallback.lock().observe(quote.price);
        *self.price_cache.lock() = Some(CachedPrice {
            quote: quote.clone(),
            fetched_at: Instant::now(),
        });

        Ok(quote)
    }

    fn cached_price(&self) -> Option<PriceQuote> {
        let cache = self.price_cache.lock();
        cache
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.config.price_cache_ttl)
            .map(|c| c.quote.clone())
    }

    /// Historical series, cached per parameter set. A 429 degrades to the
    /// last cached series when one exists.
    pub async fn fetch_history(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<HistoricalPriceEntry>> {
        let key = format!("{start_date:?}/{end_date:?}");

        {
            let cache = self.history_cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.key == key
                    && cached.fetched_at.elapsed() < self.config.history_cache_ttl
                {
                    return Ok(cached.entries.clone());
                }
            }
        }

        match self.transport.fetch_history(start_date, end_date).await {
            Ok(entries) => {
                *self.history_cache.lock() = Some(CachedHistory {
                    key,
                    entries: entries.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(entries)
            }
            Err(e) if e.downcast_ref::<RateLimited>().is_some() => {
                let cache = self.history_cache.lock();
                match cache.as_ref() {
                    Some(cached) => {
                        warn!(
                            instrument = self.instrument.as_str(),
                            "history rate limited, serving stale cache"
                        );
                        Ok(cached.entries.clone())
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Combined view over both instruments' latest quotes.
#[derive(Clone)]
pub struct ReferencePrices {
    cea: watch::Receiver<Option<PriceQuote>>,
    eua: watch::Receiver<Option<PriceQuote>>,
}

impl ReferencePrices {
    pub fn new(cea_feed: &PriceFeed, eua_feed: &PriceFeed) -> Self {
        Self {
            cea: cea_feed.subscribe(),
            eua: eua_feed.subscribe(),
        }
    }

    pub fn price(&self, instrument: CertificateType) -> Option<f64> {
        match instrument {
            CertificateType::Cea => self.cea.borrow().as_ref().map(|q| q.price),
            CertificateType::Eua => self.eua.borrow().as_ref().map(|q| q.price),
        }
    }

    pub fn pair(&self) -> crate::market::RefPair {
        crate::market::RefPair {
            cea: self.price(CertificateType::Cea),
            eua: self.price(CertificateType::Eua),
        }
    }

    /// Resolves when either instrument publishes a new quote. Returns
    /// `Err` once both senders are gone (shutdown).
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        tokio::select! {
            r = self.cea.changed() => r,
            r = self.eua.changed() => r,
        }
    }
}

/// Background poll loop for one feed.
pub fn spawn_price_poller(feed: Arc<PriceFeed>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let quote = feed.fetch_price().await;
            debug!(
                instrument = feed.instrument().as_str(),
                price = quote.price,
                "reference price updated"
            );
        }
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubTransport {
        calls: AtomicU32,
        responses: Mutex<Vec<Result<PriceQuote>>>,
    }

    impl StubTransport {
        fn new(responses: Vec<Result<PriceQuote>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                responses: Mutex::new(responses),
            })
        }

        fn quote(price: f64) -> PriceQuote {
            PriceQuote {
                price,
                timestamp: Utc::now(),
                currency: "EUR".to_string(),
                change_24h: None,
            }
        }
    }

    #[async_trait]
    impl PriceTransport for StubTransport {
        async fn fetch_price(&self) -> Result<PriceQuote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                anyhow::bail!("transport down")
            } else {
                responses.remove(0)
            }
        }

        async fn fetch_history(
            &self,
            _start: Option<NaiveDate>,
            _end: Option<NaiveDate>,
        ) -> Result<Vec<HistoricalPriceEntry>> {
            anyhow::bail!("not used")
        }
    }

    #[test]
    fn test_fallback_stays_within_bounds() {
        let mut model = FallbackPriceModel::new(40.0, 20.0, 60.0, 0.015).with_seed(7);
        for _ in 0..500 {
            let quote = model.next_quote();
            assert!(quote.price >= 20.0 && quote.price <= 60.0);
            assert_eq!(quote.currency, "EUR");
        }
    }

    #[test]
    fn test_fallback_resumes_from_observed_price() {
        let mut model = FallbackPriceModel::for_instrument(CertificateType::Eua).with_seed(3);
        model.observe(80.0);
        let quote = model.next_quote();
        // One 1% volatility step from 80.0 cannot move more than ~1 EUR.
        assert!((quote.price - 80.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_poller_path_falls_back_on_transport_failure() {
        let transport = StubTransport::new(vec![]);
        let feed = PriceFeed::new(
            CertificateType::Cea,
            transport,
            PriceFeedConfig::default(),
        );

        let quote = feed.fetch_price().await;
        assert!(quote.price >= 20.0 && quote.price <= 60.0);
        // Fallback quotes still get published.
        assert!(feed.latest().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_returns_none_after_retries() {
        let transport = StubTransport::new(vec![]);
        let feed = PriceFeed::new(
            CertificateType::Eua,
            transport.clone(),
            PriceFeedConfig::default(),
        );

        assert!(feed.refresh().await.is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_price_cache_deduplicates_within_ttl() {
        let transport = StubTransport::new(vec![
            Ok(StubTransport::quote(42.5)),
            Ok(StubTransport::quote(99.0)),
        ]);
        let feed = PriceFeed::new(
            CertificateType::Cea,
            transport.clone(),
            PriceFeedConfig::default(),
        );

        let first = feed.fetch_price().await;
        let second = feed.fetch_price().await;

        assert_eq!(first.price, 42.5);
        assert_eq!(second.price, 42.5);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_uses_fallback_without_poisoning_cache() {
        let transport = StubTransport::new(vec![
            Err(anyhow::Error::new(RateLimited)),
            Ok(StubTransport::quote(55.0)),
        ]);
        let feed = PriceFeed::new(
            CertificateType::Eua,
            transport.clone(),
            PriceFeedConfig::default(),
        );

        let first = feed.fetch_price().await;
        assert!(first.price >= 50.0 && first.price <= 100.0);

        // The 429 must not be cached: the next call reaches the transport.
        let second = feed.fetch_price().await;
        assert_eq!(second.price, 55.0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }
}
