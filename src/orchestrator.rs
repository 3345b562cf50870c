// Aggregation orchestrator. One search request fans out to every
// selected source concurrently, each task carrying its own timeout and
// retry budget; results are handed back over a channel and merged after
// every task reaches a terminal state. A source failing never fails the
// request: the caller always receives an offer list plus a per-source
// status report and decides what a partial result is worth.

use crate::cache::OfferCache;
use crate::driver::{
    ConnectionProbe, DriverFactory, SearchCriteria, SourceDriver, SourceError,
};
use crate::model::Offer;
use crate::registry::{SecretStore, SupplierConfig, SupplierRegistry};
use crate::wire::normalize_payload;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// Exponential backoff between retry attempts, jittered to keep parallel
// retries against the same gateway from aligning.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, retry_attempt: u32) -> Duration {
        let base_backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powf(retry_attempt as f64))
        .min(self.max_backoff_ms as f64);

        let jitter = rand::random::<f64>() * self.jitter_factor * base_backoff_ms;
        let backoff_ms = base_backoff_ms * (1.0 - self.jitter_factor / 2.0) + jitter;

        Duration::from_millis(backoff_ms as u64)
    }
}

// Post-merge filter set from the search UI.
#[derive(Debug, Clone, Default)]
pub struct OfferFilter {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub airline: Option<String>,
    pub max_stops: Option<u32>,
}

impl OfferFilter {
    pub fn matches(&self, offer: &Offer) -> bool {
        if !self.min_price.map_or(true, |min| offer.price.total >= min) {
            return false;
        }
        if !self.max_price.map_or(true, |max| offer.price.total <= max) {
            return false;
        }
        if !self
            .airline
            .as_ref()
            .map_or(true, |code| offer.validating_airline.code.eq_ignore_ascii_case(code))
        {
            return false;
        }
        if !self
            .max_stops
            .map_or(true, |max| offer.total_stops() <= max)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregationOptions {
    // Skip sources currently flagged unhealthy instead of attempting them
    pub skip_unhealthy: bool,
    // Outer deadline for the whole request; pending sources are cut off
    // and reported timed_out when it fires
    pub overall_deadline: Option<Duration>,
    pub filter: Option<OfferFilter>,
    pub use_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Succeeded,
    TimedOut,
    Failed(String),
    SkippedUnhealthy,
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub supplier_code: String,
    pub status: SourceStatus,
    pub offer_count: usize,
    pub dropped_records: usize,
    pub attempts: u32,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationResult {
    pub offers: Vec<Offer>,
    pub reports: Vec<SourceReport>,
    pub served_from_cache: bool,
}

impl AggregationResult {
    // Distinguishes "no flights found" from "infrastructure unavailable".
    pub fn no_sources_queried(&self) -> bool {
        self.reports
            .iter()
            .all(|r| r.status == SourceStatus::SkippedUnhealthy)
    }
}

enum OutcomeKind {
    Succeeded { retried: bool },
    TimedOut,
    Failed { reason: String, auth: bool },
}

struct SourceOutcome {
    kind: OutcomeKind,
    offers: Vec<Offer>,
    dropped: usize,
    attempts: u32,
    latency_ms: u64,
}

pub struct OfferAggregator {
    registry: Arc<SupplierRegistry>,
    vault: Arc<dyn SecretStore>,
    factory: Arc<dyn DriverFactory>,
    retry_policy: RetryPolicy,
    cache: Option<OfferCache>,
}

impl OfferAggregator {
    pub fn new(
        registry: Arc<SupplierRegistry>,
        vault: Arc<dyn SecretStore>,
        factory: Arc<dyn DriverFactory>,
    ) -> Self {
        Self {
            registry,
            vault,
            factory,
            retry_policy: RetryPolicy::default(),
            cache: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_cache(mut self, cache: OfferCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn search(
        &self,
        criteria: SearchCriteria,
        options: AggregationOptions,
    ) -> AggregationResult {
        self.search_with_cancel(criteria, options, None).await
    }

    // Full state machine: select, query, normalize, merge. The optional
    // cancel signal aborts in-flight source tasks when the caller goes
    // away so upstream quota is not burned for nobody.
    pub async fn search_with_cancel(
        &self,
        mut criteria: SearchCriteria,
        options: AggregationOptions,
        cancel: Option<watch::Receiver<bool>>,
    ) -> AggregationResult {
        criteria.cabin = criteria.cabin.trim().to_lowercase();

        if options.use_cache {
            if let Some(cache) = &self.cache {
                if let Some(offers) = cache.get(&criteria) {
                    debug!("search served from cache");
                    return AggregationResult {
                        offers: Self::finalize(offers, &options),
                        reports: Vec::new(),
                        served_from_cache: true,
                    };
                }
            }
        }

        // Selecting: request-scoped snapshot so a concurrent registry
        // edit cannot be observed halfway through this search.
        let candidates = self.registry.list_candidates();
        if candidates.is_empty() {
            info!("no active sources configured, returning degraded empty result");
            return AggregationResult::default();
        }

        // Reports come back in completion order; re-sort to priority
        // order at the end so callers see a stable, registry-shaped list.
        let priority_order: Vec<String> = candidates.iter().map(|c| c.code.clone()).collect();
        let mut reports = Vec::with_capacity(candidates.len());
        let (tx, mut rx) = mpsc::channel::<(String, SourceOutcome)>(candidates.len());
        let mut handles: Vec<(String, JoinHandle<()>)> = Vec::new();

        // Querying: one task per candidate, highest priority spawned
        // first so sequential fallback order matches registry order.
        for config in candidates {
            if options.skip_unhealthy && !config.is_healthy {
                debug!(supplier = %config.code, "skipping unhealthy source");
                reports.push(SourceReport {
                    supplier_code: config.code.clone(),
                    status: SourceStatus::SkippedUnhealthy,
                    offer_count: 0,
                    dropped_records: 0,
                    attempts: 0,
                    latency_ms: 0,
                });
                continue;
            }

            let credential = self.vault.credential(&config.code).ok();
            let driver = match self.factory.build(&config, credential.as_deref()) {
                Ok(driver) => driver,
                Err(err) => {
                    warn!(supplier = %config.code, error = %err, "driver construction failed");
                    reports.push(SourceReport {
                        supplier_code: config.code.clone(),
                        status: SourceStatus::Failed(err.to_string()),
                        offer_count: 0,
                        dropped_records: 0,
                        attempts: 0,
                        latency_ms: 0,
                    });
                    continue;
                }
            };

            let code = config.code.clone();
            let task_criteria = criteria.clone();
            let policy = self.retry_policy.clone();
            let task_tx = tx.clone();
            let handle = tokio::spawn(async move {
                let outcome = query_source(driver, &config, &task_criteria, &policy).await;
                let _ = task_tx.send((config.code, outcome)).await;
            });
            handles.push((code, handle));
        }
        drop(tx);

        // Merging is a join barrier over every spawned task, bounded by
        // the outer deadline and the cancel signal.
        let mut pending: Vec<String> = handles.iter().map(|(code, _)| code.clone()).collect();
        let mut outcomes: Vec<(String, SourceOutcome)> = Vec::new();
        let mut cancelled = false;

        let deadline_fut = sleep_until_deadline(options.overall_deadline);
        tokio::pin!(deadline_fut);
        let cancel_fut = wait_cancelled(cancel);
        tokio::pin!(cancel_fut);

        while !pending.is_empty() {
            tokio::select! {
                received = rx.recv() => match received {
                    Some((code, outcome)) => {
                        pending.retain(|c| c != &code);
                        outcomes.push((code, outcome));
                    }
                    None => break,
                },
                _ = &mut deadline_fut => {
                    warn!(pending = pending.len(), "overall search deadline reached");
                    break;
                }
                _ = &mut cancel_fut => {
                    info!(pending = pending.len(), "search cancelled by caller");
                    cancelled = true;
                    break;
                }
            }
        }

        for (code, handle) in &handles {
            if pending.contains(code) {
                handle.abort();
            }
        }
        for code in pending {
            reports.push(SourceReport {
                supplier_code: code,
                status: if cancelled {
                    SourceStatus::Failed("request cancelled".to_string())
                } else {
                    SourceStatus::TimedOut
                },
                offer_count: 0,
                dropped_records: 0,
                attempts: 0,
                latency_ms: 0,
            });
        }

        let mut merged: Vec<Offer> = Vec::new();
        let mut all_succeeded = true;
        for (code, outcome) in outcomes {
            let status = match &outcome.kind {
                OutcomeKind::Succeeded { retried } => {
                    // A clean first-attempt success is a live health
                    // signal; success after a retry leaves the flag as-is.
                    if !retried {
                        self.registry.mark_healthy(&code);
                    }
                    SourceStatus::Succeeded
                }
                OutcomeKind::TimedOut => {
                    self.on_source_down(&code);
                    all_succeeded = false;
                    SourceStatus::TimedOut
                }
                OutcomeKind::Failed { reason, auth } => {
                    if *auth {
                        self.on_source_down(&code);
                    } else {
                        self.registry.mark_unhealthy(&code);
                    }
                    all_succeeded = false;
                    SourceStatus::Failed(reason.clone())
                }
            };
            reports.push(SourceReport {
                supplier_code: code,
                status,
                offer_count: outcome.offers.len(),
                dropped_records: outcome.dropped,
                attempts: outcome.attempts,
                latency_ms: outcome.latency_ms,
            });
            merged.extend(outcome.offers);
        }

        reports.sort_by_key(|report| {
            priority_order
                .iter()
                .position(|code| code == &report.supplier_code)
                .unwrap_or(usize::MAX)
        });
        rank_offers(&mut merged);

        if options.use_cache && all_succeeded && !cancelled {
            if let Some(cache) = &self.cache {
                cache.store(&criteria, &merged);
            }
        }

        AggregationResult {
            offers: Self::finalize(merged, &options),
            reports,
            served_from_cache: false,
        }
    }

    fn finalize(offers: Vec<Offer>, options: &AggregationOptions) -> Vec<Offer> {
        match &options.filter {
            Some(filter) => offers.into_iter().filter(|o| filter.matches(o)).collect(),
            None => offers,
        }
    }

    fn on_source_down(&self, code: &str) {
        self.registry.mark_unhealthy(code);
        if let Some(cache) = &self.cache {
            cache.invalidate_supplier(code);
        }
    }

    // Out-of-band health probing over every active source. Used by the
    // scheduled probe collaborator; also handy operationally.
    pub async fn probe_sources(&self) -> Vec<(String, ConnectionProbe)> {
        let candidates = self.registry.list_candidates();
        let probes = candidates.iter().map(|config| {
            let credential = self.vault.credential(&config.code).ok();
            let driver = self.factory.build(config, credential.as_deref());
            async move {
                match driver {
                    Ok(driver) => driver.test_connection().await,
                    Err(err) => ConnectionProbe {
                        success: false,
                        message: err.to_string(),
                        latency_ms: None,
                    },
                }
            }
        });

        let results = join_all(probes).await;
        candidates
            .into_iter()
            .zip(results)
            .map(|(config, probe)| {
                if probe.success {
                    self.registry.mark_healthy(&config.code);
                } else {
                    self.on_source_down(&config.code);
                }
                (config.code, probe)
            })
            .collect()
    }
}

// Ascending total price; ties broken by fewer stops, then earlier
// departure (unknown departure sorts last).
fn rank_offers(offers: &mut [Offer]) {
    offers.sort_by(|a, b| {
        a.price
            .total
            .total_cmp(&b.price.total)
            .then_with(|| a.total_stops().cmp(&b.total_stops()))
            .then_with(|| departure_or_max(a).cmp(&departure_or_max(b)))
    });
}

fn departure_or_max(offer: &Offer) -> DateTime<Utc> {
    offer.departure_time().unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// One source's full lifecycle for one request: attempt, per-attempt
// timeout, retry on transient failures, normalize on success.
async fn query_source(
    driver: Arc<dyn SourceDriver>,
    config: &SupplierConfig,
    criteria: &SearchCriteria,
    policy: &RetryPolicy,
) -> SourceOutcome {
    let started = Instant::now();
    let attempt_timeout = Duration::from_secs(config.timeout_seconds.max(1));
    let max_attempts = config.retry_times + 1;

    let mut attempts = 0;
    let mut last_error: Option<SourceError> = None;

    while attempts < max_attempts {
        attempts += 1;
        let attempt = tokio::time::timeout(attempt_timeout, driver.search(criteria)).await;
        let result = match attempt {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(attempt_timeout.as_millis() as u64)),
        };

        match result {
            Ok(payload) => {
                let (offers, dropped) = normalize_payload(&config.code, &payload, criteria);
                info!(
                    supplier = %config.code,
                    offers = offers.len(),
                    dropped,
                    attempts,
                    "source query succeeded"
                );
                return SourceOutcome {
                    kind: OutcomeKind::Succeeded { retried: attempts > 1 },
                    offers,
                    dropped,
                    attempts,
                    latency_ms: started.elapsed().as_millis() as u64,
                };
            }
            Err(err) => {
                let transient = err.is_transient();
                warn!(supplier = %config.code, attempt = attempts, error = %err, "source attempt failed");
                last_error = Some(err);
                if !transient || attempts >= max_attempts {
                    break;
                }
                tokio::time::sleep(policy.backoff(attempts - 1)).await;
            }
        }
    }

    let latency_ms = started.elapsed().as_millis() as u64;
    match last_error {
        Some(SourceError::Timeout(_)) => SourceOutcome {
            kind: OutcomeKind::TimedOut,
            offers: Vec::new(),
            dropped: 0,
            attempts,
            latency_ms,
        },
        Some(err) => SourceOutcome {
            kind: OutcomeKind::Failed {
                reason: err.to_string(),
                auth: err.is_auth(),
            },
            offers: Vec::new(),
            dropped: 0,
            attempts,
            latency_ms,
        },
        None => SourceOutcome {
            kind: OutcomeKind::Failed {
                reason: "no attempt executed".to_string(),
                auth: false,
            },
            offers: Vec::new(),
            dropped: 0,
            attempts,
            latency_ms,
        },
    }
}

async fn sleep_until_deadline(deadline: Option<Duration>) {
    match deadline {
        Some(after) => tokio::time::sleep(after).await,
        None => std::future::pending().await,
    }
}

async fn wait_cancelled(rx: Option<watch::Receiver<bool>>) {
    match rx {
        Some(mut rx) => {
            loop {
                if *rx.borrow() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Sender gone without cancelling; treat as never
                    std::future::pending::<()>().await;
                }
            }
        }
        None => std::future::pending().await,
    }
}
