//! Zero-trust evaluator
//!
//! Four orthogonal signals per request: device familiarity, network
//! location, recent behavior, time of access. Each signal is boolean; the
//! combined score weights them 30/25/25/20. This is an evaluation, not a
//! decision; callers interpret the score.

use crate::TrustConfig;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use trustgate_common::event::detail;
use trustgate_common::{
    Clock, EngineResult, EventStore, LocationMetadata, SecurityEvent, SecurityEventType,
};

/// Signal weights for the combined score
pub const DEVICE_WEIGHT: f64 = 0.30;
pub const LOCATION_WEIGHT: f64 = 0.25;
pub const BEHAVIOR_WEIGHT: f64 = 0.25;
pub const TIME_WEIGHT: f64 = 0.20;

/// A fingerprint's historical score must exceed this to count as trusted.
const DEVICE_TRUST_THRESHOLD: f64 = 0.7;
/// Behavior score pass mark
const BEHAVIOR_PASS: f64 = 0.6;
/// Combined scores below this emit a suspicious-activity signal.
const DEGRADED_TRUST: f64 = 0.5;

/// IP enrichment collaborator (VPN/proxy/Tor/hosting/threat flags).
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, ip: IpAddr) -> Option<LocationMetadata>;
}

/// Resolver that enriches nothing; location falls back to CIDR matching.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGeoResolver;

impl GeoResolver for NullGeoResolver {
    fn resolve(&self, _ip: IpAddr) -> Option<LocationMetadata> {
        None
    }
}

/// One access request to evaluate.
#[derive(Debug, Clone)]
pub struct ZeroTrustRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub ip: IpAddr,
    pub user_agent: String,
    pub location: Option<LocationMetadata>,
    pub device_fingerprint: Option<String>,
}

/// Per-request evaluation result. Not persisted; computed fresh every call.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ZeroTrustEvaluation {
    pub device_trusted: bool,
    pub location_trusted: bool,
    pub behavior_trusted: bool,
    pub time_trusted: bool,
    /// Weighted combination in [0, 1]
    pub overall_trust: f64,
}

/// Trust evaluator with a concurrent fingerprint-history cache.
pub struct TrustEvaluator {
    events: Arc<dyn EventStore>,
    geo: Arc<dyn GeoResolver>,
    clock: Arc<dyn Clock>,
    config: Arc<TrustConfig>,
    /// (tenant, user, fingerprint) digest -> historical trust score
    fingerprints: DashMap<String, f64>,
}

impl TrustEvaluator {
    pub fn new(
        events: Arc<dyn EventStore>,
        geo: Arc<dyn GeoResolver>,
        clock: Arc<dyn Clock>,
        config: Arc<TrustConfig>,
    ) -> Self {
        Self {
            events,
            geo,
            clock,
            config,
            fingerprints: DashMap::new(),
        }
    }

    pub async fn evaluate(&self, req: &ZeroTrustRequest) -> EngineResult<ZeroTrustEvaluation> {
        let now = self.clock.now();

        let device_trusted = match req.device_fingerprint.as_deref() {
            // never-before-seen fingerprints are untrusted by default
            Some(fp) => self
                .fingerprints
                .get(&fingerprint_key(&req.tenant_id, &req.user_id, fp))
                .map(|score| *score > DEVICE_TRUST_THRESHOLD)
                .unwrap_or(false),
            None => false,
        };
        let location_trusted = self.location_trusted(req);
        let behavior_trusted = self.behavior_trusted(req, now).await?;
        let time_trusted = self.time_trusted(now);

        let overall_trust = weighted(device_trusted, DEVICE_WEIGHT)
            + weighted(location_trusted, LOCATION_WEIGHT)
            + weighted(behavior_trusted, BEHAVIOR_WEIGHT)
            + weighted(time_trusted, TIME_WEIGHT);

        if let Some(fp) = req.device_fingerprint.as_deref() {
            self.record_fingerprint(req, fp, location_trusted, behavior_trusted, time_trusted);
        }

        let evaluation = ZeroTrustEvaluation {
            device_trusted,
            location_trusted,
            behavior_trusted,
            time_trusted,
            overall_trust,
        };

        if overall_trust < DEGRADED_TRUST {
            self.signal_degradation(req, &evaluation, now).await;
        }

        Ok(evaluation)
    }

    /// Blacklist beats everything; trusted CIDR ranges pass; otherwise
    /// enrichment metadata decides, and no metadata means untrusted.
    fn location_trusted(&self, req: &ZeroTrustRequest) -> bool {
        if self.config.is_blacklisted(req.ip) {
            return false;
        }
        if self.config.in_trusted_network(req.ip) {
            return true;
        }
        match req
            .location
            .clone()
            .or_else(|| self.geo.resolve(req.ip))
        {
            Some(meta) => meta.risk_flags() <= 1,
            None => false,
        }
    }

    /// Penalties over the last 24 hours of the user's events; they stack.
    async fn behavior_trusted(
        &self,
        req: &ZeroTrustRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let since = now - chrono::Duration::hours(24);
        let events = self
            .events
            .events_for_user(&req.tenant_id, &req.user_id, since)
            .await?;

        let mut score = 1.0f64;

        let distinct_ips: std::collections::HashSet<IpAddr> =
            events.iter().filter_map(|e| e.ip).collect();
        if distinct_ips.len() > 5 {
            score -= 0.3;
        }

        let failed_logins = events
            .iter()
            .filter(|e| e.event_type == SecurityEventType::LoginFailure)
            .count();
        if failed_logins > 3 {
            score -= 0.4;
        }

        if events
            .iter()
            .any(|e| e.event_type == SecurityEventType::SuspiciousActivity)
        {
            score -= 0.5;
        }

        Ok(score >= BEHAVIOR_PASS)
    }

    fn time_trusted(&self, now: DateTime<Utc>) -> bool {
        let local = self.config.local_time(now);
        let (start, end) = self.config.business_hours;
        let weekday = matches!(
            local.weekday(),
            Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu | Weekday::Fri
        );
        weekday && local.hour() >= start && local.hour() < end
    }

    /// Fold the non-device signals into the fingerprint's history. The
    /// familiarity signal normalizes the remaining 70% of weight to [0,1],
    /// so roughly three consistently clean sightings push a fingerprint
    /// past the trust threshold.
    fn record_fingerprint(
        &self,
        req: &ZeroTrustRequest,
        fingerprint: &str,
        location_trusted: bool,
        behavior_trusted: bool,
        time_trusted: bool,
    ) {
        let familiarity = (weighted(location_trusted, LOCATION_WEIGHT)
            + weighted(behavior_trusted, BEHAVIOR_WEIGHT)
            + weighted(time_trusted, TIME_WEIGHT))
            / (1.0 - DEVICE_WEIGHT);

        let key = fingerprint_key(&req.tenant_id, &req.user_id, fingerprint);
        self.fingerprints
            .entry(key)
            .and_modify(|score| *score = 0.6 * *score + 0.4 * familiarity)
            .or_insert(0.4 * familiarity);
    }

    async fn signal_degradation(
        &self,
        req: &ZeroTrustRequest,
        evaluation: &ZeroTrustEvaluation,
        now: DateTime<Utc>,
    ) {
        let event = SecurityEvent::new(&req.tenant_id, SecurityEventType::SuspiciousActivity, now)
            .with_user(&req.user_id)
            .with_ip(req.ip)
            .with_user_agent(&req.user_agent)
            .with_risk_score((1.0 - evaluation.overall_trust) * 100.0)
            .with_detail(detail::DEVICE_TRUSTED, evaluation.device_trusted.to_string())
            .with_detail(
                detail::LOCATION_TRUSTED,
                evaluation.location_trusted.to_string(),
            )
            .with_detail(
                detail::BEHAVIOR_TRUSTED,
                evaluation.behavior_trusted.to_string(),
            )
            .with_detail(detail::TIME_TRUSTED, evaluation.time_trusted.to_string());

        if let Err(e) = self.events.append(event).await {
            tracing::warn!(error = %e, "failed to append trust degradation event");
        }
    }
}

fn weighted(trusted: bool, weight: f64) -> f64 {
    if trusted {
        weight
    } else {
        0.0
    }
}

fn fingerprint_key(tenant_id: &str, user_id: &str, fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b"|");
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(fingerprint.as_bytes());
    hex::encode(hasher.finalize())
}
