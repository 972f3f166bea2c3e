//! TrustGate Zero Trust Access Risk Engine
//!
//! MFA credential lifecycle plus zero-trust risk evaluation and access
//! decisions:
//! - TOTP/SMS one-time codes and single-use backup codes
//! - Four-signal trust evaluation (device, location, behavior, time)
//! - Weighted risk scoring mapped to ALLOW / MONITOR / REQUIRE_MFA / DENY
//! - Append-only security event log with windowed analytics
//!
//! # Control flow
//! ```text
//!   access request ──► RiskEngine ──► decision (+ one DataAccess record)
//!                          │
//!                          ▼
//!                   TrustEvaluator ◄── event history
//!                          │
//!   REQUIRE_MFA? ──► MfaEngine (TOTP / SMS / backup code)
//!
//!   every component appends to the EventStore; analytics reads it back
//! ```
//!
//! Persistence, SMS transport, QR rendering and the HTTP layer are
//! collaborators behind traits; the engine itself is single-shot,
//! non-blocking computation over injected state.

use chrono::{DateTime, FixedOffset, Utc};
use ipnetwork::IpNetwork;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use trustgate_common::{Clock, DeviceStore, EngineResult, EventStore};

pub mod analytics;
pub mod cache;
pub mod mfa;
pub mod risk;
pub mod totp;
pub mod trust;

pub use analytics::{AnalyticsReport, MfaStats, RiskHistogram, SecurityAnalytics};
pub use cache::{CodeCache, ConsumeOutcome, MemoryCodeCache};
pub use mfa::{MfaEngine, SmsSender, TotpEnrollment};
pub use risk::{
    AccessRiskRequest, PolicyAction, ResourceSensitivity, RiskAssessment, RiskEngine, RiskFactor,
};
pub use trust::{
    GeoResolver, NullGeoResolver, TrustEvaluator, ZeroTrustEvaluation, ZeroTrustRequest,
};

/// Engine configuration, owned by the host process and injected at
/// construction. No process-wide state.
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Issuer label in TOTP provisioning URIs
    pub issuer: String,
    /// Explicitly distrusted source IPs
    pub blacklisted_ips: HashSet<IpAddr>,
    /// CIDR ranges considered trusted networks
    pub trusted_networks: Vec<IpNetwork>,
    /// Business hours as [start, end) local hours
    pub business_hours: (u32, u32),
    /// Offset applied to the clock for local-time rules
    pub utc_offset: FixedOffset,
    /// Pending SMS code validity
    pub sms_code_ttl: chrono::Duration,
    /// Decision records above this score are marked Blocked
    pub blocked_status_threshold: f64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            issuer: "TrustGate".to_string(),
            blacklisted_ips: HashSet::new(),
            trusted_networks: Vec::new(),
            business_hours: (9, 18),
            utc_offset: utc_offset_zero(),
            sms_code_ttl: chrono::Duration::minutes(10),
            blocked_status_threshold: 70.0,
        }
    }
}

impl TrustConfig {
    pub fn is_blacklisted(&self, ip: IpAddr) -> bool {
        self.blacklisted_ips.contains(&ip)
    }

    pub fn in_trusted_network(&self, ip: IpAddr) -> bool {
        self.trusted_networks.iter().any(|net| net.contains(ip))
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.utc_offset)
    }

    /// Set the local-time offset in whole hours; out-of-range values keep
    /// the current offset.
    pub fn with_utc_offset_hours(mut self, hours: i32) -> Self {
        if let Some(offset) = FixedOffset::east_opt(hours * 3600) {
            self.utc_offset = offset;
        }
        self
    }
}

// east_opt(0) cannot fail
fn utc_offset_zero() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

/// Facade wiring the engines to their collaborators. One instance serves
/// the whole host process; all methods take `&self` and are safe to call
/// from concurrent request handlers.
pub struct AccessEngine {
    mfa: MfaEngine,
    trust: TrustEvaluator,
    risk: RiskEngine,
    analytics: SecurityAnalytics,
}

impl AccessEngine {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        events: Arc<dyn EventStore>,
        codes: Arc<dyn CodeCache>,
        sms: Arc<dyn SmsSender>,
        geo: Arc<dyn GeoResolver>,
        clock: Arc<dyn Clock>,
        config: TrustConfig,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            mfa: MfaEngine::new(
                devices.clone(),
                events.clone(),
                codes,
                sms,
                clock.clone(),
                config.clone(),
            ),
            trust: TrustEvaluator::new(events.clone(), geo, clock.clone(), config.clone()),
            risk: RiskEngine::new(events.clone(), clock.clone(), config),
            analytics: SecurityAnalytics::new(events, devices, clock),
        }
    }

    pub async fn setup_totp(
        &self,
        user_id: &str,
        tenant_id: &str,
        device_name: &str,
    ) -> EngineResult<TotpEnrollment> {
        self.mfa.setup_totp(user_id, tenant_id, device_name).await
    }

    pub async fn verify_totp(
        &self,
        device_id: &str,
        code: &str,
        user_id: &str,
        tenant_id: &str,
    ) -> EngineResult<bool> {
        self.mfa.verify_totp(device_id, code, user_id, tenant_id).await
    }

    pub async fn setup_sms(
        &self,
        user_id: &str,
        phone_number: &str,
        tenant_id: &str,
    ) -> EngineResult<String> {
        self.mfa.setup_sms(user_id, phone_number, tenant_id).await
    }

    pub async fn send_sms_code(&self, device_id: &str, user_id: &str) -> EngineResult<()> {
        self.mfa.send_sms_code(device_id, user_id).await
    }

    pub async fn verify_sms(
        &self,
        device_id: &str,
        code: &str,
        user_id: &str,
        tenant_id: &str,
    ) -> EngineResult<bool> {
        self.mfa.verify_sms(device_id, code, user_id, tenant_id).await
    }

    pub async fn redeem_backup_code(
        &self,
        device_id: &str,
        code: &str,
        user_id: &str,
    ) -> EngineResult<bool> {
        self.mfa.redeem_backup_code(device_id, code, user_id).await
    }

    pub async fn evaluate_zero_trust(
        &self,
        request: &ZeroTrustRequest,
    ) -> EngineResult<ZeroTrustEvaluation> {
        self.trust.evaluate(request).await
    }

    /// Always returns a decision; internal failures deny.
    pub async fn assess_risk(&self, request: &AccessRiskRequest) -> RiskAssessment {
        self.risk.assess(request).await
    }

    pub async fn security_analytics(
        &self,
        tenant_id: &str,
        window_days: u32,
        top_ips: usize,
    ) -> EngineResult<AnalyticsReport> {
        self.analytics.report(tenant_id, window_days, top_ips).await
    }
}
