//! Risk scoring and access decisions
//!
//! Weighted multi-factor risk score in [0, 100] mapped onto a fixed action
//! set. The assessment contract guarantees a decision: any internal failure
//! yields DENY at score 100, never silence and never fail-open.

use crate::TrustConfig;
use chrono::{Datelike, Timelike, Weekday};
use std::net::IpAddr;
use std::sync::Arc;
use trustgate_common::event::detail;
use trustgate_common::{
    Clock, EngineResult, EventStatus, EventStore, SecurityEvent, SecurityEventType,
};

// Factor weights in points; impacts in [0,1] scale into them. Total 100.
const IP_WEIGHT: f64 = 30.0;
const BEHAVIOR_WEIGHT: f64 = 25.0;
const TIME_WEIGHT: f64 = 15.0;
const SENSITIVITY_WEIGHT: f64 = 30.0;

// Decision thresholds, highest wins, inclusive.
const DENY_AT: f64 = 80.0;
const REQUIRE_MFA_AT: f64 = 60.0;
const MONITOR_AT: f64 = 40.0;

/// Declared sensitivity of the resource being accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ResourceSensitivity {
    Low,
    Medium,
    High,
    Critical,
}

impl ResourceSensitivity {
    fn impact(&self) -> f64 {
        match self {
            Self::Low => 0.1,
            Self::Medium => 0.3,
            Self::High => 0.6,
            Self::Critical => 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PolicyAction {
    Allow,
    Monitor,
    RequireMfa,
    Deny,
}

impl PolicyAction {
    /// Threshold mapping for a total risk score.
    pub fn for_score(total: f64) -> Self {
        if total >= DENY_AT {
            Self::Deny
        } else if total >= REQUIRE_MFA_AT {
            Self::RequireMfa
        } else if total >= MONITOR_AT {
            Self::Monitor
        } else {
            Self::Allow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Monitor => "MONITOR",
            Self::RequireMfa => "REQUIRE_MFA",
            Self::Deny => "DENY",
        }
    }

    fn recommendation(&self) -> &'static str {
        match self {
            Self::Allow => "Proceed; risk within normal bounds",
            Self::Monitor => "Proceed with enhanced monitoring of this session",
            Self::RequireMfa => "Require a fresh MFA verification before proceeding",
            Self::Deny => "Block the request and alert the security team",
        }
    }
}

/// One weighted contributor to the total score. Ephemeral; exists only
/// within a single assessment.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RiskFactor {
    pub name: String,
    /// Impact in [0, 1]
    pub impact: f64,
    pub description: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RiskAssessment {
    /// Total score in [0, 100]
    pub risk_score: f64,
    pub factors: Vec<RiskFactor>,
    pub action: PolicyAction,
    pub recommendation: String,
}

#[derive(Debug, Clone)]
pub struct AccessRiskRequest {
    pub user_id: String,
    pub tenant_id: String,
    /// Action name, e.g. "export_payroll"
    pub action: String,
    pub ip: IpAddr,
    pub user_agent: String,
    pub sensitivity: ResourceSensitivity,
}

/// Risk evaluation engine
pub struct RiskEngine {
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    config: Arc<TrustConfig>,
}

impl RiskEngine {
    pub fn new(events: Arc<dyn EventStore>, clock: Arc<dyn Clock>, config: Arc<TrustConfig>) -> Self {
        Self {
            events,
            clock,
            config,
        }
    }

    /// Assess a request and emit exactly one decision record.
    pub async fn assess(&self, req: &AccessRiskRequest) -> RiskAssessment {
        let assessment = match self.compute(req).await {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    user_id = %req.user_id,
                    action = %req.action,
                    "risk assessment failed, denying"
                );
                RiskAssessment {
                    risk_score: 100.0,
                    factors: vec![RiskFactor {
                        name: "assessment_error".to_string(),
                        impact: 1.0,
                        description: format!("risk computation failed: {e}"),
                    }],
                    action: PolicyAction::Deny,
                    recommendation: PolicyAction::Deny.recommendation().to_string(),
                }
            }
        };

        self.record(req, &assessment).await;
        assessment
    }

    async fn compute(&self, req: &AccessRiskRequest) -> EngineResult<RiskAssessment> {
        let mut factors = Vec::new();

        let ip_impact = self.ip_impact(req.ip);
        if ip_impact > 0.0 {
            factors.push(RiskFactor {
                name: "ip_reputation".to_string(),
                impact: ip_impact,
                description: if ip_impact >= 1.0 {
                    format!("{} is blacklisted", req.ip)
                } else {
                    format!("{} is outside trusted networks", req.ip)
                },
            });
        }

        let behavior_impact = self.behavior_impact(req).await?;
        if behavior_impact > 0.0 {
            factors.push(RiskFactor {
                name: "behavior_anomaly".to_string(),
                impact: behavior_impact,
                description: "elevated activity or failed attempts in the last hour".to_string(),
            });
        }

        let time_impact = self.time_impact();
        if time_impact > 0.0 {
            factors.push(RiskFactor {
                name: "time_of_access".to_string(),
                impact: time_impact,
                description: "access outside normal hours".to_string(),
            });
        }

        // sensitivity always contributes
        let sensitivity_impact = req.sensitivity.impact();
        factors.push(RiskFactor {
            name: "resource_sensitivity".to_string(),
            impact: sensitivity_impact,
            description: format!("resource declared {:?}", req.sensitivity),
        });

        let risk_score = ip_impact * IP_WEIGHT
            + behavior_impact * BEHAVIOR_WEIGHT
            + time_impact * TIME_WEIGHT
            + sensitivity_impact * SENSITIVITY_WEIGHT;

        let action = PolicyAction::for_score(risk_score);
        Ok(RiskAssessment {
            risk_score,
            factors,
            action,
            recommendation: action.recommendation().to_string(),
        })
    }

    fn ip_impact(&self, ip: IpAddr) -> f64 {
        if self.config.is_blacklisted(ip) {
            1.0
        } else if !self.config.in_trusted_network(ip) {
            0.3
        } else {
            0.0
        }
    }

    /// Volume and failure pressure over the preceding hour.
    async fn behavior_impact(&self, req: &AccessRiskRequest) -> EngineResult<f64> {
        let since = self.clock.now() - chrono::Duration::hours(1);
        let events = self
            .events
            .events_for_user(&req.tenant_id, &req.user_id, since)
            .await?;

        let mut impact: f64 = if events.len() > 50 {
            0.8
        } else if events.len() > 20 {
            0.4
        } else {
            0.0
        };

        let failed = events
            .iter()
            .filter(|e| {
                matches!(
                    e.event_type,
                    SecurityEventType::LoginFailure | SecurityEventType::MfaFailure
                )
            })
            .count();
        if failed > 5 {
            impact = impact.max(0.9);
        }

        Ok(impact)
    }

    fn time_impact(&self) -> f64 {
        let local = self.config.local_time(self.clock.now());
        let hour = local.hour();

        let mut impact: f64 = if hour >= 22 || hour <= 6 { 0.3 } else { 0.0 };
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            impact = impact.max(0.2);
        }
        impact
    }

    /// One DataAccess record per evaluation; append failures are swallowed
    /// so a logging outage never turns into a missing decision.
    async fn record(&self, req: &AccessRiskRequest, assessment: &RiskAssessment) {
        let status = if assessment.risk_score > self.config.blocked_status_threshold {
            EventStatus::Blocked
        } else {
            EventStatus::Success
        };
        let factor_names = assessment
            .factors
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let event =
            SecurityEvent::new(&req.tenant_id, SecurityEventType::DataAccess, self.clock.now())
                .with_user(&req.user_id)
                .with_ip(req.ip)
                .with_user_agent(&req.user_agent)
                .with_risk_score(assessment.risk_score)
                .with_status(status)
                .with_detail(detail::ACTION, &req.action)
                .with_detail(detail::DECISION, assessment.action.as_str())
                .with_detail(detail::FACTORS, factor_names);

        if let Err(e) = self.events.append(event).await {
            tracing::warn!(error = %e, "failed to append risk decision event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use trustgate_common::{FixedClock, InMemoryEventStore, StoreError, StoreResult};

    fn config() -> TrustConfig {
        TrustConfig {
            trusted_networks: vec!["10.0.0.0/8".parse().unwrap()],
            blacklisted_ips: ["203.0.113.66".parse().unwrap()].into_iter().collect(),
            ..TrustConfig::default()
        }
    }

    fn request(ip: &str, sensitivity: ResourceSensitivity) -> AccessRiskRequest {
        AccessRiskRequest {
            user_id: "u1".to_string(),
            tenant_id: "t1".to_string(),
            action: "read_report".to_string(),
            ip: ip.parse().unwrap(),
            user_agent: "test-agent".to_string(),
            sensitivity,
        }
    }

    fn engine_at(
        events: Arc<InMemoryEventStore>,
        at: chrono::DateTime<Utc>,
    ) -> (RiskEngine, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::at(at));
        (
            RiskEngine::new(events, clock.clone(), Arc::new(config())),
            clock,
        )
    }

    fn tuesday_noon() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decision_thresholds() {
        assert_eq!(PolicyAction::for_score(85.0), PolicyAction::Deny);
        assert_eq!(PolicyAction::for_score(80.0), PolicyAction::Deny);
        assert_eq!(PolicyAction::for_score(79.0), PolicyAction::RequireMfa);
        assert_eq!(PolicyAction::for_score(65.0), PolicyAction::RequireMfa);
        assert_eq!(PolicyAction::for_score(60.0), PolicyAction::RequireMfa);
        assert_eq!(PolicyAction::for_score(45.0), PolicyAction::Monitor);
        assert_eq!(PolicyAction::for_score(40.0), PolicyAction::Monitor);
        assert_eq!(PolicyAction::for_score(10.0), PolicyAction::Allow);
    }

    #[tokio::test]
    async fn test_clean_request_allows() {
        let events = Arc::new(InMemoryEventStore::new());
        let (engine, _) = engine_at(events.clone(), tuesday_noon());

        let assessment = engine
            .assess(&request("10.1.2.3", ResourceSensitivity::Low))
            .await;
        assert!((assessment.risk_score - 3.0).abs() < 1e-9);
        assert_eq!(assessment.action, PolicyAction::Allow);
        // only the unconditional sensitivity factor contributes
        assert_eq!(assessment.factors.len(), 1);
        assert_eq!(assessment.factors[0].name, "resource_sensitivity");
    }

    #[tokio::test]
    async fn test_sensitivity_monotonicity() {
        let events = Arc::new(InMemoryEventStore::new());
        let (engine, _) = engine_at(events, tuesday_noon());

        let mut previous = -1.0;
        for sensitivity in [
            ResourceSensitivity::Low,
            ResourceSensitivity::Medium,
            ResourceSensitivity::High,
            ResourceSensitivity::Critical,
        ] {
            let assessment = engine.assess(&request("10.1.2.3", sensitivity)).await;
            assert!(
                assessment.risk_score >= previous,
                "raising sensitivity must not lower risk"
            );
            previous = assessment.risk_score;
        }
    }

    #[tokio::test]
    async fn test_hostile_request_denied_and_blocked() {
        let events = Arc::new(InMemoryEventStore::new());
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 23, 0, 0).unwrap(); // Tuesday 23:00
        // six failed logins inside the hour raise behavior to 0.9
        for _ in 0..6 {
            events
                .append(
                    SecurityEvent::new("t1", SecurityEventType::LoginFailure, now)
                        .with_user("u1")
                        .with_status(EventStatus::Failure),
                )
                .await
                .unwrap();
        }
        let (engine, clock) = engine_at(events.clone(), now);

        let assessment = engine
            .assess(&request("203.0.113.66", ResourceSensitivity::Critical))
            .await;
        // 30 (blacklisted) + 22.5 (failures) + 4.5 (night) + 27 (critical)
        assert!((assessment.risk_score - 84.0).abs() < 1e-9);
        assert_eq!(assessment.action, PolicyAction::Deny);

        let logged = events
            .events_in_window(
                "t1",
                clock.now() - chrono::Duration::minutes(1),
                clock.now() + chrono::Duration::minutes(1),
            )
            .await
            .unwrap();
        let decisions: Vec<_> = logged
            .iter()
            .filter(|e| e.event_type == SecurityEventType::DataAccess)
            .collect();
        assert_eq!(decisions.len(), 1, "exactly one decision record");
        assert_eq!(decisions[0].status, EventStatus::Blocked);
        assert_eq!(
            decisions[0].details.get(detail::DECISION).map(String::as_str),
            Some("DENY")
        );
        assert!(decisions[0]
            .details
            .get(detail::FACTORS)
            .unwrap()
            .contains("ip_reputation"));
    }

    #[tokio::test]
    async fn test_event_volume_raises_behavior() {
        let events = Arc::new(InMemoryEventStore::new());
        let now = tuesday_noon();
        for _ in 0..21 {
            events
                .append(SecurityEvent::new("t1", SecurityEventType::DataAccess, now).with_user("u1"))
                .await
                .unwrap();
        }
        let (engine, _) = engine_at(events, now);

        let assessment = engine
            .assess(&request("10.1.2.3", ResourceSensitivity::Low))
            .await;
        let behavior = assessment
            .factors
            .iter()
            .find(|f| f.name == "behavior_anomaly")
            .expect("behavior factor present");
        assert!((behavior.impact - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_weekend_daytime_carries_time_risk() {
        let events = Arc::new(InMemoryEventStore::new());
        // Saturday 12:00
        let (engine, _) = engine_at(events, Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap());

        let assessment = engine
            .assess(&request("10.1.2.3", ResourceSensitivity::Low))
            .await;
        let time = assessment
            .factors
            .iter()
            .find(|f| f.name == "time_of_access")
            .expect("time factor present");
        assert!((time.impact - 0.2).abs() < 1e-9);
    }

    /// Event store whose reads fail but whose appends still work, to prove
    /// the decision record survives an assessment failure.
    #[derive(Default)]
    struct ReadFailingStore {
        appended: InMemoryEventStore,
    }

    #[async_trait]
    impl EventStore for ReadFailingStore {
        async fn append(&self, event: SecurityEvent) -> StoreResult<()> {
            self.appended.append(event).await
        }

        async fn events_for_user(
            &self,
            _tenant_id: &str,
            _user_id: &str,
            _since: chrono::DateTime<Utc>,
        ) -> StoreResult<Vec<SecurityEvent>> {
            Err(StoreError::Storage("backend unavailable".to_string()))
        }

        async fn events_in_window(
            &self,
            tenant_id: &str,
            from: chrono::DateTime<Utc>,
            to: chrono::DateTime<Utc>,
        ) -> StoreResult<Vec<SecurityEvent>> {
            self.appended.events_in_window(tenant_id, from, to).await
        }
    }

    #[tokio::test]
    async fn test_assessment_failure_fails_closed() {
        let events = Arc::new(ReadFailingStore::default());
        let clock = Arc::new(FixedClock::at(tuesday_noon()));
        let engine = RiskEngine::new(events.clone(), clock.clone(), Arc::new(config()));

        let assessment = engine
            .assess(&request("10.1.2.3", ResourceSensitivity::Low))
            .await;
        assert_eq!(assessment.action, PolicyAction::Deny);
        assert!((assessment.risk_score - 100.0).abs() < 1e-9);
        assert_eq!(assessment.factors.len(), 1);
        assert_eq!(assessment.factors[0].name, "assessment_error");

        // the decision record is still emitted
        let logged = events
            .events_in_window(
                "t1",
                clock.now() - chrono::Duration::minutes(1),
                clock.now() + chrono::Duration::minutes(1),
            )
            .await
            .unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].status, EventStatus::Blocked);
    }
}
