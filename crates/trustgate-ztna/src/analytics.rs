//! Security event analytics
//!
//! Pure read-side aggregations over a caller-specified window. No side
//! effects; nothing here writes to the log.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use trustgate_common::{Clock, DeviceStore, EngineResult, EventStore, SecurityEventType};

/// Four-bucket risk distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RiskHistogram {
    /// score <= 25
    pub low: u64,
    /// 25 < score <= 50
    pub medium: u64,
    /// 50 < score <= 75
    pub high: u64,
    /// score > 75
    pub critical: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IpRiskSummary {
    pub ip: IpAddr,
    pub event_count: u64,
    pub avg_risk: f64,
}

/// MFA adoption and usage rates for a tenant.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MfaStats {
    /// Device-owning users holding at least one active verified device
    pub adoption_rate: f64,
    /// MfaSuccess / (MfaSuccess + MfaFailure) within the window
    pub verification_rate: f64,
    /// Active devices used within the window
    pub recent_usage_rate: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalyticsReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_events: u64,
    pub events_by_type: BTreeMap<&'static str, u64>,
    pub risk_histogram: RiskHistogram,
    /// Ranked by average risk, highest first
    pub top_source_ips: Vec<IpRiskSummary>,
    /// Summed risk per day
    pub daily_risk: BTreeMap<NaiveDate, f64>,
    pub mfa: MfaStats,
}

pub struct SecurityAnalytics {
    events: Arc<dyn EventStore>,
    devices: Arc<dyn DeviceStore>,
    clock: Arc<dyn Clock>,
}

impl SecurityAnalytics {
    pub fn new(
        events: Arc<dyn EventStore>,
        devices: Arc<dyn DeviceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            devices,
            clock,
        }
    }

    pub async fn report(
        &self,
        tenant_id: &str,
        window_days: u32,
        top_ips: usize,
    ) -> EngineResult<AnalyticsReport> {
        let to = self.clock.now();
        let from = to - chrono::Duration::days(i64::from(window_days));
        let events = self.events.events_in_window(tenant_id, from, to).await?;

        let mut events_by_type: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut histogram = RiskHistogram::default();
        let mut per_ip: HashMap<IpAddr, (u64, f64)> = HashMap::new();
        let mut daily_risk: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        let mut mfa_success = 0u64;
        let mut mfa_failure = 0u64;

        for event in &events {
            *events_by_type.entry(event.event_type.as_str()).or_insert(0) += 1;

            match event.risk_score {
                s if s <= 25.0 => histogram.low += 1,
                s if s <= 50.0 => histogram.medium += 1,
                s if s <= 75.0 => histogram.high += 1,
                _ => histogram.critical += 1,
            }

            if let Some(ip) = event.ip {
                let entry = per_ip.entry(ip).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += event.risk_score;
            }

            *daily_risk.entry(event.timestamp.date_naive()).or_insert(0.0) += event.risk_score;

            match event.event_type {
                SecurityEventType::MfaSuccess => mfa_success += 1,
                SecurityEventType::MfaFailure => mfa_failure += 1,
                _ => {}
            }
        }

        let mut top_source_ips: Vec<IpRiskSummary> = per_ip
            .into_iter()
            .map(|(ip, (count, sum))| IpRiskSummary {
                ip,
                event_count: count,
                avg_risk: sum / count as f64,
            })
            .collect();
        top_source_ips.sort_by(|a, b| {
            b.avg_risk
                .total_cmp(&a.avg_risk)
                .then(b.event_count.cmp(&a.event_count))
        });
        top_source_ips.truncate(top_ips);

        let mfa = self
            .mfa_stats(tenant_id, from, mfa_success, mfa_failure)
            .await?;

        Ok(AnalyticsReport {
            from,
            to,
            total_events: events.len() as u64,
            events_by_type,
            risk_histogram: histogram,
            top_source_ips,
            daily_risk,
            mfa,
        })
    }

    async fn mfa_stats(
        &self,
        tenant_id: &str,
        window_start: DateTime<Utc>,
        mfa_success: u64,
        mfa_failure: u64,
    ) -> EngineResult<MfaStats> {
        let devices = self.devices.list_for_tenant(tenant_id).await?;

        let owners: HashSet<&str> = devices.iter().map(|d| d.user_id.as_str()).collect();
        let verified_owners: HashSet<&str> = devices
            .iter()
            .filter(|d| d.is_active && d.is_verified)
            .map(|d| d.user_id.as_str())
            .collect();

        let active = devices.iter().filter(|d| d.is_active).count();
        let recently_used = devices
            .iter()
            .filter(|d| d.is_active && d.last_used.is_some_and(|t| t >= window_start))
            .count();

        Ok(MfaStats {
            adoption_rate: ratio(verified_owners.len() as u64, owners.len() as u64),
            verification_rate: ratio(mfa_success, mfa_success + mfa_failure),
            recent_usage_rate: ratio(recently_used as u64, active as u64),
        })
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use trustgate_common::{
        EventStatus, FixedClock, InMemoryDeviceStore, InMemoryEventStore, MfaDevice,
        MfaDeviceType, SecurityEvent,
    };

    fn device(id: &str, user: &str, verified: bool, last_used: Option<DateTime<Utc>>) -> MfaDevice {
        MfaDevice {
            id: id.to_string(),
            user_id: user.to_string(),
            tenant_id: "t1".to_string(),
            device_type: MfaDeviceType::Totp,
            name: "phone".to_string(),
            secret: None,
            phone_number: None,
            backup_codes: Default::default(),
            is_active: true,
            is_verified: verified,
            failed_attempts: 0,
            last_used,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_report_aggregations() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::at(now));
        let events = Arc::new(InMemoryEventStore::new());
        let devices = Arc::new(InMemoryDeviceStore::new());

        let day1 = now - chrono::Duration::days(2);
        let day2 = now - chrono::Duration::days(1);
        let seeds = [
            (day1, SecurityEventType::LoginSuccess, "192.0.2.1", 10.0),
            (day1, SecurityEventType::DataAccess, "192.0.2.1", 30.0),
            (day2, SecurityEventType::DataAccess, "192.0.2.2", 60.0),
            (day2, SecurityEventType::SuspiciousActivity, "192.0.2.2", 90.0),
        ];
        for (at, event_type, ip, risk) in seeds {
            events
                .append(
                    SecurityEvent::new("t1", event_type, at)
                        .with_user("u1")
                        .with_ip(ip.parse().unwrap())
                        .with_risk_score(risk),
                )
                .await
                .unwrap();
        }
        // outside the window: excluded
        events
            .append(
                SecurityEvent::new(
                    "t1",
                    SecurityEventType::LoginSuccess,
                    now - chrono::Duration::days(10),
                )
                .with_risk_score(99.0),
            )
            .await
            .unwrap();
        // other tenant: excluded
        events
            .append(SecurityEvent::new("t2", SecurityEventType::LoginSuccess, day1))
            .await
            .unwrap();

        let analytics = SecurityAnalytics::new(events, devices, clock);
        let report = analytics.report("t1", 7, 10).await.unwrap();

        assert_eq!(report.total_events, 4);
        assert_eq!(report.events_by_type.get("data_access"), Some(&2));
        assert_eq!(report.events_by_type.get("login_success"), Some(&1));

        assert_eq!(
            report.risk_histogram,
            RiskHistogram {
                low: 1,
                medium: 1,
                high: 1,
                critical: 1
            }
        );

        // 192.0.2.2 averages 75, 192.0.2.1 averages 20
        assert_eq!(report.top_source_ips.len(), 2);
        assert_eq!(report.top_source_ips[0].ip, "192.0.2.2".parse::<IpAddr>().unwrap());
        assert!((report.top_source_ips[0].avg_risk - 75.0).abs() < 1e-9);
        assert_eq!(report.top_source_ips[0].event_count, 2);

        assert_eq!(report.daily_risk.len(), 2);
        assert!((report.daily_risk[&day1.date_naive()] - 40.0).abs() < 1e-9);
        assert!((report.daily_risk[&day2.date_naive()] - 150.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_mfa_rates() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::at(now));
        let events = Arc::new(InMemoryEventStore::new());
        let devices = Arc::new(InMemoryDeviceStore::new());

        // u1 verified and recently used, u2 enrolled but never verified
        devices
            .insert(device("d1", "u1", true, Some(now - chrono::Duration::days(1))))
            .await
            .unwrap();
        devices.insert(device("d2", "u2", false, None)).await.unwrap();

        let earlier = now - chrono::Duration::hours(1);
        for _ in 0..3 {
            events
                .append(
                    SecurityEvent::new("t1", SecurityEventType::MfaSuccess, earlier)
                        .with_user("u1"),
                )
                .await
                .unwrap();
        }
        events
            .append(
                SecurityEvent::new("t1", SecurityEventType::MfaFailure, earlier)
                    .with_user("u2")
                    .with_status(EventStatus::Failure),
            )
            .await
            .unwrap();

        let analytics = SecurityAnalytics::new(events, devices, clock);
        let report = analytics.report("t1", 7, 10).await.unwrap();

        assert!((report.mfa.adoption_rate - 0.5).abs() < 1e-9);
        assert!((report.mfa.verification_rate - 0.75).abs() < 1e-9);
        assert!((report.mfa.recent_usage_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_window_is_all_zeroes() {
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let analytics = SecurityAnalytics::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryDeviceStore::new()),
            clock,
        );
        let report = analytics.report("t1", 30, 5).await.unwrap();

        assert_eq!(report.total_events, 0);
        assert!(report.top_source_ips.is_empty());
        assert_eq!(report.mfa.adoption_rate, 0.0);
        assert_eq!(report.mfa.verification_rate, 0.0);

        // dashboards consume the report as JSON
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["total_events"], 0);
    }
}
