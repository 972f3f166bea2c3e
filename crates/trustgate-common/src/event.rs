//! Security event model
//!
//! Immutable audit records consumed by trust/behavior evaluation and
//! analytics. Events are append-only; nothing in the engine mutates or
//! deletes one after it is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Allowed keys for [`SecurityEvent::details`].
///
/// The details map is a closed key-value structure rather than a free-form
/// payload so analytics aggregation stays type-safe. Keys used per event type:
///
/// - `MfaSuccess` / `MfaFailure`: [`ACTION`], [`METHOD`], [`REASON`],
///   [`DEVICE_ID`], [`DEVICE_NAME`], [`FAILED_ATTEMPTS`]
/// - `DataAccess` (risk decisions): [`ACTION`], [`DECISION`], [`FACTORS`]
/// - `SuspiciousActivity` (trust degradation): [`DEVICE_TRUSTED`],
///   [`LOCATION_TRUSTED`], [`BEHAVIOR_TRUSTED`], [`TIME_TRUSTED`]
pub mod detail {
    pub const ACTION: &str = "action";
    pub const METHOD: &str = "method";
    pub const REASON: &str = "reason";
    pub const DEVICE_ID: &str = "device_id";
    pub const DEVICE_NAME: &str = "device_name";
    pub const FAILED_ATTEMPTS: &str = "failed_attempts";
    pub const DECISION: &str = "decision";
    pub const FACTORS: &str = "factors";
    pub const DEVICE_TRUSTED: &str = "device_trusted";
    pub const LOCATION_TRUSTED: &str = "location_trusted";
    pub const BEHAVIOR_TRUSTED: &str = "behavior_trusted";
    pub const TIME_TRUSTED: &str = "time_trusted";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SecurityEventType {
    LoginSuccess,
    LoginFailure,
    MfaSuccess,
    MfaFailure,
    SuspiciousActivity,
    DataAccess,
    PermissionChange,
    PasswordChange,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailure => "login_failure",
            Self::MfaSuccess => "mfa_success",
            Self::MfaFailure => "mfa_failure",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::DataAccess => "data_access",
            Self::PermissionChange => "permission_change",
            Self::PasswordChange => "password_change",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventStatus {
    Success,
    Blocked,
    Failure,
}

/// Geolocation enrichment attached to an event or returned by a resolver.
///
/// The boolean flags come from an external enrichment provider; the engine
/// only counts them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationMetadata {
    pub country: Option<String>,
    pub city: Option<String>,
    pub is_vpn: bool,
    pub is_proxy: bool,
    pub is_tor: bool,
    pub is_hosting: bool,
    pub high_threat: bool,
}

impl LocationMetadata {
    /// Number of risk flags set on this location.
    pub fn risk_flags(&self) -> u8 {
        [
            self.is_vpn,
            self.is_proxy,
            self.is_tor,
            self.is_hosting,
            self.high_threat,
        ]
        .iter()
        .filter(|f| **f)
        .count() as u8
    }
}

/// Immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub event_type: SecurityEventType,
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub location: Option<LocationMetadata>,
    pub details: HashMap<String, String>,
    /// 0-100, defaults to 0
    pub risk_score: f64,
    pub status: EventStatus,
    pub tenant_id: String,
}

impl SecurityEvent {
    pub fn new(
        tenant_id: impl Into<String>,
        event_type: SecurityEventType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            user_id: None,
            event_type,
            ip: None,
            user_agent: None,
            location: None,
            details: HashMap::new(),
            risk_score: 0.0,
            status: EventStatus::Success,
            tenant_id: tenant_id.into(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_location(mut self, location: LocationMetadata) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_risk_score(mut self, risk_score: f64) -> Self {
        self.risk_score = risk_score;
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}
