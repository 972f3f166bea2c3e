//! Persistence abstraction for MFA devices and security events
//!
//! Repository pattern: the engine works against these traits; production
//! deployments back them with a database, tests and single-instance
//! deployments use the in-memory implementations here.
//!
//! The device store exposes the read-modify-write operations the engine
//! needs (`record_failure`, `record_success`, `take_backup_code`) as single
//! atomic calls so concurrent verification attempts against one device
//! cannot lose an increment or redeem the same backup code twice.

use crate::event::{SecurityEvent, SecurityEventType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MfaDeviceType {
    Totp,
    Sms,
}

/// One enrolled second factor for a user.
///
/// `secret` and `phone_number` are immutable after creation; the store only
/// ever updates `backup_codes`, `is_verified`, `failed_attempts` and
/// `last_used`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MfaDevice {
    pub id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub device_type: MfaDeviceType,
    pub name: String,
    /// Base32 shared secret, TOTP devices only
    pub secret: Option<String>,
    /// SMS devices only
    pub phone_number: Option<String>,
    /// Unused single-use recovery codes
    pub backup_codes: HashSet<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub failed_attempts: u32,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// MFA device repository.
///
/// Devices are keyed by their UUID; tenant and user ownership are recorded
/// on the device and enforced by the engine, which treats a mismatch as
/// not-found (fail closed, no existence oracle).
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn insert(&self, device: MfaDevice) -> StoreResult<()>;

    async fn get(&self, device_id: &str) -> StoreResult<MfaDevice>;

    /// Atomically increment the failure counter; returns the new count.
    async fn record_failure(&self, device_id: &str) -> StoreResult<u32>;

    /// Atomically reset the failure counter and stamp `last_used`;
    /// optionally marks the device verified (first successful check).
    async fn record_success(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
        mark_verified: bool,
    ) -> StoreResult<()>;

    /// Atomically remove a backup code from the device's unused set.
    /// Returns `true` only for the caller that removed it; a concurrent
    /// duplicate redemption gets `false`.
    async fn take_backup_code(&self, device_id: &str, code: &str) -> StoreResult<bool>;

    async fn list_for_tenant(&self, tenant_id: &str) -> StoreResult<Vec<MfaDevice>>;
}

/// Append-only security event log, tenant-scoped on every call.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: SecurityEvent) -> StoreResult<()>;

    /// Events for one user since `since`, newest last.
    async fn events_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<SecurityEvent>>;

    /// All tenant events with `from <= timestamp < to`.
    async fn events_in_window(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<SecurityEvent>>;

    /// Count of events of one type for a user since `since`.
    async fn count_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
    ) -> StoreResult<usize> {
        Ok(self
            .events_for_user(tenant_id, user_id, since)
            .await?
            .iter()
            .filter(|e| e.event_type == event_type)
            .count())
    }
}

/// In-memory device store.
///
/// DashMap entry locks serialize the read-modify-write operations per
/// device, which is the atomicity contract the engine relies on.
#[derive(Default)]
pub struct InMemoryDeviceStore {
    devices: DashMap<String, MfaDevice>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn insert(&self, device: MfaDevice) -> StoreResult<()> {
        self.devices.insert(device.id.clone(), device);
        Ok(())
    }

    async fn get(&self, device_id: &str) -> StoreResult<MfaDevice> {
        self.devices
            .get(device_id)
            .map(|d| d.clone())
            .ok_or_else(|| StoreError::NotFound(format!("device {device_id}")))
    }

    async fn record_failure(&self, device_id: &str) -> StoreResult<u32> {
        let mut device = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| StoreError::NotFound(format!("device {device_id}")))?;
        device.failed_attempts += 1;
        Ok(device.failed_attempts)
    }

    async fn record_success(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
        mark_verified: bool,
    ) -> StoreResult<()> {
        let mut device = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| StoreError::NotFound(format!("device {device_id}")))?;
        device.failed_attempts = 0;
        device.last_used = Some(at);
        if mark_verified {
            device.is_verified = true;
        }
        Ok(())
    }

    async fn take_backup_code(&self, device_id: &str, code: &str) -> StoreResult<bool> {
        let mut device = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| StoreError::NotFound(format!("device {device_id}")))?;
        Ok(device.backup_codes.remove(code))
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> StoreResult<Vec<MfaDevice>> {
        Ok(self
            .devices
            .iter()
            .filter(|d| d.tenant_id == tenant_id)
            .map(|d| d.clone())
            .collect())
    }
}

/// In-memory append-only event log.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<SecurityEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: SecurityEvent) -> StoreResult<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn events_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<SecurityEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| {
                e.tenant_id == tenant_id
                    && e.user_id.as_deref() == Some(user_id)
                    && e.timestamp >= since
            })
            .cloned()
            .collect())
    }

    async fn events_in_window(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<SecurityEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.timestamp >= from && e.timestamp < to)
            .cloned()
            .collect())
    }
}
