//! MFA credential engine
//!
//! TOTP and SMS second-factor lifecycle: enrollment, verification, backup
//! codes. Expected failures (wrong code, expired code, unknown device) come
//! back as `Ok(false)` with the detailed reason recorded in the audit log
//! only, so a caller can show nothing more specific than "invalid code".

use crate::cache::{CodeCache, ConsumeOutcome};
use crate::{totp, TrustConfig};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use trustgate_common::event::detail;
use trustgate_common::{
    Clock, DeviceStore, EngineResult, EventStatus, EventStore, MfaDevice, MfaDeviceType,
    SecurityEvent, SecurityEventType, StoreError,
};

const BACKUP_CODE_COUNT: usize = 10;
// 32 bits of entropy, rendered as 8 uppercase hex chars
const BACKUP_CODE_BYTES: usize = 4;

/// Result of TOTP enrollment, handed back to the caller for out-of-band QR
/// rendering and backup-code display.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TotpEnrollment {
    pub device_id: String,
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

/// SMS delivery collaborator. The engine never sends codes itself.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, phone_number: &str, code: &str) -> anyhow::Result<()>;
}

/// MFA credential engine
pub struct MfaEngine {
    devices: Arc<dyn DeviceStore>,
    events: Arc<dyn EventStore>,
    codes: Arc<dyn CodeCache>,
    sms: Arc<dyn SmsSender>,
    clock: Arc<dyn Clock>,
    config: Arc<TrustConfig>,
}

impl MfaEngine {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        events: Arc<dyn EventStore>,
        codes: Arc<dyn CodeCache>,
        sms: Arc<dyn SmsSender>,
        clock: Arc<dyn Clock>,
        config: Arc<TrustConfig>,
    ) -> Self {
        Self {
            devices,
            events,
            codes,
            sms,
            clock,
            config,
        }
    }

    /// Enroll a TOTP device: fresh 160-bit secret, ten single-use backup
    /// codes, unverified device record.
    pub async fn setup_totp(
        &self,
        user_id: &str,
        tenant_id: &str,
        device_name: &str,
    ) -> EngineResult<TotpEnrollment> {
        let secret = totp::generate_secret();
        let backup_codes = generate_backup_codes();
        let device = MfaDevice {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            device_type: MfaDeviceType::Totp,
            name: device_name.to_string(),
            secret: Some(secret.clone()),
            phone_number: None,
            backup_codes: backup_codes.iter().cloned().collect(),
            is_active: true,
            is_verified: false,
            failed_attempts: 0,
            last_used: None,
            created_at: self.clock.now(),
        };
        let device_id = device.id.clone();
        self.devices.insert(device).await?;

        self.audit(
            SecurityEvent::new(tenant_id, SecurityEventType::MfaSuccess, self.clock.now())
                .with_user(user_id)
                .with_detail(detail::ACTION, "TOTP_SETUP")
                .with_detail(detail::DEVICE_ID, &device_id)
                .with_detail(detail::DEVICE_NAME, device_name),
        )
        .await;

        let provisioning_uri = totp::provisioning_uri(&secret, user_id, &self.config.issuer);
        Ok(TotpEnrollment {
            device_id,
            secret,
            provisioning_uri,
            backup_codes,
        })
    }

    /// Verify a six-digit TOTP code against an enrolled device.
    pub async fn verify_totp(
        &self,
        device_id: &str,
        code: &str,
        user_id: &str,
        tenant_id: &str,
    ) -> EngineResult<bool> {
        let device = match self.load_owned(device_id, user_id, Some(tenant_id)).await? {
            Ok(device) => device,
            Err(rejected) => {
                self.log_mfa_failure(tenant_id, user_id, device_id, "TOTP", rejected.reason)
                    .await;
                return Ok(false);
            }
        };

        let Some(secret) = device.secret.as_deref() else {
            // SMS device submitted to the TOTP path
            self.log_mfa_failure(tenant_id, user_id, device_id, "TOTP", "INVALID_TOKEN")
                .await;
            return Ok(false);
        };

        let now = self.clock.now();
        if totp::verify(secret, code, now.timestamp())? {
            self.devices.record_success(device_id, now, true).await?;
            self.log_mfa_success(tenant_id, user_id, device_id, "TOTP").await;
            Ok(true)
        } else {
            let attempts = self.devices.record_failure(device_id).await?;
            self.audit(
                SecurityEvent::new(tenant_id, SecurityEventType::MfaFailure, now)
                    .with_user(user_id)
                    .with_status(EventStatus::Failure)
                    .with_detail(detail::METHOD, "TOTP")
                    .with_detail(detail::DEVICE_ID, device_id)
                    .with_detail(detail::REASON, "INVALID_TOKEN")
                    .with_detail(detail::FAILED_ATTEMPTS, attempts.to_string()),
            )
            .await;
            Ok(false)
        }
    }

    /// Enroll an SMS device and issue its first code. Returns the device id;
    /// the code itself goes only to the [`SmsSender`].
    pub async fn setup_sms(
        &self,
        user_id: &str,
        phone_number: &str,
        tenant_id: &str,
    ) -> EngineResult<String> {
        let device = MfaDevice {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            device_type: MfaDeviceType::Sms,
            name: format!("SMS {phone_number}"),
            secret: None,
            phone_number: Some(phone_number.to_string()),
            backup_codes: Default::default(),
            is_active: true,
            is_verified: false,
            failed_attempts: 0,
            last_used: None,
            created_at: self.clock.now(),
        };
        let device_id = device.id.clone();
        self.devices.insert(device).await?;

        self.issue_sms_code(&device_id, phone_number).await?;
        Ok(device_id)
    }

    /// Re-issue the pending code for an existing SMS device. Any prior
    /// unconsumed code is invalidated.
    pub async fn send_sms_code(&self, device_id: &str, user_id: &str) -> EngineResult<()> {
        let device = match self.load_owned(device_id, user_id, None).await? {
            Ok(device) => device,
            Err(rejected) => {
                return Err(trustgate_common::EngineError::NotFound(format!(
                    "device {device_id}: {}",
                    rejected.reason
                )))
            }
        };
        let Some(phone) = device.phone_number.as_deref() else {
            return Err(trustgate_common::EngineError::Invalid(
                "device has no phone number".to_string(),
            ));
        };
        self.issue_sms_code(device_id, phone).await
    }

    async fn issue_sms_code(&self, device_id: &str, phone_number: &str) -> EngineResult<()> {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        // put replaces any pending code; exactly one may be outstanding
        self.codes
            .put(&sms_code_key(device_id), &code, self.config.sms_code_ttl);
        self.sms.send(phone_number, &code).await?;
        Ok(())
    }

    /// Verify a pending SMS code. Constant-time compare, single-use.
    pub async fn verify_sms(
        &self,
        device_id: &str,
        code: &str,
        user_id: &str,
        tenant_id: &str,
    ) -> EngineResult<bool> {
        let device = match self.load_owned(device_id, user_id, Some(tenant_id)).await? {
            Ok(device) => device,
            Err(rejected) => {
                self.log_mfa_failure(tenant_id, user_id, device_id, "SMS", rejected.reason)
                    .await;
                return Ok(false);
            }
        };

        match self.codes.consume(&sms_code_key(&device.id), code) {
            ConsumeOutcome::Consumed => {
                self.devices
                    .record_success(device_id, self.clock.now(), true)
                    .await?;
                self.log_mfa_success(tenant_id, user_id, device_id, "SMS").await;
                Ok(true)
            }
            ConsumeOutcome::Mismatch => {
                self.log_mfa_failure(tenant_id, user_id, device_id, "SMS", "INVALID_CODE")
                    .await;
                Ok(false)
            }
            ConsumeOutcome::Missing | ConsumeOutcome::Expired => {
                self.log_mfa_failure(tenant_id, user_id, device_id, "SMS", "CODE_EXPIRED")
                    .await;
                Ok(false)
            }
        }
    }

    /// Redeem a single-use backup code. Exactly one of two concurrent
    /// redemptions of the same code succeeds.
    pub async fn redeem_backup_code(
        &self,
        device_id: &str,
        code: &str,
        user_id: &str,
    ) -> EngineResult<bool> {
        let device = match self.load_owned(device_id, user_id, None).await? {
            Ok(device) => device,
            Err(rejected) => {
                // attribute to the device's tenant when the device exists;
                // only a genuinely unknown device logs tenant-less
                self.log_mfa_failure(
                    &rejected.tenant_id,
                    user_id,
                    device_id,
                    "BACKUP_CODE",
                    rejected.reason,
                )
                .await;
                return Ok(false);
            }
        };

        let normalized = code.trim().to_ascii_uppercase();
        if self.devices.take_backup_code(device_id, &normalized).await? {
            self.devices
                .record_success(device_id, self.clock.now(), false)
                .await?;
            self.audit(
                SecurityEvent::new(
                    &device.tenant_id,
                    SecurityEventType::MfaSuccess,
                    self.clock.now(),
                )
                .with_user(user_id)
                .with_detail(detail::METHOD, "BACKUP_CODE")
                .with_detail(detail::DEVICE_ID, device_id),
            )
            .await;
            Ok(true)
        } else {
            self.log_mfa_failure(&device.tenant_id, user_id, device_id, "BACKUP_CODE", "INVALID_CODE")
                .await;
            Ok(false)
        }
    }

    /// Load a device and check ownership. Expected rejections come back as
    /// `Ok(Err(..))` so callers can fail closed with an audit trail; only
    /// storage faults become errors.
    async fn load_owned(
        &self,
        device_id: &str,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> EngineResult<Result<MfaDevice, Rejected>> {
        let device = match self.devices.get(device_id).await {
            Ok(device) => device,
            Err(StoreError::NotFound(_)) => return Ok(Err(Rejected::unknown())),
            Err(e) => return Err(e.into()),
        };
        if !device.is_active {
            return Ok(Err(Rejected::of(&device, "DEVICE_INACTIVE")));
        }
        if device.user_id != user_id {
            return Ok(Err(Rejected::of(&device, "DEVICE_MISMATCH")));
        }
        if let Some(tenant_id) = tenant_id {
            if device.tenant_id != tenant_id {
                return Ok(Err(Rejected::of(&device, "DEVICE_MISMATCH")));
            }
        }
        Ok(Ok(device))
    }

    async fn log_mfa_success(&self, tenant_id: &str, user_id: &str, device_id: &str, method: &str) {
        self.audit(
            SecurityEvent::new(tenant_id, SecurityEventType::MfaSuccess, self.clock.now())
                .with_user(user_id)
                .with_detail(detail::METHOD, method)
                .with_detail(detail::DEVICE_ID, device_id),
        )
        .await;
    }

    async fn log_mfa_failure(
        &self,
        tenant_id: &str,
        user_id: &str,
        device_id: &str,
        method: &str,
        reason: &str,
    ) {
        self.audit(
            SecurityEvent::new(tenant_id, SecurityEventType::MfaFailure, self.clock.now())
                .with_user(user_id)
                .with_status(EventStatus::Failure)
                .with_detail(detail::METHOD, method)
                .with_detail(detail::DEVICE_ID, device_id)
                .with_detail(detail::REASON, reason),
        )
        .await;
    }

    /// Append an audit event; a log outage never fails verification.
    async fn audit(&self, event: SecurityEvent) {
        if let Err(e) = self.events.append(event).await {
            tracing::warn!(error = %e, "failed to append security event");
        }
    }
}

/// Expected ownership rejection. Carries the device's tenant when the device
/// exists so the failure event lands in that tenant's log even when the
/// calling operation does not supply a tenant id.
struct Rejected {
    reason: &'static str,
    tenant_id: String,
}

impl Rejected {
    fn unknown() -> Self {
        Self {
            reason: "DEVICE_NOT_FOUND",
            tenant_id: String::new(),
        }
    }

    fn of(device: &MfaDevice, reason: &'static str) -> Self {
        Self {
            reason,
            tenant_id: device.tenant_id.clone(),
        }
    }
}

fn sms_code_key(device_id: &str) -> String {
    format!("sms:{device_id}")
}

fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let mut bytes = [0u8; BACKUP_CODE_BYTES];
            rng.fill(&mut bytes);
            hex::encode_upper(bytes)
        })
        .collect()
}
