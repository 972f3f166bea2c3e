//! Time-based one-time passwords (RFC 6238)
//!
//! HMAC-SHA1 over the big-endian time-step counter, dynamic truncation to
//! six digits, 30-second steps. Verification accepts the current step and
//! two adjacent steps either side to tolerate clock drift (a ±100 second
//! window).

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use subtle::ConstantTimeEq;
use trustgate_common::{EngineError, EngineResult};

/// RFC 6238 time step
pub const STEP_SECONDS: i64 = 30;
/// Accepted drift either side of the current step
pub const DRIFT_STEPS: i64 = 2;
/// Code length
pub const DIGITS: usize = 6;

// 160-bit shared secret per RFC 4226 recommendation
const SECRET_BYTES: usize = 20;

/// Generate a base32-encoded 160-bit shared secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// `otpauth://` provisioning URI for out-of-band QR rendering.
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}\
         &algorithm=SHA1&digits={DIGITS}&period={STEP_SECONDS}"
    )
}

/// HOTP value (RFC 4226) for one counter value.
pub fn hotp(secret_b32: &str, counter: u64) -> EngineResult<String> {
    let key = BASE32_NOPAD
        .decode(secret_b32.as_bytes())
        .map_err(|_| EngineError::Invalid("malformed base32 secret".to_string()))?;

    let mut mac = Hmac::<Sha1>::new_from_slice(&key)
        .map_err(|_| EngineError::Invalid("unusable HMAC key".to_string()))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation: low nibble of the last byte picks the offset.
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    Ok(format!("{:06}", binary % 1_000_000))
}

/// TOTP code for a unix timestamp.
pub fn code_at(secret_b32: &str, unix_time: i64) -> EngineResult<String> {
    hotp(secret_b32, (unix_time / STEP_SECONDS) as u64)
}

/// Verify a submitted code against the drift window around `now`.
///
/// Returns `Ok(false)` for malformed codes rather than an error; the hot
/// path stays boolean.
pub fn verify(secret_b32: &str, code: &str, now_unix: i64) -> EngineResult<bool> {
    if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(false);
    }

    let step = now_unix / STEP_SECONDS;
    for delta in -DRIFT_STEPS..=DRIFT_STEPS {
        let candidate = hotp(secret_b32, (step + delta) as u64)?;
        if bool::from(candidate.as_bytes().ct_eq(code.as_bytes())) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B secret: ASCII "12345678901234567890"
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn test_rfc6238_vectors() {
        // Six-digit truncations of the appendix B SHA-1 reference values.
        let vectors = [
            (59, "287082"),
            (1_111_111_109, "081804"),
            (1_111_111_111, "050471"),
            (1_234_567_890, "005924"),
            (2_000_000_000, "279037"),
        ];
        for (t, expected) in vectors {
            assert_eq!(code_at(RFC_SECRET, t).unwrap(), expected, "T={t}");
            assert!(verify(RFC_SECRET, expected, t).unwrap());
        }
    }

    #[test]
    fn test_drift_window() {
        let issued_at = 1_700_000_010i64; // arbitrary fixed instant
        let code = code_at(RFC_SECRET, issued_at).unwrap();
        let step_start = (issued_at / STEP_SECONDS) * STEP_SECONDS;

        for steps in -2i64..=2 {
            let at = step_start + steps * STEP_SECONDS;
            assert!(verify(RFC_SECRET, &code, at).unwrap(), "steps={steps}");
        }
        assert!(!verify(RFC_SECRET, &code, step_start - 3 * STEP_SECONDS).unwrap());
        assert!(!verify(RFC_SECRET, &code, step_start + 3 * STEP_SECONDS).unwrap());
    }

    #[test]
    fn test_malformed_codes_rejected() {
        let t = 1_700_000_010i64;
        assert!(!verify(RFC_SECRET, "12345", t).unwrap());
        assert!(!verify(RFC_SECRET, "1234567", t).unwrap());
        assert!(!verify(RFC_SECRET, "12a456", t).unwrap());
        assert!(!verify(RFC_SECRET, "", t).unwrap());
    }

    #[test]
    fn test_generated_secret_shape() {
        let secret = generate_secret();
        // 20 bytes -> 32 base32 chars, decodable back to 20 bytes
        assert_eq!(secret.len(), 32);
        let decoded = BASE32_NOPAD.decode(secret.as_bytes()).unwrap();
        assert_eq!(decoded.len(), 20);
    }

    #[test]
    fn test_bad_secret_is_an_error() {
        assert!(matches!(
            hotp("not base32!!", 0),
            Err(EngineError::Invalid(_))
        ));
    }

    #[test]
    fn test_provisioning_uri_fields() {
        let uri = provisioning_uri("ABC234", "alice@example.com", "TrustGate");
        assert!(uri.starts_with("otpauth://totp/TrustGate:alice@example.com?"));
        assert!(uri.contains("secret=ABC234"));
        assert!(uri.contains("issuer=TrustGate"));
        assert!(uri.contains("period=30"));
    }
}
