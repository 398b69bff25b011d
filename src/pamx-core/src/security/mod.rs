//! Integrity verification and secret-handling helpers.
//!
//! - [`file_integrity`]: streaming SHA-256 of a single file
//! - [`manifest`]: manifest parsing, the startup gate and the offline builder
//! - constant-time comparison and log masking for secrets

pub mod file_integrity;
pub mod manifest;

/// Placeholder logged in place of a masked secret.
pub const MASKED: &str = "********";

/// Constant-time byte comparison.
///
/// Runs in time proportional to the length of the inputs, not to the
/// position of the first difference. Inputs of different length compare
/// unequal immediately; lengths are not secret here.
#[inline(never)]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    // XOR all bytes together - any difference sets bits
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

/// Render a secret for logging.
///
/// Returns the secret itself only when `reveal` is set (troubleshooting
/// deployments), otherwise a fixed mask that does not leak the length.
pub fn mask_secret(secret: &str, reveal: bool) -> &str {
    if reveal {
        secret
    } else {
        MASKED
    }
}
