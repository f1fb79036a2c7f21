//! Job id and object key derivation.
//!
//! Job ids are a deterministic FNV-1a hash of the filename XORed with
//! 64 bits from the OS RNG, so the same filename yields a different id on
//! every call. If the OS RNG fails the bare hash is used instead.

use chrono::Utc;
use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::job::JobId;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic 64-bit hash of a filename, without the random salt.
pub fn base_job_hash(filename: &str) -> i64 {
    fnv1a_64(filename.as_bytes()) as i64
}

/// Derive a fresh job id for an upload of `filename`.
pub fn derive_job_id(filename: &str) -> JobId {
    let base = base_job_hash(filename);
    match OsRng.try_next_u64() {
        Ok(salt) => JobId(base ^ salt as i64),
        Err(e) => {
            tracing::warn!("OS randomness unavailable, using unsalted job id: {}", e);
            JobId(base)
        }
    }
}

/// Last path component of a client-supplied filename.
fn base_name(filename: &str) -> &str {
    let trimmed = filename.trim();
    let name = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .trim();
    if name.is_empty() {
        "upload"
    } else {
        name
    }
}

/// Derive a unique object key for an upload of `filename`.
///
/// Format: `<basename>_<YYYYMMDDTHHMMSS>_<salt>`.
pub fn derive_object_key(filename: &str) -> String {
    format!(
        "{}_{}_{}",
        base_name(filename),
        Utc::now().format("%Y%m%dT%H%M%S"),
        rand::random::<u32>()
    )
}

/// Key of the compressed artifact produced from `object_key`.
pub fn compressed_key(object_key: &str) -> String {
    format!("{}_compressed", object_key)
}

/// Key of the thumbnail rendered from `object_key`.
pub fn thumbnail_key(object_key: &str) -> String {
    format!("{}_thumb.jpg", object_key)
}
