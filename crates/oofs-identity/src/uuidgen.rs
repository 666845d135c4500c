//! Fresh identity generation.
//!
//! Random bytes come from the OS generator via `getrandom`; if that fails the
//! bytes are derived from timing jitter hashed with BLAKE3.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use oofs_config::log_identity_warn;
use tracing::field::display;
use uuid::{Builder, Uuid};

static JITTER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh random (version 4) UUID.
pub fn generate() -> Uuid {
    let bytes = os_entropy().unwrap_or_else(|e| {
        log_identity_warn!("Entropy source unavailable, using timing jitter", error = display(&e));
        jitter_entropy()
    });
    Builder::from_random_bytes(bytes).into_uuid()
}

fn os_entropy() -> Result<[u8; 16], getrandom::Error> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes)?;
    Ok(bytes)
}

fn jitter_entropy() -> [u8; 16] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&JITTER_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    if let Ok(since) = SystemTime::now().duration_since(UNIX_EPOCH) {
        hasher.update(&since.as_nanos().to_le_bytes());
    }
    let mut scratch = 0u64;
    for round in 0..256u64 {
        let start = Instant::now();
        for i in 0..(round % 17 + 1) * 64 {
            scratch = scratch.wrapping_mul(6364136223846793005).wrapping_add(i);
        }
        hasher.update(&start.elapsed().as_nanos().to_le_bytes());
    }
    hasher.update(&scratch.to_le_bytes());

    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest.as_bytes()[..16]);
    out
}
