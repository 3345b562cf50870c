// Deterministic offer identity. The same (supplier code, supplier
// reference) pair must hash to the same id on every search and every
// process restart, so repeated polling of a supplier converges on one
// canonical offer instead of accumulating duplicates.

use sha2::{Digest, Sha256};

// 16 hex chars (~64 bits) is adequate for per-search offer volumes.
const ID_HASH_LEN: usize = 16;

pub fn offer_id(supplier_code: &str, reference_id: &str) -> String {
    let digest = Sha256::digest(reference_id.as_bytes());
    let mut hex = String::with_capacity(ID_HASH_LEN);
    for byte in digest.iter().take(ID_HASH_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{supplier_code}_{hex}")
}
