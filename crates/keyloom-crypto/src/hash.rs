//! Digests and constant-time comparison.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// SHA-256 digest of the input.
pub fn digest(data: &[u8]) -> [u8; 32] {
    let result = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Compare two buffers in constant time.
///
/// Used for pin/passphrase verifier checks so that comparison time leaks
/// nothing about the position of the first mismatch. Length is not hidden:
/// buffers of different lengths compare unequal immediately.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
