// Integrity digests computed over a masked view of the frame.
// Numan Thabit 2026

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Integrity hash selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256.
    Sha256,
    /// BLAKE3.
    Blake3,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Blake3 => 32,
        }
    }
}

/// Computes the digest of `data` with `mask_len` bytes at `mask_off` treated
/// as zero.
///
/// The hash field of a frame is covered by its own digest, so the digest is
/// defined over the frame with that field zeroed. Hashing a masked view
/// keeps the input buffer untouched.
#[must_use]
pub fn digest_masked(
    alg: HashAlgorithm,
    data: &[u8],
    mask_off: usize,
    mask_len: usize,
) -> [u8; 32] {
    debug_assert!(mask_off + mask_len <= data.len());
    const ZEROS: [u8; 64] = [0u8; 64];
    debug_assert!(mask_len <= ZEROS.len());
    match alg {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(&data[..mask_off]);
            hasher.update(&ZEROS[..mask_len]);
            hasher.update(&data[mask_off + mask_len..]);
            hasher.finalize().into()
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            hasher.update(&data[..mask_off]);
            hasher.update(&ZEROS[..mask_len]);
            hasher.update(&data[mask_off + mask_len..]);
            *hasher.finalize().as_bytes()
        }
    }
}

/// Verifies the digest stored at `hash_off` against the rest of `data`.
pub fn verify_masked(alg: HashAlgorithm, data: &[u8], hash_off: usize) -> bool {
    let len = alg.digest_len();
    let calculated = digest_masked(alg, data, hash_off, len);
    calculated[..len].ct_eq(&data[hash_off..hash_off + len]).into()
}
