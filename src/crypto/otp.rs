// One-time-password derivation, anti-replay table, and encode-side issuer.
// Numan Thabit 2026

use std::collections::VecDeque;

use ahash::AHashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derives the `index`-th one-time password of a seed.
///
/// Both ends of a tunnel run the same derivation over the shared seed
/// material, so the checker can precompute the full set and the issuer can
/// emit values in order.
#[must_use]
pub fn derive_otp(key: &[u8], iv: &[u8], index: u32) -> u64 {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(iv);
    mac.update(&index.to_le_bytes());
    let tag = mac.finalize().into_bytes();
    let mut otp = [0u8; 8];
    otp.copy_from_slice(&tag[..8]);
    u64::from_le_bytes(otp)
}

#[derive(Debug)]
struct SeedState {
    id: u16,
    // OTP value -> already accepted once
    pending: AHashMap<u64, bool>,
}

impl SeedState {
    fn generate(id: u16, key: &[u8], iv: &[u8], per_seed: u32) -> Self {
        let mut pending = AHashMap::with_capacity(per_seed as usize);
        for index in 0..per_seed {
            pending.insert(derive_otp(key, iv, index), false);
        }
        Self { id, pending }
    }
}

/// Replay-rejecting table of precomputed one-time passwords.
///
/// Holds up to `seed_slots` seeds at once; adding one beyond capacity evicts
/// the oldest, which is what lets a sender rotate to a fresh seed while
/// packets under the old one are still in flight.
#[derive(Debug)]
pub struct OtpTable {
    per_seed: u32,
    seed_slots: usize,
    seeds: VecDeque<SeedState>,
}

impl OtpTable {
    /// Creates an empty table.
    pub fn new(per_seed: u32, seed_slots: usize) -> Self {
        assert!(per_seed > 0, "per_seed must be positive");
        assert!(seed_slots > 0, "seed_slots must be positive");
        Self {
            per_seed,
            seed_slots,
            seeds: VecDeque::with_capacity(seed_slots),
        }
    }

    /// Installs a seed, precomputing its OTP set.
    ///
    /// Re-adding a live seed id regenerates it in place (clearing its used
    /// marks); otherwise the oldest seed is evicted once the table is full.
    pub fn add_seed(&mut self, seed_id: u16, key: &[u8], iv: &[u8]) {
        let state = SeedState::generate(seed_id, key, iv, self.per_seed);
        if let Some(existing) = self.seeds.iter_mut().find(|s| s.id == seed_id) {
            *existing = state;
            return;
        }
        self.seeds.push_back(state);
        while self.seeds.len() > self.seed_slots {
            self.seeds.pop_front();
        }
    }

    /// Accepts `(seed_id, otp)` at most once; unknown seeds always reject.
    pub fn check(&mut self, seed_id: u16, otp: u64) -> bool {
        let Some(seed) = self.seeds.iter_mut().find(|s| s.id == seed_id) else {
            return false;
        };
        match seed.pending.get_mut(&otp) {
            Some(used) if !*used => {
                *used = true;
                true
            }
            _ => false,
        }
    }

    /// Discards every seed.
    pub fn remove_all_seeds(&mut self) {
        self.seeds.clear();
    }

    /// Number of seeds currently installed.
    #[must_use]
    pub fn seed_count(&self) -> usize {
        self.seeds.len()
    }
}

/// Encode-side counterpart of [`OtpTable`]: yields `(seed_id, otp)` pairs in
/// derivation order until the seed is exhausted.
#[derive(Debug)]
pub struct OtpIssuer {
    seed_id: u16,
    key: Vec<u8>,
    iv: Vec<u8>,
    per_seed: u32,
    next_index: u32,
}

impl OtpIssuer {
    /// Creates an issuer over the given seed material.
    pub fn new(seed_id: u16, key: &[u8], iv: &[u8], per_seed: u32) -> Self {
        assert!(per_seed > 0, "per_seed must be positive");
        Self {
            seed_id,
            key: key.to_vec(),
            iv: iv.to_vec(),
            per_seed,
            next_index: 0,
        }
    }

    /// Issues the next OTP, or `None` once the seed is exhausted.
    pub fn next(&mut self) -> Option<(u16, u64)> {
        if self.next_index >= self.per_seed {
            return None;
        }
        let otp = derive_otp(&self.key, &self.iv, self.next_index);
        self.next_index += 1;
        Some((self.seed_id, otp))
    }

    /// Number of OTPs still available from this seed.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.per_seed - self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"seed-key-material";
    const IV: &[u8] = b"seed-iv";

    #[test]
    fn accepts_each_otp_exactly_once() {
        let mut table = OtpTable::new(8, 2);
        table.add_seed(1, KEY, IV);

        let otp = derive_otp(KEY, IV, 3);
        assert!(table.check(1, otp));
        assert!(!table.check(1, otp), "replay must be rejected");
    }

    #[test]
    fn unknown_seed_rejects() {
        let mut table = OtpTable::new(8, 2);
        table.add_seed(1, KEY, IV);
        assert!(!table.check(2, derive_otp(KEY, IV, 0)));
    }

    #[test]
    fn unknown_value_rejects() {
        let mut table = OtpTable::new(8, 2);
        table.add_seed(1, KEY, IV);
        assert!(!table.check(1, 0xDEAD_BEEF));
    }

    #[test]
    fn rotation_evicts_oldest_seed() {
        let mut table = OtpTable::new(4, 2);
        table.add_seed(1, KEY, IV);
        table.add_seed(2, b"k2", b"i2");
        table.add_seed(3, b"k3", b"i3");

        assert_eq!(table.seed_count(), 2);
        assert!(!table.check(1, derive_otp(KEY, IV, 0)), "seed 1 evicted");
        assert!(table.check(2, derive_otp(b"k2", b"i2", 0)));
        assert!(table.check(3, derive_otp(b"k3", b"i3", 0)));
    }

    #[test]
    fn readding_a_seed_resets_used_marks() {
        let mut table = OtpTable::new(4, 2);
        table.add_seed(1, KEY, IV);
        let otp = derive_otp(KEY, IV, 0);
        assert!(table.check(1, otp));
        table.add_seed(1, KEY, IV);
        assert!(table.check(1, otp), "regenerated seed accepts again");
        assert_eq!(table.seed_count(), 1);
    }

    #[test]
    fn issuer_matches_table_derivation() {
        let mut table = OtpTable::new(5, 2);
        table.add_seed(7, KEY, IV);
        let mut issuer = OtpIssuer::new(7, KEY, IV, 5);

        for _ in 0..5 {
            let (seed_id, otp) = issuer.next().expect("otp available");
            assert!(table.check(seed_id, otp));
        }
        assert_eq!(issuer.next(), None);
        assert_eq!(issuer.remaining(), 0);
    }

    #[test]
    fn remove_all_seeds_clears_table() {
        let mut table = OtpTable::new(4, 2);
        table.add_seed(1, KEY, IV);
        table.remove_all_seeds();
        assert_eq!(table.seed_count(), 0);
        assert!(!table.check(1, derive_otp(KEY, IV, 0)));
    }
}
