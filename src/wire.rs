// Sealed-frame layout: security parameters, header offsets, padding.
// Numan Thabit 2026

use thiserror::Error;

use crate::crypto::{block::CipherAlgorithm, hash::HashAlgorithm};

/// Length of the seed identifier field in bytes.
pub const SEED_ID_LEN: usize = 2;

/// Length of the one-time password field in bytes.
pub const OTP_LEN: usize = 8;

/// Length of the OTP metadata field (seed id followed by OTP value).
pub const OTPDATA_LEN: usize = SEED_ID_LEN + OTP_LEN;

/// Byte value closing the payload of every encrypted frame.
pub const PADDING_MARKER: u8 = 1;

/// OTP dimensioning carried in [`SecurityParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpParams {
    /// Number of one-time passwords generated from a single seed.
    pub per_seed: u32,
}

/// Which optional protections a frame carries, fixed per pipeline instance.
///
/// The on-wire order is: optional IV block (one cipher block, raw) iff
/// encryption is enabled, then the ciphertext-or-plaintext body holding the
/// OTP metadata field iff OTP is enabled, the hash field iff hashing is
/// enabled, and finally the payload. Encrypted bodies end with zero padding
/// closed by [`PADDING_MARKER`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityParams {
    /// Block cipher protecting the frame body, if any.
    pub cipher: Option<CipherAlgorithm>,
    /// Integrity hash over header and payload, if any.
    pub hash: Option<HashAlgorithm>,
    /// OTP anti-replay dimensioning, if enabled.
    pub otp: Option<OtpParams>,
}

impl SecurityParams {
    /// Length of the in-body header (OTP metadata plus hash field).
    pub const fn header_len(&self) -> usize {
        let otp = if self.otp.is_some() { OTPDATA_LEN } else { 0 };
        let hash = match self.hash {
            Some(alg) => alg.digest_len(),
            None => 0,
        };
        otp + hash
    }

    /// Offset of the OTP metadata field within the header.
    pub const fn otpdata_off(&self) -> usize {
        0
    }

    /// Offset of the hash field within the header.
    pub const fn hash_off(&self) -> usize {
        if self.otp.is_some() {
            OTPDATA_LEN
        } else {
            0
        }
    }

    /// Cipher block length, when encryption is enabled.
    pub const fn block_len(&self) -> Option<usize> {
        match self.cipher {
            Some(alg) => Some(alg.block_len()),
            None => None,
        }
    }

    /// Largest wire datagram that can carry a payload of `payload_mtu` bytes.
    ///
    /// Without encryption this is header plus payload. With encryption it
    /// adds one block for the IV and rounds the padded body (header, payload,
    /// at least the padding marker) up to the block size.
    pub fn carrier_mtu(&self, payload_mtu: usize) -> usize {
        match self.cipher {
            None => self.header_len() + payload_mtu,
            Some(alg) => {
                let block = alg.block_len();
                block + round_up(self.header_len() + payload_mtu + 1, block)
            }
        }
    }

    /// Size of the decrypt scratch buffer for a given payload MTU.
    pub fn scratch_len(&self, payload_mtu: usize) -> usize {
        match self.cipher {
            None => 0,
            Some(alg) => round_up(self.header_len() + payload_mtu + 1, alg.block_len()),
        }
    }
}

/// Reasons a frame is dropped during decode. All are non-fatal: the packet
/// is discarded and the decoder stays ready for the next one.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Encrypted input whose length is not a multiple of the block size.
    #[error("packet size not a multiple of the block size")]
    NotBlockAligned,
    /// Encrypted input shorter than one block.
    #[error("packet does not have an IV")]
    MissingIv,
    /// Encryption enabled but no key installed.
    #[error("no encryption key installed")]
    NoKey,
    /// Ciphertext too short to contain a padding block.
    #[error("packet does not have a padding block")]
    NoPaddingBlock,
    /// A byte other than zero or the marker inside the padding region.
    #[error("packet padding wrong (nonzero byte)")]
    PaddingStrayByte,
    /// The final block contains no padding marker at all.
    #[error("packet padding wrong (all zeroes)")]
    PaddingNoMarker,
    /// Plaintext shorter than the required header.
    #[error("packet has no header")]
    HeaderTooShort,
    /// Payload would exceed the downstream MTU.
    #[error("packet too long")]
    PayloadTooLong,
    /// Recomputed digest differs from the stored hash field.
    #[error("packet has wrong hash")]
    HashMismatch,
    /// OTP value rejected by the anti-replay table.
    #[error("packet has wrong OTP")]
    OtpRejected,
}

impl DecodeError {
    /// Stable label used as the metrics `reason` dimension.
    pub const fn label(&self) -> &'static str {
        match self {
            DecodeError::NotBlockAligned => "not_block_aligned",
            DecodeError::MissingIv => "missing_iv",
            DecodeError::NoKey => "no_key",
            DecodeError::NoPaddingBlock => "no_padding_block",
            DecodeError::PaddingStrayByte => "padding_stray_byte",
            DecodeError::PaddingNoMarker => "padding_no_marker",
            DecodeError::HeaderTooShort => "header_too_short",
            DecodeError::PayloadTooLong => "payload_too_long",
            DecodeError::HashMismatch => "hash_mismatch",
            DecodeError::OtpRejected => "otp_rejected",
        }
    }
}

/// Locates the padding marker in a decrypted body and returns the plaintext
/// length (the marker offset).
///
/// Only the final block is scanned, from its last byte backward: the first
/// non-zero byte must be [`PADDING_MARKER`], and everything after it must be
/// zero. `plaintext` must be at least one block long.
pub fn strip_padding(plaintext: &[u8], block_len: usize) -> Result<usize, DecodeError> {
    debug_assert!(plaintext.len() >= block_len);
    let tail = plaintext.len() - block_len;
    for idx in (tail..plaintext.len()).rev() {
        match plaintext[idx] {
            PADDING_MARKER => return Ok(idx),
            0 => {}
            _ => return Err(DecodeError::PaddingStrayByte),
        }
    }
    Err(DecodeError::PaddingNoMarker)
}

/// Appends the padding marker and zero fill up to the next block boundary.
pub fn pad_frame(body: &mut Vec<u8>, block_len: usize) {
    body.push(PADDING_MARKER);
    let padded = round_up(body.len(), block_len);
    body.resize(padded, 0);
}

/// Reads the `(seed_id, otp)` pair from the OTP metadata field.
pub fn read_otpdata(header: &[u8], off: usize) -> (u16, u64) {
    let seed_id = u16::from_le_bytes([header[off], header[off + 1]]);
    let mut otp = [0u8; OTP_LEN];
    otp.copy_from_slice(&header[off + SEED_ID_LEN..off + OTPDATA_LEN]);
    (seed_id, u64::from_le_bytes(otp))
}

/// Writes the `(seed_id, otp)` pair into the OTP metadata field.
pub fn write_otpdata(header: &mut [u8], off: usize, seed_id: u16, otp: u64) {
    header[off..off + SEED_ID_LEN].copy_from_slice(&seed_id.to_le_bytes());
    header[off + SEED_ID_LEN..off + OTPDATA_LEN].copy_from_slice(&otp.to_le_bytes());
}

fn round_up(len: usize, align: usize) -> usize {
    len.div_ceil(align) * align
}
