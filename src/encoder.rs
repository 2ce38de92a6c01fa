// Encode-side counterpart of the secure decoder.
// Numan Thabit 2026

use rand::RngCore;
use thiserror::Error;

use crate::{
    crypto::{
        block::{self, BlockError, CipherKey},
        hash,
        otp::OtpIssuer,
    },
    wire::{self, SecurityParams},
};

/// Errors returned while sealing a frame.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Payload longer than the configured MTU.
    #[error("payload length {len} exceeds mtu {max}")]
    PayloadTooLong {
        /// Supplied payload length.
        len: usize,
        /// Configured payload MTU.
        max: usize,
    },
    /// Encryption enabled but no key installed.
    #[error("no encryption key installed")]
    NoKey,
    /// OTP enabled but no seed installed.
    #[error("no otp seed installed")]
    NoOtpSeed,
    /// The installed OTP seed has no passwords left.
    #[error("otp seed exhausted")]
    OtpExhausted,
    /// Supplied key material did not fit the configured cipher.
    #[error(transparent)]
    Key(#[from] BlockError),
}

/// Seals payloads into wire frames the decoder accepts: OTP metadata, hash
/// field, payload, padding, and CBC encryption under a random IV.
///
/// Encoding is synchronous; unlike decoding it sits on the egress path where
/// the caller already owns its pacing.
#[derive(Debug)]
pub struct SecureEncoder {
    params: SecurityParams,
    payload_mtu: usize,
    carrier_mtu: usize,
    key: Option<CipherKey>,
    otp: Option<OtpIssuer>,
}

impl SecureEncoder {
    /// Creates an encoder for the given parameters and payload MTU.
    pub fn new(params: SecurityParams, payload_mtu: usize) -> Self {
        Self {
            params,
            payload_mtu,
            carrier_mtu: params.carrier_mtu(payload_mtu),
            key: None,
            otp: None,
        }
    }

    /// Installs the encryption key.
    pub fn set_key(&mut self, key_bytes: &[u8]) -> Result<(), EncodeError> {
        let alg = self.params.cipher.expect("encryption is not enabled");
        self.key = Some(CipherKey::from_bytes(alg, key_bytes)?);
        Ok(())
    }

    /// Installs the OTP seed frames are stamped from, replacing any previous
    /// one.
    pub fn set_otp_seed(&mut self, seed_id: u16, key: &[u8], iv: &[u8]) {
        let otp_params = self.params.otp.expect("otp is not enabled");
        self.otp = Some(OtpIssuer::new(seed_id, key, iv, otp_params.per_seed));
    }

    /// OTPs left before the seed must be rotated. `None` when OTP is
    /// disabled or no seed is installed.
    #[must_use]
    pub fn otp_remaining(&self) -> Option<u32> {
        self.otp.as_ref().map(OtpIssuer::remaining)
    }

    /// Largest frame [`encode`](SecureEncoder::encode) can produce.
    #[must_use]
    pub fn carrier_mtu(&self) -> usize {
        self.carrier_mtu
    }

    /// Largest accepted payload.
    #[must_use]
    pub fn payload_mtu(&self) -> usize {
        self.payload_mtu
    }

    /// Seals `payload` into a wire frame.
    pub fn encode(&mut self, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
        if payload.len() > self.payload_mtu {
            return Err(EncodeError::PayloadTooLong {
                len: payload.len(),
                max: self.payload_mtu,
            });
        }
        // Resolve the key before stamping an OTP so a failed encode does not
        // burn a password.
        let key = match self.params.cipher {
            Some(_) => Some(self.key.as_ref().ok_or(EncodeError::NoKey)?),
            None => None,
        };

        let header_len = self.params.header_len();
        let mut body = Vec::with_capacity(self.carrier_mtu);
        body.resize(header_len, 0);

        if self.params.otp.is_some() {
            let issuer = self.otp.as_mut().ok_or(EncodeError::NoOtpSeed)?;
            let (seed_id, otp) = issuer.next().ok_or(EncodeError::OtpExhausted)?;
            wire::write_otpdata(&mut body, self.params.otpdata_off(), seed_id, otp);
        }

        body.extend_from_slice(payload);

        if let Some(alg) = self.params.hash {
            // The hash field is zero while the digest is computed, then
            // carries the digest itself.
            let off = self.params.hash_off();
            let digest = hash::digest_masked(alg, &body, off, alg.digest_len());
            body[off..off + alg.digest_len()].copy_from_slice(&digest[..alg.digest_len()]);
        }

        match self.params.cipher {
            None => Ok(body),
            Some(alg) => {
                let key = key.expect("key resolved above");
                let block_len = alg.block_len();
                wire::pad_frame(&mut body, block_len);

                let mut frame = vec![0u8; block_len + body.len()];
                rand::thread_rng().fill_bytes(&mut frame[..block_len]);
                let (iv, sealed) = frame.split_at_mut(block_len);
                block::encrypt_cbc(key, iv, &body, sealed)
                    .expect("padded body is block aligned");
                Ok(frame)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::{block::CipherAlgorithm, hash::HashAlgorithm},
        wire::{OtpParams, OTPDATA_LEN, PADDING_MARKER},
    };

    const MTU: usize = 128;

    #[test]
    fn plain_frame_is_header_plus_payload() {
        let params = SecurityParams {
            cipher: None,
            hash: Some(HashAlgorithm::Sha256),
            otp: Some(OtpParams { per_seed: 4 }),
        };
        let mut encoder = SecureEncoder::new(params, MTU);
        encoder.set_otp_seed(3, b"k", b"i");
        let frame = encoder.encode(b"abc").expect("encode");
        assert_eq!(frame.len(), OTPDATA_LEN + 32 + 3);
        assert_eq!(&frame[params.header_len()..], b"abc");
    }

    #[test]
    fn encrypted_frame_is_block_aligned_and_within_carrier_mtu() {
        let params = SecurityParams {
            cipher: Some(CipherAlgorithm::Aes256Cbc),
            hash: None,
            otp: None,
        };
        let mut encoder = SecureEncoder::new(params, MTU);
        encoder.set_key(&[7u8; 32]).expect("key");
        for len in 0..=MTU {
            let frame = encoder.encode(&vec![0x5Au8; len]).expect("encode");
            assert_eq!(frame.len() % 16, 0, "payload len {len}");
            assert!(frame.len() <= encoder.carrier_mtu());
        }
    }

    #[test]
    fn padding_closes_with_marker() {
        let params = SecurityParams {
            cipher: Some(CipherAlgorithm::Aes128Cbc),
            hash: None,
            otp: None,
        };
        let mut encoder = SecureEncoder::new(params, MTU);
        let key_bytes = [1u8; 16];
        encoder.set_key(&key_bytes).expect("key");
        let frame = encoder.encode(b"xyz").expect("encode");

        let key = CipherKey::from_bytes(CipherAlgorithm::Aes128Cbc, &key_bytes).expect("key");
        let mut plain = vec![0u8; frame.len() - 16];
        block::decrypt_cbc(&key, &frame[..16], &frame[16..], &mut plain).expect("decrypt");
        assert_eq!(plain[3], PADDING_MARKER);
        assert!(plain[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn missing_key_and_seed_are_reported() {
        let params = SecurityParams {
            cipher: Some(CipherAlgorithm::Aes128Cbc),
            hash: None,
            otp: Some(OtpParams { per_seed: 1 }),
        };
        let mut encoder = SecureEncoder::new(params, MTU);
        assert!(matches!(encoder.encode(b"x"), Err(EncodeError::NoKey)));
        encoder.set_key(&[0u8; 16]).expect("key");
        assert!(matches!(
            encoder.encode(b"x"),
            Err(EncodeError::NoOtpSeed)
        ));
        encoder.set_otp_seed(1, b"k", b"i");
        encoder.encode(b"x").expect("first otp");
        assert!(matches!(
            encoder.encode(b"x"),
            Err(EncodeError::OtpExhausted)
        ));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let params = SecurityParams::default();
        let mut encoder = SecureEncoder::new(params, MTU);
        let err = encoder.encode(&vec![0u8; MTU + 1]).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::PayloadTooLong { len, max } if len == MTU + 1 && max == MTU
        ));
    }
}
