// CBC block cipher primitives for sealed frames.
// Numan Thabit 2026

use aes::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut,
    KeyIvInit,
};
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Block cipher selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES-128 in CBC mode.
    Aes128Cbc,
    /// AES-256 in CBC mode.
    Aes256Cbc,
}

impl CipherAlgorithm {
    /// Cipher block length in bytes.
    #[must_use]
    pub const fn block_len(self) -> usize {
        16
    }

    /// Key length in bytes.
    #[must_use]
    pub const fn key_len(self) -> usize {
        match self {
            CipherAlgorithm::Aes128Cbc => 16,
            CipherAlgorithm::Aes256Cbc => 32,
        }
    }
}

/// Supported block cipher key types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherKey {
    /// AES-128 key (16 bytes).
    Aes128([u8; 16]),
    /// AES-256 key (32 bytes).
    Aes256([u8; 32]),
}

impl CipherKey {
    /// Builds a key for `alg` from raw bytes, checking the length.
    pub fn from_bytes(alg: CipherAlgorithm, bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() != alg.key_len() {
            return Err(BlockError::KeyLength {
                expected: alg.key_len(),
                actual: bytes.len(),
            });
        }
        match alg {
            CipherAlgorithm::Aes128Cbc => {
                let mut key = [0u8; 16];
                key.copy_from_slice(bytes);
                Ok(CipherKey::Aes128(key))
            }
            CipherAlgorithm::Aes256Cbc => {
                let mut key = [0u8; 32];
                key.copy_from_slice(bytes);
                Ok(CipherKey::Aes256(key))
            }
        }
    }

    /// Returns the algorithm for this key.
    #[must_use]
    pub const fn algorithm(&self) -> CipherAlgorithm {
        match self {
            CipherKey::Aes128(_) => CipherAlgorithm::Aes128Cbc,
            CipherKey::Aes256(_) => CipherAlgorithm::Aes256Cbc,
        }
    }
}

/// Errors returned by the block cipher helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    /// Key length did not match the algorithm.
    #[error("invalid key length: expected {expected}, got {actual}")]
    KeyLength {
        /// Required key length.
        expected: usize,
        /// Length supplied by the caller.
        actual: usize,
    },
    /// IV length did not match the cipher block.
    #[error("invalid iv length: expected {expected}, got {actual}")]
    IvLength {
        /// Required IV length.
        expected: usize,
        /// Length supplied by the caller.
        actual: usize,
    },
    /// Input length was not a multiple of the cipher block.
    #[error("data length {0} not a multiple of the cipher block")]
    NotBlockAligned(usize),
    /// Output buffer shorter than the input.
    #[error("output buffer too small: need {need}, have {have}")]
    OutputTooSmall {
        /// Required output capacity.
        need: usize,
        /// Capacity supplied by the caller.
        have: usize,
    },
}

/// Decrypts `ciphertext` into `out`, returning the number of bytes written.
///
/// The frame scheme carries its own padding, so no block-mode padding is
/// applied here; `ciphertext` must be a whole number of blocks.
pub fn decrypt_cbc(
    key: &CipherKey,
    iv: &[u8],
    ciphertext: &[u8],
    out: &mut [u8],
) -> Result<usize, BlockError> {
    check_lengths(key.algorithm(), iv, ciphertext.len(), out.len())?;
    let iv = GenericArray::from_slice(iv);
    let written = match key {
        CipherKey::Aes128(k) => Aes128CbcDec::new(k.into(), iv)
            .decrypt_padded_b2b_mut::<NoPadding>(ciphertext, out)
            .map_err(|_| BlockError::NotBlockAligned(ciphertext.len()))?
            .len(),
        CipherKey::Aes256(k) => Aes256CbcDec::new(k.into(), iv)
            .decrypt_padded_b2b_mut::<NoPadding>(ciphertext, out)
            .map_err(|_| BlockError::NotBlockAligned(ciphertext.len()))?
            .len(),
    };
    Ok(written)
}

/// Encrypts `plaintext` into `out`, returning the number of bytes written.
///
/// `plaintext` must already be padded to a whole number of blocks.
pub fn encrypt_cbc(
    key: &CipherKey,
    iv: &[u8],
    plaintext: &[u8],
    out: &mut [u8],
) -> Result<usize, BlockError> {
    check_lengths(key.algorithm(), iv, plaintext.len(), out.len())?;
    let iv = GenericArray::from_slice(iv);
    let written = match key {
        CipherKey::Aes128(k) => Aes128CbcEnc::new(k.into(), iv)
            .encrypt_padded_b2b_mut::<NoPadding>(plaintext, out)
            .map_err(|_| BlockError::NotBlockAligned(plaintext.len()))?
            .len(),
        CipherKey::Aes256(k) => Aes256CbcEnc::new(k.into(), iv)
            .encrypt_padded_b2b_mut::<NoPadding>(plaintext, out)
            .map_err(|_| BlockError::NotBlockAligned(plaintext.len()))?
            .len(),
    };
    Ok(written)
}

fn check_lengths(
    alg: CipherAlgorithm,
    iv: &[u8],
    data_len: usize,
    out_len: usize,
) -> Result<(), BlockError> {
    let block = alg.block_len();
    if iv.len() != block {
        return Err(BlockError::IvLength {
            expected: block,
            actual: iv.len(),
        });
    }
    if data_len % block != 0 {
        return Err(BlockError::NotBlockAligned(data_len));
    }
    if out_len < data_len {
        return Err(BlockError::OutputTooSmall {
            need: data_len,
            have: out_len,
        });
    }
    Ok(())
}
