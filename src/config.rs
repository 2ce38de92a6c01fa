// Configuration schema for the tunnelport pipeline.
// Numan Thabit 2026

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    crypto::{block::CipherAlgorithm, hash::HashAlgorithm},
    sched::FairQueueConfig,
    wire::{OtpParams, SecurityParams},
};

/// Error returned while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when reading a configuration file from disk.
    #[error("failed to read config '{path}': {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Source IO error.
        #[source]
        source: io::Error,
    },
    /// Error when parsing the configuration contents.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration did not pass validation checks.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// High-level configuration loaded at startup.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Secure decoder settings.
    pub decoder: DecoderConfig,
    /// Fair queue scheduler settings.
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Loads configuration from `TUNNELPORT_CONFIG` if set, otherwise
    /// returns defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var("TUNNELPORT_CONFIG") {
            Ok(path) => Self::from_path(path),
            Err(_missing) => {
                let cfg = Self::default();
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }

    /// Loads a configuration file from the provided path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads configuration from a TOML string slice.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        <Self as FromStr>::from_str(input)
    }

    /// Validates the configuration, returning an error when constraints are
    /// violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.packet_weight == 0 {
            return Err(ConfigError::Validation(
                "scheduler.packet_weight must be positive".into(),
            ));
        }
        if self.decoder.otp_per_seed > 0 && self.decoder.seed_slots < 2 {
            return Err(ConfigError::Validation(format!(
                "decoder.seed_slots must be at least 2 with otp enabled, got {}",
                self.decoder.seed_slots
            )));
        }
        // Algorithm names must resolve.
        self.security_params()?;
        Ok(())
    }

    /// Resolves the decoder section into [`SecurityParams`].
    pub fn security_params(&self) -> Result<SecurityParams, ConfigError> {
        let cipher = self
            .decoder
            .cipher
            .as_deref()
            .map(CipherAlgorithm::from_str)
            .transpose()?;
        let hash = self
            .decoder
            .hash
            .as_deref()
            .map(HashAlgorithm::from_str)
            .transpose()?;
        let otp = (self.decoder.otp_per_seed > 0).then_some(OtpParams {
            per_seed: self.decoder.otp_per_seed,
        });
        Ok(SecurityParams { cipher, hash, otp })
    }

    /// Resolves the scheduler section into a [`FairQueueConfig`].
    pub fn fair_queue(&self) -> FairQueueConfig {
        FairQueueConfig::default()
            .with_packet_weight(self.scheduler.packet_weight)
            .with_max_time(self.scheduler.max_time)
            .with_cancel(self.scheduler.cancel)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Secure decoder settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Cipher name (`aes128-cbc`, `aes256-cbc`); absent disables encryption.
    pub cipher: Option<String>,
    /// Hash name (`sha256`, `blake3`); absent disables integrity hashing.
    pub hash: Option<String>,
    /// OTPs generated per seed; zero disables OTP checking.
    pub otp_per_seed: u32,
    /// Seed slots held by the anti-replay table.
    pub seed_slots: usize,
    /// Worker threads performing decode jobs.
    pub workers: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            cipher: None,
            hash: None,
            otp_per_seed: 0,
            seed_slots: 2,
            workers: 1,
        }
    }
}

/// Fair queue scheduler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fixed virtual-time cost per packet.
    pub packet_weight: u64,
    /// Bound of the virtual clock.
    pub max_time: u64,
    /// Whether cancellation is negotiated with the downstream sink.
    pub cancel: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            packet_weight: 256,
            max_time: u64::MAX,
            cancel: false,
        }
    }
}

impl FromStr for CipherAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes128-cbc" | "aes128" => Ok(CipherAlgorithm::Aes128Cbc),
            "aes256-cbc" | "aes256" => Ok(CipherAlgorithm::Aes256Cbc),
            other => Err(ConfigError::Validation(format!(
                "unknown cipher '{other}'; expected aes128-cbc or aes256-cbc"
            ))),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(ConfigError::Validation(format!(
                "unknown hash '{other}'; expected sha256 or blake3"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        let params = cfg.security_params().expect("params");
        assert!(params.cipher.is_none());
        assert!(params.hash.is_none());
        assert!(params.otp.is_none());
    }

    #[test]
    fn parses_full_config() {
        let cfg = Config::from_toml_str(
            r#"
            [decoder]
            cipher = "aes256-cbc"
            hash = "blake3"
            otp_per_seed = 1000
            seed_slots = 3
            workers = 2

            [scheduler]
            packet_weight = 64
            cancel = true
            "#,
        )
        .expect("config");
        let params = cfg.security_params().expect("params");
        assert_eq!(params.cipher, Some(CipherAlgorithm::Aes256Cbc));
        assert_eq!(params.hash, Some(HashAlgorithm::Blake3));
        assert_eq!(params.otp.map(|o| o.per_seed), Some(1000));
        let fq = cfg.fair_queue();
        assert_eq!(fq.packet_weight, 64);
        assert!(fq.use_cancel);
    }

    #[test]
    fn rejects_unknown_cipher() {
        let err = Config::from_toml_str(
            r#"
            [decoder]
            cipher = "rot13"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_single_seed_slot_with_otp() {
        let err = Config::from_toml_str(
            r#"
            [decoder]
            otp_per_seed = 10
            seed_slots = 1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_zero_packet_weight() {
        let err = Config::from_toml_str(
            r#"
            [scheduler]
            packet_weight = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
