// Tunnelport packet pipeline public library surface.
// Numan Thabit 2026

pub mod config;

pub mod crypto;

pub mod decoder;

pub mod dispatch;

pub mod encoder;

pub mod metrics;

pub mod pipeline;

pub mod sched;

pub mod wire;

pub use config::{Config, ConfigError, DecoderConfig, SchedulerConfig};

pub use crypto::{
    block::{decrypt_cbc, encrypt_cbc, BlockError, CipherAlgorithm, CipherKey},
    hash::{digest_masked, verify_masked, HashAlgorithm},
    otp::{derive_otp, OtpIssuer, OtpTable},
};

pub use decoder::{decode_frame, DecodeOutcome, DecoderError, SecureDecoder};

pub use dispatch::{Dispatcher, WorkHandle};

pub use encoder::{EncodeError, SecureEncoder};

pub use metrics::{Metrics, MetricsError};

pub use pipeline::{
    CollectHandle, CollectSink, ManualHandle, ManualSink, NullSink, PacketSink, Poll,
};

pub use sched::{FairQueue, FairQueueConfig, FlowId, VirtualClock};

pub use wire::{
    strip_padding, DecodeError, OtpParams, SecurityParams, OTPDATA_LEN, OTP_LEN, PADDING_MARKER,
    SEED_ID_LEN,
};
