// Secure datagram decoder: decrypt, strip padding, verify hash, check OTP.
// Numan Thabit 2026

use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

use crate::{
    crypto::{
        block::{self, BlockError, CipherKey},
        hash,
        otp::OtpTable,
    },
    dispatch::{Dispatcher, WorkHandle},
    metrics::Metrics,
    pipeline::{PacketSink, Poll},
    wire::{self, DecodeError, SecurityParams},
};

/// Result of a decode job, produced off the control thread.
///
/// Carries the scratch buffer back to the decoder, the OTP fields whose
/// verification had to be deferred to the control thread, and the payload or
/// the drop reason.
#[derive(Debug)]
pub struct DecodeOutcome {
    scratch: Option<Vec<u8>>,
    otp: Option<(u16, u64)>,
    payload: Result<Bytes, DecodeError>,
}

/// Errors surfaced by decoder construction and key installation.
#[derive(Debug, Error)]
pub enum DecoderError {
    /// OTP requires at least two seed slots so seeds can rotate without a
    /// coverage gap.
    #[error("otp requires at least 2 seed slots, got {0}")]
    SeedSlots(usize),
    /// Supplied key material did not fit the configured cipher.
    #[error(transparent)]
    Key(#[from] BlockError),
}

#[derive(Clone, Copy)]
enum State {
    Idle,
    Working(WorkHandle),
    Forwarding,
    DropPending,
}

/// Pipeline stage turning untrusted wire datagrams into verified payloads.
///
/// The CPU-heavy part of every packet (decryption, padding, hashing) runs on
/// a worker through the dispatcher; the OTP check and the hand-off to the
/// downstream sink happen on the control thread during [`poll`]
/// (PacketSink::poll). At most one packet is in flight at a time, and every
/// accepted or dropped packet completes exactly once.
pub struct SecureDecoder {
    params: SecurityParams,
    downstream: Box<dyn PacketSink>,
    dispatcher: Dispatcher<DecodeOutcome>,
    otp: Option<OtpTable>,
    key: Option<CipherKey>,
    scratch: Option<Vec<u8>>,
    payload_mtu: usize,
    carrier_mtu: usize,
    state: State,
    metrics: Option<Metrics>,
}

impl std::fmt::Debug for SecureDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureDecoder")
            .field("payload_mtu", &self.payload_mtu)
            .field("carrier_mtu", &self.carrier_mtu)
            .finish_non_exhaustive()
    }
}

impl SecureDecoder {
    /// Creates a decoder in front of `downstream`.
    ///
    /// `seed_slots` dimensions the OTP table and must be at least 2 when OTP
    /// is enabled. The scratch buffer for decryption is allocated once here
    /// and reused for every packet.
    pub fn new(
        downstream: Box<dyn PacketSink>,
        params: SecurityParams,
        seed_slots: usize,
        dispatcher: Dispatcher<DecodeOutcome>,
    ) -> Result<Self, DecoderError> {
        let payload_mtu = downstream.mtu();
        let otp = match params.otp {
            Some(otp_params) => {
                if seed_slots < 2 {
                    return Err(DecoderError::SeedSlots(seed_slots));
                }
                Some(OtpTable::new(otp_params.per_seed, seed_slots))
            }
            None => None,
        };
        let scratch = params
            .cipher
            .map(|_| vec![0u8; params.scratch_len(payload_mtu)]);
        Ok(Self {
            params,
            carrier_mtu: params.carrier_mtu(payload_mtu),
            downstream,
            dispatcher,
            otp,
            key: None,
            scratch,
            payload_mtu,
            state: State::Idle,
            metrics: None,
        })
    }

    /// Attaches a metrics registry to this decoder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Largest wire datagram this decoder accepts.
    #[must_use]
    pub fn carrier_mtu(&self) -> usize {
        self.carrier_mtu
    }

    /// MTU of the downstream sink.
    #[must_use]
    pub fn payload_mtu(&self) -> usize {
        self.payload_mtu
    }

    /// Security parameters this decoder was built with.
    #[must_use]
    pub fn params(&self) -> &SecurityParams {
        &self.params
    }

    /// Installs the decryption key, aborting any in-flight packet first.
    ///
    /// An aborted packet resolves as a drop on the next poll; its decode job
    /// may have been using the key that is being replaced.
    pub fn set_key(&mut self, key_bytes: &[u8]) -> Result<(), DecoderError> {
        let alg = self.params.cipher.expect("encryption is not enabled");
        let key = CipherKey::from_bytes(alg, key_bytes)?;
        self.abort_in_flight();
        self.key = Some(key);
        Ok(())
    }

    /// Removes the decryption key, aborting any in-flight packet first.
    /// Encrypted traffic is rejected until a key is installed again.
    pub fn remove_key(&mut self) {
        assert!(self.params.cipher.is_some(), "encryption is not enabled");
        self.abort_in_flight();
        self.key = None;
    }

    /// Installs an OTP seed. Never disturbs an in-flight packet.
    pub fn add_otp_seed(&mut self, seed_id: u16, key: &[u8], iv: &[u8]) {
        self.otp
            .as_mut()
            .expect("otp is not enabled")
            .add_seed(seed_id, key, iv);
    }

    /// Discards every OTP seed. Never disturbs an in-flight packet.
    pub fn remove_otp_seeds(&mut self) {
        self.otp
            .as_mut()
            .expect("otp is not enabled")
            .remove_all_seeds();
    }

    fn abort_in_flight(&mut self) {
        if let State::Working(handle) = self.state {
            self.dispatcher.cancel(handle);
            // The cancelled job still owns the old scratch buffer.
            if self.params.cipher.is_some() && self.scratch.is_none() {
                self.scratch = Some(vec![0u8; self.params.scratch_len(self.payload_mtu)]);
            }
            self.state = State::DropPending;
        }
    }

    fn drop_packet(&mut self, reason: DecodeError) -> Poll {
        warn!(reason = %reason, "dropping undecodable packet");
        if let Some(metrics) = &self.metrics {
            metrics
                .decode_drops
                .with_label_values(&[reason.label()])
                .inc();
        }
        self.state = State::Idle;
        Poll::Ready
    }
}

impl PacketSink for SecureDecoder {
    fn mtu(&self) -> usize {
        self.carrier_mtu
    }

    fn send(&mut self, packet: Bytes) {
        assert!(
            packet.len() <= self.carrier_mtu,
            "packet exceeds carrier mtu"
        );
        assert!(
            matches!(self.state, State::Idle),
            "previous packet still in flight"
        );
        if let Some(metrics) = &self.metrics {
            metrics.decode_submitted.inc();
        }
        let params = self.params;
        let payload_mtu = self.payload_mtu;
        let key = self.key.clone();
        let scratch = self.scratch.take();
        let handle = self
            .dispatcher
            .submit(move || decode_frame(params, payload_mtu, key.as_ref(), scratch, &packet));
        self.state = State::Working(handle);
    }

    fn poll(&mut self) -> Poll {
        match self.state {
            State::Idle => Poll::Ready,
            State::DropPending => {
                self.state = State::Idle;
                Poll::Ready
            }
            State::Working(handle) => {
                let Some((done, mut outcome)) = self.dispatcher.poll() else {
                    return Poll::Pending;
                };
                debug_assert_eq!(done, handle);
                if outcome.scratch.is_some() {
                    self.scratch = outcome.scratch.take();
                }
                let mut payload = outcome.payload;
                if payload.is_ok() {
                    if let (Some(table), Some((seed_id, otp))) = (self.otp.as_mut(), outcome.otp) {
                        if !table.check(seed_id, otp) {
                            payload = Err(DecodeError::OtpRejected);
                        }
                    }
                }
                match payload {
                    Err(reason) => self.drop_packet(reason),
                    Ok(bytes) => {
                        if let Some(metrics) = &self.metrics {
                            metrics.decode_accepted.inc();
                        }
                        self.downstream.send(bytes);
                        self.state = State::Forwarding;
                        self.poll()
                    }
                }
            }
            State::Forwarding => match self.downstream.poll() {
                Poll::Pending => Poll::Pending,
                Poll::Ready => {
                    self.state = State::Idle;
                    Poll::Ready
                }
            },
        }
    }
}

/// The side-effect-free decode step, run on a worker in production and
/// callable synchronously in tests.
///
/// Operates only on its arguments: the captured input, a clone of the key,
/// and the scratch buffer moved in for the duration of the job (present iff
/// encryption is enabled).
pub fn decode_frame(
    params: SecurityParams,
    payload_mtu: usize,
    key: Option<&CipherKey>,
    mut scratch: Option<Vec<u8>>,
    input: &Bytes,
) -> DecodeOutcome {
    let mut otp = None;
    let payload = decode_inner(params, payload_mtu, key, scratch.as_mut(), input, &mut otp);
    DecodeOutcome {
        scratch,
        otp,
        payload,
    }
}

fn decode_inner(
    params: SecurityParams,
    payload_mtu: usize,
    key: Option<&CipherKey>,
    scratch: Option<&mut Vec<u8>>,
    input: &Bytes,
    otp_out: &mut Option<(u16, u64)>,
) -> Result<Bytes, DecodeError> {
    match params.cipher {
        None => {
            let end = check_frame(params, payload_mtu, input, otp_out)?;
            // Zero copy: the payload is a view into the caller's datagram.
            Ok(input.slice(params.header_len()..end))
        }
        Some(alg) => {
            let block = alg.block_len();
            if input.len() % block != 0 {
                return Err(DecodeError::NotBlockAligned);
            }
            if input.len() < block {
                return Err(DecodeError::MissingIv);
            }
            let key = key.ok_or(DecodeError::NoKey)?;
            let ciphertext = &input[block..];
            if ciphertext.len() < block {
                return Err(DecodeError::NoPaddingBlock);
            }
            let buf = scratch.expect("scratch buffer present when encryption is enabled");
            block::decrypt_cbc(key, &input[..block], ciphertext, buf)
                .expect("lengths validated before decrypting");
            let plain_len = wire::strip_padding(&buf[..ciphertext.len()], block)?;
            let end = check_frame(params, payload_mtu, &buf[..plain_len], otp_out)?;
            Ok(Bytes::copy_from_slice(&buf[params.header_len()..end]))
        }
    }
}

fn check_frame(
    params: SecurityParams,
    payload_mtu: usize,
    plaintext: &[u8],
    otp_out: &mut Option<(u16, u64)>,
) -> Result<usize, DecodeError> {
    let header_len = params.header_len();
    if plaintext.len() < header_len {
        return Err(DecodeError::HeaderTooShort);
    }
    if plaintext.len() - header_len > payload_mtu {
        return Err(DecodeError::PayloadTooLong);
    }
    if params.otp.is_some() {
        // Extracted here, verified later: the anti-replay table lives on the
        // control thread.
        *otp_out = Some(wire::read_otpdata(plaintext, params.otpdata_off()));
    }
    if let Some(alg) = params.hash {
        if !hash::verify_masked(alg, plaintext, params.hash_off()) {
            return Err(DecodeError::HashMismatch);
        }
    }
    Ok(plaintext.len())
}
