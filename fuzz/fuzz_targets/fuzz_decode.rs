#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tunnelport::{
    decode_frame, CipherAlgorithm, CipherKey, HashAlgorithm, OtpParams, SecurityParams,
};

const PAYLOAD_MTU: usize = 1500;

fuzz_target!(|data: &[u8]| {
    let params = SecurityParams {
        cipher: Some(CipherAlgorithm::Aes128Cbc),
        hash: Some(HashAlgorithm::Sha256),
        otp: Some(OtpParams { per_seed: 4 }),
    };
    if data.len() > params.carrier_mtu(PAYLOAD_MTU) {
        return;
    }
    let key = CipherKey::from_bytes(CipherAlgorithm::Aes128Cbc, &[7u8; 16]).unwrap();
    let scratch = vec![0u8; params.scratch_len(PAYLOAD_MTU)];
    let _ = decode_frame(
        params,
        PAYLOAD_MTU,
        Some(&key),
        Some(scratch),
        &Bytes::copy_from_slice(data),
    );
});
