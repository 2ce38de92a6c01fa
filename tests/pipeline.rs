// Integration tests: the full decode path over real worker threads, and the
// fair queue driving a shared sink, wired the way a tunnel process wires
// them.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tunnelport::{
    CipherAlgorithm, CollectSink, Config, Dispatcher, FairQueue, HashAlgorithm, ManualSink,
    Metrics, OtpParams, PacketSink, Poll, SecureDecoder, SecureEncoder, SecurityParams,
};

const PAYLOAD_MTU: usize = 1400;
const KEY: [u8; 32] = [0x3C; 32];
const SEED_KEY: &[u8] = b"rotating-seed-key";
const SEED_IV: &[u8] = b"rotating-seed-iv";

fn full_params() -> SecurityParams {
    SecurityParams {
        cipher: Some(CipherAlgorithm::Aes256Cbc),
        hash: Some(HashAlgorithm::Sha256),
        otp: Some(OtpParams { per_seed: 64 }),
    }
}

/// Polls the decoder until the outstanding packet completes.
fn drive(decoder: &mut SecureDecoder) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if decoder.poll() == Poll::Ready {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("decoder did not complete in time");
}

#[test]
fn fully_protected_traffic_round_trips() {
    let params = full_params();
    let mut encoder = SecureEncoder::new(params, PAYLOAD_MTU);
    encoder.set_key(&KEY).expect("encoder key");
    encoder.set_otp_seed(1, SEED_KEY, SEED_IV);

    let (sink, received) = CollectSink::new(PAYLOAD_MTU);
    let mut decoder = SecureDecoder::new(Box::new(sink), params, 2, Dispatcher::new(2))
        .expect("decoder")
        .with_metrics(Metrics::new().expect("metrics"));
    decoder.set_key(&KEY).expect("decoder key");
    decoder.add_otp_seed(1, SEED_KEY, SEED_IV);

    let payloads: Vec<Vec<u8>> = vec![
        b"HELLO".to_vec(),
        vec![],
        vec![0xEE; PAYLOAD_MTU],
        (0..=255).collect(),
    ];
    for payload in &payloads {
        let frame = encoder.encode(payload).expect("encode");
        assert!(frame.len() <= decoder.carrier_mtu());
        decoder.send(Bytes::from(frame));
        drive(&mut decoder);
    }

    let delivered = received.packets();
    assert_eq!(delivered.len(), payloads.len());
    for (sent, got) in payloads.iter().zip(&delivered) {
        assert_eq!(got.as_ref(), sent.as_slice());
    }
}

#[test]
fn replayed_datagram_is_absorbed() {
    let params = full_params();
    let mut encoder = SecureEncoder::new(params, PAYLOAD_MTU);
    encoder.set_key(&KEY).expect("encoder key");
    encoder.set_otp_seed(7, SEED_KEY, SEED_IV);

    let (sink, received) = CollectSink::new(PAYLOAD_MTU);
    let mut decoder =
        SecureDecoder::new(Box::new(sink), params, 2, Dispatcher::new(1)).expect("decoder");
    decoder.set_key(&KEY).expect("decoder key");
    decoder.add_otp_seed(7, SEED_KEY, SEED_IV);

    let frame = Bytes::from(encoder.encode(b"original").expect("encode"));
    decoder.send(frame.clone());
    drive(&mut decoder);
    decoder.send(frame);
    drive(&mut decoder);

    assert_eq!(received.len(), 1, "the replay is dropped, not delivered");
}

#[test]
fn seed_rotation_keeps_old_seed_alive_until_evicted() {
    let params = full_params();
    let (sink, received) = CollectSink::new(PAYLOAD_MTU);
    let mut decoder =
        SecureDecoder::new(Box::new(sink), params, 2, Dispatcher::new(1)).expect("decoder");
    decoder.set_key(&KEY).expect("decoder key");
    decoder.add_otp_seed(1, SEED_KEY, SEED_IV);

    let mut old_sender = SecureEncoder::new(params, PAYLOAD_MTU);
    old_sender.set_key(&KEY).expect("key");
    old_sender.set_otp_seed(1, SEED_KEY, SEED_IV);
    let in_flight = Bytes::from(old_sender.encode(b"under seed 1").expect("encode"));

    // The sender rotates; the decoder learns the new seed while the old
    // packet is still on the wire. Two slots keep both valid.
    decoder.add_otp_seed(2, b"next-key", b"next-iv");
    decoder.send(in_flight);
    drive(&mut decoder);
    assert_eq!(received.len(), 1, "old seed still accepted after rotation");

    // A third seed evicts seed 1 entirely.
    decoder.add_otp_seed(3, b"third-key", b"third-iv");
    let late = Bytes::from(old_sender.encode(b"too late").expect("encode"));
    decoder.send(late);
    drive(&mut decoder);
    assert_eq!(received.len(), 1, "evicted seed no longer accepted");
}

#[test]
fn corrupted_wire_bytes_never_reach_downstream() {
    let params = full_params();
    let mut encoder = SecureEncoder::new(params, PAYLOAD_MTU);
    encoder.set_key(&KEY).expect("encoder key");
    encoder.set_otp_seed(1, SEED_KEY, SEED_IV);

    let (sink, received) = CollectSink::new(PAYLOAD_MTU);
    let mut decoder =
        SecureDecoder::new(Box::new(sink), params, 2, Dispatcher::new(1)).expect("decoder");
    decoder.set_key(&KEY).expect("decoder key");
    decoder.add_otp_seed(1, SEED_KEY, SEED_IV);

    let frame = encoder.encode(b"pristine").expect("encode");
    for position in [0, 16, frame.len() - 1] {
        let mut corrupted = frame.clone();
        corrupted[position] ^= 0x80;
        decoder.send(Bytes::from(corrupted));
        drive(&mut decoder);
    }
    assert!(received.is_empty());
}

#[test]
fn config_drives_the_whole_pipeline() {
    let cfg = Config::from_toml_str(
        r#"
        [decoder]
        cipher = "aes256-cbc"
        hash = "sha256"
        otp_per_seed = 16
        seed_slots = 2
        workers = 1

        [scheduler]
        packet_weight = 32
        "#,
    )
    .expect("config");
    let params = cfg.security_params().expect("params");

    let mut encoder = SecureEncoder::new(params, PAYLOAD_MTU);
    encoder.set_key(&KEY).expect("key");
    encoder.set_otp_seed(1, SEED_KEY, SEED_IV);

    let (sink, received) = CollectSink::new(PAYLOAD_MTU);
    let mut decoder = SecureDecoder::new(
        Box::new(sink),
        params,
        cfg.decoder.seed_slots,
        Dispatcher::new(cfg.decoder.workers),
    )
    .expect("decoder");
    decoder.set_key(&KEY).expect("key");
    decoder.add_otp_seed(1, SEED_KEY, SEED_IV);

    decoder.send(Bytes::from(encoder.encode(b"configured").expect("encode")));
    drive(&mut decoder);
    assert_eq!(received.packets(), vec![Bytes::from_static(b"configured")]);

    let (out_sink, _out_handle) = ManualSink::new(PAYLOAD_MTU, cfg.fair_queue().use_cancel);
    let mut queue = FairQueue::new(Box::new(out_sink), cfg.fair_queue());
    let flow = queue.attach();
    assert_eq!(queue.mtu(), PAYLOAD_MTU);
    queue.detach(flow);
    queue.prepare_free();
}

#[test]
fn fair_queue_drains_many_sessions_without_loss() {
    // Sixteen tunnel sessions share one egress sink; every submitted packet
    // must come out exactly once, with no session starved.
    let (sink, handle) = ManualSink::new(PAYLOAD_MTU, false);
    let mut queue = FairQueue::new(Box::new(sink), Default::default());
    let flows: Vec<_> = (0..16).map(|_| queue.attach()).collect();

    let mut submitted = 0usize;
    let mut completed = 0usize;
    let mut pending: Vec<usize> = vec![0; flows.len()];
    for (idx, &flow) in flows.iter().enumerate() {
        queue.send(flow, Bytes::from(vec![idx as u8; 64 + idx * 32]));
        submitted += 1;
        pending[idx] += 1;
    }

    while completed < 64 {
        handle.complete();
        let done = queue.poll().expect("completion");
        let idx = flows.iter().position(|&f| f == done).expect("known flow");
        pending[idx] -= 1;
        completed += 1;
        if submitted < 64 {
            queue.send(done, Bytes::from(vec![idx as u8; 64 + idx * 32]));
            submitted += 1;
            pending[idx] += 1;
        }
        let _ = queue.poll();
    }

    assert!(pending.iter().all(|&p| p == 0), "no packet left behind");
    assert_eq!(handle.completed().len(), 64);

    queue.prepare_free();
    for flow in flows {
        queue.detach(flow);
    }
}

#[test]
fn teardown_mid_traffic_is_safe() {
    let (sink, _handle) = ManualSink::new(PAYLOAD_MTU, false);
    let mut queue = FairQueue::new(Box::new(sink), Default::default());
    let sessions: Vec<_> = (0..4).map(|_| queue.attach()).collect();

    queue.send(sessions[0], Bytes::from_static(b"in flight"));
    queue.send(sessions[1], Bytes::from_static(b"queued"));
    queue.send(sessions[2], Bytes::from_static(b"also queued"));

    queue.prepare_free();
    // Flows go away in arbitrary order, busy or not, and the queue follows.
    for flow in [sessions[2], sessions[0], sessions[3], sessions[1]] {
        queue.detach(flow);
    }
    assert_eq!(queue.flow_count(), 0);
}
