// Push-style packet pipeline contract shared by every stage.
// Numan Thabit 2026

use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;

/// Progress of the outstanding send on a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// The sink is still consuming the packet.
    Pending,
    /// No packet is outstanding; the previous send, if any, has completed.
    Ready,
}

/// A backpressured packet consumer.
///
/// The contract is two-phase: [`send`](PacketSink::send) hands over a buffer
/// and must not be called again until [`poll`](PacketSink::poll) has reported
/// [`Poll::Ready`] for it. Each packet completes exactly once; the sender
/// observes completion by polling. Precondition violations (oversized
/// packets, overlapping sends) are programming errors and panic.
pub trait PacketSink {
    /// Largest packet this sink accepts.
    fn mtu(&self) -> usize;

    /// Starts consuming `packet`. Precondition: the previous send has
    /// completed and `packet.len() <= mtu()`.
    fn send(&mut self, packet: Bytes);

    /// Advances internal work and reports whether the outstanding send has
    /// finished.
    fn poll(&mut self) -> Poll;

    /// Whether [`request_cancel`](PacketSink::request_cancel) is available.
    fn supports_cancel(&self) -> bool {
        false
    }

    /// Best-effort request to stop consuming the outstanding packet as soon
    /// as possible. Completion still arrives through [`poll`]
    /// (PacketSink::poll); the request carries no timing guarantee.
    fn request_cancel(&mut self) {}
}

/// Terminal sink that discards every packet and completes immediately.
#[derive(Debug)]
pub struct NullSink {
    mtu: usize,
}

impl NullSink {
    /// Creates a sink with the given MTU.
    pub fn new(mtu: usize) -> Self {
        Self { mtu }
    }
}

impl PacketSink for NullSink {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&mut self, packet: Bytes) {
        assert!(packet.len() <= self.mtu, "packet exceeds sink mtu");
    }

    fn poll(&mut self) -> Poll {
        Poll::Ready
    }
}

/// Terminal sink that records every packet and completes immediately.
///
/// The handle returned by [`CollectSink::new`] stays with the caller while
/// the sink itself moves into the upstream stage.
#[derive(Debug)]
pub struct CollectSink {
    mtu: usize,
    store: Rc<RefCell<Vec<Bytes>>>,
}

/// Read side of a [`CollectSink`].
#[derive(Debug, Clone)]
pub struct CollectHandle {
    store: Rc<RefCell<Vec<Bytes>>>,
}

impl CollectSink {
    /// Creates a collecting sink and the handle observing it.
    pub fn new(mtu: usize) -> (Self, CollectHandle) {
        let store = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                mtu,
                store: Rc::clone(&store),
            },
            CollectHandle { store },
        )
    }
}

impl CollectHandle {
    /// Packets received so far.
    pub fn packets(&self) -> Vec<Bytes> {
        self.store.borrow().clone()
    }

    /// Number of packets received so far.
    pub fn len(&self) -> usize {
        self.store.borrow().len()
    }

    /// True when nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.store.borrow().is_empty()
    }
}

impl PacketSink for CollectSink {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&mut self, packet: Bytes) {
        assert!(packet.len() <= self.mtu, "packet exceeds sink mtu");
        self.store.borrow_mut().push(packet);
    }

    fn poll(&mut self) -> Poll {
        Poll::Ready
    }
}

#[derive(Debug, Default)]
struct ManualState {
    outstanding: Option<Bytes>,
    completed: Vec<Bytes>,
    cancel_requests: usize,
}

/// Sink whose completions are driven explicitly through a [`ManualHandle`].
///
/// Used to exercise backpressure, ordering, and cancellation behaviour of
/// upstream stages.
#[derive(Debug)]
pub struct ManualSink {
    mtu: usize,
    cancellable: bool,
    state: Rc<RefCell<ManualState>>,
}

/// Control side of a [`ManualSink`].
#[derive(Debug, Clone)]
pub struct ManualHandle {
    state: Rc<RefCell<ManualState>>,
}

impl ManualSink {
    /// Creates a manually driven sink and its control handle.
    pub fn new(mtu: usize, cancellable: bool) -> (Self, ManualHandle) {
        let state = Rc::new(RefCell::new(ManualState::default()));
        (
            Self {
                mtu,
                cancellable,
                state: Rc::clone(&state),
            },
            ManualHandle { state },
        )
    }
}

impl ManualHandle {
    /// Completes the outstanding packet. Panics if none is outstanding.
    pub fn complete(&self) {
        let mut state = self.state.borrow_mut();
        let packet = state
            .outstanding
            .take()
            .expect("no outstanding packet to complete");
        state.completed.push(packet);
    }

    /// The packet currently being consumed, if any.
    pub fn outstanding(&self) -> Option<Bytes> {
        self.state.borrow().outstanding.clone()
    }

    /// Packets completed so far, in completion order.
    pub fn completed(&self) -> Vec<Bytes> {
        self.state.borrow().completed.clone()
    }

    /// Number of cancel requests observed.
    pub fn cancel_requests(&self) -> usize {
        self.state.borrow().cancel_requests
    }
}

impl PacketSink for ManualSink {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&mut self, packet: Bytes) {
        assert!(packet.len() <= self.mtu, "packet exceeds sink mtu");
        let mut state = self.state.borrow_mut();
        assert!(
            state.outstanding.is_none(),
            "previous packet still outstanding"
        );
        state.outstanding = Some(packet);
    }

    fn poll(&mut self) -> Poll {
        if self.state.borrow().outstanding.is_some() {
            Poll::Pending
        } else {
            Poll::Ready
        }
    }

    fn supports_cancel(&self) -> bool {
        self.cancellable
    }

    fn request_cancel(&mut self) {
        assert!(self.cancellable, "sink built without cancel support");
        self.state.borrow_mut().cancel_requests += 1;
    }
}
