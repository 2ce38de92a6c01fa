// sched/fairq.rs - virtual-time fair queue over a shared downstream sink
// Numan Thabit 2026

use bytes::Bytes;
use tracing::debug;

use crate::{
    metrics::Metrics,
    pipeline::{PacketSink, Poll},
    sched::vtime::VirtualClock,
};

/// Identifier of a flow attached to a [`FairQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(usize);

/// Construction parameters for a [`FairQueue`].
#[derive(Debug, Clone)]
pub struct FairQueueConfig {
    /// Fixed virtual-time cost added to every packet regardless of size.
    /// Must be positive so zero-length packets cannot monopolize the
    /// schedule.
    pub packet_weight: u64,
    /// Bound of the virtual clock. Reduce it to exercise wraparound.
    pub max_time: u64,
    /// Whether [`FairQueue::request_cancel`] is available; requires a
    /// downstream sink that supports cancellation.
    pub use_cancel: bool,
}

impl FairQueueConfig {
    /// Sets the per-packet weight.
    #[must_use]
    pub fn with_packet_weight(mut self, weight: u64) -> Self {
        self.packet_weight = weight;
        self
    }

    /// Sets the virtual clock bound.
    #[must_use]
    pub fn with_max_time(mut self, max_time: u64) -> Self {
        self.max_time = max_time;
        self
    }

    /// Enables cancellation support.
    #[must_use]
    pub fn with_cancel(mut self, use_cancel: bool) -> Self {
        self.use_cancel = use_cancel;
        self
    }
}

impl Default for FairQueueConfig {
    fn default() -> Self {
        Self {
            packet_weight: 256,
            max_time: u64::MAX,
            use_cancel: false,
        }
    }
}

#[derive(Debug)]
struct FlowState {
    time: u64,
    queued: Option<Bytes>,
    sending: bool,
}

/// Multiplexes many flows onto one downstream sink, approximating max-min
/// fairness with a weighted virtual-time heap.
///
/// Each attached flow may have at most one packet outstanding. A packet's
/// virtual finish time is `max(flow time, baseline) + len + packet_weight`;
/// the queued flow with the smallest finish time is forwarded next, with
/// ties broken away from the immediately previous sender.
///
/// [`poll`](FairQueue::poll) drives the downstream sink and reports each
/// completed flow exactly once — that return is both the upstream completion
/// signal and the flow's not-busy transition. The scheduling step that picks
/// the next flow runs on the *following* poll, leaving the completed flow a
/// window to resubmit and compete on virtual time instead of losing its turn
/// outright.
pub struct FairQueue {
    downstream: Box<dyn PacketSink>,
    mtu: usize,
    clock: VirtualClock,
    packet_weight: u64,
    use_cancel: bool,
    flows: Vec<Option<FlowState>>,
    free_slots: Vec<usize>,
    heap: Vec<FlowId>,
    sending: Option<FlowId>,
    previous: Option<FlowId>,
    schedule_pending: bool,
    baseline: u64,
    freeing: bool,
    metrics: Option<Metrics>,
}

impl FairQueue {
    /// Creates a queue in front of `downstream`.
    pub fn new(downstream: Box<dyn PacketSink>, config: FairQueueConfig) -> Self {
        assert!(config.packet_weight > 0, "packet weight must be positive");
        assert!(
            !config.use_cancel || downstream.supports_cancel(),
            "downstream sink does not support cancellation"
        );
        let mtu = downstream.mtu();
        // Live finish times must stay within half a clock span of the
        // baseline for modular ordering to be unambiguous.
        assert!(
            (mtu as u64).saturating_add(config.packet_weight) <= config.max_time / 2,
            "mtu + packet_weight exceeds half the virtual clock span"
        );
        Self {
            downstream,
            mtu,
            clock: VirtualClock::new(config.max_time),
            packet_weight: config.packet_weight,
            use_cancel: config.use_cancel,
            flows: Vec::new(),
            free_slots: Vec::new(),
            heap: Vec::new(),
            sending: None,
            previous: None,
            schedule_pending: false,
            baseline: 0,
            freeing: false,
            metrics: None,
        }
    }

    /// Attaches a metrics registry to this queue.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// MTU of the downstream sink.
    #[must_use]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// True once [`prepare_free`](FairQueue::prepare_free) has been called.
    #[must_use]
    pub fn is_freeing(&self) -> bool {
        self.freeing
    }

    /// Number of currently attached flows.
    #[must_use]
    pub fn flow_count(&self) -> usize {
        self.flows.iter().filter(|f| f.is_some()).count()
    }

    /// Attaches a new flow. Must not be called once the queue is freeing.
    pub fn attach(&mut self) -> FlowId {
        assert!(!self.freeing, "cannot attach a flow while freeing");
        // New flows start at the baseline, not at zero: on a wrapping clock
        // an ancient zero could read as far in the future.
        let state = FlowState {
            time: self.baseline,
            queued: None,
            sending: false,
        };
        match self.free_slots.pop() {
            Some(slot) => {
                self.flows[slot] = Some(state);
                FlowId(slot)
            }
            None => {
                self.flows.push(Some(state));
                FlowId(self.flows.len() - 1)
            }
        }
    }

    /// Detaches a flow.
    ///
    /// Outside the freeing state the flow must not be busy. While freeing,
    /// any flow may be torn down unconditionally.
    pub fn detach(&mut self, flow: FlowId) {
        if self.freeing {
            self.heap.retain(|&f| f != flow);
            if self.sending == Some(flow) {
                self.sending = None;
            }
        } else {
            assert!(!self.is_busy(flow), "cannot detach a busy flow");
        }
        if self.previous == Some(flow) {
            self.previous = None;
        }
        self.flows[flow.0] = None;
        self.free_slots.push(flow.0);
    }

    /// True while the flow has a packet sent-but-unacknowledged or queued.
    #[must_use]
    pub fn is_busy(&self, flow: FlowId) -> bool {
        let state = self.flow(flow);
        state.sending || state.queued.is_some()
    }

    /// Submits a packet on `flow`.
    ///
    /// Preconditions: the flow's previous packet has completed, the queue is
    /// not freeing, and `packet.len() <= mtu()`.
    pub fn send(&mut self, flow: FlowId, packet: Bytes) {
        assert!(!self.freeing, "send after prepare_free");
        assert!(packet.len() <= self.mtu, "packet exceeds downstream mtu");
        assert!(!self.is_busy(flow), "flow already has a packet outstanding");

        let cost = packet.len() as u64 + self.packet_weight;
        let start = self.clock.later_of(self.baseline, self.flow(flow).time);
        let finish = self.clock.add(start, cost);
        let state = self.flow_mut(flow);
        state.time = finish;
        state.queued = Some(packet);

        if self.sending.is_none() && !self.schedule_pending {
            self.promote(flow);
        } else {
            self.heap_push(flow);
        }
        self.update_depth_gauge();
    }

    /// Drives the downstream sink. Returns the flow whose packet completed,
    /// if one did.
    ///
    /// A completion leaves the scheduling step pending; the next call runs
    /// it, promoting the queued flow with the smallest finish time.
    pub fn poll(&mut self) -> Option<FlowId> {
        assert!(!self.freeing, "poll after prepare_free");
        if self.schedule_pending {
            self.schedule_pending = false;
            if let Some(next) = self.heap_pop() {
                self.promote(next);
            }
            self.update_depth_gauge();
        }
        let current = self.sending?;
        match self.downstream.poll() {
            Poll::Pending => None,
            Poll::Ready => {
                self.flow_mut(current).sending = false;
                self.sending = None;
                self.previous = Some(current);
                self.schedule_pending = true;
                Some(current)
            }
        }
    }

    /// Requests the downstream sink to abort the sending flow's packet.
    ///
    /// Only available when the queue was built with cancellation, and only
    /// for the flow currently holding the sending slot. Completion still
    /// arrives through [`poll`](FairQueue::poll).
    pub fn request_cancel(&mut self, flow: FlowId) {
        assert!(self.use_cancel, "queue built without cancel support");
        assert!(!self.freeing, "cancel after prepare_free");
        assert_eq!(
            self.sending,
            Some(flow),
            "only the sending flow can be cancelled"
        );
        if let Some(metrics) = &self.metrics {
            metrics.fairq_cancels.inc();
        }
        self.downstream.request_cancel();
    }

    /// Enters the freeing state; may be called repeatedly.
    ///
    /// Afterwards every flow and then the queue itself may be torn down
    /// without further I/O; send, poll, and cancel must no longer be called.
    pub fn prepare_free(&mut self) {
        if !self.freeing {
            debug!("fair queue entering freeing state");
        }
        self.freeing = true;
    }

    fn promote(&mut self, flow: FlowId) {
        let state = self.flow_mut(flow);
        let packet = state
            .queued
            .take()
            .expect("promoted flow has a queued packet");
        state.sending = true;
        let finish = state.time;
        // The baseline follows the finish time of every dispatched packet.
        self.baseline = finish;
        self.sending = Some(flow);
        if let Some(metrics) = &self.metrics {
            metrics.fairq_dispatched.inc();
        }
        self.downstream.send(packet);
    }

    fn flow(&self, flow: FlowId) -> &FlowState {
        self.flows[flow.0].as_ref().expect("flow is attached")
    }

    fn flow_mut(&mut self, flow: FlowId) -> &mut FlowState {
        self.flows[flow.0].as_mut().expect("flow is attached")
    }

    fn update_depth_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.fairq_queue_depth.set(self.heap.len() as i64);
        }
    }

    // Heap of queued flows, ordered by forward distance of the finish time
    // from the baseline. Equal times sort the previous sender last.
    fn heap_before(&self, a: FlowId, b: FlowId) -> bool {
        let da = self.clock.fwd(self.baseline, self.flow(a).time);
        let db = self.clock.fwd(self.baseline, self.flow(b).time);
        if da != db {
            return da < db;
        }
        if self.previous == Some(a) {
            false
        } else if self.previous == Some(b) {
            true
        } else {
            a.0 < b.0
        }
    }

    fn heap_push(&mut self, flow: FlowId) {
        self.heap.push(flow);
        let mut idx = self.heap.len() - 1;
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap_before(self.heap[idx], self.heap[parent]) {
                self.heap.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn heap_pop(&mut self) -> Option<FlowId> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let top = self.heap.pop();
        let mut idx = 0;
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;
            if left < self.heap.len() && self.heap_before(self.heap[left], self.heap[smallest]) {
                smallest = left;
            }
            if right < self.heap.len() && self.heap_before(self.heap[right], self.heap[smallest]) {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.heap.swap(idx, smallest);
            idx = smallest;
        }
        top
    }
}

impl Drop for FairQueue {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.freeing || self.flows.iter().all(Option::is_none),
                "flows must be detached before dropping the queue"
            );
        }
    }
}
