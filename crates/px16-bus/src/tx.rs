//! Outbound link endpoint: dual bounded queues, single-in-flight ACK
//! accounting and the interleaved drain.

use core::time::Duration;

use px16_common::link::LinkTx;
use px16_common::time::{Clock, Instant};
use px16_common::{dev_debug, dev_error, dev_info, dev_warn};
use ringbuffer::{ConstGenericRingBuffer, RingBuffer};

use crate::frame::{BusStatusFlags, CmdHeader, FrameBuf, FrameRef};
use crate::stats::{BusDiagStats, RateSampler};
use crate::{BUS_TX_REQUEST_MAX_QUEUE, BUS_TX_RESPONSE_MAX_QUEUE};

/// Fired when a real ACK pulse lands, with the most recently written
/// frame. The one-shot variant clears itself after firing and takes
/// precedence over the global one.
pub type AckHandler = fn(FrameRef<'_>);

/// Kicked inside every blocking spin so the platform watchdog stays fed.
pub type WatchdogKick = fn();

/// Enqueue rejected, the queue is full. Hands the frame back.
#[derive(Debug)]
pub struct QueueFull(pub FrameBuf);

#[derive(Clone, Copy, Debug, Default)]
pub struct TxCounters {
    pub total_tx_bytes: u64,
    pub send_cmd_cnt: u32,
    pub ack_timeout_cnt: u32,
    pub rpc_timeout_cnt: u32,
    pub queue_request_overflow: u32,
    pub queue_response_overflow: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DrainSide {
    Response,
    Request,
}

/// Log cadence for a wait that is taking suspiciously long.
const WAIT_STALL_LOG_INTERVAL: Duration = Duration::from_millis(100);

pub struct BusTx<
    L,
    CS,
    const RESP_CAP: usize = { BUS_TX_RESPONSE_MAX_QUEUE },
    const REQ_CAP: usize = { BUS_TX_REQUEST_MAX_QUEUE },
> {
    link: L,
    clock: CS,
    name: &'static str,
    max_packet_size: usize,

    response_queue: ConstGenericRingBuffer<FrameBuf, RESP_CAP>,
    request_queue: ConstGenericRingBuffer<FrameBuf, REQ_CAP>,
    drain_side: DrainSide,

    expected_ack: u32,
    observed_ack: u32,
    expected_ack_inc_at: Instant,
    ack_timeout: Option<Duration>,

    rpc_id: u16,
    seq_num: u32,
    last_write: Option<FrameBuf>,

    ack_handler: Option<AckHandler>,
    next_ack_handler: Option<AckHandler>,
    watchdog: Option<WatchdogKick>,

    counters: TxCounters,
    sampler: RateSampler,
}

impl<L: LinkTx, CS: Clock, const RESP_CAP: usize, const REQ_CAP: usize>
    BusTx<L, CS, RESP_CAP, REQ_CAP>
{
    pub fn new(link: L, clock: CS, name: &'static str, max_packet_size: usize) -> Self {
        dev_info!("bus[{}]: tx endpoint up, max packet {}", name, max_packet_size);
        BusTx {
            link,
            clock,
            name,
            max_packet_size,
            response_queue: ConstGenericRingBuffer::new(),
            request_queue: ConstGenericRingBuffer::new(),
            drain_side: DrainSide::Response,
            expected_ack: 0,
            observed_ack: 0,
            expected_ack_inc_at: Instant::new(0),
            ack_timeout: None,
            rpc_id: 0,
            seq_num: 0,
            last_write: None,
            ack_handler: None,
            next_ack_handler: None,
            watchdog: None,
            counters: TxCounters::default(),
            sampler: RateSampler::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn counters(&self) -> &TxCounters {
        &self.counters
    }

    /// `(observed, expected)` ACK counters, equal whenever the link is
    /// quiescent.
    pub fn ack_state(&self) -> (u32, u32) {
        (self.observed_ack, self.expected_ack)
    }

    pub fn last_seq_num(&self) -> u32 {
        self.seq_num
    }

    /// Next RPC correlation id that will be assigned.
    pub fn rpc_id(&self) -> u16 {
        self.rpc_id
    }

    pub fn last_write(&self) -> Option<FrameRef<'_>> {
        self.last_write.as_ref().map(|f| f.as_ref())
    }

    pub fn response_capacity(&self) -> usize {
        RESP_CAP
    }

    pub fn request_capacity(&self) -> usize {
        REQ_CAP
    }

    /// `None` waits for ACKs indefinitely.
    pub fn set_ack_timeout(&mut self, timeout: Option<Duration>) {
        self.ack_timeout = timeout;
    }

    /// Debugger attached on the peer: never time an ACK out.
    pub fn set_debugger(&mut self) {
        dev_info!("bus[{}]: debugger mode, ack timeout disabled", self.name);
        self.ack_timeout = None;
    }

    pub fn set_ack_callback(&mut self, handler: Option<AckHandler>) {
        self.ack_handler = handler;
    }

    /// One-shot ACK callback for the next ACK only; overrides the global
    /// handler and clears itself after firing.
    pub fn set_next_ack_callback(&mut self, handler: Option<AckHandler>) {
        self.next_ack_handler = handler;
    }

    pub fn set_watchdog(&mut self, kick: Option<WatchdogKick>) {
        self.watchdog = kick;
    }

    pub(crate) fn kick_watchdog(&self) {
        if let Some(kick) = self.watchdog {
            kick();
        }
    }

    pub(crate) fn clock(&self) -> &CS {
        &self.clock
    }

    pub(crate) fn note_rpc_timeout(&mut self) {
        self.counters.rpc_timeout_cnt += 1;
    }

    pub fn queue_level_main(&self) -> usize {
        self.request_queue.len()
    }

    pub fn queue_level_irq(&self) -> usize {
        self.response_queue.len()
    }

    /// Frame already handed to the link?
    pub fn is_queued_frame_sent(&self, hdr: &CmdHeader) -> bool {
        hdr.status_flags().contains(BusStatusFlags::HOST_QUEUE_SENT)
    }

    /// Frame still waiting in one of the queues?
    pub fn is_queued_frame_waiting(&self, hdr: &CmdHeader) -> bool {
        hdr.status_flags().contains(BusStatusFlags::HOST_IN_QUEUE)
    }

    /// The caller may reuse the frame buffer: it has either left the
    /// queues or was never enqueued.
    pub fn can_send(&self, hdr: &CmdHeader) -> bool {
        self.is_queued_frame_sent(hdr) || !self.is_queued_frame_waiting(hdr)
    }

    fn mark_queued(&self, frame: &mut FrameBuf) {
        let sz = frame.header().sz.get() as usize;
        if sz > self.max_packet_size {
            panic!("bus[{}]: frame of {} bytes exceeds max packet size", self.name, sz);
        }
        let hdr = frame.header_mut();
        hdr.remove_status(BusStatusFlags::HOST_QUEUE_SENT);
        hdr.insert_status(BusStatusFlags::HOST_IN_QUEUE);
    }

    /// Enqueue a main-context request. Fails (and counts the overflow)
    /// when the request queue is full.
    pub fn queue_request_from_main(&mut self, mut frame: FrameBuf) -> Result<(), QueueFull> {
        self.mark_queued(&mut frame);
        if self.request_queue.is_full() {
            self.counters.queue_request_overflow += 1;
            dev_warn!("bus[{}]: request queue overflow ({})", self.name, self.counters.queue_request_overflow);
            return Err(QueueFull(frame));
        }
        self.request_queue.push(frame);
        Ok(())
    }

    /// Enqueue a realtime-context reply. These drain ahead of
    /// main-context requests in the interleave.
    pub fn queue_request_from_irq(&mut self, mut frame: FrameBuf) -> Result<(), QueueFull> {
        self.mark_queued(&mut frame);
        if self.response_queue.is_full() {
            self.counters.queue_response_overflow += 1;
            dev_warn!("bus[{}]: response queue overflow ({})", self.name, self.counters.queue_response_overflow);
            return Err(QueueFull(frame));
        }
        self.response_queue.push(frame);
        Ok(())
    }

    /// Apply newly observed ACK pulses, firing the ACK callbacks once
    /// per pulse. Duplicate pulses are logged and dropped.
    fn drain_acks(&mut self) {
        let pulses = self.link.take_acks();
        for _ in 0..pulses {
            if self.observed_ack == self.expected_ack {
                dev_warn!("bus[{}]: duplicate ack pulse", self.name);
                continue;
            }
            self.observed_ack = self.observed_ack.wrapping_add(1);
            if let Some(last) = &self.last_write {
                if let Some(handler) = self.next_ack_handler.take() {
                    handler(last.as_ref());
                } else if let Some(handler) = self.ack_handler {
                    handler(last.as_ref());
                }
            }
        }
    }

    /// True once the previous frame is fully out and acknowledged. Also
    /// the place where the ACK-timeout policy runs: a stalled ACK is
    /// counted and the endpoint unsticks itself by force-advancing the
    /// observed counter. The lost frame is not retransmitted.
    pub fn is_done(&mut self) -> bool {
        self.drain_acks();
        if self.observed_ack != self.expected_ack {
            if let Some(timeout) = self.ack_timeout {
                if self.expected_ack_inc_at.elapsed(&self.clock) > timeout {
                    dev_warn!(
                        "bus[{}]: ack timeout, force-advancing {} -> {}",
                        self.name,
                        self.observed_ack,
                        self.expected_ack
                    );
                    self.observed_ack = self.expected_ack;
                    self.counters.ack_timeout_cnt += 1;
                }
            }
        }
        !self.link.is_tx_busy() && self.observed_ack == self.expected_ack
    }

    pub fn is_busy(&mut self) -> bool {
        !self.is_done()
    }

    /// Spin until the link is quiescent. Never returns while the peer
    /// stays silent and no ACK timeout is configured.
    pub fn wait(&mut self) {
        let start = self.clock.current_instant();
        let mut last_log = start;
        while !self.is_done() {
            core::hint::spin_loop();
            self.kick_watchdog();
            if start.elapsed(&self.clock) > WAIT_STALL_LOG_INTERVAL
                && last_log.elapsed(&self.clock) > WAIT_STALL_LOG_INTERVAL
            {
                last_log = self.clock.current_instant();
                dev_debug!(
                    "bus[{}]: wait stalled for {} us",
                    self.name,
                    start.elapsed(&self.clock).as_micros() as u64
                );
            }
        }
    }

    /// Low-level single-shot write: assigns the sequence number, blocks
    /// on the previous ACK, then hands the bytes to the link.
    pub fn write_async(&mut self, mut frame: FrameBuf) {
        self.seq_num = self.seq_num.wrapping_add(1);
        frame.header_mut().seq_num.set(self.seq_num);

        let sz = frame.len();
        if sz > self.max_packet_size {
            panic!("bus[{}]: frame of {} bytes exceeds max packet size", self.name, sz);
        }

        while !self.is_done() {
            core::hint::spin_loop();
            self.kick_watchdog();
        }

        // A caller racing past update() would corrupt the ACK pairing.
        if self.expected_ack != self.observed_ack {
            panic!("bus[{}]: writing to bus with pending ack", self.name);
        }

        self.expected_ack = self.expected_ack.wrapping_add(1);
        self.expected_ack_inc_at = self.clock.current_instant();

        if let Err(e) = self.link.submit_frame(frame.as_bytes()) {
            dev_error!("bus[{}]: link refused frame: {:?}", self.name, e);
        }

        self.counters.total_tx_bytes += sz as u64;
        self.counters.send_cmd_cnt += 1;
        self.last_write = Some(frame);
    }

    /// Queue-drain write: flips the frame from queued to sent before the
    /// link submission.
    pub fn write_cmd_async(&mut self, mut frame: FrameBuf) {
        let hdr = frame.header_mut();
        hdr.insert_status(BusStatusFlags::HOST_QUEUE_SENT);
        hdr.remove_status(BusStatusFlags::HOST_IN_QUEUE);
        self.write_async(frame);
    }

    /// Pick the next frame to send, alternating 1:1 between the two
    /// queues. The cursor persists across calls so a burst on one side
    /// cannot starve the other; an empty preferred side yields its turn
    /// without losing the preference.
    fn dequeue_interleaved(&mut self) -> Option<FrameBuf> {
        match self.drain_side {
            DrainSide::Response => match self.response_queue.dequeue() {
                Some(frame) => {
                    self.drain_side = DrainSide::Request;
                    Some(frame)
                }
                None => self.request_queue.dequeue(),
            },
            DrainSide::Request => match self.request_queue.dequeue() {
                Some(frame) => {
                    self.drain_side = DrainSide::Response;
                    Some(frame)
                }
                None => self.response_queue.dequeue(),
            },
        }
    }

    /// Main-loop drain: send as many queued frames as the ACK window
    /// allows, never blocking. Returns the number of frames written.
    pub fn update(&mut self) -> usize {
        let mut sent = 0;
        while !(self.response_queue.is_empty() && self.request_queue.is_empty()) {
            if self.is_busy() {
                break;
            }
            match self.dequeue_interleaved() {
                Some(frame) => {
                    self.write_cmd_async(frame);
                    sent += 1;
                }
                None => break,
            }
        }
        sent
    }

    /// Drain exactly one queued frame, blocking on the previous ACK
    /// first. Returns the number of frames written (0 or 1).
    pub fn flush_one(&mut self) -> usize {
        while self.is_busy() {
            core::hint::spin_loop();
            self.kick_watchdog();
        }
        match self.dequeue_interleaved() {
            Some(frame) => {
                self.write_cmd_async(frame);
                1
            }
            None => 0,
        }
    }

    /// Drain both queues to empty, blocking as needed.
    pub fn flush(&mut self) -> usize {
        let mut sent = 0;
        while !(self.response_queue.is_empty() && self.request_queue.is_empty()) {
            sent += self.flush_one();
        }
        sent
    }

    pub(crate) fn next_rpc_id(&mut self) -> u16 {
        let id = self.rpc_id;
        self.rpc_id = self.rpc_id.wrapping_add(1);
        id
    }

    pub fn update_stats(&mut self) -> BusDiagStats {
        let errors = self.counters.ack_timeout_cnt
            + self.counters.rpc_timeout_cnt
            + self.counters.queue_request_overflow
            + self.counters.queue_response_overflow;
        let rate = self.sampler.sample(&self.clock, self.counters.total_tx_bytes);
        BusDiagStats {
            total_bytes: self.counters.total_tx_bytes,
            errors,
            rate,
        }
    }

    pub fn log_stats(&mut self) {
        let stats = self.update_stats();
        dev_info!(
            "bus[{}]: tx {:.0} b/s, ak({}->{}) txcnt:{} err:{}",
            self.name,
            stats.rate,
            self.expected_ack,
            self.observed_ack,
            self.counters.send_cmd_cnt,
            stats.errors
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuf, HEADER_SIZE, MAGIC_HEADER0};
    use core::cell::{Cell, RefCell};
    use core::time::Duration;
    use std::rc::Rc;
    use std::vec::Vec;

    #[derive(Clone, Default)]
    struct TestClock {
        nanos: Rc<Cell<u64>>,
    }

    impl TestClock {
        fn advance(&self, d: Duration) {
            self.nanos.set(self.nanos.get() + d.as_nanos() as u64);
        }
    }

    impl Clock for TestClock {
        fn current_nanos(&self) -> u64 {
            self.nanos.get()
        }
    }

    /// Link stub that records submissions and, when `auto_ack`, pulses
    /// the ACK line right back.
    #[derive(Clone, Default)]
    struct StubLink {
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
        acks: Rc<Cell<u32>>,
        auto_ack: bool,
    }

    impl LinkTx for StubLink {
        fn submit_frame(&mut self, frame: &[u8]) -> Result<(), px16_common::link::LinkTransferError> {
            self.sent.borrow_mut().push(frame.to_vec());
            if self.auto_ack {
                self.acks.set(self.acks.get() + 1);
            }
            Ok(())
        }

        fn take_acks(&mut self) -> u32 {
            self.acks.replace(0)
        }

        fn is_tx_busy(&self) -> bool {
            false
        }
    }

    fn test_tx(auto_ack: bool) -> (BusTx<StubLink, TestClock>, StubLink, TestClock) {
        let link = StubLink {
            auto_ack,
            ..StubLink::default()
        };
        let clock = TestClock::default();
        let tx = BusTx::new(link.clone(), clock.clone(), "test_tx", 256);
        (tx, link, clock)
    }

    fn frame_with_cmd(cmd: u16) -> FrameBuf {
        FrameBuf::new_frame(cmd, HEADER_SIZE + 4)
    }

    fn sent_headers(link: &StubLink) -> Vec<(u16, u32, u16)> {
        link.sent
            .borrow()
            .iter()
            .map(|bytes| {
                let frame = crate::frame::FrameRef::new(bytes).unwrap();
                let hdr = frame.header();
                (hdr.cmd.get(), hdr.seq_num.get(), hdr.status.get())
            })
            .collect()
    }

    #[test]
    fn seq_numbers_increase_by_one() {
        let (mut tx, link, _clock) = test_tx(true);
        for i in 0..5 {
            tx.write_async(frame_with_cmd(i));
        }
        let seqs: Vec<u32> = sent_headers(&link).iter().map(|h| h.1).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert!(tx.is_done());
    }

    #[test]
    fn status_flags_flip_on_drain() {
        let (mut tx, link, _clock) = test_tx(true);
        tx.queue_request_from_main(frame_with_cmd(1)).unwrap();
        tx.update();
        let sent = sent_headers(&link);
        assert_eq!(sent.len(), 1);
        let flags = BusStatusFlags::from_bits_retain(sent[0].2);
        assert!(flags.contains(BusStatusFlags::HOST_QUEUE_SENT));
        assert!(!flags.contains(BusStatusFlags::HOST_IN_QUEUE));
    }

    #[test]
    fn request_queue_overflow_is_counted() {
        let link = StubLink::default();
        let clock = TestClock::default();
        let mut tx: BusTx<StubLink, TestClock, 8, 2> =
            BusTx::new(link, clock, "tiny_tx", 256);

        assert!(tx.queue_request_from_main(frame_with_cmd(1)).is_ok());
        assert!(tx.queue_request_from_main(frame_with_cmd(2)).is_ok());
        let third = tx.queue_request_from_main(frame_with_cmd(3));
        assert!(third.is_err());
        assert_eq!(tx.counters().queue_request_overflow, 1);
        assert_eq!(tx.queue_level_main(), 2);
    }

    #[test]
    fn drain_interleaves_response_and_request() {
        let (mut tx, link, _clock) = test_tx(true);
        for i in 0..5 {
            tx.queue_request_from_irq(frame_with_cmd(0x0100 + i)).unwrap();
            tx.queue_request_from_main(frame_with_cmd(0x0200 + i)).unwrap();
        }
        tx.update();
        let cmds: Vec<u16> = sent_headers(&link).iter().map(|h| h.0).collect();
        assert_eq!(
            cmds,
            vec![
                0x0100, 0x0200, 0x0101, 0x0201, 0x0102, 0x0202, 0x0103, 0x0203, 0x0104, 0x0204
            ]
        );
    }

    #[test]
    fn interleave_survives_single_frame_updates() {
        // One ACK at a time: every update() sends exactly one frame, the
        // alternation must still hold across calls.
        let (mut tx, link, _clock) = test_tx(false);
        for i in 0..3 {
            tx.queue_request_from_irq(frame_with_cmd(0x0100 + i)).unwrap();
            tx.queue_request_from_main(frame_with_cmd(0x0200 + i)).unwrap();
        }
        for _ in 0..6 {
            assert_eq!(tx.update(), 1);
            link.acks.set(link.acks.get() + 1);
        }
        let cmds: Vec<u16> = sent_headers(&link).iter().map(|h| h.0).collect();
        assert_eq!(cmds, vec![0x0100, 0x0200, 0x0101, 0x0201, 0x0102, 0x0202]);
    }

    #[test]
    fn ack_timeout_force_advances() {
        let (mut tx, _link, clock) = test_tx(false);
        tx.set_ack_timeout(Some(Duration::from_millis(10)));
        tx.write_async(frame_with_cmd(1));
        assert!(!tx.is_done());
        clock.advance(Duration::from_millis(15));
        assert!(tx.is_done());
        assert_eq!(tx.counters().ack_timeout_cnt, 1);
        assert_eq!(tx.ack_state(), (1, 1));
    }

    #[test]
    fn max_packet_boundary_is_inclusive() {
        let link = StubLink {
            auto_ack: true,
            ..StubLink::default()
        };
        let clock = TestClock::default();
        let mut tx: BusTx<StubLink, TestClock> =
            BusTx::new(link, clock, "bounded_tx", HEADER_SIZE + 8);
        tx.queue_request_from_main(FrameBuf::new_frame(1, HEADER_SIZE + 8)).unwrap();
        assert_eq!(tx.update(), 1);
    }

    #[test]
    #[should_panic(expected = "max packet size")]
    fn oversized_enqueue_panics() {
        let link = StubLink::default();
        let clock = TestClock::default();
        let mut tx: BusTx<StubLink, TestClock> =
            BusTx::new(link, clock, "bounded_tx", HEADER_SIZE + 8);
        let _ = tx.queue_request_from_main(FrameBuf::new_frame(1, HEADER_SIZE + 9));
    }

    #[test]
    fn next_ack_callback_fires_once() {
        use std::sync::atomic::{AtomicU32, Ordering};
        static NEXT_FIRED: AtomicU32 = AtomicU32::new(0);

        fn on_ack(_frame: crate::frame::FrameRef<'_>) {
            NEXT_FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let (mut tx, _link, _clock) = test_tx(true);
        tx.set_next_ack_callback(Some(on_ack));
        tx.write_async(frame_with_cmd(1));
        assert!(tx.is_done());
        tx.write_async(frame_with_cmd(2));
        assert!(tx.is_done());
        // The one-shot consumed itself on the first ACK.
        assert_eq!(NEXT_FIRED.load(Ordering::Relaxed), 1);
        assert!(tx.next_ack_handler.is_none());
    }

    #[test]
    fn rpc_ids_are_monotonic() {
        let (mut tx, _link, _clock) = test_tx(true);
        assert_eq!(tx.next_rpc_id(), 0);
        assert_eq!(tx.next_rpc_id(), 1);
        assert_eq!(tx.rpc_id(), 2);
    }
}
