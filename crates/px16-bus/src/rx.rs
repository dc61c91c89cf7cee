//! Inbound link endpoint: single-slot receive buffer, realtime/main
//! handler dispatch and the deferred-ACK lifecycle.

use alloc::boxed::Box;
use alloc::vec;

use px16_common::link::{LinkPollError, LinkRx};
use px16_common::time::Clock;
use px16_common::{dev_info, dev_trace, dev_warn};

use crate::frame::{CmdHeader, FrameBuf, FrameRef, HEADER_SIZE, MAGIC_HEADER0};
use crate::stats::{BusDiagStats, RateSampler};

/// What the realtime handler decided about a frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RxDisposition {
    /// Frame fully handled in realtime context; ACK immediately.
    Complete,
    /// Park the frame for the main loop; ACK after main dispatch.
    Defer,
}

/// Handler pair for one Rx endpoint. `on_realtime` runs in receive
/// (interrupt) context and must stay bounded; anything heavier defers
/// to `on_main`, which runs from the chip main loop.
pub trait BusHandler {
    fn on_realtime(&mut self, frame: FrameRef<'_>) -> RxDisposition {
        let _ = frame;
        RxDisposition::Defer
    }

    fn on_main(&mut self, frame: FrameRef<'_>);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RxCounters {
    pub success_cnt: u32,
    pub invalid_header_cnt: u32,
    pub pending_not_processed_cnt: u32,
    pub defer_cnt: u32,
    pub response_cnt: u32,
    pub ack_cnt: u32,
    pub total_rx_bytes: u64,
}

pub struct BusRx<L, CS, H> {
    link: L,
    clock: CS,
    handler: H,
    name: &'static str,

    buffer: Box<[u8]>,
    pending_len: Option<usize>,
    in_irq: bool,
    ack_handled: bool,

    counters: RxCounters,
    sampler: RateSampler,
}

impl<L: LinkRx, CS: Clock, H: BusHandler> BusRx<L, CS, H> {
    pub fn new(link: L, clock: CS, handler: H, name: &'static str, buffer_size: usize) -> Self {
        assert!(buffer_size >= HEADER_SIZE, "rx buffer smaller than a header");
        dev_info!("bus[{}]: rx endpoint up, buffer {}", name, buffer_size);
        BusRx {
            link,
            clock,
            handler,
            name,
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
            pending_len: None,
            in_irq: false,
            ack_handled: false,
            counters: RxCounters::default(),
            sampler: RateSampler::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn counters(&self) -> &RxCounters {
        &self.counters
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn in_irq(&self) -> bool {
        self.in_irq
    }

    pub fn has_deferred(&self) -> bool {
        self.pending_len.is_some()
    }

    /// Header of the frame parked in the deferred slot, if any.
    pub fn deferred_header(&self) -> Option<CmdHeader> {
        let len = self.pending_len?;
        FrameRef::new(&self.buffer[..len]).map(|f| *f.header())
    }

    /// Copy of the frame parked in the deferred slot, if any.
    pub fn copy_deferred(&self) -> Option<FrameBuf> {
        let len = self.pending_len?;
        FrameBuf::from_bytes(&self.buffer[..len])
    }

    /// Park the current buffer contents for the main loop. Called by the
    /// receive path when the realtime handler defers; also the entry
    /// point for hardware glue that classifies frames itself.
    pub fn push_defer(&mut self, transfer_count: usize) {
        self.pending_len = Some(transfer_count);
        self.counters.defer_cnt += 1;
    }

    /// Release the deferred slot and pulse the ACK line, unblocking the
    /// sender. Latches `ack_handled` so the enclosing dispatch does not
    /// ACK the same frame twice.
    pub fn ack_deferred_cmd(&mut self) {
        self.counters.ack_cnt += 1;
        self.pending_len = None;
        self.ack_handled = true;
        self.link.signal_ack();
    }

    /// ACK a frame that never reached the deferred slot (invalid, or
    /// discarded while the slot was busy). The sender is unblocked but
    /// the slot state is untouched.
    fn ack_discarded(&mut self) {
        self.counters.ack_cnt += 1;
        self.link.signal_ack();
    }

    /// Receive-interrupt entry: a DMA transfer of `transfer_count` bytes
    /// has landed in the endpoint buffer.
    pub fn handle_rx_packet(&mut self, transfer_count: usize) {
        self.in_irq = true;

        if self.pending_len.is_some() {
            // Single-slot buffer still occupied; the frame is lost but
            // the peer must not stay blocked.
            self.counters.pending_not_processed_cnt += 1;
            dev_warn!(
                "bus[{}]: rx busy, frame discarded ({})",
                self.name,
                self.counters.pending_not_processed_cnt
            );
            self.ack_discarded();
            self.in_irq = false;
            return;
        }

        self.counters.total_rx_bytes += transfer_count as u64;

        if !self.validate(transfer_count) {
            self.counters.invalid_header_cnt += 1;
            dev_warn!(
                "bus[{}]: invalid header ({})",
                self.name,
                self.counters.invalid_header_cnt
            );
            self.ack_discarded();
            self.in_irq = false;
            return;
        }

        let disposition = match FrameRef::new(&self.buffer[..transfer_count]) {
            Some(frame) => self.handler.on_realtime(frame),
            None => RxDisposition::Complete,
        };
        self.counters.success_cnt += 1;
        self.counters.response_cnt += 1;

        if disposition == RxDisposition::Defer {
            self.push_defer(transfer_count);
        }

        if self.pending_len.is_none() {
            self.ack_deferred_cmd();
        }

        self.in_irq = false;
    }

    fn validate(&self, transfer_count: usize) -> bool {
        if transfer_count < HEADER_SIZE || transfer_count > self.buffer.len() {
            return false;
        }
        let Some(frame) = FrameRef::new(&self.buffer[..transfer_count]) else {
            return false;
        };
        let hdr = frame.header();
        let sz = hdr.sz.get() as usize;
        hdr.magic.get() == MAGIC_HEADER0 && sz >= HEADER_SIZE && sz <= transfer_count
    }

    /// Pull received frames out of the link, modelling the DMA-complete
    /// interrupt for polled (simulated) links. While the deferred slot
    /// is occupied the wire is drained into a throwaway header-sized
    /// buffer so the parked frame stays intact.
    pub fn poll_link(&mut self) {
        loop {
            if self.pending_len.is_some() {
                let mut scratch = [0u8; HEADER_SIZE];
                match self.link.poll_frame(&mut scratch) {
                    Ok(_) | Err(LinkPollError::BufferOverflow) => {
                        self.counters.pending_not_processed_cnt += 1;
                        dev_warn!(
                            "bus[{}]: rx busy, frame discarded ({})",
                            self.name,
                            self.counters.pending_not_processed_cnt
                        );
                        self.ack_discarded();
                    }
                    Err(LinkPollError::WouldBlock) => break,
                }
            } else {
                match self.link.poll_frame(&mut self.buffer) {
                    Ok(n) => self.handle_rx_packet(n),
                    Err(LinkPollError::BufferOverflow) => {
                        self.counters.invalid_header_cnt += 1;
                        dev_warn!("bus[{}]: oversized frame dropped", self.name);
                        self.ack_discarded();
                    }
                    Err(LinkPollError::WouldBlock) => break,
                }
            }
        }
    }

    /// Run the main handler on the deferred frame with the ack-once
    /// interlock: if the handler (or anything it pumped) already ACKed,
    /// the dispatcher must not ACK again.
    fn dispatch_main_cmd(&mut self, len: usize) {
        self.ack_handled = false;
        if let Some(frame) = FrameRef::new(&self.buffer[..len]) {
            dev_trace!("bus[{}]: main dispatch cmd {}", self.name, frame.header().cmd.get());
            self.handler.on_main(frame);
        }
        if !self.ack_handled {
            self.ack_deferred_cmd();
        }
    }

    /// Run the main handler on the deferred frame without completing it.
    /// The caller owns the ACK; used by the blocking RPC wait loop.
    pub(crate) fn run_main_handler(&mut self) {
        if let Some(len) = self.pending_len {
            if let Some(frame) = FrameRef::new(&self.buffer[..len]) {
                self.handler.on_main(frame);
            }
        }
    }

    /// Main-loop service: ingest anything the link has, then dispatch a
    /// deferred frame if one is parked. The slot is cleared before the
    /// handler runs so a re-triggered receive cannot dispatch it twice.
    pub fn update(&mut self) {
        self.poll_link();
        if let Some(len) = self.pending_len.take() {
            self.dispatch_main_cmd(len);
        }
    }

    pub fn update_stats(&mut self) -> BusDiagStats {
        let errors = self.counters.invalid_header_cnt + self.counters.pending_not_processed_cnt;
        let rate = self.sampler.sample(&self.clock, self.counters.total_rx_bytes);
        BusDiagStats {
            total_bytes: self.counters.total_rx_bytes,
            errors,
            rate,
        }
    }

    pub fn log_stats(&mut self) {
        let stats = self.update_stats();
        dev_info!(
            "bus[{}]: rx {:.0} b/s, scnt:{} enproc:{} ehdr:{}{} ackcnt:{}",
            self.name,
            stats.rate,
            self.counters.success_cnt,
            self.counters.pending_not_processed_cnt,
            self.counters.invalid_header_cnt,
            if self.in_irq { "*" } else { "" },
            self.counters.ack_cnt
        );
    }
}
