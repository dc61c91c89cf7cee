//! Blocking request/response on top of a Tx/Rx endpoint pair.
//!
//! Correlation is `(cmd, sz, id)`: the id is a per-sender monotonic
//! counter, the command code the secondary key. A reply that matches on
//! `cmd` but not on `id` or size is consumed and ACKed without
//! completing the call, so a stale or duplicated reply can never be
//! taken for the current one.

use core::time::Duration;

use px16_common::dev_debug;
use px16_common::link::{LinkRx, LinkTx};
use px16_common::time::Clock;

use crate::frame::{compute_crc, BusStatusFlags, CmdHeader, FrameBuf};
use crate::rx::{BusHandler, BusRx};
use crate::tx::{BusTx, QueueFull};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RpcError {
    /// No matching reply within the deadline.
    Timeout,
    /// Request queue rejected the frame.
    QueueFull,
}

/// [`request_blocking_ex`] without a progress callback.
pub fn request_blocking<L, CS, RL, RCS, H, const RESP_CAP: usize, const REQ_CAP: usize>(
    tx: &mut BusTx<L, CS, RESP_CAP, REQ_CAP>,
    rx: &mut BusRx<RL, RCS, H>,
    req: FrameBuf,
    resp_size: usize,
    timeout: Duration,
) -> Result<FrameBuf, RpcError>
where
    L: LinkTx,
    CS: Clock,
    RL: LinkRx,
    RCS: Clock,
    H: BusHandler,
{
    request_blocking_ex(tx, rx, req, resp_size, timeout, None)
}

/// Send `req` and block until the correlated reply arrives or the
/// deadline passes. The wait loop keeps the Tx drain, the watchdog and
/// the Rx ingest pumped, and runs the main handler over every deferred
/// frame so unrelated traffic keeps flowing; `progress` (when given)
/// runs once per iteration for caller-side pumps.
pub fn request_blocking_ex<L, CS, RL, RCS, H, const RESP_CAP: usize, const REQ_CAP: usize>(
    tx: &mut BusTx<L, CS, RESP_CAP, REQ_CAP>,
    rx: &mut BusRx<RL, RCS, H>,
    mut req: FrameBuf,
    resp_size: usize,
    timeout: Duration,
    mut progress: Option<&mut dyn FnMut()>,
) -> Result<FrameBuf, RpcError>
where
    L: LinkTx,
    CS: Clock,
    RL: LinkRx,
    RCS: Clock,
    H: BusHandler,
{
    // Quiesce the link before taking the correlation snapshot.
    tx.flush();

    let resp_mark = rx.counters().response_cnt;
    let defer_mark = rx.counters().defer_cnt;

    let id = tx.next_rpc_id();
    let req_cmd = req.header().cmd.get();
    req.header_mut().id.set(id);
    if !req.header().status_flags().contains(BusStatusFlags::NO_CRC) {
        let crc = compute_crc(req.as_bytes());
        req.header_mut().crc.set(crc);
    }

    tx.queue_request_from_main(req).map_err(|_| RpcError::QueueFull)?;
    tx.update();

    let start = tx.clock().current_instant();

    loop {
        tx.update();
        tx.kick_watchdog();
        if let Some(cb) = progress.as_mut() {
            cb();
        }
        rx.poll_link();

        if rx.has_deferred() {
            rx.run_main_handler();

            if let Some(hdr) = rx.deferred_header() {
                if hdr.cmd.get() == req_cmd
                    && hdr.sz.get() as usize == resp_size
                    && hdr.id.get() == id
                {
                    if let Some(resp) = rx.copy_deferred() {
                        rx.ack_deferred_cmd();
                        dev_debug!(
                            "rpc[{}]: cmd {} id {} done ({} responses, {} defers)",
                            rx.name(),
                            req_cmd,
                            id,
                            rx.counters().response_cnt.wrapping_sub(resp_mark),
                            rx.counters().defer_cnt.wrapping_sub(defer_mark)
                        );
                        return Ok(resp);
                    }
                }
            }

            // Unrelated (or already consumed) frame: complete it and
            // keep waiting.
            if rx.has_deferred() {
                rx.ack_deferred_cmd();
            }
        }

        if start.elapsed(tx.clock()) > timeout {
            tx.note_rpc_timeout();
            return Err(RpcError::Timeout);
        }
    }
}

/// Queue a reply to `req_hdr` from realtime context. Copies the
/// correlation keys so the sender's wait loop can match it.
pub fn rpc_set_return_irq<L, CS, const RESP_CAP: usize, const REQ_CAP: usize>(
    tx: &mut BusTx<L, CS, RESP_CAP, REQ_CAP>,
    req_hdr: &CmdHeader,
    mut resp: FrameBuf,
) -> Result<(), QueueFull>
where
    L: LinkTx,
    CS: Clock,
{
    let hdr = resp.header_mut();
    hdr.cmd.set(req_hdr.cmd.get());
    hdr.id.set(req_hdr.id.get());
    tx.queue_request_from_irq(resp)
}

/// Queue a reply to `req_hdr` from the main loop. When the request
/// queue is more than half full, one frame is flushed first so bursts
/// of replies cannot pile up into an overflow.
pub fn rpc_set_return_main<L, CS, const RESP_CAP: usize, const REQ_CAP: usize>(
    tx: &mut BusTx<L, CS, RESP_CAP, REQ_CAP>,
    req_hdr: &CmdHeader,
    mut resp: FrameBuf,
) -> Result<(), QueueFull>
where
    L: LinkTx,
    CS: Clock,
{
    let hdr = resp.header_mut();
    hdr.cmd.set(req_hdr.cmd.get());
    hdr.id.set(req_hdr.id.get());
    if tx.queue_level_main() > tx.request_capacity() / 2 {
        tx.flush_one();
    }
    tx.queue_request_from_main(resp)
}
