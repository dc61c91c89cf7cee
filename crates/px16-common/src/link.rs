//! Hardware abstraction for one direction of a chip-to-chip link. The
//! transport endpoints are generic over these traits; on target they are
//! backed by PIO state machines plus a DMA channel and the ACK line ISR,
//! in simulation by the mock router wires.

#[derive(Debug)]
pub enum LinkPollError {
    WouldBlock,
    BufferOverflow,
}

#[derive(Debug)]
pub enum LinkTransferError {
    WouldBlock,
}

/// Outbound half: submits whole frames and observes the returning ACK
/// pulses.
pub trait LinkTx {
    fn submit_frame(&mut self, frame: &[u8]) -> Result<(), LinkTransferError>;

    /// Number of ACK pulses seen on the ACK line since the last call.
    /// The ISR (or router) side only counts pulses; all ACK accounting
    /// stays in the Tx endpoint.
    fn take_acks(&mut self) -> u32;

    /// True while a previous submission is still going out on the wire.
    fn is_tx_busy(&self) -> bool;
}

/// Inbound half: yields received frames and drives the ACK line back to
/// the sender.
pub trait LinkRx {
    /// Poll for the next received frame, copying it into `buf`. A frame
    /// larger than `buf` is consumed and reported as `BufferOverflow`.
    fn poll_frame(&mut self, buf: &mut [u8]) -> Result<usize, LinkPollError>;

    /// Pulse the ACK line, releasing the sender for its next frame.
    fn signal_ack(&mut self);
}
