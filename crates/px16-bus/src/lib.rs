/*! Inter-chip command bus transport.

Every PX16 link carries framed commands between exactly two chips. A
frame is a fixed little-endian header followed by an opaque payload:

```text
  0        4        8        12     14     16     18     20
+--------+--------+--------+------+------+------+--------+---------+
| magic  |  sz    | seqNum | cmd  | crc  |  id  | status | payload |
+--------+--------+--------+------+------+------+--------+---------+
```

Where:
  - `magic`: sentinel marking a valid header (`MAGIC_HEADER0`).
  - `sz`: total frame length in bytes, header included.
  - `seqNum`: assigned by the Tx endpoint right before the frame goes
    out on the wire. Diagnostic only, the receiver does not order by it.
  - `cmd`: command code, see the `px16-proto` registry.
  - `crc`: CRC-16 of the payload bytes, skipped when `NO_CRC` is set.
  - `id`: RPC correlation id, unused for one-way commands.
  - `status`: host-side progress flags (`HOST_IN_QUEUE`,
    `HOST_QUEUE_SENT`).

Flow control is a single hardware ACK line per direction: the sender
never puts a second frame on the wire until the receiver has pulsed the
ACK for the previous one. The receiver pulses as soon as it is done with
the frame, either straight from the receive interrupt or, for deferred
commands, after the main loop has dispatched them.
*/

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod frame;
pub mod rpc;
pub mod rx;
pub mod stats;
pub mod tx;

pub use frame::{
    compute_crc, init_cmd, verify_crc, BusCommand, BusStatusFlags, CmdHeader, FrameBuf, FrameRef,
    HEADER_SIZE, MAGIC_HEADER0,
};
pub use rpc::{request_blocking, request_blocking_ex, rpc_set_return_irq, rpc_set_return_main, RpcError};
pub use rx::{BusHandler, BusRx, RxDisposition};
pub use stats::{check_interval, BusDiagStats};
pub use tx::{BusTx, QueueFull};

/// Default receive buffer and maximum frame size, sized for the largest
/// command a DMA transfer is allowed to carry.
pub const BUS_MAX_PACKET_DMA_SIZE: usize = 4096;

/// Default capacity of the realtime-context (response) transmit queue.
pub const BUS_TX_RESPONSE_MAX_QUEUE: usize = 8;

/// Default capacity of the main-context (request) transmit queue.
pub const BUS_TX_REQUEST_MAX_QUEUE: usize = 8;
