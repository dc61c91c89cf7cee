//! In-process link hardware for simulation and testing.
//!
//! Each simulated link direction is a pair of mock endpoints sharing a
//! wire: a frame queue toward the receiver and an ACK pulse counter
//! back toward the sender. The router either couples them directly
//! (callback mode, single threaded, zero latency) or shuttles both
//! directions through bounded queues serviced by router threads
//! (threaded mode, hardware-ish latency). Transport behavior is
//! identical either way; only timing and thread interaction differ.

mod clock;
mod cores;
mod router;
mod testing;

pub use clock::{ManualClock, StdClock};
pub use cores::CoreManager;
pub use router::{MockLinkRx, MockLinkTx, MockRouter, RouterMode};
pub use testing::gen_test_frame;
