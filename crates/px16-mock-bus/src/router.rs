use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use px16_common::link::{LinkPollError, LinkRx, LinkTransferError, LinkTx};
use px16_common::{dev_info, dev_trace};

/// Depth of the per-direction router queues in threaded mode.
const ROUTER_QUEUE_DEPTH: usize = 64;

/// Shared state of one simulated link direction.
#[derive(Default)]
struct Wire {
    /// Frames delivered to the receiver, awaiting its poll.
    ingress: Mutex<VecDeque<Vec<u8>>>,
    /// ACK pulses awaiting the sender.
    acks: AtomicU32,
    /// Frames submitted but not yet polled out; the mock's notion of
    /// "still on the wire".
    in_flight: AtomicUsize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RouterMode {
    /// Direct coupling: a submit lands on the peer's ingress queue on
    /// the caller's stack, an ACK lands on the sender's counter.
    Callback,
    /// One thread per direction moves frames and ACK pulses through
    /// bounded queues.
    Threaded,
}

/// Creates simulated link directions and owns the router threads.
pub struct MockRouter {
    mode: RouterMode,
    threads: Vec<JoinHandle<()>>,
}

/// Sender half handed to a `BusTx`.
pub struct MockLinkTx {
    wire: Arc<Wire>,
    frames: Option<SyncSender<Vec<u8>>>,
}

/// Receiver half handed to a `BusRx`.
pub struct MockLinkRx {
    wire: Arc<Wire>,
    acks: Option<SyncSender<()>>,
}

impl MockRouter {
    pub fn new(mode: RouterMode) -> Self {
        dev_info!("mock_router: created ({:?})", mode);
        MockRouter {
            mode,
            threads: Vec::new(),
        }
    }

    /// Create one link direction. A bidirectional link is two calls
    /// with the roles swapped between the chips.
    pub fn link(&mut self) -> (MockLinkTx, MockLinkRx) {
        let wire = Arc::new(Wire::default());
        match self.mode {
            RouterMode::Callback => (
                MockLinkTx {
                    wire: Arc::clone(&wire),
                    frames: None,
                },
                MockLinkRx { wire, acks: None },
            ),
            RouterMode::Threaded => {
                let (frame_tx, frame_rx) = sync_channel::<Vec<u8>>(ROUTER_QUEUE_DEPTH);
                let (ack_tx, ack_rx) = sync_channel::<()>(ROUTER_QUEUE_DEPTH);

                let frame_wire = Arc::clone(&wire);
                self.threads.push(
                    thread::Builder::new()
                        .name("mock_router_tx_to_rx".into())
                        .spawn(move || {
                            // Runs until the sending half is dropped.
                            for frame in frame_rx {
                                dev_trace!("mock_router: route frame of {} bytes", frame.len());
                                frame_wire.ingress.lock().unwrap().push_back(frame);
                            }
                        })
                        .unwrap(),
                );

                let ack_wire = Arc::clone(&wire);
                self.threads.push(
                    thread::Builder::new()
                        .name("mock_router_rx_to_tx_ack".into())
                        .spawn(move || {
                            for _ in ack_rx {
                                ack_wire.acks.fetch_add(1, Ordering::SeqCst);
                            }
                        })
                        .unwrap(),
                );

                (
                    MockLinkTx {
                        wire: Arc::clone(&wire),
                        frames: Some(frame_tx),
                    },
                    MockLinkRx {
                        wire,
                        acks: Some(ack_tx),
                    },
                )
            }
        }
    }

    /// Tear the router down once every link endpoint has been dropped.
    pub fn join(self) {
        for handle in self.threads {
            let _ = handle.join();
        }
    }
}

impl LinkTx for MockLinkTx {
    fn submit_frame(&mut self, frame: &[u8]) -> Result<(), LinkTransferError> {
        self.wire.in_flight.fetch_add(1, Ordering::SeqCst);
        let copy = frame.to_vec();
        match &self.frames {
            None => self.wire.ingress.lock().unwrap().push_back(copy),
            Some(queue) => queue.send(copy).expect("mock router frame thread gone"),
        }
        Ok(())
    }

    fn take_acks(&mut self) -> u32 {
        self.wire.acks.swap(0, Ordering::SeqCst)
    }

    fn is_tx_busy(&self) -> bool {
        self.wire.in_flight.load(Ordering::SeqCst) > 0
    }
}

impl LinkRx for MockLinkRx {
    fn poll_frame(&mut self, buf: &mut [u8]) -> Result<usize, LinkPollError> {
        let frame = {
            let mut ingress = self.wire.ingress.lock().unwrap();
            match ingress.pop_front() {
                Some(frame) => frame,
                None => return Err(LinkPollError::WouldBlock),
            }
        };
        self.wire.in_flight.fetch_sub(1, Ordering::SeqCst);
        if frame.len() > buf.len() {
            return Err(LinkPollError::BufferOverflow);
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn signal_ack(&mut self) {
        match &self.acks {
            None => {
                self.wire.acks.fetch_add(1, Ordering::SeqCst);
            }
            Some(queue) => match queue.try_send(()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => panic!("sim ack queue overflow"),
                Err(TrySendError::Disconnected(_)) => panic!("mock router ack thread gone"),
            },
        }
    }
}
