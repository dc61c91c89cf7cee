//! Wire-level transport behavior over the mock router.

use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use px16_bus::{BusHandler, BusRx, BusTx, FrameRef, RxDisposition, BUS_MAX_PACKET_DMA_SIZE, HEADER_SIZE};
use px16_common::link::{LinkPollError, LinkRx, LinkTx};
use px16_mock_bus::{gen_test_frame, CoreManager, ManualClock, MockRouter, RouterMode, StdClock};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records arrivals; completes everything inline so each frame is ACKed
/// as it lands.
#[derive(Default)]
struct InlineRecorder {
    cmds: Vec<u16>,
    seqs: Vec<u32>,
}

impl BusHandler for InlineRecorder {
    fn on_realtime(&mut self, frame: FrameRef<'_>) -> RxDisposition {
        self.cmds.push(frame.header().cmd.get());
        self.seqs.push(frame.header().seq_num.get());
        RxDisposition::Complete
    }

    fn on_main(&mut self, _frame: FrameRef<'_>) {}
}

/// Defers everything so the deferred slot stays occupied until the
/// main loop runs.
#[derive(Default)]
struct DeferRecorder {
    main_cmds: Vec<u16>,
}

impl BusHandler for DeferRecorder {
    fn on_main(&mut self, frame: FrameRef<'_>) {
        self.main_cmds.push(frame.header().cmd.get());
    }
}

#[test]
fn frames_cross_the_callback_router_in_order() {
    init_logging();
    let mut router = MockRouter::new(RouterMode::Callback);
    let clock = StdClock::new();
    let (link_tx, link_rx) = router.link();

    let mut tx: BusTx<_, _> = BusTx::new(link_tx, clock.clone(), "vdbus_tx", BUS_MAX_PACKET_DMA_SIZE);
    let mut rx = BusRx::new(
        link_rx,
        clock,
        InlineRecorder::default(),
        "vdbus_rx",
        BUS_MAX_PACKET_DMA_SIZE,
    );

    for i in 0..10u16 {
        tx.queue_request_from_main(gen_test_frame(0x0300 + i, HEADER_SIZE + 16))
            .unwrap();
    }
    while tx.queue_level_main() > 0 {
        tx.update();
        rx.update();
    }

    let expected: Vec<u16> = (0..10).map(|i| 0x0300 + i).collect();
    assert_eq!(rx.handler().cmds, expected);
    // Sequence numbers on the wire increase by exactly one per frame.
    let seqs = &rx.handler().seqs;
    assert_eq!(*seqs, (1..=10).collect::<Vec<u32>>());
    assert!(tx.is_done());
    assert_eq!(rx.counters().success_cnt, 10);
    assert_eq!(rx.counters().ack_cnt, 10);
}

#[test]
fn frames_cross_the_threaded_router_in_order() {
    init_logging();
    let mut router = MockRouter::new(RouterMode::Threaded);
    let clock = StdClock::new();
    let (link_tx, link_rx) = router.link();

    let mut tx: BusTx<_, _> = BusTx::new(link_tx, clock.clone(), "vdbus_tx", BUS_MAX_PACKET_DMA_SIZE);
    let mut rx = BusRx::new(
        link_rx,
        clock,
        InlineRecorder::default(),
        "vdbus_rx",
        BUS_MAX_PACKET_DMA_SIZE,
    );

    let stop = Arc::new(AtomicBool::new(false));
    let rx_stop = Arc::clone(&stop);
    let rx_thread = std::thread::spawn(move || {
        while !rx_stop.load(Ordering::SeqCst) {
            rx.update();
            std::thread::sleep(Duration::from_micros(100));
        }
        rx
    });

    for i in 0..10u16 {
        tx.queue_request_from_main(gen_test_frame(0x0300 + i, HEADER_SIZE + 16))
            .unwrap();
    }
    while tx.queue_level_main() > 0 || tx.is_busy() {
        tx.update();
        std::thread::sleep(Duration::from_micros(100));
    }

    stop.store(true, Ordering::SeqCst);
    let rx = rx_thread.join().unwrap();

    let expected: Vec<u16> = (0..10).map(|i| 0x0300 + i).collect();
    assert_eq!(rx.handler().cmds, expected);
    assert_eq!(tx.ack_state(), (10, 10));
}

#[test]
fn busy_slot_discards_second_frame_on_the_wire() {
    init_logging();
    let mut router = MockRouter::new(RouterMode::Callback);
    let clock = StdClock::new();
    let (mut raw_tx, link_rx) = router.link();

    let mut rx = BusRx::new(
        link_rx,
        clock,
        DeferRecorder::default(),
        "xlnk_rx",
        BUS_MAX_PACKET_DMA_SIZE,
    );

    // Frame A defers and parks in the slot.
    raw_tx
        .submit_frame(gen_test_frame(0x0201, HEADER_SIZE + 8).as_bytes())
        .unwrap();
    rx.poll_link();
    assert!(rx.has_deferred());
    assert_eq!(raw_tx.take_acks(), 0);

    // Frame B arrives before the main loop serviced A: discarded, ACKed.
    raw_tx
        .submit_frame(gen_test_frame(0x0202, HEADER_SIZE + 8).as_bytes())
        .unwrap();
    rx.poll_link();
    assert_eq!(rx.counters().pending_not_processed_cnt, 1);
    assert_eq!(raw_tx.take_acks(), 1);
    assert_eq!(rx.deferred_header().unwrap().cmd.get(), 0x0201);

    // Main loop completes A and frees the slot.
    rx.update();
    assert_eq!(rx.handler().main_cmds, vec![0x0201]);
    assert!(!rx.has_deferred());
    assert_eq!(raw_tx.take_acks(), 1);
}

#[test]
fn ack_timeout_unsticks_a_silent_peer() {
    init_logging();
    let mut router = MockRouter::new(RouterMode::Callback);
    let clock = ManualClock::new();
    let (link_tx, mut silent_peer) = router.link();

    let mut tx: BusTx<_, _> = BusTx::new(link_tx, clock.clone(), "alnk_tx", BUS_MAX_PACKET_DMA_SIZE);
    tx.set_ack_timeout(Some(Duration::from_millis(10)));

    tx.write_async(gen_test_frame(0x0401, HEADER_SIZE + 4));

    // Peer reads the frame off the wire but never pulses the ACK line.
    let mut buf = [0u8; BUS_MAX_PACKET_DMA_SIZE];
    assert!(silent_peer.poll_frame(&mut buf).is_ok());
    assert!(!tx.is_done());

    clock.advance(Duration::from_millis(15));
    assert!(tx.is_done());
    assert_eq!(tx.counters().ack_timeout_cnt, 1);
    assert_eq!(tx.ack_state(), (1, 1));

    // The endpoint is usable again without panicking.
    tx.write_async(gen_test_frame(0x0402, HEADER_SIZE + 4));
    assert!(silent_peer.poll_frame(&mut buf).is_ok());
    match silent_peer.poll_frame(&mut buf) {
        Err(LinkPollError::WouldBlock) => {}
        other => panic!("unexpected poll result: {:?}", other),
    }
}

#[test]
fn tx_stats_accumulate_bytes_and_errors() {
    init_logging();
    let mut router = MockRouter::new(RouterMode::Callback);
    let clock = ManualClock::new();
    let (link_tx, link_rx) = router.link();

    let mut tx: BusTx<_, _> = BusTx::new(link_tx, clock.clone(), "vlnk_tx", BUS_MAX_PACKET_DMA_SIZE);
    let mut rx = BusRx::new(
        link_rx,
        clock.clone(),
        InlineRecorder::default(),
        "vlnk_rx",
        BUS_MAX_PACKET_DMA_SIZE,
    );

    for i in 0..4u16 {
        tx.queue_request_from_main(gen_test_frame(i, HEADER_SIZE + 80)).unwrap();
        tx.update();
        rx.update();
    }

    clock.advance(Duration::from_secs(1));
    let stats = tx.update_stats();
    assert_eq!(stats.total_bytes, 4 * (HEADER_SIZE + 80) as u64);
    assert_eq!(stats.errors, 0);
    assert!(stats.rate > 0.0);

    let rx_stats = rx.update_stats();
    assert_eq!(rx_stats.total_bytes, stats.total_bytes);
    assert_eq!(rx_stats.errors, 0);
}

#[test]
fn core_manager_runs_and_joins_workers() {
    init_logging();
    let ran = Arc::new(AtomicBool::new(false));
    let worker_ran = Arc::clone(&ran);

    let mut cores = CoreManager::new();
    cores.launch("tile_worker", move || {
        worker_ran.store(true, Ordering::SeqCst);
    });
    cores.join();

    assert!(ran.load(Ordering::SeqCst));
}
