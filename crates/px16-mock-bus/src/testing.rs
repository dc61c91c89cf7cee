use px16_bus::frame::FrameBuf;

/// Frame of `size` total bytes with a recognizable payload pattern,
/// for wire and throughput tests.
pub fn gen_test_frame(cmd: u16, size: usize) -> FrameBuf {
    let mut frame = FrameBuf::new_frame(cmd, size);
    for (i, byte) in frame.payload_mut().iter_mut().enumerate() {
        *byte = (i & 0xff) as u8;
    }
    frame
}
