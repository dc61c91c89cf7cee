//! Frame layout, status flags and the payload CRC.

use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use crc::{Crc, Table};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// `"LNK0"`, little-endian. First (and so far only) header revision.
pub const MAGIC_HEADER0: u32 = u32::from_le_bytes(*b"LNK0");

/// Payload checksum. Table-driven CRC-16, computed over the payload
/// region only; the header is covered by its own magic/size checks.
const BUS_CRC: Crc<u16, Table<1>> = Crc::<u16, Table<1>>::new(&crc::CRC_16_XMODEM);

bitflags! {
    /// Host-side frame state carried in the header `status` field.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct BusStatusFlags: u16 {
        /// Frame is sitting in a Tx queue waiting for the drain.
        const HOST_IN_QUEUE = 1 << 0;
        /// Frame has been handed to the link.
        const HOST_QUEUE_SENT = 1 << 1;
        /// Skip payload CRC computation for this frame.
        const NO_CRC = 1 << 2;
    }
}

/// Command frame header. Little-endian, naturally aligned, packed.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct CmdHeader {
    pub magic: U32,
    pub sz: U32,
    pub seq_num: U32,
    pub cmd: U16,
    pub crc: U16,
    pub id: U16,
    pub status: U16,
}

pub const HEADER_SIZE: usize = core::mem::size_of::<CmdHeader>();

impl CmdHeader {
    pub fn status_flags(&self) -> BusStatusFlags {
        BusStatusFlags::from_bits_retain(self.status.get())
    }

    pub fn insert_status(&mut self, flags: BusStatusFlags) {
        let mut s = self.status_flags();
        s.insert(flags);
        self.status.set(s.bits());
    }

    pub fn remove_status(&mut self, flags: BusStatusFlags) {
        let mut s = self.status_flags();
        s.remove(flags);
        self.status.set(s.bits());
    }
}

/// A typed command: a `#[repr(C)]` record that starts with a `CmdHeader`
/// and registers its command code. Implement through
/// [`impl_bus_command!`](crate::impl_bus_command).
pub trait BusCommand: FromBytes + IntoBytes + KnownLayout + Immutable + Unaligned {
    const CMD: u16;

    fn header(&self) -> &CmdHeader;
    fn header_mut(&mut self) -> &mut CmdHeader;
}

#[macro_export]
macro_rules! impl_bus_command {
    ($ty:ty, $code:expr) => {
        impl $crate::frame::BusCommand for $ty {
            const CMD: u16 = $code;

            fn header(&self) -> &$crate::frame::CmdHeader {
                &self.header
            }

            fn header_mut(&mut self) -> &mut $crate::frame::CmdHeader {
                &mut self.header
            }
        }
    };
}

/// Stamp a freshly built command: magic, code, total size, cleared
/// bookkeeping fields. Sequence number and CRC are filled in later by
/// the Tx path.
pub fn init_cmd<T: BusCommand>(cmd: &mut T) {
    let sz = core::mem::size_of::<T>() as u32;
    let hdr = cmd.header_mut();
    hdr.magic.set(MAGIC_HEADER0);
    hdr.sz.set(sz);
    hdr.seq_num.set(0);
    hdr.cmd.set(T::CMD);
    hdr.crc.set(0);
    hdr.id.set(0);
    hdr.status.set(0);
}

/// CRC of the payload region `[HEADER_SIZE, sz)`. Zero for an empty
/// payload.
pub fn compute_crc(frame: &[u8]) -> u16 {
    let Some(hdr) = header_of(frame) else {
        return 0;
    };
    let sz = (hdr.sz.get() as usize).min(frame.len());
    if sz <= HEADER_SIZE {
        return 0;
    }
    BUS_CRC.checksum(&frame[HEADER_SIZE..sz])
}

/// Recompute the payload CRC and compare it against the header field.
pub fn verify_crc(frame: &[u8]) -> bool {
    match header_of(frame) {
        Some(hdr) => hdr.crc.get() == compute_crc(frame),
        None => false,
    }
}

fn header_of(bytes: &[u8]) -> Option<&CmdHeader> {
    CmdHeader::ref_from_prefix(bytes).ok().map(|(hdr, _)| hdr)
}

/// Borrowed view of a received or queued frame.
#[derive(Clone, Copy)]
pub struct FrameRef<'a> {
    bytes: &'a [u8],
}

impl<'a> FrameRef<'a> {
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(FrameRef { bytes })
    }

    pub fn header(&self) -> &'a CmdHeader {
        // Length checked at construction.
        header_of(self.bytes).unwrap()
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Reinterpret as a typed command. Fails when the command code or
    /// the length does not match `T`.
    pub fn read_cmd<T: BusCommand>(&self) -> Option<T> {
        if self.header().cmd.get() != T::CMD {
            return None;
        }
        T::read_from_prefix(self.bytes).ok().map(|(cmd, _)| cmd)
    }
}

/// An owned frame: header plus payload in one heap buffer. This is the
/// unit the Tx queues carry.
pub struct FrameBuf {
    bytes: Vec<u8>,
}

impl FrameBuf {
    /// Zero-filled frame of `sz` total bytes with a stamped header.
    /// Panics when `sz` cannot even hold the header.
    pub fn new_frame(cmd: u16, sz: usize) -> FrameBuf {
        assert!(sz >= HEADER_SIZE, "frame smaller than header");
        let mut bytes = vec![0u8; sz];
        let (hdr, _) = CmdHeader::mut_from_prefix(&mut bytes).unwrap();
        hdr.magic.set(MAGIC_HEADER0);
        hdr.sz.set(sz as u32);
        hdr.cmd.set(cmd);
        FrameBuf { bytes }
    }

    pub fn from_cmd<T: BusCommand>(cmd: &T) -> FrameBuf {
        FrameBuf {
            bytes: cmd.as_bytes().to_vec(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<FrameBuf> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(FrameBuf {
            bytes: bytes.to_vec(),
        })
    }

    pub fn header(&self) -> &CmdHeader {
        header_of(&self.bytes).unwrap()
    }

    pub fn header_mut(&mut self) -> &mut CmdHeader {
        let (hdr, _) = CmdHeader::mut_from_prefix(&mut self.bytes).unwrap();
        hdr
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_ref(&self) -> FrameRef<'_> {
        FrameRef { bytes: &self.bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn read_cmd<T: BusCommand>(&self) -> Option<T> {
        self.as_ref().read_cmd::<T>()
    }
}

impl core::fmt::Debug for FrameBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let hdr = self.header();
        f.debug_struct("FrameBuf")
            .field("cmd", &hdr.cmd.get())
            .field("sz", &hdr.sz.get())
            .field("seq_num", &hdr.seq_num.get())
            .field("id", &hdr.id.get())
            .field("status", &hdr.status_flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::little_endian::U32 as U32Le;
    use zerocopy::FromZeros;

    #[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy)]
    #[repr(C)]
    struct PingCmd {
        header: CmdHeader,
        counter: U32Le,
    }

    crate::impl_bus_command!(PingCmd, 0x0101);

    fn ping(counter: u32) -> PingCmd {
        let mut cmd = PingCmd::new_zeroed();
        init_cmd(&mut cmd);
        cmd.counter.set(counter);
        cmd
    }

    #[test]
    fn header_is_packed_and_20_bytes() {
        assert_eq!(HEADER_SIZE, 20);
    }

    #[test]
    fn init_cmd_stamps_header() {
        let cmd = ping(7);
        assert_eq!(cmd.header().magic.get(), MAGIC_HEADER0);
        assert_eq!(cmd.header().cmd.get(), 0x0101);
        assert_eq!(cmd.header().sz.get() as usize, core::mem::size_of::<PingCmd>());
        assert_eq!(cmd.header().status.get(), 0);
    }

    #[test]
    fn empty_payload_has_zero_crc() {
        let frame = FrameBuf::new_frame(1, HEADER_SIZE);
        assert_eq!(compute_crc(frame.as_bytes()), 0);
        assert!(verify_crc(frame.as_bytes()));
    }

    #[test]
    fn crc_round_trips() {
        let mut frame = FrameBuf::new_frame(1, HEADER_SIZE + 32);
        for (i, b) in frame.payload_mut().iter_mut().enumerate() {
            *b = i as u8;
        }
        let crc = compute_crc(frame.as_bytes());
        frame.header_mut().crc.set(crc);
        assert!(verify_crc(frame.as_bytes()));

        frame.payload_mut()[3] ^= 0xff;
        assert!(!verify_crc(frame.as_bytes()));
    }

    #[test]
    fn crc_covers_payload_only() {
        let mut frame = FrameBuf::new_frame(1, HEADER_SIZE + 8);
        let before = compute_crc(frame.as_bytes());
        frame.header_mut().seq_num.set(99);
        assert_eq!(before, compute_crc(frame.as_bytes()));
    }

    #[test]
    fn status_flags_round_trip() {
        let mut frame = FrameBuf::new_frame(1, HEADER_SIZE);
        frame.header_mut().insert_status(BusStatusFlags::HOST_IN_QUEUE);
        assert!(frame.header().status_flags().contains(BusStatusFlags::HOST_IN_QUEUE));
        frame.header_mut().remove_status(BusStatusFlags::HOST_IN_QUEUE);
        frame.header_mut().insert_status(BusStatusFlags::HOST_QUEUE_SENT);
        let flags = frame.header().status_flags();
        assert!(!flags.contains(BusStatusFlags::HOST_IN_QUEUE));
        assert!(flags.contains(BusStatusFlags::HOST_QUEUE_SENT));
    }

    #[test]
    fn typed_command_round_trips() {
        let cmd = ping(0xdead_beef);
        let frame = FrameBuf::from_cmd(&cmd);
        assert_eq!(frame.len(), core::mem::size_of::<PingCmd>());
        let back = frame.read_cmd::<PingCmd>().unwrap();
        assert_eq!(back.counter.get(), 0xdead_beef);
    }

    #[test]
    fn read_cmd_rejects_wrong_code() {
        let mut frame = FrameBuf::from_cmd(&ping(1));
        frame.header_mut().cmd.set(0x0102);
        assert!(frame.read_cmd::<PingCmd>().is_none());
    }
}
