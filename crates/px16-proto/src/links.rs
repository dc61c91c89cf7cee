//! Build-time link topology. Pin assignments and PIO programs live with
//! the platform init code; what the transport needs to know about each
//! link is its width and packet bound.

use px16_bus::BUS_MAX_PACKET_DMA_SIZE;

/// APP receive buffer on the VLNK return path; VDP1 status and GPU
/// readback frames are larger than anything the 1-bit links carry
/// elsewhere.
pub const APP_VLNK_RX_BUFFER_SZ: usize = 8192;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LinkWidth {
    Bits1,
    Bits8,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LinkDirection {
    /// Single direction, no return path on this link.
    Outbound,
    /// Paired Tx/Rx lanes between the two chips.
    Bidir,
}

#[derive(Clone, Copy, Debug)]
pub struct LinkDesc {
    pub name: &'static str,
    pub width: LinkWidth,
    pub direction: LinkDirection,
    pub max_packet: usize,
}

/// APP <-> VDP1: GPU commands out, status and readback home.
pub const VLNK: LinkDesc = LinkDesc {
    name: "vlnk",
    width: LinkWidth::Bits1,
    direction: LinkDirection::Bidir,
    max_packet: APP_VLNK_RX_BUFFER_SZ,
};

/// VDP1 -> VDP2: tile pixel data on the 8-bit wide bus.
pub const VDBUS: LinkDesc = LinkDesc {
    name: "vdbus",
    width: LinkWidth::Bits8,
    direction: LinkDirection::Outbound,
    max_packet: BUS_MAX_PACKET_DMA_SIZE,
};

/// VDP2 -> VDP1: status back-channel.
pub const XLNK: LinkDesc = LinkDesc {
    name: "xlnk",
    width: LinkWidth::Bits1,
    direction: LinkDirection::Outbound,
    max_packet: BUS_MAX_PACKET_DMA_SIZE,
};

/// APP <-> APU: audio commands and HID state.
pub const ALNK: LinkDesc = LinkDesc {
    name: "alnk",
    width: LinkWidth::Bits1,
    direction: LinkDirection::Bidir,
    max_packet: BUS_MAX_PACKET_DMA_SIZE,
};
