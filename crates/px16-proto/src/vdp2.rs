//! VDP2 command set: tile framebuffer uploads from VDP1 over the wide
//! VDBUS link.

use px16_bus::frame::CmdHeader;
use px16_bus::impl_bus_command;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::CMD_VDP2_BASE;

/// Composition command bytes carried alongside a 16bpp tile.
pub const VDP2_TILE_CMD_DATA_SZ: usize = 768;
/// Smaller command buffer used by the 8bpp path.
pub const VDP2_TILE_CMD_8BPP_DATA_SZ: usize = 128;

#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Vdp2Cmd {
    TileFrameBuffer16bpp = CMD_VDP2_BASE,
    TileFrameBuffer8bpp,
    DebugDump,
}

/// Fixed prefix of a tile upload; pixel and attribute data follow as
/// frame payload sized by `header.sz`.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct Vdp2TileFrameBuffer {
    pub header: CmdHeader,
    pub cmd_seq_num: U32,
    pub tile_id: U16,
    pub cmd_flags: U32,
    pub pass_id: U32,
    pub color_depth: u8,
    pub default_blend_mode: u8,
    pub vdp2_cmd_data_count: U16,
    pub vdp2_cmd_data_sz: U32,
}

impl_bus_command!(Vdp2TileFrameBuffer, Vdp2Cmd::TileFrameBuffer16bpp as u16);
