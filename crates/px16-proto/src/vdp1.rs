//! VDP1 command set: draw command submission, status polling and the
//! debug surface.

use core::time::Duration;

use bitflags::bitflags;
use px16_bus::frame::CmdHeader;
use px16_bus::impl_bus_command;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::CMD_VDP1_BASE;

/// Default status publish cadence toward the APP chip.
pub const VDP1_STATUS_PUBLISH_INTERVAL: Duration = Duration::from_millis(30);

#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Vdp1Cmd {
    GetStatus = CMD_VDP1_BASE,
    GetConfig,
    SetConfig,
    DrawCmdData,
    ForwardVdp2CmdData,
    AckDrawCmdData,
    GpuFrameStats,
    GpuProfileStats,
    ResetBus,
    DebugDump,
}

/// VDP1 pipeline state, reported in the status command.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Vdp1State {
    Idle = 0,
    WaitVdp2Idle,
    WriteVdp2Data,
    RenderTile,
    WriteTile,
    WaitVdp2CompleteTile,
    Done,
}

bitflags! {
    /// Completion behavior requested by a draw command.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct DrawCmdFlags: u32 {
        /// Flip the display buffer when the pass completes.
        const FLIP_DISPLAY = 1 << 0;
        /// Forward the rendered tile to VDP2 for compositing.
        const WRITE_VDP2_TILE = 1 << 1;
        /// Copy the framebuffer to the front buffer without sync.
        const COPY_FB = 1 << 2;
    }
}

/// Status poll; the reply echoes `counter` so round trips can be paired
/// up in traces.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct Vdp1GetStatus {
    pub header: CmdHeader,
    pub counter: U32,
    pub is_online: u8,
    pub vdp_state: u8,
}

impl_bus_command!(Vdp1GetStatus, Vdp1Cmd::GetStatus as u16);

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct Vdp1Config {
    pub header: CmdHeader,
    pub profiler_enabled: u8,
    pub profiler_level: U32,
}

impl_bus_command!(Vdp1Config, Vdp1Cmd::SetConfig as u16);

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct Vdp1DebugDump {
    pub header: CmdHeader,
}

impl_bus_command!(Vdp1DebugDump, Vdp1Cmd::DebugDump as u16);

/// Fixed prefix of a draw command; the GPU command list bytes follow as
/// frame payload (`header.sz` covers prefix plus list).
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct Vdp1DrawCmdData {
    pub header: CmdHeader,
    /// Unique per submitted pass, echoed in the completion ack.
    pub cmd_seq_num: U32,
    /// Bit per tile row to render.
    pub tile_mask: U16,
    pub cmd_flags: U32,
    pub color_depth: u8,
    pub default_blend_mode: u8,
    pub pass_id: U32,
    pub cmd_data_count: U16,
    pub cmd_data_sz: U32,
}

impl_bus_command!(Vdp1DrawCmdData, Vdp1Cmd::DrawCmdData as u16);

/// Completion notification for a draw pass, sent back to APP through
/// the RPC return path.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct Vdp1AckDrawCmdData {
    pub header: CmdHeader,
    pub cmd_seq_num: U32,
    pub gpu_errors: U32,
    pub tile_bus_copy_total_time: U32,
    pub tile_render_total_time: U32,
}

impl_bus_command!(Vdp1AckDrawCmdData, Vdp1Cmd::AckDrawCmdData as u16);
