//! APU command set: audio triggers plus the HID state query the APP
//! input layer polls over ALNK.

use px16_bus::frame::CmdHeader;
use px16_bus::impl_bus_command;
use zerocopy::little_endian::{I16, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::CMD_APU_BASE;

#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ApuCmd {
    GetStatus = CMD_APU_BASE,
    GetHidState,
    PlaySfx,
    SetVolume,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct ApuGetStatus {
    pub header: CmdHeader,
    pub counter: U32,
    pub is_online: u8,
}

impl_bus_command!(ApuGetStatus, ApuCmd::GetStatus as u16);

/// HID snapshot exchange. One symmetric record for both directions,
/// like the status commands: the APP fills `clear_counters` (reset the
/// edge counters once the snapshot is taken), the APU fills `result`
/// and the state fields in the reply.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct ApuHidState {
    pub header: CmdHeader,
    pub clear_counters: u8,
    pub result: u8,
    pub mouse_buttons: u8,
    pub key_mods: u8,
    pub keys: [u8; 6],
    pub mouse_x: I16,
    pub mouse_y: I16,
    pub wheel: I16,
    pub gamepad_buttons: U32,
}

impl_bus_command!(ApuHidState, ApuCmd::GetHidState as u16);

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct ApuPlaySfx {
    pub header: CmdHeader,
    pub sample_id: U16,
    pub volume: u8,
    pub pan: u8,
}

impl_bus_command!(ApuPlaySfx, ApuCmd::PlaySfx as u16);
