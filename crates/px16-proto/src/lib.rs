//! PX16 command-code registry and link topology.
//!
//! Command codes partition into per-chip bases; each chip publishes the
//! commands it serves. The transport only ever interprets the common
//! header, unknown codes fall through to the receiving chip's main
//! handler.

#![no_std]

pub mod apu;
pub mod links;
pub mod vdp1;
pub mod vdp2;

/// Commands served by the application CPU.
pub const CMD_APP_BASE: u16 = 0x0100;
/// Commands served by the VDP1 graphics co-processor.
pub const CMD_VDP1_BASE: u16 = 0x0200;
/// Commands served by the VDP2 compositor.
pub const CMD_VDP2_BASE: u16 = 0x0300;
/// Commands served by the audio/input co-processor.
pub const CMD_APU_BASE: u16 = 0x0400;
