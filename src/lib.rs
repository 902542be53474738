//! a2core - Apple II/II+/IIe emulation core
//!
//! - 6502 (NMOS) with one bus access per cycle
//! - 64K bus dispatch table, soft switches, language card, ROM card, IIe aux RAM and RamWorks banks
//! - Disk II controller at flux level (P6 sequencer ROM, stepper, weak bits)
//! - DSK/DO/PO/D13, WOZ1/WOZ2 and AFD disk images
//! - Video timing and floating bus, keyboard/game I/O, speaker toggles

pub mod apple2;
pub mod bus;
pub mod config;
pub mod cpu;
pub mod debug;
pub mod disk;
pub mod error;
pub mod floppy;
pub mod kbio;
pub mod memory;
pub mod rom;
pub mod savestate;
pub mod sound;
pub mod video;

pub use apple2::{Apple2, FrameStats};
pub use config::{MachineConfig, Model};
pub use error::{A2Error, Result};
pub use floppy::FloppyDisk;
pub use kbio::{InputSource, InputState};
pub use savestate::SaveState;
pub use sound::AudioSink;
pub use video::{ScanLine, VideoSink};
