//! セーブステート
//!
//! マシンの状態をサブシステムごとの構造体にまとめ、JSON で保存・復元する。
//! 復元時の補正（範囲外の値のクランプなど）は各サブシステムの `load_state` が行う。

use crate::config::Model;
use crate::cpu::Registers;
use crate::error::{A2Error, Result};
use crate::floppy::Track;
use crate::memory::LangCard;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// CPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub regs: Registers,
    pub total_cycles: u64,
}

/// RAM、バンク切り替え、バス、リセット状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainState {
    /// 0000-BFFF
    pub ram48k: Vec<u8>,
    /// ランゲージカードRAM（main の C000-FFFF）
    pub lang_ram: Vec<u8>,
    /// IIe の補助RAM（64KiB 以降すべて）
    pub aux_ram: Vec<u8>,
    pub rom_select: bool,
    pub lang_card: LangCard,
    pub aux_bank: u8,
    pub soft_switch: u32,
    pub v7_rgb_mode: u8,
    pub db: u8,
    /// CPU サイクル数（パドルタイマーの基準）
    pub access_counter: u64,
    pub reset_pending: bool,
    pub prev_reset_held: bool,
    pub jammed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoState {
    pub h_counter: u32,
    pub v_counter: u32,
    pub flash: bool,
    pub flash_counter: i32,
    pub vid_db: u8,
    pub text_delay: u8,
    pub fcounter: u32,
}

/// キーボード/ゲームI/O
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbState {
    pub latch: u8,
    pub key_held: bool,
    pub repeat_stage: u8,
    pub buttons: [bool; 3],
    pub paddles: [u8; 4],
    pub paddle_trigger: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerState {
    pub level: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveState {
    pub m_history: u64,
    pub delay_flux_change: u8,
    pub stepper_position: u32,
}

/// 読み込まれたディスク1枚分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskImageState {
    pub tracks: Vec<Track>,
    pub angle: u32,
}

/// Disk II インターフェース
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk2State {
    pub latch_stepper: u8,
    pub latch_motor_on: bool,
    pub latch_drive_select: bool,
    pub latch_mode: u8,
    pub lcg_state: u32,
    pub motoroff_delay_counter: u32,
    pub data_reg: u8,
    pub sequence: u8,
    pub drives: [DriveState; 2],
    pub disks: Vec<DiskImageState>,
}

/// マシン全体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveState {
    pub version: u32,
    pub model: Model,
    pub ram_kib: u32,
    pub cpu: CpuState,
    pub main: MainState,
    pub video: VideoState,
    pub kb: KbState,
    pub speaker: SpeakerState,
    /// Disk II が無効なら None
    pub disk2: Option<Disk2State>,
}

impl SaveState {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let state: SaveState = serde_json::from_str(json)?;
        if state.version != Self::CURRENT_VERSION {
            return Err(A2Error::State(format!(
                "Unsupported save state version {} (expected {}).",
                state.version,
                Self::CURRENT_VERSION
            )));
        }
        Ok(state)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|e| A2Error::io(&path.display().to_string(), e))
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| A2Error::io(&path.display().to_string(), e))?;
        Self::from_json(&json)
    }
}
