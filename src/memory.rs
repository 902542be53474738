//! Apple II メモリサブシステム
//!
//! RAM、ランゲージカード、ROMカード、IIe の補助RAM/ソフトスイッチを
//! バスハンドラ（`fn(&mut Apple2, u16)`）として実装する。
//! ハンドラはすべて `db`（データバスラッチ）経由で値を受け渡し、
//! ピークモード以外では必ず1回 `cpu_tick1` を呼ぶ。

use crate::a2_dbg;
use crate::apple2::Apple2;
use crate::config::Model;
use crate::debug::DebugMask;
use crate::error::{A2Error, Result};
use serde::{Deserialize, Serialize};

/// ソフトスイッチのビット位置
pub mod softswitch {
    pub const TEXT_MODE: u32 = 1 << 0;
    pub const MIX_MODE: u32 = 1 << 1;
    pub const PAGE2: u32 = 1 << 2;
    pub const HIRES_MODE: u32 = 1 << 3;
    pub const AN0: u32 = 1 << 4;
    pub const AN1: u32 = 1 << 5;
    pub const AN2: u32 = 1 << 6;
    pub const AN3: u32 = 1 << 7;
    // IIe
    pub const STORE80: u32 = 1 << 8;
    pub const RAMRD: u32 = 1 << 9;
    pub const RAMWRT: u32 = 1 << 10;
    pub const INTCXROM: u32 = 1 << 11;
    pub const ALTZP: u32 = 1 << 12;
    pub const SLOTC3ROM: u32 = 1 << 13;
    pub const COL80: u32 = 1 << 14;
    pub const ALTCHARSET: u32 = 1 << 15;
    // 内部状態
    pub const INTC8ROM: u32 = 1 << 16;
    pub const VERTBLANK: u32 = 1 << 17;
}

use softswitch::*;

/// IIe で選択可能なRAMサイズ（KiB）
pub const IIE_RAM_SIZES: [u32; 7] = [64, 65, 128, 320, 576, 1088, 3136];

/// 存在しない補助バンク（RAMの外を指すのでアクセスは捨てられる）
pub const AUX_BANK_ABSENT: u8 = 0xFF;

/// RAMサイズの検証
pub fn validate_ram_size(model: Model, kib: u32) -> Result<()> {
    if model.is_iie() {
        if !IIE_RAM_SIZES.contains(&kib) {
            return Err(A2Error::Config(
                "Specified RAM size must be 64KiB, 65KiB, 128KiB, 320KiB, 576KiB, 1088KiB, or 3136KiB with Apple IIe emulation."
                    .to_string(),
            ));
        }
        return Ok(());
    }

    let msg = if kib & 3 != 0 {
        "Specified RAM size is not a multiple of 4."
    } else if kib < 4 {
        "Specified RAM size is too small."
    } else if kib > 48 && kib < 64 {
        "Specified RAM size between 48KiB and 64KiB is unsupported."
    } else if kib > 64 {
        "Specified RAM size is too large."
    } else {
        return Ok(());
    };
    Err(A2Error::Config(msg.to_string()))
}

/// ランゲージカードの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LangCard {
    pub read_enable: bool,
    pub write_enable: bool,
    pub prev_a1: bool,
    pub bank2_select: bool,
}

impl LangCard {
    /// リセット直後の状態
    pub fn power_on() -> Self {
        LangCard {
            read_enable: false,
            write_enable: true,
            prev_a1: false,
            bank2_select: true,
        }
    }

    /// C080-C08F アクセス時の状態遷移
    ///
    /// 書き込み許可は「A1付きの読み取り」の直後にもう一度 A0=1 のアクセスが来たときだけ立つ。
    pub fn access(&mut self, a: u16, is_read: bool) {
        let a0 = (a & 1) != 0;
        let a1 = (a & 2) != 0;

        self.bank2_select = (a & 8) == 0;
        self.read_enable = !(a0 ^ a1);
        self.write_enable = ((self.prev_a1 & is_read) | self.write_enable) & a0;
        self.prev_a1 = a0 & is_read;
    }
}

/// メモリ関連の状態
pub struct Memory {
    /// RAM（main 64K、以降 aux バンク）
    pub ram: Vec<u8>,
    /// 有効なRAMのバイト数
    pub ram_size: u32,
    pub ram_mask: [u32; 2],
    /// 4KiB単位のRAM存在フラグ（0000-BFFF）
    pub ram_present: [bool; 12],
    /// [0] = ROMカード, [1] = マザーボード。IIe では先頭16KiBを C000-FFFF として使う
    pub rom: Vec<u8>,
    /// 2KiB単位のROM存在フラグ（D000-FFFF）
    pub rom_present: [[bool; 6]; 2],
    /// 0 = ROMカード, 1 = マザーボード
    pub rom_select: bool,
    pub soft_switch: u32,
    pub v7_rgb_mode: u8,
    pub lang_card: LangCard,
    pub aux_bank: u8,
    pub ram_cpu_offs: [u32; 2],

    pub enable_iie: bool,
    pub enable_lang_card: bool,
    pub enable_rom_card: bool,
    pub enable_full_aux_ram: bool,

    /// 未初期化読み取り検出用（診断ビルドのみ確保）
    pub(crate) ram_initialized: Vec<bool>,
}

pub const ROM12K_SIZE: usize = 0x3000;

impl Memory {
    pub fn new(model: Model, ram_kib: u32) -> Result<Self> {
        validate_ram_size(model, ram_kib)?;

        let ram_size = ram_kib * 1024;
        let mut ram_present = [false; 12];
        for (i, present) in ram_present.iter_mut().enumerate() {
            *present = (i as u32 * 4) < ram_kib;
        }

        let alloc = (ram_size as usize).max(0x20000);
        let mut mem = Memory {
            ram: vec![0; alloc],
            ram_size,
            ram_mask: [0xFFFF, if ram_kib == 65 { 0x103FF } else { u32::MAX }],
            ram_present,
            rom: vec![0xFF; ROM12K_SIZE * 2],
            rom_present: [[false; 6]; 2],
            rom_select: true,
            soft_switch: 0,
            v7_rgb_mode: 3,
            lang_card: LangCard::power_on(),
            aux_bank: 0,
            ram_cpu_offs: [0, 1 << 16],
            enable_iie: model.is_iie(),
            enable_lang_card: ram_kib >= 64,
            enable_rom_card: false,
            enable_full_aux_ram: ram_kib >= 128,
            ram_initialized: if crate::debug::ENABLED { vec![false; alloc] } else { Vec::new() },
        };
        mem.recalc_aux_bank_offs();
        Ok(mem)
    }

    /// ROM12K[w]
    #[inline]
    pub fn rom12k(&self, w: bool) -> &[u8] {
        let base = w as usize * ROM12K_SIZE;
        &self.rom[base..base + ROM12K_SIZE]
    }

    /// IIe の16KiB ROM（C000-FFFF）
    #[inline]
    pub fn rom_iie(&self) -> &[u8] {
        &self.rom[..0x4000]
    }

    /// 電源投入時のRAMパターン
    pub fn fill_power_on_pattern(&mut self) {
        let mut j: u32 = 1;
        let mut k: u32 = 3;

        for i in 0..self.ram_size as usize {
            let v = if self.enable_iie {
                if (i & 1) != 0 || (i & 0x1FF) == 0 || (i & 0x1FF) == 0x40 {
                    0xFF
                } else {
                    0x00
                }
            } else {
                let base: u32 = if (i & 2) != 0 { 0xC6 } else { 0xBD };
                (base ^ (j & (j >> 8) & (j >> 16) & (j >> 24) & k & (k >> 8) & (k >> 16))) as u8
            };
            self.ram[i] = v;

            j = j.wrapping_mul(123456789).wrapping_add(987654321);
            k = k.wrapping_mul(987654321).wrapping_add(123456789);
        }

        self.ram_initialized.iter_mut().for_each(|b| *b = false);
    }

    pub fn power(&mut self) {
        self.fill_power_on_pattern();
        self.soft_switch = 0;
        self.rom_select = true;
        // 電源投入直後だけ bank1 選択
        self.lang_card = LangCard {
            bank2_select: false,
            ..LangCard::power_on()
        };
        self.aux_bank = 0;
        self.recalc_aux_bank_offs();
    }

    pub fn reset(&mut self) {
        self.rom_select = true;
        self.lang_card = LangCard::power_on();

        if self.enable_iie {
            self.soft_switch &= TEXT_MODE | MIX_MODE | VERTBLANK;
            self.aux_bank = 0;
            self.recalc_aux_bank_offs();
        }
        self.v7_rgb_mode = 3;
    }

    /// RamWorks の補助バンク番号からRAMオフセットを再計算
    ///
    /// 有効なバンク: 00-17, 30-37, 50-57, 70-77（連続番号に詰める）
    pub fn recalc_aux_bank_offs(&mut self) {
        let mut bank = self.aux_bank;

        if bank >= 0x18 {
            if (bank & 0x08) != 0 || (bank & 0x10) == 0 {
                bank = AUX_BANK_ABSENT;
            } else {
                bank -= 0x18 * ((bank & 0x60) >> 5);
            }
        }

        self.ram_cpu_offs[0] = 0;
        self.ram_cpu_offs[1] = (1 + bank as u32) << 16;
    }

    /// IIe の 0000-BFFF アクセスで使う RAM オフセット
    ///
    /// 優先順位: 80STORE+ページ > ALTZP(<0200) > RAMRD/RAMWRT
    #[inline]
    pub fn ram_offs_iie(&self, a: u16, is_write: bool) -> usize {
        let ss = self.soft_switch;
        let mut aux = (ss & if is_write { RAMWRT } else { RAMRD }) != 0;

        if a < 0x0200 {
            aux = (ss & ALTZP) != 0;
        }

        let store80 = (ss & STORE80) != 0;
        let text_page = (a & 0xFC00) == 0x0400;
        let hires_page = (a & 0xE000) == 0x2000 && (ss & HIRES_MODE) != 0;
        if store80 && (text_page || hires_page) {
            aux = (ss & PAGE2) != 0;
        }

        (self.ram_cpu_offs[aux as usize].wrapping_add(a as u32) & self.ram_mask[aux as usize]) as usize
    }

    /// IIe のランゲージカード領域オフセット（ALTZP で main/aux を選ぶ）
    #[inline]
    fn lang_offs_iie(&self, rel: u32) -> usize {
        let aux = (self.soft_switch & ALTZP) != 0;
        (self.ram_cpu_offs[aux as usize].wrapping_add(0xC000 + rel) & self.ram_mask[aux as usize]) as usize
    }

    #[inline]
    fn lang_bs_rel(&self, a: u16) -> u32 {
        (a as u32 - 0xD000) + ((self.lang_card.bank2_select as u32) << 12)
    }

    #[inline]
    fn lang_static_rel(a: u16) -> u32 {
        (a as u32 - 0xE000) + 0x2000
    }

    #[inline]
    fn rom_present_at(&self, w: bool, a: u16) -> bool {
        self.rom_present[w as usize][((a as usize) >> 11) - (0xD000 >> 11)]
    }
}

//--------------------------------------------------
// 診断
//--------------------------------------------------

#[inline]
fn track_ram_read(a2: &mut Apple2, a: u16, offs: usize) {
    if !crate::debug::ENABLED || a2.junk_read || a2.in_peek {
        return;
    }

    if !a2.mem.ram_initialized.get(offs).copied().unwrap_or(true) {
        a2_dbg!(
            a2.dbg,
            DebugMask::UNINITIALIZED_READ,
            "[UNINIT] Read from uninitialized RAM address 0x{:05x}(@=0x{:02x}).",
            offs,
            a2.mem.ram[offs]
        );
    }

    let pc = a2.cpu.regs.pc;
    if (0x9D00..=0xBFFF).contains(&a) && !(0x9D00..0xC000).contains(&pc) {
        a2_dbg!(a2.dbg, DebugMask::DOS, "[DOS] Read from DOS area of RAM at address 0x{:04x}, PC=0x{:04x}", a, pc);
    }
}

#[inline]
fn track_ram_write(a2: &mut Apple2, offs: usize) {
    if let Some(b) = a2.mem.ram_initialized.get_mut(offs) {
        *b = true;
    }
}

#[inline]
fn log_rom_read(a2: &Apple2, a: u16) {
    if !crate::debug::ENABLED {
        return;
    }

    let pc = a2.cpu.regs.pc;
    let mut pc_in_rom = pc >= 0xC000;
    if a2.mem.enable_lang_card && a2.mem.lang_card.read_enable && pc >= 0xD000 {
        pc_in_rom = false;
    }

    if !pc_in_rom && !a2.junk_read && !a2.in_peek {
        a2_dbg!(a2.dbg, DebugMask::BIOS, "[BIOS] Read from ROM at 0x{:04x}, PC=0x{:04x}", a, pc);
    }
}

//--------------------------------------------------
// II/II+ RAM・ROM
//--------------------------------------------------

pub(crate) fn read_ram48k(a2: &mut Apple2, a: u16) {
    track_ram_read(a2, a, a as usize);
    a2.db = a2.mem.ram[a as usize];
    a2.tick1_unless_peek();
}

pub(crate) fn write_ram48k(a2: &mut Apple2, a: u16) {
    a2.mem.ram[a as usize] = a2.db;
    track_ram_write(a2, a as usize);
    a2.cpu_tick1();
}

pub(crate) fn rw_rom_card_control(a2: &mut Apple2, a: u16) {
    if !a2.in_peek {
        a2.mem.rom_select = (a & 1) != 0;
        a2.cpu_tick1();
    }
}

pub(crate) fn read_rom(a2: &mut Apple2, a: u16) {
    let w = a2.mem.rom_select;
    if a2.mem.rom_present_at(w, a) {
        a2.db = a2.mem.rom12k(w)[a as usize - 0xD000];
        log_rom_read(a2, a);
    }
    a2.tick1_unless_peek();
}

fn read_lang_area(a2: &mut Apple2, a: u16, rel: u32) {
    if a2.mem.lang_card.read_enable {
        a2.db = a2.mem.ram[(0xC000 + rel) as usize];
    } else if a2.mem.rom_present_at(true, a) {
        a2.db = a2.mem.rom12k(true)[a as usize - 0xD000];
        log_rom_read(a2, a);
    }
    a2.tick1_unless_peek();
}

fn write_lang_area(a2: &mut Apple2, rel: u32) {
    if a2.mem.lang_card.write_enable {
        a2.mem.ram[(0xC000 + rel) as usize] = a2.db;
    }
    a2.cpu_tick1();
}

pub(crate) fn read_lang_bs_area(a2: &mut Apple2, a: u16) {
    let rel = a2.mem.lang_bs_rel(a);
    read_lang_area(a2, a, rel);
}

pub(crate) fn write_lang_bs_area(a2: &mut Apple2, a: u16) {
    let rel = a2.mem.lang_bs_rel(a);
    write_lang_area(a2, rel);
}

pub(crate) fn read_lang_static_area(a2: &mut Apple2, a: u16) {
    read_lang_area(a2, a, Memory::lang_static_rel(a));
}

pub(crate) fn write_lang_static_area(a2: &mut Apple2, a: u16) {
    write_lang_area(a2, Memory::lang_static_rel(a));
}

/// C080-C08F（読み取り）
pub(crate) fn read_lang_card_control(a2: &mut Apple2, a: u16) {
    if !a2.in_peek {
        a2.mem.lang_card.access(a, true);
        a2.cpu_tick1();
    }
}

/// C080-C08F（書き込み）
pub(crate) fn write_lang_card_control(a2: &mut Apple2, a: u16) {
    if !a2.in_peek {
        a2.mem.lang_card.access(a, false);
        a2.cpu_tick1();
    }
}

/// C050-C05F
pub(crate) fn rw_soft_switch(a2: &mut Apple2, a: u16) {
    if !a2.in_peek {
        let w = ((a & 0xF) >> 1) as u32;
        a2.mem.soft_switch &= !(1 << w);
        a2.mem.soft_switch |= ((a & 1) as u32) << w;
        a2.cpu_tick1();
    }
}

//--------------------------------------------------
// IIe
//--------------------------------------------------

/// RamWorks 補助バンク選択（C073 書き込み、元のハンドラへチェイン）
pub(crate) fn write_select_aux_bank_iie(a2: &mut Apple2, a: u16) {
    a2.mem.aux_bank = a2.db & 0x7F;
    a2.mem.recalc_aux_bank_offs();

    let chained = a2.aux_bank_chain_wf;
    chained(a2, a);
}

pub(crate) fn read_ram48k_iie(a2: &mut Apple2, a: u16) {
    let offs = a2.mem.ram_offs_iie(a, false);
    if offs < a2.mem.ram_size as usize {
        track_ram_read(a2, a, offs);
        a2.db = a2.mem.ram[offs];
    }
    a2.tick1_unless_peek();
}

pub(crate) fn write_ram48k_iie(a2: &mut Apple2, a: u16) {
    let offs = a2.mem.ram_offs_iie(a, true);
    if offs < a2.mem.ram_size as usize {
        a2.mem.ram[offs] = a2.db;
        track_ram_write(a2, offs);
    }
    a2.cpu_tick1();
}

/// C100-CFFF の内部ROM/スロットROM切り替えで INTC8ROM を更新し、内部ROMを使うかを返す
///
/// ピーク中はラッチを変えずに判定だけ行う。
#[inline]
fn update_intc8rom(mem: &mut Memory, a: u16, in_peek: bool) -> bool {
    let c3ra = (mem.soft_switch & SLOTC3ROM) == 0 && (a & 0xFF00) == 0xC300;
    let c8ra = (mem.soft_switch & INTC8ROM) != 0 && (a & 0xF800) == 0xC800;

    if in_peek {
        return (mem.soft_switch & INTCXROM) != 0 || c3ra || c8ra;
    }

    if c3ra {
        mem.soft_switch |= INTC8ROM;
    }
    if a == 0xCFFF {
        mem.soft_switch &= !INTC8ROM;
    }

    (mem.soft_switch & INTCXROM) != 0 || c3ra || c8ra
}

pub(crate) fn read_rom_low_iie(a2: &mut Apple2, a: u16) {
    if update_intc8rom(&mut a2.mem, a, a2.in_peek) {
        a2.db = a2.mem.rom_iie()[a as usize - 0xC000];
        log_rom_read(a2, a);
        a2.tick1_unless_peek();
        return;
    }

    let slot_read = a2.bus.slot_rom_read(a);
    slot_read(a2, a);
}

pub(crate) fn write_rom_low_iie(a2: &mut Apple2, a: u16) {
    // 書き込みでは INTCXROM/C8 による内部ROM選択は関係ない
    let _ = update_intc8rom(&mut a2.mem, a, false);

    let slot_write = a2.bus.slot_rom_write(a);
    slot_write(a2, a);
}

fn read_lang_area_iie(a2: &mut Apple2, a: u16, rel: u32) {
    if a2.mem.lang_card.read_enable {
        let offs = a2.mem.lang_offs_iie(rel);
        if offs < a2.mem.ram_size as usize {
            a2.db = a2.mem.ram[offs];
        }
    } else {
        a2.db = a2.mem.rom_iie()[a as usize - 0xC000];
        log_rom_read(a2, a);
    }
    a2.tick1_unless_peek();
}

fn write_lang_area_iie(a2: &mut Apple2, rel: u32) {
    if a2.mem.lang_card.write_enable {
        let offs = a2.mem.lang_offs_iie(rel);
        if offs < a2.mem.ram_size as usize {
            a2.mem.ram[offs] = a2.db;
        }
    }
    a2.cpu_tick1();
}

pub(crate) fn read_lang_bs_area_iie(a2: &mut Apple2, a: u16) {
    let rel = a2.mem.lang_bs_rel(a);
    read_lang_area_iie(a2, a, rel);
}

pub(crate) fn write_lang_bs_area_iie(a2: &mut Apple2, a: u16) {
    let rel = a2.mem.lang_bs_rel(a);
    write_lang_area_iie(a2, rel);
}

pub(crate) fn read_lang_static_area_iie(a2: &mut Apple2, a: u16) {
    read_lang_area_iie(a2, a, Memory::lang_static_rel(a));
}

pub(crate) fn write_lang_static_area_iie(a2: &mut Apple2, a: u16) {
    write_lang_area_iie(a2, Memory::lang_static_rel(a));
}

/// C05E/C05F: AN3 の立ち上がりで Video-7 RGB モードレジスタをシフト
pub(crate) fn rw_soft_switch_an3_iie(a2: &mut Apple2, a: u16) {
    if !a2.in_peek {
        let ss = a2.mem.soft_switch;
        if ((ss >> 7) ^ a as u32) & (a as u32) & 1 != 0 {
            let col40 = (ss & COL80) == 0;
            a2.mem.v7_rgb_mode = ((a2.mem.v7_rgb_mode << 1) | col40 as u8) & 0x3;
        }

        a2.mem.soft_switch &= !AN3;
        a2.mem.soft_switch |= ((a & 1) as u32) << 7;
        a2.cpu_tick1();
    }
}

/// C000-C00F 書き込み
pub(crate) fn write_soft_switch_iie(a2: &mut Apple2, a: u16) {
    if !a2.in_peek {
        let w = 8 + ((a & 0xF) >> 1) as u32;
        a2.mem.soft_switch &= !(1 << w);
        a2.mem.soft_switch |= ((a & 1) as u32) << w;
        a2.cpu_tick1();
    }
}

const STATUS_MASKS: [u32; 16] = [
    0, 0, 0, RAMRD, RAMWRT, INTCXROM, ALTZP, SLOTC3ROM, STORE80, VERTBLANK, TEXT_MODE, MIX_MODE,
    PAGE2, HIRES_MODE, ALTCHARSET, COL80,
];

/// C013-C01F 読み取り
pub(crate) fn read_soft_switch_status_iie(a2: &mut Apple2, a: u16) {
    let m = STATUS_MASKS[(a & 0xF) as usize];
    debug_assert!(m != 0);

    crate::kbio::read_c011_c01f_iie(a2);
    a2.db = (a2.db & 0x7F) | ((((a2.mem.soft_switch & m) != 0) as u8) << 7);
}

/// C011/C012 読み取り
pub(crate) fn read_bsr_status_iie(a2: &mut Apple2, a: u16) {
    let lc = a2.mem.lang_card;
    let bit = if (a & 1) != 0 { lc.read_enable } else { lc.bank2_select };

    crate::kbio::read_c011_c01f_iie(a2);
    a2.db = (a2.db & 0x7F) | ((bit as u8) << 7);
}

//--------------------------------------------------
// ハンドラ登録
//--------------------------------------------------

/// RAM、ソフトスイッチ、ランゲージカード/ROMカード/ROM
pub(crate) fn install_handlers(a2: &mut Apple2) {
    let iie = a2.mem.enable_iie;

    for a in 0x0000..0xC000u16 {
        if iie {
            debug_assert!(a2.mem.ram_present[(a >> 12) as usize]);
            a2.bus.set_rw_handlers(a, read_ram48k_iie, write_ram48k_iie);
        } else if a2.mem.ram_present[(a >> 12) as usize] {
            a2.bus.set_rw_handlers(a, read_ram48k, write_ram48k);
        }
    }

    for a in 0xC050..0xC060 {
        a2.bus.set_rw_handlers(a, rw_soft_switch, rw_soft_switch);
    }

    if iie {
        for a in 0xC05E..0xC060 {
            a2.bus.set_rw_handlers(a, rw_soft_switch_an3_iie, rw_soft_switch_an3_iie);
        }
        for a in 0xC080..0xC090 {
            a2.bus.set_rw_handlers(a, read_lang_card_control, write_lang_card_control);
        }
        for a in 0xD000..0xE000 {
            a2.bus.set_rw_handlers(a, read_lang_bs_area_iie, write_lang_bs_area_iie);
        }
        for a in 0xE000..=0xFFFF {
            a2.bus.set_rw_handlers(a, read_lang_static_area_iie, write_lang_static_area_iie);
        }
    } else if a2.mem.enable_lang_card {
        for a in 0xC080..0xC090 {
            a2.bus.set_rw_handlers(a, read_lang_card_control, write_lang_card_control);
        }
        for a in 0xD000..0xE000 {
            a2.bus.set_rw_handlers(a, read_lang_bs_area, write_lang_bs_area);
        }
        for a in 0xE000..=0xFFFF {
            a2.bus.set_rw_handlers(a, read_lang_static_area, write_lang_static_area);
        }
    } else {
        if a2.mem.enable_rom_card {
            for a in 0xC080..0xC090 {
                a2.bus.set_rw_handlers(a, rw_rom_card_control, rw_rom_card_control);
            }
        }
        for a in 0xD000..=0xFFFF {
            a2.bus.set_read_handler(a, read_rom);
        }
    }
}

/// RamWorks 補助バンク選択（RAM > 128KiB のときのみ）
pub(crate) fn install_aux_bank_select(a2: &mut Apple2) {
    if a2.mem.ram_size > 0x20000 {
        a2.aux_bank_chain_wf = a2.bus.chain_write_handler(0xC073, write_select_aux_bank_iie);
    }
}

/// IIe のソフトスイッチ書き込み、状態読み取り、C100-CFFF 内部ROM
pub(crate) fn install_iie_handlers(a2: &mut Apple2) {
    if !a2.mem.enable_iie {
        return;
    }

    for a in 0xC000..0xC010 {
        a2.bus.set_write_handler(a, write_soft_switch_iie);
    }

    for a in 0xC011..0xC020 {
        if a < 0xC013 {
            a2.bus.set_read_handler(a, read_bsr_status_iie);
        } else {
            a2.bus.set_read_handler(a, read_soft_switch_status_iie);
        }
    }

    for a in 0xC100..0xD000 {
        a2.bus.save_slot_rom_handlers(a);
        a2.bus.set_rw_handlers(a, read_rom_low_iie, write_rom_low_iie);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::MemoryBus;

    #[test]
    fn test_ram_size_validation() {
        assert!(validate_ram_size(Model::IIPlus, 48).is_ok());
        assert!(validate_ram_size(Model::IIPlus, 64).is_ok());
        assert!(validate_ram_size(Model::II, 4).is_ok());

        let msg = validate_ram_size(Model::IIPlus, 50).unwrap_err().to_string();
        assert_eq!(msg, "Specified RAM size is not a multiple of 4.");
        let msg = validate_ram_size(Model::IIPlus, 0).unwrap_err().to_string();
        assert_eq!(msg, "Specified RAM size is too small.");
        let msg = validate_ram_size(Model::IIPlus, 52).unwrap_err().to_string();
        assert_eq!(msg, "Specified RAM size between 48KiB and 64KiB is unsupported.");
        let msg = validate_ram_size(Model::IIPlus, 128).unwrap_err().to_string();
        assert_eq!(msg, "Specified RAM size is too large.");

        for &kib in IIE_RAM_SIZES.iter() {
            assert!(validate_ram_size(Model::IIe, kib).is_ok());
        }
        assert!(validate_ram_size(Model::IIeEnhanced, 48).is_err());
        assert!(validate_ram_size(Model::IIe, 256).is_err());
    }

    #[test]
    fn test_ram_layout_flags() {
        let mem = Memory::new(Model::IIPlus, 16).unwrap();
        assert_eq!(mem.ram_present[3], true);
        assert_eq!(mem.ram_present[4], false);
        assert!(!mem.enable_lang_card);
        assert_eq!(mem.ram.len(), 0x20000);

        let mem = Memory::new(Model::IIe, 65).unwrap();
        assert_eq!(mem.ram_mask, [0xFFFF, 0x103FF]);
        assert!(mem.enable_lang_card);
        assert!(!mem.enable_full_aux_ram);

        let mem = Memory::new(Model::IIe, 3136).unwrap();
        assert_eq!(mem.ram.len(), 3136 * 1024);
        assert!(mem.enable_full_aux_ram);
    }

    #[test]
    fn test_ramworks_bank_mapping() {
        let mut mem = Memory::new(Model::IIe, 3136).unwrap();
        let cases: [(u8, u8); 10] = [
            (0x00, 0x00),
            (0x17, 0x17),
            (0x18, AUX_BANK_ABSENT),
            (0x2F, AUX_BANK_ABSENT),
            (0x30, 0x18),
            (0x37, 0x1F),
            (0x38, AUX_BANK_ABSENT),
            (0x50, 0x20),
            (0x70, 0x28),
            (0x77, 0x2F),
        ];

        for &(sel, bank) in cases.iter() {
            mem.aux_bank = sel;
            mem.recalc_aux_bank_offs();
            assert_eq!(mem.ram_cpu_offs[0], 0);
            assert_eq!(mem.ram_cpu_offs[1], (1 + bank as u32) << 16, "bank select {:02x}", sel);
        }
    }

    #[test]
    fn test_lang_card_write_enable_needs_two_reads() {
        let mut lc = LangCard::power_on();
        lc.write_enable = false;

        // C081 を1回読んだだけでは書き込み不可
        lc.access(0xC081, true);
        assert!(!lc.write_enable);
        assert!(lc.prev_a1);
        // 2回目で書き込み可
        lc.access(0xC081, true);
        assert!(lc.write_enable);
        assert!(!lc.read_enable);
        assert!(lc.bank2_select);

        // 書き込みアクセスでは prev_a1 が立たない
        let mut lc = LangCard::power_on();
        lc.write_enable = false;
        lc.access(0xC08B, false);
        lc.access(0xC08B, false);
        assert!(!lc.write_enable);
        assert!(lc.read_enable);
        assert!(!lc.bank2_select);

        // 偶数アドレスで解除
        let mut lc = LangCard::power_on();
        lc.access(0xC080, true);
        assert!(!lc.write_enable);
        assert!(lc.read_enable);
    }

    #[test]
    fn test_lang_card_two_accesses_through_bus() {
        let mut a2 = Apple2::for_test(Model::IIPlus, 64);
        a2.mem.lang_card.write_enable = false;

        a2.read(0xC083);
        assert!(!a2.mem.lang_card.write_enable);
        a2.read(0xC083);
        assert!(a2.mem.lang_card.write_enable);
        assert!(a2.mem.lang_card.read_enable);

        // bank2 に書いて読み戻す
        a2.write(0xD123, 0x5A);
        assert_eq!(a2.mem.ram[0xD123], 0x5A);
        assert_eq!(a2.read(0xD123), 0x5A);

        // bank1 は C000-CFFF に置かれる
        a2.read(0xC08B);
        a2.read(0xC08B);
        a2.write(0xD123, 0xA5);
        assert_eq!(a2.mem.ram[0xC123], 0xA5);
        assert_eq!(a2.read(0xD123), 0xA5);

        // 静的領域
        a2.write(0xE000, 0x11);
        assert_eq!(a2.mem.ram[0xE000], 0x11);
    }

    #[test]
    fn test_lang_card_peek_is_inert() {
        let mut a2 = Apple2::for_test(Model::IIPlus, 64);
        let before = a2.mem.lang_card;
        a2.peek(0xC08B);
        a2.peek(0xC08B);
        assert_eq!(a2.mem.lang_card, before);
    }

    #[test]
    fn test_soft_switch_independence() {
        let mut a2 = Apple2::for_test(Model::IIPlus, 48);
        let mut expected = 0u32;

        // 各ビットをランダムな順序で操作し、他のビットが乱れないことを確認
        let sequence: [u16; 12] = [0xC051, 0xC053, 0xC057, 0xC05B, 0xC050, 0xC05F, 0xC055, 0xC052, 0xC059, 0xC05E, 0xC054, 0xC05D];
        for &a in sequence.iter() {
            let w = ((a & 0xF) >> 1) as u32;
            a2.read(a);
            expected = (expected & !(1 << w)) | (((a & 1) as u32) << w);
            assert_eq!(a2.mem.soft_switch & 0xFF, expected, "after {:04x}", a);
        }

        // 書き込みも同じ
        for w in 0..8u16 {
            let before = a2.mem.soft_switch;
            a2.write(0xC050 + w * 2, 0);
            assert_eq!(a2.mem.soft_switch & (1 << w), 0);
            assert_eq!(a2.mem.soft_switch & !(1 << w), before & !(1 << w));
        }
    }

    #[test]
    fn test_iie_status_reads() {
        let mut a2 = Apple2::for_test(Model::IIe, 128);

        a2.write(0xC003, 0); // RAMRD on
        a2.read(0xC057); // HIRES on
        assert_eq!(a2.read(0xC013) & 0x80, 0x80);
        assert_eq!(a2.read(0xC014) & 0x80, 0x00);
        assert_eq!(a2.read(0xC01D) & 0x80, 0x80);
        a2.write(0xC002, 0);
        assert_eq!(a2.read(0xC013) & 0x80, 0x00);

        // C011 = bank2, C012 = LC read enable
        a2.read(0xC080);
        assert_eq!(a2.read(0xC011) & 0x80, 0x80);
        assert_eq!(a2.read(0xC012) & 0x80, 0x80);
        a2.read(0xC089);
        assert_eq!(a2.read(0xC011) & 0x80, 0x00);
        assert_eq!(a2.read(0xC012) & 0x80, 0x00);
    }

    #[test]
    fn test_aux_ram_priority() {
        let mut a2 = Apple2::for_test(Model::IIe, 128);
        let mem = &mut a2.mem;

        // RAMRD=main, ALTZP=aux, 80STORE+PAGE2=aux
        mem.soft_switch = ALTZP | STORE80 | PAGE2;
        assert_eq!(mem.ram_offs_iie(0x0400, false), 0x10400);
        assert_eq!(mem.ram_offs_iie(0x0100, false), 0x10100);
        assert_eq!(mem.ram_offs_iie(0x0900, false), 0x00900);

        // RAMRD=aux, ALTZP=main, 80STORE+PAGE2=main
        mem.soft_switch = RAMRD | STORE80;
        assert_eq!(mem.ram_offs_iie(0x0400, false), 0x00400);
        assert_eq!(mem.ram_offs_iie(0x0100, false), 0x00100);
        assert_eq!(mem.ram_offs_iie(0x0900, false), 0x10900);
        // 書き込みは RAMWRT
        assert_eq!(mem.ram_offs_iie(0x0900, true), 0x00900);

        // ハイレゾページは HIRES のときだけ 80STORE の対象
        mem.soft_switch = STORE80 | PAGE2;
        assert_eq!(mem.ram_offs_iie(0x2000, false), 0x02000);
        mem.soft_switch |= HIRES_MODE;
        assert_eq!(mem.ram_offs_iie(0x2000, false), 0x12000);
        assert_eq!(mem.ram_offs_iie(0x4000, false), 0x04000);
    }

    #[test]
    fn test_aux_ram_through_bus() {
        let mut a2 = Apple2::for_test(Model::IIe, 128);

        a2.write(0xC005, 0); // RAMWRT aux
        a2.write(0x0800, 0x77);
        assert_eq!(a2.mem.ram[0x10800], 0x77);
        a2.write(0xC004, 0);
        a2.write(0x0800, 0x11);
        assert_eq!(a2.mem.ram[0x00800], 0x11);

        a2.write(0xC003, 0); // RAMRD aux
        assert_eq!(a2.read(0x0800), 0x77);
        a2.write(0xC002, 0);
        assert_eq!(a2.read(0x0800), 0x11);
    }

    #[test]
    fn test_ramworks_select_through_bus() {
        let mut a2 = Apple2::for_test(Model::IIe, 320);
        a2.write(0xC005, 0);

        a2.write(0xC073, 0x02);
        assert_eq!(a2.mem.aux_bank, 0x02);
        a2.write(0x3000, 0x99);
        assert_eq!(a2.mem.ram[0x30000 + 0x3000], 0x99);

        // 存在しないバンクへの書き込みは捨てられる
        a2.write(0xC073, 0x18);
        a2.write(0x3000, 0x42);
        assert_eq!(a2.mem.ram_cpu_offs[1], 0x100 << 16);
        a2.write(0xC003, 0);
        a2.write(0xC073, 0x02);
        assert_eq!(a2.read(0x3000), 0x99);
    }

    #[test]
    fn test_iie_internal_rom_overlay() {
        let mut a2 = Apple2::for_test(Model::IIe, 128);
        a2.mem.rom[0x0300] = 0x33; // C300
        a2.mem.rom[0x0800] = 0x88; // C800

        // SLOTC3ROM=0 なので C3xx は内部ROM、INTC8ROM が立つ
        assert_eq!(a2.read(0xC300), 0x33);
        assert_ne!(a2.mem.soft_switch & INTC8ROM, 0);
        assert_eq!(a2.read(0xC800), 0x88);

        // CFFF で解除
        a2.read(0xCFFF);
        assert_eq!(a2.mem.soft_switch & INTC8ROM, 0);

        // SLOTC3ROM=1 ならスロット側（未接続）
        a2.write(0xC00B, 0);
        a2.read(0xC300);
        assert_eq!(a2.mem.soft_switch & INTC8ROM, 0);

        // INTCXROM で全域内部ROM
        a2.write(0xC007, 0);
        assert_eq!(a2.read(0xC300), 0x33);
    }

    #[test]
    fn test_peek_leaves_intc8rom_alone() {
        let mut a2 = Apple2::for_test(Model::IIe, 128);
        a2.mem.rom[0x0300] = 0x33;

        // ピークは内部ROMを読むがラッチは立てない
        assert_eq!(a2.peek(0xC300), 0x33);
        assert_eq!(a2.mem.soft_switch & INTC8ROM, 0);

        // 立っているラッチを CFFF のピークで消さない
        a2.read(0xC300);
        a2.peek(0xCFFF);
        assert_ne!(a2.mem.soft_switch & INTC8ROM, 0);
        a2.read(0xCFFF);
        assert_eq!(a2.mem.soft_switch & INTC8ROM, 0);
    }

    #[test]
    fn test_reset_clears_iie_switches() {
        let mut a2 = Apple2::for_test(Model::IIe, 128);
        a2.mem.soft_switch = TEXT_MODE | RAMRD | ALTZP | COL80;
        a2.mem.aux_bank = 5;
        a2.mem.reset();
        assert_eq!(a2.mem.soft_switch, TEXT_MODE);
        assert_eq!(a2.mem.aux_bank, 0);
        assert_eq!(a2.mem.lang_card, LangCard::power_on());
    }

    #[test]
    fn test_power_on_pattern() {
        let mut mem = Memory::new(Model::IIe, 64).unwrap();
        mem.fill_power_on_pattern();
        assert_eq!(mem.ram[0], 0xFF);
        assert_eq!(mem.ram[1], 0xFF);
        assert_eq!(mem.ram[2], 0x00);
        assert_eq!(mem.ram[0x40], 0xFF);
        assert_eq!(mem.ram[0x42], 0x00);

        let mut mem = Memory::new(Model::IIPlus, 48).unwrap();
        mem.fill_power_on_pattern();
        // j/k のビット積はほぼ0なので基本パターンが支配的
        assert!(mem.ram[..0xC000].iter().enumerate().filter(|&(i, &v)| v == if (i & 2) != 0 { 0xC6 } else { 0xBD }).count() > 0xB000);
    }
}
