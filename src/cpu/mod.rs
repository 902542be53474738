//! MOS 6502 (NMOS) CPU
//!
//! Apple II/II+/IIe で使用される 6502 の実装。
//! 1サイクル = 1バスアクセス（ダミーリード・ダミーライトを含む）となるように
//! 実装しているので、バス側のクロックは命令ではなくアクセス単位で進む。
//! KIL 系オペコードを実行すると CPU はジャムし、`step` が `Err(Jam)` を返す。

mod addressing;
mod opcodes;

pub use addressing::AddressingMode;

use serde::{Deserialize, Serialize};

/// CPUのステータスレジスタのフラグビット
pub mod flags {
    pub const CARRY: u8 = 0b0000_0001;      // C: キャリーフラグ
    pub const ZERO: u8 = 0b0000_0010;       // Z: ゼロフラグ
    pub const IRQ_DISABLE: u8 = 0b0000_0100; // I: 割り込み禁止フラグ
    pub const DECIMAL: u8 = 0b0000_1000;    // D: BCDモードフラグ
    pub const BREAK: u8 = 0b0001_0000;      // B: ブレークフラグ
    pub const UNUSED: u8 = 0b0010_0000;     // 未使用（常に1）
    pub const OVERFLOW: u8 = 0b0100_0000;   // V: オーバーフローフラグ
    pub const NEGATIVE: u8 = 0b1000_0000;   // N: 負数フラグ
}

/// CPUレジスタの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub status: u8,
}

impl Default for Registers {
    fn default() -> Self {
        Registers {
            a: 0,
            x: 0,
            y: 0,
            sp: 0,
            pc: 0,
            status: flags::UNUSED | flags::IRQ_DISABLE,
        }
    }
}

impl Registers {
    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    pub fn get_flag(&self, flag: u8) -> bool {
        (self.status & flag) != 0
    }

    /// ゼロフラグと負数フラグを値に基づいて更新
    pub fn update_zero_negative_flags(&mut self, value: u8) {
        self.set_flag(flags::ZERO, value == 0);
        self.set_flag(flags::NEGATIVE, (value & 0x80) != 0);
    }
}

/// メモリバスインターフェース
///
/// CPU はすべてのサイクルでこのトレイトを1回だけ呼ぶ。
pub trait MemoryBus {
    /// 1バイト読み取り
    fn read(&mut self, address: u16) -> u8;
    /// 1バイト書き込み
    fn write(&mut self, address: u16, value: u8);
    /// 結果を使わないダミーリード（未接続アドレスの警告を抑止するため区別する）
    fn read_junk(&mut self, address: u16) -> u8 {
        self.read(address)
    }
}

/// KIL オペコードによる CPU ジャム
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jam {
    pub opcode: u8,
    /// ジャムしたオペコードのアドレス
    pub pc: u16,
}

/// 6502 CPU
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    pub regs: Registers,
    /// 累積サイクル数（= バスアクセス数）
    pub total_cycles: u64,
    /// 現在の命令で消費したサイクル
    pub cycles: u32,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu::default()
    }

    /// 電源投入
    pub fn power(&mut self) {
        self.regs = Registers::default();
        self.total_cycles = 0;
        self.cycles = 0;
    }

    /// リセットシーケンス（7サイクル、スタックへは書き込まない）
    pub fn reset<M: MemoryBus>(&mut self, memory: &mut M) {
        self.cycles = 0;

        self.read_junk(memory, self.regs.pc);
        self.read_junk(memory, self.regs.pc);
        for _ in 0..3 {
            self.read_junk(memory, 0x0100 | self.regs.sp as u16);
            self.regs.sp = self.regs.sp.wrapping_sub(1);
        }
        self.regs.set_flag(flags::IRQ_DISABLE, true);

        let low = self.read(memory, 0xFFFC) as u16;
        let high = self.read(memory, 0xFFFD) as u16;
        self.regs.pc = (high << 8) | low;

        self.total_cycles += self.cycles as u64;
    }

    /// 1命令を実行し、消費したサイクル数を返す
    pub fn step<M: MemoryBus>(&mut self, memory: &mut M) -> Result<u32, Jam> {
        self.cycles = 0;

        let opcode = self.fetch_byte(memory);
        let result = self.execute_opcode(memory, opcode);

        self.total_cycles += self.cycles as u64;
        result.map(|_| self.cycles)
    }

    //--------------------------------------------------
    // バスアクセス（1回 = 1サイクル）
    //--------------------------------------------------

    #[inline]
    fn read<M: MemoryBus>(&mut self, memory: &mut M, address: u16) -> u8 {
        self.cycles += 1;
        memory.read(address)
    }

    #[inline]
    fn read_junk<M: MemoryBus>(&mut self, memory: &mut M, address: u16) {
        self.cycles += 1;
        memory.read_junk(address);
    }

    #[inline]
    fn write<M: MemoryBus>(&mut self, memory: &mut M, address: u16, value: u8) {
        self.cycles += 1;
        memory.write(address, value);
    }

    /// PCから1バイトフェッチしてPCをインクリメント
    fn fetch_byte<M: MemoryBus>(&mut self, memory: &mut M) -> u8 {
        let value = self.read(memory, self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    fn push_byte<M: MemoryBus>(&mut self, memory: &mut M, value: u8) {
        self.write(memory, 0x0100 | self.regs.sp as u16, value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    fn pop_byte<M: MemoryBus>(&mut self, memory: &mut M) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        self.read(memory, 0x0100 | self.regs.sp as u16)
    }
}
