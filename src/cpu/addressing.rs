//! アドレッシングモード
//!
//! 実効アドレス計算で発生するダミーアクセスもすべてバスに出す。
//! インデックス付きモードは、読み取り命令ではページ跨ぎ時のみ、
//! 書き込み・リードモディファイライト命令では常に1回ダミーリードが入る。

use super::{Cpu, MemoryBus};

/// アドレッシングモードの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// 暗黙的
    Implied,
    /// アキュムレータ
    Accumulator,
    /// 即値 - #$nn
    Immediate,
    /// ゼロページ - $nn
    ZeroPage,
    /// ゼロページ,X - $nn,X
    ZeroPageX,
    /// ゼロページ,Y - $nn,Y
    ZeroPageY,
    /// 絶対 - $nnnn
    Absolute,
    /// 絶対,X - $nnnn,X
    AbsoluteX,
    /// 絶対,Y - $nnnn,Y
    AbsoluteY,
    /// 間接 - ($nnnn)（JMPのみ）
    Indirect,
    /// 間接,X - ($nn,X)
    IndirectX,
    /// 間接,Y - ($nn),Y
    IndirectY,
    /// 相対（ブランチ命令用）
    Relative,
}

impl Cpu {
    /// 実効アドレスを計算する
    ///
    /// `always_fixup` が true のとき（ストア・RMW）、インデックス付きモードで
    /// ページ跨ぎの有無に関係なく修正前アドレスへのダミーリードを行う。
    pub(super) fn effective_addr<M: MemoryBus>(
        &mut self,
        memory: &mut M,
        mode: AddressingMode,
        always_fixup: bool,
    ) -> u16 {
        match mode {
            AddressingMode::ZeroPage => self.fetch_byte(memory) as u16,
            AddressingMode::ZeroPageX => {
                let base = self.fetch_byte(memory);
                self.read_junk(memory, base as u16);
                base.wrapping_add(self.regs.x) as u16
            }
            AddressingMode::ZeroPageY => {
                let base = self.fetch_byte(memory);
                self.read_junk(memory, base as u16);
                base.wrapping_add(self.regs.y) as u16
            }
            AddressingMode::Absolute => {
                let low = self.fetch_byte(memory) as u16;
                let high = self.fetch_byte(memory) as u16;
                (high << 8) | low
            }
            AddressingMode::AbsoluteX => {
                let low = self.fetch_byte(memory) as u16;
                let high = self.fetch_byte(memory) as u16;
                self.indexed(memory, (high << 8) | low, self.regs.x, always_fixup)
            }
            AddressingMode::AbsoluteY => {
                let low = self.fetch_byte(memory) as u16;
                let high = self.fetch_byte(memory) as u16;
                self.indexed(memory, (high << 8) | low, self.regs.y, always_fixup)
            }
            AddressingMode::IndirectX => {
                let zp = self.fetch_byte(memory);
                self.read_junk(memory, zp as u16);
                let ptr = zp.wrapping_add(self.regs.x);
                let low = self.read(memory, ptr as u16) as u16;
                let high = self.read(memory, ptr.wrapping_add(1) as u16) as u16;
                (high << 8) | low
            }
            AddressingMode::IndirectY => {
                let zp = self.fetch_byte(memory);
                let low = self.read(memory, zp as u16) as u16;
                let high = self.read(memory, zp.wrapping_add(1) as u16) as u16;
                self.indexed(memory, (high << 8) | low, self.regs.y, always_fixup)
            }
            AddressingMode::Indirect => {
                let low = self.fetch_byte(memory) as u16;
                let high = self.fetch_byte(memory) as u16;
                let ptr = (high << 8) | low;
                // ページ境界バグ: 上位バイトは同じページから読む
                let target_low = self.read(memory, ptr) as u16;
                let target_high = self.read(memory, (ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF)) as u16;
                (target_high << 8) | target_low
            }
            AddressingMode::Immediate => {
                let addr = self.regs.pc;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                addr
            }
            AddressingMode::Implied | AddressingMode::Accumulator | AddressingMode::Relative => {
                unreachable!("no effective address for {:?}", mode)
            }
        }
    }

    fn indexed<M: MemoryBus>(&mut self, memory: &mut M, base: u16, index: u8, always_fixup: bool) -> u16 {
        let addr = base.wrapping_add(index as u16);
        if always_fixup || (addr & 0xFF00) != (base & 0xFF00) {
            self.read_junk(memory, (base & 0xFF00) | (addr & 0x00FF));
        }
        addr
    }

    /// 読み取り命令のオペランドを取得
    pub(super) fn read_operand<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode) -> u8 {
        let addr = self.effective_addr(memory, mode, false);
        self.read(memory, addr)
    }

    /// 暗黙的命令の2サイクル目（次のオペコードのダミーリード）
    pub(super) fn implied_cycle<M: MemoryBus>(&mut self, memory: &mut M) {
        self.read_junk(memory, self.regs.pc);
    }
}
