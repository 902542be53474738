//! オペコードの実装
//!
//! NMOS 6502 の全256オペコード（非公式命令・KILを含む）。
//! オペコードは `OPCODE_TABLE` で（命令, アドレッシングモード）に分解してから実行する。

use super::addressing::AddressingMode;
use super::{flags, Cpu, Jam, MemoryBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    // 公式命令
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
    // 非公式命令
    Alr, Anc, Arr, Dcp, Isc, Kil, Las, Lax, Lxa, Rla, Rra, Sax, Sbx, Sha,
    Shx, Shy, Slo, Sre, Tas, Xaa,
}

use AddressingMode::{
    Absolute as ABS, AbsoluteX as ABX, AbsoluteY as ABY, Accumulator as ACC, Immediate as IMM,
    Implied as IMP, Indirect as IND, IndirectX as IZX, IndirectY as IZY, Relative as REL,
    ZeroPage as ZP, ZeroPageX as ZPX, ZeroPageY as ZPY,
};
use Op::*;

#[rustfmt::skip]
static OPCODE_TABLE: [(Op, AddressingMode); 256] = [
    // 0x00
    (Brk, IMP), (Ora, IZX), (Kil, IMP), (Slo, IZX), (Nop, ZP),  (Ora, ZP),  (Asl, ZP),  (Slo, ZP),
    (Php, IMP), (Ora, IMM), (Asl, ACC), (Anc, IMM), (Nop, ABS), (Ora, ABS), (Asl, ABS), (Slo, ABS),
    // 0x10
    (Bpl, REL), (Ora, IZY), (Kil, IMP), (Slo, IZY), (Nop, ZPX), (Ora, ZPX), (Asl, ZPX), (Slo, ZPX),
    (Clc, IMP), (Ora, ABY), (Nop, IMP), (Slo, ABY), (Nop, ABX), (Ora, ABX), (Asl, ABX), (Slo, ABX),
    // 0x20
    (Jsr, ABS), (And, IZX), (Kil, IMP), (Rla, IZX), (Bit, ZP),  (And, ZP),  (Rol, ZP),  (Rla, ZP),
    (Plp, IMP), (And, IMM), (Rol, ACC), (Anc, IMM), (Bit, ABS), (And, ABS), (Rol, ABS), (Rla, ABS),
    // 0x30
    (Bmi, REL), (And, IZY), (Kil, IMP), (Rla, IZY), (Nop, ZPX), (And, ZPX), (Rol, ZPX), (Rla, ZPX),
    (Sec, IMP), (And, ABY), (Nop, IMP), (Rla, ABY), (Nop, ABX), (And, ABX), (Rol, ABX), (Rla, ABX),
    // 0x40
    (Rti, IMP), (Eor, IZX), (Kil, IMP), (Sre, IZX), (Nop, ZP),  (Eor, ZP),  (Lsr, ZP),  (Sre, ZP),
    (Pha, IMP), (Eor, IMM), (Lsr, ACC), (Alr, IMM), (Jmp, ABS), (Eor, ABS), (Lsr, ABS), (Sre, ABS),
    // 0x50
    (Bvc, REL), (Eor, IZY), (Kil, IMP), (Sre, IZY), (Nop, ZPX), (Eor, ZPX), (Lsr, ZPX), (Sre, ZPX),
    (Cli, IMP), (Eor, ABY), (Nop, IMP), (Sre, ABY), (Nop, ABX), (Eor, ABX), (Lsr, ABX), (Sre, ABX),
    // 0x60
    (Rts, IMP), (Adc, IZX), (Kil, IMP), (Rra, IZX), (Nop, ZP),  (Adc, ZP),  (Ror, ZP),  (Rra, ZP),
    (Pla, IMP), (Adc, IMM), (Ror, ACC), (Arr, IMM), (Jmp, IND), (Adc, ABS), (Ror, ABS), (Rra, ABS),
    // 0x70
    (Bvs, REL), (Adc, IZY), (Kil, IMP), (Rra, IZY), (Nop, ZPX), (Adc, ZPX), (Ror, ZPX), (Rra, ZPX),
    (Sei, IMP), (Adc, ABY), (Nop, IMP), (Rra, ABY), (Nop, ABX), (Adc, ABX), (Ror, ABX), (Rra, ABX),
    // 0x80
    (Nop, IMM), (Sta, IZX), (Nop, IMM), (Sax, IZX), (Sty, ZP),  (Sta, ZP),  (Stx, ZP),  (Sax, ZP),
    (Dey, IMP), (Nop, IMM), (Txa, IMP), (Xaa, IMM), (Sty, ABS), (Sta, ABS), (Stx, ABS), (Sax, ABS),
    // 0x90
    (Bcc, REL), (Sta, IZY), (Kil, IMP), (Sha, IZY), (Sty, ZPX), (Sta, ZPX), (Stx, ZPY), (Sax, ZPY),
    (Tya, IMP), (Sta, ABY), (Txs, IMP), (Tas, ABY), (Shy, ABX), (Sta, ABX), (Shx, ABY), (Sha, ABY),
    // 0xA0
    (Ldy, IMM), (Lda, IZX), (Ldx, IMM), (Lax, IZX), (Ldy, ZP),  (Lda, ZP),  (Ldx, ZP),  (Lax, ZP),
    (Tay, IMP), (Lda, IMM), (Tax, IMP), (Lxa, IMM), (Ldy, ABS), (Lda, ABS), (Ldx, ABS), (Lax, ABS),
    // 0xB0
    (Bcs, REL), (Lda, IZY), (Kil, IMP), (Lax, IZY), (Ldy, ZPX), (Lda, ZPX), (Ldx, ZPY), (Lax, ZPY),
    (Clv, IMP), (Lda, ABY), (Tsx, IMP), (Las, ABY), (Ldy, ABX), (Lda, ABX), (Ldx, ABY), (Lax, ABY),
    // 0xC0
    (Cpy, IMM), (Cmp, IZX), (Nop, IMM), (Dcp, IZX), (Cpy, ZP),  (Cmp, ZP),  (Dec, ZP),  (Dcp, ZP),
    (Iny, IMP), (Cmp, IMM), (Dex, IMP), (Sbx, IMM), (Cpy, ABS), (Cmp, ABS), (Dec, ABS), (Dcp, ABS),
    // 0xD0
    (Bne, REL), (Cmp, IZY), (Kil, IMP), (Dcp, IZY), (Nop, ZPX), (Cmp, ZPX), (Dec, ZPX), (Dcp, ZPX),
    (Cld, IMP), (Cmp, ABY), (Nop, IMP), (Dcp, ABY), (Nop, ABX), (Cmp, ABX), (Dec, ABX), (Dcp, ABX),
    // 0xE0
    (Cpx, IMM), (Sbc, IZX), (Nop, IMM), (Isc, IZX), (Cpx, ZP),  (Sbc, ZP),  (Inc, ZP),  (Isc, ZP),
    (Inx, IMP), (Sbc, IMM), (Nop, IMP), (Sbc, IMM), (Cpx, ABS), (Sbc, ABS), (Inc, ABS), (Isc, ABS),
    // 0xF0
    (Beq, REL), (Sbc, IZY), (Kil, IMP), (Isc, IZY), (Nop, ZPX), (Sbc, ZPX), (Inc, ZPX), (Isc, ZPX),
    (Sed, IMP), (Sbc, ABY), (Nop, IMP), (Isc, ABY), (Nop, ABX), (Sbc, ABX), (Inc, ABX), (Isc, ABX),
];

/// 不安定命令（XAA/LXA）の定数
const MAGIC: u8 = 0xEE;

impl Cpu {
    pub(super) fn execute_opcode<M: MemoryBus>(&mut self, memory: &mut M, opcode: u8) -> Result<(), Jam> {
        let (op, mode) = OPCODE_TABLE[opcode as usize];

        match op {
            //--------------------------------------------------
            // ロード・演算（読み取り系）
            //--------------------------------------------------
            Lda => {
                self.regs.a = self.read_operand(memory, mode);
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Ldx => {
                self.regs.x = self.read_operand(memory, mode);
                self.regs.update_zero_negative_flags(self.regs.x);
            }
            Ldy => {
                self.regs.y = self.read_operand(memory, mode);
                self.regs.update_zero_negative_flags(self.regs.y);
            }
            Lax => {
                let v = self.read_operand(memory, mode);
                self.regs.a = v;
                self.regs.x = v;
                self.regs.update_zero_negative_flags(v);
            }
            And => {
                self.regs.a &= self.read_operand(memory, mode);
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Ora => {
                self.regs.a |= self.read_operand(memory, mode);
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Eor => {
                self.regs.a ^= self.read_operand(memory, mode);
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Adc => {
                let v = self.read_operand(memory, mode);
                self.adc(v);
            }
            Sbc => {
                let v = self.read_operand(memory, mode);
                self.sbc(v);
            }
            Cmp => {
                let v = self.read_operand(memory, mode);
                self.compare(self.regs.a, v);
            }
            Cpx => {
                let v = self.read_operand(memory, mode);
                self.compare(self.regs.x, v);
            }
            Cpy => {
                let v = self.read_operand(memory, mode);
                self.compare(self.regs.y, v);
            }
            Bit => {
                let v = self.read_operand(memory, mode);
                self.regs.set_flag(flags::ZERO, (self.regs.a & v) == 0);
                self.regs.set_flag(flags::OVERFLOW, (v & 0x40) != 0);
                self.regs.set_flag(flags::NEGATIVE, (v & 0x80) != 0);
            }
            Nop => {
                if mode == IMP {
                    self.implied_cycle(memory);
                } else {
                    self.read_operand(memory, mode);
                }
            }
            Anc => {
                self.regs.a &= self.read_operand(memory, mode);
                self.regs.update_zero_negative_flags(self.regs.a);
                self.regs.set_flag(flags::CARRY, (self.regs.a & 0x80) != 0);
            }
            Alr => {
                let v = self.regs.a & self.read_operand(memory, mode);
                self.regs.set_flag(flags::CARRY, (v & 0x01) != 0);
                self.regs.a = v >> 1;
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Arr => {
                let v = self.read_operand(memory, mode);
                self.arr(v);
            }
            Xaa => {
                let v = self.read_operand(memory, mode);
                self.regs.a = (self.regs.a | MAGIC) & self.regs.x & v;
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Lxa => {
                let v = self.read_operand(memory, mode);
                self.regs.a = (self.regs.a | MAGIC) & v;
                self.regs.x = self.regs.a;
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Sbx => {
                let v = self.read_operand(memory, mode);
                let ax = self.regs.a & self.regs.x;
                self.regs.set_flag(flags::CARRY, ax >= v);
                self.regs.x = ax.wrapping_sub(v);
                self.regs.update_zero_negative_flags(self.regs.x);
            }
            Las => {
                let v = self.read_operand(memory, mode) & self.regs.sp;
                self.regs.a = v;
                self.regs.x = v;
                self.regs.sp = v;
                self.regs.update_zero_negative_flags(v);
            }

            //--------------------------------------------------
            // ストア
            //--------------------------------------------------
            Sta => {
                let addr = self.effective_addr(memory, mode, true);
                self.write(memory, addr, self.regs.a);
            }
            Stx => {
                let addr = self.effective_addr(memory, mode, true);
                self.write(memory, addr, self.regs.x);
            }
            Sty => {
                let addr = self.effective_addr(memory, mode, true);
                self.write(memory, addr, self.regs.y);
            }
            Sax => {
                let addr = self.effective_addr(memory, mode, true);
                self.write(memory, addr, self.regs.a & self.regs.x);
            }
            Sha => {
                let index = self.regs.y;
                self.store_high_and(memory, mode, index, self.regs.a & self.regs.x);
            }
            Shx => {
                let index = self.regs.y;
                self.store_high_and(memory, mode, index, self.regs.x);
            }
            Shy => {
                let index = self.regs.x;
                self.store_high_and(memory, mode, index, self.regs.y);
            }
            Tas => {
                self.regs.sp = self.regs.a & self.regs.x;
                let index = self.regs.y;
                self.store_high_and(memory, mode, index, self.regs.sp);
            }

            //--------------------------------------------------
            // リードモディファイライト
            //--------------------------------------------------
            Asl => {
                self.read_modify_write(memory, mode, Cpu::asl);
            }
            Lsr => {
                self.read_modify_write(memory, mode, Cpu::lsr);
            }
            Rol => {
                self.read_modify_write(memory, mode, Cpu::rol);
            }
            Ror => {
                self.read_modify_write(memory, mode, Cpu::ror);
            }
            Inc => {
                self.read_modify_write(memory, mode, |cpu, v| {
                    let r = v.wrapping_add(1);
                    cpu.regs.update_zero_negative_flags(r);
                    r
                });
            }
            Dec => {
                self.read_modify_write(memory, mode, |cpu, v| {
                    let r = v.wrapping_sub(1);
                    cpu.regs.update_zero_negative_flags(r);
                    r
                });
            }
            Slo => {
                let r = self.read_modify_write(memory, mode, Cpu::asl);
                self.regs.a |= r;
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Rla => {
                let r = self.read_modify_write(memory, mode, Cpu::rol);
                self.regs.a &= r;
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Sre => {
                let r = self.read_modify_write(memory, mode, Cpu::lsr);
                self.regs.a ^= r;
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Rra => {
                let r = self.read_modify_write(memory, mode, Cpu::ror);
                self.adc(r);
            }
            Dcp => {
                let r = self.read_modify_write(memory, mode, |_, v| v.wrapping_sub(1));
                self.compare(self.regs.a, r);
            }
            Isc => {
                let r = self.read_modify_write(memory, mode, |_, v| v.wrapping_add(1));
                self.sbc(r);
            }

            //--------------------------------------------------
            // レジスタ転送・フラグ操作
            //--------------------------------------------------
            Tax | Tay | Txa | Tya | Tsx | Txs | Inx | Iny | Dex | Dey | Clc | Sec | Cli | Sei | Cld
            | Sed | Clv => {
                self.implied_cycle(memory);
                self.implied_op(op);
            }

            //--------------------------------------------------
            // スタック
            //--------------------------------------------------
            Pha => {
                self.implied_cycle(memory);
                self.push_byte(memory, self.regs.a);
            }
            Php => {
                self.implied_cycle(memory);
                self.push_byte(memory, self.regs.status | flags::BREAK | flags::UNUSED);
            }
            Pla => {
                self.implied_cycle(memory);
                self.read_junk(memory, 0x0100 | self.regs.sp as u16);
                self.regs.a = self.pop_byte(memory);
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Plp => {
                self.implied_cycle(memory);
                self.read_junk(memory, 0x0100 | self.regs.sp as u16);
                let p = self.pop_byte(memory);
                self.set_status_from_stack(p);
            }

            //--------------------------------------------------
            // 分岐・ジャンプ
            //--------------------------------------------------
            Bpl => self.branch(memory, !self.regs.get_flag(flags::NEGATIVE)),
            Bmi => self.branch(memory, self.regs.get_flag(flags::NEGATIVE)),
            Bvc => self.branch(memory, !self.regs.get_flag(flags::OVERFLOW)),
            Bvs => self.branch(memory, self.regs.get_flag(flags::OVERFLOW)),
            Bcc => self.branch(memory, !self.regs.get_flag(flags::CARRY)),
            Bcs => self.branch(memory, self.regs.get_flag(flags::CARRY)),
            Bne => self.branch(memory, !self.regs.get_flag(flags::ZERO)),
            Beq => self.branch(memory, self.regs.get_flag(flags::ZERO)),
            Jmp => {
                self.regs.pc = self.effective_addr(memory, mode, false);
            }
            Jsr => {
                let low = self.fetch_byte(memory) as u16;
                self.read_junk(memory, 0x0100 | self.regs.sp as u16);
                let ret = self.regs.pc;
                self.push_byte(memory, (ret >> 8) as u8);
                self.push_byte(memory, ret as u8);
                let high = self.fetch_byte(memory) as u16;
                self.regs.pc = (high << 8) | low;
            }
            Rts => {
                self.implied_cycle(memory);
                self.read_junk(memory, 0x0100 | self.regs.sp as u16);
                let low = self.pop_byte(memory) as u16;
                let high = self.pop_byte(memory) as u16;
                self.regs.pc = (high << 8) | low;
                self.read_junk(memory, self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            Rti => {
                self.implied_cycle(memory);
                self.read_junk(memory, 0x0100 | self.regs.sp as u16);
                let p = self.pop_byte(memory);
                self.set_status_from_stack(p);
                let low = self.pop_byte(memory) as u16;
                let high = self.pop_byte(memory) as u16;
                self.regs.pc = (high << 8) | low;
            }
            Brk => {
                self.fetch_byte(memory);
                let ret = self.regs.pc;
                self.push_byte(memory, (ret >> 8) as u8);
                self.push_byte(memory, ret as u8);
                self.push_byte(memory, self.regs.status | flags::BREAK | flags::UNUSED);
                self.regs.set_flag(flags::IRQ_DISABLE, true);
                let low = self.read(memory, 0xFFFE) as u16;
                let high = self.read(memory, 0xFFFF) as u16;
                self.regs.pc = (high << 8) | low;
            }

            Kil => {
                self.regs.pc = self.regs.pc.wrapping_sub(1);
                return Err(Jam {
                    opcode,
                    pc: self.regs.pc,
                });
            }
        }

        Ok(())
    }

    fn implied_op(&mut self, op: Op) {
        match op {
            Tax => {
                self.regs.x = self.regs.a;
                self.regs.update_zero_negative_flags(self.regs.x);
            }
            Tay => {
                self.regs.y = self.regs.a;
                self.regs.update_zero_negative_flags(self.regs.y);
            }
            Txa => {
                self.regs.a = self.regs.x;
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Tya => {
                self.regs.a = self.regs.y;
                self.regs.update_zero_negative_flags(self.regs.a);
            }
            Tsx => {
                self.regs.x = self.regs.sp;
                self.regs.update_zero_negative_flags(self.regs.x);
            }
            Txs => self.regs.sp = self.regs.x,
            Inx => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.regs.update_zero_negative_flags(self.regs.x);
            }
            Iny => {
                self.regs.y = self.regs.y.wrapping_add(1);
                self.regs.update_zero_negative_flags(self.regs.y);
            }
            Dex => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.regs.update_zero_negative_flags(self.regs.x);
            }
            Dey => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.regs.update_zero_negative_flags(self.regs.y);
            }
            Clc => self.regs.set_flag(flags::CARRY, false),
            Sec => self.regs.set_flag(flags::CARRY, true),
            Cli => self.regs.set_flag(flags::IRQ_DISABLE, false),
            Sei => self.regs.set_flag(flags::IRQ_DISABLE, true),
            Cld => self.regs.set_flag(flags::DECIMAL, false),
            Sed => self.regs.set_flag(flags::DECIMAL, true),
            Clv => self.regs.set_flag(flags::OVERFLOW, false),
            _ => {}
        }
    }

    fn set_status_from_stack(&mut self, p: u8) {
        self.regs.status = (p & !flags::BREAK) | flags::UNUSED;
    }

    fn branch<M: MemoryBus>(&mut self, memory: &mut M, taken: bool) {
        let offset = self.fetch_byte(memory) as i8;
        if !taken {
            return;
        }

        self.read_junk(memory, self.regs.pc);
        let target = self.regs.pc.wrapping_add(offset as i16 as u16);
        if (target & 0xFF00) != (self.regs.pc & 0xFF00) {
            self.read_junk(memory, (self.regs.pc & 0xFF00) | (target & 0x00FF));
        }
        self.regs.pc = target;
    }

    /// RMW: 読み取り → 元の値のダミーライト → 結果の書き込み
    fn read_modify_write<M: MemoryBus>(
        &mut self,
        memory: &mut M,
        mode: AddressingMode,
        f: impl FnOnce(&mut Cpu, u8) -> u8,
    ) -> u8 {
        if mode == ACC {
            self.implied_cycle(memory);
            let r = f(self, self.regs.a);
            self.regs.a = r;
            return r;
        }

        let addr = self.effective_addr(memory, mode, true);
        let v = self.read(memory, addr);
        self.write(memory, addr, v);
        let r = f(self, v);
        self.write(memory, addr, r);
        r
    }

    /// SHA/SHX/SHY/TAS: 値 & (ベース上位+1) を書き込む。ページ跨ぎ時は上位アドレスも化ける。
    fn store_high_and<M: MemoryBus>(&mut self, memory: &mut M, mode: AddressingMode, index: u8, value: u8) {
        let addr = self.effective_addr(memory, mode, true);
        let base = addr.wrapping_sub(index as u16);
        let v = value & ((base >> 8) as u8).wrapping_add(1);
        let addr = if (base ^ addr) & 0xFF00 != 0 {
            ((v as u16) << 8) | (addr & 0x00FF)
        } else {
            addr
        };
        self.write(memory, addr, v);
    }

    //--------------------------------------------------
    // ALU
    //--------------------------------------------------

    fn asl(&mut self, v: u8) -> u8 {
        self.regs.set_flag(flags::CARRY, (v & 0x80) != 0);
        let r = v << 1;
        self.regs.update_zero_negative_flags(r);
        r
    }

    fn lsr(&mut self, v: u8) -> u8 {
        self.regs.set_flag(flags::CARRY, (v & 0x01) != 0);
        let r = v >> 1;
        self.regs.update_zero_negative_flags(r);
        r
    }

    fn rol(&mut self, v: u8) -> u8 {
        let c = self.regs.get_flag(flags::CARRY) as u8;
        self.regs.set_flag(flags::CARRY, (v & 0x80) != 0);
        let r = (v << 1) | c;
        self.regs.update_zero_negative_flags(r);
        r
    }

    fn ror(&mut self, v: u8) -> u8 {
        let c = self.regs.get_flag(flags::CARRY) as u8;
        self.regs.set_flag(flags::CARRY, (v & 0x01) != 0);
        let r = (v >> 1) | (c << 7);
        self.regs.update_zero_negative_flags(r);
        r
    }

    fn compare(&mut self, reg: u8, v: u8) {
        self.regs.set_flag(flags::CARRY, reg >= v);
        self.regs.update_zero_negative_flags(reg.wrapping_sub(v));
    }

    /// ADC（NMOS: BCDモードのN/V/Zは補正前の値から決まる）
    fn adc(&mut self, v: u8) {
        let a = self.regs.a;
        let c = self.regs.get_flag(flags::CARRY) as u16;
        let binary = a as u16 + v as u16 + c;

        if !self.regs.get_flag(flags::DECIMAL) {
            let r = binary as u8;
            self.regs.set_flag(flags::CARRY, binary > 0xFF);
            self.regs.set_flag(flags::OVERFLOW, (!(a ^ v) & (a ^ r) & 0x80) != 0);
            self.regs.update_zero_negative_flags(r);
            self.regs.a = r;
            return;
        }

        let mut low = (a & 0x0F) as u16 + (v & 0x0F) as u16 + c;
        if low >= 0x0A {
            low = ((low + 0x06) & 0x0F) + 0x10;
        }
        let mut r = (a & 0xF0) as u16 + (v & 0xF0) as u16 + low;

        self.regs.set_flag(flags::ZERO, (binary & 0xFF) == 0);
        self.regs.set_flag(flags::NEGATIVE, (r & 0x80) != 0);
        self.regs.set_flag(flags::OVERFLOW, (!(a ^ v) & (a ^ r as u8) & 0x80) != 0);

        if r >= 0xA0 {
            r += 0x60;
        }
        self.regs.set_flag(flags::CARRY, r >= 0x100);
        self.regs.a = r as u8;
    }

    /// SBC（NMOS: フラグはすべて2進演算の結果から決まる）
    fn sbc(&mut self, v: u8) {
        let a = self.regs.a;
        let c = self.regs.get_flag(flags::CARRY) as i16;
        let binary = a as i16 - v as i16 - (1 - c);
        let r = binary as u8;

        self.regs.set_flag(flags::CARRY, binary >= 0);
        self.regs.set_flag(flags::OVERFLOW, ((a ^ v) & (a ^ r) & 0x80) != 0);
        self.regs.update_zero_negative_flags(r);

        if !self.regs.get_flag(flags::DECIMAL) {
            self.regs.a = r;
            return;
        }

        let mut low = (a & 0x0F) as i16 - (v & 0x0F) as i16 + c - 1;
        if low < 0 {
            low = ((low - 0x06) & 0x0F) - 0x10;
        }
        let mut d = (a & 0xF0) as i16 - (v & 0xF0) as i16 + low;
        if d < 0 {
            d -= 0x60;
        }
        self.regs.a = d as u8;
    }

    fn arr(&mut self, v: u8) {
        let t = self.regs.a & v;
        let c = self.regs.get_flag(flags::CARRY) as u8;
        let mut r = (t >> 1) | (c << 7);

        if !self.regs.get_flag(flags::DECIMAL) {
            self.regs.update_zero_negative_flags(r);
            self.regs.set_flag(flags::CARRY, (r & 0x40) != 0);
            self.regs.set_flag(flags::OVERFLOW, (((r >> 6) ^ (r >> 5)) & 1) != 0);
            self.regs.a = r;
            return;
        }

        self.regs.set_flag(flags::NEGATIVE, c != 0);
        self.regs.set_flag(flags::ZERO, r == 0);
        self.regs.set_flag(flags::OVERFLOW, ((t ^ r) & 0x40) != 0);
        if (t & 0x0F) + (t & 0x01) > 5 {
            r = (r & 0xF0) | (r.wrapping_add(6) & 0x0F);
        }
        let carry = (t & 0xF0) as u16 + (t & 0x10) as u16 > 0x50;
        self.regs.set_flag(flags::CARRY, carry);
        if carry {
            r = r.wrapping_add(0x60);
        }
        self.regs.a = r;
    }
}
