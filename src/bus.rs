//! アドレスデコード
//!
//! 64K のアドレスごとに読み取り/書き込みハンドラを持つ。
//! ハンドラは `Apple2::db` を介して値をやり取りし、未接続アドレスでは
//! 直前のバス値（フローティングバス）がそのまま残る。

use crate::a2_dbg;
use crate::apple2::Apple2;
use crate::debug::DebugMask;

/// バスハンドラ（読み取り・書き込み共通）
pub type BusFn = fn(&mut Apple2, u16);

/// ハンドラテーブル
pub struct Bus {
    read_funcs: Box<[BusFn]>,
    write_funcs: Box<[BusFn]>,
    /// IIe の C100-CFFF で内部ROMに置き換えられたスロット側ハンドラ
    slot_read_funcs: Box<[BusFn]>,
    slot_write_funcs: Box<[BusFn]>,
}

impl Bus {
    pub fn new() -> Self {
        Bus {
            read_funcs: vec![read_unhandled as BusFn; 0x10000].into_boxed_slice(),
            write_funcs: vec![write_unhandled as BusFn; 0x10000].into_boxed_slice(),
            slot_read_funcs: vec![read_unhandled as BusFn; 0x1000].into_boxed_slice(),
            slot_write_funcs: vec![write_unhandled as BusFn; 0x1000].into_boxed_slice(),
        }
    }

    /// すべてのアドレスを未接続に戻す
    pub fn clear(&mut self) {
        self.read_funcs.iter_mut().for_each(|f| *f = read_unhandled);
        self.write_funcs.iter_mut().for_each(|f| *f = write_unhandled);
        self.slot_read_funcs.iter_mut().for_each(|f| *f = read_unhandled);
        self.slot_write_funcs.iter_mut().for_each(|f| *f = write_unhandled);
    }

    #[inline]
    pub fn set_read_handler(&mut self, a: u16, f: BusFn) {
        self.read_funcs[a as usize] = f;
    }

    #[inline]
    pub fn set_write_handler(&mut self, a: u16, f: BusFn) {
        self.write_funcs[a as usize] = f;
    }

    #[inline]
    pub fn set_rw_handlers(&mut self, a: u16, read: BusFn, write: BusFn) {
        self.set_read_handler(a, read);
        self.set_write_handler(a, write);
    }

    /// 書き込みハンドラを差し替え、元のハンドラを返す
    pub fn chain_write_handler(&mut self, a: u16, f: BusFn) -> BusFn {
        std::mem::replace(&mut self.write_funcs[a as usize], f)
    }

    #[inline]
    pub fn read_handler(&self, a: u16) -> BusFn {
        self.read_funcs[a as usize]
    }

    #[inline]
    pub fn write_handler(&self, a: u16) -> BusFn {
        self.write_funcs[a as usize]
    }

    /// 現在のハンドラをスロットROMテーブルへ退避する（C100-CFFF）
    pub fn save_slot_rom_handlers(&mut self, a: u16) {
        let i = (a & 0xFFF) as usize;
        self.slot_read_funcs[i] = self.read_funcs[a as usize];
        self.slot_write_funcs[i] = self.write_funcs[a as usize];
    }

    #[inline]
    pub fn slot_rom_read(&self, a: u16) -> BusFn {
        self.slot_read_funcs[(a & 0xFFF) as usize]
    }

    #[inline]
    pub fn slot_rom_write(&self, a: u16) -> BusFn {
        self.slot_write_funcs[(a & 0xFFF) as usize]
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// 未接続アドレスの読み取り: バス値は変化しない
pub(crate) fn read_unhandled(a2: &mut Apple2, a: u16) {
    if !a2.junk_read && !a2.in_peek {
        a2_dbg!(
            a2.dbg,
            DebugMask::UNK_READ,
            "[UNK] Unknown read from 0x{:04x}, PC=0x{:04x}",
            a,
            a2.cpu.regs.pc
        );
    }
    a2.tick1_unless_peek();
}

/// 未接続アドレスへの書き込み
pub(crate) fn write_unhandled(a2: &mut Apple2, a: u16) {
    a2_dbg!(
        a2.dbg,
        DebugMask::UNK_WRITE,
        "[UNK] Unknown write to 0x{:04x}(@=0x{:02x}), PC=0x{:04x}",
        a,
        a2.db,
        a2.cpu.regs.pc
    );
    a2.cpu_tick1();
}
