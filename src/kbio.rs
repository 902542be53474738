//! キーボードとゲームI/O
//!
//! ホスト側の入力は `InputSource` からフレームごとに1回まとめて受け取る。
//! キーは ASCII（0x00-0x7F）で渡され、ラッチの bit7 がストローブになる。

use crate::apple2::Apple2;
use crate::savestate::KbState;

/// パドルタイマーの1単位あたりのCPUサイクル
pub const PADDLE_CYCLES_PER_UNIT: u64 = 11;

/// 1回のポーリングで得る入力
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputState {
    /// 新しく押されたキー
    pub key: Option<u8>,
    /// 何かのキーが押されたまま
    pub key_held: bool,
    /// Ctrl+Reset
    pub reset_held: bool,
    /// PB0-PB2（IIe では Open/Solid Apple が PB0/PB1）
    pub buttons: [bool; 3],
    /// PDL0-PDL3（0-255）
    pub paddles: [u8; 4],
}

/// 入力の供給元（フロントエンドが実装する。ブロックしてはいけない）
pub trait InputSource {
    fn poll(&mut self) -> InputState;
}

pub struct KbIo {
    /// bit7 = ストローブ
    pub latch: u8,
    pub key_held: bool,
    /// IIe のオートリピート
    pub auto_repeat: bool,
    repeat_stage: u8,
    pub buttons: [bool; 3],
    pub paddles: [u8; 4],
    /// C07x に触れた時点のアクセス数
    pub paddle_trigger: u64,
}

impl Default for KbIo {
    fn default() -> Self {
        Self::new()
    }
}

impl KbIo {
    pub fn new() -> Self {
        KbIo {
            latch: 0,
            key_held: false,
            auto_repeat: true,
            repeat_stage: 0,
            buttons: [false; 3],
            paddles: [0x80; 4],
            paddle_trigger: 0,
        }
    }

    pub fn power(&mut self) {
        self.latch = 0;
        self.key_held = false;
        self.repeat_stage = 0;
        self.paddle_trigger = 0;
    }

    /// 入力を取り込む。Reset が押されていれば true
    pub fn update_input(&mut self, st: &InputState) -> bool {
        if let Some(key) = st.key {
            self.latch = (key & 0x7F) | 0x80;
            self.repeat_stage = 0;
        }

        self.key_held = st.key_held || st.key.is_some();
        if !self.key_held {
            self.repeat_stage = 0;
        }

        self.buttons = st.buttons;
        self.paddles = st.paddles;
        st.reset_held
    }

    /// 16フレームごと: 押しっぱなしの経過を数える
    pub fn clock_repeat_delay(&mut self) {
        if self.key_held && self.repeat_stage < 2 {
            self.repeat_stage += 1;
        }
    }

    /// 4フレームごと: 遅延を過ぎていればストローブを立て直す
    pub fn clock_repeat(&mut self) {
        if self.auto_repeat && self.key_held && self.repeat_stage >= 2 {
            self.latch |= 0x80;
        }
    }

    /// パドルのタイマーがまだ動いているか
    pub fn paddle_active(&self, index: usize, access_counter: u64) -> bool {
        let end = self.paddle_trigger + self.paddles[index] as u64 * PADDLE_CYCLES_PER_UNIT;
        access_counter < end
    }

    pub fn save_state(&self) -> KbState {
        KbState {
            latch: self.latch,
            key_held: self.key_held,
            repeat_stage: self.repeat_stage,
            buttons: self.buttons,
            paddles: self.paddles,
            paddle_trigger: self.paddle_trigger,
        }
    }

    pub fn load_state(&mut self, st: &KbState) {
        self.latch = st.latch;
        self.key_held = st.key_held;
        self.repeat_stage = st.repeat_stage.min(2);
        self.buttons = st.buttons;
        self.paddles = st.paddles;
        self.paddle_trigger = st.paddle_trigger;
    }
}

//--------------------------------------------------
// バスハンドラ
//--------------------------------------------------

/// C000-C00F 読み取り
fn read_keyboard(a2: &mut Apple2, _a: u16) {
    a2.db = a2.kbio.latch;
    a2.tick1_unless_peek();
}

/// C010-C01F 読み取り（ストローブ解除）
fn read_clear_strobe(a2: &mut Apple2, _a: u16) {
    if a2.mem.enable_iie {
        a2.db = ((a2.kbio.key_held as u8) << 7) | (a2.kbio.latch & 0x7F);
    }

    if !a2.in_peek {
        a2.kbio.latch &= 0x7F;
        a2.cpu_tick1();
    }
}

/// C010-C01F 書き込み
fn write_clear_strobe(a2: &mut Apple2, _a: u16) {
    a2.kbio.latch &= 0x7F;
    a2.cpu_tick1();
}

/// IIe の C011-C01F 読み取りの共通部分（D0-6 にキーラッチ）
pub(crate) fn read_c011_c01f_iie(a2: &mut Apple2) {
    a2.db = (a2.db & 0x80) | (a2.kbio.latch & 0x7F);
    a2.tick1_unless_peek();
}

/// C061-C063（C069-C06B）: ボタン
fn read_button(a2: &mut Apple2, a: u16) {
    let index = ((a & 0x7) - 1) as usize;
    let bit = a2.kbio.buttons[index] as u8;
    a2.db = (a2.db & 0x7F) | (bit << 7);
    a2.tick1_unless_peek();
}

/// C064-C067（C06C-C06F）: パドルタイマー
fn read_paddle(a2: &mut Apple2, a: u16) {
    let index = ((a & 0x7) - 4) as usize;
    let bit = a2.kbio.paddle_active(index, a2.access_counter) as u8;
    a2.db = (a2.db & 0x7F) | (bit << 7);
    a2.tick1_unless_peek();
}

/// C070-C07F: パドルタイマー起動
fn rw_paddle_trigger(a2: &mut Apple2, _a: u16) {
    if !a2.in_peek {
        a2.kbio.paddle_trigger = a2.access_counter;
        a2.cpu_tick1();
    }
}

pub(crate) fn install_handlers(a2: &mut Apple2) {
    for a in 0xC000..0xC010 {
        a2.bus.set_read_handler(a, read_keyboard);
    }
    for a in 0xC010..0xC020 {
        a2.bus.set_rw_handlers(a, read_clear_strobe, write_clear_strobe);
    }

    for a in 0xC061..0xC070u16 {
        match a & 0x7 {
            1..=3 => a2.bus.set_read_handler(a, read_button),
            4..=7 => a2.bus.set_read_handler(a, read_paddle),
            _ => {}
        }
    }
    for a in 0xC070..0xC080 {
        a2.bus.set_rw_handlers(a, rw_paddle_trigger, rw_paddle_trigger);
    }
}
