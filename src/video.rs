//! ビデオタイミング
//!
//! 描画はしない。ラスタ位置のカウンタを進め、毎サイクル表示用RAMを読んで
//! データバスに載せる（フローティングバス）。表示ラインごとに読んだバイト列を
//! `VideoSink` へ渡す。
//!
//! 1ライン = 65サイクル（HCounter 0x00, 0x40-0x7F）。HCounter が0に戻るサイクルは
//! マスタークロックで2 tick 長い。VCounter は 0xFA-0x1FF を回る（262ライン）。

use crate::apple2::Apple2;
use crate::memory::softswitch::{AN3, COL80, HIRES_MODE, MIX_MODE, PAGE2, STORE80, TEXT_MODE, VERTBLANK};
use crate::savestate::VideoState;

/// 表示ラインの本数
pub const VISIBLE_LINES: u32 = 192;
/// 1ラインあたりの表示バイト数
pub const LINE_BYTES: usize = 40;

const H_VISIBLE_START: u32 = 0x58;
const V_WRAP: u32 = 0xFA;
const V_FRAME_DONE: u32 = 0x1C0;
const V_PARTIAL_DONE: u32 = 0x13D;

/// II/II+ の点滅周期（マスター tick）
const FLASH_ON_PERIOD: i32 = 3_286_338;
const FLASH_OFF_PERIOD: i32 = 3_274_425;

bitflags::bitflags! {
    /// 表示バイトごとのモード
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct LineMode: u8 {
        const HIRES      = 0x01;
        const TEXT       = 0x02;
        /// 1サイクル前がテキスト（IIe のモード切り替え遅延）
        const TEXT_PREV  = 0x04;
        const COL80      = 0x08;
        const AN3        = 0x10;
        /// 拡張80桁カードなしで AN3=0（ダブル解像度不可）
        const FORCE_TEXT = 0x20;
    }
}

/// 1ライン分の取得データ
#[derive(Debug, Clone)]
pub struct ScanLine {
    pub main: [u8; LINE_BYTES],
    /// IIe の補助メモリ側（II/II+ では0）
    pub aux: [u8; LINE_BYTES],
    pub mode: [LineMode; LINE_BYTES],
    /// II/II+ の点滅状態
    pub flash: bool,
    /// Video-7 RGB モード
    pub v7_rgb_mode: u8,
}

impl Default for ScanLine {
    fn default() -> Self {
        ScanLine {
            main: [0; LINE_BYTES],
            aux: [0; LINE_BYTES],
            mode: [LineMode::empty(); LINE_BYTES],
            flash: false,
            v7_rgb_mode: 3,
        }
    }
}

/// 表示ラインの受け取り側（フロントエンドが実装する）
pub trait VideoSink {
    /// `line` は 0-191
    fn scanline(&mut self, line: u32, data: &ScanLine);
}

pub struct Video {
    pub h_counter: u32,
    pub v_counter: u32,
    pub flash: bool,
    pub flash_counter: i32,
    /// IIe: 直前に読んだ値
    pub vid_db: u8,
    /// IIe: テキスト判定の履歴（bit0 = 直前のサイクル）
    pub text_delay: u8,
    /// IIe: フレームカウンタ（キーリピートのクロック）
    pub fcounter: u32,
    line: ScanLine,
}

impl Default for Video {
    fn default() -> Self {
        Self::new()
    }
}

impl Video {
    pub fn new() -> Self {
        let mut video = Video {
            h_counter: 0,
            v_counter: 0,
            flash: false,
            flash_counter: 0,
            vid_db: 0,
            text_delay: 0,
            fcounter: 0,
            line: ScanLine::default(),
        };
        video.power();
        video
    }

    pub fn power(&mut self) {
        self.h_counter = 0;
        self.v_counter = V_WRAP;
        self.flash = false;
        self.flash_counter = 0;
        self.vid_db = 0;
        self.text_delay = 0;
        self.fcounter = 0;
        self.line = ScanLine::default();
    }

    pub fn save_state(&self) -> VideoState {
        VideoState {
            h_counter: self.h_counter,
            v_counter: self.v_counter,
            flash: self.flash,
            flash_counter: self.flash_counter,
            vid_db: self.vid_db,
            text_delay: self.text_delay,
            fcounter: self.fcounter,
        }
    }

    pub fn load_state(&mut self, st: &VideoState) {
        self.h_counter = st.h_counter & 0x7F;
        self.v_counter = st.v_counter & 0x1FF;
        self.flash = st.flash;
        self.flash_counter = st.flash_counter;
        self.vid_db = st.vid_db;
        self.text_delay = st.text_delay;
        self.fcounter = st.fcounter;
    }

    /// 直近に取得したライン
    pub fn current_line(&self) -> &ScanLine {
        &self.line
    }
}

/// 表示アドレスのうちラスタ位置で決まる部分
#[inline]
fn base_address(h: u32, v: u32) -> usize {
    (((0x68 + (h & 0x3F) + ((v >> 3) & 0x18) + ((v >> 1) & 0x60)) & 0x7F) + (((v >> 3) & 0x7) << 7)) as usize
}

#[inline]
fn text_active(ss: u32, v: u32) -> bool {
    (ss & TEXT_MODE) != 0 || ((ss & MIX_MODE) != 0 && (v & 0xFF) >= 160)
}

/// CPU の1サイクルごとに呼ぶ
pub(crate) fn tick(a2: &mut Apple2) {
    if a2.mem.enable_iie {
        tick_iie(a2);
    } else {
        tick_ii(a2);
    }
}

fn tick_ii(a2: &mut Apple2) {
    let ss = a2.mem.soft_switch;
    let h = a2.video.h_counter;
    let v = a2.video.v_counter;

    a2.video.flash_counter -= 14;

    let text = text_active(ss, v);
    let hires = (ss & HIRES_MODE) != 0;
    let mut ram_addr = base_address(h, v);

    if text || !hires {
        ram_addr |= ((h < H_VISIBLE_START) as usize) << 12;
        ram_addr |= if (ss & PAGE2) != 0 { 0x800 } else { 0x400 };
    } else {
        ram_addr |= ((v & 0x7) << 10) as usize;
        ram_addr |= if (ss & PAGE2) != 0 { 0x4000 } else { 0x2000 };
    }

    if a2.mem.ram_present[ram_addr >> 12] {
        a2.db = a2.mem.ram[ram_addr];
    }

    if h >= H_VISIBLE_START {
        let col = (h - H_VISIBLE_START) as usize;
        let mut mode = LineMode::AN3;
        mode.set(LineMode::HIRES, hires);
        mode.set(LineMode::TEXT, text);

        let line = &mut a2.video.line;
        line.main[col] = a2.db;
        line.aux[col] = 0;
        line.mode[col] = mode;
    }

    if advance_counters(a2) {
        a2.video.flash_counter -= 2;
    }

    if a2.video.flash_counter <= 0 {
        let video = &mut a2.video;
        video.flash = !video.flash;
        video.flash_counter += if video.flash { FLASH_ON_PERIOD } else { FLASH_OFF_PERIOD };
    }
}

fn tick_iie(a2: &mut Apple2) {
    let ss = a2.mem.soft_switch;
    let h = a2.video.h_counter;
    let v = a2.video.v_counter;

    let text = text_active(ss, v);
    let hires = (ss & HIRES_MODE) != 0;
    let page2 = (ss & (PAGE2 | STORE80)) == PAGE2;
    let force_text = a2.mem.enable_full_aux_ram && (ss & AN3) == 0;
    let mut ram_addr = base_address(h, v);

    if (a2.video.text_delay & 0x1) != 0 || !hires {
        ram_addr |= 0x400 << page2 as usize;
    } else {
        ram_addr |= ((v & 0x7) << 10) as usize;
        ram_addr |= 0x2000 << page2 as usize;
    }

    let aux_offs = (((1 << 16) + ram_addr) as u32 & a2.mem.ram_mask[1]) as usize;
    if aux_offs < a2.mem.ram_size as usize {
        a2.video.vid_db = a2.mem.ram[aux_offs];
    }
    let aux_data = a2.video.vid_db;

    a2.db = a2.mem.ram[ram_addr];
    a2.video.vid_db = a2.db;

    if h >= H_VISIBLE_START {
        let col = (h - H_VISIBLE_START) as usize;
        let td = a2.video.text_delay;
        let mut mode = LineMode::empty();
        mode.set(LineMode::HIRES, hires);
        mode.set(LineMode::TEXT, (td & 0x1) != 0);
        mode.set(LineMode::TEXT_PREV, (td & 0x2) != 0);
        mode.set(LineMode::COL80, (ss & COL80) != 0);
        mode.set(LineMode::AN3, (ss & AN3) != 0);
        mode.set(LineMode::FORCE_TEXT, force_text);

        let line = &mut a2.video.line;
        line.main[col] = a2.db;
        line.aux[col] = aux_data;
        line.mode[col] = mode;
    }

    advance_counters(a2);

    let video = &mut a2.video;
    video.text_delay = (video.text_delay << 1) | text as u8;
}

/// HCounter/VCounter を進める。ライン末尾の長いサイクルなら true
fn advance_counters(a2: &mut Apple2) -> bool {
    let iie = a2.mem.enable_iie;
    let video = &mut a2.video;

    video.h_counter = ((video.h_counter | 0x40) + (video.h_counter >> 6)) & 0x7F;

    if video.h_counter == 0 {
        a2.timestamp += 2;

        video.v_counter = (video.v_counter + 1) & 0x1FF;
        if video.v_counter == 0 {
            video.v_counter = V_WRAP;

            if iie {
                video.fcounter = video.fcounter.wrapping_add(1);
                if (video.fcounter & 0xF) == 0x8 {
                    a2.kbio.clock_repeat_delay();
                } else if (video.fcounter & 0x3) == 0x3 {
                    a2.kbio.clock_repeat();
                }
            }
        }

        if iie {
            let v = video.v_counter;
            a2.mem.soft_switch &= !VERTBLANK;
            if ((v & (v >> 1)) & 0x40) == 0 {
                a2.mem.soft_switch |= VERTBLANK;
            }
        }
        return true;
    }

    if video.h_counter == 0x40 {
        let v = video.v_counter;
        let vis = (v.wrapping_sub(1)) ^ 0x100;

        if vis < VISIBLE_LINES {
            video.line.flash = video.flash;
            video.line.v7_rgb_mode = a2.mem.v7_rgb_mode;
            if let Some(sink) = a2.video_sink.as_mut() {
                sink.scanline(vis, &video.line);
            }
        }

        if v == V_FRAME_DONE {
            a2.frame_partial_done = true;
            a2.frame_done = true;
        } else if v == V_PARTIAL_DONE {
            a2.frame_partial_done = true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Model;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// 受け取ったライン番号と先頭バイトを記録する
    struct Recorder(Rc<RefCell<Vec<(u32, u8, LineMode)>>>);

    impl VideoSink for Recorder {
        fn scanline(&mut self, line: u32, data: &ScanLine) {
            self.0.borrow_mut().push((line, data.main[0], data.mode[0]));
        }
    }

    fn run_until_frame_done(a2: &mut Apple2) -> u32 {
        a2.frame_done = false;
        let mut cycles = 0;
        while !a2.frame_done {
            a2.cpu_tick0();
            a2.cpu_tick1();
            cycles += 1;
        }
        cycles
    }

    #[test]
    fn test_counter_sequence() {
        let mut a2 = Apple2::for_test(Model::IIPlus, 48);
        let mut seen = Vec::new();
        for _ in 0..65 {
            seen.push(a2.video.h_counter);
            tick(&mut a2);
        }
        assert_eq!(seen[0], 0x00);
        assert_eq!(seen[1], 0x40);
        assert_eq!(seen[64], 0x7F);
        assert_eq!(a2.video.h_counter, 0);
        assert_eq!(a2.video.v_counter, V_WRAP + 1);
    }

    #[test]
    fn test_frame_length() {
        let mut a2 = Apple2::for_test(Model::IIPlus, 48);
        run_until_frame_done(&mut a2);

        // 2フレーム目以降は 262 ライン × 65 サイクル
        let ts0 = a2.timestamp;
        let cycles = run_until_frame_done(&mut a2);
        assert_eq!(cycles, 262 * 65);
        assert_eq!(a2.timestamp - ts0, 262 * (65 * 14 + 2));
    }

    #[test]
    fn test_scanlines_reach_sink() {
        let mut a2 = Apple2::for_test(Model::IIPlus, 48);
        let lines = Rc::new(RefCell::new(Vec::new()));
        a2.set_video_sink(Box::new(Recorder(lines.clone())));

        // テキストページ1の先頭に目印
        a2.mem.ram[0x400] = 0xC1;
        a2.mem.soft_switch |= TEXT_MODE;
        run_until_frame_done(&mut a2);
        lines.borrow_mut().clear();
        run_until_frame_done(&mut a2);

        let lines = lines.borrow();
        assert_eq!(lines.len(), VISIBLE_LINES as usize);
        assert!(lines.iter().enumerate().all(|(i, l)| l.0 == i as u32));
        assert_eq!(lines[0].1, 0xC1);
        assert!(lines[0].2.contains(LineMode::TEXT));
        assert!(lines[0].2.contains(LineMode::AN3));
    }

    #[test]
    fn test_floating_bus_reads_hires_page() {
        let mut a2 = Apple2::for_test(Model::IIPlus, 48);
        a2.mem.ram[0x2000..0x4000].iter_mut().for_each(|b| *b = 0x2A);
        a2.mem.ram[0x4000..0x6000].iter_mut().for_each(|b| *b = 0x4B);
        a2.mem.soft_switch = HIRES_MODE;

        // 表示期間中のライン
        a2.video.v_counter = 0x110;
        a2.video.h_counter = 0x60;
        tick(&mut a2);
        assert_eq!(a2.db, 0x2A);

        a2.mem.soft_switch |= PAGE2;
        tick(&mut a2);
        assert_eq!(a2.db, 0x4B);

        // 混在モードの下4行はテキスト
        a2.mem.soft_switch = HIRES_MODE | MIX_MODE;
        a2.mem.ram[0x400..0xC00].iter_mut().for_each(|b| *b = 0x77);
        a2.video.v_counter = 0x100 + 170;
        a2.video.h_counter = 0x60;
        tick(&mut a2);
        assert_eq!(a2.db, 0x77);
    }

    #[test]
    fn test_iie_vertical_blank_flag() {
        let mut a2 = Apple2::for_test(Model::IIe, 128);
        let mut vbl_lines = 0u32;
        for _ in 0..262 {
            for _ in 0..65 {
                tick(&mut a2);
            }
            if (a2.mem.soft_switch & VERTBLANK) != 0 {
                vbl_lines += 1;
            }
        }
        // C019 の D7 と同じく表示期間中だけ立つ
        assert_eq!(vbl_lines, VISIBLE_LINES);
    }

    #[test]
    fn test_iie_text_delay_and_aux_fetch() {
        let mut a2 = Apple2::for_test(Model::IIe, 128);
        a2.mem.soft_switch = TEXT_MODE | COL80 | AN3;
        a2.mem.ram[0x10400..0x10800].iter_mut().for_each(|b| *b = 0x11);
        a2.mem.ram[0x00400..0x00800].iter_mut().for_each(|b| *b = 0x22);

        a2.video.v_counter = 0x100;
        a2.video.h_counter = 0x58;
        tick(&mut a2);
        tick(&mut a2);
        assert_eq!(a2.db, 0x22);
        assert_eq!(a2.video.text_delay & 0x3, 0x3);

        let line = a2.video.current_line();
        assert_eq!(line.aux[1], 0x11);
        assert_eq!(line.main[1], 0x22);
        assert!(line.mode[1].contains(LineMode::TEXT | LineMode::COL80 | LineMode::AN3));
        assert!(!line.mode[1].contains(LineMode::FORCE_TEXT));
    }

    #[test]
    fn test_flash_toggles() {
        let mut a2 = Apple2::for_test(Model::IIPlus, 48);
        let start = a2.video.flash;
        tick(&mut a2);
        assert_ne!(a2.video.flash, start);
        assert!(a2.video.flash_counter > 3_000_000);
    }

    #[test]
    fn test_state_masks_counters() {
        let mut video = Video::new();
        let mut st = video.save_state();
        st.h_counter = 0x1FF;
        st.v_counter = 0xFFFF;
        video.load_state(&st);
        assert_eq!(video.h_counter, 0x7F);
        assert_eq!(video.v_counter, 0x1FF);
    }
}
