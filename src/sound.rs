//! スピーカー（1bit）
//!
//! C030 へのアクセスで出力レベルが反転する。反転したマスタークロック時刻を
//! 期間ごとに記録し、期間の終わりに `AudioSink` へまとめて渡す。
//! 波形の合成やリサンプリングはフロントエンド側の仕事。

use crate::apple2::Apple2;
use crate::savestate::SpeakerState;

/// スピーカー出力の受け取り側（ブロックしてはいけない）
pub trait AudioSink {
    /// `start_level` は期間開始時のレベル、`toggles` は期間内で反転した時刻、
    /// `length` は期間の長さ（いずれもマスター tick）
    fn period(&mut self, start_level: bool, toggles: &[i32], length: i32);
}

#[derive(Debug, Default)]
pub struct Speaker {
    pub level: bool,
    start_level: bool,
    toggles: Vec<i32>,
}

impl Speaker {
    pub fn new() -> Self {
        Speaker::default()
    }

    pub fn power(&mut self) {
        self.level = false;
        self.start_level = false;
        self.toggles.clear();
    }

    pub fn toggle(&mut self, timestamp: i32) {
        self.level = !self.level;
        self.toggles.push(timestamp);
    }

    /// 今の期間で記録された反転時刻
    pub fn toggles(&self) -> &[i32] {
        &self.toggles
    }

    /// 期間開始時のレベル
    pub fn start_level(&self) -> bool {
        self.start_level
    }

    /// 期間を閉じる
    pub fn end_period(&mut self) {
        self.toggles.clear();
        self.start_level = self.level;
    }

    pub fn save_state(&self) -> SpeakerState {
        SpeakerState { level: self.level }
    }

    pub fn load_state(&mut self, st: &SpeakerState) {
        self.level = st.level;
        self.start_level = st.level;
        self.toggles.clear();
    }
}

/// C030-C03F（読み書き共通）
fn rw_speaker(a2: &mut Apple2, _a: u16) {
    if !a2.in_peek {
        a2.speaker.toggle(a2.timestamp);
        a2.cpu_tick1();
    }
}

pub(crate) fn install_handlers(a2: &mut Apple2) {
    for a in 0xC030..0xC040 {
        a2.bus.set_rw_handlers(a, rw_speaker, rw_speaker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Model;
    use crate::cpu::MemoryBus;

    #[derive(Default)]
    struct Collect {
        periods: Vec<(bool, Vec<i32>, i32)>,
    }

    impl AudioSink for Collect {
        fn period(&mut self, start_level: bool, toggles: &[i32], length: i32) {
            self.periods.push((start_level, toggles.to_vec(), length));
        }
    }

    #[test]
    fn test_toggle_records_timestamp() {
        let mut a2 = Apple2::for_test(Model::IIPlus, 48);
        a2.read(0xC030);
        let t0 = a2.speaker.toggles()[0];
        a2.write(0xC03F, 0);
        let t1 = a2.speaker.toggles()[1];
        assert!(!a2.speaker.level);
        assert_eq!(t1 - t0, 14);

        // ピークでは反転しない
        a2.peek(0xC030);
        assert_eq!(a2.speaker.toggles().len(), 2);
    }

    #[test]
    fn test_period_reaches_sink() {
        let mut a2 = Apple2::for_test(Model::IIPlus, 48);
        let mut sink = Collect::default();
        a2.speaker.toggle(100);
        a2.speaker.toggle(120);
        a2.speaker.toggle(300);
        sink.period(a2.speaker.start_level(), a2.speaker.toggles(), 1000);
        a2.speaker.end_period();

        assert_eq!(sink.periods[0], (false, vec![100, 120, 300], 1000));
        assert!(a2.speaker.start_level());
        assert!(a2.speaker.toggles().is_empty());
    }
}
