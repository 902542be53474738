//! トラックエンコーダ
//!
//! データビット列を磁化レベル列としてトラックへ書き込む。
//! '1' ごとに磁化を反転させ、反転がない '0' はそのままのレベルを続ける。

use super::{nibble, Track, MAX_BITS_PER_TRACK, MIN_BITS_PER_TRACK};

pub struct TrackEncoder<'a> {
    track: &'a mut Track,
    angle: u32,
    cur_mflux: bool,
}

impl<'a> TrackEncoder<'a> {
    pub fn new(track: &'a mut Track, num_bits: u32) -> Self {
        debug_assert!((MIN_BITS_PER_TRACK..=MAX_BITS_PER_TRACK).contains(&num_bits));
        track.length = num_bits;
        TrackEncoder {
            track,
            angle: 0,
            cur_mflux: false,
        }
    }

    /// 終了処理（ちょうど一周していること）
    pub fn finish(self) {
        debug_assert_eq!(self.angle, 0, "track encoding did not end at the index");
        self.track.flux_fudge = self.cur_mflux;
    }

    #[inline]
    pub fn encode_bit(&mut self, b: bool) {
        if b {
            self.cur_mflux = !self.cur_mflux;
        }

        self.track.set_bit(self.angle as usize, self.cur_mflux);
        self.angle += 1;
        if self.angle == self.track.length {
            self.angle = 0;
        }
    }

    /// MSB から
    pub fn encode_byte(&mut self, v: u8) {
        for i in (0..8).rev() {
            self.encode_bit((v >> i) & 1 != 0);
        }
    }

    /// 4-and-4 エンコード
    pub fn encode_oddeven(&mut self, v: u8) {
        self.encode_byte(0xAA | ((v >> 1) & 0x55));
        self.encode_byte(0xAA | (v & 0x55));
    }

    /// セルフシンク（16セクタは10ビット、13セクタは9ビット）
    pub fn encode_selfsync(&mut self, dos33: bool) {
        let bits = if dos33 { 10 } else { 9 };
        for i in 0..bits {
            self.encode_bit(i < 8);
        }
    }

    pub fn encode_gap1(&mut self, dos33: bool, count: usize) {
        for _ in 0..count {
            self.encode_selfsync(dos33);
        }
    }

    pub fn encode_address_field(&mut self, dos33: bool, volume: u8, track: u8, sector: u8) {
        self.encode_byte(0xFF);
        self.encode_byte(0xD5);
        self.encode_byte(0xAA);
        self.encode_byte(if dos33 { 0x96 } else { 0xB5 });

        self.encode_oddeven(volume);
        self.encode_oddeven(track);
        self.encode_oddeven(sector);
        self.encode_oddeven(volume ^ track ^ sector);

        self.encode_byte(0xDE);
        self.encode_byte(0xAA);
        self.encode_byte(0xEB);
    }

    pub fn encode_data_field(&mut self, dos33: bool, user_data: &[u8; 256]) {
        self.encode_byte(0xD5);
        self.encode_byte(0xAA);
        self.encode_byte(0xAD);

        if dos33 {
            self.encode_bit(false);
            for nib in nibble::encode_62(user_data).iter() {
                self.encode_byte(*nib);
            }
        } else {
            for nib in nibble::encode_53(user_data).iter() {
                self.encode_byte(*nib);
            }
        }

        self.encode_byte(0xDE);
        self.encode_byte(0xAA);
        self.encode_byte(0xEB);
    }

    /// 1セクタ分（アドレスフィールド、ギャップ2、データフィールド、ギャップ3）
    pub fn encode_sector(&mut self, dos33: bool, volume: u8, track: u8, sector: u8, user_data: &[u8; 256]) {
        self.encode_address_field(dos33, volume, track, sector);

        if dos33 {
            for _ in 0..6 {
                self.encode_selfsync(true);
            }
            self.encode_byte(0xFF);
            self.encode_bit(false);

            self.encode_data_field(true, user_data);

            for _ in 0..18 {
                self.encode_selfsync(true);
            }
        } else {
            for _ in 0..14 {
                self.encode_selfsync(false);
            }

            self.encode_data_field(false, user_data);

            for _ in 0..28 {
                self.encode_selfsync(false);
            }
        }
    }
}
