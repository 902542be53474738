//! Apple II Disk II インターフェースカード
//!
//! 磁束レベル単位で動くコントローラ。CPU サイクルごとに2回 `tick2m` が呼ばれ、
//! 1ビットセル = 8 tick。シーケンサROM（P6）の出力でデータレジスタを更新する。
//!
//! スロット6: C0E0-C0EF がラッチ、C600-C6FF がブートROM。

use crate::a2_dbg;
use crate::apple2::Apple2;
use crate::debug::DebugMask;
use crate::error::{A2Error, Result};
use crate::floppy::{FloppyDisk, MAX_BITS_PER_TRACK, NUM_TRACKS};
use crate::savestate::{Disk2State, DiskImageState, DriveState};

/// モーターオフ後に回り続ける tick 数
pub const MOTOR_OFF_DELAY: u32 = 2_040_968;

/// ステッパー位置の範囲（上位8ビットが内部トラック番号）
pub const STEPPER_MIN: u32 = 0x0080_0000;
pub const STEPPER_MAX: u32 = (((NUM_TRACKS - 1) as u32) << 24) | 0x0080_0000;

/// 弱いビットを合成するまでの「反転なし」期間（tick）
const WEAK_BIT_MASK: u64 = 0x000F_FFFF_FFFF_FFFF;

/// デバッガ向けレジスタ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disk2Register {
    StepPhase,
    MotorOn,
    DriveSelect,
    /// Q6/Q7（bit0 = Q6, bit1 = Q7）
    Mode,
}

/// ドライブ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloppyDrive {
    /// 挿入中のディスク（`Disk2InterfaceCard::disks` のインデックス）。None はダミーディスク
    pub inserted: Option<usize>,
    /// 直近の磁束レベル履歴（1 tick 1ビット）
    pub m_history: u64,
    pub delay_flux_change: u8,
    /// 0x00800000 = 内部トラック0、1内部トラック = 1 << 24
    pub stepper_position: u32,
}

impl Default for FloppyDrive {
    fn default() -> Self {
        FloppyDrive {
            inserted: None,
            m_history: 0,
            delay_flux_change: 0,
            stepper_position: STEPPER_MIN,
        }
    }
}

impl FloppyDrive {
    #[inline]
    pub fn track_index(&self) -> usize {
        (self.stepper_position >> 24) as usize
    }

    #[inline]
    fn clamp_stepper_position(&mut self) {
        self.stepper_position = self.stepper_position.clamp(STEPPER_MIN, STEPPER_MAX);
    }
}

/// 7ビット符号拡張
#[inline]
fn sext7(v: i32) -> i32 {
    (v << 25) >> 25
}

/// ステッパーの移動量テーブル [位相パターン][角度(1/128周)]
fn build_stepper_lut() -> Box<[[i16; 128]; 16]> {
    let mut lut = Box::new([[0i16; 128]; 16]);

    for (phase_control, row) in lut.iter_mut().enumerate() {
        for (angle, out) in row.iter_mut().enumerate() {
            let mut delta: i32 = 0;

            for pci in 0..4 {
                // +8 は最寄りの内部トラックへの丸め
                let t = sext7((pci * 32 + 8) - angle as i32);

                if (phase_control & (1 << pci)) != 0 && t.abs() <= 40 {
                    let dt = (32 - (t.abs() - 20).abs()) * 512;
                    delta += if t <= 0 { -dt } else { dt };
                }
            }

            debug_assert!((-32768..=32767).contains(&delta));
            *out = delta as i16;
        }
    }

    lut
}

/// シーケンサROMのアドレス並べ替え
///
/// 内部インデックス: A0-A3 = シーケンス、A4-A5 = Q6/Q7、A6 = 磁束反転なし、A7 = データレジスタ bit7
#[inline]
fn seq_rom_source_index(a: usize) -> usize {
    let seq = a & 0x0F;
    let lm = (a >> 4) & 0x3;
    let fc = (a >> 6) & 0x1;
    let dr7 = (a >> 7) & 0x1;

    ((seq >> 1) & 1) | (dr7 << 1) | (lm << 2) | (fc << 4) | ((seq & 1) << 5) | (((seq >> 2) & 1) << 6) | (((seq >> 3) & 1) << 7)
}

/// トラック長が変わったときの回転位置の換算
#[inline]
pub fn rescale_angle(angle: u32, old_len: u32, new_len: u32) -> u32 {
    (angle as u64 * new_len as u64 / old_len as u64) as u32
}

pub struct Disk2InterfaceCard {
    pub enabled: bool,
    boot_rom: [u8; 256],
    /// 並べ替え済み
    seq_rom: [u8; 256],

    pub latch_stepper: u8,
    /// Q4
    pub latch_motor_on: bool,
    /// Q5
    pub latch_drive_select: bool,
    /// Q6/Q7 を bit4/bit5 に持つ
    pub latch_mode: u8,

    pub lcg_state: u32,
    pub motoroff_delay_counter: u32,
    pub data_reg: u8,
    pub sequence: u8,

    stepper_lut: Box<[[i16; 128]; 16]>,
    pub drives: [FloppyDrive; 2],
    /// 読み込まれたディスク（挿入されていないものも含む）
    pub disks: Vec<FloppyDisk>,
    dummy_disk: FloppyDisk,
}

impl Default for Disk2InterfaceCard {
    fn default() -> Self {
        Self::new()
    }
}

impl Disk2InterfaceCard {
    pub fn new() -> Self {
        Disk2InterfaceCard {
            enabled: false,
            boot_rom: [0; 256],
            seq_rom: [0; 256],
            latch_stepper: 0,
            latch_motor_on: false,
            latch_drive_select: false,
            latch_mode: 0,
            lcg_state: 0,
            motoroff_delay_counter: 0,
            data_reg: 0,
            sequence: 0,
            stepper_lut: build_stepper_lut(),
            drives: [FloppyDrive::default(); 2],
            disks: Vec::new(),
            dummy_disk: FloppyDisk::new(),
        }
    }

    pub fn set_boot_rom(&mut self, src: &[u8; 256]) {
        self.boot_rom = *src;
    }

    /// P6 ROM のダンプを内部の並びに変換して設定
    pub fn set_seq_rom(&mut self, src: &[u8; 256]) {
        for (a, out) in self.seq_rom.iter_mut().enumerate() {
            *out = src[seq_rom_source_index(a)];
        }
    }

    pub fn reset(&mut self) {
        self.latch_stepper = 0;
        self.latch_motor_on = false;
        self.latch_drive_select = false;
        self.latch_mode = 0;
    }

    pub fn power(&mut self) {
        self.reset();

        self.motoroff_delay_counter = 0;
        self.data_reg = 0;
        self.sequence = 0;

        for drive in self.drives.iter_mut() {
            drive.m_history = 0;
        }
    }

    /// 2MHz の1 tick
    pub fn tick2m(&mut self, db: u8, dbg: DebugMask) {
        let mut flux_change: u8 = 0x40; // 0x40 = 反転なし, 0x00 = 反転あり

        let sel = self.latch_drive_select as usize;
        let drive = &mut self.drives[sel];
        let is_dummy = drive.inserted.is_none();
        let disk = match drive.inserted {
            Some(i) => &mut self.disks[i],
            None => &mut self.dummy_disk,
        };
        // 書き込み禁止でなく、Q7 が立っていて、位相1が切れている
        let write_mode = !disk.write_protect && (self.latch_stepper & 0x2) == 0 && (self.latch_mode & 0x20) != 0;

        self.lcg_state = self.lcg_state.wrapping_mul(1_103_515_245).wrapping_add(12345);

        if self.latch_motor_on {
            self.motoroff_delay_counter = MOTOR_OFF_DELAY;
        }

        if self.motoroff_delay_counter == 0 {
            return;
        }

        let tri = drive.track_index();
        let td_index = (disk.angle >> 3) as usize;

        if write_mode {
            let m = (self.sequence & 0x08) != 0;

            if !is_dummy {
                if tri > 0 {
                    disk.tracks[tri - 1].set_bit(td_index, m);
                }
                disk.tracks[tri].set_bit(td_index, m);
                if tri < NUM_TRACKS - 1 {
                    disk.tracks[tri + 1].set_bit(td_index, m);
                }

                disk.dirty = true;
                disk.ever_modified = true;
            }

            drive.m_history = (drive.m_history << 1) | m as u64;
        } else {
            let m = disk.tracks[tri].bit(td_index);
            drive.m_history = (drive.m_history << 1) | m as u64;

            let mut mchange = ((drive.m_history ^ (drive.m_history >> 1)) & 0x100) != 0;

            // 長時間反転がなければランダムに反転を起こす
            if (drive.m_history & WEAK_BIT_MASK) == 0 || (!drive.m_history & WEAK_BIT_MASK) == 0 {
                mchange = ((self.lcg_state >> 28) & 0xF) == 0;
            }

            if mchange {
                flux_change = 0;
            }
        }

        disk.angle += 1;
        let len = disk.tracks[tri].length;
        if disk.angle >= (len << 3) {
            if disk.angle > (len << 3) {
                a2_dbg!(dbg, DebugMask::ERROR, "[ERROR] disk angle {} is past the end of track {}", disk.angle, tri);
            }
            disk.angle = 0;

            if disk.tracks[tri].flux_fudge {
                if write_mode {
                    disk.tracks[tri].flux_fudge = false;
                } else {
                    drive.m_history = !drive.m_history;
                }
            }
        }

        let old_track = drive.track_index();
        let step = self.stepper_lut[self.latch_stepper as usize][((drive.stepper_position >> 20) & 0x7F) as usize];
        drive.stepper_position = drive.stepper_position.wrapping_add(step as i32 as u32);
        drive.clamp_stepper_position();

        let new_track = drive.track_index();
        if old_track != new_track {
            a2_dbg!(dbg, DebugMask::DISK2, "[DISK2] Disk II virtual track changed: {:08x}", drive.stepper_position);
            disk.angle = rescale_angle(disk.angle, disk.tracks[old_track].length, disk.tracks[new_track].length);
        }

        let srb = self.seq_rom[((self.data_reg & 0x80) | flux_change | self.latch_mode | self.sequence) as usize];
        match srb & 0xF {
            0x0..=0x7 => self.data_reg = 0,
            0x8 | 0xC => {}
            0x9 => self.data_reg <<= 1,
            0xA | 0xE => self.data_reg = (self.data_reg >> 1) | ((disk.write_protect as u8) << 7),
            0xB | 0xF => self.data_reg = db,
            _ => self.data_reg = (self.data_reg << 1) | 1,
        }
        self.sequence = srb >> 4;

        self.motoroff_delay_counter -= 1;
    }

    //--------------------------------------------------
    // ディスクの管理
    //--------------------------------------------------

    /// ディスクを登録してインデックスを返す
    pub fn add_disk(&mut self, disk: FloppyDisk) -> usize {
        self.disks.push(disk);
        self.disks.len() - 1
    }

    pub fn disk(&self, index: usize) -> Option<&FloppyDisk> {
        self.disks.get(index)
    }

    pub fn disk_mut(&mut self, index: usize) -> Option<&mut FloppyDisk> {
        self.disks.get_mut(index)
    }

    pub fn inserted(&self, drive_index: usize) -> Option<usize> {
        self.drives[drive_index].inserted
    }

    fn slot_disk_mut(&mut self, slot: Option<usize>) -> &mut FloppyDisk {
        match slot {
            Some(i) => &mut self.disks[i],
            None => &mut self.dummy_disk,
        }
    }

    /// ドライブにディスクを入れる（None で取り出し）
    ///
    /// 取り出したディスクの回転位置は1周 = 2^32 の単位で保持し、
    /// 入れたディスクは現在のトラック長で換算し直す。
    pub fn set_disk(&mut self, drive_index: usize, disk: Option<usize>, dbg: DebugMask) -> Result<()> {
        if drive_index > 1 {
            return Err(A2Error::Config(format!("Invalid drive number {}.", drive_index + 1)));
        }
        if let Some(i) = disk {
            if i >= self.disks.len() {
                return Err(A2Error::Config(format!("Invalid disk index {}.", i)));
            }
            if self.drives[drive_index ^ 1].inserted == Some(i) {
                return Err(A2Error::Config("The same disk can't be inserted in both drives.".to_string()));
            }
        }

        let tri = self.drives[drive_index].track_index();
        let old_slot = self.drives[drive_index].inserted;

        let old = self.slot_disk_mut(old_slot);
        old.angle = (((old.angle as u64) << 29) / old.tracks[tri].length as u64) as u32;

        let new = self.slot_disk_mut(disk);
        let new_len = new.tracks[tri].length as u64;
        new.angle = ((((new.angle as u64) * new_len + (1 << 28)) >> 29) % (new_len << 3)) as u32;
        let new_angle = new.angle;

        self.drives[drive_index].inserted = disk;

        a2_dbg!(
            dbg,
            DebugMask::DISK2,
            "[DISK2] Drive {} disk set; stepper_track={}, new_disk_angle={}",
            1 + drive_index,
            tri,
            new_angle
        );
        Ok(())
    }

    //--------------------------------------------------
    // デバッガ
    //--------------------------------------------------

    pub fn get_register(&self, reg: Disk2Register) -> u32 {
        match reg {
            Disk2Register::StepPhase => self.latch_stepper as u32,
            Disk2Register::MotorOn => self.latch_motor_on as u32,
            Disk2Register::DriveSelect => self.latch_drive_select as u32,
            Disk2Register::Mode => (self.latch_mode >> 4) as u32,
        }
    }

    pub fn set_register(&mut self, reg: Disk2Register, value: u32) {
        match reg {
            Disk2Register::StepPhase => self.latch_stepper = (value & 0xF) as u8,
            Disk2Register::MotorOn => self.latch_motor_on = (value & 1) != 0,
            Disk2Register::DriveSelect => self.latch_drive_select = (value & 1) != 0,
            Disk2Register::Mode => self.latch_mode = ((value & 0x3) << 4) as u8,
        }
    }

    //--------------------------------------------------
    // セーブステート
    //--------------------------------------------------

    pub fn save_state(&self) -> Disk2State {
        Disk2State {
            latch_stepper: self.latch_stepper,
            latch_motor_on: self.latch_motor_on,
            latch_drive_select: self.latch_drive_select,
            latch_mode: self.latch_mode,
            lcg_state: self.lcg_state,
            motoroff_delay_counter: self.motoroff_delay_counter,
            data_reg: self.data_reg,
            sequence: self.sequence,
            drives: self.drives.map(|d| DriveState {
                m_history: d.m_history,
                delay_flux_change: d.delay_flux_change,
                stepper_position: d.stepper_position,
            }),
            disks: self
                .disks
                .iter()
                .map(|d| DiskImageState {
                    tracks: d.tracks.clone(),
                    angle: d.angle,
                })
                .collect(),
        }
    }

    /// 読み込み後の補正: ステッパー位置のクランプ、回転位置の剰余、トラック長のクランプ。
    /// 内容が違うトラックだけ取り込み、そのディスクを dirty にする。
    pub fn load_state(&mut self, st: &Disk2State, dbg: DebugMask) -> Result<()> {
        if st.disks.len() != self.disks.len() {
            return Err(A2Error::State(format!(
                "Disk count mismatch: state has {}, machine has {}.",
                st.disks.len(),
                self.disks.len()
            )));
        }
        if let Some((index, ds)) = st.disks.iter().enumerate().find(|(_, ds)| ds.tracks.len() != NUM_TRACKS) {
            return Err(A2Error::State(format!("Disk {} has {} tracks.", index, ds.tracks.len())));
        }

        self.latch_stepper = st.latch_stepper & 0xF;
        self.latch_motor_on = st.latch_motor_on;
        self.latch_drive_select = st.latch_drive_select;
        self.latch_mode = st.latch_mode & 0x30;
        self.lcg_state = st.lcg_state;
        self.motoroff_delay_counter = st.motoroff_delay_counter;
        self.data_reg = st.data_reg;
        self.sequence = st.sequence & 0xF;

        for (drive, ds) in self.drives.iter_mut().zip(st.drives.iter()) {
            drive.m_history = ds.m_history;
            drive.delay_flux_change = ds.delay_flux_change;
            drive.stepper_position = ds.stepper_position;
            drive.clamp_stepper_position();
        }

        for (index, ds) in st.disks.iter().enumerate() {
            let inserted = self.drives.iter().any(|d| d.inserted == Some(index));
            let disk = &mut self.disks[index];

            disk.angle = ds.angle;
            if inserted {
                disk.angle %= MAX_BITS_PER_TRACK << 3;
            }

            for (t, (dst, src)) in disk.tracks.iter_mut().zip(ds.tracks.iter()).enumerate() {
                let mut src = src.clone();
                src.length = src.length.clamp(1, MAX_BITS_PER_TRACK);
                src.data.resize(crate::floppy::Track::word_count(), 0);

                if *dst != src {
                    a2_dbg!(dbg, DebugMask::DISK2, "[DISK2] State load dirty track {}.", t);
                    *dst = src;
                    disk.dirty = true;
                    disk.ever_modified = true;
                }
            }
        }
        Ok(())
    }
}

//--------------------------------------------------
// バスハンドラ
//--------------------------------------------------

/// C0E0-C0EF（読み書き共通）
///
/// 0-7: ステッパー位相 off/on、8/9: モーター、A/B: ドライブ選択、C/D: Q6、E/F: Q7。
/// 偶数アドレスではデータレジスタがバスに出る。
pub(crate) fn rw_io(a2: &mut Apple2, a: u16) {
    let ta = (a & 0xF) as u8;

    if !a2.in_peek {
        let d2 = &mut a2.disk2;
        match ta {
            0x0..=0x7 => {
                let bit = (ta & 0x7) >> 1;
                d2.latch_stepper &= !(1 << bit);
                d2.latch_stepper |= (ta & 1) << bit;
            }
            0x8 => d2.latch_motor_on = false,
            0x9 => d2.latch_motor_on = true,
            0xA => d2.latch_drive_select = false,
            0xB => d2.latch_drive_select = true,
            0xC => d2.latch_mode &= !0x10,
            0xD => d2.latch_mode |= 0x10,
            0xE => d2.latch_mode &= !0x20,
            _ => d2.latch_mode |= 0x20,
        }

        a2.cpu_tick1();
    }

    if (ta & 1) == 0 {
        a2.db = a2.disk2.data_reg;
    }
}

/// C600-C6FF
pub(crate) fn read_boot_rom(a2: &mut Apple2, a: u16) {
    a2.db = a2.disk2.boot_rom[(a & 0xFF) as usize];
    a2.tick1_unless_peek();
}

pub(crate) fn install_handlers(a2: &mut Apple2) {
    if !a2.disk2.enabled {
        return;
    }

    for a in 0xC600..0xC700 {
        a2.bus.set_read_handler(a, read_boot_rom);
    }
    for a in 0xC0E0..0xC0F0 {
        a2.bus.set_rw_handlers(a, rw_io, rw_io);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::floppy::encoder::TrackEncoder;
    use crate::floppy::nibble;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// テスト用のシーケンサ（内部インデックス上の表）を P6 ダンプの並びに戻したもの
    ///
    /// 読み取り: 反転で '1' を入れてカウンタを0に戻す。反転がないまま 12 tick 経つと '0' を入れ、
    /// 以後 8 tick ごとに '0'。bit7 が立ったら次の反転まで保持し、反転でクリアしてから '1' を入れる。
    /// それ以外のモードでは書き込み禁止センス。
    pub(crate) fn test_seq_rom() -> [u8; 256] {
        let mut table = [0u8; 256];

        for (a, t) in table.iter_mut().enumerate() {
            let c = (a & 0xF) as u8;
            let lm = (a >> 4) & 0x3;
            let no_flux = (a & 0x40) != 0;
            let dr7 = (a & 0x80) != 0;

            let (next, op) = if lm != 0 {
                (0, 0xA)
            } else if c == 15 {
                (0, 0xD)
            } else if !no_flux {
                if dr7 {
                    (15, 0x0)
                } else {
                    (0, 0xD)
                }
            } else if c == 11 {
                if dr7 {
                    (11, 0x8)
                } else {
                    (4, 0x9)
                }
            } else {
                (c + 1, 0x8)
            };
            *t = (next << 4) | op;
        }

        let mut src = [0u8; 256];
        for (a, &t) in table.iter().enumerate() {
            src[seq_rom_source_index(a)] = t;
        }
        src
    }

    fn card_with_disk(disk: FloppyDisk) -> Disk2InterfaceCard {
        let mut d2 = Disk2InterfaceCard::new();
        d2.enabled = true;
        d2.set_seq_rom(&test_seq_rom());
        let idx = d2.add_disk(disk);
        d2.set_disk(0, Some(idx), DebugMask::empty()).unwrap();
        d2
    }

    #[test]
    fn test_seq_rom_remap_is_a_permutation() {
        let mut seen = [false; 256];
        for a in 0..256 {
            let s = seq_rom_source_index(a);
            assert!(!seen[s]);
            seen[s] = true;
        }

        let mut src = [0u8; 256];
        for (i, v) in src.iter_mut().enumerate() {
            *v = i as u8;
        }
        let mut d2 = Disk2InterfaceCard::new();
        d2.set_seq_rom(&src);
        // seq=2 → A0、dr7 → A1
        assert_eq!(d2.seq_rom[0x02], 0x01);
        assert_eq!(d2.seq_rom[0x80], 0x02);
        assert_eq!(d2.seq_rom[0x40], 0x10);
        assert_eq!(d2.seq_rom[0x01], 0x20);
    }

    #[test]
    fn test_stepper_lut_values() {
        let lut = build_stepper_lut();
        // 位相なしなら動かない
        assert!(lut[0].iter().all(|&d| d == 0));
        // 位相0の中心（角度8）では少し戻す
        assert_eq!(lut[1][8], -6144);
        // 位相1へ向かう
        assert_eq!(lut[2][8], 10240);
        // 位相3は内側へ
        assert_eq!(lut[8][8], -10240);
    }

    #[test]
    fn test_stepper_clamps_at_both_ends() {
        let mut d2 = Disk2InterfaceCard::new();
        d2.latch_motor_on = true;

        // トラック0より外へ
        for &phase in [8u8, 4, 2, 1].iter().cycle().take(40) {
            d2.latch_stepper = phase;
            for _ in 0..5000 {
                d2.tick2m(0, DebugMask::empty());
                assert!(d2.drives[0].stepper_position >= STEPPER_MIN);
            }
        }
        d2.latch_stepper = 8;
        for _ in 0..5000 {
            d2.tick2m(0, DebugMask::empty());
        }
        assert_eq!(d2.drives[0].stepper_position, STEPPER_MIN);

        // 最終トラックより内へ
        for &phase in [2u8, 4, 8, 1].iter().cycle().take(100) {
            d2.latch_stepper = phase;
            for _ in 0..10000 {
                d2.tick2m(0, DebugMask::empty());
                assert!(d2.drives[0].stepper_position <= STEPPER_MAX);
            }
        }
        assert_eq!(d2.drives[0].stepper_position, STEPPER_MAX);
        assert_eq!(d2.drives[0].track_index(), NUM_TRACKS - 1);
    }

    #[test]
    fn test_sector_round_trip_through_read_path() {
        let mut rng = StdRng::seed_from_u64(0xD15C);
        let mut payloads = Vec::new();

        let mut disk = FloppyDisk::new();
        {
            let mut te = TrackEncoder::new(&mut disk.tracks[0], 50992);
            te.encode_gap1(true, 40);
            for s in 0..16u8 {
                let mut ud = [0u8; 256];
                rng.fill(&mut ud[..]);
                te.encode_sector(true, 0xFE, 0, s, &ud);
                payloads.push(ud);
            }
            te.finish();
        }
        disk.tracks[1] = disk.tracks[0].clone();

        let mut d2 = card_with_disk(disk);
        d2.latch_motor_on = true;

        // 2周分読む（bit7 の立ち上がりで1バイト）
        let mut bytes = Vec::new();
        let mut prev = 0u8;
        for _ in 0..50992 * 8 * 2 {
            d2.tick2m(0, DebugMask::empty());
            if (d2.data_reg & 0x80) != 0 && (prev & 0x80) == 0 {
                bytes.push(d2.data_reg);
            }
            prev = d2.data_reg;
        }

        let sectors = nibble::decode_sectors(&bytes, bytes.len());
        for (s, ud) in payloads.iter().enumerate() {
            let found = sectors.iter().find(|d| d.sector as usize == s).unwrap();
            assert_eq!((found.volume, found.track, found.dos33), (0xFE, 0, true));
            assert_eq!(found.data.as_ref(), Some(ud), "sector {}", s);
        }
    }

    #[test]
    fn test_motor_off_delay() {
        let mut d2 = card_with_disk(FloppyDisk::new());
        d2.latch_motor_on = true;
        d2.tick2m(0, DebugMask::empty());
        assert_eq!(d2.motoroff_delay_counter, MOTOR_OFF_DELAY - 1);

        d2.latch_motor_on = false;
        let angle = d2.disks[0].angle;
        for _ in 0..100 {
            d2.tick2m(0, DebugMask::empty());
        }
        // 止まるまでは回り続ける
        assert_eq!(d2.disks[0].angle, angle + 100);
        assert_eq!(d2.motoroff_delay_counter, MOTOR_OFF_DELAY - 101);

        d2.motoroff_delay_counter = 1;
        d2.tick2m(0, DebugMask::empty());
        let angle = d2.disks[0].angle;
        d2.tick2m(0, DebugMask::empty());
        assert_eq!(d2.disks[0].angle, angle);
    }

    #[test]
    fn test_write_mode_marks_three_tracks() {
        let mut disk = FloppyDisk::new();
        for t in disk.tracks.iter_mut() {
            t.data.iter_mut().for_each(|w| *w = !0);
        }
        let mut d2 = card_with_disk(disk);
        d2.latch_motor_on = true;
        d2.latch_mode = 0x20;
        d2.drives[0].stepper_position = (4 << 24) | 0x80_0000;

        d2.tick2m(0, DebugMask::empty());

        let disk = &d2.disks[0];
        assert!(disk.dirty && disk.ever_modified);
        // sequence bit3 = 0 が書かれる
        assert!(!disk.tracks[3].bit(0));
        assert!(!disk.tracks[4].bit(0));
        assert!(!disk.tracks[5].bit(0));
        assert!(disk.tracks[6].bit(0));
    }

    #[test]
    fn test_write_protect_blocks_writes() {
        let mut disk = FloppyDisk::new();
        disk.write_protect = true;
        let mut d2 = card_with_disk(disk);
        d2.latch_motor_on = true;
        d2.latch_mode = 0x30;

        for _ in 0..16 {
            d2.tick2m(0, DebugMask::empty());
        }
        assert!(!d2.disks[0].dirty);
        // 書き込み禁止センス: bit7 に 1 がシフトされる
        assert_eq!(d2.data_reg, 0xFF);
    }

    #[test]
    fn test_angle_rescale() {
        assert_eq!(rescale_angle(1000, 50000, 55000), 1100);
        assert_eq!(rescale_angle(0, 46000, 56048), 0);
        let last = (50000 << 3) - 1;
        assert!(rescale_angle(last, 50000, 46000) < 46000 << 3);
    }

    #[test]
    fn test_set_disk_preserves_rotation_fraction() {
        let mut d2 = Disk2InterfaceCard::new();
        let mut a = FloppyDisk::new();
        a.tracks[0].length = 50000;
        let mut b = FloppyDisk::new();
        b.tracks[0].length = 55000;
        let ia = d2.add_disk(a);
        let ib = d2.add_disk(b);

        d2.set_disk(0, Some(ia), DebugMask::empty()).unwrap();
        d2.disks[ia].angle = 200_000; // 半周
        d2.set_disk(0, None, DebugMask::empty()).unwrap();
        assert_eq!(d2.disks[ia].angle, 1 << 31);

        d2.disks[ib].angle = 1 << 31;
        d2.set_disk(0, Some(ib), DebugMask::empty()).unwrap();
        assert_eq!(d2.disks[ib].angle, 220_000);

        // 同じディスクを両方のドライブには入れられない
        assert!(d2.set_disk(1, Some(ib), DebugMask::empty()).is_err());
        assert!(d2.set_disk(1, Some(ia), DebugMask::empty()).is_ok());
    }

    #[test]
    fn test_registers() {
        let mut d2 = Disk2InterfaceCard::new();
        d2.set_register(Disk2Register::Mode, 0x7);
        assert_eq!(d2.latch_mode, 0x30);
        assert_eq!(d2.get_register(Disk2Register::Mode), 3);
        d2.set_register(Disk2Register::StepPhase, 0x1F);
        assert_eq!(d2.get_register(Disk2Register::StepPhase), 0xF);
        d2.set_register(Disk2Register::DriveSelect, 3);
        assert_eq!(d2.get_register(Disk2Register::DriveSelect), 1);
    }

    #[test]
    fn test_state_load_fixups() {
        let mut d2 = card_with_disk(FloppyDisk::new());
        let mut st = d2.save_state();
        st.drives[1].stepper_position = 0;
        st.disks[0].angle = (MAX_BITS_PER_TRACK << 3) + 5;
        st.disks[0].tracks[7].length = 0;
        st.disks[0].tracks[9].set_bit(3, true);

        d2.load_state(&st, DebugMask::empty()).unwrap();
        assert_eq!(d2.drives[1].stepper_position, STEPPER_MIN);
        assert_eq!(d2.disks[0].angle, 5);
        assert_eq!(d2.disks[0].tracks[7].length, 1);
        assert!(d2.disks[0].tracks[9].bit(3));
        assert!(d2.disks[0].dirty && d2.disks[0].ever_modified);

        // 同じ内容なら dirty にならない
        let st = d2.save_state();
        d2.disks[0].dirty = false;
        d2.load_state(&st, DebugMask::empty()).unwrap();
        assert!(!d2.disks[0].dirty);
    }

    #[test]
    fn test_latches_through_bus() {
        let mut a2 = Apple2::for_test(crate::config::Model::IIPlus, 48);
        a2.disk2.data_reg = 0xA5;

        use crate::cpu::MemoryBus;
        assert_eq!(a2.read(0xC0E9), a2.db);
        assert!(a2.disk2.latch_motor_on);
        // 読み取りの後半でシーケンサが進んでからデータレジスタがバスに出る
        let v = a2.read(0xC0EC);
        assert_eq!(v, a2.disk2.data_reg);
        // ピークではシーケンサが進まない
        a2.disk2.data_reg = 0xA5;
        assert_eq!(a2.peek(0xC0EC), 0xA5);
        assert_eq!(a2.disk2.data_reg, 0xA5);
        a2.read(0xC0E3);
        assert_eq!(a2.disk2.latch_stepper, 0x2);
        a2.read(0xC0EF);
        assert_eq!(a2.disk2.latch_mode, 0x20);
        a2.read(0xC0EB);
        assert!(a2.disk2.latch_drive_select);

        // ピークでは何も変わらない
        let before = a2.disk2.latch_mode;
        a2.peek(0xC0EE);
        assert_eq!(a2.disk2.latch_mode, before);
    }
}
