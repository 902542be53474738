//! Apple II 本体
//!
//! CPU、バス、メモリ、ビデオタイミング、キーボード/ゲームI/O、スピーカー、Disk II を
//! 1つのインスタンスにまとめ、共通のマスタークロック（`timestamp`）で同期させる。
//!
//! CPU の1サイクル = 1バスアクセス。アクセスの前半で `cpu_tick0`（時刻 +7、ビデオ、Disk II）、
//! ハンドラの中で `cpu_tick1`（時刻 +7、Disk II）がちょうど1回ずつ呼ばれる。

use crate::a2_dbg;
use crate::bus::{write_unhandled, Bus, BusFn};
use crate::config::{MachineConfig, Model, RomCard};
use crate::cpu::{Cpu, MemoryBus};
use crate::debug::{self, DebugMask};
use crate::disk::Disk2InterfaceCard;
use crate::error::{A2Error, Result};
use crate::floppy::{self, FloppyDisk};
use crate::kbio::{InputSource, InputState, KbIo};
use crate::memory::{self, Memory, ROM12K_SIZE};
use crate::rom::RomSet;
use crate::savestate::{CpuState, MainState, SaveState};
use crate::sound::{self, AudioSink, Speaker};
use crate::video::{self, Video, VideoSink};
use crate::{disk, kbio};

/// `run_frame` の結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// このフレームで進んだマスター tick
    pub master_cycles: u64,
    /// CPU サイクル（バスアクセス）数
    pub cpu_cycles: u64,
    /// 時間区切りの数（通常はフレームの途中と終わりで2）
    pub periods: u32,
}

pub struct Apple2 {
    pub model: Model,
    pub cpu: Cpu,
    pub bus: Bus,
    pub mem: Memory,
    pub video: Video,
    pub kbio: KbIo,
    pub speaker: Speaker,
    pub disk2: Disk2InterfaceCard,

    /// データバス
    pub db: u8,
    /// 期間内のマスタークロック（1 CPU サイクル = 14、ライン末尾は +2）
    pub timestamp: i32,
    /// 電源投入からの累計マスタークロック（期間の終わりに加算）
    pub master_cycles: u64,
    /// 電源投入からの CPU サイクル数
    pub access_counter: u64,

    pub in_peek: bool,
    pub junk_read: bool,
    pub dbg: DebugMask,
    /// C073 の RamWorks ハンドラが呼び出す元の書き込みハンドラ
    pub(crate) aux_bank_chain_wf: BusFn,

    pub reset_pending: bool,
    pub prev_reset_held: bool,
    pub jammed: bool,
    pub frame_done: bool,
    pub frame_partial_done: bool,
    tick1_called: u32,

    pub(crate) video_sink: Option<Box<dyn VideoSink>>,
    audio_sink: Option<Box<dyn AudioSink>>,
    input: Option<Box<dyn InputSource>>,
}

impl MemoryBus for Apple2 {
    fn read(&mut self, address: u16) -> u8 {
        self.tick1_called = 0;
        self.cpu_tick0();
        if debug::ENABLED {
            assert_eq!(self.tick1_called, 0);
        }

        let f = self.bus.read_handler(address);
        f(self, address);

        if debug::ENABLED {
            assert_eq!(self.tick1_called, 1, "r {:04x}", address);
        }
        self.db
    }

    fn write(&mut self, address: u16, value: u8) {
        self.tick1_called = 0;
        self.cpu_tick0();
        if debug::ENABLED {
            assert_eq!(self.tick1_called, 0);
        }

        self.db = value;
        let f = self.bus.write_handler(address);
        f(self, address);

        if debug::ENABLED {
            assert_eq!(self.tick1_called, 1, "w {:04x}", address);
        }
    }

    fn read_junk(&mut self, address: u16) -> u8 {
        self.junk_read = true;
        let v = self.read(address);
        self.junk_read = false;
        v
    }
}

impl Apple2 {
    /// 設定ファイルの内容から ROM を読み込んで構築する
    pub fn from_config(config: &MachineConfig) -> Result<Self> {
        let roms = RomSet::load(config)?;
        Self::new(config, &roms)
    }

    /// 構築して電源を入れる。失敗したときはインスタンスを作らない
    pub fn new(config: &MachineConfig, roms: &RomSet) -> Result<Self> {
        config.validate()?;

        let model = config.model;
        let mut mem = Memory::new(model, config.ram_kib)?;

        if model.is_iie() {
            if roms.system.data.len() != 0x4000 {
                return Err(A2Error::Config("Apple IIe emulation requires a 16KiB system ROM.".to_string()));
            }
            mem.rom[..0x4000].copy_from_slice(&roms.system.data);
        } else {
            if roms.system.data.len() != ROM12K_SIZE {
                return Err(A2Error::Config("Apple II/II+ emulation requires a 12KiB system ROM image.".to_string()));
            }
            mem.rom[ROM12K_SIZE..ROM12K_SIZE * 2].copy_from_slice(&roms.system.data);
            mem.rom_present[1] = roms.system.present;

            if config.rom_card != RomCard::None {
                let rc = roms
                    .rom_card
                    .as_ref()
                    .ok_or_else(|| A2Error::Config("ROM card is enabled but no ROM card firmware was loaded.".to_string()))?;
                mem.rom[..ROM12K_SIZE].copy_from_slice(&rc.data);
                mem.rom_present[0] = rc.present;
                mem.enable_rom_card = true;
            }
        }

        let mut disk2 = Disk2InterfaceCard::new();
        if config.disk2_enable {
            let fw = roms
                .disk2
                .as_ref()
                .ok_or_else(|| A2Error::Config("Disk II is enabled but its firmware was not loaded.".to_string()))?;
            disk2.enabled = true;
            disk2.set_boot_rom(&fw.boot);
            disk2.set_seq_rom(&fw.seq);
        } else if config.disk1.is_some() || config.disk2.is_some() {
            return Err(A2Error::Config("Disk images were specified but Disk II emulation is disabled.".to_string()));
        }

        // ディスクは本体を組み立てる前にすべて読み込む
        let mut images = Vec::new();
        for (drive, path) in [&config.disk1, &config.disk2].into_iter().enumerate() {
            if let Some(path) = path {
                images.push((drive, floppy::load_disk_file(path)?));
            }
        }

        let mut a2 = Apple2::build(model, mem, disk2, DebugMask::parse(&config.debug_mask));
        for (drive, disk) in images {
            a2.insert_disk(drive, disk)?;
        }

        log::info!("Model: {:?}", model);
        log::info!("RAM:   {}KiB", config.ram_kib);
        log::info!("Language Card: {}", if a2.mem.enable_lang_card { "present" } else { "absent" });
        log::info!("Disk II: {}", if a2.disk2.enabled { "enabled" } else { "disabled" });

        a2.power();
        Ok(a2)
    }

    fn build(model: Model, mem: Memory, disk2: Disk2InterfaceCard, dbg: DebugMask) -> Self {
        let mut a2 = Apple2 {
            model,
            cpu: Cpu::new(),
            bus: Bus::new(),
            mem,
            video: Video::new(),
            kbio: KbIo::new(),
            speaker: Speaker::new(),
            disk2,
            db: 0,
            timestamp: 0,
            master_cycles: 0,
            access_counter: 0,
            in_peek: false,
            junk_read: false,
            dbg,
            aux_bank_chain_wf: write_unhandled,
            reset_pending: true,
            prev_reset_held: false,
            jammed: false,
            frame_done: false,
            frame_partial_done: false,
            tick1_called: 0,
            video_sink: None,
            audio_sink: None,
            input: None,
        };
        a2.install_handlers();
        a2
    }

    /// ハンドラの登録順は上書きの順序でもある
    fn install_handlers(&mut self) {
        self.bus.clear();
        memory::install_handlers(self);
        kbio::install_handlers(self);
        sound::install_handlers(self);
        disk::install_handlers(self);
        memory::install_aux_bank_select(self);
        memory::install_iie_handlers(self);
    }

    #[cfg(test)]
    pub(crate) fn for_test(model: Model, ram_kib: u32) -> Self {
        let mem = Memory::new(model, ram_kib).unwrap();
        let mut disk2 = Disk2InterfaceCard::new();
        disk2.enabled = true;
        let mut a2 = Apple2::build(model, mem, disk2, DebugMask::all());
        a2.power();
        a2
    }

    //--------------------------------------------------
    // クロック
    //--------------------------------------------------

    /// アクセスの前半
    #[inline]
    pub(crate) fn cpu_tick0(&mut self) {
        self.timestamp += 7;
        video::tick(self);
        if self.disk2.enabled {
            self.disk2.tick2m(self.db, self.dbg);
        }
    }

    /// アクセスの後半（ハンドラから1回だけ呼ぶ）
    #[inline]
    pub(crate) fn cpu_tick1(&mut self) {
        if debug::ENABLED {
            assert!(!self.in_peek);
        }

        self.timestamp += 7;
        if self.disk2.enabled {
            self.disk2.tick2m(self.db, self.dbg);
        }
        self.tick1_called += 1;
        self.access_counter += 1;
    }

    #[inline]
    pub(crate) fn tick1_unless_peek(&mut self) {
        if !self.in_peek {
            self.cpu_tick1();
        }
    }

    //--------------------------------------------------
    // 外部インターフェース
    //--------------------------------------------------

    pub fn set_video_sink(&mut self, sink: Box<dyn VideoSink>) {
        self.video_sink = Some(sink);
    }

    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink>) {
        self.audio_sink = Some(sink);
    }

    pub fn set_input_source(&mut self, input: Box<dyn InputSource>) {
        self.input = Some(input);
    }

    /// 副作用なしの読み取り（クロックもバスも変わらない）
    pub fn peek(&mut self, a: u16) -> u8 {
        let saved = self.db;
        self.in_peek = true;

        let f = self.bus.read_handler(a);
        f(self, a);

        let ret = self.db;
        self.db = saved;
        self.in_peek = false;
        ret
    }

    pub fn peek16(&mut self, a: u16) -> u16 {
        let low = self.peek(a) as u16;
        let high = self.peek(a.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    pub fn power(&mut self) {
        self.mem.power();
        self.video.power();
        self.speaker.power();
        self.kbio.power();
        if self.disk2.enabled {
            self.disk2.power();
        }
        self.cpu.power();

        self.db = 0;
        self.timestamp = 0;
        self.jammed = false;
        self.reset_pending = true;
    }

    /// 次の期間の頭でリセットシーケンスを実行する
    pub fn reset(&mut self) {
        self.reset_pending = true;
    }

    /// 1フレーム分実行する
    ///
    /// 入力はフレームの頭で1回だけ読む。Reset を離した瞬間にリセットが予約される。
    pub fn run_frame(&mut self) -> FrameStats {
        let input = match self.input.as_mut() {
            Some(src) => src.poll(),
            None => InputState::default(),
        };

        let reset_held = self.kbio.update_input(&input);
        if !reset_held && self.prev_reset_held {
            self.reset_pending = true;
        }
        self.prev_reset_held = reset_held;

        let mut stats = FrameStats::default();
        let start_access = self.access_counter;

        self.frame_done = false;
        while !self.frame_done {
            self.emulate_period(reset_held);
            self.end_period(&mut stats);
        }

        stats.cpu_cycles = self.access_counter - start_access;
        stats
    }

    fn emulate_period(&mut self, reset_held: bool) {
        self.frame_partial_done = false;

        if self.reset_pending {
            self.mem.reset();
            self.disk2.reset();
            self.reset_pending = false;
            self.jammed = false;

            let mut cpu = std::mem::take(&mut self.cpu);
            cpu.reset(self);
            self.cpu = cpu;
        }

        if reset_held || self.jammed {
            while !self.frame_partial_done {
                self.cpu_tick0();
                self.cpu_tick1();
            }
            return;
        }

        let mut cpu = std::mem::take(&mut self.cpu);
        while !self.frame_partial_done {
            if debug::ENABLED {
                self.cpu.regs.pc = cpu.regs.pc;
            }

            if let Err(jam) = cpu.step(self) {
                a2_dbg!(
                    self.dbg,
                    DebugMask::WARNING,
                    "[CPU] Jammed by opcode 0x{:02x} at 0x{:04x}",
                    jam.opcode,
                    jam.pc
                );
                self.jammed = true;
                break;
            }
        }
        self.cpu = cpu;
    }

    fn end_period(&mut self, stats: &mut FrameStats) {
        let length = self.timestamp;

        if let Some(sink) = self.audio_sink.as_mut() {
            sink.period(self.speaker.start_level(), self.speaker.toggles(), length);
        }
        self.speaker.end_period();

        self.master_cycles += length as u64;
        stats.master_cycles += length as u64;
        stats.periods += 1;
        self.timestamp = 0;
    }

    //--------------------------------------------------
    // ディスク
    //--------------------------------------------------

    /// ディスクを読み込み済みリストに加えてドライブへ入れる。戻り値はディスク番号
    pub fn insert_disk(&mut self, drive: usize, disk: FloppyDisk) -> Result<usize> {
        if !self.disk2.enabled {
            return Err(A2Error::Config("Disk II emulation is disabled.".to_string()));
        }
        if drive > 1 {
            return Err(A2Error::Config(format!("Drive {} does not exist.", drive + 1)));
        }

        let index = self.disk2.add_disk(disk);
        self.disk2.set_disk(drive, Some(index), self.dbg)?;
        Ok(index)
    }

    /// 読み込み済みのディスクを入れ替える
    pub fn select_disk(&mut self, drive: usize, index: Option<usize>) -> Result<()> {
        if drive > 1 {
            return Err(A2Error::Config(format!("Drive {} does not exist.", drive + 1)));
        }
        if let Some(i) = index {
            if i >= self.disk2.disks.len() {
                return Err(A2Error::Config(format!("Disk {} is not loaded.", i)));
            }
        }
        self.disk2.set_disk(drive, index, self.dbg)
    }

    pub fn eject_disk(&mut self, drive: usize) -> Result<()> {
        self.select_disk(drive, None)
    }

    //--------------------------------------------------
    // セーブステート
    //--------------------------------------------------

    fn ram_region(&self, start: usize, end: usize) -> Vec<u8> {
        let size = self.mem.ram_size as usize;
        if size <= start {
            Vec::new()
        } else {
            self.mem.ram[start..end.min(size)].to_vec()
        }
    }

    pub fn save_state(&self) -> SaveState {
        SaveState {
            version: SaveState::CURRENT_VERSION,
            model: self.model,
            ram_kib: self.mem.ram_size / 1024,
            cpu: CpuState {
                regs: self.cpu.regs,
                total_cycles: self.cpu.total_cycles,
            },
            main: MainState {
                ram48k: self.ram_region(0, 0xC000),
                lang_ram: self.ram_region(0xC000, 0x10000),
                aux_ram: self.ram_region(0x10000, usize::MAX),
                rom_select: self.mem.rom_select,
                lang_card: self.mem.lang_card,
                aux_bank: self.mem.aux_bank,
                soft_switch: self.mem.soft_switch,
                v7_rgb_mode: self.mem.v7_rgb_mode,
                db: self.db,
                access_counter: self.access_counter,
                reset_pending: self.reset_pending,
                prev_reset_held: self.prev_reset_held,
                jammed: self.jammed,
            },
            video: self.video.save_state(),
            kb: self.kbio.save_state(),
            speaker: self.speaker.save_state(),
            disk2: if self.disk2.enabled { Some(self.disk2.save_state()) } else { None },
        }
    }

    /// ステートを復元する。構成が違うステートは何も変えずにエラーを返す
    pub fn load_state(&mut self, st: &SaveState) -> Result<()> {
        if st.version != SaveState::CURRENT_VERSION {
            return Err(A2Error::State(format!("Unsupported save state version {}.", st.version)));
        }
        if st.model != self.model || st.ram_kib * 1024 != self.mem.ram_size {
            return Err(A2Error::State(format!(
                "State is for {:?} with {}KiB RAM, machine is {:?} with {}KiB.",
                st.model,
                st.ram_kib,
                self.model,
                self.mem.ram_size / 1024
            )));
        }

        let m = &st.main;
        let size = self.mem.ram_size as usize;
        let regions = [(0usize, &m.ram48k), (0xC000, &m.lang_ram), (0x10000, &m.aux_ram)];
        for &(start, data) in regions.iter() {
            let expected = size.saturating_sub(start).min(match start {
                0 => 0xC000,
                0xC000 => 0x4000,
                _ => usize::MAX,
            });
            if data.len() != expected {
                return Err(A2Error::State(format!(
                    "RAM block at 0x{:05x} is {} bytes, expected {}.",
                    start,
                    data.len(),
                    expected
                )));
            }
        }

        match (&st.disk2, self.disk2.enabled) {
            (Some(d2), true) => self.disk2.load_state(d2, self.dbg)?,
            (None, false) => {}
            _ => return Err(A2Error::State("Disk II configuration does not match.".to_string())),
        }

        for &(start, data) in regions.iter() {
            self.mem.ram[start..start + data.len()].copy_from_slice(data);
        }
        self.mem.rom_select = m.rom_select;
        self.mem.lang_card = m.lang_card;
        self.mem.aux_bank = m.aux_bank;
        self.mem.soft_switch = m.soft_switch;
        self.mem.v7_rgb_mode = m.v7_rgb_mode & 0x3;
        self.mem.recalc_aux_bank_offs();

        self.db = m.db;
        self.access_counter = m.access_counter;
        self.reset_pending = m.reset_pending;
        self.prev_reset_held = m.prev_reset_held;
        self.jammed = m.jammed;

        self.cpu.regs = st.cpu.regs;
        self.cpu.total_cycles = st.cpu.total_cycles;
        self.video.load_state(&st.video);
        self.kbio.load_state(&st.kb);
        self.speaker.load_state(&st.speaker);
        Ok(())
    }
}
