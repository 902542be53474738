//! ファームウェア（ROM）の読み込みと識別
//!
//! SHA-256 で既知のダンプと照合する。Disk II の ROM は不一致ならエラー、
//! システムROMは未知でも受け付けて "Unknown" と表示する。

use crate::config::{Disk2Firmware, MachineConfig, Model, RomCard, SystemFirmware};
use crate::error::{A2Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// ROMの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomKind {
    System,
    Video,
    Keyboard,
    Disk2Boot,
    Disk2Seq,
}

/// ROMデータベースのエントリ
#[derive(Debug)]
pub struct RomDbEntry {
    pub kind: RomKind,
    pub size: usize,
    /// None = 機種に依存しない
    pub model: Option<&'static str>,
    pub parts: &'static [&'static str],
    pub desc: Option<&'static str>,
    pub hash: &'static str,
}

const MODEL_II: Option<&str> = Some("Apple II/II+");
const MODEL_IIE: Option<&str> = Some("Apple IIe");
const MODEL_IIE_ENH: Option<&str> = Some("Enhanced Apple IIe");

pub const HASH_INTEGER: &str = "cb52b212a62f808c2f59600b2823491ee12bd91cab8e0260fe34b5f14c47552f";
pub const HASH_APPLESOFT: &str = "fc3e9d41e9428534a883df5aa10eb55b73ea53d2fcbb3ee4f39bed1b07a82905";
const HASH_BAD_VIDEO: &str = "0d54ff735c060c55d54b8a22d0112af78a6465ce9c9aae4a865d207e5c8ff1e7";

pub static ROM_DB: [RomDbEntry; 13] = [
    RomDbEntry {
        kind: RomKind::System,
        size: 0x2000,
        model: MODEL_II,
        parts: &["341-0001", "341-0002", "341-0003", "341-0020"],
        desc: Some("Integer BASIC and Autostart"),
        hash: HASH_INTEGER,
    },
    RomDbEntry {
        kind: RomKind::System,
        size: 0x3000,
        model: MODEL_II,
        parts: &["341-0011", "341-0011", "341-0012", "341-0013", "341-0014", "341-0015", "341-0020"],
        desc: Some("AppleSoft BASIC and Autostart"),
        hash: HASH_APPLESOFT,
    },
    RomDbEntry {
        kind: RomKind::System,
        size: 0x4000,
        model: MODEL_IIE,
        parts: &["342-0135-A", "342-0134-A"],
        desc: None,
        hash: "1fb812584c6633fa16b77b20915986ed1178d1e6fc07a647f7ee8d4e6ab9d40b",
    },
    RomDbEntry {
        kind: RomKind::System,
        size: 0x4000,
        model: MODEL_IIE_ENH,
        parts: &["342-0304-A", "342-0303-A"],
        desc: None,
        hash: "aab38a03ca8deabbb2f868733148c2efd6f655a59cd9c5d058ef3e0b7aa86a1a",
    },
    RomDbEntry {
        kind: RomKind::Video,
        size: 0x1000,
        model: MODEL_IIE,
        parts: &["342-0133-A"],
        desc: Some("US"),
        hash: "ed5bdd4afa509134e85f1d020685af7ff50e279226eb869a17825b471cc1634c",
    },
    RomDbEntry {
        kind: RomKind::Video,
        size: 0x1000,
        model: MODEL_IIE_ENH,
        parts: &["342-0265-A"],
        desc: Some("US"),
        hash: "52c3b87900ac939f6525402cab1ccfd8f8259290fc6df54da48fb4c98ae3ed0f",
    },
    RomDbEntry {
        kind: RomKind::Keyboard,
        size: 0x0800,
        model: MODEL_IIE,
        parts: &["342-0132-B"],
        desc: Some("US + Dvorak"),
        hash: "68198ae95923926b0307893d03ec286f00822c93a0b6dabfca565f6718dd5a56",
    },
    RomDbEntry {
        kind: RomKind::Keyboard,
        size: 0x0800,
        model: MODEL_IIE,
        parts: &["342-0132-C"],
        desc: Some("US + Dvorak (revised IIe)"),
        hash: "fbb9620e01f4f728e5a8ba86544900978d7803f6a7d577d384e288dfed9a4907",
    },
    RomDbEntry {
        kind: RomKind::Keyboard,
        size: 0x0800,
        model: MODEL_IIE_ENH,
        parts: &["341-0132-D"],
        desc: Some("US + Dvorak"),
        hash: "a1989da84ea4381d309e7e08783771f884e913236b9bcc71c3d649aacf76537a",
    },
    RomDbEntry {
        kind: RomKind::Disk2Boot,
        size: 0x100,
        model: None,
        parts: &["341-0009"],
        desc: Some("13-sector"),
        hash: "2d2599521fc5763d4e8c308c2ee7c5c4d5c93785b8fb9a4f7d0381dfd5eb60b6",
    },
    RomDbEntry {
        kind: RomKind::Disk2Seq,
        size: 0x100,
        model: None,
        parts: &["341-0010"],
        desc: Some("13-sector"),
        hash: "4234aed053c622b266014c4e06ab1ce9e0e085d94a28512aa4030462be0a3cb9",
    },
    RomDbEntry {
        kind: RomKind::Disk2Boot,
        size: 0x100,
        model: None,
        parts: &["341-0027"],
        desc: Some("16-sector"),
        hash: "de1e3e035878bab43d0af8fe38f5839c527e9548647036598ee6fe7ec74d2a7d",
    },
    RomDbEntry {
        kind: RomKind::Disk2Seq,
        size: 0x100,
        model: None,
        parts: &["341-0028"],
        desc: Some("16-sector"),
        hash: "e5e30615040567c1e7a2d21599681f8dac820edbdcda177b816a64d74b3a12f2",
    },
];

/// Disk II ファームウェア: (用途, ファイル名, ハッシュ)
struct Disk2FirmwareInfo {
    purpose: &'static str,
    fname: &'static str,
    hash: &'static str,
}

const DISK2_FIRMWARE: [[Disk2FirmwareInfo; 2]; 2] = [
    [
        Disk2FirmwareInfo {
            purpose: "Disk II Interface 13-Sector P5 Boot ROM, 341-0009",
            fname: "disk2-13boot.rom",
            hash: "2d2599521fc5763d4e8c308c2ee7c5c4d5c93785b8fb9a4f7d0381dfd5eb60b6",
        },
        Disk2FirmwareInfo {
            purpose: "Disk II Interface 13-Sector P6 Sequencer ROM, 341-0010",
            fname: "disk2-13seq.rom",
            hash: "4234aed053c622b266014c4e06ab1ce9e0e085d94a28512aa4030462be0a3cb9",
        },
    ],
    [
        Disk2FirmwareInfo {
            purpose: "Disk II Interface 16-Sector P5 Boot ROM, 341-0027",
            fname: "disk2-16boot.rom",
            hash: "de1e3e035878bab43d0af8fe38f5839c527e9548647036598ee6fe7ec74d2a7d",
        },
        Disk2FirmwareInfo {
            purpose: "Disk II Interface 16-Sector P6 Sequencer ROM, 341-0028",
            fname: "disk2-16seq.rom",
            hash: "e5e30615040567c1e7a2d21599681f8dac820edbdcda177b816a64d74b3a12f2",
        },
    ],
];

/// SHA-256 を16進文字列で返す
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|b| format!("{:02x}", b)).collect()
}

/// ハッシュからROMを検索
pub fn lookup(hash: &str) -> Option<&'static RomDbEntry> {
    ROM_DB.iter().find(|e| e.hash == hash)
}

/// ROMの説明文字列（"Apple IIe; 342-0135-A + 342-0134-A " など）
pub fn describe(data: &[u8]) -> String {
    let entry = match lookup(&sha256_hex(data)) {
        Some(e) => e,
        None => return "Unknown".to_string(),
    };

    let mut ret = String::new();
    if let Some(model) = entry.model {
        ret.push_str(model);
        ret.push_str("; ");
    }

    ret.push_str(&entry.parts.join(" + "));
    match entry.desc {
        Some(desc) => {
            ret.push_str(" (");
            ret.push_str(desc);
            ret.push(')');
        }
        None => ret.push(' '),
    }
    ret
}

/// 12KiB（D000-FFFF）または IIe の16KiB（C000-FFFF）のROMイメージ
#[derive(Debug, Clone)]
pub struct RomImage {
    pub data: Vec<u8>,
    /// D000-FFFF の2KiBごとの存在フラグ
    pub present: [bool; 6],
}

impl RomImage {
    /// Applesoft BASIC（12KiB、全域）
    pub fn applesoft(data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), 0x3000);
        RomImage { data, present: [true; 6] }
    }

    /// Integer BASIC（8KiB、E000-FFFF。D000-DFFF は 0xFF で不在）
    pub fn integer(data: &[u8]) -> Self {
        debug_assert_eq!(data.len(), 0x2000);
        let mut buf = vec![0xFF; 0x3000];
        buf[0x1000..].copy_from_slice(data);
        RomImage {
            data: buf,
            present: [false, false, true, true, true, true],
        }
    }

    /// IIe（16KiB、C000-FFFF）
    pub fn iie(data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), 0x4000);
        RomImage { data, present: [true; 6] }
    }

    /// 説明文字列（II は Applesoft/Integer のどちらかを識別）
    pub fn describe(&self) -> String {
        if self.data.len() == 0x4000 {
            return describe(&self.data);
        }
        if sha256_hex(&self.data) == HASH_APPLESOFT {
            "AppleSoft BASIC and Autostart".to_string()
        } else if sha256_hex(&self.data[0x1000..]) == HASH_INTEGER {
            "Integer BASIC and Autostart".to_string()
        } else {
            "Unknown".to_string()
        }
    }
}

/// Disk II インターフェースの ROM
#[derive(Debug, Clone)]
pub struct Disk2Roms {
    pub boot: [u8; 256],
    /// 配線どおりの生データ（Disk2 側で並べ替える）
    pub seq: [u8; 256],
}

/// マシンが必要とする ROM 一式
#[derive(Debug, Clone)]
pub struct RomSet {
    pub system: RomImage,
    pub rom_card: Option<RomImage>,
    /// IIe 文字ROM（4KiB）
    pub video: Option<Vec<u8>>,
    /// IIe キーボードデコードROM（2KiB）
    pub keyboard: Option<Vec<u8>>,
    pub disk2: Option<Disk2Roms>,
}

fn read_firmware(path: &Path, purpose: &str, size: usize) -> Result<Vec<u8>> {
    let path_hs = path.display().to_string();
    let data = fs::read(path).map_err(|e| A2Error::io(&path_hs, e))?;

    if data.len() != size {
        return Err(A2Error::FirmwareSize {
            purpose: purpose.to_string(),
            path: path_hs,
            expected: size,
            actual: data.len(),
        });
    }
    Ok(data)
}

impl RomSet {
    /// システムROMのみ（他はなし）
    pub fn new(system: RomImage) -> Self {
        RomSet {
            system,
            rom_card: None,
            video: None,
            keyboard: None,
            disk2: None,
        }
    }

    pub fn with_disk2(mut self, boot: [u8; 256], seq: [u8; 256]) -> Self {
        self.disk2 = Some(Disk2Roms { boot, seq });
        self
    }

    /// 設定に従ってファームウェアディレクトリから読み込む
    pub fn load(config: &MachineConfig) -> Result<Self> {
        config.validate()?;

        let fw_path = |over: &Option<PathBuf>, default: &str| -> PathBuf {
            match over {
                Some(p) => config.resolve_firmware(p),
                None => config.firmware_dir.join(default),
            }
        };

        let system = match config.model {
            Model::IIe | Model::IIeEnhanced => {
                let fname = if config.model == Model::IIe { "apple2e.rom" } else { "apple2e-enh.rom" };
                let path = fw_path(&config.firmware_override, fname);
                RomImage::iie(read_firmware(&path, "Apple IIe System ROM", 0x4000)?)
            }
            Model::II | Model::IIPlus => match (&config.firmware_override, config.system_firmware()) {
                (Some(p), _) => RomImage::applesoft(read_firmware(&config.resolve_firmware(p), "System ROM", 0x3000)?),
                (None, SystemFirmware::Applesoft) => Self::load_applesoft(config)?,
                (None, SystemFirmware::Integer) => Self::load_integer(config)?,
            },
        };

        let rom_card = match (&config.romcard_override, config.rom_card) {
            (_, RomCard::None) => None,
            (Some(p), _) => Some(RomImage::applesoft(read_firmware(&config.resolve_firmware(p), "ROM Card ROM", 0x3000)?)),
            (None, RomCard::Applesoft) => Some(Self::load_applesoft(config)?),
            (None, RomCard::Integer) => Some(Self::load_integer(config)?),
        };

        let disk2 = if config.disk2_enable {
            let variant = &DISK2_FIRMWARE[(config.disk2_firmware == Disk2Firmware::Sector16) as usize];
            let mut bufs = [[0u8; 256]; 2];

            for (fwinf, buf) in variant.iter().zip(bufs.iter_mut()) {
                let path = config.firmware_dir.join(fwinf.fname);
                let data = read_firmware(&path, fwinf.purpose, 256)?;
                if sha256_hex(&data) != fwinf.hash {
                    return Err(A2Error::FirmwareHash {
                        purpose: fwinf.purpose.to_string(),
                        path: path.display().to_string(),
                    });
                }
                buf.copy_from_slice(&data);
            }
            Some(Disk2Roms { boot: bufs[0], seq: bufs[1] })
        } else {
            None
        };

        let (video, keyboard) = if config.model.is_iie() {
            let enh = config.model == Model::IIeEnhanced;
            let vpath = fw_path(&config.video_rom_override, if enh { "apple2e-enh-video.rom" } else { "apple2e-video.rom" });
            let video = read_firmware(&vpath, "Apple IIe Video ROM", 0x1000)?;
            if sha256_hex(&video) == HASH_BAD_VIDEO {
                return Err(A2Error::BadVideoRom);
            }

            let kpath = fw_path(&config.kbmap_override, if enh { "apple2e-enh-kb.rom" } else { "apple2e-kb.rom" });
            let keyboard = read_firmware(&kpath, "Apple IIe Keyboard ROM", 0x800)?;
            (Some(video), Some(keyboard))
        } else {
            (None, None)
        };

        let set = RomSet {
            system,
            rom_card,
            video,
            keyboard,
            disk2,
        };
        set.log_summary();
        Ok(set)
    }

    fn load_applesoft(config: &MachineConfig) -> Result<RomImage> {
        let path = config.firmware_dir.join("apple2-asoft-auto.rom");
        Ok(RomImage::applesoft(read_firmware(&path, "Applesoft BASIC ROM", 0x3000)?))
    }

    fn load_integer(config: &MachineConfig) -> Result<RomImage> {
        let path = config.firmware_dir.join("apple2-int-auto.rom");
        Ok(RomImage::integer(&read_firmware(&path, "Integer BASIC ROM", 0x2000)?))
    }

    fn log_summary(&self) {
        log::info!("ROM:   {}", self.system.describe());
        match &self.rom_card {
            Some(rc) => log::info!("ROM Card: {}", rc.describe()),
            None => log::info!("ROM Card: (disabled)"),
        }
        if let Some(video) = &self.video {
            log::info!("Video ROM:    {}", describe(video));
        }
        if let Some(kb) = &self.keyboard {
            log::info!("Keyboard ROM: {}", describe(kb));
        }
        if let Some(d2) = &self.disk2 {
            log::info!("Disk II Boot ROM:      {}", describe(&d2.boot));
            log::info!("Disk II Sequencer ROM: {}", describe(&d2.seq));
        }
    }
}
