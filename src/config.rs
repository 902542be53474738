//! マシン設定
//!
//! JSON形式で永続化する。未指定の項目はデフォルト値で補う。

use crate::error::{A2Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 機種
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Model {
    /// Apple II（Integer BASIC）
    II,
    /// Apple II+（Applesoft）
    IIPlus,
    IIe,
    IIeEnhanced,
}

impl Model {
    pub fn is_iie(self) -> bool {
        matches!(self, Model::IIe | Model::IIeEnhanced)
    }

    /// 機種の標準システムROM
    pub fn default_firmware(self) -> SystemFirmware {
        match self {
            Model::II => SystemFirmware::Integer,
            _ => SystemFirmware::Applesoft,
        }
    }
}

/// II/II+ のマザーボードROM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemFirmware {
    Applesoft,
    Integer,
}

/// ROMカードに載せるROM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RomCard {
    None,
    Applesoft,
    Integer,
}

/// Disk II インターフェースのファームウェア
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disk2Firmware {
    /// DOS 3.2 以前（P5 341-0009 / P6 341-0010）
    Sector13,
    /// DOS 3.3 以降（P5 341-0027 / P6 341-0028）
    Sector16,
}

/// マシン設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub model: Model,
    /// RAMサイズ（KiB）
    pub ram_kib: u32,
    /// II/II+ のシステムROM（None なら機種の標準）
    pub firmware: Option<SystemFirmware>,
    pub rom_card: RomCard,
    pub disk2_enable: bool,
    pub disk2_firmware: Disk2Firmware,
    /// ファームウェアファイルのディレクトリ
    pub firmware_dir: PathBuf,
    /// システムROMのファイル名上書き
    pub firmware_override: Option<PathBuf>,
    pub video_rom_override: Option<PathBuf>,
    pub kbmap_override: Option<PathBuf>,
    pub romcard_override: Option<PathBuf>,
    /// ドライブ1/2に挿入するディスクイメージ
    pub disk1: Option<PathBuf>,
    pub disk2: Option<PathBuf>,
    /// 診断マスク（"unk_read+disk2" など）
    pub debug_mask: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            model: Model::IIPlus,
            ram_kib: 48,
            firmware: None,
            rom_card: RomCard::None,
            disk2_enable: true,
            disk2_firmware: Disk2Firmware::Sector16,
            firmware_dir: PathBuf::from("firmware"),
            firmware_override: None,
            video_rom_override: None,
            kbmap_override: None,
            romcard_override: None,
            disk1: None,
            disk2: None,
            debug_mask: String::new(),
        }
    }
}

impl MachineConfig {
    /// 機種に応じたデフォルト設定
    pub fn for_model(model: Model) -> Self {
        MachineConfig {
            model,
            ram_kib: if model.is_iie() { 128 } else { 48 },
            ..Default::default()
        }
    }

    /// 指定したパスから設定を読み込む
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| A2Error::io(&path.display().to_string(), e))?;
        let config: MachineConfig = serde_json::from_str(&content)
            .map_err(|e| A2Error::Config(format!("Failed to parse config \"{}\": {}", path.display(), e)))?;
        Ok(config)
    }

    /// 指定したパスに設定を保存する
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| A2Error::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, json).map_err(|e| A2Error::io(&path.display().to_string(), e))
    }

    /// 有効なシステムROM
    pub fn system_firmware(&self) -> SystemFirmware {
        self.firmware.unwrap_or_else(|| self.model.default_firmware())
    }

    /// ランゲージカードが載るか
    pub fn has_lang_card(&self) -> bool {
        self.ram_kib >= 64
    }

    /// 組み合わせの検証
    pub fn validate(&self) -> Result<()> {
        crate::memory::validate_ram_size(self.model, self.ram_kib)?;

        if self.rom_card != RomCard::None {
            if self.model.is_iie() {
                return Err(A2Error::Config("ROM card emulation is not supported with Apple IIe emulation.".to_string()));
            }
            if self.has_lang_card() {
                return Err(A2Error::Config(
                    "ROM card emulation cannot be enabled when the language card is present (RAM >= 64KiB).".to_string(),
                ));
            }
        }

        if self.model.is_iie() && self.firmware.is_some() {
            return Err(A2Error::Config("System firmware selection applies only to Apple II/II+ emulation.".to_string()));
        }

        if let (Some(d1), Some(d2)) = (&self.disk1, &self.disk2) {
            if d1 == d2 {
                return Err(A2Error::Config(format!(
                    "Disk image \"{}\" cannot be inserted into both drives.",
                    d1.display()
                )));
            }
        }

        Ok(())
    }

    /// ファームウェアディレクトリ基準でパスを解決する
    pub fn resolve_firmware(&self, name: &Path) -> PathBuf {
        if name.is_absolute() {
            name.to_path_buf()
        } else {
            self.firmware_dir.join(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("machine.json");

        let mut config = MachineConfig::for_model(Model::IIe);
        config.ram_kib = 1088;
        config.disk2_firmware = Disk2Firmware::Sector13;
        config.disk1 = Some(PathBuf::from("disks/dos33.woz"));
        config.debug_mask = "disk2".to_string();
        config.save_to(&path).unwrap();

        let loaded = MachineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "model": "II", "ram_kib": 16 }"#).unwrap();

        let config = MachineConfig::load_from(&path).unwrap();
        assert_eq!(config.model, Model::II);
        assert_eq!(config.ram_kib, 16);
        assert!(config.disk2_enable);
        assert_eq!(config.system_firmware(), SystemFirmware::Integer);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ model: ").unwrap();
        assert!(matches!(MachineConfig::load_from(&path), Err(A2Error::Config(_))));
        assert!(matches!(MachineConfig::load_from(dir.path().join("none.json")), Err(A2Error::Io { .. })));
    }

    #[test]
    fn test_validate_rom_card_rules() {
        let mut config = MachineConfig::for_model(Model::IIPlus);
        config.rom_card = RomCard::Integer;
        assert!(config.validate().is_ok());

        config.ram_kib = 64;
        assert!(config.validate().is_err());

        let mut config = MachineConfig::for_model(Model::IIe);
        config.rom_card = RomCard::Applesoft;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_same_disk_twice() {
        let mut config = MachineConfig::default();
        config.disk1 = Some(PathBuf::from("a.dsk"));
        config.disk2 = Some(PathBuf::from("a.dsk"));
        assert!(config.validate().is_err());
    }
}
