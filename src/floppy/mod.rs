//! フロッピーディスク（磁束レベル表現）
//!
//! 1ディスク = 160 内部トラック（1/4トラック単位）。各トラックは
//! 磁化の向きを1ビットずつ並べたビット列で、長さは 46000〜56048 ビット。
//! セクタ形式（DO/PO/D13）は読み込み時にビット列へエンコードする。

pub mod afd;
pub mod encoder;
pub mod image;
pub mod nibble;
pub mod woz;

use crate::error::{A2Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// 内部トラック数
pub const NUM_TRACKS: usize = 160;
/// トラック長の下限（ビット）
pub const MIN_BITS_PER_TRACK: u32 = 46000;
/// トラック長の上限（ビット）
pub const MAX_BITS_PER_TRACK: u32 = 56048;
/// トラック長のデフォルト（ビット）
pub const DEFAULT_BITS_PER_TRACK: u32 = 51024;

/// ビット列の容量（65536ビット）
const TRACK_WORDS: usize = 65536 / 32;

/// 1トラック分のビット列
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// ビット i は data[i >> 5] の bit (i & 31)
    pub data: Vec<u32>,
    pub length: u32,
    /// 終端で磁化の向きが反転している（一周したら履歴を反転する）
    pub flux_fudge: bool,
}

impl Default for Track {
    fn default() -> Self {
        Track {
            data: vec![0; TRACK_WORDS],
            length: DEFAULT_BITS_PER_TRACK,
            flux_fudge: false,
        }
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("length", &self.length)
            .field("flux_fudge", &self.flux_fudge)
            .finish()
    }
}

impl Track {
    #[inline(always)]
    pub fn bit(&self, index: usize) -> bool {
        (self.data[(index >> 5) & (TRACK_WORDS - 1)] >> (index & 31)) & 1 != 0
    }

    #[inline(always)]
    pub fn set_bit(&mut self, index: usize, value: bool) {
        let w = &mut self.data[(index >> 5) & (TRACK_WORDS - 1)];
        let mask = 1u32 << (index & 31);
        if value {
            *w |= mask;
        } else {
            *w &= !mask;
        }
    }

    /// ワード数（セーブ形式用）
    pub const fn word_count() -> usize {
        TRACK_WORDS
    }
}

/// フロッピーディスク
#[derive(Clone, Debug)]
pub struct FloppyDisk {
    pub tracks: Vec<Track>,
    pub write_protect: bool,
    /// 回転位置（1/8ビット単位）
    pub angle: u32,
    pub dirty: bool,
    pub ever_modified: bool,
}

impl Default for FloppyDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl FloppyDisk {
    pub fn new() -> Self {
        FloppyDisk {
            tracks: vec![Track::default(); NUM_TRACKS],
            write_protect: false,
            angle: 0,
            dirty: false,
            ever_modified: false,
        }
    }

    /// dirty フラグを取得してクリア
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn set_ever_modified(&mut self) {
        self.ever_modified = true;
    }

    /// ディスク内容のハッシュ（トラックのワード、長さ、fudge フラグ）
    pub fn hash(&self) -> [u8; 32] {
        let mut h = Sha256::new();
        for t in &self.tracks {
            for &v in &t.data {
                h.update(v.to_le_bytes());
            }
            h.update(t.length.to_le_bytes());
            h.update((t.flux_fudge as u32).to_le_bytes());
        }
        h.finalize().into()
    }

    /// トラック0に13セクタ形式（DOS 3.2）の T0/S0 アドレスフィールドだけがあるか
    pub fn detect_dos32(&self) -> bool {
        let nibbles = nibble::read_nibbles(&self.tracks[0]);
        let mut dos32 = false;
        let mut dos33 = false;

        for i in 0..nibbles.bytes.len() / 2 {
            let d = &nibbles.bytes[i..];
            if d.len() < 11 || d[0] != 0xD5 || d[1] != 0xAA || (d[2] != 0xB5 && d[2] != 0x96) {
                continue;
            }

            let volume = nibble::decode_oddeven(d[3], d[4]);
            let track = nibble::decode_oddeven(d[5], d[6]);
            let sector = nibble::decode_oddeven(d[7], d[8]);
            let csum = nibble::decode_oddeven(d[9], d[10]);

            if track == 0 && sector == 0 && (volume ^ track ^ sector ^ csum) == 0 {
                if d[2] == 0x96 {
                    dos33 = true;
                } else {
                    dos32 = true;
                }
            }
        }

        dos32 && !dos33
    }
}

/// ディスクイメージの形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskImageFormat {
    Woz,
    Afd,
    /// DOS 3.3 セクタ順（.dsk/.do）
    Dos,
    /// ProDOS セクタ順（.po）
    ProDos,
    /// 13セクタ（.d13）
    D13,
}

impl DiskImageFormat {
    /// 拡張子から判定
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "woz" => Some(DiskImageFormat::Woz),
            "afd" => Some(DiskImageFormat::Afd),
            "do" | "dsk" => Some(DiskImageFormat::Dos),
            "po" => Some(DiskImageFormat::ProDos),
            "d13" => Some(DiskImageFormat::D13),
            _ => None,
        }
    }

    /// 判定: マジックバイト > 拡張子 > サイズ
    pub fn detect(data: &[u8], ext: &str) -> Result<Self> {
        if woz::has_woz_header(data) {
            return Ok(DiskImageFormat::Woz);
        }
        if afd::has_afd_header(data) {
            return Ok(DiskImageFormat::Afd);
        }
        if let Some(fmt) = Self::from_extension(ext) {
            return Ok(fmt);
        }

        log::warn!("Detecting Apple II disk image format by contents and/or size(ext={}).", ext);
        match data.len() {
            image::DO_IMAGE_SIZE => Ok(DiskImageFormat::Dos),
            image::D13_IMAGE_SIZE => Ok(DiskImageFormat::D13),
            _ => Err(A2Error::UnknownDiskFormat),
        }
    }
}

/// メモリ上のイメージからディスクを作る
pub fn load_disk(data: &[u8], ext: &str) -> Result<FloppyDisk> {
    let mut disk = FloppyDisk::new();

    match DiskImageFormat::detect(data, ext)? {
        DiskImageFormat::Woz => woz::load_woz(data, &mut disk)?,
        DiskImageFormat::Afd => afd::load_afd(data, &mut disk)?,
        DiskImageFormat::Dos => image::load_dopo(data, &mut disk, false)?,
        DiskImageFormat::ProDos => image::load_dopo(data, &mut disk, true)?,
        DiskImageFormat::D13 => image::load_d13(data, &mut disk)?,
    }

    Ok(disk)
}

/// ファイルからディスクを読み込む
pub fn load_disk_file<P: AsRef<Path>>(path: P) -> Result<FloppyDisk> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| A2Error::io(&path.display().to_string(), e))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    log::info!("Loading disk image \"{}\"", path.display());
    load_disk(&data, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_bits() {
        let mut t = Track::default();
        t.set_bit(0, true);
        t.set_bit(33, true);
        assert!(t.bit(0));
        assert!(!t.bit(1));
        assert!(t.bit(33));
        assert_eq!(t.data[1], 2);
        t.set_bit(33, false);
        assert_eq!(t.data[1], 0);
    }

    #[test]
    fn test_take_dirty() {
        let mut disk = FloppyDisk::new();
        disk.dirty = true;
        assert!(disk.take_dirty());
        assert!(!disk.take_dirty());
    }

    #[test]
    fn test_hash_changes_with_content() {
        let mut disk = FloppyDisk::new();
        let h0 = disk.hash();
        disk.tracks[5].set_bit(100, true);
        assert_ne!(disk.hash(), h0);
        disk.tracks[5].set_bit(100, false);
        assert_eq!(disk.hash(), h0);
        disk.tracks[5].flux_fudge = true;
        assert_ne!(disk.hash(), h0);
    }

    #[test]
    fn test_detect_by_size_and_magic() {
        let dsk = vec![0u8; image::DO_IMAGE_SIZE];
        assert_eq!(DiskImageFormat::detect(&dsk, "img").unwrap(), DiskImageFormat::Dos);
        let d13 = vec![0u8; image::D13_IMAGE_SIZE];
        assert_eq!(DiskImageFormat::detect(&d13, "").unwrap(), DiskImageFormat::D13);
        assert!(matches!(DiskImageFormat::detect(&[0u8; 100], "bin"), Err(A2Error::UnknownDiskFormat)));

        // マジックは拡張子より優先
        let mut woz = vec![0u8; 300];
        woz[..8].copy_from_slice(b"WOZ2\xFF\x0A\x0D\x0A");
        assert_eq!(DiskImageFormat::detect(&woz, "dsk").unwrap(), DiskImageFormat::Woz);
        assert_eq!(DiskImageFormat::detect(&dsk, "po").unwrap(), DiskImageFormat::ProDos);
    }

    #[test]
    fn test_detect_dos32() {
        let d13 = vec![0u8; image::D13_IMAGE_SIZE];
        let disk = load_disk(&d13, "d13").unwrap();
        assert!(disk.detect_dos32());

        let dsk = vec![0u8; image::DO_IMAGE_SIZE];
        let disk = load_disk(&dsk, "dsk").unwrap();
        assert!(!disk.detect_dos32());
    }

    #[test]
    fn test_dos_image_end_to_end_address_field() {
        let dsk = vec![0u8; 143360];
        let disk = load_disk(&dsk, "").unwrap();

        let sectors = nibble::decode_track(&disk.tracks[0]);
        let first = sectors.iter().find(|s| s.sector == 0).unwrap();
        assert_eq!((first.volume, first.track, first.sector), (0xFE, 0, 0));
        assert!(first.data.is_some());
    }
}
