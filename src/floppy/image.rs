//! セクタ形式のディスクイメージ（.dsk/.do, .po, .d13）
//!
//! 読み込み時に全トラックを磁束レベル列へエンコードする。
//! 35トラックを内部トラック 0, 4, 8, ... に置き、前後の内部トラックにも複製する。

use super::encoder::TrackEncoder;
use super::{nibble, FloppyDisk, NUM_TRACKS};
use crate::error::{A2Error, Result};

/// DOS 3.3 / ProDOS イメージのサイズ
pub const DO_IMAGE_SIZE: usize = 35 * 16 * 256;
/// 13セクタイメージのサイズ
pub const D13_IMAGE_SIZE: usize = 35 * 13 * 256;

const APPLE_TRACKS: usize = 35;
const VOLUME: u8 = 0xFE;

/// 物理セクタ → DOS 3.3 論理セクタ
const DOS_ORDER: [usize; 16] = [0x0, 0x7, 0xE, 0x6, 0xD, 0x5, 0xC, 0x4, 0xB, 0x3, 0xA, 0x2, 0x9, 0x1, 0x8, 0xF];

/// 物理セクタ → イメージ内のセクタ位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorOrder {
    Dos,
    ProDos,
    /// 13セクタ（物理 = 論理）
    D13,
}

impl SectorOrder {
    pub fn image_index(self, physical: usize) -> usize {
        match self {
            SectorOrder::Dos => DOS_ORDER[physical],
            SectorOrder::ProDos => ((physical & 1) << 3) + (physical >> 1),
            SectorOrder::D13 => physical,
        }
    }

    pub fn sectors_per_track(self) -> usize {
        if self == SectorOrder::D13 {
            13
        } else {
            16
        }
    }

    pub fn image_size(self) -> usize {
        APPLE_TRACKS * self.sectors_per_track() * 256
    }
}

fn check_size(data: &[u8], order: SectorOrder) -> Result<()> {
    if data.len() != order.image_size() {
        return Err(A2Error::DiskFormat(format!(
            "Disk image is {} bytes, expected {}.",
            data.len(),
            order.image_size()
        )));
    }
    Ok(())
}

fn sector_at(data: &[u8], offset: usize) -> [u8; 256] {
    let mut ud = [0u8; 256];
    ud.copy_from_slice(&data[offset..offset + 256]);
    ud
}

fn replicate_neighbours(disk: &mut FloppyDisk, track: usize) {
    if track > 0 {
        disk.tracks[track - 1] = disk.tracks[track].clone();
    }
    if track < NUM_TRACKS - 1 {
        disk.tracks[track + 1] = disk.tracks[track].clone();
    }
}

/// DOS 3.3 / ProDOS 順の16セクタイメージ
pub fn load_dopo(data: &[u8], disk: &mut FloppyDisk, is_po: bool) -> Result<()> {
    let order = if is_po { SectorOrder::ProDos } else { SectorOrder::Dos };
    check_size(data, order)?;

    for track in (0..NUM_TRACKS).step_by(4) {
        let apple_track = track / 4;
        if apple_track >= APPLE_TRACKS {
            break;
        }
        let base = apple_track * 16 * 256;

        let mut te = TrackEncoder::new(&mut disk.tracks[track], 50992);
        te.encode_gap1(true, 40);
        for sector in 0..16 {
            let ud = sector_at(data, base + order.image_index(sector) * 256);
            te.encode_sector(true, VOLUME, apple_track as u8, sector as u8, &ud);
        }
        te.finish();

        replicate_neighbours(disk, track);
    }
    Ok(())
}

/// 13セクタイメージ（物理的にインターリーブして配置）
pub fn load_d13(data: &[u8], disk: &mut FloppyDisk) -> Result<()> {
    check_size(data, SectorOrder::D13)?;

    for track in (0..NUM_TRACKS).step_by(4) {
        let apple_track = track / 4;
        if apple_track >= APPLE_TRACKS {
            break;
        }
        let base = apple_track * 13 * 256;

        let mut te = TrackEncoder::new(&mut disk.tracks[track], 50202);
        te.encode_gap1(false, 40);
        for sector in 0..13 {
            let adj = ((sector >> 2) + (sector & 3) * 10) % 13;
            let ud = sector_at(data, base + adj * 256);
            te.encode_sector(false, VOLUME, apple_track as u8, adj as u8, &ud);
        }
        te.finish();

        replicate_neighbours(disk, track);
    }
    Ok(())
}

/// セクタ形式へ書き出す（全セクタが復号できなければエラー）
pub fn export_sectors(disk: &FloppyDisk, order: SectorOrder) -> Result<Vec<u8>> {
    let spt = order.sectors_per_track();
    let mut out = vec![0u8; order.image_size()];

    for apple_track in 0..APPLE_TRACKS {
        let sectors = nibble::decode_track(&disk.tracks[apple_track * 4]);

        for physical in 0..spt {
            let found = sectors
                .iter()
                .find(|s| s.sector as usize == physical && s.dos33 == (order != SectorOrder::D13))
                .and_then(|s| s.data);

            let ud = found.ok_or_else(|| {
                A2Error::DiskFormat(format!("Track {} sector {} could not be decoded.", apple_track, physical))
            })?;

            let offset = (apple_track * spt + order.image_index(physical)) * 256;
            out[offset..offset + 256].copy_from_slice(&ud);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_image(size: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = vec![0u8; size];
        rng.fill(&mut data[..]);
        data
    }

    #[test]
    fn test_po_order() {
        let idx: Vec<usize> = (0..16).map(|s| SectorOrder::ProDos.image_index(s)).collect();
        assert_eq!(idx, vec![0, 8, 1, 9, 2, 10, 3, 11, 4, 12, 5, 13, 6, 14, 7, 15]);
    }

    #[test]
    fn test_dos_image_export_matches() {
        let data = random_image(DO_IMAGE_SIZE, 1);
        let mut disk = FloppyDisk::new();
        load_dopo(&data, &mut disk, false).unwrap();

        assert_eq!(disk.tracks[0].length, 50992);
        assert_eq!(disk.tracks[1], disk.tracks[0]);
        assert_eq!(disk.tracks[3], disk.tracks[4]);
        assert_eq!(disk.tracks[5], disk.tracks[4]);

        assert_eq!(export_sectors(&disk, SectorOrder::Dos).unwrap(), data);
    }

    #[test]
    fn test_po_image_export_matches() {
        let data = random_image(DO_IMAGE_SIZE, 2);
        let mut disk = FloppyDisk::new();
        load_dopo(&data, &mut disk, true).unwrap();
        assert_eq!(export_sectors(&disk, SectorOrder::ProDos).unwrap(), data);
    }

    #[test]
    fn test_d13_image_export_matches() {
        let data = random_image(D13_IMAGE_SIZE, 3);
        let mut disk = FloppyDisk::new();
        load_d13(&data, &mut disk).unwrap();
        assert_eq!(disk.tracks[0].length, 50202);
        assert_eq!(export_sectors(&disk, SectorOrder::D13).unwrap(), data);
    }

    #[test]
    fn test_wrong_size_image_rejected() {
        let mut disk = FloppyDisk::new();
        assert!(load_dopo(&[0u8; 1000], &mut disk, false).is_err());

        // 余分なバイトがあっても切り捨てずにエラー
        let data = vec![0u8; SectorOrder::Dos.image_size() + 256];
        let msg = load_dopo(&data, &mut disk, true).unwrap_err().to_string();
        assert_eq!(msg, "Disk image is 143616 bytes, expected 143360.");

        let data = vec![0u8; SectorOrder::D13.image_size() + 1];
        assert!(matches!(load_d13(&data, &mut disk), Err(A2Error::DiskFormat(_))));
    }

    #[test]
    fn test_export_of_blank_disk_fails() {
        let disk = FloppyDisk::new();
        assert!(export_sectors(&disk, SectorOrder::Dos).is_err());
    }
}
