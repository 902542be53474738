//! WOZ 1.0 / 2.0 イメージ
//!
//! INFO、TMAP、TRKS の3チャンクを固定オフセット（20、88、256）で読む。
//! 各ソーストラックのビット数は 46000〜56048 でなければならない。

use super::encoder::TrackEncoder;
use super::{FloppyDisk, Track, MAX_BITS_PER_TRACK, MIN_BITS_PER_TRACK, NUM_TRACKS};
use crate::error::{A2Error, Result};

pub const WOZ1_MAGIC: [u8; 8] = [0x57, 0x4F, 0x5A, 0x31, 0xFF, 0x0A, 0x0D, 0x0A];
pub const WOZ2_MAGIC: [u8; 8] = [0x57, 0x4F, 0x5A, 0x32, 0xFF, 0x0A, 0x0D, 0x0A];

const CHUNK_INFO: u32 = 0x4F46_4E49;
const CHUNK_TMAP: u32 = 0x5041_4D54;
const CHUNK_TRKS: u32 = 0x534B_5254;

const WOZ1_TRACK_SIZE: usize = 6656;
/// WOZ2 の TRKS チャンク先頭の TRK エントリ数
const WOZ2_TRK_ENTRIES: usize = 160;

const COMPAT_HW: [&str; 9] = [
    "Apple II",
    "Apple II+",
    "Apple IIe",
    "Apple IIc",
    "Apple IIe Enhanced",
    "Apple IIgs",
    "Apple IIc Plus",
    "Apple III",
    "Apple III Plus",
];

pub fn has_woz_header(data: &[u8]) -> bool {
    data.len() >= 12 && (data[..8] == WOZ1_MAGIC || data[..8] == WOZ2_MAGIC)
}

#[inline]
fn le16(b: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([b[pos], b[pos + 1]])
}

#[inline]
fn le32(b: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([b[pos], b[pos + 1], b[pos + 2], b[pos + 3]])
}

fn slice(data: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    data.get(pos..pos + len)
        .ok_or_else(|| A2Error::DiskFormat("Unexpected end of WOZ file.".to_string()))
}

fn check_bit_count(entry: usize, bits: u32) -> Result<()> {
    if !(MIN_BITS_PER_TRACK..=MAX_BITS_PER_TRACK).contains(&bits) {
        return Err(A2Error::TrackBitCount {
            entry,
            bits,
            min: MIN_BITS_PER_TRACK,
            max: MAX_BITS_PER_TRACK,
        });
    }
    Ok(())
}

/// MSB ファーストのビット列をトラックにする
fn encode_source_track(raw: &[u8], bits: u32) -> Track {
    let mut track = Track::default();
    let mut te = TrackEncoder::new(&mut track, bits);
    for bi in 0..bits as usize {
        te.encode_bit((raw[bi >> 3] >> (7 - (bi & 7))) & 1 != 0);
    }
    te.finish();
    track
}

fn parse_info(info: &[u8], woz2: bool, disk: &mut FloppyDisk) -> Result<()> {
    let version = info[0];
    let disk_type = info[1];
    let write_protected = info[2];
    let synchronized = info[3];
    let cleaned = info[4];
    let creator: String = String::from_utf8_lossy(&info[5..37])
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string();

    let (mut bit_timing, mut compat_hw, mut req_ram, mut flux_block, mut largest_flux) = (32u8, 0u16, 0u16, 0u16, 0u16);
    if woz2 {
        bit_timing = info[39];
        compat_hw = le16(info, 40);
        req_ram = le16(info, 42);
        if version >= 3 {
            flux_block = le16(info, 46);
            largest_flux = le16(info, 48);
        }
    }

    if disk_type == 0x02 {
        return Err(A2Error::DiskFormat("3.5\" floppy disk images not currently supported.".to_string()));
    }
    if disk_type != 0x01 {
        return Err(A2Error::DiskFormat(format!("Unknown disk type: 0x{:02x}", disk_type)));
    }
    if flux_block != 0 && largest_flux != 0 {
        return Err(A2Error::DiskFormat("WOZ 2.1 FLUX chunk not currently supported.".to_string()));
    }

    disk.write_protect = write_protected != 0;

    log::info!(" INFO:");
    log::info!("  Version: {}", version);
    log::info!("  Disk type: {}", disk_type);
    log::info!("  Write protected: {}", write_protected);
    log::info!("  Synchronized: {}", synchronized);
    log::info!("  Cleaned: {}", cleaned);
    log::info!("  Creator: {}", creator);

    if woz2 {
        let hw: Vec<&str> = COMPAT_HW
            .iter()
            .enumerate()
            .filter(|(i, _)| compat_hw & (1 << i) != 0)
            .map(|(_, s)| *s)
            .collect();

        log::info!("  Optimal bit timing: {}", bit_timing);
        log::info!("  Compatible hardware: {}", if hw.is_empty() { "Unknown".to_string() } else { hw.join(", ") });
        if req_ram == 0 {
            log::info!("  Required RAM: Unknown");
        } else {
            log::info!("  Required RAM: {} KiB", req_ram);
        }
    }
    Ok(())
}

fn parse_trks_woz2(data: &[u8], chunk_pos: usize, num_src: usize) -> Result<Vec<Track>> {
    if num_src > WOZ2_TRK_ENTRIES {
        return Err(A2Error::DiskFormat(format!(
            "TMAP chunk entry {} is out of the range of the TRKS chunk TRK entries(0 through {}).",
            num_src - 1,
            WOZ2_TRK_ENTRIES - 1
        )));
    }

    let index = slice(data, chunk_pos, WOZ2_TRK_ENTRIES * 8)?;
    let mut tracks = Vec::with_capacity(num_src);

    for i in 0..num_src {
        let starting_block = le16(index, i * 8) as usize;
        let block_count = le16(index, i * 8 + 2) as u32;
        let bit_count = le32(index, i * 8 + 4);

        if bit_count > block_count * 8 * 512 {
            return Err(A2Error::DiskFormat(format!(
                "Bit count of TRKS chunk TRK entry {} is larger than the block count * 512 * 8!",
                i
            )));
        }
        check_bit_count(i, bit_count)?;

        let raw = slice(data, starting_block * 512, ((bit_count + 7) >> 3) as usize)?;

        log::info!("  Source track {}:", i);
        log::info!("    Starting block: {}", starting_block);
        log::info!("    Block count: {}", block_count);
        log::info!("    Bit count: {}", bit_count);

        tracks.push(encode_source_track(raw, bit_count));
    }
    Ok(tracks)
}

fn parse_trks_woz1(chunk: &[u8], num_src: usize) -> Result<Vec<Track>> {
    if chunk.len() != num_src * WOZ1_TRACK_SIZE {
        return Err(A2Error::WozChunkSize("TRKS"));
    }

    let mut tracks = Vec::with_capacity(num_src);
    for (i, trk) in chunk.chunks_exact(WOZ1_TRACK_SIZE).enumerate() {
        let bytes_used = le16(trk, 6646);
        let bit_count = le16(trk, 6648);
        let splice_point = le16(trk, 6650);
        let splice_nibble = trk[6652];
        let splice_bit_count = trk[6653];

        if bytes_used > 6646 {
            return Err(A2Error::DiskFormat(format!(
                "Bytes used of TRKS chunk TRK entry {} is larger than 6646!",
                i
            )));
        }
        if bit_count as u32 > bytes_used as u32 * 8 {
            return Err(A2Error::DiskFormat(format!(
                "Bit count of TRKS chunk TRK entry {} is larger than the number of bytes used * 8!",
                i
            )));
        }
        check_bit_count(i, bit_count as u32)?;

        log::info!("  Source track {}:", i);
        log::info!("    Bytes used: {}", bytes_used);
        log::info!("    Bit count: {}", bit_count);
        log::info!("    Splice point: {}", splice_point);
        log::info!("    Splice nibble: 0x{:02x}", splice_nibble);
        log::info!("    Splice bit count: {}", splice_bit_count);

        tracks.push(encode_source_track(trk, bit_count as u32));
    }
    Ok(tracks)
}

pub fn load_woz(data: &[u8], disk: &mut FloppyDisk) -> Result<()> {
    log::info!("Parsing WOZ-format disk image...");

    if !has_woz_header(data) {
        return Err(A2Error::DiskFormat("Bad or missing WOZ file header.".to_string()));
    }
    let woz2 = data[..8] == WOZ2_MAGIC;

    let mut have_info = false;
    let mut have_tmap = false;
    let mut have_trks = false;
    let mut tmap = [0xFFu8; NUM_TRACKS];
    let mut num_src = 0usize;

    let mut pos = 12;
    while pos + 8 <= data.len() {
        let chunk_id = le32(data, pos);
        let chunk_size = le32(data, pos + 4) as usize;
        let chunk_pos = pos + 8;

        match chunk_id {
            CHUNK_INFO => {
                if chunk_pos != 20 {
                    return Err(A2Error::WozChunkOffset("INFO"));
                }
                if chunk_size != 60 {
                    return Err(A2Error::WozChunkSize("INFO"));
                }
                parse_info(slice(data, chunk_pos, 60)?, woz2, disk)?;
                have_info = true;
            }
            CHUNK_TMAP => {
                if chunk_pos != 88 {
                    return Err(A2Error::WozChunkOffset("TMAP"));
                }
                if chunk_size != 160 {
                    return Err(A2Error::WozChunkSize("TMAP"));
                }
                tmap.copy_from_slice(slice(data, chunk_pos, 160)?);
                num_src = tmap.iter().filter(|&&t| t != 0xFF).map(|&t| t as usize + 1).max().unwrap_or(0);
                have_tmap = true;
            }
            CHUNK_TRKS => {
                if chunk_pos != 256 {
                    return Err(A2Error::WozChunkOffset("TRKS"));
                }

                log::info!(" TRKS:");
                let src_tracks = if woz2 {
                    parse_trks_woz2(data, chunk_pos, num_src)?
                } else {
                    parse_trks_woz1(slice(data, chunk_pos, chunk_size)?, num_src)?
                };

                for (dst, &src) in disk.tracks.iter_mut().zip(tmap.iter()) {
                    if src != 0xFF {
                        *dst = src_tracks[src as usize].clone();
                    }
                }
                have_trks = true;
            }
            _ => {}
        }

        pos = chunk_pos + chunk_size;
    }

    if !have_info {
        return Err(A2Error::WozMissingChunk("INFO"));
    }
    if !have_tmap {
        return Err(A2Error::WozMissingChunk("TMAP"));
    }
    if !have_trks {
        return Err(A2Error::WozMissingChunk("TRKS"));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// テスト用 WOZ2 イメージ（全クォータートラックがソーストラック0、ビットは 0xFF パターン）
    pub(crate) fn build_woz2(bit_count: u32, disk_type: u8) -> Vec<u8> {
        let bytes = ((bit_count + 7) / 8) as usize;
        let blocks = (bytes + 511) / 512;

        let mut f = vec![0u8; 1536 + blocks * 512];
        f[..8].copy_from_slice(&WOZ2_MAGIC);

        f[12..16].copy_from_slice(&CHUNK_INFO.to_le_bytes());
        f[16..20].copy_from_slice(&60u32.to_le_bytes());
        f[20] = 2;
        f[21] = disk_type;
        f[22] = 1;
        f[25..25 + 4].copy_from_slice(b"test");
        f[59] = 32;

        f[80..84].copy_from_slice(&CHUNK_TMAP.to_le_bytes());
        f[84..88].copy_from_slice(&160u32.to_le_bytes());
        for t in 0..160 {
            f[88 + t] = 0;
        }

        f[248..252].copy_from_slice(&CHUNK_TRKS.to_le_bytes());
        f[252..256].copy_from_slice(&((1280 + blocks * 512) as u32).to_le_bytes());
        f[256..258].copy_from_slice(&3u16.to_le_bytes());
        f[258..260].copy_from_slice(&(blocks as u16).to_le_bytes());
        f[260..264].copy_from_slice(&bit_count.to_le_bytes());

        for b in &mut f[1536..1536 + bytes] {
            *b = 0xFF;
        }
        f
    }

    #[test]
    fn test_track_length_boundaries() {
        for bits in [MIN_BITS_PER_TRACK, MAX_BITS_PER_TRACK] {
            let mut disk = FloppyDisk::new();
            load_woz(&build_woz2(bits, 1), &mut disk).unwrap();
            assert_eq!(disk.tracks[0].length, bits);
            assert_eq!(disk.tracks[159].length, bits);
            assert!(disk.write_protect);
        }

        for bits in [MIN_BITS_PER_TRACK - 1, MAX_BITS_PER_TRACK + 1] {
            let mut disk = FloppyDisk::new();
            match load_woz(&build_woz2(bits, 1), &mut disk) {
                Err(A2Error::TrackBitCount { entry: 0, bits: b, min, max }) => {
                    assert_eq!(b, bits);
                    assert_eq!((min, max), (46000, 56048));
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn test_bit_count_error_message() {
        let mut disk = FloppyDisk::new();
        let msg = load_woz(&build_woz2(45999, 1), &mut disk).unwrap_err().to_string();
        assert_eq!(
            msg,
            "Bit count(45999) of TRKS chunk TRK entry 0 is out of the acceptable range of 46000 through 56048!"
        );
    }

    #[test]
    fn test_all_ones_become_alternating_levels() {
        let mut disk = FloppyDisk::new();
        load_woz(&build_woz2(50000, 1), &mut disk).unwrap();
        let t = &disk.tracks[10];
        assert!(t.bit(0));
        assert!(!t.bit(1));
        assert!(t.bit(2));
        // 50000 は偶数なので終端で元のレベルに戻る
        assert!(!t.flux_fudge);
    }

    #[test]
    fn test_bad_header_and_disk_type() {
        let mut disk = FloppyDisk::new();
        let mut f = build_woz2(50000, 1);
        f[3] = b'3';
        assert_eq!(
            load_woz(&f, &mut disk).unwrap_err().to_string(),
            "Bad or missing WOZ file header."
        );

        let f = build_woz2(50000, 2);
        assert_eq!(
            load_woz(&f, &mut disk).unwrap_err().to_string(),
            "3.5\" floppy disk images not currently supported."
        );

        let f = build_woz2(50000, 7);
        assert_eq!(load_woz(&f, &mut disk).unwrap_err().to_string(), "Unknown disk type: 0x07");
    }

    #[test]
    fn test_missing_chunk() {
        let mut disk = FloppyDisk::new();
        let f = build_woz2(50000, 1);
        // TRKS チャンクより前で切る
        let msg = load_woz(&f[..248], &mut disk).unwrap_err().to_string();
        assert_eq!(msg, "Required chunk \"TRKS\" is missing.");
    }

    #[test]
    fn test_chunk_at_wrong_offset() {
        let mut disk = FloppyDisk::new();
        let mut f = build_woz2(50000, 1);
        f[16..20].copy_from_slice(&61u32.to_le_bytes());
        assert!(matches!(load_woz(&f, &mut disk), Err(A2Error::WozChunkSize("INFO"))));
    }

    #[test]
    fn test_tmap_entry_past_trk_table() {
        let mut disk = FloppyDisk::new();
        let mut f = build_woz2(50000, 1);
        // 160 エントリすべて有効にしても 200 番は存在しない
        for i in 1..160 {
            f.copy_within(256..264, 256 + i * 8);
        }
        f[88] = 200;
        match load_woz(&f, &mut disk) {
            Err(A2Error::DiskFormat(msg)) => assert!(msg.contains("TMAP chunk entry 200"), "{}", msg),
            other => panic!("unexpected: {:?}", other),
        }

        // 159 番までは受け付ける
        f[88] = 159;
        load_woz(&f, &mut disk).unwrap();
    }

    #[test]
    fn test_trk_blocks_past_end_of_file() {
        let mut disk = FloppyDisk::new();
        let mut f = build_woz2(50000, 1);
        f[256..258].copy_from_slice(&40u16.to_le_bytes());
        match load_woz(&f, &mut disk) {
            Err(A2Error::DiskFormat(msg)) => assert_eq!(msg, "Unexpected end of WOZ file."),
            other => panic!("unexpected: {:?}", other),
        }

        // ビットデータの途中でファイルが終わっている
        let f = build_woz2(50000, 1);
        assert!(matches!(load_woz(&f[..1536 + 1000], &mut disk), Err(A2Error::DiskFormat(_))));
    }

    #[test]
    fn test_woz1_track() {
        let mut f = vec![0u8; 256 + WOZ1_TRACK_SIZE];
        f[..8].copy_from_slice(&WOZ1_MAGIC);
        f[12..16].copy_from_slice(&CHUNK_INFO.to_le_bytes());
        f[16..20].copy_from_slice(&60u32.to_le_bytes());
        f[20] = 1;
        f[21] = 1;
        f[80..84].copy_from_slice(&CHUNK_TMAP.to_le_bytes());
        f[84..88].copy_from_slice(&160u32.to_le_bytes());
        for t in 0..160 {
            f[88 + t] = if t < 4 { 0 } else { 0xFF };
        }
        f[248..252].copy_from_slice(&CHUNK_TRKS.to_le_bytes());
        f[252..256].copy_from_slice(&(WOZ1_TRACK_SIZE as u32).to_le_bytes());
        let trk = &mut f[256..];
        trk[0] = 0x80;
        trk[6646..6648].copy_from_slice(&6400u16.to_le_bytes());
        trk[6648..6650].copy_from_slice(&51000u16.to_le_bytes());

        let mut disk = FloppyDisk::new();
        load_woz(&f, &mut disk).unwrap();
        assert_eq!(disk.tracks[3].length, 51000);
        assert_eq!(disk.tracks[4].length, super::super::DEFAULT_BITS_PER_TRACK);
        assert!(disk.tracks[0].bit(0));
        assert!(disk.tracks[0].bit(1));
        // 奇数個の反転で終わるので fudge が立つ
        assert!(disk.tracks[0].flux_fudge);
    }
}
