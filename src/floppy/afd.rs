//! AFD 形式（磁束レベル列をそのまま保存するネイティブ形式）
//!
//! ヘッダ16バイト: "MDFNAFD"、エンディアンフラグ、バージョン（u32 LE）、フラグ（bit0 = 書き込み禁止）。
//! 続いて160トラック分: 長さ（u32）、fudge、予約3バイト、2048ワードのビット列。

use super::{FloppyDisk, Track, MAX_BITS_PER_TRACK, MIN_BITS_PER_TRACK, NUM_TRACKS};
use crate::error::{A2Error, Result};
use std::io::Write;
use std::path::Path;

pub const AFD_MAGIC: &[u8; 7] = b"MDFNAFD";
const AFD_VERSION: u32 = 0;
const HEADER_SIZE: usize = 16;
const TRACK_HEADER_SIZE: usize = 8;

pub fn has_afd_header(data: &[u8]) -> bool {
    data.len() >= HEADER_SIZE && &data[..7] == AFD_MAGIC
}

/// AFD ファイルのサイズ
pub fn afd_image_size() -> usize {
    HEADER_SIZE + NUM_TRACKS * (TRACK_HEADER_SIZE + Track::word_count() * 4)
}

pub fn load_afd(data: &[u8], disk: &mut FloppyDisk) -> Result<()> {
    if !has_afd_header(data) {
        return Err(A2Error::DiskFormat("Bad or missing AFD file header.".to_string()));
    }
    if data.len() < afd_image_size() {
        return Err(A2Error::DiskFormat("AFD file is truncated.".to_string()));
    }

    let big_endian = data[7] != 0;
    let version = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let flags = data[12];
    log::info!("AFD version {}{}", version, if big_endian { " (big-endian)" } else { "" });

    disk.write_protect = flags & 1 != 0;

    let mut pos = HEADER_SIZE;
    for (index, track) in disk.tracks.iter_mut().enumerate() {
        let th = &data[pos..pos + TRACK_HEADER_SIZE];
        let length = u32::from_le_bytes([th[0], th[1], th[2], th[3]]);
        let fudge = th[4] & 1 != 0;
        pos += TRACK_HEADER_SIZE;

        if !(MIN_BITS_PER_TRACK..=MAX_BITS_PER_TRACK).contains(&length) {
            return Err(A2Error::AfdTrackLength {
                track: index,
                length,
                min: MIN_BITS_PER_TRACK,
                max: MAX_BITS_PER_TRACK,
            });
        }

        track.length = length;
        track.flux_fudge = fudge;
        for (w, b) in track.data.iter_mut().zip(data[pos..].chunks_exact(4)) {
            let bytes = [b[0], b[1], b[2], b[3]];
            *w = if big_endian {
                u32::from_be_bytes(bytes)
            } else {
                u32::from_le_bytes(bytes)
            };
        }
        pos += Track::word_count() * 4;
    }

    Ok(())
}

/// AFD 形式で書き出す（常にリトルエンディアン）
pub fn write_afd<W: Write>(disk: &FloppyDisk, w: &mut W) -> std::io::Result<()> {
    let mut header = [0u8; HEADER_SIZE];
    header[..7].copy_from_slice(AFD_MAGIC);
    header[7] = 0;
    header[8..12].copy_from_slice(&AFD_VERSION.to_le_bytes());
    header[12] = disk.write_protect as u8;
    w.write_all(&header)?;

    let mut buf = Vec::with_capacity(TRACK_HEADER_SIZE + Track::word_count() * 4);
    for track in &disk.tracks {
        buf.clear();
        buf.extend_from_slice(&track.length.to_le_bytes());
        buf.extend_from_slice(&[track.flux_fudge as u8, 0, 0, 0]);
        for v in &track.data {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        w.write_all(&buf)?;
    }
    Ok(())
}

pub fn save_afd<P: AsRef<Path>>(disk: &FloppyDisk, path: P) -> Result<()> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let file = std::fs::File::create(path).map_err(|e| A2Error::io(&name, e))?;
    let mut w = std::io::BufWriter::new(file);
    write_afd(disk, &mut w)
        .and_then(|_| w.flush())
        .map_err(|e| A2Error::io(&name, e))?;

    log::info!("Saved AFD disk image \"{}\"", name);
    Ok(())
}
