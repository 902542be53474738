//! ニブル符号化（6-and-2 / 5-and-3 / 4-and-4）とセクタ復号
//!
//! 復号はエンコードの逆変換で、チェックサム（XOR 連鎖）が合わなければ失敗する。

use super::Track;

/// 6-and-2 変換テーブル
pub const TAB_62: [u8; 0x40] = [
    0x96, 0x97, 0x9A, 0x9B, 0x9D, 0x9E, 0x9F, 0xA6, 0xA7, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, 0xB2, 0xB3,
    0xB4, 0xB5, 0xB6, 0xB7, 0xB9, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE, 0xBF, 0xCB, 0xCD, 0xCE, 0xCF, 0xD3,
    0xD6, 0xD7, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE, 0xDF, 0xE5, 0xE6, 0xE7, 0xE9, 0xEA, 0xEB, 0xEC,
    0xED, 0xEE, 0xEF, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF,
];

/// 5-and-3 変換テーブル
pub const TAB_53: [u8; 0x20] = [
    0xAB, 0xAD, 0xAE, 0xAF, 0xB5, 0xB6, 0xB7, 0xBA, 0xBB, 0xBD, 0xBE, 0xBF, 0xD6, 0xD7, 0xDA, 0xDB,
    0xDD, 0xDE, 0xDF, 0xEA, 0xEB, 0xED, 0xEE, 0xEF, 0xF5, 0xF6, 0xF7, 0xFA, 0xFB, 0xFD, 0xFE, 0xFF,
];

const INVALID: u8 = 0xFF;

const fn build_reverse(tab: &[u8]) -> [u8; 256] {
    let mut r = [INVALID; 256];
    let mut i = 0;
    while i < tab.len() {
        r[tab[i] as usize] = i as u8;
        i += 1;
    }
    r
}

static RTAB_62: [u8; 256] = build_reverse(&TAB_62);
static RTAB_53: [u8; 256] = build_reverse(&TAB_53);

/// 6-and-2 データフィールドのニブル数
pub const NIBBLES_62: usize = 343;
/// 5-and-3 データフィールドのニブル数
pub const NIBBLES_53: usize = 411;

/// 4-and-4 の復号
#[inline]
pub fn decode_oddeven(odd: u8, even: u8) -> u8 {
    ((odd << 1) | (odd >> 7)) & even
}

#[inline]
fn swap_low2(v: u8) -> u8 {
    ((v << 1) | (v >> 1)) & 0x3
}

/// XOR 連鎖でテーブル変換
fn chain_encode<const N: usize>(buf: &[u8], tab: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let mut prev = 0u8;
    for (o, &b) in out.iter_mut().zip(buf.iter()) {
        *o = tab[(prev ^ b) as usize];
        prev = b;
    }
    out[N - 1] = tab[prev as usize];
    out
}

fn chain_decode(nibs: &[u8], rtab: &[u8; 256], buf: &mut [u8]) -> Option<()> {
    if nibs.len() < buf.len() + 1 {
        return None;
    }

    let mut prev = 0u8;
    for (b, &n) in buf.iter_mut().zip(nibs.iter()) {
        let v = rtab[n as usize];
        if v == INVALID {
            return None;
        }
        *b = v ^ prev;
        prev = *b;
    }

    // チェックサム
    (rtab[nibs[buf.len()] as usize] == prev).then_some(())
}

/// 256バイトを 6-and-2 で 343 ニブルに
pub fn encode_62(ud: &[u8; 256]) -> [u8; NIBBLES_62] {
    let mut buf = [0u8; 342];

    for (i, &v) in ud.iter().enumerate() {
        buf[i % 86] |= swap_low2(v & 0x3) << ((i / 86) * 2);
        buf[86 + i] = v >> 2;
    }

    chain_encode(&buf, &TAB_62)
}

pub fn decode_62(nibs: &[u8]) -> Option<[u8; 256]> {
    let mut buf = [0u8; 342];
    chain_decode(nibs, &RTAB_62, &mut buf)?;

    let mut ud = [0u8; 256];
    for (i, u) in ud.iter_mut().enumerate() {
        let lb = (buf[i % 86] >> ((i / 86) * 2)) & 0x3;
        *u = (buf[86 + i] << 2) | swap_low2(lb);
    }
    Some(ud)
}

/// 256バイトを 5-and-3 で 411 ニブルに
pub fn encode_53(ud: &[u8; 256]) -> [u8; NIBBLES_53] {
    let mut buf = [0u8; 410];

    for g in 0..0x33 {
        let u = &ud[g * 5..g * 5 + 5];

        buf[0x0CC - g] = u[0] >> 3;
        buf[0x0FF - g] = u[1] >> 3;
        buf[0x132 - g] = u[2] >> 3;
        buf[0x165 - g] = u[3] >> 3;
        buf[0x198 - g] = u[4] >> 3;

        buf[0x67 + g] = ((u[0] & 0x7) << 2) | ((u[3] & 0x4) >> 1) | ((u[4] & 0x4) >> 2);
        buf[0x34 + g] = ((u[1] & 0x7) << 2) | (u[3] & 0x2) | ((u[4] & 0x2) >> 1);
        buf[0x01 + g] = ((u[2] & 0x7) << 2) | ((u[3] & 0x1) << 1) | (u[4] & 0x1);
    }
    buf[0x000] = ud[0xFF] & 0x7;
    buf[0x199] = ud[0xFF] >> 3;

    chain_encode(&buf, &TAB_53)
}

pub fn decode_53(nibs: &[u8]) -> Option<[u8; 256]> {
    let mut t = [0u8; 410];
    chain_decode(nibs, &RTAB_53, &mut t)?;

    let mut ud = [0u8; 256];
    for g in 0..0x33 {
        let (t67, t34, t01) = (t[0x67 + g], t[0x34 + g], t[0x01 + g]);

        ud[g * 5] = (t[0x0CC - g] << 3) | (t67 >> 2);
        ud[g * 5 + 1] = (t[0x0FF - g] << 3) | (t34 >> 2);
        ud[g * 5 + 2] = (t[0x132 - g] << 3) | (t01 >> 2);
        ud[g * 5 + 3] = (t[0x165 - g] << 3) | ((t67 & 0x2) << 1) | (t34 & 0x2) | ((t01 & 0x2) >> 1);
        ud[g * 5 + 4] = (t[0x198 - g] << 3) | ((t67 & 0x1) << 2) | ((t34 & 0x1) << 1) | (t01 & 0x1);
    }
    ud[0xFF] = (t[0x199] << 3) | (t[0x000] & 0x7);
    Some(ud)
}

/// トラックから読み出したニブル列（2周分）
pub struct Nibbles {
    pub bytes: Vec<u8>,
    /// 1周目に完成したニブル数
    pub first_rev: usize,
}

/// 磁束反転を検出して 8 ビットずつニブルに組み立てる
///
/// 先頭ビットが '1' になるまで読み飛ばすので、セルフシンクの余分な '0' は消える。
pub fn read_nibbles(track: &Track) -> Nibbles {
    let len = track.length as usize;
    let mut bytes = Vec::with_capacity(len * 2 / 8);
    let mut first_rev = 0;
    let mut prev_m = false;
    let mut fc_history: u32 = 0;
    let mut bit_counter = 0;

    for i in 0..len * 2 {
        if i == len {
            first_rev = bytes.len();
        }

        let m = track.bit(i % len);
        fc_history = (fc_history << 1) | (prev_m ^ m) as u32;
        prev_m = m;

        if bit_counter != 0 || (fc_history & 1) != 0 {
            bit_counter += 1;
            if bit_counter == 8 {
                bit_counter = 0;
                bytes.push(fc_history as u8);
            }
        }
    }

    Nibbles { bytes, first_rev }
}

/// 復号したセクタ
#[derive(Debug, Clone)]
pub struct DecodedSector {
    pub volume: u8,
    pub track: u8,
    pub sector: u8,
    /// 16セクタ形式（D5 AA 96）か
    pub dos33: bool,
    /// データフィールドが見つからないかチェックサム不一致なら None
    pub data: Option<[u8; 256]>,
}

/// アドレスフィールドの後ろでデータフィールドを探す範囲（ニブル数）
const DATA_FIELD_SEARCH: usize = 64;

fn find_data_field(b: &[u8], start: usize, dos33: bool) -> Option<[u8; 256]> {
    let end = (start + DATA_FIELD_SEARCH).min(b.len().saturating_sub(3));

    for j in start..end {
        if b[j] != 0xD5 || b[j + 1] != 0xAA {
            continue;
        }
        match b[j + 2] {
            0xAD => {
                let payload = &b[j + 3..];
                return if dos33 { decode_62(payload) } else { decode_53(payload) };
            }
            // 次のアドレスフィールドに到達
            0x96 | 0xB5 => return None,
            _ => {}
        }
    }
    None
}

/// トラック上のセクタをすべて復号する（セクタ番号の重複は最初のものを採用）
pub fn decode_track(track: &Track) -> Vec<DecodedSector> {
    let nibs = read_nibbles(track);
    decode_sectors(&nibs.bytes, nibs.first_rev)
}

/// ディスクバイト列からセクタを取り出す（アドレスフィールドは先頭 `limit` バイト内）
pub fn decode_sectors(b: &[u8], limit: usize) -> Vec<DecodedSector> {
    let mut out: Vec<DecodedSector> = Vec::new();
    let mut i = 0;

    while i < limit && i + 11 <= b.len() {
        let is_addr = b[i] == 0xD5 && b[i + 1] == 0xAA && (b[i + 2] == 0x96 || b[i + 2] == 0xB5);
        if !is_addr {
            i += 1;
            continue;
        }

        let dos33 = b[i + 2] == 0x96;
        let volume = decode_oddeven(b[i + 3], b[i + 4]);
        let track_num = decode_oddeven(b[i + 5], b[i + 6]);
        let sector = decode_oddeven(b[i + 7], b[i + 8]);
        let csum = decode_oddeven(b[i + 9], b[i + 10]);

        if (volume ^ track_num ^ sector ^ csum) == 0 && !out.iter().any(|s| s.sector == sector) {
            out.push(DecodedSector {
                volume,
                track: track_num,
                sector,
                dos33,
                data: find_data_field(b, i + 11, dos33),
            });
        }
        i += 11;
    }

    out
}
