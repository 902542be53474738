//! エラー型
//!
//! ロード時（ROM、ディスクイメージ、設定、ステートセーブ）のエラーはすべて
//! `A2Error` で呼び出し元へ返す。エミュレーション実行中はエラーを返さない。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum A2Error {
    #[error("I/O error on \"{path}\": {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// ファームウェアのサイズ不一致
    #[error("Firmware file \"{path}\" for \"{purpose}\" is {actual} bytes, expected {expected}.")]
    FirmwareSize {
        purpose: String,
        path: String,
        expected: usize,
        actual: usize,
    },

    /// ハッシュ不一致（Disk II ROMなど）
    #[error("Firmware data for \"{purpose}\" in file \"{path}\" is corrupt or otherwise wrong.")]
    FirmwareHash { purpose: String, path: String },

    #[error("Bad video ROM dump detected.")]
    BadVideoRom,

    /// ディスクイメージの形式エラー
    #[error("{0}")]
    DiskFormat(String),

    #[error("Required chunk \"{0}\" is missing.")]
    WozMissingChunk(&'static str),

    #[error("Required chunk \"{0}\" is at the wrong offset.")]
    WozChunkOffset(&'static str),

    #[error("Required chunk \"{0}\" is of the wrong size.")]
    WozChunkSize(&'static str),

    #[error("Bit count({bits}) of TRKS chunk TRK entry {entry} is out of the acceptable range of {min} through {max}!")]
    TrackBitCount {
        entry: usize,
        bits: u32,
        min: u32,
        max: u32,
    },

    #[error("The length of AFD track {track}, {length}, is out of the supported range of {min} through {max}.")]
    AfdTrackLength {
        track: usize,
        length: u32,
        min: u32,
        max: u32,
    },

    #[error("Apple II floppy disk image is in an unidentified or unsupported format.")]
    UnknownDiskFormat,

    /// 設定エラー
    #[error("{0}")]
    Config(String),

    #[error("Save state error: {0}")]
    State(String),
}

impl A2Error {
    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        A2Error::Io {
            path: path.to_string(),
            source,
        }
    }
}

impl From<serde_json::Error> for A2Error {
    fn from(e: serde_json::Error) -> Self {
        A2Error::State(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, A2Error>;
