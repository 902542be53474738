//! 診断ログ
//!
//! 原則:
//! 1. カテゴリごとにマスクで有効化する（インスタンスごとのマスク、グローバル状態なし）
//! 2. `diagnostics` フィーチャ無効時は `a2_dbg!` がまるごと消える
//! 3. 出力は `log::debug!` 経由（env_logger で表示）

bitflags::bitflags! {
    /// 診断カテゴリ
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct DebugMask: u32 {
        /// 状態破損など（診断ビルドでは常に有効）
        const ERROR              = 0x0001;
        const WARNING            = 0x0002;
        /// 未接続アドレスからの読み取り
        const UNK_READ           = 0x0004;
        /// 未接続アドレスへの書き込み
        const UNK_WRITE          = 0x0008;
        /// 未初期化RAMからの読み取り
        const UNINITIALIZED_READ = 0x0010;
        /// ROM読み取り・ROM呼び出し
        const BIOS               = 0x0020;
        /// DOS領域アクセス
        const DOS                = 0x0040;
        /// Disk II
        const DISK2              = 0x0080;
    }
}

/// 診断ビルドかどうか（コンパイル時定数）
pub const ENABLED: bool = cfg!(feature = "diagnostics");

impl DebugMask {
    /// `+` 区切りの文字列からマスクを作る（例: "unk_read+disk2", "all"）
    pub fn parse(s: &str) -> DebugMask {
        let mut mask = DebugMask::ERROR;

        for part in s.to_lowercase().split('+') {
            match part.trim() {
                "" | "none" => {}
                "error" => mask |= DebugMask::ERROR,
                "warning" => mask |= DebugMask::WARNING,
                "unk_read" => mask |= DebugMask::UNK_READ,
                "unk_write" => mask |= DebugMask::UNK_WRITE,
                "uninit" | "uninitialized_read" => mask |= DebugMask::UNINITIALIZED_READ,
                "bios" => mask |= DebugMask::BIOS,
                "dos" => mask |= DebugMask::DOS,
                "disk2" => mask |= DebugMask::DISK2,
                "all" => mask = DebugMask::all(),
                other => log::warn!("Unknown debug mask category \"{}\"", other),
            }
        }

        mask
    }

    /// カテゴリが有効か（非診断ビルドでは常にfalse）
    #[inline(always)]
    pub fn is_enabled(self, flag: DebugMask) -> bool {
        ENABLED && self.intersects(flag)
    }
}

/// マスク付き診断出力
///
/// `a2_dbg!(mask, DebugMask::DISK2, "[DISK2] ...", args)`
#[macro_export]
macro_rules! a2_dbg {
    ($mask:expr, $flag:expr, $($arg:tt)+) => {
        if $crate::debug::ENABLED && $mask.is_enabled($flag) {
            log::debug!($($arg)+);
        }
    };
}
