//! a2disk - ディスクイメージのツール
//!
//! 使い方:
//!   a2disk identify <IMAGE>
//!   a2disk sectors <IMAGE> [--track N]
//!   a2disk export <IMAGE> <OUT> [--order dos|prodos|d13]
//!   a2disk convert <IMAGE> <OUT.afd>
//!
//! ログは RUST_LOG で指定する（例: RUST_LOG=debug）。

use a2core::floppy::image::{export_sectors, SectorOrder};
use a2core::floppy::nibble::decode_track;
use a2core::floppy::{afd, load_disk_file, FloppyDisk, NUM_TRACKS};
use a2core::A2Error;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// セクタ形式のトラック数
const APPLE_TRACKS: i64 = 35;

#[derive(Parser)]
#[command(name = "a2disk", version, about = "Apple II disk image tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show format, write protect, hash and track lengths
    Identify { image: PathBuf },
    /// List decoded sectors per track
    Sectors {
        image: PathBuf,
        /// Only this Apple track (0-34)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..APPLE_TRACKS))]
        track: Option<u8>,
    },
    /// Write a sector image (.dsk/.po/.d13)
    Export {
        image: PathBuf,
        out: PathBuf,
        /// Sector order; guessed from the output extension if omitted
        #[arg(short, long, value_enum)]
        order: Option<OrderArg>,
    },
    /// Write an AFD image
    Convert { image: PathBuf, out: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Dos,
    Prodos,
    D13,
}

impl From<OrderArg> for SectorOrder {
    fn from(o: OrderArg) -> Self {
        match o {
            OrderArg::Dos => SectorOrder::Dos,
            OrderArg::Prodos => SectorOrder::ProDos,
            OrderArg::D13 => SectorOrder::D13,
        }
    }
}

/// 出力ファイルの拡張子からセクタ順を決める
fn order_from_path(path: &Path) -> SectorOrder {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "po" => SectorOrder::ProDos,
        Some(ext) if ext == "d13" => SectorOrder::D13,
        _ => SectorOrder::Dos,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn identify(path: &Path, disk: &FloppyDisk) {
    println!("Image:         {}", path.display());
    println!("Write protect: {}", if disk.write_protect { "yes" } else { "no" });
    println!("13-sector:     {}", if disk.detect_dos32() { "yes" } else { "no" });
    println!("SHA-256:       {}", hex(&disk.hash()));
    println!();

    // 1/4トラックごとの長さ（整数トラックのみ表示）
    for t in (0..NUM_TRACKS).step_by(4) {
        let track = &disk.tracks[t];
        println!(
            "  track {:2}: {:5} bits{}",
            t / 4,
            track.length,
            if track.flux_fudge { " (fudge)" } else { "" }
        );
    }
}

fn sectors(disk: &FloppyDisk, only: Option<u8>) {
    for apple_track in 0..NUM_TRACKS / 4 {
        if only.is_some_and(|t| t as usize != apple_track) {
            continue;
        }

        let decoded = decode_track(&disk.tracks[apple_track * 4]);
        if decoded.is_empty() {
            println!("T{:02}: no sectors", apple_track);
            continue;
        }

        for s in &decoded {
            println!(
                "T{:02}: vol={:3} track={:2} sector={:2} {} {}",
                apple_track,
                s.volume,
                s.track,
                s.sector,
                if s.dos33 { "6&2" } else { "5&3" },
                if s.data.is_some() { "ok" } else { "BAD" }
            );
        }
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), A2Error> {
    fs::write(path, data).map_err(|source| A2Error::Io {
        path: path.display().to_string(),
        source,
    })
}

fn run(cli: Cli) -> Result<(), A2Error> {
    match cli.command {
        Command::Identify { image } => {
            let disk = load_disk_file(&image)?;
            identify(&image, &disk);
        }
        Command::Sectors { image, track } => {
            let disk = load_disk_file(&image)?;
            sectors(&disk, track);
        }
        Command::Export { image, out, order } => {
            let disk = load_disk_file(&image)?;
            let order = order.map(SectorOrder::from).unwrap_or_else(|| order_from_path(&out));
            let data = export_sectors(&disk, order)?;
            write_file(&out, &data)?;
            log::info!("Wrote {} bytes to \"{}\"", data.len(), out.display());
        }
        Command::Convert { image, out } => {
            let disk = load_disk_file(&image)?;
            afd::save_afd(&disk, &out)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
