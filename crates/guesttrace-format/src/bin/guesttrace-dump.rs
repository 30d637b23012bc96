//! Inspect finished guest instruction trace files.
//!
//! # Usage
//!
//! ```bash
//! # Frame and record statistics
//! guesttrace-dump summary --trace out.zst
//!
//! # Print records, one line each
//! guesttrace-dump dump --trace out.zst --max 100
//!
//! # Export every record as JSON
//! guesttrace-dump export --trace out.zst --output records.json
//! ```

use clap::{Parser, Subcommand};
use guesttrace_format::{Frame, FrameEncoding, FrameReader, MemoryKind, ReadError};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "guesttrace-dump")]
#[command(about = "Inspect guest instruction trace files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show frame and record statistics for a trace file.
    Summary {
        /// Path to the trace file.
        #[arg(short, long)]
        trace: PathBuf,
    },

    /// Print records one line at a time.
    Dump {
        /// Path to the trace file.
        #[arg(short, long)]
        trace: PathBuf,

        /// Maximum records to print (0 = all).
        #[arg(short, long, default_value = "0")]
        max: u64,
    },

    /// Export all records as JSON.
    Export {
        /// Path to the trace file.
        #[arg(short, long)]
        trace: PathBuf,

        /// Output JSON path.
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Summary { trace } => cmd_summary(trace),
        Commands::Dump { trace, max } => cmd_dump(trace, max),
        Commands::Export { trace, output } => cmd_export(trace, output),
    }
}

fn read_frames(trace: &PathBuf) -> Vec<Frame> {
    let frames: Result<Vec<Frame>, ReadError> =
        FrameReader::open(trace).and_then(|mut r| r.read_all());
    match frames {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to read {}: {}", trace.display(), e);
            std::process::exit(1);
        }
    }
}

fn cmd_summary(trace: PathBuf) {
    let frames = read_frames(&trace);

    let mut records = 0usize;
    let mut loads = 0usize;
    let mut stores = 0usize;
    let mut taken = 0usize;
    let mut raw_frames = 0usize;

    for frame in &frames {
        records += frame.records.len();
        if frame.encoding == FrameEncoding::Raw {
            raw_frames += 1;
        }
        for rec in &frame.records {
            match rec.memory_fact().map(|m| m.kind) {
                Some(MemoryKind::Load) => loads += 1,
                Some(MemoryKind::Store) => stores += 1,
                None => {}
            }
            if rec.branch_taken {
                taken += 1;
            }
        }
    }

    println!("Trace: {}", trace.display());
    println!("Frames: {} ({} raw fallback)", frames.len(), raw_frames);
    println!("Records: {}", records);
    if records > 0 {
        let pct = |n: usize| n as f64 / records as f64 * 100.0;
        println!("  loads:  {:>10} ({:>5.1}%)", loads, pct(loads));
        println!("  stores: {:>10} ({:>5.1}%)", stores, pct(stores));
        println!("  taken:  {:>10} ({:>5.1}%)", taken, pct(taken));
    }
    for frame in &frames {
        println!(
            "  frame {:>4}: {:>8} records ({})",
            frame.index,
            frame.records.len(),
            match frame.encoding {
                FrameEncoding::Raw => "raw",
                FrameEncoding::Zstd => "zstd",
            }
        );
    }
}

fn cmd_dump(trace: PathBuf, max: u64) {
    let frames = read_frames(&trace);

    let mut printed = 0u64;
    'outer: for frame in &frames {
        for rec in &frame.records {
            println!("[{:>8}] {}", printed, rec);
            printed += 1;
            if max > 0 && printed >= max {
                break 'outer;
            }
        }
    }
    eprintln!("{} records", printed);
}

fn cmd_export(trace: PathBuf, output: PathBuf) {
    let frames = read_frames(&trace);
    let records: Vec<_> = frames.into_iter().flat_map(|f| f.records).collect();

    let json = match serde_json::to_string_pretty(&records) {
        Ok(j) => j,
        Err(e) => {
            eprintln!("Failed to serialize records: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = std::fs::write(&output, json) {
        eprintln!("Failed to write {}: {}", output.display(), e);
        std::process::exit(1);
    }
    eprintln!("Exported {} records to {}", records.len(), output.display());
}
