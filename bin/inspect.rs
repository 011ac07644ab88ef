/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # STRATA file inspector
//!
//! Prints file metadata from the header alone without decompressing any
//! data blocks. `--stats` adds per-column statistics; `--verify` loads the
//! table under both decode strategies and cross-checks every cell.

use anyhow::Context;
use std::env;
use std::fs;
use std::process;
use strata::Table;
use strata::serialization::parse_metadata;
use strata::serialization::parse_metadata_with_stats;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} <file.strata> [--stats] [--verify]\n\
         \n\
         --stats    Include per-column min/max/mean/cardinality\n\
         --verify   Fully load the table and cross-check both decode strategies",
        program
    );
    process::exit(1);
}

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
    }
    let file_path = &args[1];
    let mut with_stats = false;
    let mut verify = false;
    for arg in &args[2..] {
        match arg.as_str() {
            "--stats" => with_stats = true,
            "--verify" => verify = true,
            other => {
                eprintln!("✗ Unknown option '{}'", other);
                usage(&args[0]);
            }
        }
    }

    let bytes =
        fs::read(file_path).with_context(|| format!("Failed to read '{}'", file_path))?;

    let metadata = if with_stats {
        parse_metadata_with_stats(&bytes)
    } else {
        parse_metadata(&bytes)
    };
    let metadata = match metadata {
        Ok(metadata) => metadata,
        Err(e) => {
            eprintln!("✗ Not a readable STRATA file: {}", e);
            process::exit(1);
        }
    };

    println!("=== FILE INFORMATION ===");
    println!("File:             {}", file_path);
    println!("File size:        {} bytes", bytes.len());
    println!("Rows:             {}", metadata.row_count);
    println!("Columns:          {}", metadata.column_count);
    println!("Estimated memory: {:.2} MB", metadata.estimated_memory_mb);

    println!("\n=== COLUMN DETAILS ===");
    for column in &metadata.columns {
        print!(
            "  {} ({}): {} chunks",
            column.name, column.column_type, column.chunk_count
        );
        if let Some(stats) = &column.stats {
            print!(
                ", min {}, max {}, mean {:.3}, cardinality {}",
                stats.min, stats.max, stats.mean, stats.cardinality
            );
        }
        println!();
    }

    if verify {
        println!("\n=== VERIFICATION ===");
        if let Err(e) = run_verification(&bytes, metadata.row_count) {
            eprintln!("✗ Verification failed: {}", e);
            process::exit(1);
        }
        println!("✓ Both decode strategies agree on every cell");
    }

    println!("\n✓ Inspection complete");
    Ok(())
}

fn run_verification(bytes: &[u8], expected_rows: usize) -> anyhow::Result<()> {
    let eager = Table::from_bytes(bytes)?;
    let lazy = Table::from_bytes_with_strategy(bytes, true)?;
    println!("✓ Eager load: {} rows", eager.row_count());
    println!("✓ Lazy load:  {} rows", lazy.row_count());

    anyhow::ensure!(
        eager.row_count() == expected_rows && lazy.row_count() == expected_rows,
        "row counts diverge from the header ({} header, {} eager, {} lazy)",
        expected_rows,
        eager.row_count(),
        lazy.row_count()
    );

    for name in eager.column_names() {
        let dense_eager = eager.get_column_dense(name)?;
        let dense_lazy = lazy.get_column_dense(name)?;
        anyhow::ensure!(
            dense_eager == dense_lazy,
            "column '{}' differs between decode strategies",
            name
        );
    }
    Ok(())
}
