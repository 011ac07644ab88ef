/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # CSV to STRATA converter
//!
//! Infers a schema from the CSV sample, prints it, builds the chunked table
//! with a progress readout, and writes the compressed portable file.

use anyhow::Context;
use anyhow::bail;
use std::env;
use std::fs;
use std::process;
use strata::SchemaAnalyzer;
use strata::compression::CompressionType;
use strata::compression::DEFAULT_ZSTD_LEVEL;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

struct Options {
    input: String,
    output: String,
    compression: CompressionType,
    level: i32,
    chunk_size: Option<usize>,
    sample_size: Option<usize>,
}

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} <input.csv> <output.strata> [options]\n\
         \n\
         Options:\n\
         --compression <none|lz4|zstd>   Tier-2 block compression (default zstd)\n\
         --level <n>                     Zstd compression level (default {})\n\
         --chunk-size <n>                Rows per chunk\n\
         --sample <n>                    Rows sampled for type inference",
        program, DEFAULT_ZSTD_LEVEL
    );
    process::exit(1);
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage(&args[0]);
    }

    let mut options = Options {
        input: args[1].clone(),
        output: args[2].clone(),
        compression: CompressionType::Zstd,
        level: DEFAULT_ZSTD_LEVEL,
        chunk_size: None,
        sample_size: None,
    };

    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--compression" if i + 1 < args.len() => {
                options.compression = match args[i + 1].parse() {
                    Ok(compression) => compression,
                    Err(_) => {
                        eprintln!("✗ Unknown compression '{}'", args[i + 1]);
                        usage(&args[0]);
                    }
                };
                i += 2;
            }
            "--level" if i + 1 < args.len() => {
                options.level = args[i + 1].parse().unwrap_or_else(|_| {
                    eprintln!("✗ Invalid level '{}'", args[i + 1]);
                    usage(&args[0]);
                });
                i += 2;
            }
            "--chunk-size" if i + 1 < args.len() => {
                options.chunk_size = args[i + 1].parse().ok();
                i += 2;
            }
            "--sample" if i + 1 < args.len() => {
                options.sample_size = args[i + 1].parse().ok();
                i += 2;
            }
            other => {
                eprintln!("✗ Unknown option '{}'", other);
                usage(&args[0]);
            }
        }
    }
    options
}

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let options = parse_args();

    let csv_bytes = fs::read(&options.input)
        .with_context(|| format!("Failed to read '{}'", options.input))?;
    println!(
        "Converting {} ({} bytes) -> {}",
        options.input,
        csv_bytes.len(),
        options.output
    );

    let mut analyzer = SchemaAnalyzer::new();
    if let Some(chunk_size) = options.chunk_size {
        analyzer = analyzer.with_chunk_capacity(chunk_size);
    }
    if let Some(sample_size) = options.sample_size {
        analyzer = analyzer.with_sample_size(sample_size);
    }

    let config = analyzer.analyze(&csv_bytes)?;
    println!("\n=== INFERRED SCHEMA ===");
    for column in &config.columns {
        println!(
            "  {} ({}){}",
            column.name,
            column.committed_type(),
            if column.nullable { " nullable" } else { "" }
        );
    }
    for diagnostic in analyzer.diagnostics() {
        println!("  note: {}", diagnostic);
    }

    println!("\nBuilding table (chunk capacity {})...", analyzer.chunk_capacity());
    let table = analyzer.build_table_with_progress(
        &csv_bytes,
        &config,
        Some(&|fraction: f64, stage: &str| {
            print!("\r  {:>5.1}% {}                    ", fraction * 100.0, stage);
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }),
    )?;
    println!();

    if table.row_count() == 0 {
        bail!("Input '{}' contains no data rows", options.input);
    }

    let bytes = table.to_bytes_with(options.compression, options.level)?;
    fs::write(&options.output, &bytes)
        .with_context(|| format!("Failed to write '{}'", options.output))?;

    println!("\n✓ Wrote {}", options.output);
    println!("  Rows:            {}", table.row_count());
    println!("  Columns:         {}", table.column_count());
    println!("  Compression:     {}", options.compression);
    println!("  In-memory size:  {} bytes", table.memory_usage());
    println!("  File size:       {} bytes", bytes.len());
    println!(
        "  Ratio:           {:.2}x",
        table.memory_usage() as f64 / bytes.len().max(1) as f64
    );

    Ok(())
}
