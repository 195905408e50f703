// rv2cmd - RISC-V RV32IM to command-script cross-compiler
//
// Compiles a flat RV32IM binary image into named command-script procedures:
// one per instruction (or basic block), the shared bit-serial runtime
// library, and a dispatch tree. Packaging, reset/tick scheduling and the
// service-table procedures are left to the deployment bootstrap.
//
// Usage:
//   rv2cmd program.bin -o out
//   rv2cmd program.bin -o out --blocks --map program.map

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use rv2cmd::{compile, CompileOptions, GlyphLookup, WeightConfig};
use std::path::{Path, PathBuf};

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum GlyphMode {
    Tree,
    Table,
}

#[derive(Parser, Debug)]
#[command(name = "rv2cmd")]
#[command(about = "RISC-V RV32IM to command-script cross-compiler")]
#[command(version)]
struct Args {
    /// Input flat binary image (little-endian RV32IM, loaded at --base)
    input: PathBuf,

    /// Output directory for generated procedures
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// Namespace for generated invocations and storage paths
    #[arg(long, default_value = "rv32")]
    namespace: String,

    /// Symbol map file (`<hex address> <name>` lines) for hotness weighting
    #[arg(long)]
    map: Option<PathBuf>,

    /// Generate one procedure per basic block instead of per instruction
    #[arg(long)]
    blocks: bool,

    /// Load address of the image
    #[arg(long, default_value = "0", value_parser = parse_address)]
    base: u32,

    /// Steps the bootstrap schedules per quantum (budget accounting)
    #[arg(long, default_value = "16000")]
    steps: u32,

    /// Console glyph lookup: balanced tree or flat table
    #[arg(long, value_enum, default_value = "tree")]
    glyphs: GlyphMode,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_address(s: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if args.verbose { "debug" } else { "info" },
    ))
    .init();

    let image = std::fs::read(&args.input)
        .with_context(|| format!("failed to read image {}", args.input.display()))?;
    info!("read {} bytes from {}", image.len(), args.input.display());

    let symbol_map = match &args.map {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read symbol map {}", path.display()))?,
        ),
        None => None,
    };

    let opts = CompileOptions {
        namespace: args.namespace.clone(),
        base_address: args.base,
        block_mode: args.blocks,
        weights: WeightConfig::default(),
        steps_per_quantum: args.steps,
        glyphs: match args.glyphs {
            GlyphMode::Tree => GlyphLookup::Tree,
            GlyphMode::Table => GlyphLookup::Table,
        },
        ..CompileOptions::default()
    };

    let output = compile(&image, symbol_map.as_deref(), &opts).context("compilation failed")?;

    info!(
        "{} instructions, {} blocks, {} units, {} library procedures",
        output.stats.instructions,
        output.stats.blocks,
        output.stats.units,
        output.stats.library_procedures
    );

    for artifact in &output.artifacts {
        write_procedure(&args.output, &artifact.name, &artifact.content)?;
    }

    // Materialize the image as a procedure of word literals so the
    // bootstrap can load RAM without re-reading the binary.
    let load_prog = rv2cmd::Artifact::render("mem/load_prog", &image_commands(&image), &args.namespace);
    write_procedure(&args.output, &load_prog.name, &load_prog.content)?;

    let report = &output.report;
    info!(
        "worst step {} commands ({} + dispatch {}), depth {}",
        report.worst_step_cost, report.max_unit, report.dispatch_overhead, report.dispatch_depth
    );
    println!(
        "{} procedures written to {}; minimum invocation budget for {} steps/quantum: {}",
        output.artifacts.len() + 1,
        args.output.display(),
        report.steps_per_quantum,
        report.min_budget
    );

    Ok(())
}

fn write_procedure(root: &Path, name: &str, content: &str) -> Result<()> {
    let path = root.join(format!("{name}.mcfunction"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))
}

/// Word literals for the program image, zero-padded to a word boundary.
fn image_commands(image: &[u8]) -> Vec<rv2cmd::Command> {
    let mut cmds = Vec::with_capacity(image.len() / 4 + 1);
    let mut chunks = image.chunks_exact(4);
    let mut index = 0u32;
    for chunk in &mut chunks {
        let value = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        cmds.push(rv2cmd::Command::SetRamWord { index, value });
        index += 1;
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let mut padded = [0u8; 4];
        padded[..rest.len()].copy_from_slice(rest);
        let value = i32::from_le_bytes(padded);
        cmds.push(rv2cmd::Command::SetRamWord { index, value });
    }
    cmds
}
