// rv2cmd - RISC-V RV32IM to command-script cross-compiler
//
// Translates a flat RV32IM binary image into a set of named procedures for
// an execution environment whose integer slots support only set/copy, add,
// subtract, multiply, truncating divide and modulo, and whose only control
// transfer is guarded named-procedure invocation.
//
// # Architecture
//
// The compiler is single-threaded and strictly staged; each stage fully
// materializes its output before the next reads it:
//
// 1. **Decoding** (`decoder.rs`): little-endian words to structured
//    instructions; never fails (unknown encodings become no-op sentinels)
// 2. **Block analysis** (`blocks.rs`): leaders, basic blocks and static
//    hotness weights
// 3. **Library generation** (`libgen.rs`): the shared bit-serial runtime
//    plus its cost table
// 4. **Code generation** (`transpiler.rs`): one procedure per instruction
//    or per block
// 5. **Dispatch synthesis** (`dispatch.rs`): a weight-ordered binary tree
//    of range guards standing in for an indexed jump
//
// Cost accounting (`cost.rs`) folds unit costs and dispatch depth into the
// minimum invocation budget the deployment bootstrap must configure.
// Reset/tick scheduling, packaging and the service-table procedures the
// generated code invokes (`ecall/dispatch`, `debug/dump`) are external
// collaborators.

pub mod blocks;
pub mod command;
pub mod cost;
pub mod decoder;
pub mod dispatch;
pub mod libgen;
pub mod transpiler;

pub use blocks::{BasicBlock, WeightConfig, WeightMap};
pub use command::{Artifact, Command};
pub use cost::{BudgetReport, CostTable};
pub use decoder::{InstrFormat, Instruction, Mnemonic};
pub use libgen::GlyphLookup;

use log::info;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("program image contains no complete instruction words")]
    EmptyProgram,
}

/// Compilation parameters.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Namespace prefix for generated procedure invocations and storage.
    pub namespace: String,
    /// Address the image is loaded at.
    pub base_address: u32,
    /// Generate one procedure per basic block instead of per instruction.
    pub block_mode: bool,
    /// Hotness-weighting constants.
    pub weights: WeightConfig,
    /// Steps the bootstrap schedules per quantum, for budget accounting.
    pub steps_per_quantum: u32,
    /// Console glyph-lookup generation mode.
    pub glyphs: GlyphLookup,
    /// Flat cost estimate for invocations of external procedures.
    pub extern_cost: i64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            namespace: "rv32".to_string(),
            base_address: 0,
            block_mode: false,
            weights: WeightConfig::default(),
            steps_per_quantum: 16000,
            glyphs: GlyphLookup::Tree,
            extern_cost: cost::DEFAULT_EXTERN_COST,
        }
    }
}

/// Pipeline statistics, for reporting.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub instructions: usize,
    pub blocks: usize,
    pub units: usize,
    pub library_procedures: usize,
}

/// A compiled program: every generated procedure plus the budget report.
#[derive(Debug)]
pub struct CompileOutput {
    pub artifacts: Vec<Artifact>,
    pub report: BudgetReport,
    pub stats: Stats,
}

/// Compile a flat RV32IM image. `symbol_map` is the text of an optional
/// address-to-name map used for hotness weighting.
pub fn compile(
    image: &[u8],
    symbol_map: Option<&str>,
    opts: &CompileOptions,
) -> Result<CompileOutput, Error> {
    let instructions = decoder::decode(image, opts.base_address);
    if instructions.is_empty() {
        return Err(Error::EmptyProgram);
    }
    info!("decoded {} instructions", instructions.len());

    let symbols = symbol_map
        .map(blocks::parse_symbol_map)
        .unwrap_or_default();
    let (basic_blocks, weights) = blocks::optimize(&instructions, &symbols, &opts.weights);

    let library = libgen::generate(opts.glyphs, opts.extern_cost);

    let prefix = if opts.block_mode { "block" } else { "instr" };
    let units: Vec<(String, Vec<Command>)> = if opts.block_mode {
        basic_blocks
            .iter()
            .map(|b| {
                (
                    transpiler::unit_name(prefix, b.start),
                    transpiler::convert_block(b),
                )
            })
            .collect()
    } else {
        instructions
            .iter()
            .map(|i| {
                (
                    transpiler::unit_name(prefix, i.address),
                    transpiler::convert_instruction(i),
                )
            })
            .collect()
    };

    let addresses: Vec<u32> = if opts.block_mode {
        basic_blocks.iter().map(|b| b.start).collect()
    } else {
        instructions.iter().map(|i| i.address).collect()
    };
    let dispatch = dispatch::generate(&addresses, &weights, prefix, &opts.namespace);

    let report = cost::budget(&units, &library.costs, dispatch.depth, opts.steps_per_quantum);
    info!(
        "worst step: {} commands ({}), dispatch depth {}, minimum budget {}",
        report.worst_step_cost, report.max_unit, report.dispatch_depth, report.min_budget
    );

    let stats = Stats {
        instructions: instructions.len(),
        blocks: basic_blocks.len(),
        units: units.len(),
        library_procedures: library.artifacts.len(),
    };

    let ns = &opts.namespace;
    let mut artifacts = Vec::with_capacity(library.artifacts.len() + units.len() + 16);
    for (name, cmds) in &library.artifacts {
        artifacts.push(Artifact::render(name.clone(), cmds, ns));
    }
    for (name, cmds) in &units {
        artifacts.push(Artifact::render(name.clone(), cmds, ns));
    }
    artifacts.extend(dispatch.artifacts);

    Ok(CompileOutput {
        artifacts,
        report,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(matches!(
            compile(&[], None, &CompileOptions::default()),
            Err(Error::EmptyProgram)
        ));
        assert!(matches!(
            compile(&[1, 2, 3], None, &CompileOptions::default()),
            Err(Error::EmptyProgram)
        ));
    }

    #[test]
    fn per_instruction_mode_emits_one_unit_per_word() {
        // addi x1, x0, 5 ; addi x2, x1, -3
        let out = compile(
            &image(&[0x0050_0093, 0xffd0_8113]),
            None,
            &CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(out.stats.units, 2);
        let names: Vec<&str> = out.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert!(names.contains(&"instr_0"));
        assert!(names.contains(&"instr_4"));
        assert!(names.contains(&"dispatch/root"));
        assert!(names.contains(&"lib/and"));
        assert!(names.contains(&"mem/read_lw"));
    }

    #[test]
    fn block_mode_emits_block_units() {
        // beq x0, x0, 0 ; addi x1, x0, 1 => blocks at 0 and 4
        let opts = CompileOptions {
            block_mode: true,
            ..CompileOptions::default()
        };
        let out = compile(&image(&[0x63, 0x0010_0093]), None, &opts).unwrap();
        assert_eq!(out.stats.units, 2);
        let names: Vec<&str> = out.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert!(names.contains(&"block_0"));
        assert!(names.contains(&"block_4"));
    }

    #[test]
    fn budget_reflects_library_costs() {
        // div x3, x1, x2 is the expensive unit
        let out = compile(
            &image(&[0x0050_0093, 0x0220_c1b3]),
            None,
            &CompileOptions::default(),
        )
        .unwrap();
        assert!(out.report.min_budget > 0);
        assert_eq!(
            out.report.min_budget,
            out.report.worst_step_cost * out.report.steps_per_quantum as i64
        );
        assert!(out.report.worst_step_cost > out.report.max_unit_cost);
    }

    #[test]
    fn namespace_threads_through_artifacts() {
        let opts = CompileOptions {
            namespace: "guest".to_string(),
            ..CompileOptions::default()
        };
        let out = compile(&image(&[0x0050_0093]), None, &opts).unwrap();
        let root = out
            .artifacts
            .iter()
            .find(|a| a.name == "dispatch/root")
            .unwrap();
        assert!(root.content.contains("guest_pc"));
        assert!(root.content.contains("function guest:dispatch/tree_root"));
    }

    #[test]
    fn symbol_map_biases_dispatch() {
        // Four instructions; symbol on 0x8 puts the right half first.
        let words = [0x0050_0093u32, 0x0050_0093, 0x0050_0093, 0x0050_0093];
        let out = compile(&image(&words), Some("0x8 main\n"), &CompileOptions::default()).unwrap();
        let node = out
            .artifacts
            .iter()
            .find(|a| a.name == "dispatch/tree_root")
            .unwrap();
        assert!(node.content.lines().next().unwrap().contains("matches 8..12"));
    }
}
