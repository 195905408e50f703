// blocks.rs - Basic-block analysis and static hotness weighting
//
// Partitions the decoded instruction stream into basic blocks and assigns
// advisory weights used to bias dispatch-tree ordering. Weights are a static
// heuristic, not a measurement.

use crate::decoder::{Instruction, Mnemonic};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// A maximal straight-line run with a single entry and exit.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Address of the first instruction.
    pub start: u32,
    /// Address of the last instruction (inclusive).
    pub end: u32,
    pub instrs: Vec<Instruction>,
}

impl BasicBlock {
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// The block's final instruction; the only one allowed to transfer
    /// control in block mode.
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instrs.last()
    }
}

/// Per-address dispatch weight. Addresses not present weigh 1.
pub type WeightMap = BTreeMap<u32, i64>;

/// Tunable weighting constants. The defaults are an untuned heuristic:
/// symbol-named block starts are assumed hot call targets, backward edges
/// are assumed loops, forward edges are a weaker signal.
#[derive(Debug, Clone, Copy)]
pub struct WeightConfig {
    pub symbol: i64,
    pub backward_edge: i64,
    pub forward_edge: i64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        WeightConfig {
            symbol: 100,
            backward_edge: 50,
            forward_edge: 5,
        }
    }
}

/// Parse a symbol-map text: lines of `<hex address> <whitespace>
/// <identifier>`, `0x`-prefixed. Unparsable lines are skipped.
pub fn parse_symbol_map(text: &str) -> BTreeMap<u32, String> {
    let mut symbols = BTreeMap::new();
    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        let (Some(addr_tok), Some(name_tok)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let Some(hex) = addr_tok
            .strip_prefix("0x")
            .or_else(|| addr_tok.strip_prefix("0X"))
        else {
            continue;
        };
        let Ok(address) = u32::from_str_radix(hex, 16) else {
            continue;
        };
        if !is_identifier(name_tok) {
            continue;
        }
        symbols.insert(address, name_tok.to_string());
    }
    symbols
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Partition instructions into basic blocks and compute the weight map.
///
/// The instruction list is assumed address-sorted (the decoder produces it
/// that way). The returned blocks partition the list exactly: their union is
/// the whole program, they are pairwise disjoint and ascending by start.
pub fn optimize(
    instructions: &[Instruction],
    symbols: &BTreeMap<u32, String>,
    config: &WeightConfig,
) -> (Vec<BasicBlock>, WeightMap) {
    let leaders = identify_leaders(instructions, symbols);
    let blocks = build_blocks(instructions, &leaders);
    let weights = calc_weights(instructions, &blocks, symbols, config);
    debug!(
        "block analysis: {} instructions, {} leaders, {} blocks",
        instructions.len(),
        leaders.len(),
        blocks.len()
    );
    (blocks, weights)
}

/// An address is a leader if it starts the program, is named in the symbol
/// table, is the resolvable target of a branch or jal, or immediately
/// follows a branch, jump, ecall or ebreak.
fn identify_leaders(
    instructions: &[Instruction],
    symbols: &BTreeMap<u32, String>,
) -> BTreeSet<u32> {
    let mut leaders = BTreeSet::new();
    let known: BTreeSet<u32> = instructions.iter().map(|i| i.address).collect();

    if let Some(first) = instructions.first() {
        leaders.insert(first.address);
    }

    for &address in symbols.keys() {
        if known.contains(&address) {
            leaders.insert(address);
        }
    }

    for (idx, instr) in instructions.iter().enumerate() {
        if instr.mnemonic.is_branch() || instr.mnemonic == Mnemonic::Jal {
            let target = instr.address.wrapping_add(instr.imm as u32);
            if known.contains(&target) {
                leaders.insert(target);
            }
        }

        if instr.mnemonic.ends_block() {
            if let Some(next) = instructions.get(idx + 1) {
                leaders.insert(next.address);
            }
        }
    }

    leaders
}

fn build_blocks(instructions: &[Instruction], leaders: &BTreeSet<u32>) -> Vec<BasicBlock> {
    let mut blocks = Vec::new();
    let mut current: Vec<Instruction> = Vec::new();

    for instr in instructions {
        if leaders.contains(&instr.address) && !current.is_empty() {
            blocks.push(finish_block(std::mem::take(&mut current)));
        }
        current.push(*instr);
    }
    if !current.is_empty() {
        blocks.push(finish_block(current));
    }

    blocks
}

fn finish_block(instrs: Vec<Instruction>) -> BasicBlock {
    BasicBlock {
        start: instrs[0].address,
        end: instrs[instrs.len() - 1].address,
        instrs,
    }
}

/// Base weight 1 per address; symbol-named block starts get the symbol
/// weight; every resolvable branch/jal target gains the backward-edge bonus
/// when target <= source (loop heuristic), else the forward-edge bonus.
fn calc_weights(
    instructions: &[Instruction],
    blocks: &[BasicBlock],
    symbols: &BTreeMap<u32, String>,
    config: &WeightConfig,
) -> WeightMap {
    let mut weights: WeightMap = instructions.iter().map(|i| (i.address, 1)).collect();

    for block in blocks {
        if symbols.contains_key(&block.start) {
            weights.insert(block.start, config.symbol);
        }
    }

    for instr in instructions {
        if instr.mnemonic.is_branch() || instr.mnemonic == Mnemonic::Jal {
            let target = instr.address.wrapping_add(instr.imm as u32);
            if let Some(weight) = weights.get_mut(&target) {
                *weight += if target <= instr.address {
                    config.backward_edge
                } else {
                    config.forward_edge
                };
            }
        }
    }

    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_word;

    fn addi(address: u32) -> Instruction {
        // addi x1, x1, 1
        decode_word(address, (1 << 20) | (1 << 15) | (1 << 7) | 0x13)
    }

    fn beq(address: u32, offset: i32) -> Instruction {
        let imm = offset as u32;
        let word = (((imm >> 12) & 1) << 31)
            | (((imm >> 5) & 0x3f) << 25)
            | (((imm >> 1) & 0xf) << 8)
            | (((imm >> 11) & 1) << 7)
            | 0x63;
        decode_word(address, word)
    }

    fn program(n: usize) -> Vec<Instruction> {
        (0..n).map(|i| addi(i as u32 * 4)).collect()
    }

    #[test]
    fn partition_covers_program_exactly() {
        let mut instrs = program(8);
        instrs[3] = beq(12, -8); // target 0x4, block break after 12
        let (blocks, _) = optimize(&instrs, &BTreeMap::new(), &WeightConfig::default());

        let mut rebuilt = Vec::new();
        let mut prev_start = None;
        for block in &blocks {
            if let Some(prev) = prev_start {
                assert!(block.start > prev);
            }
            prev_start = Some(block.start);
            assert_eq!(block.start, block.instrs[0].address);
            assert_eq!(block.end, block.instrs[block.len() - 1].address);
            rebuilt.extend(block.instrs.iter().map(|i| i.address));
        }
        let all: Vec<u32> = instrs.iter().map(|i| i.address).collect();
        assert_eq!(rebuilt, all);
    }

    #[test]
    fn leaders_include_entry_and_branch_targets() {
        // beq x0, x0, 0 at 0x1000 targets itself; 0x1004 follows a branch
        let instrs = vec![beq(0x1000, 0), addi(0x1004), addi(0x1008)];
        let (blocks, _) = optimize(&instrs, &BTreeMap::new(), &WeightConfig::default());
        let starts: Vec<u32> = blocks.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![0x1000, 0x1004]);
    }

    #[test]
    fn ecall_ends_block() {
        let instrs = vec![
            decode_word(0, 0x0000_0073), // ecall
            addi(4),
            addi(8),
        ];
        let (blocks, _) = optimize(&instrs, &BTreeMap::new(), &WeightConfig::default());
        let starts: Vec<u32> = blocks.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![0, 4]);
    }

    #[test]
    fn symbol_raises_block_weight() {
        let instrs = program(4);
        let symbols = parse_symbol_map("0x8 main\n");
        let (blocks, weights) = optimize(&instrs, &symbols, &WeightConfig::default());
        assert!(blocks.iter().any(|b| b.start == 0x8));
        assert_eq!(weights[&0x8], 100);
        assert_eq!(weights[&0x4], 1);
    }

    #[test]
    fn edge_weights_distinguish_direction() {
        let mut instrs = program(6);
        instrs[4] = beq(16, -16); // backward to 0x0
        instrs[5] = beq(20, 8); // forward target 28: outside range, ignored
        let (_, weights) = optimize(&instrs, &BTreeMap::new(), &WeightConfig::default());
        assert_eq!(weights[&0], 51);
        assert!(!weights.contains_key(&28));

        let mut instrs = program(6);
        instrs[0] = beq(0, 8); // forward to 0x8
        let (_, weights) = optimize(&instrs, &BTreeMap::new(), &WeightConfig::default());
        assert_eq!(weights[&8], 6);
    }

    #[test]
    fn symbol_map_skips_garbage() {
        let text = "  0x2000 main\nnot a line\n0x30 2bad\n0xZZ oops\n 0X10 _start extra\n";
        let symbols = parse_symbol_map(text);
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[&0x2000], "main");
        assert_eq!(symbols[&0x10], "_start");
    }

    #[test]
    fn empty_program_yields_no_blocks() {
        let (blocks, weights) = optimize(&[], &BTreeMap::new(), &WeightConfig::default());
        assert!(blocks.is_empty());
        assert!(weights.is_empty());
    }
}
