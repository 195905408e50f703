// transpiler.rs - Per-instruction code generation
//
// Lowers each decoded instruction to an ordered command sequence over the
// per-register slots. Anything that needs bit patterns or unsigned
// interpretation is delegated to the runtime library; this module only
// wires operands, addresses and the pc.
//
// PC discipline: non-control instructions end with pc += 4; control
// transfers write pc exactly once on every path and never also advance it.

use crate::blocks::BasicBlock;
use crate::command::{Command, Cond, Rel, ScoreOp, Slot, Store, Test};
use crate::decoder::{Instruction, Mnemonic};

const OP1: Slot = Slot::Tmp("op1");
const OP2: Slot = Slot::Tmp("op2");
const RES: Slot = Slot::Tmp("res");
const IMM: Slot = Slot::Tmp("imm");
const U1: Slot = Slot::Tmp("u1");
const U2: Slot = Slot::Tmp("u2");
const ADDR: Slot = Slot::Tmp("addr");
const OFF: Slot = Slot::Tmp("off");
const OLD: Slot = Slot::Tmp("old");
const NEW: Slot = Slot::Tmp("new");
const VAL: Slot = Slot::Tmp("val");

/// Name of the generated procedure for one unit.
pub fn unit_name(prefix: &str, address: u32) -> String {
    format!("{prefix}_{address:x}")
}

/// Lower a whole basic block: straight-line concatenation. Leader analysis
/// guarantees only the terminator can transfer control.
pub fn convert_block(block: &BasicBlock) -> Vec<Command> {
    let mut cmds = Vec::new();
    for instr in &block.instrs {
        cmds.extend(convert_instruction(instr));
    }
    cmds
}

/// Lower a single instruction.
pub fn convert_instruction(instr: &Instruction) -> Vec<Command> {
    let mut cmds = Vec::new();
    match instr.mnemonic {
        Mnemonic::Add | Mnemonic::Sub => {
            if instr.rd != 0 {
                read_into(&mut cmds, OP1, instr.rs1);
                if instr.rs2 != 0 {
                    let op = if instr.mnemonic == Mnemonic::Add {
                        ScoreOp::Add
                    } else {
                        ScoreOp::Sub
                    };
                    cmds.push(Command::op(OP1, op, Slot::Reg(instr.rs2)));
                }
                cmds.push(Command::copy(Slot::Reg(instr.rd), OP1));
            }
            cmds.push(pc_step());
        }

        Mnemonic::Addi => {
            if instr.rd != 0 {
                read_into(&mut cmds, Slot::Reg(instr.rd), instr.rs1);
                safe_add_literal(&mut cmds, Slot::Reg(instr.rd), instr.imm);
            }
            cmds.push(pc_step());
        }

        Mnemonic::And
        | Mnemonic::Or
        | Mnemonic::Xor
        | Mnemonic::Mul
        | Mnemonic::Mulh
        | Mnemonic::Mulhsu
        | Mnemonic::Mulhu
        | Mnemonic::Div
        | Mnemonic::Divu
        | Mnemonic::Rem
        | Mnemonic::Remu => {
            if instr.rd != 0 {
                read_into(&mut cmds, OP1, instr.rs1);
                read_into(&mut cmds, OP2, instr.rs2);
                cmds.push(Command::call(format!("lib/{}", lib_name(instr.mnemonic))));
                cmds.push(Command::copy(Slot::Reg(instr.rd), RES));
            }
            cmds.push(pc_step());
        }

        Mnemonic::Andi | Mnemonic::Ori | Mnemonic::Xori => {
            if instr.rd != 0 {
                read_into(&mut cmds, OP1, instr.rs1);
                cmds.push(Command::set(OP2, instr.imm));
                cmds.push(Command::call(format!("lib/{}", lib_name(instr.mnemonic))));
                cmds.push(Command::copy(Slot::Reg(instr.rd), RES));
            }
            cmds.push(pc_step());
        }

        Mnemonic::Sll | Mnemonic::Srl | Mnemonic::Sra => {
            if instr.rd != 0 {
                read_into(&mut cmds, OP1, instr.rs1);
                read_into(&mut cmds, OP2, instr.rs2);
                cmds.push(Command::call(format!("lib/{}", lib_name(instr.mnemonic))));
                cmds.push(Command::copy(Slot::Reg(instr.rd), RES));
            }
            cmds.push(pc_step());
        }

        Mnemonic::Slli | Mnemonic::Srli | Mnemonic::Srai => {
            if instr.rd != 0 {
                read_into(&mut cmds, OP1, instr.rs1);
                cmds.push(Command::set(OP2, instr.imm));
                cmds.push(Command::call(format!("lib/{}", lib_name(instr.mnemonic))));
                cmds.push(Command::copy(Slot::Reg(instr.rd), RES));
            }
            cmds.push(pc_step());
        }

        Mnemonic::Slt | Mnemonic::Slti => {
            if instr.rd != 0 {
                let lhs = source(&mut cmds, OP1, instr.rs1);
                let rhs = if instr.mnemonic == Mnemonic::Slt {
                    source(&mut cmds, OP2, instr.rs2)
                } else {
                    cmds.push(Command::set(IMM, instr.imm));
                    IMM
                };
                cmds.push(Command::set(RES, 0));
                cmds.push(Command::iff(
                    Test::Compare {
                        lhs,
                        rel: Rel::Lt,
                        rhs,
                    },
                    Command::set(RES, 1),
                ));
                cmds.push(Command::copy(Slot::Reg(instr.rd), RES));
            }
            cmds.push(pc_step());
        }

        Mnemonic::Sltu | Mnemonic::Sltiu => {
            if instr.rd != 0 {
                read_into(&mut cmds, U1, instr.rs1);
                cmds.push(Command::op(U1, ScoreOp::Sub, Slot::MinInt));
                if instr.mnemonic == Mnemonic::Sltu {
                    read_into(&mut cmds, U2, instr.rs2);
                } else {
                    cmds.push(Command::set(U2, instr.imm));
                }
                cmds.push(Command::op(U2, ScoreOp::Sub, Slot::MinInt));
                cmds.push(Command::set(RES, 0));
                cmds.push(Command::iff(
                    Test::Compare {
                        lhs: U1,
                        rel: Rel::Lt,
                        rhs: U2,
                    },
                    Command::set(RES, 1),
                ));
                cmds.push(Command::copy(Slot::Reg(instr.rd), RES));
            }
            cmds.push(pc_step());
        }

        Mnemonic::Beq | Mnemonic::Bne | Mnemonic::Blt | Mnemonic::Bge => {
            let lhs = source(&mut cmds, OP1, instr.rs1);
            let rhs = source(&mut cmds, OP2, instr.rs2);
            let (rel, taken_negated) = match instr.mnemonic {
                Mnemonic::Beq => (Rel::Eq, false),
                Mnemonic::Bne => (Rel::Eq, true),
                Mnemonic::Blt => (Rel::Lt, false),
                _ => (Rel::Ge, false),
            };
            emit_branch(
                &mut cmds,
                Test::Compare { lhs, rel, rhs },
                taken_negated,
                instr,
            );
        }

        Mnemonic::Bltu | Mnemonic::Bgeu => {
            read_into(&mut cmds, U1, instr.rs1);
            cmds.push(Command::op(U1, ScoreOp::Sub, Slot::MinInt));
            read_into(&mut cmds, U2, instr.rs2);
            cmds.push(Command::op(U2, ScoreOp::Sub, Slot::MinInt));
            let rel = if instr.mnemonic == Mnemonic::Bltu {
                Rel::Lt
            } else {
                Rel::Ge
            };
            emit_branch(
                &mut cmds,
                Test::Compare {
                    lhs: U1,
                    rel,
                    rhs: U2,
                },
                false,
                instr,
            );
        }

        Mnemonic::Jal => {
            if instr.rd != 0 {
                cmds.push(Command::set(
                    Slot::Reg(instr.rd),
                    instr.address.wrapping_add(4) as i32,
                ));
            }
            cmds.push(Command::set(
                Slot::Pc,
                instr.address.wrapping_add(instr.imm as u32) as i32,
            ));
        }

        Mnemonic::Jalr => {
            // Target computed before the link write so rd == rs1 reads the
            // pre-link value.
            read_into(&mut cmds, OP1, instr.rs1);
            safe_add_literal(&mut cmds, OP1, instr.imm);
            if instr.rd != 0 {
                cmds.push(Command::set(
                    Slot::Reg(instr.rd),
                    instr.address.wrapping_add(4) as i32,
                ));
            }
            cmds.push(Command::copy(Slot::Pc, OP1));
            // Clear bit 0; program counters are non-negative.
            cmds.push(Command::op(Slot::Pc, ScoreOp::Div, Slot::Two));
            cmds.push(Command::op(Slot::Pc, ScoreOp::Mul, Slot::Two));
        }

        Mnemonic::Lui => {
            if instr.rd != 0 {
                cmds.push(Command::set(Slot::Reg(instr.rd), instr.imm));
            }
            cmds.push(pc_step());
        }

        Mnemonic::Auipc => {
            if instr.rd != 0 {
                cmds.push(Command::set(
                    Slot::Reg(instr.rd),
                    instr.address.wrapping_add(instr.imm as u32) as i32,
                ));
            }
            cmds.push(pc_step());
        }

        Mnemonic::Lb | Mnemonic::Lh | Mnemonic::Lw | Mnemonic::Lbu | Mnemonic::Lhu => {
            emit_address(&mut cmds, instr);
            cmds.push(Command::CallWith {
                path: format!("mem/read_{}", lib_name(instr.mnemonic)),
                store: Store::Io,
            });
            if instr.rd != 0 {
                cmds.push(Command::copy(Slot::Reg(instr.rd), RES));
            }
            cmds.push(pc_step());
        }

        Mnemonic::Sb | Mnemonic::Sh | Mnemonic::Sw => {
            emit_address(&mut cmds, instr);
            export_value(&mut cmds, instr.rs2);
            cmds.push(Command::CallWith {
                path: format!("mem/write_{}", lib_name(instr.mnemonic)),
                store: Store::Io,
            });
            cmds.push(pc_step());
        }

        m if m.is_amo() => convert_amo(&mut cmds, instr),

        Mnemonic::Ecall => {
            cmds.push(Command::call("ecall/dispatch"));
            cmds.push(pc_step());
        }

        Mnemonic::Ebreak => {
            cmds.push(Command::call("debug/dump"));
            cmds.push(pc_step());
        }

        // Unknown executes as a no-op.
        _ => cmds.push(pc_step()),
    }
    cmds
}

fn convert_amo(cmds: &mut Vec<Command>, instr: &Instruction) {
    read_into(cmds, ADDR, instr.rs1);
    cmds.push(Command::op(ADDR, ScoreOp::Div, Slot::Four));
    cmds.push(Command::ExportScore {
        key: "addr",
        slot: ADDR,
    });

    match instr.mnemonic {
        Mnemonic::LrW => {
            cmds.push(read_word());
            if instr.rd != 0 {
                cmds.push(Command::copy(Slot::Reg(instr.rd), RES));
            }
        }
        Mnemonic::ScW => {
            export_value(cmds, instr.rs2);
            cmds.push(write_word());
            // No reservation tracking: the store conditional always
            // succeeds.
            if instr.rd != 0 {
                cmds.push(Command::set(Slot::Reg(instr.rd), 0));
            }
        }
        _ => {
            cmds.push(read_word());
            cmds.push(Command::copy(OLD, RES));
            match instr.mnemonic {
                Mnemonic::AmoswapW => {
                    read_into(cmds, NEW, instr.rs2);
                }
                Mnemonic::AmoaddW => {
                    cmds.push(Command::copy(NEW, OLD));
                    if instr.rs2 != 0 {
                        cmds.push(Command::op(NEW, ScoreOp::Add, Slot::Reg(instr.rs2)));
                    }
                }
                Mnemonic::AmoandW | Mnemonic::AmoorW | Mnemonic::AmoxorW => {
                    cmds.push(Command::copy(OP1, OLD));
                    read_into(cmds, OP2, instr.rs2);
                    cmds.push(Command::call(format!("lib/{}", lib_name(instr.mnemonic))));
                    cmds.push(Command::copy(NEW, RES));
                }
                Mnemonic::AmominW | Mnemonic::AmomaxW => {
                    let rhs = source(cmds, OP2, instr.rs2);
                    let rel = if instr.mnemonic == Mnemonic::AmominW {
                        Rel::Lt
                    } else {
                        Rel::Ge
                    };
                    cmds.push(Command::copy(NEW, OLD));
                    cmds.push(Command::iff(
                        Test::Compare {
                            lhs: rhs,
                            rel,
                            rhs: OLD,
                        },
                        Command::copy(NEW, rhs),
                    ));
                }
                _ => {
                    // amominu.w / amomaxu.w: biased unsigned compare.
                    let rhs = source(cmds, OP2, instr.rs2);
                    cmds.push(Command::copy(U1, OLD));
                    cmds.push(Command::op(U1, ScoreOp::Sub, Slot::MinInt));
                    cmds.push(Command::copy(U2, rhs));
                    cmds.push(Command::op(U2, ScoreOp::Sub, Slot::MinInt));
                    let rel = if instr.mnemonic == Mnemonic::AmominuW {
                        Rel::Lt
                    } else {
                        Rel::Ge
                    };
                    cmds.push(Command::copy(NEW, OLD));
                    cmds.push(Command::iff(
                        Test::Compare {
                            lhs: U2,
                            rel,
                            rhs: U1,
                        },
                        Command::copy(NEW, rhs),
                    ));
                }
            }
            cmds.push(Command::ExportScore {
                key: "val",
                slot: NEW,
            });
            cmds.push(write_word());
            if instr.rd != 0 {
                cmds.push(Command::copy(Slot::Reg(instr.rd), OLD));
            }
        }
    }
    cmds.push(pc_step());
}

/// Compute the effective address, split it into word index and byte offset,
/// and bind both as macro arguments.
fn emit_address(cmds: &mut Vec<Command>, instr: &Instruction) {
    read_into(cmds, ADDR, instr.rs1);
    safe_add_literal(cmds, ADDR, instr.imm);
    cmds.push(Command::copy(OFF, ADDR));
    cmds.push(Command::op(OFF, ScoreOp::Mod, Slot::Four));
    cmds.push(Command::op(ADDR, ScoreOp::Div, Slot::Four));
    cmds.push(Command::ExportScore {
        key: "addr",
        slot: ADDR,
    });
    cmds.push(Command::ExportScore {
        key: "off",
        slot: OFF,
    });
}

fn export_value(cmds: &mut Vec<Command>, rs2: u8) {
    if rs2 == 0 {
        cmds.push(Command::set(VAL, 0));
        cmds.push(Command::ExportScore {
            key: "val",
            slot: VAL,
        });
    } else {
        cmds.push(Command::ExportScore {
            key: "val",
            slot: Slot::Reg(rs2),
        });
    }
}

fn read_word() -> Command {
    Command::CallWith {
        path: "mem/read_lw".to_string(),
        store: Store::Io,
    }
}

fn write_word() -> Command {
    Command::CallWith {
        path: "mem/write_sw".to_string(),
        store: Store::Io,
    }
}

/// Both pc writes of a conditional branch; pc is set exactly once whether
/// or not the branch is taken.
fn emit_branch(cmds: &mut Vec<Command>, test: Test, taken_negated: bool, instr: &Instruction) {
    let target = instr.address.wrapping_add(instr.imm as u32) as i32;
    let next = instr.address.wrapping_add(4) as i32;
    cmds.push(Command::guarded(
        vec![Cond {
            negate: taken_negated,
            test: test.clone(),
        }],
        Command::set(Slot::Pc, target),
    ));
    cmds.push(Command::guarded(
        vec![Cond {
            negate: !taken_negated,
            test,
        }],
        Command::set(Slot::Pc, next),
    ));
}

/// Copy a register into `dst`; register 0 reads as the literal 0.
fn read_into(cmds: &mut Vec<Command>, dst: Slot, reg: u8) {
    if reg == 0 {
        cmds.push(Command::set(dst, 0));
    } else {
        cmds.push(Command::copy(dst, Slot::Reg(reg)));
    }
}

/// A slot holding the register's value for use in a guard: the register
/// slot itself, or `scratch` materialized to 0 for x0.
fn source(cmds: &mut Vec<Command>, scratch: Slot, reg: u8) -> Slot {
    if reg == 0 {
        cmds.push(Command::set(scratch, 0));
        scratch
    } else {
        Slot::Reg(reg)
    }
}

/// Add a signed literal to a slot. `i32::MIN` cannot be negated, so it is
/// added through the shared constant instead.
fn safe_add_literal(cmds: &mut Vec<Command>, slot: Slot, value: i32) {
    if value == 0 {
        return;
    }
    if value > 0 {
        cmds.push(Command::AddLit {
            slot,
            value: value as u32,
        });
    } else if value == i32::MIN {
        cmds.push(Command::op(slot, ScoreOp::Add, Slot::MinInt));
    } else {
        cmds.push(Command::RemoveLit {
            slot,
            value: value.unsigned_abs(),
        });
    }
}

fn pc_step() -> Command {
    Command::AddLit {
        slot: Slot::Pc,
        value: 4,
    }
}

fn lib_name(mnemonic: Mnemonic) -> &'static str {
    match mnemonic {
        Mnemonic::And | Mnemonic::Andi | Mnemonic::AmoandW => "and",
        Mnemonic::Or | Mnemonic::Ori | Mnemonic::AmoorW => "or",
        Mnemonic::Xor | Mnemonic::Xori | Mnemonic::AmoxorW => "xor",
        Mnemonic::Sll | Mnemonic::Slli => "sll",
        Mnemonic::Srl | Mnemonic::Srli => "srl",
        Mnemonic::Sra | Mnemonic::Srai => "sra",
        Mnemonic::Mul => "mul",
        Mnemonic::Mulh => "mulh",
        Mnemonic::Mulhsu => "mulhsu",
        Mnemonic::Mulhu => "mulhu",
        Mnemonic::Div => "div",
        Mnemonic::Divu => "divu",
        Mnemonic::Rem => "rem",
        Mnemonic::Remu => "remu",
        Mnemonic::Lb => "lb",
        Mnemonic::Lh => "lh",
        Mnemonic::Lw => "lw",
        Mnemonic::Lbu => "lbu",
        Mnemonic::Lhu => "lhu",
        Mnemonic::Sb => "sb",
        Mnemonic::Sh => "sh",
        Mnemonic::Sw => "sw",
        _ => unreachable!("no library routine for {mnemonic:?}"),
    }
}
