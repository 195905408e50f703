// command.rs - Typed target-command IR
//
// Everything the compiler emits is built from these records and rendered to
// the target's text dialect in one place. Core stages construct `Command`
// values; only `render` knows the concrete syntax.

/// A named scoreboard-style integer slot on the target.
///
/// Slots are 32-bit wrapping signed integers. Register and pc slots hold
/// architectural state; `Tmp` slots are compiler scratch shared by all
/// generated procedures (the generated program is single-threaded and
/// non-preemptible, so scratch never needs saving); `Pow` and the named
/// constants form the read-only constant pool seeded by `lib/init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// ISA register x0..x31.
    Reg(u8),
    /// The program counter.
    Pc,
    /// Compiler scratch, e.g. `Tmp("op1")` renders as `#op1`.
    Tmp(&'static str),
    /// Power-of-two constant `#p_i` = 1 << i (i = 31 aliases `#min_int`).
    Pow(u8),
    MinInt,
    Two,
    Four,
    ThirtyTwo,
}

impl Slot {
    fn holder(&self) -> String {
        match self {
            Slot::Reg(i) => format!("x{i}"),
            Slot::Pc => "pc".to_string(),
            Slot::Tmp(name) => format!("#{name}"),
            Slot::Pow(i) => format!("#p_{i}"),
            Slot::MinInt => "#min_int".to_string(),
            Slot::Two => "#two".to_string(),
            Slot::Four => "#four".to_string(),
            Slot::ThirtyTwo => "#thirty_two".to_string(),
        }
    }

    fn objective(&self, ns: &str) -> String {
        match self {
            Slot::Reg(_) => "rv_reg".to_string(),
            Slot::Pc => format!("{ns}_pc"),
            Slot::Tmp(_) => "rv_temp".to_string(),
            Slot::Pow(_) | Slot::MinInt | Slot::Two | Slot::Four | Slot::ThirtyTwo => {
                "rv_const".to_string()
            }
        }
    }

    fn score(&self, ns: &str) -> String {
        format!("{} {}", self.holder(), self.objective(ns))
    }
}

/// Binary slot-to-slot operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ScoreOp {
    fn symbol(&self) -> &'static str {
        match self {
            ScoreOp::Assign => "=",
            ScoreOp::Add => "+=",
            ScoreOp::Sub => "-=",
            ScoreOp::Mul => "*=",
            ScoreOp::Div => "/=",
            ScoreOp::Mod => "%=",
        }
    }
}

/// Comparison relation for slot-vs-slot guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rel {
    Lt,
    Ge,
    Eq,
}

impl Rel {
    fn symbol(&self) -> &'static str {
        match self {
            Rel::Lt => "<",
            Rel::Ge => ">=",
            Rel::Eq => "=",
        }
    }
}

/// A guard predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Test {
    /// Slot value within an inclusive range; `None` bounds are open.
    Matches {
        slot: Slot,
        lo: Option<i32>,
        hi: Option<i32>,
    },
    /// Slot-compare-slot.
    Compare { lhs: Slot, rel: Rel, rhs: Slot },
    /// The console line buffer holds at least one glyph.
    BufferNonEmpty,
}

impl Test {
    pub fn eq(slot: Slot, value: i32) -> Test {
        Test::Matches {
            slot,
            lo: Some(value),
            hi: Some(value),
        }
    }

    pub fn at_most(slot: Slot, hi: i32) -> Test {
        Test::Matches {
            slot,
            lo: None,
            hi: Some(hi),
        }
    }

    pub fn at_least(slot: Slot, lo: i32) -> Test {
        Test::Matches {
            slot,
            lo: Some(lo),
            hi: None,
        }
    }

    pub fn range(slot: Slot, lo: i32, hi: i32) -> Test {
        Test::Matches {
            slot,
            lo: Some(lo),
            hi: Some(hi),
        }
    }

    pub fn negative(slot: Slot) -> Test {
        Test::at_most(slot, -1)
    }

    fn render(&self, ns: &str) -> String {
        match self {
            Test::Matches { slot, lo, hi } => {
                let range = match (lo, hi) {
                    (Some(a), Some(b)) if a == b => format!("{a}"),
                    (Some(a), Some(b)) => format!("{a}..{b}"),
                    (Some(a), None) => format!("{a}.."),
                    (None, Some(b)) => format!("..{b}"),
                    (None, None) => "..".to_string(),
                };
                format!("score {} matches {}", slot.score(ns), range)
            }
            Test::Compare { lhs, rel, rhs } => {
                format!(
                    "score {} {} {}",
                    lhs.score(ns),
                    rel.symbol(),
                    rhs.score(ns)
                )
            }
            Test::BufferNonEmpty => format!("data storage {ns}:uart buffer[0]"),
        }
    }
}

/// One guard clause: `if` or (negated) `unless` a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cond {
    pub negate: bool,
    pub test: Test,
}

/// The storage record a templated invocation reads its arguments from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Io,
    Uart,
}

impl Store {
    fn path(&self, ns: &str) -> String {
        match self {
            Store::Io => format!("{ns}:io"),
            Store::Uart => format!("{ns}:uart"),
        }
    }
}

/// One target command; each value renders to exactly one output line, which
/// keeps command counting and cost accounting trivial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set a slot to a literal.
    Set { slot: Slot, value: i32 },
    /// Add a non-negative literal to a slot.
    AddLit { slot: Slot, value: u32 },
    /// Subtract a non-negative literal from a slot.
    RemoveLit { slot: Slot, value: u32 },
    /// Slot-to-slot operation.
    Op { dst: Slot, op: ScoreOp, src: Slot },
    /// Run a command only if every guard passes.
    Execute { conds: Vec<Cond>, run: Box<Command> },
    /// Invoke a named procedure.
    Call { path: String },
    /// Invoke a named procedure in tail position; nothing after the call in
    /// the current procedure runs.
    TailCall { path: String },
    /// Templated invocation: the callee's command text is parameterized by
    /// values read from `store` at call time.
    CallWith { path: String, store: Store },
    /// Return from the current procedure with a value.
    Return { value: i32 },
    /// Copy a slot into a field of the io record (binds a macro argument).
    ExportScore { key: &'static str, slot: Slot },
    /// Read the io record's `val` field into a slot.
    LoadIoVal { dst: Slot },
    /// Macro line: read the RAM word at index `$(addr)` into a slot.
    MacroLoadWord { dst: Slot },
    /// Macro line: overwrite the RAM word at index `$(addr)` from io `val`.
    MacroStoreWord,
    /// Set the pending console glyph.
    SetGlyph { glyph: String },
    /// Append the pending glyph to the console line buffer.
    AppendGlyph,
    /// Reset the console line buffer.
    ClearBuffer,
    /// Macro line: print the buffered line (`$(buffer)`).
    PrintBuffer,
    /// Seed the RAM word array with a single zero word.
    RamSeed,
    /// Double the RAM word array by appending a copy of itself.
    RamGrow,
    /// Write a literal word of the program image into RAM.
    SetRamWord { index: u32, value: i32 },
}

impl Command {
    pub fn set(slot: Slot, value: i32) -> Command {
        Command::Set { slot, value }
    }

    pub fn op(dst: Slot, op: ScoreOp, src: Slot) -> Command {
        Command::Op { dst, op, src }
    }

    pub fn copy(dst: Slot, src: Slot) -> Command {
        Command::Op {
            dst,
            op: ScoreOp::Assign,
            src,
        }
    }

    pub fn call(path: impl Into<String>) -> Command {
        Command::Call { path: path.into() }
    }

    pub fn guarded(conds: Vec<Cond>, run: Command) -> Command {
        Command::Execute {
            conds,
            run: Box::new(run),
        }
    }

    pub fn iff(test: Test, run: Command) -> Command {
        Command::guarded(
            vec![Cond {
                negate: false,
                test,
            }],
            run,
        )
    }

    pub fn unless(test: Test, run: Command) -> Command {
        Command::guarded(vec![Cond { negate: true, test }], run)
    }

    pub fn iff2(a: Test, b: Test, run: Command) -> Command {
        Command::guarded(
            vec![
                Cond {
                    negate: false,
                    test: a,
                },
                Cond {
                    negate: false,
                    test: b,
                },
            ],
            run,
        )
    }

    /// The invoked procedure, if this command (possibly behind guards) is an
    /// invocation. Used by cost accounting.
    pub fn call_target(&self) -> Option<&str> {
        match self {
            Command::Call { path } | Command::TailCall { path } | Command::CallWith { path, .. } => {
                Some(path)
            }
            Command::Execute { run, .. } => run.call_target(),
            _ => None,
        }
    }

    pub fn render(&self, ns: &str) -> String {
        match self {
            Command::Set { slot, value } => {
                format!("scoreboard players set {} {}", slot.score(ns), value)
            }
            Command::AddLit { slot, value } => {
                format!("scoreboard players add {} {}", slot.score(ns), value)
            }
            Command::RemoveLit { slot, value } => {
                format!("scoreboard players remove {} {}", slot.score(ns), value)
            }
            Command::Op { dst, op, src } => format!(
                "scoreboard players operation {} {} {}",
                dst.score(ns),
                op.symbol(),
                src.score(ns)
            ),
            Command::Execute { conds, run } => {
                let mut line = String::from("execute");
                for cond in conds {
                    let keyword = if cond.negate { "unless" } else { "if" };
                    line.push(' ');
                    line.push_str(keyword);
                    line.push(' ');
                    line.push_str(&cond.test.render(ns));
                }
                line.push_str(" run ");
                line.push_str(&run.render(ns));
                line
            }
            Command::Call { path } => format!("function {ns}:{path}"),
            Command::TailCall { path } => format!("return run function {ns}:{path}"),
            Command::CallWith { path, store } => {
                format!("function {ns}:{path} with storage {}", store.path(ns))
            }
            Command::Return { value } => format!("return {value}"),
            Command::ExportScore { key, slot } => format!(
                "execute store result storage {ns}:io {key} int 1 run scoreboard players get {}",
                slot.score(ns)
            ),
            Command::LoadIoVal { dst } => format!(
                "execute store result score {} run data get storage {ns}:io val",
                dst.score(ns)
            ),
            Command::MacroLoadWord { dst } => format!(
                "$execute store result score {} run data get storage {ns}:ram data[$(addr)]",
                dst.score(ns)
            ),
            Command::MacroStoreWord => {
                format!("$data modify storage {ns}:ram data[$(addr)] set from storage {ns}:io val")
            }
            Command::SetGlyph { glyph } => {
                let escaped = glyph.replace('\\', "\\\\").replace('"', "\\\"");
                format!("data modify storage {ns}:uart char set value \"{escaped}\"")
            }
            Command::AppendGlyph => {
                format!("data modify storage {ns}:uart buffer append from storage {ns}:uart char")
            }
            Command::ClearBuffer => format!("data modify storage {ns}:uart buffer set value []"),
            Command::PrintBuffer => "$tellraw @a $(buffer)".to_string(),
            Command::RamSeed => format!("data modify storage {ns}:ram data set value [0]"),
            Command::RamGrow => {
                format!("data modify storage {ns}:ram data append from storage {ns}:ram data[]")
            }
            Command::SetRamWord { index, value } => {
                format!("data modify storage {ns}:ram data[{index}] set value {value}")
            }
        }
    }
}

/// A named generated procedure, ready to persist.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub content: String,
}

impl Artifact {
    pub fn render(name: impl Into<String>, commands: &[Command], ns: &str) -> Artifact {
        let mut content = String::new();
        for cmd in commands {
            content.push_str(&cmd.render(ns));
            content.push('\n');
        }
        Artifact {
            name: name.into(),
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_slot_commands() {
        assert_eq!(
            Command::set(Slot::Reg(5), -3).render("rv32"),
            "scoreboard players set x5 rv_reg -3"
        );
        assert_eq!(
            Command::op(Slot::Tmp("op1"), ScoreOp::Add, Slot::Reg(2)).render("rv32"),
            "scoreboard players operation #op1 rv_temp += x2 rv_reg"
        );
        assert_eq!(
            Command::AddLit {
                slot: Slot::Pc,
                value: 4
            }
            .render("rv32"),
            "scoreboard players add pc rv32_pc 4"
        );
    }

    #[test]
    fn renders_guards() {
        let cmd = Command::iff(
            Test::range(Slot::Tmp("current_pc"), 0, 124),
            Command::TailCall {
                path: "dispatch/tree_root_0".to_string(),
            },
        );
        assert_eq!(
            cmd.render("rv32"),
            "execute if score #current_pc rv_temp matches 0..124 run \
             return run function rv32:dispatch/tree_root_0"
        );

        let neg = Command::unless(
            Test::eq(Slot::Tmp("bit"), 0),
            Command::op(Slot::Tmp("res"), ScoreOp::Add, Slot::Tmp("t1")),
        );
        assert_eq!(
            neg.render("rv32"),
            "execute unless score #bit rv_temp matches 0 run \
             scoreboard players operation #res rv_temp += #t1 rv_temp"
        );
    }

    #[test]
    fn renders_open_ranges() {
        assert_eq!(
            Test::negative(Slot::Tmp("w")).render("rv32"),
            "score #w rv_temp matches ..-1"
        );
        assert_eq!(
            Test::at_least(Slot::Tmp("q"), 1).render("rv32"),
            "score #q rv_temp matches 1.."
        );
    }

    #[test]
    fn renders_macro_lines() {
        assert_eq!(
            Command::MacroLoadWord {
                dst: Slot::Tmp("res")
            }
            .render("rv32"),
            "$execute store result score #res rv_temp run data get storage rv32:ram data[$(addr)]"
        );
        assert_eq!(
            Command::MacroStoreWord.render("rv32"),
            "$data modify storage rv32:ram data[$(addr)] set from storage rv32:io val"
        );
    }

    #[test]
    fn escapes_glyphs() {
        assert_eq!(
            Command::SetGlyph {
                glyph: "\"".to_string()
            }
            .render("rv32"),
            "data modify storage rv32:uart char set value \"\\\"\""
        );
    }

    #[test]
    fn call_target_sees_through_guards() {
        let cmd = Command::iff(
            Test::eq(Slot::Tmp("char"), 10),
            Command::call("lib/uart_flush"),
        );
        assert_eq!(cmd.call_target(), Some("lib/uart_flush"));
        assert_eq!(Command::set(Slot::Pc, 0).call_target(), None);
    }
}
