// libgen.rs - Shared runtime-library generation
//
// Emits the fixed arithmetic/bitwise/shift/memory/console support library
// once per compiled program, and registers every routine's worst-case
// transitive command cost as it goes. The target offers no bitwise ops and
// no shifts, and its division truncates toward zero, so anything that needs
// bit patterns runs bit-serially: values are normalized by clearing the
// sign bit into a recorded flag, bits 0..30 come out of truncating
// divide/modulo chains, and bit 31 is handled in a separate step.
//
// Generation order matters only for cost accounting: helpers are emitted
// before their callers so each registration sees final callee costs.

use crate::command::{Command, Cond, Rel, ScoreOp, Slot, Store, Test};
use crate::cost::CostTable;
use log::debug;

/// How the console resolves a byte to its printable glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlyphLookup {
    /// Balanced decision tree of range guards, one procedure per node.
    Tree,
    /// One flat procedure with an equality guard per printable byte.
    Table,
}

/// The generated library: named command sequences plus the cost table.
#[derive(Debug)]
pub struct Library {
    pub artifacts: Vec<(String, Vec<Command>)>,
    pub costs: CostTable,
}

/// Generate the full runtime library.
pub fn generate(glyphs: GlyphLookup, extern_cost: i64) -> Library {
    let mut lib = LibGenerator {
        artifacts: Vec::new(),
        costs: CostTable::new(extern_cost),
    };
    lib.gen_init();
    lib.gen_bitwise();
    lib.gen_shifts();
    lib.gen_mul();
    lib.gen_mulh_family();
    lib.gen_div_family();
    lib.gen_mem();
    lib.gen_console(glyphs);
    debug!(
        "library: {} procedures, {} cost entries",
        lib.artifacts.len(),
        lib.costs.len()
    );
    Library {
        artifacts: lib.artifacts,
        costs: lib.costs,
    }
}

struct LibGenerator {
    artifacts: Vec<(String, Vec<Command>)>,
    costs: CostTable,
}

const OP1: Slot = Slot::Tmp("op1");
const OP2: Slot = Slot::Tmp("op2");
const RES: Slot = Slot::Tmp("res");

impl LibGenerator {
    fn register(&mut self, name: &str, commands: Vec<Command>) {
        let cost = self.costs.cost_of(&commands);
        self.costs.register(name, cost);
        self.artifacts.push((name.to_string(), commands));
    }

    /// Constant pool every routine depends on. `#min_int` is built by
    /// subtraction because the target rejects the literal; `#p_31` aliases
    /// it (1 << 31 is the sign bit).
    fn gen_init(&mut self) {
        let mut cmds = vec![
            Command::set(Slot::Two, 2),
            Command::set(Slot::Four, 4),
            Command::set(Slot::ThirtyTwo, 32),
            Command::set(Slot::MinInt, -2147483647),
            Command::RemoveLit {
                slot: Slot::MinInt,
                value: 1,
            },
        ];
        for i in 0..31 {
            cmds.push(Command::set(Slot::Pow(i), 1i32 << i));
        }
        cmds.push(Command::copy(Slot::Pow(31), Slot::MinInt));
        self.register("lib/init", cmds);
    }

    /// and/or/xor over `#op1`/`#op2` into `#res`, bit-serially.
    fn gen_bitwise(&mut self) {
        for op in ["and", "or", "xor"] {
            let t1 = Slot::Tmp("t1");
            let t2 = Slot::Tmp("t2");
            let b1 = Slot::Tmp("b1");
            let b2 = Slot::Tmp("b2");
            let s1 = Slot::Tmp("s1");
            let s2 = Slot::Tmp("s2");

            let mut cmds = vec![
                Command::set(RES, 0),
                Command::copy(t1, OP1),
                Command::copy(t2, OP2),
                Command::iff(
                    Test::negative(t1),
                    Command::op(t1, ScoreOp::Sub, Slot::MinInt),
                ),
                Command::iff(
                    Test::negative(t2),
                    Command::op(t2, ScoreOp::Sub, Slot::MinInt),
                ),
            ];

            for i in 0..31u8 {
                cmds.push(Command::copy(b1, t1));
                cmds.push(Command::op(b1, ScoreOp::Mod, Slot::Two));
                cmds.push(Command::copy(b2, t2));
                cmds.push(Command::op(b2, ScoreOp::Mod, Slot::Two));
                let set_bit = Command::op(RES, ScoreOp::Add, Slot::Pow(i));
                match op {
                    "and" => {
                        cmds.push(Command::iff2(Test::eq(b1, 1), Test::eq(b2, 1), set_bit));
                    }
                    "or" => {
                        cmds.push(Command::iff(Test::eq(b1, 1), set_bit.clone()));
                        cmds.push(Command::guarded(
                            vec![
                                Cond {
                                    negate: true,
                                    test: Test::eq(b1, 1),
                                },
                                Cond {
                                    negate: false,
                                    test: Test::eq(b2, 1),
                                },
                            ],
                            set_bit,
                        ));
                    }
                    _ => {
                        cmds.push(Command::unless(
                            Test::Compare {
                                lhs: b1,
                                rel: Rel::Eq,
                                rhs: b2,
                            },
                            set_bit,
                        ));
                    }
                }
                cmds.push(Command::op(t1, ScoreOp::Div, Slot::Two));
                cmds.push(Command::op(t2, ScoreOp::Div, Slot::Two));
            }

            // Sign bits combine last so the accumulator never overflows
            // mid-loop.
            cmds.push(Command::set(s1, 0));
            cmds.push(Command::set(s2, 0));
            cmds.push(Command::iff(Test::negative(OP1), Command::set(s1, 1)));
            cmds.push(Command::iff(Test::negative(OP2), Command::set(s2, 1)));
            let set_sign = Command::op(RES, ScoreOp::Sub, Slot::MinInt);
            match op {
                "and" => {
                    cmds.push(Command::iff2(Test::eq(s1, 1), Test::eq(s2, 1), set_sign));
                }
                "or" => {
                    cmds.push(Command::iff(Test::eq(s1, 1), set_sign.clone()));
                    cmds.push(Command::guarded(
                        vec![
                            Cond {
                                negate: true,
                                test: Test::eq(s1, 1),
                            },
                            Cond {
                                negate: false,
                                test: Test::eq(s2, 1),
                            },
                        ],
                        set_sign,
                    ));
                }
                _ => {
                    cmds.push(Command::unless(
                        Test::Compare {
                            lhs: s1,
                            rel: Rel::Eq,
                            rhs: s2,
                        },
                        set_sign,
                    ));
                }
            }

            self.register(&format!("lib/{op}"), cmds);
        }
    }

    /// sll/srl/sra: decompose the shift amount into its 5 bits and apply
    /// power-of-two steps. Logical right shifts of negative values and all
    /// arithmetic right shifts go through dedicated helpers, because a
    /// truncating divide rounds toward zero rather than toward the floor.
    fn gen_shifts(&mut self) {
        // Helpers first so the shift routines see their costs.
        for i in 0..5u8 {
            let n = 1u8 << i;
            self.register(&format!("lib/srl_{n}_neg"), srl_neg_body(n));
            self.register(&format!("lib/sra_{n}"), sra_body(n));
        }

        for op in ["sll", "srl", "sra"] {
            let amt = Slot::Tmp("amt");
            let bit = Slot::Tmp("bit");

            let mut cmds = vec![
                Command::copy(RES, OP1),
                Command::copy(amt, OP2),
                Command::op(amt, ScoreOp::Mod, Slot::ThirtyTwo),
                // Truncating % can leave a negative class for a negative
                // amount; the ISA wants amount mod 32.
                Command::iff(
                    Test::negative(amt),
                    Command::AddLit {
                        slot: amt,
                        value: 32,
                    },
                ),
            ];

            for i in 0..5u8 {
                let n = 1u8 << i;
                cmds.push(Command::copy(bit, amt));
                cmds.push(Command::op(bit, ScoreOp::Mod, Slot::Two));
                match op {
                    "sll" => {
                        cmds.push(Command::iff(
                            Test::eq(bit, 1),
                            Command::op(RES, ScoreOp::Mul, Slot::Pow(n)),
                        ));
                    }
                    "srl" => {
                        cmds.push(Command::iff2(
                            Test::eq(bit, 1),
                            Test::at_least(RES, 0),
                            Command::op(RES, ScoreOp::Div, Slot::Pow(n)),
                        ));
                        cmds.push(Command::iff2(
                            Test::eq(bit, 1),
                            Test::negative(RES),
                            Command::call(format!("lib/srl_{n}_neg")),
                        ));
                    }
                    _ => {
                        cmds.push(Command::iff(
                            Test::eq(bit, 1),
                            Command::call(format!("lib/sra_{n}")),
                        ));
                    }
                }
                cmds.push(Command::op(amt, ScoreOp::Div, Slot::Two));
            }

            self.register(&format!("lib/{op}"), cmds);
        }
    }

    /// Low-word multiply: 31 shift-and-add rounds over a sign-cleared
    /// multiplier, then one round for the multiplier's sign bit.
    fn gen_mul(&mut self) {
        let t1 = Slot::Tmp("t1");
        let t2 = Slot::Tmp("t2");
        let bit = Slot::Tmp("bit");
        let s2 = Slot::Tmp("s2");

        let mut cmds = vec![
            Command::set(RES, 0),
            Command::copy(t1, OP1),
            Command::copy(t2, OP2),
            Command::set(s2, 0),
            Command::iff(Test::negative(t2), Command::set(s2, 1)),
            Command::iff(
                Test::eq(s2, 1),
                Command::op(t2, ScoreOp::Sub, Slot::MinInt),
            ),
        ];
        for _ in 0..31 {
            cmds.push(Command::copy(bit, t2));
            cmds.push(Command::op(bit, ScoreOp::Mod, Slot::Two));
            cmds.push(Command::unless(
                Test::eq(bit, 0),
                Command::op(RES, ScoreOp::Add, t1),
            ));
            cmds.push(Command::op(t1, ScoreOp::Mul, Slot::Two));
            cmds.push(Command::op(t2, ScoreOp::Div, Slot::Two));
        }
        // t1 now holds op1 << 31.
        cmds.push(Command::iff(
            Test::eq(s2, 1),
            Command::op(RES, ScoreOp::Add, t1),
        ));
        self.register("lib/mul", cmds);
    }

    /// High-word multiplies keep a (high, low) accumulator and walk the
    /// multiplier MSB-first: double the accumulator, then add the extended
    /// multiplicand when the bit is set. mulh sign-extends both operands,
    /// mulhsu only the first, mulhu neither; the signed-multiplier half of
    /// mulh's extension is the final high-limb adjustment.
    fn gen_mulh_family(&mut self) {
        let rh = Slot::Tmp("rh");
        let rl = Slot::Tmp("rl");
        let u1h = Slot::Tmp("u1h");
        let u1l = Slot::Tmp("u1l");

        // 64-bit accumulator += (u1h, u1l), with carry out of the low limb
        // detected by biased comparison against the pre-add value.
        let old_rl = Slot::Tmp("old_rl");
        let c1 = Slot::Tmp("c1");
        let c2 = Slot::Tmp("c2");
        self.register(
            "lib/add64",
            vec![
                Command::op(rh, ScoreOp::Add, u1h),
                Command::copy(old_rl, rl),
                Command::op(rl, ScoreOp::Add, u1l),
                Command::copy(c1, rl),
                Command::op(c1, ScoreOp::Sub, Slot::MinInt),
                Command::copy(c2, old_rl),
                Command::op(c2, ScoreOp::Sub, Slot::MinInt),
                Command::iff(
                    Test::Compare {
                        lhs: c1,
                        rel: Rel::Lt,
                        rhs: c2,
                    },
                    Command::AddLit { slot: rh, value: 1 },
                ),
            ],
        );

        // 64-bit accumulator <<= 1.
        self.register(
            "lib/shl64",
            vec![
                Command::op(rh, ScoreOp::Mul, Slot::Two),
                Command::iff(
                    Test::negative(rl),
                    Command::AddLit { slot: rh, value: 1 },
                ),
                Command::op(rl, ScoreOp::Mul, Slot::Two),
            ],
        );

        for op in ["mulh", "mulhu", "mulhsu"] {
            let t2 = Slot::Tmp("t2");
            let s2 = Slot::Tmp("s2");
            let bit = Slot::Tmp("bit");

            let mut cmds = vec![
                Command::set(rh, 0),
                Command::set(rl, 0),
                Command::copy(u1l, OP1),
                Command::set(u1h, 0),
            ];
            if op == "mulh" || op == "mulhsu" {
                cmds.push(Command::iff(Test::negative(OP1), Command::set(u1h, -1)));
            }
            cmds.push(Command::copy(t2, OP2));
            cmds.push(Command::set(s2, 0));
            cmds.push(Command::iff(Test::negative(t2), Command::set(s2, 1)));
            cmds.push(Command::iff(
                Test::eq(s2, 1),
                Command::op(t2, ScoreOp::Sub, Slot::MinInt),
            ));

            for i in (0..32u8).rev() {
                cmds.push(Command::call("lib/shl64"));
                if i == 31 {
                    cmds.push(Command::copy(bit, s2));
                } else {
                    cmds.push(Command::copy(bit, t2));
                    if i > 0 {
                        cmds.push(Command::op(bit, ScoreOp::Div, Slot::Pow(i)));
                    }
                    cmds.push(Command::op(bit, ScoreOp::Mod, Slot::Two));
                }
                cmds.push(Command::unless(Test::eq(bit, 0), Command::call("lib/add64")));
            }

            if op == "mulh" {
                cmds.push(Command::iff(
                    Test::negative(OP2),
                    Command::op(rh, ScoreOp::Sub, OP1),
                ));
            }
            cmds.push(Command::copy(RES, rh));
            self.register(&format!("lib/{op}"), cmds);
        }
    }

    /// Restoring unsigned long division plus the four signed/unsigned
    /// wrappers. Division by zero yields quotient -1 and remainder =
    /// dividend, per the ISA.
    fn gen_div_family(&mut self) {
        let q = Slot::Tmp("q");
        let r = Slot::Tmp("r");
        let u1 = Slot::Tmp("u1");
        let u2 = Slot::Tmp("u2");
        let tu2 = Slot::Tmp("tu2");
        let t1 = Slot::Tmp("t1");
        let sbit = Slot::Tmp("sbit");
        let bit = Slot::Tmp("bit");
        let tr = Slot::Tmp("tr");

        let mut cmds = vec![
            Command::set(q, 0),
            Command::set(r, 0),
            Command::iff(Test::eq(u2, 0), Command::set(q, -1)),
            Command::iff(Test::eq(u2, 0), Command::copy(r, u1)),
            Command::iff(Test::eq(u2, 0), Command::Return { value: 0 }),
            Command::copy(tu2, u2),
            Command::op(tu2, ScoreOp::Sub, Slot::MinInt),
            Command::copy(t1, u1),
            Command::set(sbit, 0),
            Command::iff(Test::negative(u1), Command::set(sbit, 1)),
            Command::iff(
                Test::negative(u1),
                Command::op(t1, ScoreOp::Sub, Slot::MinInt),
            ),
        ];

        for i in (0..32u8).rev() {
            cmds.push(Command::op(r, ScoreOp::Mul, Slot::Two));
            if i == 31 {
                cmds.push(Command::copy(bit, sbit));
            } else {
                cmds.push(Command::copy(bit, t1));
                if i > 0 {
                    cmds.push(Command::op(bit, ScoreOp::Div, Slot::Pow(i)));
                }
                cmds.push(Command::op(bit, ScoreOp::Mod, Slot::Two));
            }
            cmds.push(Command::op(r, ScoreOp::Add, bit));
            cmds.push(Command::copy(tr, r));
            cmds.push(Command::op(tr, ScoreOp::Sub, Slot::MinInt));
            let fits = Test::Compare {
                lhs: tr,
                rel: Rel::Ge,
                rhs: tu2,
            };
            cmds.push(Command::iff(fits.clone(), Command::op(r, ScoreOp::Sub, u2)));
            cmds.push(Command::iff(fits, Command::op(q, ScoreOp::Add, Slot::Pow(i))));
        }
        self.register("lib/divu_logic", cmds);

        let s1 = Slot::Tmp("s1");
        let s2 = Slot::Tmp("s2");
        let zero = Slot::Tmp("zero");

        for op in ["divu", "remu", "div", "rem"] {
            let mut cmds = Vec::new();
            match op {
                "divu" | "remu" => {
                    cmds.push(Command::copy(u1, OP1));
                    cmds.push(Command::copy(u2, OP2));
                    cmds.push(Command::call("lib/divu_logic"));
                    cmds.push(Command::copy(RES, if op == "divu" { q } else { r }));
                }
                _ => {
                    cmds.push(Command::set(s1, 0));
                    cmds.push(Command::set(s2, 0));
                    cmds.push(Command::iff(Test::negative(OP1), Command::set(s1, 1)));
                    cmds.push(Command::iff(Test::negative(OP2), Command::set(s2, 1)));
                    // |op| via 0 - op; the magnitude of i32::MIN survives as
                    // its own bit pattern, which is exactly what the
                    // unsigned core needs.
                    cmds.push(Command::copy(u1, OP1));
                    cmds.push(Command::iff(Test::eq(s1, 1), Command::set(zero, 0)));
                    cmds.push(Command::iff(Test::eq(s1, 1), Command::copy(u1, zero)));
                    cmds.push(Command::iff(
                        Test::eq(s1, 1),
                        Command::op(u1, ScoreOp::Sub, OP1),
                    ));
                    cmds.push(Command::copy(u2, OP2));
                    cmds.push(Command::iff(Test::eq(s2, 1), Command::set(zero, 0)));
                    cmds.push(Command::iff(Test::eq(s2, 1), Command::copy(u2, zero)));
                    cmds.push(Command::iff(
                        Test::eq(s2, 1),
                        Command::op(u2, ScoreOp::Sub, OP2),
                    ));
                    cmds.push(Command::call("lib/divu_logic"));
                    if op == "div" {
                        cmds.push(Command::copy(RES, q));
                        let differ = Cond {
                            negate: true,
                            test: Test::Compare {
                                lhs: s1,
                                rel: Rel::Eq,
                                rhs: s2,
                            },
                        };
                        let positive = Cond {
                            negate: false,
                            test: Test::at_least(q, 1),
                        };
                        for step in [
                            Command::set(zero, 0),
                            Command::copy(RES, zero),
                            Command::op(RES, ScoreOp::Sub, q),
                        ] {
                            cmds.push(Command::guarded(
                                vec![differ.clone(), positive.clone()],
                                step,
                            ));
                        }
                    } else {
                        cmds.push(Command::copy(RES, r));
                        for step in [
                            Command::set(zero, 0),
                            Command::copy(RES, zero),
                            Command::op(RES, ScoreOp::Sub, r),
                        ] {
                            cmds.push(Command::iff2(
                                Test::eq(s1, 1),
                                Test::at_least(r, 1),
                                step,
                            ));
                        }
                    }
                }
            }
            self.register(&format!("lib/{op}"), cmds);
        }
    }

    /// Word-array memory access. Callers export `addr` (word index), `off`
    /// (byte offset) and, for stores, `val` into the io record; the
    /// routines are macro-invoked with that record. Sub-word extraction
    /// clears the word's sign bit first and restores it into the top lane,
    /// narrow stores read-modify-write with wrapping lane arithmetic.
    fn gen_mem(&mut self) {
        let w = Slot::Tmp("w");
        let off = Slot::Tmp("off");
        let sbit = Slot::Tmp("sbit");

        let extract_byte = |cmds: &mut Vec<Command>| {
            cmds.push(Command::set(sbit, 0));
            cmds.push(Command::iff(Test::negative(w), Command::set(sbit, 1)));
            cmds.push(Command::iff(
                Test::negative(w),
                Command::op(w, ScoreOp::Sub, Slot::MinInt),
            ));
            for (o, p) in [(1, 8u8), (2, 16), (3, 24)] {
                cmds.push(Command::iff(
                    Test::eq(off, o),
                    Command::op(w, ScoreOp::Div, Slot::Pow(p)),
                ));
            }
            cmds.push(Command::op(w, ScoreOp::Mod, Slot::Pow(8)));
            cmds.push(Command::iff2(
                Test::eq(sbit, 1),
                Test::eq(off, 3),
                Command::AddLit {
                    slot: w,
                    value: 128,
                },
            ));
        };

        let extract_half = |cmds: &mut Vec<Command>| {
            cmds.push(Command::set(sbit, 0));
            cmds.push(Command::iff(Test::negative(w), Command::set(sbit, 1)));
            cmds.push(Command::iff(
                Test::negative(w),
                Command::op(w, ScoreOp::Sub, Slot::MinInt),
            ));
            cmds.push(Command::iff(
                Test::eq(off, 2),
                Command::op(w, ScoreOp::Div, Slot::Pow(16)),
            ));
            cmds.push(Command::op(w, ScoreOp::Mod, Slot::Pow(16)));
            cmds.push(Command::iff2(
                Test::eq(sbit, 1),
                Test::eq(off, 2),
                Command::AddLit {
                    slot: w,
                    value: 32768,
                },
            ));
        };

        let mut lbu = vec![Command::MacroLoadWord { dst: w }];
        extract_byte(&mut lbu);
        lbu.push(Command::copy(RES, w));
        self.register("mem/read_lbu", lbu);

        let mut lb = vec![Command::MacroLoadWord { dst: w }];
        extract_byte(&mut lb);
        lb.push(Command::iff(
            Test::range(w, 128, 255),
            Command::RemoveLit {
                slot: w,
                value: 256,
            },
        ));
        lb.push(Command::copy(RES, w));
        self.register("mem/read_lb", lb);

        let mut lhu = vec![Command::MacroLoadWord { dst: w }];
        extract_half(&mut lhu);
        lhu.push(Command::copy(RES, w));
        self.register("mem/read_lhu", lhu);

        let mut lh = vec![Command::MacroLoadWord { dst: w }];
        extract_half(&mut lh);
        lh.push(Command::iff(
            Test::range(w, 32768, 65535),
            Command::RemoveLit {
                slot: w,
                value: 65536,
            },
        ));
        lh.push(Command::copy(RES, w));
        self.register("mem/read_lh", lh);

        self.register("mem/read_lw", vec![Command::MacroLoadWord { dst: RES }]);
        self.register("mem/write_sw", vec![Command::MacroStoreWord]);

        let old = Slot::Tmp("old");
        let byte = Slot::Tmp("byte");
        let lane = Slot::Tmp("lane");
        let new = Slot::Tmp("new");

        let mut sb = vec![Command::MacroLoadWord { dst: old }, Command::copy(w, old)];
        {
            let cmds = &mut sb;
            cmds.push(Command::set(sbit, 0));
            cmds.push(Command::iff(Test::negative(old), Command::set(sbit, 1)));
            cmds.push(Command::iff(
                Test::negative(old),
                Command::op(w, ScoreOp::Sub, Slot::MinInt),
            ));
            for (o, p) in [(1, 8u8), (2, 16), (3, 24)] {
                cmds.push(Command::iff(
                    Test::eq(off, o),
                    Command::op(w, ScoreOp::Div, Slot::Pow(p)),
                ));
            }
            cmds.push(Command::copy(byte, w));
            cmds.push(Command::op(byte, ScoreOp::Mod, Slot::Pow(8)));
            cmds.push(Command::iff2(
                Test::eq(sbit, 1),
                Test::eq(off, 3),
                Command::AddLit {
                    slot: byte,
                    value: 128,
                },
            ));
            cmds.push(Command::set(lane, 1));
            for (o, p) in [(1, 8u8), (2, 16), (3, 24)] {
                cmds.push(Command::iff(Test::eq(off, o), Command::copy(lane, Slot::Pow(p))));
            }
            cmds.push(Command::op(byte, ScoreOp::Mul, lane));
            cmds.push(Command::op(old, ScoreOp::Sub, byte));
            cmds.push(Command::LoadIoVal { dst: new });
            cmds.push(Command::op(new, ScoreOp::Mod, Slot::Pow(8)));
            cmds.push(Command::iff(
                Test::negative(new),
                Command::op(new, ScoreOp::Add, Slot::Pow(8)),
            ));
            cmds.push(Command::op(new, ScoreOp::Mul, lane));
            cmds.push(Command::op(old, ScoreOp::Add, new));
            cmds.push(Command::ExportScore {
                key: "val",
                slot: old,
            });
            cmds.push(Command::MacroStoreWord);
        }
        self.register("mem/write_sb", sb);

        let mut sh = vec![Command::MacroLoadWord { dst: old }, Command::copy(w, old)];
        {
            let cmds = &mut sh;
            cmds.push(Command::set(sbit, 0));
            cmds.push(Command::iff(Test::negative(old), Command::set(sbit, 1)));
            cmds.push(Command::iff(
                Test::negative(old),
                Command::op(w, ScoreOp::Sub, Slot::MinInt),
            ));
            cmds.push(Command::iff(
                Test::eq(off, 2),
                Command::op(w, ScoreOp::Div, Slot::Pow(16)),
            ));
            cmds.push(Command::copy(byte, w));
            cmds.push(Command::op(byte, ScoreOp::Mod, Slot::Pow(16)));
            cmds.push(Command::iff2(
                Test::eq(sbit, 1),
                Test::eq(off, 2),
                Command::AddLit {
                    slot: byte,
                    value: 32768,
                },
            ));
            cmds.push(Command::set(lane, 1));
            cmds.push(Command::iff(Test::eq(off, 2), Command::copy(lane, Slot::Pow(16))));
            cmds.push(Command::op(byte, ScoreOp::Mul, lane));
            cmds.push(Command::op(old, ScoreOp::Sub, byte));
            cmds.push(Command::LoadIoVal { dst: new });
            cmds.push(Command::op(new, ScoreOp::Mod, Slot::Pow(16)));
            cmds.push(Command::iff(
                Test::negative(new),
                Command::op(new, ScoreOp::Add, Slot::Pow(16)),
            ));
            cmds.push(Command::op(new, ScoreOp::Mul, lane));
            cmds.push(Command::op(old, ScoreOp::Add, new));
            cmds.push(Command::ExportScore {
                key: "val",
                slot: old,
            });
            cmds.push(Command::MacroStoreWord);
        }
        self.register("mem/write_sh", sh);

        // Seed one zero word, then double 21 times: 2 MiW of RAM.
        let mut init = vec![Command::RamSeed];
        init.extend(std::iter::repeat(Command::RamGrow).take(21));
        self.register("mem/init", init);
    }

    /// Line-buffered console: a byte in a0 either flushes (newline) or is
    /// resolved to its glyph and appended to the buffer.
    fn gen_console(&mut self, glyphs: GlyphLookup) {
        let chr = Slot::Tmp("char");

        self.register("lib/uart_print", vec![Command::PrintBuffer]);
        self.register(
            "lib/uart_flush",
            vec![
                Command::iff(
                    Test::BufferNonEmpty,
                    Command::CallWith {
                        path: "lib/uart_print".to_string(),
                        store: Store::Uart,
                    },
                ),
                Command::ClearBuffer,
            ],
        );

        let glyph_set = glyph_table();
        match glyphs {
            GlyphLookup::Tree => self.gen_glyph_tree(&glyph_set, "lib/ascii/map"),
            GlyphLookup::Table => {
                let mut cmds = Vec::with_capacity(glyph_set.len());
                for (value, glyph) in &glyph_set {
                    cmds.push(Command::iff(
                        Test::eq(chr, *value),
                        Command::SetGlyph {
                            glyph: glyph.clone(),
                        },
                    ));
                }
                self.register("lib/ascii/map", cmds);
            }
        }

        self.register(
            "lib/uart_putc",
            vec![
                Command::copy(chr, Slot::Reg(10)),
                Command::iff(Test::eq(chr, 10), Command::call("lib/uart_flush")),
                Command::unless(Test::eq(chr, 10), Command::call("lib/ascii/map")),
                Command::unless(Test::eq(chr, 10), Command::AppendGlyph),
            ],
        );
    }

    fn gen_glyph_tree(&mut self, chars: &[(i32, String)], name: &str) {
        let chr = Slot::Tmp("char");
        if let [(_, glyph)] = chars {
            self.register(
                name,
                vec![Command::SetGlyph {
                    glyph: glyph.clone(),
                }],
            );
            return;
        }

        let mid = chars.len() / 2;
        let (low, high) = chars.split_at(mid);
        let low_name = format!("{name}_0");
        let high_name = format!("{name}_1");
        // Children first: cost registration is bottom-up.
        self.gen_glyph_tree(low, &low_name);
        self.gen_glyph_tree(high, &high_name);

        self.register(
            name,
            vec![
                Command::iff(
                    Test::range(chr, low[0].0, low[low.len() - 1].0),
                    Command::call(low_name),
                ),
                Command::iff(
                    Test::range(chr, high[0].0, high[high.len() - 1].0),
                    Command::call(high_name),
                ),
            ],
        );
    }
}

fn srl_neg_body(n: u8) -> Vec<Command> {
    vec![
        Command::op(RES, ScoreOp::Sub, Slot::MinInt),
        Command::op(RES, ScoreOp::Div, Slot::Pow(n)),
        Command::op(RES, ScoreOp::Add, Slot::Pow(31 - n)),
    ]
}

fn sra_body(n: u8) -> Vec<Command> {
    let old = Slot::Tmp("old_res");
    let rem = Slot::Tmp("rem");
    let mut cmds = Vec::with_capacity(n as usize * 5);
    for _ in 0..n {
        cmds.push(Command::copy(old, RES));
        cmds.push(Command::copy(rem, RES));
        cmds.push(Command::op(rem, ScoreOp::Mod, Slot::Two));
        cmds.push(Command::op(RES, ScoreOp::Div, Slot::Two));
        // Truncation rounded toward zero; odd negatives must round down.
        cmds.push(Command::iff2(
            Test::negative(old),
            Test::eq(rem, -1),
            Command::RemoveLit { slot: RES, value: 1 },
        ));
    }
    cmds
}

/// Byte 10 maps to a space (the flush path consumes real newlines before
/// lookup); everything else is printable ASCII.
fn glyph_table() -> Vec<(i32, String)> {
    let mut chars = vec![(10, " ".to_string())];
    for b in 32u8..=126 {
        chars.push((b as i32, (b as char).to_string()));
    }
    chars
}
