// cost.rs - Invocation-cost accounting
//
// The target caps total procedure invocations per scheduling quantum, so
// every generated procedure carries a worst-case command cost: its own
// emitted lines plus the registered transitive cost of each invocation in
// its body. Targets outside the generated set (the external service
// dispatcher, the debug dump) are priced with a conservative flat estimate.

use crate::command::Command;
use std::collections::BTreeMap;

/// Flat cost charged for an invocation of a procedure this compiler did not
/// generate. Deliberately pessimistic; budget precision is traded for build
/// robustness.
pub const DEFAULT_EXTERN_COST: i64 = 100;

/// Routine name -> worst-case transitive command count. Built incrementally
/// by the library generator, read-only afterward.
#[derive(Debug, Clone)]
pub struct CostTable {
    costs: BTreeMap<String, i64>,
    extern_cost: i64,
}

impl CostTable {
    pub fn new(extern_cost: i64) -> CostTable {
        CostTable {
            costs: BTreeMap::new(),
            extern_cost,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, cost: i64) {
        self.costs.insert(name.into(), cost);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.costs.get(name).copied()
    }

    /// Registered cost of an invocation target, or the flat estimate.
    pub fn invocation_cost(&self, target: &str) -> i64 {
        self.costs.get(target).copied().unwrap_or(self.extern_cost)
    }

    /// Cost of a command sequence: one per line plus the transitive cost of
    /// every invocation, however many times it appears.
    pub fn cost_of(&self, commands: &[Command]) -> i64 {
        let mut total = commands.len() as i64;
        for cmd in commands {
            if let Some(target) = cmd.call_target() {
                total += self.invocation_cost(target);
            }
        }
        total
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.costs.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Worst-case per-step accounting for a compiled program.
#[derive(Debug, Clone)]
pub struct BudgetReport {
    /// Name of the most expensive generated unit.
    pub max_unit: String,
    /// Its transitive command cost.
    pub max_unit_cost: i64,
    /// Dispatch tree decision depth.
    pub dispatch_depth: u32,
    /// Commands spent routing one step through the dispatcher.
    pub dispatch_overhead: i64,
    /// Upper bound on commands executed by a single step.
    pub worst_step_cost: i64,
    /// Steps the bootstrap schedules per quantum.
    pub steps_per_quantum: u32,
    /// Minimum invocation budget the deployment must configure.
    pub min_budget: i64,
}

/// Commands spent traversing the dispatcher: the root's cache-and-enter
/// pair, two range tests per decision level, and the leaf invoke.
pub fn dispatch_overhead(depth: u32, n_units: usize) -> i64 {
    if n_units == 0 {
        return 0;
    }
    2 + 2 * depth as i64 + 1
}

/// Combine per-unit costs with the dispatcher to produce the budget report.
pub fn budget(
    units: &[(String, Vec<Command>)],
    costs: &CostTable,
    dispatch_depth: u32,
    steps_per_quantum: u32,
) -> BudgetReport {
    let (max_unit, max_unit_cost) = units
        .iter()
        .map(|(name, cmds)| (name.clone(), costs.cost_of(cmds)))
        .max_by_key(|(_, cost)| *cost)
        .unwrap_or_default();

    let overhead = dispatch_overhead(dispatch_depth, units.len());
    let worst_step_cost = overhead + max_unit_cost;

    BudgetReport {
        max_unit,
        max_unit_cost,
        dispatch_depth,
        dispatch_overhead: overhead,
        worst_step_cost,
        steps_per_quantum,
        min_budget: worst_step_cost * steps_per_quantum as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, Slot};

    #[test]
    fn counts_lines_and_registered_calls() {
        let mut table = CostTable::new(DEFAULT_EXTERN_COST);
        table.register("lib/and", 240);

        let cmds = vec![
            Command::set(Slot::Tmp("op1"), 1),
            Command::call("lib/and"),
            Command::set(Slot::Tmp("res"), 0),
        ];
        assert_eq!(table.cost_of(&cmds), 3 + 240);
    }

    #[test]
    fn unregistered_target_uses_flat_estimate() {
        let table = CostTable::new(DEFAULT_EXTERN_COST);
        let cmds = vec![Command::call("ecall/dispatch")];
        assert_eq!(table.cost_of(&cmds), 1 + DEFAULT_EXTERN_COST);
    }

    #[test]
    fn repeated_calls_multiply() {
        let mut table = CostTable::new(0);
        table.register("lib/shl64", 3);
        let cmds: Vec<Command> = (0..32).map(|_| Command::call("lib/shl64")).collect();
        assert_eq!(table.cost_of(&cmds), 32 + 32 * 3);
    }

    #[test]
    fn budget_combines_dispatch_and_worst_unit() {
        let table = CostTable::new(0);
        let units = vec![
            ("instr_0".to_string(), vec![Command::set(Slot::Pc, 4)]),
            (
                "instr_4".to_string(),
                vec![Command::set(Slot::Pc, 8), Command::set(Slot::Reg(1), 1)],
            ),
        ];
        let report = budget(&units, &table, 1, 100);
        assert_eq!(report.max_unit, "instr_4");
        assert_eq!(report.max_unit_cost, 2);
        assert_eq!(report.dispatch_overhead, 2 + 2 + 1);
        assert_eq!(report.worst_step_cost, 7);
        assert_eq!(report.min_budget, 700);
    }

    #[test]
    fn empty_program_costs_nothing() {
        let table = CostTable::new(0);
        let report = budget(&[], &table, 0, 100);
        assert_eq!(report.worst_step_cost, 0);
        assert_eq!(report.min_budget, 0);
    }
}
