//! Scenario execution.
//!
//! The runner configures the unit from a [`Scenario`], then executes its
//! steps in order. Every burst becomes one [`Outcome`] in the [`Report`].

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fmt;

use super::{BuiltModifier, RegisterDef, Scenario, Step};
use crate::config::Config;
use crate::memory::Memory;
use crate::streaming::{LaneType, LaneValue, StreamingUnit};

/// What produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Load,
    Peek,
    Store,
    Indirect,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "load",
            Self::Peek => "peek",
            Self::Store => "store",
            Self::Indirect => "indirect",
        };
        f.pad(name)
    }
}

/// One burst (or indirect read) of one register.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Index of the scenario step.
    pub step: usize,
    pub register: usize,
    pub kind: OutcomeKind,
    /// Lanes the burst moved, decoded. For a store, only the values that
    /// reached memory.
    pub values: Vec<LaneValue>,
    /// Published end-of-dimension flags, outermost first.
    pub end_of_dimension: Vec<bool>,
    pub finished: bool,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        let eod: String = self.end_of_dimension.iter().map(|&b| if b { '1' } else { '0' }).collect();
        write!(
            f,
            "#{:<3} u{:<2} {:<8} [{}] eod={}{}",
            self.step,
            self.register,
            self.kind,
            values.join(", "),
            if eod.is_empty() { "-" } else { eod.as_str() },
            if self.finished { " finished" } else { "" }
        )
    }
}

/// Everything a scenario produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub outcomes: Vec<Outcome>,
}

impl Report {
    /// Outcomes of one register, in order.
    pub fn for_register(&self, register: usize) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(move |o| o.register == register)
    }

    /// Lane values of each outcome of one register.
    pub fn values(&self, register: usize) -> Vec<Vec<LaneValue>> {
        self.for_register(register).map(|o| o.values.clone()).collect()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "{}", outcome)?;
        }
        Ok(())
    }
}

/// Executes scenarios against a streaming unit.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    max_bursts: usize,
}

impl ScenarioRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            max_bursts: config.max_bursts(),
        }
    }

    pub fn with_max_bursts(max_bursts: usize) -> Self {
        Self { max_bursts }
    }

    /// Configure and run a whole scenario.
    pub fn run<M>(&self, scenario: &Scenario, unit: &mut StreamingUnit, memory: &mut M) -> Result<Report>
    where
        M: Memory + ?Sized,
    {
        log::info!(
            "Running scenario: {} registers, {} steps",
            scenario.registers.len(),
            scenario.steps.len()
        );
        self.configure(scenario, unit, memory)?;

        let lanes: HashMap<usize, LaneType> = scenario.registers.iter().map(|r| (r.index, r.lanes)).collect();
        let mut report = Report::default();

        for (i, step) in scenario.steps.iter().enumerate() {
            let lane = lanes.get(&step.register()).copied().unwrap_or_default();
            log::debug!("Step {}: {} u{}", i, step.name(), step.register());
            self.execute(i, step, lane, unit, memory, &mut report)
                .with_context(|| format!("step {} ({} u{})", i, step.name(), step.register()))?;
        }

        Ok(report)
    }

    /// Set up predicates, then configure and close every register in file order.
    pub fn configure<M>(&self, scenario: &Scenario, unit: &mut StreamingUnit, memory: &mut M) -> Result<()>
    where
        M: Memory + ?Sized,
    {
        for def in &scenario.predicates {
            let mask = def.mask()?;
            unit.make_predicate_register(&mask, def.index, def.mode)
                .with_context(|| format!("configuring p{}", def.index))?;
        }

        for def in &scenario.registers {
            configure_register(def, unit).with_context(|| format!("configuring u{}", def.index))?;
        }

        for def in &scenario.registers {
            unit.end_configuration(def.index, memory)
                .with_context(|| format!("closing configuration of u{}", def.index))?;
        }
        Ok(())
    }

    fn execute<M>(
        &self,
        step_index: usize,
        step: &Step,
        lane: LaneType,
        unit: &mut StreamingUnit,
        memory: &mut M,
        report: &mut Report,
    ) -> Result<()>
    where
        M: Memory + ?Sized,
    {
        match step {
            Step::Load { register } => {
                let outcome = burst(step_index, *register, true, lane, unit, memory)?;
                report.outcomes.push(outcome);
            }
            Step::Peek { register } => {
                let outcome = burst(step_index, *register, false, lane, unit, memory)?;
                report.outcomes.push(outcome);
            }
            Step::Drain { register } => {
                let mut bursts = 0;
                while !unit.stream_finished(*register)? {
                    if bursts == self.max_bursts {
                        bail!("u{} still running after {} bursts", register, bursts);
                    }
                    let outcome = burst(step_index, *register, true, lane, unit, memory)?;
                    report.outcomes.push(outcome);
                    bursts += 1;
                }
                log::debug!("u{} drained in {} bursts", register, bursts);
            }
            Step::Store { register, values, valid } => {
                if let Some(count) = valid {
                    unit.any_register_mut(*register)?.set_valid_index(*count)?;
                }
                let width = unit.any_register(*register)?.element_width();
                let bits = values.iter().map(|v| v.to_bits(width)).collect::<Result<Vec<_>>>()?;

                unit.set_elements_bits(*register, &bits, true, memory)?;
                let stored = unit.any_register(*register)?.transferred().min(bits.len());

                let values = bits[..stored]
                    .iter()
                    .map(|&b| lane.decode(b, width))
                    .collect::<Result<Vec<_>, _>>()?;
                report.outcomes.push(Outcome {
                    step: step_index,
                    register: *register,
                    kind: OutcomeKind::Store,
                    values,
                    end_of_dimension: end_of_dimension(unit, *register)?,
                    finished: unit.stream_finished(*register)?,
                });
            }
            Step::Indirect { register } => {
                let value = unit.read_indirect(*register, memory)?;
                report.outcomes.push(Outcome {
                    step: step_index,
                    register: *register,
                    kind: OutcomeKind::Indirect,
                    values: value.iter().map(|v| LaneValue::Signed(v.value)).collect(),
                    end_of_dimension: end_of_dimension(unit, *register)?,
                    finished: value.map_or(true, |v| v.exhausted),
                });
            }
        }
        Ok(())
    }
}

fn configure_register(def: &RegisterDef, unit: &mut StreamingUnit) -> Result<()> {
    unit.make_stream_register_with_width(def.index, def.width, def.kind, def.predicate_mode)?;
    let register = unit.any_register_mut(def.index)?;
    register.start_configuration(def.base);

    for (d, dim) in def.dimensions.iter().enumerate() {
        register
            .add_dimension(dim.offset, dim.size, dim.stride)
            .with_context(|| format!("dimension {}", d))?;

        for modifier in &dim.modifiers {
            match modifier.build() {
                BuiltModifier::Static(m) => register.add_static_modifier(m)?,
                BuiltModifier::Dynamic(m) => register.add_dynamic_modifier(m)?,
                BuiltModifier::ScatterGather(m) => register.add_scatter_gather_modifier(m)?,
            }
        }
    }

    if def.is_vector() {
        register.configure_vector_coupled_dimension(def.coupled_dimension)?;
    }
    if let Some(count) = def.valid {
        register.set_valid_index(count)?;
    }
    log::debug!(
        "Configured u{}: {} {:?}, {} dimensions",
        def.index,
        def.width,
        def.kind,
        def.dimensions.len()
    );
    Ok(())
}

fn burst<M>(
    step: usize,
    register: usize,
    update: bool,
    lane: LaneType,
    unit: &mut StreamingUnit,
    memory: &mut M,
) -> Result<Outcome>
where
    M: Memory + ?Sized,
{
    let bits = unit.get_elements_bits(register, update, memory)?;
    let reg = unit.any_register(register)?;
    let width = reg.element_width();
    let valid = reg.valid_elements().min(bits.len());

    let values = bits[..valid]
        .iter()
        .map(|&b| lane.decode(b, width))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Outcome {
        step,
        register,
        kind: if update { OutcomeKind::Load } else { OutcomeKind::Peek },
        values,
        end_of_dimension: end_of_dimension(unit, register)?,
        finished: unit.stream_finished(register)?,
    })
}

fn end_of_dimension(unit: &StreamingUnit, register: usize) -> Result<Vec<bool>> {
    let count = unit.any_register(register)?.dimensions().len();
    Ok((0..count)
        .map(|d| unit.end_of_dimension(register, d))
        .collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::trace::{AccessKind, Recorder};
    use crate::memory::HostMemory;
    use crate::streaming::ElementWidth;

    fn run(toml: &str) -> Result<(Report, StreamingUnit, HostMemory)> {
        let scenario = Scenario::parse(toml)?;
        let mut memory = HostMemory::new();
        scenario.initialise_memory(&mut memory)?;
        let mut unit = StreamingUnit::new();
        let report = ScenarioRunner::with_max_bursts(64).run(&scenario, &mut unit, &mut memory)?;
        Ok((report, unit, memory))
    }

    fn unsigned(rows: &[&[u64]]) -> Vec<Vec<LaneValue>> {
        rows.iter().map(|row| row.iter().map(|&v| LaneValue::Unsigned(v)).collect()).collect()
    }

    const UPPER_TRIANGLE: &str = r#"
        [[memory]]
        address = 0x1000
        width = 8
        pattern = { count = 16 }

        [[register]]
        index = 1
        width = 8
        kind = "load"
        base = 0x1000
        vector = true

        [[register.dimension]]
        size = 3
        stride = 4

        [[register.dimension.modifier]]
        type = "static"
        target = "size"
        behaviour = "decrement"
        target_dim = 1

        [[register.dimension.modifier]]
        type = "static"
        target = "offset"
        behaviour = "increment"
        target_dim = 1

        [[register.dimension]]
        offset = 1
        size = 3

        [[step]]
        op = "drain"
        register = 1
    "#;

    #[test]
    fn test_upper_triangle() {
        let (report, unit, _) = run(UPPER_TRIANGLE).unwrap();

        assert_eq!(report.values(1), unsigned(&[&[1, 2, 3], &[6, 7], &[11]]));
        let last = report.outcomes.last().unwrap();
        assert!(last.finished);
        assert!(unit.stream_finished(1).unwrap());
        assert!(report.outcomes[..2].iter().all(|o| !o.finished));
    }

    #[test]
    fn test_csr_rows_from_indirect_source() {
        let toml = r#"
            [[memory]]
            name = "row_lengths"
            address = 0x100
            width = 4
            values = [2, 1, 3]

            [[memory]]
            address = 0x1000
            width = 8
            pattern = { start = 0, count = 24 }

            [[register]]
            index = 1
            width = 4
            kind = "indirect-source"
            base = 0x100

            [[register.dimension]]
            size = 3

            [[register]]
            index = 2
            width = 8
            kind = "load"
            base = 0x1000
            vector = true

            [[register.dimension]]
            size = 3
            stride = 8

            [[register.dimension.modifier]]
            type = "dynamic"
            target = "size"
            behaviour = "set"
            source = 1
            target_dim = 1

            [[register.dimension]]
            size = 4

            [[step]]
            op = "drain"
            register = 2
        "#;

        let (report, unit, _) = run(toml).unwrap();
        assert_eq!(report.values(2), unsigned(&[&[0, 1], &[8], &[16, 17, 18]]));
        assert!(unit.stream_finished(1).unwrap());
    }

    #[test]
    fn test_gather_with_signed_lanes() {
        let toml = r#"
            [[memory]]
            address = 0x1000
            width = 8
            values = [-100, -101, -102, -103]

            [[memory]]
            address = 0x100
            width = 1
            values = [3, 0, 2]

            [[register]]
            index = 1
            width = 1
            kind = "indirect-source"
            base = 0x100

            [[register.dimension]]
            size = 3

            [[register]]
            index = 2
            width = 8
            kind = "load"
            base = 0x1000
            vector = true
            lanes = "signed"

            [[register.dimension]]
            size = 3
            stride = 0

            [[register.dimension.modifier]]
            type = "scatter-gather"
            behaviour = "set"
            source = 1
            target_dim = 0

            [[step]]
            op = "load"
            register = 2
        "#;

        let (report, _, _) = run(toml).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(
            report.outcomes[0].values,
            vec![LaneValue::Signed(-103), LaneValue::Signed(-100), LaneValue::Signed(-102)]
        );
        assert!(report.outcomes[0].finished);
    }

    #[test]
    fn test_store_then_reload() {
        let toml = r#"
            [[register]]
            index = 3
            width = 2
            kind = "store"
            base = 0x2000
            vector = true

            [[register.dimension]]
            size = 4

            [[register]]
            index = 4
            width = 2
            kind = "load"
            base = 0x2000
            vector = true
            lanes = "signed"

            [[register.dimension]]
            size = 4

            [[step]]
            op = "store"
            register = 3
            values = [1, -1, 7, 9]

            [[step]]
            op = "peek"
            register = 4

            [[step]]
            op = "load"
            register = 4
        "#;

        let (report, _, memory) = run(toml).unwrap();
        assert_eq!(memory.read_values(ElementWidth::W16, 0x2000, 4), vec![1, 0xFFFF, 7, 9]);

        let store = &report.outcomes[0];
        assert_eq!(store.kind, OutcomeKind::Store);
        assert_eq!(store.values.len(), 4);
        assert!(store.finished);

        let load = &report.outcomes[2];
        assert_eq!(load.kind, OutcomeKind::Load);
        assert_eq!(
            load.values,
            vec![LaneValue::Signed(1), LaneValue::Signed(-1), LaneValue::Signed(7), LaneValue::Signed(9)]
        );
    }

    #[test]
    fn test_indirect_steps() {
        let toml = r#"
            [[memory]]
            address = 0x100
            width = 2
            values = [5, -6]

            [[register]]
            index = 7
            width = 2
            kind = "indirect-source"
            base = 0x100

            [[register.dimension]]
            size = 2

            [[step]]
            op = "indirect"
            register = 7

            [[step]]
            op = "indirect"
            register = 7

            [[step]]
            op = "indirect"
            register = 7
        "#;

        let (report, _, _) = run(toml).unwrap();
        let values = report.values(7);
        assert_eq!(values, vec![vec![LaneValue::Signed(5)], vec![LaneValue::Signed(-6)], vec![]]);
        assert!(!report.outcomes[0].finished);
        assert!(report.outcomes[1].finished);
        assert!(report.outcomes[2].finished);
    }

    #[test]
    fn test_drain_limit() {
        let scenario = Scenario::parse(UPPER_TRIANGLE).unwrap();
        let mut memory = HostMemory::new();
        let mut unit = StreamingUnit::new();

        let err = ScenarioRunner::with_max_bursts(2)
            .run(&scenario, &mut unit, &mut memory)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("still running after 2 bursts"));
    }

    #[test]
    fn test_load_after_finish_fails() {
        let toml = r#"
            [[register]]
            index = 1
            width = 4
            kind = "load"

            [[register.dimension]]
            size = 1

            [[step]]
            op = "load"
            register = 1

            [[step]]
            op = "load"
            register = 1
        "#;

        let err = run(toml).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("step 1"), "{}", message);
    }

    #[test]
    fn test_configuration_error_names_register() {
        let toml = r#"
            [[register]]
            index = 2
            width = 4
            kind = "load"

            [[register.dimension]]
            size = 4

            [[register.dimension.modifier]]
            type = "static"
            target = "offset"
            behaviour = "increment"
            target_dim = 3
        "#;

        let err = run(toml).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("u2"), "{}", message);
        assert!(message.contains("dimension 3"), "{}", message);
    }

    #[test]
    fn test_store_reports_only_written_values() {
        let toml = r#"
            [[register]]
            index = 3
            width = 2
            kind = "store"
            base = 0x2000
            vector = true

            [[register.dimension]]
            size = 2

            [[step]]
            op = "store"
            register = 3
            values = [4, 5, 6, 7]
        "#;

        let (report, _, memory) = run(toml).unwrap();
        assert_eq!(report.values(3), unsigned(&[&[4, 5]]));
        assert!(report.outcomes[0].finished);
        assert_eq!(memory.read_values(ElementWidth::W16, 0x2000, 3), vec![4, 5, 0]);
    }

    #[test]
    fn test_predicates_configured() {
        let toml = r#"
            [[predicate]]
            index = 2
            mode = "merging"
            enabled = [1]
        "#;

        let scenario = Scenario::parse(toml).unwrap();
        let mut unit = StreamingUnit::new();
        ScenarioRunner::with_max_bursts(1)
            .configure(&scenario, &mut unit, &mut HostMemory::new())
            .unwrap();

        let predicate = unit.predicate(2).unwrap();
        assert!(predicate.lane_enabled(1, 1));
        assert!(!predicate.lane_enabled(0, 1));
    }

    #[test]
    fn test_traced_run() {
        let scenario = Scenario::parse(UPPER_TRIANGLE).unwrap();
        let mut host = HostMemory::new();
        scenario.initialise_memory(&mut host).unwrap();

        let mut memory = Recorder::new(host);
        let mut unit = StreamingUnit::new();
        ScenarioRunner::with_max_bursts(8).run(&scenario, &mut unit, &mut memory).unwrap();

        assert!(memory.accesses().iter().all(|a| a.kind == AccessKind::Load));
        assert_eq!(memory.addresses(), vec![0x1008, 0x1010, 0x1018, 0x1030, 0x1038, 0x1058]);
    }

    #[test]
    fn test_report_display() {
        let (report, _, _) = run(UPPER_TRIANGLE).unwrap();
        let text = report.to_string();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().contains("[1, 2, 3]"));
        assert!(text.lines().last().unwrap().ends_with("finished"));
    }
}
