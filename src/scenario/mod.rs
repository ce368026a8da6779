//! Scenarios: streaming-unit programs described in TOML.
//!
//! A scenario seeds memory, configures stream and predicate registers, then
//! runs a list of steps against them. [`runner`] executes it and produces a
//! report of every burst.
//!
//! # Example Scenario
//!
//! ```toml
//! # Upper triangle of a 4x4 matrix of 64-bit values
//! [[memory]]
//! name = "matrix"
//! address = 0x1000
//! width = 8
//! pattern = { start = 0, step = 1, count = 16 }
//!
//! [[register]]
//! index = 1
//! width = 8
//! kind = "load"
//! base = 0x1000
//! vector = true
//!
//! [[register.dimension]]
//! offset = 0
//! size = 3
//! stride = 4
//!
//! [[register.dimension.modifier]]
//! type = "static"
//! target = "size"
//! behaviour = "decrement"
//! displacement = 1
//! target_dim = 1
//!
//! [[register.dimension.modifier]]
//! type = "static"
//! target = "offset"
//! behaviour = "increment"
//! displacement = 1
//! target_dim = 1
//!
//! [[register.dimension]]
//! offset = 1
//! size = 3
//! stride = 1
//!
//! [[step]]
//! op = "drain"
//! register = 1
//! ```
//!
//! Registers are configured in file order and closed in file order, so a
//! register feeding dynamic or scatter-gather modifiers must be listed before
//! the registers reading it.

pub mod runner;

pub use runner::{Outcome, OutcomeKind, Report, ScenarioRunner};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::memory::HostMemory;
use crate::streaming::{
    DynamicBehaviour, DynamicModifier, ElementWidth, LaneType, LaneValue, PredicateMode,
    PredicateRegister, RegisterKind, ScatterGatherModifier, StaticBehaviour, StaticModifier, Target,
};

/// A complete scenario file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub memory: Vec<MemoryDef>,
    #[serde(default, rename = "register")]
    pub registers: Vec<RegisterDef>,
    #[serde(default, rename = "predicate")]
    pub predicates: Vec<PredicateDef>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

/// Memory initializer.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryDef {
    /// Registers a named region for dumps when present.
    #[serde(default)]
    pub name: Option<String>,
    pub address: u64,
    pub width: ElementWidth,
    #[serde(default)]
    pub values: Vec<Scalar>,
    #[serde(default)]
    pub pattern: Option<PatternDef>,
}

/// Arithmetic sequence of integers.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternDef {
    #[serde(default)]
    pub start: i64,
    #[serde(default = "default_step")]
    pub step: i64,
    pub count: usize,
}

fn default_step() -> i64 {
    1
}

/// Integer or floating-point literal.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn to_bits(self, width: ElementWidth) -> Result<u64> {
        let value = match self {
            Self::Int(v) => LaneValue::Signed(v),
            Self::Float(v) => LaneValue::Float(v),
        };
        Ok(value.to_bits(width)?)
    }
}

/// Stream register configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDef {
    pub index: usize,
    pub width: ElementWidth,
    pub kind: RegisterKind,
    #[serde(default)]
    pub base: u64,
    #[serde(default)]
    pub predicate_mode: PredicateMode,
    /// Run in vector mode, coupled to the innermost dimension.
    #[serde(default)]
    pub vector: bool,
    /// Run in vector mode, coupled to this dimension.
    #[serde(default)]
    pub coupled_dimension: Option<usize>,
    /// Initial valid-element count, for store registers.
    #[serde(default)]
    pub valid: Option<usize>,
    /// Lane interpretation used in the report.
    #[serde(default)]
    pub lanes: LaneType,
    #[serde(default, rename = "dimension")]
    pub dimensions: Vec<DimensionDef>,
}

impl RegisterDef {
    pub fn is_vector(&self) -> bool {
        self.vector || self.coupled_dimension.is_some()
    }
}

/// One dimension, outermost first, with the modifiers added right after it.
#[derive(Debug, Clone, Deserialize)]
pub struct DimensionDef {
    /// Offset in elements.
    #[serde(default)]
    pub offset: i64,
    pub size: u64,
    #[serde(default = "default_step")]
    pub stride: i64,
    #[serde(default, rename = "modifier")]
    pub modifiers: Vec<ModifierDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModifierDef {
    Static {
        target: Target,
        behaviour: StaticBehaviour,
        #[serde(default = "default_step")]
        displacement: i64,
        target_dim: usize,
    },
    Dynamic {
        target: Target,
        behaviour: DynamicBehaviour,
        source: usize,
        target_dim: usize,
    },
    ScatterGather {
        behaviour: DynamicBehaviour,
        source: usize,
        target_dim: usize,
    },
}

/// Predicate register contents.
///
/// Either a full `mask` of 64 bytes, or the list of `enabled` byte lanes.
#[derive(Debug, Clone, Deserialize)]
pub struct PredicateDef {
    pub index: usize,
    #[serde(default)]
    pub mode: PredicateMode,
    #[serde(default)]
    pub mask: Option<Vec<u8>>,
    #[serde(default)]
    pub enabled: Vec<usize>,
}

impl PredicateDef {
    pub fn mask(&self) -> Result<Vec<u8>> {
        if let Some(mask) = &self.mask {
            if !self.enabled.is_empty() {
                bail!("p{}: give either `mask` or `enabled`, not both", self.index);
            }
            return Ok(mask.clone());
        }

        let mut mask = vec![0u8; PredicateRegister::VLEN];
        for &lane in &self.enabled {
            match mask.get_mut(lane) {
                Some(byte) => *byte = 1,
                None => bail!("p{}: lane {} outside the {}-lane mask", self.index, lane, PredicateRegister::VLEN),
            }
        }
        Ok(mask)
    }
}

/// One scenario step.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    /// Read one burst and advance.
    Load { register: usize },
    /// Read the current burst without advancing.
    Peek { register: usize },
    /// Read bursts until the stream finishes.
    Drain { register: usize },
    /// Write one burst and advance.
    Store {
        register: usize,
        values: Vec<Scalar>,
        #[serde(default)]
        valid: Option<usize>,
    },
    /// Pop one value from an indirect-source register.
    Indirect { register: usize },
}

impl Step {
    pub fn register(&self) -> usize {
        match self {
            Self::Load { register }
            | Self::Peek { register }
            | Self::Drain { register }
            | Self::Store { register, .. }
            | Self::Indirect { register } => *register,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Load { .. } => "load",
            Self::Peek { .. } => "peek",
            Self::Drain { .. } => "drain",
            Self::Store { .. } => "store",
            Self::Indirect { .. } => "indirect",
        }
    }
}

impl Scenario {
    /// Load a scenario from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse a scenario from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write every memory initializer and register its region.
    pub fn initialise_memory(&self, memory: &mut HostMemory) -> Result<()> {
        for (i, def) in self.memory.iter().enumerate() {
            let mut bits = def
                .values
                .iter()
                .map(|v| v.to_bits(def.width))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("memory entry {}", i))?;

            if let Some(pattern) = &def.pattern {
                let mut value = pattern.start;
                for _ in 0..pattern.count {
                    bits.push(value as u64 & def.width.mask());
                    value = value.wrapping_add(pattern.step);
                }
            }

            memory.write_values(def.width, def.address, &bits);
            if let Some(name) = &def.name {
                memory.allocate_region(name.clone(), def.address, bits.len() * def.width.bytes());
            }
            log::debug!("Seeded {} x {} at {:#x}", bits.len(), def.width, def.address);
        }
        Ok(())
    }
}

impl ModifierDef {
    pub fn target_dim(&self) -> usize {
        match self {
            Self::Static { target_dim, .. }
            | Self::Dynamic { target_dim, .. }
            | Self::ScatterGather { target_dim, .. } => *target_dim,
        }
    }

    pub(crate) fn build(&self) -> BuiltModifier {
        match *self {
            Self::Static { target, behaviour, displacement, target_dim } => {
                BuiltModifier::Static(StaticModifier::new(target, behaviour, displacement, target_dim))
            }
            Self::Dynamic { target, behaviour, source, target_dim } => {
                BuiltModifier::Dynamic(DynamicModifier::new(target, behaviour, source, target_dim))
            }
            Self::ScatterGather { behaviour, source, target_dim } => {
                BuiltModifier::ScatterGather(ScatterGatherModifier::new(behaviour, source, target_dim))
            }
        }
    }
}

pub(crate) enum BuiltModifier {
    Static(StaticModifier),
    Dynamic(DynamicModifier),
    ScatterGather(ScatterGatherModifier),
}
