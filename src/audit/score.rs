//! KERNEL dimension scores and their aggregate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The six KERNEL dimensions, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Simplicity,
    Verifiability,
    Reproducibility,
    NarrowScope,
    ExplicitConstraints,
    LogicalStructure,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Simplicity,
        Dimension::Verifiability,
        Dimension::Reproducibility,
        Dimension::NarrowScope,
        Dimension::ExplicitConstraints,
        Dimension::LogicalStructure,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Simplicity => "simplicity",
            Dimension::Verifiability => "verifiability",
            Dimension::Reproducibility => "reproducibility",
            Dimension::NarrowScope => "narrow_scope",
            Dimension::ExplicitConstraints => "explicit_constraints",
            Dimension::LogicalStructure => "logical_structure",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Score of one dimension: 0–100, or unavailable when its rule module failed.
/// Serialized as a number or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u8>", into = "Option<u8>")]
pub enum DimensionScore {
    Scored(u8),
    Unavailable,
}

impl DimensionScore {
    pub fn value(&self) -> Option<u8> {
        match self {
            DimensionScore::Scored(v) => Some(*v),
            DimensionScore::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.value().is_some()
    }
}

impl From<Option<u8>> for DimensionScore {
    fn from(v: Option<u8>) -> Self {
        match v {
            Some(s) => DimensionScore::Scored(s.min(100)),
            None => DimensionScore::Unavailable,
        }
    }
}

impl From<DimensionScore> for Option<u8> {
    fn from(s: DimensionScore) -> Self {
        s.value()
    }
}

/// Six named dimension scores. The aggregate is always derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelScore {
    pub simplicity: DimensionScore,
    pub verifiability: DimensionScore,
    pub reproducibility: DimensionScore,
    pub narrow_scope: DimensionScore,
    pub explicit_constraints: DimensionScore,
    pub logical_structure: DimensionScore,
}

impl Default for KernelScore {
    fn default() -> Self {
        Self {
            simplicity: DimensionScore::Unavailable,
            verifiability: DimensionScore::Unavailable,
            reproducibility: DimensionScore::Unavailable,
            narrow_scope: DimensionScore::Unavailable,
            explicit_constraints: DimensionScore::Unavailable,
            logical_structure: DimensionScore::Unavailable,
        }
    }
}

impl KernelScore {
    pub fn get(&self, dim: Dimension) -> DimensionScore {
        match dim {
            Dimension::Simplicity => self.simplicity,
            Dimension::Verifiability => self.verifiability,
            Dimension::Reproducibility => self.reproducibility,
            Dimension::NarrowScope => self.narrow_scope,
            Dimension::ExplicitConstraints => self.explicit_constraints,
            Dimension::LogicalStructure => self.logical_structure,
        }
    }

    pub fn set(&mut self, dim: Dimension, score: DimensionScore) {
        let slot = match dim {
            Dimension::Simplicity => &mut self.simplicity,
            Dimension::Verifiability => &mut self.verifiability,
            Dimension::Reproducibility => &mut self.reproducibility,
            Dimension::NarrowScope => &mut self.narrow_scope,
            Dimension::ExplicitConstraints => &mut self.explicit_constraints,
            Dimension::LogicalStructure => &mut self.logical_structure,
        };
        *slot = score;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, DimensionScore)> + '_ {
        Dimension::ALL.iter().map(move |d| (*d, self.get(*d)))
    }

    /// Unweighted mean of the available dimensions, rounded half away from
    /// zero. 0 when no dimension is available.
    pub fn aggregate(&self) -> u8 {
        let (sum, n) = self
            .iter()
            .filter_map(|(_, s)| s.value())
            .fold((0u32, 0u32), |(sum, n), v| (sum + v as u32, n + 1));
        if n == 0 {
            return 0;
        }
        // Integer form of round(sum / n) for non-negative values.
        ((2 * sum + n) / (2 * n)) as u8
    }
}
