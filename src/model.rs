use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OsError;

/// Hardware backend an operator is scanned on.
///
/// Declaration order is the report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Target {
    Host,
    X86,
    #[serde(rename = "ARM")]
    Arm,
    #[serde(rename = "OpenCL")]
    OpenCl,
    Metal,
}

impl Target {
    pub const ALL: [Self; 5] = [Self::Host, Self::X86, Self::Arm, Self::OpenCl, Self::Metal];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "Host",
            Self::X86 => "X86",
            Self::Arm => "ARM",
            Self::OpenCl => "OpenCL",
            Self::Metal => "Metal",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = OsError;

    /// Case-insensitive: `x86`, `X86`, `opencl` and `OpenCL` all resolve.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|target| target.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| OsError::UnknownTarget(raw.to_owned()))
    }
}

/// Outcome bucket an operator name is recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    AllTestOps,
    SuccessOps,
    OutDiffOps,
    NotSupportedOps,
}

impl Category {
    pub const ALL: [Self; 4] = [
        Self::AllTestOps,
        Self::SuccessOps,
        Self::OutDiffOps,
        Self::NotSupportedOps,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllTestOps => "all_test_ops",
            Self::SuccessOps => "success_ops",
            Self::OutDiffOps => "out_diff_ops",
            Self::NotSupportedOps => "not_supported_ops",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = OsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == trimmed)
            .ok_or_else(|| OsError::UnknownCategory(raw.to_owned()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Precision {
    Fp32,
    Fp16,
    Int32,
    Int64,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataLayout {
    #[serde(rename = "NCHW")]
    Nchw,
    ImageDefault,
    ImageFolder,
}

/// Element type of a generated input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F16,
    F32,
    I32,
    I64,
}

impl DType {
    /// Predictor precision that executes this element type natively.
    #[must_use]
    pub const fn native_precision(self) -> Precision {
        match self {
            Self::F16 => Precision::Fp16,
            Self::F32 => Precision::Fp32,
            Self::I32 => Precision::Int32,
            Self::I64 => Precision::Int64,
        }
    }
}

/// A (target, precision, layout) triple a predictor can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Place {
    pub target: Target,
    pub precision: Precision,
    pub layout: DataLayout,
}

impl Place {
    #[must_use]
    pub const fn new(target: Target, precision: Precision, layout: DataLayout) -> Self {
        Self {
            target,
            precision,
            layout,
        }
    }
}
