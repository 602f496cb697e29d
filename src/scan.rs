//! Input space and backend validity rules for scanning `elementwise_add`.
//!
//! The generative runner itself lives in the caller's test; this module
//! supplies the strategy that draws legal cases, the predicate that rejects
//! case/predictor combinations a backend cannot run, and the bridge that
//! records a case outcome into the stats file.

use proptest::prelude::*;
use serde::{Deserialize, Serialize};

use crate::broadcast::{broadcast_output_shape, is_broadcastable, normalize_axis};
use crate::error::OsResult;
use crate::model::{Category, DType, DataLayout, Place, Precision, Target};
use crate::stats::StatsStore;

pub const OP_TYPE: &str = "elementwise_add";
pub const ATOL: f64 = 1e-5;
pub const RTOL: f64 = 1e-5;
pub const MAX_EXAMPLES: u32 = 300;

const MAX_RANK: usize = 4;
const MAX_DIM: i64 = 20;
const MIN_AXIS: i64 = -1;
const MAX_AXIS: i64 = 4;

/// One predictor configuration: the preferred place first, then fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub places: Vec<Place>,
    pub threads: usize,
}

impl PredictorConfig {
    #[must_use]
    pub fn single(place: Place, threads: usize) -> Self {
        Self {
            places: vec![place],
            threads,
        }
    }

    #[must_use]
    pub fn target(&self) -> Target {
        self.places.first().map_or(Target::Host, |place| place.target)
    }

    #[must_use]
    pub fn precision(&self) -> Precision {
        self.places
            .first()
            .map_or(Precision::Any, |place| place.precision)
    }
}

/// Every predictor configuration the scan runs against.
#[must_use]
pub fn enabled_predictor_configs() -> Vec<PredictorConfig> {
    let mut configs = Vec::new();

    for threads in [1, 4] {
        configs.push(PredictorConfig::single(
            Place::new(Target::X86, Precision::Fp32, DataLayout::Nchw),
            threads,
        ));
    }

    for precision in [Precision::Fp32, Precision::Int32, Precision::Int64] {
        for threads in [1, 4] {
            configs.push(PredictorConfig::single(
                Place::new(Target::Arm, precision, DataLayout::Nchw),
                threads,
            ));
        }
    }

    configs.push(PredictorConfig {
        places: vec![
            Place::new(Target::OpenCl, Precision::Fp16, DataLayout::ImageDefault),
            Place::new(Target::OpenCl, Precision::Fp16, DataLayout::ImageFolder),
            Place::new(Target::OpenCl, Precision::Fp32, DataLayout::Nchw),
            Place::new(Target::OpenCl, Precision::Any, DataLayout::ImageDefault),
            Place::new(Target::OpenCl, Precision::Any, DataLayout::ImageFolder),
            Place::new(Target::OpenCl, Precision::Any, DataLayout::Nchw),
            Place::new(Target::Host, Precision::Fp32, DataLayout::Nchw),
        ],
        threads: 1,
    });

    configs
}

/// Predictor configs, operator names expected in the optimized program, and
/// `(atol, rtol)`.
#[must_use]
pub fn predictor_setup() -> (Vec<PredictorConfig>, Vec<&'static str>, (f64, f64)) {
    (enabled_predictor_configs(), vec![OP_TYPE], (ATOL, RTOL))
}

/// Input element types drawn when scanning on `target`.
#[must_use]
pub const fn input_dtypes(target: Target) -> &'static [DType] {
    match target {
        Target::X86 | Target::Arm => &[DType::F32, DType::I32, DType::I64],
        Target::OpenCl | Target::Metal | Target::Host => &[DType::F32],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementwiseAddCase {
    pub x_shape: Vec<i64>,
    pub y_shape: Vec<i64>,
    /// Already normalized: never negative.
    pub axis: i64,
    pub dtype: DType,
}

impl ElementwiseAddCase {
    #[must_use]
    pub fn output_shape(&self) -> Option<Vec<i64>> {
        broadcast_output_shape(&self.x_shape, &self.y_shape, self.axis)
    }
}

fn shape_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1..=MAX_DIM, 1..=MAX_RANK)
}

/// Draws `(x_shape, y_shape, axis)` uniformly and keeps only broadcastable
/// combinations, then normalizes the axis and picks a dtype for `target`.
pub fn case_strategy(target: Target) -> impl Strategy<Value = ElementwiseAddCase> {
    (shape_strategy(), shape_strategy(), MIN_AXIS..=MAX_AXIS)
        .prop_filter("x and y must broadcast along axis", |(x, y, axis)| {
            is_broadcastable(x, y, *axis)
        })
        .prop_flat_map(move |(x_shape, y_shape, axis)| {
            let axis = normalize_axis(x_shape.len(), y_shape.len(), axis);
            prop::sample::select(input_dtypes(target)).prop_map(move |dtype| ElementwiseAddCase {
                x_shape: x_shape.clone(),
                y_shape: y_shape.clone(),
                axis,
                dtype,
            })
        })
}

/// Whether `predictor` can run `case` at all.
#[must_use]
pub fn is_program_valid(case: &ElementwiseAddCase, predictor: &PredictorConfig) -> bool {
    if predictor.target() != Target::Arm {
        return true;
    }

    let precision = predictor.precision();
    let precision_matches = match precision {
        Precision::Fp32 | Precision::Fp16 | Precision::Int32 | Precision::Int64 => {
            case.dtype.native_precision() == precision
        }
        Precision::Any => true,
    };
    if !precision_matches {
        return false;
    }

    // TODO: drop once the ARM int64 kernel stops crashing on elementwise_add.
    case.dtype != DType::I64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    Success,
    OutputDiff,
    NotSupported,
}

impl CaseOutcome {
    #[must_use]
    pub const fn category(self) -> Category {
        match self {
            Self::Success => Category::SuccessOps,
            Self::OutputDiff => Category::OutDiffOps,
            Self::NotSupported => Category::NotSupportedOps,
        }
    }
}

/// Marks `op` as tested on `target`, then files it under `outcome`.
pub fn record_outcome(
    store: &StatsStore,
    target: Target,
    op: &str,
    outcome: CaseOutcome,
) -> OsResult<()> {
    store.record_all_test_op(target, op)?;
    store.record(outcome.category(), target, op)?;
    tracing::debug!(%target, op, ?outcome, "recorded scan outcome");
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn case(dtype: DType) -> ElementwiseAddCase {
        ElementwiseAddCase {
            x_shape: vec![2, 3, 4],
            y_shape: vec![3, 4],
            axis: 1,
            dtype,
        }
    }

    fn arm(precision: Precision) -> PredictorConfig {
        PredictorConfig::single(Place::new(Target::Arm, precision, DataLayout::Nchw), 1)
    }

    #[test]
    fn enabled_configs_cover_x86_arm_and_opencl() {
        let configs = enabled_predictor_configs();
        assert_eq!(configs.len(), 9);
        assert_eq!(configs.iter().filter(|c| c.target() == Target::X86).count(), 2);
        assert_eq!(configs.iter().filter(|c| c.target() == Target::Arm).count(), 6);

        let opencl = configs
            .iter()
            .find(|c| c.target() == Target::OpenCl)
            .expect("opencl config");
        assert_eq!(opencl.places.len(), 7);
        assert_eq!(opencl.precision(), Precision::Fp16);
        assert_eq!(
            opencl.places.last().map(|p| p.target),
            Some(Target::Host),
            "host is the last fallback"
        );
    }

    #[test]
    fn predictor_setup_names_op_and_tolerances() {
        let (configs, ops, (atol, rtol)) = predictor_setup();
        assert_eq!(configs, enabled_predictor_configs());
        assert_eq!(ops, vec!["elementwise_add"]);
        assert!((atol - 1e-5).abs() < f64::EPSILON);
        assert!((rtol - 1e-5).abs() < f64::EPSILON);
    }

    #[test]
    fn gpu_targets_only_scan_f32() {
        assert_eq!(input_dtypes(Target::OpenCl), &[DType::F32]);
        assert_eq!(input_dtypes(Target::Metal), &[DType::F32]);
        assert_eq!(input_dtypes(Target::X86).len(), 3);
        assert_eq!(input_dtypes(Target::Arm).len(), 3);
    }

    #[test]
    fn arm_requires_matching_precision() {
        assert!(is_program_valid(&case(DType::F32), &arm(Precision::Fp32)));
        assert!(is_program_valid(&case(DType::I32), &arm(Precision::Int32)));
        assert!(!is_program_valid(&case(DType::I32), &arm(Precision::Fp32)));
        assert!(!is_program_valid(&case(DType::F32), &arm(Precision::Int64)));
        assert!(!is_program_valid(&case(DType::F32), &arm(Precision::Fp16)));
        assert!(is_program_valid(&case(DType::F16), &arm(Precision::Fp16)));
    }

    #[test]
    fn arm_rejects_int64_even_with_int64_precision() {
        assert!(!is_program_valid(&case(DType::I64), &arm(Precision::Int64)));
        assert!(!is_program_valid(&case(DType::I64), &arm(Precision::Any)));
    }

    #[test]
    fn non_arm_targets_accept_any_dtype() {
        let x86 = PredictorConfig::single(
            Place::new(Target::X86, Precision::Fp32, DataLayout::Nchw),
            4,
        );
        for dtype in [DType::F32, DType::I32, DType::I64] {
            assert!(is_program_valid(&case(dtype), &x86));
        }
    }

    #[test]
    fn case_output_shape_follows_broadcast() {
        assert_eq!(case(DType::F32).output_shape(), Some(vec![2, 3, 4]));
    }

    #[test]
    fn outcomes_map_to_categories() {
        assert_eq!(CaseOutcome::Success.category(), Category::SuccessOps);
        assert_eq!(CaseOutcome::OutputDiff.category(), Category::OutDiffOps);
        assert_eq!(CaseOutcome::NotSupported.category(), Category::NotSupportedOps);
    }

    #[test]
    fn record_outcome_marks_op_as_tested() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StatsStore::new(dir.path().join("statics_data"));
        record_outcome(&store, Target::OpenCl, OP_TYPE, CaseOutcome::OutputDiff)
            .expect("record outcome");

        let summary = store.summarize().expect("summary");
        let opencl = summary.target(Target::OpenCl).expect("opencl summary");
        assert_eq!(opencl.test_count, 1);
        assert_eq!(opencl.out_diff, vec![OP_TYPE.to_owned()]);
        assert_eq!(opencl.success_count, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            max_local_rejects: 1_000_000,
            ..ProptestConfig::default()
        })]

        #[test]
        fn sampled_cases_are_broadcastable(case in case_strategy(Target::X86)) {
            prop_assert!(case.axis >= 0);
            prop_assert!(is_broadcastable(&case.x_shape, &case.y_shape, case.axis));
            prop_assert!(case.output_shape().is_some());
            prop_assert!(input_dtypes(Target::X86).contains(&case.dtype));
        }
    }
}
