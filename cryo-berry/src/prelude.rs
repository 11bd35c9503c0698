//! 🧊欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::resample::{resample, Interpolation};
pub use crate::data::transform::RigidTransform;
pub use crate::data::{Geometry, GridAttr, LabelVolume, ScalarVolume, Volume};

pub use crate::consts::label::{ABLATED, BACKGROUND};
pub use crate::consts::MM_PER_CM;

pub use crate::config::{AnatomyTable, Config};
pub use crate::{Error, Result};

pub use crate::registration::{
    register, register_with_mode, MaskFrame, Registration, RegistrationMode, RegistrationOptions,
    SamplingMask,
};

pub use crate::evaluation::{EvaluationOptions, EvaluationResult, Evaluator, Metric};

pub use crate::duration::{DurationMap, DurationTracker};

pub use crate::batch::{layout::ExamLayout, manifest::Manifest, BatchRunner, RegisterRunner};

pub use crate::metrics::{summarize, MeasurementTable, SummaryColumns};

pub use crate::dataset::home_dataset_dir_with;
