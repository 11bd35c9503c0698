//! 评估引擎: 结构体积, 消融体积, 受累体积与最小距离.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consts::label::ABLATED;
use crate::data::distance::signed_distance_map;
use crate::data::morph::apply_margin;
use crate::data::resample::{resample, Interpolation};
use crate::data::stats::LabelStatistics;
use crate::data::transform::RigidTransform;
use crate::{AnatomyTable, Error, GridAttr, LabelVolume, Result};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        /// 消融体素个数.
        #[inline]
        fn count_ablated(ablation: &LabelVolume) -> usize {
            ablation.par_count(ABLATED)
        }
    } else {
        /// 消融体素个数.
        #[inline]
        fn count_ablated(ablation: &LabelVolume) -> usize {
            ablation.count(ABLATED)
        }
    }
}

/// 评估参数.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationOptions {
    /// 消融区边距, 以毫米为单位. 正值扩张, 负值腐蚀.
    pub margin: f64,
    /// 是否计算最小距离.
    pub compute_min_distance: bool,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            margin: 0.0,
            compute_min_distance: true,
        }
    }
}

impl EvaluationOptions {
    /// 检查参数是否合法.
    pub fn validate(&self) -> Result<()> {
        if !self.margin.is_finite() {
            return Err(Error::InvalidOptions(format!(
                "margin 必须为有限值, 实际为 {}",
                self.margin
            )));
        }
        Ok(())
    }
}

/// 评估指标.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Metric {
    /// 结构体积 (cc).
    Structure(String),
    /// 消融区体积 (cc).
    AblationVolume,
    /// 结构中被消融的体积 (cc).
    Involved(String),
    /// 结构到消融区边界的最小带符号距离 (mm).
    MinDist(String),
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structure(name) => write!(f, "Structure.{name}"),
            Self::AblationVolume => f.write_str("AblationVolume"),
            Self::Involved(name) => write!(f, "Involved.{name}"),
            Self::MinDist(name) => write!(f, "MinDist.{name}"),
        }
    }
}

/// 一次评估的结果: 按插入顺序保存的 `指标 -> 数值` 映射.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationResult {
    entries: Vec<(Metric, f64)>,
}

impl EvaluationResult {
    #[inline]
    fn push(&mut self, metric: Metric, value: f64) {
        self.entries.push((metric, value));
    }

    /// 按插入顺序迭代.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&Metric, f64)> + '_ {
        self.entries.iter().map(|(m, v)| (m, *v))
    }

    /// 指标个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 获取指标值.
    pub fn get(&self, metric: &Metric) -> Option<f64> {
        self.entries
            .iter()
            .find_map(|(m, v)| (m == metric).then_some(*v))
    }

    /// 按显示名 (如 `"Structure.TG"`) 获取指标值.
    pub fn get_by_name(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find_map(|(m, v)| (m.to_string() == name).then_some(*v))
    }

    /// 结构 `name` 的体积.
    #[inline]
    pub fn structure(&self, name: &str) -> Option<f64> {
        self.get(&Metric::Structure(name.to_owned()))
    }

    /// 结构 `name` 的受累体积.
    #[inline]
    pub fn involved(&self, name: &str) -> Option<f64> {
        self.get(&Metric::Involved(name.to_owned()))
    }

    /// 消融区体积.
    #[inline]
    pub fn ablation_volume(&self) -> Option<f64> {
        self.get(&Metric::AblationVolume)
    }

    /// 结构 `name` 的最小距离. 结构不存在或未计算时为 `None`.
    #[inline]
    pub fn min_dist(&self, name: &str) -> Option<f64> {
        self.get(&Metric::MinDist(name.to_owned()))
    }

    /// 结构 `name` 的最小距离, 缺失时为 NaN.
    #[inline]
    pub fn min_dist_or_nan(&self, name: &str) -> f64 {
        self.min_dist(name).unwrap_or(f64::NAN)
    }
}

/// 评估引擎.
#[derive(Debug, Clone)]
pub struct Evaluator {
    anatomy: AnatomyTable,
    options: EvaluationOptions,
}

impl Evaluator {
    /// 创建评估引擎. 参数不合法时返回 `Err`.
    pub fn new(anatomy: AnatomyTable, options: EvaluationOptions) -> Result<Self> {
        anatomy.validate()?;
        options.validate()?;
        Ok(Self { anatomy, options })
    }

    /// 解剖结构表.
    #[inline]
    pub fn anatomy(&self) -> &AnatomyTable {
        &self.anatomy
    }

    /// 评估参数.
    #[inline]
    pub fn options(&self) -> &EvaluationOptions {
        &self.options
    }

    /// 评估结构标注 `structure` 与消融区标注 `ablation`.
    ///
    /// 1. 若两者网格不兼容, 将 `structure` 以最近邻重采样到 `ablation` 网格;
    /// 2. 计算各结构体积;
    /// 3. 边距非零时按边距调整消融区;
    /// 4. 计算消融区 (标签 1) 体积;
    /// 5. 将消融区外的结构体素清零, 计算各结构受累体积;
    /// 6. (可选) 在调整后消融区的带符号距离图上计算各结构的最小距离.
    ///    不存在的结构不输出 `MinDist`.
    pub fn evaluate(&self, structure: &LabelVolume, ablation: &LabelVolume) -> EvaluationResult {
        let resampled;
        let structure = if structure.is_grid_compatible(ablation) {
            structure
        } else {
            log::debug!("resampling structure label onto the ablation grid");
            resampled = resample(
                structure,
                ablation.geometry(),
                &RigidTransform::identity(),
                Interpolation::NearestNeighbor,
                0,
            );
            &resampled
        };

        let voxel_cc = ablation.voxel_cc();
        let mut result = EvaluationResult::default();

        let structure_counts = LabelStatistics::counts(structure);
        for (label, name) in self.anatomy.iter() {
            let v = structure_counts.count(label) as f64 * voxel_cc;
            result.push(Metric::Structure(name.to_owned()), v);
        }

        let ablation = apply_margin(ablation, self.options.margin);
        result.push(
            Metric::AblationVolume,
            count_ablated(&ablation) as f64 * voxel_cc,
        );

        // 两者此时网格兼容, 不会失败.
        let involved = match structure.mask_by(&ablation) {
            Ok(v) => LabelStatistics::counts(&v),
            Err(e) => {
                log::error!("{e}");
                LabelStatistics::default()
            }
        };
        for (label, name) in self.anatomy.iter() {
            let v = involved.count(label) as f64 * voxel_cc;
            result.push(Metric::Involved(name.to_owned()), v);
        }

        if self.options.compute_min_distance {
            let sd = signed_distance_map(&ablation, ABLATED, true);
            match LabelStatistics::compute(&sd, structure) {
                Ok(stats) => {
                    for (label, name) in self.anatomy.iter() {
                        if let Some(d) = stats.minimum(label) {
                            result.push(Metric::MinDist(name.to_owned()), d);
                        }
                    }
                }
                Err(e) => log::error!("{e}"),
            }
        }
        result
    }
}
