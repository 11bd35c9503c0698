//! 刚体配准.
//!
//! 固定影像 `fixed` 与运动影像 `moving` 之间的 6 自由度刚体配准.
//! 度量为互信息, 优化器为正则步长梯度下降.
//!
//! 内部优化的是 "固定 -> 运动" 方向的变换 (拉取式重采样所需的方向);
//! 对外返回的 [`Registration::transform`] 是其逆, 即把运动空间的点映射到固定空间.

use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::consts::label::BACKGROUND;
use crate::data::resample::{resample, Interpolation};
use crate::data::transform::RigidTransform;
use crate::mask::build_mask;
use crate::{Error, GridAttr, LabelVolume, Result, ScalarVolume};

mod metric;
mod optimizer;

use metric::MutualInformation;
pub use optimizer::{
    OptimizerReport, Params, RegularStepGradientDescent, StopCondition, N_PARAMS,
};

/// 初始化方式: 在没有给定初始平移时, 如何对齐两个影像.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CenteringMode {
    /// 对齐几何中心.
    #[default]
    Geometry,
    /// 对齐强度质心.
    Moments,
}

/// 配准参数.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationOptions {
    /// 互信息直方图箱数.
    pub number_of_bins: usize,
    /// 随机采样比例, 位于 `(0, 1]`.
    pub sampling_percentage: f64,
    /// 初始平移 (固定 -> 运动方向, 毫米). 给定时不再做中心对齐.
    pub initial_offset: Option<[f64; 3]>,
    /// 初始步长.
    pub learning_rate: f64,
    /// 最小步长.
    pub min_step: f64,
    /// 最大迭代次数.
    pub max_iterations: usize,
    /// 松弛因子.
    pub relaxation_factor: f64,
    /// 梯度模长容差.
    pub gradient_tolerance: f64,
    /// 参数尺度 `[rx, ry, rz, tx, ty, tz]`.
    pub optimizer_scales: [f64; N_PARAMS],
    /// 随机采样种子.
    pub seed: u64,
    /// 初始化方式.
    pub centering: CenteringMode,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            number_of_bins: 50,
            sampling_percentage: 0.02,
            initial_offset: None,
            learning_rate: 0.2,
            min_step: 0.005,
            max_iterations: 1500,
            relaxation_factor: 0.5,
            gradient_tolerance: 1e-5,
            optimizer_scales: [1.0, 1.0, 1.0, 1e-3, 1e-3, 1e-3],
            seed: 0x5eed,
            centering: CenteringMode::Geometry,
        }
    }
}

impl RegistrationOptions {
    /// 检查参数是否合法.
    pub fn validate(&self) -> Result<()> {
        let bad = |s: &str| Err(Error::InvalidOptions(s.to_owned()));
        if self.number_of_bins < 2 {
            return bad("number_of_bins 不能小于 2");
        }
        if !(self.sampling_percentage > 0.0 && self.sampling_percentage <= 1.0) {
            return bad("sampling_percentage 必须位于 (0, 1]");
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return bad("learning_rate 必须为正");
        }
        if !(self.min_step.is_finite() && self.min_step > 0.0) {
            return bad("min_step 必须为正");
        }
        if !(self.relaxation_factor > 0.0 && self.relaxation_factor < 1.0) {
            return bad("relaxation_factor 必须位于 (0, 1)");
        }
        if !(self.gradient_tolerance >= 0.0) {
            return bad("gradient_tolerance 不能为负");
        }
        if !self
            .optimizer_scales
            .iter()
            .all(|s| s.is_finite() && *s > 0.0)
        {
            return bad("optimizer_scales 必须全部为正");
        }
        if let Some(offset) = self.initial_offset {
            if !offset.iter().all(|v| v.is_finite()) {
                return bad("initial_offset 必须为有限值");
            }
        }
        Ok(())
    }

    /// 基于本参数, 设置初始平移.
    #[inline]
    pub fn with_initial_offset(&self, offset: Option<[f64; 3]>) -> Self {
        Self {
            initial_offset: offset,
            ..self.clone()
        }
    }

    fn optimizer(&self) -> RegularStepGradientDescent {
        RegularStepGradientDescent {
            learning_rate: self.learning_rate,
            min_step: self.min_step,
            max_iterations: self.max_iterations,
            relaxation: self.relaxation_factor,
            gradient_tolerance: self.gradient_tolerance,
            scales: self.optimizer_scales,
        }
    }
}

/// 掩膜所在的影像空间.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskFrame {
    /// 掩膜约束固定影像中的采样点.
    Fixed,
    /// 采样点映射到运动影像后, 须落在掩膜之内.
    Moving,
}

/// 配准采样掩膜.
#[derive(Debug, Clone, Copy)]
pub struct SamplingMask<'a> {
    /// 二值掩膜, 非背景体素为前景.
    pub label: &'a LabelVolume,
    /// 掩膜所在的影像空间.
    pub frame: MaskFrame,
}

impl<'a> SamplingMask<'a> {
    /// 固定空间中的掩膜.
    #[inline]
    pub fn fixed(label: &'a LabelVolume) -> Self {
        Self {
            label,
            frame: MaskFrame::Fixed,
        }
    }

    /// 运动空间中的掩膜.
    #[inline]
    pub fn moving(label: &'a LabelVolume) -> Self {
        Self {
            label,
            frame: MaskFrame::Moving,
        }
    }
}

/// 把掩膜放到 `target` 网格上; 已兼容时原样借用.
fn mask_on<'a>(
    mask: &'a LabelVolume,
    target: &ScalarVolume,
    buf: &'a mut Option<LabelVolume>,
) -> &'a LabelVolume {
    if mask.is_grid_compatible(target) {
        return mask;
    }
    buf.insert(resample(
        mask,
        target.geometry(),
        &RigidTransform::identity(),
        Interpolation::NearestNeighbor,
        BACKGROUND,
    ))
}

/// 配准结果.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    /// 运动空间 -> 固定空间的刚体变换.
    pub transform: RigidTransform,
    /// 最终度量值 (互信息).
    pub metric: f64,
    /// 迭代次数.
    pub iterations: usize,
    /// 结束原因.
    pub stop: StopCondition,
}

impl Registration {
    /// 不做配准: 恒等变换.
    pub fn identity() -> Self {
        Self {
            transform: RigidTransform::identity(),
            metric: f64::NAN,
            iterations: 0,
            stop: StopCondition::NotRun,
        }
    }

    /// 变换平移量 (运动 -> 固定方向), 即输出表中的 `OFF_X/OFF_Y/OFF_Z`.
    #[inline]
    pub fn offset(&self) -> [f64; 3] {
        let t = self.transform.translation();
        [t.x, t.y, t.z]
    }
}

/// 计算影像强度质心. 强度总和为 0 时退化为几何中心.
fn centroid(volume: &ScalarVolume) -> Point3<f64> {
    let mut acc = Vector3::zeros();
    let mut total = 0.0;
    for (idx, &v) in volume.data().indexed_iter() {
        let v = v as f64;
        if v == 0.0 || !v.is_finite() {
            continue;
        }
        acc += volume.geometry().index_to_physical(idx).coords * v;
        total += v;
    }
    if total.abs() > f64::EPSILON {
        Point3::from(acc / total)
    } else {
        volume.geometry().center()
    }
}

/// 按固定影像的行优先顺序, 为每个体素抽取一个 `[0, 1)` 均匀随机数,
/// 选出 `r < p` 且位于掩膜内的体素.
///
/// 随机数序列与掩膜无关, 因此全覆盖的掩膜与不使用掩膜得到完全相同的采样.
fn sample_points(
    fixed: &ScalarVolume,
    mask: Option<&LabelVolume>,
    percentage: f64,
    seed: u64,
) -> Vec<crate::Idx3d> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ans = Vec::with_capacity((fixed.size() as f64 * percentage) as usize + 1);
    for (idx, _) in fixed.data().indexed_iter() {
        let r: f64 = rng.random();
        if r < percentage && mask.map_or(true, |m| m[idx] != BACKGROUND) {
            ans.push(idx);
        }
    }
    ans
}

/// 刚体配准.
///
/// 返回的变换把 `moving` 空间的点映射到 `fixed` 空间. 优化未收敛不是错误:
/// 返回最后的估计值, 并通过 [`Registration::stop`] 报告原因.
///
/// `mask` 按其 [`MaskFrame`] 约束采样: 固定空间的掩膜筛选固定影像中的采样点,
/// 运动空间的掩膜在每次求值时筛选映射后的点. 掩膜与所在影像网格不兼容时,
/// 先以最近邻重采样到该网格.
pub fn register(
    fixed: &ScalarVolume,
    moving: &ScalarVolume,
    options: &RegistrationOptions,
    mask: Option<SamplingMask<'_>>,
) -> Result<Registration> {
    options.validate()?;

    let mut fixed_buf = None;
    let mut moving_buf = None;
    let (fixed_mask, moving_mask) = match mask {
        None => (None, None),
        Some(SamplingMask {
            label,
            frame: MaskFrame::Fixed,
        }) => (Some(mask_on(label, fixed, &mut fixed_buf)), None),
        Some(SamplingMask {
            label,
            frame: MaskFrame::Moving,
        }) => (None, Some(mask_on(label, moving, &mut moving_buf))),
    };

    // 固定 -> 运动方向的初始变换.
    let (center, translation) = match (options.initial_offset, options.centering) {
        (Some(offset), _) => (fixed.geometry().center(), Vector3::from(offset)),
        (None, CenteringMode::Geometry) => {
            let c = fixed.geometry().center();
            (c, moving.geometry().center() - c)
        }
        (None, CenteringMode::Moments) => {
            let c = centroid(fixed);
            (c, centroid(moving) - c)
        }
    };
    let initial: Params = [0.0, 0.0, 0.0, translation.x, translation.y, translation.z];

    let points = sample_points(fixed, fixed_mask, options.sampling_percentage, options.seed);
    log::debug!(
        "registration: {} samples ({} voxels), initial translation {:?}",
        points.len(),
        fixed.size(),
        translation.as_slice()
    );

    let report = if points.is_empty() {
        OptimizerReport {
            position: initial,
            value: f64::NAN,
            iterations: 0,
            stop: StopCondition::InsufficientSamples,
        }
    } else {
        let metric = MutualInformation::new(
            fixed,
            moving,
            moving_mask,
            &points,
            options.number_of_bins,
            center,
        );
        options
            .optimizer()
            .maximize(initial, |p| metric.value_and_derivative(p))
    };

    if !report.stop.is_converged() {
        log::warn!(
            "registration did not converge: {} after {} iterations",
            report.stop,
            report.iterations
        );
    }

    let fixed_to_moving = RigidTransform::from_parameters(center, &report.position);
    Ok(Registration {
        transform: fixed_to_moving.inverse(),
        metric: report.value,
        iterations: report.iterations,
        stop: report.stop,
    })
}

/// 批处理中逐时间点的配准方式.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegistrationMode {
    /// 不配准, 使用恒等变换. 清单中的 `0`.
    NoRegistration,
    /// 无掩膜配准. 清单中的 `1`.
    Unmasked,
    /// 以结构标注生成的掩膜约束采样. 清单中的 `2`.
    Masked,
    /// 掩膜配准, 且以 `-offset` 作为初始平移. 清单中的 `3`.
    MaskedWithOffset([f64; 3]),
}

impl RegistrationMode {
    /// 由清单中的模式编号和可选平移量解码.
    ///
    /// 模式 `3` 必须带有平移量, 否则返回 `Err`. 其他模式忽略平移量.
    pub fn from_tag(tag: u64, offset: Option<[f64; 3]>) -> std::result::Result<Self, String> {
        match (tag, offset) {
            (0, _) => Ok(Self::NoRegistration),
            (1, _) => Ok(Self::Unmasked),
            (2, _) => Ok(Self::Masked),
            (3, Some(o)) => Ok(Self::MaskedWithOffset(o)),
            (3, None) => Err("模式 3 需要初始平移量 [ox, oy, oz]".to_owned()),
            (t, _) => Err(format!("未知的配准模式 {t}")),
        }
    }

    /// 清单中的模式编号.
    #[inline]
    pub fn tag(&self) -> u64 {
        match self {
            Self::NoRegistration => 0,
            Self::Unmasked => 1,
            Self::Masked => 2,
            Self::MaskedWithOffset(_) => 3,
        }
    }

    /// 是否使用掩膜?
    #[inline]
    pub fn is_masked(&self) -> bool {
        matches!(self, Self::Masked | Self::MaskedWithOffset(_))
    }
}

/// 按 `mode` 执行配准.
///
/// `structure` 为生成掩膜所用的解剖结构标注, 属于 `frame` 指定的那一侧影像;
/// 掩膜建立在该影像的网格上, 膨胀半径为 `mask_dilation` (体素).
pub fn register_with_mode(
    mode: RegistrationMode,
    fixed: &ScalarVolume,
    moving: &ScalarVolume,
    structure: &LabelVolume,
    frame: MaskFrame,
    options: &RegistrationOptions,
    mask_dilation: usize,
) -> Result<Registration> {
    let masked = |options: &RegistrationOptions| {
        let grid = match frame {
            MaskFrame::Fixed => fixed.geometry(),
            MaskFrame::Moving => moving.geometry(),
        };
        let label = build_mask(structure, grid, mask_dilation);
        register(fixed, moving, options, Some(SamplingMask { label: &label, frame }))
    };
    match mode {
        RegistrationMode::NoRegistration => Ok(Registration::identity()),
        RegistrationMode::Unmasked => register(fixed, moving, options, None),
        RegistrationMode::Masked => masked(options),
        RegistrationMode::MaskedWithOffset([ox, oy, oz]) => {
            masked(&options.with_initial_offset(Some([-ox, -oy, -oz])))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Geometry;
    use approx::assert_abs_diff_eq;

    /// 在 `center` 处有一个高斯亮斑的平滑影像.
    fn blob(geometry: &Geometry, center: [f64; 3], sigma: f64) -> ScalarVolume {
        let mut v = ScalarVolume::zeros(geometry);
        for ((z, y, x), p) in v.data_mut().indexed_iter_mut() {
            let d2 = (x as f64 - center[0]).powi(2)
                + (y as f64 - center[1]).powi(2)
                + (z as f64 - center[2]).powi(2);
            *p = (100.0 * (-d2 / (2.0 * sigma * sigma)).exp()) as f32;
        }
        v
    }

    fn fast_options() -> RegistrationOptions {
        RegistrationOptions {
            sampling_percentage: 0.5,
            number_of_bins: 24,
            learning_rate: 1.0,
            min_step: 0.01,
            max_iterations: 300,
            ..Default::default()
        }
    }

    #[test]
    fn test_options_validate() {
        assert!(RegistrationOptions::default().validate().is_ok());
        let bad = [
            RegistrationOptions {
                number_of_bins: 1,
                ..Default::default()
            },
            RegistrationOptions {
                sampling_percentage: 0.0,
                ..Default::default()
            },
            RegistrationOptions {
                sampling_percentage: 1.5,
                ..Default::default()
            },
            RegistrationOptions {
                learning_rate: -0.1,
                ..Default::default()
            },
            RegistrationOptions {
                optimizer_scales: [1.0, 1.0, 1.0, 0.0, 1.0, 1.0],
                ..Default::default()
            },
        ];
        for o in bad {
            assert!(matches!(o.validate(), Err(Error::InvalidOptions(_))), "{o:?}");
        }
    }

    #[test]
    fn test_mode_from_tag() {
        assert_eq!(
            RegistrationMode::from_tag(0, None),
            Ok(RegistrationMode::NoRegistration)
        );
        assert_eq!(
            RegistrationMode::from_tag(2, Some([1.0, 2.0, 3.0])),
            Ok(RegistrationMode::Masked)
        );
        assert_eq!(
            RegistrationMode::from_tag(3, Some([1.0, 2.0, 3.0])),
            Ok(RegistrationMode::MaskedWithOffset([1.0, 2.0, 3.0]))
        );
        assert!(RegistrationMode::from_tag(3, None).is_err());
        assert!(RegistrationMode::from_tag(4, None).is_err());
        assert_eq!(RegistrationMode::MaskedWithOffset([0.0; 3]).tag(), 3);
    }

    #[test]
    fn test_full_mask_equals_unmasked() {
        let g = Geometry::axis_aligned([16, 16, 16], [1.0; 3]);
        let fixed = blob(&g, [7.5, 7.5, 7.5], 3.0);
        let moving = blob(&g, [8.5, 7.0, 7.5], 3.0);
        let mask = LabelVolume::filled(&g, 1);
        let options = fast_options();

        let a = register(&fixed, &moving, &options, None).unwrap();
        for m in [SamplingMask::fixed(&mask), SamplingMask::moving(&mask)] {
            let b = register(&fixed, &moving, &options, Some(m)).unwrap();
            assert_eq!(a.transform, b.transform);
            assert_eq!(a.iterations, b.iterations);
            assert_eq!(a.stop, b.stop);
        }
    }

    #[test]
    fn test_recovers_translation() {
        let g = Geometry::axis_aligned([20, 20, 20], [1.0; 3]);
        let fixed = blob(&g, [9.5, 9.5, 9.5], 3.0);
        // 运动影像中的亮斑位于 +x 方向 1.5 mm 处.
        let moving = blob(&g, [11.0, 9.5, 9.5], 3.0);
        let options = RegistrationOptions {
            optimizer_scales: [1.0; N_PARAMS],
            ..fast_options()
        };
        let r = register(&fixed, &moving, &options, None).unwrap();
        // 运动 -> 固定: 约 -1.5 mm.
        let t = r.transform.apply(&Point3::new(11.0, 9.5, 9.5));
        assert_abs_diff_eq!(t.x, 9.5, epsilon = 0.5);
        assert_abs_diff_eq!(t.y, 9.5, epsilon = 0.5);
        assert_abs_diff_eq!(t.z, 9.5, epsilon = 0.5);
    }

    #[test]
    fn test_masked_with_offset_follows_moving_structure() {
        let g = Geometry::axis_aligned([28, 24, 24], [1.0; 3]);
        // 规划 (运动) 影像中的结构位于 x = 8, 术中 (固定) 影像中位于 x = 18.
        let plan = blob(&g, [8.0, 11.5, 11.5], 3.0);
        let intra = blob(&g, [18.0, 11.5, 11.5], 3.0);
        let mut structure = LabelVolume::zeros(&g);
        for ((z, y, x), p) in structure.data_mut().indexed_iter_mut() {
            let d2 = (x as f64 - 8.0).powi(2) + (y as f64 - 11.5).powi(2) + (z as f64 - 11.5).powi(2);
            if d2 <= 9.0 {
                *p = 1;
            }
        }
        let options = RegistrationOptions {
            optimizer_scales: [100.0, 100.0, 100.0, 1.0, 1.0, 1.0],
            ..fast_options()
        };

        // 偏移量差 1 mm.
        let r = register_with_mode(
            RegistrationMode::MaskedWithOffset([9.0, 0.0, 0.0]),
            &intra,
            &plan,
            &structure,
            MaskFrame::Moving,
            &options,
            3,
        )
        .unwrap();
        let target = r.transform.apply(&Point3::new(8.0, 11.5, 11.5));
        assert_abs_diff_eq!(target.x, 18.0, epsilon = 0.75);
        assert_abs_diff_eq!(target.y, 11.5, epsilon = 0.75);
        assert_abs_diff_eq!(target.z, 11.5, epsilon = 0.75);
    }

    #[test]
    fn test_moving_mask_on_other_grid_is_resampled() {
        let g = Geometry::axis_aligned([8, 8, 8], [1.0; 3]);
        let fixed = blob(&g, [3.5, 3.5, 3.5], 2.0);
        let coarse = Geometry::new([4, 4, 4], [0.0; 3], [2.0; 3], nalgebra::Matrix3::identity());
        let mask = LabelVolume::zeros(&coarse);
        let options = fast_options();
        // 全背景的运动掩膜: 没有任何有效采样点.
        let r = register(&fixed, &fixed, &options, Some(SamplingMask::moving(&mask))).unwrap();
        assert_eq!(r.stop, StopCondition::InsufficientSamples);
        assert!(r.transform.is_identity());
    }

    #[test]
    fn test_empty_mask_returns_initial() {
        let g = Geometry::axis_aligned([8, 8, 8], [1.0; 3]);
        let fixed = blob(&g, [3.5, 3.5, 3.5], 2.0);
        let mask = LabelVolume::zeros(&g);
        let options = fast_options().with_initial_offset(Some([1.0, 0.0, 0.0]));
        let r = register(&fixed, &fixed, &options, Some(SamplingMask::fixed(&mask))).unwrap();
        assert_eq!(r.stop, StopCondition::InsufficientSamples);
        // 固定 -> 运动为 +1, 返回的运动 -> 固定为 -1.
        assert_abs_diff_eq!(r.offset()[0], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_no_registration_mode() {
        let g = Geometry::axis_aligned([4, 4, 4], [1.0; 3]);
        let img = ScalarVolume::zeros(&g);
        let label = LabelVolume::zeros(&g);
        let r = register_with_mode(
            RegistrationMode::NoRegistration,
            &img,
            &img,
            &label,
            MaskFrame::Moving,
            &RegistrationOptions::default(),
            10,
        )
        .unwrap();
        assert!(r.transform.is_identity());
        assert_eq!(r.stop, StopCondition::NotRun);
    }
}
