//! 累计冷冻时长.
//!
//! 每个病例在结构标注网格上维护一张 (或每个边距一张) 标量图, 每个时间点加上
//! `indicator(消融) * dt`, 病例结束时写出.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::consts::label::{ABLATED, BACKGROUND, MASK_FOREGROUND};
use crate::data::morph::apply_margin;
use crate::data::resample::{resample, Interpolation};
use crate::data::transform::RigidTransform;
use crate::{Error, Geometry, GridAttr, LabelVolume, Result, ScalarVolume};

/// 由时间序列求相邻时间差. 第一个时间点为 0, 之后为 `t[i] - t[i - 1]`.
pub fn elapsed_deltas(times: &[f64]) -> Vec<f64> {
    let mut ans = Vec::with_capacity(times.len());
    let mut prev = None;
    for &t in times {
        ans.push(prev.map_or(0.0, |p| t - p));
        prev = Some(t);
    }
    ans
}

/// 冷冻时长图.
#[derive(Debug, Clone)]
pub struct DurationMap {
    margin: f64,
    volume: ScalarVolume,
}

impl DurationMap {
    /// 在参考网格 `reference` 上创建全零时长图. `margin` 为该图对应的边距 (毫米).
    #[inline]
    pub fn zeros(reference: &Geometry, margin: f64) -> Self {
        Self {
            margin,
            volume: ScalarVolume::zeros(reference),
        }
    }

    /// 对应的边距.
    #[inline]
    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// 时长数据.
    #[inline]
    pub fn volume(&self) -> &ScalarVolume {
        &self.volume
    }

    /// `D += indicator(label == 1) * dt`.
    ///
    /// `ablation` 必须与时长图网格兼容, 否则返回 `Err` (调用方应先重采样).
    /// `dt` 不能为负.
    pub fn accumulate(&mut self, ablation: &LabelVolume, dt: f64) -> Result<()> {
        if !ablation.is_grid_compatible(&self.volume) {
            return Err(Error::GridMismatch("消融区标注与冷冻时长图网格不兼容"));
        }
        if !(dt >= 0.0 && dt.is_finite()) {
            return Err(Error::InvalidOptions(format!("时间差 {dt} 无效")));
        }
        if dt == 0.0 {
            return Ok(());
        }
        let dt = dt as f32;
        ndarray::Zip::from(self.volume.data_mut())
            .and(ablation.data())
            .for_each(|d, &p| {
                if p == ABLATED {
                    *d += dt;
                }
            });
        Ok(())
    }

    /// 阈值化, 见 [`threshold_duration`].
    #[inline]
    pub fn threshold(&self, min: f64, max: f64) -> LabelVolume {
        threshold_duration(&self.volume, min, max)
    }

    /// 写出为 NIfTI 文件.
    #[inline]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.volume.save(path)
    }
}

/// 选出冷冻时长位于 `[min, max]` 的体素, 返回二值标签. 不限上界时 `max` 取 `f64::INFINITY`.
pub fn threshold_duration(duration: &ScalarVolume, min: f64, max: f64) -> LabelVolume {
    duration.map(|&d| {
        let d = d as f64;
        if d >= min && d <= max {
            MASK_FOREGROUND
        } else {
            BACKGROUND
        }
    })
}

/// 多个边距下的冷冻时长图.
#[derive(Debug, Clone)]
pub struct DurationTracker {
    maps: Vec<DurationMap>,
}

impl DurationTracker {
    /// 在参考网格上为每个边距创建一张全零时长图.
    ///
    /// `-0` 视为 `0`; 重复的边距只保留第一个, 因此每个边距对应唯一的文件名.
    pub fn new(reference: &Geometry, margins: &[f64]) -> Self {
        let maps: Vec<DurationMap> = margins
            .iter()
            .map(|&m| m + 0.0)
            .unique_by(|&m| OrderedFloat(m))
            .map(|m| DurationMap::zeros(reference, m))
            .collect();
        if maps.len() < margins.len() {
            log::debug!("duplicate duration margins dropped: {margins:?}");
        }
        Self { maps }
    }

    /// 所有时长图.
    #[inline]
    pub fn maps(&self) -> &[DurationMap] {
        &self.maps
    }

    /// 累加一个时间点.
    ///
    /// 对每个边距: 在消融区原生网格上按边距调整, 再以 `to_reference`
    /// (消融空间 -> 参考空间) 最近邻重采样到参考网格, 然后累加 `dt`.
    pub fn accumulate(
        &mut self,
        ablation: &LabelVolume,
        to_reference: &RigidTransform,
        dt: f64,
    ) -> Result<()> {
        for map in self.maps.iter_mut() {
            let adjusted = apply_margin(ablation, map.margin);
            let on_reference = resample(
                &adjusted,
                map.volume.geometry(),
                to_reference,
                Interpolation::NearestNeighbor,
                BACKGROUND,
            );
            map.accumulate(&on_reference, dt)?;
        }
        Ok(())
    }

    /// 时长图文件名: `<stem>-m<margin>.nii.gz`.
    pub fn file_name(stem: &str, margin: f64) -> String {
        format!("{stem}-m{margin}.nii.gz")
    }

    /// 把每个边距的时长图写到目录 `dir` 下, 返回写出的文件路径. 目录不存在时会创建.
    pub fn save_all<P: AsRef<Path>>(&self, dir: P, stem: &str) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut ans = Vec::with_capacity(self.maps.len());
        for map in &self.maps {
            let path = dir.join(Self::file_name(stem, map.margin));
            map.save(&path)?;
            log::info!("duration map written to {}", path.display());
            ans.push(path);
        }
        Ok(ans)
    }
}
