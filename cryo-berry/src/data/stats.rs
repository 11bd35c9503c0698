//! 逐标签统计.

use std::collections::BTreeMap;

use super::{GridAttr, LabelVolume, ScalarVolume};
use crate::{Error, Result};

/// 单个标签的统计量.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelStat {
    /// 体素个数.
    pub count: usize,
    /// 最小值.
    pub min: f64,
    /// 最大值.
    pub max: f64,
    /// 总和.
    pub sum: f64,
}

impl LabelStat {
    /// 平均值.
    #[inline]
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    #[inline]
    fn push(&mut self, v: f64) {
        self.count += 1;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.sum += v;
    }
}

impl Default for LabelStat {
    fn default() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

/// 逐标签统计结果. 只包含至少出现一次的标签 (包括背景 `0`).
#[derive(Debug, Clone, Default)]
pub struct LabelStatistics {
    stats: BTreeMap<u16, LabelStat>,
}

impl LabelStatistics {
    /// 统计 `labels` 中每个标签对应的 `values` 体素值.
    ///
    /// 两者必须网格兼容, 否则返回 `Err`.
    pub fn compute(values: &ScalarVolume, labels: &LabelVolume) -> Result<Self> {
        if !values.is_grid_compatible(labels) {
            return Err(Error::GridMismatch("统计值与标签网格不兼容"));
        }
        let mut stats = BTreeMap::<u16, LabelStat>::new();
        for (&v, &l) in values.data.iter().zip(labels.data.iter()) {
            stats.entry(l).or_default().push(v as f64);
        }
        Ok(Self { stats })
    }

    /// 只统计每个标签的体素个数.
    pub fn counts(labels: &LabelVolume) -> Self {
        let stats = labels
            .label_counts()
            .into_iter()
            .map(|(l, count)| {
                let stat = LabelStat {
                    count,
                    min: f64::NAN,
                    max: f64::NAN,
                    sum: f64::NAN,
                };
                (l, stat)
            })
            .collect();
        Self { stats }
    }

    /// 标签 `label` 的统计量.
    #[inline]
    pub fn get(&self, label: u16) -> Option<&LabelStat> {
        self.stats.get(&label)
    }

    /// 标签 `label` 的体素个数. 未出现时为 0.
    #[inline]
    pub fn count(&self, label: u16) -> usize {
        self.stats.get(&label).map_or(0, |s| s.count)
    }

    /// 标签 `label` 的最小值.
    #[inline]
    pub fn minimum(&self, label: u16) -> Option<f64> {
        self.stats.get(&label).map(|s| s.min)
    }

    /// 标签 `label` 的最大值.
    #[inline]
    pub fn maximum(&self, label: u16) -> Option<f64> {
        self.stats.get(&label).map(|s| s.max)
    }

    /// 标签 `label` 的平均值.
    #[inline]
    pub fn mean(&self, label: u16) -> Option<f64> {
        self.stats.get(&label).map(LabelStat::mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Geometry;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_label_statistics() {
        let g = Geometry::axis_aligned([3, 1, 1], [1.0; 3]);
        let mut labels = LabelVolume::zeros(&g);
        labels[(0, 0, 1)] = 2;
        labels[(0, 0, 2)] = 2;
        let mut values = ScalarVolume::zeros(&g);
        values[(0, 0, 0)] = 7.0;
        values[(0, 0, 1)] = -1.0;
        values[(0, 0, 2)] = 3.0;

        let s = LabelStatistics::compute(&values, &labels).unwrap();
        assert_eq!(s.count(0), 1);
        assert_eq!(s.count(2), 2);
        assert_eq!(s.count(5), 0);
        assert_abs_diff_eq!(s.minimum(2).unwrap(), -1.0);
        assert_abs_diff_eq!(s.maximum(2).unwrap(), 3.0);
        assert_abs_diff_eq!(s.mean(2).unwrap(), 1.0);
        assert!(s.minimum(1).is_none());
    }

    #[test]
    fn test_grid_mismatch() {
        let labels = LabelVolume::zeros(&Geometry::axis_aligned([3, 1, 1], [1.0; 3]));
        let values = ScalarVolume::zeros(&Geometry::axis_aligned([3, 1, 1], [2.0; 3]));
        assert!(LabelStatistics::compute(&values, &labels).is_err());
        assert_eq!(LabelStatistics::counts(&labels).count(0), 3);
    }
}
