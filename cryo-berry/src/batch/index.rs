//! 病例 -> 周期 -> 时间点 树.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

use super::manifest::{CaseId, ManifestRow};
use crate::duration::elapsed_deltas;
use crate::registration::RegistrationMode;

/// 一个术中时间点, 带有距同周期上一个时间点的时间差.
#[derive(Debug, Clone, PartialEq)]
pub struct Timepoint {
    /// 采集时间 (秒).
    pub time: f64,
    /// 距上一个时间点的时间差 (秒). 周期内第一个时间点为 0.
    pub dt: f64,
    /// 序列号.
    pub series: i64,
    /// 配准方式.
    pub mode: RegistrationMode,
    /// 消融区影像文件名.
    pub ablation_image: String,
    /// 消融区标注文件名.
    pub ablation_label: String,
}

/// 一个冷冻周期.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    /// 周期编号.
    pub id: u32,
    /// 按时间升序排列的时间点.
    pub timepoints: Vec<Timepoint>,
}

/// 一个病例.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseEntry {
    /// 病例编号.
    pub case: CaseId,
    /// 按编号升序排列的周期.
    pub cycles: Vec<Cycle>,
}

impl CaseEntry {
    /// 时间点总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.cycles.iter().map(|c| c.timepoints.len()).sum()
    }

    /// 是否没有时间点?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 由清单构建的病例树.
///
/// 病例保持在清单中首次出现的顺序; 周期按编号升序; 周期内时间点按时间升序 (稳定排序).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseIndex {
    cases: Vec<CaseEntry>,
}

impl CaseIndex {
    /// 构建病例树.
    pub fn build<I: IntoIterator<Item = ManifestRow>>(rows: I) -> Self {
        let mut order: Vec<CaseId> = Vec::new();
        let mut tree: BTreeMap<CaseId, BTreeMap<u32, Vec<ManifestRow>>> = BTreeMap::new();
        for row in rows {
            if !tree.contains_key(&row.case) {
                order.push(row.case.clone());
            }
            tree.entry(row.case.clone())
                .or_default()
                .entry(row.cycle)
                .or_default()
                .push(row);
        }

        let cases = order
            .into_iter()
            .filter_map(|case| {
                let cycles = tree.remove(&case)?;
                let cycles = cycles
                    .into_iter()
                    .map(|(id, mut rows)| {
                        rows.sort_by_key(|r| OrderedFloat(r.time));
                        let times: Vec<f64> = rows.iter().map(|r| r.time).collect();
                        let timepoints = rows
                            .into_iter()
                            .zip(elapsed_deltas(&times))
                            .map(|(r, dt)| Timepoint {
                                time: r.time,
                                dt,
                                series: r.series,
                                mode: r.mode,
                                ablation_image: r.ablation_image,
                                ablation_label: r.ablation_label,
                            })
                            .collect();
                        Cycle { id, timepoints }
                    })
                    .collect();
                Some(CaseEntry { case, cycles })
            })
            .collect();
        Self { cases }
    }

    /// 所有病例.
    #[inline]
    pub fn cases(&self) -> &[CaseEntry] {
        &self.cases
    }

    /// 病例个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// 是否没有病例?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}
