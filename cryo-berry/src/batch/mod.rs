//! 批处理.
//!
//! 按 病例 -> 周期 -> 时间点 三层嵌套依次处理清单中的所有术中时间点:
//! 读入体数据, 配准, 把结构标注重采样到术中网格, 评估, 累计冷冻时长, 写出一行 CSV.
//! 每个病例结束时写出冷冻时长图.
//!
//! 病例内部严格串行; 不同病例之间互不依赖, 可以并行处理 (输出仍按病例顺序).

use std::io::Write;

use crate::config::Config;
use crate::consts::label::BACKGROUND;
use crate::data::resample::{resample, Interpolation};
use crate::duration::DurationTracker;
use crate::evaluation::Evaluator;
use crate::registration::{register_with_mode, MaskFrame};
use crate::{GridAttr, LabelVolume, Result, ScalarVolume};

pub mod index;
pub mod layout;
pub mod manifest;
pub mod report;

pub use index::{CaseEntry, CaseIndex, Cycle, Timepoint};
pub use layout::ExamLayout;
pub use manifest::{CaseId, Manifest, ManifestRow, PlanImages};
pub use report::RowWriter;

/// 冷冻时长图文件名前缀.
pub const DURATION_STEM: &str = "duration";

/// 批处理统计.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// 完整处理的病例数.
    pub cases_done: usize,
    /// 因缺少规划数据而跳过的病例数.
    pub cases_skipped: usize,
    /// 处理中途失败的病例数.
    pub cases_failed: usize,
    /// 写出的数据行数 (不含表头).
    pub rows: usize,
}

/// 单个病例的处理结果.
enum CaseOutcome {
    Done,
    Skipped,
    Failed,
}

/// 每个病例的处理流程. 评估流程与配准-重采样流程各实现一次.
trait CaseRoutine: Sync {
    /// 输出表头.
    fn header(&self) -> Vec<String>;

    /// 处理一个病例, 每得到一行就调用 `emit`.
    fn process(
        &self,
        entry: &CaseEntry,
        plan: &PlanImages,
        emit: &mut dyn FnMut(Vec<String>) -> Result<()>,
    ) -> Result<()>;
}

/// 处理一个病例并统计结果. 缺少规划数据时跳过; 出错时记录日志并放弃该病例.
fn run_case<R: CaseRoutine + ?Sized>(
    routine: &R,
    manifest: &Manifest,
    entry: &CaseEntry,
    emit: &mut dyn FnMut(Vec<String>) -> Result<()>,
) -> CaseOutcome {
    let Some(plan) = manifest.plan.get(&entry.case) else {
        log::debug!("case {} has no planning images, skipped", entry.case);
        return CaseOutcome::Skipped;
    };
    log::info!(
        "processing case {} ({} timepoints)",
        entry.case,
        entry.len()
    );
    match routine.process(entry, plan, emit) {
        Ok(()) => CaseOutcome::Done,
        Err(e) => {
            log::error!("case {} abandoned: {e}", entry.case);
            CaseOutcome::Failed
        }
    }
}

/// 依次处理所有病例, 每行写出后立即刷新.
fn run_sequential<R: CaseRoutine + ?Sized, W: Write>(
    routine: &R,
    manifest: &Manifest,
    out: W,
) -> Result<BatchSummary> {
    let index = CaseIndex::build(manifest.rows.iter().cloned());
    let mut writer = RowWriter::new(out);
    writer.write_row(routine.header())?;

    let mut summary = BatchSummary::default();
    for entry in index.cases() {
        // 写出失败 (例如管道关闭) 对整个批处理是致命的.
        let mut sink_error = None;
        let outcome = run_case(routine, manifest, entry, &mut |row| {
            writer.write_row(row).map_err(|e| {
                let abort = std::io::Error::other(e.to_string());
                sink_error = Some(e);
                crate::Error::from(abort)
            })
        });
        if let Some(e) = sink_error {
            return Err(e);
        }
        summary.record(outcome);
    }
    summary.rows = writer.rows() - 1;
    Ok(summary)
}

/// 在 `jobs` 个线程上并行处理病例. 每个病例的行先缓存, 全部完成后按病例顺序写出.
#[cfg(feature = "rayon")]
fn run_parallel<R: CaseRoutine + ?Sized, W: Write>(
    routine: &R,
    manifest: &Manifest,
    out: W,
    jobs: usize,
) -> Result<BatchSummary> {
    use rayon::prelude::*;

    let index = CaseIndex::build(manifest.rows.iter().cloned());
    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
    let results: Vec<(CaseOutcome, Vec<Vec<String>>)> = pool.install(|| {
        index
            .cases()
            .par_iter()
            .map(|entry| {
                let mut rows = Vec::new();
                let outcome = run_case(routine, manifest, entry, &mut |row| {
                    rows.push(row);
                    Ok(())
                });
                (outcome, rows)
            })
            .collect()
    });

    let mut writer = RowWriter::new(out);
    writer.write_row(routine.header())?;
    let mut summary = BatchSummary::default();
    for (outcome, rows) in results {
        for row in rows {
            writer.write_row(row)?;
        }
        summary.record(outcome);
    }
    summary.rows = writer.rows() - 1;
    Ok(summary)
}

impl BatchSummary {
    fn record(&mut self, outcome: CaseOutcome) {
        match outcome {
            CaseOutcome::Done => self.cases_done += 1,
            CaseOutcome::Skipped => self.cases_skipped += 1,
            CaseOutcome::Failed => self.cases_failed += 1,
        }
    }
}

/// 按 `jobs` 选择串行或并行.
fn dispatch<R: CaseRoutine, W: Write>(
    routine: &R,
    manifest: &Manifest,
    out: W,
    jobs: usize,
) -> Result<BatchSummary> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            if jobs > 1 {
                return run_parallel(routine, manifest, out, jobs);
            }
        } else {
            if jobs > 1 {
                log::warn!("built without `rayon`, falling back to sequential processing");
            }
        }
    }
    run_sequential(routine, manifest, out)
}

/// 评估流程: 逐时间点配准, 评估, 累计冷冻时长.
///
/// 配准时固定影像为术中影像, 运动影像为规划参考影像, 掩膜建立在规划网格上,
/// 约束映射到运动空间的采样点.
pub struct BatchRunner<'a> {
    config: &'a Config,
    layout: ExamLayout,
    evaluator: Evaluator,
}

impl<'a> BatchRunner<'a> {
    /// 创建评估流程. 配置不合法时返回 `Err`.
    pub fn new(config: &'a Config, layout: ExamLayout) -> Result<Self> {
        config.validate()?;
        let evaluator = Evaluator::new(config.anatomy.clone(), config.evaluation.clone())?;
        Ok(Self {
            config,
            layout,
            evaluator,
        })
    }

    /// 处理清单中的所有病例, 把 CSV 写到 `out`. `jobs > 1` 时并行处理病例.
    pub fn run<W: Write>(&self, manifest: &Manifest, out: W, jobs: usize) -> Result<BatchSummary> {
        dispatch(self, manifest, out, jobs)
    }
}

impl CaseRoutine for BatchRunner<'_> {
    fn header(&self) -> Vec<String> {
        report::evaluation_header(
            &self.config.anatomy,
            self.config.evaluation.compute_min_distance,
        )
    }

    fn process(
        &self,
        entry: &CaseEntry,
        plan: &PlanImages,
        emit: &mut dyn FnMut(Vec<String>) -> Result<()>,
    ) -> Result<()> {
        let case = &entry.case;
        let plan_image = ScalarVolume::open(self.layout.plan_image(case, &plan.reference)?)?;
        let structure = LabelVolume::open(self.layout.structure_label(case, &plan.label)?)?;
        let batch = &self.config.batch;
        let mut tracker = DurationTracker::new(structure.geometry(), &batch.duration_margins);

        for cycle in &entry.cycles {
            for tp in &cycle.timepoints {
                log::debug!(
                    "case {case} cycle {} time {} series {} ({:?}, dt = {})",
                    cycle.id,
                    tp.time,
                    tp.series,
                    tp.mode,
                    tp.dt
                );
                let ablation_image =
                    ScalarVolume::open(self.layout.ablation_image(case, &tp.ablation_image)?)?;
                let ablation_label =
                    LabelVolume::open(self.layout.ablation_label(case, &tp.ablation_label)?)?;

                // 规划空间 -> 术中空间.
                let registration = register_with_mode(
                    tp.mode,
                    &ablation_image,
                    &plan_image,
                    &structure,
                    MaskFrame::Moving,
                    &self.config.registration,
                    batch.mask_dilation,
                )?;
                let structure_here = resample(
                    &structure,
                    ablation_label.geometry(),
                    &registration.transform,
                    Interpolation::NearestNeighbor,
                    BACKGROUND,
                );
                let result = self.evaluator.evaluate(&structure_here, &ablation_label);
                tracker.accumulate(&ablation_label, &registration.transform.inverse(), tp.dt)?;

                emit(report::evaluation_row(
                    case,
                    cycle.id,
                    tp,
                    &self.config.anatomy,
                    &result,
                    self.config.evaluation.compute_min_distance,
                    &registration,
                ))?;
            }
        }

        if batch.write_duration_maps && !tracker.maps().is_empty() {
            tracker.save_all(self.layout.duration_dir(case)?, DURATION_STEM)?;
        }
        Ok(())
    }
}

/// 配准-重采样流程: 把术中影像与消融区标注配准并重采样到规划网格上, 写出结果文件.
///
/// 配准时固定影像为规划参考影像, 运动影像为术中影像, 掩膜建立在规划网格上.
pub struct RegisterRunner<'a> {
    config: &'a Config,
    layout: ExamLayout,
}

impl<'a> RegisterRunner<'a> {
    /// 创建配准-重采样流程. 配置不合法时返回 `Err`.
    pub fn new(config: &'a Config, layout: ExamLayout) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, layout })
    }

    /// 处理清单中的所有病例, 把 CSV 写到 `out`. `jobs > 1` 时并行处理病例.
    pub fn run<W: Write>(&self, manifest: &Manifest, out: W, jobs: usize) -> Result<BatchSummary> {
        dispatch(self, manifest, out, jobs)
    }
}

/// 确保 `path` 的父目录存在.
fn ensure_parent(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

impl CaseRoutine for RegisterRunner<'_> {
    fn header(&self) -> Vec<String> {
        report::register_header()
    }

    fn process(
        &self,
        entry: &CaseEntry,
        plan: &PlanImages,
        emit: &mut dyn FnMut(Vec<String>) -> Result<()>,
    ) -> Result<()> {
        let case = &entry.case;
        let plan_image = ScalarVolume::open(self.layout.plan_image(case, &plan.reference)?)?;
        let structure = LabelVolume::open(self.layout.structure_label(case, &plan.label)?)?;

        for cycle in &entry.cycles {
            for tp in &cycle.timepoints {
                log::debug!(
                    "case {case} cycle {} time {} series {} ({:?})",
                    cycle.id,
                    tp.time,
                    tp.series,
                    tp.mode
                );
                let ablation_image =
                    ScalarVolume::open(self.layout.ablation_image(case, &tp.ablation_image)?)?;
                let ablation_label =
                    LabelVolume::open(self.layout.ablation_label(case, &tp.ablation_label)?)?;

                // 术中空间 -> 规划空间.
                let registration = register_with_mode(
                    tp.mode,
                    &plan_image,
                    &ablation_image,
                    &structure,
                    MaskFrame::Fixed,
                    &self.config.registration,
                    self.config.register.mask_dilation,
                )?;
                let image = resample(
                    &ablation_image,
                    plan_image.geometry(),
                    &registration.transform,
                    Interpolation::Linear,
                    0.0,
                );
                let label = resample(
                    &ablation_label,
                    plan_image.geometry(),
                    &registration.transform,
                    Interpolation::NearestNeighbor,
                    BACKGROUND,
                );

                let image_path = self.layout.resampled_image(case, &tp.ablation_image)?;
                let label_path = self.layout.resampled_label(case, &tp.ablation_label)?;
                ensure_parent(&image_path)?;
                ensure_parent(&label_path)?;
                image.save(&image_path)?;
                label.save(&label_path)?;

                emit(report::register_row(case, cycle.id, tp, &registration))?;
            }
        }
        Ok(())
    }
}
