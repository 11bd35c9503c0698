//! `metrics` 子命令.

use anyhow::Context;
use clap::Args;
use cryo_berry::metrics::{summarize, MeasurementTable, SummaryColumns};
use cryo_berry::Config;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct Metrics {
    /// 评估流程输出的测量表.
    input: PathBuf,
    /// 汇总结果输出路径.
    output: PathBuf,
}

impl Metrics {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let table = MeasurementTable::from_path(&self.input)
            .with_context(|| format!("failed to read {}", self.input.display()))?;
        let summary = summarize(&table, &SummaryColumns::from_anatomy(&config.anatomy))?;
        summary
            .write_path(&self.output)
            .with_context(|| format!("failed to write {}", self.output.display()))?;
        log::info!("{} groups written to {}", summary.rows.len(), self.output.display());
        Ok(())
    }
}
