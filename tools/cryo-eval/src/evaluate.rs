//! `evaluate` 子命令.

use anyhow::Context;
use clap::Args;
use cryo_berry::evaluation::Evaluator;
use cryo_berry::{Config, LabelVolume};
use std::io::Write;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct Evaluate {
    /// 术前结构标注.
    plan_label: PathBuf,
    /// 术中消融区标注.
    intra_label: PathBuf,
    /// 消融区边距 (mm), 正值扩张, 负值收缩. 覆盖配置中的值.
    #[arg(short, long, allow_negative_numbers = true)]
    pub(crate) margin: Option<f64>,
}

impl Evaluate {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut options = config.evaluation.clone();
        if let Some(m) = self.margin {
            options.margin = m;
        }
        let evaluator = Evaluator::new(config.anatomy.clone(), options)?;

        let structure = LabelVolume::open(&self.plan_label)
            .with_context(|| format!("failed to read {}", self.plan_label.display()))?;
        let ablation = LabelVolume::open(&self.intra_label)
            .with_context(|| format!("failed to read {}", self.intra_label.display()))?;

        let result = evaluator.evaluate(&structure, &ablation);
        let mut out = std::io::stdout().lock();
        writeln!(
            out,
            "{} vs {} (margin {} mm)",
            self.plan_label.display(),
            self.intra_label.display(),
            evaluator.options().margin
        )?;
        utils::sep_to(&mut out)?;
        for (metric, value) in result.iter() {
            writeln!(out, "{metric} \t: {value}")?;
        }
        Ok(())
    }
}
