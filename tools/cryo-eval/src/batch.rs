//! `batch` 与 `register` 子命令.

use anyhow::Context;
use clap::Args;
use cryo_berry::batch::{BatchRunner, BatchSummary, Manifest, RegisterRunner};
use cryo_berry::Config;
use std::path::{Path, PathBuf};

use crate::args::GlobalArgs;

#[derive(Args, Debug)]
pub struct Batch {
    /// JSON 病例清单.
    manifest: PathBuf,
    /// 覆盖配置中的掩膜膨胀半径 (体素).
    #[arg(long)]
    mask_dilation: Option<usize>,
    /// 不写出冷冻时长图.
    #[arg(long)]
    no_duration_maps: bool,
}

#[derive(Args, Debug)]
pub struct Register {
    /// JSON 病例清单.
    manifest: PathBuf,
    /// 覆盖配置中的掩膜膨胀半径 (体素).
    #[arg(long)]
    mask_dilation: Option<usize>,
}

fn load_manifest(path: &Path) -> anyhow::Result<Manifest> {
    let manifest = Manifest::from_path(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    if manifest.rejected > 0 {
        log::warn!("{} manifest rows skipped", manifest.rejected);
    }
    Ok(manifest)
}

fn report(summary: &BatchSummary) {
    log::info!(
        "{} cases done, {} skipped, {} failed, {} rows",
        summary.cases_done,
        summary.cases_skipped,
        summary.cases_failed,
        summary.rows
    );
}

impl Batch {
    pub fn run(self, global: &GlobalArgs, config: &Config) -> anyhow::Result<()> {
        let mut config = config.clone();
        if let Some(r) = self.mask_dilation {
            config.batch.mask_dilation = r;
        }
        if self.no_duration_maps {
            config.batch.write_duration_maps = false;
        }
        let manifest = load_manifest(&self.manifest)?;
        let runner = BatchRunner::new(&config, global.layout()?)?;
        let summary = runner
            .run(&manifest, std::io::stdout().lock(), global.jobs())
            .context("batch aborted")?;
        report(&summary);
        Ok(())
    }
}

impl Register {
    pub fn run(self, global: &GlobalArgs, config: &Config) -> anyhow::Result<()> {
        let mut config = config.clone();
        if let Some(r) = self.mask_dilation {
            config.register.mask_dilation = r;
        }
        let manifest = load_manifest(&self.manifest)?;
        let runner = RegisterRunner::new(&config, global.layout()?)?;
        let summary = runner
            .run(&manifest, std::io::stdout().lock(), global.jobs())
            .context("register batch aborted")?;
        report(&summary);
        Ok(())
    }
}
