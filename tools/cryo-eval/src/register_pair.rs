//! `register-pair` 子命令.

use anyhow::Context;
use clap::Args;
use cryo_berry::consts::label::BACKGROUND;
use cryo_berry::mask::build_mask;
use cryo_berry::registration::SamplingMask;
use cryo_berry::prelude::*;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RegisterPair {
    /// 固定影像.
    fixed: PathBuf,
    /// 运动影像.
    moving: PathBuf,
    /// 重采样到固定网格后的运动影像输出路径.
    out: PathBuf,
    /// 运动影像的解剖结构标注. 给出时在运动网格上生成掩膜约束采样.
    #[arg(short = 'm', long = "anatom-label")]
    anatom_label: Option<PathBuf>,
    /// 同时把运动影像空间的标注重采样到固定网格.
    #[arg(long, requires = "label_out")]
    moving_label: Option<PathBuf>,
    /// `--moving-label` 的输出路径.
    #[arg(long)]
    label_out: Option<PathBuf>,
}

impl RegisterPair {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let fixed = ScalarVolume::open(&self.fixed)
            .with_context(|| format!("failed to read {}", self.fixed.display()))?;
        let moving = ScalarVolume::open(&self.moving)
            .with_context(|| format!("failed to read {}", self.moving.display()))?;

        let mask = match &self.anatom_label {
            Some(p) => {
                let structure = LabelVolume::open(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                Some(build_mask(
                    &structure,
                    moving.geometry(),
                    config.register.mask_dilation,
                ))
            }
            None => None,
        };

        let registration = register(
            &fixed,
            &moving,
            &config.registration,
            mask.as_ref().map(SamplingMask::moving),
        )?;
        log::info!(
            "stop: {}, {} iterations, metric {:.6}",
            registration.stop,
            registration.iterations,
            registration.metric
        );

        let resampled = resample(
            &moving,
            fixed.geometry(),
            &registration.transform,
            Interpolation::Linear,
            0.0,
        );
        resampled
            .save(&self.out)
            .with_context(|| format!("failed to write {}", self.out.display()))?;

        if let (Some(src), Some(dst)) = (&self.moving_label, &self.label_out) {
            let label = LabelVolume::open(src)
                .with_context(|| format!("failed to read {}", src.display()))?;
            resample(
                &label,
                fixed.geometry(),
                &registration.transform,
                Interpolation::NearestNeighbor,
                BACKGROUND,
            )
            .save(dst)
            .with_context(|| format!("failed to write {}", dst.display()))?;
        }

        let [x, y, z] = registration.offset();
        println!("OFF_X,OFF_Y,OFF_Z");
        println!("{x:.6},{y:.6},{z:.6}");
        Ok(())
    }
}
