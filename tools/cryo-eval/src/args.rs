//! 全局参数.

use anyhow::Context;
use clap::Args;
use cryo_berry::batch::ExamLayout;
use cryo_berry::Config;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// TOML 配置文件. 未给出时使用默认配置.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// 数据集根目录. 默认依次取 `$CRYO_DATA_DIR` 与 `$HOME/dataset/cryo`.
    #[arg(long = "data-dir", short = 'D', global = true)]
    pub data_dir: Option<PathBuf>,
    /// 并行处理的病例数. `0` 表示使用全部核心.
    #[arg(long, short = 'j', default_value_t = 1, global = true)]
    pub jobs: usize,
    /// 日志详细程度, 可重复.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl GlobalArgs {
    /// 读入配置.
    pub fn config(&self) -> anyhow::Result<Config> {
        utils::loader::load_config(self.config.as_deref()).with_context(|| match &self.config {
            Some(p) => format!("failed to load config {}", p.display()),
            None => "invalid default config".to_owned(),
        })
    }

    /// 数据集目录结构.
    pub fn layout(&self) -> anyhow::Result<ExamLayout> {
        utils::loader::layout_from(self.data_dir.as_deref())
            .context("no dataset root: pass --data-dir or set $CRYO_DATA_DIR")
    }

    /// 实际使用的线程数.
    pub fn jobs(&self) -> usize {
        match self.jobs {
            0 => utils::cpus(),
            n => n,
        }
    }
}
