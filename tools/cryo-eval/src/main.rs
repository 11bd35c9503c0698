//! 冷冻消融术定量评估命令行工具.
//!
//! ```text
//! cryo-eval [-v] [--config cryo.toml] [-D root] [-j 4] batch manifest.json > result.csv
//! cryo-eval register manifest.json > offsets.csv
//! cryo-eval evaluate plan-label.nii.gz intra-label.nii.gz -m 5
//! cryo-eval register-pair fixed.nii.gz moving.nii.gz out.nii.gz -m anatomy.nii.gz
//! cryo-eval metrics result.csv summary.csv
//! ```

use clap::{Parser, Subcommand};

mod args;
mod batch;
mod evaluate;
mod metrics;
mod register_pair;

use args::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "cryo-eval", version)]
/// 冷冻消融术中消融区与关键结构的配准, 体积, 距离与冷冻时长评估.
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 按清单执行完整的评估流程, CSV 输出到标准输出.
    Batch(batch::Batch),
    /// 按清单把术中影像配准并重采样到规划网格, CSV 输出到标准输出.
    Register(batch::Register),
    /// 评估单对标注.
    Evaluate(evaluate::Evaluate),
    /// 配准单对影像并写出重采样后的运动影像.
    RegisterPair(register_pair::RegisterPair),
    /// 对测量表按病例与周期汇总.
    Metrics(metrics::Metrics),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    utils::init_logger(cli.global.verbose);
    let config = cli.global.config()?;

    match cli.command {
        Command::Batch(cmd) => cmd.run(&cli.global, &config),
        Command::Register(cmd) => cmd.run(&cli.global, &config),
        Command::Evaluate(cmd) => cmd.run(&config),
        Command::RegisterPair(cmd) => cmd.run(&config),
        Command::Metrics(cmd) => cmd.run(&config),
    }
}
