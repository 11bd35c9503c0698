//! 对 `cryo-berry::dataset` 的更一层封装. 提供数据集根目录与配置的加载.

use cryo_berry::batch::ExamLayout;
use cryo_berry::Config;
use std::env;
use std::path::{Path, PathBuf};

/// 数据集根目录环境变量.
pub const DATA_DIR_ENV: &str = "CRYO_DATA_DIR";

/// 获取冷冻消融数据集根目录.
///
/// 1. 若环境变量 `$CRYO_DATA_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/cryo`.
///
/// 两者都不可用时返回 `None`.
pub fn data_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(DATA_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => cryo_berry::dataset::home_dataset_dir_with(["cryo"]),
    }
}

/// 优先使用 `flag`, 其次 [`data_dir_from_env_or_home`].
pub fn resolve_data_dir(flag: Option<&Path>) -> Option<PathBuf> {
    flag.map(Path::to_path_buf)
        .or_else(data_dir_from_env_or_home)
}

/// 以 [`resolve_data_dir`] 的结果创建目录结构.
#[inline]
pub fn layout_from(flag: Option<&Path>) -> Option<ExamLayout> {
    resolve_data_dir(flag).map(ExamLayout::new)
}

/// 读入配置文件. 未给出时使用默认配置.
pub fn load_config(path: Option<&Path>) -> cryo_berry::Result<Config> {
    match path {
        Some(p) => Config::from_path(p),
        None => Ok(Config::default()),
    }
}
