//! 数据集在磁盘上的目录结构.
//!
//! ```text
//! root/
//! └── PC007/
//!     ├── NRRD/                              规划参考影像
//!     ├── NIFTY-Anatomy-label/               结构标注
//!     ├── NIFTY-Iceball-AXTSE/               术中影像
//!     ├── NIFTY-Iceball-AXTSE-label/         消融区标注
//!     ├── NIFTY-Iceball-Resampled/           配准后重采样的术中影像
//!     ├── NIFTY-Iceball-Resampled-label/     配准后重采样的消融区标注
//!     └── NIFTY-Duration/                    冷冻时长图
//! ```

use std::path::{Path, PathBuf};

use super::manifest::CaseId;
use crate::{Error, Result};

/// 规划参考影像子目录.
pub const PLAN_IMAGE_DIR: &str = "NRRD";
/// 结构标注子目录.
pub const STRUCTURE_LABEL_DIR: &str = "NIFTY-Anatomy-label";
/// 术中影像子目录.
pub const ABLATION_IMAGE_DIR: &str = "NIFTY-Iceball-AXTSE";
/// 消融区标注子目录.
pub const ABLATION_LABEL_DIR: &str = "NIFTY-Iceball-AXTSE-label";
/// 重采样术中影像子目录.
pub const RESAMPLED_IMAGE_DIR: &str = "NIFTY-Iceball-Resampled";
/// 重采样消融区标注子目录.
pub const RESAMPLED_LABEL_DIR: &str = "NIFTY-Iceball-Resampled-label";
/// 冷冻时长图子目录.
pub const DURATION_DIR: &str = "NIFTY-Duration";
/// 重采样输出文件名前缀.
pub const RESAMPLED_PREFIX: &str = "REG-ICEBALL-";

/// 数据集目录结构.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamLayout {
    root: PathBuf,
}

impl ExamLayout {
    /// 以 `root` 为数据集根目录.
    #[inline]
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// 数据集根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 病例目录 `root/PC%03d`. 病例编号必须是非负整数.
    pub fn exam_dir(&self, case: &CaseId) -> Result<PathBuf> {
        let n = case
            .number()
            .ok_or_else(|| Error::CaseId(case.to_string()))?;
        let mut ans = self.root.clone();
        ans.push(format!("PC{n:03}"));
        Ok(ans)
    }

    /// `root/PC%03d/<sub>/<file>`.
    fn exam_file(&self, case: &CaseId, sub: &str, file: &str) -> Result<PathBuf> {
        let mut ans = self.exam_dir(case)?;
        ans.extend([sub, file]);
        Ok(ans)
    }

    /// 规划参考影像路径.
    #[inline]
    pub fn plan_image(&self, case: &CaseId, file: &str) -> Result<PathBuf> {
        self.exam_file(case, PLAN_IMAGE_DIR, file)
    }

    /// 结构标注路径.
    #[inline]
    pub fn structure_label(&self, case: &CaseId, file: &str) -> Result<PathBuf> {
        self.exam_file(case, STRUCTURE_LABEL_DIR, file)
    }

    /// 术中影像路径.
    #[inline]
    pub fn ablation_image(&self, case: &CaseId, file: &str) -> Result<PathBuf> {
        self.exam_file(case, ABLATION_IMAGE_DIR, file)
    }

    /// 消融区标注路径.
    #[inline]
    pub fn ablation_label(&self, case: &CaseId, file: &str) -> Result<PathBuf> {
        self.exam_file(case, ABLATION_LABEL_DIR, file)
    }

    /// 重采样术中影像输出路径, 文件名加 `REG-ICEBALL-` 前缀.
    #[inline]
    pub fn resampled_image(&self, case: &CaseId, file: &str) -> Result<PathBuf> {
        self.exam_file(case, RESAMPLED_IMAGE_DIR, &format!("{RESAMPLED_PREFIX}{file}"))
    }

    /// 重采样消融区标注输出路径, 文件名加 `REG-ICEBALL-` 前缀.
    #[inline]
    pub fn resampled_label(&self, case: &CaseId, file: &str) -> Result<PathBuf> {
        self.exam_file(case, RESAMPLED_LABEL_DIR, &format!("{RESAMPLED_PREFIX}{file}"))
    }

    /// 冷冻时长图输出目录.
    #[inline]
    pub fn duration_dir(&self, case: &CaseId) -> Result<PathBuf> {
        let mut ans = self.exam_dir(case)?;
        ans.push(DURATION_DIR);
        Ok(ans)
    }
}
