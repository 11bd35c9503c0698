//! 运行时错误.

use thiserror::Error;

/// 本 crate 的统一错误类型.
#[derive(Debug, Error)]
pub enum Error {
    /// NIfTI 文件读写失败.
    #[error("NIfTI 读写失败: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// 其他底层 I/O 错误.
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 清单 JSON 格式错误.
    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV 读写失败.
    #[error("CSV 读写失败: {0}")]
    Csv(#[from] csv::Error),

    /// TOML 配置文件格式错误.
    #[error("配置文件解析失败: {0}")]
    Toml(#[from] toml::de::Error),

    /// 数组形状与几何信息不一致.
    #[error("数组形状不一致: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// 两个体数据网格不兼容, 且调用方要求兼容.
    #[error("体数据网格不兼容: {0}")]
    GridMismatch(&'static str),

    /// 参数或配置项取值无效.
    #[error("参数无效: {0}")]
    InvalidOptions(String),

    /// 病例清单中的某一行无效.
    ///
    /// `row` 为该行在 `INTRA_IMAGES` 中的下标.
    #[error("清单第 {row} 行无效: {reason}")]
    Manifest {
        /// 行下标.
        row: usize,
        /// 原因.
        reason: String,
    },

    /// 病例编号无法映射到 `PC%03d` 数据目录.
    #[error("病例 `{0}` 无法映射到数据目录")]
    CaseId(String),

    /// 测量表缺少必要的列.
    #[error("测量表缺少列 `{0}`")]
    MissingColumn(String),

    /// 测量表某一行无法解析.
    #[error("测量表第 {line} 行无法解析: {reason}")]
    Measurement {
        /// 数据行号 (从 1 开始, 不含表头).
        line: usize,
        /// 原因.
        reason: String,
    },

    /// 线程池创建失败.
    #[cfg(feature = "rayon")]
    #[error("线程池创建失败: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// 本 crate 的运行结果.
pub type Result<T> = std::result::Result<T, Error>;
