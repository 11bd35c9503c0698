#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供冷冻消融术 (cryoablation) 术中消融区与术前关键结构标注之间的配准,
//! 体积重叠, 最小距离与累计冷冻时长的定量评估.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 体数据只支持 NIfTI 格式 (`.nii` / `.nii.gz`) 读写. 读入时几何信息会从 NIfTI
//!   的 RAS 世界坐标系转换为 ITK 风格的 LPS 坐标系, 写出时再转换回去.
//! 2. 解剖结构标签固定为一张小表 (默认 `{1: TG, 2: EUS, 3: NVB}`),
//!   以 [`AnatomyTable`] 的形式显式传入各组件, 而不是全局状态.
//! 3. 在非期望情况下 (例如索引越界), 程序会直接 panic, 而不会导致内存错误.
//!
//! # 开发计划
//!
//! ### 体数据几何与 NIfTI 读写 ✅
//!
//! 尺寸, 原点, 体素间距, 方向矩阵. 两个体数据 "网格兼容" 当且仅当上述四项相同.
//!
//! 实现位于 `cryo-berry/src/data`.
//!
//! ### 重采样, 距离变换, 形态学, 标签统计 ✅
//!
//! 1. 最近邻 / 三线性插值重采样, 刚体变换下的拉取式 (pull) 实现. ✅
//! 2. Felzenszwalb 可分离精确欧氏距离变换, 带符号距离图 (内部为负). ✅
//! 3. 球形结构元二值膨胀, 基于带符号距离阈值的边距 (margin) 扩张/腐蚀. ✅
//! 4. 逐标签体素个数 / 最小值 / 最大值 / 平均值. ✅
//!
//! ### 刚体配准 ✅
//!
//! 互信息度量 + 正则步长梯度下降, 支持采样掩膜与初始平移.
//!
//! 实现位于 `cryo-berry/src/registration`.
//!
//! ### 评估引擎与冷冻时长累计 ✅
//!
//! 实现位于 `cryo-berry/src/evaluation.rs` 与 `cryo-berry/src/duration.rs`.
//!
//! ### 批处理 ✅
//!
//! 病例清单 (JSON) -> 病例/周期/时间点树 -> 逐时间点配准, 评估, 累计 -> CSV 行.
//!
//! 实现位于 `cryo-berry/src/batch`.
//!
//! ### 消融指标后处理 ✅
//!
//! 对测量表按 (病例, 周期) 分组, 求峰值与阳性持续时长.
//!
//! 实现位于 `cryo-berry/src/metrics.rs`.

/// 三维索引, 按 `(z, y, x)` 组织, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D 体数据基础数据结构与底层算法.
pub mod data;

pub use data::{
    distance, morph, resample, stats, transform, Geometry, GridAttr, LabelVolume, ScalarVolume,
    Volume,
};

pub mod consts;

mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{AnatomyTable, Config};

pub mod mask;

pub mod registration;

pub mod evaluation;

pub mod duration;

pub mod batch;

pub mod metrics;

pub mod dataset;
pub mod prelude;
