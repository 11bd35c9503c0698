//! 运行配置.
//!
//! 配置以 TOML 文件给出, 所有字段均有默认值. 例如:
//!
//! ```toml
//! [[anatomy]]
//! label = 1
//! name = "TG"
//!
//! [[anatomy]]
//! label = 2
//! name = "EUS"
//!
//! [registration]
//! number_of_bins = 50
//! sampling_percentage = 0.02
//!
//! [evaluation]
//! margin = 0.0
//! compute_min_distance = true
//!
//! [batch]
//! mask_dilation = 10
//! duration_margins = [0.0, 5.0]
//! ```

use std::path::Path;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_ANATOMY, DEFAULT_BATCH_MASK_DILATION, DEFAULT_REGISTER_MASK_DILATION};
use crate::evaluation::EvaluationOptions;
use crate::registration::RegistrationOptions;
use crate::{Error, Result};

/// 解剖结构表中的一项.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnatomyEntry {
    /// 标签值.
    pub label: u16,
    /// 结构名称, 用于输出列名.
    pub name: String,
}

/// 解剖结构表: 标签值到结构名称的映射, 保持给定顺序.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnatomyTable {
    entries: Vec<AnatomyEntry>,
}

impl Default for AnatomyTable {
    fn default() -> Self {
        Self::new(DEFAULT_ANATOMY.iter().map(|&(l, n)| (l, n)))
    }
}

impl AnatomyTable {
    /// 由 `(标签, 名称)` 序列创建.
    pub fn new<I, S>(it: I) -> Self
    where
        I: IntoIterator<Item = (u16, S)>,
        S: Into<String>,
    {
        let entries = it
            .into_iter()
            .map(|(label, name)| AnatomyEntry {
                label,
                name: name.into(),
            })
            .collect();
        Self { entries }
    }

    /// 检查: 非空, 标签非零且互不相同, 名称非空且互不相同.
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::InvalidOptions("解剖结构表为空".to_owned()));
        }
        for (i, e) in self.entries.iter().enumerate() {
            if e.label == 0 {
                return Err(Error::InvalidOptions(format!(
                    "结构 `{}` 使用了背景标签 0",
                    e.name
                )));
            }
            if e.name.trim().is_empty() {
                return Err(Error::InvalidOptions(format!("标签 {} 没有名称", e.label)));
            }
            if self.entries[..i]
                .iter()
                .any(|o| o.label == e.label || o.name == e.name)
            {
                return Err(Error::InvalidOptions(format!(
                    "结构表中存在重复项: {} / `{}`",
                    e.label, e.name
                )));
            }
        }
        Ok(())
    }

    /// 按给定顺序迭代 `(标签, 名称)`.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> + '_ {
        self.entries.iter().map(|e| (e.label, e.name.as_str()))
    }

    /// 标签 `label` 对应的名称.
    #[inline]
    pub fn name(&self, label: u16) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.name.as_str())
    }

    /// 所有结构名称.
    #[inline]
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// 结构个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 批处理 (评估) 流程的参数.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// 有掩膜配准时结构标注的膨胀半径 (体素).
    pub mask_dilation: usize,
    /// 冷冻时长图所用的边距 (毫米), 每个边距一张图.
    pub duration_margins: Vec<f64>,
    /// 是否在每个病例结束时写出冷冻时长图.
    pub write_duration_maps: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            mask_dilation: DEFAULT_BATCH_MASK_DILATION,
            duration_margins: vec![0.0],
            write_duration_maps: true,
        }
    }
}

/// 配准-重采样流程的参数.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterOptions {
    /// 有掩膜配准时结构标注的膨胀半径 (体素).
    pub mask_dilation: usize,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            mask_dilation: DEFAULT_REGISTER_MASK_DILATION,
        }
    }
}

/// 全部运行配置.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 解剖结构表.
    pub anatomy: AnatomyTable,
    /// 配准参数.
    pub registration: RegistrationOptions,
    /// 评估参数.
    pub evaluation: EvaluationOptions,
    /// 批处理参数.
    pub batch: BatchOptions,
    /// 配准-重采样参数.
    pub register: RegisterOptions,
}

impl Config {
    /// 从 TOML 文本解析并检查.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件读取并检查.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// 检查所有字段.
    pub fn validate(&self) -> Result<()> {
        self.anatomy.validate()?;
        self.registration.validate()?;
        self.evaluation.validate()?;
        if let Some(m) = self
            .batch
            .duration_margins
            .iter()
            .find(|m| !m.is_finite())
        {
            return Err(Error::InvalidOptions(format!("边距 {m} 不是有限值")));
        }
        let margins = &self.batch.duration_margins;
        if margins.iter().map(|&m| OrderedFloat(m + 0.0)).unique().count() < margins.len() {
            return Err(Error::InvalidOptions(format!(
                "duration_margins 中有重复的边距: {margins:?}"
            )));
        }
        Ok(())
    }
}
