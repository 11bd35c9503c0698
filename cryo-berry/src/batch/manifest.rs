//! 病例清单 (JSON).
//!
//! ```json
//! {
//!   "PLAN_IMAGES": { "7": ["plan.nii.gz", "plan-label.nii.gz"] },
//!   "INTRA_IMAGES": [
//!     [7, 1, 0, 301, 2, "abl-301.nii.gz", "abl-301-label.nii.gz"],
//!     [7, 1, 60, 302, 3, "abl-302.nii.gz", "abl-302-label.nii.gz", [1.0, -2.0, 0.5]]
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::registration::RegistrationMode;
use crate::{Error, Result};

/// 病例编号. 清单中可以是 JSON 数字或字符串, 统一保存为字符串.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaseId(String);

impl CaseId {
    /// 由字符串创建.
    #[inline]
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self(s.into())
    }

    /// 由 JSON 值解码. 整数按十进制, 字符串原样保存.
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => Some(match n.as_u64() {
                Some(u) => Self(u.to_string()),
                None => Self(n.to_string()),
            }),
            Value::String(s) => Some(Self(s.trim().to_owned())),
            _ => None,
        }
    }

    /// 字符串形式.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 数字编号. 非数字编号返回 `None`.
    #[inline]
    pub fn number(&self) -> Option<u32> {
        self.0.parse().ok()
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 术前规划数据: 解剖参考影像与结构标注的文件名.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanImages {
    /// 解剖参考影像.
    pub reference: String,
    /// 结构标注.
    pub label: String,
}

/// 清单中的一个术中时间点.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRow {
    /// 病例编号.
    pub case: CaseId,
    /// 周期编号.
    pub cycle: u32,
    /// 采集时间 (秒).
    pub time: f64,
    /// 序列号.
    pub series: i64,
    /// 配准方式.
    pub mode: RegistrationMode,
    /// 消融区影像文件名.
    pub ablation_image: String,
    /// 消融区标注文件名.
    pub ablation_label: String,
}

impl ManifestRow {
    /// 解码 `INTRA_IMAGES` 中下标为 `row` 的一行.
    pub fn from_value(row: usize, v: &Value) -> Result<Self> {
        let bad = |reason: String| Error::Manifest { row, reason };
        let items = v
            .as_array()
            .ok_or_else(|| bad("不是数组".to_owned()))?;
        if items.len() < 7 {
            return Err(bad(format!("只有 {} 列, 至少需要 7 列", items.len())));
        }

        let case = CaseId::from_value(&items[0]).ok_or_else(|| bad("病例编号无效".to_owned()))?;
        let cycle = items[1]
            .as_u64()
            .and_then(|c| u32::try_from(c).ok())
            .ok_or_else(|| bad(format!("周期编号 {} 无效", items[1])))?;
        let time = items[2]
            .as_f64()
            .ok_or_else(|| bad(format!("时间 {} 无效", items[2])))?;
        let series = items[3]
            .as_i64()
            .ok_or_else(|| bad(format!("序列号 {} 无效", items[3])))?;
        let tag = items[4]
            .as_u64()
            .ok_or_else(|| bad(format!("配准模式 {} 无效", items[4])))?;
        let file = |i: usize, what: &str| {
            items[i]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .ok_or_else(|| bad(format!("{what} {} 无效", items[i])))
        };
        let ablation_image = file(5, "消融区影像")?;
        let ablation_label = file(6, "消融区标注")?;

        let offset = match items.get(7) {
            None | Some(Value::Null) => None,
            Some(Value::Array(xs)) if xs.len() == 3 => {
                let mut o = [0.0; 3];
                for (dst, x) in o.iter_mut().zip(xs) {
                    *dst = x
                        .as_f64()
                        .ok_or_else(|| bad(format!("平移量 {x} 无效")))?;
                }
                Some(o)
            }
            Some(other) => return Err(bad(format!("平移量 {other} 无效"))),
        };
        let mode = RegistrationMode::from_tag(tag, offset).map_err(bad)?;

        Ok(Self {
            case,
            cycle,
            time,
            series,
            mode,
            ablation_image,
            ablation_label,
        })
    }
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(rename = "PLAN_IMAGES", default)]
    plan_images: BTreeMap<String, (String, String)>,
    #[serde(rename = "INTRA_IMAGES", default)]
    intra_images: Vec<Value>,
}

/// 解码后的病例清单.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// 每个病例的规划数据.
    pub plan: BTreeMap<CaseId, PlanImages>,
    /// 有效的术中时间点, 保持清单中的顺序.
    pub rows: Vec<ManifestRow>,
    /// 无效行的个数. 这些行已被记录日志并跳过.
    pub rejected: usize,
}

impl Manifest {
    /// 从 JSON 文本解码. 文本本身格式错误时返回 `Err`; 单行无效时记录日志并跳过该行.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(s)?;
        let plan = raw
            .plan_images
            .into_iter()
            .map(|(k, (reference, label))| (CaseId::new(k.trim()), PlanImages { reference, label }))
            .collect();

        let mut rows = Vec::with_capacity(raw.intra_images.len());
        let mut rejected = 0;
        for (i, v) in raw.intra_images.iter().enumerate() {
            match ManifestRow::from_value(i, v) {
                Ok(r) => rows.push(r),
                Err(e) => {
                    log::warn!("{e}, skipped");
                    rejected += 1;
                }
            }
        }
        Ok(Self {
            plan,
            rows,
            rejected,
        })
    }

    /// 从 JSON 文件读取.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}
