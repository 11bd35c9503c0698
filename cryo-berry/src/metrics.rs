//! 消融指标后处理.
//!
//! 读入评估流程输出的测量表, 按 (病例, 周期) 分组, 对每组计算:
//!
//! 1. 解剖结构体积: 组内第一行的值;
//! 2. 每个消融相关体积列: 组内最大值 (`_max`) 与取值为正的累计时长 (`_duration`).
//!
//! 累计时长为该列取值大于 0 的各行的 `dt` 之和, `dt` 是距组内上一行的时间差,
//! 组内第一行为 0. 计算前组内各行按时间升序排列.
//!
//! 组内任意一行为 NaN 时, 该列的 `_max` 为 NaN; NaN 行不计入 `_duration`.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::duration::elapsed_deltas;
use crate::{AnatomyTable, Error, Result};

/// 测量表: 表头与全部数值.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementTable {
    header: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl MeasurementTable {
    /// 直接由表头和数据创建.
    pub fn new(header: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self { header, rows }
    }

    /// 从 CSV 读入. 第一行为表头, 之后每个单元格都必须是数值 (`nan` 也可以).
    pub fn read<R: Read>(r: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(r);
        let header: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_owned())
            .collect();
        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            let row = record
                .iter()
                .map(|cell| {
                    cell.trim().parse::<f64>().map_err(|e| Error::Measurement {
                        line: i + 1,
                        reason: format!("`{cell}`: {e}"),
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push(row);
        }
        Ok(Self { header, rows })
    }

    /// 从 CSV 文件读入.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read(std::fs::File::open(path.as_ref())?)
    }

    /// 表头.
    #[inline]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// 数据行.
    #[inline]
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// 列名 `name` 的下标.
    pub fn column(&self, name: &str) -> Result<usize> {
        self.header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::MissingColumn(name.to_owned()))
    }
}

/// 参与汇总的列.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryColumns {
    /// 解剖结构体积列, 取组内第一行.
    pub anatomy: Vec<String>,
    /// 消融相关体积列, 求最大值和累计时长.
    pub ablation: Vec<String>,
}

impl SummaryColumns {
    /// 由解剖结构表生成默认列名:
    /// `V_<a>...` 与 `V_ablation, V_INV_<a>...`.
    pub fn from_anatomy(anatomy: &AnatomyTable) -> Self {
        let mut ablation = vec!["V_ablation".to_owned()];
        ablation.extend(anatomy.names().map(|n| format!("V_INV_{n}")));
        Self {
            anatomy: anatomy.names().map(|n| format!("V_{n}")).collect(),
            ablation,
        }
    }
}

impl Default for SummaryColumns {
    fn default() -> Self {
        Self::from_anatomy(&AnatomyTable::default())
    }
}

/// 汇总结果.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    /// 表头: `Case,Cycle,<anatomy>...,<abl>_max,<abl>_duration...`.
    pub header: Vec<String>,
    /// 每个 (病例, 周期) 一行.
    pub rows: Vec<SummaryRow>,
}

/// 汇总结果中的一行.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    /// 病例编号.
    pub case: i64,
    /// 周期编号.
    pub cycle: i64,
    /// 其余各列.
    pub values: Vec<f64>,
}

impl SummaryTable {
    /// 写出为 CSV.
    pub fn write<W: Write>(&self, w: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(w);
        writer.write_record(&self.header)?;
        for row in &self.rows {
            let mut record = vec![row.case.to_string(), row.cycle.to_string()];
            record.extend(row.values.iter().map(|&v| fmt_cell(v)));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// 写出到 CSV 文件.
    pub fn write_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write(std::fs::File::create(path.as_ref())?)
    }
}

/// 最大值. 含有 NaN 时结果为 NaN.
fn max_or_nan(values: impl IntoIterator<Item = f64>) -> f64 {
    values.into_iter().fold(f64::NEG_INFINITY, |acc, v| {
        if acc.is_nan() || v.is_nan() {
            f64::NAN
        } else {
            acc.max(v)
        }
    })
}

/// 单元格输出格式. NaN 输出为 `nan`.
#[inline]
fn fmt_cell(v: f64) -> String {
    if v.is_nan() {
        "nan".to_owned()
    } else {
        v.to_string()
    }
}

/// 汇总测量表.
///
/// 病例与周期均按数值升序输出. 缺少 `Case`, `Cycle`, `Time` 或 `columns` 中任意一列时
/// 返回 `Err`.
pub fn summarize(table: &MeasurementTable, columns: &SummaryColumns) -> Result<SummaryTable> {
    let col_case = table.column("Case")?;
    let col_cycle = table.column("Cycle")?;
    let col_time = table.column("Time")?;
    let anatomy_cols = columns
        .anatomy
        .iter()
        .map(|n| table.column(n))
        .collect::<Result<Vec<_>>>()?;
    let ablation_cols = columns
        .ablation
        .iter()
        .map(|n| table.column(n))
        .collect::<Result<Vec<_>>>()?;

    let mut header = vec!["Case".to_owned(), "Cycle".to_owned()];
    header.extend(columns.anatomy.iter().cloned());
    for name in &columns.ablation {
        header.push(format!("{name}_max"));
        header.push(format!("{name}_duration"));
    }

    let mut groups: BTreeMap<(OrderedFloat<f64>, OrderedFloat<f64>), Vec<&Vec<f64>>> =
        BTreeMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        if row.len() != table.header.len() {
            return Err(Error::Measurement {
                line: i + 1,
                reason: format!("有 {} 列, 表头有 {} 列", row.len(), table.header.len()),
            });
        }
        groups
            .entry((OrderedFloat(row[col_case]), OrderedFloat(row[col_cycle])))
            .or_default()
            .push(row);
    }

    let rows = groups
        .into_iter()
        .map(|((case, cycle), mut rows)| {
            rows.sort_by_key(|r| OrderedFloat(r[col_time]));
            let times = rows.iter().map(|r| r[col_time]).collect_vec();
            let dts = elapsed_deltas(&times);

            let mut values = anatomy_cols.iter().map(|&c| rows[0][c]).collect_vec();
            for &c in &ablation_cols {
                let max = max_or_nan(rows.iter().map(|r| r[c]));
                let duration: f64 = rows
                    .iter()
                    .zip(&dts)
                    .filter(|(r, _)| r[c] > 0.0)
                    .map(|(_, dt)| dt)
                    .sum();
                values.push(max);
                values.push(duration);
            }
            SummaryRow {
                case: case.0 as i64,
                cycle: cycle.0 as i64,
                values,
            }
        })
        .collect();

    Ok(SummaryTable { header, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const MEASUREMENTS: &str = "\
Case,Cycle,Time,Ser,V_TG,V_EUS,V_NVB,V_ablation,V_INV_TG,V_INV_EUS,V_INV_NVB,OFF_X,OFF_Y,OFF_Z
12,1,60,3,30.5,1.0,0.5,2.0,1.5,0.0,0.0,0,0,0
7,1,0,1,25.0,1.2,0.4,0.0,0.0,0.0,0.0,0,0,0
7,1,60,2,25.0,1.2,0.4,3.0,2.0,0.0,0.1,0,0,0
7,1,150,3,25.0,1.2,0.4,5.0,2.5,0.2,0.0,0,0,0
7,2,400,4,25.0,1.2,0.4,1.0,0.5,0.0,0.0,0,0,0
12,1,0,2,30.5,1.0,0.5,0.5,0.0,0.0,0.0,0,0,0
";

    #[test]
    fn test_summarize() {
        let table = MeasurementTable::read(MEASUREMENTS.as_bytes()).unwrap();
        let s = summarize(&table, &SummaryColumns::default()).unwrap();
        assert_eq!(
            s.header.join(","),
            "Case,Cycle,V_TG,V_EUS,V_NVB,V_ablation_max,V_ablation_duration,\
             V_INV_TG_max,V_INV_TG_duration,V_INV_EUS_max,V_INV_EUS_duration,\
             V_INV_NVB_max,V_INV_NVB_duration"
        );
        let keys: Vec<(i64, i64)> = s.rows.iter().map(|r| (r.case, r.cycle)).collect();
        assert_eq!(keys, vec![(7, 1), (7, 2), (12, 1)]);

        // 病例 7 周期 1: dt = [0, 60, 90].
        let v = &s.rows[0].values;
        assert_abs_diff_eq!(v[0], 25.0);
        assert_abs_diff_eq!(v[3], 5.0); // V_ablation_max
        assert_abs_diff_eq!(v[4], 150.0); // V_ablation_duration
        assert_abs_diff_eq!(v[6], 150.0); // V_INV_TG_duration
        assert_abs_diff_eq!(v[8], 90.0); // V_INV_EUS_duration
        assert_abs_diff_eq!(v[10], 60.0); // V_INV_NVB_duration

        // 单行周期: 时长为 0.
        assert_abs_diff_eq!(s.rows[1].values[4], 0.0);

        // 病例 12: 行序颠倒, 排序后 dt = [0, 60].
        let v = &s.rows[2].values;
        assert_abs_diff_eq!(v[3], 2.0);
        assert_abs_diff_eq!(v[4], 60.0);
        assert_abs_diff_eq!(v[6], 60.0);
    }

    #[test]
    fn test_missing_column() {
        let table = MeasurementTable::read("Case,Cycle,Time,V_TG\n1,1,0,3\n".as_bytes()).unwrap();
        assert!(matches!(
            summarize(&table, &SummaryColumns::default()),
            Err(Error::MissingColumn(c)) if c == "V_EUS"
        ));
    }

    #[test]
    fn test_bad_cell_and_write() {
        assert!(matches!(
            MeasurementTable::read("Case,Cycle,Time\n1,x,0\n".as_bytes()),
            Err(Error::Measurement { line: 1, .. })
        ));

        let table = MeasurementTable::read("Case,Cycle,Time,V\n3,1,0,0.5\n3,1,10,nan\n".as_bytes()).unwrap();
        let columns = SummaryColumns {
            anatomy: vec![],
            ablation: vec!["V".into()],
        };
        let s = summarize(&table, &columns).unwrap();
        let mut out = Vec::new();
        s.write(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Case,Cycle,V_max,V_duration\n3,1,nan,0\n"
        );
    }

    #[test]
    fn test_nan_propagates_to_max() {
        let table = MeasurementTable::read(
            "Case,Cycle,Time,V\n1,1,0,2.0\n1,1,30,nan\n1,1,60,4.0\n2,1,0,1.0\n2,1,5,3.0\n"
                .as_bytes(),
        )
        .unwrap();
        let columns = SummaryColumns {
            anatomy: vec![],
            ablation: vec!["V".into()],
        };
        let s = summarize(&table, &columns).unwrap();
        assert!(s.rows[0].values[0].is_nan());
        // NaN 行 (dt = 30) 不计入时长.
        assert_abs_diff_eq!(s.rows[0].values[1], 30.0);
        assert_abs_diff_eq!(s.rows[1].values[0], 3.0);
        assert_abs_diff_eq!(s.rows[1].values[1], 5.0);
    }
}
