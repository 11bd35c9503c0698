//! CSV 输出行.

use std::io::Write;

use super::index::Timepoint;
use super::manifest::CaseId;
use crate::evaluation::EvaluationResult;
use crate::registration::Registration;
use crate::{AnatomyTable, Result};

/// 浮点数输出格式: 六位小数, NaN 输出为 `nan`.
#[inline]
pub fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        "nan".to_owned()
    } else {
        format!("{v:.6}")
    }
}

/// 逐行写出并立即刷新的 CSV 写出器.
pub struct RowWriter<W: Write> {
    inner: csv::Writer<W>,
    rows: usize,
}

impl<W: Write> RowWriter<W> {
    /// 包装 `w`.
    pub fn new(w: W) -> Self {
        Self {
            inner: csv::WriterBuilder::new().has_headers(false).from_writer(w),
            rows: 0,
        }
    }

    /// 写出一行 (表头也算一行) 并刷新.
    pub fn write_row<I, S>(&mut self, record: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.inner.write_record(record)?;
        self.inner.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// 已写出的行数.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// 取回内部写出器.
    pub fn into_inner(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| e.into_error().into())
    }
}

/// 评估流程的表头:
/// `Case,Cycle,Time,Ser,V_<a>...,V_ablation,V_INV_<a>...,[D_<a>...,]OFF_X,OFF_Y,OFF_Z`.
pub fn evaluation_header(anatomy: &AnatomyTable, with_min_dist: bool) -> Vec<String> {
    let mut ans: Vec<String> = ["Case", "Cycle", "Time", "Ser"]
        .map(String::from)
        .into();
    ans.extend(anatomy.names().map(|n| format!("V_{n}")));
    ans.push("V_ablation".to_owned());
    ans.extend(anatomy.names().map(|n| format!("V_INV_{n}")));
    if with_min_dist {
        ans.extend(anatomy.names().map(|n| format!("D_{n}")));
    }
    ans.extend(["OFF_X", "OFF_Y", "OFF_Z"].map(String::from));
    ans
}

/// 行首的 `Case,Cycle,Time,Ser` 四列.
fn row_prefix(case: &CaseId, cycle: u32, tp: &Timepoint) -> Vec<String> {
    vec![
        case.to_string(),
        cycle.to_string(),
        tp.time.to_string(),
        tp.series.to_string(),
    ]
}

/// 评估流程的一行, 与 [`evaluation_header`] 对应.
pub fn evaluation_row(
    case: &CaseId,
    cycle: u32,
    tp: &Timepoint,
    anatomy: &AnatomyTable,
    result: &EvaluationResult,
    with_min_dist: bool,
    registration: &Registration,
) -> Vec<String> {
    let mut ans = row_prefix(case, cycle, tp);
    let zero_if_missing = |v: Option<f64>| fmt_value(v.unwrap_or(0.0));
    ans.extend(anatomy.names().map(|n| zero_if_missing(result.structure(n))));
    ans.push(zero_if_missing(result.ablation_volume()));
    ans.extend(anatomy.names().map(|n| zero_if_missing(result.involved(n))));
    if with_min_dist {
        ans.extend(anatomy.names().map(|n| fmt_value(result.min_dist_or_nan(n))));
    }
    ans.extend(registration.offset().map(fmt_value));
    ans
}

/// 配准-重采样流程的表头: `Case,Cycle,Time,Ser,OFF_X,OFF_Y,OFF_Z`.
pub fn register_header() -> Vec<String> {
    ["Case", "Cycle", "Time", "Ser", "OFF_X", "OFF_Y", "OFF_Z"]
        .map(String::from)
        .into()
}

/// 配准-重采样流程的一行.
pub fn register_row(
    case: &CaseId,
    cycle: u32,
    tp: &Timepoint,
    registration: &Registration,
) -> Vec<String> {
    let mut ans = row_prefix(case, cycle, tp);
    ans.extend(registration.offset().map(fmt_value));
    ans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::RegistrationMode;

    fn timepoint() -> Timepoint {
        Timepoint {
            time: 90.0,
            dt: 30.0,
            series: 12,
            mode: RegistrationMode::NoRegistration,
            ablation_image: "a.nii".into(),
            ablation_label: "b.nii".into(),
        }
    }

    #[test]
    fn test_header() {
        let h = evaluation_header(&AnatomyTable::default(), true);
        assert_eq!(
            h.join(","),
            "Case,Cycle,Time,Ser,V_TG,V_EUS,V_NVB,V_ablation,V_INV_TG,V_INV_EUS,V_INV_NVB,\
             D_TG,D_EUS,D_NVB,OFF_X,OFF_Y,OFF_Z"
        );
        assert_eq!(evaluation_header(&AnatomyTable::default(), false).len(), 14);
        assert_eq!(register_header().len(), 7);
    }

    #[test]
    fn test_row_with_missing_distance() {
        let anatomy = AnatomyTable::default();
        let row = evaluation_row(
            &CaseId::new("7"),
            2,
            &timepoint(),
            &anatomy,
            &EvaluationResult::default(),
            true,
            &Registration::identity(),
        );
        assert_eq!(row.len(), evaluation_header(&anatomy, true).len());
        assert_eq!(&row[..4], &["7", "2", "90", "12"]);
        assert_eq!(row[4], "0.000000");
        assert_eq!(row[11], "nan");
        assert_eq!(row[14], "0.000000");
    }

    #[test]
    fn test_row_writer_flushes() {
        let mut w = RowWriter::new(Vec::new());
        w.write_row(register_header()).unwrap();
        w.write_row(register_row(
            &CaseId::new("7"),
            1,
            &timepoint(),
            &Registration::identity(),
        ))
        .unwrap();
        assert_eq!(w.rows(), 2);
        let text = String::from_utf8(w.into_inner().unwrap()).unwrap();
        assert_eq!(
            text,
            "Case,Cycle,Time,Ser,OFF_X,OFF_Y,OFF_Z\n7,1,90,12,0.000000,0.000000,0.000000\n"
        );
    }
}
