//! 3D 形态学操作.

use super::distance::{signed_distance_map, squared_edt};
use super::{GridAttr, LabelVolume};
use crate::consts::label::{ABLATED, BACKGROUND, MASK_FOREGROUND};

/// 只保留值为 `primary` 的体素 (置为 [`MASK_FOREGROUND`]), 其余标签全部置为背景.
pub fn collapse_to_primary(label: &LabelVolume, primary: u16) -> LabelVolume {
    label.map(|&p| {
        if p == primary {
            MASK_FOREGROUND
        } else {
            BACKGROUND
        }
    })
}

/// 以半径为 `radius` (体素) 的球形结构元对值为 `foreground` 的区域做二值膨胀.
///
/// 结果中膨胀后的区域取 `foreground`, 其余为背景. 球形结构元即
/// `{d : |d|^2 <= radius^2}`, 以体素为单位, 与体素间距无关.
pub fn binary_dilate(label: &LabelVolume, foreground: u16, radius: usize) -> LabelVolume {
    let mask = label.foreground(foreground);
    if radius == 0 {
        return label.map(|&p| if p == foreground { foreground } else { BACKGROUND });
    }
    let r2 = (radius * radius) as f64;
    let sq = squared_edt(&mask, [1.0; 3]);
    let mut ans = LabelVolume::zeros(label.geometry());
    ndarray::Zip::from(&mut ans.data)
        .and(&sq)
        .for_each(|p, &d| {
            if d <= r2 {
                *p = foreground;
            }
        });
    ans
}

/// 按物理距离边距 `margin` (毫米) 调整消融区.
///
/// 新的消融区为 `{v : sd(v) <= margin}`, 其中 `sd` 为原消融区 (标签 1) 的带符号距离图.
/// `margin > 0` 时扩张, `margin < 0` 时腐蚀, `margin == 0` 时只做二值化.
/// 结果是二值标签 (`0` / `1`).
pub fn apply_margin(ablation: &LabelVolume, margin: f64) -> LabelVolume {
    if margin == 0.0 {
        return ablation.map(|&p| if p == ABLATED { ABLATED } else { BACKGROUND });
    }
    let sd = signed_distance_map(ablation, ABLATED, true);
    sd.map(|&d| {
        if (d as f64) <= margin {
            ABLATED
        } else {
            BACKGROUND
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Geometry;

    fn cube(size: usize, lo: usize, hi: usize) -> LabelVolume {
        let g = Geometry::axis_aligned([size; 3], [1.0; 3]);
        let mut v = LabelVolume::zeros(&g);
        for z in lo..hi {
            for y in lo..hi {
                for x in lo..hi {
                    v[(z, y, x)] = 1;
                }
            }
        }
        v
    }

    #[test]
    fn test_collapse_to_primary() {
        let mut v = cube(5, 1, 3);
        v[(4, 4, 4)] = 2;
        v[(0, 0, 0)] = 300;
        let c = collapse_to_primary(&v, 1);
        assert_eq!(c.count(1), 8);
        assert_eq!(c.count(0), 125 - 8);
    }

    #[test]
    fn test_dilate_ball() {
        let g = Geometry::axis_aligned([7, 7, 7], [0.5, 1.0, 4.0]);
        let mut v = LabelVolume::zeros(&g);
        v[(3, 3, 3)] = 1;
        assert_eq!(binary_dilate(&v, 1, 0).count(1), 1);
        // 半径 1: 中心 + 6-邻域, 与体素间距无关.
        assert_eq!(binary_dilate(&v, 1, 1).count(1), 7);
        // 半径 2: |d|^2 <= 4 的整数点个数.
        assert_eq!(binary_dilate(&v, 1, 2).count(1), 33);
    }

    #[test]
    fn test_margin_zero_is_binarize() {
        let mut v = cube(6, 1, 4);
        v[(5, 5, 5)] = 2;
        let m = apply_margin(&v, 0.0);
        assert_eq!(m.count(1), 27);
        assert_eq!(m.count(2), 0);
    }

    #[test]
    fn test_margin_monotonic() {
        let v = cube(12, 3, 9);
        let margins = [-3.0, -1.0, 0.0, 1.0, 2.5];
        let counts: Vec<usize> = margins.iter().map(|&m| apply_margin(&v, m).count(1)).collect();
        assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{counts:?}");
        assert!(counts[0] < counts[2] && counts[2] < counts[4]);

        // 包含关系.
        let small = apply_margin(&v, -1.0);
        let large = apply_margin(&v, 1.0);
        assert!(small
            .data()
            .iter()
            .zip(large.data().iter())
            .all(|(a, b)| *a <= *b));
    }

    #[test]
    fn test_margin_one_voxel() {
        let g = Geometry::axis_aligned([5, 5, 5], [1.0; 3]);
        let mut v = LabelVolume::zeros(&g);
        v[(2, 2, 2)] = 1;
        assert_eq!(apply_margin(&v, 1.0).count(1), 7);
        // 单体素腐蚀后为空.
        assert_eq!(apply_margin(&v, -0.5).count(1), 0);
    }

    #[test]
    fn test_margin_erodes_full_grid() {
        let v = cube(5, 0, 5);
        assert_eq!(apply_margin(&v, -0.5).count(1), 27);
        assert_eq!(apply_margin(&v, -1.5).count(1), 1);
        assert_eq!(apply_margin(&v, 3.0).count(1), 125);
    }
}
