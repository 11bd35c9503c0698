//! 配准采样掩膜.

use crate::consts::label::{MASK_FOREGROUND, PRIMARY};
use crate::data::morph::{binary_dilate, collapse_to_primary};
use crate::data::resample::{resample, Interpolation};
use crate::data::transform::RigidTransform;
use crate::{Geometry, LabelVolume};

/// 由解剖结构标注生成二值掩膜, 并放到目标网格 `target` 上.
///
/// 1. 只保留主目标结构 (标签 1), 其余标签置为背景;
/// 2. `dilation_radius > 0` 时以该半径 (体素) 的球形结构元膨胀;
/// 3. 最近邻重采样到 `target`.
///
/// 若标注中没有标签 1, 结果全为背景. 这不是错误.
pub fn build_mask(anatom_label: &LabelVolume, target: &Geometry, dilation_radius: usize) -> LabelVolume {
    let primary = collapse_to_primary(anatom_label, PRIMARY);
    let grown = if dilation_radius > 0 {
        binary_dilate(&primary, MASK_FOREGROUND, dilation_radius)
    } else {
        primary
    };
    resample(
        &grown,
        target,
        &RigidTransform::identity(),
        Interpolation::NearestNeighbor,
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GridAttr;
    use nalgebra::Matrix3;

    #[test]
    fn test_build_mask_same_grid() {
        let g = Geometry::axis_aligned([9, 9, 9], [1.0; 3]);
        let mut anatom = LabelVolume::zeros(&g);
        anatom[(4, 4, 4)] = 1;
        anatom[(0, 0, 0)] = 2;

        let m0 = build_mask(&anatom, &g, 0);
        assert_eq!(m0.count(1), 1);
        assert_eq!(m0.count(2), 0);

        let m1 = build_mask(&anatom, &g, 1);
        assert_eq!(m1.count(1), 7);
        assert!(m1.is_grid_compatible(&g));
    }

    #[test]
    fn test_build_mask_target_grid() {
        let g = Geometry::axis_aligned([8, 8, 8], [1.0; 3]);
        let mut anatom = LabelVolume::zeros(&g);
        anatom[(4, 4, 4)] = 1;
        let target = Geometry::new([4, 4, 4], [0.0; 3], [2.0; 3], Matrix3::identity());
        let m = build_mask(&anatom, &target, 2);
        assert!(m.is_grid_compatible(&target));
        assert_eq!(m[(2, 2, 2)], 1);
        assert!(m.data().iter().all(|&p| p <= 1));
    }

    #[test]
    fn test_build_mask_without_primary() {
        let g = Geometry::axis_aligned([5, 5, 5], [1.0; 3]);
        let mut anatom = LabelVolume::zeros(&g);
        anatom[(2, 2, 2)] = 3;
        let m = build_mask(&anatom, &g, 3);
        assert_eq!(m.count(1), 0);
    }
}
