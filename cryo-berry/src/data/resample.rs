//! 重采样.
//!
//! 采用拉取式实现: 对参考网格的每个体素中心 `p`, 求 `T^-1(p)` 在源体数据中的值.
//! 变换 `T` 把源空间的点映射到参考空间.

use nalgebra::Vector3;
use num::{NumCast, ToPrimitive};

use super::transform::RigidTransform;
use super::{fill_slices, Geometry, GridAttr, Volume};

/// 插值方式.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// 最近邻. 用于标签.
    #[default]
    NearestNeighbor,

    /// 三线性. 用于影像强度.
    Linear,
}

/// 连续索引是否落在 `[-0.5, n - 0.5)` 内?
#[inline]
fn inside(c: &Vector3<f64>, size: &[usize; 3]) -> bool {
    (0..3).all(|i| c[i] >= -0.5 && c[i] < size[i] as f64 - 0.5)
}

/// 按 `(x, y, z)` 连续索引对 `src` 做三线性插值. 边界处邻点截断到有效范围.
pub(crate) fn trilinear<T: ToPrimitive + Copy>(src: &Volume<T>, c: &Vector3<f64>) -> f64 {
    let size = src.geometry().size();
    let mut lo = [0usize; 3];
    let mut hi = [0usize; 3];
    let mut frac = [0.0f64; 3];
    for i in 0..3 {
        let v = c[i].clamp(0.0, (size[i] - 1) as f64);
        let f = v.floor();
        lo[i] = f as usize;
        hi[i] = (lo[i] + 1).min(size[i] - 1);
        frac[i] = v - f;
    }
    let at = |x: usize, y: usize, z: usize| src[(z, y, x)].to_f64().unwrap_or(0.0);
    let [fx, fy, fz] = frac;
    let c00 = at(lo[0], lo[1], lo[2]) * (1.0 - fx) + at(hi[0], lo[1], lo[2]) * fx;
    let c10 = at(lo[0], hi[1], lo[2]) * (1.0 - fx) + at(hi[0], hi[1], lo[2]) * fx;
    let c01 = at(lo[0], lo[1], hi[2]) * (1.0 - fx) + at(hi[0], lo[1], hi[2]) * fx;
    let c11 = at(lo[0], hi[1], hi[2]) * (1.0 - fx) + at(hi[0], hi[1], hi[2]) * fx;
    let c0 = c00 * (1.0 - fy) + c10 * fy;
    let c1 = c01 * (1.0 - fy) + c11 * fy;
    c0 * (1.0 - fz) + c1 * fz
}

/// 将 `src` 重采样到参考网格 `reference` 上.
///
/// `transform` 把 `src` 所在空间的点映射到参考空间. 落在 `src` 范围外的体素取 `default`.
/// 若变换为恒等且两者网格兼容, 结果与 `src` 完全相同.
pub fn resample<T>(
    src: &Volume<T>,
    reference: &Geometry,
    transform: &RigidTransform,
    interpolation: Interpolation,
    default: T,
) -> Volume<T>
where
    T: Copy + NumCast + Send + Sync,
{
    if transform.is_identity() && src.geometry().is_compatible(reference) {
        return src.clone();
    }

    let pull = transform.inverse();
    let size = src.geometry().size();
    let mut out = Volume::filled(reference, default);
    fill_slices(&mut out.data, |z, mut slice| {
        for ((y, x), v) in slice.indexed_iter_mut() {
            let p = pull.apply(&reference.index_to_physical((z, y, x)));
            let c = src.geometry().physical_to_continuous(&p);
            if !inside(&c, &size) {
                continue;
            }
            *v = match interpolation {
                Interpolation::NearestNeighbor => {
                    let [ix, iy, iz] = [0, 1, 2].map(|i| {
                        (c[i].round().max(0.0) as usize).min(size[i] - 1)
                    });
                    src[(iz, iy, ix)]
                }
                Interpolation::Linear => {
                    <T as NumCast>::from(trilinear(src, &c)).unwrap_or(default)
                }
            };
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LabelVolume, ScalarVolume};
    use approx::assert_abs_diff_eq;
    use nalgebra::Matrix3;

    fn cube_label() -> LabelVolume {
        let g = Geometry::new([6, 5, 4], [2.0, -1.0, 7.0], [1.0, 1.5, 2.5], Matrix3::identity());
        let mut v = LabelVolume::zeros(&g);
        v[(1, 2, 3)] = 1;
        v[(2, 2, 3)] = 2;
        v[(3, 4, 5)] = 3;
        v
    }

    #[test]
    fn test_identity_is_noop() {
        let v = cube_label();
        let out = resample(
            &v,
            v.geometry(),
            &RigidTransform::identity(),
            Interpolation::NearestNeighbor,
            0,
        );
        assert!(out.is_grid_compatible(&v));
        assert_eq!(out.data(), v.data());
    }

    #[test]
    fn test_translation_shift() {
        let g = Geometry::axis_aligned([5, 5, 5], [1.0; 3]);
        let mut v = LabelVolume::zeros(&g);
        v[(2, 2, 2)] = 1;
        // 源空间的点映射到参考空间时向 +x 移动 1 mm.
        let t = RigidTransform::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let out = resample(&v, &g, &t, Interpolation::NearestNeighbor, 0);
        assert_eq!(out[(2, 2, 3)], 1);
        assert_eq!(out.count(1), 1);
    }

    #[test]
    fn test_outside_gets_default() {
        let g = Geometry::axis_aligned([3, 3, 3], [1.0; 3]);
        let v = LabelVolume::filled(&g, 1);
        let t = RigidTransform::from_translation(Vector3::new(2.0, 0.0, 0.0));
        let out = resample(&v, &g, &t, Interpolation::NearestNeighbor, 0);
        assert_eq!(out.count(1), 9);
        assert_eq!(out[(0, 0, 0)], 0);
    }

    #[test]
    fn test_linear_midpoint() {
        let src_g = Geometry::axis_aligned([2, 1, 1], [1.0; 3]);
        let mut src = ScalarVolume::zeros(&src_g);
        src[(0, 0, 1)] = 10.0;
        let ref_g = Geometry::new([1, 1, 1], [0.5, 0.0, 0.0], [1.0; 3], Matrix3::identity());
        let out = resample(
            &src,
            &ref_g,
            &RigidTransform::identity(),
            Interpolation::Linear,
            -1.0,
        );
        assert_abs_diff_eq!(out[(0, 0, 0)], 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_onto_finer_grid() {
        let coarse = Geometry::axis_aligned([2, 2, 2], [2.0; 3]);
        let mut v = LabelVolume::zeros(&coarse);
        v[(1, 1, 1)] = 7;
        let fine = Geometry::axis_aligned([4, 4, 4], [1.0; 3]);
        let out = resample(
            &v,
            &fine,
            &RigidTransform::identity(),
            Interpolation::NearestNeighbor,
            0,
        );
        // 细网格索引 2 -> 粗网格连续索引 1.0; 索引 3 -> 1.5, 已越界.
        assert_eq!(out[(2, 2, 2)], 7);
        assert_eq!(out[(3, 3, 3)], 0);
        assert_eq!(out[(0, 0, 0)], 0);
    }
}
