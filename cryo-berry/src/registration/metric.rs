//! 互信息度量 (Mattes 风格).
//!
//! 固定影像强度采用零阶 (矩形) 分箱, 运动影像强度采用一阶 (三角) Parzen 窗分箱,
//! 运动影像以三线性插值取值. 梯度为解析形式.
//!
//! 可选的运动空间掩膜: 采样点映射到运动影像后, 若落在掩膜之外则不参与计算.

use nalgebra::{Matrix3, Point3, Rotation3, Vector3};

use super::optimizer::{Params, N_PARAMS};
use crate::consts::label::BACKGROUND;
use crate::{GridAttr, LabelVolume, ScalarVolume};

/// 有限差分求旋转矩阵对欧拉角导数时的步长.
const ANGLE_EPS: f64 = 1e-6;

/// 一个采样点: 固定影像中的物理坐标和对应的固定强度箱号.
#[derive(Debug, Clone, Copy)]
struct Sample {
    point: Point3<f64>,
    bin: usize,
}

/// 在固定采样点集合上计算的互信息.
pub(crate) struct MutualInformation<'a> {
    moving: &'a ScalarVolume,
    /// 与 `moving` 网格兼容的掩膜.
    moving_mask: Option<&'a LabelVolume>,
    samples: Vec<Sample>,
    bins: usize,
    moving_min: f64,
    /// 运动强度每个箱的宽度. 为 0 时运动影像为常数.
    moving_width: f64,
    center: Point3<f64>,
}

/// 三线性插值值及其在连续索引空间 `(x, y, z)` 下的梯度.
fn interpolate_with_gradient(volume: &ScalarVolume, c: &Vector3<f64>) -> (f64, Vector3<f64>) {
    let size = volume.geometry().size();
    let mut lo = [0usize; 3];
    let mut hi = [0usize; 3];
    let mut frac = [0.0f64; 3];
    for i in 0..3 {
        if size[i] == 1 {
            continue;
        }
        let v = c[i].clamp(0.0, (size[i] - 1) as f64);
        let l = (v.floor() as usize).min(size[i] - 2);
        lo[i] = l;
        hi[i] = l + 1;
        frac[i] = v - l as f64;
    }
    let at = |x: usize, y: usize, z: usize| volume[(z, y, x)] as f64;
    let [fx, fy, fz] = frac;
    let c000 = at(lo[0], lo[1], lo[2]);
    let c100 = at(hi[0], lo[1], lo[2]);
    let c010 = at(lo[0], hi[1], lo[2]);
    let c110 = at(hi[0], hi[1], lo[2]);
    let c001 = at(lo[0], lo[1], hi[2]);
    let c101 = at(hi[0], lo[1], hi[2]);
    let c011 = at(lo[0], hi[1], hi[2]);
    let c111 = at(hi[0], hi[1], hi[2]);

    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
    let c00 = lerp(c000, c100, fx);
    let c10 = lerp(c010, c110, fx);
    let c01 = lerp(c001, c101, fx);
    let c11 = lerp(c011, c111, fx);
    let c0 = lerp(c00, c10, fy);
    let c1 = lerp(c01, c11, fy);
    let value = lerp(c0, c1, fz);

    let dx = lerp(
        lerp(c100 - c000, c110 - c010, fy),
        lerp(c101 - c001, c111 - c011, fy),
        fz,
    );
    let dy = lerp(c10 - c00, c11 - c01, fz);
    let dz = c1 - c0;
    (value, Vector3::new(dx, dy, dz))
}

/// 旋转矩阵对三个欧拉角的偏导数 (中心差分).
fn rotation_jacobian(params: &Params) -> [Matrix3<f64>; 3] {
    let [rx, ry, rz, ..] = *params;
    let angles = [rx, ry, rz];
    std::array::from_fn(|k| {
        let mut plus = angles;
        let mut minus = angles;
        plus[k] += ANGLE_EPS;
        minus[k] -= ANGLE_EPS;
        let p = Rotation3::from_euler_angles(plus[0], plus[1], plus[2]);
        let m = Rotation3::from_euler_angles(minus[0], minus[1], minus[2]);
        (p.matrix() - m.matrix()) / (2.0 * ANGLE_EPS)
    })
}

impl<'a> MutualInformation<'a> {
    /// 以固定影像中的采样点 `points` 创建度量.
    ///
    /// `center` 为刚体变换的旋转中心. 采样点对应的固定强度由 `fixed` 给出.
    /// `moving_mask` 必须与 `moving` 网格兼容.
    pub(crate) fn new(
        fixed: &ScalarVolume,
        moving: &'a ScalarVolume,
        moving_mask: Option<&'a LabelVolume>,
        points: &[crate::Idx3d],
        bins: usize,
        center: Point3<f64>,
    ) -> Self {
        let values: Vec<f64> = points.iter().map(|&p| fixed[p] as f64).collect();
        let (fmin, fmax) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let fwidth = (fmax - fmin) / bins as f64;
        let samples = points
            .iter()
            .zip(values)
            .map(|(&p, v)| {
                let bin = if fwidth > 0.0 {
                    (((v - fmin) / fwidth) as usize).min(bins - 1)
                } else {
                    0
                };
                Sample {
                    point: fixed.geometry().index_to_physical(p),
                    bin,
                }
            })
            .collect();

        let (mmin, mmax) = moving
            .min_max()
            .map_or((0.0, 0.0), |(lo, hi)| (lo as f64, hi as f64));
        let moving_width = (mmax - mmin) / (bins - 1) as f64;

        Self {
            moving,
            moving_mask,
            samples,
            bins,
            moving_min: mmin,
            moving_width,
            center,
        }
    }

    /// 采样点个数.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    /// 计算参数 `params` (固定 -> 运动的刚体变换) 处的互信息及其梯度.
    ///
    /// 若没有任何采样点落在运动影像 (及其掩膜) 内部, 返回 `None`.
    pub(crate) fn value_and_derivative(&self, params: &Params) -> Option<(f64, Params)> {
        let bins = self.bins;
        let [rx, ry, rz, tx, ty, tz] = *params;
        let rotation = Rotation3::from_euler_angles(rx, ry, rz);
        let translation = Vector3::new(tx, ty, tz);
        let d_rotation = rotation_jacobian(params);
        let geometry = self.moving.geometry();
        let to_index = geometry.physical_to_index_matrix().transpose();
        let size = geometry.size();

        let mut joint = vec![0.0f64; bins * bins];
        let mut d_joint = vec![[0.0f64; N_PARAMS]; bins * bins];
        let mut valid = 0usize;

        for sample in &self.samples {
            let rel = sample.point - self.center;
            let mapped = self.center + rotation * rel + translation;
            let c = geometry.physical_to_continuous(&mapped);
            if (0..3).any(|i| c[i] < 0.0 || c[i] > (size[i] - 1) as f64) {
                continue;
            }
            if let Some(mask) = self.moving_mask {
                let nearest = (c.z.round() as usize, c.y.round() as usize, c.x.round() as usize);
                if mask[nearest] == BACKGROUND {
                    continue;
                }
            }
            valid += 1;

            let (value, grad_index) = interpolate_with_gradient(self.moving, &c);
            let mut d_value = [0.0f64; N_PARAMS];
            if self.moving_width > 0.0 {
                let grad = to_index * grad_index;
                for k in 0..3 {
                    d_value[k] = grad.dot(&(d_rotation[k] * rel));
                }
                d_value[3..].copy_from_slice(grad.as_slice());
            }

            let row = sample.bin * bins;
            let (j0, frac, dzeta) = if self.moving_width > 0.0 {
                let zeta = ((value - self.moving_min) / self.moving_width).clamp(0.0, (bins - 1) as f64);
                let j0 = (zeta.floor() as usize).min(bins - 2);
                (j0, zeta - j0 as f64, 1.0 / self.moving_width)
            } else {
                (0, 0.0, 0.0)
            };
            joint[row + j0] += 1.0 - frac;
            joint[row + j0 + 1] += frac;
            for k in 0..N_PARAMS {
                let dw = dzeta * d_value[k];
                d_joint[row + j0][k] -= dw;
                d_joint[row + j0 + 1][k] += dw;
            }
        }

        if valid == 0 {
            return None;
        }
        let n = valid as f64;
        let mut fixed_marginal = vec![0.0f64; bins];
        let mut moving_marginal = vec![0.0f64; bins];
        for i in 0..bins {
            for j in 0..bins {
                let p = joint[i * bins + j] / n;
                fixed_marginal[i] += p;
                moving_marginal[j] += p;
            }
        }

        let mut value = 0.0;
        let mut derivative = [0.0f64; N_PARAMS];
        for i in 0..bins {
            for j in 0..bins {
                let p = joint[i * bins + j] / n;
                if p <= 0.0 {
                    continue;
                }
                value += p * (p / (fixed_marginal[i] * moving_marginal[j])).ln();
                let ratio = (p / moving_marginal[j]).ln();
                for k in 0..N_PARAMS {
                    derivative[k] += d_joint[i * bins + j][k] / n * ratio;
                }
            }
        }
        Some((value, derivative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Geometry;
    use approx::assert_abs_diff_eq;

    fn ramp() -> ScalarVolume {
        let g = Geometry::axis_aligned([12, 12, 12], [1.0; 3]);
        let mut v = ScalarVolume::zeros(&g);
        for ((z, y, x), p) in v.data_mut().indexed_iter_mut() {
            *p = (x * x + 2 * y + 3 * z) as f32;
        }
        v
    }

    #[test]
    fn test_interpolate_gradient_linear_field() {
        let g = Geometry::axis_aligned([4, 4, 4], [1.0; 3]);
        let mut v = ScalarVolume::zeros(&g);
        for ((z, y, x), p) in v.data_mut().indexed_iter_mut() {
            *p = (x + 2 * y + 3 * z) as f32;
        }
        let (value, grad) = interpolate_with_gradient(&v, &Vector3::new(1.25, 2.5, 0.75));
        assert_abs_diff_eq!(value, 1.25 + 5.0 + 2.25, epsilon = 1e-9);
        assert_abs_diff_eq!(grad.x, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(grad.y, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(grad.z, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let fixed = ramp();
        let moving = ramp();
        let points: Vec<_> = fixed
            .data()
            .indexed_iter()
            .filter_map(|(p, _)| {
                let (z, y, x) = p;
                ((2..10).contains(&z) && (2..10).contains(&y) && (2..10).contains(&x)).then_some(p)
            })
            .collect();
        let mi = MutualInformation::new(&fixed, &moving, None, &points, 16, fixed.geometry().center());
        assert_eq!(mi.len(), 512);

        let params = [0.01, -0.02, 0.015, 0.3, -0.2, 0.1];
        let (_, grad) = mi.value_and_derivative(&params).unwrap();
        let h = 1e-5;
        for k in [3, 4, 5] {
            let mut plus = params;
            let mut minus = params;
            plus[k] += h;
            minus[k] -= h;
            let vp = mi.value_and_derivative(&plus).unwrap().0;
            let vm = mi.value_and_derivative(&minus).unwrap().0;
            let fd = (vp - vm) / (2.0 * h);
            assert_abs_diff_eq!(grad[k], fd, epsilon = 1e-3 * (1.0 + fd.abs()));
        }
    }

    #[test]
    fn test_identity_has_higher_mi() {
        let fixed = ramp();
        let moving = ramp();
        let points: Vec<_> = fixed.data().indexed_iter().map(|(p, _)| p).collect();
        let mi = MutualInformation::new(&fixed, &moving, None, &points, 20, fixed.geometry().center());
        let aligned = mi.value_and_derivative(&[0.0; N_PARAMS]).unwrap().0;
        let shifted = mi
            .value_and_derivative(&[0.0, 0.0, 0.0, 2.5, 0.0, 0.0])
            .unwrap()
            .0;
        assert!(aligned > shifted, "{aligned} <= {shifted}");
    }

    #[test]
    fn test_moving_mask_restricts_samples() {
        let fixed = ramp();
        let moving = ramp();
        let points: Vec<_> = fixed.data().indexed_iter().map(|(p, _)| p).collect();
        // 只保留运动影像中 x < 6 的一半.
        let mut mask = LabelVolume::zeros(moving.geometry());
        for ((_, _, x), p) in mask.data_mut().indexed_iter_mut() {
            *p = u16::from(x < 6);
        }
        let full = MutualInformation::new(&fixed, &moving, None, &points, 16, Point3::origin());
        let masked =
            MutualInformation::new(&fixed, &moving, Some(&mask), &points, 16, Point3::origin());
        let a = full.value_and_derivative(&[0.0; N_PARAMS]).unwrap().0;
        let b = masked.value_and_derivative(&[0.0; N_PARAMS]).unwrap().0;
        assert!((a - b).abs() > 1e-6, "{a} == {b}");

        // 平移 +8 mm 后, 所有映射点都落在 x >= 8, 掩膜之外.
        assert!(masked
            .value_and_derivative(&[0.0, 0.0, 0.0, 8.0, 0.0, 0.0])
            .is_none());
        assert!(full
            .value_and_derivative(&[0.0, 0.0, 0.0, 8.0, 0.0, 0.0])
            .is_some());
    }

    #[test]
    fn test_no_overlap() {
        let fixed = ramp();
        let moving = ramp();
        let points = vec![(0, 0, 0)];
        let mi = MutualInformation::new(&fixed, &moving, None, &points, 8, Point3::origin());
        assert!(mi
            .value_and_derivative(&[0.0, 0.0, 0.0, -50.0, 0.0, 0.0])
            .is_none());
    }
}
