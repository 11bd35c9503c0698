//! 三维刚体变换.

use nalgebra::{Matrix3, Point3, Rotation3, Vector3};

/// 绕中心 `c` 的刚体变换: `T(p) = R (p - c) + c + t`.
///
/// 旋转由三个欧拉角 `(rx, ry, rz)` 给出, `R = Rz * Ry * Rx`.
/// 六个参数按 `[rx, ry, rz, tx, ty, tz]` 排列, 角度以弧度为单位, 平移以毫米为单位.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    rotation: Rotation3<f64>,
    center: Point3<f64>,
    translation: Vector3<f64>,
}

impl Default for RigidTransform {
    #[inline]
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// 恒等变换.
    #[inline]
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            center: Point3::origin(),
            translation: Vector3::zeros(),
        }
    }

    /// 纯平移.
    #[inline]
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    /// 由旋转中心和六个参数 `[rx, ry, rz, tx, ty, tz]` 创建.
    pub fn from_parameters(center: Point3<f64>, params: &[f64; 6]) -> Self {
        let [rx, ry, rz, tx, ty, tz] = *params;
        Self {
            rotation: Rotation3::from_euler_angles(rx, ry, rz),
            center,
            translation: Vector3::new(tx, ty, tz),
        }
    }

    /// 六个参数 `[rx, ry, rz, tx, ty, tz]`.
    pub fn parameters(&self) -> [f64; 6] {
        let (rx, ry, rz) = self.rotation.euler_angles();
        let t = &self.translation;
        [rx, ry, rz, t.x, t.y, t.z]
    }

    /// 旋转中心.
    #[inline]
    pub fn center(&self) -> &Point3<f64> {
        &self.center
    }

    /// 平移分量 `t`.
    #[inline]
    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    /// 旋转矩阵 `R`.
    #[inline]
    pub fn matrix(&self) -> &Matrix3<f64> {
        self.rotation.matrix()
    }

    /// 与旋转中心无关的等价偏移量: `T(p) = R p + offset`.
    #[inline]
    pub fn offset(&self) -> Vector3<f64> {
        self.center.coords + self.translation - self.rotation * self.center.coords
    }

    /// 变换一个物理坐标点.
    #[inline]
    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        self.center + self.rotation * (p - self.center) + self.translation
    }

    /// 逆变换. 旋转中心保持不变.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            translation: -(rotation * self.translation),
            rotation,
            center: self.center,
        }
    }

    /// 是否为恒等变换 (容差 `1e-12`)?
    pub fn is_identity(&self) -> bool {
        (self.rotation.matrix() - Matrix3::identity()).amax() <= 1e-12
            && self.translation.amax() <= 1e-12
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_inverse_roundtrip() {
        let t = RigidTransform::from_parameters(
            Point3::new(10.0, -4.0, 2.0),
            &[0.1, -0.3, 0.7, 5.0, 1.5, -2.0],
        );
        let inv = t.inverse();
        let p = Point3::new(3.0, 8.0, -1.0);
        let q = inv.apply(&t.apply(&p));
        assert_abs_diff_eq!((q - p).norm(), 0.0, epsilon = 1e-9);
        assert!(!t.is_identity());
    }

    #[test]
    fn test_parameters_roundtrip() {
        let params = [0.2, 0.1, -0.4, 1.0, 2.0, 3.0];
        let t = RigidTransform::from_parameters(Point3::origin(), &params);
        for (a, b) in t.parameters().iter().zip(params) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_offset_independent_of_center() {
        let t = RigidTransform::from_parameters(
            Point3::new(1.0, 2.0, 3.0),
            &[0.0, 0.0, std::f64::consts::FRAC_PI_2, 0.0, 0.0, 0.0],
        );
        let p = Point3::new(5.0, -1.0, 4.0);
        let by_offset = t.matrix() * p.coords + t.offset();
        assert_abs_diff_eq!((t.apply(&p).coords - by_offset).norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_translation() {
        let t = RigidTransform::from_translation(Vector3::new(1.0, 0.0, -2.0));
        let p = t.apply(&Point3::new(0.0, 0.0, 0.0));
        assert_eq!(p, Point3::new(1.0, 0.0, -2.0));
        assert!(RigidTransform::identity().is_identity());
    }
}
