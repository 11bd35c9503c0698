//! 体数据几何信息.
//!
//! 物理坐标系采用 LPS (与 ITK 系工具一致). NIfTI 文件头中的仿射矩阵描述的是 RAS
//! 坐标, 读入时将 x, y 两行取反, 写出时再取反回去.

use nalgebra::{Matrix3, Point3, Vector3};
use nifti::NiftiHeader;

use crate::consts::{GEOMETRY_EPS, MM_PER_CM};
use crate::Idx3d;

/// 体数据几何信息: 尺寸, 原点, 体素间距 (毫米) 和方向矩阵.
///
/// `size` 与 `spacing` 均按 `(x, y, z)` 顺序存储, 这与 NIfTI 文件头一致;
/// 而体素数组按 `(z, y, x)` 组织, 见 [`Geometry::shape`].
#[derive(Debug, Clone)]
pub struct Geometry {
    size: [usize; 3],
    origin: Vector3<f64>,
    spacing: [f64; 3],
    direction: Matrix3<f64>,
    /// `(direction * diag(spacing))^-1`, 即物理坐标到连续索引的线性部分.
    physical_to_index: Matrix3<f64>,
}

impl PartialEq for Geometry {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.is_compatible(other)
    }
}

/// 两个向量是否在 [`GEOMETRY_EPS`] 容差内相等.
#[inline]
fn near(a: impl IntoIterator<Item = f64>, b: impl IntoIterator<Item = f64>) -> bool {
    a.into_iter()
        .zip(b)
        .all(|(x, y)| (x - y).abs() <= GEOMETRY_EPS)
}

impl Geometry {
    /// 创建几何信息.
    ///
    /// `spacing` 中的每一项都必须是正有限值, 且 `direction` 必须可逆, 否则程序 panic.
    pub fn new(
        size: [usize; 3],
        origin: [f64; 3],
        spacing: [f64; 3],
        direction: Matrix3<f64>,
    ) -> Self {
        assert!(
            spacing.iter().all(|s| s.is_finite() && *s > 0.0),
            "体素间距必须为正: {spacing:?}"
        );
        let scaled = direction * Matrix3::from_diagonal(&Vector3::from(spacing));
        let physical_to_index = scaled
            .try_inverse()
            .unwrap_or_else(|| panic!("方向矩阵不可逆: {direction}"));
        Self {
            size,
            origin: Vector3::from(origin),
            spacing,
            direction,
            physical_to_index,
        }
    }

    /// 原点为零, 方向为单位阵的几何信息. 主要用于测试和合成数据.
    #[inline]
    pub fn axis_aligned(size: [usize; 3], spacing: [f64; 3]) -> Self {
        Self::new(size, [0.0; 3], spacing, Matrix3::identity())
    }

    /// 体素个数, 按 `(x, y, z)` 顺序.
    #[inline]
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// 体素数组形状, 按 `(z, y, x)` 顺序.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let [x, y, z] = self.size;
        (z, y, x)
    }

    /// 体素总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.size.iter().product()
    }

    /// 是否不含任何体素?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 索引 `(0, 0, 0)` 体素中心的物理坐标.
    #[inline]
    pub fn origin(&self) -> &Vector3<f64> {
        &self.origin
    }

    /// 体素间距, 以毫米为单位, 按 `(x, y, z)` 顺序.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 方向矩阵. 第 `i` 列是第 `i` 个索引轴在物理空间中的方向.
    #[inline]
    pub fn direction(&self) -> &Matrix3<f64> {
        &self.direction
    }

    /// 单个体素的体积, 以立方厘米 (cc) 为单位.
    #[inline]
    pub fn voxel_cc(&self) -> f64 {
        self.spacing.iter().map(|s| s / MM_PER_CM).product()
    }

    /// 两个几何信息是否 "网格兼容": 尺寸相同, 原点, 间距和方向在容差内一致.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.size == other.size
            && near(self.origin.iter().copied(), other.origin.iter().copied())
            && near(self.spacing, other.spacing)
            && near(
                self.direction.iter().copied(),
                other.direction.iter().copied(),
            )
    }

    /// 连续索引 (按 `(x, y, z)` 顺序) 对应的物理坐标.
    #[inline]
    pub fn continuous_to_physical(&self, index: &Vector3<f64>) -> Point3<f64> {
        let scaled = self.direction * Matrix3::from_diagonal(&Vector3::from(self.spacing));
        Point3::from(self.origin + scaled * index)
    }

    /// 体素 `(z, y, x)` 中心的物理坐标.
    #[inline]
    pub fn index_to_physical(&self, (z, y, x): Idx3d) -> Point3<f64> {
        self.continuous_to_physical(&Vector3::new(x as f64, y as f64, z as f64))
    }

    /// 物理坐标对应的连续索引, 按 `(x, y, z)` 顺序. 结果可能越界.
    #[inline]
    pub fn physical_to_continuous(&self, point: &Point3<f64>) -> Vector3<f64> {
        self.physical_to_index * (point.coords - self.origin)
    }

    /// 物理坐标到连续索引的线性映射矩阵.
    #[inline]
    pub fn physical_to_index_matrix(&self) -> &Matrix3<f64> {
        &self.physical_to_index
    }

    /// 几何中心, 即连续索引 `(size - 1) / 2` 处的物理坐标.
    pub fn center(&self) -> Point3<f64> {
        let half = Vector3::from_fn(|i, _| (self.size[i] as f64 - 1.0) / 2.0);
        self.continuous_to_physical(&half)
    }

    /// 从 NIfTI 文件头中解析几何信息.
    ///
    /// 优先使用 sform (`sform_code > 0`), 其次是 qform 四元数, 都没有时方向取单位阵,
    /// 原点取零. 结果转换到 LPS 坐标系.
    pub(crate) fn from_header(header: &NiftiHeader) -> Self {
        let [_, w, h, z, ..] = header.dim;
        let size = [w as usize, h as usize, z as usize].map(|n| n.max(1));
        let [qfac, sx, sy, sz, ..] = header.pixdim;
        let spacing = [sx, sy, sz].map(|s| {
            let s = (s as f64).abs();
            if s.is_finite() && s > 0.0 {
                s
            } else {
                1.0
            }
        });

        let (direction, origin) = if header.sform_code > 0 {
            let rows = [header.srow_x, header.srow_y, header.srow_z];
            let affine = Matrix3::from_fn(|r, c| rows[r][c] as f64);
            let origin = Vector3::from_fn(|r, _| rows[r][3] as f64);
            let inv = Matrix3::from_diagonal(&Vector3::from(spacing.map(|s| 1.0 / s)));
            (affine * inv, origin)
        } else if header.qform_code > 0 {
            let (b, c, d) = (
                header.quatern_b as f64,
                header.quatern_c as f64,
                header.quatern_d as f64,
            );
            let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
            let mut rotation = Matrix3::new(
                a * a + b * b - c * c - d * d,
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
                2.0 * (b * c + a * d),
                a * a + c * c - b * b - d * d,
                2.0 * (c * d - a * b),
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                a * a + d * d - c * c - b * b,
            );
            if qfac < 0.0 {
                rotation.column_mut(2).neg_mut();
            }
            let origin = Vector3::new(
                header.quatern_x as f64,
                header.quatern_y as f64,
                header.quatern_z as f64,
            );
            (rotation, origin)
        } else {
            (Matrix3::identity(), Vector3::zeros())
        };

        let flip = ras_lps_flip();
        let direction = flip * direction;
        let origin = flip * origin;
        let direction = if direction.try_inverse().is_some() {
            direction
        } else {
            log::warn!("NIfTI 文件头中的方向矩阵退化, 改用单位阵");
            Matrix3::identity()
        };
        Self::new(size, origin.into(), spacing, direction)
    }

    /// 生成写出 NIfTI 文件所需的文件头. 仿射信息以 sform 形式写入, 坐标系转换回 RAS.
    ///
    /// `dim` 与 `datatype` 由写出器根据数组填写.
    pub(crate) fn to_header(&self) -> NiftiHeader {
        let flip = ras_lps_flip();
        let affine = flip * self.direction * Matrix3::from_diagonal(&Vector3::from(self.spacing));
        let origin = flip * self.origin;

        let mut header = NiftiHeader::default();
        let [_, px, py, pz, ..] = &mut header.pixdim;
        let [sx, sy, sz] = self.spacing;
        (*px, *py, *pz) = (sx as f32, sy as f32, sz as f32);
        header.sform_code = 1;
        header.qform_code = 0;
        let row = |r: usize| {
            [
                affine[(r, 0)] as f32,
                affine[(r, 1)] as f32,
                affine[(r, 2)] as f32,
                origin[r] as f32,
            ]
        };
        header.srow_x = row(0);
        header.srow_y = row(1);
        header.srow_z = row(2);
        // 毫米 + 秒.
        header.xyzt_units = 2 | 8;
        header
    }
}

/// RAS <-> LPS 坐标变换 (自逆).
#[inline]
fn ras_lps_flip() -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_voxel_volume_cc() {
        let g = Geometry::axis_aligned([4, 4, 4], [0.5, 0.5, 2.0]);
        assert_abs_diff_eq!(g.voxel_cc(), 0.05 * 0.05 * 0.2, epsilon = 1e-12);
        assert_eq!(g.shape(), (4, 4, 4));
        assert_eq!(g.len(), 64);
    }

    #[test]
    fn test_index_physical_roundtrip() {
        let rot = nalgebra::Rotation3::from_euler_angles(0.1, -0.2, 0.3);
        let g = Geometry::new([10, 20, 30], [5.0, -3.0, 12.0], [0.8, 0.8, 3.0], *rot.matrix());
        let p = g.index_to_physical((7, 11, 3));
        let c = g.physical_to_continuous(&p);
        assert_abs_diff_eq!(c.x, 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(c.y, 11.0, epsilon = 1e-9);
        assert_abs_diff_eq!(c.z, 7.0, epsilon = 1e-9);
    }

    #[test]
    fn test_center() {
        let g = Geometry::new([3, 5, 7], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0], Matrix3::identity());
        let c = g.center();
        assert_abs_diff_eq!(c.x, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.y, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.z, 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_compatible() {
        let a = Geometry::axis_aligned([4, 5, 6], [1.0, 1.0, 1.0]);
        let b = Geometry::new([4, 5, 6], [1e-9, 0.0, 0.0], [1.0, 1.0, 1.0], Matrix3::identity());
        let c = Geometry::new([4, 5, 6], [0.5, 0.0, 0.0], [1.0, 1.0, 1.0], Matrix3::identity());
        let d = Geometry::axis_aligned([4, 5, 7], [1.0, 1.0, 1.0]);
        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&c));
        assert!(!a.is_compatible(&d));
    }

    #[test]
    fn test_header_roundtrip() {
        let rot = nalgebra::Rotation3::from_euler_angles(0.0, 0.0, 0.25);
        let g = Geometry::new([8, 9, 10], [10.0, 20.0, -5.0], [0.5, 0.7, 3.0], *rot.matrix());
        let mut header = g.to_header();
        header.dim = [3, 8, 9, 10, 1, 1, 1, 1];
        let back = Geometry::from_header(&header);
        assert!(g.is_compatible(&back), "{g:?} != {back:?}");
    }

    #[test]
    fn test_header_qform() {
        // 绕 z 轴 180 度: b = c = 0, d = 1.
        let mut header = NiftiHeader::default();
        header.dim = [3, 2, 2, 2, 1, 1, 1, 1];
        header.pixdim = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        header.qform_code = 1;
        header.sform_code = 0;
        (header.quatern_b, header.quatern_c, header.quatern_d) = (0.0, 0.0, 1.0);
        (header.quatern_x, header.quatern_y, header.quatern_z) = (3.0, 4.0, 5.0);
        let g = Geometry::from_header(&header);
        // RAS 中 x, y 轴取反, 再转到 LPS 又取反一次, 恰好为单位阵.
        assert_abs_diff_eq!(g.direction()[(0, 0)], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(g.direction()[(1, 1)], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(g.direction()[(2, 2)], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(g.origin().x, -3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(g.origin().y, -4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(g.origin().z, 5.0, epsilon = 1e-9);
    }
}
