use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView3, ArrayViewMut3, Axis, Ix3, IxDyn};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::consts::label::BACKGROUND;
use crate::{Error, Idx3d, Result};

pub mod distance;
pub mod geometry;
pub mod morph;
pub mod resample;
pub mod stats;
pub mod transform;

pub use geometry::Geometry;

/// 3D 体数据, 包括几何信息和体素数组. 数组按 `(z, y, x)` 组织.
///
/// 体数据是值类型: 除了冷冻时长图的原位累加之外, 所有操作都返回新的体数据.
#[derive(Debug, Clone)]
pub struct Volume<T> {
    geometry: Geometry,
    data: Array3<T>,
}

/// 标签体数据. 体素值为非负整数标签.
pub type LabelVolume = Volume<u16>;

/// 标量体数据, 例如影像强度, 距离图或冷冻时长图.
pub type ScalarVolume = Volume<f32>;

/// 带几何信息的 3D 体数据共用属性.
pub trait GridAttr {
    /// 获取几何信息.
    fn geometry(&self) -> &Geometry;

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        self.geometry().len()
    }

    /// 获取单个体素分辨率, 以毫米为单位, 按 `(x, y, z)` 顺序.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        self.geometry().spacing()
    }

    /// 获取体素的实际体积值, 以立方厘米为单位.
    #[inline]
    fn voxel_cc(&self) -> f64 {
        self.geometry().voxel_cc()
    }

    /// 与另一个体数据是否网格兼容?
    #[inline]
    fn is_grid_compatible<G: GridAttr + ?Sized>(&self, other: &G) -> bool {
        self.geometry().is_compatible(other.geometry())
    }
}

impl<T> GridAttr for Volume<T> {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

impl GridAttr for Geometry {
    #[inline]
    fn geometry(&self) -> &Geometry {
        self
    }
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<Idx3d> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl<T> Volume<T> {
    /// 由几何信息和 `(z, y, x)` 组织的数组创建体数据.
    ///
    /// 若数组形状与几何信息不一致, 则返回 `Err`.
    pub fn from_array(geometry: Geometry, data: Array3<T>) -> Result<Self> {
        if data.dim() != geometry.shape() {
            return Err(Error::GridMismatch("数组形状与几何信息不一致"));
        }
        Ok(Self { geometry, data })
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, T> {
        self.data.view_mut()
    }

}

impl<T: Clone> Volume<T> {
    /// 创建所有体素均为 `value` 的体数据.
    #[inline]
    pub fn filled(geometry: &Geometry, value: T) -> Self {
        Self {
            data: Array3::from_elem(geometry.shape(), value),
            geometry: geometry.clone(),
        }
    }

    /// 逐体素映射为新的体数据, 几何信息不变.
    #[inline]
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Volume<U> {
        Volume {
            geometry: self.geometry.clone(),
            data: self.data.map(f),
        }
    }
}

impl<T: Clone + num::Zero> Volume<T> {
    /// 创建全零体数据.
    #[inline]
    pub fn zeros(geometry: &Geometry) -> Self {
        Self::filled(geometry, T::zero())
    }
}

/// 为指定体素类型实现 NIfTI 读写.
macro_rules! impl_nifti_io {
    ($t: ty) => {
        impl Volume<$t> {
            /// 打开 NIfTI 文件格式的体数据. `path` 为 `.nii` 或 `.nii.gz` 文件的本地路径.
            ///
            /// 体素值按需转换为目标类型 (并应用 `scl_slope`/`scl_inter`).
            /// 多余的单例维度 (如 `[W, H, z, 1]`) 会被去掉.
            pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
                let obj = ReaderOptions::new().read_file(path.as_ref())?;
                let geometry = Geometry::from_header(obj.header());
                let [w, h, z] = geometry.size();

                let data = obj.into_volume().into_ndarray::<$t>()?;
                let data = if data.ndim() == 3 {
                    data
                } else {
                    data.into_shape(IxDyn(&[w, h, z]))?
                };

                // [W, H, z] -> [z, H, W].
                let data = data
                    .permuted_axes([2, 1, 0].as_slice())
                    .into_dimensionality::<Ix3>()?;
                let data = if data.is_standard_layout() {
                    data
                } else {
                    data.as_standard_layout().into_owned()
                };
                Self::from_array(geometry, data)
            }

            /// 以 NIfTI 文件格式保存体数据. 文件名以 `.gz` 结尾时会压缩.
            pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
                let header = self.geometry.to_header();
                // [z, H, W] -> [W, H, z].
                let view = self.data.view().permuted_axes([2, 1, 0]);
                WriterOptions::new(path.as_ref())
                    .reference_header(&header)
                    .write_nifti(&view)?;
                Ok(())
            }
        }
    };
}

impl_nifti_io!(u16);
impl_nifti_io!(f32);

impl LabelVolume {
    /// 获取 3D 标注中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u16) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 统计每个标签值的体素个数, 包括背景.
    pub fn label_counts(&self) -> BTreeMap<u16, usize> {
        let mut ans = BTreeMap::new();
        for &p in self.data.iter() {
            *ans.entry(p).or_insert(0) += 1;
        }
        ans
    }

    /// 值为 `label` 的体素构成的布尔掩膜.
    #[inline]
    pub fn foreground(&self, label: u16) -> Array3<bool> {
        self.data.map(|&p| p == label)
    }

    /// 将 `mask` 中为背景的位置清零, 其余保持原值.
    ///
    /// 两者必须网格兼容, 否则返回 `Err`.
    pub fn mask_by(&self, mask: &LabelVolume) -> Result<Self> {
        if !self.is_grid_compatible(mask) {
            return Err(Error::GridMismatch("掩膜与标注网格不兼容"));
        }
        let mut ans = self.clone();
        ndarray::Zip::from(&mut ans.data)
            .and(&mask.data)
            .for_each(|p, &m| {
                if m == BACKGROUND {
                    *p = BACKGROUND;
                }
            });
        Ok(ans)
    }
}

impl ScalarVolume {
    /// 获取最小值和最大值. 忽略 NaN; 若没有有效值, 返回 `None`.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl LabelVolume {
    /// 借助 `rayon`, 并行地获取值为 `label` 的体素个数.
    pub fn par_count(&self, label: u16) -> usize {
        let cnt = AtomicUsize::new(0);
        self.data
            .axis_iter(Axis(0))
            .into_par_iter()
            .for_each(|v| {
                let local = v.iter().filter(|p| **p == label).count();
                cnt.fetch_add(local, Ordering::Release);
            });
        cnt.load(Ordering::Acquire)
    }
}

/// 按 z 方向逐切片地填充 `data`. `op(z, slice)` 负责填充第 `z` 层.
/// 启用 `rayon` 时并行执行.
pub(crate) fn fill_slices<T, F>(data: &mut Array3<T>, op: F)
where
    T: Send + Sync,
    F: Fn(usize, ndarray::ArrayViewMut2<T>) + Sync + Send,
{
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            data.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(z, s)| op(z, s));
        } else {
            data.axis_iter_mut(Axis(0))
                .enumerate()
                .for_each(|(z, s)| op(z, s));
        }
    }
}
