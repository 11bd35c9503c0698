//! 精确欧氏距离变换与带符号距离图.
//!
//! 采用 Felzenszwalb & Huttenlocher 的可分离下包络算法, 依次沿 x, y, z 三个方向
//! 各做一次一维平方距离变换. 各方向的体素间距作为权重参与计算, 因此结果是物理距离.
//!
//! 参考论文: "Distance Transforms of Sampled Functions", Theory of Computing, 2012.

use ndarray::{Array3, Axis, Zip};

use super::{GridAttr, LabelVolume, ScalarVolume, Volume};
use crate::consts::FAR_AWAY;

/// 一维平方距离变换.
///
/// `f` 为采样函数 (前景为 0, 背景为 `+inf`), `h` 为采样间距.
/// 计算 `d[q] = min_p (h (q - p))^2 + f[p]`, 写回 `f`.
/// `v`, `z` 为复用的缓冲区.
fn lower_envelope(f: &mut [f64], h: f64, d: &mut Vec<f64>, v: &mut Vec<usize>, z: &mut Vec<f64>) {
    let n = f.len();
    let h2 = h * h;
    v.clear();
    z.clear();

    for q in 0..n {
        if !f[q].is_finite() {
            continue;
        }
        let fq = f[q] + h2 * (q * q) as f64;
        loop {
            let Some(&p) = v.last() else {
                v.push(q);
                z.push(f64::NEG_INFINITY);
                break;
            };
            let fp = f[p] + h2 * (p * p) as f64;
            let s = (fq - fp) / (2.0 * h2 * (q - p) as f64);
            // `z` 与 `v` 同长且非空.
            if z.last().is_some_and(|&last| s <= last) {
                v.pop();
                z.pop();
                continue;
            }
            v.push(q);
            z.push(s);
            break;
        }
    }

    if v.is_empty() {
        // 整条线都是背景, 保持 +inf.
        return;
    }

    d.clear();
    let mut j = 0;
    for q in 0..n {
        while j + 1 < v.len() && z[j + 1] < q as f64 {
            j += 1;
        }
        let p = v[j];
        let dq = h * (q as f64 - p as f64);
        d.push(dq * dq + f[p]);
    }
    f.copy_from_slice(d);
}

/// 沿 `axis` 方向对 `data` 的每条一维线做平方距离变换.
fn transform_axis(data: &mut Array3<f64>, axis: usize, h: f64) {
    let op = |mut lane: ndarray::ArrayViewMut1<f64>| {
        let mut f: Vec<f64> = lane.iter().copied().collect();
        let (mut d, mut v, mut z) = (Vec::new(), Vec::new(), Vec::new());
        lower_envelope(&mut f, h, &mut d, &mut v, &mut z);
        lane.iter_mut().zip(f).for_each(|(dst, src)| *dst = src);
    };
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::from(data.lanes_mut(Axis(axis))).par_for_each(op);
        } else {
            Zip::from(data.lanes_mut(Axis(axis))).for_each(op);
        }
    }
}

/// 计算平方欧氏距离变换: 每个体素到最近的 `true` 体素的平方距离.
///
/// `spacing` 按 `(x, y, z)` 顺序给出. 若没有任何 `true` 体素, 所有结果均为 `+inf`.
pub fn squared_edt(mask: &Array3<bool>, spacing: [f64; 3]) -> Array3<f64> {
    let mut data = mask.map(|&b| if b { 0.0 } else { f64::INFINITY });
    let [sx, sy, sz] = spacing;
    // 数组按 (z, y, x) 组织.
    transform_axis(&mut data, 2, sx);
    transform_axis(&mut data, 1, sy);
    transform_axis(&mut data, 0, sz);
    data
}

/// 提取轮廓: 至少有一个 6-邻域点为背景的前景体素. 图像外部不视为背景.
pub fn contour(mask: &Array3<bool>) -> Array3<bool> {
    let (nz, ny, nx) = mask.dim();
    let mut ans = Array3::from_elem(mask.dim(), false);
    for ((z, y, x), &fg) in mask.indexed_iter() {
        if !fg {
            continue;
        }
        let neighbours = [
            (z > 0).then(|| (z - 1, y, x)),
            (z + 1 < nz).then(|| (z + 1, y, x)),
            (y > 0).then(|| (z, y - 1, x)),
            (y + 1 < ny).then(|| (z, y + 1, x)),
            (x > 0).then(|| (z, y, x - 1)),
            (x + 1 < nx).then(|| (z, y, x + 1)),
        ];
        ans[(z, y, x)] = neighbours.into_iter().flatten().any(|p| !mask[p]);
    }
    ans
}

/// 网格最外层的体素.
fn grid_border((nz, ny, nx): (usize, usize, usize)) -> Array3<bool> {
    Array3::from_shape_fn((nz, ny, nx), |(z, y, x)| {
        z == 0 || y == 0 || x == 0 || z + 1 == nz || y + 1 == ny || x + 1 == nx
    })
}

/// 带符号距离图: 每个体素到 `label` 中值为 `foreground` 的区域轮廓的距离.
///
/// 区域内部为负, 轮廓上为 0, 外部为正. `use_spacing` 为 `true` 时以毫米为单位,
/// 否则以体素为单位. 若前景为空, 所有体素均为 `+inf`; 若前景占满整个网格,
/// 以网格最外层体素为轮廓.
pub fn signed_distance_map(label: &LabelVolume, foreground: u16, use_spacing: bool) -> ScalarVolume {
    let mask = label.foreground(foreground);
    if !mask.iter().any(|&b| b) {
        return ScalarVolume::filled(label.geometry(), FAR_AWAY);
    }

    let spacing = if use_spacing {
        label.pix_dim()
    } else {
        [1.0; 3]
    };
    let mut edge = contour(&mask);
    if !edge.iter().any(|&b| b) {
        edge = grid_border(mask.dim());
    }
    let sq = squared_edt(&edge, spacing);
    let mut data = Array3::<f32>::zeros(mask.dim());
    Zip::from(&mut data)
        .and(&sq)
        .and(&mask)
        .for_each(|d, &s, &inside| {
            let s = s.sqrt() as f32;
            *d = if inside { -s } else { s };
        });
    Volume {
        geometry: label.geometry().clone(),
        data,
    }
}
