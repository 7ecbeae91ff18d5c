//! 平滑滤波.
//!
//! 均按 z 切片独立进行 (高斯只作用在 h/w 两个轴上), 边界按 `nearest` 延拓.

use crate::config::SmoothConfig;
use crate::volume::{self, Intensity};
use ndarray::{ArrayView3, Axis, Zip};

/// 高斯核截断半径 (以标准差为单位).
const TRUNCATE: f64 = 3.0;

/// 沿 `axis` 做一维相关, `kernel` 长度为奇数且以中心对齐, 边界按 `nearest` 延拓.
pub(crate) fn correlate_axis(v: ArrayView3<f32>, axis: usize, kernel: &[f32]) -> Intensity {
    debug_assert!(kernel.len() % 2 == 1);
    let radius = (kernel.len() / 2) as isize;
    let mut out = Intensity::zeros(v.raw_dim());

    let apply = |mut dst: ndarray::ArrayViewMut1<f32>, src: ndarray::ArrayView1<f32>| {
        let n = src.len() as isize;
        for (k, d) in dst.iter_mut().enumerate() {
            *d = kernel
                .iter()
                .enumerate()
                .map(|(t, &w)| {
                    let j = (k as isize + t as isize - radius).clamp(0, n - 1);
                    w * src[j as usize]
                })
                .sum();
        }
    };

    let zip = Zip::from(out.lanes_mut(Axis(axis))).and(v.lanes(Axis(axis)));
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            zip.par_for_each(apply);
        } else {
            zip.for_each(apply);
        }
    }
    out
}

/// 离散化的一维归一化高斯核.
fn gaussian_kernel(sigma: f64) -> Vec<f32> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let raw: Vec<f64> = (-radius..=radius)
        .map(|x| (-(x * x) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| (w / total) as f32).collect()
}

/// 逐切片高斯平滑. `sigma` 为 0 时原样复制.
pub fn gaussian(v: ArrayView3<f32>, sigma: f64) -> Intensity {
    if sigma <= 0.0 || v.is_empty() {
        return v.to_owned();
    }
    let kernel = gaussian_kernel(sigma);
    let rows = correlate_axis(v, 1, &kernel);
    correlate_axis(rows.view(), 2, &kernel)
}

/// 逐切片中值滤波, 窗口为 `size x size`. `size` 不大于 1 时原样复制.
///
/// 偶数窗口取排序后下标为 `len / 2` 的元素.
pub fn median(v: ArrayView3<f32>, size: usize) -> Intensity {
    if size <= 1 || v.is_empty() {
        return v.to_owned();
    }
    let lo = (size / 2) as isize;
    let hi = (size - size / 2) as isize;

    volume::map_slabs(v, |slab| {
        let (_, height, width) = slab.dim();
        let mut window = Vec::with_capacity(size * size);
        Intensity::from_shape_fn(slab.raw_dim(), |(_, h, w)| {
            window.clear();
            for dh in -lo..hi {
                for dw in -lo..hi {
                    let hh = (h as isize + dh).clamp(0, height as isize - 1) as usize;
                    let ww = (w as isize + dw).clamp(0, width as isize - 1) as usize;
                    window.push(slab[(0, hh, ww)]);
                }
            }
            let mid = window.len() / 2;
            *window.select_nth_unstable_by(mid, f32::total_cmp).1
        })
    })
}

/// 先中值后高斯.
pub fn smooth(v: ArrayView3<f32>, cfg: &SmoothConfig) -> Intensity {
    let m = median(v, cfg.median_size);
    gaussian(m.view(), cfg.gauss_sigma)
}

/// 最小-最大归一化后平滑.
pub fn scale_and_smooth(v: ArrayView3<f32>, cfg: &SmoothConfig) -> Intensity {
    let n = volume::normalize(v);
    smooth(n.view(), cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_gaussian_preserves_constant_and_mass_center() {
        let v = Intensity::from_elem((2, 8, 8), 3.0);
        let g = gaussian(v.view(), 1.5);
        assert!(g.iter().all(|&x| (x - 3.0).abs() < 1e-5));

        let mut v = Intensity::zeros((2, 9, 9));
        v[(1, 4, 4)] = 1.0;
        let g = gaussian(v.view(), 1.0);
        // 只在切片内扩散
        assert!(g.index_axis(Axis(0), 0).iter().all(|&x| x == 0.0));
        assert!(g[(1, 4, 4)] > g[(1, 4, 5)]);
        assert!((g[(1, 4, 5)] - g[(1, 5, 4)]).abs() < 1e-7);
        assert!((g.sum() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_median_removes_salt() {
        let mut v = Intensity::zeros((1, 5, 5));
        v[(0, 2, 2)] = 100.0;
        let m = median(v.view(), 3);
        assert!(m.iter().all(|&x| x == 0.0));

        let v = Array3::from_shape_fn((1, 4, 4), |(_, h, _)| h as f32);
        assert_eq!(median(v.view(), 1), v);
    }
}
