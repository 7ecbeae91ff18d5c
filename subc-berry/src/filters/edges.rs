//! Scharr 边缘.

use super::smooth::correlate_axis;
use crate::volume::Intensity;
use ndarray::{ArrayView3, Zip};

/// 中心差分.
const DERIVATIVE: [f32; 3] = [1.0 / 2.0, 0.0, -1.0 / 2.0];

/// Scharr 平滑核.
const SMOOTHING: [f32; 3] = [3.0 / 16.0, 10.0 / 16.0, 3.0 / 16.0];

/// 三维 Scharr 梯度幅值 `sqrt(sum(g_a^2) / 3)`.
///
/// 沿某一轴求导时, 其余两轴做 Scharr 平滑.
pub fn scharr(v: ArrayView3<f32>) -> Intensity {
    let mut acc = Intensity::zeros(v.raw_dim());
    for axis in 0..3 {
        let mut g = v.to_owned();
        for other in 0..3 {
            let kernel: &[f32] = if other == axis { &DERIVATIVE } else { &SMOOTHING };
            g = correlate_axis(g.view(), other, kernel);
        }
        Zip::from(&mut acc).and(&g).for_each(|a, &x| *a += x * x);
    }
    acc.mapv_inplace(|x| (x / 3.0).sqrt());
    acc
}
