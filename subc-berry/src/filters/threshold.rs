//! 全局阈值与对数变换.
//!
//! 所有阈值函数都只统计有限值, 输入为空或为常量时返回 `None`,
//! 由调用方决定如何退化 (通常是得到空掩膜).

use crate::volume::{self, Intensity};
use ndarray::ArrayView3;
use ordered_float::OrderedFloat;

/// 直方图分箱数.
const NBINS: usize = 256;

/// Li 迭代次数上限.
const LI_MAX_ITER: usize = 1000;

/// 等宽直方图.
struct Histogram {
    counts: Vec<u64>,
    lo: f64,
    width: f64,
}

impl Histogram {
    /// 统计 `values`. 常量或空输入返回 `None`.
    fn new(values: &[f32]) -> Option<Self> {
        let (lo, hi) = values.iter().fold(None, |acc: Option<(f32, f32)>, &v| match acc {
            None => Some((v, v)),
            Some((a, b)) => Some((a.min(v), b.max(v))),
        })?;
        if hi <= lo {
            return None;
        }
        let (lo, hi) = (lo as f64, hi as f64);
        let width = (hi - lo) / NBINS as f64;
        let mut counts = vec![0u64; NBINS];
        for &v in values {
            let b = (((v as f64 - lo) / width) as usize).min(NBINS - 1);
            counts[b] += 1;
        }
        Some(Self { counts, lo, width })
    }

    /// 第 `i` 个分箱中心.
    #[inline]
    fn center(&self, i: usize) -> f32 {
        (self.lo + (i as f64 + 0.5) * self.width) as f32
    }
}

/// 收集有限值.
pub(crate) fn finite_values(v: ArrayView3<f32>) -> Vec<f32> {
    v.iter().copied().filter(|x| x.is_finite()).collect()
}

/// Otsu 阈值. 返回较低类别最后一个分箱的中心, 前景为 `> threshold` 的部分.
pub fn otsu(values: &[f32]) -> Option<f32> {
    let hist = Histogram::new(values)?;
    let counts: Vec<f64> = hist.counts.iter().map(|&c| c as f64).collect();
    let centers: Vec<f64> = (0..NBINS).map(|i| hist.center(i) as f64).collect();

    let total: f64 = counts.iter().sum();
    let total_mass: f64 = counts.iter().zip(centers.iter()).map(|(c, x)| c * x).sum();

    let mut w1 = 0.0;
    let mut m1 = 0.0;
    let mut best = (f64::NEG_INFINITY, 0usize);
    for i in 0..NBINS - 1 {
        w1 += counts[i];
        m1 += counts[i] * centers[i];
        let w2 = total - w1;
        if w1 == 0.0 || w2 == 0.0 {
            continue;
        }
        let mean1 = m1 / w1;
        let mean2 = (total_mass - m1) / w2;
        let var = w1 * w2 * (mean1 - mean2).powi(2);
        if var > best.0 {
            best = (var, i);
        }
    }
    Some(hist.center(best.1))
}

/// 三角阈值.
pub fn triangle(values: &[f32]) -> Option<f32> {
    let hist = Histogram::new(values)?;
    let mut counts: Vec<f64> = hist.counts.iter().map(|&c| c as f64).collect();

    // 第一个最大值
    let mut peak = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[peak] {
            peak = i;
        }
    }
    let low = counts.iter().position(|&c| c > 0.0)?;
    let high = counts.iter().rposition(|&c| c > 0.0)?;

    let flip = peak - low < high - peak;
    let (low, peak) = if flip {
        counts.reverse();
        (NBINS - high - 1, NBINS - peak - 1)
    } else {
        (low, peak)
    };

    let width = (peak - low) as f64;
    if width == 0.0 {
        return Some(hist.center(if flip { NBINS - peak - 1 } else { peak }));
    }
    let height = counts[peak];
    let norm = (height * height + width * width).sqrt();
    let (height, width) = (height / norm, width / norm);

    let mut level = (f64::NEG_INFINITY, 0usize);
    for x in 0..(peak - low) {
        let len = height * x as f64 - width * counts[x + low];
        if len > level.0 {
            level = (len, x);
        }
    }
    let arg = level.1 + low;
    Some(hist.center(if flip { NBINS - arg - 1 } else { arg }))
}

/// Li 最小交叉熵阈值.
pub fn li(values: &[f32]) -> Option<f32> {
    let mut sorted: Vec<OrderedFloat<f64>> = values.iter().map(|&v| OrderedFloat(v as f64)).collect();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() < 2 {
        return None;
    }
    let tolerance = sorted
        .windows(2)
        .map(|w| w[1].0 - w[0].0)
        .fold(f64::INFINITY, f64::min)
        / 2.0;

    // 平移到非负区间, 保证对数有意义
    let offset = sorted[0].0;
    let shifted: Vec<f64> = values.iter().map(|&v| v as f64 - offset).collect();

    let mut t_next = shifted.iter().sum::<f64>() / shifted.len() as f64;
    let mut t_curr = -2.0 * tolerance;
    let mut iter = 0;
    while (t_next - t_curr).abs() > tolerance && iter < LI_MAX_ITER {
        iter += 1;
        t_curr = t_next;
        let (mut fs, mut fc, mut bs, mut bc) = (0.0, 0usize, 0.0, 0usize);
        for &v in shifted.iter() {
            if v > t_curr {
                fs += v;
                fc += 1;
            } else {
                bs += v;
                bc += 1;
            }
        }
        if fc == 0 || bc == 0 {
            break;
        }
        let (mean_fore, mean_back) = (fs / fc as f64, bs / bc as f64);
        if mean_back == 0.0 {
            break;
        }
        t_next = (mean_back - mean_fore) / (mean_back.ln() - mean_fore.ln());
    }
    Some((t_next + offset) as f32)
}

/// 中位数 (偶数个时取中间两数均值).
pub fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<OrderedFloat<f32>> = values.iter().map(|&v| OrderedFloat(v)).collect();
    sorted.sort_unstable();
    let n = sorted.len();
    Some(if n % 2 == 1 {
        sorted[n / 2].0
    } else {
        (sorted[n / 2 - 1].0 + sorted[n / 2].0) / 2.0
    })
}

/// 算术平均.
pub fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    Some((values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64) as f32)
}

/// 对数变换的参数, 用于把对数空间的阈值映射回原始强度空间.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogTransform {
    /// 噪声下限, 低于它的值被抬高到它.
    pub noise_min: f32,
    log_min: f32,
    log_max: f32,
}

impl LogTransform {
    /// 对数变换并拉伸到 `[0, 1]`.
    ///
    /// `noise_min = min + (max - min) / 256`. 常量体数据或 `noise_min`
    /// 非正时无法变换, 返回 `None`.
    pub fn forward(v: ArrayView3<f32>) -> Option<(Intensity, Self)> {
        let (lo, hi) = volume::finite_min_max(v)?;
        if hi <= lo {
            return None;
        }
        let noise_min = lo + (hi - lo) / 256.0 + f32::EPSILON;
        if noise_min <= 0.0 {
            log::debug!("对数变换噪声下限 {noise_min} 非正, 跳过");
            return None;
        }
        let logged = v.mapv(|x| x.max(noise_min).ln());
        let (log_min, log_max) = volume::finite_min_max(logged.view())?;
        if log_max <= log_min {
            return None;
        }
        let t = Self {
            noise_min,
            log_min,
            log_max,
        };
        Some((logged.mapv(|x| (x - log_min) / (log_max - log_min)), t))
    }

    /// 将拉伸后对数空间的标量映射回原始空间.
    #[inline]
    pub fn inverse(&self, v: f32) -> f32 {
        (v * (self.log_max - self.log_min) + self.log_min).exp()
    }
}

/// 对数空间中的 Li 阈值, 以原始强度返回.
pub fn li_log(v: ArrayView3<f32>) -> Option<f32> {
    let (logged, t) = LogTransform::forward(v)?;
    li(&finite_values(logged.view())).map(|th| t.inverse(th))
}

/// 对数空间中的 Otsu 阈值, 以原始强度返回.
pub fn otsu_log(v: ArrayView3<f32>) -> Option<f32> {
    let (logged, t) = LogTransform::forward(v)?;
    otsu(&finite_values(logged.view())).map(|th| t.inverse(th))
}
