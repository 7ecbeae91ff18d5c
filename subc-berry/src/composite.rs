//! 多通道合成与掩膜对象阈值.

use crate::error::{check_non_negative, PipelineError, PipelineResult};
use crate::filters::label::{connected_components, size_filter};
use crate::filters::threshold::{self, finite_values, LogTransform};
use crate::filters::scharr;
use crate::morph::{morph_op, MorphMethod, MorphOp, MorphSpec};
use crate::volume::{self, ChannelStack, Connectivity, Intensity, Mask};
use crate::config::ExecMode;
use itertools::izip;
use ndarray::{ArrayView3, Zip};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 合成图像配置.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompositeConfig {
    /// 各通道权重, 长度必须等于通道数. 0 表示不参与合成.
    pub weights: Vec<f32>,
    /// 是否在合成前反转质膜通道.
    pub invert_pm: bool,
    /// 质膜通道.
    pub pm_channel: Option<usize>,
    /// 合成后是否再做一次最小-最大归一化.
    pub rescale: bool,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            weights: vec![0.0, 4.0, 1.0, 1.0, 2.0, 2.0],
            invert_pm: false,
            pm_channel: None,
            rescale: true,
        }
    }
}

impl CompositeConfig {
    /// 以权重创建, 其余取默认值.
    pub fn with_weights(weights: Vec<f32>) -> Self {
        Self {
            weights,
            ..Self::default()
        }
    }

    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        if self.weights.len() != channels {
            return Err(PipelineError::ShapeMismatch {
                name: "weights",
                expected: vec![channels],
                found: vec![self.weights.len()],
            });
        }
        for &w in self.weights.iter() {
            check_non_negative("weights", w as f64)?;
        }
        if self.invert_pm {
            let pm = self
                .pm_channel
                .ok_or_else(|| PipelineError::invalid("pm_channel", "反转质膜通道时必须指定"))?;
            if pm >= channels {
                return Err(PipelineError::ChannelOutOfRange {
                    name: "pm_channel",
                    index: pm,
                    channels,
                });
            }
        }
        Ok(())
    }
}

/// 加权合成: 每个非零权重通道独立做最小-最大归一化后按权重累加.
///
/// 需要反转时, 质膜通道先被替换为 `max - v` 再归一化.
pub fn build_composite(stack: &ChannelStack, cfg: &CompositeConfig) -> PipelineResult<Intensity> {
    cfg.validate(stack.len())?;
    let invert = cfg.pm_channel.filter(|_| cfg.invert_pm);

    let prepare = |ch: usize| -> PipelineResult<(f32, Intensity)> {
        let raw = stack.channel("weights", ch)?;
        let normalized = if invert == Some(ch) {
            let hi = volume::finite_min_max(raw).map_or(0.0, |(_, hi)| hi);
            volume::normalize(raw.mapv(|v| hi - v).view())
        } else {
            volume::normalize(raw)
        };
        Ok((cfg.weights[ch], normalized))
    };
    let active: Vec<usize> = (0..stack.len()).filter(|&c| cfg.weights[c] != 0.0).collect();

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            let parts: Vec<(f32, Intensity)> = active
                .into_par_iter()
                .map(prepare)
                .collect::<PipelineResult<_>>()?;
        } else {
            let parts: Vec<(f32, Intensity)> = active
                .into_iter()
                .map(prepare)
                .collect::<PipelineResult<_>>()?;
        }
    }

    let (z, h, w) = stack.shape();
    let mut out = Intensity::zeros((z, h, w));
    for (weight, n) in parts.iter() {
        Zip::from(&mut out).and(n).for_each(|o, &x| *o += weight * x);
    }
    if cfg.rescale {
        out = volume::normalize(out.view());
    }
    Ok(out)
}

/// 非线性细胞掩膜变换: 对数变换归一化后, 叠加其归一化的三维 Scharr 梯度.
///
/// 常量体数据返回全零.
pub fn non_linear_cellmask_transform(v: ArrayView3<f32>) -> Intensity {
    let Some((logged, _)) = LogTransform::forward(v) else {
        return Intensity::zeros(v.raw_dim());
    };
    let logged = volume::normalize(logged.view());
    let edges = volume::normalize(scharr(logged.view()).view());
    edges + &logged
}

/// 掩膜对象阈值的全局方法.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GlobalMethod {
    /// 三角阈值.
    #[cfg_attr(feature = "serde", serde(rename = "triangle", alias = "tri"))]
    Triangle,
    /// 中位数.
    #[cfg_attr(feature = "serde", serde(rename = "median", alias = "med"))]
    Median,
    /// 三角阈值与均值的平均.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "ave_tri_med", alias = "ave"))]
    AveTriMed,
}

impl FromStr for GlobalMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "triangle" | "tri" => Ok(Self::Triangle),
            "median" | "med" => Ok(Self::Median),
            "ave_tri_med" | "ave" => Ok(Self::AveTriMed),
            _ => Err(PipelineError::UnknownVariant {
                name: "global_method",
                value: s.to_string(),
            }),
        }
    }
}

impl GlobalMethod {
    /// 计算全局阈值.
    pub fn threshold(self, values: &[f32]) -> Option<f32> {
        match self {
            Self::Triangle => threshold::triangle(values),
            Self::Median => threshold::median(values),
            Self::AveTriMed => {
                let tri = threshold::triangle(values)?;
                let mean = threshold::mean(values)?;
                Some((tri + mean) / 2.0)
            }
        }
    }
}

/// 掩膜对象阈值 + 可选的质膜约束.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ThresholdConfig {
    /// 全局方法.
    pub global_method: GlobalMethod,
    /// 粗分割中体素数小于该值的对象被丢弃.
    pub cutoff_size: usize,
    /// 局部 Otsu 阈值的缩放系数.
    pub local_adjust: f32,
    /// 是否用质膜阈值约束结果.
    pub bind_to_pm: bool,
    /// 质膜阈值的缩放系数.
    pub thresh_adj: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            global_method: GlobalMethod::AveTriMed,
            cutoff_size: 150,
            local_adjust: 0.5,
            bind_to_pm: false,
            thresh_adj: 1.0,
        }
    }
}

impl ThresholdConfig {
    /// 校验参数.
    pub fn validate(&self) -> PipelineResult<()> {
        check_non_negative("local_adjust", self.local_adjust as f64)?;
        check_non_negative("thresh_adj", self.thresh_adj as f64)
    }
}

/// 掩膜对象阈值.
///
/// 全局阈值给出粗前景, 去掉体素数小于 `cutoff_size` 的对象后,
/// 每个 6-连通对象内部再以 `otsu * local_adjust` 细化.
pub fn masked_object_threshold(
    img: ArrayView3<f32>,
    method: GlobalMethod,
    cutoff_size: usize,
    local_adjust: f32,
) -> Mask {
    let Some(global) = method.threshold(&finite_values(img)) else {
        return Mask::from_elem(img.raw_dim(), false);
    };
    let coarse = size_filter(img.mapv(|v| v > global).view(), cutoff_size, ExecMode::ThreeD);
    let objects = connected_components(coarse.view(), Connectivity::Face3d);
    let count = objects.iter().copied().max().unwrap_or(0) as usize;

    let mut groups = vec![Vec::new(); count + 1];
    for (&l, &v) in objects.iter().zip(img.iter()) {
        if l > 0 && v.is_finite() {
            groups[l as usize].push(v);
        }
    }
    // 常量对象的 Otsu 阈值取其自身取值
    let local: Vec<f32> = groups
        .iter()
        .map(|g| threshold::otsu(g).or_else(|| g.first().copied()).unwrap_or(f32::INFINITY))
        .collect();

    let mut out = Mask::from_elem(img.raw_dim(), false);
    for (o, &l, &v) in izip!(out.iter_mut(), objects.iter(), img.iter()) {
        *o = l > 0 && v > local[l as usize] * local_adjust;
    }
    log::debug!("掩膜对象阈值: 全局 {global}, 对象 {count} 个");
    out
}

/// 质膜 "内侧" 掩膜: `!(pm > otsu_log(pm) * thresh_adj)`.
///
/// 质膜通道为常量时没有可用阈值, 返回全 `true`.
pub fn pm_inner_mask(pm: ArrayView3<f32>, thresh_adj: f32) -> Mask {
    match threshold::otsu_log(pm) {
        Some(t) => {
            let t = t * thresh_adj;
            pm.mapv(|v| !(v > t))
        }
        None => Mask::from_elem(pm.raw_dim(), true),
    }
}

/// 掩膜对象阈值, 可选地与质膜内侧掩膜求交后做闭运算.
pub fn threshold_masked_object(
    stack: &ChannelStack,
    composite: ArrayView3<f32>,
    cfg: &ThresholdConfig,
    pm_channel: Option<usize>,
) -> PipelineResult<Mask> {
    cfg.validate()?;
    volume::check_same_shape("composite", stack.shape(), composite.dim())?;
    let pm = match (cfg.bind_to_pm, pm_channel) {
        (false, _) => None,
        (true, Some(ch)) => Some(stack.channel("pm_channel", ch)?),
        (true, None) => {
            return Err(PipelineError::invalid("pm_channel", "绑定质膜时必须指定质膜通道"))
        }
    };

    let threshed =
        masked_object_threshold(composite, cfg.global_method, cfg.cutoff_size, cfg.local_adjust);
    let Some(pm) = pm else {
        return Ok(threshed);
    };
    let inner = pm_inner_mask(pm, cfg.thresh_adj);
    let bound = Zip::from(&threshed).and(&inner).map_collect(|&a, &b| a && b);
    morph_op(bound.view(), MorphOp::Close, MorphSpec::new(MorphMethod::Ball, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth;
    use ndarray::Array3;

    fn three_channels() -> ChannelStack {
        let a = Array3::from_shape_fn((2, 6, 6), |(z, h, w)| (z * 36 + h * 6 + w) as f32);
        let b = Array3::from_shape_fn((2, 6, 6), |(_, h, _)| 100.0 - h as f32 * 3.0);
        let c = Array3::from_shape_fn((2, 6, 6), |(_, _, w)| (w % 3) as f32 + 0.5);
        ChannelStack::new(vec![a, b, c]).unwrap()
    }

    #[test]
    fn test_composite_single_channel_equals_normalized() {
        let stack = three_channels();
        let cfg = CompositeConfig {
            weights: vec![1.0, 0.0, 0.0],
            rescale: false,
            ..CompositeConfig::default()
        };
        let out = build_composite(&stack, &cfg).unwrap();
        let expected = volume::normalize(stack.channel("c", 0).unwrap());
        assert_eq!(out, expected);
    }

    #[test]
    fn test_composite_is_linear_in_weights() {
        let stack = three_channels();
        let w = vec![1.0, 0.5, 2.0];
        let base = CompositeConfig {
            weights: w.clone(),
            rescale: false,
            ..CompositeConfig::default()
        };
        let doubled = CompositeConfig {
            weights: w.iter().map(|x| x * 2.0).collect(),
            ..base.clone()
        };
        let a = build_composite(&stack, &base).unwrap();
        let b = build_composite(&stack, &doubled).unwrap();
        Zip::from(&a).and(&b).for_each(|&x, &y| assert!((2.0 * x - y).abs() < 1e-5));
    }

    #[test]
    fn test_composite_errors() {
        let stack = three_channels();
        let err = build_composite(&stack, &CompositeConfig::with_weights(vec![1.0, 1.0])).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { name: "weights", .. }));

        let err = build_composite(&stack, &CompositeConfig::with_weights(vec![1.0, -1.0, 0.0]))
            .unwrap_err();
        assert!(err.to_string().contains("weights"));

        let cfg = CompositeConfig {
            weights: vec![1.0, 1.0, 1.0],
            invert_pm: true,
            pm_channel: Some(3),
            rescale: false,
        };
        assert!(matches!(
            build_composite(&stack, &cfg),
            Err(PipelineError::ChannelOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn test_composite_invert_pm() {
        let stack = three_channels();
        let cfg = CompositeConfig {
            weights: vec![0.0, 1.0, 0.0],
            invert_pm: true,
            pm_channel: Some(1),
            rescale: false,
        };
        let out = build_composite(&stack, &cfg).unwrap();
        // 原通道随 h 递减, 反转后递增
        assert_eq!(out[(0, 0, 0)], 0.0);
        assert_eq!(out[(0, 5, 0)], 1.0);
    }

    #[test]
    fn test_global_method_aliases() {
        assert_eq!("tri".parse::<GlobalMethod>().unwrap(), GlobalMethod::Triangle);
        assert_eq!("med".parse::<GlobalMethod>().unwrap(), GlobalMethod::Median);
        assert_eq!("ave".parse::<GlobalMethod>().unwrap(), GlobalMethod::AveTriMed);
        assert!("otsu".parse::<GlobalMethod>().is_err());
    }

    #[test]
    fn test_masked_object_threshold_finds_objects() {
        let img = synth::blobs((6, 32, 32), &[(3, 10, 10), (3, 22, 22)], 3.0, &[1.0, 0.4]);
        let m = masked_object_threshold(img.view(), GlobalMethod::Triangle, 5, 0.5);
        assert!(m[(3, 10, 10)]);
        assert!(m[(3, 22, 22)]);
        assert!(!m[(0, 0, 31)]);

        let zero = Intensity::zeros((4, 16, 16));
        let m = masked_object_threshold(zero.view(), GlobalMethod::AveTriMed, 5, 0.5);
        assert!(m.iter().all(|&x| !x));
    }

    #[test]
    fn test_bind_to_pm_requires_channel_and_restricts() {
        let stack = three_channels();
        let comp = Intensity::from_elem((2, 6, 6), 1.0);
        let cfg = ThresholdConfig {
            bind_to_pm: true,
            ..ThresholdConfig::default()
        };
        let err = threshold_masked_object(&stack, comp.view(), &cfg, None).unwrap_err();
        assert!(err.to_string().contains("pm_channel"));

        let img = synth::blobs((4, 24, 24), &[(2, 12, 12)], 4.0, &[1.0]);
        let ring = synth::ring((4, 24, 24), (12, 12), 6.0, 1.5);
        let stack = ChannelStack::new(vec![img.clone(), ring]).unwrap();
        let cfg = ThresholdConfig {
            global_method: GlobalMethod::Triangle,
            cutoff_size: 5,
            local_adjust: 0.3,
            bind_to_pm: true,
            thresh_adj: 1.0,
        };
        let free = ThresholdConfig {
            bind_to_pm: false,
            ..cfg
        };
        let bound = threshold_masked_object(&stack, img.view(), &cfg, Some(1)).unwrap();
        let unbound = threshold_masked_object(&stack, img.view(), &free, Some(1)).unwrap();
        assert!(bound[(2, 12, 12)]);
        // 质膜所在位置被排除
        assert!(!bound[(2, 12, 18)]);
        assert!(unbound[(2, 12, 18)]);
        assert!(bound.iter().filter(|&&x| x).count() < unbound.iter().filter(|&&x| x).count());
    }

    #[test]
    fn test_non_linear_transform_range() {
        let img = synth::blobs((4, 16, 16), &[(2, 8, 8)], 3.0, &[100.0]);
        let t = non_linear_cellmask_transform(img.view());
        assert!(t.iter().all(|&x| (0.0..=2.0).contains(&x)));
        assert!(t[(2, 8, 8)] > t[(0, 0, 0)]);
        let flat = non_linear_cellmask_transform(Intensity::zeros((2, 4, 4)).view());
        assert!(flat.iter().all(|&x| x == 0.0));
    }
}
