//! 借助质膜通道的中间掩膜与细胞掩膜推断.
//!
//! 两个不同权重的合成图像各自阈值化得到中间掩膜 I/II, 在其中挑选细胞核,
//! 再用双分水岭合并出细胞. 另一条路线直接在反转的质膜图像上做分水岭.

use crate::composite::{
    build_composite, pm_inner_mask, threshold_masked_object, CompositeConfig, ThresholdConfig,
};
use crate::config::{ExecMode, FillFilterConfig};
use crate::error::{check_hole_bounds, check_non_negative, PipelineError, PipelineResult};
use crate::filters::{
    fill_and_filter_linear_size, fill_holes, interior_labels, masked_inverted_watershed, max_label,
};
use crate::morph::{morph_op, MorphMethod, MorphOp, MorphSpec};
use crate::stages::nucleus::{infer_nuclei_from_label, NucleusConfig};
use crate::volume::{self, ChannelStack, Intensity, Labels, Mask};
use crate::Label;
use ndarray::{ArrayView3, Zip};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一张中间掩膜的参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IntermediateConfig {
    /// 合成, 其 `pm_channel` 同时用于质膜约束.
    pub composite: CompositeConfig,
    /// 阈值前的形态学预处理.
    pub preprocess: MorphSpec,
    /// 掩膜对象阈值.
    pub threshold: ThresholdConfig,
}

impl Default for IntermediateConfig {
    fn default() -> Self {
        Self {
            composite: CompositeConfig {
                rescale: false,
                ..CompositeConfig::default()
            },
            preprocess: MorphSpec::new(MorphMethod::Ball, 2),
            threshold: ThresholdConfig::default(),
        }
    }
}

impl IntermediateConfig {
    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        self.composite.validate(channels)?;
        self.threshold.validate()
    }
}

/// 中间掩膜 I 与 II 的参数.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IntermediateMaskConfig {
    /// 中间掩膜 I.
    pub first: IntermediateConfig,
    /// 中间掩膜 II.
    pub second: IntermediateConfig,
}

impl IntermediateMaskConfig {
    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        self.first.validate(channels)?;
        self.second.validate(channels)
    }
}

/// 一张中间掩膜及其合成图像.
#[derive(Debug, Clone)]
pub struct Intermediate {
    /// 未经预处理的合成图像.
    pub composite: Intensity,
    /// 阈值化结果.
    pub mask: Mask,
}

fn infer_intermediate(stack: &ChannelStack, cfg: &IntermediateConfig) -> PipelineResult<Intermediate> {
    let composite = build_composite(stack, &cfg.composite)?;
    let pre = morph_op(composite.view(), MorphOp::Close, cfg.preprocess)?;
    let mask = threshold_masked_object(stack, pre.view(), &cfg.threshold, cfg.composite.pm_channel)?;
    Ok(Intermediate { composite, mask })
}

/// 合成 -> 形态学预处理 -> 掩膜对象阈值 (可绑定质膜), 分别得到中间掩膜 I 与 II.
pub fn infer_intermediate_masks(
    stack: &ChannelStack,
    cfg: &IntermediateMaskConfig,
) -> PipelineResult<[Intermediate; 2]> {
    cfg.validate(stack.len())?;
    Ok([
        infer_intermediate(stack, &cfg.first)?,
        infer_intermediate(stack, &cfg.second)?,
    ])
}

/// 挑选细胞核时参照的中间掩膜.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SearchTarget {
    /// 中间掩膜 I.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "I", alias = "Img 5"))]
    MaskI,
    /// 中间掩膜 II.
    #[cfg_attr(feature = "serde", serde(rename = "II", alias = "Img 6"))]
    MaskII,
}

impl FromStr for SearchTarget {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "I" | "Img 5" => Ok(Self::MaskI),
            "II" | "Img 6" => Ok(Self::MaskII),
            _ => Err(PipelineError::UnknownVariant {
                name: "search_img",
                value: s.to_string(),
            }),
        }
    }
}

impl SearchTarget {
    /// 选出对应的中间掩膜.
    #[inline]
    pub fn pick<'a>(&self, masks: &'a [Intermediate; 2]) -> &'a Intermediate {
        match self {
            Self::MaskI => &masks[0],
            Self::MaskII => &masks[1],
        }
    }
}

/// 推断全部细胞核, 保留膨胀后与 `search` 重叠最多的一个, 记为标签 1.
///
/// 重叠相同时取标签值最小者. 没有候选时结果为空.
pub fn find_nuc(
    stack: &ChannelStack,
    cfg: &NucleusConfig,
    search: ArrayView3<bool>,
) -> PipelineResult<Labels> {
    volume::check_same_shape("search_img", stack.shape(), search.dim())?;
    let nuclei = infer_nuclei_from_label(stack, cfg)?;
    let dilated = morph_op(nuclei.view(), MorphOp::Dilate, MorphSpec::new(MorphMethod::Ball, 0))?;
    let weights = search.mapv(|x| if x { 1.0f32 } else { 0.0 });
    let keep = max_label(weights.view(), dilated.view(), None);
    log::debug!("选中细胞核 {keep:?}");
    Ok(match keep {
        Some(k) => nuclei.mapv(|l| Label::from(l == k)),
        None => Labels::zeros(nuclei.raw_dim()),
    })
}

/// 细胞核膨胀并入中间掩膜后的补洞参数.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MixConfig {
    /// 细胞核膨胀方式.
    pub dilate: MorphSpec,
    /// 孔洞填充与小目标过滤.
    pub fill: FillFilterConfig,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            dilate: MorphSpec::new(MorphMethod::Disk, 2),
            fill: FillFilterConfig {
                min_hole_width: 0,
                max_hole_width: 15,
                small_obj_width: 5,
                method: ExecMode::ThreeD,
            },
        }
    }
}

/// 把膨胀后的细胞核并入中间掩膜, 再填洞去小目标.
pub fn mix_nuc_and_fill(
    nucleus: ArrayView3<Label>,
    mask: ArrayView3<bool>,
    cfg: &MixConfig,
) -> PipelineResult<Mask> {
    cfg.fill.validate()?;
    volume::check_same_shape("nucleus", mask.dim(), nucleus.dim())?;
    let nuc = volume::to_mask(nucleus);
    let grown = morph_op(nuc.view(), MorphOp::Dilate, cfg.dilate)?;
    let mixed = Zip::from(mask).and(&grown).map_collect(|&m, &g| m || g);
    Ok(fill_and_filter_linear_size(mixed.view(), &cfg.fill))
}

/// 闭合并填洞的参数. 孔洞上下界为逐切片的像素面积.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CloseFillConfig {
    /// 最小孔洞面积.
    pub min_hole: usize,
    /// 最大孔洞面积.
    pub max_hole: usize,
    /// 膨胀/腐蚀方式.
    pub spec: MorphSpec,
}

impl Default for CloseFillConfig {
    fn default() -> Self {
        Self {
            min_hole: 0,
            max_hole: 400,
            spec: MorphSpec::new(MorphMethod::Disk, 4),
        }
    }
}

impl CloseFillConfig {
    /// 校验孔洞上下界.
    pub fn validate(&self) -> PipelineResult<()> {
        check_hole_bounds("cell_min_hole_width", self.min_hole, self.max_hole)
    }
}

/// 膨胀, 逐切片填补面积落在 `[min_hole, max_hole]` 的孔洞, 再腐蚀.
pub fn close_and_fill(mask: ArrayView3<bool>, cfg: &CloseFillConfig) -> PipelineResult<Mask> {
    cfg.validate()?;
    let grown = morph_op(mask, MorphOp::Dilate, cfg.spec)?;
    let filled = fill_holes(grown.view(), cfg.min_hole, cfg.max_hole, ExecMode::SliceBySlice);
    morph_op(filled.view(), MorphOp::Erode, cfg.spec)
}

/// 双分水岭: 以细胞核为标记, 分别在两张中间掩膜内对各自合成图像做反转分水岭,
/// 取并集后闭合填洞.
pub fn double_watershed(
    nucleus: ArrayView3<Label>,
    intermediates: [(ArrayView3<f32>, ArrayView3<bool>); 2],
    mode: ExecMode,
    close: &CloseFillConfig,
) -> PipelineResult<Mask> {
    let mut combo = Mask::from_elem(nucleus.raw_dim(), false);
    for (img, mask) in intermediates {
        volume::check_same_shape("composite", nucleus.dim(), img.dim())?;
        volume::check_same_shape("mask", nucleus.dim(), mask.dim())?;
        let img = volume::normalize(img);
        let ws = masked_inverted_watershed(img.view(), nucleus, Some(mask), mode);
        Zip::from(&mut combo).and(&ws).for_each(|c, &l| *c |= l > 0);
    }
    close_and_fill(combo.view(), close)
}

/// 最终补洞与质膜约束.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FillBindConfig {
    /// 孔洞填充与小目标过滤.
    pub fill: FillFilterConfig,
    /// 是否约束到质膜内侧.
    pub bind_to_pm: bool,
    /// 质膜阈值缩放系数.
    pub thresh_adj: f32,
}

impl Default for FillBindConfig {
    fn default() -> Self {
        Self {
            fill: FillFilterConfig::default(),
            bind_to_pm: false,
            thresh_adj: 1.0,
        }
    }
}

impl FillBindConfig {
    /// 校验参数.
    pub fn validate(&self) -> PipelineResult<()> {
        self.fill.validate()?;
        check_non_negative("thresh_adj", self.thresh_adj as f64)
    }
}

/// 填洞去小目标; 绑定质膜时再与膨胀后的质膜内侧掩膜求交并做二值闭运算.
pub fn fill_and_bind(
    stack: &ChannelStack,
    mask: ArrayView3<bool>,
    pm_channel: Option<usize>,
    cfg: &FillBindConfig,
) -> PipelineResult<Mask> {
    cfg.validate()?;
    volume::check_same_shape("mask", stack.shape(), mask.dim())?;
    let filled = fill_and_filter_linear_size(mask, &cfg.fill);
    if !cfg.bind_to_pm {
        return Ok(filled);
    }
    let ch = pm_channel.ok_or_else(|| PipelineError::invalid("pm_channel", "绑定质膜时必须指定质膜通道"))?;
    let cross = MorphSpec::new(MorphMethod::Ball, 0);
    let inner = pm_inner_mask(stack.channel("pm_channel", ch)?, cfg.thresh_adj);
    let inner = morph_op(inner.view(), MorphOp::Dilate, cross)?;
    let bound = Zip::from(&filled).and(&inner).map_collect(|&f, &i| f && i);
    morph_op(bound.view(), MorphOp::Close, cross)
}

/// 在反转质膜图像上做全体数据分水岭, 以细胞核实例为标记.
///
/// 高程为 `1 - normalize(max(pm) - pm)`, 质膜越亮越高.
pub fn invert_pm_watershed(
    stack: &ChannelStack,
    nuclei: ArrayView3<Label>,
    pm_channel: usize,
    mode: ExecMode,
) -> PipelineResult<Labels> {
    volume::check_same_shape("nuclei", stack.shape(), nuclei.dim())?;
    let pm = stack.channel("pm_channel", pm_channel)?;
    let top = volume::finite_min_max(pm).map_or(0.0, |(_, hi)| hi);
    let inverted = volume::normalize(pm.mapv(|v| (top - v).abs()).view());
    Ok(masked_inverted_watershed(inverted.view(), nuclei, None, mode))
}

/// 在分水岭区域中, 只考虑不接触侧向边界的细胞核对应的标签,
/// 保留合成强度累计最大者, 记为标签 1. 没有内部细胞核时结果为空.
pub fn choose_cell(
    composite: ArrayView3<f32>,
    nuclei: ArrayView3<Label>,
    watershed: ArrayView3<Label>,
) -> PipelineResult<Labels> {
    volume::check_same_shape("nuclei", composite.dim(), nuclei.dim())?;
    volume::check_same_shape("watershed", composite.dim(), watershed.dim())?;
    let targets = interior_labels(nuclei);
    Ok(match max_label(composite, watershed, Some(&targets)) {
        Some(k) => watershed.mapv(|l| Label::from(l == k)),
        None => Labels::zeros(watershed.raw_dim()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth;

    #[test]
    fn test_search_target_parse() {
        assert_eq!("Img 5".parse::<SearchTarget>().unwrap(), SearchTarget::MaskI);
        assert_eq!("II".parse::<SearchTarget>().unwrap(), SearchTarget::MaskII);
        assert!("Img 7".parse::<SearchTarget>().is_err());
    }

    fn small_nucleus_cfg() -> NucleusConfig {
        NucleusConfig {
            smooth: crate::config::SmoothConfig {
                median_size: 0,
                gauss_sigma: 1.0,
            },
            fill: FillFilterConfig {
                min_hole_width: 0,
                max_hole_width: 4,
                small_obj_width: 2,
                method: ExecMode::ThreeD,
            },
            ..NucleusConfig::default()
        }
    }

    /// 两个互为平移的等大细胞核, 离边界足够远.
    fn twin_nuclei() -> ChannelStack {
        let shape = (6, 24, 40);
        let left = synth::ball(shape, (3, 12, 10), 3.0);
        let right = synth::ball(shape, (3, 12, 28), 3.0);
        let nuc = Zip::from(&left)
            .and(&right)
            .map_collect(|&a, &b| if a || b { 100.0 } else { 2.0 });
        ChannelStack::new(vec![nuc]).unwrap()
    }

    #[test]
    fn test_find_nuc_picks_most_overlap() {
        let stack = twin_nuclei();
        let search = Mask::from_shape_fn(stack.shape(), |(_, _, w)| w >= 20);
        let out = find_nuc(&stack, &small_nucleus_cfg(), search.view()).unwrap();
        assert_eq!(out[(3, 12, 28)], 1);
        assert_eq!(out[(3, 12, 10)], 0);
        assert_eq!(out.iter().copied().max(), Some(1));

        let bad = Mask::from_elem((6, 24, 41), true);
        assert!(find_nuc(&stack, &small_nucleus_cfg(), bad.view()).is_err());
    }

    #[test]
    fn test_find_nuc_tie_takes_lowest_label() {
        let stack = twin_nuclei();
        let search = Mask::from_elem(stack.shape(), true);
        let out = find_nuc(&stack, &small_nucleus_cfg(), search.view()).unwrap();
        assert_eq!(out[(3, 12, 10)], 1);
        assert_eq!(out[(3, 12, 28)], 0);

        // 重叠均为 0 也是并列
        let none = Mask::from_elem(stack.shape(), false);
        let out = find_nuc(&stack, &small_nucleus_cfg(), none.view()).unwrap();
        assert_eq!(out[(3, 12, 10)], 1);
    }

    #[test]
    fn test_double_watershed_unions_reached_regions() {
        let shape = (2, 20, 20);
        let mut nucleus = Labels::zeros(shape);
        nucleus[(0, 10, 10)] = 1;
        nucleus[(1, 10, 10)] = 1;
        let mut first = synth::cylinder(shape, (10, 10), 5.0);
        // 与细胞核不相连的碎块不会被分水岭到达
        for z in 0..2 {
            for h in 2..4 {
                for w in 2..4 {
                    first[(z, h, w)] = true;
                }
            }
        }
        let second = synth::cylinder(shape, (10, 12), 5.0);
        let img = Intensity::from_elem(shape, 1.0);
        let close = CloseFillConfig {
            min_hole: 0,
            max_hole: 0,
            spec: MorphSpec::new(MorphMethod::Disk, 1),
        };
        let out = double_watershed(
            nucleus.view(),
            [(img.view(), first.view()), (img.view(), second.view())],
            ExecMode::ThreeD,
            &close,
        )
        .unwrap();
        assert!(out[(1, 10, 10)]);
        assert!(out[(1, 10, 16)]);
        assert!(!out[(1, 3, 3)]);
        assert!(!out[(1, 19, 19)]);

        let short = Mask::from_elem((2, 20, 19), true);
        assert!(double_watershed(
            nucleus.view(),
            [(img.view(), first.view()), (img.view(), short.view())],
            ExecMode::ThreeD,
            &close,
        )
        .is_err());
    }

    #[test]
    fn test_intermediate_masks_keep_raw_composites() {
        let stack = ChannelStack::new(synth::one_cell((4, 32, 32), 4.0, 10.0)).unwrap();
        let inter = |weights: Vec<f32>| IntermediateConfig {
            composite: CompositeConfig {
                rescale: false,
                ..CompositeConfig::with_weights(weights)
            },
            preprocess: MorphSpec::default(),
            threshold: ThresholdConfig {
                cutoff_size: 10,
                ..ThresholdConfig::default()
            },
        };
        let cfg = IntermediateMaskConfig {
            first: inter(vec![0.0, 1.0, 0.0]),
            second: inter(vec![0.0, 2.0, 0.0]),
        };
        let masks = infer_intermediate_masks(&stack, &cfg).unwrap();
        assert_eq!(masks[0].composite[(2, 16, 23)], 1.0);
        assert_eq!(SearchTarget::MaskII.pick(&masks).composite[(2, 16, 23)], 2.0);
        for m in masks.iter().map(|i| &i.mask) {
            assert!(m[(2, 16, 23)]);
            assert!(!m[(2, 16, 16)]);
            assert!(!m[(2, 0, 0)]);
        }

        let bad = IntermediateMaskConfig {
            second: inter(vec![1.0, 1.0]),
            ..cfg
        };
        assert!(matches!(
            infer_intermediate_masks(&stack, &bad),
            Err(PipelineError::ShapeMismatch { name: "weights", .. })
        ));
    }

    #[test]
    fn test_close_and_fill_closes_ring() {
        let shape = (3, 20, 20);
        let outer = synth::cylinder(shape, (10, 10), 7.0);
        let inner = synth::cylinder(shape, (10, 10), 5.0);
        let ring = Zip::from(&outer).and(&inner).map_collect(|&o, &i| o && !i);
        let cfg = CloseFillConfig {
            min_hole: 0,
            max_hole: 200,
            spec: MorphSpec::new(MorphMethod::Disk, 1),
        };
        let out = close_and_fill(ring.view(), &cfg).unwrap();
        assert!(out[(1, 10, 10)]);
        assert!(!out[(1, 0, 0)]);

        let none = CloseFillConfig {
            max_hole: 10,
            ..cfg
        };
        assert!(!close_and_fill(ring.view(), &none).unwrap()[(1, 10, 10)]);

        let bad = CloseFillConfig {
            min_hole: 20,
            max_hole: 10,
            ..cfg
        };
        assert!(matches!(
            close_and_fill(ring.view(), &bad),
            Err(PipelineError::HoleBounds { .. })
        ));
    }

    #[test]
    fn test_mix_nuc_and_fill_and_scharr_rejected() {
        let shape = (3, 16, 16);
        let mask = synth::cylinder(shape, (8, 8), 5.0);
        let mut nuc = Labels::zeros(shape);
        nuc[(1, 8, 14)] = 1;
        let cfg = MixConfig {
            dilate: MorphSpec::new(MorphMethod::Disk, 1),
            fill: FillFilterConfig {
                max_hole_width: 0,
                small_obj_width: 1,
                ..FillFilterConfig::default()
            },
        };
        let out = mix_nuc_and_fill(nuc.view(), mask.view(), &cfg).unwrap();
        assert!(out[(1, 8, 15)]);
        assert!(out[(1, 8, 8)]);

        let scharr = MixConfig {
            dilate: MorphSpec::new(MorphMethod::Scharr, 0),
            ..cfg
        };
        assert!(matches!(
            mix_nuc_and_fill(nuc.view(), mask.view(), &scharr),
            Err(PipelineError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_choose_cell_interior_only() {
        let shape = (2, 10, 10);
        let mut ws = Labels::zeros(shape);
        let mut nuc = Labels::zeros(shape);
        let img = Intensity::from_elem(shape, 1.0);
        for z in 0..2 {
            for h in 0..10 {
                for w in 0..10 {
                    ws[(z, h, w)] = if w < 6 { 1 } else { 2 };
                }
            }
            nuc[(z, 0, 2)] = 1;
            nuc[(z, 5, 8)] = 2;
        }
        // 1 号区域更大, 但其细胞核接触边界
        let out = choose_cell(img.view(), nuc.view(), ws.view()).unwrap();
        assert_eq!(out[(0, 5, 8)], 1);
        assert_eq!(out[(0, 5, 2)], 0);

        nuc[(0, 5, 8)] = 0;
        nuc[(1, 5, 8)] = 0;
        let out = choose_cell(img.view(), nuc.view(), ws.view()).unwrap();
        assert!(out.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_invert_pm_watershed_stops_at_membrane() {
        let shape = (2, 24, 24);
        let pm = synth::ring(shape, (12, 12), 6.0, 1.0);
        let stack = ChannelStack::new(vec![pm]).unwrap();
        let mut nuc = Labels::zeros(shape);
        nuc[(0, 12, 12)] = 1;
        nuc[(0, 1, 1)] = 2;
        nuc[(1, 12, 12)] = 1;
        nuc[(1, 1, 1)] = 2;
        let ws = invert_pm_watershed(&stack, nuc.view(), 0, ExecMode::SliceBySlice).unwrap();
        assert!(ws.iter().all(|&l| l > 0));
        assert_eq!(ws[(0, 12, 14)], 1);
        assert_eq!(ws[(0, 12, 22)], 2);
        assert!(invert_pm_watershed(&stack, nuc.view(), 3, ExecMode::ThreeD).is_err());
    }

    #[test]
    fn test_fill_and_bind_requires_pm() {
        let shape = (2, 8, 8);
        let stack = ChannelStack::new(vec![Intensity::zeros(shape)]).unwrap();
        let mask = Mask::from_elem(shape, true);
        let cfg = FillBindConfig {
            bind_to_pm: true,
            ..FillBindConfig::default()
        };
        let err = fill_and_bind(&stack, mask.view(), None, &cfg).unwrap_err();
        assert!(err.to_string().contains("pm_channel"));

        // 常量质膜通道没有阈值, 内侧掩膜为全体数据
        let out = fill_and_bind(&stack, mask.view(), Some(0), &FillBindConfig {
            fill: FillFilterConfig {
                small_obj_width: 1,
                ..FillFilterConfig::default()
            },
            ..cfg
        })
        .unwrap();
        assert_eq!(out, mask);
    }
}
