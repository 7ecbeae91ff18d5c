//! 细胞质推断.

use crate::composite::{build_composite, threshold_masked_object, CompositeConfig, ThresholdConfig};
use crate::config::{ExecMode, FillFilterConfig, SmoothConfig};
use crate::error::PipelineResult;
use crate::filters::{fill_and_filter_linear_size, scale_and_smooth, size_filter};
use crate::morph::{morph_op, MorphMethod, MorphOp, MorphSpec};
use crate::volume::{self, ChannelStack, Intensity, Labels, Mask, MaskKind, MaskStack};
use crate::Label;
use ndarray::{ArrayView3, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// `cellmask ∧ ¬nucleus`.
///
/// `erode_nuclei` 时细胞核先以默认足迹腐蚀, 其外缘一圈归入细胞质.
/// 否则细胞质与细胞核不相交.
pub fn infer_cytoplasm(
    nuclei: ArrayView3<Label>,
    cellmask: ArrayView3<Label>,
    erode_nuclei: bool,
) -> PipelineResult<Labels> {
    volume::check_same_shape("cellmask", nuclei.dim(), cellmask.dim())?;
    let nuc = volume::to_mask(nuclei);
    let nuc = if erode_nuclei {
        morph_op(nuc.view(), MorphOp::Erode, MorphSpec::new(MorphMethod::Ball, 0))?
    } else {
        nuc
    };
    Ok(Zip::from(&nuc)
        .and(cellmask)
        .map_collect(|&n, &c| Label::from(c > 0 && !n)))
}

/// 由合成图像直接分割细胞质的参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CytoplasmCompositeConfig {
    /// 合成.
    pub composite: CompositeConfig,
    /// 平滑.
    pub smooth: SmoothConfig,
    /// 阈值前的形态学预处理.
    pub preprocess: MorphSpec,
    /// 掩膜对象阈值.
    pub threshold: ThresholdConfig,
    /// 孔洞填充与小目标过滤.
    pub fill: FillFilterConfig,
}

impl Default for CytoplasmCompositeConfig {
    fn default() -> Self {
        Self {
            composite: CompositeConfig::default(),
            smooth: SmoothConfig {
                median_size: 0,
                gauss_sigma: 0.0,
            },
            preprocess: MorphSpec::default(),
            threshold: ThresholdConfig {
                cutoff_size: 50,
                local_adjust: 0.05,
                ..ThresholdConfig::default()
            },
            fill: FillFilterConfig {
                min_hole_width: 0,
                max_hole_width: 0,
                small_obj_width: 10,
                method: ExecMode::ThreeD,
            },
        }
    }
}

impl CytoplasmCompositeConfig {
    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        self.composite.validate(channels)?;
        self.smooth.validate()?;
        self.threshold.validate()?;
        self.fill.validate()
    }
}

/// 细胞质掩膜及其合成图像.
pub(crate) fn cytoplasm_and_composite(
    stack: &ChannelStack,
    cfg: &CytoplasmCompositeConfig,
) -> PipelineResult<(Mask, Intensity)> {
    cfg.validate(stack.len())?;
    let composite = build_composite(stack, &cfg.composite)?;
    let smoothed = scale_and_smooth(composite.view(), &cfg.smooth);
    let pre = morph_op(smoothed.view(), MorphOp::Close, cfg.preprocess)?;
    let threshed =
        threshold_masked_object(stack, pre.view(), &cfg.threshold, cfg.composite.pm_channel)?;
    let cyto = fill_and_filter_linear_size(threshed.view(), &cfg.fill);
    log::debug!("细胞质: {} 个体素", cyto.iter().filter(|&&x| x).count());
    Ok((cyto, composite))
}

/// 合成 -> 平滑 -> 预处理 -> 掩膜对象阈值 -> 填洞去小目标.
pub fn infer_cytoplasm_from_composite(
    stack: &ChannelStack,
    cfg: &CytoplasmCompositeConfig,
) -> PipelineResult<Mask> {
    cytoplasm_and_composite(stack, cfg).map(|(cyto, _)| cyto)
}

/// 在选定细胞内整理细胞质与细胞核, 输出 `[细胞核, 细胞, 细胞质]`.
///
/// 细胞质限制在细胞内并去掉小目标; 细胞核为细胞内非细胞质部分, 同样去小目标.
pub fn mask_cytoplasm_nuclei(
    cell: ArrayView3<Label>,
    cytoplasm: ArrayView3<bool>,
    small_obj_width: usize,
) -> PipelineResult<MaskStack> {
    volume::check_same_shape("cytoplasm", cell.dim(), cytoplasm.dim())?;
    let min_size = ExecMode::ThreeD.linear_to_count(small_obj_width);
    let inside = Zip::from(cell).and(cytoplasm).map_collect(|&c, &y| c > 0 && y);
    let cyto = size_filter(inside.view(), min_size, ExecMode::ThreeD);
    let rest = Zip::from(cell).and(&cyto).map_collect(|&c, &y| c > 0 && !y);
    let nuc = size_filter(rest.view(), min_size, ExecMode::ThreeD);

    MaskStack::new(vec![
        (MaskKind::Nucleus, volume::to_labels(nuc.view())),
        (MaskKind::Cellmask, cell.mapv(|c| Label::from(c > 0))),
        (MaskKind::Cytoplasm, volume::to_labels(cyto.view())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth;

    fn nested(shape: crate::Idx3d) -> (Labels, Labels) {
        let cell = synth::ball(shape, (shape.0 / 2, 8, 8), 6.0);
        let nuc = synth::ball(shape, (shape.0 / 2, 8, 8), 3.0);
        (volume::to_labels(nuc.view()), volume::to_labels(cell.view()))
    }

    #[test]
    fn test_cytoplasm_disjoint_from_nucleus() {
        let (nuc, cell) = nested((9, 16, 16));
        let cyto = infer_cytoplasm(nuc.view(), cell.view(), false).unwrap();
        for ((&y, &n), &c) in cyto.iter().zip(nuc.iter()).zip(cell.iter()) {
            assert!(!(y > 0 && n > 0));
            if y > 0 || n > 0 {
                assert!(c > 0);
            }
        }
        assert!(cyto.iter().any(|&y| y > 0));
    }

    #[test]
    fn test_erode_nuclei_moves_rim_to_cytoplasm() {
        let (nuc, cell) = nested((9, 16, 16));
        let plain = infer_cytoplasm(nuc.view(), cell.view(), false).unwrap();
        let eroded = infer_cytoplasm(nuc.view(), cell.view(), true).unwrap();
        // 核的外缘
        assert_eq!(plain[(4, 8, 11)], 0);
        assert_eq!(eroded[(4, 8, 11)], 1);
        assert_eq!(eroded[(4, 8, 8)], 0);
    }

    #[test]
    fn test_cytoplasm_shape_mismatch() {
        let a = Labels::zeros((2, 4, 4));
        let b = Labels::zeros((2, 4, 5));
        assert!(infer_cytoplasm(a.view(), b.view(), false).is_err());
    }

    #[test]
    fn test_mask_cytoplasm_nuclei_layers() {
        let shape = (4, 20, 20);
        let cell = volume::to_labels(synth::cylinder(shape, (10, 10), 7.0).view());
        let hole = synth::cylinder(shape, (10, 10), 3.0);
        // 细胞外也有一块细胞质, 应被丢弃
        let cyto = Mask::from_shape_fn(shape, |(z, h, w)| {
            let inner = cell[(z, h, w)] > 0 && !hole[(z, h, w)];
            inner || (h < 2 && w < 2)
        });
        let stack = mask_cytoplasm_nuclei(cell.view(), cyto.view(), 1).unwrap();
        assert_eq!(
            stack.kinds(),
            vec![MaskKind::Nucleus, MaskKind::Cellmask, MaskKind::Cytoplasm]
        );
        let nuc = stack.layer(0).unwrap();
        let out_cyto = stack.layer(2).unwrap();
        Zip::from(&nuc).and(&hole).for_each(|&n, &h| assert_eq!(n > 0, h));
        assert_eq!(out_cyto[(0, 0, 0)], 0);
        assert_eq!(out_cyto[(0, 10, 15)], 1);
    }

    #[test]
    fn test_cytoplasm_from_composite_one_cell() {
        let chans = synth::one_cell((4, 24, 24), 4.0, 9.0);
        let stack = ChannelStack::new(chans).unwrap();
        let cfg = CytoplasmCompositeConfig {
            composite: CompositeConfig::with_weights(vec![0.0, 1.0, 0.0]),
            threshold: ThresholdConfig {
                cutoff_size: 10,
                ..CytoplasmCompositeConfig::default().threshold
            },
            fill: FillFilterConfig {
                small_obj_width: 2,
                ..CytoplasmCompositeConfig::default().fill
            },
            ..CytoplasmCompositeConfig::default()
        };
        let cyto = infer_cytoplasm_from_composite(&stack, &cfg).unwrap();
        assert!(cyto[(2, 12, 18)]);
        assert!(!cyto[(2, 12, 12)]);
        assert!(!cyto[(2, 0, 0)]);
    }
}
