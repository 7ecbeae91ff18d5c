//! 细胞掩膜推断.

use crate::composite::{build_composite, threshold_masked_object, CompositeConfig, GlobalMethod, ThresholdConfig};
use crate::config::{ExecMode, FillFilterConfig, SmoothConfig};
use crate::error::PipelineResult;
use crate::filters::{
    fill_and_filter_linear_size, fill_holes, interior_labels, masked_inverted_watershed, max_label,
    relabel, scale_and_smooth,
};
use crate::morph::{morph_op, MorphMethod, MorphOp, MorphSpec};
use crate::volume::{self, ChannelStack, Labels, Mask};
use crate::Label;
use ndarray::{ArrayView3, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 由合成图像推断细胞掩膜的参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CellmaskConfig {
    /// 合成.
    pub composite: CompositeConfig,
    /// 平滑.
    pub smooth: SmoothConfig,
    /// 阈值前的形态学预处理, 默认为非线性边缘变换.
    pub preprocess: MorphSpec,
    /// 掩膜对象阈值.
    pub threshold: ThresholdConfig,
    /// 孔洞填充与小目标过滤.
    pub fill: FillFilterConfig,
    /// 分水岭执行模式.
    pub watershed: ExecMode,
}

impl Default for CellmaskConfig {
    fn default() -> Self {
        Self {
            composite: CompositeConfig::default(),
            smooth: SmoothConfig {
                median_size: 10,
                gauss_sigma: 1.34,
            },
            preprocess: MorphSpec::new(MorphMethod::Scharr, 0),
            threshold: ThresholdConfig {
                global_method: GlobalMethod::AveTriMed,
                cutoff_size: 150,
                local_adjust: 0.5,
                ..ThresholdConfig::default()
            },
            fill: FillFilterConfig {
                min_hole_width: 0,
                max_hole_width: 50,
                small_obj_width: 45,
                method: ExecMode::ThreeD,
            },
            watershed: ExecMode::ThreeD,
        }
    }
}

impl CellmaskConfig {
    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        self.composite.validate(channels)?;
        self.smooth.validate()?;
        self.threshold.validate()?;
        self.fill.validate()
    }
}

/// 仅保留 `labels == keep` 的体素, 记为标签 1.
fn keep_only(labels: ArrayView3<Label>, keep: Option<Label>) -> Labels {
    match keep {
        Some(k) => labels.mapv(|l| Label::from(l == k)),
        None => Labels::zeros(labels.raw_dim()),
    }
}

/// 由合成图像推断细胞掩膜.
///
/// 以细胞核实例为标记, 在阈值掩膜内对 `1 - 合成图像` 做分水岭,
/// 保留合成强度累计最大的分水岭区域并与同标签的细胞核合并, 最后填洞去小目标.
pub fn infer_cellmask_from_composite(
    stack: &ChannelStack,
    nuclei: ArrayView3<Label>,
    cfg: &CellmaskConfig,
) -> PipelineResult<Labels> {
    cfg.validate(stack.len())?;
    volume::check_same_shape("nuclei", stack.shape(), nuclei.dim())?;

    let composite = build_composite(stack, &cfg.composite)?;
    let smoothed = scale_and_smooth(composite.view(), &cfg.smooth);
    let pre = morph_op(smoothed.view(), MorphOp::Close, cfg.preprocess)?;
    let threshed =
        threshold_masked_object(stack, pre.view(), &cfg.threshold, cfg.composite.pm_channel)?;

    let img = volume::normalize(composite.view());
    let ws = masked_inverted_watershed(img.view(), nuclei, Some(threshed.view()), cfg.watershed);
    let keep = max_label(img.view(), ws.view(), None);
    log::debug!("细胞掩膜: 选中分水岭区域 {keep:?}");

    let cell = match keep {
        Some(k) => Zip::from(&ws).and(nuclei).map_collect(|&w, &n| w == k || n == k),
        None => Mask::from_elem(ws.raw_dim(), false),
    };
    let filled = fill_and_filter_linear_size(cell.view(), &cfg.fill);
    Ok(relabel(volume::to_labels(filled.view()).view()))
}

/// 细胞质与细胞核的并集, 填洞去小目标后重标记.
pub fn infer_cellmask_from_cytoplasm(
    cytoplasm: ArrayView3<bool>,
    nuclei: ArrayView3<Label>,
    fill: &FillFilterConfig,
) -> PipelineResult<Labels> {
    fill.validate()?;
    volume::check_same_shape("nuclei", cytoplasm.dim(), nuclei.dim())?;
    let union = Zip::from(cytoplasm).and(nuclei).map_collect(|&c, &n| c || n > 0);
    let filled = fill_and_filter_linear_size(union.view(), fill);
    Ok(relabel(volume::to_labels(filled.view()).view()))
}

/// 候选细胞: 细胞质与种子求并, 逐切片填补宽度不超过 `fillhole_max` 的缝隙,
/// 再以种子为标记在其内部对反转合成图像做三维分水岭.
pub fn combine_cytoplasm_and_nuclei(
    cytoplasm: ArrayView3<bool>,
    seeds: ArrayView3<Label>,
    composite: ArrayView3<f32>,
    fillhole_max: usize,
) -> PipelineResult<Labels> {
    volume::check_same_shape("nuclei_seeds", cytoplasm.dim(), seeds.dim())?;
    volume::check_same_shape("composite", cytoplasm.dim(), composite.dim())?;
    let union = Zip::from(cytoplasm).and(seeds).map_collect(|&c, &s| c || s > 0);
    let slice = ExecMode::SliceBySlice;
    let shell = fill_holes(union.view(), 0, slice.linear_to_count(fillhole_max), slice);
    let img = volume::normalize(composite);
    Ok(masked_inverted_watershed(
        img.view(),
        seeds,
        Some(shell.view()),
        ExecMode::ThreeD,
    ))
}

/// 在候选细胞中保留合成强度累计最大的一个, 记为标签 1.
///
/// 只有种子不接触侧向边界的候选参与比较; 若所有种子都接触边界, 则全部参与.
pub fn select_highest_intensity_cell(
    composite: ArrayView3<f32>,
    cells: ArrayView3<Label>,
    seeds: ArrayView3<Label>,
) -> PipelineResult<Labels> {
    volume::check_same_shape("cellmasks", composite.dim(), cells.dim())?;
    volume::check_same_shape("nuclei_seeds", composite.dim(), seeds.dim())?;
    let interior = interior_labels(seeds);
    let targets = (!interior.is_empty()).then_some(interior.as_slice());
    Ok(keep_only(cells, max_label(composite, cells, targets)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth;
    use crate::volume::Intensity;

    #[test]
    fn test_cellmask_from_composite_picks_bright_cell() {
        let shape = (4, 32, 32);
        // 左侧细胞更亮
        let bright = synth::cylinder(shape, (16, 8), 6.0);
        let dim = synth::cylinder(shape, (16, 24), 6.0);
        let cyto = Intensity::from_shape_fn(shape, |i| {
            if bright[i] {
                90.0
            } else if dim[i] {
                40.0
            } else {
                1.0
            }
        });
        let stack = ChannelStack::new(vec![cyto]).unwrap();
        let mut nuclei = Labels::zeros(shape);
        for z in 0..4 {
            nuclei[(z, 16, 8)] = 1;
            nuclei[(z, 16, 24)] = 2;
        }
        let cfg = CellmaskConfig {
            composite: CompositeConfig::with_weights(vec![1.0]),
            smooth: SmoothConfig {
                median_size: 0,
                gauss_sigma: 0.0,
            },
            preprocess: MorphSpec::default(),
            threshold: ThresholdConfig {
                cutoff_size: 10,
                local_adjust: 0.1,
                ..ThresholdConfig::default()
            },
            fill: FillFilterConfig {
                small_obj_width: 2,
                ..FillFilterConfig::default()
            },
            watershed: ExecMode::ThreeD,
        };
        let cell = infer_cellmask_from_composite(&stack, nuclei.view(), &cfg).unwrap();
        assert_eq!(cell[(2, 16, 8)], 1);
        assert_eq!(cell[(2, 16, 24)], 0);
        assert_eq!(cell.iter().copied().max(), Some(1));
    }

    #[test]
    fn test_cellmask_from_cytoplasm_closes_nucleus() {
        let shape = (3, 20, 20);
        let cell = synth::cylinder(shape, (10, 10), 7.0);
        let nuc = synth::cylinder(shape, (10, 10), 3.0);
        let cyto = Zip::from(&cell).and(&nuc).map_collect(|&c, &n| c && !n);
        let fill = FillFilterConfig {
            max_hole_width: 0,
            small_obj_width: 1,
            ..FillFilterConfig::default()
        };
        let out = infer_cellmask_from_cytoplasm(cyto.view(), volume::to_labels(nuc.view()).view(), &fill)
            .unwrap();
        Zip::from(&out).and(&cell).for_each(|&o, &c| assert_eq!(o > 0, c));
    }

    #[test]
    fn test_select_prefers_interior_seed() {
        let shape = (2, 12, 12);
        let mut cells = Labels::zeros(shape);
        let mut seeds = Labels::zeros(shape);
        let mut img = Intensity::zeros(shape);
        for z in 0..2 {
            for h in 0..6 {
                for w in 0..6 {
                    // 贴边的 1 号细胞更亮
                    cells[(z, h, w)] = 1;
                    img[(z, h, w)] = 5.0;
                }
            }
            for h in 6..10 {
                for w in 6..10 {
                    cells[(z, h, w)] = 2;
                    img[(z, h, w)] = 1.0;
                }
            }
            seeds[(z, 0, 0)] = 1;
            seeds[(z, 8, 8)] = 2;
        }
        let out = select_highest_intensity_cell(img.view(), cells.view(), seeds.view()).unwrap();
        assert_eq!(out[(0, 8, 8)], 1);
        assert_eq!(out[(0, 2, 2)], 0);

        // 没有内部种子时所有候选都参与
        seeds[(0, 8, 8)] = 0;
        seeds[(1, 8, 8)] = 0;
        seeds[(0, 11, 11)] = 2;
        let out = select_highest_intensity_cell(img.view(), cells.view(), seeds.view()).unwrap();
        assert_eq!(out[(0, 2, 2)], 1);
    }

    #[test]
    fn test_combine_cytoplasm_and_nuclei_splits_cells() {
        let shape = (3, 20, 32);
        let left = synth::cylinder(shape, (10, 9), 7.0);
        let right = synth::cylinder(shape, (10, 23), 7.0);
        let holes = Zip::from(&synth::cylinder(shape, (10, 9), 3.0))
            .and(&synth::cylinder(shape, (10, 23), 3.0))
            .map_collect(|&a, &b| a || b);
        let cyto = Mask::from_shape_fn(shape, |i| (left[i] || right[i]) && !holes[i]);
        let mut seeds = Labels::zeros(shape);
        for z in 0..3 {
            seeds[(z, 10, 9)] = 1;
            seeds[(z, 10, 23)] = 2;
        }
        let composite = cyto.mapv(|c| if c { 1.0 } else { 0.0 });
        let cells = combine_cytoplasm_and_nuclei(cyto.view(), seeds.view(), composite.view(), 8).unwrap();
        assert_eq!(cells[(1, 10, 5)], 1);
        assert_eq!(cells[(1, 10, 27)], 2);
        // 孔洞被填上并归入各自细胞
        assert_eq!(cells[(1, 10, 10)], 1);
        assert_eq!(cells[(1, 0, 0)], 0);
    }
}
