//! 细胞核推断.

use crate::config::{ExecMode, FillFilterConfig, SmoothConfig};
use crate::declump::{declump, DeclumpConfig};
use crate::error::{check_hole_bounds, check_non_negative, PipelineError, PipelineResult};
use crate::filters::threshold::li_log;
use crate::filters::{
    connected_components, fill_and_filter_linear_size, fill_holes, relabel, scale_and_smooth,
    size_filter,
};
use crate::volume::{self, ChannelStack, Connectivity, Labels};
use ndarray::{ArrayView3, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 由细胞核标记通道推断细胞核的参数.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NucleusConfig {
    /// 细胞核通道.
    pub channel: usize,
    /// 平滑.
    pub smooth: SmoothConfig,
    /// 对数 Li 阈值的缩放系数.
    pub thresh_factor: f32,
    /// 阈值下限 (归一化强度).
    pub thresh_min: f32,
    /// 阈值上限 (归一化强度).
    pub thresh_max: f32,
    /// 孔洞填充与小目标过滤.
    pub fill: FillFilterConfig,
    /// 去粘连.
    pub declump: DeclumpConfig,
}

impl Default for NucleusConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            smooth: SmoothConfig {
                median_size: 4,
                gauss_sigma: 1.34,
            },
            thresh_factor: 0.9,
            thresh_min: 0.1,
            thresh_max: 1.0,
            fill: FillFilterConfig {
                min_hole_width: 0,
                max_hole_width: 25,
                small_obj_width: 15,
                method: ExecMode::ThreeD,
            },
            declump: DeclumpConfig::default(),
        }
    }
}

impl NucleusConfig {
    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        if self.channel >= channels {
            return Err(PipelineError::ChannelOutOfRange {
                name: "nuc_channel",
                index: self.channel,
                channels,
            });
        }
        self.smooth.validate()?;
        check_non_negative("thresh_factor", self.thresh_factor as f64)?;
        if !(self.thresh_min <= self.thresh_max) {
            return Err(PipelineError::invalid(
                "thresh_min",
                format!("下限 {} 大于上限 {}", self.thresh_min, self.thresh_max),
            ));
        }
        self.fill.validate()?;
        self.declump.validate()
    }
}

/// 由细胞核标记通道推断细胞核实例.
///
/// 归一化平滑后以 `clamp(li_log * factor, min, max)` 二值化, 填洞去小目标,
/// 规范化重标记, 最后按需以原始细胞核通道去粘连. 通道为常量时结果为空.
pub fn infer_nuclei_from_label(stack: &ChannelStack, cfg: &NucleusConfig) -> PipelineResult<Labels> {
    cfg.validate(stack.len())?;
    let raw = stack.channel("nuc_channel", cfg.channel)?;
    let img = scale_and_smooth(raw, &cfg.smooth);

    let Some(li) = li_log(img.view()) else {
        log::debug!("细胞核通道无可用阈值");
        return Ok(Labels::zeros(raw.raw_dim()));
    };
    let t = (li * cfg.thresh_factor).clamp(cfg.thresh_min, cfg.thresh_max);
    let mask = img.mapv(|v| v > t);
    let filled = fill_and_filter_linear_size(mask.view(), &cfg.fill);
    let labels = relabel(volume::to_labels(filled.view()).view());
    log::debug!(
        "细胞核: 阈值 {t}, 实例 {} 个",
        labels.iter().copied().max().unwrap_or(0)
    );

    if cfg.declump.is_active() {
        declump(raw, labels.view(), &cfg.declump)
    } else {
        Ok(labels)
    }
}

/// 由细胞质反推细胞核的参数.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NucleusFromCytoConfig {
    /// 最小孔洞宽度.
    pub min_hole_width: usize,
    /// 最大孔洞宽度.
    pub max_hole_width: usize,
    /// 填洞方式.
    pub fill_method: ExecMode,
    /// 小目标宽度.
    pub small_obj_width: usize,
    /// 过滤方式.
    pub filter_method: ExecMode,
}

impl Default for NucleusFromCytoConfig {
    fn default() -> Self {
        Self {
            min_hole_width: 0,
            max_hole_width: 40,
            fill_method: ExecMode::SliceBySlice,
            small_obj_width: 5,
            filter_method: ExecMode::ThreeD,
        }
    }
}

impl NucleusFromCytoConfig {
    /// 校验孔洞上下界.
    pub fn validate(&self) -> PipelineResult<()> {
        check_hole_bounds("nuc_min_hole_width", self.min_hole_width, self.max_hole_width)
    }
}

/// 细胞质中的孔洞即细胞核: 填洞后与细胞质做异或, 去小目标, 重标记.
pub fn infer_nuclei_from_cytoplasm(
    cytoplasm: ArrayView3<bool>,
    cfg: &NucleusFromCytoConfig,
) -> PipelineResult<Labels> {
    cfg.validate()?;
    let fm = cfg.fill_method;
    let filled = fill_holes(
        cytoplasm,
        fm.linear_to_count(cfg.min_hole_width),
        fm.linear_to_count(cfg.max_hole_width),
        fm,
    );
    let holes = Zip::from(&filled).and(cytoplasm).map_collect(|&f, &c| f ^ c);
    let fm = cfg.filter_method;
    let nuclei = size_filter(holes.view(), fm.linear_to_count(cfg.small_obj_width), fm);
    Ok(relabel(volume::to_labels(nuclei.view()).view()))
}

/// 细胞核种子: 细胞质中逐切片面积不超过 `max_nuclei_width^2` 的孔洞,
/// 去掉体积小于 `small_obj_width^3` 的连通域后按 26-连通编号.
pub fn segment_nuclei_seeds(
    cytoplasm: ArrayView3<bool>,
    max_nuclei_width: usize,
    small_obj_width: usize,
) -> Labels {
    let slice = ExecMode::SliceBySlice;
    let filled = fill_holes(cytoplasm, 1, slice.linear_to_count(max_nuclei_width), slice);
    let holes = Zip::from(&filled).and(cytoplasm).map_collect(|&f, &c| f && !c);
    let kept = size_filter(
        holes.view(),
        ExecMode::ThreeD.linear_to_count(small_obj_width),
        ExecMode::ThreeD,
    );
    connected_components(kept.view(), Connectivity::Full3d)
}
