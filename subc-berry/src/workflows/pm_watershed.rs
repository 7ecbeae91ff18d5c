//! 流程 D: 全部细胞核实例 + 反转质膜分水岭选出的单个细胞.

use crate::composite::{build_composite, CompositeConfig};
use crate::config::ExecMode;
use crate::error::{check_hole_bounds, PipelineError, PipelineResult};
use crate::filters::fill_holes;
use crate::stages::{choose_cell, infer_nuclei_from_label, invert_pm_watershed, NucleusConfig};
use crate::volume::{self, ChannelStack, MaskKind, MaskStack};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 流程 D 参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PmWatershedConfig {
    /// 细胞核.
    pub nucleus: NucleusConfig,
    /// 合成, 其 `pm_channel` 为必填.
    pub composite: CompositeConfig,
    /// 分水岭执行模式.
    pub watershed: ExecMode,
    /// 最小孔洞体素数 (或逐切片面积).
    pub hole_min: usize,
    /// 最大孔洞体素数 (或逐切片面积).
    pub hole_max: usize,
    /// 是否逐切片填洞.
    pub fill_2d: bool,
}

impl Default for PmWatershedConfig {
    fn default() -> Self {
        Self {
            nucleus: NucleusConfig::default(),
            composite: CompositeConfig {
                pm_channel: Some(0),
                rescale: false,
                ..CompositeConfig::default()
            },
            watershed: ExecMode::ThreeD,
            hole_min: 0,
            hole_max: 30,
            fill_2d: true,
        }
    }
}

impl PmWatershedConfig {
    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        self.nucleus.validate(channels)?;
        self.composite.validate(channels)?;
        let pm = self.pm_channel()?;
        if pm >= channels {
            return Err(PipelineError::ChannelOutOfRange {
                name: "pm_channel",
                index: pm,
                channels,
            });
        }
        check_hole_bounds("hole_min", self.hole_min, self.hole_max)
    }

    fn pm_channel(&self) -> PipelineResult<usize> {
        self.composite
            .pm_channel
            .ok_or_else(|| PipelineError::invalid("pm_channel", "流程 D 必须指定质膜通道"))
    }
}

/// 输出 `[细胞核实例, 细胞]`.
pub(crate) fn run(stack: &ChannelStack, cfg: &PmWatershedConfig) -> PipelineResult<MaskStack> {
    cfg.validate(stack.len())?;
    let nuclei = infer_nuclei_from_label(stack, &cfg.nucleus)?;
    let composite = build_composite(stack, &cfg.composite)?;
    let ws = invert_pm_watershed(stack, nuclei.view(), cfg.pm_channel()?, cfg.watershed)?;
    let cell = choose_cell(composite.view(), nuclei.view(), ws.view())?;

    let mode = if cfg.fill_2d {
        ExecMode::SliceBySlice
    } else {
        ExecMode::ThreeD
    };
    let filled = fill_holes(volume::to_mask(cell.view()).view(), cfg.hole_min, cfg.hole_max, mode);
    MaskStack::new(vec![
        (MaskKind::NucleusLabels, nuclei),
        (MaskKind::Cellmask, volume::to_labels(filled.view())),
    ])
}
