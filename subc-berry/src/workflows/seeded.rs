//! 流程 B: 细胞质孔洞作为细胞核种子, 种子分水岭得到候选细胞, 保留最亮的一个.

use crate::error::PipelineResult;
use crate::stages::cytoplasm::cytoplasm_and_composite;
use crate::stages::{
    combine_cytoplasm_and_nuclei, mask_cytoplasm_nuclei, segment_nuclei_seeds,
    select_highest_intensity_cell, CytoplasmCompositeConfig,
};
use crate::volume::{ChannelStack, MaskStack};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 流程 B 参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SeededConfig {
    /// 细胞质.
    pub cytoplasm: CytoplasmCompositeConfig,
    /// 细胞核最大宽度.
    pub max_nuclei_width: usize,
    /// 细胞核种子的小目标宽度.
    pub nuc_small_obj_width: usize,
    /// 细胞质与细胞核之间缝隙的最大宽度.
    pub cell_fillhole_max: usize,
    /// 最终细胞质/细胞核的小目标宽度.
    pub cyto_small_obj_width: usize,
}

impl Default for SeededConfig {
    fn default() -> Self {
        Self {
            cytoplasm: CytoplasmCompositeConfig::default(),
            max_nuclei_width: 80,
            nuc_small_obj_width: 15,
            cell_fillhole_max: 16,
            cyto_small_obj_width: 40,
        }
    }
}

impl SeededConfig {
    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        self.cytoplasm.validate(channels)
    }
}

/// 输出 `[细胞核, 细胞, 细胞质]`, 每层至多一个实例.
pub(crate) fn run(stack: &ChannelStack, cfg: &SeededConfig) -> PipelineResult<MaskStack> {
    cfg.validate(stack.len())?;
    let (cyto, composite) = cytoplasm_and_composite(stack, &cfg.cytoplasm)?;
    let seeds = segment_nuclei_seeds(cyto.view(), cfg.max_nuclei_width, cfg.nuc_small_obj_width);
    log::debug!("细胞核种子 {} 个", seeds.iter().copied().max().unwrap_or(0));
    let cells =
        combine_cytoplasm_and_nuclei(cyto.view(), seeds.view(), composite.view(), cfg.cell_fillhole_max)?;
    let cell = select_highest_intensity_cell(composite.view(), cells.view(), seeds.view())?;
    mask_cytoplasm_nuclei(cell.view(), cyto.view(), cfg.cyto_small_obj_width)
}
