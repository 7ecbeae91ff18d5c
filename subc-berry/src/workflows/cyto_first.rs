//! 流程 A: 先由合成图像分割细胞质, 其孔洞即细胞核, 二者合并为细胞.

use crate::config::{ExecMode, FillFilterConfig};
use crate::error::PipelineResult;
use crate::stages::{
    infer_cellmask_from_cytoplasm, infer_cytoplasm_from_composite, infer_nuclei_from_cytoplasm,
    CytoplasmCompositeConfig, NucleusFromCytoConfig,
};
use crate::volume::{self, ChannelStack, MaskKind, MaskStack};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 流程 A 参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CytoFirstConfig {
    /// 细胞质.
    pub cytoplasm: CytoplasmCompositeConfig,
    /// 细胞核.
    pub nucleus: NucleusFromCytoConfig,
    /// 细胞.
    pub cell: FillFilterConfig,
}

impl Default for CytoFirstConfig {
    fn default() -> Self {
        Self {
            cytoplasm: CytoplasmCompositeConfig::default(),
            nucleus: NucleusFromCytoConfig::default(),
            cell: FillFilterConfig {
                min_hole_width: 0,
                max_hole_width: 0,
                small_obj_width: 0,
                method: ExecMode::ThreeD,
            },
        }
    }
}

impl CytoFirstConfig {
    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        self.cytoplasm.validate(channels)?;
        self.nucleus.validate()?;
        self.cell.validate()
    }
}

/// 输出 `[细胞核, 细胞, 细胞质]`.
pub(crate) fn run(stack: &ChannelStack, cfg: &CytoFirstConfig) -> PipelineResult<MaskStack> {
    cfg.validate(stack.len())?;
    let cyto = infer_cytoplasm_from_composite(stack, &cfg.cytoplasm)?;
    let nuclei = infer_nuclei_from_cytoplasm(cyto.view(), &cfg.nucleus)?;
    let cell = infer_cellmask_from_cytoplasm(cyto.view(), nuclei.view(), &cfg.cell)?;
    MaskStack::new(vec![
        (MaskKind::Nucleus, nuclei),
        (MaskKind::Cellmask, cell),
        (MaskKind::Cytoplasm, volume::to_labels(cyto.view())),
    ])
}
