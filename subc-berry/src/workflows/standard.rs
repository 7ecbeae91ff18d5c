//! 默认流程: 细胞核 -> 细胞 -> 细胞质.

use crate::error::PipelineResult;
use crate::filters::connected_components;
use crate::stages::{
    infer_cellmask_from_composite, infer_cytoplasm, infer_nuclei_from_label, CellmaskConfig,
    NucleusConfig,
};
use crate::volume::{ChannelStack, Connectivity, Labels, MaskKind, MaskStack};
use crate::Label;
use ndarray::{ArrayView3, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 默认流程参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StandardConfig {
    /// 细胞核.
    pub nucleus: NucleusConfig,
    /// 细胞掩膜.
    pub cellmask: CellmaskConfig,
    /// 细胞质是否包含腐蚀掉的细胞核外缘.
    pub erode_nuclei: bool,
}

impl Default for StandardConfig {
    fn default() -> Self {
        Self {
            nucleus: NucleusConfig::default(),
            cellmask: CellmaskConfig::default(),
            erode_nuclei: true,
        }
    }
}

impl StandardConfig {
    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        self.nucleus.validate(channels)?;
        self.cellmask.validate(channels)
    }
}

/// 细胞内的细胞核体素, 按 26-连通重新编号.
fn nuclei_in_cell(nuclei: ArrayView3<Label>, cell: ArrayView3<Label>) -> Labels {
    let inside = Zip::from(nuclei)
        .and(cell)
        .map_collect(|&n, &c| n > 0 && c > 0);
    connected_components(inside.view(), Connectivity::Full3d)
}

/// 输出 `[细胞核, 细胞, 细胞质]`. 细胞核限制在选中的细胞内.
pub(crate) fn run(stack: &ChannelStack, cfg: &StandardConfig) -> PipelineResult<MaskStack> {
    cfg.validate(stack.len())?;
    let nuclei = infer_nuclei_from_label(stack, &cfg.nucleus)?;
    let cell = infer_cellmask_from_composite(stack, nuclei.view(), &cfg.cellmask)?;
    let cyto = infer_cytoplasm(nuclei.view(), cell.view(), cfg.erode_nuclei)?;
    let nucleus = nuclei_in_cell(nuclei.view(), cell.view());
    MaskStack::new(vec![
        (MaskKind::Nucleus, nucleus),
        (MaskKind::Cellmask, cell),
        (MaskKind::Cytoplasm, cyto),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nuclei_in_cell_relabels_fragments() {
        let shape = (2, 8, 12);
        let mut nuclei = Labels::zeros(shape);
        let mut cell = Labels::zeros(shape);
        for z in 0..2 {
            for w in 1..11 {
                cell[(z, 4, w)] = 1;
            }
            // 同一个细胞核被细胞边界切成两段, 另有一个细胞外的核
            nuclei[(z, 4, 2)] = 3;
            nuclei[(z, 4, 3)] = 3;
            nuclei[(z, 4, 8)] = 3;
            nuclei[(z, 1, 1)] = 5;
        }
        let out = nuclei_in_cell(nuclei.view(), cell.view());
        assert_eq!(out[(0, 4, 2)], 1);
        assert_eq!(out[(1, 4, 3)], 1);
        assert_eq!(out[(0, 4, 8)], 2);
        assert_eq!(out[(0, 1, 1)], 0);
        assert_eq!(out.iter().copied().max(), Some(2));
    }
}
