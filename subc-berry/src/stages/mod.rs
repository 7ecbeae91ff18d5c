//! 细胞核, 细胞, 细胞质推断阶段.
//!
//! 每个阶段都是纯函数: 输入只读, 输出新分配的体数据, 参数在入口处校验.

pub mod cellmask;
pub mod cytoplasm;
pub mod membrane;
pub mod nucleus;

pub use cellmask::{
    combine_cytoplasm_and_nuclei, infer_cellmask_from_composite, infer_cellmask_from_cytoplasm,
    select_highest_intensity_cell, CellmaskConfig,
};
pub use cytoplasm::{
    infer_cytoplasm, infer_cytoplasm_from_composite, mask_cytoplasm_nuclei, CytoplasmCompositeConfig,
};
pub use membrane::{
    choose_cell, close_and_fill, double_watershed, fill_and_bind, find_nuc, infer_intermediate_masks,
    invert_pm_watershed, mix_nuc_and_fill, CloseFillConfig, FillBindConfig, Intermediate,
    IntermediateConfig, IntermediateMaskConfig, MixConfig, SearchTarget,
};
pub use nucleus::{
    infer_nuclei_from_cytoplasm, infer_nuclei_from_label, segment_nuclei_seeds, NucleusConfig,
    NucleusFromCytoConfig,
};
