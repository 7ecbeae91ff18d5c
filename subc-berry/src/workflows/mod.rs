//! 完整的掩膜推断流程.
//!
//! | 流程     | 输出                         |
//! |----------|------------------------------|
//! | 默认     | `[细胞核, 细胞, 细胞质]`     |
//! | A        | `[细胞核, 细胞, 细胞质]`     |
//! | B        | `[细胞核, 细胞, 细胞质]`     |
//! | C        | `[细胞核, 细胞]`             |
//! | D        | `[细胞核实例, 细胞]`         |

mod cyto_first;
mod dual_mask;
mod pm_watershed;
mod seeded;
mod standard;

pub use cyto_first::CytoFirstConfig;
pub use dual_mask::DualMaskConfig;
pub use pm_watershed::PmWatershedConfig;
pub use seeded::SeededConfig;
pub use standard::StandardConfig;

use crate::error::PipelineResult;
use crate::volume::{ChannelStack, MaskStack};
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 流程及其参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "workflow"))]
pub enum WorkflowConfig {
    /// 默认流程.
    #[cfg_attr(feature = "serde", serde(rename = "default"))]
    Standard(StandardConfig),
    /// 流程 A.
    #[cfg_attr(feature = "serde", serde(rename = "A"))]
    CytoFirst(CytoFirstConfig),
    /// 流程 B.
    #[cfg_attr(feature = "serde", serde(rename = "B"))]
    Seeded(SeededConfig),
    /// 流程 C.
    #[cfg_attr(feature = "serde", serde(rename = "C"))]
    DualMask(DualMaskConfig),
    /// 流程 D.
    #[cfg_attr(feature = "serde", serde(rename = "D"))]
    PmWatershed(PmWatershedConfig),
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::Standard(StandardConfig::default())
    }
}

impl WorkflowConfig {
    /// 流程名.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Standard(_) => "default",
            Self::CytoFirst(_) => "A",
            Self::Seeded(_) => "B",
            Self::DualMask(_) => "C",
            Self::PmWatershed(_) => "D",
        }
    }

    /// 针对 `channels` 个通道校验全部参数.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        match self {
            Self::Standard(c) => c.validate(channels),
            Self::CytoFirst(c) => c.validate(channels),
            Self::Seeded(c) => c.validate(channels),
            Self::DualMask(c) => c.validate(channels),
            Self::PmWatershed(c) => c.validate(channels),
        }
    }
}

/// 运行流程.
///
/// 参数在计算前统一校验. 输出全为背景时记录一条警告, 通常意味着视野质量不佳.
pub fn run(stack: &ChannelStack, cfg: &WorkflowConfig) -> PipelineResult<MaskStack> {
    cfg.validate(stack.len())?;
    log::info!(
        "流程 {} 开始: {} 个通道, 形状 {:?}",
        cfg.name(),
        stack.len(),
        stack.shape()
    );
    let start = Instant::now();

    let masks = match cfg {
        WorkflowConfig::Standard(c) => standard::run(stack, c),
        WorkflowConfig::CytoFirst(c) => cyto_first::run(stack, c),
        WorkflowConfig::Seeded(c) => seeded::run(stack, c),
        WorkflowConfig::DualMask(c) => dual_mask::run(stack, c),
        WorkflowConfig::PmWatershed(c) => pm_watershed::run(stack, c),
    }?;

    if masks.is_all_background() {
        log::warn!("流程 {} 的全部掩膜均为空, 视野可能质量不佳", cfg.name());
    }
    log::info!("流程 {} 完成, 用时 {:?}", cfg.name(), start.elapsed());
    Ok(masks)
}
