//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Label};

pub use crate::error::{PipelineError, PipelineResult};

pub use crate::volume::{ChannelStack, Connectivity, Intensity, Labels, Mask, MaskKind, MaskStack};

pub use crate::config::{ExecMode, FillFilterConfig, SmoothConfig};

pub use crate::composite::{CompositeConfig, GlobalMethod, ThresholdConfig};
pub use crate::declump::{declump, DeclumpConfig};
pub use crate::morph::{morph_op, MorphMethod, MorphOp, MorphSpec};

pub use crate::io::{read_channel_stack, save_slice_png, write_mask_stack, ImgWriteVis};

pub use crate::workflows::{
    run, CytoFirstConfig, DualMaskConfig, PmWatershedConfig, SeededConfig, StandardConfig,
    WorkflowConfig,
};
