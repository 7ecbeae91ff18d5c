//! 流程 C: 两张中间掩膜 + 双分水岭.

use crate::config::ExecMode;
use crate::error::{PipelineError, PipelineResult};
use crate::stages::{
    double_watershed, fill_and_bind, find_nuc, infer_intermediate_masks, mix_nuc_and_fill,
    CloseFillConfig, FillBindConfig, IntermediateMaskConfig, MixConfig, NucleusConfig,
    SearchTarget,
};
use crate::volume::{self, ChannelStack, MaskKind, MaskStack};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 流程 C 参数.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DualMaskConfig {
    /// 中间掩膜 I/II.
    pub intermediate: IntermediateMaskConfig,
    /// 细胞核.
    pub nucleus: NucleusConfig,
    /// 挑选细胞核时参照的中间掩膜.
    pub search: SearchTarget,
    /// 细胞核并入中间掩膜 I.
    pub mix_first: MixConfig,
    /// 细胞核并入中间掩膜 II.
    pub mix_second: MixConfig,
    /// 分水岭执行模式.
    pub watershed: ExecMode,
    /// 合并后的闭合填洞.
    pub close: CloseFillConfig,
    /// 可选的最终补洞与质膜约束.
    pub bind: Option<FillBindConfig>,
}

impl DualMaskConfig {
    /// 针对 `channels` 个通道校验.
    pub fn validate(&self, channels: usize) -> PipelineResult<()> {
        self.intermediate.validate(channels)?;
        let (a, b) = (
            self.intermediate.first.composite.pm_channel,
            self.intermediate.second.composite.pm_channel,
        );
        if a != b {
            return Err(PipelineError::invalid(
                "pm_channel",
                format!("两张中间掩膜的质膜通道不一致: {a:?} 与 {b:?}"),
            ));
        }
        self.nucleus.validate(channels)?;
        self.mix_first.fill.validate()?;
        self.mix_second.fill.validate()?;
        self.close.validate()?;
        self.bind.as_ref().map_or(Ok(()), |b| b.validate())
    }

    /// 两张中间掩膜共用的质膜通道.
    #[inline]
    pub fn pm_channel(&self) -> Option<usize> {
        self.intermediate.first.composite.pm_channel
    }
}

/// 输出 `[细胞核, 细胞]`.
pub(crate) fn run(stack: &ChannelStack, cfg: &DualMaskConfig) -> PipelineResult<MaskStack> {
    cfg.validate(stack.len())?;
    let inter = infer_intermediate_masks(stack, &cfg.intermediate)?;
    let nucleus = find_nuc(stack, &cfg.nucleus, cfg.search.pick(&inter).mask.view())?;

    let first = mix_nuc_and_fill(nucleus.view(), inter[0].mask.view(), &cfg.mix_first)?;
    let second = mix_nuc_and_fill(nucleus.view(), inter[1].mask.view(), &cfg.mix_second)?;
    let mut cell = double_watershed(
        nucleus.view(),
        [
            (inter[0].composite.view(), first.view()),
            (inter[1].composite.view(), second.view()),
        ],
        cfg.watershed,
        &cfg.close,
    )?;
    if let Some(bind) = cfg.bind.as_ref() {
        cell = fill_and_bind(stack, cell.view(), cfg.pm_channel(), bind)?;
    }
    MaskStack::new(vec![
        (MaskKind::Nucleus, nucleus),
        (MaskKind::Cellmask, volume::to_labels(cell.view())),
    ])
}
