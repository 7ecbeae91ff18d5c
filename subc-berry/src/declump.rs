//! 分水岭去粘连.
//!
//! 粘连在一起的目标 (典型情形是相互接触的细胞核) 在二值分割里只是一个连通域.
//! 这里先用迭代高通残差找到每个目标的 "核心" 作为种子, 再在原分割内部以
//! `max(raw) - raw` 为高程做分水岭, 最后按 `(分割标签, 分水岭标签)` 重新编号.

use crate::config::{ExecMode, SmoothConfig};
use crate::error::{check_non_negative, PipelineResult};
use crate::filters::threshold::{finite_values, otsu};
use crate::filters::{connected_components, relabel, relabel_pairs, size_filter, smooth, watershed};
use crate::morph::{morph_op, MorphMethod, MorphOp, MorphSpec};
use crate::volume::{self, Connectivity, Intensity, Labels, Mask};
use crate::Label;
use ndarray::{ArrayView3, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 去粘连参数.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeclumpConfig {
    /// 是否启用.
    pub enabled: bool,
    /// 低通高斯标准差.
    pub sigma: f64,
    /// 低通中值窗口, 不大于 1 时跳过.
    pub median_size: usize,
    /// 高通迭代次数, 为 0 时等同于不启用.
    pub iterations: usize,
    /// 迭代结束后是否做一次灰度开运算.
    pub open: bool,
    /// Otsu 阈值缩放系数.
    pub thresh_adj: f32,
    /// 种子最小体素数.
    pub min_size: usize,
}

impl Default for DeclumpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sigma: 1.0,
            median_size: 0,
            iterations: 1,
            open: false,
            thresh_adj: 1.0,
            min_size: 0,
        }
    }
}

impl DeclumpConfig {
    /// 以给定的高通参数创建一个启用的配置.
    pub fn enabled_with(sigma: f64, median_size: usize, iterations: usize) -> Self {
        Self {
            enabled: true,
            sigma,
            median_size,
            iterations,
            ..Self::default()
        }
    }

    /// 是否真正执行去粘连.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.enabled && self.iterations >= 1
    }

    /// 校验参数.
    pub fn validate(&self) -> PipelineResult<()> {
        check_non_negative("sigma", self.sigma)?;
        check_non_negative("thresh_adj", self.thresh_adj as f64)
    }
}

/// 迭代高通残差: `residual = max(residual - lowpass(residual), 0)`.
pub fn highpass(raw: ArrayView3<f32>, cfg: &DeclumpConfig) -> PipelineResult<Intensity> {
    let lowpass = SmoothConfig {
        median_size: cfg.median_size,
        gauss_sigma: cfg.sigma,
    };
    let mut residual = raw.to_owned();
    for _ in 0..cfg.iterations {
        let low = smooth(residual.view(), &lowpass);
        Zip::from(&mut residual)
            .and(&low)
            .for_each(|r, &l| *r = (*r - l).max(0.0));
    }
    if cfg.open {
        residual = morph_op(residual.view(), MorphOp::Open, MorphSpec::new(MorphMethod::Ball, 0))?;
    }
    Ok(residual)
}

/// 高通 + Otsu 种子提取: `residual >= otsu * thresh_adj`, 再去掉小于
/// `min_size` 个体素的连通域. 残差为常量时没有种子.
pub fn extract_seeds(raw: ArrayView3<f32>, cfg: &DeclumpConfig) -> PipelineResult<Mask> {
    cfg.validate()?;
    let residual = highpass(raw, cfg)?;
    let Some(t) = otsu(&finite_values(residual.view())) else {
        log::debug!("高通残差为常量, 无种子");
        return Ok(Mask::from_elem(raw.raw_dim(), false));
    };
    let t = t * cfg.thresh_adj;
    let seeds = residual.mapv(|r| r >= t);
    Ok(size_filter(seeds.view(), cfg.min_size, ExecMode::ThreeD))
}

/// 分水岭去粘连.
///
/// 未启用或迭代次数为 0 时返回 `seg` 的规范化重标记. 否则:
///
/// 1. 规范化重标记 `seg`;
/// 2. 以 26-连通标记的种子为标记, 在 `seg > 0` 内对 `max(raw) - raw` 做分水岭;
/// 3. 按 `(seg 标签, 分水岭标签)` 对做 26-连通重标记.
///
/// 分水岭未到达的体素 (标签 0) 仍按其 `seg` 标签自成区域. `seg` 的背景保持为 0.
pub fn declump(
    raw: ArrayView3<f32>,
    seg: ArrayView3<Label>,
    cfg: &DeclumpConfig,
) -> PipelineResult<Labels> {
    volume::check_same_shape("seg", raw.dim(), seg.dim())?;
    cfg.validate()?;
    let seg = relabel(seg);
    if !cfg.is_active() {
        return Ok(seg);
    }

    let seeds = extract_seeds(raw, cfg)?;
    let markers = connected_components(seeds.view(), Connectivity::Full3d);
    let top = volume::finite_min_max(raw).map_or(0.0, |(_, hi)| hi);
    let elevation = raw.mapv(|v| top - v);
    let inside = volume::to_mask(seg.view());
    let ws = watershed(
        elevation.view(),
        markers.view(),
        Some(inside.view()),
        Connectivity::Full3d,
    );
    let out = relabel_pairs(seg.view(), ws.view(), Connectivity::Full3d);

    log::debug!(
        "去粘连: 种子 {} 个, 输入 {} 个实例, 输出 {} 个实例",
        markers.iter().copied().max().unwrap_or(0),
        seg.iter().copied().max().unwrap_or(0),
        out.iter().copied().max().unwrap_or(0),
    );
    Ok(out)
}
