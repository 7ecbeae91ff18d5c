//! 多通道体数据, 掩膜栈与逐切片执行.

pub mod grid;

use crate::error::{PipelineError, PipelineResult};
use crate::{Idx3d, Label};
use itertools::{Itertools, MinMaxResult};
use ndarray::{s, Array3, Array4, ArrayView3, Axis};
use num::ToPrimitive;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use grid::{Connectivity, Grid, Offset3d};

/// 单通道强度体数据.
pub type Intensity = Array3<f32>;

/// 实例标签体数据. 0 为背景.
pub type Labels = Array3<Label>;

/// 二值掩膜.
pub type Mask = Array3<bool>;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 有限值的最小值与最大值. 不存在有限值时返回 `None`.
pub fn finite_min_max(v: ArrayView3<f32>) -> Option<(f32, f32)> {
    match v.iter().copied().filter(|x| x.is_finite()).minmax() {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(x) => Some((x, x)),
        MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
    }
}

/// 最小-最大归一化到 `[0, 1]`. 常量体数据归一化为全零.
pub fn normalize(v: ArrayView3<f32>) -> Intensity {
    match finite_min_max(v) {
        Some((lo, hi)) if hi > lo => {
            let span = hi - lo;
            v.mapv(|x| (x - lo) / span)
        }
        _ => Intensity::zeros(v.raw_dim()),
    }
}

/// 标签转二值掩膜.
#[inline]
pub fn to_mask(labels: ArrayView3<Label>) -> Mask {
    labels.mapv(|l| l > 0)
}

/// 二值掩膜转单实例标签 (前景为 1).
#[inline]
pub fn to_labels(mask: ArrayView3<bool>) -> Labels {
    mask.mapv(Label::from)
}

/// 逐切片生成体数据: 第 `z` 个切片由 `op(z)` 生成, 其形状为 `(1, h, w)`.
///
/// 开启 `rayon` feature 时各切片并行计算, 结果与串行完全一致.
pub fn from_slabs<B, F>(shape: Idx3d, op: F) -> Array3<B>
where
    B: Clone + Default + Send + Sync,
    F: Fn(usize) -> Array3<B> + Sync + Send,
{
    let mut out = Array3::<B>::default(shape);

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            out.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(z, mut dst)| dst.assign(&op(z).index_axis(Axis(0), 0)));
        } else {
            for (z, mut dst) in out.axis_iter_mut(Axis(0)).enumerate() {
                dst.assign(&op(z).index_axis(Axis(0), 0));
            }
        }
    }
    out
}

/// 将三维算子 `op` 独立地作用在每个厚度为 1 的切片上.
pub fn map_slabs<A, B, F>(v: ArrayView3<A>, op: F) -> Array3<B>
where
    A: Sync,
    B: Clone + Default + Send + Sync,
    F: Fn(ArrayView3<A>) -> Array3<B> + Sync + Send,
{
    from_slabs(v.dim(), |z| op(v.slice(s![z..=z, .., ..])))
}

/// 检查两个体数据形状一致.
pub(crate) fn check_same_shape(name: &'static str, expected: Idx3d, found: Idx3d) -> PipelineResult<()> {
    if expected != found {
        return Err(PipelineError::ShapeMismatch {
            name,
            expected: vec![expected.0, expected.1, expected.2],
            found: vec![found.0, found.1, found.2],
        });
    }
    Ok(())
}

/// 同形状多通道强度体数据.
#[derive(Debug, Clone)]
pub struct ChannelStack {
    channels: Vec<Intensity>,
    shape: Idx3d,
}

impl ChannelStack {
    /// 由若干同形状通道创建. 通道为空或形状不一致时返回错误.
    pub fn new(channels: Vec<Intensity>) -> PipelineResult<Self> {
        let shape = channels
            .first()
            .map(|c| c.dim())
            .ok_or_else(|| PipelineError::invalid("channels", "至少需要一个通道"))?;
        for c in channels.iter() {
            check_same_shape("channels", shape, c.dim())?;
        }
        Ok(Self { channels, shape })
    }

    /// 由任意数值类型的原始通道创建, 无法转换为 `f32` 的值记为 `NaN`.
    pub fn from_raw<T: ToPrimitive + Copy>(channels: &[ArrayView3<T>]) -> PipelineResult<Self> {
        Self::new(
            channels
                .iter()
                .map(|c| c.mapv(|v| v.to_f32().unwrap_or(f32::NAN)))
                .collect(),
        )
    }

    /// 由 `(c, z, h, w)` 四维数组创建.
    pub fn from_array4(arr: Array4<f32>) -> PipelineResult<Self> {
        Self::new(arr.outer_iter().map(|c| c.to_owned()).collect())
    }

    /// 通道数.
    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// 是否不含通道. 由构造保证恒为 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// 单通道空间形状 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 获取第 `index` 个通道, `name` 为报错时使用的参数名.
    pub fn channel(&self, name: &'static str, index: usize) -> PipelineResult<ArrayView3<f32>> {
        self.channels
            .get(index)
            .map(|c| c.view())
            .ok_or(PipelineError::ChannelOutOfRange {
                name,
                index,
                channels: self.len(),
            })
    }

    /// 按顺序迭代全部通道.
    pub fn iter(&self) -> impl Iterator<Item = ArrayView3<f32>> + '_ {
        self.channels.iter().map(|c| c.view())
    }
}

/// 掩膜栈中每一层的语义.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MaskKind {
    /// 单个细胞核.
    Nucleus,
    /// 全部细胞核实例标签.
    NucleusLabels,
    /// 细胞.
    Cellmask,
    /// 细胞质.
    Cytoplasm,
}

/// 流水线最终输出: 顺序固定的标签层. 第 0 层总是细胞核.
#[derive(Debug, Clone)]
pub struct MaskStack {
    layers: Vec<(MaskKind, Labels)>,
}

impl MaskStack {
    /// 创建掩膜栈, 各层形状必须一致.
    pub fn new(layers: Vec<(MaskKind, Labels)>) -> PipelineResult<Self> {
        if let Some((_, first)) = layers.first() {
            let shape = first.dim();
            for (_, l) in layers.iter() {
                check_same_shape("mask_stack", shape, l.dim())?;
            }
        }
        Ok(Self { layers })
    }

    /// 层数.
    #[inline]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// 是否不含任何层.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// 各层语义, 按顺序排列.
    pub fn kinds(&self) -> Vec<MaskKind> {
        self.layers.iter().map(|(k, _)| *k).collect()
    }

    /// 第 `i` 层.
    pub fn layer(&self, i: usize) -> Option<ArrayView3<Label>> {
        self.layers.get(i).map(|(_, l)| l.view())
    }

    /// 第一个语义为 `kind` 的层.
    pub fn get(&self, kind: MaskKind) -> Option<ArrayView3<Label>> {
        self.layers
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, l)| l.view())
    }

    /// 全部层都没有前景.
    pub fn is_all_background(&self) -> bool {
        self.layers.iter().all(|(_, l)| l.iter().all(|&v| v == 0))
    }

    /// 转为 `(layer, z, h, w)` 四维数组.
    pub fn to_array4(&self) -> Array4<Label> {
        let (z, h, w) = self.layers.first().map_or((0, 0, 0), |(_, l)| l.dim());
        let mut out = Array4::zeros((self.len(), z, h, w));
        for (mut dst, (_, l)) in out.outer_iter_mut().zip(self.layers.iter()) {
            dst.assign(l);
        }
        out
    }
}
