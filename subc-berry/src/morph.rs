//! 按足迹类型分派的形态学操作.
//!
//! 细胞核膨胀, 细胞掩膜闭运算, 合成图像预处理, 闭合填充和种子开运算都经由
//! [`morph_op`] 完成: `Ball` 一次三维处理, `Disk` 逐切片独立处理,
//! `Scharr` 改为非线性边缘变换, `None` 原样返回.

use crate::composite::non_linear_cellmask_transform;
use crate::error::{PipelineError, PipelineResult};
use crate::filters::morphology::{self, Footprint};
use crate::Label;
use ndarray::{Array3, ArrayView3};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 形态学方法.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MorphMethod {
    /// 三维球形足迹.
    Ball,
    /// 逐切片圆盘足迹.
    Disk,
    /// 非线性边缘变换, 仅用于强度体数据.
    Scharr,
    /// 原样返回.
    #[default]
    None,
}

impl FromStr for MorphMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ball" | "ball" => Ok(Self::Ball),
            "Disk" | "disk" => Ok(Self::Disk),
            "Scharr" | "scharr" => Ok(Self::Scharr),
            "None" | "none" => Ok(Self::None),
            _ => Err(PipelineError::UnknownVariant {
                name: "morph_method",
                value: s.to_string(),
            }),
        }
    }
}

/// 形态学操作种类.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MorphOp {
    /// 闭运算.
    Close,
    /// 膨胀.
    Dilate,
    /// 腐蚀.
    Erode,
    /// 开运算.
    Open,
}

/// 方法 + 半径. 半径为 0 时使用默认十字足迹.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MorphSpec {
    /// 方法.
    pub method: MorphMethod,
    /// 足迹半径.
    pub size: usize,
}

impl MorphSpec {
    /// 创建.
    #[inline]
    pub const fn new(method: MorphMethod, size: usize) -> Self {
        Self { method, size }
    }

    /// 对应的足迹. `Scharr` 与 `None` 没有足迹.
    pub fn footprint(&self) -> Option<Footprint> {
        match (self.method, self.size) {
            (MorphMethod::Ball, 0) => Some(Footprint::cross_3d()),
            (MorphMethod::Ball, r) => Some(Footprint::ball(r)),
            (MorphMethod::Disk, 0) => Some(Footprint::cross_2d()),
            (MorphMethod::Disk, r) => Some(Footprint::disk(r)),
            (MorphMethod::Scharr | MorphMethod::None, _) => None,
        }
    }
}

/// 可以参与形态学分派的体素类型.
pub trait MorphElem: Copy + PartialOrd + Default + Send + Sync + 'static {
    /// `Scharr` 方法对应的变换. 不支持时返回 `None`.
    fn edge_transform(_v: ArrayView3<Self>) -> Option<Array3<Self>> {
        None
    }
}

impl MorphElem for f32 {
    fn edge_transform(v: ArrayView3<Self>) -> Option<Array3<Self>> {
        Some(non_linear_cellmask_transform(v))
    }
}

impl MorphElem for bool {}

impl MorphElem for Label {}

/// 统一的形态学分派.
///
/// 对 `bool` 或标签体数据请求 `Scharr` 时返回 [`PipelineError::Unsupported`].
pub fn morph_op<T: MorphElem>(
    v: ArrayView3<T>,
    op: MorphOp,
    spec: MorphSpec,
) -> PipelineResult<Array3<T>> {
    match spec.method {
        MorphMethod::None => Ok(v.to_owned()),
        MorphMethod::Scharr => T::edge_transform(v).ok_or(PipelineError::Unsupported {
            name: "morph_method",
            method: "Scharr",
        }),
        MorphMethod::Ball | MorphMethod::Disk => {
            let fp = spec
                .footprint()
                .ok_or_else(|| PipelineError::invalid("morph_method", "缺少足迹"))?;
            Ok(match op {
                MorphOp::Close => morphology::close(v, &fp),
                MorphOp::Dilate => morphology::dilate(v, &fp),
                MorphOp::Erode => morphology::erode(v, &fp),
                MorphOp::Open => morphology::open(v, &fp),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speck() -> Array3<bool> {
        let mut m = Array3::from_elem((3, 7, 7), false);
        m[(1, 3, 3)] = true;
        m
    }

    #[test]
    fn test_none_is_identity() {
        let m = speck();
        for size in [0, 1, 5] {
            for op in [MorphOp::Close, MorphOp::Dilate, MorphOp::Erode, MorphOp::Open] {
                let out = morph_op(m.view(), op, MorphSpec::new(MorphMethod::None, size)).unwrap();
                assert_eq!(out, m);
            }
        }
    }

    #[test]
    fn test_ball_vs_disk() {
        let m = speck();
        let b = morph_op(m.view(), MorphOp::Dilate, MorphSpec::new(MorphMethod::Ball, 1)).unwrap();
        assert!(b[(0, 3, 3)] && b[(2, 3, 3)]);
        let d = morph_op(m.view(), MorphOp::Dilate, MorphSpec::new(MorphMethod::Disk, 2)).unwrap();
        assert!(!d[(0, 3, 3)] && d[(1, 3, 5)] && d[(1, 5, 3)]);
        assert_eq!(d.iter().filter(|&&x| x).count(), 13);
    }

    #[test]
    fn test_scharr_needs_intensity() {
        let m = speck();
        let err = morph_op(m.view(), MorphOp::Close, MorphSpec::new(MorphMethod::Scharr, 0)).unwrap_err();
        assert!(matches!(err, PipelineError::Unsupported { .. }));

        let g = m.mapv(|x| if x { 1.0f32 } else { 0.0 });
        let out = morph_op(g.view(), MorphOp::Close, MorphSpec::new(MorphMethod::Scharr, 0)).unwrap();
        assert_eq!(out.dim(), g.dim());
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("Disk".parse::<MorphMethod>().unwrap(), MorphMethod::Disk);
        assert!("Cube".parse::<MorphMethod>().is_err());
    }
}
