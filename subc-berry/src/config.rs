//! 多个阶段共享的配置项.
//!
//! 枚举既可以由字符串解析 ([`std::str::FromStr`]), 也可以在开启 `serde`
//! feature 时从 JSON 等格式直接反序列化, 二者接受的写法一致.

use crate::error::{check_hole_bounds, check_non_negative, PipelineError, PipelineResult};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 执行模式: 一次三维处理, 或逐 z 切片独立处理.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecMode {
    /// 三维.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "3D"))]
    ThreeD,
    /// 逐切片.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "slice-by-slice", alias = "slice_by_slice", alias = "2D")
    )]
    SliceBySlice,
}

impl ExecMode {
    /// 线性宽度换算为体素个数: 三维取立方, 逐切片取平方.
    #[inline]
    pub const fn linear_to_count(self, width: usize) -> usize {
        match self {
            Self::ThreeD => width * width * width,
            Self::SliceBySlice => width * width,
        }
    }
}

impl FromStr for ExecMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "3D" | "3d" => Ok(Self::ThreeD),
            "slice-by-slice" | "slice_by_slice" | "2D" | "2d" => Ok(Self::SliceBySlice),
            _ => Err(PipelineError::UnknownVariant {
                name: "exec_mode",
                value: s.to_string(),
            }),
        }
    }
}

/// 最小-最大归一化后的中值 + 高斯平滑.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SmoothConfig {
    /// 中值滤波窗口宽度, 不大于 1 时跳过.
    pub median_size: usize,
    /// 高斯标准差, 为 0 时跳过.
    pub gauss_sigma: f64,
}

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            median_size: 4,
            gauss_sigma: 1.34,
        }
    }
}

impl SmoothConfig {
    /// 校验参数.
    pub fn validate(&self) -> PipelineResult<()> {
        check_non_negative("gauss_sigma", self.gauss_sigma)
    }
}

/// 以线性宽度描述的孔洞填充 + 小目标过滤.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FillFilterConfig {
    /// 最小孔洞宽度.
    pub min_hole_width: usize,
    /// 最大孔洞宽度, 为 0 时不填充.
    pub max_hole_width: usize,
    /// 小目标宽度, 体积小于其换算值的连通域被丢弃.
    pub small_obj_width: usize,
    /// 三维或逐切片.
    pub method: ExecMode,
}

impl Default for FillFilterConfig {
    fn default() -> Self {
        Self {
            min_hole_width: 0,
            max_hole_width: 25,
            small_obj_width: 15,
            method: ExecMode::ThreeD,
        }
    }
}

impl FillFilterConfig {
    /// 校验孔洞上下界.
    pub fn validate(&self) -> PipelineResult<()> {
        check_hole_bounds("min_hole_width", self.min_hole_width, self.max_hole_width)
    }
}
