//! 运行时错误.

use thiserror::Error;

/// 流水线错误.
///
/// 仅覆盖 "调用方错误" (参数非法, 形状不一致) 与 I/O 错误.
/// 阈值为空, 分水岭无种子等退化情形不属于错误, 直接返回全零掩膜.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 参数取值非法.
    #[error("参数 `{name}` 非法: {reason}")]
    InvalidParameter {
        /// 参数名.
        name: &'static str,
        /// 原因.
        reason: String,
    },

    /// 孔洞宽度上下界颠倒.
    #[error("参数 `{name}` 的孔洞宽度下界 {min} 大于上界 {max}")]
    HoleBounds {
        /// 参数名.
        name: &'static str,
        /// 下界.
        min: usize,
        /// 上界.
        max: usize,
    },

    /// 无法识别的枚举字符串.
    #[error("参数 `{name}` 无法识别取值 `{value}`")]
    UnknownVariant {
        /// 参数名.
        name: &'static str,
        /// 原始字符串.
        value: String,
    },

    /// 体数据形状 (或权重长度) 不一致.
    #[error("`{name}` 形状不一致: 期望 {expected:?}, 实际 {found:?}")]
    ShapeMismatch {
        /// 参数名.
        name: &'static str,
        /// 期望形状.
        expected: Vec<usize>,
        /// 实际形状.
        found: Vec<usize>,
    },

    /// 通道索引越界.
    #[error("参数 `{name}` 的通道索引 {index} 越界 (共 {channels} 个通道)")]
    ChannelOutOfRange {
        /// 参数名.
        name: &'static str,
        /// 请求的通道.
        index: usize,
        /// 通道总数.
        channels: usize,
    },

    /// 该方法不能作用于当前体素类型.
    #[error("参数 `{name}` 的方法 `{method}` 不支持当前体素类型")]
    Unsupported {
        /// 参数名.
        name: &'static str,
        /// 方法名.
        method: &'static str,
    },

    /// 读取 `.npy` 失败.
    #[error("读取 npy 失败: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    /// 写入 `.npy` 失败.
    #[error("写入 npy 失败: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    /// 写入图像失败.
    #[error("写入图像失败: {0}")]
    Image(#[from] image::ImageError),
}

impl PipelineError {
    /// 构造 [`PipelineError::InvalidParameter`].
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// 流水线运行结果.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// 检查孔洞宽度上下界.
pub(crate) fn check_hole_bounds(name: &'static str, min: usize, max: usize) -> PipelineResult<()> {
    if min > max {
        return Err(PipelineError::HoleBounds { name, min, max });
    }
    Ok(())
}

/// 检查非负有限浮点参数.
pub(crate) fn check_non_negative(name: &'static str, v: f64) -> PipelineResult<()> {
    if !v.is_finite() || v < 0.0 {
        return Err(PipelineError::invalid(name, format!("需为非负有限数, 实际为 {v}")));
    }
    Ok(())
}
