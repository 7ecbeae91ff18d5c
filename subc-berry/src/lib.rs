#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 从多通道三维荧光显微图像推断亚细胞掩膜: 细胞核, 细胞, 细胞质.
//!
//! 该 crate 只提供 `safe` 接口. 所有推断阶段都是纯函数, 输入只读视图,
//! 返回新分配的体数据; 参数错误与形状不一致在阶段入口处以
//! [`PipelineError`] 返回, 而阈值为空等退化情形只会得到空掩膜.
//!
//! # 注意
//!
//! 1. 体数据总是按 `(z, h, w)` 排列, 多通道数据按 `(c, z, h, w)` 排列.
//! 2. "逐切片" 指沿 z 轴的每个切片独立处理; 开启 `rayon` feature 时切片之间并行,
//!   结果与串行完全一致.
//!
//! # 开发计划
//!
//! ### 基础滤波 ✅
//!
//! 高斯/中值平滑, Otsu/三角/Li 阈值, 形态学, 连通域, 孔洞填充, Scharr, 分水岭.
//!
//! 实现位于 `subc-berry/src/filters`.
//!
//! ### 按足迹分派的形态学 ✅
//!
//! `Ball` 三维, `Disk` 逐切片, `Scharr` 非线性边缘变换, `None` 原样返回.
//!
//! 实现位于 `subc-berry/src/morph.rs`.
//!
//! ### 合成图像与掩膜对象阈值 ✅
//!
//! 可选地以质膜通道约束结果.
//!
//! 实现位于 `subc-berry/src/composite.rs`.
//!
//! ### 分水岭去粘连 ✅
//!
//! 迭代高通残差 + Otsu 得到种子, 在原分割内做分水岭后按标签对重新编号.
//!
//! 实现位于 `subc-berry/src/declump.rs`.
//!
//! ### 细胞核/细胞/细胞质推断 ✅
//!
//! 实现位于 `subc-berry/src/stages`.
//!
//! ### 流程 A/B/C/D 与默认流程 ✅
//!
//! 实现位于 `subc-berry/src/workflows`.
//!
//! ### 命令行 ✅
//!
//! `.npy` 输入输出与 PNG 预览. 实现位于 `runners/masks`.

/// 三维索引 `(z, h, w)`.
pub type Idx3d = (usize, usize, usize);

/// 实例标签. 0 为背景.
pub type Label = u32;

pub mod composite;
pub mod config;
pub mod consts;
pub mod declump;
mod error;
pub mod filters;
pub mod io;
pub mod morph;
pub mod prelude;
pub mod stages;
pub mod volume;
pub mod workflows;

#[cfg(test)]
mod synth;

pub use error::{PipelineError, PipelineResult};
pub use volume::{ChannelStack, Intensity, Labels, Mask, MaskKind, MaskStack};
pub use workflows::{run, WorkflowConfig};
