//! 体数据与掩膜的持久化存储.
//!
//! 推断阶段本身不做任何 I/O, 这里只服务于命令行等外部调用方.

use crate::error::PipelineResult;
use crate::volume::{self, ChannelStack, MaskStack};
use crate::Label;
use ndarray::{Array4, ArrayView2, Axis};
use ndarray_npy::{read_npy, write_npy};
use std::path::Path;

/// 读取 `(c, z, h, w)` 形状的 `f32` `.npy` 文件.
pub fn read_channel_stack<P: AsRef<Path>>(path: P) -> PipelineResult<ChannelStack> {
    let arr: Array4<f32> = read_npy(path)?;
    ChannelStack::from_array4(arr)
}

/// 将掩膜栈写为 `(layer, z, h, w)` 形状的 `u32` `.npy` 文件.
pub fn write_mask_stack<P: AsRef<Path>>(path: P, masks: &MaskStack) -> PipelineResult<()> {
    write_npy(path, &masks.to_array4())?;
    Ok(())
}

/// 表明一个可以通过 **可视化友好** 模式保存为 PNG 的二维切片.
///
/// 标签切片中背景映射为黑色, 各实例循环映射为几种易于区分的灰度;
/// 强度切片先做最小-最大归一化再拉伸到 `0..=255`.
pub trait ImgWriteVis {
    /// 按照可视化规则将切片保存到 `path` 路径.
    fn save<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()>;
}

/// 使标签更有利于单通道可视化.
#[inline]
pub(crate) fn pretty(label: Label) -> u8 {
    use crate::consts::gray::{BLACK, INSTANCE_CYCLE};
    if crate::consts::is_background(label) {
        BLACK
    } else {
        INSTANCE_CYCLE[(label as usize - 1) % INSTANCE_CYCLE.len()]
    }
}

impl ImgWriteVis for ArrayView2<'_, Label> {
    fn save<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()> {
        let (height, width) = self.dim();
        let mut buf = image::GrayImage::new(width as u32, height as u32);
        for ((h, w), &l) in self.indexed_iter() {
            buf.put_pixel(w as u32, h as u32, image::Luma([pretty(l)]));
        }
        buf.save(path)?;
        Ok(())
    }
}

impl ImgWriteVis for ArrayView2<'_, f32> {
    fn save<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()> {
        let (height, width) = self.dim();
        let slab = self.view().insert_axis(Axis(0));
        let normalized = volume::normalize(slab);
        let mut buf = image::GrayImage::new(width as u32, height as u32);
        for ((_, h, w), &v) in normalized.indexed_iter() {
            let gray = (v * 255.0).round().clamp(0.0, 255.0) as u8;
            buf.put_pixel(w as u32, h as u32, image::Luma([gray]));
        }
        buf.save(path)?;
        Ok(())
    }
}

/// 将掩膜栈第 `layer` 层的第 `z` 个切片保存为 PNG. 索引越界时什么也不做并返回 `false`.
pub fn save_slice_png<P: AsRef<Path>>(
    masks: &MaskStack,
    layer: usize,
    z: usize,
    path: P,
) -> PipelineResult<bool> {
    let Some(labels) = masks.layer(layer) else {
        return Ok(false);
    };
    if z >= labels.len_of(Axis(0)) {
        return Ok(false);
    }
    labels.index_axis(Axis(0), z).save(path)?;
    Ok(true)
}
