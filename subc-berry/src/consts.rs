//! 通用常量.

use crate::Label;

/// 背景标签.
pub const BACKGROUND: Label = 0;

/// 单通道颜色.
pub mod gray {
    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道暗灰色.
    pub const DARK_GRAY: u8 = 0b_0100_0000;

    /// 单通道灰色.
    pub const GRAY: u8 = 0b_1000_0000;

    /// 单通道亮灰色.
    pub const LIGHT_GRAY: u8 = 0b_1100_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;

    /// 非背景标签循环使用的灰度. 1 号实例总是白色.
    pub const INSTANCE_CYCLE: [u8; 4] = [WHITE, LIGHT_GRAY, GRAY, DARK_GRAY];
}

/// 像素是否是背景?
#[inline]
pub const fn is_background(l: Label) -> bool {
    l == BACKGROUND
}
