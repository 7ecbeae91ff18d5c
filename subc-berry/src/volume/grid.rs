//! 扁平索引与邻域.
//!
//! 体数据内部统一按照 `(z, h, w)` 行优先顺序展开为一维, 连通域标记,
//! 分水岭等需要反复访问邻居的算法都在扁平索引上进行.

use crate::Idx3d;
use ndarray::{Array3, ArrayView3};
use once_cell::sync::Lazy;
use std::ops::RangeInclusive;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 三维有符号偏移 `(dz, dh, dw)`.
pub type Offset3d = (isize, isize, isize);

/// 体素连通性.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Connectivity {
    /// 三维 6-邻域.
    Face3d,
    /// 三维 26-邻域 (3x3x3 全 1 结构元).
    Full3d,
    /// 切片内 4-邻域.
    Face2d,
    /// 切片内 8-邻域.
    Full2d,
}

static FACE_3D: Lazy<Vec<Offset3d>> = Lazy::new(|| build_offsets(1, false));
static FULL_3D: Lazy<Vec<Offset3d>> = Lazy::new(|| build_offsets(3, false));
static FACE_2D: Lazy<Vec<Offset3d>> = Lazy::new(|| build_offsets(1, true));
static FULL_2D: Lazy<Vec<Offset3d>> = Lazy::new(|| build_offsets(2, true));

/// 生成曼哈顿距离不超过 `reach` 的全部非零单位偏移.
fn build_offsets(reach: usize, planar: bool) -> Vec<Offset3d> {
    let zs: RangeInclusive<isize> = if planar { 0..=0 } else { -1..=1 };
    itertools::iproduct!(zs, -1isize..=1, -1isize..=1)
        .filter(|&o| o != (0, 0, 0))
        .filter(|&(a, b, c)| a.unsigned_abs() + b.unsigned_abs() + c.unsigned_abs() <= reach)
        .collect()
}

impl Connectivity {
    /// 邻居偏移 (不含自身).
    pub fn offsets(self) -> &'static [Offset3d] {
        match self {
            Self::Face3d => &FACE_3D,
            Self::Full3d => &FULL_3D,
            Self::Face2d => &FACE_2D,
            Self::Full2d => &FULL_2D,
        }
    }

    /// 是否只在切片内部连通.
    #[inline]
    pub const fn is_planar(self) -> bool {
        matches!(self, Self::Face2d | Self::Full2d)
    }
}

/// 三维网格形状, 负责扁平索引与三维索引之间的换算.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    shape: Idx3d,
}

impl Grid {
    /// 以 `(z, h, w)` 形状创建网格.
    #[inline]
    pub const fn new(shape: Idx3d) -> Self {
        Self { shape }
    }

    /// 网格形状.
    #[inline]
    pub const fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 体素总数.
    #[inline]
    pub const fn len(&self) -> usize {
        self.shape.0 * self.shape.1 * self.shape.2
    }

    /// 网格是否不含任何体素.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 三维索引转扁平索引.
    #[inline]
    pub const fn flat(&self, (z, h, w): Idx3d) -> usize {
        (z * self.shape.1 + h) * self.shape.2 + w
    }

    /// 扁平索引转三维索引.
    #[inline]
    pub const fn unflat(&self, i: usize) -> Idx3d {
        let plane = self.shape.1 * self.shape.2;
        (i / plane, (i % plane) / self.shape.2, i % self.shape.2)
    }

    /// 将 `p` 平移 `offset`, 越界时返回 `None`.
    #[inline]
    pub fn shift(&self, (z, h, w): Idx3d, (dz, dh, dw): Offset3d) -> Option<usize> {
        let z = z.checked_add_signed(dz).filter(|&v| v < self.shape.0)?;
        let h = h.checked_add_signed(dh).filter(|&v| v < self.shape.1)?;
        let w = w.checked_add_signed(dw).filter(|&v| v < self.shape.2)?;
        Some(self.flat((z, h, w)))
    }

    /// 扁平索引 `i` 在 `offsets` 下的全部合法邻居.
    pub fn neighbours<'a>(
        &'a self,
        i: usize,
        offsets: &'a [Offset3d],
    ) -> impl Iterator<Item = usize> + 'a {
        let p = self.unflat(i);
        offsets.iter().filter_map(move |&o| self.shift(p, o))
    }

    /// 体素是否位于 h/w 方向 (侧向) 边界.
    #[inline]
    pub const fn on_lateral_border(&self, i: usize) -> bool {
        let (_, h, w) = self.unflat(i);
        h == 0 || w == 0 || h + 1 == self.shape.1 || w + 1 == self.shape.2
    }
}

/// 按行优先顺序展开体数据.
#[inline]
pub(crate) fn flatten<T: Copy>(v: ArrayView3<T>) -> Vec<T> {
    v.iter().copied().collect()
}

/// 将行优先扁平数据还原为体数据.
pub(crate) fn into_volume<T>(grid: Grid, data: Vec<T>) -> Array3<T> {
    match Array3::from_shape_vec(grid.shape(), data) {
        Ok(v) => v,
        // 调用方总是由同一个 `grid` 展开得到 `data`.
        Err(_) => unreachable!("扁平数据长度与网格形状不一致"),
    }
}
