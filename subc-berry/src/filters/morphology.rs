//! 灰度/二值形态学.
//!
//! 膨胀取足迹内最大值, 腐蚀取最小值, 越界体素不参与计算.
//! `bool` 的序关系是 `false < true`, 因此同一套实现也就是二值形态学.

use crate::volume::grid::{flatten, into_volume, Grid, Offset3d};
use crate::volume::{self, Connectivity};
use ndarray::{Array3, ArrayView3};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 结构元.
///
/// 偏移总是包含中心 `(0, 0, 0)`. 若所有偏移的 `dz` 均为 0,
/// 则该结构元是平面的, 相关操作会逐切片独立执行.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footprint {
    offsets: Vec<Offset3d>,
}

impl Footprint {
    /// 半径为 `r` 的球.
    pub fn ball(r: usize) -> Self {
        let r = r as isize;
        let offsets = itertools::iproduct!(-r..=r, -r..=r, -r..=r)
            .filter(|&(a, b, c)| a * a + b * b + c * c <= r * r)
            .collect();
        Self { offsets }
    }

    /// 半径为 `r` 的平面圆盘.
    pub fn disk(r: usize) -> Self {
        let r = r as isize;
        let offsets = itertools::iproduct!(-r..=r, -r..=r)
            .filter(|&(b, c)| b * b + c * c <= r * r)
            .map(|(b, c)| (0, b, c))
            .collect();
        Self { offsets }
    }

    /// 由连通性生成的十字形结构元 (中心 + 邻居).
    pub fn from_connectivity(conn: Connectivity) -> Self {
        let offsets = std::iter::once((0, 0, 0))
            .chain(conn.offsets().iter().copied())
            .collect();
        Self { offsets }
    }

    /// 三维默认结构元, 即 6-邻域十字.
    #[inline]
    pub fn cross_3d() -> Self {
        Self::from_connectivity(Connectivity::Face3d)
    }

    /// 平面默认结构元, 即 4-邻域十字.
    #[inline]
    pub fn cross_2d() -> Self {
        Self::from_connectivity(Connectivity::Face2d)
    }

    /// 全部偏移.
    #[inline]
    pub fn offsets(&self) -> &[Offset3d] {
        &self.offsets
    }

    /// 是否为平面结构元.
    #[inline]
    pub fn is_planar(&self) -> bool {
        self.offsets.iter().all(|o| o.0 == 0)
    }
}

/// 在 `v` 上做一次秩滤波, `pick_max` 决定取最大值还是最小值.
fn rank_filter<T>(v: ArrayView3<T>, fp: &Footprint, pick_max: bool) -> Array3<T>
where
    T: Copy + PartialOrd + Send + Sync,
{
    let grid = Grid::new(v.dim());
    let data = flatten(v);
    let pick = |i: usize| {
        let p = grid.unflat(i);
        fp.offsets
            .iter()
            .filter_map(|&o| grid.shift(p, o))
            .map(|j| data[j])
            .fold(data[i], |acc, x| match pick_max {
                true if x > acc => x,
                false if x < acc => x,
                _ => acc,
            })
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            let out: Vec<T> = (0..grid.len()).into_par_iter().map(pick).collect();
        } else {
            let out: Vec<T> = (0..grid.len()).map(pick).collect();
        }
    }
    into_volume(grid, out)
}

/// 平面结构元逐切片执行, 否则整体执行.
fn rank_dispatch<T>(v: ArrayView3<T>, fp: &Footprint, pick_max: bool) -> Array3<T>
where
    T: Copy + PartialOrd + Default + Send + Sync,
{
    if fp.is_planar() {
        volume::map_slabs(v, |slab| rank_filter(slab, fp, pick_max))
    } else {
        rank_filter(v, fp, pick_max)
    }
}

/// 膨胀.
pub fn dilate<T>(v: ArrayView3<T>, fp: &Footprint) -> Array3<T>
where
    T: Copy + PartialOrd + Default + Send + Sync,
{
    rank_dispatch(v, fp, true)
}

/// 腐蚀.
pub fn erode<T>(v: ArrayView3<T>, fp: &Footprint) -> Array3<T>
where
    T: Copy + PartialOrd + Default + Send + Sync,
{
    rank_dispatch(v, fp, false)
}

/// 开运算: 先腐蚀后膨胀.
pub fn open<T>(v: ArrayView3<T>, fp: &Footprint) -> Array3<T>
where
    T: Copy + PartialOrd + Default + Send + Sync,
{
    dilate(erode(v, fp).view(), fp)
}

/// 闭运算: 先膨胀后腐蚀.
pub fn close<T>(v: ArrayView3<T>, fp: &Footprint) -> Array3<T>
where
    T: Copy + PartialOrd + Default + Send + Sync,
{
    erode(dilate(v, fp).view(), fp)
}
