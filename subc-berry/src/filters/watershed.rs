//! 基于优先队列的标记控制分水岭.

use crate::config::ExecMode;
use crate::volume::grid::{flatten, into_volume, Grid};
use crate::volume::{self, Connectivity, Labels};
use crate::Label;
use binary_heap_plus::BinaryHeap;
use ndarray::{s, ArrayView3};
use ordered_float::OrderedFloat;

/// 队列元素: 高程相同时先入队者先出队.
#[derive(Debug, Clone, Copy)]
struct Entry {
    key: (OrderedFloat<f32>, u64),
    at: usize,
}

/// 标记控制分水岭.
///
/// 从 `markers` 中的非零体素出发, 按 "新到达体素的高程, 入队顺序" 由低到高泛洪,
/// 每个体素继承最先到达它的标记. `mask` 给出时只在其为 `true` 处泛洪,
/// 掩膜之外的标记会被忽略. 没有标记时返回全零.
pub fn watershed(
    elevation: ArrayView3<f32>,
    markers: ArrayView3<Label>,
    mask: Option<ArrayView3<bool>>,
    conn: Connectivity,
) -> Labels {
    debug_assert_eq!(elevation.dim(), markers.dim());
    let grid = Grid::new(elevation.dim());
    let elev = flatten(elevation);
    let inside: Vec<bool> = match mask {
        Some(m) => flatten(m),
        None => vec![true; grid.len()],
    };
    let mut labels: Vec<Label> = markers
        .iter()
        .zip(inside.iter())
        .map(|(&l, &ok)| if ok { l } else { 0 })
        .collect();

    // 堆顶为高程最低, 入队最早的体素
    let mut heap = BinaryHeap::new_by(|a: &Entry, b: &Entry| b.key.cmp(&a.key));
    let mut age = 0u64;
    let mut push = |heap: &mut BinaryHeap<Entry, _>, at: usize| {
        heap.push(Entry {
            key: (OrderedFloat(elev[at]), age),
            at,
        });
        age += 1;
    };

    for i in 0..grid.len() {
        if labels[i] > 0 {
            push(&mut heap, i);
        }
    }
    let offsets = conn.offsets();
    while let Some(Entry { at, .. }) = heap.pop() {
        let l = labels[at];
        for j in grid.neighbours(at, offsets) {
            if labels[j] == 0 && inside[j] {
                labels[j] = l;
                push(&mut heap, j);
            }
        }
    }
    into_volume(grid, labels)
}

/// 按执行模式运行分水岭: 三维使用 26-邻域, 逐切片使用 8-邻域.
pub fn watershed_by_mode(
    elevation: ArrayView3<f32>,
    markers: ArrayView3<Label>,
    mask: Option<ArrayView3<bool>>,
    mode: ExecMode,
) -> Labels {
    match mode {
        ExecMode::ThreeD => watershed(elevation, markers, mask, Connectivity::Full3d),
        ExecMode::SliceBySlice => volume::from_slabs(elevation.dim(), |z| {
            watershed(
                elevation.slice(s![z..=z, .., ..]),
                markers.slice(s![z..=z, .., ..]),
                mask.as_ref().map(|m| m.slice(s![z..=z, .., ..])),
                Connectivity::Full2d,
            )
        }),
    }
}

/// 掩膜内的反转分水岭: 高程为 `1 - img`, 因而 `img` 的高亮处先被淹没.
pub fn masked_inverted_watershed(
    img: ArrayView3<f32>,
    markers: ArrayView3<Label>,
    mask: Option<ArrayView3<bool>>,
    mode: ExecMode,
) -> Labels {
    let elevation = img.mapv(|v| 1.0 - v);
    watershed_by_mode(elevation.view(), markers, mask, mode)
}
