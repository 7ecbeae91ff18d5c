//! 连通域标记, 孔洞填充, 尺寸过滤与按强度选取标签.

use crate::config::{ExecMode, FillFilterConfig};
use crate::volume::grid::{flatten, into_volume, Grid};
use crate::volume::{self, Connectivity, Labels, Mask};
use crate::Label;
use either::Either;
use ndarray::ArrayView3;
use std::collections::{BTreeSet, VecDeque};

/// 在扁平网格上做广度优先连通域标记.
///
/// `key(i)` 为 `None` 的体素是背景; 相邻且 `key` 相等的体素属于同一连通域.
/// 标签按各连通域首个体素的行优先顺序从 1 开始编号. 返回扁平标签与标签数.
pub(crate) fn label_by<K, F>(grid: Grid, conn: Connectivity, key: F) -> (Vec<Label>, Label)
where
    K: PartialEq,
    F: Fn(usize) -> Option<K>,
{
    let offsets = conn.offsets();
    let mut labels = vec![0 as Label; grid.len()];
    let mut next: Label = 0;
    let mut queue = VecDeque::new();

    for seed in 0..grid.len() {
        if labels[seed] != 0 {
            continue;
        }
        let Some(k) = key(seed) else { continue };
        next += 1;
        labels[seed] = next;
        queue.push_back(seed);
        while let Some(cur) = queue.pop_front() {
            for j in grid.neighbours(cur, offsets) {
                if labels[j] == 0 && key(j).as_ref() == Some(&k) {
                    labels[j] = next;
                    queue.push_back(j);
                }
            }
        }
    }
    (labels, next)
}

/// 二值掩膜的连通域标记.
pub fn connected_components(mask: ArrayView3<bool>, conn: Connectivity) -> Labels {
    let grid = Grid::new(mask.dim());
    let data = flatten(mask);
    let (labels, _) = label_by(grid, conn, |i| data[i].then_some(()));
    into_volume(grid, labels)
}

/// 规范化重标记: 取值相同且 26-连通的非零区域成为一个实例, 按行优先顺序编号.
pub fn relabel(labels: ArrayView3<Label>) -> Labels {
    let grid = Grid::new(labels.dim());
    let data = flatten(labels);
    let (out, _) = label_by(grid, Connectivity::Full3d, |i| (data[i] > 0).then_some(data[i]));
    into_volume(grid, out)
}

/// 按 `(primary, secondary)` 标签对重标记: 只在 `primary > 0` 处有前景,
/// 标签对相同且连通的体素成为一个实例.
pub fn relabel_pairs(
    primary: ArrayView3<Label>,
    secondary: ArrayView3<Label>,
    conn: Connectivity,
) -> Labels {
    debug_assert_eq!(primary.dim(), secondary.dim());
    let grid = Grid::new(primary.dim());
    let (p, s) = (flatten(primary), flatten(secondary));
    let (out, _) = label_by(grid, conn, |i| (p[i] > 0).then_some((p[i], s[i])));
    into_volume(grid, out)
}

/// 各标签的体素数, 下标即标签值 (下标 0 为背景).
fn label_sizes(labels: &[Label], count: Label) -> Vec<usize> {
    let mut sizes = vec![0usize; count as usize + 1];
    for &l in labels {
        sizes[l as usize] += 1;
    }
    sizes
}

/// 单个网格上的尺寸过滤: 丢弃体素数小于 `min_size` 的前景连通域.
fn size_filter_grid(mask: ArrayView3<bool>, min_size: usize, conn: Connectivity) -> Mask {
    let grid = Grid::new(mask.dim());
    let data = flatten(mask);
    let (labels, n) = label_by(grid, conn, |i| data[i].then_some(()));
    let sizes = label_sizes(&labels, n);
    let out = labels
        .iter()
        .map(|&l| l > 0 && sizes[l as usize] >= min_size)
        .collect();
    into_volume(grid, out)
}

/// 尺寸过滤. 三维模式使用 6-连通, 逐切片模式使用 4-连通.
pub fn size_filter(mask: ArrayView3<bool>, min_size: usize, mode: ExecMode) -> Mask {
    if min_size <= 1 {
        return mask.to_owned();
    }
    match mode {
        ExecMode::ThreeD => size_filter_grid(mask, min_size, Connectivity::Face3d),
        ExecMode::SliceBySlice => volume::map_slabs(mask, |slab| {
            size_filter_grid(slab, min_size, Connectivity::Face2d)
        }),
    }
}

/// 单个网格上的孔洞填充.
fn fill_holes_grid(mask: ArrayView3<bool>, min: usize, max: usize, conn: Connectivity) -> Mask {
    let grid = Grid::new(mask.dim());
    let mut data = flatten(mask);
    let (labels, n) = label_by(grid, conn, |i| (!data[i]).then_some(()));
    let sizes = label_sizes(&labels, n);

    // 接触侧向边界的背景连通域不是孔洞
    let mut open_to_border = vec![false; n as usize + 1];
    for (i, &l) in labels.iter().enumerate() {
        if l > 0 && grid.on_lateral_border(i) {
            open_to_border[l as usize] = true;
        }
    }
    for (v, &l) in data.iter_mut().zip(labels.iter()) {
        let l = l as usize;
        if l > 0 && !open_to_border[l] && (min..=max).contains(&sizes[l]) {
            *v = true;
        }
    }
    into_volume(grid, data)
}

/// 孔洞填充: 体素数落在 `[min, max]` 的封闭背景连通域被填为前景.
///
/// 与体数据 h/w 边界相接的背景连通域永远不被视为孔洞, 因此纯背景不会被填充.
pub fn fill_holes(mask: ArrayView3<bool>, min: usize, max: usize, mode: ExecMode) -> Mask {
    if max == 0 || min > max {
        return mask.to_owned();
    }
    match mode {
        ExecMode::ThreeD => fill_holes_grid(mask, min, max, Connectivity::Face3d),
        ExecMode::SliceBySlice => volume::map_slabs(mask, |slab| {
            fill_holes_grid(slab, min, max, Connectivity::Face2d)
        }),
    }
}

/// 以线性宽度描述的孔洞填充 + 尺寸过滤.
///
/// 宽度按执行模式换算为体素个数 (三维取立方, 逐切片取平方).
/// `max_hole_width` 为 0 时跳过填充.
pub fn fill_and_filter_linear_size(mask: ArrayView3<bool>, cfg: &FillFilterConfig) -> Mask {
    let m = cfg.method;
    let filled = if cfg.max_hole_width > 0 {
        fill_holes(
            mask,
            m.linear_to_count(cfg.min_hole_width),
            m.linear_to_count(cfg.max_hole_width),
            m,
        )
    } else {
        mask.to_owned()
    };
    size_filter(filled.view(), m.linear_to_count(cfg.small_obj_width), m)
}

/// 在 `labels` 的各个标签中, 找出 `weights` 累计值最大的一个.
///
/// `targets` 给出时只在其中选取. 累计值相同时取标签值最小者.
/// 没有任何候选时返回 `None`.
pub fn max_label(
    weights: ArrayView3<f32>,
    labels: ArrayView3<Label>,
    targets: Option<&[Label]>,
) -> Option<Label> {
    debug_assert_eq!(weights.dim(), labels.dim());
    let top = labels.iter().copied().max().unwrap_or(0);
    if top == 0 {
        return None;
    }
    let mut sums = vec![0.0f64; top as usize + 1];
    for (&w, &l) in weights.iter().zip(labels.iter()) {
        if l > 0 && w.is_finite() {
            sums[l as usize] += w as f64;
        }
    }
    let mut present = vec![false; top as usize + 1];
    for &l in labels.iter() {
        present[l as usize] = true;
    }

    let candidates = match targets {
        Some(t) => Either::Left(t.iter().copied().collect::<BTreeSet<_>>().into_iter()),
        None => Either::Right(1..=top),
    };
    candidates
        .filter(|&l| l > 0 && l <= top && present[l as usize])
        .fold(None, |best: Option<(Label, f64)>, l| match best {
            Some((_, s)) if s >= sums[l as usize] => best,
            _ => Some((l, sums[l as usize])),
        })
        .map(|(l, _)| l)
}

/// 不接触 h/w 边界的标签, 升序排列.
pub fn interior_labels(labels: ArrayView3<Label>) -> Vec<Label> {
    let grid = Grid::new(labels.dim());
    let mut all = BTreeSet::new();
    let mut border = BTreeSet::new();
    for (i, &l) in labels.iter().enumerate() {
        if l == 0 {
            continue;
        }
        all.insert(l);
        if grid.on_lateral_border(i) {
            border.insert(l);
        }
    }
    all.difference(&border).copied().collect()
}
