//! 测试用合成体数据.

use crate::volume::{Intensity, Mask};
use crate::Idx3d;

/// 若干三维各向同性高斯峰之和.
pub(crate) fn blobs(shape: Idx3d, centers: &[Idx3d], sigma: f32, amps: &[f32]) -> Intensity {
    let two_s2 = 2.0 * sigma * sigma;
    Intensity::from_shape_fn(shape, |(z, h, w)| {
        centers
            .iter()
            .zip(amps.iter())
            .map(|(&(cz, ch, cw), &a)| {
                let d2 = sq(z, cz) + sq(h, ch) + sq(w, cw);
                a * (-d2 / two_s2).exp()
            })
            .sum()
    })
}

/// 每个切片上相同的环: 强度随到圆周距离呈高斯衰减.
pub(crate) fn ring(shape: Idx3d, (ch, cw): (usize, usize), radius: f32, width: f32) -> Intensity {
    let two_s2 = 2.0 * width * width;
    Intensity::from_shape_fn(shape, |(_, h, w)| {
        let r = (sq(h, ch) + sq(w, cw)).sqrt();
        (-(r - radius).powi(2) / two_s2).exp()
    })
}

/// 实心球.
pub(crate) fn ball(shape: Idx3d, (cz, ch, cw): Idx3d, radius: f32) -> Mask {
    Mask::from_shape_fn(shape, |(z, h, w)| {
        sq(z, cz) + sq(h, ch) + sq(w, cw) <= radius * radius
    })
}

/// 每个切片上相同的实心圆柱.
pub(crate) fn cylinder(shape: Idx3d, (ch, cw): (usize, usize), radius: f32) -> Mask {
    Mask::from_shape_fn(shape, |(_, h, w)| sq(h, ch) + sq(w, cw) <= radius * radius)
}

/// 单细胞场景 `[细胞核, 细胞质, 质膜]`: 核为半径 `r_nuc` 的圆柱, 细胞质
/// 填满半径 `r_cell` 以内的其余部分, 质膜为半径 `r_cell` 处的环.
pub(crate) fn one_cell(shape: Idx3d, r_nuc: f32, r_cell: f32) -> Vec<Intensity> {
    let center = (shape.1 / 2, shape.2 / 2);
    let nuc = cylinder(shape, center, r_nuc);
    let cell = cylinder(shape, center, r_cell);
    let nucleus = nuc.mapv(|x| if x { 100.0 } else { 2.0 });
    let cyto = ndarray::Zip::from(&nuc)
        .and(&cell)
        .map_collect(|&n, &c| if c && !n { 80.0 } else { 1.0 });
    let pm = ring(shape, center, r_cell + 1.0, 1.0).mapv(|x| x * 50.0 + 1.0);
    vec![nucleus, cyto, pm]
}

#[inline]
fn sq(a: usize, b: usize) -> f32 {
    let d = a as f32 - b as f32;
    d * d
}
