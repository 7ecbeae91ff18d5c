//! 基础图像滤波.
//!
//! 平滑, 阈值, 形态学, 连通域, 边缘与分水岭. 各函数都是纯函数:
//! 输入只读视图, 返回新分配的体数据.

pub mod edges;
pub mod label;
pub mod morphology;
pub mod smooth;
pub mod threshold;
pub mod watershed;

pub use edges::scharr;
pub use label::{
    connected_components, fill_and_filter_linear_size, fill_holes, interior_labels, max_label,
    relabel, relabel_pairs, size_filter,
};
pub use morphology::Footprint;
pub use smooth::{gaussian, median, scale_and_smooth, smooth};
pub use threshold::LogTransform;
pub use watershed::{masked_inverted_watershed, watershed, watershed_by_mode};
