//! 命令行: 读取 `(c, z, h, w)` 通道栈, 运行流程并写出掩膜栈.

mod loader;

use clap::Parser;
use log::info;
use std::path::PathBuf;
use subc_berry::prelude::*;

#[derive(Parser, Debug)]
#[command(
    name = "masks",
    about = "Infer nucleus, cell and cytoplasm masks from a multi-channel 3D image"
)]
struct Cli {
    /// `f32` `.npy` 输入, 形状 `(c, z, h, w)`. 相对路径会在 `$SUBC_INPUT_DIR` 下查找.
    input: PathBuf,

    /// JSON 流程配置. 缺省时使用默认流程.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 输出的 `u32` `.npy`, 形状 `(layer, z, h, w)`.
    #[arg(short, long, default_value = "masks.npy")]
    output: PathBuf,

    /// 工作线程数. 缺省为逻辑核心数.
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// 若给出, 将每一层每个切片存为 PNG 预览.
    #[arg(long)]
    png_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logger::init_with_level(log::Level::Info)?;
    let cli = Cli::parse();

    let threads = cli.threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()?;
    info!("Using {threads} worker threads");

    let cfg = loader::load_config(cli.config.as_deref())?;
    let input = loader::resolve_input(&cli.input);
    info!("Loading {}", input.display());
    let stack = read_channel_stack(&input)?;

    let masks = run(&stack, &cfg)?;
    write_mask_stack(&cli.output, &masks)?;
    info!("Wrote {} layers to {}", masks.len(), cli.output.display());

    if let Some(dir) = cli.png_dir {
        std::fs::create_dir_all(&dir)?;
        let (depth, _, _) = stack.shape();
        for (layer, kind) in masks.kinds().into_iter().enumerate() {
            for z in 0..depth {
                let path = dir.join(format!("{kind:?}_z{z:03}.png").to_lowercase());
                save_slice_png(&masks, layer, z, path)?;
            }
        }
        info!("PNG previews saved under {}", dir.display());
    }
    Ok(())
}
