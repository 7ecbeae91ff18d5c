//! 输入路径解析.

use std::env;
use std::path::{Path, PathBuf};

/// 获取默认输入目录.
///
/// 1. 若环境变量 `$SUBC_INPUT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/subc`.
pub fn input_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("SUBC_INPUT_DIR") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => {
            let mut ans = dirs::home_dir()?;
            ans.extend(["dataset", "subc"]);
            Some(ans)
        }
    }
}

/// 相对路径先拼接到默认输入目录下; 绝对路径原样返回.
pub fn resolve_input<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() || path.exists() {
        return path.to_path_buf();
    }
    match input_dir_from_env_or_home() {
        Some(dir) => dir.join(path),
        None => path.to_path_buf(),
    }
}

/// 读取 JSON 流程配置. 未给出路径时使用默认流程.
pub fn load_config(path: Option<&Path>) -> Result<subc_berry::WorkflowConfig, Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(subc_berry::WorkflowConfig::default()),
    }
}
