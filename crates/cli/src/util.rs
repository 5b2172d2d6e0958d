use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use typed_path::{Utf8NativePath, Utf8NativePathBuf};

// For argp::FromArgs
pub fn native_path(value: &str) -> Result<Utf8NativePathBuf, String> {
    Ok(Utf8NativePathBuf::from(value))
}

pub fn read_json<T: DeserializeOwned>(path: &Utf8NativePath) -> Result<T> {
    let data = std::fs::read(path.with_platform_encoding())
        .with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_slice(&data).with_context(|| format!("Failed to parse {}", path))
}

pub fn write_json<T: Serialize>(path: &Utf8NativePath, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
    {
        std::fs::create_dir_all(parent.with_platform_encoding())
            .with_context(|| format!("Failed to create directory '{}'", parent))?;
    }
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');
    std::fs::write(path.with_platform_encoding(), data)
        .with_context(|| format!("Failed to write output file '{}'", path))
}

pub fn write_text(path: &Utf8NativePath, contents: &str) -> Result<()> {
    std::fs::write(path.with_platform_encoding(), contents)
        .with_context(|| format!("Failed to write output file '{}'", path))
}
