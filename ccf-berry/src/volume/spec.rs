use super::{BuildError, BuildResult};
use regex::Regex;
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一次体重建的参数. 每个任务消耗一次.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VolumeBuildSpec {
    /// 图像所在目录, 同时是重建结果的键.
    pub directory: PathBuf,

    /// 是否按 z-stack 复制.
    pub use_z_stack: bool,

    /// z-stack 文件名中的标记, 如 `_z\d+`. 求伴随文件时去掉它.
    pub z_stack_pattern: String,

    /// z-stack 中心两侧各复制的层数.
    pub stack_half_thickness: usize,

    /// 是否使用通道替换.
    pub use_channel_substitution: bool,

    /// 文件名中被替换的通道名 (正则).
    pub channel_pattern: String,

    /// 替换后的通道名.
    pub channel_replacement: String,
}

impl VolumeBuildSpec {
    /// 只有目录, 不启用 z-stack 与通道替换.
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            use_z_stack: false,
            z_stack_pattern: String::from(r"_z\d+"),
            stack_half_thickness: 0,
            use_channel_substitution: false,
            channel_pattern: String::new(),
            channel_replacement: String::new(),
        }
    }

    /// 启用 z-stack, 两侧各复制 `half_thickness` 层.
    pub fn with_z_stack(mut self, half_thickness: usize) -> Self {
        self.use_z_stack = true;
        self.stack_half_thickness = half_thickness;
        self
    }

    /// 启用通道替换.
    pub fn with_channel(mut self, pattern: &str, replacement: &str) -> Self {
        self.use_channel_substitution = true;
        self.channel_pattern = pattern.to_owned();
        self.channel_replacement = replacement.to_owned();
        self
    }

    /// 实际生效的 z-stack 半厚度. 未启用时为 0.
    #[inline]
    pub fn half_thickness(&self) -> usize {
        if self.use_z_stack {
            self.stack_half_thickness
        } else {
            0
        }
    }

    /// 求 `image` 对应的伴随文件路径, 不检查其是否存在.
    ///
    /// 只改写文件名: 启用通道替换时, 将第一处匹配 `channel_pattern` 的部分换成
    /// `channel_replacement`; 启用 z-stack 时, 去掉第一处 z-stack 标记.
    /// 都未启用时, 原样返回.
    pub fn companion_path(&self, image: &Path) -> BuildResult<PathBuf> {
        let Some(name) = image.file_name().and_then(|n| n.to_str()) else {
            return Err(BuildError::UnresolvedCompanionFile(image.to_path_buf()));
        };
        let mut name = name.to_owned();
        if self.use_channel_substitution {
            let re = compile(&self.channel_pattern)?;
            name = re
                .replacen(&name, 1, self.channel_replacement.as_str())
                .into_owned();
        }
        if self.use_z_stack {
            let re = compile(&self.z_stack_pattern)?;
            name = re.replacen(&name, 1, "").into_owned();
        }
        Ok(image.with_file_name(name))
    }

    /// 同 [`VolumeBuildSpec::companion_path`], 但要求文件存在,
    /// 否则返回 `Err(BuildError::UnresolvedCompanionFile)`.
    pub fn resolve_companion(&self, image: &Path) -> BuildResult<PathBuf> {
        let p = self.companion_path(image)?;
        if p.is_file() {
            Ok(p)
        } else {
            log::warn!("Companion of `{}` not found at `{}`", image.display(), p.display());
            Err(BuildError::UnresolvedCompanionFile(p))
        }
    }
}

#[inline]
fn compile(pattern: &str) -> BuildResult<Regex> {
    Regex::new(pattern).map_err(|e| BuildError::InvalidPattern(e.to_string()))
}
