//! 项目配置.
//!
//! 切片方向与分辨率在项目创建后不再改变. 配置可从环境变量读取:
//!
//! - `$CCF_BERRY_ORIENTATION`: `coronal` / `horizontal` / `sagittal`, 默认 `coronal`;
//! - `$CCF_BERRY_RESOLUTION`: `100` / `50` / `25` / `10` (可带 `um` 后缀), 默认 `25`;
//! - `$CCF_BERRY_PROJECT_DIR`: 项目根目录, 默认 `$HOME/ccf-berry/project`.

use crate::atlas::{Orientation, ParseAtlasParamError, Resolution};
use crate::consts::env;
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 读取配置错误.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// 环境变量的值无法解析.
    InvalidValue {
        /// 变量名.
        key: &'static str,
        /// 解析错误.
        error: ParseAtlasParamError,
    },

    /// 没有设置项目目录, 且无法确定家目录.
    NoProjectDir,

    /// 读写配置文件错误.
    Io(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, error } => write!(f, "invalid `${key}`: {error}"),
            Self::NoProjectDir => f.write_str("no project directory and no home directory"),
            Self::Io(e) => write!(f, "config I/O error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// 配置相关操作的结果.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// 项目配置.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProjectConfig {
    /// 切片方向.
    pub orientation: Orientation,

    /// 分辨率.
    pub resolution: Resolution,

    /// 项目根目录.
    pub project_dir: PathBuf,
}

/// `$HOME/ccf-berry/project`.
pub fn home_project_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.extend(["ccf-berry", "project"]);
    Some(ans)
}

impl ProjectConfig {
    /// 新建.
    pub fn new<P: Into<PathBuf>>(orientation: Orientation, resolution: Resolution, project_dir: P) -> Self {
        Self {
            orientation,
            resolution,
            project_dir: project_dir.into(),
        }
    }

    /// 从环境变量读取, 未设置的项取默认值.
    #[inline]
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 同 [`ProjectConfig::from_env`], 但通过 `lookup` 查询变量.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> ConfigResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let orientation = match get(env::ORIENTATION) {
            Some(v) => v.trim().parse().map_err(|error| ConfigError::InvalidValue {
                key: env::ORIENTATION,
                error,
            })?,
            None => Orientation::Coronal,
        };
        let resolution = match get(env::RESOLUTION) {
            Some(v) => v.trim().parse().map_err(|error| ConfigError::InvalidValue {
                key: env::RESOLUTION,
                error,
            })?,
            None => Resolution::Um25,
        };
        let project_dir = match get(env::PROJECT_DIR) {
            Some(v) => PathBuf::from(v),
            None => home_project_dir().ok_or(ConfigError::NoProjectDir)?,
        };
        Ok(Self {
            orientation,
            resolution,
            project_dir,
        })
    }

    /// 项目内某个图像目录的对齐记录所在目录.
    pub fn alignment_dir(&self, image_dir: &Path) -> PathBuf {
        let key = image_dir
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .filter(|s| !s.is_empty() && *s != "/")
            .collect::<Vec<_>>()
            .join("_");
        self.project_dir.join("alignments").join(key)
    }

    /// 项目内重建体的导出目录.
    #[inline]
    pub fn volume_dir(&self) -> PathBuf {
        self.project_dir.join("volumes")
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        use std::fs;

        const CONFIG_FILE: &str = "project.json";

        impl ProjectConfig {
            /// 保存到 `project_dir/project.json`, 必要时创建目录.
            pub fn save(&self) -> ConfigResult<()> {
                let io = |e: std::io::Error| ConfigError::Io(e.to_string());
                fs::create_dir_all(&self.project_dir).map_err(io)?;
                let s = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Io(e.to_string()))?;
                fs::write(self.project_dir.join(CONFIG_FILE), s).map_err(io)
            }

            /// 读取 `dir/project.json`.
            pub fn load<P: AsRef<Path>>(dir: P) -> ConfigResult<Self> {
                let s = fs::read_to_string(dir.as_ref().join(CONFIG_FILE))
                    .map_err(|e| ConfigError::Io(e.to_string()))?;
                serde_json::from_str(&s).map_err(|e| ConfigError::Io(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_from_lookup() {
        let c = ProjectConfig::from_lookup(lookup(&[
            (env::ORIENTATION, "sagittal"),
            (env::RESOLUTION, "50um"),
            (env::PROJECT_DIR, "/tmp/p"),
        ]))
        .unwrap();
        assert_eq!(
            c,
            ProjectConfig::new(Orientation::Sagittal, Resolution::Um50, "/tmp/p")
        );

        let c = ProjectConfig::from_lookup(lookup(&[
            (env::PROJECT_DIR, "/tmp/p"),
            (env::RESOLUTION, " "),
        ]))
        .unwrap();
        assert_eq!(c.orientation, Orientation::Coronal);
        assert_eq!(c.resolution, Resolution::Um25);
    }

    #[test]
    fn test_invalid_values() {
        let e = ProjectConfig::from_lookup(lookup(&[(env::RESOLUTION, "30")])).unwrap_err();
        assert!(matches!(
            e,
            ConfigError::InvalidValue {
                key: env::RESOLUTION,
                ..
            }
        ));
        let e = ProjectConfig::from_lookup(lookup(&[(env::ORIENTATION, "axial")])).unwrap_err();
        assert!(matches!(e, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_dirs() {
        let c = ProjectConfig::new(Orientation::Coronal, Resolution::Um25, "/p");
        assert_eq!(
            c.alignment_dir(Path::new("/data/mouse 1/DAPI")),
            PathBuf::from("/p/alignments/data_mouse 1_DAPI")
        );
        assert_eq!(c.volume_dir(), PathBuf::from("/p/volumes"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let c = ProjectConfig::new(Orientation::Horizontal, Resolution::Um10, dir.path().join("p"));
        c.save().unwrap();
        assert_eq!(ProjectConfig::load(&c.project_dir).unwrap(), c);
    }
}
