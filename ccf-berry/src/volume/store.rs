use super::ReconstructedVolume;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// 按目录保存重建结果. 每个目录至多一份, 后写入的直接替换先写入的.
///
/// 同一目录上的并发任务不互斥, 最后完成的获胜.
#[derive(Debug, Default)]
pub struct VolumeStore {
    volumes: Mutex<HashMap<PathBuf, Arc<ReconstructedVolume>>>,
}

impl VolumeStore {
    /// 空仓库.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入 `directory` 的重建结果, 返回被替换的旧结果.
    pub fn insert<P: Into<PathBuf>>(
        &self,
        directory: P,
        volume: ReconstructedVolume,
    ) -> Option<Arc<ReconstructedVolume>> {
        let directory = directory.into();
        let mut map = self.volumes.lock().unwrap_or_else(|e| e.into_inner());
        let old = map.insert(directory.clone(), Arc::new(volume));
        if old.is_some() {
            log::warn!("Volume of `{}` is replaced", directory.display());
        }
        old
    }

    /// 读取 `directory` 的重建结果.
    pub fn get<P: AsRef<Path>>(&self, directory: P) -> Option<Arc<ReconstructedVolume>> {
        let map = self.volumes.lock().unwrap_or_else(|e| e.into_inner());
        map.get(directory.as_ref()).cloned()
    }

    /// 移除 `directory` 的重建结果.
    pub fn remove<P: AsRef<Path>>(&self, directory: P) -> Option<Arc<ReconstructedVolume>> {
        let mut map = self.volumes.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(directory.as_ref())
    }

    /// 已有结果的目录, 按字典序.
    pub fn directories(&self) -> Vec<PathBuf> {
        let map = self.volumes.lock().unwrap_or_else(|e| e.into_inner());
        let mut v: Vec<_> = map.keys().cloned().collect();
        v.sort();
        v
    }

    /// 结果个数.
    pub fn len(&self) -> usize {
        self.volumes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 是否为空.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
