// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 文件存储后端
//!
//! 每个资源对应数据目录下的一个 `.val` 文件：
//! - 标识符中的 `/` 先替换为 `_`，保证不会产生子目录，也不会逃出数据目录。
//! - 文件名追加替换后标识符的 MD5 指纹：`{id}-{md5}.val`。
//! - 写入先落到临时文件再 `rename`，读者看不到写了一半的内容。
//! - 同一标识符的并发写入以最后一次为准，没有跨进程锁。
//! - 文件名超出 [`MAX_FILE_NAME`] 的标识符视为不存在，写入时拒绝。

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::SystemTime,
};

use bytes::Bytes;
use log::{debug, warn};

use crate::{
    cache::ContentCache,
    exception::HttpException,
    param::{MAX_FILE_NAME, VALUE_EXTENSION},
    util::{md5_hex, unique_id},
};

/// 资源的元数据
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceMeta {
    pub modified: SystemTime,
    pub len: u64,
}

pub struct ResourceStore {
    data_dir: PathBuf,
    cache: Mutex<ContentCache>,
}

impl ResourceStore {
    /// 打开（必要时创建）数据目录
    pub fn open(data_dir: impl Into<PathBuf>, cache_size: usize) -> io::Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            cache: Mutex::new(ContentCache::from_capacity(cache_size)),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// 标识符到文件名的映射
    pub fn storage_key(id: &str) -> String {
        let sanitized = id.replace('/', "_");
        let fingerprint = md5_hex(&sanitized);
        format!("{}-{}{}", sanitized, fingerprint, VALUE_EXTENSION)
    }

    /// 标识符过长，对应的文件名无法在数据目录中创建
    pub fn is_too_long(id: &str) -> bool {
        Self::storage_key(id).len() > MAX_FILE_NAME
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.data_dir.join(Self::storage_key(id))
    }

    /// 资源的公开 URI，`_` 还原为 `/`
    pub fn uri(public_root: &str, id: &str) -> String {
        format!("{}/{}", public_root, id.replace('_', "/"))
    }

    /// 资源不存在时返回 `None`
    pub fn metadata(&self, id: &str) -> Result<Option<ResourceMeta>, HttpException> {
        if Self::is_too_long(id) {
            return Ok(None);
        }
        match fs::metadata(self.path_for(id)) {
            Ok(meta) if meta.is_file() => Ok(Some(ResourceMeta {
                modified: meta.modified()?,
                len: meta.len(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, id: &str) -> Result<bool, HttpException> {
        Ok(self.metadata(id)?.is_some())
    }

    /// 读取资源内容，优先使用修改时间一致的缓存
    pub fn read(&self, id: &str) -> Result<Bytes, HttpException> {
        let path = self.path_for(id);
        let meta = self.metadata(id)?.ok_or_else(HttpException::not_found)?;

        if let Some(content) = self.lock_cache().lookup(&path, meta.modified) {
            debug!("缓存命中：{}", path.display());
            return Ok(content);
        }

        let content = match fs::read(&path) {
            Ok(c) => Bytes::from(c),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(HttpException::not_found())
            }
            Err(e) => return Err(e.into()),
        };
        self.lock_cache()
            .insert(&path, content.clone(), meta.modified);
        Ok(content)
    }

    /// 创建或覆盖资源，返回写入后的修改时间
    pub fn write(&self, id: &str, content: &[u8]) -> Result<SystemTime, HttpException> {
        let temp_name = format!("{}.tmp-{}", Self::storage_key(id), unique_id());
        if temp_name.len() > MAX_FILE_NAME {
            debug!("标识符过长（{} 字节），拒绝写入", id.len());
            return Err(HttpException::bad_request("Identifier too long"));
        }
        let path = self.path_for(id);
        let temp = self.data_dir.join(temp_name);

        let modified = SystemTime::now();
        let result = write_then_rename(&temp, &path, content, modified);

        self.lock_cache().invalidate(&path);
        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&temp) {
                debug!("清理临时文件失败：{}", cleanup);
            }
            warn!("写入 {} 失败：{}", path.display(), e);
            return Err(e.into());
        }
        debug!("写入 {}，{} 字节", path.display(), content.len());
        Ok(modified)
    }

    /// 删除资源，不存在时返回 404
    pub fn delete(&self, id: &str) -> Result<(), HttpException> {
        if Self::is_too_long(id) {
            return Err(HttpException::not_found());
        }
        let path = self.path_for(id);
        self.lock_cache().invalidate(&path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(HttpException::not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// 全部资源标识符，最近写入者在前
    pub fn list(&self) -> Result<Vec<String>, HttpException> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            let id = match name
                .strip_suffix(VALUE_EXTENSION)
                .and_then(|stem| stem.rsplit_once('-'))
            {
                Some((id, _)) => id.to_string(),
                _ => continue,
            };
            let meta = entry.metadata()?;
            if meta.is_file() {
                entries.push((meta.modified()?, id));
            }
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }

    fn lock_cache(&self) -> MutexGuard<'_, ContentCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 显式写入修改时间，列表排序不受文件系统时间戳精度影响
fn write_then_rename(
    temp: &Path,
    path: &Path,
    content: &[u8],
    modified: SystemTime,
) -> io::Result<()> {
    fs::write(temp, content)?;
    fs::File::options()
        .write(true)
        .open(temp)?
        .set_modified(modified)?;
    fs::rename(temp, path)
}
