use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use log::warn;
use lru::LruCache;

#[derive(Clone)]
struct CacheEntry {
    content: Bytes,
    modified_time: SystemTime,
}

/// 资源内容的 LRU 读缓存，以存储路径为键，以修改时间校验新鲜度
pub struct ContentCache {
    cache: LruCache<PathBuf, CacheEntry>,
}

impl ContentCache {
    // 容量为0时退化为1
    pub fn from_capacity(capacity: usize) -> Self {
        let capacity = match NonZeroUsize::new(capacity) {
            Some(c) => c,
            None => {
                warn!("缓存容量配置为0，改为1");
                NonZeroUsize::MIN
            }
        };
        Self {
            cache: LruCache::new(capacity),
        }
    }

    // 放入
    pub fn insert(&mut self, path: &Path, content: Bytes, modified_time: SystemTime) {
        let entry = CacheEntry {
            content,
            modified_time,
        };
        self.cache.put(path.to_path_buf(), entry);
    }

    // 查询有效缓存，修改时间对不上的条目视为过期并移除
    pub fn lookup(&mut self, path: &Path, current_modified_time: SystemTime) -> Option<Bytes> {
        let fresh = self.cache.get(path)?.modified_time == current_modified_time;
        if fresh {
            self.cache.get(path).map(|e| e.content.clone())
        } else {
            self.cache.pop(path);
            None
        }
    }

    // 写入或删除资源后调用
    pub fn invalidate(&mut self, path: &Path) {
        self.cache.pop(path);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn path(name: &str) -> PathBuf {
        PathBuf::from("data").join(name)
    }

    #[test]
    fn test_cache_creation() {
        let cache = ContentCache::from_capacity(10);
        assert_eq!(cache.capacity(), 10);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_falls_back_to_one() {
        assert_eq!(ContentCache::from_capacity(0).capacity(), 1);
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut cache = ContentCache::from_capacity(3);
        let time = SystemTime::now();
        let content = Bytes::from("test content");

        cache.insert(&path("a.val"), content.clone(), time);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&path("a.val"), time), Some(content));
    }

    #[test]
    fn test_stale_entry_is_dropped() {
        let mut cache = ContentCache::from_capacity(3);
        let time1 = SystemTime::now();
        let time2 = time1 + Duration::from_secs(10);

        cache.insert(&path("a.val"), Bytes::from("old"), time1);
        assert!(cache.lookup(&path("a.val"), time2).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = ContentCache::from_capacity(2);
        let time = SystemTime::now();

        cache.insert(&path("1.val"), Bytes::from("content1"), time);
        cache.insert(&path("2.val"), Bytes::from("content2"), time);
        cache.lookup(&path("1.val"), time);
        cache.insert(&path("3.val"), Bytes::from("content3"), time);

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&path("2.val"), time).is_none());
        assert!(cache.lookup(&path("1.val"), time).is_some());
        assert!(cache.lookup(&path("3.val"), time).is_some());
    }

    #[test]
    fn test_invalidate() {
        let mut cache = ContentCache::from_capacity(3);
        let time = SystemTime::now();
        cache.insert(&path("a.val"), Bytes::from("x"), time);
        cache.invalidate(&path("a.val"));
        assert!(cache.lookup(&path("a.val"), time).is_none());
        // 不存在的键也可以安全失效
        cache.invalidate(&path("missing.val"));
    }
}
