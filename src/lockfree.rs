//! 无锁哈希表
//!
//! 分片 + 写时复制：读取只需一次原子 load，写入通过 CAS 替换整个分片，
//! 旧分片由 crossbeam 的 epoch 机制延迟回收。适合读多写少、
//! 需要“不存在则插入”语义的缓存（会话密钥、连接适配器、统计状态）。

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;

use crossbeam::epoch::{self, Atomic, Owned};
use crossbeam::utils::CachePadded;

pub struct LockFreeHashMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// 分片数组，减少争用
    shards: Vec<CachePadded<LockFreeShard<K, V>>>,
    /// 分片数量（2 的幂）
    shard_count: usize,
}

struct LockFreeShard<K, V> {
    map: Atomic<HashMap<K, V>>,
}

impl<K, V> Drop for LockFreeShard<K, V> {
    fn drop(&mut self) {
        // 独占访问，不需要 pin
        unsafe {
            let guard = epoch::unprotected();
            let current = self.map.load(Ordering::Acquire, guard);
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}

impl<K, V> LockFreeHashMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_capacity(16)
    }

    /// 指定分片数量
    pub fn with_capacity(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1).next_power_of_two();
        let shards = (0..shard_count)
            .map(|_| {
                CachePadded::new(LockFreeShard {
                    map: Atomic::new(HashMap::new()),
                })
            })
            .collect();

        Self { shards, shard_count }
    }

    fn shard_index(&self, key: &K) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.shard_count - 1)
    }

    /// 对分片做一次写时复制更新，CAS 失败时重算
    fn update_shard<R>(&self, index: usize, mut op: impl FnMut(&mut HashMap<K, V>) -> R) -> R {
        let shard = &self.shards[index];
        let mut retries = 0usize;

        loop {
            let guard = epoch::pin();
            let current = shard.map.load(Ordering::Acquire, &guard);

            let mut next = match unsafe { current.as_ref() } {
                Some(map) => map.clone(),
                None => HashMap::new(),
            };
            let result = op(&mut next);

            match shard.map.compare_exchange(
                current,
                Owned::new(next),
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    if !current.is_null() {
                        unsafe { guard.defer_destroy(current) };
                    }
                    return result;
                }
                Err(_) => {
                    retries += 1;
                    if retries > 10 {
                        std::thread::yield_now();
                    }
                }
            }
        }
    }

    /// Wait-free 读取
    pub fn get(&self, key: &K) -> Option<V> {
        let shard = &self.shards[self.shard_index(key)];
        let guard = epoch::pin();
        let current = shard.map.load(Ordering::Acquire, &guard);
        unsafe { current.as_ref() }.and_then(|map| map.get(key).cloned())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// 插入或覆盖，返回旧值
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let index = self.shard_index(&key);
        self.update_shard(index, |map| map.insert(key.clone(), value.clone()))
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        if !self.contains_key(key) {
            return None;
        }
        let index = self.shard_index(key);
        self.update_shard(index, |map| map.remove(key))
    }

    /// 仅当当前值满足条件时移除
    pub fn remove_if(&self, key: &K, predicate: impl Fn(&V) -> bool) -> Option<V> {
        match self.get(key) {
            Some(current) if predicate(&current) => {}
            _ => return None,
        }
        let index = self.shard_index(key);
        self.update_shard(index, |map| {
            if map.get(key).map_or(false, |value| predicate(value)) {
                map.remove(key)
            } else {
                None
            }
        })
    }

    /// 不存在则插入。并发调用时只有一个构造出的值会被保存并返回给所有调用方。
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        if let Some(existing) = self.get(&key) {
            return existing;
        }

        let candidate = make();
        let index = self.shard_index(&key);
        self.update_shard(index, |map| {
            map.entry(key.clone())
                .or_insert_with(|| candidate.clone())
                .clone()
        })
    }

    /// 所有键值对快照
    pub fn snapshot(&self) -> HashMap<K, V> {
        let mut result = HashMap::new();
        let guard = epoch::pin();

        for shard in &self.shards {
            let current = shard.map.load(Ordering::Acquire, &guard);
            if let Some(map) = unsafe { current.as_ref() } {
                for (k, v) in map.iter() {
                    result.insert(k.clone(), v.clone());
                }
            }
        }

        result
    }

    /// 清空并返回被移除的条目
    pub fn drain(&self) -> Vec<(K, V)> {
        (0..self.shard_count)
            .flat_map(|index| self.update_shard(index, |map| map.drain().collect::<Vec<_>>()))
            .collect()
    }

    pub fn clear(&self) {
        for index in 0..self.shard_count {
            self.update_shard(index, |map| map.clear());
        }
    }

    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        self.shards
            .iter()
            .map(|shard| {
                let current = shard.map.load(Ordering::Acquire, &guard);
                unsafe { current.as_ref() }.map_or(0, |map| map.len())
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for LockFreeHashMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for LockFreeHashMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockFreeHashMap")
            .field("shards", &self.shard_count)
            .field("len", &self.len())
            .finish()
    }
}
