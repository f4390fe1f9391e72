//! 属性索引
//!
//! 两种索引，都把属性值映射到记录标识（记录第 0 个字段的值）：
//! - **UniqueIndex**：值 → 单个标识，键冲突时拒绝插入
//! - **HashIndex**：值 → 标识集合，允许重复；桶清空即删除
//!
//! 两者都建在分片 `DashMap` 上，读写只锁定所在分片，互不相关的读写不会互相阻塞。
//! 缺失的键（见 [`Value::is_absent`]）不建索引，唯一索引因此允许任意多条空值记录。

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexmap::IndexSet;
use crate::attribute::Attribute;
use crate::common::{CollectionOptions, Result, StoreError};
use crate::field_type::Value;
use crate::meta::Record;

// ── Unique Index ──────────────────────────────────────────────────────────────

pub struct UniqueIndex {
    attribute: Attribute,
    entries:   DashMap<Value, Value>,
}

impl UniqueIndex {
    pub fn new(attribute: Attribute, opts: CollectionOptions) -> Self {
        Self {
            attribute,
            entries: DashMap::with_capacity_and_shard_amount(opts.capacity, opts.shard_amount),
        }
    }

    /// 同一标识以同一键重复插入是幂等的
    pub fn insert(&self, record: &Record) -> Result<()> {
        let key = self.attribute.value(record);
        if key.is_absent() {
            return Ok(());
        }
        match self.entries.entry(key) {
            Entry::Occupied(e) if e.get() == record.id() => Ok(()),
            Entry::Occupied(e) => Err(StoreError::UniquenessViolation {
                attribute: self.attribute.to_string(),
                key:       e.key().to_string(),
                existing:  e.get().to_string(),
            }),
            Entry::Vacant(e) => {
                e.insert(record.id().clone());
                Ok(())
            }
        }
    }

    /// 只删除仍指向该记录的键
    pub fn remove(&self, record: &Record) {
        let key = self.attribute.value(record);
        if key.is_absent() {
            return;
        }
        self.entries.remove_if(&key, |_, id| id == record.id());
    }

    pub fn probe(&self, value: &Value) -> Option<Value> {
        self.entries.get(value).map(|e| e.value().clone())
    }

    pub fn estimated_size(&self, value: &Value) -> usize {
        usize::from(self.entries.contains_key(value))
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    fn clear(&self) { self.entries.clear() }
}

// ── Hash Index ────────────────────────────────────────────────────────────────

pub struct HashIndex {
    attribute: Attribute,
    /// 桶内按插入顺序保存标识
    buckets:   DashMap<Value, IndexSet<Value>>,
}

impl HashIndex {
    pub fn new(attribute: Attribute, opts: CollectionOptions) -> Self {
        Self {
            attribute,
            buckets: DashMap::with_capacity_and_shard_amount(opts.capacity, opts.shard_amount),
        }
    }

    pub fn insert(&self, record: &Record) {
        let key = self.attribute.value(record);
        if key.is_absent() {
            return;
        }
        self.buckets.entry(key).or_default().insert(record.id().clone());
    }

    pub fn remove(&self, record: &Record) {
        let key = self.attribute.value(record);
        if key.is_absent() {
            return;
        }
        if let Some(mut bucket) = self.buckets.get_mut(&key) {
            bucket.shift_remove(record.id());
        }
        // 释放分片写锁后再检查：期间的并发插入会让桶非空，不会被误删
        self.buckets.remove_if(&key, |_, bucket| bucket.is_empty());
    }

    pub fn probe(&self, value: &Value) -> Vec<Value> {
        self.buckets.get(value)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn estimated_size(&self, value: &Value) -> usize {
        self.buckets.get(value).map_or(0, |b| b.len())
    }

    /// 不同键的个数
    pub fn len(&self) -> usize { self.buckets.len() }

    pub fn is_empty(&self) -> bool { self.buckets.is_empty() }

    fn clear(&self) { self.buckets.clear() }
}

// ── Index ─────────────────────────────────────────────────────────────────────

/// 挂载到集合上的索引
pub enum Index {
    Unique(UniqueIndex),
    Hash(HashIndex),
}

impl Index {
    pub fn unique(attribute: Attribute) -> Self {
        Self::unique_with(attribute, CollectionOptions::default())
    }
    pub fn hash(attribute: Attribute) -> Self {
        Self::hash_with(attribute, CollectionOptions::default())
    }
    pub fn unique_with(attribute: Attribute, opts: CollectionOptions) -> Self {
        Self::Unique(UniqueIndex::new(attribute, opts))
    }
    pub fn hash_with(attribute: Attribute, opts: CollectionOptions) -> Self {
        Self::Hash(HashIndex::new(attribute, opts))
    }

    pub fn attribute(&self) -> &Attribute {
        match self {
            Self::Unique(ix) => &ix.attribute,
            Self::Hash(ix)   => &ix.attribute,
        }
    }

    pub fn name(&self) -> &str { self.attribute().name() }

    pub fn is_unique(&self) -> bool { matches!(self, Self::Unique(_)) }

    pub fn insert(&self, record: &Record) -> Result<()> {
        match self {
            Self::Unique(ix) => ix.insert(record),
            Self::Hash(ix)   => { ix.insert(record); Ok(()) }
        }
    }

    pub fn remove(&self, record: &Record) {
        match self {
            Self::Unique(ix) => ix.remove(record),
            Self::Hash(ix)   => ix.remove(record),
        }
    }

    /// 返回匹配 `value` 的记录标识；唯一索引至多一个
    pub fn probe(&self, value: &Value) -> Vec<Value> {
        match self {
            Self::Unique(ix) => ix.probe(value).into_iter().collect(),
            Self::Hash(ix)   => ix.probe(value),
        }
    }

    /// 精确值：唯一索引为 0/1，哈希索引为桶大小
    pub fn estimated_size(&self, value: &Value) -> usize {
        match self {
            Self::Unique(ix) => ix.estimated_size(value),
            Self::Hash(ix)   => ix.estimated_size(value),
        }
    }

    /// 挂载时从现有记录快照填充；失败时清空索引
    pub fn populate<'a>(&self, records: impl IntoIterator<Item = &'a Record>) -> Result<usize> {
        let mut n = 0;
        for record in records {
            if let Err(e) = self.insert(record) {
                self.clear();
                return Err(e);
            }
            n += 1;
        }
        Ok(n)
    }

    fn clear(&self) {
        match self {
            Self::Unique(ix) => ix.clear(),
            Self::Hash(ix)   => ix.clear(),
        }
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_unique() { "Unique" } else { "Hash" };
        write!(f, "{kind}Index({})", self.attribute())
    }
}
