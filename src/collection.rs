//! 带索引的记录集合
//!
//! 并发模型：
//! - 记录表与每个索引各是一个分片 `DashMap`，读写只锁定所在分片
//! - 索引列表由 `RwLock` 保护：增删记录持读锁（可并发），`attach_index` 持写锁，
//!   因此索引填充与并发写入串行化，不会丢失写入
//! - `add` 先占住记录表中的空位，写完全部索引后才发布记录；`remove` 在持有记录槽位时
//!   清理索引再移除记录。检索通过记录表解析候选，已发布的记录一定存在于每个索引中
//! - 加锁顺序固定为：索引列表 → 记录分片 → 索引分片

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};
use crate::attribute::Attribute;
use crate::common::{CollectionOptions, Result, StoreError};
use crate::evaluator::Evaluator;
use crate::field_type::Value;
use crate::index::Index;
use crate::meta::{EntitySchema, Record};
use crate::query::Query;
use crate::result_set::{QueryOptions, ResultSet, ScopeGuard};

// ── 集合内部状态 ──────────────────────────────────────────────────────────────

struct CollectionInner {
    schema:      Arc<EntitySchema>,
    opts:        CollectionOptions,
    /// 标识 → 记录
    records:     DashMap<Value, Arc<Record>>,
    indexes:     RwLock<Vec<Arc<Index>>>,
    /// 尚未关闭的 ResultSet 个数
    open_scopes: AtomicUsize,
}

// ── 集合句柄 ──────────────────────────────────────────────────────────────────

/// 可克隆的共享句柄；`ExistsIn` 通过它引用外部集合
#[derive(Clone)]
pub struct IndexedCollection(Arc<CollectionInner>);

impl IndexedCollection {
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        Self::with_options(schema, CollectionOptions::default())
    }

    pub fn with_options(schema: Arc<EntitySchema>, opts: CollectionOptions) -> Self {
        Self(Arc::new(CollectionInner {
            schema,
            opts,
            records: DashMap::with_capacity_and_shard_amount(opts.capacity, opts.shard_amount),
            indexes: RwLock::new(Vec::new()),
            open_scopes: AtomicUsize::new(0),
        }))
    }

    pub fn entity(&self) -> &str { self.0.schema.entity() }

    pub fn schema(&self) -> &Arc<EntitySchema> { &self.0.schema }

    pub fn len(&self) -> usize { self.0.records.len() }

    pub fn is_empty(&self) -> bool { self.0.records.is_empty() }

    pub fn contains(&self, id: &Value) -> bool { self.0.records.contains_key(id) }

    pub fn get(&self, id: &Value) -> Option<Arc<Record>> {
        self.0.records.get(id).map(|e| Arc::clone(e.value()))
    }

    /// 当前全部记录的快照（无序）
    pub fn snapshot(&self) -> Vec<Arc<Record>> {
        self.0.records.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.0.indexes.read().iter().map(|ix| ix.name().to_string()).collect()
    }

    /// 由 retrieve 打开、尚未关闭的 ResultSet 个数
    pub fn open_result_sets(&self) -> usize {
        self.0.open_scopes.load(Ordering::Acquire)
    }

    pub fn same_collection(&self, other: &IndexedCollection) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // ── 写入 ──────────────────────────────────────────────────────────────────

    /// 插入记录。标识已存在时不做任何修改并返回 `Ok(false)`。
    ///
    /// 任一索引拒绝插入时，已写入的索引全部回滚，记录不会进入集合。
    pub fn add(&self, record: Record) -> Result<bool> {
        self.check_record(&record)?;
        let indexes = self.0.indexes.read();
        let slot = match self.0.records.entry(record.id().clone()) {
            Entry::Occupied(_) => {
                trace!(entity = self.entity(), id = %record.id(), "identity already present");
                return Ok(false);
            }
            Entry::Vacant(slot) => slot,
        };
        for (i, ix) in indexes.iter().enumerate() {
            if let Err(e) = ix.insert(&record) {
                for done in &indexes[..i] {
                    done.remove(&record);
                }
                debug!(entity = self.entity(), id = %record.id(), error = %e, "add rolled back");
                return Err(e);
            }
        }
        trace!(entity = self.entity(), id = %record.id(), "added");
        slot.insert(Arc::new(record));
        Ok(true)
    }

    /// 按标识删除；使用集合中保存的那条记录重新计算索引键
    pub fn remove(&self, record: &Record) -> Result<bool> {
        self.check_record(record)?;
        Ok(self.remove_id(record.id()))
    }

    /// 记录不存在时返回 `false`
    pub fn remove_id(&self, id: &Value) -> bool {
        let indexes = self.0.indexes.read();
        match self.0.records.entry(id.clone()) {
            Entry::Vacant(_) => false,
            Entry::Occupied(slot) => {
                for ix in indexes.iter() {
                    ix.remove(slot.get());
                }
                slot.remove();
                trace!(entity = self.entity(), id = %id, "removed");
                true
            }
        }
    }

    // ── 索引 ──────────────────────────────────────────────────────────────────

    /// 挂载索引：持有索引列表写锁，从当前记录快照填充后才对查询可见
    pub fn attach_index(&self, index: Index) -> Result<()> {
        let attr = index.attribute();
        if attr.entity() != self.entity() {
            return Err(StoreError::EntityMismatch {
                expected: self.entity().into(),
                found:    attr.entity().into(),
            });
        }
        let mut indexes = self.0.indexes.write();
        if indexes.iter().any(|ix| ix.name() == index.name()) {
            return Err(StoreError::IndexExists {
                entity: self.entity().into(),
                name:   index.name().into(),
            });
        }
        let snapshot = self.snapshot();
        let n = index.populate(snapshot.iter().map(|r| r.as_ref()))?;
        debug!(entity = self.entity(), index = ?index, records = n, "index attached");
        indexes.push(Arc::new(index));
        Ok(())
    }

    /// 以集合自身的分片配置创建并挂载唯一索引
    pub fn attach_unique(&self, attribute: &Attribute) -> Result<()> {
        self.attach_index(Index::unique_with(attribute.clone(), self.0.opts))
    }

    /// 以集合自身的分片配置创建并挂载哈希索引
    pub fn attach_hash(&self, attribute: &Attribute) -> Result<()> {
        self.attach_index(Index::hash_with(attribute.clone(), self.0.opts))
    }

    pub(crate) fn indexes(&self) -> Vec<Arc<Index>> {
        self.0.indexes.read().clone()
    }

    // ── 查询 ──────────────────────────────────────────────────────────────────

    /// 编译并执行查询。候选集在返回前确定，之后开始的写入不可见。
    pub fn retrieve(&self, query: &Query, options: &QueryOptions) -> Result<ResultSet> {
        let plan = Evaluator::new(self).compile(query)?;
        let scope = ScopeGuard::open(self);
        Ok(ResultSet::new(plan, options.dedup, scope))
    }

    pub(crate) fn scope_counter(&self) -> &AtomicUsize { &self.0.open_scopes }

    fn check_record(&self, record: &Record) -> Result<()> {
        if record.entity() == self.entity() {
            Ok(())
        } else {
            Err(StoreError::SchemaMismatch(format!(
                "record of {} added to collection of {}", record.entity(), self.entity(),
            )))
        }
    }
}

impl std::fmt::Debug for IndexedCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedCollection")
            .field("entity", &self.entity())
            .field("records", &self.len())
            .field("indexes", &self.index_names())
            .finish()
    }
}
