//! 查询结果集
//!
//! 生命周期：`retrieve()` 创建 → 迭代消费 → `close()`（或 drop）结束，不可重启。
//! 打开期间持有一个 `ScopeGuard`，关闭、drop 或 panic 展开时都会释放。

use std::iter::Peekable;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use indexmap::IndexMap;
use tracing::trace;
use crate::collection::IndexedCollection;
use crate::common::{Result, StoreError};
use crate::evaluator::{Plan, RecordStream};
use crate::field_type::Value;
use crate::meta::Record;

// ── 查询选项 ──────────────────────────────────────────────────────────────────

/// 去重策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeduplicationStrategy {
    /// 按发现顺序输出原始匹配（包括 ExistsIn 产生的重复），额外内存 O(1)
    #[default]
    None,
    /// 先按标识缓冲全部匹配，再按首次出现顺序输出，每个标识恰好一次
    Materialize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub dedup: DeduplicationStrategy,
}

impl QueryOptions {
    pub fn with_dedup(mut self, dedup: DeduplicationStrategy) -> Self {
        self.dedup = dedup; self
    }

    pub fn materialize() -> Self {
        Self::default().with_dedup(DeduplicationStrategy::Materialize)
    }
}

// ── 资源作用域 ────────────────────────────────────────────────────────────────

/// retrieve 打开、ResultSet 关闭时释放的作用域标记
pub(crate) struct ScopeGuard {
    collection: IndexedCollection,
}

impl ScopeGuard {
    pub(crate) fn open(collection: &IndexedCollection) -> Self {
        collection.scope_counter().fetch_add(1, Ordering::AcqRel);
        Self { collection: collection.clone() }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.collection.scope_counter().fetch_sub(1, Ordering::AcqRel);
    }
}

// ── ResultSet ─────────────────────────────────────────────────────────────────

struct Cursor {
    stream:  Peekable<RecordStream>,
    yielded: usize,
    /// 整个结果的大小（与当前位置无关）；未知时为 None
    size:    Option<usize>,
    _scope:  ScopeGuard,
}

/// 惰性、只进、可关闭的匹配序列
///
/// `size()` 的开销：
/// - O(1)：纯索引探测（有索引属性上的 `Equal` / `In`，以及它们的 `And`）、
///   本地属性有索引的 `ExistsIn`、`And([])`、以及所有 `Materialize` 结果
/// - 其它情况第一次调用时把剩余结果物化并缓存
pub struct ResultSet {
    cursor: Option<Cursor>,
}

impl ResultSet {
    pub(crate) fn new(plan: Plan, dedup: DeduplicationStrategy, scope: ScopeGuard) -> Self {
        let (stream, size): (RecordStream, Option<usize>) = match dedup {
            DeduplicationStrategy::None => {
                let size = plan.known_size();
                (plan.into_stream(), size)
            }
            DeduplicationStrategy::Materialize => {
                let mut unique: IndexMap<Value, Arc<Record>> = IndexMap::new();
                for record in plan.into_stream() {
                    unique.entry(record.id().clone()).or_insert(record);
                }
                let size = unique.len();
                (Box::new(unique.into_values()), Some(size))
            }
        };
        Self {
            cursor: Some(Cursor { stream: stream.peekable(), yielded: 0, size, _scope: scope }),
        }
    }

    fn cursor(&mut self) -> Result<&mut Cursor> {
        self.cursor.as_mut().ok_or(StoreError::ResultSetClosed)
    }

    pub fn has_next(&mut self) -> Result<bool> {
        Ok(self.cursor()?.stream.peek().is_some())
    }

    /// 结果耗尽时返回 `NoSuchElement`
    pub fn try_next(&mut self) -> Result<Arc<Record>> {
        let cursor = self.cursor()?;
        let record = cursor.stream.next().ok_or(StoreError::NoSuchElement)?;
        cursor.yielded += 1;
        Ok(record)
    }

    /// 下一条匹配；没有时返回 `None`
    pub fn first(&mut self) -> Result<Option<Arc<Record>>> {
        match self.try_next() {
            Ok(r) => Ok(Some(r)),
            Err(StoreError::NoSuchElement) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 整个结果的条数，包括已经迭代过的部分
    pub fn size(&mut self) -> Result<usize> {
        let cursor = self.cursor()?;
        if let Some(size) = cursor.size {
            return Ok(size);
        }
        let rest: Vec<Arc<Record>> = cursor.stream.by_ref().collect();
        let size = cursor.yielded + rest.len();
        trace!(buffered = rest.len(), size, "result set materialized for size()");
        let stream: RecordStream = Box::new(rest.into_iter());
        cursor.stream = stream.peekable();
        cursor.size = Some(size);
        Ok(size)
    }

    /// 幂等；释放作用域与去重缓冲
    pub fn close(&mut self) {
        if self.cursor.take().is_some() {
            trace!("result set closed");
        }
    }

    pub fn is_closed(&self) -> bool { self.cursor.is_none() }
}

/// 便于 `for` 循环使用；结果耗尽时结束。
///
/// # Panics
///
/// 已关闭的结果集上调用 `next()` 会 panic：关闭后继续迭代是调用方的错误，
/// 不能与空结果混淆。需要以 `Result` 形式处理时使用 `try_next`。
impl Iterator for ResultSet {
    type Item = Arc<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.try_next() {
            Ok(record) => Some(record),
            Err(StoreError::NoSuchElement) => None,
            Err(e) => panic!("{e}"),
        }
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cursor {
            Some(c) => f.debug_struct("ResultSet")
                .field("yielded", &c.yielded)
                .field("size", &c.size)
                .finish(),
            None => write!(f, "ResultSet(closed)"),
        }
    }
}
