//! 全局基础类型、配置与错误定义

use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

// ── 配置 ──────────────────────────────────────────────────────────────────────

/// DashMap 默认分片数（必须是 2 的幂）
pub const DEFAULT_SHARD_AMOUNT: usize = 64;

/// 集合（记录表 + 每个索引）的容量与分片配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionOptions {
    pub capacity:     usize,
    pub shard_amount: usize,
}

impl CollectionOptions {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity; self
    }
    /// 非 2 的幂时向上取整，至少 2 个分片
    pub fn with_shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = shard_amount.max(2).next_power_of_two(); self
    }
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self { capacity: 0, shard_amount: DEFAULT_SHARD_AMOUNT }
    }
}

// ── 标识生成器 ────────────────────────────────────────────────────────────────

/// 单调递增的标识生成器，显式注入给需要新标识的组件
#[derive(Debug, Default)]
pub struct IdSequence {
    counter: AtomicI64,
}

impl IdSequence {
    pub fn new() -> Self { Self::default() }

    /// 从 `start` 开始计数：第一次 `next()` 返回 `start + 1`
    pub fn starting_at(start: i64) -> Self {
        Self { counter: AtomicI64::new(start) }
    }

    pub fn next(&self) -> i64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current(&self) -> i64 {
        self.counter.load(Ordering::Relaxed)
    }
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("entity already defined: {0}")]
    DuplicateEntity(String),
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("attribute already registered: {entity}.{name}")]
    DuplicateAttribute { entity: String, name: String },
    #[error("unknown attribute: {entity}.{name}")]
    UnknownAttribute { entity: String, name: String },
    #[error("entity mismatch: expected {expected}, found {found}")]
    EntityMismatch { expected: String, found: String },
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("index already attached: {entity}.{name}")]
    IndexExists { entity: String, name: String },
    #[error("uniqueness violation on {attribute}: key {key} already maps to {existing}")]
    UniquenessViolation { attribute: String, key: String, existing: String },
    #[error("no such element: result set exhausted")]
    NoSuchElement,
    #[error("result set closed")]
    ResultSetClosed,
}

impl StoreError {
    /// 调用方违反使用约定（注册表误用、关闭后继续使用），区别于可恢复的边界情况
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, Self::UniquenessViolation { .. } | Self::NoSuchElement)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
