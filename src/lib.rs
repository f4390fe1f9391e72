//! # record-index-engine
//!
//! 嵌入式内存记录存储：属性索引 + 可组合的查询求值器，支持并发写入。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   AttributeRegistry                      │
//! │   EntitySchema × N    (entity, name) → Attribute         │
//! │                       Field / Derived / Compound         │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │ Attribute（值提取函数）
//! ┌───────────────────────────┴──────────────────────────────┐
//! │                  IndexedCollection                       │
//! │   records : DashMap<id, Arc<Record>>   (分片)            │
//! │   indexes : RwLock<Vec<Index>>                           │
//! │     ├─ UniqueIndex  value → id        (冲突拒绝)         │
//! │     └─ HashIndex    value → {id}      (允许重复)         │
//! │                                                          │
//! │   retrieve(Query, QueryOptions)                          │
//! │     │                                                    │
//! │   Evaluator ── Equal / And / In / ExistsIn               │
//! │     │           索引探测 vs 全表扫描、选择性排序、半连接  │
//! │   Plan { source, filters }                               │
//! │     │                                                    │
//! │   ResultSet  ── 惰性、只进、可关闭；NONE / MATERIALIZE    │
//! └──────────────────────────────────────────────────────────┘
//! ```

// ── 数据模型 ─────────────────────────────────────────────────────────────────
pub mod common;
pub mod field_type;
pub mod meta;
pub mod attribute;

// ── 索引与集合 ───────────────────────────────────────────────────────────────
pub mod index;
pub mod collection;

// ── 查询 ─────────────────────────────────────────────────────────────────────
pub mod query;
mod evaluator;
pub mod result_set;
