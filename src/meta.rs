//! 实体 Schema 与记录

use std::sync::Arc;
use crate::common::{Result, StoreError};
use crate::field_type::{FieldType, Value};

// ── 字段定义 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name:        String,
    pub field_type:  FieldType,
    pub is_nullable: bool,
}

impl FieldSchema {
    /// 构建非空字段
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, is_nullable: false }
    }
    /// 构建可空字段
    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, is_nullable: true }
    }
}

// ── Entity Schema ─────────────────────────────────────────────────────────────

/// 一种实体的记录形状；第 0 个字段是标识字段（不可为空）
///
/// 字段只能通过 [`EntitySchema::new`] 设置，因此标识字段总是存在
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    entity: String,
    fields: Vec<FieldSchema>,
}

impl EntitySchema {
    /// 标识字段强制为非空
    pub fn new(entity: &str, id: FieldSchema, others: Vec<FieldSchema>) -> Self {
        let mut fields = Vec::with_capacity(others.len() + 1);
        fields.push(FieldSchema { is_nullable: false, ..id });
        fields.extend(others);
        Self { entity: entity.into(), fields }
    }

    pub fn entity(&self) -> &str { &self.entity }

    pub fn fields(&self) -> &[FieldSchema] { &self.fields }

    pub fn position(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == field)
    }

    pub fn field(&self, field: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == field)
    }

    pub fn id_field(&self) -> &FieldSchema { &self.fields[0] }

    pub fn num_fields(&self) -> usize { self.fields.len() }

    /// 按位置构造记录，校验元数与类型
    pub fn record(self: &Arc<Self>, values: Vec<Value>) -> Result<Record> {
        if values.len() != self.fields.len() {
            return Err(StoreError::SchemaMismatch(format!(
                "{} expects {} fields, got {}",
                self.entity, self.fields.len(), values.len(),
            )));
        }
        for (f, v) in self.fields.iter().zip(&values) {
            let ok = if v.is_null() { f.is_nullable } else { f.field_type.accepts(v) };
            if !ok {
                return Err(StoreError::SchemaMismatch(format!(
                    "{}.{}: {} does not fit {}{}",
                    self.entity, f.name, v, f.field_type,
                    if f.is_nullable { "" } else { " NOT NULL" },
                )));
            }
        }
        Ok(Record { schema: Arc::clone(self), values })
    }

    /// 按字段名逐个赋值的构造器；未赋值字段为 `Null`
    pub fn builder(self: &Arc<Self>) -> RecordBuilder {
        RecordBuilder {
            schema: Arc::clone(self),
            values: vec![Value::Null; self.fields.len()],
            error:  None,
        }
    }
}

// ── Record ────────────────────────────────────────────────────────────────────

/// 不可变记录；标识是第 0 个字段的值
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<EntitySchema>,
    values: Vec<Value>,
}

impl Record {
    pub fn id(&self) -> &Value { &self.values[0] }

    pub fn entity(&self) -> &str { &self.schema.entity }

    pub fn schema(&self) -> &Arc<EntitySchema> { &self.schema }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.schema.position(field).map(|i| &self.values[i])
    }

    pub fn value_at(&self, pos: usize) -> Option<&Value> { self.values.get(pos) }

    pub fn values(&self) -> &[Value] { &self.values }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.entity == other.schema.entity && self.values == other.values
    }
}
impl Eq for Record {}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{", self.schema.entity)?;
        for (i, (fs, v)) in self.schema.fields.iter().zip(&self.values).enumerate() {
            if i > 0 { write!(f, ", ")?; }
            write!(f, "{}: {}", fs.name, v)?;
        }
        write!(f, "}}")
    }
}

// ── RecordBuilder ─────────────────────────────────────────────────────────────

pub struct RecordBuilder {
    schema: Arc<EntitySchema>,
    values: Vec<Value>,
    /// 第一个未知字段名，延迟到 build() 报告
    error:  Option<String>,
}

impl RecordBuilder {
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        match self.schema.position(field) {
            Some(i) => self.values[i] = value.into(),
            None => {
                self.error.get_or_insert_with(|| format!("{}.{}: no such field", self.schema.entity, field));
            }
        }
        self
    }

    pub fn build(self) -> Result<Record> {
        if let Some(msg) = self.error {
            return Err(StoreError::SchemaMismatch(msg));
        }
        self.schema.record(self.values)
    }
}
