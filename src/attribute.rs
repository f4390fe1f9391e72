//! 属性描述符与注册表
//!
//! 属性是 `(entity, name) → 提取函数` 的数据值，不是类型层次：
//! - **Field**：读取 schema 中的一个命名字段
//! - **Derived**：调用方提供的提取函数（必须确定且无副作用）
//! - **Compound**：有序的简单属性列表，提取结果是 `Value::Tuple`
//!
//! 注册表在初始化阶段通过 `&mut self` 写入，之后以只读方式共享。

use std::collections::HashMap;
use std::sync::Arc;
use crate::common::{Result, StoreError};
use crate::field_type::{FieldType, Value};
use crate::meta::{EntitySchema, Record};

pub type Extractor = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

// ── Attribute ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum AttributeKind {
    Field(usize),
    Derived(Extractor),
    Compound(Vec<Attribute>),
}

struct AttributeInner {
    entity:     String,
    name:       String,
    value_type: FieldType,
    kind:       AttributeKind,
}

/// 属性句柄（克隆开销是一次引用计数）
#[derive(Clone)]
pub struct Attribute(Arc<AttributeInner>);

impl Attribute {
    pub fn entity(&self) -> &str { &self.0.entity }
    pub fn name(&self) -> &str { &self.0.name }
    pub fn value_type(&self) -> &FieldType { &self.0.value_type }

    pub fn is_compound(&self) -> bool {
        matches!(self.0.kind, AttributeKind::Compound(_))
    }

    /// 从记录提取属性值；插入和删除时必须得到相同的结果
    pub fn value(&self, record: &Record) -> Value {
        match &self.0.kind {
            AttributeKind::Field(pos) => record.value_at(*pos).cloned().unwrap_or(Value::Null),
            AttributeKind::Derived(f) => (**f)(record),
            AttributeKind::Compound(parts) =>
                Value::Tuple(parts.iter().map(|a| a.value(record)).collect()),
        }
    }

    /// 属性是否属于 `entity`，否则报告 UnknownAttribute
    pub(crate) fn check_entity(&self, entity: &str) -> Result<()> {
        if self.0.entity == entity {
            Ok(())
        } else {
            Err(StoreError::UnknownAttribute { entity: entity.into(), name: self.0.name.clone() })
        }
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.entity == other.0.entity && self.0.name == other.0.name)
    }
}
impl Eq for Attribute {}

impl std::fmt::Debug for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attribute({}.{}: {})", self.0.entity, self.0.name, self.0.value_type)
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.0.entity, self.0.name)
    }
}

// ── AttributeRegistry ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct AttributeRegistry {
    schemas:    HashMap<String, Arc<EntitySchema>>,
    attributes: HashMap<(String, String), Attribute>,
}

impl AttributeRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn define_entity(&mut self, schema: EntitySchema) -> Result<Arc<EntitySchema>> {
        if self.schemas.contains_key(schema.entity()) {
            return Err(StoreError::DuplicateEntity(schema.entity().into()));
        }
        let schema = Arc::new(schema);
        self.schemas.insert(schema.entity().into(), Arc::clone(&schema));
        Ok(schema)
    }

    pub fn schema(&self, entity: &str) -> Result<Arc<EntitySchema>> {
        self.schemas.get(entity)
            .cloned()
            .ok_or_else(|| StoreError::UnknownEntity(entity.into()))
    }

    /// 以自定义提取函数注册属性
    pub fn register<F>(
        &mut self,
        entity:     &str,
        name:       &str,
        value_type: FieldType,
        extractor:  F,
    ) -> Result<Attribute>
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.insert(entity, name, value_type, AttributeKind::Derived(Arc::new(extractor)))
    }

    /// 注册读取 schema 字段 `field` 的简单属性，属性名与字段名相同
    pub fn register_field(&mut self, entity: &str, field: &str) -> Result<Attribute> {
        let schema = self.schema(entity)?;
        let pos = schema.position(field).ok_or_else(|| StoreError::SchemaMismatch(
            format!("{entity}.{field}: no such field"),
        ))?;
        let value_type = schema.fields()[pos].field_type.clone();
        self.insert(entity, field, value_type, AttributeKind::Field(pos))
    }

    /// 注册标识字段上的属性（名字可以与字段名不同，如 `eid`）
    pub fn register_identity(&mut self, entity: &str, name: &str) -> Result<Attribute> {
        let schema = self.schema(entity)?;
        let value_type = schema.id_field().field_type.clone();
        self.insert(entity, name, value_type, AttributeKind::Field(0))
    }

    /// 由已注册的简单属性按顺序组成复合属性
    pub fn register_compound(
        &mut self,
        entity: &str,
        name:   &str,
        parts:  &[&str],
    ) -> Result<Attribute> {
        if parts.is_empty() {
            return Err(StoreError::SchemaMismatch(format!("{entity}.{name}: compound needs at least one part")));
        }
        let parts = parts.iter()
            .map(|p| self.lookup(entity, p))
            .collect::<Result<Vec<_>>>()?;
        let value_type = FieldType::Tuple(parts.iter().map(|a| a.value_type().clone()).collect());
        self.insert(entity, name, value_type, AttributeKind::Compound(parts))
    }

    pub fn lookup(&self, entity: &str, name: &str) -> Result<Attribute> {
        self.attributes.get(&(entity.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::UnknownAttribute { entity: entity.into(), name: name.into() })
    }

    /// `entity` 的全部属性名（无序）
    pub fn attribute_names(&self, entity: &str) -> Vec<&str> {
        self.attributes.keys()
            .filter(|(e, _)| e == entity)
            .map(|(_, n)| n.as_str())
            .collect()
    }

    fn insert(
        &mut self,
        entity:     &str,
        name:       &str,
        value_type: FieldType,
        kind:       AttributeKind,
    ) -> Result<Attribute> {
        if !self.schemas.contains_key(entity) {
            return Err(StoreError::UnknownEntity(entity.into()));
        }
        let key = (entity.to_string(), name.to_string());
        if self.attributes.contains_key(&key) {
            return Err(StoreError::DuplicateAttribute { entity: key.0, name: key.1 });
        }
        let attr = Attribute(Arc::new(AttributeInner {
            entity: entity.into(), name: name.into(), value_type, kind,
        }));
        tracing::trace!(attribute = %attr, "registered attribute");
        self.attributes.insert(key, attr.clone());
        Ok(attr)
    }
}
