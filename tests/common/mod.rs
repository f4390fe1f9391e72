//! 集成测试共用的实体定义与数据构造

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use record_index_engine::attribute::{Attribute, AttributeRegistry};
use record_index_engine::collection::IndexedCollection;
use record_index_engine::common::IdSequence;
use record_index_engine::field_type::{FieldType, Value};
use record_index_engine::meta::{EntitySchema, FieldSchema, Record};
use record_index_engine::result_set::ResultSet;

/// 本地实体 `l(id)` 与外部实体 `f(id, eid, tag?)`
pub struct JoinFixture {
    pub reg:     AttributeRegistry,
    pub local:   IndexedCollection,
    pub foreign: IndexedCollection,
    pub seq:     IdSequence,
}

impl JoinFixture {
    pub fn new() -> Self {
        let mut reg = AttributeRegistry::new();
        let l = reg.define_entity(EntitySchema::new(
            "l", FieldSchema::required("id", FieldType::Int64), vec![],
        )).unwrap();
        let f = reg.define_entity(EntitySchema::new(
            "f",
            FieldSchema::required("id", FieldType::Int64),
            vec![
                FieldSchema::required("eid", FieldType::Int64),
                FieldSchema::optional("tag", FieldType::Text),
            ],
        )).unwrap();
        reg.register_field("l", "id").unwrap();
        reg.register_field("f", "id").unwrap();
        reg.register_field("f", "eid").unwrap();
        reg.register_field("f", "tag").unwrap();
        Self {
            reg,
            local:   IndexedCollection::new(l),
            foreign: IndexedCollection::new(f),
            seq:     IdSequence::starting_at(100),
        }
    }

    pub fn attr(&self, entity: &str, name: &str) -> Attribute {
        self.reg.lookup(entity, name).unwrap()
    }

    pub fn add_local(&self, ids: impl IntoIterator<Item = i64>) {
        for id in ids {
            let r = self.local.schema().record(vec![id.into()]).unwrap();
            assert!(self.local.add(r).unwrap());
        }
    }

    pub fn add_foreign(&self, eid: i64, tag: Option<&str>) -> i64 {
        let id = self.seq.next();
        let r = self.foreign.schema().builder()
            .set("id", id)
            .set("eid", eid)
            .set("tag", tag)
            .build()
            .unwrap();
        assert!(self.foreign.add(r).unwrap());
        id
    }
}

/// 对象实体 `object(id, cnc_id, ctx_id, svalue?)`，带复合属性 `cnc_ctx`
pub struct ObjectFixture {
    pub reg:     AttributeRegistry,
    pub schema:  Arc<EntitySchema>,
    pub objects: IndexedCollection,
}

impl ObjectFixture {
    pub fn new() -> Self {
        let mut reg = AttributeRegistry::new();
        let schema = reg.define_entity(EntitySchema::new(
            "object",
            FieldSchema::required("id", FieldType::Int64),
            vec![
                FieldSchema::required("cnc_id", FieldType::Int64),
                FieldSchema::required("ctx_id", FieldType::Int64),
                FieldSchema::optional("svalue", FieldType::Text),
            ],
        )).unwrap();
        for field in ["id", "cnc_id", "ctx_id", "svalue"] {
            reg.register_field("object", field).unwrap();
        }
        reg.register_compound("object", "cnc_ctx", &["cnc_id", "ctx_id"]).unwrap();
        let objects = IndexedCollection::new(schema.clone());
        Self { reg, schema, objects }
    }

    pub fn attr(&self, name: &str) -> Attribute {
        self.reg.lookup("object", name).unwrap()
    }

    pub fn object(&self, id: i64, cnc_id: i64, ctx_id: i64) -> Record {
        self.schema.builder()
            .set("id", id)
            .set("cnc_id", cnc_id)
            .set("ctx_id", ctx_id)
            .build()
            .unwrap()
    }
}

/// 按输出顺序取出全部标识（保留重复）
pub fn ids(rs: ResultSet) -> Vec<i64> {
    rs.map(|r| r.id().as_i64().unwrap()).collect()
}

pub fn id_set(rs: ResultSet) -> BTreeSet<i64> {
    ids(rs).into_iter().collect()
}

pub fn int(v: i64) -> Value { Value::Int64(v) }
