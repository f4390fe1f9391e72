//! ExistsIn 半连接：正确性、重复次数与去重策略

mod common;

use std::collections::BTreeSet;
use common::{id_set, ids, JoinFixture};
use record_index_engine::attribute::AttributeRegistry;
use record_index_engine::collection::IndexedCollection;
use record_index_engine::common::StoreError;
use record_index_engine::field_type::FieldType;
use record_index_engine::meta::{EntitySchema, FieldSchema};
use record_index_engine::query::{and, equal, exists_in, exists_in_where};
use record_index_engine::result_set::QueryOptions;
use test_log::test;

#[test]
fn returns_locals_with_a_foreign_partner() {
    let fx = JoinFixture::new();
    let id = fx.attr("l", "id");
    let eid = fx.attr("f", "eid");
    fx.local.attach_unique(&id).unwrap();
    fx.foreign.attach_hash(&eid).unwrap();
    fx.add_local(1..=5);
    for v in 3..=7 {
        fx.add_foreign(v, None);
    }

    let q = exists_in(&fx.foreign, &id, &eid);
    for opts in [QueryOptions::default(), QueryOptions::materialize()] {
        let mut got = ids(fx.local.retrieve(&q, &opts).unwrap());
        got.sort_unstable();
        assert_eq!(got, vec![3, 4, 5], "{opts:?}");
    }
}

#[test]
fn same_answer_with_or_without_indexes() {
    let mut answers = Vec::new();
    for (index_local, index_foreign) in [(false, false), (true, false), (false, true), (true, true)] {
        let fx = JoinFixture::new();
        let id = fx.attr("l", "id");
        let eid = fx.attr("f", "eid");
        if index_local {
            fx.local.attach_unique(&id).unwrap();
        }
        if index_foreign {
            fx.foreign.attach_hash(&eid).unwrap();
        }
        fx.add_local(1..=8);
        for v in [2, 4, 4, 6, 10] {
            fx.add_foreign(v, None);
        }
        let mut got = ids(fx.local.retrieve(&exists_in(&fx.foreign, &id, &eid), &QueryOptions::default()).unwrap());
        got.sort_unstable();
        answers.push(got);
    }
    assert!(answers.iter().all(|a| a == &vec![2, 4, 4, 6]), "{answers:?}");
}

#[test]
fn multiplicity_follows_dedup_strategy() {
    let fx = JoinFixture::new();
    let id = fx.attr("l", "id");
    let eid = fx.attr("f", "eid");
    fx.local.attach_unique(&id).unwrap();
    fx.add_local(1..=5);
    // 3 被三条外部记录引用，4 被一条引用
    for v in [3, 3, 3, 4] {
        fx.add_foreign(v, None);
    }
    let q = exists_in(&fx.foreign, &id, &eid);

    let mut rs = fx.local.retrieve(&q, &QueryOptions::default()).unwrap();
    assert_eq!(rs.size().unwrap(), 4);
    let raw = ids(rs);
    assert_eq!(raw.iter().filter(|&&i| i == 3).count(), 3);
    assert_eq!(raw.iter().filter(|&&i| i == 4).count(), 1);

    let mut rs = fx.local.retrieve(&q, &QueryOptions::materialize()).unwrap();
    assert_eq!(rs.size().unwrap(), 2);
    let mut once = ids(rs);
    once.sort_unstable();
    assert_eq!(once, vec![3, 4]);
}

#[test]
fn foreign_filter_and_conjunction() {
    let fx = JoinFixture::new();
    let id = fx.attr("l", "id");
    let eid = fx.attr("f", "eid");
    let tag = fx.attr("f", "tag");
    fx.foreign.attach_hash(&tag).unwrap();
    fx.add_local(1..=6);
    fx.add_foreign(1, Some("a"));
    fx.add_foreign(2, Some("b"));
    fx.add_foreign(3, Some("a"));
    fx.add_foreign(4, None);

    let q = exists_in_where(&fx.foreign, &id, &eid, equal(&tag, "a"));
    let rs = fx.local.retrieve(&q, &QueryOptions::default()).unwrap();
    assert_eq!(id_set(rs), BTreeSet::from([1, 3]));

    let q = and([equal(&id, 3i64), exists_in(&fx.foreign, &id, &eid)]);
    let rs = fx.local.retrieve(&q, &QueryOptions::default()).unwrap();
    assert_eq!(ids(rs), vec![3]);

    let q = and([equal(&id, 5i64), exists_in(&fx.foreign, &id, &eid)]);
    let rs = fx.local.retrieve(&q, &QueryOptions::default()).unwrap();
    assert!(ids(rs).is_empty());
}

#[test]
fn empty_foreign_side_yields_empty_result() {
    let fx = JoinFixture::new();
    let id = fx.attr("l", "id");
    let eid = fx.attr("f", "eid");
    fx.add_local(1..=5);
    let mut rs = fx.local.retrieve(&exists_in(&fx.foreign, &id, &eid), &QueryOptions::default()).unwrap();
    assert_eq!(rs.size().unwrap(), 0);
    assert!(!rs.has_next().unwrap());
}

#[test]
fn attributes_must_belong_to_their_side() {
    let fx = JoinFixture::new();
    let id = fx.attr("l", "id");
    let eid = fx.attr("f", "eid");
    // 两侧属性对调
    let q = exists_in(&fx.foreign, &eid, &id);
    let err = fx.local.retrieve(&q, &QueryOptions::default()).unwrap_err();
    assert!(matches!(err, StoreError::UnknownAttribute { .. }));
    assert_eq!(fx.local.open_result_sets(), 0);
}

#[test]
fn self_join_on_parent_links() {
    let mut reg = AttributeRegistry::new();
    let schema = reg.define_entity(EntitySchema::new(
        "node",
        FieldSchema::required("id", FieldType::Int64),
        vec![FieldSchema::optional("parent", FieldType::Int64)],
    )).unwrap();
    let id = reg.register_field("node", "id").unwrap();
    let parent = reg.register_field("node", "parent").unwrap();
    let nodes = IndexedCollection::new(schema.clone());
    nodes.attach_unique(&id).unwrap();
    nodes.attach_hash(&parent).unwrap();
    for (n, p) in [(1i64, None), (2, Some(1i64)), (3, Some(1)), (4, Some(2))] {
        nodes.add(schema.builder().set("id", n).set("parent", p).build().unwrap()).unwrap();
    }

    // 至少有一个子节点的节点；根节点的 Null parent 不参与连接
    let q = exists_in(&nodes, &id, &parent);
    let mut raw = ids(nodes.retrieve(&q, &QueryOptions::default()).unwrap());
    raw.sort_unstable();
    assert_eq!(raw, vec![1, 1, 2]);
    let rs = nodes.retrieve(&q, &QueryOptions::materialize()).unwrap();
    assert_eq!(id_set(rs), BTreeSet::from([1, 2]));
}
