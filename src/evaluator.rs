//! 查询编译与执行
//!
//! 查询被编译为 `Plan`：
//! - **source**：在 retrieve 返回前解析好的候选记录及其重复次数（发现顺序）
//! - **filters**：迭代时惰性应用的过滤条件，每个返回一个权重（0 表示淘汰）
//!
//! 规则：
//! - `Equal` / `In`：有索引则探测，否则全表扫描 + 值过滤
//! - `And`：按估计结果大小升序处理子节点；最小者产生候选，其余转为过滤条件。
//!   索引支撑的子节点得到标识集合，与候选逐个求交，任一交集为空立即返回空结果
//! - `ExistsIn`：先求外部集合（应用 filter），统计每个外部属性值出现的次数；
//!   本地属性有索引则逐值探测，否则扫描并查表。一条本地记录匹配 k 条外部记录时出现 k 次
//!
//! 外部优先是固定策略，不是保证；按代价反转方向留作后续优化。

use std::collections::HashSet;
use std::sync::Arc;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace};
use crate::attribute::Attribute;
use crate::collection::IndexedCollection;
use crate::common::Result;
use crate::field_type::Value;
use crate::index::Index;
use crate::meta::Record;
use crate::query::Query;

pub type RecordStream = Box<dyn Iterator<Item = Arc<Record>> + Send>;

// ── Filter ────────────────────────────────────────────────────────────────────

enum Filter {
    /// 无索引的 Equal / In：逐条比较属性值
    Values {
        attribute: Attribute,
        values:    HashSet<Value>,
    },
    /// ExistsIn：权重为该值在外部结果中出现的次数
    Join {
        attribute: Attribute,
        counts:    Arc<IndexMap<Value, usize>>,
    },
    /// 索引探测得到的标识集合；编译阶段直接与候选求交，不进入惰性过滤。
    /// 求交时复核属性值，探测之后被改写的记录不会混入
    Members {
        attribute: Attribute,
        values:    HashSet<Value>,
        ids:       HashSet<Value>,
    },
}

impl Filter {
    fn weight(&self, record: &Record) -> usize {
        match self {
            Self::Values { attribute, values } =>
                usize::from(values.contains(&attribute.value(record))),
            Self::Join { attribute, counts } =>
                counts.get(&attribute.value(record)).copied().unwrap_or(0),
            Self::Members { attribute, values, ids } => usize::from(
                ids.contains(record.id()) && values.contains(&attribute.value(record)),
            ),
        }
    }
}

fn weight_of(filters: &[Filter], record: &Record) -> usize {
    let mut w = 1;
    for f in filters {
        w *= f.weight(record);
        if w == 0 { break; }
    }
    w
}

// ── Plan ──────────────────────────────────────────────────────────────────────

pub struct Plan {
    source:  Vec<(Arc<Record>, usize)>,
    filters: Vec<Filter>,
}

impl Plan {
    fn empty() -> Self {
        Self { source: Vec::new(), filters: Vec::new() }
    }

    /// 没有惰性过滤时结果大小在编译时已知
    pub fn known_size(&self) -> Option<usize> {
        self.filters.is_empty().then(|| self.source.iter().map(|(_, w)| w).sum())
    }

    pub fn is_empty(&self) -> bool { self.source.is_empty() }

    /// 按发现顺序输出，每条记录重复 `权重` 次
    pub fn into_stream(self) -> RecordStream {
        let Plan { source, filters } = self;
        Box::new(source.into_iter().flat_map(move |(record, w)| {
            let n = if w == 0 { 0 } else { w * weight_of(&filters, &record) };
            std::iter::repeat(record).take(n)
        }))
    }

    fn intersect(&mut self, members: &Filter) {
        self.source.retain(|(r, _)| members.weight(r) > 0);
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

pub struct Evaluator<'a> {
    collection: &'a IndexedCollection,
    /// retrieve 开始时的索引列表快照
    indexes:    Vec<Arc<Index>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(collection: &'a IndexedCollection) -> Self {
        Self { collection, indexes: collection.indexes() }
    }

    /// 校验查询中的属性后编译
    pub fn compile(&self, query: &Query) -> Result<Plan> {
        validate(query, self.collection.entity())?;
        let plan = self.plan(query);
        debug!(
            entity     = self.collection.entity(),
            query      = %query,
            candidates = plan.source.len(),
            filters    = plan.filters.len(),
            "compiled plan",
        );
        Ok(plan)
    }

    /// 唯一索引优先
    fn index_for(&self, attribute: &Attribute) -> Option<&Arc<Index>> {
        self.indexes.iter()
            .filter(|ix| ix.attribute() == attribute)
            .max_by_key(|ix| ix.is_unique())
    }

    /// 通过记录表解析索引给出的标识，并复核属性值：
    /// 探测与解析之间同一标识可能被删除后以不同的值重新插入
    fn resolve(&self, attribute: &Attribute, value: &Value, id: &Value) -> Option<Arc<Record>> {
        self.collection.get(id).filter(|r| attribute.value(r) == *value)
    }

    fn scan(&self) -> Plan {
        let source = self.collection.snapshot().into_iter().map(|r| (r, 1)).collect();
        Plan { source, filters: Vec::new() }
    }

    /// 估计结果大小：有索引时精确，否则取集合大小
    fn estimate(&self, query: &Query) -> usize {
        let total = self.collection.len();
        match query {
            Query::Equal { value, .. } if value.is_absent() => 0,
            Query::Equal { attribute, value } => self.index_for(attribute)
                .map_or(total, |ix| ix.estimated_size(value)),
            Query::In { values, .. } if values.iter().all(Value::is_absent) => 0,
            Query::In { attribute, values } => match self.index_for(attribute) {
                Some(ix) => present(values).iter()
                    .map(|v| ix.estimated_size(v))
                    .sum::<usize>()
                    .min(total),
                None => total,
            },
            Query::And(children) => children.iter()
                .map(|c| self.estimate(c))
                .min()
                .unwrap_or(total),
            Query::ExistsIn { .. } => total,
        }
    }

    fn plan(&self, query: &Query) -> Plan {
        match query {
            Query::Equal { attribute, value } =>
                self.plan_values(attribute, present(std::slice::from_ref(value))),
            Query::In { attribute, values } =>
                self.plan_values(attribute, present(values)),
            Query::And(children) => self.plan_and(children),
            Query::ExistsIn { foreign, local_attribute, foreign_attribute, filter } => {
                let counts = join_counts(foreign, foreign_attribute, filter.as_deref());
                self.plan_join(local_attribute, counts)
            }
        }
    }

    /// `values` 已去重，因此按索引探测的并集天然按标识唯一
    fn plan_values(&self, attribute: &Attribute, values: Vec<Value>) -> Plan {
        if values.is_empty() {
            return Plan::empty();
        }
        match self.index_for(attribute) {
            Some(ix) => {
                let source = values.iter()
                    .flat_map(|v| ix.probe(v).into_iter().map(move |id| (v, id)))
                    .filter_map(|(v, id)| self.resolve(attribute, v, &id))
                    .map(|r| (r, 1))
                    .collect();
                Plan { source, filters: Vec::new() }
            }
            None => {
                let mut plan = self.scan();
                plan.filters.push(Filter::Values {
                    attribute: attribute.clone(),
                    values:    values.into_iter().collect(),
                });
                plan
            }
        }
    }

    fn plan_join(&self, local: &Attribute, counts: IndexMap<Value, usize>) -> Plan {
        if counts.is_empty() {
            return Plan::empty();
        }
        match self.index_for(local) {
            Some(ix) => {
                let mut source = Vec::new();
                for (value, &n) in &counts {
                    for id in ix.probe(value) {
                        if let Some(r) = self.resolve(local, value, &id) {
                            source.push((r, n));
                        }
                    }
                }
                trace!(local = %local, keys = counts.len(), matches = source.len(), "join via local index");
                Plan { source, filters: Vec::new() }
            }
            None => {
                let mut plan = self.scan();
                plan.filters.push(Filter::Join { attribute: local.clone(), counts: Arc::new(counts) });
                plan
            }
        }
    }

    fn plan_and(&self, children: &[Query]) -> Plan {
        if children.is_empty() {
            return self.scan();
        }
        // 稳定排序：估计值相同时保持调用方给出的顺序
        let mut ordered: Vec<(usize, &Query)> = children.iter()
            .map(|c| (self.estimate(c), c))
            .collect();
        ordered.sort_by_key(|(est, _)| *est);

        let (first_est, first) = ordered[0];
        if first_est == 0 {
            trace!(child = %first, "conjunction short-circuited by empty child");
            return Plan::empty();
        }
        let mut plan = self.plan(first);
        for (_, child) in &ordered[1..] {
            if plan.is_empty() {
                break;
            }
            for filter in self.filters(child) {
                match filter {
                    members @ Filter::Members { .. } => plan.intersect(&members),
                    Filter::Join { ref counts, .. } if counts.is_empty() => return Plan::empty(),
                    other => plan.filters.push(other),
                }
                if plan.is_empty() {
                    trace!(child = %child, "conjunction short-circuited by empty intersection");
                    return Plan::empty();
                }
            }
        }
        plan
    }

    /// 把非驱动子节点转成过滤条件；嵌套 And 直接展开
    fn filters(&self, query: &Query) -> Vec<Filter> {
        match query {
            Query::Equal { attribute, value } =>
                vec![self.value_filter(attribute, present(std::slice::from_ref(value)))],
            Query::In { attribute, values } =>
                vec![self.value_filter(attribute, present(values))],
            Query::And(children) =>
                children.iter().flat_map(|c| self.filters(c)).collect(),
            Query::ExistsIn { foreign, local_attribute, foreign_attribute, filter } => {
                let counts = join_counts(foreign, foreign_attribute, filter.as_deref());
                vec![Filter::Join { attribute: local_attribute.clone(), counts: Arc::new(counts) }]
            }
        }
    }

    fn value_filter(&self, attribute: &Attribute, values: Vec<Value>) -> Filter {
        match self.index_for(attribute) {
            Some(ix) => Filter::Members {
                attribute: attribute.clone(),
                ids:       values.iter().flat_map(|v| ix.probe(v)).collect(),
                values:    values.into_iter().collect(),
            },
            None => Filter::Values {
                attribute: attribute.clone(),
                values:    values.into_iter().collect(),
            },
        }
    }
}

// ── 辅助 ──────────────────────────────────────────────────────────────────────

/// 去重并丢弃缺失值：缺失值不与任何记录相等
fn present(values: &[Value]) -> Vec<Value> {
    values.iter()
        .filter(|v| !v.is_absent())
        .collect::<IndexSet<&Value>>()
        .into_iter()
        .cloned()
        .collect()
}

/// 求外部结果中每个外部属性值的出现次数（保持发现顺序）；缺失值不参与连接
fn join_counts(
    foreign:   &IndexedCollection,
    attribute: &Attribute,
    filter:    Option<&Query>,
) -> IndexMap<Value, usize> {
    let ev = Evaluator::new(foreign);
    let plan = match filter {
        Some(q) => ev.plan(q),
        None    => ev.scan(),
    };
    let mut counts = IndexMap::new();
    for record in plan.into_stream() {
        let key = attribute.value(&record);
        if !key.is_absent() {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    trace!(foreign = foreign.entity(), keys = counts.len(), "foreign side evaluated");
    counts
}

/// 查询中的每个属性必须属于其所作用的集合
fn validate(query: &Query, entity: &str) -> Result<()> {
    match query {
        Query::Equal { attribute, .. } | Query::In { attribute, .. } =>
            attribute.check_entity(entity),
        Query::And(children) =>
            children.iter().try_for_each(|c| validate(c, entity)),
        Query::ExistsIn { foreign, local_attribute, foreign_attribute, filter } => {
            local_attribute.check_entity(entity)?;
            foreign_attribute.check_entity(foreign.entity())?;
            match filter {
                Some(q) => validate(q, foreign.entity()),
                None    => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeRegistry;
    use crate::common::StoreError;
    use crate::field_type::FieldType;
    use crate::meta::{EntitySchema, FieldSchema};
    use crate::query::{and, equal, exists_in, exists_in_where, r#in};
    use test_log::test;

    struct Fixture {
        local:   IndexedCollection,
        foreign: IndexedCollection,
        id:      Attribute,
        cat:     Attribute,
        f_eid:   Attribute,
        f_tag:   Attribute,
    }

    /// local: id 1..=6, cat = id % 3；foreign: eid ∈ {2, 3, 3, 5, 9}
    fn fixture(index_local: bool, index_foreign: bool) -> Fixture {
        let mut reg = AttributeRegistry::new();
        let l = reg.define_entity(EntitySchema::new(
            "l",
            FieldSchema::required("id", FieldType::Int64),
            vec![FieldSchema::required("cat", FieldType::Int64)],
        )).unwrap();
        let f = reg.define_entity(EntitySchema::new(
            "f",
            FieldSchema::required("id", FieldType::Int64),
            vec![
                FieldSchema::required("eid", FieldType::Int64),
                FieldSchema::required("tag", FieldType::Text),
            ],
        )).unwrap();
        let fx = Fixture {
            local:   IndexedCollection::new(l.clone()),
            foreign: IndexedCollection::new(f.clone()),
            id:      reg.register_field("l", "id").unwrap(),
            cat:     reg.register_field("l", "cat").unwrap(),
            f_eid:   reg.register_field("f", "eid").unwrap(),
            f_tag:   reg.register_field("f", "tag").unwrap(),
        };
        if index_local {
            fx.local.attach_unique(&fx.id).unwrap();
            fx.local.attach_hash(&fx.cat).unwrap();
        }
        if index_foreign {
            fx.foreign.attach_hash(&fx.f_eid).unwrap();
        }
        for id in 1..=6i64 {
            fx.local.add(l.record(vec![id.into(), (id % 3).into()]).unwrap()).unwrap();
        }
        for (id, eid, tag) in [(10i64, 2i64, "a"), (11, 3, "a"), (12, 3, "b"), (13, 5, "b"), (14, 9, "a")] {
            fx.foreign.add(f.record(vec![id.into(), eid.into(), tag.into()]).unwrap()).unwrap();
        }
        fx
    }

    fn ids(plan: Plan) -> Vec<i64> {
        let mut v: Vec<i64> = plan.into_stream().map(|r| r.id().as_i64().unwrap()).collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn equal_probe_and_scan_agree() {
        for indexed in [true, false] {
            let fx = fixture(indexed, indexed);
            let ev = Evaluator::new(&fx.local);
            let plan = ev.compile(&equal(&fx.cat, 1i64)).unwrap();
            assert_eq!(plan.known_size().is_some(), indexed);
            assert_eq!(ids(plan), vec![1, 4]);
            assert!(ids(ev.compile(&equal(&fx.id, 42i64)).unwrap()).is_empty());
        }
    }

    #[test]
    fn in_is_identity_unique() {
        for indexed in [true, false] {
            let fx = fixture(indexed, false);
            let ev = Evaluator::new(&fx.local);
            let q = r#in(&fx.id, [2i64, 5, 2, 5, 7]);
            assert_eq!(ids(ev.compile(&q).unwrap()), vec![2, 5]);
        }
    }

    #[test]
    fn absent_values_match_nothing() {
        for indexed in [true, false] {
            let fx = fixture(indexed, false);
            let ev = Evaluator::new(&fx.local);
            assert_eq!(ev.estimate(&equal(&fx.cat, Value::Null)), 0);
            assert!(ev.compile(&equal(&fx.cat, Value::Null)).unwrap().is_empty());

            let q = r#in(&fx.id, [Value::Null, 2i64.into(), Value::Null]);
            assert_eq!(ids(ev.compile(&q).unwrap()), vec![2]);

            let q = and([equal(&fx.cat, 1i64), equal(&fx.id, Value::Null)]);
            assert!(ids(ev.compile(&q).unwrap()).is_empty());
        }
    }

    #[test]
    fn and_orders_by_selectivity_and_short_circuits() {
        let fx = fixture(true, false);
        let ev = Evaluator::new(&fx.local);
        assert_eq!(ev.estimate(&equal(&fx.id, 3i64)), 1);
        assert_eq!(ev.estimate(&equal(&fx.cat, 0i64)), 2);
        assert_eq!(ev.estimate(&r#in(&fx.cat, [0i64, 1])), 4);
        assert_eq!(ev.estimate(&and([equal(&fx.cat, 0i64), equal(&fx.id, 3i64)])), 1);

        let q = and([equal(&fx.cat, 0i64), equal(&fx.id, 3i64)]);
        let plan = ev.compile(&q).unwrap();
        assert_eq!(plan.known_size(), Some(1));
        assert_eq!(ids(plan), vec![3]);

        // 不存在的键估计为 0，整个合取为空
        let q = and([equal(&fx.cat, 0i64), equal(&fx.id, 99i64)]);
        assert!(ev.compile(&q).unwrap().is_empty());

        // 两个非空探测的交集为空
        let q = and([equal(&fx.cat, 0i64), equal(&fx.id, 4i64)]);
        let plan = ev.compile(&q).unwrap();
        assert_eq!(plan.known_size(), Some(0));

        // 空合取匹配全部
        assert_eq!(ids(ev.compile(&and([])).unwrap()), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn and_mixes_indexed_and_scanned_children() {
        let fx = fixture(false, false);
        fx.local.attach_hash(&fx.cat).unwrap();
        let ev = Evaluator::new(&fx.local);
        let q = and([r#in(&fx.id, [1i64, 2, 3, 4]), and([equal(&fx.cat, 1i64)])]);
        assert_eq!(ids(ev.compile(&q).unwrap()), vec![1, 4]);
    }

    #[test]
    fn join_multiplicity_is_independent_of_indexes() {
        for (il, ifo) in [(true, true), (true, false), (false, true), (false, false)] {
            let fx = fixture(il, ifo);
            let ev = Evaluator::new(&fx.local);
            let q = exists_in(&fx.foreign, &fx.id, &fx.f_eid);
            // eid 3 出现两次
            assert_eq!(ids(ev.compile(&q).unwrap()), vec![2, 3, 3, 5], "local={il} foreign={ifo}");

            let q = exists_in_where(&fx.foreign, &fx.id, &fx.f_eid, equal(&fx.f_tag, "a"));
            assert_eq!(ids(ev.compile(&q).unwrap()), vec![2, 3]);

            // ExistsIn 作为合取中的过滤条件时保留权重
            let q = and([equal(&fx.cat, 0i64), exists_in(&fx.foreign, &fx.id, &fx.f_eid)]);
            assert_eq!(ids(ev.compile(&q).unwrap()), vec![3, 3]);
        }
    }

    #[test]
    fn join_with_empty_foreign_side_is_empty() {
        let fx = fixture(true, true);
        let ev = Evaluator::new(&fx.local);
        let q = exists_in_where(&fx.foreign, &fx.id, &fx.f_eid, equal(&fx.f_tag, "zzz"));
        assert!(ev.compile(&q).unwrap().is_empty());
        let q = and([equal(&fx.cat, 2i64), q]);
        assert!(ev.compile(&q).unwrap().is_empty());
    }

    #[test]
    fn attributes_must_belong_to_their_collection() {
        let fx = fixture(true, true);
        let ev = Evaluator::new(&fx.local);
        let err = ev.compile(&equal(&fx.f_eid, 1i64)).err().unwrap();
        assert!(matches!(err, StoreError::UnknownAttribute { ref entity, .. } if entity == "l"));

        // 外部 filter 针对外部集合校验
        let q = exists_in_where(&fx.foreign, &fx.id, &fx.f_eid, equal(&fx.cat, 1i64));
        assert!(ev.compile(&q).is_err());
        let q = exists_in(&fx.foreign, &fx.f_eid, &fx.f_eid);
        assert!(ev.compile(&q).is_err());
    }

    #[test]
    fn probe_results_are_rechecked_against_the_record() {
        let fx = fixture(true, false);
        let ev = Evaluator::new(&fx.local);
        let ix = ev.index_for(&fx.cat).unwrap().clone();
        // 模拟陈旧的索引条目：记录 1 的 cat 实际为 1
        if let Index::Hash(h) = ix.as_ref() {
            let stale = fx.local.schema().record(vec![1i64.into(), 2i64.into()]).unwrap();
            h.insert(&stale);
        }
        assert_eq!(ids(ev.compile(&equal(&fx.cat, 2i64)).unwrap()), vec![2, 5]);
        // 合取中作为求交集合使用时同样复核
        let q = and([equal(&fx.id, 1i64), equal(&fx.cat, 2i64)]);
        assert!(ids(ev.compile(&q).unwrap()).is_empty());
    }
}
