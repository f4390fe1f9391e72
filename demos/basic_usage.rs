//! # record-index-engine 使用案例
//!
//! 以三类实体构造一个小型工作负载并演示全部查询形态：
//!
//! 1. 注册实体与属性（字段属性、标识属性、复合属性）
//! 2. 生成 context / object / oic（对象在上下文中的位置）三个集合
//! 3. 挂载 Unique / Hash 索引
//! 4. Equal / In / And 检索
//! 5. ExistsIn 半连接与去重策略
//! 6. 修改后重新检索、ResultSet 生命周期

use record_index_engine::{
    attribute::AttributeRegistry,
    collection::IndexedCollection,
    common::{CollectionOptions, IdSequence, StoreError},
    field_type::{FieldType, Value},
    meta::{EntitySchema, FieldSchema},
    query::{and, equal, exists_in, exists_in_where, r#in},
    result_set::QueryOptions,
};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

const CONTEXTS: i64 = 50;
const OBJECTS:  i64 = 20_000;
const CNC_IDS:  i64 = 100;
const LINKS:    usize = 30_000;

fn main() -> record_index_engine::common::Result<()> {
    println!("═══════════════════════════════════════════════════════════");
    println!("   record-index-engine 演示                                ");
    println!("═══════════════════════════════════════════════════════════\n");

    // =========================================================================
    // 1. 注册实体与属性
    // =========================================================================
    println!("【1】注册实体与属性 ...");
    let mut reg = AttributeRegistry::new();
    let context_schema = reg.define_entity(EntitySchema::new(
        "context",
        FieldSchema::required("id", FieldType::Int64),
        vec![FieldSchema::required("name", FieldType::Text)],
    ))?;
    let object_schema = reg.define_entity(EntitySchema::new(
        "object",
        FieldSchema::required("id", FieldType::Int64),
        vec![
            FieldSchema::required("cnc_id", FieldType::Int64),
            FieldSchema::optional("lvalue", FieldType::Int64),
            FieldSchema::optional("svalue", FieldType::Text),
        ],
    ))?;
    let oic_schema = reg.define_entity(EntitySchema::new(
        "oic",
        FieldSchema::required("id", FieldType::Int64),
        vec![
            FieldSchema::required("cnc_id", FieldType::Int64),
            FieldSchema::required("obj_id", FieldType::Int64),
            FieldSchema::required("ctx_id", FieldType::Int64),
        ],
    ))?;

    let ctx_id    = reg.register_field("context", "id")?;
    let ctx_name  = reg.register_field("context", "name")?;
    let obj_id    = reg.register_field("object", "id")?;
    let obj_cnc   = reg.register_field("object", "cnc_id")?;
    let obj_lval  = reg.register_field("object", "lvalue")?;
    let obj_sval  = reg.register_field("object", "svalue")?;
    let obj_eid   = reg.register_identity("object", "eid")?;
    let oic_cnc   = reg.register_field("oic", "cnc_id")?;
    let oic_obj   = reg.register_field("oic", "obj_id")?;
    let oic_ctx   = reg.register_field("oic", "ctx_id")?;
    let oic_key   = reg.register_compound("oic", "cnc_ctx", &["cnc_id", "ctx_id"])?;
    // 派生属性：svalue 的长度
    let obj_slen  = reg.register("object", "svalue_len", FieldType::Int64, |r| {
        r.get("svalue").and_then(Value::as_str).map(|s| s.len() as i64).into()
    })?;
    println!("    object 属性 = {:?}", {
        let mut names = reg.attribute_names("object");
        names.sort_unstable();
        names
    });
    match reg.register_field("object", "cnc_id") {
        Err(e @ StoreError::DuplicateAttribute { .. }) => println!("    重复注册被拒绝（预期）: {e}"),
        other => println!("    意外结果: {other:?}"),
    }
    println!();

    // =========================================================================
    // 2. 生成数据
    // =========================================================================
    println!("【2】生成工作负载 ...");
    let seq  = IdSequence::starting_at(1);
    let mut rng = StdRng::seed_from_u64(20161114);
    let opts = CollectionOptions::default().with_capacity(OBJECTS as usize).with_shard_amount(32);

    let contexts = IndexedCollection::new(context_schema.clone());
    let objects  = IndexedCollection::with_options(object_schema.clone(), opts);
    let links    = IndexedCollection::with_options(oic_schema.clone(), opts);

    let t = Instant::now();
    let mut context_ids = Vec::new();
    for i in 0..CONTEXTS {
        let id = seq.next();
        contexts.add(context_schema.builder().set("id", id).set("name", format!("ctx{i}")).build()?)?;
        context_ids.push(id);
    }
    let mut object_ids = Vec::new();
    for _ in 0..OBJECTS {
        let id = seq.next();
        let svalue = (rng.gen_range(0..4) != 0).then(|| format!("s{}", rng.gen_range(0..1_000)));
        objects.add(object_schema.builder()
            .set("id", id)
            .set("cnc_id", rng.gen_range(0..CNC_IDS))
            .set("lvalue", rng.gen_range(0..10_000i64))
            .set("svalue", svalue)
            .build()?)?;
        object_ids.push(id);
    }
    for _ in 0..LINKS {
        let obj = object_ids[rng.gen_range(0..object_ids.len())];
        let ctx = context_ids[rng.gen_range(0..context_ids.len())];
        links.add(oic_schema.builder()
            .set("id", seq.next())
            .set("cnc_id", rng.gen_range(0..CNC_IDS))
            .set("obj_id", obj)
            .set("ctx_id", ctx)
            .build()?)?;
    }
    println!("    contexts = {}  objects = {}  oic = {}  ({:?})",
        contexts.len(), objects.len(), links.len(), t.elapsed());
    println!("    当前序列 = {}\n", seq.current());

    // =========================================================================
    // 3. 挂载索引
    // =========================================================================
    println!("【3】挂载索引 ...");
    let t = Instant::now();
    contexts.attach_unique(&ctx_id)?;
    contexts.attach_unique(&ctx_name)?;
    objects.attach_unique(&obj_id)?;
    objects.attach_hash(&obj_cnc)?;
    links.attach_hash(&oic_obj)?;
    links.attach_hash(&oic_ctx)?;
    links.attach_hash(&oic_cnc)?;
    println!("    object 索引 = {:?}", objects.index_names());
    println!("    oic    索引 = {:?}", links.index_names());
    println!("    耗时 {:?}", t.elapsed());
    // 随机 (cnc_id, ctx_id) 可能重复，唯一索引挂载失败后集合保持原样
    match links.attach_unique(&oic_key) {
        Ok(())  => println!("    cnc_ctx 唯一索引挂载成功"),
        Err(e)  => {
            println!("    cnc_ctx 唯一索引挂载失败（预期）: {e}");
            links.attach_hash(&oic_key)?;
            println!("    改为哈希索引 → {:?}", links.index_names());
        }
    }
    println!();

    // =========================================================================
    // 4. Equal / In / And
    // =========================================================================
    println!("【4】Equal / In / And 检索 ...");
    let probe = object_ids[rng.gen_range(0..object_ids.len())];
    let t = Instant::now();
    let mut rs = objects.retrieve(&equal(&obj_id, probe), &QueryOptions::default())?;
    let hit = rs.first()?;
    println!("    id = {probe}          → {:?}  ({:?})", hit.map(|r| r.to_string()), t.elapsed());

    // 未建索引的标识属性走全表扫描
    let t = Instant::now();
    let mut rs = objects.retrieve(&equal(&obj_eid, probe), &QueryOptions::default())?;
    println!("    eid = {probe}         → size {}  (扫描, {:?})", rs.size()?, t.elapsed());

    let t = Instant::now();
    let mut rs = objects.retrieve(&r#in(&obj_cnc, [1i64, 2, 3, 3]), &QueryOptions::default())?;
    println!("    cnc_id IN [1,2,3]   → size {}  ({:?})", rs.size()?, t.elapsed());

    let t = Instant::now();
    let mut rs = objects.retrieve(&r#in(&obj_sval, ["s1", "s42"]), &QueryOptions::default())?;
    println!("    svalue IN [s1,s42]  → size {}  (扫描, {:?})", rs.size()?, t.elapsed());

    let q = and([equal(&obj_cnc, 7i64), equal(&obj_slen, 2i64)]);
    let t = Instant::now();
    let mut rs = objects.retrieve(&q, &QueryOptions::default())?;
    println!("    {q}  → size {}  ({:?})", rs.size()?, t.elapsed());

    let key = Value::Tuple(vec![Value::Int64(5), Value::Int64(context_ids[0])]);
    let mut rs = links.retrieve(&equal(&oic_key, key), &QueryOptions::default())?;
    println!("    cnc_ctx = (5, {})   → size {}", context_ids[0], rs.size()?);

    let mut rs = objects.retrieve(&and([equal(&obj_cnc, 7i64), equal(&obj_lval, -1i64)]), &QueryOptions::default())?;
    println!("    lvalue = -1 (不存在) → size {}\n", rs.size()?);

    // =========================================================================
    // 5. ExistsIn
    // =========================================================================
    println!("【5】ExistsIn 半连接 ...");
    let target = context_ids[0];
    let in_ctx = exists_in_where(&links, &obj_id, &oic_obj, equal(&oic_ctx, target));

    let t = Instant::now();
    let mut raw = objects.retrieve(&in_ctx, &QueryOptions::default())?;
    let raw_size = raw.size()?;
    let raw_elapsed = t.elapsed();
    let t = Instant::now();
    let mut unique = objects.retrieve(&in_ctx, &QueryOptions::materialize())?;
    let unique_size = unique.size()?;
    println!("    ctx {target} 中的对象：NONE = {raw_size} ({raw_elapsed:?})  MATERIALIZE = {unique_size} ({:?})",
        t.elapsed());
    if raw_size > unique_size {
        println!("    同一对象在该上下文中出现多次，NONE 按链接条数重复输出");
    }
    raw.close();
    unique.close();

    let linked = exists_in(&links, &obj_id, &oic_obj);
    let q = and([equal(&obj_cnc, 7i64), linked.clone()]);
    let t = Instant::now();
    let mut rs = objects.retrieve(&q, &QueryOptions::materialize())?;
    println!("    cnc_id = 7 且至少有一条链接 → {} 个对象  ({:?})", rs.size()?, t.elapsed());

    // 自连接：identity 属性 eid 与 id 指向同一值，每个对象都匹配自身
    let self_join = exists_in(&objects, &obj_id, &obj_eid);
    let mut rs = objects.retrieve(&and([equal(&obj_cnc, 7i64), self_join]), &QueryOptions::default())?;
    println!("    自连接（cnc_id = 7） → size {}\n", rs.size()?);

    // =========================================================================
    // 6. 修改与生命周期
    // =========================================================================
    println!("【6】修改后重新检索 ...");
    let before = objects.retrieve(&equal(&obj_cnc, 7i64), &QueryOptions::default())?;
    let mut removed = 0;
    for r in objects.retrieve(&equal(&obj_cnc, 7i64), &QueryOptions::default())? {
        if objects.remove(&r)? {
            removed += 1;
        }
    }
    let after_size = objects.retrieve(&equal(&obj_cnc, 7i64), &QueryOptions::default())?.size()?;
    println!("    删除 {removed} 条 cnc_id = 7 的对象；新检索 size = {after_size}");
    println!("    删除前打开的结果集仍看到快照：{} 条", before.count());

    let mut rs = objects.retrieve(&linked, &QueryOptions::default())?;
    println!("    打开的结果集 = {}", objects.open_result_sets());
    rs.close();
    rs.close();
    match rs.try_next() {
        Err(e) => println!("    关闭后访问（预期）: {e}"),
        Ok(r)  => println!("    意外返回 {r}"),
    }
    println!("    打开的结果集 = {}", objects.open_result_sets());

    println!("\n═══════════════════════════════════════════════════════════");
    println!("   全部演示完成 ✓");
    println!("═══════════════════════════════════════════════════════════");
    Ok(())
}
