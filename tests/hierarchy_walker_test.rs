// ==========================================
// HierarchyWalker 集成测试
// ==========================================
// 测试目标: 上下文自上而下传递、单向性、空上级级联、结果回写
// ==========================================

mod test_helpers;

use archaeo_etl::domain::{
    Annotation, AnnotationKind, DataType, Field, ItemType, GLOBAL_PROJECT_UUID,
};
use archaeo_etl::logging;
use archaeo_etl::reconcile::{EntityResolver, HierarchyWalker};
use archaeo_etl::repository::{EntityStore, StagingRepository};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{annotate, create_test_env, load_table, seed_source, TestEnv};
use uuid::Uuid;

async fn walker_for(env: &TestEnv, source_id: &str) -> HierarchyWalker {
    let source = env.staging.get_source(source_id).await.unwrap().unwrap();
    let fields = env.staging.list_fields(source_id).await.unwrap();
    let annotations = env.staging.list_annotations(source_id).await.unwrap();
    let resolver = Arc::new(EntityResolver::new(env.entities.clone(), &source));
    HierarchyWalker::new(resolver, env.staging.clone(), fields, annotations, 2)
}

async fn seed_regions(env: &TestEnv, source_id: &str, project: Uuid) {
    seed_source(
        env,
        source_id,
        project,
        vec![
            Field::new(source_id, 1, "Region", ItemType::Subjects, DataType::Id),
            Field::new(source_id, 2, "Site", ItemType::Subjects, DataType::Id),
        ],
        &[
            &["Mordor", "Barad-dûr"],
            &["Mordor", "Mount Doom"],
            &["Gondor", "Minas Tirith"],
            &["", "Osgiliath"],
        ],
    )
    .await;
    annotate(
        env,
        source_id,
        AnnotationKind::Contains {
            parent_field: 1,
            child_field: 2,
        },
    )
    .await;
}

#[tokio::test]
async fn test_parent_entity_becomes_child_context() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_regions(&env, "src-walk", project).await;

    let mut walker = walker_for(&env, "src-walk").await;
    let mut table = load_table(&env, "src-walk").await;
    let rows = table.all_rows();
    let report = walker
        .reconcile_roots(&mut table, &[ItemType::Subjects], &rows)
        .await
        .unwrap();

    // Mordor, Gondor, Barad-dûr, Mount Doom, Minas Tirith, Osgiliath
    assert_eq!(report.created, 6);
    assert_eq!(report.ambiguous, 0);

    let mordor = table.item(1, 1).unwrap();
    assert_eq!(table.item(2, 1), Some(mordor));
    assert_eq!(table.cell(1, 2).unwrap().context_uuid, Some(mordor));
    assert_eq!(table.cell(2, 2).unwrap().context_uuid, Some(mordor));

    let barad_dur = env.entities.get(table.item(1, 2).unwrap()).await.unwrap().unwrap();
    assert_eq!(barad_dur.label, "Barad-dûr");
    assert_eq!(barad_dur.context_uuid, Some(mordor));

    // 空上级单元格：子级沿用上级的（项目）上下文
    let osgiliath = env.entities.get(table.item(4, 2).unwrap()).await.unwrap().unwrap();
    assert_eq!(osgiliath.context_uuid, Some(project));
    assert_eq!(table.item(4, 1), None);

    // 回写暂存库
    let records = env.staging.load_records("src-walk", 0, 4).await.unwrap();
    let stored = records
        .iter()
        .find(|r| r.row_num == 1 && r.field_num == 2)
        .unwrap();
    assert_eq!(stored.item_uuid, Some(barad_dur.uuid));
    assert_eq!(stored.context_uuid, Some(mordor));
}

#[tokio::test]
async fn test_child_alone_never_mints() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_regions(&env, "src-walk-child", project).await;

    let mut walker = walker_for(&env, "src-walk-child").await;
    let mut table = load_table(&env, "src-walk-child").await;
    let rows = table.all_rows();

    let report = walker
        .reconcile_field(&mut table, 2, None, &rows, false)
        .await
        .unwrap();
    assert_eq!(report.skipped_tasks, 1);
    assert_eq!(report.created, 0);
    assert!(env
        .entities
        .list_by_source("src-walk-child")
        .await
        .unwrap()
        .is_empty());
    assert!(rows.iter().all(|&row| table.item(row, 2).is_none()));
}

#[tokio::test]
async fn test_unresolved_parent_skips_child_branch() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();

    // 本项目与全局共享项目各有一个根层级 "Mordor"，使上级歧义
    for owner in [project, GLOBAL_PROJECT_UUID] {
        env.entities
            .create(test_helpers::new_entity(
                ItemType::Subjects,
                "Mordor",
                owner,
                Some(project),
            ))
            .await
            .unwrap();
    }
    seed_regions(&env, "src-walk-ambiguous", project).await;

    let mut walker = walker_for(&env, "src-walk-ambiguous").await;
    let mut table = load_table(&env, "src-walk-ambiguous").await;
    let rows = table.all_rows();
    let report = walker
        .reconcile_roots(&mut table, &[ItemType::Subjects], &rows)
        .await
        .unwrap();

    assert_eq!(report.ambiguous, 1);
    assert_eq!(table.item(1, 1), None);
    // Mordor 之下的地点不新建
    assert_eq!(table.item(1, 2), None);
    assert_eq!(table.item(2, 2), None);
    // Gondor 分支正常
    assert!(table.item(3, 2).is_some());

    let minted: Vec<String> = env
        .entities
        .list_by_source("src-walk-ambiguous")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.label)
        .collect();
    assert!(!minted.contains(&"Barad-dûr".to_string()));
    assert!(!minted.contains(&"Mount Doom".to_string()));
}

#[tokio::test]
async fn test_same_value_resolves_once_per_context() {
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_source(
        &env,
        "src-walk-dup",
        project,
        vec![Field::new("src-walk-dup", 1, "Excavator", ItemType::Persons, DataType::Id)],
        &[&["Smith, John"], &["Smith,   John"], &["Smith, John"]],
    )
    .await;

    let mut walker = walker_for(&env, "src-walk-dup").await;
    let mut table = load_table(&env, "src-walk-dup").await;
    let rows = table.all_rows();
    let report = walker
        .reconcile_roots(&mut table, &[ItemType::Persons], &rows)
        .await
        .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.cells_written, 3);
    let person = table.item(1, 1).unwrap();
    assert!(rows.iter().all(|&row| table.item(row, 1) == Some(person)));
}

#[tokio::test]
async fn test_cyclic_stored_annotations_terminate() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_source(
        &env,
        "src-walk-cycle",
        project,
        vec![
            Field::new("src-walk-cycle", 1, "Region", ItemType::Subjects, DataType::Id),
            Field::new("src-walk-cycle", 2, "Site", ItemType::Subjects, DataType::Id),
            Field::new("src-walk-cycle", 3, "Trench", ItemType::Subjects, DataType::Id),
        ],
        &[&["a", "b", "c"]],
    )
    .await;

    // 绕过标注服务直接写库，模拟历史残留的成环配置
    for (sort, (parent, child)) in [(1, 2), (2, 3), (3, 2)].into_iter().enumerate() {
        let mut annotation = Annotation::new(
            "src-walk-cycle",
            AnnotationKind::Contains {
                parent_field: parent,
                child_field: child,
            },
        );
        annotation.sort = sort as i64;
        env.staging.insert_annotation(annotation).await.unwrap();
    }

    let mut walker = walker_for(&env, "src-walk-cycle").await;
    let mut table = load_table(&env, "src-walk-cycle").await;
    let rows = table.all_rows();
    let report = tokio::time::timeout(
        Duration::from_secs(10),
        walker.reconcile_roots(&mut table, &[ItemType::Subjects], &rows),
    )
    .await
    .expect("层级遍历未结束")
    .unwrap();

    assert_eq!(report.created, 3);
    assert_eq!(
        env.entities.list_by_source("src-walk-cycle").await.unwrap().len(),
        3
    );
    let b = table.item(1, 2).unwrap();
    let c = env.entities.get(table.item(1, 3).unwrap()).await.unwrap().unwrap();
    assert_eq!(c.context_uuid, Some(b));
}
