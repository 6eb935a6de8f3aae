// ==========================================
// 断言物化集成测试
// ==========================================
// 测试目标: 字面量转换兜底、确定性标识、重复执行幂等、保留谓词
// ==========================================

mod test_helpers;

use archaeo_etl::assertion::AssertionMaterializer;
use archaeo_etl::domain::{
    AnnotationKind, AssertionKey, AssertionObject, DataType, Entity, Field, ItemType,
    PREDICATE_CONTAINS_UUID, PREDICATE_HAS_FILE_UUID,
};
use archaeo_etl::logging;
use archaeo_etl::pipeline::{StageMode, StageRunner, STAGES};
use archaeo_etl::reconcile::{EntityResolver, HierarchyWalker};
use archaeo_etl::repository::{AssertionStore, EntityStore, StagingRepository};
use archaeo_etl::staging::StagingTable;
use std::collections::BTreeSet;
use std::sync::Arc;
use test_helpers::{
    annotate, create_test_env, load_table, new_entity, orchestrator, run_to_completion,
    seed_excavation, seed_mordor, seed_source, small_batch_config, TestEnv,
};
use uuid::Uuid;

async fn build_runner(env: &TestEnv, source_id: &str) -> StageRunner {
    let source = env.staging.get_source(source_id).await.unwrap().unwrap();
    let fields = env.staging.list_fields(source_id).await.unwrap();
    let annotations = env.staging.list_annotations(source_id).await.unwrap();
    let resolver = Arc::new(EntityResolver::new(env.entities.clone(), &source));
    let walker = HierarchyWalker::new(
        resolver.clone(),
        env.staging.clone(),
        fields.clone(),
        annotations.clone(),
        100,
    );
    let materializer = AssertionMaterializer::new(
        resolver.clone(),
        env.assertions.clone(),
        source_id,
        source.project_uuid,
        fields.clone(),
    );
    StageRunner::new(
        resolver,
        env.staging.clone(),
        walker,
        materializer,
        fields,
        annotations,
    )
}

/// 在一次运行内按阶段顺序处理全部行
async fn run_all_stages(env: &TestEnv, source_id: &str) -> StagingTable {
    let mut table = load_table(env, source_id).await;
    let rows = table.all_rows();
    let mut runner = build_runner(env, source_id).await;

    for def in STAGES.iter() {
        match def.mode {
            StageMode::Initialize => {}
            StageMode::RowBatch => runner.run_rows(def.id, &mut table, &rows).await.unwrap(),
            StageMode::AnnotationBatch => {
                let annotations: Vec<_> = def
                    .id
                    .annotations(runner.annotations())
                    .into_iter()
                    .cloned()
                    .collect();
                for annotation in &annotations {
                    runner
                        .run_annotation(def.id, annotation, &table, &rows)
                        .await
                        .unwrap();
                }
            }
        }
    }
    table
}

async fn entity_label(env: &TestEnv, uuid: Uuid) -> String {
    env.entities.get(uuid).await.unwrap().unwrap().label
}

#[tokio::test]
async fn test_mordor_scenario() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_mordor(&env, "src-mordor", project).await;

    let table = run_all_stages(&env, "src-mordor").await;

    let minted = env.entities.list_by_source("src-mordor").await.unwrap();
    let mordor: Vec<_> = minted.iter().filter(|e| e.label == "Mordor").collect();
    let barad_dur: Vec<_> = minted.iter().filter(|e| e.label == "Barad-dûr").collect();
    assert_eq!(mordor.len(), 1);
    assert_eq!(barad_dur.len(), 1);
    assert_eq!(barad_dur[0].context_uuid, Some(mordor[0].uuid));
    assert_eq!(table.item(1, 2), Some(barad_dur[0].uuid));

    // Site Notes 字段获得同名谓词上下文
    let notes_field = env
        .staging
        .list_fields("src-mordor")
        .await
        .unwrap()
        .into_iter()
        .find(|f| f.field_num == 3)
        .unwrap();
    let predicate = env
        .entities
        .get(notes_field.context_uuid.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(predicate.item_type, ItemType::Predicates);
    assert_eq!(predicate.label, "Site Notes");

    let assertions = env.assertions.list_by_source("src-mordor").await.unwrap();
    let descriptive: Vec<_> = assertions
        .iter()
        .filter(|a| a.predicate_uuid != PREDICATE_CONTAINS_UUID)
        .collect();
    assert_eq!(descriptive.len(), 1);
    assert_eq!(descriptive[0].subject_uuid, barad_dur[0].uuid);
    assert_eq!(descriptive[0].predicate_uuid, predicate.uuid);
    assert_eq!(
        descriptive[0].object,
        AssertionObject::String("Vast fortress".to_string())
    );

    // 层级专用断言 Mordor → Barad-dûr
    let contains: Vec<_> = assertions
        .iter()
        .filter(|a| a.predicate_uuid == PREDICATE_CONTAINS_UUID)
        .collect();
    assert_eq!(contains.len(), 1);
    assert_eq!(contains[0].subject_uuid, mordor[0].uuid);
    assert_eq!(contains[0].object, AssertionObject::Entity(barad_dur[0].uuid));
}

#[tokio::test]
async fn test_failed_coercion_falls_back_to_note_predicate() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_excavation(&env, "src-dig", project).await;

    run_all_stages(&env, "src-dig").await;

    let assertions = env.assertions.list_by_source("src-dig").await.unwrap();
    let mut strings = Vec::new();
    for a in &assertions {
        if let AssertionObject::String(value) = &a.object {
            strings.push((entity_label(&env, a.predicate_uuid).await, value.clone()));
        }
    }
    strings.sort();
    assert_eq!(
        strings,
        vec![
            ("Depth (cm) [Note]".to_string(), "approx. 55".to_string()),
            ("Width [Note]".to_string(), "n/a".to_string()),
        ]
    );

    // 备注谓词以原谓词为上下文
    let note = assertions
        .iter()
        .find(|a| a.object == AssertionObject::String("n/a".to_string()))
        .unwrap();
    let note_predicate = env.entities.get(note.predicate_uuid).await.unwrap().unwrap();
    let width = env
        .entities
        .get(note_predicate.context_uuid.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(width.label, "Width");

    // 12.0 按整数保存，同键重复行只保留一条
    let twelve = assertions
        .iter()
        .filter(|a| a.object == AssertionObject::Integer(12))
        .count();
    assert_eq!(twelve, 1);
    assert!(assertions
        .iter()
        .any(|a| a.object == AssertionObject::Double(12.5)));

    // 3 条包含 + 4 条变量取值 + 3 条深度
    assert_eq!(assertions.len(), 10);
}

#[tokio::test]
async fn test_rematerialization_is_idempotent() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_excavation(&env, "src-idem", project).await;

    run_all_stages(&env, "src-idem").await;
    let first: BTreeSet<Uuid> = env
        .assertions
        .list_by_source("src-idem")
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.uuid)
        .collect();
    let entity_count = env.entities.list_by_source("src-idem").await.unwrap().len();

    // 第二次运行命中全部已有实体，断言按标识替换
    run_all_stages(&env, "src-idem").await;
    let second: BTreeSet<Uuid> = env
        .assertions
        .list_by_source("src-idem")
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.uuid)
        .collect();

    assert_eq!(first, second);
    assert_eq!(
        env.entities.list_by_source("src-idem").await.unwrap().len(),
        entity_count
    );
    assert_eq!(
        env.assertions.count_by_source("src-idem").await.unwrap(),
        first.len() as i64
    );
}

#[tokio::test]
async fn test_space_time_spans_per_subject() {
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_excavation(&env, "src-span", project).await;

    let table = run_all_stages(&env, "src-span").await;

    let spans = env
        .entities
        .list_by_source("src-span")
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.item_type == ItemType::SpaceTime)
        .collect::<Vec<_>>();
    let mut labels: Vec<String> = spans.iter().map(|e| e.label.clone()).collect();
    labels.sort();
    assert_eq!(
        labels,
        vec![
            "-1200 to -1000".to_string(),
            "-2900 to -2900".to_string(),
            "-3000 to -2800".to_string(),
        ]
    );

    let minas_tirith = table.item(3, 2).unwrap();
    let span = spans.iter().find(|e| e.label == "-1200 to -1000").unwrap();
    assert_eq!(span.context_uuid, Some(minas_tirith));
}

/// 地点 + 发掘者 + 备注，发掘者为链接对象
async fn seed_links_source(env: &TestEnv, source_id: &str, project: Uuid) {
    seed_source(
        env,
        source_id,
        project,
        vec![
            Field::new(source_id, 1, "Site", ItemType::Subjects, DataType::Id),
            Field::new(source_id, 2, "Excavator", ItemType::Persons, DataType::Id),
            Field::new(source_id, 3, "Notes", ItemType::Literal, DataType::String),
        ],
        &[
            &["Barad-dûr", "Baggins, Frodo", "first season"],
            &["Barad-dûr", "Baggins, Frodo", "second season"],
            &["Mount Doom", "Gamgee, Sam", "sealed"],
        ],
    )
    .await;
}

async fn seed_predicate(env: &TestEnv, label: &str, data_type: DataType, project: Uuid) -> Entity {
    let mut predicate = new_entity(ItemType::Predicates, label, project, Some(project));
    predicate.data_type = data_type;
    env.entities.create(predicate).await.unwrap()
}

#[tokio::test]
async fn test_links_between_named_entities() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_links_source(&env, "src-links", project).await;
    let excavated_by = seed_predicate(&env, "Excavated by", DataType::Id, project).await;
    annotate(
        &env,
        "src-links",
        AnnotationKind::Links {
            subject_field: 1,
            predicate: excavated_by.uuid,
            object_field: 2,
        },
    )
    .await;

    let table = run_all_stages(&env, "src-links").await;

    let links: Vec<_> = env
        .assertions
        .list_by_source("src-links")
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.predicate_uuid == excavated_by.uuid)
        .collect();
    // 前两行同键去重
    assert_eq!(links.len(), 2);

    let barad_dur = table.item(1, 1).unwrap();
    let frodo = table.item(1, 2).unwrap();
    let link = links.iter().find(|a| a.subject_uuid == barad_dur).unwrap();
    assert_eq!(link.object, AssertionObject::Entity(frodo));
    let person = env.entities.get(frodo).await.unwrap().unwrap();
    assert_eq!(person.item_type, ItemType::Persons);
    assert_eq!(person.combined_name.as_deref(), Some("Frodo Baggins"));
}

#[tokio::test]
async fn test_links_require_entity_object_and_id_predicate() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_links_source(&env, "src-links-skip", project).await;
    let id_predicate = seed_predicate(&env, "Recorded in", DataType::Id, project).await;
    let string_predicate = seed_predicate(&env, "Remarked", DataType::String, project).await;

    // 对象为字面量列
    annotate(
        &env,
        "src-links-skip",
        AnnotationKind::Links {
            subject_field: 1,
            predicate: id_predicate.uuid,
            object_field: 3,
        },
    )
    .await;
    // 谓词不是 id 类型
    annotate(
        &env,
        "src-links-skip",
        AnnotationKind::Links {
            subject_field: 1,
            predicate: string_predicate.uuid,
            object_field: 2,
        },
    )
    .await;

    run_all_stages(&env, "src-links-skip").await;

    let produced = env
        .assertions
        .list_by_source("src-links-skip")
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.predicate_uuid == id_predicate.uuid || a.predicate_uuid == string_predicate.uuid)
        .count();
    assert_eq!(produced, 0);
}

#[tokio::test]
async fn test_media_files_through_pipeline() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_source(
        &env,
        "src-media",
        project,
        vec![
            Field::new("src-media", 1, "Photo", ItemType::Media, DataType::Id),
            Field::new("src-media", 2, "File", ItemType::Resources, DataType::Id),
        ],
        &[
            &["Photo 1", "https://Example.org/files/img1.jpg"],
            &["Photo 2", "http://example.org/files/img2.jpg/"],
        ],
    )
    .await;
    annotate(
        &env,
        "src-media",
        AnnotationKind::MediaFile {
            media_field: 1,
            resource_field: 2,
        },
    )
    .await;

    let (map, _) = run_to_completion(&orchestrator(&env, small_batch_config()), "src-media").await;
    assert!(map.complete);

    let entities = env.entities.list_by_source("src-media").await.unwrap();
    let photo = entities.iter().find(|e| e.label == "Photo 1").unwrap();
    let file = entities
        .iter()
        .find(|e| e.uri.as_deref() == Some("example.org/files/img1.jpg"))
        .unwrap();
    assert_eq!(file.item_type, ItemType::Resources);
    assert_eq!(file.context_uuid, Some(photo.uuid));
    assert!(entities
        .iter()
        .any(|e| e.uri.as_deref() == Some("example.org/files/img2.jpg")));

    let has_file: Vec<_> = env
        .assertions
        .list_by_source("src-media")
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.predicate_uuid == PREDICATE_HAS_FILE_UUID)
        .collect();
    assert_eq!(has_file.len(), 2);
    assert!(has_file
        .iter()
        .any(|a| a.subject_uuid == photo.uuid && a.object == AssertionObject::Entity(file.uuid)));
}

#[tokio::test]
async fn test_failed_bulk_write_falls_back_per_row() {
    logging::init_test();
    let env = create_test_env();
    let project = Uuid::new_v4();
    seed_mordor(&env, "src-fallback", project).await;
    let subject = env
        .entities
        .create(new_entity(ItemType::Subjects, "Mordor", project, Some(project)))
        .await
        .unwrap();
    let predicate = seed_predicate(&env, "Remarks", DataType::String, project).await;

    let key = |subject_uuid: Uuid, text: &str| AssertionKey {
        subject_uuid,
        predicate_uuid: predicate.uuid,
        observation_uuid: None,
        event_uuid: None,
        attribute_group_uuid: None,
        language_uuid: None,
        object: AssertionObject::String(text.to_string()),
    };
    let batch = vec![
        key(subject.uuid, "dark").into_assertion(project, "src-fallback", 1.1),
        // 主体不存在，违反外键
        key(Uuid::new_v4(), "orphan").into_assertion(project, "src-fallback", 1.2),
        key(subject.uuid, "fiery").into_assertion(project, "src-fallback", 1.3),
    ];

    let source = env.staging.get_source("src-fallback").await.unwrap().unwrap();
    let materializer = AssertionMaterializer::new(
        Arc::new(EntityResolver::new(env.entities.clone(), &source)),
        env.assertions.clone(),
        "src-fallback",
        project,
        env.staging.list_fields("src-fallback").await.unwrap(),
    );
    let report = materializer.write(batch).await.unwrap();

    assert_eq!(report.written, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(env.assertions.count_by_source("src-fallback").await.unwrap(), 2);
}
