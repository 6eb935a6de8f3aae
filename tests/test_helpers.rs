// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、导入批次构造、流水线驱动
// ==========================================

#![allow(dead_code)]

use archaeo_etl::config::EtlConfig;
use archaeo_etl::db::{initialize_schema, open_sqlite_connection};
use archaeo_etl::domain::{
    Annotation, AnnotationKind, DataType, DescriptionSource, Entity, Field, ItemType, NewEntity,
    Record, Source,
};
use archaeo_etl::pipeline::{PipelineOrchestrator, SourceStageMap};
use archaeo_etl::repository::{
    EntityStore, SqliteAssertionStore, SqliteEntityStore, SqliteStagingRepository,
    StagingRepository,
};
use archaeo_etl::staging::{AnnotationService, StagingTable};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// 单个测试的数据库环境（temp 文件需保持存活）
pub struct TestEnv {
    pub _temp_file: NamedTempFile,
    pub db_path: String,
    pub conn: Arc<Mutex<Connection>>,
    pub staging: Arc<SqliteStagingRepository>,
    pub entities: Arc<SqliteEntityStore>,
    pub assertions: Arc<SqliteAssertionStore>,
}

/// 创建临时测试数据库并初始化 schema
pub fn create_test_env() -> TestEnv {
    let temp_file = NamedTempFile::new().expect("创建临时文件失败");
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = open_sqlite_connection(&db_path).expect("打开数据库失败");
    initialize_schema(&conn).expect("建表失败");
    let conn = Arc::new(Mutex::new(conn));

    TestEnv {
        _temp_file: temp_file,
        db_path,
        staging: Arc::new(SqliteStagingRepository::from_connection(conn.clone())),
        entities: Arc::new(SqliteEntityStore::from_connection(conn.clone())),
        assertions: Arc::new(SqliteAssertionStore::from_connection(conn.clone())),
        conn,
    }
}

/// 小批量配置（让多次调用的分批路径被走到）
pub fn small_batch_config() -> EtlConfig {
    EtlConfig {
        init_chunk_rows: 2,
        row_batch_size: 2,
        annotation_batch_size: 2,
        record_write_batch: 1,
        ..EtlConfig::default()
    }
}

pub fn orchestrator(env: &TestEnv, config: EtlConfig) -> PipelineOrchestrator {
    PipelineOrchestrator::from_connection(env.conn.clone(), config)
}

/// 写入批次、字段与行数据
///
/// # 参数
/// - fields: 字段定义（field_num 由调用方指定）
/// - rows: 每行按 fields 顺序给出单元格原值（空串表示空单元格）
pub async fn seed_source(
    env: &TestEnv,
    source_id: &str,
    project_uuid: Uuid,
    fields: Vec<Field>,
    rows: &[&[&str]],
) -> Source {
    let mut source = Source::new(source_id, project_uuid, &format!("{} import", source_id));
    source.field_count = fields.len() as i64;
    source.row_count = rows.len() as i64;
    env.staging.create_source(source.clone()).await.unwrap();

    let field_nums: Vec<i64> = fields.iter().map(|f| f.field_num).collect();
    env.staging.insert_fields(fields).await.unwrap();

    let mut records = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        for (field_num, value) in field_nums.iter().zip(row.iter()) {
            records.push(Record::new(source_id, i as i64 + 1, *field_num, value));
        }
    }
    env.staging.insert_records(records).await.unwrap();
    source
}

pub async fn annotate(env: &TestEnv, source_id: &str, kind: AnnotationKind) -> Annotation {
    AnnotationService::new(env.staging.clone())
        .create(Annotation::new(source_id, kind))
        .await
        .unwrap()
}

/// 从暂存库装载完整暂存表
pub async fn load_table(env: &TestEnv, source_id: &str) -> StagingTable {
    let max_row = env.staging.max_row(source_id).await.unwrap();
    let mut table = StagingTable::new(source_id);
    table.append(env.staging.load_records(source_id, 0, max_row).await.unwrap());
    table
}

/// 反复推进直到完成
///
/// # 返回
/// (最终进度, 调用次数)
pub async fn run_to_completion(
    orchestrator: &PipelineOrchestrator,
    source_id: &str,
) -> (SourceStageMap, usize) {
    for calls in 1..=500 {
        let map = orchestrator.advance(source_id).await.unwrap();
        if map.complete {
            return (map, calls);
        }
    }
    panic!("流水线未在 500 次调用内完成: {}", source_id);
}

// ==========================================
// 场景: Mordor / Barad-dûr
// ==========================================

/// Region ⊃ Site，Site Notes 描述 Site
pub async fn seed_mordor(env: &TestEnv, source_id: &str, project_uuid: Uuid) -> Source {
    let source = seed_source(
        env,
        source_id,
        project_uuid,
        vec![
            Field::new(source_id, 1, "Region", ItemType::Subjects, DataType::Id),
            Field::new(source_id, 2, "Site", ItemType::Subjects, DataType::Id),
            Field::new(source_id, 3, "Site Notes", ItemType::Literal, DataType::String),
        ],
        &[&["Mordor", "Barad-dûr", "Vast fortress"]],
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
    annotate(
        env,
        source_id,
        AnnotationKind::Describes {
            subject_field: 2,
            source: DescriptionSource::FieldPredicate { object_field: 3 },
        },
    )
    .await;
    source
}

/// 多行发掘记录：地点层级 + 发掘者 + 变量/取值 + 年代
pub async fn seed_excavation(env: &TestEnv, source_id: &str, project_uuid: Uuid) -> Source {
    let source = seed_source(
        env,
        source_id,
        project_uuid,
        vec![
            Field::new(source_id, 1, "Region", ItemType::Subjects, DataType::Id),
            Field::new(source_id, 2, "Site", ItemType::Subjects, DataType::Id),
            Field::new(source_id, 3, "Excavator", ItemType::Persons, DataType::Id),
            Field::new(source_id, 4, "Variable", ItemType::Variables, DataType::Double),
            Field::new(source_id, 5, "Value", ItemType::Values, DataType::Double),
            Field::new(source_id, 6, "Depth (cm)", ItemType::Literal, DataType::Integer),
            Field::new(source_id, 7, "Start", ItemType::Literal, DataType::Integer),
            Field::new(source_id, 8, "End", ItemType::Literal, DataType::Integer),
        ],
        &[
            &["Mordor", "Barad-dûr", "Smith, John", "Length", "12.5", "40", "-3000", "-2800"],
            &["Mordor", "Mount Doom", "Smith, John", "Width", "3", "approx. 55", "-2900", ""],
            &["Gondor", "Minas Tirith", "Baggins, Frodo", "Length", "7", "12.0", "-1000", "-1200"],
            &["", "Osgiliath", "Baggins, Frodo", "Width", "n/a", "", "", ""],
            &["Gondor", "Minas Tirith", "Smith, John", "Length", "7", "12", "-1000", "-1200"],
        ],
    )
    .await;

    for kind in [
        AnnotationKind::Contains {
            parent_field: 1,
            child_field: 2,
        },
        AnnotationKind::Range {
            variable_field: 4,
            value_field: 5,
        },
        AnnotationKind::Describes {
            subject_field: 2,
            source: DescriptionSource::VariableValue {
                variable_field: 4,
                value_field: 5,
            },
        },
        AnnotationKind::Describes {
            subject_field: 2,
            source: DescriptionSource::FieldPredicate { object_field: 6 },
        },
        AnnotationKind::Timespan {
            subject_field: 2,
            earliest_field: 7,
            latest_field: 8,
        },
    ] {
        annotate(env, source_id, kind).await;
    }
    source
}

// ==========================================
// 实体存储预置数据
// ==========================================

pub fn new_entity(
    item_type: ItemType,
    label: &str,
    project_uuid: Uuid,
    context_uuid: Option<Uuid>,
) -> NewEntity {
    NewEntity {
        uuid: None,
        item_type,
        data_type: DataType::Id,
        label: label.to_string(),
        slug: label.to_lowercase().replace(' ', "-"),
        project_uuid,
        item_class_uuid: None,
        context_uuid,
        uri: None,
        item_key: None,
        initials: None,
        combined_name: None,
        source_id: None,
        meta: serde_json::json!({}),
    }
}

pub async fn seed_person(env: &TestEnv, label: &str, initials: &str, project_uuid: Uuid) -> Entity {
    let mut person = new_entity(ItemType::Persons, label, project_uuid, Some(project_uuid));
    person.initials = Some(initials.to_string());
    person.combined_name = Some(label.to_string());
    env.entities.create(person).await.unwrap()
}
