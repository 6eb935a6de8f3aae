// Worker entry point: drive one import source through the staged ETL pipeline.
//
// Usage:
//   etl-advance advance <source_id> [max_calls]
//   etl-advance status <source_id>
//   etl-advance purge <source_id>
//   etl-advance unreconcile <source_id>
//
// The database path comes from ARCHAEO_ETL_DB_PATH, falling back to the user data dir.

use anyhow::{bail, Context};
use archaeo_etl::config::ConfigManager;
use archaeo_etl::db::{initialize_schema, open_sqlite_connection};
use archaeo_etl::logging;
use archaeo_etl::PipelineOrchestrator;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

const DEFAULT_MAX_CALLS: usize = 1;

fn default_db_path() -> String {
    if let Ok(path) = std::env::var("ARCHAEO_ETL_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./archaeo_etl.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("archaeo-etl");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("archaeo_etl.db");
        }
    }
    path.to_string_lossy().to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_default();
    let source_id = args
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .context("缺少 source_id 参数")?;
    let max_calls = match args.next() {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("max_calls 非法: {}", raw))?,
        None => DEFAULT_MAX_CALLS,
    };

    let db_path = default_db_path();
    let conn = open_sqlite_connection(&db_path)
        .with_context(|| format!("无法打开数据库: {}", db_path))?;
    initialize_schema(&conn).context("建表失败")?;
    let conn = Arc::new(Mutex::new(conn));

    let config = ConfigManager::from_connection(conn.clone())?.load_etl_config()?;
    let orchestrator = PipelineOrchestrator::from_connection(conn, config);
    info!(db_path = %db_path, source_id = %source_id, command = %command, "etl-advance 启动");

    match command.as_str() {
        "advance" => {
            let mut map = orchestrator.status(&source_id).await?;
            for _ in 0..max_calls {
                map = orchestrator.advance(&source_id).await?;
                if map.complete {
                    break;
                }
            }
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        "status" => {
            let map = orchestrator.status(&source_id).await?;
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        "purge" => {
            let keys = orchestrator.purge(&source_id).await?;
            println!("purged_keys={}", keys);
        }
        "unreconcile" => {
            orchestrator.unreconcile(&source_id).await?;
            println!("unreconciled={}", source_id);
        }
        other => bail!("未知命令: {} (advance | status | purge | unreconcile)", other),
    }
    Ok(())
}
