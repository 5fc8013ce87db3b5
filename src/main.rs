// ==========================================
// 连载生产流水线 - 命令行入口
// ==========================================
// 用法: serial-pipeline [db_path] <command> [args]
//   daily              运行每日 tick
//   tick               运行一次主循环 tick
//   status             各状态作品数
//   admit <plan.json>  提交作品计划
//   resume <id>        恢复暂停的作品
// 生成引擎: 确定性离线引擎 (真实生成后端由外部接入)
// ==========================================

use anyhow::{bail, Context, Result};
use serial_pipeline::config::{ConfigManager, PipelineConfig};
use serial_pipeline::db::{ensure_schema, get_default_db_path, open_sqlite_connection};
use serial_pipeline::domain::WorkPlan;
use serial_pipeline::engine::{OfflineEngine, PipelineOrchestrator, SystemClock};
use serial_pipeline::{logging, ProductionStatus, APP_NAME, VERSION};
use std::sync::{Arc, Mutex};

const COMMANDS: [&str; 5] = ["daily", "tick", "status", "admit", "resume"];

fn usage() -> String {
    format!(
        "{} v{}\n用法: serial-pipeline [db_path] <{}> [args]",
        APP_NAME,
        VERSION,
        COMMANDS.join("|")
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command_idx) = args.iter().position(|a| COMMANDS.contains(&a.as_str())) else {
        bail!(usage());
    };
    let db_path = match command_idx {
        0 => get_default_db_path(),
        1 => args[0].clone(),
        _ => bail!(usage()),
    };
    let command = args[command_idx].as_str();
    let rest = &args[command_idx + 1..];

    tracing::info!(db_path = %db_path, command, "{} v{}", APP_NAME, VERSION);

    let conn = open_sqlite_connection(&db_path)
        .with_context(|| format!("无法打开数据库: {}", db_path))?;
    ensure_schema(&conn).context("建表失败")?;
    let conn = Arc::new(Mutex::new(conn));

    let config_manager = ConfigManager::from_connection(conn.clone())?;
    let config = PipelineConfig::load(&config_manager).context("配置校验失败")?;
    let orchestrator = PipelineOrchestrator::new(
        conn,
        config,
        Arc::new(OfflineEngine::default()),
        Arc::new(SystemClock),
    );

    match command {
        "daily" => {
            let summary = orchestrator.run_daily_tick()?;
            println!(
                "counters_reset={} promoted={} cleaned={} stats_recorded={} errors={}",
                summary.counters_reset,
                summary.promoted,
                summary.cleaned,
                summary.stats_recorded,
                summary.errors
            );
        }
        "tick" => {
            let summary = orchestrator.run_main_loop_tick().await?;
            println!(
                "scheduled={} deferred={} written={} failed={} skipped={} published={} publish_failures={} recovered={} errors={}",
                summary.chapters_scheduled,
                summary.chapters_deferred,
                summary.chapters_written,
                summary.chapters_failed,
                summary.chapters_skipped,
                summary.chapters_published,
                summary.publish_failures,
                summary.recovered,
                summary.errors
            );
        }
        "status" => {
            let counts = orchestrator.status()?;
            for status in [
                ProductionStatus::Queued,
                ProductionStatus::Active,
                ProductionStatus::Writing,
                ProductionStatus::Paused,
                ProductionStatus::Finished,
                ProductionStatus::Error,
            ] {
                println!("{:<10} {}", status.as_str(), counts.get(status));
            }
        }
        "admit" => {
            let Some(path) = rest.first() else {
                bail!("admit 需要计划文件路径");
            };
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("无法读取计划文件: {}", path))?;
            let plan: WorkPlan = serde_json::from_str(&raw).context("计划文件格式错误")?;
            let record = orchestrator.machine().admit(&plan, chrono::Utc::now())?;
            println!("{}", record.production_id);
        }
        "resume" => {
            let Some(id) = rest.first() else {
                bail!("resume 需要作品 ID");
            };
            let record = orchestrator.machine().resume_production(id, chrono::Utc::now())?;
            println!("{} {}", record.production_id, record.status);
        }
        _ => bail!(usage()),
    }

    Ok(())
}
