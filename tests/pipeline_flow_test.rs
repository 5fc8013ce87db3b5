// ==========================================
// 流水线端到端测试
// ==========================================
// 测试范围:
// 1. 每日 tick: 激活容量、幂等、昨日统计
// 2. 主循环 tick: 排程 -> 写作 -> 质检 -> 发布
// 3. 时段容量溢出顺延、写满计划后完结
// ==========================================
// 时钟: 参考时区 Asia/Shanghai, 默认时段 08-10 / 12-14 / 19-22, 每段容量 1
// ==========================================

mod test_helpers;

use chrono::NaiveDate;
use serial_pipeline::domain::types::{ChapterJobStatus, ProductionStatus, PublishSlot, PublishStatus};
use serial_pipeline::engine::{OfflineEngine, PipelineClock};
use std::sync::Arc;
use test_helpers::{
    admit_and_activate, build_pipeline, shanghai_late_evening, test_config, test_plan, utc,
};

fn offline() -> Arc<OfflineEngine> {
    Arc::new(OfflineEngine::default())
}

// ==========================================
// 每日 tick
// ==========================================

#[tokio::test]
async fn test_daily_tick_promotes_up_to_capacity_by_priority() {
    let mut config = test_config();
    config.max_active_productions = 2;
    let p = build_pipeline(config, offline(), shanghai_late_evening(2026, 3, 2));
    let machine = p.orchestrator.machine();

    let mut low = test_plan("低优先级", 3, Some(30));
    low.priority = 1;
    let mut high = test_plan("高优先级", 3, Some(30));
    high.priority = 9;
    let mid = test_plan("中优先级", 3, Some(30));

    let low_id = machine.admit(&low, p.clock.now()).unwrap().production_id;
    let high_id = machine.admit(&high, p.clock.now()).unwrap().production_id;
    machine.admit(&mid, p.clock.now()).unwrap();

    let summary = p.orchestrator.run_daily_tick().unwrap();
    assert_eq!(summary.promoted, 2);
    assert_eq!(summary.errors, 0);

    let counts = p.orchestrator.status().unwrap();
    assert_eq!(counts.get(ProductionStatus::Active), 2);
    assert_eq!(counts.get(ProductionStatus::Queued), 1);
    assert_eq!(machine.get(&high_id).unwrap().status, ProductionStatus::Active);
    assert_eq!(machine.get(&low_id).unwrap().status, ProductionStatus::Active);

    // 同一天再跑一次: 没有空位, 计数不再清零
    let again = p.orchestrator.run_daily_tick().unwrap();
    assert_eq!(again.promoted, 0);
    assert_eq!(again.counters_reset, 0);
    assert_eq!(p.orchestrator.status().unwrap().get(ProductionStatus::Active), 2);
}

#[tokio::test]
async fn test_daily_tick_records_yesterday_stats() {
    let p = build_pipeline(test_config(), offline(), shanghai_late_evening(2026, 3, 2));
    admit_and_activate(&p, &test_plan("盐道", 3, Some(30)));
    p.orchestrator.run_main_loop_tick().await.unwrap();

    // 上海 3 月 3 日 01:00
    p.clock.set(utc(2026, 3, 2, 17, 0));
    let summary = p.orchestrator.run_daily_tick().unwrap();
    assert!(summary.stats_recorded);
    assert_eq!(summary.counters_reset, 1);

    let stats = p
        .orchestrator
        .repositories()
        .stats_repo
        .find_by_date(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
        .unwrap()
        .expect("昨日统计应已写入");
    assert_eq!(stats.chapters_written, 3);
    assert_eq!(stats.chapters_published, 0);
    assert_eq!(stats.failed_jobs, 0);
    assert_eq!(stats.active_count, 1);
    assert!(stats.avg_quality_score.is_some());
}

// ==========================================
// 主循环 tick
// ==========================================

#[tokio::test]
async fn test_main_tick_writes_and_publishes_next_day() {
    let p = build_pipeline(test_config(), offline(), shanghai_late_evening(2026, 3, 2));
    let id = admit_and_activate(&p, &test_plan("盐道", 3, Some(30)));
    let repos = p.orchestrator.repositories();

    let summary = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(summary.chapters_scheduled, 3);
    assert_eq!(summary.chapters_written, 3);
    assert_eq!(summary.chapters_failed, 0);
    assert_eq!(summary.chapters_published, 0);
    assert_eq!(summary.errors, 0);

    let record = p.orchestrator.machine().get(&id).unwrap();
    assert_eq!(record.status, ProductionStatus::Active);
    assert_eq!(record.current_chapter, 3);
    assert_eq!(record.chapters_written_today, 3);
    assert_eq!(record.score_history.len(), 3);
    assert_eq!(record.consecutive_error_count, 0);
    assert!(!record.context.running_summary.is_empty());

    // 时段按配置顺序依次占用
    let jobs = repos.job_repo.list_by_production(&id).unwrap();
    let slots: Vec<PublishSlot> = jobs.iter().map(|j| j.scheduled_slot).collect();
    assert_eq!(
        slots,
        vec![PublishSlot::Morning, PublishSlot::Afternoon, PublishSlot::Evening]
    );
    assert!(jobs.iter().all(|j| j.status == ChapterJobStatus::Completed));
    assert!(jobs.iter().all(|j| j.final_score.is_some() && j.chapter_id.is_some()));

    // 当日窗口已过, 发布排到次日同一时段
    let publish_jobs = repos.publish_repo.list_by_production(&id).unwrap();
    assert_eq!(publish_jobs.len(), 3);
    for job in &publish_jobs {
        assert_eq!(job.status, PublishStatus::Scheduled);
        assert_eq!(p.orchestrator.publisher().slot_for_time(job.scheduled_time), Some(job.slot));
        assert!(job.scheduled_time > p.clock.now());
    }
    let first = repos.chapter_repo.find_by_number(&id, 1).unwrap().unwrap();
    assert!(!first.is_visible);

    // 次日 23:00: 昨日章节全部发布, 同时写出今日三章
    p.clock.set(shanghai_late_evening(2026, 3, 3));
    p.orchestrator.run_daily_tick().unwrap();
    let next = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(next.chapters_published, 3);
    assert_eq!(next.chapters_written, 3);
    assert_eq!(next.publish_failures, 0);

    let first = repos.chapter_repo.find_by_number(&id, 1).unwrap().unwrap();
    assert!(first.is_visible);
    assert!(first.published_at.is_some());
    assert_eq!(p.orchestrator.machine().get(&id).unwrap().current_chapter, 6);
}

#[tokio::test]
async fn test_completed_chapter_without_publish_job_is_backfilled() {
    let p = build_pipeline(test_config(), offline(), shanghai_late_evening(2026, 3, 2));
    let id = admit_and_activate(&p, &test_plan("盐道", 3, Some(30)));
    let repos = p.orchestrator.repositories();
    p.orchestrator.run_main_loop_tick().await.unwrap();

    // 发布排期没能落库
    p.conn
        .lock()
        .unwrap()
        .execute("DELETE FROM publish_job", [])
        .unwrap();

    let summary = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(summary.publish_backfilled, 3);
    assert_eq!(summary.publish_failures, 0);

    let publish_jobs = repos.publish_repo.list_by_production(&id).unwrap();
    assert_eq!(publish_jobs.len(), 3);
    let write_jobs = repos.job_repo.list_by_production(&id).unwrap();
    for job in &publish_jobs {
        assert_eq!(job.status, PublishStatus::Scheduled);
        let source = write_jobs
            .iter()
            .find(|j| j.chapter_id.as_deref() == Some(job.chapter_id.as_str()))
            .unwrap();
        assert_eq!(job.slot, source.scheduled_slot);
    }

    // 补排过的章节不会再次补排
    let again = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(again.publish_backfilled, 0);
}

#[tokio::test]
async fn test_repeated_tick_does_not_double_schedule() {
    let p = build_pipeline(test_config(), offline(), shanghai_late_evening(2026, 3, 2));
    let id = admit_and_activate(&p, &test_plan("盐道", 3, Some(30)));

    p.orchestrator.run_main_loop_tick().await.unwrap();
    let again = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(again.chapters_scheduled, 0);
    assert_eq!(again.chapters_written, 0);
    assert_eq!(again.chapters_skipped, 0);

    let jobs = p.orchestrator.repositories().job_repo.list_by_production(&id).unwrap();
    assert_eq!(jobs.len(), 3);
    let numbers: Vec<i32> = jobs.iter().map(|j| j.chapter_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_jobs_run_only_once_due() {
    // 上海 3 月 3 日 07:00, 三个时段都还没到
    let p = build_pipeline(test_config(), offline(), utc(2026, 3, 2, 23, 0));
    let id = admit_and_activate(&p, &test_plan("盐道", 3, Some(30)));

    let early = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(early.chapters_scheduled, 3);
    assert_eq!(early.chapters_written, 0);

    // 上海 12:30: 早间与午间任务到期
    p.clock.set(utc(2026, 3, 3, 4, 30));
    let noon = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(noon.chapters_scheduled, 0);
    assert_eq!(noon.chapters_written, 2);
    assert_eq!(p.orchestrator.machine().get(&id).unwrap().current_chapter, 2);
}

#[tokio::test]
async fn test_overflow_beyond_slot_capacity_is_deferred() {
    let p = build_pipeline(test_config(), offline(), shanghai_late_evening(2026, 3, 2));
    let id = admit_and_activate(&p, &test_plan("日更五章", 5, Some(30)));

    let summary = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(summary.chapters_scheduled, 3);
    assert_eq!(summary.chapters_deferred, 2);
    assert_eq!(summary.chapters_written, 3);

    // 当日时段已全部占用, 剩余两章继续顺延
    let again = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(again.chapters_scheduled, 0);
    assert_eq!(again.chapters_deferred, 2);
    assert_eq!(p.orchestrator.machine().get(&id).unwrap().current_chapter, 3);
}

#[tokio::test]
async fn test_daily_tick_after_main_tick_keeps_today_quota() {
    let mut config = test_config();
    for window in &mut config.publish_slots {
        window.capacity = 2;
    }
    let p = build_pipeline(config, offline(), shanghai_late_evening(2026, 3, 2));
    let id = admit_and_activate(&p, &test_plan("盐道", 3, Some(30)));
    p.orchestrator.run_main_loop_tick().await.unwrap();

    // 次日主循环先于每日 tick 运行
    p.clock.set(shanghai_late_evening(2026, 3, 3));
    let first = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(first.chapters_written, 3);

    let daily = p.orchestrator.run_daily_tick().unwrap();
    assert_eq!(daily.counters_reset, 1);
    let record = p.orchestrator.machine().get(&id).unwrap();
    assert_eq!(record.chapters_written_today, 3);

    // 今日配额已用完, 不再排程
    let second = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(second.chapters_scheduled, 0);
    assert_eq!(second.chapters_written, 0);
    assert_eq!(p.orchestrator.machine().get(&id).unwrap().current_chapter, 6);
}

#[tokio::test]
async fn test_production_finishes_at_planned_length() {
    let p = build_pipeline(test_config(), offline(), shanghai_late_evening(2026, 3, 2));
    let id = admit_and_activate(&p, &test_plan("短篇", 3, Some(2)));

    let summary = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(summary.chapters_scheduled, 2);
    assert_eq!(summary.chapters_written, 2);

    let record = p.orchestrator.machine().get(&id).unwrap();
    assert_eq!(record.status, ProductionStatus::Finished);
    assert_eq!(record.current_chapter, 2);
    assert!(record.finished_at.is_some());

    // 完结后不再排程
    let again = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(again.chapters_scheduled, 0);
}

#[tokio::test]
async fn test_productions_progress_independently() {
    let p = build_pipeline(test_config(), offline(), shanghai_late_evening(2026, 3, 2));
    let machine = p.orchestrator.machine();
    let a = machine.admit(&test_plan("甲", 3, Some(30)), p.clock.now()).unwrap().production_id;
    let b = machine.admit(&test_plan("乙", 2, Some(30)), p.clock.now()).unwrap().production_id;
    p.orchestrator.run_daily_tick().unwrap();

    let summary = p.orchestrator.run_main_loop_tick().await.unwrap();
    assert_eq!(summary.chapters_scheduled, 5);
    assert_eq!(summary.chapters_written, 5);
    assert_eq!(machine.get(&a).unwrap().current_chapter, 3);
    assert_eq!(machine.get(&b).unwrap().current_chapter, 2);
}
