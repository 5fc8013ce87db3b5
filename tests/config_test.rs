// ==========================================
// 流水线配置集成测试
// ==========================================
// 测试目标: config_kv 覆写经由文件数据库装载到 PipelineConfig
// ==========================================

mod test_helpers;

use serial_pipeline::config::{config_keys, ConfigError, ConfigManager, PipelineConfig};
use serial_pipeline::domain::types::PublishSlot;
use test_helpers::create_test_db;

#[test]
fn test_defaults_load_from_empty_store() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let cm = ConfigManager::new(&db_path).expect("Failed to create ConfigManager");

    let config = PipelineConfig::load(&cm).expect("默认配置应可装载");
    assert_eq!(config.max_active_productions, 10);
    assert_eq!(config.default_chapters_per_day, 3);
    assert_eq!(config.pause_after_errors, 3);
    assert_eq!(config.total_slot_capacity(), 3);
}

#[test]
fn test_overrides_survive_reopen() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    {
        let cm = ConfigManager::new(&db_path).expect("Failed to create ConfigManager");
        cm.set_global_config_value(config_keys::MAX_ACTIVE_PRODUCTIONS, "4").unwrap();
        cm.set_global_config_value(config_keys::REFERENCE_TIMEZONE, "America/New_York")
            .unwrap();
        cm.set_global_config_value(
            config_keys::PUBLISH_SLOTS,
            r#"[{"slot":"morning","start":"06:00","end":"07:00","capacity":2},
                {"slot":"evening","start":"21:00","end":"23:00","capacity":1}]"#,
        )
        .unwrap();
        cm.set_global_config_value(config_keys::EXTENDED_QUALITY, "true").unwrap();
    }

    let cm = ConfigManager::new(&db_path).expect("Failed to reopen ConfigManager");
    let config = PipelineConfig::load(&cm).unwrap();
    assert_eq!(config.max_active_productions, 4);
    assert_eq!(config.reference_timezone, chrono_tz::America::New_York);
    assert_eq!(config.publish_slots.len(), 2);
    assert_eq!(config.total_slot_capacity(), 3);
    assert!(config.slot_window(PublishSlot::Afternoon).is_none());
    assert!(config.extended_quality);
}

#[test]
fn test_malformed_slot_json_fails_fast() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let cm = ConfigManager::new(&db_path).expect("Failed to create ConfigManager");
    cm.set_global_config_value(config_keys::PUBLISH_SLOTS, "not json").unwrap();

    assert!(matches!(
        PipelineConfig::load(&cm),
        Err(ConfigError::InvalidValue { .. })
    ));
}
