//! Configuration and database bootstrap tests

use callaudit_pipeline::config::Settings;
use callaudit_pipeline::db;
use serial_test::serial;

#[tokio::test]
async fn database_pool_creates_file_and_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("pipeline.db");

    let pool = db::init_database_pool(&path).await.unwrap();

    // Schema is usable immediately
    let id = db::batches::create_batch(&pool, "12-08-2025").await.unwrap();
    assert!(id > 0);
    assert!(path.exists());
}

#[test]
#[serial]
fn settings_read_environment_overrides() {
    std::env::set_var("CALLAUDIT_GPU_HOSTS", "10.0.0.7,10.0.0.8");
    std::env::set_var("CALLAUDIT_DENOISE_ENABLED", "true");

    let settings = Settings::from_env();
    assert_eq!(settings.gpu_host_list(), vec!["10.0.0.7", "10.0.0.8"]);
    assert!(settings.denoise_enabled);

    std::env::remove_var("CALLAUDIT_GPU_HOSTS");
    std::env::remove_var("CALLAUDIT_DENOISE_ENABLED");
}

#[test]
#[serial]
fn settings_fall_back_to_defaults() {
    std::env::remove_var("CALLAUDIT_GPU_HOSTS");
    std::env::remove_var("CALLAUDIT_DENOISE_ENABLED");

    let settings = Settings::from_env();
    assert_eq!(settings.gpu_host_list(), vec!["localhost"]);
    assert_eq!(settings.mediator_port, 5065);
    assert!(!settings.denoise_enabled);
    assert!(settings.ivr_enabled);
}
