use simflow_core::config::{FlowConfig, ENV_BATCH_SIZE, ENV_MAX_WORKERS};

// Kept as the only test in this binary so the process environment is not shared.
#[test]
fn environment_overrides_apply_on_top_of_file_values() {
    std::env::set_var(ENV_MAX_WORKERS, "3");
    std::env::set_var(ENV_BATCH_SIZE, "7");
    let config = FlowConfig::default().apply_env().expect("apply env");
    assert_eq!(config.max_workers, 3);
    assert_eq!(config.batch_size, 7);

    std::env::set_var(ENV_BATCH_SIZE, "seven");
    let err = FlowConfig::default().apply_env().expect_err("non numeric");
    assert_eq!(err.info().code, "config_env");

    std::env::remove_var(ENV_MAX_WORKERS);
    std::env::remove_var(ENV_BATCH_SIZE);
}
