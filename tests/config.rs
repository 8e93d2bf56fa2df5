use fluid_canvas::config::{ConfigError, SimulationConfig};
use std::path::Path;

#[test]
fn test_default_config_is_valid() {
    let config = SimulationConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.pressure_iterations, 40);
    assert_eq!(config.workgroup_size, 16);
    assert_eq!(config.max_dt, 1.0 / 30.0);
}

#[test]
fn test_odd_pressure_iterations_rejected() {
    for iterations in [0, 1, 39] {
        let config = SimulationConfig {
            pressure_iterations: iterations,
            ..SimulationConfig::default()
        };
        assert!(
            matches!(config.validate(), Err(ConfigError::PressureIterations(n)) if n == iterations),
            "{iterations} iterations should be rejected"
        );
    }
}

#[test]
fn test_reduction_factor_bounds() {
    for factor in [1, 3, 48, 512] {
        let config = SimulationConfig {
            exposure_reduction_factor: factor,
            ..SimulationConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ReductionFactor(_))));
    }
    for factor in [2, 64, 256] {
        let config = SimulationConfig {
            exposure_reduction_factor: factor,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_ok(), "factor {factor} should be accepted");
    }
}

#[test]
fn test_settle_time_must_cover_two_timesteps() {
    for settle in [0.0, -1.0, 0.05, f32::NAN] {
        let config = SimulationConfig {
            velocity_settle_time: settle,
            ..SimulationConfig::default()
        };
        assert!(
            matches!(config.validate(), Err(ConfigError::SettleTime { .. })),
            "settle time {settle} should be rejected at max_dt {}",
            config.max_dt
        );
    }
    let config = SimulationConfig {
        velocity_settle_time: 2.0 / 30.0,
        ..SimulationConfig::default()
    };
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_json_fills_defaults() {
    let config = SimulationConfig::from_json(r#"{ "pressure_iterations": 20, "vorticity": 1.5 }"#)
        .expect("valid config");
    assert_eq!(config.pressure_iterations, 20);
    assert_eq!(config.vorticity, 1.5);
    assert_eq!(config.density, SimulationConfig::default().density);
}

#[test]
fn test_json_is_validated() {
    let result = SimulationConfig::from_json(r#"{ "pressure_iterations": 3 }"#);
    assert!(matches!(result, Err(ConfigError::PressureIterations(3))));

    let result = SimulationConfig::from_json("{ not json");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_missing_file() {
    let result = SimulationConfig::load(Path::new("/nonexistent/fluid-canvas.json"));
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn test_round_trip_through_file() {
    let path = std::env::temp_dir().join(format!("fluid-canvas-config-{}.json", std::process::id()));
    let config = SimulationConfig {
        fixed_dt: Some(0.02),
        auto_exposure: false,
        ..SimulationConfig::default()
    };
    std::fs::write(&path, serde_json::to_string_pretty(&config).expect("serialize")).expect("write");

    let loaded = SimulationConfig::load(&path).expect("load");
    assert_eq!(loaded, config);
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_clamp_dt() {
    let config = SimulationConfig::default();
    assert_eq!(config.clamp_dt(0.01), 0.01);
    assert_eq!(config.clamp_dt(1.0), 1.0 / 30.0);
    assert_eq!(config.clamp_dt(-1.0), 0.0);
}
