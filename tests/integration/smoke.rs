//! Smoke test: verify all crates compile and basic types are accessible.

#[test]
fn core_types_accessible() {
    let config = moby::MobyConfig::default();
    assert!(config.validate().is_ok());
    let _err = moby::MobyError::Internal {
        message: "test".to_string(),
    };
    let _stage = moby::StepStage::Idle;
}

#[test]
fn defaults_match_reference_setup() {
    let config = moby::MobyConfig::default();
    assert_eq!(config.base_momentum, 0.99);
    assert_eq!(config.temperature, 0.2);
    assert_eq!(config.negative_capacity, 4096);
    assert_eq!(config.class_capacity, 128);
    assert_eq!(config.class_negatives, moby::moby_core::DEFAULT_CLASS_NEGATIVES);
    assert_eq!(config.embed_dim, moby::moby_core::DEFAULT_EMBED_DIM);
    assert_eq!(config.proj_num_layers, 2);
    assert_eq!(config.pred_num_layers, 2);
}

#[test]
fn default_device_available() {
    let device = moby::default_device().unwrap();
    #[cfg(not(feature = "gpu"))]
    assert!(device.is_cpu());
    let _ = device;
}
