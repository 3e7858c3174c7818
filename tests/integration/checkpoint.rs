//! Checkpoint round trip: snapshot → JSON on disk → restore.

use candle_core::{Device, Tensor};
use moby::{MlpEncoder, MlpEncoderConfig, Moby, MobyConfig, MobyState};

fn build() -> Moby<MlpEncoder> {
    let config = MobyConfig {
        dataset_size: 40,
        batch_size: 4,
        total_epochs: 3,
        negative_capacity: 8,
        class_capacity: 5,
        class_negatives: 5,
        hidden_dim: 16,
        embed_dim: 6,
        num_classes: 2,
        ..MobyConfig::default()
    };
    let encoder_config = MlpEncoderConfig {
        in_dim: 10,
        hidden_dim: 12,
        num_features: 12,
    };
    Moby::new(config, &Device::Cpu, |vb| MlpEncoder::new(&encoder_config, vb)).unwrap()
}

#[test]
fn restored_model_continues_from_snapshot() {
    let device = Device::Cpu;
    let mut model = build();
    let labels = Tensor::new(&[1u32, 0, 1, 1], &device).unwrap();
    for _ in 0..2 {
        let im_1 = Tensor::randn(0f32, 1f32, (4, 10), &device).unwrap();
        let im_2 = Tensor::randn(0f32, 1f32, (4, 10), &device).unwrap();
        model.forward(&im_1, &im_2, Some(&labels), true).unwrap();
    }

    let path = std::env::temp_dir().join(format!("moby_checkpoint_{}.json", std::process::id()));
    model.snapshot().unwrap().save(&path).unwrap();
    let state = MobyState::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(state.step, 2);
    assert_eq!(state.queues.ptr, 0);
    assert_eq!(state.queues.classes.len(), 2);

    let mut resumed = build();
    resumed.restore(&state).unwrap();
    assert_eq!(resumed.schedule().step(), 2);
    // class 0: 2 writes; class 1: 6 writes into 5 slots
    assert_eq!(resumed.queues().classes().ptrs(), vec![2, 1]);
    assert_eq!(resumed.snapshot().unwrap(), state);

    let im_1 = Tensor::randn(0f32, 1f32, (4, 10), &device).unwrap();
    let im_2 = Tensor::randn(0f32, 1f32, (4, 10), &device).unwrap();
    resumed.forward(&im_1, &im_2, None, true).unwrap();
    assert_eq!(resumed.schedule().step(), 3);
    assert_eq!(resumed.queues().negatives().ptr(), 4);
}

#[test]
fn missing_checkpoint_is_storage_error() {
    let path = std::env::temp_dir().join("moby_checkpoint_does_not_exist.json");
    assert!(matches!(
        MobyState::load(&path),
        Err(moby::MobyError::Storage { .. })
    ));
}
