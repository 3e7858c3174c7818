//! End-to-end training step scenarios.

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use moby::{MlpEncoder, MlpEncoderConfig, Moby, MobyConfig, MobyError};

fn build(config: MobyConfig) -> Moby<MlpEncoder> {
    let encoder_config = MlpEncoderConfig {
        in_dim: 20,
        hidden_dim: 16,
        num_features: 16,
    };
    Moby::new(config, &Device::Cpu, |vb| MlpEncoder::new(&encoder_config, vb)).unwrap()
}

fn three_class_config() -> MobyConfig {
    MobyConfig {
        dataset_size: 50,
        batch_size: 5,
        total_epochs: 2,
        negative_capacity: 10,
        class_capacity: 4,
        class_negatives: 4,
        hidden_dim: 16,
        embed_dim: 8,
        num_classes: 3,
        ..MobyConfig::default()
    }
}

fn views(n: usize) -> (Tensor, Tensor) {
    let device = Device::Cpu;
    (
        Tensor::randn(0f32, 1f32, (n, 20), &device).unwrap(),
        Tensor::randn(0f32, 1f32, (n, 20), &device).unwrap(),
    )
}

/// 3 classes, per-class capacity 4, embed dim 8, labels [0,0,1,2,1].
#[test]
fn labeled_step_scenario() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("moby_learn=debug")
        .with_test_writer()
        .try_init();

    let mut model = build(three_class_config());
    let (im_1, im_2) = views(5);
    let labels = Tensor::new(&[0u32, 0, 1, 2, 1], &Device::Cpu).unwrap();

    let out = model.forward(&im_1, &im_2, Some(&labels), true).unwrap();

    assert_eq!(out.classes_present, 3);
    assert_eq!(model.queues().classes().ptrs(), vec![2, 2, 1]);
    assert_eq!(model.queues().negatives().ptr(), 5);
    let supervised = out.supervised.unwrap().to_scalar::<f32>().unwrap();
    assert!(supervised.is_finite() && supervised > 0.0);
}

/// The caller combines the loss terms and steps the optimizer.
#[test]
fn combined_loss_trains_end_to_end() {
    let mut model = build(three_class_config());
    let mut opt = AdamW::new(
        model.online_vars().all_vars(),
        ParamsAdamW {
            lr: 1e-3,
            ..ParamsAdamW::default()
        },
    )
    .unwrap();
    let labels = Tensor::new(&[0u32, 1, 2, 0, 1], &Device::Cpu).unwrap();

    for _ in 0..3 {
        let (im_1, im_2) = views(5);
        let out = model.forward(&im_1, &im_2, Some(&labels), true).unwrap();
        let supervised = out.supervised.unwrap();
        let total = (out.unsupervised + supervised).unwrap();
        opt.backward_step(&total).unwrap();
    }

    assert_eq!(model.schedule().step(), 3);
    assert_eq!(model.queues().classes().ptrs(), vec![2, 2, 3]);
    assert!(model.dual().parameter_distance().unwrap() > 0.0);
}

/// Batches of one class overflowing its queue leave the whole model untouched.
#[test]
fn class_overflow_rejected() {
    let mut model = build(three_class_config());
    let (im_1, im_2) = views(5);
    let labels = Tensor::new(&[1u32, 1, 1, 1, 1], &Device::Cpu).unwrap();
    let distance = model.dual().parameter_distance().unwrap();

    let err = model.forward(&im_1, &im_2, Some(&labels), true).unwrap_err();

    assert!(matches!(
        err,
        MobyError::ClassOverflow {
            class: 1,
            count: 5,
            capacity: 4
        }
    ));
    assert_eq!(model.queues().classes().ptrs(), vec![0, 0, 0]);
    assert_eq!(model.queues().negatives().ptr(), 0);
    assert_eq!(model.schedule().step(), 0);
    assert_eq!(model.dual().parameter_distance().unwrap(), distance);

    let labels = Tensor::new(&[1u32, 1, 0, 2, 2], &Device::Cpu).unwrap();
    model.forward(&im_1, &im_2, Some(&labels), true).unwrap();
    assert_eq!(model.schedule().step(), 1);
    assert_eq!(model.queues().classes().ptrs(), vec![1, 2, 2]);
}

/// Evaluation mode runs the same protocol with BatchNorm in inference mode.
#[test]
fn eval_mode_step() {
    let mut model = build(three_class_config());
    let (im_1, im_2) = views(5);
    let out = model.forward(&im_1, &im_2, None, false).unwrap();
    assert_eq!(out.loss_q.unwrap().dims(), &[5]);
}
