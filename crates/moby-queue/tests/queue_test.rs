//! Integration tests for the queue bank: long-running pointer behavior and
//! JSON checkpoints.

use candle_core::{Device, Tensor};
use moby_core::MobyConfig;
use moby_queue::{QueueBank, QueueBankState};

fn config() -> MobyConfig {
    MobyConfig {
        batch_size: 4,
        negative_capacity: 12,
        class_capacity: 5,
        embed_dim: 6,
        num_classes: 4,
        ..MobyConfig::default()
    }
}

fn keys(n: usize) -> Tensor {
    Tensor::randn(0f32, 1f32, (n, 6), &Device::Cpu).unwrap()
}

/// Pointers stay in range over many labeled steps and every class
/// pointer equals its running write count modulo capacity.
#[test]
fn pointers_track_write_counts() {
    let mut bank = QueueBank::from_config(&config(), &Device::Cpu).unwrap();
    let mut totals = [0usize; 4];

    for step in 0..25u32 {
        let labels: Vec<u32> = (0..4).map(|i| (step * 3 + i * i) % 4).collect();
        let k = keys(4);
        let counts = bank.enqueue(&k, &k, Some(&labels)).unwrap().unwrap();
        assert_eq!(counts.iter().sum::<usize>(), 4);
        for (total, count) in totals.iter_mut().zip(&counts) {
            *total += count;
        }

        let ptrs = bank.classes().ptrs();
        for (ptr, total) in ptrs.iter().zip(&totals) {
            assert_eq!(*ptr, total % 5);
        }
        assert_eq!(bank.negatives().ptr(), ((step as usize + 1) * 4) % 12);
    }
}

/// Checkpoint written to disk restores the exact bank.
#[test]
fn json_checkpoint_round_trip() {
    let device = Device::Cpu;
    let mut bank = QueueBank::from_config(&config(), &device).unwrap();
    let k = keys(4);
    bank.enqueue(&k, &k, Some(&[3, 3, 1, 0])).unwrap();

    let path = std::env::temp_dir().join(format!("moby_queue_bank_{}.json", std::process::id()));
    let state = bank.snapshot().unwrap();
    state.save(&path).unwrap();
    let loaded = QueueBankState::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(loaded, state);
    let restored = QueueBank::restore(&loaded, &device).unwrap();
    assert_eq!(restored.classes().ptrs(), vec![1, 1, 0, 2]);
    assert_eq!(restored.negatives().ptr(), 4);
    assert_eq!(
        restored.negatives().queue1().to_vec2::<f32>().unwrap(),
        bank.negatives().queue1().to_vec2::<f32>().unwrap()
    );
}

/// A corrupt checkpoint is rejected rather than partially restored.
#[test]
fn corrupt_checkpoint_rejected() {
    let device = Device::Cpu;
    let bank = QueueBank::from_config(&config(), &device).unwrap();
    let mut state = bank.snapshot().unwrap();
    state.classes[2].ptr = 5;
    assert!(QueueBank::restore(&state, &device).is_err());

    let mut state = bank.snapshot().unwrap();
    state.queue2.data.pop();
    assert!(QueueBank::restore(&state, &device).is_err());
}
