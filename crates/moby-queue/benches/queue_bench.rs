use candle_core::{Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use moby_queue::{ClassQueueBank, NegativeQueue};

fn bench_negative_enqueue(c: &mut Criterion) {
    let device = Device::Cpu;
    let mut queue = NegativeQueue::new(128, 4096, &device).unwrap();
    let keys = Tensor::randn(0f32, 1f32, (256, 128), &device).unwrap();
    c.bench_function("NegativeQueue::enqueue (4096×128, batch 256)", |b| {
        b.iter(|| queue.enqueue(black_box(&keys), black_box(&keys)).unwrap())
    });
}

fn bench_class_enqueue(c: &mut Criterion) {
    let device = Device::Cpu;
    let mut bank = ClassQueueBank::new(10, 128, 128, &device).unwrap();
    let keys = Tensor::randn(0f32, 1f32, (256, 128), &device).unwrap();
    let labels: Vec<u32> = (0..256).map(|i| (i * 7 % 10) as u32).collect();
    c.bench_function("ClassQueueBank::enqueue (10 classes, batch 256)", |b| {
        b.iter(|| bank.enqueue(black_box(&keys), black_box(&keys), &labels).unwrap())
    });
}

fn bench_class_negatives(c: &mut Criterion) {
    let device = Device::Cpu;
    let bank = ClassQueueBank::new(10, 128, 128, &device).unwrap();
    c.bench_function("ClassQueueBank::negatives_for (9×128)", |b| {
        b.iter(|| bank.negatives_for(black_box(3), 128).unwrap())
    });
}

criterion_group!(
    benches,
    bench_negative_enqueue,
    bench_class_enqueue,
    bench_class_negatives
);
criterion_main!(benches);
