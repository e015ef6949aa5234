use audiopipe::{
    ClockModel, ControlMessage, ControlQueue, EventKind, FifoBuffer, RegionConfig, TwoSlotPublisher,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::{sync::Arc, thread};

const FRAME: usize = 4; // stereo i16

fn benchmark_fifo_burst_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("Fifo_BurstTransfer");

    for burst in [64u32, 192, 960].iter() {
        group.throughput(Throughput::Elements(*burst as u64));
        group.bench_with_input(BenchmarkId::new("write_read", burst), burst, |b, &burst| {
            let fifo = FifoBuffer::allocate(RegionConfig::new("bench_fifo", 0), burst * 4, FRAME).unwrap();
            let src = vec![0x5au8; burst as usize * FRAME];
            let mut dst = vec![0u8; burst as usize * FRAME];

            b.iter(|| {
                fifo.write(&src, burst);
                fifo.read(&mut dst, burst);
            });
        });
    }

    group.finish();
}

fn benchmark_fifo_wrap(c: &mut Criterion) {
    let mut group = c.benchmark_group("Fifo_Wrap");

    // Odd sizes force a split copy on most iterations
    group.bench_function("split_copies", |b| {
        let fifo = FifoBuffer::allocate(RegionConfig::new("bench_wrap", 0), 1000, FRAME).unwrap();
        let src = vec![1u8; 333 * FRAME];
        let mut dst = vec![0u8; 333 * FRAME];
        b.iter(|| {
            fifo.write(&src, 333);
            fifo.read(&mut dst, 333);
        });
    });

    group.bench_function("zeros_and_discard", |b| {
        let fifo = FifoBuffer::allocate(RegionConfig::new("bench_zeros", 0), 1024, FRAME).unwrap();
        b.iter(|| {
            fifo.write_zeros(512);
            fifo.discard(512);
        });
    });

    group.finish();
}

fn benchmark_fifo_cross_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("Fifo_CrossThread");
    let total = 48_000u32;
    group.throughput(Throughput::Elements(total as u64));

    group.bench_function("spsc_one_second_of_frames", |b| {
        b.iter(|| {
            let fifo = Arc::new(FifoBuffer::allocate(RegionConfig::new("bench_spsc", 0), 768, FRAME).unwrap());
            let producer = fifo.clone();
            let writer = thread::spawn(move || {
                let src = vec![0u8; 192 * FRAME];
                let mut sent = 0;
                while sent < total {
                    sent += producer.write(&src, 192u32.min(total - sent));
                }
            });

            let mut dst = vec![0u8; 192 * FRAME];
            let mut received = 0;
            while received < total {
                received += fifo.read(&mut dst, 192);
            }
            writer.join().unwrap();
        });
    });

    group.finish();
}

fn benchmark_control_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("ControlQueue");
    group.throughput(Throughput::Elements(64));

    group.bench_function("write_read_64_events", |b| {
        let queue = ControlQueue::allocate(RegionConfig::new("bench_queue", 0)).unwrap();
        let message = ControlMessage::event(EventKind::Xrun);
        b.iter(|| {
            for _ in 0..64 {
                queue.write(&message).unwrap();
            }
            while queue.read().unwrap().is_some() {}
        });
    });

    group.finish();
}

fn benchmark_timing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Timing");

    group.bench_function("clock_model_convert", |b| {
        let mut model = ClockModel::new(48_000, 192);
        model.start(0);
        model.process_timestamp(0, 0);
        let mut position = 0i64;
        b.iter(|| {
            position += 192;
            model.convert_position_to_time(position)
        });
    });

    group.bench_function("two_slot_publish_read", |b| {
        let publisher = TwoSlotPublisher::new();
        let mut value = 0i64;
        b.iter(|| {
            value += 1;
            publisher.write((value, value * 4000));
            publisher.read()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_fifo_burst_transfer,
    benchmark_fifo_wrap,
    benchmark_fifo_cross_thread,
    benchmark_control_queue,
    benchmark_timing
);
criterion_main!(benches);
