use std::sync::Arc;
use std::time::Duration;

use coalbuf_journal::{
    FlushBuffer, FlushObserver, IoCompletion, JournalBufferConfig, TimedBuffer,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

const RECORD_SIZES: [usize; 3] = [64, 512, 4096];
const BUFFER_SIZE: usize = 512 * 1024;

/// Backend double that accepts batches and acknowledges immediately; the
/// bench measures the admission + coalescing path, not I/O.
struct SinkObserver;

impl FlushObserver for SinkObserver {
    fn remaining_bytes(&self) -> usize {
        usize::MAX / 2
    }

    fn flush_buffer(
        &self,
        buffer: FlushBuffer,
        _sync_requested: bool,
        callbacks: Vec<Box<dyn IoCompletion>>,
    ) {
        black_box(buffer.len());
        for callback in callbacks {
            callback.done();
        }
    }
}

struct NoopCompletion;

impl IoCompletion for NoopCompletion {
    fn done(&self) {}

    fn on_error(&self, _code: i32, _message: &str) {}
}

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    for record_size in RECORD_SIZES {
        let buffer = TimedBuffer::new(JournalBufferConfig::new(
            BUFFER_SIZE,
            Duration::from_micros(500),
        ));
        buffer.start().expect("buffer should start");
        buffer
            .set_observer(Some(Arc::new(SinkObserver) as Arc<dyn FlushObserver>))
            .expect("observer should attach");
        let payload = vec![0x6C_u8; record_size];

        group.throughput(Throughput::Bytes(record_size as u64));
        group.bench_with_input(
            BenchmarkId::new("check_then_add", record_size),
            &payload,
            |b, payload| {
                b.iter(|| {
                    let admitted = buffer
                        .check_size(payload.len())
                        .expect("admission should not fail");
                    assert!(admitted);
                    buffer
                        .add_bytes(payload, false, Box::new(NoopCompletion))
                        .expect("commit should succeed");
                });
            },
        );

        buffer.stop().expect("buffer should stop");
    }
    group.finish();
}

criterion_group!(benches, bench_admission);
criterion_main!(benches);
