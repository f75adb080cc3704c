use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use chunkmill::chunk::Chunk;
use chunkmill::config;
use chunkmill::engine::Engine;

fn bench_config(workers: usize) -> config::Config {
    let mut cfg = config::load_config(None).expect("config").config;
    cfg.run_id = "bench".to_string();
    cfg.workers = workers;
    cfg.min_chunk_kib = 64;
    cfg.max_chunk_kib = 1024;
    cfg
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");

    for size in [8 * 1024 * 1024usize, 32 * 1024 * 1024usize] {
        let engine: Engine<u64> = Engine::new(bench_config(4)).expect("engine");
        let data = vec![0u8; size];
        group.bench_with_input(BenchmarkId::new("byte_count", size), &size, |b, _| {
            b.iter(|| {
                let report = engine
                    .process_bytes(data.clone(), |chunk: &Chunk| Ok(chunk.len() as u64))
                    .expect("process");
                assert_eq!(report.results.iter().sum::<u64>(), size as u64);
            });
        });
    }

    group.bench_function("word_count_8mib", |b| {
        let engine: Engine<u64> = Engine::new(bench_config(4)).expect("engine");
        let text = "lorem ipsum dolor sit amet ".repeat(8 * 1024 * 1024 / 27);
        b.iter(|| {
            let report = engine
                .process_text(&text, |fragment: &str| {
                    Ok(fragment.split_whitespace().count() as u64)
                })
                .expect("process");
            assert!(!report.results.is_empty());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
