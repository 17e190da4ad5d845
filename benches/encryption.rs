#![allow(clippy::unseparated_literal_suffix)]

use keybarrier::barrier::Barrier;
use keybarrier::key::{KeyGenerator, RandomKeyGenerator};
use keybarrier::repository::InMemoryRepository;
use keybarrier::unseal::SimpleUnsealService;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

async fn encrypt_decrypt(
    barrier: &Barrier,
    data_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = vec![1u8; data_size];

    let encrypted = barrier.encrypt_content(&data).await?;
    let decrypted = barrier.decrypt_content(&encrypted.envelope).await?;

    assert_eq!(data, decrypted);
    Ok(())
}

fn encrypt_decrypt_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let barrier = rt.block_on(async {
        let unseal_key = RandomKeyGenerator::new().generate_key().unwrap();
        let unseal = Arc::new(SimpleUnsealService::new(vec![unseal_key]).unwrap());
        let repository = Arc::new(InMemoryRepository::new());

        Barrier::builder()
            .with_unseal(unseal)
            .with_repository(repository)
            .build()
            .await
            .unwrap()
    });

    let mut group = c.benchmark_group("barrier_encrypt_decrypt");
    group.measurement_time(Duration::from_secs(10));

    for size in [64, 1024, 64 * 1024, 1024 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt)
                .iter(|| async { encrypt_decrypt(&barrier, size).await.unwrap() });
        });
    }

    group.finish();
}

criterion_group!(benches, encrypt_decrypt_benchmark);
criterion_main!(benches);
