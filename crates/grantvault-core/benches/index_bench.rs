//! Benchmarks for grant index registration and lookup.
//!
//! Registration goes through the client multimap mutex; the concurrent
//! case shows where that lock starts to dominate.
//!
//! Run with: `cargo bench -p grantvault-core index`

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use grantvault_core::prelude::*;
use tokio::runtime::Runtime;

/// Creates `count` client credentials grants with one access token each,
/// spread over `clients` clients.
fn build_grants(
    rt: &Runtime,
    factory: &GrantFactory,
    count: usize,
    clients: usize,
) -> Vec<(Arc<Grant>, String)> {
    rt.block_on(async {
        let mut grants = Vec::with_capacity(count);
        for i in 0..count {
            let grant = factory
                .client_credentials_grant(Client::new(format!("client-{}", i % clients), "Bench"))
                .await
                .unwrap();
            let minted = grant.mint_access_token(None).await.unwrap().unwrap();
            grants.push((grant, minted.token.code().to_string()));
        }
        grants
    })
}

fn bench_register(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let services = GrantServices::new(GrantConfig::default());
    let factory = GrantFactory::new(services.clone(), GrantBackend::InMemory);
    let grants = build_grants(&rt, &factory, 1_000, 16);

    c.bench_function("index_register_sequential", |b| {
        b.iter(|| {
            let index = GrantIndex::new(&services);
            for (grant, _) in &grants {
                index.register(grant);
            }
            black_box(index.len())
        });
    });

    let services = &services;
    let grants = &grants;
    let mut group = c.benchmark_group("index_register_concurrent");
    for tasks in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.to_async(&rt).iter(|| async move {
                let index = Arc::new(GrantIndex::new(services));
                let chunk = grants.len() / tasks;
                let handles: Vec<_> = grants
                    .chunks(chunk)
                    .map(|chunk| {
                        let index = Arc::clone(&index);
                        let chunk: Vec<Arc<Grant>> =
                            chunk.iter().map(|(g, _)| Arc::clone(g)).collect();
                        tokio::spawn(async move {
                            for grant in &chunk {
                                index.register(grant);
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap();
                }
                black_box(index.len())
            });
        });
    }
    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let services = GrantServices::new(GrantConfig::default());
    let factory = GrantFactory::new(services.clone(), GrantBackend::InMemory);
    let grants = build_grants(&rt, &factory, 1_000, 16);
    let index = GrantIndex::new(&services);
    for (grant, _) in &grants {
        index.register(grant);
    }

    c.bench_function("index_resolve_access_token", |b| {
        let mut i = 0;
        b.iter(|| {
            let (_, code) = &grants[i % grants.len()];
            i += 1;
            black_box(index.resolve(TokenKind::AccessToken, code))
        });
    });
}

criterion_group!(benches, bench_register, bench_resolve);
criterion_main!(benches);
