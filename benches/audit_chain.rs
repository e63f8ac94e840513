//! Audit chain append/verify throughput.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

use warden::adapters::sqlite::{DatabaseConnection, SqliteAuditStore};
use warden::domain::models::{AuditDraft, AuditEvent};
use warden::services::AuditChain;

fn signing_key() -> Vec<u8> {
    vec![0x42u8; 32]
}

async fn fresh_chain() -> (DatabaseConnection, Arc<AuditChain>) {
    let db = DatabaseConnection::in_memory().await.unwrap();
    let chain = Arc::new(
        AuditChain::open(Arc::new(SqliteAuditStore::new(db.pool())), signing_key())
            .await
            .unwrap(),
    );
    (db, chain)
}

fn bench_append(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_db, chain) = rt.block_on(fresh_chain());

    c.bench_function("audit_append", |b| {
        b.to_async(&rt).iter(|| {
            let chain = Arc::clone(&chain);
            async move {
                chain
                    .record(AuditDraft::info(AuditEvent::TaskCreated, "bench entry"))
                    .await
                    .unwrap();
            }
        });
    });
}

fn bench_verify(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("audit_verify_1000", |b| {
        b.iter_batched(
            || {
                rt.block_on(async {
                    let (db, chain) = fresh_chain().await;
                    for i in 0..1_000 {
                        chain
                            .record(AuditDraft::info(
                                AuditEvent::TaskCreated,
                                format!("entry {i}"),
                            ))
                            .await
                            .unwrap();
                    }
                    (db, chain)
                })
            },
            |(_db, chain)| {
                rt.block_on(async move {
                    assert!(chain.verify().await.unwrap().ok);
                });
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_append, bench_verify);
criterion_main!(benches);
