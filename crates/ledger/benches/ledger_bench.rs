use criterion::{Criterion, criterion_group, criterion_main};
use ledger::{CompensationLedger, InMemoryLedger, ParticipantId, TransactionId};

fn snapshot() -> serde_json::Value {
    serde_json::json!({
        "id": "42",
        "eventId": "00000000-0000-0000-0000-000000000001",
        "publishingDate": "2024-01-01T00:00:00Z"
    })
}

fn bench_append_single_entry(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let participant = ParticipantId::new("job");

    c.bench_function("ledger/append_single_entry", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = InMemoryLedger::new();
                ledger
                    .append(&participant, &TransactionId::new(), "create", "42", snapshot())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_10_then_read(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let participant = ParticipantId::new("job");

    c.bench_function("ledger/append_10_then_read", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = InMemoryLedger::new();
                let tx = TransactionId::new();
                for _ in 0..10 {
                    ledger
                        .append(&participant, &tx, "update", "42", snapshot())
                        .await
                        .unwrap();
                }
                let entries = ledger.entries_for(&participant, &tx).await.unwrap();
                assert_eq!(entries.len(), 10);
            });
        });
    });
}

fn bench_remove(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let participant = ParticipantId::new("job");

    c.bench_function("ledger/append_and_remove", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = InMemoryLedger::new();
                let tx = TransactionId::new();
                ledger
                    .append(&participant, &tx, "create", "42", snapshot())
                    .await
                    .unwrap();
                ledger.remove(&participant, &tx).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_entry,
    bench_append_10_then_read,
    bench_remove
);
criterion_main!(benches);
