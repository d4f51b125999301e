//! Document store benchmarks.
//!
//! Run with: cargo bench --bench documents

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use krapi_store::types::{ListOptions, OrderDirection, SearchOptions};
use krapi_store::{Store, StoreConfig};
use serde_json::json;
use tokio::runtime::Runtime;

fn create_runtime() -> Runtime {
  tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap()
}

fn seeded_store(rt: &Runtime, docs: usize) -> Store {
  rt.block_on(async {
    let mut config = StoreConfig::default();
    config.storage.in_memory = true;
    let store = Store::open(config).await.unwrap();
    store
      .collections
      .create_collection("bench", "tasks", json!({}))
      .await
      .unwrap();
    for i in 0..docs {
      store
        .documents
        .create(
          "bench",
          "tasks",
          json!({
            "title": format!("task {}", i),
            "priority": i % 10,
            "status": if i % 3 == 0 { "open" } else { "closed" },
            "owner": {"name": format!("user{}", i % 7)}
          }),
          None,
        )
        .await
        .unwrap();
    }
    store
  })
}

fn bench_create(c: &mut Criterion) {
  let rt = create_runtime();
  let store = seeded_store(&rt, 0);

  let mut group = c.benchmark_group("create");
  group.throughput(Throughput::Elements(1));
  group.bench_function("small_document", |b| {
    b.iter(|| {
      rt.block_on(async {
        black_box(
          store
            .documents
            .create("bench", "tasks", json!({"title": "x", "priority": 1}), None)
            .await
            .unwrap(),
        );
      });
    });
  });
  group.finish();
}

fn bench_list(c: &mut Criterion) {
  let rt = create_runtime();
  let mut group = c.benchmark_group("list");

  for size in [100, 1_000, 10_000] {
    let store = seeded_store(&rt, size);

    group.bench_with_input(BenchmarkId::new("default_page", size), &size, |b, _| {
      b.iter(|| {
        rt.block_on(async {
          black_box(
            store
              .documents
              .list("bench", "tasks", &ListOptions::default())
              .await
              .unwrap(),
          );
        });
      });
    });

    let filtered = ListOptions::page(50, 0)
      .order_by("priority", OrderDirection::Asc)
      .filter("status", json!("open"));
    group.bench_with_input(BenchmarkId::new("filtered_numeric_order", size), &size, |b, _| {
      b.iter(|| {
        rt.block_on(async {
          black_box(store.documents.list("bench", "tasks", &filtered).await.unwrap());
        });
      });
    });
  }
  group.finish();
}

fn bench_search(c: &mut Criterion) {
  let rt = create_runtime();
  let store = seeded_store(&rt, 1_000);
  let fields = vec!["title".to_string()];

  let mut group = c.benchmark_group("search");
  group.bench_function("field", |b| {
    b.iter(|| {
      rt.block_on(async {
        black_box(
          store
            .documents
            .search("bench", "tasks", "task 9", &fields, SearchOptions::default())
            .await
            .unwrap(),
        );
      });
    });
  });
  group.bench_function("whole_document", |b| {
    b.iter(|| {
      rt.block_on(async {
        black_box(
          store
            .documents
            .search("bench", "tasks", "user3", &[], SearchOptions::default())
            .await
            .unwrap(),
        );
      });
    });
  });
  group.finish();
}

fn bench_resolve(c: &mut Criterion) {
  let rt = create_runtime();
  let store = seeded_store(&rt, 0);

  let mut group = c.benchmark_group("resolve");
  for input in ["tasks", "TASKS", "ta%73ks"] {
    group.bench_with_input(BenchmarkId::from_parameter(input), &input, |b, input| {
      b.iter(|| {
        rt.block_on(async {
          black_box(
            store
              .collections
              .resolve("bench", input, krapi_store::Operation::Get)
              .await
              .unwrap(),
          );
        });
      });
    });
  }
  group.finish();
}

criterion_group!(benches, bench_create, bench_list, bench_search, bench_resolve);
criterion_main!(benches);
