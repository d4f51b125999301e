//! Document store tests - CRUD, isolation, filtering, ordering, pagination, search

use std::collections::HashSet;

use krapi_store::types::{ListOptions, OrderDirection, SearchOptions};
use krapi_store::{Operation, Store, StoreConfig, StoreError};
use serde_json::json;
use uuid::Uuid;

async fn store_with(collections: &[(&str, &str)]) -> Store {
  let mut config = StoreConfig::default();
  config.storage.in_memory = true;
  let store = Store::open(config).await.unwrap();
  for (project, name) in collections {
    store
      .collections
      .create_collection(project, name, json!({}))
      .await
      .unwrap();
  }
  store
}

fn titles(page: &[krapi_store::types::Document]) -> Vec<String> {
  page
    .iter()
    .map(|d| d.data["title"].as_str().unwrap_or_default().to_string())
    .collect()
}

// =============================================================================
// Create / Get
// =============================================================================

#[tokio::test]
async fn test_create_and_get() {
  let store = store_with(&[("p1", "tasks")]).await;
  let doc = store
    .documents
    .create("p1", "tasks", json!({"title": "A", "tags": ["x"]}), None)
    .await
    .unwrap();

  assert!(!doc.id.is_nil());
  assert_eq!(doc.project_id, "p1");
  assert_eq!(doc.created_by, "system");
  assert_eq!(doc.updated_by, "system");
  assert_eq!(doc.created_at, doc.updated_at);

  let fetched = store.documents.get("p1", "tasks", doc.id).await.unwrap().unwrap();
  assert_eq!(fetched, doc);
}

#[tokio::test]
async fn test_create_records_author() {
  let store = store_with(&[("p1", "tasks")]).await;
  let doc = store
    .documents
    .create("p1", "tasks", json!({"title": "A"}), Some("alice"))
    .await
    .unwrap();
  assert_eq!(doc.created_by, "alice");
  assert_eq!(doc.updated_by, "alice");
}

#[tokio::test]
async fn test_create_in_missing_collection_fails() {
  let store = store_with(&[("p1", "notes")]).await;
  let err = store
    .documents
    .create("p1", "tasks", json!({"title": "A"}), None)
    .await
    .unwrap_err();
  match err {
    StoreError::CollectionNotFound {
      operation, available, ..
    } => {
      assert_eq!(operation, Operation::Create);
      assert_eq!(available, vec!["notes".to_string()]);
    }
    other => panic!("unexpected error: {other}"),
  }
}

#[tokio::test]
async fn test_create_rejects_non_objects() {
  let store = store_with(&[("p1", "tasks")]).await;
  for data in [json!([1, 2]), json!("text"), json!(null), json!(3)] {
    let err = store
      .documents
      .create("p1", "tasks", data, None)
      .await
      .unwrap_err();
    match err {
      StoreError::Document {
        project_id,
        collection,
        operation,
        source,
      } => {
        assert_eq!(project_id, "p1");
        assert_eq!(collection, "tasks");
        assert_eq!(operation, Operation::Create);
        assert!(matches!(*source, StoreError::InvalidDocument(_)));
      }
      other => panic!("unexpected error: {other}"),
    }
  }
  assert_eq!(store.documents.count("p1", "tasks").await.unwrap(), 0);
}

#[tokio::test]
async fn test_get_missing_collection_or_document_is_none() {
  let store = store_with(&[("p1", "tasks")]).await;
  let doc = store
    .documents
    .create("p1", "tasks", json!({"title": "A"}), None)
    .await
    .unwrap();

  assert!(store.documents.get("p1", "nope", doc.id).await.unwrap().is_none());
  assert!(store
    .documents
    .get("p1", "tasks", Uuid::new_v4())
    .await
    .unwrap()
    .is_none());
}

// =============================================================================
// Tenant isolation and canonical names
// =============================================================================

#[tokio::test]
async fn test_tenant_isolation() {
  let store = store_with(&[("p1", "tasks"), ("p2", "tasks")]).await;
  let doc = store
    .documents
    .create("p1", "tasks", json!({"title": "secret"}), None)
    .await
    .unwrap();

  assert!(store.documents.get("p2", "tasks", doc.id).await.unwrap().is_none());
  assert_eq!(store.documents.count("p2", "tasks").await.unwrap(), 0);
  let page = store
    .documents
    .list("p2", "tasks", &ListOptions::default())
    .await
    .unwrap();
  assert_eq!(page.total, 0);
  assert!(store
    .documents
    .search("p2", "tasks", "secret", &[], SearchOptions::default())
    .await
    .unwrap()
    .is_empty());
  assert!(!store.documents.delete("p2", "tasks", doc.id).await.unwrap());
  assert!(store
    .documents
    .update("p2", "tasks", doc.id, json!({"title": "hijack"}), None)
    .await
    .unwrap()
    .is_none());

  let still = store.documents.get("p1", "tasks", doc.id).await.unwrap().unwrap();
  assert_eq!(still.data["title"], "secret");
}

#[tokio::test]
async fn test_operations_use_canonical_collection() {
  let store = store_with(&[("p1", "Tasks")]).await;
  let canonical = store
    .collections
    .resolve("p1", "Tasks", Operation::Get)
    .await
    .unwrap();

  let doc = store
    .documents
    .create("p1", "TASKS", json!({"title": "A"}), None)
    .await
    .unwrap();
  assert_eq!(doc.collection_id, canonical.id);

  assert!(store.documents.get("p1", "tasks", doc.id).await.unwrap().is_some());
  assert!(store.documents.get("p1", "%54asks", doc.id).await.unwrap().is_some());
  assert_eq!(store.documents.count("p1", " tasks ").await.unwrap(), 1);
  assert_eq!(
    store
      .documents
      .count("p1", &canonical.id.to_string())
      .await
      .unwrap(),
    1
  );
}

// =============================================================================
// Update / Delete
// =============================================================================

#[tokio::test]
async fn test_double_update_bumps_updated_at() {
  let store = store_with(&[("p1", "tasks")]).await;
  let doc = store
    .documents
    .create("p1", "tasks", json!({"title": "A"}), None)
    .await
    .unwrap();

  let data = json!({"title": "B", "done": true});
  let first = store
    .documents
    .update("p1", "tasks", doc.id, data.clone(), Some("bob"))
    .await
    .unwrap()
    .unwrap();
  let second = store
    .documents
    .update("p1", "tasks", doc.id, data.clone(), Some("bob"))
    .await
    .unwrap()
    .unwrap();

  assert_eq!(first.data, data);
  assert_eq!(second.data, data);
  assert!(first.updated_at > doc.updated_at);
  assert!(second.updated_at > first.updated_at);
  assert_eq!(second.created_at, doc.created_at);
  assert_eq!(second.created_by, "system");
  assert_eq!(second.updated_by, "bob");
}

#[tokio::test]
async fn test_update_replaces_whole_document() {
  let store = store_with(&[("p1", "tasks")]).await;
  let doc = store
    .documents
    .create("p1", "tasks", json!({"title": "A", "priority": 1}), None)
    .await
    .unwrap();
  let updated = store
    .documents
    .update("p1", "tasks", doc.id, json!({"title": "A2"}), None)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(updated.data, json!({"title": "A2"}));
}

#[tokio::test]
async fn test_update_missing_document_is_none() {
  let store = store_with(&[("p1", "tasks")]).await;
  let result = store
    .documents
    .update("p1", "tasks", Uuid::new_v4(), json!({"x": 1}), None)
    .await
    .unwrap();
  assert!(result.is_none());
}

#[tokio::test]
async fn test_update_missing_collection_fails() {
  let store = store_with(&[("p1", "tasks")]).await;
  let err = store
    .documents
    .update("p1", "nope", Uuid::new_v4(), json!({"x": 1}), None)
    .await
    .unwrap_err();
  assert!(err.is_collection_not_found());
}

#[tokio::test]
async fn test_delete_twice() {
  let store = store_with(&[("p1", "tasks")]).await;
  let doc = store
    .documents
    .create("p1", "tasks", json!({"title": "A"}), None)
    .await
    .unwrap();

  assert!(store.documents.delete("p1", "tasks", doc.id).await.unwrap());
  assert!(!store.documents.delete("p1", "tasks", doc.id).await.unwrap());
  assert!(!store.documents.delete("p1", "nope", doc.id).await.unwrap());
  assert!(store.documents.get("p1", "tasks", doc.id).await.unwrap().is_none());
}

// =============================================================================
// List: paging, ordering, filters
// =============================================================================

#[tokio::test]
async fn test_tasks_scenario() {
  let store = store_with(&[("p1", "tasks")]).await;
  store
    .documents
    .create("p1", "tasks", json!({"title": "A"}), None)
    .await
    .unwrap();
  store
    .documents
    .create("p1", "tasks", json!({"title": "B"}), None)
    .await
    .unwrap();

  let first = store
    .documents
    .list(
      "p1",
      "tasks",
      &ListOptions::page(1, 0).order_by("created_at", OrderDirection::Desc),
    )
    .await
    .unwrap();
  assert_eq!(titles(&first.documents), vec!["B"]);
  assert_eq!(first.total, 2);

  let second = store
    .documents
    .list("p1", "tasks", &ListOptions::page(1, 1))
    .await
    .unwrap();
  assert_eq!(titles(&second.documents), vec!["A"]);
  assert_eq!(second.total, 2);
}

#[tokio::test]
async fn test_pagination_covers_every_document_once() {
  let store = store_with(&[("p1", "tasks")]).await;
  let mut created = HashSet::new();
  for i in 0..25 {
    let doc = store
      .documents
      .create("p1", "tasks", json!({"n": i}), None)
      .await
      .unwrap();
    created.insert(doc.id);
  }

  let mut seen = Vec::new();
  let mut offset = 0;
  loop {
    let page = store
      .documents
      .list("p1", "tasks", &ListOptions::page(10, offset))
      .await
      .unwrap();
    assert_eq!(page.total, 25);
    if page.documents.is_empty() {
      break;
    }
    seen.extend(page.documents.iter().map(|d| d.id));
    offset += 10;
  }

  assert_eq!(seen.len(), 25);
  assert_eq!(seen.iter().copied().collect::<HashSet<_>>(), created);
}

#[tokio::test]
async fn test_offset_past_the_end_is_empty() {
  let store = store_with(&[("p1", "tasks")]).await;
  for i in 0..3 {
    store
      .documents
      .create("p1", "tasks", json!({"title": format!("t{}", i)}), None)
      .await
      .unwrap();
  }

  for offset in [3, usize::MAX / 2, usize::MAX] {
    let page = store
      .documents
      .list("p1", "tasks", &ListOptions::page(10, offset))
      .await
      .unwrap();
    assert!(page.documents.is_empty(), "offset {offset}");
    assert_eq!(page.total, 3);

    let hits = store
      .documents
      .search("p1", "tasks", "t", &[], SearchOptions { limit: 10, offset })
      .await
      .unwrap();
    assert!(hits.is_empty(), "offset {offset}");
  }
}

#[tokio::test]
async fn test_numeric_ordering() {
  let store = store_with(&[("p1", "tasks")]).await;
  for p in [10, 2, 1] {
    store
      .documents
      .create("p1", "tasks", json!({"priority": p}), None)
      .await
      .unwrap();
  }

  let page = store
    .documents
    .list(
      "p1",
      "tasks",
      &ListOptions::default().order_by("priority", OrderDirection::Asc),
    )
    .await
    .unwrap();
  let order: Vec<i64> = page
    .documents
    .iter()
    .map(|d| d.data["priority"].as_i64().unwrap())
    .collect();
  assert_eq!(order, vec![1, 2, 10]);

  let page = store
    .documents
    .list(
      "p1",
      "tasks",
      &ListOptions::default().order_by("priority", OrderDirection::Desc),
    )
    .await
    .unwrap();
  let order: Vec<i64> = page
    .documents
    .iter()
    .map(|d| d.data["priority"].as_i64().unwrap())
    .collect();
  assert_eq!(order, vec![10, 2, 1]);
}

#[tokio::test]
async fn test_text_field_ordering() {
  let store = store_with(&[("p1", "tasks")]).await;
  for title in ["b", "c", "a"] {
    store
      .documents
      .create("p1", "tasks", json!({"title": title}), None)
      .await
      .unwrap();
  }

  let page = store
    .documents
    .list(
      "p1",
      "tasks",
      &ListOptions::default().order_by("title", OrderDirection::Asc),
    )
    .await
    .unwrap();
  assert_eq!(titles(&page.documents), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_keys_with_dashes_and_spaces() {
  let store = store_with(&[("p1", "people")]).await;
  for (name, due, team) in [
    ("Ada", "2024-03-01", "core"),
    ("Bob", "2024-01-15", "web"),
    ("Cy", "2024-02-10", "core"),
  ] {
    store
      .documents
      .create(
        "p1",
        "people",
        json!({"title": name, "first-name": name, "due date": due, "team info": {"team-name": team}}),
        None,
      )
      .await
      .unwrap();
  }

  let page = store
    .documents
    .list(
      "p1",
      "people",
      &ListOptions::default().filter("first-name", json!("Bob")),
    )
    .await
    .unwrap();
  assert_eq!(titles(&page.documents), vec!["Bob"]);

  let page = store
    .documents
    .list(
      "p1",
      "people",
      &ListOptions::default()
        .filter("team info.team-name", json!("core"))
        .order_by("due date", OrderDirection::Asc),
    )
    .await
    .unwrap();
  assert_eq!(page.total, 2);
  assert_eq!(titles(&page.documents), vec!["Cy", "Ada"]);

  let hits = store
    .documents
    .search("p1", "people", "2024-01", &["due date".to_string()], SearchOptions::default())
    .await
    .unwrap();
  assert_eq!(titles(&hits), vec!["Bob"]);
}

#[tokio::test]
async fn test_default_order_is_newest_first() {
  let store = store_with(&[("p1", "tasks")]).await;
  for title in ["first", "second", "third"] {
    store
      .documents
      .create("p1", "tasks", json!({"title": title}), None)
      .await
      .unwrap();
  }
  let page = store
    .documents
    .list("p1", "tasks", &ListOptions::default())
    .await
    .unwrap();
  assert_eq!(titles(&page.documents), vec!["third", "second", "first"]);
}

#[tokio::test]
async fn test_where_filters_and_total() {
  let store = store_with(&[("p1", "tasks")]).await;
  let rows = [
    json!({"title": "a", "status": "open", "done": false, "owner": {"name": "ann"}}),
    json!({"title": "b", "status": "open", "done": true, "owner": {"name": "bob"}}),
    json!({"title": "c", "status": "closed", "done": true, "owner": {"name": "ann"}}),
  ];
  for row in rows {
    store.documents.create("p1", "tasks", row, None).await.unwrap();
  }

  let open = store
    .documents
    .list(
      "p1",
      "tasks",
      &ListOptions::page(1, 0)
        .order_by("title", OrderDirection::Asc)
        .filter("status", json!("open")),
    )
    .await
    .unwrap();
  assert_eq!(open.total, 2);
  assert_eq!(titles(&open.documents), vec!["a"]);

  let anns_done = store
    .documents
    .list(
      "p1",
      "tasks",
      &ListOptions::default()
        .filter("owner.name", json!("ann"))
        .filter("done", json!(true)),
    )
    .await
    .unwrap();
  assert_eq!(titles(&anns_done.documents), vec!["c"]);

  let none = store
    .documents
    .list(
      "p1",
      "tasks",
      &ListOptions::default().filter("status", json!("archived")),
    )
    .await
    .unwrap();
  assert_eq!(none.total, 0);
}

#[tokio::test]
async fn test_filter_values_are_not_sql() {
  let store = store_with(&[("p1", "tasks")]).await;
  store
    .documents
    .create("p1", "tasks", json!({"status": "open"}), None)
    .await
    .unwrap();

  let page = store
    .documents
    .list(
      "p1",
      "tasks",
      &ListOptions::default().filter("status", json!("x' OR '1'='1")),
    )
    .await
    .unwrap();
  assert_eq!(page.total, 0);

  // Keys are bound inside a quoted JSON path, never spliced into SQL
  let page = store
    .documents
    .list(
      "p1",
      "tasks",
      &ListOptions::default().filter("status') OR 1=1 --", json!("open")),
    )
    .await
    .unwrap();
  assert_eq!(page.total, 0);

  let err = store
    .documents
    .list(
      "p1",
      "tasks",
      &ListOptions::default().filter("status\" OR 1=1 --", json!(1)),
    )
    .await
    .unwrap_err();
  match err {
    StoreError::Document { source, .. } => {
      assert!(matches!(*source, StoreError::InvalidIdentifier(_)))
    }
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(store.documents.count("p1", "tasks").await.unwrap(), 1);
}

#[tokio::test]
async fn test_list_limit_is_capped() {
  let store = store_with(&[("p1", "tasks")]).await;
  let err = store
    .documents
    .list("p1", "tasks", &ListOptions::page(1001, 0))
    .await
    .unwrap_err();
  assert!(matches!(err, StoreError::Document { operation: Operation::List, .. }));
}

#[tokio::test]
async fn test_list_missing_collection_is_empty() {
  let store = store_with(&[("p1", "tasks")]).await;
  let page = store
    .documents
    .list("p1", "nope", &ListOptions::default())
    .await
    .unwrap();
  assert!(page.documents.is_empty());
  assert_eq!(page.total, 0);
}

// =============================================================================
// Search / Count
// =============================================================================

#[tokio::test]
async fn test_search_fields_and_whole_document() {
  let store = store_with(&[("p1", "notes")]).await;
  for (title, body) in [
    ("Shopping list", "milk and eggs"),
    ("Meeting", "discuss the shopping budget"),
    ("Ideas", "write more tests"),
  ] {
    store
      .documents
      .create("p1", "notes", json!({"title": title, "body": body}), None)
      .await
      .unwrap();
  }

  let by_title = store
    .documents
    .search("p1", "notes", "shopping", &["title".to_string()], SearchOptions::default())
    .await
    .unwrap();
  assert_eq!(titles(&by_title), vec!["Shopping list"]);

  let by_either = store
    .documents
    .search(
      "p1",
      "notes",
      "SHOPPING",
      &["title".to_string(), "body".to_string()],
      SearchOptions::default(),
    )
    .await
    .unwrap();
  // Newest first
  assert_eq!(titles(&by_either), vec!["Meeting", "Shopping list"]);

  let anywhere = store
    .documents
    .search("p1", "notes", "tests", &[], SearchOptions::default())
    .await
    .unwrap();
  assert_eq!(titles(&anywhere), vec!["Ideas"]);

  let paged = store
    .documents
    .search(
      "p1",
      "notes",
      "e",
      &["body".to_string()],
      SearchOptions { limit: 1, offset: 1 },
    )
    .await
    .unwrap();
  assert_eq!(titles(&paged), vec!["Meeting"]);
}

#[tokio::test]
async fn test_search_wildcards_are_literal() {
  let store = store_with(&[("p1", "notes")]).await;
  store
    .documents
    .create("p1", "notes", json!({"title": "100% done"}), None)
    .await
    .unwrap();
  store
    .documents
    .create("p1", "notes", json!({"title": "1000 items"}), None)
    .await
    .unwrap();

  let hits = store
    .documents
    .search("p1", "notes", "100%", &["title".to_string()], SearchOptions::default())
    .await
    .unwrap();
  assert_eq!(titles(&hits), vec!["100% done"]);

  let none = store
    .documents
    .search("p1", "notes", "_", &["title".to_string()], SearchOptions::default())
    .await
    .unwrap();
  assert!(none.is_empty());
}

#[tokio::test]
async fn test_search_missing_collection_is_empty() {
  let store = store_with(&[("p1", "notes")]).await;
  let hits = store
    .documents
    .search("p1", "nope", "x", &[], SearchOptions::default())
    .await
    .unwrap();
  assert!(hits.is_empty());
}

#[tokio::test]
async fn test_count() {
  let store = store_with(&[("p1", "tasks"), ("p1", "notes")]).await;
  assert_eq!(store.documents.count("p1", "tasks").await.unwrap(), 0);
  assert_eq!(store.documents.count("p1", "nope").await.unwrap(), 0);

  for i in 0..3 {
    store
      .documents
      .create("p1", "tasks", json!({"i": i}), None)
      .await
      .unwrap();
  }
  store
    .documents
    .create("p1", "notes", json!({"i": 0}), None)
    .await
    .unwrap();

  assert_eq!(store.documents.count("p1", "tasks").await.unwrap(), 3);
  assert_eq!(store.documents.count("p1", "notes").await.unwrap(), 1);
}

#[tokio::test]
async fn test_ambiguous_collection_is_not_degraded() {
  let store = store_with(&[("p1", "Tasks"), ("p1", "tasks")]).await;
  let err = store.documents.count("p1", "TASKS").await.unwrap_err();
  assert!(matches!(
    err,
    StoreError::AmbiguousCollection {
      operation: Operation::Count,
      ..
    }
  ));
}
