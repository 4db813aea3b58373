//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p reservation-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use reservation_store::{
    AdminStore, LockMode, NewPrincipal, NewResource, PostgresStore, PrincipalId,
    ReservationFilter, ReservationStore, ResourceId, ResourceStore, ResourceUpdate, StoreError,
    TransactionCoordinator, TransactionOptions, UnitOfWork, with_transaction,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_reservation_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store(options: TransactionOptions) -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(25)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE bookings, events, users RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::with_options(pool, options)
}

async fn create_principals(store: &PostgresStore, n: usize) -> Vec<PrincipalId> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let new = NewPrincipal::new(format!("user{i}@example.com"), None);
        ids.push(store.register_principal(new).await.unwrap().id);
    }
    ids
}

/// One reserve attempt with the lock, count, insert sequence.
async fn try_reserve(
    store: &PostgresStore,
    resource_id: ResourceId,
    principal_id: PrincipalId,
) -> Result<(), StoreError> {
    with_transaction(store, move |tx| {
        Box::pin(async move {
            let resource = tx
                .lock_resource(resource_id)
                .await?
                .ok_or_else(|| StoreError::InvalidResource("missing".into()))?;
            if tx.count_by_resource(resource_id).await? >= resource.capacity as u64 {
                return Err(StoreError::InvalidResource("full".into()));
            }
            tx.create(resource_id, principal_id).await?;
            Ok(())
        })
    })
    .await
}

#[tokio::test]
#[serial]
async fn create_resource_and_read_it_back() {
    let store = get_test_store(TransactionOptions::default()).await;

    let resource = store
        .create_resource(NewResource::new("Rust Meetup", 40))
        .await
        .unwrap();

    let mut handle = store.read_only().await.unwrap();
    let loaded = handle.find_resource(resource.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "Rust Meetup");
    assert_eq!(loaded.capacity, 40);
}

#[tokio::test]
#[serial]
async fn invalid_capacity_is_rejected_before_insert() {
    let store = get_test_store(TransactionOptions::default()).await;

    let err = store
        .create_resource(NewResource::new("Empty Room", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidResource(_)));
}

#[tokio::test]
#[serial]
async fn committed_reservation_is_visible_and_rolled_back_one_is_not() {
    let store = get_test_store(TransactionOptions::default()).await;
    let resource = store
        .create_resource(NewResource::new("Gala", 5))
        .await
        .unwrap();
    let ids = create_principals(&store, 2).await;

    let mut tx = store.begin().await.unwrap();
    let kept = tx.create(resource.id, ids[0]).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let discarded = tx.create(resource.id, ids[1]).await.unwrap();
    tx.rollback().await.unwrap();

    let mut live = store.read_only().await.unwrap();
    assert!(live.find_by_id(kept.id).await.unwrap().is_some());
    assert!(live.find_by_id(discarded.id).await.unwrap().is_none());
    assert_eq!(live.count_by_resource(resource.id).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn unique_pair_constraint_maps_to_duplicate() {
    let store = get_test_store(TransactionOptions::default()).await;
    let resource = store
        .create_resource(NewResource::new("Gala", 5))
        .await
        .unwrap();
    let principal_id = create_principals(&store, 1).await[0];

    let mut live = store.read_only().await.unwrap();
    live.create(resource.id, principal_id).await.unwrap();
    let err = live.create(resource.id, principal_id).await.unwrap_err();

    assert!(matches!(
        err,
        StoreError::DuplicateReservation { principal_id: p, .. } if p == principal_id
    ));
}

#[tokio::test]
#[serial]
async fn unknown_principal_maps_to_dangling_reference() {
    let store = get_test_store(TransactionOptions::default()).await;
    let resource = store
        .create_resource(NewResource::new("Gala", 5))
        .await
        .unwrap();

    let mut live = store.read_only().await.unwrap();
    let err = live
        .create(resource.id, PrincipalId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DanglingReference(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
async fn row_lock_serializes_concurrent_reservations() {
    let store = get_test_store(TransactionOptions::default()).await;
    let resource = store
        .create_resource(NewResource::new("Small Venue", 5))
        .await
        .unwrap();
    let ids = create_principals(&store, 20).await;

    let mut handles = Vec::new();
    for principal_id in ids {
        let store = store.clone();
        let resource_id = resource.id;
        handles.push(tokio::spawn(async move {
            try_reserve(&store, resource_id, principal_id).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 5);

    let mut live = store.read_only().await.unwrap();
    assert_eq!(live.count_by_resource(resource.id).await.unwrap(), 5);
}

#[tokio::test]
#[serial]
async fn held_lock_times_out_waiter() {
    let options = TransactionOptions::default().with_lock_timeout(Duration::from_millis(200));
    let store = get_test_store(options).await;
    let resource = store
        .create_resource(NewResource::new("Gala", 5))
        .await
        .unwrap();

    let mut holder = store.begin().await.unwrap();
    holder.lock_resource(resource.id).await.unwrap();

    let mut waiter = store.begin().await.unwrap();
    let err = waiter.lock_resource(resource.id).await.unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout));
    assert!(err.is_transient());

    waiter.rollback().await.unwrap();
    holder.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn nowait_fails_without_waiting() {
    let options = TransactionOptions::default()
        .with_lock_timeout(Duration::from_secs(10))
        .with_lock_mode(LockMode::NoWait);
    let store = get_test_store(options).await;
    let resource = store
        .create_resource(NewResource::new("Gala", 5))
        .await
        .unwrap();

    let mut holder = store.begin().await.unwrap();
    holder.lock_resource(resource.id).await.unwrap();

    let mut waiter = store.begin().await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(2), waiter.lock_resource(resource.id))
        .await
        .expect("NOWAIT must not block")
        .unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout));

    waiter.rollback().await.unwrap();
    holder.rollback().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn waiter_on_deleted_reservation_sees_nothing() {
    let store = get_test_store(TransactionOptions::default()).await;
    let resource = store
        .create_resource(NewResource::new("Gala", 5))
        .await
        .unwrap();
    let principal_id = create_principals(&store, 1).await[0];
    let mut live = store.read_only().await.unwrap();
    let reservation = live.create(resource.id, principal_id).await.unwrap();
    drop(live);

    let mut holder = store.begin().await.unwrap();
    holder.lock_reservation(reservation.id).await.unwrap();

    let waiter_store = store.clone();
    let waiter = tokio::spawn(async move {
        let mut tx = waiter_store.begin().await.unwrap();
        let seen = tx.lock_reservation(reservation.id).await.unwrap();
        tx.rollback().await.unwrap();
        seen
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(holder.delete(reservation.id).await.unwrap());
    holder.commit().await.unwrap();

    assert!(waiter.await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn find_many_filters_orders_and_counts() {
    let store = get_test_store(TransactionOptions::default()).await;
    let first = store
        .create_resource(NewResource::new("Day One", 50))
        .await
        .unwrap();
    let second = store
        .create_resource(NewResource::new("Day Two", 50))
        .await
        .unwrap();
    let ids = create_principals(&store, 25).await;

    let mut live = store.read_only().await.unwrap();
    for principal_id in &ids {
        live.create(first.id, *principal_id).await.unwrap();
    }
    live.create(second.id, ids[0]).await.unwrap();

    let page = live
        .find_many(ReservationFilter::for_resource(first.id), 10, 10)
        .await
        .unwrap();
    assert_eq!(page.total, 25);
    let got: Vec<i64> = page.items.iter().map(|r| r.id.as_i64()).collect();
    assert_eq!(got, (6..=15).rev().collect::<Vec<_>>());

    let page = live
        .find_many(ReservationFilter::for_principal(ids[0]), 0, 10)
        .await
        .unwrap();
    assert_eq!(page.total, 2);

    let page = live
        .find_many(
            ReservationFilter::for_resource(second.id).principal_id(ids[0]),
            0,
            10,
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].resource_id, second.id);
}

#[tokio::test]
#[serial]
async fn delete_reports_whether_a_row_was_removed() {
    let store = get_test_store(TransactionOptions::default()).await;
    let resource = store
        .create_resource(NewResource::new("Gala", 5))
        .await
        .unwrap();
    let principal_id = create_principals(&store, 1).await[0];

    let mut live = store.read_only().await.unwrap();
    let reservation = live.create(resource.id, principal_id).await.unwrap();

    assert!(live.delete(reservation.id).await.unwrap());
    assert!(!live.delete(reservation.id).await.unwrap());
}

#[tokio::test]
#[serial]
async fn list_resources_searches_case_insensitively() {
    let store = get_test_store(TransactionOptions::default()).await;
    for name in ["Rock Night", "Jazz Brunch", "ROCK Opera", "100% Rock_"] {
        store
            .create_resource(NewResource::new(name, 10))
            .await
            .unwrap();
    }

    let page = store.list_resources(Some("rock"), 0, 10).await.unwrap();
    assert_eq!(page.total, 3);
    let names: Vec<&str> = page.items.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["100% Rock_", "ROCK Opera", "Rock Night"]);

    // Wildcard characters in the search are matched literally.
    let page = store.list_resources(Some("%"), 0, 10).await.unwrap();
    assert_eq!(page.total, 1);

    let page = store.list_resources(None, 2, 10).await.unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.items.len(), 2);
}

#[tokio::test]
#[serial]
async fn update_resource_refuses_capacity_below_bookings() {
    let store = get_test_store(TransactionOptions::default()).await;
    let resource = store
        .create_resource(NewResource::new("Gala", 5))
        .await
        .unwrap();
    let ids = create_principals(&store, 3).await;
    let mut live = store.read_only().await.unwrap();
    for principal_id in &ids {
        live.create(resource.id, *principal_id).await.unwrap();
    }

    let err = store
        .update_resource(resource.id, ResourceUpdate::default().capacity(2))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidResource(_)));

    let updated = store
        .update_resource(resource.id, ResourceUpdate::default().name("Gala Night").capacity(3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.name, "Gala Night");
    assert_eq!(updated.capacity, 3);

    let missing = store
        .update_resource(ResourceId::new(999), ResourceUpdate::default().capacity(3))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
#[serial]
async fn update_resource_waits_for_the_row_lock() {
    let options = TransactionOptions::default().with_lock_timeout(Duration::from_millis(200));
    let store = get_test_store(options).await;
    let resource = store
        .create_resource(NewResource::new("Gala", 5))
        .await
        .unwrap();

    let mut holder = store.begin().await.unwrap();
    holder.lock_resource(resource.id).await.unwrap();

    let err = store
        .update_resource(resource.id, ResourceUpdate::default().capacity(1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout));

    holder.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn register_principal_normalizes_and_rejects_taken_email() {
    let store = get_test_store(TransactionOptions::default()).await;

    let principal = store
        .register_principal(NewPrincipal::new(" Ada@Example.com", Some("Ada")))
        .await
        .unwrap();
    assert_eq!(principal.email, "ada@example.com");
    assert_eq!(principal.name.as_deref(), Some("Ada"));
    assert_eq!(
        store.get_principal(principal.id).await.unwrap(),
        Some(principal.clone())
    );

    let err = store
        .register_principal(NewPrincipal::new("ADA@example.com", None))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    assert!(store.get_principal(PrincipalId::new()).await.unwrap().is_none());
}
