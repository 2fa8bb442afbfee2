//! Tests for concurrent placement traffic
//!
//! These tests verify that per-area locking keeps the grid, the ledger and
//! the container index consistent under parallel writers, that readers never
//! observe a half-applied move, and that lock waits are bounded.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use yardcore::{
    AreaBounds, AreaType, ContainerCode, Coordinate, EngineConfig, EngineError, ErrorKind,
    InMemoryRepository, NewStorageArea, PlacementCoordinator, StaticContainerRegistry,
    StaticDockRegistry,
};

fn coordinator(lock_timeout_ms: u64) -> Arc<PlacementCoordinator> {
    let config = EngineConfig {
        lock_timeout_ms,
        persistence_retries: 3,
        retry_backoff_ms: 1,
    };
    Arc::new(PlacementCoordinator::new(
        config,
        Arc::new(InMemoryRepository::new()),
        Arc::new(StaticContainerRegistry::new()),
        Arc::new(StaticDockRegistry::new()),
    ))
}

async fn area(coordinator: &PlacementCoordinator, bays: u32, max: u32) -> String {
    let bounds = AreaBounds::new(bays, 4, 3).unwrap();
    coordinator
        .create_area(NewStorageArea::new("Yard", AreaType::Yard, bounds, max))
        .await
        .unwrap()
        .id
}

fn container(serial: u32) -> ContainerCode {
    ContainerCode::compose("TSTU", serial).unwrap()
}

// ===== Parallel writers =====

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_places_into_distinct_slots() {
    let coordinator = coordinator(1_000);
    let area = area(&coordinator, 10, 200).await;

    let mut handles = Vec::new();
    for i in 0..40u32 {
        let coordinator = coordinator.clone();
        let area = area.clone();
        handles.push(tokio::spawn(async move {
            let coord = Coordinate::new(i % 10, (i / 10) % 4, 0);
            coordinator.place(&area, &container(i), coord, 2).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().expect("Distinct slots must all be placed");
    }

    let report = coordinator.capacity(&area).unwrap();
    assert_eq!(report.current, 80, "Ledger must equal the sum of TEU placed");
    assert_eq!(report.occupied_slots, 40);
    coordinator.verify(&area).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_places_never_exceed_capacity() {
    let coordinator = coordinator(1_000);
    let area = area(&coordinator, 10, 10).await;

    let mut handles = Vec::new();
    for i in 0..25u32 {
        let coordinator = coordinator.clone();
        let area = area.clone();
        handles.push(tokio::spawn(async move {
            let coord = Coordinate::new(i % 10, i / 10, 0);
            coordinator.place(&area, &container(i), coord, 1).await
        }));
    }

    let mut placed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => placed += 1,
            Err(EngineError::CapacityExceeded { max, .. }) => assert_eq!(max, 10),
            Err(other) => panic!("Unexpected error: {:?}", other),
        }
    }

    assert_eq!(placed, 10, "Exactly max_capacity single-TEU placements must succeed");
    assert_eq!(coordinator.capacity(&area).unwrap().current, 10);
    coordinator.verify(&area).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_container_raced_into_two_areas() {
    let coordinator = coordinator(1_000);
    let first = area(&coordinator, 4, 10).await;
    let second = area(&coordinator, 4, 10).await;
    let code = container(7);

    let a = {
        let (coordinator, area, code) = (coordinator.clone(), first.clone(), code.clone());
        tokio::spawn(async move { coordinator.place(&area, &code, Coordinate::new(0, 0, 0), 1).await })
    };
    let b = {
        let (coordinator, area, code) = (coordinator.clone(), second.clone(), code.clone());
        tokio::spawn(async move { coordinator.place(&area, &code, Coordinate::new(0, 0, 0), 1).await })
    };

    let outcomes = [a.await.unwrap(), b.await.unwrap()];
    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(winners, 1, "A container may be placed in only one area");
    assert!(outcomes
        .iter()
        .any(|outcome| matches!(outcome, Err(EngineError::ContainerAlreadyPlaced { .. }))));

    let total = coordinator.capacity(&first).unwrap().current + coordinator.capacity(&second).unwrap().current;
    assert_eq!(total, 1);
}

// ===== Readers =====

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_never_sees_half_applied_move() {
    let coordinator = coordinator(1_000);
    let area = area(&coordinator, 4, 10).await;
    let code = container(1);
    let left = Coordinate::new(0, 0, 0);
    let right = Coordinate::new(3, 3, 2);
    coordinator.place(&area, &code, left, 1).await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicUsize::new(0));

    let reader = {
        let (coordinator, area, done, observed) =
            (coordinator.clone(), area.clone(), done.clone(), observed.clone());
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let view = coordinator.snapshot_grid(&area).unwrap();
                assert_eq!(view.slots.len(), 1, "Exactly one of source and target must be occupied");
                observed.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        })
    };

    // moves start only once the reader is running, so the two overlap
    while observed.load(Ordering::SeqCst) == 0 {
        assert!(!reader.is_finished(), "Reader stopped before its first snapshot");
        tokio::task::yield_now().await;
    }
    for i in 0..100 {
        let to = if i % 2 == 0 { right } else { left };
        coordinator.move_container(&area, &container(1), to).await.unwrap();
    }
    done.store(true, Ordering::SeqCst);
    reader.await.unwrap();

    assert_eq!(coordinator.locate(&code), Some((area.clone(), left)));
    coordinator.verify(&area).unwrap();
}

// ===== Lock bounds =====

#[tokio::test]
async fn test_busy_when_area_lock_is_held() {
    let coordinator = coordinator(20);
    let area = area(&coordinator, 4, 10).await;
    let cell = coordinator.catalog().cell(&area).unwrap();

    let guard = coordinator.catalog().locks().occupancy(&cell).unwrap();
    let err = coordinator
        .place(&area, &container(1), Coordinate::new(0, 0, 0), 1)
        .await
        .unwrap_err();
    drop(guard);

    assert_eq!(err, EngineError::Busy(area.clone()));
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert!(err.is_retryable(), "Busy must be retryable");

    coordinator
        .place(&area, &container(1), Coordinate::new(0, 0, 0), 1)
        .await
        .expect("Place must succeed once the lock is released");
}

#[tokio::test]
async fn test_busy_blocks_readers_too() {
    let coordinator = coordinator(20);
    let area = area(&coordinator, 4, 10).await;
    let cell = coordinator.catalog().cell(&area).unwrap();

    let holder = {
        let coordinator = coordinator.clone();
        std::thread::spawn(move || {
            let _guard = coordinator.catalog().locks().occupancy(&cell).unwrap();
            std::thread::sleep(Duration::from_millis(200));
        })
    };
    std::thread::sleep(Duration::from_millis(50));

    assert!(matches!(coordinator.snapshot_grid(&area), Err(EngineError::Busy(_))));
    holder.join().unwrap();
    assert!(coordinator.snapshot_grid(&area).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() {
    let coordinator = coordinator(1_000);
    let north = area(&coordinator, 4, 10).await;
    let south = area(&coordinator, 4, 10).await;
    let x = container(11);
    let y = container(12);
    coordinator.place(&north, &x, Coordinate::new(0, 0, 0), 1).await.unwrap();
    coordinator.place(&south, &y, Coordinate::new(0, 0, 0), 1).await.unwrap();

    // each container shuttles through its own row so the two never contend for a slot
    let shuttle = |from: String, to: String, code: ContainerCode, row: u32| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            for round in 0..50u32 {
                let (src, dst) = if round % 2 == 0 { (&from, &to) } else { (&to, &from) };
                let coord = Coordinate::new(1 + round % 3, row, 0);
                loop {
                    match coordinator.transfer(src, dst, &code, coord).await {
                        Ok(_) => break,
                        Err(err) if err.is_retryable() => tokio::task::yield_now().await,
                        Err(err) => panic!("Transfer failed: {:?}", err),
                    }
                }
            }
        })
    };

    let forward = shuttle(north.clone(), south.clone(), x.clone(), 1);
    let backward = shuttle(south.clone(), north.clone(), y.clone(), 2);

    tokio::time::timeout(Duration::from_secs(10), async {
        forward.await.unwrap();
        backward.await.unwrap();
    })
    .await
    .expect("Transfers in opposite directions must not deadlock");

    assert_eq!(coordinator.locate(&x).map(|(area, _)| area), Some(north.clone()));
    assert_eq!(coordinator.locate(&y).map(|(area, _)| area), Some(south.clone()));
    coordinator.verify(&north).unwrap();
    coordinator.verify(&south).unwrap();
}
