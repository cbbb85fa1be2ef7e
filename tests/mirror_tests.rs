//! Tests for MirrorStorage fan-out
#![cfg(feature = "memory")]

use std::time::Duration;

use stowage_compose::multi::{MirrorStorage, ReadOnlyStorage};
use stowage_compose::{
    Capabilities, Error, MemoryStorage, MirrorOp, SharedStorage, Storage, StorageExt, shared,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[path = "test_common/mod.rs"]
mod test_common;

use test_common::{FlakyStorage, init_tracing, sorted_keys};

storage_test_suite!(
    setup = async { MirrorStorage::new(vec![MemoryStorage::new(), MemoryStorage::new()]).unwrap() }
);

fn three_targets() -> (
    [FlakyStorage; 3],
    MirrorStorage<FlakyStorage>,
) {
    let targets = [
        FlakyStorage::new("t1"),
        FlakyStorage::new("t2"),
        FlakyStorage::new("t3"),
    ];
    let mirror = MirrorStorage::builder()
        .add_named_backend("t1", targets[0].clone())
        .add_named_backend("t2", targets[1].clone())
        .add_named_backend("t3", targets[2].clone())
        .build()
        .unwrap();
    (targets, mirror)
}

fn expect_aggregate(result: stowage_compose::Result<()>) -> stowage_compose::MirrorFailureDetails {
    match result {
        Err(Error::Aggregate(details)) => details,
        other => panic!("expected aggregate error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_put_reaches_every_target() {
    let (targets, mirror) = three_targets();

    mirror.put_bytes("k".to_string(), b"v").await.unwrap();

    for target in &targets {
        assert_eq!(target.memory().contents()["k"], b"v");
    }
}

#[tokio::test]
async fn test_reads_use_primary_only() {
    let (targets, mirror) = three_targets();
    mirror.put_bytes("k".to_string(), b"v").await.unwrap();

    targets[1].set_offline(true);
    targets[2].set_offline(true);
    assert_eq!(mirror.get(&"k".to_string()).await.unwrap(), b"v");
    assert!(mirror.exists(&"k".to_string()).await.unwrap());
    assert_eq!(sorted_keys(&mirror).await, vec!["k"]);

    assert_eq!(targets[1].calls(), 1);
    assert_eq!(targets[2].calls(), 1);
}

#[tokio::test]
async fn test_partial_put_failure_names_failed_target() {
    init_tracing();
    let (targets, mirror) = three_targets();
    targets[1].set_offline(true);

    let details = expect_aggregate(mirror.put_bytes("k".to_string(), b"v").await);

    assert_eq!(details.operation, MirrorOp::Put);
    assert_eq!(details.failed_names(), vec!["t2"]);
    assert_eq!(details.failed_indices(), vec![1]);
    assert_eq!(details.successful_indices(), &[0, 2]);
    assert!(!details.was_cancelled());
    assert!(matches!(details.failure_for(1), Some(Error::Backend(_))));

    // Healthy targets were not blocked by the failing one.
    assert!(targets[0].memory().contains("k"));
    assert!(!targets[1].memory().contains("k"));
    assert!(targets[2].memory().contains("k"));

    let message = Error::Aggregate(details).to_string();
    assert!(message.contains("t2"), "{message}");
}

#[tokio::test]
async fn test_delete_with_offline_target_then_retry() {
    let (targets, mirror) = three_targets();
    mirror.put_bytes("k".to_string(), b"v").await.unwrap();

    targets[1].set_offline(true);
    let details = expect_aggregate(mirror.delete(&"k".to_string()).await);
    assert_eq!(details.failed_names(), vec!["t2"]);

    assert!(!targets[0].memory().contains("k"));
    assert!(targets[1].memory().contains("k"));
    assert!(!targets[2].memory().contains("k"));

    // Idempotent targets make the retry converge.
    targets[1].set_offline(false);
    mirror.delete(&"k".to_string()).await.unwrap();
    assert!(targets.iter().all(|t| t.memory().is_empty()));
}

#[tokio::test]
async fn test_delete_retry_on_strict_targets_reports_not_found() {
    let names = ["t1", "t2", "t3"];
    let strict: Vec<FlakyStorage> = names
        .iter()
        .map(|name| FlakyStorage::over(name, MemoryStorage::strict()))
        .collect();
    let mirror = names
        .iter()
        .zip(&strict)
        .fold(MirrorStorage::builder(), |b, (name, t)| b.add_named_backend(*name, t.clone()))
        .build()
        .unwrap();
    mirror.put_bytes("k".to_string(), b"v").await.unwrap();

    strict[1].set_offline(true);
    expect_aggregate(mirror.delete(&"k".to_string()).await);

    strict[1].set_offline(false);
    let details = expect_aggregate(mirror.delete(&"k".to_string()).await);
    assert_eq!(details.failed_indices(), vec![0, 2]);
    assert!(matches!(details.failure_for(0), Some(Error::NotFound(_))));
    assert!(strict[1].memory().is_empty());
}

#[tokio::test]
async fn test_every_target_failing() {
    let (targets, mirror) = three_targets();
    for target in &targets {
        target.set_offline(true);
    }

    let details = expect_aggregate(mirror.put_bytes("k".to_string(), b"v").await);
    assert_eq!(details.failure_count(), 3);
    assert!(!details.has_successes());
    assert_eq!(details.failed_names(), vec!["t1", "t2", "t3"]);
}

#[tokio::test]
async fn test_fan_out_is_concurrent() {
    let delay = Duration::from_millis(150);
    let mirror = MirrorStorage::builder()
        .add_backend(FlakyStorage::new("a").with_delay(delay))
        .add_backend(FlakyStorage::new("b").with_delay(delay))
        .add_backend(FlakyStorage::new("c").with_delay(delay))
        .build()
        .unwrap();

    let start = Instant::now();
    mirror.put_bytes("k".to_string(), b"v").await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= delay);
    assert!(elapsed < delay * 3, "fan-out took {elapsed:?}");
}

#[tokio::test]
async fn test_cancellation_reports_pending_and_lets_writes_finish() {
    init_tracing();
    let fast = FlakyStorage::new("fast");
    let slow = FlakyStorage::new("slow").with_delay(Duration::from_millis(200));
    let mirror = MirrorStorage::builder()
        .add_named_backend("fast", fast.clone())
        .add_named_backend("slow", slow.clone())
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let details = expect_aggregate(
        mirror
            .put_cancellable("k".to_string(), b"v".to_vec(), &token)
            .await,
    );
    assert!(details.was_cancelled());
    assert_eq!(details.successful_indices(), &[0]);
    assert_eq!(details.pending, vec![1]);
    assert!(!details.has_failures());
    assert!(details.to_string().contains("pending"));

    assert!(fast.memory().contains("k"));
    assert!(!slow.memory().contains("k"));

    // The dispatched write keeps running in the background.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(slow.memory().contains("k"));
}

#[tokio::test]
async fn test_untriggered_token_behaves_like_plain_call() {
    let mirror = MirrorStorage::new(vec![FlakyStorage::new("a")]).unwrap();
    let token = CancellationToken::new();

    mirror
        .delete_cancellable(&"k".to_string(), &token)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dropped_put_still_completes_on_targets() {
    let slow = FlakyStorage::new("slow").with_delay(Duration::from_millis(150));
    let mirror = MirrorStorage::new(vec![slow.clone()]).unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), mirror.put_bytes("k".to_string(), b"v")).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(slow.memory().contains("k"));
}

#[tokio::test]
async fn test_backend_timeout_counts_as_failure() {
    let mirror = MirrorStorage::builder()
        .add_named_backend("quick", FlakyStorage::new("quick"))
        .add_named_backend("sluggish", FlakyStorage::new("sluggish").with_delay(Duration::from_millis(300)))
        .backend_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let details = expect_aggregate(mirror.put_bytes("k".to_string(), b"v").await);
    assert_eq!(details.failed_names(), vec!["sluggish"]);
    assert!(details.failure_for(1).unwrap().to_string().contains("timed out"));
}

#[tokio::test]
async fn test_timed_out_target_still_finishes_its_write() {
    let sluggish = FlakyStorage::new("sluggish").with_delay(Duration::from_millis(200));
    let mirror = MirrorStorage::builder()
        .add_named_backend("quick", FlakyStorage::new("quick"))
        .add_named_backend("sluggish", sluggish.clone())
        .backend_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let details = expect_aggregate(mirror.put_bytes("k".to_string(), b"v").await);
    assert_eq!(details.failed_names(), vec!["sluggish"]);
    assert!(!sluggish.memory().contains("k"));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(sluggish.memory().contents()["k"], b"v");
}

#[tokio::test]
async fn test_heterogeneous_targets_and_capabilities() {
    let writable = MemoryStorage::new();
    let targets: Vec<SharedStorage> = vec![
        shared(writable.clone()),
        shared(ReadOnlyStorage::new(MemoryStorage::new())),
    ];
    let mirror = MirrorStorage::new(targets).unwrap();

    let caps = mirror.capabilities();
    assert!(caps.readable);
    assert!(caps.enumerable);
    assert!(!caps.writable);

    // Writes are still attempted everywhere; the read-only target fails.
    let details = expect_aggregate(mirror.put_bytes("k".to_string(), b"v").await);
    assert_eq!(details.failed_names(), vec!["target-1"]);
    assert!(matches!(details.failure_for(1), Some(Error::Unsupported(_))));
    assert!(writable.contains("k"));
}

#[tokio::test]
async fn test_primary_index_selects_read_target() {
    let first = MemoryStorage::new();
    let second = MemoryStorage::new();
    second.put_bytes("only-second".to_string(), b"x").await.unwrap();

    let mirror = MirrorStorage::builder()
        .add_backend(first)
        .add_backend(second)
        .primary_index(1)
        .build()
        .unwrap();

    assert_eq!(mirror.primary_index(), 1);
    assert!(mirror.exists(&"only-second".to_string()).await.unwrap());
    assert_eq!(mirror.capabilities(), Capabilities::ALL);
}

#[tokio::test]
async fn test_nested_mirrors() {
    let leaves: Vec<MemoryStorage> = (0..4).map(|_| MemoryStorage::new()).collect();
    let left = MirrorStorage::new(vec![leaves[0].clone(), leaves[1].clone()]).unwrap();
    let right = MirrorStorage::new(vec![leaves[2].clone(), leaves[3].clone()]).unwrap();
    let root = MirrorStorage::new(vec![left, right]).unwrap();

    root.put_bytes("k".to_string(), b"v").await.unwrap();
    assert!(leaves.iter().all(|leaf| leaf.contains("k")));

    root.delete(&"k".to_string()).await.unwrap();
    assert!(leaves.iter().all(|leaf| leaf.is_empty()));
}
