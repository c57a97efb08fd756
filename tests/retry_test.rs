//! Integration tests for the retry coordinator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use review_queue::clock::{Clock, ManualClock};
use review_queue::error::{Error, Result};
use review_queue::model::*;
use review_queue::store::{MemoryStore, RetryStore};
use review_queue::worker::retry::backoff_for;
use review_queue::worker::{RetryConfig, RetryCoordinator, SideEffect};

/// Fails its first `failures` invocations, then succeeds.
struct FlakyEffect {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyEffect {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SideEffect for FlakyEffect {
    fn name(&self) -> &str {
        DRAFT_GENERATION
    }

    async fn execute(&self, _intake_id: IntakeId) -> Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(Error::SideEffect(format!("draft service unavailable (call {n})")))
        } else {
            Ok(())
        }
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn setup(effect: Arc<FlakyEffect>) -> (Arc<MemoryStore>, Arc<ManualClock>, RetryCoordinator) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let coordinator =
        RetryCoordinator::new(store.clone(), effect, clock.clone(), RetryConfig::default());
    (store, clock, coordinator)
}

#[test]
fn backoff_is_two_to_the_attempts_minutes() {
    let cap = Duration::minutes(60);
    for k in 1..=5 {
        assert_eq!(backoff_for(k, cap), Duration::minutes(1 << k));
    }
    assert_eq!(backoff_for(10, cap), cap);
}

#[tokio::test]
async fn scheduled_retry_is_due_immediately() {
    let (store, clock, coordinator) = setup(FlakyEffect::new(0));
    let intake = IntakeId::new();

    let entry = coordinator
        .schedule_retry(intake, "timeout contacting draft service")
        .await
        .unwrap();
    assert_eq!(entry.attempts, 0);
    assert_eq!(entry.max_attempts, 3);
    assert_eq!(entry.outcome, RetryOutcome::Pending);
    assert_eq!(entry.next_retry_at, clock.now());

    let due = store
        .due_retries(DRAFT_GENERATION, clock.now(), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
}

#[tokio::test]
async fn pending_retry_is_not_queued_twice() {
    let (_store, _clock, coordinator) = setup(FlakyEffect::new(0));
    let intake = IntakeId::new();

    let first = coordinator.schedule_retry(intake, "boom").await.unwrap();
    let second = coordinator.schedule_retry(intake, "boom again").await.unwrap();
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn success_completes_the_entry() {
    let effect = FlakyEffect::new(0);
    let (store, clock, coordinator) = setup(effect.clone());
    let entry = coordinator.schedule_retry(IntakeId::new(), "boom").await.unwrap();

    let report = coordinator.run_retry_batch().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(effect.calls(), 1);

    let done = store.get_retry(entry.id).await.unwrap().unwrap();
    assert_eq!(done.outcome, RetryOutcome::Succeeded);
    assert_eq!(done.attempts, 1);
    assert_eq!(done.completed_at, Some(clock.now()));

    // Nothing left to do.
    clock.advance(Duration::hours(2));
    assert_eq!(coordinator.run_retry_batch().await.unwrap().processed, 0);
    assert_eq!(effect.calls(), 1);
}

#[tokio::test]
async fn failures_back_off_exponentially_then_exhaust() {
    let effect = FlakyEffect::new(usize::MAX);
    let (store, clock, coordinator) = setup(effect.clone());
    let entry = coordinator.schedule_retry(IntakeId::new(), "boom").await.unwrap();

    // Attempt 1 fails: next try in 2 minutes.
    let report = coordinator.run_retry_batch().await.unwrap();
    assert_eq!(report.failed, 1);
    let e = store.get_retry(entry.id).await.unwrap().unwrap();
    assert_eq!(e.attempts, 1);
    assert_eq!(e.next_retry_at, clock.now() + Duration::minutes(2));
    assert!(e.last_error.as_deref().unwrap().contains("unavailable"));

    // Not yet due.
    clock.advance(Duration::minutes(1));
    assert_eq!(coordinator.run_retry_batch().await.unwrap().processed, 0);

    // Attempt 2 fails: next try in 4 minutes.
    clock.advance(Duration::minutes(1));
    assert_eq!(coordinator.run_retry_batch().await.unwrap().failed, 1);
    let e = store.get_retry(entry.id).await.unwrap().unwrap();
    assert_eq!(e.attempts, 2);
    assert_eq!(e.next_retry_at, clock.now() + Duration::minutes(4));

    // Attempt 3 fails and uses up the budget.
    clock.advance(Duration::minutes(4));
    let report = coordinator.run_retry_batch().await.unwrap();
    assert_eq!(report.exhausted, 1);
    let e = store.get_retry(entry.id).await.unwrap().unwrap();
    assert_eq!(e.attempts, 3);
    assert_eq!(e.outcome, RetryOutcome::Exhausted);
    assert_eq!(e.completed_at, Some(clock.now()));

    clock.advance(Duration::hours(3));
    assert_eq!(coordinator.run_retry_batch().await.unwrap().processed, 0);
    assert_eq!(effect.calls(), 3);
}

/// Panics for one intake, succeeds for every other.
struct PanickingEffect {
    poisoned: IntakeId,
}

#[async_trait]
impl SideEffect for PanickingEffect {
    fn name(&self) -> &str {
        DRAFT_GENERATION
    }

    async fn execute(&self, intake_id: IntakeId) -> Result<()> {
        if intake_id == self.poisoned {
            panic!("draft template missing");
        }
        Ok(())
    }
}

#[tokio::test]
async fn panicking_effect_counts_as_failed_attempt() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let poisoned = IntakeId::new();
    let coordinator = RetryCoordinator::new(
        store.clone(),
        Arc::new(PanickingEffect { poisoned }),
        clock.clone(),
        RetryConfig::default(),
    );
    let bad = coordinator.schedule_retry(poisoned, "boom").await.unwrap();
    clock.advance(Duration::seconds(1));
    let good = coordinator
        .schedule_retry(IntakeId::new(), "boom")
        .await
        .unwrap();

    // The panic does not take the rest of the batch down with it.
    let report = coordinator.run_retry_batch().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 1);
    let e = store.get_retry(bad.id).await.unwrap().unwrap();
    assert_eq!(e.attempts, 1);
    assert!(e.last_error.as_deref().unwrap().contains("panicked"));
    assert_eq!(
        store.get_retry(good.id).await.unwrap().unwrap().outcome,
        RetryOutcome::Succeeded
    );

    // Keeps counting toward the attempt limit.
    clock.advance(Duration::minutes(2));
    coordinator.run_retry_batch().await.unwrap();
    clock.advance(Duration::minutes(4));
    let report = coordinator.run_retry_batch().await.unwrap();
    assert_eq!(report.exhausted, 1);
    let e = store.get_retry(bad.id).await.unwrap().unwrap();
    assert_eq!(e.attempts, 3);
    assert_eq!(e.outcome, RetryOutcome::Exhausted);
}

#[tokio::test]
async fn recovers_after_transient_failures() {
    let effect = FlakyEffect::new(1);
    let (store, clock, coordinator) = setup(effect.clone());
    let entry = coordinator.schedule_retry(IntakeId::new(), "boom").await.unwrap();

    coordinator.run_retry_batch().await.unwrap();
    clock.advance(Duration::minutes(2));
    let report = coordinator.run_retry_batch().await.unwrap();
    assert_eq!(report.succeeded, 1);

    let e = store.get_retry(entry.id).await.unwrap().unwrap();
    assert_eq!(e.outcome, RetryOutcome::Succeeded);
    assert_eq!(e.attempts, 2);
}

#[tokio::test]
async fn terminal_entries_are_immutable() {
    let (store, clock, coordinator) = setup(FlakyEffect::new(0));
    let entry = coordinator.schedule_retry(IntakeId::new(), "boom").await.unwrap();
    coordinator.run_retry_batch().await.unwrap();

    let failure = RetryFailure {
        error: "late failure".to_string(),
        next_retry_at: clock.now() + Duration::minutes(2),
        exhausted: false,
    };
    assert!(
        !store
            .record_retry_failure(entry.id, 0, &failure, clock.now())
            .await
            .unwrap()
    );
    assert!(
        !store
            .record_retry_failure(entry.id, 1, &failure, clock.now())
            .await
            .unwrap()
    );
    assert!(
        !store
            .record_retry_success(entry.id, 1, clock.now())
            .await
            .unwrap()
    );

    let e = store.get_retry(entry.id).await.unwrap().unwrap();
    assert_eq!(e.outcome, RetryOutcome::Succeeded);
    assert_eq!(e.attempts, 1);
}

#[tokio::test]
async fn leased_entry_is_skipped_by_an_overlapping_run() {
    let (store, clock, coordinator) = setup(FlakyEffect::new(0));
    let entry = coordinator.schedule_retry(IntakeId::new(), "boom").await.unwrap();

    // Another batch leased it first.
    assert!(
        store
            .lease_retry(entry.id, 0, clock.now(), clock.now() + Duration::minutes(5))
            .await
            .unwrap()
    );

    let report = coordinator.run_retry_batch().await.unwrap();
    assert_eq!(report.processed, 0);

    // The lease runs out without a result; the entry comes back.
    clock.advance(Duration::minutes(5));
    assert_eq!(coordinator.run_retry_batch().await.unwrap().succeeded, 1);
}

#[tokio::test]
async fn batch_is_limited_and_ordered_by_due_time() {
    let effect = FlakyEffect::new(0);
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let coordinator = RetryCoordinator::new(
        store.clone(),
        effect.clone(),
        clock.clone(),
        RetryConfig {
            batch_size: 2,
            ..Default::default()
        },
    );

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(coordinator.schedule_retry(IntakeId::new(), "boom").await.unwrap().id);
        clock.advance(Duration::seconds(1));
    }

    assert_eq!(coordinator.run_retry_batch().await.unwrap().succeeded, 2);
    let last = store.get_retry(ids[2]).await.unwrap().unwrap();
    assert_eq!(last.outcome, RetryOutcome::Pending);
    assert_eq!(coordinator.run_retry_batch().await.unwrap().succeeded, 1);
}

#[tokio::test]
async fn entries_for_other_side_effects_are_ignored() {
    let effect = FlakyEffect::new(0);
    let (store, clock, coordinator) = setup(effect.clone());
    store
        .enqueue_retry(IntakeId::new(), "email_send", 3, "smtp down", clock.now())
        .await
        .unwrap();

    assert_eq!(coordinator.run_retry_batch().await.unwrap().processed, 0);
    assert_eq!(effect.calls(), 0);
}
