//! Integration tests for claim acquisition, release and resolution.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use review_queue::claim::{ClaimManager, ClaimOutcome, ClaimRejection};
use review_queue::clock::{Clock, ManualClock};
use review_queue::error::{Error, Result};
use review_queue::ledger::ComplianceLedger;
use review_queue::model::*;
use review_queue::queue::ReviewQueue;
use review_queue::store::{MemoryStore, WorkStore};

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    ledger: ComplianceLedger,
    queue: ReviewQueue,
    claims: ClaimManager,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    ));
    let ledger = ComplianceLedger::new(store.clone(), clock.clone());
    let queue = ReviewQueue::new(store.clone(), ledger.clone(), clock.clone());
    let claims = ClaimManager::new(store.clone(), ledger.clone(), clock.clone());
    Harness {
        store,
        clock,
        ledger,
        queue,
        claims,
    }
}

/// Submit and pay, leaving the intake claimable.
async fn paid_intake(h: &Harness, request_type: RequestType) -> IntakeId {
    let item = h
        .queue
        .submit(
            NewIntake::new(request_type),
            AuditContext::patient(IntakeId::new(), request_type).ip_address("203.0.113.7"),
        )
        .await
        .unwrap();
    assert!(h.queue.confirm_payment(item.id).await.unwrap());
    item.id
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn paid_intake_can_be_claimed() {
    let h = harness();
    let id = paid_intake(&h, RequestType::MedCert).await;
    let dr_a = ReviewerId::new("dr-a");

    let outcome = h.claims.acquire_claim(id, &dr_a).await.unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::Acquired {
            claimed_at: h.clock.now()
        }
    );

    let item = h.store.get_intake(id).await.unwrap().unwrap();
    assert_eq!(item.status, IntakeStatus::Claimed);
    assert_eq!(item.claimed_by, Some(dr_a));
    assert!(item.claim_is_consistent());
}

#[tokio::test]
async fn second_reviewer_is_rejected() {
    let h = harness();
    let id = paid_intake(&h, RequestType::MedCert).await;

    assert!(
        h.claims
            .acquire_claim(id, &ReviewerId::new("dr-a"))
            .await
            .unwrap()
            .is_acquired()
    );
    let outcome = h
        .claims
        .acquire_claim(id, &ReviewerId::new("dr-b"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::Rejected {
            reason: ClaimRejection::AlreadyClaimed
        }
    );

    let item = h.store.get_intake(id).await.unwrap().unwrap();
    assert_eq!(item.claimed_by, Some(ReviewerId::new("dr-a")));
}

#[tokio::test]
async fn unpaid_intake_is_not_claimable() {
    let h = harness();
    let item = h
        .queue
        .submit(
            NewIntake::new(RequestType::RepeatRx),
            AuditContext::patient(IntakeId::new(), RequestType::RepeatRx),
        )
        .await
        .unwrap();

    let outcome = h
        .claims
        .acquire_claim(item.id, &ReviewerId::new("dr-a"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::Rejected {
            reason: ClaimRejection::NotClaimable(IntakeStatus::Submitted)
        }
    );
}

#[tokio::test]
async fn missing_intake_is_an_error() {
    let h = harness();
    let err = h
        .claims
        .acquire_claim(IntakeId::new(), &ReviewerId::new("dr-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

/// Wraps a [`MemoryStore`], optionally failing reads or losing every claim
/// race to a holder that has already let go.
struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    lose_races: AtomicBool,
}

impl FlakyStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            fail_reads: AtomicBool::new(false),
            lose_races: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl WorkStore for FlakyStore {
    async fn insert_intake(&self, new: &NewIntake, now: DateTime<Utc>) -> Result<WorkItem> {
        self.inner.insert_intake(new, now).await
    }

    async fn get_intake(&self, id: IntakeId) -> Result<Option<WorkItem>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Other("connection reset".to_string()));
        }
        self.inner.get_intake(id).await
    }

    async fn mark_paid(&self, id: IntakeId, now: DateTime<Utc>) -> Result<bool> {
        self.inner.mark_paid(id, now).await
    }

    async fn requeue_pending_info(&self, id: IntakeId, now: DateTime<Utc>) -> Result<bool> {
        self.inner.requeue_pending_info(id, now).await
    }

    async fn try_claim(
        &self,
        id: IntakeId,
        reviewer: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>> {
        if self.lose_races.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.try_claim(id, reviewer, now).await
    }

    async fn release_claim(
        &self,
        id: IntakeId,
        reviewer: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.release_claim(id, reviewer, now).await
    }

    async fn transition_owned(
        &self,
        id: IntakeId,
        reviewer: &ReviewerId,
        to: IntakeStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.transition_owned(id, reviewer, to, now).await
    }

    async fn list_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        self.inner.list_stale_claims(claimed_before, limit).await
    }

    async fn reclaim_if_stale(
        &self,
        id: IntakeId,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.reclaim_if_stale(id, claimed_before, now).await
    }

    async fn list_waiting_since(
        &self,
        paid_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        self.inner.list_waiting_since(paid_before, limit).await
    }
}

/// A paid intake in a [`FlakyStore`] with a manager over it.
async fn flaky_harness() -> (Arc<FlakyStore>, ClaimManager, IntakeId) {
    let store = FlakyStore::new();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    ));
    let audit = Arc::new(MemoryStore::new());
    let ledger = ComplianceLedger::new(audit, clock.clone());
    let claims = ClaimManager::new(store.clone(), ledger, clock.clone());

    let item = store
        .insert_intake(&NewIntake::new(RequestType::MedCert), clock.now())
        .await
        .unwrap();
    assert!(store.mark_paid(item.id, clock.now()).await.unwrap());
    (store, claims, item.id)
}

#[tokio::test]
async fn acquired_claim_is_reported_even_if_reads_fail() {
    let (store, claims, id) = flaky_harness().await;
    store.fail_reads.store(true, Ordering::SeqCst);

    let outcome = claims
        .acquire_claim(id, &ReviewerId::new("dr-a"))
        .await
        .unwrap();
    assert!(outcome.is_acquired());

    store.fail_reads.store(false, Ordering::SeqCst);
    let item = store.get_intake(id).await.unwrap().unwrap();
    assert_eq!(item.claimed_by, Some(ReviewerId::new("dr-a")));
}

#[tokio::test]
async fn losing_a_race_to_a_released_claim_reads_as_already_claimed() {
    let (store, claims, id) = flaky_harness().await;
    store.lose_races.store(true, Ordering::SeqCst);

    let outcome = claims
        .acquire_claim(id, &ReviewerId::new("dr-b"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::Rejected {
            reason: ClaimRejection::AlreadyClaimed
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_claims_yield_exactly_one_winner() {
    let h = harness();
    let id = paid_intake(&h, RequestType::MedCert).await;

    let mut tasks = Vec::new();
    for n in 0..32 {
        let claims = h.claims.clone();
        tasks.push(tokio::spawn(async move {
            let reviewer = ReviewerId::new(format!("dr-{n}"));
            let outcome = claims.acquire_claim(id, &reviewer).await.unwrap();
            (reviewer, outcome)
        }));
    }

    let mut winners = Vec::new();
    for task in tasks {
        let (reviewer, outcome) = task.await.unwrap();
        match outcome {
            ClaimOutcome::Acquired { .. } => winners.push(reviewer),
            ClaimOutcome::Rejected { reason } => {
                assert_eq!(reason, ClaimRejection::AlreadyClaimed)
            }
        }
    }

    assert_eq!(winners.len(), 1);
    let item = h.store.get_intake(id).await.unwrap().unwrap();
    assert_eq!(item.claimed_by.as_ref(), winners.first());
}

// ---------------------------------------------------------------------------
// Release and exits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_the_holder_can_release() {
    let h = harness();
    let id = paid_intake(&h, RequestType::MedCert).await;
    let dr_a = ReviewerId::new("dr-a");
    let dr_b = ReviewerId::new("dr-b");
    h.claims.acquire_claim(id, &dr_a).await.unwrap();

    assert!(!h.claims.release_claim(id, &dr_b).await.unwrap());
    let item = h.store.get_intake(id).await.unwrap().unwrap();
    assert_eq!(item.claimed_by, Some(dr_a.clone()));

    assert!(h.claims.release_claim(id, &dr_a).await.unwrap());
    let item = h.store.get_intake(id).await.unwrap().unwrap();
    assert_eq!(item.status, IntakeStatus::Paid);
    assert_eq!(item.claimed_by, None);
    assert_eq!(item.claimed_at, None);

    // Back in the queue for someone else.
    assert!(h.claims.acquire_claim(id, &dr_b).await.unwrap().is_acquired());
}

#[tokio::test]
async fn releasing_twice_is_a_no_op() {
    let h = harness();
    let id = paid_intake(&h, RequestType::MedCert).await;
    let dr_a = ReviewerId::new("dr-a");
    h.claims.acquire_claim(id, &dr_a).await.unwrap();

    assert!(h.claims.release_claim(id, &dr_a).await.unwrap());
    assert!(!h.claims.release_claim(id, &dr_a).await.unwrap());
}

#[tokio::test]
async fn resolution_is_owner_scoped_and_final() {
    let h = harness();
    let id = paid_intake(&h, RequestType::MedCert).await;
    let dr_a = ReviewerId::new("dr-a");
    h.claims.acquire_claim(id, &dr_a).await.unwrap();

    assert!(
        !h.claims
            .resolve_claim(id, &ReviewerId::new("dr-b"), Resolution::Approved)
            .await
            .unwrap()
    );
    assert!(
        h.claims
            .resolve_claim(id, &dr_a, Resolution::Declined)
            .await
            .unwrap()
    );

    let item = h.store.get_intake(id).await.unwrap().unwrap();
    assert_eq!(item.status, IntakeStatus::Declined);
    assert_eq!(item.claimed_by, None);

    let outcome = h.claims.acquire_claim(id, &dr_a).await.unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::Rejected {
            reason: ClaimRejection::NotClaimable(IntakeStatus::Declined)
        }
    );
}

#[tokio::test]
async fn info_request_parks_then_requeues() {
    let h = harness();
    let id = paid_intake(&h, RequestType::Intake).await;
    let dr_a = ReviewerId::new("dr-a");
    h.claims.acquire_claim(id, &dr_a).await.unwrap();

    assert!(h.claims.request_info(id, &dr_a).await.unwrap());
    let item = h.store.get_intake(id).await.unwrap().unwrap();
    assert_eq!(item.status, IntakeStatus::PendingInfo);
    assert_eq!(item.claimed_by, None);

    assert!(
        !h.claims
            .acquire_claim(id, &dr_a)
            .await
            .unwrap()
            .is_acquired()
    );

    assert!(h.queue.patient_responded(id).await.unwrap());
    assert!(!h.queue.patient_responded(id).await.unwrap());
    assert!(h.claims.acquire_claim(id, &dr_a).await.unwrap().is_acquired());
}

// ---------------------------------------------------------------------------
// End to end with the ledger
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_pay_claim_decide_leaves_ordered_timeline() {
    let h = harness();
    let id = paid_intake(&h, RequestType::MedCert).await;
    let dr_a = ReviewerId::new("dr-a");

    h.clock.advance(chrono::Duration::minutes(20));
    h.claims.acquire_claim(id, &dr_a).await.unwrap();

    h.clock.advance(chrono::Duration::minutes(4));
    h.ledger
        .record_outcome_selected(
            AuditContext::clinician(id, RequestType::MedCert, &dr_a),
            TriageOutcome::Approved,
            None,
        )
        .await
        .unwrap();
    assert!(
        h.claims
            .resolve_claim(id, &dr_a, Resolution::Approved)
            .await
            .unwrap()
    );

    let timeline = h.ledger.get_compliance_timeline(id.into()).await.unwrap();
    let types: Vec<_> = timeline.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::RequestCreated,
            EventType::ClinicianOpenedRequest,
            EventType::ClinicianSelectedOutcome,
        ]
    );

    assert_eq!(timeline[0].actor_role, ActorRole::Patient);
    assert_eq!(timeline[0].ip_address.as_deref(), Some("203.0.113.7"));
    assert_eq!(timeline[1].actor_id.as_deref(), Some("dr-a"));
    assert!(timeline[1].is_human_action);
    assert_eq!(timeline[2].outcome, Some(TriageOutcome::Approved));
    assert!(timeline.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert!(timeline.windows(2).all(|w| w[0].seq < w[1].seq));

    let readiness = h.ledger.check_audit_readiness(id.into()).await.unwrap();
    assert!(readiness.ready, "missing: {:?}", readiness.missing);
}
