//! # review-queue
//!
//! Coordination layer for the clinician review queue of a patient-intake
//! service.
//!
//! Reviewers take exclusive, leased claims on paid intakes; periodic workers
//! return abandoned claims to the queue, watch queue age against the SLA and
//! retry failed side-effects with exponential backoff. Every clinically
//! relevant action is appended to an immutable compliance ledger.
//!
//! Storage sits behind the traits in [`store`]: Postgres via sqlx ([`db`])
//! in production, [`store::MemoryStore`] in tests. Time comes from an
//! injected [`clock::Clock`].

pub mod alert;
pub mod claim;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod ledger;
pub mod model;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod worker;
