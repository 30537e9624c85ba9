//! Storage layer for the Maestro runtime.
//!
//! Two tiers:
//! - the **fast store** ([`fast::FastStore`], [`bus::EventBus`],
//!   [`blackboard::Blackboard`]) — authoritative for "current state",
//!   tenant-scoped by key prefix, TTL-managed;
//! - the **durable repositories** ([`repo`]) — JSON/JSONL files that
//!   survive restarts and serve audit replay and cold-swap rehydration.
//!
//! Consistency between the two tiers is eventual; the event log is the
//! reconciliation source.

pub mod blackboard;
pub mod bus;
pub mod fast;
pub mod repo;
