//! Durable repositories — JSON/JSONL files under the configured state
//! path, one per concern, with a write-through in-memory copy.

pub mod events;
pub mod flows;
pub mod idempotency;
pub mod nodes;
pub mod sessions;
pub mod snapshots;

pub use events::EventRepository;
pub use flows::FlowRepository;
pub use idempotency::{Gate, IdempotencyLog, IdempotencyStatus};
pub use nodes::{NodeKind, NodeRegistration, NodeRepository};
pub use sessions::{SessionRecord, SessionRepository, SessionStatus};
pub use snapshots::{Snapshot, SnapshotRepository};
