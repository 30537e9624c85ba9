//! The chat controller runtime: frame vocabulary, SSE writer, per-tenant
//! admission control, and the turn loop.

pub mod frames;
pub mod limits;
pub mod sse;
pub mod turn;

pub use frames::{ChatFrame, MessageCursor, StepStatus, ThinkingPhase};
pub use turn::{run_turn, FileRef, IncomingMessage, TurnInput};
