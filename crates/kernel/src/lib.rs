//! The execution kernel: FSM, node registry, dispatcher, session
//! manager, and the reliability subsystem.
//!
//! The kernel owns all state transitions. HTTP handlers and the chat
//! controller call into [`dispatcher::Dispatcher`] and
//! [`session::SessionManager`]; nothing else writes session state.

pub mod dispatcher;
pub mod fsm;
pub mod registry;
pub mod reliability;
pub mod session;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use registry::{BuiltinNode, NodeContext, NodeRegistry, ResolvedNode};
pub use session::SessionManager;
