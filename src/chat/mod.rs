//! Chat session orchestration.
//!
//! - `session`: the persisted session model and pending-turn bookkeeping
//! - `orchestrator`: [`ChatBot`], the interrupt/resume turn state machine
//! - `approval`: confirmation policy and the async confirmation gate
//! - `store`: write-through, de-duplicated session persistence
//! - `events`: sequence-numbered events for frontends

pub mod approval;
pub mod events;
pub mod orchestrator;
pub mod session;
pub mod store;

pub use approval::{
    ApprovalPolicy, Approver, ConfirmationGate, ConfirmationRequest, GateKey, StaticApprover,
};
pub use events::{ChatEvent, ChatEventEnvelope};
pub use orchestrator::{ChatBot, ChatOptions, ChatRuntime, TurnOutcome, DENIED_BY_USER};
pub use session::{ChatSession, PendingTurn, SessionState, MODEL_METADATA_KEY};
pub use store::{
    generate_session_id, validate_session_id, FileSessionStore, MemorySessionStore, SaveOutcome,
    SessionPersistence, SessionSummary,
};
