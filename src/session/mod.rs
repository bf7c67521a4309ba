//! Session state: the live in-memory model, the process-wide store that
//! hands out shared handles to it, the append-only JSONL persistence
//! layer, and the interrupt queue the async-check gate feeds into.

pub mod interrupt_queue;
pub mod model;
pub mod persistence;
pub mod store;

pub use interrupt_queue::InterruptQueue;
pub use model::{Interrupt, Session, SummaryBlock};
pub use persistence::{
    append_record, list_persisted_sessions_for_workspace, pick_session, read_records, resume,
    PersistedRecord, PersistedSessionSummary, ReplayedSession,
};
pub use store::{SessionStore, SharedSession};
