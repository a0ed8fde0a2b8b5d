// Declare modules
pub mod event;
pub mod sync;
pub mod tracked;

// Re-export so callers can use `crate::models::Event` and friends directly.
pub use event::{Event, EventStatus, EventTime, Person, RawProperty, Transparency};
pub use sync::{Diagnostic, DiagnosticKind, OperationFailure, OperationKind, PassStatus, SyncReport};
pub use tracked::{DestinationIds, StateSnapshot, TrackedEvent};
