pub mod calendar;
pub mod constraint;
pub mod event;
pub mod journal;
pub mod mirror;
pub mod policy;
pub mod session;

pub use calendar::{Calendar, CalendarType};
pub use constraint::{validate_constraint, Constraint, ConstraintKind};
pub use event::{CanonicalEvent, EventStatus, Source, Transparency};
pub use journal::{ChangeType, JournalEntry};
pub use mirror::{Mirror, MirrorState};
pub use policy::{CalendarKind, DetailLevel, Policy, PolicyEdge, PolicyWithEdges};
pub use session::{Candidate, Hold, HoldState, SchedulingSession, SessionStatus};
