//! Queue coordinator and editor.
//!
//! The coordinator owns the scheduling loop: it picks the next article,
//! dispatches fetches to the transport, collects completions, finalizes
//! files and jobs and drives the persistence policy. The editor is the
//! stable edit surface applied under the same queue lock.

pub mod coordinator;
pub mod editor;

pub use coordinator::QueueCoordinator;
pub use editor::{EditAction, MatchMode};
