//! Core domain types for Hearth.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod event;
mod ids;
mod message;
mod session;

pub use event::{Delegation, StreamEvent, TraceEvent};
pub use ids::{SessionId, TraceId};
pub use message::{ClarificationOption, Feedback, Message, MessageError, Role, RoutedAgent};
pub use session::{ChatSession, DEFAULT_SESSION_TITLE, derive_title};
