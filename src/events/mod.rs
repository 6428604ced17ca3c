//! # Lifecycle Events
//!
//! In-process fan-out of task and step transitions. Event names live in
//! [`crate::constants::events`].

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};
