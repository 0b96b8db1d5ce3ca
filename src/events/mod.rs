//! Notification system for chat client observers
//!
//! This module provides:
//! - `ChatNotification`: typed notifications emitted after every state change
//! - `EventBus`: broadcast channel distributing notifications to any number of observers

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{ChatNotification, ErrorKind, NotificationEmitter};
