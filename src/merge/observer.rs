// src/merge/observer.rs

//! Observer sinks for policy decisions
//!
//! Triggers report every decision that changes what lands on disk (or skips
//! a destructive action) through an [`Observer`]. The engine owns one boxed
//! observer per operation.

use std::cell::RefCell;
use std::rc::Rc;
use tracing::{info, warn};

/// Receives user-facing messages from triggers
pub trait Observer {
    fn warn(&self, message: &str);

    fn info(&self, message: &str) {
        let _ = message;
    }
}

/// Forwards observer messages to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn warn(&self, message: &str) {
        warn!("{}", message);
    }

    fn info(&self, message: &str) {
        info!("{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverMessage {
    pub level: MessageLevel,
    pub text: String,
}

/// Collects messages for later inspection
///
/// Clones share the same buffer, so a caller can keep one handle while the
/// engine owns another. Messages are also forwarded to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    messages: Rc<RefCell<Vec<ObserverMessage>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ObserverMessage> {
        self.messages.borrow().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.texts(MessageLevel::Warn)
    }

    pub fn infos(&self) -> Vec<String> {
        self.texts(MessageLevel::Info)
    }

    fn texts(&self, level: MessageLevel) -> Vec<String> {
        self.messages
            .borrow()
            .iter()
            .filter(|m| m.level == level)
            .map(|m| m.text.clone())
            .collect()
    }

    fn push(&self, level: MessageLevel, text: &str) {
        self.messages.borrow_mut().push(ObserverMessage {
            level,
            text: text.to_string(),
        });
    }
}

impl Observer for RecordingObserver {
    fn warn(&self, message: &str) {
        warn!("{}", message);
        self.push(MessageLevel::Warn, message);
    }

    fn info(&self, message: &str) {
        info!("{}", message);
        self.push(MessageLevel::Info, message);
    }
}
