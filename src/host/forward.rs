//! Callback slots ("forwards") and their invocation payload.
//!
//! A forward holds the user callbacks registered for one event slot. Any
//! thread may ask whether listeners exist; only the drain loop executes them.

use std::sync::{Arc, PoisonError, RwLock};

use crate::bridge::Bridge;
use crate::host::Handle;

/// One positional callback argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Cell(i64),
    Str(String),
    Handle(Handle),
}

impl Param {
    pub fn as_cell(&self) -> Option<i64> {
        match self {
            Param::Cell(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Param::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            Param::Handle(h) => Some(*h),
            _ => None,
        }
    }
}

/// A registered user callback.
pub type Listener = Arc<dyn Fn(&Bridge, &[Param]) + Send + Sync>;

/// Callback slot for one event kind.
#[derive(Default)]
pub struct Forward {
    listeners: RwLock<Vec<Listener>>,
}

impl Forward {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is registered with `listener`.
    pub fn set(&self, listener: Listener) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.clear();
        listeners.push(listener);
    }

    /// Add a listener alongside the existing ones.
    pub fn add(&self, listener: Listener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Unregister every listener.
    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn function_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn has_listeners(&self) -> bool {
        self.function_count() > 0
    }

    /// Invoke every listener with `params`, in registration order.
    ///
    /// Listeners are copied out first so a callback may re-register or clear
    /// this forward while it runs.
    pub fn execute(&self, bridge: &Bridge, params: &[Param]) -> usize {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener(bridge, params);
        }
        listeners.len()
    }
}

impl std::fmt::Debug for Forward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forward")
            .field("listeners", &self.function_count())
            .finish()
    }
}
