//! Generation-checked handle tables.
//!
//! # Responsibilities
//! - Issue opaque handles for sessions and documents
//! - Resolve a handle back to its shared object
//! - Invalidate a handle permanently on release
//!
//! # Design Decisions
//! - Slots are reused; a generation counter makes stale handles fail lookup
//! - `release` hands the removed object back so it is dropped outside the lock
//! - Objects are stored as `Arc<T>` so a lookup never borrows the table

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{BridgeError, BridgeResult};

/// Resource family a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    WsClient,
    WsServer,
    HttpRequest,
    Json,
}

impl std::fmt::Display for HandleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandleKind::WsClient => "WebSocket client",
            HandleKind::WsServer => "WebSocket server",
            HandleKind::HttpRequest => "HTTP request",
            HandleKind::Json => "JSON",
        };
        f.write_str(name)
    }
}

/// Opaque capability token identifying one live resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    kind: HandleKind,
    index: u32,
    generation: u32,
}

impl Handle {
    /// Resource family of this handle.
    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}#{}.{}", self.kind, self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

/// Table of live objects of one handle kind.
pub struct HandleTable<T> {
    kind: HandleKind,
    slots: Mutex<Slots<T>>,
}

impl<T> HandleTable<T> {
    /// Create an empty table issuing handles of `kind`.
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an object and return its new handle.
    pub fn insert(&self, value: Arc<T>) -> Handle {
        let mut slots = self.lock();
        slots.live += 1;
        if let Some(index) = slots.free.pop() {
            let slot = &mut slots.entries[index as usize];
            slot.value = Some(value);
            return Handle {
                kind: self.kind,
                index,
                generation: slot.generation,
            };
        }
        let index = slots.entries.len() as u32;
        slots.entries.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle {
            kind: self.kind,
            index,
            generation: 0,
        }
    }

    fn check_kind(&self, handle: Handle) -> BridgeResult<()> {
        if handle.kind != self.kind {
            return Err(BridgeError::WrongHandleKind {
                handle,
                expected: self.kind,
            });
        }
        Ok(())
    }

    /// Resolve a handle to its object.
    pub fn get(&self, handle: Handle) -> BridgeResult<Arc<T>> {
        self.check_kind(handle)?;
        let slots = self.lock();
        slots
            .entries
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.clone())
            .ok_or(BridgeError::InvalidHandle(handle))
    }

    /// Whether the handle still resolves.
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_ok()
    }

    /// Invalidate a handle, returning the object it referred to.
    pub fn release(&self, handle: Handle) -> BridgeResult<Arc<T>> {
        self.check_kind(handle)?;
        let mut slots = self.lock();
        let slot = slots
            .entries
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
            .ok_or(BridgeError::InvalidHandle(handle))?;
        let value = slot.value.take().ok_or(BridgeError::InvalidHandle(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        slots.free.push(handle.index);
        slots.live -= 1;
        Ok(value)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every handle, returning the objects for the caller to drop.
    pub fn clear(&self) -> Vec<Arc<T>> {
        let mut slots = self.lock();
        let mut released = Vec::with_capacity(slots.live);
        let mut freed = Vec::new();
        for (index, slot) in slots.entries.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                released.push(value);
                freed.push(index as u32);
            }
        }
        slots.free.extend(freed);
        slots.live = 0;
        released
    }
}
