//! Stream handle registry

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::error::{AudioError, Result};

/// Opaque stream handle handed to clients
pub type StreamHandle = i32;

#[derive(Debug)]
struct HandleTable<T> {
    next: StreamHandle,
    entries: HashMap<StreamHandle, Arc<T>>,
}

/// Maps handles to live stream controllers.
///
/// Handles count up from 1, wrap back to 1 after the maximum and skip
/// values still in use, so a handle is only reused after it was released.
#[derive(Debug)]
pub struct StreamHandleRegistry<T> {
    max_handle: StreamHandle,
    table: Mutex<HandleTable<T>>,
}

impl<T> Default for StreamHandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StreamHandleRegistry<T> {
    pub fn new() -> Self {
        Self::with_max_handle(StreamHandle::MAX)
    }

    /// Registry whose handles stay within `1..=max_handle`
    pub fn with_max_handle(max_handle: StreamHandle) -> Self {
        Self {
            max_handle: max_handle.max(1),
            table: Mutex::new(HandleTable {
                next: 1,
                entries: HashMap::new(),
            }),
        }
    }

    /// Register a controller and return its new handle
    pub fn add(&self, entry: Arc<T>) -> Result<StreamHandle> {
        let mut table = self.table.lock();
        if table.entries.len() >= self.max_handle as usize {
            return Err(AudioError::NoFreeHandles);
        }

        let mut handle = table.next;
        while table.entries.contains_key(&handle) {
            handle = self.following(handle);
        }
        table.next = self.following(handle);
        table.entries.insert(handle, entry);
        Ok(handle)
    }

    fn following(&self, handle: StreamHandle) -> StreamHandle {
        if handle >= self.max_handle {
            1
        } else {
            handle + 1
        }
    }

    /// Look up a controller
    pub fn get(&self, handle: StreamHandle) -> Result<Arc<T>> {
        self.table
            .lock()
            .entries
            .get(&handle)
            .cloned()
            .ok_or_else(|| AudioError::invalid_handle(handle))
    }

    /// Remove a controller. Returns `None` when it was already removed.
    pub fn remove(&self, handle: StreamHandle) -> Option<Arc<T>> {
        self.table.lock().entries.remove(&handle)
    }

    /// Take every controller out of the registry
    pub fn drain(&self) -> Vec<(StreamHandle, Arc<T>)> {
        self.table.lock().entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
