use std::collections::{BTreeSet, HashMap};

use crate::error::CoreError;
use crate::models::ThreadId;
use crate::store::MessageStore;

/// Memoized address to thread id lookups for one import run.
///
/// Keys are the raw address strings; two spellings of the same number
/// resolve separately.
#[derive(Debug, Default)]
pub struct ThreadCache {
    ids: HashMap<String, ThreadId>,
    lookups: usize,
}

impl ThreadCache {
    pub fn resolve<S: MessageStore + ?Sized>(
        &mut self,
        store: &mut S,
        address: &str,
    ) -> Result<ThreadId, CoreError> {
        if let Some(id) = self.ids.get(address) {
            return Ok(*id);
        }
        let id = store.get_or_create_thread_id(address)?;
        self.lookups += 1;
        self.ids.insert(address.to_string(), id);
        Ok(id)
    }

    /// Number of times the store was consulted.
    pub fn lookups(&self) -> usize {
        self.lookups
    }
}

/// State owned by a single import run.
#[derive(Debug, Default)]
pub struct ImportContext {
    pub threads: ThreadCache,
    pub modified_threads: BTreeSet<ThreadId>,
}

impl ImportContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_modified(&mut self, thread_id: ThreadId) {
        self.modified_threads.insert(thread_id);
    }
}
