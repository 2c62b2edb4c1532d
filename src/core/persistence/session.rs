// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-unit-of-work fetch cache.
//!
//! A [`FetchSession`] memoizes entity lookups for the duration of one unit of
//! work (one allocation pass, one filter call) so a pass over a thousand
//! lists does not hammer the store with the same user and event fetches. The
//! cache never outlives the unit of work; callers create a fresh session per
//! pass, which is what bounds staleness.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::entity::{Event, EventId, User, UserId};
use crate::core::error::EngineResult;
use crate::core::persistence::PersistenceHandle;

#[derive(Debug)]
pub struct FetchSession {
    store: PersistenceHandle,
    users: HashMap<UserId, Arc<User>>,
    events: HashMap<EventId, Arc<Event>>,
    hits: u64,
    misses: u64,
}

impl FetchSession {
    pub fn new(store: PersistenceHandle) -> Self {
        Self {
            store,
            users: HashMap::new(),
            events: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn user(&mut self, id: UserId) -> EngineResult<Option<Arc<User>>> {
        if let Some(user) = self.users.get(&id) {
            self.hits += 1;
            return Ok(Some(Arc::clone(user)));
        }
        self.misses += 1;
        match self.store.users.find(id)? {
            Some(user) => {
                let user = Arc::new(user);
                self.users.insert(id, Arc::clone(&user));
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    pub fn event(&mut self, id: EventId) -> EngineResult<Option<Arc<Event>>> {
        if let Some(event) = self.events.get(&id) {
            self.hits += 1;
            return Ok(Some(Arc::clone(event)));
        }
        self.misses += 1;
        match self.store.events.find(id)? {
            Some(event) => {
                let event = Arc::new(event);
                self.events.insert(id, Arc::clone(&event));
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    /// Drop any cached copy of `id` and fetch it again. This is the single
    /// retry the stale-reference handling is allowed.
    pub fn refetch_event(&mut self, id: EventId) -> EngineResult<Option<Arc<Event>>> {
        self.events.remove(&id);
        self.event(id)
    }

    /// Clear everything cached. Marks a unit-of-work boundary when a session
    /// is reused across passes.
    pub fn invalidate(&mut self) {
        self.users.clear();
        self.events.clear();
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
