// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Hook registry for managing registered hooks and their metadata.

use crate::error::EngineError;
use crate::events::HookEvent;
use crate::handlers::AsyncHookHandler;
use crate::metadata::HookMetadata;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A registered hook as seen by the scheduler: resolved handler plus a
/// snapshot of its metadata at dispatch time.
#[derive(Clone)]
pub struct RegisteredHook {
    /// Unique identity of this hook.
    pub id: String,
    /// The handler to execute.
    pub handler: AsyncHookHandler,
    pub metadata: HookMetadata,
    /// Registration order; breaks scheduling ties.
    pub sequence: u64,
}

impl std::fmt::Debug for RegisteredHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHook")
            .field("id", &self.id)
            .field("handler", &self.handler.name())
            .field("metadata", &self.metadata)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Registry of hooks keyed by identity, with an event index.
///
/// # Concurrency Model
///
/// Both maps are sharded (`DashMap`), so metadata updates for one hook do not
/// contend with lookups for hooks in other shards. Metadata is mutated in
/// place after every execution; the event index only changes on
/// registration.
pub struct HookRegistry {
    hooks: DashMap<String, RegisteredHook>,
    hooks_by_event: DashMap<HookEvent, Vec<String>>,
    next_sequence: AtomicU64,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: DashMap::new(),
            hooks_by_event: DashMap::new(),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Register a hook. Identities are unique.
    pub fn register(
        &self,
        id: impl Into<String>,
        metadata: HookMetadata,
        handler: AsyncHookHandler,
    ) -> Result<(), EngineError> {
        let id = id.into();
        let event = metadata.event;

        match self.hooks.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::HookAlreadyExists(id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(RegisteredHook {
                    id: id.clone(),
                    handler,
                    metadata,
                    sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
                });
            }
        }

        self.hooks_by_event.entry(event).or_default().push(id.clone());
        tracing::debug!(hook_id = %id, event = %event, "Registered hook");
        Ok(())
    }

    /// Remove a hook by identity.
    pub fn unregister(&self, id: &str) -> Option<RegisteredHook> {
        let (_, hook) = self.hooks.remove(id)?;
        if let Some(mut ids) = self.hooks_by_event.get_mut(&hook.metadata.event) {
            ids.retain(|h| h != id);
        }
        Some(hook)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.hooks.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<RegisteredHook> {
        self.hooks.get(id).map(|hook| hook.clone())
    }

    /// All hooks for an event, in registration order.
    pub fn hooks_for_event(&self, event: HookEvent) -> Vec<RegisteredHook> {
        let ids = self
            .hooks_by_event
            .get(&event)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn metadata(&self, id: &str) -> Option<HookMetadata> {
        self.hooks.get(id).map(|hook| hook.metadata.clone())
    }

    /// Mutate a hook's metadata in place. Returns false for unknown hooks.
    pub fn update_metadata(&self, id: &str, update: impl FnOnce(&mut HookMetadata)) -> bool {
        match self.hooks.get_mut(id) {
            Some(mut hook) => {
                update(&mut hook.metadata);
                true
            }
            None => false,
        }
    }

    /// Every hook, in registration order.
    pub fn all(&self) -> Vec<RegisteredHook> {
        let mut hooks: Vec<_> = self.hooks.iter().map(|hook| hook.clone()).collect();
        hooks.sort_by_key(|hook| hook.sequence);
        hooks
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::NoOpHandler;
    use std::sync::Arc;

    fn register(registry: &HookRegistry, id: &str, event: HookEvent) {
        registry
            .register(id, HookMetadata::new(event), Arc::new(NoOpHandler::new(id)))
            .unwrap();
    }

    #[test]
    fn test_register_and_lookup_by_event() {
        let registry = HookRegistry::new();
        register(&registry, "b.sh", HookEvent::PreToolUse);
        register(&registry, "a.sh", HookEvent::PreToolUse);
        register(&registry, "c.sh", HookEvent::Stop);

        let ids: Vec<_> = registry
            .hooks_for_event(HookEvent::PreToolUse)
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec!["b.sh", "a.sh"]);
        assert_eq!(registry.hooks_for_event(HookEvent::Notification).len(), 0);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = HookRegistry::new();
        register(&registry, "a.sh", HookEvent::Stop);
        let err = registry
            .register(
                "a.sh",
                HookMetadata::new(HookEvent::Stop),
                Arc::new(NoOpHandler::new("a.sh")),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::HookAlreadyExists(id) if id == "a.sh"));
    }

    #[test]
    fn test_update_metadata_in_place() {
        let registry = HookRegistry::new();
        register(&registry, "a.sh", HookEvent::Stop);

        assert!(registry.update_metadata("a.sh", |m| m.record_execution(false, 50.0)));
        assert!(!registry.update_metadata("missing", |m| m.record_execution(true, 1.0)));

        let meta = registry.metadata("a.sh").unwrap();
        assert_eq!(meta.execution_count, 1);
        assert!(meta.success_rate < 1.0);
    }

    #[test]
    fn test_unregister_removes_from_event_index() {
        let registry = HookRegistry::new();
        register(&registry, "a.sh", HookEvent::Stop);
        register(&registry, "b.sh", HookEvent::Stop);

        assert!(registry.unregister("a.sh").is_some());
        assert!(registry.unregister("a.sh").is_none());
        let remaining: Vec<_> = registry
            .hooks_for_event(HookEvent::Stop)
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(remaining, vec!["b.sh"]);
        assert_eq!(registry.all().len(), 1);
    }
}
