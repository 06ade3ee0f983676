use super::{ConversationContext, Turn};
use ember_sdk::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

type ContextEntry = Arc<Mutex<ConversationContext>>;

/// Bounded, TTL-evicting map of context id to conversation context.
///
/// The map lock is only held for lookups and structural changes. Each
/// context carries its own lock so that history mutation for one id is
/// serialized regardless of which drain cycle the request landed in.
/// Lock order is always map, then context.
pub struct ConversationContextStore {
    entries: Mutex<HashMap<String, ContextEntry>>,
    capacity: usize,
    ttl: Duration,
    default_max_length: AtomicUsize,
}

impl ConversationContextStore {
    /// Create a store holding at most `capacity` contexts
    pub fn new(capacity: usize, ttl: Duration, max_length: usize) -> Self {
        info!(
            "Initializing context store (capacity: {}, ttl: {:?}, max length: {})",
            capacity, ttl, max_length
        );
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
            capacity: capacity.max(1),
            ttl,
            default_max_length: AtomicUsize::new(max_length),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Max length given to contexts created from now on
    pub fn default_max_length(&self) -> usize {
        self.default_max_length.load(Ordering::Acquire)
    }

    /// Change the max length for subsequently created contexts.
    ///
    /// Existing contexts keep the limit they were created with.
    pub fn set_default_max_length(&self, max_length: usize) {
        self.default_max_length.store(max_length, Ordering::Release);
    }

    /// Return the live context for `id`, creating it if absent or expired.
    pub fn create_or_get(&self, id: &str, system_prompt: Option<&str>) -> ContextEntry {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(id) {
            let mut ctx = entry.lock();
            if !ctx.is_expired(self.ttl) {
                ctx.touch();
                drop(ctx);
                return Arc::clone(entry);
            }
            drop(ctx);
            entries.remove(id);
            debug!(context_id = %id, "Context expired, recreating");
        }

        self.insert_locked(&mut entries, id, system_prompt.unwrap_or_default())
    }

    /// Create a fresh context for `id`, replacing any existing one.
    pub fn create(&self, id: &str, system_prompt: &str) -> ContextEntry {
        let mut entries = self.entries.lock();
        if entries.remove(id).is_some() {
            debug!(context_id = %id, "Replacing existing context");
        }
        self.insert_locked(&mut entries, id, system_prompt)
    }

    fn insert_locked(
        &self,
        entries: &mut HashMap<String, ContextEntry>,
        id: &str,
        system_prompt: &str,
    ) -> ContextEntry {
        while entries.len() >= self.capacity {
            if !Self::evict_lru_locked(entries) {
                break;
            }
        }

        let ctx = ConversationContext::new(id, system_prompt, self.default_max_length());
        let entry = Arc::new(Mutex::new(ctx));
        entries.insert(id.to_string(), Arc::clone(&entry));
        debug!(context_id = %id, "Created context");
        entry
    }

    fn evict_lru_locked(entries: &mut HashMap<String, ContextEntry>) -> bool {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.lock().last_used())
            .map(|(id, _)| id.clone());

        match oldest {
            Some(id) => {
                entries.remove(&id);
                debug!(context_id = %id, "Evicted least recently used context");
                true
            }
            None => false,
        }
    }

    /// Snapshot of the live context for `id`.
    ///
    /// An expired entry is removed and `None` returned.
    pub fn get(&self, id: &str) -> Option<ConversationContext> {
        let mut entries = self.entries.lock();
        let entry = entries.get(id)?;
        let ctx = entry.lock().clone();
        if ctx.is_expired(self.ttl) {
            entries.remove(id);
            debug!(context_id = %id, "Context expired on lookup");
            return None;
        }
        Some(ctx)
    }

    /// Atomically append a turn to `id` and trim its history.
    ///
    /// Fails with `EngineError::Resource` when the context is gone, which
    /// happens when it was evicted or purged while the backend was running.
    pub fn append_turn(&self, id: &str, user: &str, assistant: &str) -> Result<()> {
        let entry = self.entries.lock().get(id).map(Arc::clone);
        let entry = entry.ok_or_else(|| {
            EngineError::Resource(format!("context {} was dropped before its turn was recorded", id))
        })?;

        let mut ctx = entry.lock();
        let dropped = ctx.append_turn(Turn::new(user, assistant));
        if dropped > 0 {
            debug!(
                context_id = %id,
                dropped,
                length = ctx.length(),
                "Trimmed context history"
            );
        }
        Ok(())
    }

    /// Render the prompt for a new `input` on `id` without mutating anything.
    pub fn build_prompt(&self, id: &str, input: &str) -> Option<String> {
        let entry = self.entries.lock().get(id).map(Arc::clone)?;
        let ctx = entry.lock();
        if ctx.is_expired(self.ttl) {
            return None;
        }
        Some(ctx.build_prompt(input))
    }

    /// Remove `id`. Unknown ids are ignored.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.entries.lock().remove(id).is_some();
        if removed {
            debug!(context_id = %id, "Removed context");
        }
        removed
    }

    /// Remove every TTL-expired context, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.lock().is_expired(self.ttl));
        let removed = before - entries.len();

        if removed > 0 {
            debug!("Cleaned up {} expired contexts", removed);
        }
        removed
    }

    /// Drop every context, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Release spare map capacity
    pub fn shrink(&self) {
        self.entries.lock().shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Sum of the lengths of all live contexts
    pub fn total_length(&self) -> usize {
        let entries = self.entries.lock();
        entries.values().map(|entry| entry.lock().length()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> ConversationContextStore {
        ConversationContextStore::new(capacity, Duration::from_secs(60), 200)
    }

    #[tokio::test]
    async fn test_create_or_get_returns_existing() {
        let store = store(4);
        store.create_or_get("a", Some("first"));
        store.create_or_get("a", Some("second"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().system_prompt(), "first");
    }

    #[tokio::test]
    async fn test_create_replaces_existing() {
        let store = store(4);
        store.create_or_get("a", Some("first"));
        store.append_turn("a", "q", "r").unwrap();
        store.create("a", "second");

        let ctx = store.get("a").unwrap();
        assert_eq!(ctx.system_prompt(), "second");
        assert_eq!(ctx.turn_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_used() {
        let store = store(2);
        store.create_or_get("a", None);
        tokio::time::advance(Duration::from_secs(1)).await;
        store.create_or_get("b", None);
        tokio::time::advance(Duration::from_secs(1)).await;

        // Touch "a" so "b" becomes the oldest
        store.create_or_get("a", None);
        tokio::time::advance(Duration::from_secs(1)).await;
        store.create_or_get("c", None);

        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
        assert!(store.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_recreated() {
        let store = store(4);
        store.create_or_get("a", Some("old"));
        store.append_turn("a", "q", "r").unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        store.create_or_get("a", Some("new"));

        let ctx = store.get("a").unwrap();
        assert_eq!(ctx.system_prompt(), "new");
        assert_eq!(ctx.turn_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let store = store(4);
        store.create_or_get("a", None);
        tokio::time::advance(Duration::from_secs(40)).await;
        store.create_or_get("b", None);
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(store.evict_expired(), 1);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
    }

    #[tokio::test]
    async fn test_append_to_missing_context_is_resource_error() {
        let store = store(4);
        let err = store.append_turn("ghost", "q", "r").unwrap_err();
        assert!(matches!(err, EngineError::Resource(_)));
    }

    #[tokio::test]
    async fn test_build_prompt_has_no_side_effects() {
        let store = store(4);
        store.create_or_get("a", Some("sys"));
        store.append_turn("a", "q1", "r1").unwrap();

        let before = store.get("a").unwrap();
        let prompt = store.build_prompt("a", "q2").unwrap();
        let after = store.get("a").unwrap();

        assert!(prompt.contains("User: q1\nAssistant: r1"));
        assert!(prompt.ends_with("User: q2\nAssistant:"));
        assert_eq!(before.usage_count(), after.usage_count());
        assert_eq!(before.turn_count(), after.turn_count());
        assert!(store.build_prompt("missing", "q").is_none());
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let store = store(4);
        store.create_or_get("a", None);
        assert!(!store.remove("zzz"));
        assert_eq!(store.len(), 1);
        assert!(store.remove("a"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_default_max_length_applies_to_new_contexts_only() {
        let store = store(4);
        store.create_or_get("before", None);
        store.set_default_max_length(50);
        store.create_or_get("after", None);

        assert_eq!(store.get("before").unwrap().max_length(), 200);
        assert_eq!(store.get("after").unwrap().max_length(), 50);
    }

    #[tokio::test]
    async fn test_clear_and_total_length() {
        let store = store(4);
        store.create_or_get("a", Some("abcd"));
        store.create_or_get("b", Some("ef"));
        assert_eq!(store.total_length(), 6);

        assert_eq!(store.clear(), 2);
        store.shrink();
        assert_eq!(store.total_length(), 0);
    }
}
