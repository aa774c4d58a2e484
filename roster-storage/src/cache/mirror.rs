//! In-memory index of the latest known entry per key.

use super::watermark::Watermark;
use roster_core::{EventType, KeyValue, KvEvent, Revision, StorageError, StorageResult};
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct MirrorState {
    entries: BTreeMap<Vec<u8>, KeyValue>,
    watermark: Watermark,
}

/// Ordered key-value mirror of one data type.
///
/// Single writer (the owning cacher's sync loop), many readers. Events
/// behind the watermark, or already covered by the latest listing, are
/// ignored so the mirror never moves backward.
#[derive(Debug, Default)]
pub struct Mirror {
    state: RwLock<MirrorState>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> StorageResult<Option<KeyValue>> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.entries.get(key).cloned())
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    pub fn watermark(&self) -> StorageResult<Watermark> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.watermark)
    }

    pub fn len(&self) -> StorageResult<usize> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.entries.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Apply one watch event. Returns false when the event is stale and
    /// was skipped.
    pub fn apply(&self, event: &KvEvent) -> StorageResult<bool> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        if !state.watermark.advance(event.revision) {
            return Ok(false);
        }
        match event.action {
            EventType::Insert | EventType::Update => {
                state.entries.insert(event.kv.key.clone(), event.kv.clone());
            }
            EventType::Delete => {
                state.entries.remove(&event.kv.key);
            }
        }
        Ok(true)
    }

    /// Replace the whole content with a fresh listing and return the
    /// events that turn the old content into the new one.
    pub fn replace(&self, entries: Vec<KeyValue>, revision: Revision) -> StorageResult<Vec<KvEvent>> {
        let mut fresh: BTreeMap<Vec<u8>, KeyValue> = entries
            .into_iter()
            .map(|kv| (kv.key.clone(), kv))
            .collect();

        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        state.watermark.relist(revision);
        let event_revision = state.watermark.revision;

        let mut events = Vec::new();
        for (key, old) in &state.entries {
            if !fresh.contains_key(key) {
                events.push(KvEvent::new(
                    EventType::Delete,
                    old.clone().strip_value(),
                    event_revision,
                ));
            }
        }
        for (key, new) in &fresh {
            match state.entries.get(key) {
                None => events.push(KvEvent::new(EventType::Insert, new.clone(), event_revision)),
                Some(old) if old != new => {
                    events.push(KvEvent::new(EventType::Update, new.clone(), event_revision))
                }
                Some(_) => {}
            }
        }

        std::mem::swap(&mut state.entries, &mut fresh);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::Value;

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue::new(key, Value::Text(value.to_string()))
    }

    #[test]
    fn test_apply_insert_update_delete() {
        let mirror = Mirror::new();
        mirror
            .apply(&KvEvent::new(EventType::Insert, kv("/a", "1"), 1))
            .expect("apply should succeed");
        mirror
            .apply(&KvEvent::new(EventType::Update, kv("/a", "2"), 2))
            .expect("apply should succeed");
        let got = mirror.get(b"/a").expect("get should succeed").expect("present");
        assert_eq!(got.value, Some(Value::Text("2".into())));

        mirror
            .apply(&KvEvent::new(EventType::Delete, KeyValue::key_only("/a"), 3))
            .expect("apply should succeed");
        assert!(mirror.get(b"/a").expect("get should succeed").is_none());
        assert_eq!(mirror.watermark().expect("watermark").revision, 3);
    }

    #[test]
    fn test_stale_event_is_skipped() {
        let mirror = Mirror::new();
        mirror
            .apply(&KvEvent::new(EventType::Insert, kv("/a", "new"), 5))
            .expect("apply should succeed");
        let applied = mirror
            .apply(&KvEvent::new(EventType::Update, kv("/a", "old"), 4))
            .expect("apply should succeed");
        assert!(!applied);
        let got = mirror.get(b"/a").expect("get").expect("present");
        assert_eq!(got.value, Some(Value::Text("new".into())));
        assert_eq!(mirror.watermark().expect("watermark").revision, 5);
    }

    #[test]
    fn test_event_covered_by_listing_is_skipped() {
        let mirror = Mirror::new();
        mirror.replace(vec![kv("/a", "1"), kv("/b", "1")], 7).expect("replace");

        let covered = mirror
            .apply(&KvEvent::new(EventType::Insert, kv("/b", "1"), 7))
            .expect("apply should succeed");
        assert!(!covered);

        let next = mirror
            .apply(&KvEvent::new(EventType::Insert, kv("/c", "1"), 8))
            .expect("apply should succeed");
        assert!(next);
        let watermark = mirror.watermark().expect("watermark");
        assert_eq!((watermark.revision, watermark.listed), (8, 7));
    }

    #[test]
    fn test_scan_prefix_is_bounded() {
        let mirror = Mirror::new();
        for (i, k) in ["/a/1", "/a/2", "/ab", "/b/1"].iter().enumerate() {
            mirror
                .apply(&KvEvent::new(EventType::Insert, kv(k, "v"), i as i64 + 1))
                .expect("apply should succeed");
        }
        let keys: Vec<String> = mirror
            .scan_prefix(b"/a/")
            .expect("scan should succeed")
            .iter()
            .map(|kv| kv.key_str().into_owned())
            .collect();
        assert_eq!(keys, vec!["/a/1", "/a/2"]);
    }

    #[test]
    fn test_replace_reports_diff() {
        let mirror = Mirror::new();
        mirror
            .replace(vec![kv("/a", "1"), kv("/b", "1")], 10)
            .expect("replace should succeed");

        let events = mirror
            .replace(vec![kv("/b", "2"), kv("/c", "1")], 12)
            .expect("replace should succeed");
        let summary: Vec<(EventType, String)> = events
            .iter()
            .map(|e| (e.action, e.kv.key_str().into_owned()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (EventType::Delete, "/a".to_string()),
                (EventType::Update, "/b".to_string()),
                (EventType::Insert, "/c".to_string()),
            ]
        );
        assert_eq!(mirror.len().expect("len"), 2);
        assert_eq!(mirror.watermark().expect("watermark").revision, 12);
    }

    #[test]
    fn test_replace_keeps_watermark_when_listing_is_older() {
        let mirror = Mirror::new();
        mirror.replace(vec![kv("/a", "1")], 10).expect("replace");
        let events = mirror.replace(vec![kv("/a", "1")], 8).expect("replace");
        assert!(events.is_empty());
        assert_eq!(mirror.watermark().expect("watermark").revision, 10);
    }
}
