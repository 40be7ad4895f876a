//! In-memory fake for the store boundary (testing only)
//!
//! `MemoryHashStore` satisfies the [`HashStore`] contract without a
//! server: one mutex guards the whole keyspace, so each script call is
//! applied atomically just like a Lua script on the real store. Expiry is
//! tracked with `tokio::time::Instant`, which lets tests drive it with a
//! paused clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{ErrorCode, StoreError};
use crate::store::*;

#[derive(Debug, Clone)]
struct Entry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
    /// Insertion order; scan cursors walk slots, not sorted keys.
    slot: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-memory hash store backed by a `HashMap<key, hash>`.
#[derive(Debug, Default)]
pub struct MemoryHashStore {
    keys: Mutex<HashMap<String, Entry>>,
    next_slot: AtomicU64,
    scan_calls: AtomicUsize,
    fail_scan_after: Option<usize>,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose scans fail once `pages` scan calls have succeeded.
    pub fn failing_scan_after(pages: usize) -> Self {
        Self {
            fail_scan_after: Some(pages),
            ..Self::default()
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let mut keys = self.lock();
        purge_expired(&mut keys, Instant::now());
        keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write raw hash fields, bypassing the scripts.
    pub fn insert_raw(&self, key: &str, fields: &[(&str, &str)]) {
        let mut keys = self.lock();
        let entry = keys.entry(key.to_string()).or_insert_with(|| Entry {
            fields: HashMap::new(),
            expires_at: None,
            slot: self.allocate_slot(),
        });
        for (field, value) in fields {
            entry.fields.insert(field.to_string(), value.to_string());
        }
    }

    fn allocate_slot(&self) -> u64 {
        self.next_slot.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn execute(&self, call: &ScriptCall) -> StoreResult<ScriptReply> {
        let mut keys = self.lock();
        let now = Instant::now();
        purge_expired(&mut keys, now);

        let key = call.storage_key();
        let exists = keys.contains_key(key);

        match call {
            ScriptCall::Create {
                fields_json,
                ttl_seconds,
                ..
            } => {
                if exists {
                    return Ok(ScriptReply::error(
                        ErrorCode::EntityAlreadyExists,
                        "entity already exist",
                    ));
                }
                let fields = decode_map(fields_json)?;
                keys.insert(
                    key.to_string(),
                    Entry {
                        fields,
                        expires_at: expiry(now, *ttl_seconds),
                        slot: self.allocate_slot(),
                    },
                );
            }
            ScriptCall::Update {
                fields_json,
                ttl_seconds,
                conditions_json,
                ..
            } => {
                if !exists {
                    return Ok(ScriptReply::error(
                        ErrorCode::EntityNotExist,
                        "entity not exist",
                    ));
                }
                let fields = decode_map(fields_json)?;
                let conditions = decode_map(conditions_json)?;
                let Some(entry) = keys.get_mut(key) else {
                    return Ok(ScriptReply::error(
                        ErrorCode::EntityNotExist,
                        "entity not exist",
                    ));
                };
                if !conditions_match(&entry.fields, &conditions) {
                    return Ok(ScriptReply::error(
                        ErrorCode::ConditionNotMatch,
                        "condition not match",
                    ));
                }
                entry.fields.extend(fields);
                if let Some(at) = expiry(now, *ttl_seconds) {
                    entry.expires_at = Some(at);
                }
            }
            ScriptCall::Delete {
                conditions_json, ..
            } => {
                if !exists {
                    return Ok(ScriptReply::error(
                        ErrorCode::EntityNotExist,
                        "entity not exist",
                    ));
                }
                let conditions = decode_map(conditions_json)?;
                let matched = keys
                    .get(key)
                    .map(|entry| conditions_match(&entry.fields, &conditions))
                    .unwrap_or(false);
                if !matched {
                    return Ok(ScriptReply::error(
                        ErrorCode::ConditionNotMatch,
                        "condition not match",
                    ));
                }
                keys.remove(key);
            }
        }

        Ok(ScriptReply::ok())
    }
}

fn purge_expired(keys: &mut HashMap<String, Entry>, now: Instant) {
    keys.retain(|_, entry| !entry.is_expired(now));
}

fn expiry(now: Instant, ttl_seconds: i64) -> Option<Instant> {
    (ttl_seconds > 0).then(|| now + Duration::from_secs(ttl_seconds as u64))
}

fn decode_map(json: &str) -> StoreResult<HashMap<String, String>> {
    serde_json::from_str(json)
        .map_err(|e| StoreError::Backend(format!("script argument is not a string map: {}", e)))
}

fn conditions_match(fields: &HashMap<String, String>, conditions: &HashMap<String, String>) -> bool {
    conditions
        .iter()
        .all(|(field, expected)| fields.get(field) == Some(expected))
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut keys = self.lock();
        purge_expired(&mut keys, Instant::now());
        Ok(keys
            .get(key)
            .map(|entry| entry.fields.clone())
            .unwrap_or_default())
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        let mut keys = self.lock();
        purge_expired(&mut keys, Instant::now());
        Ok(keys.remove(key).map(|_| 1).unwrap_or(0))
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut keys = self.lock();
        let now = Instant::now();
        purge_expired(&mut keys, now);
        let ttl = match keys.get(key) {
            None => TTL_MISSING,
            Some(Entry {
                expires_at: None, ..
            }) => TTL_NO_EXPIRY,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let millis = at.saturating_duration_since(now).as_millis() as i64;
                (millis + 500) / 1000
            }
        };
        Ok(ttl)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let calls = self.scan_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_scan_after {
            if calls >= limit {
                return Err(StoreError::Backend("injected scan failure".to_string()));
            }
        }

        let mut keys = self.lock();
        purge_expired(&mut keys, Instant::now());

        // cursor = first slot not yet visited; keys alive for the whole
        // scan are visited exactly once, keys added meanwhile may be missed
        let mut remaining: Vec<(u64, &String)> = keys
            .iter()
            .filter(|(_, entry)| entry.slot >= cursor)
            .map(|(key, entry)| (entry.slot, key))
            .collect();
        remaining.sort_unstable();

        let visited = &remaining[..remaining.len().min(count.max(1))];
        let page = visited
            .iter()
            .filter(|(_, key)| glob_match(pattern, key))
            .map(|(_, key)| key.to_string())
            .collect();
        let next = match visited.last() {
            Some((slot, _)) if remaining.len() > visited.len() => slot + 1,
            _ => 0,
        };

        Ok(ScanPage {
            cursor: next,
            keys: page,
        })
    }

    async fn run_script(&self, call: &ScriptCall) -> StoreResult<String> {
        Ok(self.execute(call)?.to_json())
    }
}

/// Redis-style glob matching: `*`, `?`, `[...]` classes and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
            continue;
        }
        if pi < p.len() {
            if let Some(next) = match_token(&p, pi, t[ti]) {
                pi = next;
                ti += 1;
                continue;
            }
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Match the single token at `p[pi]` against `c`, returning the next index.
fn match_token(p: &[char], pi: usize, c: char) -> Option<usize> {
    match p[pi] {
        '?' => Some(pi + 1),
        '\\' if pi + 1 < p.len() => (p[pi + 1] == c).then_some(pi + 2),
        '[' => match_class(p, pi, c),
        literal => (literal == c).then_some(pi + 1),
    }
}

fn match_class(p: &[char], pi: usize, c: char) -> Option<usize> {
    let mut i = pi + 1;
    let negate = i < p.len() && p[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < p.len() && p[i] != ']' {
        if p[i] == '\\' && i + 1 < p.len() {
            matched |= p[i + 1] == c;
            i += 2;
        } else if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let (lo, hi) = if p[i] <= p[i + 2] {
                (p[i], p[i + 2])
            } else {
                (p[i + 2], p[i])
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= p[i] == c;
            i += 1;
        }
    }

    if i >= p.len() {
        // unterminated class: treat '[' literally
        return (c == '[').then_some(pi + 1);
    }
    (matched != negate).then_some(i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_star_and_question() {
        assert!(glob_match("Player*", "Player:1"));
        assert!(glob_match("Player:p-*", "Player:p-10"));
        assert!(!glob_match("Player:p-*", "Player:q-1"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(!glob_match("a*b*c", "a-x-b-y"));
    }

    #[test]
    fn test_glob_classes_and_escapes() {
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("k[0-9]", "k7"));
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
        assert!(glob_match("a[b", "a[b"));
    }

    #[tokio::test]
    async fn test_scan_visits_every_key_once() {
        let store = MemoryHashStore::new();
        for i in 0..25 {
            store.insert_raw(&format!("ns:{:02}", i), &[("id", "s|x")]);
        }
        store.insert_raw("other:1", &[("id", "s|x")]);

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let page = store.scan(cursor, "ns:*", 10).await.unwrap();
            seen.extend(page.keys);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 25);
        assert!(seen.iter().all(|k| k.starts_with("ns:")));
    }

    #[tokio::test]
    async fn test_scan_survives_inserts_between_pages() {
        let store = MemoryHashStore::new();
        for i in 0..15 {
            store.insert_raw(&format!("ns:m-{:02}", i), &[("id", "s|x")]);
        }

        let first = store.scan(0, "ns:m-*", 10).await.unwrap();
        // sorts before every existing key
        store.insert_raw("ns:a", &[("id", "s|x")]);
        let second = store.scan(first.cursor, "ns:m-*", 10).await.unwrap();

        let mut seen = first.keys;
        seen.extend(second.keys);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 15);
    }

    #[tokio::test]
    async fn test_injected_scan_failure() {
        let store = MemoryHashStore::failing_scan_after(1);
        assert!(store.scan(0, "*", 10).await.is_ok());
        assert!(store.scan(0, "*", 10).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_and_expiry() {
        let store = MemoryHashStore::new();
        let call = ScriptCall::Create {
            id: "a".into(),
            storage_key: "ns:a".into(),
            fields_json: r#"{"id":"s|a"}"#.into(),
            ttl_seconds: 2,
        };
        store.run_script(&call).await.unwrap();
        assert_eq!(store.ttl("ns:a").await.unwrap(), 2);

        tokio::time::advance(Duration::from_millis(2100)).await;
        assert_eq!(store.ttl("ns:a").await.unwrap(), TTL_MISSING);
        assert!(store.hgetall("ns:a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_any_hash_blocks_create() {
        let store = MemoryHashStore::new();
        store.insert_raw("ns:a", &[("value", "s|stale")]);

        let create = ScriptCall::Create {
            id: "a".into(),
            storage_key: "ns:a".into(),
            fields_json: r#"{"id":"s|a"}"#.into(),
            ttl_seconds: 0,
        };
        let reply = ScriptReply::parse(&store.run_script(&create).await.unwrap()).unwrap();
        assert_eq!(reply.error_code, Some(ErrorCode::EntityAlreadyExists));

        let delete = ScriptCall::Delete {
            id: "a".into(),
            storage_key: "ns:a".into(),
            conditions_json: "{}".into(),
        };
        let reply = ScriptReply::parse(&store.run_script(&delete).await.unwrap()).unwrap();
        assert_eq!(reply, ScriptReply::ok());

        let reply = ScriptReply::parse(&store.run_script(&create).await.unwrap()).unwrap();
        assert_eq!(reply, ScriptReply::ok());
        assert_eq!(store.hgetall("ns:a").await.unwrap().len(), 1);
        assert_eq!(store.ttl("ns:a").await.unwrap(), TTL_NO_EXPIRY);
    }
}
