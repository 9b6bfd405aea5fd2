//! Shared cookie container.
//!
//! # Design
//! `CookieJar` is a cheap cloneable handle; every clone points at the same
//! store. The dispatcher hands the jar to each request at send time and the
//! transport writes `Set-Cookie` values back into it, so cookies set by one
//! response are sent with every later request to the same host.
//!
//! Only `name=value` pairs are kept. Path, expiry and the other attributes
//! are ignored except `Max-Age=0`, which deletes the cookie.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

type Store = HashMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    inner: Arc<RwLock<Store>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, host: &str, name: impl Into<String>, value: impl Into<String>) {
        let mut store = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        store
            .entry(host.to_ascii_lowercase())
            .or_default()
            .insert(name.into(), value.into());
    }

    pub fn get(&self, host: &str, name: &str) -> Option<String> {
        let store = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        store.get(&host.to_ascii_lowercase())?.get(name).cloned()
    }

    pub fn remove(&self, host: &str, name: &str) -> Option<String> {
        let mut store = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        store.get_mut(&host.to_ascii_lowercase())?.remove(name)
    }

    /// Record every `Set-Cookie` value a response from `host` carried.
    pub fn store_from_headers<'a>(&self, host: &str, values: impl IntoIterator<Item = &'a str>) {
        for value in values {
            match parse_set_cookie(value) {
                Some(SetCookie { name, value, expired: false }) => self.insert(host, name, value),
                Some(SetCookie { name, expired: true, .. }) => {
                    self.remove(host, &name);
                }
                None => tracing::debug!(host, "ignoring malformed set-cookie header"),
            }
        }
    }

    /// Value for a `Cookie` request header, or `None` if nothing is stored
    /// for this host.
    pub fn header_for(&self, host: &str) -> Option<String> {
        let store = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let cookies = store.get(&host.to_ascii_lowercase())?;
        if cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = cookies.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Some(pairs.join("; "))
    }

    /// Total number of cookies across all hosts.
    pub fn len(&self) -> usize {
        let store = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        store.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Whether both handles point at the same store.
    pub fn same_jar(&self, other: &CookieJar) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct SetCookie {
    name: String,
    value: String,
    expired: bool,
}

fn parse_set_cookie(header: &str) -> Option<SetCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let expired = parts.any(|attr| {
        attr.split_once('=').is_some_and(|(k, v)| {
            k.trim().eq_ignore_ascii_case("max-age") && v.trim().parse::<i64>().is_ok_and(|n| n <= 0)
        })
    });
    Some(SetCookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        expired,
    })
}
