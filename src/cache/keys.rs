//! Storage key layout and in-process group membership.
//!
//! Entries live under `<prefix>:<url>` and group sets under
//! `<prefix>:group:<name>`. An empty prefix drops the namespace (and its
//! separator) entirely.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Builds namespaced storage keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Storage key for a request URL (path plus raw query string).
    pub fn entry_key(&self, url: &str) -> String {
        self.namespaced(url)
    }

    /// Storage key for an entry whose URL is qualified by an `append_key`
    /// discriminator.
    pub fn entry_key_with(&self, url: &str, discriminator: &str) -> String {
        self.namespaced(&format!("{url}$$appendKey={discriminator}"))
    }

    /// Storage key of the set holding a group's members.
    pub fn group_key(&self, group: &str) -> String {
        self.namespaced(&format!("group:{group}"))
    }

    /// Returns `true` for keys produced by [`group_key`](Self::group_key).
    pub fn is_group_key(&self, key: &str) -> bool {
        key.starts_with(&self.group_key(""))
    }

    /// Redis `MATCH` glob covering every key under this namespace.
    ///
    /// Glob metacharacters in the prefix are escaped so a prefix like `api[v1]`
    /// only matches itself.
    pub fn owned_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.prefix.len() + 2);
        for c in self.prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str(":*");
        pattern
    }

    fn namespaced(&self, rest: &str) -> String {
        if self.prefix.is_empty() {
            rest.to_owned()
        } else {
            format!("{}:{}", self.prefix, rest)
        }
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_PREFIX)
    }
}

/// Two-way group membership: group → keys and key → groups.
///
/// Used by the in-process backend, where nothing else tracks membership.
#[derive(Debug, Default)]
pub struct GroupIndex {
    members: HashMap<String, BTreeSet<String>>,
    groups_of: HashMap<String, BTreeSet<String>>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key` to `group`. Adding twice is a no-op.
    pub fn add(&mut self, group: &str, key: &str) {
        self.members
            .entry(group.to_owned())
            .or_default()
            .insert(key.to_owned());
        self.groups_of
            .entry(key.to_owned())
            .or_default()
            .insert(group.to_owned());
    }

    pub fn members(&self, group: &str) -> Vec<String> {
        self.members
            .get(group)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops `key` from every group it belongs to, pruning groups left empty.
    pub fn remove_key(&mut self, key: &str) {
        let Some(groups) = self.groups_of.remove(key) else {
            return;
        };
        for group in groups {
            if let Some(keys) = self.members.get_mut(&group) {
                keys.remove(key);
                if keys.is_empty() {
                    self.members.remove(&group);
                }
            }
        }
    }

    /// Drops `group` and returns the keys it held.
    ///
    /// Member keys stay registered in any other groups they belong to.
    pub fn remove_group(&mut self, group: &str) -> Vec<String> {
        let Some(keys) = self.members.remove(group) else {
            return Vec::new();
        };
        for key in &keys {
            if let Some(groups) = self.groups_of.get_mut(key) {
                groups.remove(group);
                if groups.is_empty() {
                    self.groups_of.remove(key);
                }
            }
        }
        keys.into_iter().collect()
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.groups_of.clear();
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.members
            .iter()
            .map(|(group, keys)| (group.clone(), keys.iter().cloned().collect()))
            .collect()
    }
}
