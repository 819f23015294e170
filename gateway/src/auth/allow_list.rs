use std::collections::HashSet;

use parking_lot::RwLock;

/// Identities allowed to authenticate, matched case-insensitively after
/// trimming.
///
/// Consulted on every session check, so removing an identity locks it out
/// on its next request.
#[derive(Debug, Default)]
pub struct AllowList {
    entries: RwLock<HashSet<String>>,
}

pub fn normalize(identity: &str) -> String {
    identity.trim().to_lowercase()
}

impl AllowList {
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = Self::default();
        list.replace(identities);
        list
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.read().contains(&normalize(identity))
    }

    pub fn allow(&self, identity: &str) {
        self.entries.write().insert(normalize(identity));
    }

    pub fn disallow(&self, identity: &str) -> bool {
        self.entries.write().remove(&normalize(identity))
    }

    pub fn replace<I, S>(&self, identities: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fresh: HashSet<String> = identities
            .into_iter()
            .map(|s| normalize(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        *self.entries.write() = fresh;
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
