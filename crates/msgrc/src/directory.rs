//! Local cache of known users and the owner's contact list.
//!
//! The transport refreshes this from 202 list replies; presentation code
//! reads snapshots. The lock here is independent of the transport's
//! internal channels, so a UI thread reading lists never contends with
//! the socket pump.

use std::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    users: Vec<String>,
    contacts: Vec<String>,
}

/// Thread-safe users/contacts cache.
#[derive(Debug, Default)]
pub struct Directory {
    inner: RwLock<Inner>,
}

impl Directory {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the known-user list.
    #[must_use]
    pub fn users(&self) -> Vec<String> {
        self.inner.read().expect("directory lock poisoned").users.clone()
    }

    /// Snapshot of the contact list.
    #[must_use]
    pub fn contacts(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("directory lock poisoned")
            .contacts
            .clone()
    }

    /// Whether the given account is a contact.
    #[must_use]
    pub fn is_contact(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("directory lock poisoned")
            .contacts
            .iter()
            .any(|contact| contact == name)
    }

    /// Replace the known-user list.
    pub fn set_users(&self, users: Vec<String>) {
        self.inner.write().expect("directory lock poisoned").users = users;
    }

    /// Replace the contact list.
    pub fn set_contacts(&self, contacts: Vec<String>) {
        self.inner.write().expect("directory lock poisoned").contacts = contacts;
    }

    /// Add one contact; adding an existing contact is a no-op.
    pub fn add_contact(&self, name: &str) {
        let mut inner = self.inner.write().expect("directory lock poisoned");
        if !inner.contacts.iter().any(|contact| contact == name) {
            inner.contacts.push(name.to_owned());
        }
    }

    /// Remove one contact; removing a missing contact is a no-op.
    pub fn remove_contact(&self, name: &str) {
        let mut inner = self.inner.write().expect("directory lock poisoned");
        inner.contacts.retain(|contact| contact != name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_contact_is_idempotent() {
        let directory = Directory::new();
        directory.add_contact("bob");
        directory.add_contact("bob");
        assert_eq!(directory.contacts(), ["bob"]);
        assert!(directory.is_contact("bob"));
    }

    #[test]
    fn remove_missing_contact_is_noop() {
        let directory = Directory::new();
        directory.add_contact("bob");
        directory.remove_contact("carol");
        assert_eq!(directory.contacts(), ["bob"]);

        directory.remove_contact("bob");
        assert!(directory.contacts().is_empty());
        assert!(!directory.is_contact("bob"));
    }

    #[test]
    fn set_replaces_whole_lists() {
        let directory = Directory::new();
        directory.set_users(vec!["alice".into(), "bob".into()]);
        directory.set_contacts(vec!["bob".into()]);
        assert_eq!(directory.users(), ["alice", "bob"]);
        assert_eq!(directory.contacts(), ["bob"]);

        directory.set_contacts(Vec::new());
        assert!(directory.contacts().is_empty());
    }
}
