//! Storage adapter contract and the in-memory reference implementation.
//!
//! The server core never embeds persistence logic; everything it needs
//! from a user/contact store goes through [`Storage`]. A real deployment
//! plugs in a database-backed adapter; tests and the demo binary use
//! [`MemoryStorage`].

use chrono::{DateTime, Utc};
use msgr_common::crypto;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::RwLock;

/// User, contact, and message-statistics store consumed by the server.
pub trait Storage: Send + Sync {
    /// Whether an account with this name is registered.
    fn check_user(&self, name: &str) -> bool;
    /// The stored credential (hex-encoded password hash) for an account.
    fn get_hash(&self, name: &str) -> Option<Vec<u8>>;
    /// The public key recorded at the account's last login, if any.
    fn get_pubkey(&self, name: &str) -> Option<String>;
    /// Record a successful login with the peer address and public key.
    fn user_login(&self, name: &str, ip: IpAddr, port: u16, pubkey: &str);
    /// Record a logout.
    fn user_logout(&self, name: &str);
    /// The account's contact list.
    fn get_contacts(&self, name: &str) -> Vec<String>;
    /// Add a contact edge. Adding an existing edge is a no-op.
    fn add_contact(&self, user: &str, contact: &str);
    /// Remove a contact edge. Removing a missing edge is a no-op.
    fn remove_contact(&self, user: &str, contact: &str);
    /// All known accounts with their last login time.
    fn users_list(&self) -> Vec<(String, Option<DateTime<Utc>>)>;
    /// Bump per-user sent/received message counters.
    fn process_message(&self, sender: &str, recipient: &str);
}

#[derive(Debug, Default)]
struct Account {
    hash_hex: Vec<u8>,
    pubkey: Option<String>,
    last_login: Option<DateTime<Utc>>,
    contacts: BTreeSet<String>,
    sent: u64,
    received: u64,
    online: bool,
}

/// In-memory [`Storage`] implementation.
///
/// Interior mutability behind a `std::sync::RwLock`; calls are short and
/// never await, so the lock is safe to take from async context.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    accounts: RwLock<HashMap<String, Account>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account, deriving and storing its credential from the
    /// plaintext password. Replaces any existing credential for the name.
    pub fn add_user(&self, name: &str, password: &str) {
        let hash_hex = crypto::password_hash_hex(password, name).into_bytes();
        let mut accounts = self.accounts.write().expect("storage lock poisoned");
        accounts.entry(name.to_owned()).or_default().hash_hex = hash_hex;
    }

    /// Per-user (sent, received) message counters, for the stats surface.
    #[must_use]
    pub fn message_counts(&self, name: &str) -> (u64, u64) {
        let accounts = self.accounts.read().expect("storage lock poisoned");
        accounts
            .get(name)
            .map_or((0, 0), |account| (account.sent, account.received))
    }
}

impl Storage for MemoryStorage {
    fn check_user(&self, name: &str) -> bool {
        let accounts = self.accounts.read().expect("storage lock poisoned");
        accounts.contains_key(name)
    }

    fn get_hash(&self, name: &str) -> Option<Vec<u8>> {
        let accounts = self.accounts.read().expect("storage lock poisoned");
        accounts.get(name).map(|account| account.hash_hex.clone())
    }

    fn get_pubkey(&self, name: &str) -> Option<String> {
        let accounts = self.accounts.read().expect("storage lock poisoned");
        accounts.get(name).and_then(|account| account.pubkey.clone())
    }

    fn user_login(&self, name: &str, ip: IpAddr, port: u16, pubkey: &str) {
        let mut accounts = self.accounts.write().expect("storage lock poisoned");
        if let Some(account) = accounts.get_mut(name) {
            account.pubkey = Some(pubkey.to_owned());
            account.last_login = Some(Utc::now());
            account.online = true;
        }
        tracing::debug!(user = name, %ip, port, "login recorded");
    }

    fn user_logout(&self, name: &str) {
        let mut accounts = self.accounts.write().expect("storage lock poisoned");
        if let Some(account) = accounts.get_mut(name) {
            account.online = false;
        }
    }

    fn get_contacts(&self, name: &str) -> Vec<String> {
        let accounts = self.accounts.read().expect("storage lock poisoned");
        accounts
            .get(name)
            .map(|account| account.contacts.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn add_contact(&self, user: &str, contact: &str) {
        let mut accounts = self.accounts.write().expect("storage lock poisoned");
        if let Some(account) = accounts.get_mut(user) {
            account.contacts.insert(contact.to_owned());
        }
    }

    fn remove_contact(&self, user: &str, contact: &str) {
        let mut accounts = self.accounts.write().expect("storage lock poisoned");
        if let Some(account) = accounts.get_mut(user) {
            account.contacts.remove(contact);
        }
    }

    fn users_list(&self) -> Vec<(String, Option<DateTime<Utc>>)> {
        let accounts = self.accounts.read().expect("storage lock poisoned");
        let mut users: Vec<_> = accounts
            .iter()
            .map(|(name, account)| (name.clone(), account.last_login))
            .collect();
        users.sort_by(|a, b| a.0.cmp(&b.0));
        users
    }

    fn process_message(&self, sender: &str, recipient: &str) {
        let mut accounts = self.accounts.write().expect("storage lock poisoned");
        if let Some(account) = accounts.get_mut(sender) {
            account.sent += 1;
        }
        if let Some(account) = accounts.get_mut(recipient) {
            account.received += 1;
        }
    }
}
