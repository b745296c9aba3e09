use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{
    Hash,
    Hasher,
};

use crate::constants::*;

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

// Compact identifier for a requesting user; these end up in the
// `controllers`/`updaters` annotations so they need to stay short.
pub fn user_hash(user: &str) -> String {
    let mut s = DefaultHasher::new();
    user.hash(&mut s);
    let mut v = s.finish();

    let mut out = String::with_capacity(USER_HASH_LEN);
    for _ in 0..USER_HASH_LEN {
        out.push(BASE36_ALPHABET[(v % 36) as usize] as char);
        v /= 36;
    }
    out
}

// The controllers/updaters annotation value: an insertion-ordered set of user
// hashes, capped at USER_HASH_SET_CAP entries with FIFO eviction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UserHashSet(Vec<String>);

impl UserHashSet {
    pub fn parse(maybe_value: Option<&str>) -> UserHashSet {
        let Some(value) = maybe_value else {
            return UserHashSet::default();
        };

        UserHashSet(value.split(',').map(str::trim).filter(|h| !h.is_empty()).map(String::from).collect())
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.0.iter().any(|h| h == hash)
    }

    pub fn contains_user(&self, user: &str) -> bool {
        self.contains(&user_hash(user))
    }

    // Returns true if the set changed
    pub fn insert(&mut self, hash: &str) -> bool {
        if self.contains(hash) {
            return false;
        }
        if self.0.len() >= USER_HASH_SET_CAP {
            self.0.remove(0);
        }
        self.0.push(hash.into());
        true
    }

    pub fn insert_user(&mut self, user: &str) -> bool {
        self.insert(&user_hash(user))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for UserHashSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}
