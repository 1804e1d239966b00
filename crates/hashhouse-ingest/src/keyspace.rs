//! Keyspace enumeration.
//!
//! The range service is addressed by 5-character hexadecimal prefixes. The
//! full keyspace is every such prefix, `00000` through `FFFFF`, generated in
//! ascending order. Units are rendered in uppercase so lexical order and
//! numeric order agree.

use std::fmt;

use tracing::debug;

/// Width of a keyspace unit in hex characters.
pub const KEY_WIDTH: usize = 5;

/// Number of units in the full keyspace (16^5).
pub const KEYSPACE_SIZE: u32 = 1 << (4 * KEY_WIDTH as u32);

/// One fetchable range, identified by a 5-character hex prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyspaceUnit(u32);

impl KeyspaceUnit {
    /// Unit at `index`, or `None` if the index is outside the keyspace.
    pub fn new(index: u32) -> Option<Self> {
        (index < KEYSPACE_SIZE).then_some(Self(index))
    }

    /// Parse a 5-character hex prefix (either case).
    pub fn parse(prefix: &str) -> Option<Self> {
        if prefix.len() != KEY_WIDTH || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(prefix, 16).ok().map(Self)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for KeyspaceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:05X}", self.0)
    }
}

/// Lazy, ascending iterator over keyspace units.
///
/// Construct a fresh one to restart from the beginning.
#[derive(Debug, Clone)]
pub struct Keyspace {
    next: u32,
    end: u32,
}

impl Keyspace {
    /// The full keyspace.
    pub fn new() -> Self {
        Self {
            next: 0,
            end: KEYSPACE_SIZE,
        }
    }

    /// The first `count` units of the keyspace.
    pub fn first(count: u32) -> Self {
        Self {
            next: 0,
            end: count.min(KEYSPACE_SIZE),
        }
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for Keyspace {
    type Item = KeyspaceUnit;

    fn next(&mut self) -> Option<KeyspaceUnit> {
        if self.next >= self.end {
            return None;
        }
        let unit = KeyspaceUnit(self.next);
        self.next += 1;
        Some(unit)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Keyspace {}

/// Feed every unit of `keyspace` into the work queue, then close it.
///
/// Suspends while the queue is full. Stops early if every receiver is gone.
/// Returns the number of units enqueued.
pub async fn enumerate_into(keyspace: Keyspace, work_tx: async_channel::Sender<KeyspaceUnit>) -> u32 {
    let mut sent = 0;
    for unit in keyspace {
        if work_tx.send(unit).await.is_err() {
            debug!(sent, "work queue closed, stopping enumeration");
            break;
        }
        sent += 1;
    }
    work_tx.close();
    debug!(sent, "keyspace enumeration finished");
    sent
}
