use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, info, warn};

struct PoolState {
    in_use: HashSet<String>,
    cursor: usize,
}

/// Outbound caller identities shared by concurrent placements.
///
/// Identities are handed out round-robin so consecutive calls rotate through
/// the pool. An identity is assigned to at most one call at a time.
pub struct CallerNumberPool {
    numbers: Vec<String>,
    state: Mutex<PoolState>,
}

impl CallerNumberPool {
    /// Create a pool over `numbers`. Duplicates and blanks are dropped.
    pub fn new<I, S>(numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let numbers: Vec<String> = numbers
            .into_iter()
            .map(|n| {
                let n: String = n.into();
                n.trim().to_string()
            })
            .filter(|n| !n.is_empty() && seen.insert(n.clone()))
            .collect();
        Self {
            numbers,
            state: Mutex::new(PoolState {
                in_use: HashSet::new(),
                cursor: 0,
            }),
        }
    }

    /// Take a free identity, or `None` if every identity is assigned.
    ///
    /// `None` is a retryable condition, not an error.
    pub fn acquire(&self) -> Option<String> {
        let mut state = self.state.lock();
        let len = self.numbers.len();
        for offset in 0..len {
            let idx = (state.cursor + offset) % len;
            let number = &self.numbers[idx];
            if !state.in_use.contains(number) {
                state.in_use.insert(number.clone());
                state.cursor = (idx + 1) % len;
                debug!(caller_number = %number, in_use = state.in_use.len(), "Caller number acquired");
                return Some(number.clone());
            }
        }
        warn!(capacity = len, "Caller number pool exhausted");
        None
    }

    /// Return an identity to the pool. Releasing a free or unknown identity
    /// is a no-op; returns whether anything was released.
    pub fn release(&self, number: &str) -> bool {
        let released = self.state.lock().in_use.remove(number);
        if released {
            info!(caller_number = %number, "Caller number released");
        } else {
            debug!(caller_number = %number, "Caller number was not in use");
        }
        released
    }

    /// Number of configured identities.
    pub fn capacity(&self) -> usize {
        self.numbers.len()
    }

    /// Number of identities currently assigned.
    pub fn in_use(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Number of identities that can be acquired right now.
    pub fn available(&self) -> usize {
        self.capacity() - self.in_use()
    }

    /// Whether `number` is currently assigned.
    pub fn is_in_use(&self, number: &str) -> bool {
        self.state.lock().in_use.contains(number)
    }
}
