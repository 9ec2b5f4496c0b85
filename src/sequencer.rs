// src/sequencer.rs

//! Host-wide barrier ordering resource release across tasks.
//!
//! A task being stopped registers its stop sequence number; a task being
//! started with start sequence `N` waits until nothing below `N` is still
//! outstanding.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct StopSequencer {
    outstanding: watch::Sender<BTreeMap<u64, usize>>,
}

impl Default for StopSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSequencer {
    pub fn new() -> Self {
        let (outstanding, _) = watch::channel(BTreeMap::new());
        Self { outstanding }
    }

    /// Register `n` outstanding completions for `seq`.
    pub fn add(&self, seq: u64, n: usize) {
        if n == 0 {
            return;
        }
        debug!(seq, n, "registering stop sequence");
        self.outstanding.send_modify(|map| {
            *map.entry(seq).or_default() += n;
        });
    }

    /// Record one completion for `seq`.
    pub fn done(&self, seq: u64) {
        self.outstanding.send_modify(|map| match map.entry(seq) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                }
                debug!(seq, "stop sequence completion recorded");
            }
            Entry::Vacant(_) => {
                warn!(seq, "completion for unregistered stop sequence; ignoring");
            }
        });
    }

    /// Resolve once every sequence number strictly below `seq` has completed.
    pub async fn wait(&self, seq: u64) {
        let mut rx = self.outstanding.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|map| map.range(..seq).next().is_none()).await;
    }

    /// Outstanding completions for `seq`.
    pub fn outstanding(&self, seq: u64) -> usize {
        self.outstanding.borrow().get(&seq).copied().unwrap_or(0)
    }

    /// Whether anything strictly below `seq` is still outstanding.
    pub fn is_blocked(&self, seq: u64) -> bool {
        self.outstanding.borrow().range(..seq).next().is_some()
    }
}
