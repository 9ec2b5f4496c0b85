// src/driver/ports.rs

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{DriverError, DriverErrorKind};

/// Hands out host ports from an inclusive range.
#[derive(Debug)]
pub struct PortAllocator {
    start: u16,
    end: u16,
    in_use: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            in_use: Mutex::new(BTreeSet::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `count` free ports, lowest first. All or nothing.
    pub fn allocate(&self, count: u16) -> Result<Vec<u16>, DriverError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut in_use = self.lock();
        let ports: Vec<u16> = (self.start..=self.end)
            .filter(|port| !in_use.contains(port))
            .take(usize::from(count))
            .collect();
        if ports.len() < usize::from(count) {
            return Err(DriverError::new(
                DriverErrorKind::Other,
                format!(
                    "only {} of {count} host ports free in {}-{}",
                    ports.len(),
                    self.start,
                    self.end
                ),
            ));
        }
        in_use.extend(ports.iter().copied());
        debug!(?ports, "allocated host ports");
        Ok(ports)
    }

    pub fn release(&self, ports: &[u16]) {
        if ports.is_empty() {
            return;
        }
        let mut in_use = self.lock();
        for port in ports {
            in_use.remove(port);
        }
        debug!(?ports, "released host ports");
    }

    pub fn in_use(&self) -> usize {
        self.lock().len()
    }
}
