use std::net::IpAddr;

use dashmap::DashMap;

use parley_core::errors::HubError;

/// Per-address connection ceiling, checked strictly before a connection is
/// registered. A rejected attempt never mutates the count it was checked
/// against.
pub struct AdmissionGate {
    ceiling: usize,
    counts: DashMap<IpAddr, usize>,
}

impl AdmissionGate {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            counts: DashMap::new(),
        }
    }

    /// Admit one connection from `addr`, or reject without side effects.
    pub fn admit(&self, addr: IpAddr) -> Result<(), HubError> {
        let mut entry = self.counts.entry(addr).or_insert(0);
        if *entry >= self.ceiling {
            return Err(HubError::AdmissionRejected { addr });
        }
        *entry += 1;
        Ok(())
    }

    /// Release one previously admitted connection. Exactly one release per
    /// successful admit; the entry is dropped when its count reaches zero.
    pub fn release(&self, addr: IpAddr) {
        let remove = match self.counts.get_mut(&addr) {
            Some(mut entry) => {
                *entry = entry.saturating_sub(1);
                *entry == 0
            }
            None => false,
        };
        if remove {
            self.counts.remove_if(&addr, |_, count| *count == 0);
        }
    }

    pub fn count(&self, addr: IpAddr) -> usize {
        self.counts.get(&addr).map(|e| *e).unwrap_or(0)
    }
}
