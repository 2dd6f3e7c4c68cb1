use std::sync::Arc;

use crate::targets::AddressSegment;

/// One unit of work: probe `port` on `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub address: Arc<str>,
    pub port: u16,
}

/// Cartesian product of an address specification and a port list.
///
/// Tasks are produced address-major, port-minor, in input order. Neither the
/// address list nor the product is materialized; address ranges are expanded
/// one address at a time as `iter` advances.
#[derive(Debug, Clone, Default)]
pub struct TaskSpace {
    segments: Vec<AddressSegment>,
    ports: Vec<u16>,
}

impl TaskSpace {
    pub fn new(segments: Vec<AddressSegment>, ports: Vec<u16>) -> Self {
        Self { segments, ports }
    }

    /// Total number of tasks, `|addresses| * |ports|`, saturating at `u64::MAX`.
    pub fn len(&self) -> u64 {
        let addresses = self
            .segments
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.len() as u64));
        addresses.saturating_mul(self.ports.len() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Task> + Send + '_ {
        let ports = &self.ports;
        self.segments
            .iter()
            .flat_map(AddressSegment::iter)
            .flat_map(move |address| {
                let address: Arc<str> = Arc::from(address);
                ports.iter().map(move |&port| Task {
                    address: Arc::clone(&address),
                    port,
                })
            })
    }
}
