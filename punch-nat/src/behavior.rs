//! NAT behavior record and its bounded, append-only history ring (`spec.md` §3).

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    EndpointIndependent,
    AddressDependent,
    AddressAndPortDependent,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatBehavior {
    pub mapping: Classification,
    pub filtering: Classification,
    pub supports_hairpinning: Option<bool>,
    pub preserves_ports: Option<bool>,
    pub supports_port_mapping: Option<bool>,
    pub mapping_lifetime_secs: Option<u64>,
}

impl NatBehavior {
    pub fn unknown() -> Self {
        Self {
            mapping: Classification::Unknown,
            filtering: Classification::Unknown,
            supports_hairpinning: None,
            preserves_ports: None,
            supports_port_mapping: None,
            mapping_lifetime_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub behavior: NatBehavior,
    pub observed_at: SystemTime,
}

/// Append-only, oldest-first-evicted ring of observed behaviors. The most
/// recently appended entry is the "current" behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    max_size: usize,
    entries: VecDeque<HistoryEntry>,
}

impl History {
    pub fn new(max_size: usize) -> Self {
        Self { max_size: max_size.max(1), entries: VecDeque::new() }
    }

    pub fn push(&mut self, behavior: NatBehavior, observed_at: SystemTime) {
        if self.entries.len() >= self.max_size {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry { behavior, observed_at });
    }

    pub fn current(&self) -> Option<&NatBehavior> {
        self.entries.back().map(|e| &e.behavior)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_at_capacity() {
        let mut history = History::new(2);
        history.push(NatBehavior::unknown(), SystemTime::UNIX_EPOCH);
        let mut second = NatBehavior::unknown();
        second.mapping = Classification::EndpointIndependent;
        history.push(second.clone(), SystemTime::UNIX_EPOCH);
        let mut third = NatBehavior::unknown();
        third.mapping = Classification::AddressDependent;
        history.push(third.clone(), SystemTime::UNIX_EPOCH);

        assert_eq!(history.len(), 2);
        assert_eq!(history.current(), Some(&third));
        let oldest = history.entries().next().unwrap();
        assert_eq!(oldest.behavior, second);
    }

    #[test]
    fn round_trips_through_json() {
        let mut history = History::new(10);
        history.push(NatBehavior::unknown(), SystemTime::UNIX_EPOCH);
        let json = history.to_json().unwrap();
        let restored = History::from_json(&json).unwrap();
        assert_eq!(restored.len(), 1);
    }
}
