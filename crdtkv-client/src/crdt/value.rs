//! Decoded CRDT values.

use super::operation::CrdtType;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// The value of a CRDT as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CrdtValue {
    Counter(i64),
    Flag(bool),
    Register(String),
    Set(BTreeSet<String>),
    Map(MapValue),
    /// Estimated number of distinct elements.
    HyperLogLog(u64),
}

impl CrdtValue {
    pub fn crdt_type(&self) -> CrdtType {
        match self {
            CrdtValue::Counter(_) => CrdtType::Counter,
            CrdtValue::Flag(_) => CrdtType::Flag,
            CrdtValue::Register(_) => CrdtType::Register,
            CrdtValue::Set(_) => CrdtType::Set,
            CrdtValue::Map(_) => CrdtType::Map,
            CrdtValue::HyperLogLog(_) => CrdtType::HyperLogLog,
        }
    }

    pub fn as_counter(&self) -> Option<i64> {
        match self {
            CrdtValue::Counter(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            CrdtValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_register(&self) -> Option<&str> {
        match self {
            CrdtValue::Register(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            CrdtValue::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapValue> {
        match self {
            CrdtValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_hyper_log_log(&self) -> Option<u64> {
        match self {
            CrdtValue::HyperLogLog(n) => Some(*n),
            _ => None,
        }
    }
}

/// Fields of a map, grouped by type.
///
/// Fields are identified by name and type together, so the same name may
/// appear under more than one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MapValue {
    pub counters: BTreeMap<String, i64>,
    pub flags: BTreeMap<String, bool>,
    pub maps: BTreeMap<String, MapValue>,
    pub registers: BTreeMap<String, String>,
    pub sets: BTreeMap<String, BTreeSet<String>>,
}

impl MapValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
            && self.flags.is_empty()
            && self.maps.is_empty()
            && self.registers.is_empty()
            && self.sets.is_empty()
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters.get(name).copied()
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied()
    }

    pub fn register(&self, name: &str) -> Option<&str> {
        self.registers.get(name).map(String::as_str)
    }

    pub fn set(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.sets.get(name)
    }

    pub fn map(&self, name: &str) -> Option<&MapValue> {
        self.maps.get(name)
    }
}
