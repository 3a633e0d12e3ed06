//! CRDT operation trees.

use crdtkv_protocol::message::{DataType, MapFieldType};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of a replicated data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrdtType {
    Counter,
    Flag,
    Register,
    Set,
    Map,
    HyperLogLog,
}

impl CrdtType {
    /// Returns the wire type of this kind as a map field, if it can be embedded.
    pub fn map_field_type(self) -> Option<MapFieldType> {
        match self {
            CrdtType::Counter => Some(MapFieldType::Counter),
            CrdtType::Flag => Some(MapFieldType::Flag),
            CrdtType::Register => Some(MapFieldType::Register),
            CrdtType::Set => Some(MapFieldType::Set),
            CrdtType::Map => Some(MapFieldType::Map),
            CrdtType::HyperLogLog => None,
        }
    }

    /// Returns the wire type of this kind as a stored value, if it can stand alone.
    pub fn data_type(self) -> Option<DataType> {
        match self {
            CrdtType::Counter => Some(DataType::Counter),
            CrdtType::Set => Some(DataType::Set),
            CrdtType::Map => Some(DataType::Map),
            CrdtType::HyperLogLog => Some(DataType::Hll),
            CrdtType::Flag | CrdtType::Register => None,
        }
    }
}

impl From<MapFieldType> for CrdtType {
    fn from(field_type: MapFieldType) -> Self {
        match field_type {
            MapFieldType::Counter => CrdtType::Counter,
            MapFieldType::Flag => CrdtType::Flag,
            MapFieldType::Register => CrdtType::Register,
            MapFieldType::Set => CrdtType::Set,
            MapFieldType::Map => CrdtType::Map,
        }
    }
}

impl From<DataType> for CrdtType {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::Counter => CrdtType::Counter,
            DataType::Set => CrdtType::Set,
            DataType::Map => CrdtType::Map,
            DataType::Hll => CrdtType::HyperLogLog,
        }
    }
}

impl fmt::Display for CrdtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrdtType::Counter => "counter",
            CrdtType::Flag => "flag",
            CrdtType::Register => "register",
            CrdtType::Set => "set",
            CrdtType::Map => "map",
            CrdtType::HyperLogLog => "hyperloglog",
        };
        f.write_str(name)
    }
}

/// Elements to add to and remove from a set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDelta {
    pub add: BTreeSet<String>,
    pub remove: BTreeSet<String>,
}

impl SetDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, item: impl Into<String>) -> Self {
        self.add.insert(item.into());
        self
    }

    pub fn remove(mut self, item: impl Into<String>) -> Self {
        self.remove.insert(item.into());
        self
    }

    pub fn add_all<I, T>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.add.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn remove_all<I, T>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.remove.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Payload of an update; its variant determines the operation's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationValue {
    Counter(i64),
    Flag(bool),
    Register(String),
    Set(SetDelta),
    Map(Vec<CrdtOperation>),
    HyperLogLog(BTreeSet<String>),
}

impl OperationValue {
    pub fn crdt_type(&self) -> CrdtType {
        match self {
            OperationValue::Counter(_) => CrdtType::Counter,
            OperationValue::Flag(_) => CrdtType::Flag,
            OperationValue::Register(_) => CrdtType::Register,
            OperationValue::Set(_) => CrdtType::Set,
            OperationValue::Map(_) => CrdtType::Map,
            OperationValue::HyperLogLog(_) => CrdtType::HyperLogLog,
        }
    }
}

impl From<i64> for OperationValue {
    fn from(delta: i64) -> Self {
        OperationValue::Counter(delta)
    }
}

impl From<bool> for OperationValue {
    fn from(enabled: bool) -> Self {
        OperationValue::Flag(enabled)
    }
}

impl From<String> for OperationValue {
    fn from(value: String) -> Self {
        OperationValue::Register(value)
    }
}

impl From<&str> for OperationValue {
    fn from(value: &str) -> Self {
        OperationValue::Register(value.to_string())
    }
}

impl From<SetDelta> for OperationValue {
    fn from(delta: SetDelta) -> Self {
        OperationValue::Set(delta)
    }
}

impl From<Vec<CrdtOperation>> for OperationValue {
    fn from(ops: Vec<CrdtOperation>) -> Self {
        OperationValue::Map(ops)
    }
}

/// A single mutation of a CRDT, possibly nested inside a map.
///
/// Root operations carry no name; operations nested in a map name the field
/// they mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrdtOperation {
    Update {
        name: Option<String>,
        value: OperationValue,
    },
    Delete {
        name: Option<String>,
        kind: CrdtType,
    },
}

impl CrdtOperation {
    /// Creates a root update.
    pub fn update(value: impl Into<OperationValue>) -> Self {
        CrdtOperation::Update {
            name: None,
            value: value.into(),
        }
    }

    /// Creates an update of the map field `name`.
    pub fn update_field(name: impl Into<String>, value: impl Into<OperationValue>) -> Self {
        CrdtOperation::Update {
            name: Some(name.into()),
            value: value.into(),
        }
    }

    /// Creates a removal of the map field `name` of type `kind`.
    pub fn delete_field(name: impl Into<String>, kind: CrdtType) -> Self {
        CrdtOperation::Delete {
            name: Some(name.into()),
            kind,
        }
    }

    /// Creates a root counter increment.
    pub fn increment(delta: i64) -> Self {
        Self::update(OperationValue::Counter(delta))
    }

    /// Creates a root set update.
    pub fn set(delta: SetDelta) -> Self {
        Self::update(OperationValue::Set(delta))
    }

    /// Creates a root map update from nested field operations.
    pub fn map(ops: Vec<CrdtOperation>) -> Self {
        Self::update(OperationValue::Map(ops))
    }

    /// Creates a root HyperLogLog update.
    pub fn hll_add<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::update(OperationValue::HyperLogLog(
            items.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            CrdtOperation::Update { name, .. } | CrdtOperation::Delete { name, .. } => {
                name.as_deref()
            }
        }
    }

    pub fn crdt_type(&self) -> CrdtType {
        match self {
            CrdtOperation::Update { value, .. } => value.crdt_type(),
            CrdtOperation::Delete { kind, .. } => *kind,
        }
    }

    /// Returns whether this operation removes anything.
    ///
    /// Removals are only safe against a known causal context.
    pub fn requires_context(&self) -> bool {
        match self {
            CrdtOperation::Delete { .. } => true,
            CrdtOperation::Update { value, .. } => match value {
                OperationValue::Set(delta) => !delta.remove.is_empty(),
                OperationValue::Map(ops) => ops.iter().any(CrdtOperation::requires_context),
                _ => false,
            },
        }
    }
}
