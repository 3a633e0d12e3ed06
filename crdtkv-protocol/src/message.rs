//! JSON payload types carried in message bodies.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};

/// Body of an `ErrorResp` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResp {
    /// Human-readable error message.
    pub errmsg: String,
    /// Numeric error code (`0` when the server does not classify).
    #[serde(default)]
    pub errcode: u32,
}

impl ErrorResp {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            errmsg: message.into(),
            errcode: code.as_u32(),
        }
    }

    /// Returns the structured error code.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self.errcode)
    }
}

/// Body of a `GetServerInfoResp` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfoResp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

/// Body of an `AuthReq` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthReq {
    pub user: String,
    pub password: String,
}

/// Top-level data type of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Counter,
    Set,
    Map,
    Hll,
}

/// Type of a field embedded in a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MapFieldType {
    Counter,
    Flag,
    Register,
    Set,
    Map,
}

/// Names a map field. Fields are identified by name and type together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: MapFieldType,
}

impl MapField {
    pub fn new(name: impl Into<String>, field_type: MapFieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// A field and its value inside a fetched map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    pub field: MapField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_value: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_value: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub map_value: Vec<MapEntry>,
}

impl MapEntry {
    /// Creates an entry with no value set.
    pub fn new(field: MapField) -> Self {
        Self {
            field,
            counter_value: None,
            set_value: Vec::new(),
            register_value: None,
            flag_value: None,
            map_value: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterOp {
    pub increment: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOp {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adds: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HllOp {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adds: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagOp {
    Enable,
    Disable,
}

/// Update to a single map field. Exactly one `*_op` matching the field type is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapUpdate {
    pub field: MapField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_op: Option<CounterOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_op: Option<SetOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_op: Option<FlagOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_op: Option<MapOp>,
}

impl MapUpdate {
    /// Creates an update with no operation attached.
    pub fn new(field: MapField) -> Self {
        Self {
            field,
            counter_op: None,
            set_op: None,
            register_op: None,
            flag_op: None,
            map_op: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapOp {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removes: Vec<MapField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<MapUpdate>,
}

/// A data type operation. Exactly one member is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_op: Option<CounterOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_op: Option<SetOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_op: Option<MapOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hll_op: Option<HllOp>,
}

/// Body of a `DtFetchReq` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtFetchReq {
    pub bucket: String,
    pub key: String,
    #[serde(rename = "type")]
    pub bucket_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_quorum: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notfound_ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_context: Option<bool>,
}

impl DtFetchReq {
    pub fn new(
        bucket_type: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            bucket_type: bucket_type.into(),
            r: None,
            pr: None,
            basic_quorum: None,
            notfound_ok: None,
            timeout: None,
            include_context: None,
        }
    }
}

/// Value portion of a `DtFetchResp`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_value: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub map_value: Vec<MapEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hll_value: Option<u64>,
}

/// Body of a `DtFetchResp` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtFetchResp {
    /// Opaque causal context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<u8>>,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Absent when the key has never been written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<DtValue>,
}

/// Body of a `DtUpdateReq` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtUpdateReq {
    pub bucket: String,
    /// Absent to let the server assign a key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "type")]
    pub bucket_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<u8>>,
    pub op: DtOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dw: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pw: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_body: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_context: Option<bool>,
}

/// Body of a `DtUpdateResp` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtUpdateResp {
    /// Server-assigned key, when the request carried none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_value: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub map_value: Vec<MapEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hll_value: Option<u64>,
}
