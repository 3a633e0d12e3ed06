//! Serializing and sending CRDT updates.

use super::loader::decode_value;
use super::operation::{CrdtOperation, CrdtType, OperationValue};
use super::value::CrdtValue;
use crate::error::ClientError;
use crate::wire::Wire;
use crdtkv_protocol::message::{
    CounterOp, DtOp, DtUpdateReq, DtUpdateResp, DtValue, FlagOp, HllOp, MapField, MapFieldType,
    MapOp, MapUpdate, SetOp,
};
use crdtkv_protocol::{ErrorCode, MessageCode, ProtocolError, MAX_BODY_SIZE};
use std::collections::BTreeSet;
use std::fmt;
use std::io::{Read, Write};

/// Where a CRDT lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrdtLocation {
    pub bucket_type: String,
    pub bucket: String,
    /// Absent to let the server assign a key on update.
    pub key: Option<String>,
}

impl CrdtLocation {
    pub fn new(
        bucket_type: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            bucket_type: bucket_type.into(),
            bucket: bucket.into(),
            key: Some(key.into()),
        }
    }

    pub fn without_key(bucket_type: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            bucket_type: bucket_type.into(),
            bucket: bucket.into(),
            key: None,
        }
    }
}

impl fmt::Display for CrdtLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.bucket_type,
            self.bucket,
            self.key.as_deref().unwrap_or("*")
        )
    }
}

/// Write options. Quorum values and the timeout go to the server verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Causal context from a previous fetch; required for removals.
    pub context: Option<Vec<u8>>,
    pub w: Option<u32>,
    pub dw: Option<u32>,
    pub pw: Option<u32>,
    /// Ask the server to reply with the updated value.
    pub return_body: bool,
    pub include_context: Option<bool>,
    pub timeout_ms: Option<u32>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            context: None,
            w: None,
            dw: None,
            pw: None,
            return_body: true,
            include_context: None,
            timeout_ms: None,
        }
    }
}

impl UpdateOptions {
    pub fn with_context(mut self, context: Option<Vec<u8>>) -> Self {
        self.context = context;
        self
    }

    pub fn without_body(mut self) -> Self {
        self.return_body = false;
        self
    }
}

/// Result of an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResponse {
    /// Key assigned by the server when the location had none.
    pub key: Option<String>,
    pub context: Option<Vec<u8>>,
    /// Updated value, when the body was requested and returned.
    pub value: Option<CrdtValue>,
}

/// Turns operation lists into update requests.
pub struct CrdtOperator;

impl CrdtOperator {
    /// Serializes root operations of one type into a single wire operation.
    ///
    /// Counter deltas are summed and set adds and removes are unioned.
    /// Operations nested in maps are grouped per field and aggregated the same
    /// way. Flag and register fields must agree on a single value.
    pub fn serialize(ops: &[CrdtOperation]) -> Result<DtOp, ClientError> {
        let kind = root_type(ops)?;
        let values = ops.iter().filter_map(update_value);

        let mut op = DtOp::default();
        match kind {
            CrdtType::Counter => op.counter_op = Some(counter_op(values)?),
            CrdtType::Set => op.set_op = Some(set_op(values)),
            CrdtType::Map => op.map_op = Some(map_op(values)?),
            CrdtType::HyperLogLog => op.hll_op = Some(hll_op(values)),
            CrdtType::Flag | CrdtType::Register => return Err(ClientError::NotTopLevel(kind)),
        }
        Ok(op)
    }

    /// Validates and serializes an update request without sending it.
    ///
    /// Returns the request and the type of the value it updates.
    pub fn prepare(
        location: &CrdtLocation,
        ops: &[CrdtOperation],
        options: &UpdateOptions,
    ) -> Result<(DtUpdateReq, CrdtType), ClientError> {
        let op = Self::serialize(ops)?;
        let kind = root_type(ops)?;

        if options.context.is_none() && ops.iter().any(CrdtOperation::requires_context) {
            return Err(ClientError::MissingContext);
        }

        let req = DtUpdateReq {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            bucket_type: location.bucket_type.clone(),
            context: options.context.clone(),
            op,
            w: options.w,
            dw: options.dw,
            pw: options.pw,
            return_body: Some(options.return_body),
            timeout: options.timeout_ms,
            include_context: options.include_context,
        };

        let size = serde_json::to_vec(&req).map_err(ProtocolError::from)?.len();
        if size > MAX_BODY_SIZE as usize {
            return Err(ClientError::PayloadTooLarge {
                size,
                max: MAX_BODY_SIZE as usize,
            });
        }
        Ok((req, kind))
    }

    /// Sends a prepared update request and decodes the reply.
    pub fn send<S: Read + Write>(
        wire: &mut Wire<S>,
        req: &DtUpdateReq,
        kind: CrdtType,
    ) -> Result<UpdateResponse, ClientError> {
        wire.write(MessageCode::DtUpdateReq, Some(req))?;
        let resp = wire
            .expect_optional::<DtUpdateResp>(MessageCode::DtUpdateResp)
            .map_err(reclassify_precondition)?;

        let Some(resp) = resp else {
            return Ok(UpdateResponse::default());
        };
        let value = match kind.data_type() {
            Some(data_type) if req.return_body == Some(true) => Some(decode_value(
                data_type,
                DtValue {
                    counter_value: resp.counter_value,
                    set_value: resp.set_value,
                    map_value: resp.map_value,
                    hll_value: resp.hll_value,
                },
            )),
            _ => None,
        };
        Ok(UpdateResponse {
            key: resp.key,
            context: resp.context,
            value,
        })
    }

    /// Serializes `ops` and applies them at `location`.
    pub fn operate<S: Read + Write>(
        wire: &mut Wire<S>,
        location: &CrdtLocation,
        ops: &[CrdtOperation],
        options: &UpdateOptions,
    ) -> Result<UpdateResponse, ClientError> {
        let (req, kind) = Self::prepare(location, ops, options)?;
        Self::send(wire, &req, kind)
    }
}

/// Maps a server-side precondition failure to [`ClientError::Precondition`].
fn reclassify_precondition(err: ClientError) -> ClientError {
    match err {
        ClientError::Server {
            code: ErrorCode::PreconditionFailed,
            message,
        } => ClientError::Precondition { message },
        // Legacy servers leave the code unset and only say so in the message.
        ClientError::Server {
            code: ErrorCode::Unspecified,
            message,
        } if message.to_ascii_lowercase().contains("precondition") => {
            ClientError::Precondition { message }
        }
        other => other,
    }
}

/// Checks a root operation list and returns its common type.
fn root_type(ops: &[CrdtOperation]) -> Result<CrdtType, ClientError> {
    let expected = ops
        .first()
        .ok_or(ClientError::EmptyOperations)?
        .crdt_type();
    for op in ops {
        if let CrdtOperation::Delete { .. } = op {
            return Err(ClientError::RootDelete);
        }
        if let Some(name) = op.name() {
            return Err(ClientError::NamedRoot(name.to_string()));
        }
        let found = op.crdt_type();
        if found != expected {
            return Err(ClientError::MixedTypes { expected, found });
        }
    }
    Ok(expected)
}

fn update_value(op: &CrdtOperation) -> Option<&OperationValue> {
    match op {
        CrdtOperation::Update { value, .. } => Some(value),
        CrdtOperation::Delete { .. } => None,
    }
}

/// Sums counter deltas. Only the total has to fit in an `i64`.
fn counter_op<'a>(
    values: impl Iterator<Item = &'a OperationValue>,
) -> Result<CounterOp, ClientError> {
    let total: i128 = values
        .filter_map(|v| match v {
            OperationValue::Counter(delta) => Some(i128::from(*delta)),
            _ => None,
        })
        .sum();
    let increment = i64::try_from(total).map_err(|_| ClientError::CounterOverflow)?;
    Ok(CounterOp { increment })
}

fn set_op<'a>(values: impl Iterator<Item = &'a OperationValue>) -> SetOp {
    let mut adds = BTreeSet::new();
    let mut removes = BTreeSet::new();
    for value in values {
        if let OperationValue::Set(delta) = value {
            adds.extend(delta.add.iter().cloned());
            removes.extend(delta.remove.iter().cloned());
        }
    }
    SetOp {
        adds: adds.into_iter().collect(),
        removes: removes.into_iter().collect(),
    }
}

fn hll_op<'a>(values: impl Iterator<Item = &'a OperationValue>) -> HllOp {
    let mut adds = BTreeSet::new();
    for value in values {
        if let OperationValue::HyperLogLog(items) = value {
            adds.extend(items.iter().cloned());
        }
    }
    HllOp {
        adds: adds.into_iter().collect(),
    }
}

fn map_op<'a>(values: impl Iterator<Item = &'a OperationValue>) -> Result<MapOp, ClientError> {
    let nested = values
        .filter_map(|v| match v {
            OperationValue::Map(ops) => Some(ops.iter()),
            _ => None,
        })
        .flatten();

    let mut removes: Vec<MapField> = Vec::new();
    // Updates grouped per field, in order of first appearance.
    let mut groups: Vec<(MapField, Vec<&OperationValue>)> = Vec::new();

    for op in nested {
        let name = op.name().ok_or(ClientError::UnnamedField)?;
        let kind = op.crdt_type();
        let field_type = kind
            .map_field_type()
            .ok_or(ClientError::NotEmbeddable(kind))?;
        let field = MapField::new(name, field_type);

        match op {
            CrdtOperation::Delete { .. } => {
                if !removes.contains(&field) {
                    removes.push(field);
                }
            }
            CrdtOperation::Update { value, .. } => {
                match groups.iter_mut().find(|(f, _)| *f == field) {
                    Some((_, group)) => group.push(value),
                    None => groups.push((field, vec![value])),
                }
            }
        }
    }

    let updates = groups
        .into_iter()
        .map(|(field, group)| field_update(field, group))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MapOp { removes, updates })
}

fn field_update(field: MapField, group: Vec<&OperationValue>) -> Result<MapUpdate, ClientError> {
    let values = group.into_iter();
    let mut update = MapUpdate::new(field.clone());
    match field.field_type {
        MapFieldType::Counter => update.counter_op = Some(counter_op(values)?),
        MapFieldType::Set => update.set_op = Some(set_op(values)),
        MapFieldType::Map => update.map_op = Some(map_op(values)?),
        MapFieldType::Flag => {
            let flag = single_value(
                &field,
                values.filter_map(|v| match v {
                    OperationValue::Flag(enabled) => Some(*enabled),
                    _ => None,
                }),
            )?;
            update.flag_op = flag.map(|enabled| {
                if enabled {
                    FlagOp::Enable
                } else {
                    FlagOp::Disable
                }
            });
        }
        MapFieldType::Register => {
            update.register_op = single_value(
                &field,
                values.filter_map(|v| match v {
                    OperationValue::Register(s) => Some(s.clone()),
                    _ => None,
                }),
            )?;
        }
    }
    Ok(update)
}

/// Returns the one value all of `values` agree on.
fn single_value<T: PartialEq>(
    field: &MapField,
    mut values: impl Iterator<Item = T>,
) -> Result<Option<T>, ClientError> {
    let first = values.next();
    for value in values {
        if first.as_ref() != Some(&value) {
            return Err(ClientError::ConflictingUpdates {
                field: field.name.clone(),
            });
        }
    }
    Ok(first)
}
