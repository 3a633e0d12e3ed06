//! Fetching and decoding CRDT values.

use super::operator::CrdtLocation;
use super::value::{CrdtValue, MapValue};
use crate::error::ClientError;
use crate::wire::Wire;
use crdtkv_protocol::message::{DataType, DtFetchReq, DtFetchResp, DtValue, MapEntry, MapFieldType};
use crdtkv_protocol::MessageCode;
use std::io::{Read, Write};

/// Read options, passed to the server verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub r: Option<u32>,
    pub pr: Option<u32>,
    pub basic_quorum: Option<bool>,
    pub notfound_ok: Option<bool>,
    pub include_context: Option<bool>,
    pub timeout_ms: Option<u32>,
}

/// A fetched value and its causal context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub value: CrdtValue,
    /// Opaque token to send back with updates that remove elements.
    pub context: Option<Vec<u8>>,
}

/// Reads CRDT values.
pub struct CrdtLoader;

impl CrdtLoader {
    /// Builds a fetch request. Fetches always need a key.
    pub fn request(location: &CrdtLocation, options: &FetchOptions) -> Result<DtFetchReq, ClientError> {
        let key = location.key.as_ref().ok_or(ClientError::MissingKey)?;
        let mut req = DtFetchReq::new(&location.bucket_type, &location.bucket, key);
        req.r = options.r;
        req.pr = options.pr;
        req.basic_quorum = options.basic_quorum;
        req.notfound_ok = options.notfound_ok;
        req.timeout = options.timeout_ms;
        req.include_context = options.include_context;
        Ok(req)
    }

    /// Sends a prepared fetch request and decodes the reply.
    pub fn send<S: Read + Write>(wire: &mut Wire<S>, req: &DtFetchReq) -> Result<Loaded, ClientError> {
        wire.write(MessageCode::DtFetchReq, Some(req))?;
        let resp: DtFetchResp = wire.expect(MessageCode::DtFetchResp)?;
        Ok(Self::decode(resp))
    }

    /// Fetches the value at `location`.
    pub fn load<S: Read + Write>(
        wire: &mut Wire<S>,
        location: &CrdtLocation,
        options: &FetchOptions,
    ) -> Result<Loaded, ClientError> {
        let req = Self::request(location, options)?;
        Self::send(wire, &req)
    }

    /// Decodes a fetch response.
    ///
    /// A key that was never written decodes as the empty value of its type.
    pub fn decode(resp: DtFetchResp) -> Loaded {
        let value = decode_value(resp.data_type, resp.value.unwrap_or_default());
        Loaded {
            value,
            context: resp.context,
        }
    }
}

/// Decodes a stored value according to its declared type.
pub(crate) fn decode_value(data_type: DataType, value: DtValue) -> CrdtValue {
    match data_type {
        DataType::Counter => CrdtValue::Counter(value.counter_value.unwrap_or(0)),
        DataType::Set => CrdtValue::Set(value.set_value.into_iter().collect()),
        DataType::Map => CrdtValue::Map(map_from_entries(value.map_value)),
        DataType::Hll => CrdtValue::HyperLogLog(value.hll_value.unwrap_or(0)),
    }
}

fn map_from_entries(entries: Vec<MapEntry>) -> MapValue {
    let mut map = MapValue::new();
    for entry in entries {
        let name = entry.field.name;
        match entry.field.field_type {
            MapFieldType::Counter => {
                map.counters.insert(name, entry.counter_value.unwrap_or(0));
            }
            MapFieldType::Flag => {
                map.flags.insert(name, entry.flag_value.unwrap_or(false));
            }
            MapFieldType::Register => {
                map.registers
                    .insert(name, entry.register_value.unwrap_or_default());
            }
            MapFieldType::Set => {
                map.sets.insert(name, entry.set_value.into_iter().collect());
            }
            MapFieldType::Map => {
                map.maps.insert(name, map_from_entries(entry.map_value));
            }
        }
    }
    map
}
