//! Scripted in-process nodes for end-to-end tests.

use crate::node::NodeId;
use crate::wire::Wire;
use crdtkv_protocol::message::{
    DataType, DtFetchReq, DtFetchResp, DtUpdateReq, DtUpdateResp, DtValue, ErrorResp, FlagOp,
    MapEntry, MapOp, SetOp,
};
use crdtkv_protocol::{ErrorCode, MessageCode, WireMessage};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// What a fake node does with one request.
pub(crate) enum Reply {
    Message(WireMessage),
    /// Close the connection without answering.
    Hangup,
    /// Keep the connection open without answering.
    Silence,
}

pub(crate) fn reply_empty(code: MessageCode) -> Reply {
    Reply::Message(WireMessage::empty(code))
}

pub(crate) fn reply_json<T: Serialize>(code: MessageCode, value: &T) -> Reply {
    Reply::Message(WireMessage::from_json(code, value).unwrap())
}

pub(crate) fn reply_error(code: ErrorCode, message: &str) -> Reply {
    reply_json(MessageCode::ErrorResp, &ErrorResp::new(code, message))
}

type Handler = dyn Fn(&WireMessage) -> Reply + Send + Sync;

/// A node listening on an ephemeral local port, answering with a handler.
pub(crate) struct FakeNode {
    port: u16,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<WireMessage>>>,
}

impl FakeNode {
    pub fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&WireMessage) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        {
            let connections = Arc::clone(&connections);
            let requests = Arc::clone(&requests);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { break };
                    connections.fetch_add(1, Ordering::SeqCst);
                    let handler = Arc::clone(&handler);
                    let requests = Arc::clone(&requests);
                    thread::spawn(move || serve(stream, handler, requests));
                }
            });
        }

        Self {
            port,
            connections,
            requests,
        }
    }

    /// Returns the address of a port nothing listens on.
    pub fn unreachable() -> NodeId {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        NodeId::new("127.0.0.1", port)
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new("127.0.0.1", self.port)
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<WireMessage> {
        self.requests.lock().clone()
    }
}

fn serve(mut stream: TcpStream, handler: Arc<Handler>, requests: Arc<Mutex<Vec<WireMessage>>>) {
    loop {
        let Ok(request) = Wire::new(&mut stream).receive() else {
            return;
        };
        requests.lock().push(request.clone());
        match handler(&request) {
            Reply::Message(reply) => {
                let Ok(frame) = reply.encode() else { return };
                if stream.write_all(&frame).is_err() {
                    return;
                }
            }
            Reply::Hangup => return,
            Reply::Silence => {}
        }
    }
}

/// An in-memory data type store speaking the fetch/update protocol.
#[derive(Default)]
pub(crate) struct FakeStore {
    values: Mutex<HashMap<(String, String, String), Stored>>,
    next_key: AtomicUsize,
}

struct Stored {
    data_type: DataType,
    value: DtValue,
    hll_members: BTreeSet<String>,
    version: u8,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers one request.
    pub fn handle(&self, msg: &WireMessage) -> Reply {
        match msg.code {
            MessageCode::PingReq => reply_empty(MessageCode::PingResp),
            MessageCode::DtFetchReq => self.fetch(msg.decode_json().unwrap()),
            MessageCode::DtUpdateReq => self.update(msg.decode_json().unwrap()),
            other => reply_error(ErrorCode::BadRequest, &format!("unsupported {}", other)),
        }
    }

    fn fetch(&self, req: DtFetchReq) -> Reply {
        let values = self.values.lock();
        let key = (req.bucket_type, req.bucket, req.key);
        let resp = match values.get(&key) {
            Some(stored) => DtFetchResp {
                context: Some(vec![stored.version]),
                data_type: stored.data_type,
                value: Some(stored.value.clone()),
            },
            None => DtFetchResp {
                context: None,
                data_type: bucket_data_type(&key.0),
                value: None,
            },
        };
        reply_json(MessageCode::DtFetchResp, &resp)
    }

    fn update(&self, req: DtUpdateReq) -> Reply {
        let has_removals = req.op.set_op.as_ref().map_or(false, |s| !s.removes.is_empty())
            || req.op.map_op.as_ref().map_or(false, map_has_removals);

        let mut values = self.values.lock();
        let assigned = req.key.is_none();
        let key_name = req
            .key
            .clone()
            .unwrap_or_else(|| format!("k{}", self.next_key.fetch_add(1, Ordering::SeqCst)));
        let key = (req.bucket_type.clone(), req.bucket.clone(), key_name.clone());
        let data_type = bucket_data_type(&req.bucket_type);
        let stored = values.entry(key).or_insert_with(|| Stored {
            data_type,
            value: DtValue::default(),
            hll_members: BTreeSet::new(),
            version: 0,
        });

        if has_removals && req.context != Some(vec![stored.version]) {
            return reply_error(ErrorCode::PreconditionFailed, "precondition: stale context");
        }

        if let Some(ref op) = req.op.counter_op {
            *stored.value.counter_value.get_or_insert(0) += op.increment;
        }
        if let Some(ref op) = req.op.set_op {
            apply_set(&mut stored.value.set_value, op);
        }
        if let Some(ref op) = req.op.hll_op {
            stored.hll_members.extend(op.adds.iter().cloned());
            stored.value.hll_value = Some(stored.hll_members.len() as u64);
        }
        if let Some(ref op) = req.op.map_op {
            apply_map(&mut stored.value.map_value, op);
        }
        stored.version = stored.version.wrapping_add(1);

        if req.return_body != Some(true) {
            return reply_empty(MessageCode::DtUpdateResp);
        }
        reply_json(
            MessageCode::DtUpdateResp,
            &DtUpdateResp {
                key: assigned.then_some(key_name),
                context: Some(vec![stored.version]),
                counter_value: stored.value.counter_value,
                set_value: stored.value.set_value.clone(),
                map_value: stored.value.map_value.clone(),
                hll_value: stored.value.hll_value,
            },
        )
    }
}

/// Bucket types are named after the data type they hold.
fn bucket_data_type(bucket_type: &str) -> DataType {
    match bucket_type {
        "counters" => DataType::Counter,
        "sets" => DataType::Set,
        "hlls" => DataType::Hll,
        _ => DataType::Map,
    }
}

fn map_has_removals(op: &MapOp) -> bool {
    !op.removes.is_empty()
        || op.updates.iter().any(|u| {
            u.set_op.as_ref().map_or(false, |s| !s.removes.is_empty())
                || u.map_op.as_ref().map_or(false, map_has_removals)
        })
}

fn apply_set(members: &mut Vec<String>, op: &SetOp) {
    let mut set: BTreeSet<String> = members.drain(..).collect();
    set.extend(op.adds.iter().cloned());
    for item in &op.removes {
        set.remove(item);
    }
    members.extend(set);
}

fn apply_map(entries: &mut Vec<MapEntry>, op: &MapOp) {
    entries.retain(|entry| !op.removes.contains(&entry.field));
    for update in &op.updates {
        let pos = match entries.iter().position(|e| e.field == update.field) {
            Some(pos) => pos,
            None => {
                entries.push(MapEntry::new(update.field.clone()));
                entries.len() - 1
            }
        };
        let entry = &mut entries[pos];
        if let Some(ref op) = update.counter_op {
            *entry.counter_value.get_or_insert(0) += op.increment;
        }
        if let Some(ref op) = update.set_op {
            apply_set(&mut entry.set_value, op);
        }
        if let Some(ref value) = update.register_op {
            entry.register_value = Some(value.clone());
        }
        if let Some(flag) = update.flag_op {
            entry.flag_value = Some(flag == FlagOp::Enable);
        }
        if let Some(ref op) = update.map_op {
            apply_map(&mut entry.map_value, op);
        }
    }
}
