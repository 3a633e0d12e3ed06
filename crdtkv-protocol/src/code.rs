//! Message codes.
//!
//! Every frame carries a one-byte code naming its message type. The table
//! below is closed: it is fixed at compile time, and `code()` and
//! `TryFrom<u8>` are generated from the same list so they are inverses by
//! construction.

use crate::error::ProtocolError;
use std::fmt;

macro_rules! message_codes {
    ($($(#[$meta:meta])* $name:ident = $code:literal,)+) => {
        /// Symbolic message names and their wire codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageCode {
            $($(#[$meta])* $name,)+
        }

        impl MessageCode {
            /// Every known message code, in table order.
            pub const ALL: &'static [MessageCode] = &[$(MessageCode::$name,)+];

            /// Returns the wire byte for this message.
            pub const fn code(self) -> u8 {
                match self {
                    $(MessageCode::$name => $code,)+
                }
            }

            /// Returns the symbolic name of this message.
            pub const fn name(self) -> &'static str {
                match self {
                    $(MessageCode::$name => stringify!($name),)+
                }
            }
        }

        impl TryFrom<u8> for MessageCode {
            type Error = ProtocolError;

            fn try_from(code: u8) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok(MessageCode::$name),)+
                    other => Err(ProtocolError::UnknownMessageCode(other)),
                }
            }
        }
    };
}

message_codes! {
    /// Structured error reply; may arrive in place of any response.
    ErrorResp = 0,
    PingReq = 1,
    PingResp = 2,
    GetClientIdReq = 3,
    GetClientIdResp = 4,
    SetClientIdReq = 5,
    SetClientIdResp = 6,
    GetServerInfoReq = 7,
    GetServerInfoResp = 8,
    GetReq = 9,
    GetResp = 10,
    PutReq = 11,
    PutResp = 12,
    DelReq = 13,
    DelResp = 14,
    ListBucketsReq = 15,
    ListBucketsResp = 16,
    ListKeysReq = 17,
    ListKeysResp = 18,
    GetBucketReq = 19,
    GetBucketResp = 20,
    SetBucketReq = 21,
    SetBucketResp = 22,
    MapRedReq = 23,
    MapRedResp = 24,
    IndexReq = 25,
    IndexResp = 26,
    SearchQueryReq = 27,
    SearchQueryResp = 28,
    ResetBucketReq = 29,
    ResetBucketResp = 30,
    GetBucketTypeReq = 31,
    SetBucketTypeReq = 32,
    CsBucketReq = 40,
    CsBucketResp = 41,
    CounterUpdateReq = 50,
    CounterUpdateResp = 51,
    CounterGetReq = 52,
    CounterGetResp = 53,
    /// Fetch a data type value.
    DtFetchReq = 80,
    DtFetchResp = 81,
    /// Apply an operation to a data type.
    DtUpdateReq = 82,
    DtUpdateResp = 83,
    TsQueryReq = 90,
    TsQueryResp = 91,
    TsPutReq = 92,
    TsPutResp = 93,
    TsDelReq = 94,
    TsDelResp = 95,
    TsGetReq = 96,
    TsGetResp = 97,
    TsListKeysReq = 98,
    TsListKeysResp = 99,
    AuthReq = 253,
    AuthResp = 254,
    /// Upgrade the connection to TLS. Sent and echoed with an empty body.
    StartTls = 255,
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<MessageCode> for u8 {
    fn from(code: MessageCode) -> Self {
        code.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_inverses() {
        for &msg in MessageCode::ALL {
            assert_eq!(MessageCode::try_from(msg.code()).unwrap(), msg);
        }
    }

    #[test]
    fn test_codes_are_unique() {
        let codes: HashSet<u8> = MessageCode::ALL.iter().map(|m| m.code()).collect();
        assert_eq!(codes.len(), MessageCode::ALL.len());
    }

    #[test]
    fn test_unknown_code() {
        let result = MessageCode::try_from(200);
        assert!(matches!(result, Err(ProtocolError::UnknownMessageCode(200))));
    }

    #[test]
    fn test_known_values() {
        assert_eq!(MessageCode::ErrorResp.code(), 0);
        assert_eq!(MessageCode::DtFetchReq.code(), 80);
        assert_eq!(MessageCode::DtUpdateResp.code(), 83);
        assert_eq!(MessageCode::StartTls.code(), 255);
        assert_eq!(u8::from(MessageCode::PingReq), 1);
    }

    #[test]
    fn test_display_uses_name() {
        assert_eq!(MessageCode::DtUpdateReq.to_string(), "DtUpdateReq");
        assert_eq!(MessageCode::ErrorResp.name(), "ErrorResp");
    }
}
