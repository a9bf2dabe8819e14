//! IPROTO wire protocol message encoding and decoding.
//!
//! Every packet is a MessagePack uint32 length followed by a header map and
//! an optional body map. Requests are built with `rmp::encode`; replies are
//! decoded lazily into [`Reply`], which keeps the interesting body values as
//! undecoded [`Bytes`] slices of the frame.

use bytes::Bytes;
use rmp::encode;

use super::msgpack;
use crate::error::{Error, Result};

// ============================================================================
// Protocol Constants
// ============================================================================

/// Header keys
pub const IPROTO_REQUEST_TYPE: u64 = 0x00;
pub const IPROTO_SYNC: u64 = 0x01;
pub const IPROTO_SCHEMA_VERSION: u64 = 0x05;

/// Body keys
pub const IPROTO_TUPLE: u64 = 0x21;
pub const IPROTO_USER_NAME: u64 = 0x23;
pub const IPROTO_DATA: u64 = 0x30;
pub const IPROTO_ERROR_24: u64 = 0x31;
pub const IPROTO_METADATA: u64 = 0x32;
pub const IPROTO_SQL_TEXT: u64 = 0x40;
pub const IPROTO_SQL_BIND: u64 = 0x41;
pub const IPROTO_SQL_INFO: u64 = 0x42;
pub const IPROTO_ERROR: u64 = 0x52;

/// Keys inside a metadata entry
pub const IPROTO_FIELD_NAME: u64 = 0x00;
pub const IPROTO_FIELD_TYPE: u64 = 0x01;

/// Keys inside SQL_INFO
pub const SQL_INFO_ROW_COUNT: u64 = 0x00;

/// Request types
pub const IPROTO_AUTH: u8 = 0x07;
pub const IPROTO_EXECUTE: u8 = 0x0b;
pub const IPROTO_PING: u8 = 0x40;

/// Response codes
pub const IPROTO_OK: u32 = 0x00;
pub const IPROTO_CHUNK: u32 = 0x80;
pub const IPROTO_TYPE_ERROR: u32 = 0x8000;

/// Size of the fixed-width length prefix (0xce + u32).
pub const LENGTH_PREFIX_SIZE: usize = 5;

// ============================================================================
// Requests (Client -> Server)
// ============================================================================

/// A request that can be framed and written to the server.
pub trait Request {
    const REQUEST_TYPE: u8;

    /// Number of entries in the body map.
    fn body_len(&self) -> u32;

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Append the complete packet, length prefix included.
    fn encode(&self, sync: u64, buf: &mut Vec<u8>) -> Result<()> {
        let start = buf.len();

        // Placeholder for length (filled in at the end)
        buf.push(0xce);
        buf.extend_from_slice(&[0; 4]);

        encode::write_map_len(buf, 2)?;
        encode::write_uint(buf, IPROTO_REQUEST_TYPE)?;
        encode::write_uint(buf, Self::REQUEST_TYPE as u64)?;
        encode::write_uint(buf, IPROTO_SYNC)?;
        encode::write_uint(buf, sync)?;

        let entries = self.body_len();
        if entries > 0 {
            encode::write_map_len(buf, entries)?;
            self.encode_body(buf)?;
        }

        let len = buf.len() - start - LENGTH_PREFIX_SIZE;
        let len = u32::try_from(len).map_err(|_| Error::protocol("request exceeds 4 GiB"))?;
        buf[start + 1..start + LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_be_bytes());
        Ok(())
    }
}

fn write_str(buf: &mut Vec<u8>, s: &[u8]) -> Result<()> {
    encode::write_str_len(buf, s.len() as u32)?;
    buf.extend_from_slice(s);
    Ok(())
}

/// SQL execute request.
///
/// `bind` is an already encoded MessagePack array of parameters. It is
/// omitted from the body when the statement has no parameters.
#[derive(Debug, Clone)]
pub struct ExecuteRequest<'a> {
    pub sql: &'a str,
    pub bind: Option<&'a [u8]>,
}

impl Request for ExecuteRequest<'_> {
    const REQUEST_TYPE: u8 = IPROTO_EXECUTE;

    fn body_len(&self) -> u32 {
        if self.bind.is_some() {
            2
        } else {
            1
        }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<()> {
        encode::write_uint(buf, IPROTO_SQL_TEXT)?;
        write_str(buf, self.sql.as_bytes())?;
        if let Some(bind) = self.bind {
            encode::write_uint(buf, IPROTO_SQL_BIND)?;
            buf.extend_from_slice(bind);
        }
        Ok(())
    }
}

/// chap-sha1 authentication request.
#[derive(Debug, Clone)]
pub struct AuthRequest<'a> {
    pub user: &'a str,
    pub scramble: &'a [u8],
}

impl Request for AuthRequest<'_> {
    const REQUEST_TYPE: u8 = IPROTO_AUTH;

    fn body_len(&self) -> u32 {
        2
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<()> {
        encode::write_uint(buf, IPROTO_USER_NAME)?;
        write_str(buf, self.user.as_bytes())?;
        encode::write_uint(buf, IPROTO_TUPLE)?;
        encode::write_array_len(buf, 2)?;
        write_str(buf, b"chap-sha1")?;
        write_str(buf, self.scramble)?;
        Ok(())
    }
}

/// Keepalive request with an empty body.
#[derive(Debug, Clone, Copy)]
pub struct PingRequest;

impl Request for PingRequest {
    const REQUEST_TYPE: u8 = IPROTO_PING;

    fn body_len(&self) -> u32 {
        0
    }

    fn encode_body(&self, _buf: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// Parse the packet length from a 5-byte prefix.
pub fn decode_length(prefix: &[u8; LENGTH_PREFIX_SIZE]) -> Result<usize> {
    if prefix[0] != 0xce {
        return Err(Error::protocol(format!(
            "unexpected length marker 0x{:02x}",
            prefix[0]
        )));
    }
    let len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);
    Ok(len as usize)
}

// ============================================================================
// Replies (Server -> Client)
// ============================================================================

/// Column description from the METADATA body key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub field_type: String,
}

/// One decoded reply packet.
///
/// The body values stay encoded: `data` is the raw row array, the rest are
/// decoded on demand by the accessors.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub code: u32,
    pub sync: u64,
    pub schema_version: Option<u64>,
    pub data: Option<Bytes>,
    pub metadata: Option<Bytes>,
    pub sql_info: Option<Bytes>,
    pub error: Option<Bytes>,
}

impl Reply {
    /// Decode a packet body (everything after the length prefix).
    pub fn decode(mut frame: Bytes) -> Result<Self> {
        let mut reply = Reply::default();
        let mut have_code = false;

        let entries = msgpack::read_map_len(&mut frame)?;
        for _ in 0..entries {
            match msgpack::read_uint(&mut frame)? {
                IPROTO_REQUEST_TYPE => {
                    let code = msgpack::read_uint(&mut frame)?;
                    reply.code = u32::try_from(code)
                        .map_err(|_| Error::protocol(format!("response code {} out of range", code)))?;
                    have_code = true;
                }
                IPROTO_SYNC => reply.sync = msgpack::read_uint(&mut frame)?,
                IPROTO_SCHEMA_VERSION => {
                    reply.schema_version = Some(msgpack::read_uint(&mut frame)?)
                }
                _ => msgpack::skip_value(&mut frame)?,
            }
        }
        if !have_code {
            return Err(Error::protocol("reply header without response code"));
        }

        // Body is optional (e.g. ping replies)
        if frame.is_empty() {
            return Ok(reply);
        }

        let entries = msgpack::read_map_len(&mut frame)?;
        for _ in 0..entries {
            let key = msgpack::read_uint(&mut frame)?;
            let value = msgpack::read_value_bytes(&mut frame)?;
            match key {
                IPROTO_DATA => reply.data = Some(value),
                IPROTO_METADATA => reply.metadata = Some(value),
                IPROTO_SQL_INFO => reply.sql_info = Some(value),
                IPROTO_ERROR_24 => reply.error = Some(value),
                _ => {}
            }
        }

        Ok(reply)
    }

    pub fn is_ok(&self) -> bool {
        self.code == IPROTO_OK
    }

    pub fn is_chunk(&self) -> bool {
        self.code == IPROTO_CHUNK
    }

    pub fn is_error(&self) -> bool {
        self.code & IPROTO_TYPE_ERROR != 0
    }

    /// Server error code with the error type bit masked off.
    pub fn error_code(&self) -> Option<u32> {
        self.is_error().then_some(self.code & !IPROTO_TYPE_ERROR)
    }

    /// Error text from the ERROR_24 key, if present.
    pub fn error_message(&self) -> Option<String> {
        let mut value = self.error.clone()?;
        let text = msgpack::read_str(&mut value).ok()?;
        Some(String::from_utf8_lossy(&text).into_owned())
    }

    /// Rows changed by a DML statement, from SQL_INFO.
    pub fn row_count(&self) -> Result<Option<u64>> {
        let Some(mut info) = self.sql_info.clone() else {
            return Ok(None);
        };
        let entries = msgpack::read_map_len(&mut info)?;
        let mut count = None;
        for _ in 0..entries {
            match msgpack::read_uint(&mut info)? {
                SQL_INFO_ROW_COUNT => count = Some(msgpack::read_uint(&mut info)?),
                _ => msgpack::skip_value(&mut info)?,
            }
        }
        Ok(count)
    }

    /// Column descriptions from METADATA. Unknown keys are skipped, missing
    /// metadata yields an empty list.
    pub fn fields(&self) -> Result<Vec<FieldDescription>> {
        let Some(mut meta) = self.metadata.clone() else {
            return Ok(Vec::new());
        };
        let count = msgpack::read_array_len(&mut meta)? as usize;
        let mut fields = Vec::new();
        fields.try_reserve_exact(count)?;

        for _ in 0..count {
            let mut field = FieldDescription::default();
            let entries = msgpack::read_map_len(&mut meta)?;
            for _ in 0..entries {
                match msgpack::read_uint(&mut meta)? {
                    IPROTO_FIELD_NAME => field.name = read_string(&mut meta)?,
                    IPROTO_FIELD_TYPE => field.field_type = read_string(&mut meta)?,
                    _ => msgpack::skip_value(&mut meta)?,
                }
            }
            fields.push(field);
        }

        Ok(fields)
    }
}

fn read_string(buf: &mut Bytes) -> Result<String> {
    let raw = msgpack::read_str(buf)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(buf: &mut Vec<u8>, code: u32, sync: u64) {
        encode::write_map_len(buf, 3).unwrap();
        encode::write_uint(buf, IPROTO_REQUEST_TYPE).unwrap();
        encode::write_uint(buf, code as u64).unwrap();
        encode::write_uint(buf, IPROTO_SYNC).unwrap();
        encode::write_uint(buf, sync).unwrap();
        encode::write_uint(buf, IPROTO_SCHEMA_VERSION).unwrap();
        encode::write_uint(buf, 80).unwrap();
    }

    #[test]
    fn test_execute_request_framing() {
        let mut buf = Vec::new();
        let req = ExecuteRequest {
            sql: "SELECT 1",
            bind: None,
        };
        req.encode(7, &mut buf).unwrap();

        let prefix: [u8; 5] = buf[..5].try_into().unwrap();
        assert_eq!(decode_length(&prefix).unwrap(), buf.len() - 5);

        let mut rest = Bytes::from(buf[5..].to_vec());
        assert_eq!(msgpack::read_map_len(&mut rest).unwrap(), 2);
        assert_eq!(msgpack::read_uint(&mut rest).unwrap(), IPROTO_REQUEST_TYPE);
        assert_eq!(msgpack::read_uint(&mut rest).unwrap(), IPROTO_EXECUTE as u64);
        assert_eq!(msgpack::read_uint(&mut rest).unwrap(), IPROTO_SYNC);
        assert_eq!(msgpack::read_uint(&mut rest).unwrap(), 7);
        // body: only SQL_TEXT without parameters
        assert_eq!(msgpack::read_map_len(&mut rest).unwrap(), 1);
        assert_eq!(msgpack::read_uint(&mut rest).unwrap(), IPROTO_SQL_TEXT);
        assert_eq!(&msgpack::read_str(&mut rest).unwrap()[..], b"SELECT 1");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_execute_request_with_bind() {
        let mut buf = Vec::new();
        let bind = [0x91, 0x05];
        let req = ExecuteRequest {
            sql: "SELECT ?",
            bind: Some(&bind),
        };
        req.encode(1, &mut buf).unwrap();
        assert!(buf.ends_with(&[IPROTO_SQL_BIND as u8, 0x91, 0x05]));
    }

    #[test]
    fn test_auth_request_body() {
        let mut buf = Vec::new();
        let scramble = [0xaa; 20];
        AuthRequest {
            user: "admin",
            scramble: &scramble,
        }
        .encode(0, &mut buf)
        .unwrap();

        let mut rest = Bytes::from(buf[5..].to_vec());
        msgpack::skip_value(&mut rest).unwrap();
        assert_eq!(msgpack::read_map_len(&mut rest).unwrap(), 2);
        assert_eq!(msgpack::read_uint(&mut rest).unwrap(), IPROTO_USER_NAME);
        assert_eq!(&msgpack::read_str(&mut rest).unwrap()[..], b"admin");
        assert_eq!(msgpack::read_uint(&mut rest).unwrap(), IPROTO_TUPLE);
        assert_eq!(msgpack::read_array_len(&mut rest).unwrap(), 2);
        assert_eq!(&msgpack::read_str(&mut rest).unwrap()[..], b"chap-sha1");
        assert_eq!(&msgpack::read_str(&mut rest).unwrap()[..], &scramble[..]);
    }

    #[test]
    fn test_ping_has_no_body() {
        let mut buf = Vec::new();
        PingRequest.encode(3, &mut buf).unwrap();
        let mut rest = Bytes::from(buf[5..].to_vec());
        msgpack::skip_value(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_decode_length_rejects_other_markers() {
        assert!(decode_length(&[0xcd, 0, 0, 0, 1]).is_err());
        assert_eq!(decode_length(&[0xce, 0, 0, 1, 0]).unwrap(), 256);
    }

    #[test]
    fn test_decode_dml_reply() {
        let mut buf = Vec::new();
        header(&mut buf, IPROTO_OK, 4);
        encode::write_map_len(&mut buf, 1).unwrap();
        encode::write_uint(&mut buf, IPROTO_SQL_INFO).unwrap();
        encode::write_map_len(&mut buf, 1).unwrap();
        encode::write_uint(&mut buf, SQL_INFO_ROW_COUNT).unwrap();
        encode::write_uint(&mut buf, 3).unwrap();

        let reply = Reply::decode(Bytes::from(buf)).unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.sync, 4);
        assert_eq!(reply.schema_version, Some(80));
        assert!(reply.data.is_none());
        assert_eq!(reply.row_count().unwrap(), Some(3));
    }

    #[test]
    fn test_decode_error_reply() {
        let mut buf = Vec::new();
        header(&mut buf, IPROTO_TYPE_ERROR | 42, 9);
        encode::write_map_len(&mut buf, 2).unwrap();
        encode::write_uint(&mut buf, IPROTO_ERROR_24).unwrap();
        encode::write_str(&mut buf, "Space 'T' does not exist").unwrap();
        // extended error map is skipped
        encode::write_uint(&mut buf, IPROTO_ERROR).unwrap();
        encode::write_map_len(&mut buf, 0).unwrap();

        let reply = Reply::decode(Bytes::from(buf)).unwrap();
        assert!(reply.is_error());
        assert_eq!(reply.error_code(), Some(42));
        assert_eq!(
            reply.error_message().as_deref(),
            Some("Space 'T' does not exist")
        );
    }

    #[test]
    fn test_fields_skip_unknown_keys() {
        let mut buf = Vec::new();
        header(&mut buf, IPROTO_OK, 1);
        encode::write_map_len(&mut buf, 1).unwrap();
        encode::write_uint(&mut buf, IPROTO_METADATA).unwrap();
        encode::write_array_len(&mut buf, 2).unwrap();
        encode::write_map_len(&mut buf, 3).unwrap();
        encode::write_uint(&mut buf, IPROTO_FIELD_NAME).unwrap();
        encode::write_str(&mut buf, "ID").unwrap();
        encode::write_uint(&mut buf, IPROTO_FIELD_TYPE).unwrap();
        encode::write_str(&mut buf, "integer").unwrap();
        encode::write_uint(&mut buf, 0x03).unwrap();
        encode::write_bool(&mut buf, true).unwrap();
        encode::write_map_len(&mut buf, 1).unwrap();
        encode::write_uint(&mut buf, IPROTO_FIELD_NAME).unwrap();
        encode::write_str(&mut buf, "NAME").unwrap();

        let reply = Reply::decode(Bytes::from(buf)).unwrap();
        let fields = reply.fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "ID");
        assert_eq!(fields[0].field_type, "integer");
        assert_eq!(fields[1].name, "NAME");
        assert_eq!(fields[1].field_type, "");
    }

    #[test]
    fn test_header_without_code_is_rejected() {
        let mut buf = Vec::new();
        encode::write_map_len(&mut buf, 1).unwrap();
        encode::write_uint(&mut buf, IPROTO_SYNC).unwrap();
        encode::write_uint(&mut buf, 1).unwrap();
        assert!(matches!(
            Reply::decode(Bytes::from(buf)),
            Err(Error::Protocol(_))
        ));
    }
}
