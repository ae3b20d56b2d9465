//! Frame extraction and the PostgreSQL v3 messages used by the simple-query
//! subset.
//!
//! Message bodies are encoded and decoded with `pgwire::messages`. This module
//! only pulls whole frames off the socket, enforces the size limit and decides
//! which message a frame holds.
//!
//! ```text
//! +-----+-----------------+-----------------+
//! | tag |  length (Int32) |      body       |
//! +-----+-----------------+-----------------+
//!  1 byte   big endian,     length - 4 bytes
//!           includes itself
//! ```
//!
//! Startup-phase packets carry no tag byte, only the length and body.

use bytes::{Buf, BytesMut};
use pgwire::api::results::{DataRowEncoder, FieldFormat, FieldInfo};
use pgwire::api::Type;
use pgwire::error::{ErrorInfo, PgWireError};
use pgwire::messages::data::RowDescription;
use pgwire::messages::response::{
    CommandComplete, EmptyQueryResponse, ErrorResponse, ReadyForQuery, TransactionStatus,
};
use pgwire::messages::simplequery::Query;
use pgwire::messages::startup::{
    Authentication, BackendKeyData, ParameterStatus, SslRequest, Startup,
};
use pgwire::messages::terminate::Terminate;
use pgwire::messages::{Message, PgWireBackendMessage};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{DbError, DbResult};

pub const SSL_REQUEST_CODE: i32 = 80877103;
pub const GSSENC_REQUEST_CODE: i32 = 80877104;
pub const CANCEL_REQUEST_CODE: i32 = 80877102;
pub const PROTOCOL_VERSION_3: i32 = 196608;

/// Largest message body accepted from a client.
pub const MAX_MESSAGE_LEN: usize = 64 << 20;

/// First packet(s) a client sends.
#[derive(Debug)]
pub enum StartupPacket {
    SslRequest,
    GssEncRequest,
    CancelRequest,
    Startup(Startup),
}

impl StartupPacket {
    pub fn param(&self, key: &str) -> Option<&str> {
        match self {
            StartupPacket::Startup(startup) => startup.parameters.get(key).map(String::as_str),
            _ => None,
        }
    }
}

/// Messages a client sends once the session is established.
#[derive(Debug, PartialEq, Eq)]
pub enum FrontendMessage {
    Query(String),
    /// A Query whose text is not valid UTF-8. Answered in-band.
    InvalidQuery(String),
    Terminate,
    /// Any other message type, identified by its tag byte.
    Other(u8),
}

pub(crate) fn wire_error(e: PgWireError) -> DbError {
    DbError::Protocol(e.to_string())
}

fn truncated(what: &str) -> DbError {
    DbError::Protocol(format!("truncated {what}"))
}

/// Reads one whole frame: `header` bytes (tag and/or length word) plus the
/// body the length announces. `Ok(None)` if the stream ended cleanly before
/// the first byte.
async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    header: usize,
    min_len: i32,
    what: &str,
) -> DbResult<Option<BytesMut>> {
    let mut frame = BytesMut::zeroed(header);
    if r.read(&mut frame[..1]).await? == 0 {
        return Ok(None);
    }
    r.read_exact(&mut frame[1..])
        .await
        .map_err(|_| truncated(what))?;

    let len = (&frame[header - 4..]).get_i32();
    if len < min_len {
        return Err(DbError::Protocol(format!("invalid {what} length {len}")));
    }
    let body = len as usize - 4;
    if body > MAX_MESSAGE_LEN {
        return Err(DbError::Protocol(format!("{what} of {len} bytes exceeds limit")));
    }

    frame.resize(header + body, 0);
    r.read_exact(&mut frame[header..])
        .await
        .map_err(|_| truncated(what))?;
    Ok(Some(frame))
}

/// Reads one startup-phase packet. `Ok(None)` if the client hung up before
/// sending anything.
pub async fn read_startup<R: AsyncRead + Unpin>(r: &mut R) -> DbResult<Option<StartupPacket>> {
    let Some(mut frame) = read_frame(r, 4, 8, "startup packet").await? else {
        return Ok(None);
    };
    if SslRequest::decode(&mut frame).map_err(wire_error)?.is_some() {
        return Ok(Some(StartupPacket::SslRequest));
    }
    let packet = match (&frame[4..8]).get_i32() {
        GSSENC_REQUEST_CODE => StartupPacket::GssEncRequest,
        CANCEL_REQUEST_CODE => StartupPacket::CancelRequest,
        _ => match Startup::decode(&mut frame).map_err(wire_error)? {
            Some(startup) => StartupPacket::Startup(startup),
            None => return Err(truncated("startup packet")),
        },
    };
    Ok(Some(packet))
}

/// Reads one tagged message. `Ok(None)` on a clean end of stream.
pub async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> DbResult<Option<FrontendMessage>> {
    let Some(mut frame) = read_frame(r, 5, 4, "message").await? else {
        return Ok(None);
    };

    let msg = match frame[0] {
        b'Q' => {
            let Some((&0, text)) = frame[5..].split_last() else {
                return Err(DbError::Protocol("query string is not NUL terminated".into()));
            };
            if let Err(e) = std::str::from_utf8(text) {
                return Ok(Some(FrontendMessage::InvalidQuery(format!(
                    "invalid byte sequence for encoding \"UTF8\" at offset {}",
                    e.valid_up_to()
                ))));
            }
            match Query::decode(&mut frame).map_err(wire_error)? {
                Some(q) => FrontendMessage::Query(q.query),
                None => return Err(truncated("query")),
            }
        }
        b'X' => {
            Terminate::decode(&mut frame).map_err(wire_error)?;
            FrontendMessage::Terminate
        }
        other => FrontendMessage::Other(other),
    };
    Ok(Some(msg))
}

/// AuthenticationOk, the ParameterStatus set, BackendKeyData and the first
/// ReadyForQuery.
pub fn handshake(
    params: &[(&str, &str)],
    process_id: i32,
    secret_key: i32,
) -> Vec<PgWireBackendMessage> {
    let mut msgs = vec![PgWireBackendMessage::Authentication(Authentication::Ok)];
    msgs.extend(params.iter().map(|(name, value)| {
        PgWireBackendMessage::ParameterStatus(ParameterStatus::new(
            name.to_string(),
            value.to_string(),
        ))
    }));
    msgs.push(PgWireBackendMessage::BackendKeyData(BackendKeyData::new(
        process_id, secret_key,
    )));
    msgs.push(ready_for_query());
    msgs
}

/// `Z` with status idle, the only transaction state this server reports.
pub fn ready_for_query() -> PgWireBackendMessage {
    PgWireBackendMessage::ReadyForQuery(ReadyForQuery::new(TransactionStatus::Idle))
}

pub fn command_complete(tag: &str) -> PgWireBackendMessage {
    PgWireBackendMessage::CommandComplete(CommandComplete::new(tag.to_string()))
}

pub fn empty_query() -> PgWireBackendMessage {
    PgWireBackendMessage::EmptyQueryResponse(EmptyQueryResponse::new())
}

/// ErrorResponse with severity `ERROR`.
pub fn error_response(code: &str, message: impl Into<String>) -> PgWireBackendMessage {
    let info = ErrorInfo::new("ERROR".to_string(), code.to_string(), message.into());
    PgWireBackendMessage::ErrorResponse(ErrorResponse::from(info))
}

/// Every column is described as `text` in text format.
pub fn text_fields(columns: &[String]) -> Arc<Vec<FieldInfo>> {
    Arc::new(
        columns
            .iter()
            .map(|name| FieldInfo::new(name.clone(), None, None, Type::TEXT, FieldFormat::Text))
            .collect(),
    )
}

pub fn row_description(fields: &[FieldInfo]) -> PgWireBackendMessage {
    PgWireBackendMessage::RowDescription(RowDescription::new(
        fields.iter().map(Into::into).collect(),
    ))
}

/// One DataRow; `None` goes out as SQL NULL.
pub fn data_row(
    fields: &Arc<Vec<FieldInfo>>,
    values: &[Option<String>],
) -> DbResult<PgWireBackendMessage> {
    let mut encoder = DataRowEncoder::new(fields.clone());
    for value in values {
        encoder.encode_field(value).map_err(wire_error)?;
    }
    Ok(PgWireBackendMessage::DataRow(
        encoder.finish().map_err(wire_error)?,
    ))
}

/// Appends every message to `buf`.
pub fn encode_all(msgs: &[PgWireBackendMessage], buf: &mut BytesMut) -> DbResult<()> {
    for msg in msgs {
        msg.encode(buf).map_err(wire_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(msgs: &[PgWireBackendMessage]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_all(msgs, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn handshake_bytes() {
        let bytes = encoded(&handshake(&[("TimeZone", "UTC")], 1, 2));
        let mut expected = vec![b'R', 0, 0, 0, 8, 0, 0, 0, 0];
        expected.extend_from_slice(b"S\0\0\0\x11TimeZone\0UTC\0");
        expected.extend_from_slice(&[b'K', 0, 0, 0, 12, 0, 0, 0, 1, 0, 0, 0, 2]);
        expected.extend_from_slice(&[b'Z', 0, 0, 0, 5, b'I']);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn row_description_names_text_columns() {
        let fields = text_fields(&["id".to_string()]);
        let bytes = encoded(&[row_description(&fields)]);
        assert_eq!(&bytes[..7], &[b'T', 0, 0, 0, 27, 0, 1]);
        assert_eq!(&bytes[7..10], b"id\0");
        // type oid follows table oid and attribute number
        assert_eq!(&bytes[16..20], &25u32.to_be_bytes());
    }

    #[test]
    fn data_row_encodes_null_as_minus_one() {
        let fields = text_fields(&["a".to_string(), "b".to_string()]);
        let row = data_row(&fields, &[Some("ab".into()), None]).unwrap();
        assert_eq!(
            encoded(&[row]),
            vec![b'D', 0, 0, 0, 16, 0, 2, 0, 0, 0, 2, b'a', b'b', 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn command_complete_empty_and_error() {
        assert_eq!(
            encoded(&[command_complete("SELECT 3")]),
            b"C\0\0\0\x0dSELECT 3\0".to_vec()
        );
        assert_eq!(encoded(&[empty_query()]), vec![b'I', 0, 0, 0, 4]);

        let bytes = encoded(&[error_response("42P01", "boom")]);
        assert_eq!(bytes[0], b'E');
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("SERROR\0"));
        assert!(text.contains("C42P01\0"));
        assert!(text.contains("Mboom\0"));
        assert_eq!(bytes.last(), Some(&0));
    }

    #[tokio::test]
    async fn reads_startup_params() {
        let mut body = PROTOCOL_VERSION_3.to_be_bytes().to_vec();
        body.extend_from_slice(b"user\0alice\0database\0shop\0\0");
        let mut wire = ((body.len() + 4) as i32).to_be_bytes().to_vec();
        wire.extend(body);

        let pkt = read_startup(&mut wire.as_slice()).await.unwrap().unwrap();
        assert_eq!(pkt.param("user"), Some("alice"));
        assert_eq!(pkt.param("database"), Some("shop"));
        assert!(matches!(pkt, StartupPacket::Startup(_)));
    }

    #[tokio::test]
    async fn recognises_request_codes() {
        async fn packet(code: i32, extra: usize) -> StartupPacket {
            let mut wire = ((8 + extra) as i32).to_be_bytes().to_vec();
            wire.extend_from_slice(&code.to_be_bytes());
            wire.extend(std::iter::repeat(0).take(extra));
            read_startup(&mut wire.as_slice()).await.unwrap().unwrap()
        }
        assert!(matches!(packet(SSL_REQUEST_CODE, 0).await, StartupPacket::SslRequest));
        assert!(matches!(
            packet(GSSENC_REQUEST_CODE, 0).await,
            StartupPacket::GssEncRequest
        ));
        assert!(matches!(
            packet(CANCEL_REQUEST_CODE, 8).await,
            StartupPacket::CancelRequest
        ));
    }

    #[tokio::test]
    async fn reads_query_and_terminate() {
        let mut wire: &[u8] = b"Q\0\0\0\x0dSELECT 1\0H\0\0\0\x04X\0\0\0\x04";
        assert_eq!(
            read_message(&mut wire).await.unwrap(),
            Some(FrontendMessage::Query("SELECT 1".into()))
        );
        assert_eq!(read_message(&mut wire).await.unwrap(), Some(FrontendMessage::Other(b'H')));
        assert_eq!(read_message(&mut wire).await.unwrap(), Some(FrontendMessage::Terminate));
        assert_eq!(read_message(&mut wire).await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_utf8_query_is_not_a_framing_error() {
        let mut wire: &[u8] = b"Q\0\0\0\x08a\xffb\0";
        let msg = read_message(&mut wire).await.unwrap().unwrap();
        assert!(matches!(msg, FrontendMessage::InvalidQuery(ref m) if m.contains("offset 1")));
    }

    #[tokio::test]
    async fn truncated_messages_are_protocol_errors() {
        let mut wire: &[u8] = b"Q\0\0\0\x20SEL";
        let err = read_message(&mut wire).await.unwrap_err();
        assert!(err.is_fatal_for_connection());

        let mut wire: &[u8] = b"Q\0\0\0\x02";
        assert!(read_message(&mut wire).await.unwrap_err().is_fatal_for_connection());

        let mut wire: &[u8] = b"Q\0\0\0\x05x";
        assert!(read_message(&mut wire).await.unwrap_err().is_fatal_for_connection());

        let mut wire: &[u8] = b"\0\0";
        assert!(read_startup(&mut wire).await.unwrap_err().is_fatal_for_connection());

        let mut wire: &[u8] = b"";
        assert!(read_startup(&mut wire).await.unwrap().is_none());
    }
}
