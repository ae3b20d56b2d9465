use bytes::BytesMut;
use pgwire::messages::PgWireBackendMessage;
use std::sync::Arc;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tracing::{debug, info, warn};

use super::messages::{
    command_complete, data_row, empty_query, encode_all, error_response, handshake,
    read_message, read_startup, ready_for_query, row_description, text_fields, FrontendMessage,
    StartupPacket,
};
use crate::engine::Engine;
use crate::error::DbResult;
use crate::sql::{plan_and_exec, QueryResult};

/// Version reported in `server_version` and by `SELECT version()`.
pub const SERVER_VERSION: &str = "15.0";

/// Placeholder values for BackendKeyData. Cancel requests are not honoured.
const PROCESS_ID: i32 = 4242;
const SECRET_KEY: i32 = 0x0cafe;

/// SQLSTATE for a query string that is not valid UTF-8.
const CHARACTER_NOT_IN_REPERTOIRE: &str = "22021";

/// One client session: startup handshake followed by the simple-query loop.
///
/// ## Lifecycle
/// 1. SSL/GSS encryption requests are declined with `N`; the client then
///    sends a plaintext startup packet
/// 2. Any user is accepted: AuthenticationOk, ParameterStatus x5,
///    BackendKeyData, ReadyForQuery
/// 3. Each `Query` gets a result (or ErrorResponse) and a fresh ReadyForQuery
/// 4. `Terminate`, end of stream or a framing error ends the session
///
/// SQL failures are reported in-band and never end the session.
pub struct Connection<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    engine: Arc<Engine>,
    peer: String,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, engine: Arc<Engine>, peer: impl Into<String>) -> Self {
        let (r, w) = io::split(stream);
        Self {
            reader: BufReader::new(r),
            writer: w,
            engine,
            peer: peer.into(),
        }
    }

    pub async fn run(mut self) -> DbResult<()> {
        if self.startup().await? {
            self.query_loop().await?;
        }
        self.writer.shutdown().await.ok();
        Ok(())
    }

    /// Returns false if the client went away (or only wanted to cancel)
    /// before a session was established.
    async fn startup(&mut self) -> DbResult<bool> {
        loop {
            let packet = match read_startup(&mut self.reader).await? {
                Some(p) => p,
                None => return Ok(false),
            };
            match &packet {
                StartupPacket::SslRequest | StartupPacket::GssEncRequest => {
                    debug!(peer = %self.peer, "declining encryption request");
                    self.writer.write_all(b"N").await?;
                    self.writer.flush().await?;
                }
                StartupPacket::CancelRequest => {
                    debug!(peer = %self.peer, "ignoring cancel request");
                    return Ok(false);
                }
                StartupPacket::Startup(startup) => {
                    info!(
                        peer = %self.peer,
                        protocol = %format!(
                            "{}.{}",
                            startup.protocol_number_major, startup.protocol_number_minor
                        ),
                        user = packet.param("user").unwrap_or(""),
                        database = packet.param("database").unwrap_or(""),
                        "client startup"
                    );
                    let params = [
                        ("server_version", SERVER_VERSION),
                        ("server_encoding", "UTF8"),
                        ("client_encoding", "UTF8"),
                        ("TimeZone", "UTC"),
                        ("DateStyle", "ISO, MDY"),
                    ];
                    self.send(&handshake(&params, PROCESS_ID, SECRET_KEY)).await?;
                    return Ok(true);
                }
            }
        }
    }

    async fn query_loop(&mut self) -> DbResult<()> {
        loop {
            let msg = match read_message(&mut self.reader).await? {
                Some(m) => m,
                None => return Ok(()),
            };
            match msg {
                FrontendMessage::Query(sql) => self.handle_query(&sql).await?,
                FrontendMessage::InvalidQuery(reason) => {
                    warn!(peer = %self.peer, %reason, "rejecting query text");
                    self.send(&[
                        error_response(CHARACTER_NOT_IN_REPERTOIRE, reason),
                        ready_for_query(),
                    ])
                    .await?;
                }
                FrontendMessage::Terminate => {
                    debug!(peer = %self.peer, "terminate");
                    return Ok(());
                }
                FrontendMessage::Other(tag) => {
                    warn!(peer = %self.peer, tag = %char::from(tag), "ignoring unsupported message");
                }
            }
        }
    }

    async fn handle_query(&mut self, sql: &str) -> DbResult<()> {
        let mut msgs = if is_version_probe(sql) {
            encode_result(&version_result())?
        } else {
            match plan_and_exec(self.engine.clone(), sql).await {
                Ok(res) => encode_result(&res)?,
                Err(e) if e.is_fatal_for_connection() => return Err(e),
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "query failed");
                    vec![error_response(e.sqlstate(), e.to_string())]
                }
            }
        };
        msgs.push(ready_for_query());
        self.send(&msgs).await
    }

    async fn send(&mut self, msgs: &[PgWireBackendMessage]) -> DbResult<()> {
        let mut out = BytesMut::new();
        encode_all(msgs, &mut out)?;
        self.writer.write_all(&out).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// `SELECT version()` as sent by drivers right after connecting.
fn is_version_probe(sql: &str) -> bool {
    let normalized: String = sql
        .trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    normalized == "select version()"
}

fn version_result() -> QueryResult {
    QueryResult {
        columns: vec!["version".to_string()],
        rows: vec![vec![Some(format!(
            "PostgreSQL {SERVER_VERSION} (jsonl_pg {})",
            env!("CARGO_PKG_VERSION")
        ))]],
        rows_affected: 1,
        last_id: None,
        status: "SELECT 1".to_string(),
    }
}

/// Backend messages for one statement result, without the trailing
/// ReadyForQuery.
///
/// ## Returns
/// * blank query: EmptyQueryResponse
/// * statements with columns: RowDescription, one DataRow per row,
///   CommandComplete
/// * everything else: CommandComplete
pub fn encode_result(res: &QueryResult) -> DbResult<Vec<PgWireBackendMessage>> {
    if res.is_empty_query() {
        return Ok(vec![empty_query()]);
    }
    let mut msgs = Vec::with_capacity(res.rows.len() + 2);
    if !res.columns.is_empty() {
        let fields = text_fields(&res.columns);
        msgs.push(row_description(&fields));
        for row in &res.rows {
            msgs.push(data_row(&fields, row)?);
        }
    }
    msgs.push(command_complete(&res.status));
    Ok(msgs)
}
