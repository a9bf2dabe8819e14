//! SQL statement engine.
//!
//! A `Statement` owns its query text and input parameters, borrows the
//! caller's output buffers for `'b`, and walks the reply stream one chunk at
//! a time:
//!
//! ```text
//! Begin --execute--> Sent --first chunk--> Chunk | End
//! Chunk --rows drained--> read next chunk
//! End   --rows drained--> NoData
//! terminal error --> Failed, until close_cursor or the next execute
//! ```

use bytes::Bytes;
use log::{debug, trace, warn};
use smallvec::SmallVec;

use super::connection::{Connection, Transport};
use super::convert::{self, Conversion, OutputBinding};
use super::fake::FakeResultSet;
use super::msgpack;
use super::params;
use super::protocol::{Reply, IPROTO_CHUNK, IPROTO_OK};
use super::types::{Cell, Param, WireType};
use crate::error::{Error, ErrorKind, Result};

/// Columns decoded without a heap allocation.
const INLINE_COLUMNS: usize = 16;

type Row = SmallVec<[Cell; INLINE_COLUMNS]>;

/// Position of the statement in the reply stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    /// Nothing sent since prepare or close_cursor.
    Begin,
    /// Request written, first chunk not read yet.
    Sent,
    /// More chunks follow the current one.
    Chunk,
    /// Current chunk is the last one.
    End,
    /// A terminal error ended the cursor.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// The reply carried a row array.
    Select,
    /// No rows; affected-row count comes from SQL info.
    Dml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    Row,
    NoData,
}

// ============================================================================
// Statement
// ============================================================================

pub struct Statement<'b, T> {
    conn: Connection<T>,
    query: String,
    params: Vec<Param>,
    /// Output columns; the buffers belong to the caller.
    outputs: Vec<OutputBinding<'b>>,
    /// Encoded bind array of the last execute.
    scratch: Vec<u8>,
    reply: Option<Reply>,
    /// Undecoded rows left in the current chunk.
    data: Bytes,
    nrows: u32,
    row: Row,
    ncols: usize,
    names: Vec<String>,
    decl_types: Vec<String>,
    /// Rows consumed since execute.
    cur_row: u64,
    affected_rows: i64,
    sync: u64,
    state: ReplyState,
    kind: Option<QueryKind>,
    failure: Option<(ErrorKind, String)>,
    last_error: Option<String>,
    fake: Option<FakeResultSet>,
}

impl<'b, T: Transport> Statement<'b, T> {
    pub(crate) fn prepare(conn: &Connection<T>, sql: &str) -> Result<Self> {
        let mut query = String::new();
        query.try_reserve_exact(sql.len())?;
        query.push_str(sql);

        Ok(Self {
            conn: conn.clone(),
            query,
            params: Vec::new(),
            outputs: Vec::new(),
            scratch: Vec::new(),
            reply: None,
            data: Bytes::new(),
            nrows: 0,
            row: Row::new(),
            ncols: 0,
            names: Vec::new(),
            decl_types: Vec::new(),
            cur_row: 0,
            affected_rows: 0,
            sync: 0,
            state: ReplyState::Begin,
            kind: None,
            failure: None,
            last_error: None,
            fake: None,
        })
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Replace the input parameters. Names are dropped: every parameter is
    /// sent positionally.
    pub fn bind_query_params(&mut self, params: Vec<Param>) {
        self.params = params
            .into_iter()
            .map(|mut p| {
                p.name = None;
                p
            })
            .collect();
    }

    /// Replace the input parameters, keeping their names.
    pub fn bind_named_query_params(&mut self, params: Vec<Param>) {
        self.params = params;
    }

    /// Bind one parameter by zero-based index. Unbound gaps send nil.
    pub fn bind_query_param(&mut self, index: usize, param: impl Into<Param>) -> Result<()> {
        if index >= self.params.len() {
            let grow = index + 1 - self.params.len();
            if let Err(e) = self.params.try_reserve(grow) {
                return Err(self.note(e.into()));
            }
            self.params.resize_with(index + 1, Param::null);
        }
        self.params[index] = param.into();
        Ok(())
    }

    /// Driver-layer binding by host type code. `None` binds nil.
    pub fn bind_query_param_raw(&mut self, index: usize, code: i32, value: Option<&[u8]>) -> Result<()> {
        self.bind_query_param(index, Param::raw(code, value))
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn clear_params(&mut self) {
        self.params.clear();
    }

    /// Attach output columns, one per result column from the left. Extra
    /// result columns are left unconverted.
    pub fn bind_result(&mut self, outputs: Vec<OutputBinding<'b>>) {
        self.outputs = outputs;
    }

    /// Detach the output columns, handing the borrows back.
    pub fn unbind_result(&mut self) -> Vec<OutputBinding<'b>> {
        std::mem::take(&mut self.outputs)
    }

    pub fn result_binding(&self, column: usize) -> Option<&OutputBinding<'b>> {
        self.outputs.get(column)
    }

    /// Serve `rows` through the cursor instead of the network.
    pub fn set_result_set(&mut self, rows: FakeResultSet) {
        self.reset_cursor();
        self.ncols = rows.column_count();
        self.names = rows.names().to_vec();
        self.decl_types = rows.decl_types().to_vec();
        self.kind = Some(QueryKind::Select);
        self.affected_rows = -1;
        self.fake = Some(rows);
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Send the query with the bound parameters and read the first chunk.
    pub fn execute(&mut self) -> Result<()> {
        self.reset_cursor();

        let expected = params::count_placeholders(&self.query);
        if expected != self.params.len() {
            warn!(
                "query has {} placeholders but {} parameters are bound",
                expected,
                self.params.len()
            );
        }

        if let Err(e) = self.send() {
            return Err(self.note(e));
        }
        self.state = ReplyState::Sent;
        debug!(
            "execute sync={} params={}: {}",
            self.sync,
            self.params.len(),
            self.query
        );

        self.read_chunk()?;

        let has_rows = self.reply.as_ref().is_some_and(|r| r.data.is_some());
        if has_rows {
            self.kind = Some(QueryKind::Select);
            self.affected_rows = -1;
            let fields = match self.reply.as_ref() {
                Some(reply) => reply.fields(),
                None => Ok(Vec::new()),
            };
            match fields {
                Ok(fields) => {
                    self.ncols = fields.len();
                    (self.names, self.decl_types) =
                        fields.into_iter().map(|f| (f.name, f.field_type)).unzip();
                }
                Err(e) => return Err(self.fail(e)),
            }
        } else {
            self.kind = Some(QueryKind::Dml);
            let count = match self.reply.as_ref() {
                Some(reply) => reply.row_count(),
                None => Ok(None),
            };
            match count {
                Ok(count) => {
                    self.affected_rows =
                        count.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX))
                }
                Err(e) => return Err(self.fail(e)),
            }
        }

        Ok(())
    }

    fn send(&mut self) -> Result<()> {
        let bind = if self.params.is_empty() {
            None
        } else {
            self.scratch.clear();
            params::encode_params(&self.params, &mut self.scratch)?;
            Some(self.scratch.as_slice())
        };

        let mut transport = self.conn.lock();
        transport.send(&self.query, bind)?;
        self.sync = transport.next_sync().wrapping_sub(1);
        transport.flush()
    }

    /// Replace the current reply with the next frame from the transport.
    fn read_chunk(&mut self) -> Result<()> {
        let reply = self.conn.lock().read_reply();
        self.data = Bytes::new();
        self.nrows = 0;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                self.reply = None;
                return Err(self.fail(e));
            }
        };

        if reply.sync != self.sync {
            warn!(
                "reply sync {} does not match request sync {}",
                reply.sync, self.sync
            );
            self.reply = None;
            return Err(self.fail(Error::Sync {
                expected: self.sync,
                got: reply.sync,
            }));
        }

        match reply.code {
            IPROTO_OK => self.state = ReplyState::End,
            IPROTO_CHUNK => self.state = ReplyState::Chunk,
            _ => {
                let code = reply.error_code().unwrap_or(reply.code);
                let message = reply
                    .error_message()
                    .unwrap_or_else(|| format!("request failed with code 0x{:x}", reply.code));
                warn!("server error {}: {}", code, message);
                self.reply = Some(reply);
                return Err(self.fail(Error::Server { code, message }));
            }
        }

        if let Some(rows) = &reply.data {
            let mut rows = rows.clone();
            match msgpack::read_array_len(&mut rows) {
                Ok(n) => {
                    self.nrows = n;
                    self.data = rows;
                }
                Err(e) => {
                    self.reply = None;
                    return Err(self.fail(e));
                }
            }
        }

        debug!(
            "read chunk sync={} code=0x{:x} rows={}",
            reply.sync, reply.code, self.nrows
        );
        self.reply = Some(reply);
        Ok(())
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Advance to the next row and convert it into the attached outputs.
    pub fn fetch(&mut self) -> Result<Fetch> {
        let fetched = self.next_row()?;
        if fetched == Fetch::Row {
            store_row(&self.row, &mut self.outputs);
        }
        Ok(fetched)
    }

    /// Advance to the next row and convert it into `outputs` instead of the
    /// attached ones.
    pub fn fetch_into(&mut self, outputs: &mut [OutputBinding<'_>]) -> Result<Fetch> {
        let fetched = self.next_row()?;
        if fetched == Fetch::Row {
            store_row(&self.row, outputs);
        }
        Ok(fetched)
    }

    fn next_row(&mut self) -> Result<Fetch> {
        if let Some(fake) = self.fake.as_mut() {
            let Some(cells) = fake.advance() else {
                return Ok(Fetch::NoData);
            };
            let ncols = cells.len();
            let resized = resize_row(&mut self.row, ncols);
            if resized.is_ok() {
                self.row.clone_from_slice(cells);
            }
            if let Err(e) = resized {
                return Err(self.fail(e));
            }
            self.ncols = ncols;
            self.cur_row += 1;
            trace!("materialized row {}", self.cur_row);
            return Ok(Fetch::Row);
        }

        match self.state {
            ReplyState::Begin | ReplyState::Sent => {
                return Err(self.note(Error::Sequence("fetch called before execute")))
            }
            ReplyState::Failed => return Err(self.terminal()),
            ReplyState::Chunk | ReplyState::End => {}
        }

        while self.nrows == 0 {
            if self.state != ReplyState::Chunk {
                return Ok(Fetch::NoData);
            }
            self.read_chunk()?;
        }

        let ncols = match msgpack::read_array_len(&mut self.data) {
            Ok(n) => n as usize,
            Err(e) => return Err(self.fail(e)),
        };
        if let Err(e) = resize_row(&mut self.row, ncols) {
            return Err(self.fail(e));
        }
        for i in 0..ncols {
            match Cell::decode(&mut self.data) {
                Ok(cell) => self.row[i] = cell,
                Err(e) => return Err(self.fail(e)),
            }
        }

        self.ncols = ncols;
        self.nrows -= 1;
        self.cur_row += 1;
        trace!("row {} decoded, {} columns", self.cur_row, ncols);
        Ok(Fetch::Row)
    }

    /// Convert one cell of the current row, skipping `offset` bytes of a
    /// string or binary value. Repeated calls with a growing offset retrieve
    /// an oversized value piece by piece.
    pub fn get_data(
        &mut self,
        column: usize,
        offset: usize,
        binding: &mut OutputBinding<'_>,
    ) -> Result<Conversion> {
        if self.row.is_empty() {
            return Err(self.note(Error::Sequence("no current row")));
        }
        match self.row.get(column) {
            Some(cell) => Ok(convert::store(cell, binding, offset)),
            None => Err(self.note(Error::InvalidParameter {
                index: column,
                reason: format!("row has {} columns", self.row.len()),
            })),
        }
    }

    /// Release everything the current cursor holds. Query text and bound
    /// parameters survive for the next execute.
    pub fn close_cursor(&mut self) {
        debug!("close cursor after {} rows: {}", self.cur_row, self.query);
        self.reset_cursor();
    }

    /// Close the cursor and drop the statement.
    pub fn free(mut self) {
        self.close_cursor();
    }

    fn reset_cursor(&mut self) {
        self.reply = None;
        self.data = Bytes::new();
        self.nrows = 0;
        self.row = Row::new();
        self.ncols = 0;
        self.names = Vec::new();
        self.decl_types = Vec::new();
        self.cur_row = 0;
        self.affected_rows = 0;
        self.sync = 0;
        self.state = ReplyState::Begin;
        self.kind = None;
        self.failure = None;
        self.last_error = None;
        self.fake = None;
        self.scratch = Vec::new();
    }

    /// Record an error that leaves the cursor usable.
    fn note(&mut self, err: Error) -> Error {
        self.last_error = Some(err.to_string());
        err
    }

    /// Record an error that ends the cursor.
    fn fail(&mut self, err: Error) -> Error {
        let message = err.to_string();
        self.state = ReplyState::Failed;
        self.failure = Some((err.kind(), message.clone()));
        self.last_error = Some(message);
        err
    }

    fn terminal(&self) -> Error {
        match &self.failure {
            Some((kind, message)) => Error::Terminal {
                kind: *kind,
                message: message.clone(),
            },
            None => Error::Sequence("cursor failed"),
        }
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl<T> Statement<'_, T> {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.conn
    }

    pub fn state(&self) -> ReplyState {
        self.state
    }

    pub fn kind(&self) -> Option<QueryKind> {
        self.kind
    }

    pub fn column_count(&self) -> usize {
        self.ncols
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column_name(&self, column: usize) -> Option<&str> {
        self.names.get(column).map(String::as_str)
    }

    /// Declared SQL type from the metadata, when the server sent one.
    pub fn column_decl_type(&self, column: usize) -> Option<&str> {
        self.decl_types
            .get(column)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Cell of the current row.
    pub fn column(&self, column: usize) -> Option<&Cell> {
        self.row.get(column)
    }

    pub fn column_type(&self, column: usize) -> Option<WireType> {
        self.column(column).map(Cell::wire_type)
    }

    pub fn column_len(&self, column: usize) -> Option<usize> {
        self.column(column).map(Cell::len)
    }

    /// True for nil cells and for columns outside the current row.
    pub fn column_is_null(&self, column: usize) -> bool {
        self.column(column).map_or(true, Cell::is_null)
    }

    pub fn column_int(&self, column: usize) -> Option<i64> {
        self.column(column).and_then(Cell::as_i64)
    }

    pub fn column_uint(&self, column: usize) -> Option<u64> {
        self.column(column).and_then(Cell::as_u64)
    }

    pub fn column_double(&self, column: usize) -> Option<f64> {
        self.column(column).and_then(Cell::as_f64)
    }

    pub fn column_float(&self, column: usize) -> Option<f32> {
        self.column_double(column).map(|v| v as f32)
    }

    pub fn column_str(&self, column: usize) -> Option<&[u8]> {
        self.column(column).and_then(Cell::as_bytes)
    }

    pub fn column_bin(&self, column: usize) -> Option<&[u8]> {
        self.column(column).and_then(Cell::as_bytes)
    }

    /// Rows changed by DML, -1 for SELECT or when the server did not say.
    pub fn affected_rows(&self) -> i64 {
        self.affected_rows
    }

    /// Rows fetched since execute.
    pub fn row_count(&self) -> u64 {
        self.cur_row
    }

    /// Placeholders found in the query text.
    pub fn num_params(&self) -> usize {
        params::count_placeholders(&self.query)
    }

    /// Status code of the current reply.
    pub fn code(&self) -> Option<u32> {
        self.reply.as_ref().map(|r| r.code)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Resize the row buffer, reallocating only when the column count changes.
fn resize_row(row: &mut Row, ncols: usize) -> Result<()> {
    if row.len() != ncols {
        row.clear();
        row.try_reserve(ncols)?;
        row.resize(ncols, Cell::Nil);
    }
    Ok(())
}

/// A shorter output array converts only the bound prefix.
fn store_row(row: &[Cell], outputs: &mut [OutputBinding<'_>]) {
    for (cell, binding) in row.iter().zip(outputs.iter_mut()) {
        convert::store(cell, binding, 0);
    }
}
