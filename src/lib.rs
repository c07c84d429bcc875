#![allow(unsafe_code)]

//! Rust driver for chDB, the embedded ClickHouse engine.
//!
//! The engine runs in-process; `libchdb` is loaded dynamically on first use.
//! Set `CHDB_LIB_PATH` to point at a specific library file, otherwise the
//! platform loader and a few conventional install locations are searched.
//! Three ways in:
//!
//! - [`query`] / [`query_fmt`] run one-shot queries against a fresh
//!   in-memory engine instance;
//! - [`Connection`] holds a persistent session, in-memory or file-backed;
//! - [`Connection::stream`] pulls large results lazily, one chunk at a time.
//!
//! ```no_run
//! let out = chdb::query("select version()")?;
//! println!("{}", out.data_utf8());
//!
//! let conn = chdb::Connection::open("file:/tmp/analytics?mode=ro")?;
//! for chunk in conn.stream("select number from system.numbers limit 100000")? {
//!     let chunk = chunk?;
//!     println!("{} rows", chunk.stats().rows_read);
//! }
//! # Ok::<(), chdb::Error>(())
//! ```
//!
//! Every native call is synchronous; the calling thread blocks until the
//! engine returns. Handles are single-threaded (`!Send`), so serialize access
//! yourself if you need an engine shared across threads.

mod api;
mod argv;
mod dsn;
mod runtime;
mod sys;
mod track;

use std::{
    borrow::Cow,
    collections::BTreeMap,
    ffi::{CStr, CString},
    marker::PhantomData,
    path::Path,
    ptr::NonNull,
    rc::Rc,
};

use tracing::debug;

use crate::{api::Api, argv::Argv, sys as ffi, track::ReleasePath};

pub use crate::track::{live_handles, LiveHandles};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the driver. Messages produced by the engine itself are
/// carried verbatim. No call is retried; every native failure surfaces
/// directly to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The engine library could not be located, loaded, or resolved.
    #[error("failed to load chdb engine: {0}")]
    Load(String),
    /// The engine refused a connection, or the DSN was unusable.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Operation on a connection after `close()`.
    #[error("connection is closed")]
    Closed,
    #[error("query failed: {0}")]
    Query(String),
    #[error("streaming query failed: {0}")]
    Stream(String),
}

/// Output format used when a query does not name one.
pub const DEFAULT_FORMAT: &str = "CSV";

// First argv token; the engine parses the rest like its CLI arguments.
const ENGINE_BIN: &str = "clickhouse";

// -------------------------- Results --------------------------

/// Execution statistics the engine reports alongside each result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryStats {
    /// Wall-clock seconds the engine spent executing.
    pub elapsed: f64,
    pub rows_read: u64,
    pub bytes_read: u64,
}

/// One materialized result: the formatted payload plus its [`QueryStats`].
#[derive(Debug, Clone)]
pub struct QueryResult {
    data: Vec<u8>,
    stats: QueryStats,
}

impl QueryResult {
    /// Raw formatted payload. Not guaranteed to be UTF-8 for binary formats
    /// like `Arrow` or `Native`.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Payload as text, with invalid UTF-8 replaced. Fine for the text
    /// formats (`CSV`, `JSONEachRow`, `Pretty`, ...); use
    /// [`data`](Self::data) for binary ones.
    pub fn data_utf8(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    pub fn stats(&self) -> QueryStats {
        self.stats
    }
}

// -------------------------- Result blocks --------------------------

/// Owned view of one native result block. The block is freed on drop, so
/// every exit path out of [`decode`](Self::decode) releases it exactly once.
struct ResultBlock {
    api: &'static Api,
    ptr: NonNull<ffi::local_result_v2>,
}

impl ResultBlock {
    /// # Safety
    /// `raw` must be null or a live block returned by this `api` that has not
    /// been freed yet. Ownership of a non-null block transfers to the result.
    unsafe fn from_raw(api: &'static Api, raw: *mut ffi::local_result_v2) -> Option<Self> {
        NonNull::new(raw).map(|ptr| Self { api, ptr })
    }

    /// Copy the block out into an owned [`QueryResult`], or the engine's
    /// error message. The error field is checked first; when it is set, no
    /// data field is touched.
    fn decode(self) -> std::result::Result<QueryResult, String> {
        let raw = unsafe { self.ptr.as_ref() };
        if !raw.error_message.is_null() {
            let msg = unsafe { CStr::from_ptr(raw.error_message) }
                .to_string_lossy()
                .into_owned();
            return Err(msg);
        }
        // The payload is a (pointer, length) pair, not NUL-terminated. buf
        // may be null for statements producing no output.
        let data = if raw.buf.is_null() {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(raw.buf as *const u8, raw.len) }.to_vec()
        };
        Ok(QueryResult {
            data,
            stats: QueryStats {
                elapsed: raw.elapsed,
                rows_read: raw.rows_read,
                bytes_read: raw.bytes_read,
            },
        })
    }
}

impl Drop for ResultBlock {
    fn drop(&mut self) {
        unsafe { (self.api.free_result_v2)(self.ptr.as_ptr()) };
    }
}

fn decode_query_block(api: &'static Api, raw: *mut ffi::local_result_v2) -> Result<QueryResult> {
    match unsafe { ResultBlock::from_raw(api, raw) } {
        None => Err(Error::Query("query returned null result block".into())),
        Some(block) => block.decode().map_err(Error::Query),
    }
}

// -------------------------- Engine --------------------------

/// Where the engine library was loaded from: the `CHDB_LIB_PATH` override,
/// a well-known install directory, or the bare soname as resolved by the
/// system loader. Loads the engine on first call like any query would.
pub fn engine_path() -> Result<&'static Path> {
    Ok(runtime::runtime()?.path.as_path())
}

// -------------------------- One-shot queries --------------------------

/// Run `sql` against a fresh in-memory engine instance with the
/// [`DEFAULT_FORMAT`] output format.
pub fn query(sql: &str) -> Result<QueryResult> {
    query_fmt(sql, DEFAULT_FORMAT)
}

/// Run `sql` against a fresh in-memory engine instance. `format` is any
/// output format the engine understands (`CSV`, `JSONEachRow`, `Arrow`, ...).
pub fn query_fmt(sql: &str, format: &str) -> Result<QueryResult> {
    let rt = runtime::runtime()?;
    query_with(&rt.api, sql, format)
}

fn query_with(api: &'static Api, sql: &str, format: &str) -> Result<QueryResult> {
    let mut argv = Argv::new(&[
        ENGINE_BIN.to_string(),
        "--multiquery".to_string(),
        format!("--output-format={format}"),
        format!("--query={sql}"),
    ])
    .map_err(|_| Error::Query("query contains NUL byte".into()))?;
    debug!(format, "one-shot query");
    let raw = unsafe { (api.query_stable_v2)(argv.argc(), argv.argv()) };
    decode_query_block(api, raw)
}

// -------------------------- Connection --------------------------

/// A persistent session with one engine instance.
///
/// The engine hands back a two-level handle (a slot holding the connection
/// pointer) and its close call takes the slot so the engine can clear it.
/// Dropping a `Connection` closes it; [`close`](Self::close) does so eagerly
/// and is idempotent.
#[derive(Debug)]
pub struct Connection {
    api: &'static Api,
    conn: Option<NonNull<*mut ffi::chdb_conn>>,
    path: String,
    params: BTreeMap<String, String>,
    // make !Send + !Sync like rusqlite::Connection
    _nosend: PhantomData<Rc<()>>,
}

/// Native argument list for the connect call.
///
/// Only recognized parameters are forwarded: `mode` (`ro` becomes
/// `--readonly=1`, empty or `rw` adds nothing), the bare separator inserted
/// by `udf_path` expansion, and the two user-defined-function settings.
/// Anything else is rejected so unvalidated flags never reach the engine.
fn connect_args(path: &str, params: &BTreeMap<String, String>) -> Result<Vec<String>> {
    let mut args = vec![ENGINE_BIN.to_string()];
    if path != dsn::MEMORY_PATH {
        args.push(format!("--path={path}"));
    }
    for (key, value) in params {
        match key.as_str() {
            dsn::ARG_SEPARATOR_KEY => args.push("--".to_string()),
            "mode" => match value.as_str() {
                "ro" => args.push("--readonly=1".to_string()),
                "" | "rw" => {}
                other => return Err(Error::Connect(format!("unsupported mode {other:?}"))),
            },
            "user_scripts_path" | "user_defined_executable_functions_config" => {
                if value.is_empty() {
                    args.push(format!("--{key}"));
                } else {
                    args.push(format!("--{key}={value}"));
                }
            }
            other => {
                return Err(Error::Connect(format!(
                    "unrecognized DSN parameter {other:?}"
                )))
            }
        }
    }
    Ok(args)
}

impl Connection {
    /// Open a session for `dsn`.
    ///
    /// DSN grammar: `[file:]<path>[?key=value&...]`. An empty string or
    /// `:memory:` opens an in-memory database; a relative path is resolved
    /// against the current working directory. Recognized parameters:
    ///
    /// - `mode=ro` opens read-only, `mode=rw` (the default) read-write;
    /// - `udf_path=<dir>` points the engine at user-defined functions in
    ///   `<dir>` (scripts plus their `*.xml` configuration).
    ///
    /// Unrecognized parameters are rejected with [`Error::Connect`] rather
    /// than forwarded to the engine.
    pub fn open(dsn: &str) -> Result<Self> {
        let rt = runtime::runtime()?;
        Self::open_with(&rt.api, dsn)
    }

    fn open_with(api: &'static Api, dsn: &str) -> Result<Self> {
        let (path, params) = dsn::parse(dsn);
        let args = connect_args(&path, &params)?;
        let mut argv =
            Argv::new(&args).map_err(|_| Error::Connect("DSN contains NUL byte".into()))?;
        debug!(path = %path, "opening connection");
        let raw = unsafe { (api.connect_chdb)(argv.argc(), argv.argv()) };
        let conn = NonNull::new(raw)
            .ok_or_else(|| Error::Connect(format!("connect_chdb returned null for {path}")))?;
        track::connection_opened();
        Ok(Self {
            api,
            conn: Some(conn),
            path,
            params,
            _nosend: PhantomData,
        })
    }

    /// Raw connection pointer out of the slot, or [`Error::Closed`].
    fn raw(&self) -> Result<*mut ffi::chdb_conn> {
        match self.conn {
            Some(slot) => Ok(unsafe { *slot.as_ptr() }),
            None => Err(Error::Closed),
        }
    }

    /// Run `sql` on this connection with the [`DEFAULT_FORMAT`].
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        self.query_fmt(sql, DEFAULT_FORMAT)
    }

    pub fn query_fmt(&self, sql: &str, format: &str) -> Result<QueryResult> {
        let conn = self.raw()?;
        let sql_c =
            CString::new(sql).map_err(|_| Error::Query("query contains NUL byte".into()))?;
        let fmt_c =
            CString::new(format).map_err(|_| Error::Query("format contains NUL byte".into()))?;
        debug!(format, "query on connection");
        let raw = unsafe { (self.api.query_conn)(conn, sql_c.as_ptr(), fmt_c.as_ptr()) };
        decode_query_block(self.api, raw)
    }

    /// Start a lazy, chunked query with the [`DEFAULT_FORMAT`].
    pub fn stream(&self, sql: &str) -> Result<QueryStream<'_>> {
        self.stream_fmt(sql, DEFAULT_FORMAT)
    }

    /// Start a lazy, chunked query. Chunks are pulled one at a time via
    /// [`QueryStream::next_chunk`] or the [`Iterator`] impl; dropping the
    /// stream early cancels the query on the engine.
    pub fn stream_fmt(&self, sql: &str, format: &str) -> Result<QueryStream<'_>> {
        let conn = self.raw()?;
        let sql_c =
            CString::new(sql).map_err(|_| Error::Stream("query contains NUL byte".into()))?;
        let fmt_c =
            CString::new(format).map_err(|_| Error::Stream("format contains NUL byte".into()))?;
        debug!(format, "starting streaming query");
        let raw = unsafe { (self.api.query_conn_streaming)(conn, sql_c.as_ptr(), fmt_c.as_ptr()) };
        let stream = NonNull::new(raw)
            .ok_or_else(|| Error::Stream("query_conn_streaming returned null stream".into()))?;
        track::stream_opened();
        Ok(QueryStream {
            api: self.api,
            conn,
            stream: Some(stream),
            _conn: PhantomData,
            _nosend: PhantomData,
        })
    }

    /// Close the session. Safe to call more than once; the native close runs
    /// only for the first call.
    pub fn close(&mut self) {
        self.release(ReleasePath::Explicit);
    }

    /// Database path this connection resolved to (the `:memory:` sentinel
    /// for in-memory databases).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Parameters parsed out of the DSN.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    fn release(&mut self, via: ReleasePath) {
        if let Some(slot) = self.conn.take() {
            unsafe { (self.api.close_conn)(slot.as_ptr()) };
            track::connection_released(via);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release(ReleasePath::Drop);
    }
}

// -------------------------- QueryStream --------------------------

/// Streaming cursor over one query's chunked results.
///
/// Chunks are computed on demand and the cursor is single-pass: once it ends
/// (exhaustion, engine error, or [`cancel`](Self::cancel)) further pulls
/// return `Ok(None)`. The borrow of the parent [`Connection`] keeps the
/// connection open for the cursor's whole life; the cursor never releases
/// the connection handle itself.
#[derive(Debug)]
pub struct QueryStream<'conn> {
    api: &'static Api,
    conn: *mut ffi::chdb_conn,
    stream: Option<NonNull<ffi::chdb_streaming_result>>,
    _conn: PhantomData<&'conn Connection>,
    _nosend: PhantomData<Rc<()>>,
}

impl QueryStream<'_> {
    /// Pull the next chunk: `Ok(Some(..))` for a chunk, `Ok(None)` once the
    /// query is exhausted, `Err(..)` when the engine reports an error. Both
    /// endings release the native cursor before returning.
    pub fn next_chunk(&mut self) -> Result<Option<QueryResult>> {
        let Some(stream) = self.stream else {
            return Ok(None);
        };

        // The engine parks errors on the cursor; check before fetching so an
        // error raised between pulls surfaces ahead of the next chunk.
        if let Some(msg) = self.pending_error(stream) {
            self.release(ReleasePath::Explicit);
            return Err(Error::Stream(msg));
        }

        let raw = unsafe { (self.api.chdb_streaming_fetch_result)(self.conn, stream.as_ptr()) };
        let Some(block) = (unsafe { ResultBlock::from_raw(self.api, raw) }) else {
            // A null fetch ends the stream: either the engine hit an error
            // or the query is exhausted.
            let ended = self.pending_error(stream);
            self.release(ReleasePath::Explicit);
            return match ended {
                Some(msg) => Err(Error::Stream(msg)),
                None => Ok(None),
            };
        };

        match block.decode() {
            Ok(result) => Ok(Some(result)),
            Err(msg) => {
                self.release(ReleasePath::Explicit);
                Err(Error::Stream(msg))
            }
        }
    }

    fn pending_error(&self, stream: NonNull<ffi::chdb_streaming_result>) -> Option<String> {
        let err = unsafe { (self.api.chdb_streaming_result_error)(stream.as_ptr()) };
        if err.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned())
    }

    /// Stop the query early. The native cancel and destroy calls each run
    /// exactly once per stream no matter how it ends; further pulls return
    /// `Ok(None)`. Dropping the stream does the same.
    pub fn cancel(&mut self) {
        self.release(ReleasePath::Explicit);
    }

    fn release(&mut self, via: ReleasePath) {
        if let Some(stream) = self.stream.take() {
            unsafe {
                (self.api.chdb_streaming_cancel_query)(self.conn, stream.as_ptr());
                (self.api.chdb_destroy_result)(stream.as_ptr());
            }
            track::stream_released(via);
        }
    }
}

impl Iterator for QueryStream<'_> {
    type Item = Result<QueryResult>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

impl Drop for QueryStream<'_> {
    fn drop(&mut self) {
        self.release(ReleasePath::Drop);
    }
}

// -------------------------- tests --------------------------
