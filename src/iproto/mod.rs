//! SQL over the Tarantool binary protocol (IPROTO).
//!
//! This module provides a blocking statement engine that:
//! - Marshals bound parameters into MessagePack bind arrays
//! - Reads chunked replies one frame at a time, validating request ids
//! - Converts decoded cells into caller-owned buffers with truncation flags
//! - Serves locally built result sets through the same cursor API
//!
//! Architecture:
//! - `msgpack`: zero-copy MessagePack reading over `Bytes`
//! - `protocol`: framing, requests and the reply envelope
//! - `types`: decoded cells and input parameter values
//! - `convert`: cell to output-buffer conversion
//! - `params`: placeholder counting and bind-array encoding
//! - `fake`: materialized result sets
//! - `auth`: greeting parsing and chap-sha1
//! - `connection`: configuration, transports, shared connection handle
//! - `statement`: the statement engine

mod msgpack;

pub mod auth;
pub mod connection;
pub mod convert;
pub mod fake;
pub mod params;
pub mod protocol;
pub mod statement;
pub mod types;


pub use connection::{Config, Connection, StreamTransport, Transport};
pub use convert::{Conversion, OutputBinding, Target};
pub use fake::FakeResultSet;
pub use protocol::Reply;
pub use statement::{Fetch, QueryKind, ReplyState, Statement};
pub use types::{Cell, HostType, Param, ParamValue, WireType};
