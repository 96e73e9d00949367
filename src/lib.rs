//! msql.
//!
//! This crate provides direct access to the MonetDB client/server wire
//! protocol (MAPI) plus the pieces an interactive shell needs on top of
//! it: statement assembly and incremental result streaming.
//!
//! # Overview
//!
//! The crate is organized around a few core concepts:
//!
//! - **Connection establishment** via [`Connection::connect`], which
//!   runs the salted challenge/response login and follows proxy
//!   redirects
//! - **Frame and message I/O** on [`MapiStream`], the length-prefixed,
//!   fin-flagged framing every exchange rides on
//! - **Reply decoding** into the [`Reply`] variants, with tabular
//!   results streamed batch by batch through [`QueryRows`]
//! - **Statement assembly** with [`StatementAssembler`], which knows
//!   when a semicolon really ends a statement
//!
//! # Example: Simple Query
//!
//! ```no_run
//! use msql::{Config, Connection, Reply};
//!
//! # fn main() -> msql::Result<()> {
//! let config = Config {
//!     host: "127.0.0.1:50000".to_string(),
//!     user: "monetdb".to_string(),
//!     password: "monetdb".to_string(),
//!     database: "demo".to_string(),
//!     schema: None,
//!     role: None,
//! };
//! let mut conn = Connection::connect(&config)?;
//!
//! conn.send(&["s", "select name from sys.tables;"])?;
//! if let Reply::Query(mut rows) = conn.read_reply()? {
//!     while let Some(batch) = rows.next_batch()? {
//!         for row in batch {
//!             println!("{}", row[0]);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Prepared Statements
//!
//! ```no_run
//! # use msql::{Config, Connection, Param};
//! # fn example(conn: &mut Connection) -> msql::Result<()> {
//! let _row = conn.prepare_row(
//!     "select name from sys.tables where schema_id = ? and name = ?",
//!     &[Param::Int(2000), Param::Text("users")],
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Everything here is blocking and single-threaded by design: one
//! request is fully written, then its reply fully drained, before the
//! next one may go out. A [`Reply::Query`] borrows its connection
//! mutably until the rows are drained or dropped, so interleaving is a
//! compile error rather than a protocol corruption.
//!
//! # Safety and Error Handling
//!
//! Errors are tagged by origin ([`Error::Network`], [`Error::Server`],
//! [`Error::Driver`]); see the shell binary for the policy of which
//! ones are fatal. Values always surface as decoded text; there is no
//! binary result format, no TLS and no connection pooling.

mod connect;
mod error;
mod mapi_stream;
mod reply;
mod statement;

pub use connect::*;
pub use error::*;
pub use mapi_stream::*;
pub use reply::*;
pub use statement::*;
