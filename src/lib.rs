//! # sqlite-handle
//!
//! A thin, safer layer over the SQLite C API.
//!
//! ## Core Types
//!
//! - **[`Connection`]**: Owns one database handle. Always held as `Arc<Connection>`
//! - **[`Statement`]**: One compiled query. Holds a strong reference to its
//!   connection, so the handle cannot be closed while a statement is alive
//! - **[`Error`]** / **[`ErrorKind`]**: Native result codes translated into a
//!   portable taxonomy callers can branch on
//! - **[`ConnectionConfig`]**: Open flags and pragma settings applied at open
//!
//! ## Example
//!
//! ```
//! use sqlite_handle::Connection;
//!
//! let db = Connection::open(":memory:")?;
//! db.prepare("CREATE TABLE t (a INTEGER, b TEXT)")?.step_and_reset()?;
//!
//! let mut insert = db.prepare("INSERT INTO t (a, b) VALUES (?, ?)")?;
//! insert.bind_int(1, 3).bind_text(2, "three").step_and_reset()?;
//! insert.bind_int(1, 4).bind_text(2, "four").step_and_reset()?;
//!
//! let mut select = db.prepare("SELECT a, b FROM t ORDER BY a")?;
//! while select.step()? {
//!    println!("{} {}", select.column_int(0), String::from_utf8_lossy(select.column_string_ref(1)));
//! }
//! # Ok::<(), sqlite_handle::Error>(())
//! ```
//!
//! Every connection also gets the `snap(x)` / `unsnap(x)` SQL functions from
//! [`sqlite_snapfn`].

mod config;
mod connection;
mod error;
mod statement;
mod value;

pub use config::{AutoVacuum, ConnectionConfig, OpenFlags};
pub use connection::Connection;
pub use error::{Error, ErrorKind, Result, check};
pub use statement::{Parameter, Statement, StatementState};
pub use value::{ColumnType, ColumnValue};
