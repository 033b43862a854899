//! Database backend.
//!
//! SQLite only. The pool wrapper owns the connection settings that make the
//! single-writer / many-readers split work (WAL journal, busy timeout).

mod sqlite;

pub use sqlite::SqlitePool;
