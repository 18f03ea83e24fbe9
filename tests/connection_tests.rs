//! Opening, configuring and sharing `Connection` handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use sqlite_handle::{AutoVacuum, Connection, ConnectionConfig, ErrorKind, OpenFlags};
use tempfile::TempDir;

fn init_tracing() {
   let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn temp_db_path(dir: &TempDir) -> String {
   dir.path().join("test.db").to_str().unwrap().to_string()
}

fn pragma_int(db: &Arc<Connection>, pragma: &str) -> i64 {
   let mut stmt = db.prepare(&format!("PRAGMA {pragma}")).unwrap();
   stmt.step_expecting_row().unwrap();
   stmt.column_int(0)
}

fn pragma_text(db: &Arc<Connection>, pragma: &str) -> String {
   let mut stmt = db.prepare(&format!("PRAGMA {pragma}")).unwrap();
   stmt.step_expecting_row().unwrap();
   String::from_utf8(stmt.column_string(0)).unwrap()
}

// ============================================================================
// Opening
// ============================================================================

#[test]
fn test_open_memory() {
   init_tracing();
   let db = Connection::open(":memory:").unwrap();
   assert_eq!(db.path(), ":memory:");
}

#[test]
fn test_open_creates_file() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let path = temp_db_path(&dir);
   let db = Connection::open(&path).unwrap();
   db.prepare("CREATE TABLE t (x)").unwrap().step_and_reset().unwrap();
   drop(db);
   assert!(dir.path().join("test.db").exists());
}

#[test]
fn test_open_read_only_missing_file_fails() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let path = temp_db_path(&dir);

   let err = Connection::open_with_flags(&path, OpenFlags::READ_ONLY).unwrap_err();
   assert_eq!(err.kind(), ErrorKind::InvalidArgument);
   assert!(err.message().contains(&path), "{err}");
   assert_eq!(err.error_code(), "INVALID_ARGUMENT");
}

#[test]
fn test_open_rejects_no_mutex() {
   init_tracing();
   let flags = OpenFlags::default() | OpenFlags::from_bits(libsqlite3_sys::SQLITE_OPEN_NOMUTEX);
   let err = Connection::open_with_flags(":memory:", flags).unwrap_err();
   assert_eq!(err.kind(), ErrorKind::InvalidArgument);
   assert!(err.message().contains("NOMUTEX"), "{err}");

   let config = ConnectionConfig {
      flags,
      ..Default::default()
   };
   let err = Connection::open_with_config(":memory:", &config).unwrap_err();
   assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_open_missing_directory_fails() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let path = dir.path().join("no/such/dir/test.db");

   let err = Connection::open(&path).unwrap_err();
   assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_read_only_connection_rejects_writes() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let path = temp_db_path(&dir);
   Connection::open(&path)
      .unwrap()
      .prepare("CREATE TABLE t (x)")
      .unwrap()
      .step_and_reset()
      .unwrap();

   let db = Connection::open_with_flags(&path, OpenFlags::READ_ONLY).unwrap();
   let err = db
      .prepare("INSERT INTO t VALUES (1)")
      .unwrap()
      .step_and_reset()
      .unwrap_err();
   assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

// ============================================================================
// Pragmas
// ============================================================================

#[test]
fn test_try_to_set_page_size_on_fresh_database() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let db = Connection::open(temp_db_path(&dir)).unwrap();
   assert_eq!(db.try_to_set_page_size(8192).unwrap(), 8192);
}

#[test]
fn test_try_to_set_page_size_after_table_exists() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let db = Connection::open(temp_db_path(&dir)).unwrap();
   db.prepare("CREATE TABLE t (x)").unwrap().step_and_reset().unwrap();

   let before = pragma_int(&db, "page_size");
   let wanted = if before == 8192 { 16384 } else { 8192 };
   assert_eq!(db.try_to_set_page_size(wanted as i32).unwrap() as i64, before);
}

#[test]
fn test_enable_write_ahead_logging() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let db = Connection::open(temp_db_path(&dir)).unwrap();
   db.enable_write_ahead_logging().unwrap();

   assert_eq!(pragma_text(&db, "journal_mode"), "wal");
   // NORMAL
   assert_eq!(pragma_int(&db, "synchronous"), 1);
}

#[test]
fn test_enable_write_ahead_logging_in_memory_is_noop() {
   init_tracing();
   let db = Connection::open(":memory:").unwrap();
   db.enable_write_ahead_logging().unwrap();
   assert_eq!(pragma_text(&db, "journal_mode"), "memory");
}

#[test]
fn test_set_auto_vacuum() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let db = Connection::open(temp_db_path(&dir)).unwrap();
   db.set_auto_vacuum(AutoVacuum::Incremental).unwrap();
   db.prepare("CREATE TABLE t (x)").unwrap().step_and_reset().unwrap();
   assert_eq!(pragma_int(&db, "auto_vacuum"), 2);
}

#[test]
fn test_busy_timeout() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let path = temp_db_path(&dir);

   let db1 = Connection::open(&path).unwrap();
   db1.prepare("CREATE TABLE t (x)").unwrap().step_and_reset().unwrap();

   // Prepare before the lock is taken so the schema is already loaded.
   let db2 = Connection::open(&path).unwrap();
   let mut insert = db2.prepare("INSERT INTO t VALUES (1)").unwrap();

   db1.prepare("BEGIN EXCLUSIVE").unwrap().step_and_reset().unwrap();

   let err = insert.step_and_reset().unwrap_err();
   assert_eq!(err.kind(), ErrorKind::Unavailable);

   db2.set_busy_timeout(Duration::from_millis(200)).unwrap();
   assert_eq!(pragma_int(&db2, "busy_timeout"), 200);

   let started = Instant::now();
   let err = insert.step_and_reset().unwrap_err();
   assert_eq!(err.kind(), ErrorKind::Unavailable);
   assert!(started.elapsed() >= Duration::from_millis(100));

   db1.prepare("COMMIT").unwrap().step_and_reset().unwrap();
   insert.step_and_reset().unwrap();
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn test_open_with_config() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let config = ConnectionConfig {
      page_size: Some(8192),
      busy_timeout: Some(Duration::from_millis(1500)),
      write_ahead_log: true,
      auto_vacuum: Some(AutoVacuum::Full),
      ..Default::default()
   };

   let db = Connection::open_with_config(temp_db_path(&dir), &config).unwrap();
   assert_eq!(pragma_int(&db, "page_size"), 8192);
   assert_eq!(pragma_int(&db, "busy_timeout"), 1500);
   assert_eq!(pragma_text(&db, "journal_mode"), "wal");
   assert_eq!(pragma_int(&db, "auto_vacuum"), 1);
}

#[test]
fn test_open_with_default_config_in_memory() {
   init_tracing();
   let db = Connection::open_with_config(":memory:", &ConnectionConfig::default()).unwrap();
   assert_eq!(pragma_int(&db, "busy_timeout"), 10_000);
}

#[test]
fn test_open_with_config_from_json() {
   init_tracing();
   let dir = TempDir::new().unwrap();
   let config: ConnectionConfig =
      serde_json::from_str(r#"{ "page_size": 4096, "write_ahead_log": true }"#).unwrap();

   let db = Connection::open_with_config(temp_db_path(&dir), &config).unwrap();
   assert_eq!(pragma_int(&db, "page_size"), 4096);
   assert_eq!(pragma_text(&db, "journal_mode"), "wal");
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_last_insert_rowid_and_changes() {
   init_tracing();
   let db = Connection::open(":memory:").unwrap();
   db.prepare("CREATE TABLE t (x)").unwrap().step_and_reset().unwrap();

   let mut insert = db.prepare("INSERT INTO t VALUES (?)").unwrap();
   insert.bind_int(1, 10).step_and_reset().unwrap();
   insert.bind_int(1, 20).step_and_reset().unwrap();
   assert_eq!(db.last_insert_rowid(), 2);
   assert_eq!(db.changes(), 1);

   db.prepare("UPDATE t SET x = x + 1").unwrap().step_and_reset().unwrap();
   assert_eq!(db.changes(), 2);
}

#[test]
fn test_error_codes_after_constraint_failure() {
   init_tracing();
   let db = Connection::open(":memory:").unwrap();
   db.prepare("CREATE TABLE t (x UNIQUE)").unwrap().step_and_reset().unwrap();

   let mut insert = db.prepare("INSERT INTO t VALUES (1)").unwrap();
   insert.step_and_reset().unwrap();
   let err = insert.step().unwrap_err();
   assert_eq!(err.kind(), ErrorKind::InvalidArgument);

   // SQLITE_CONSTRAINT and SQLITE_CONSTRAINT_UNIQUE
   assert_eq!(db.error_code(), 19);
   assert_eq!(db.extended_error_code(), 2067);
   assert!(db.error_message().contains("UNIQUE"));
   insert.reset();
}

// ============================================================================
// Sharing
// ============================================================================

#[test]
fn test_statement_keeps_connection_alive() {
   init_tracing();
   let db = Connection::open(":memory:").unwrap();
   let mut stmt = db.prepare("SELECT 42").unwrap();
   assert_eq!(Arc::strong_count(&db), 2);

   drop(db);
   stmt.step_expecting_row().unwrap();
   assert_eq!(stmt.column_int(0), 42);
   assert_eq!(stmt.connection().map(Arc::strong_count), Some(1));
}

#[test]
fn test_statements_released_before_connection() {
   init_tracing();
   let db = Connection::open(":memory:").unwrap();
   let stmts: Vec<_> = (0..4)
      .map(|i| db.prepare(&format!("SELECT {i}")).unwrap())
      .collect();
   assert_eq!(Arc::strong_count(&db), 5);
   drop(stmts);
   assert_eq!(Arc::strong_count(&db), 1);
}

#[test]
fn test_share_across_threads() {
   init_tracing();
   let db = Connection::open(":memory:").unwrap();
   db.prepare("CREATE TABLE t (x)").unwrap().step_and_reset().unwrap();

   let handles: Vec<_> = (0..4)
      .map(|i| {
         let db = Arc::clone(&db);
         thread::spawn(move || {
            let mut insert = db.prepare("INSERT INTO t VALUES (?)").unwrap();
            for j in 0..25 {
               insert.bind_int(1, i * 100 + j).step_and_reset().unwrap();
            }
         })
      })
      .collect();
   for handle in handles {
      handle.join().unwrap();
   }

   let mut count = db.prepare("SELECT COUNT(*) FROM t").unwrap();
   count.step_expecting_row().unwrap();
   assert_eq!(count.column_int(0), 100);
}

#[test]
fn test_statement_moves_to_another_thread() {
   init_tracing();
   let db = Connection::open(":memory:").unwrap();
   let mut stmt = db.prepare("SELECT 'moved'").unwrap();
   drop(db);

   let value = thread::spawn(move || {
      stmt.step_expecting_row().unwrap();
      stmt.column_string(0)
   })
   .join()
   .unwrap();
   assert_eq!(value, b"moved");
}

#[test]
fn test_interrupt_from_another_thread() {
   init_tracing();
   let db = Connection::open(":memory:").unwrap();
   let mut stmt = db
      .prepare(
         "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
          SELECT count(*) FROM c",
      )
      .unwrap();

   // Keep interrupting until the step gives up, in case the first call
   // lands before the query starts running.
   let done = Arc::new(AtomicBool::new(false));
   let interrupter = {
      let db = Arc::clone(&db);
      let done = Arc::clone(&done);
      thread::spawn(move || {
         while !done.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(20));
            db.interrupt();
         }
      })
   };

   let err = stmt.step().unwrap_err();
   done.store(true, Ordering::Release);
   assert_eq!(err.kind(), ErrorKind::Cancelled);
   interrupter.join().unwrap();
}
