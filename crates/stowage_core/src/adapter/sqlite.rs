//! SQLite adapter storing each entity as a JSON document row.
//!
//! # Responsibility
//! - Map collections to tables `(id INTEGER PRIMARY KEY AUTOINCREMENT, data TEXT)`.
//! - Compile query plans to parameterized SQL over `json_extract`.
//! - Pass raw statements through `execute`/`fetch`.
//!
//! # Invariants
//! - Collection tables are created lazily on first write; reads of an unknown
//!   collection see it as empty and create nothing.
//! - Every value reaching SQL text is bound as a parameter; only validated
//!   identifiers are interpolated.
//! - Transactions nest through savepoints on the owning thread only. The
//!   connection lock is released while the block runs, but other threads
//!   wait until the outermost unit closes.

use super::{
    validate_collection, Adapter, TransactionBlock, TransactionMode, TransactionOptions,
    TransactionOwner,
};
use crate::db::migrations::COLLECTIONS_TABLE;
use crate::db::{ensure_connection_ready, open_db, open_db_in_memory};
use crate::error::{RepoError, RepoResult};
use crate::model::entity::EntityId;
use crate::model::record::{RawRow, Record};
use crate::query::condition::Condition;
use crate::query::{Aggregate, QueryPlan, QuerySource};
use log::{debug, error, warn};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

const NAME: &str = "sqlite";
const ID_FIELD: &str = "id";

struct SqliteState {
    conn: Connection,
    transaction: TransactionOwner,
    known_collections: HashSet<String>,
}

impl SqliteState {
    /// Whether the collection table exists; never creates it.
    fn has_collection(&mut self, collection: &str) -> RepoResult<bool> {
        validate_collection(collection)?;
        if self.known_collections.contains(collection) {
            return Ok(true);
        }

        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
            [collection],
            |row| row.get(0),
        )?;
        if exists {
            self.known_collections.insert(collection.to_string());
        }
        Ok(exists)
    }

    fn ensure_collection(&mut self, collection: &str) -> RepoResult<()> {
        if self.has_collection(collection)? {
            return Ok(());
        }

        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{collection}\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data TEXT NOT NULL
            );"
        ))?;
        self.conn.execute(
            &format!("INSERT OR IGNORE INTO {COLLECTIONS_TABLE} (name) VALUES (?1);"),
            [collection],
        )?;
        self.known_collections.insert(collection.to_string());
        debug!("event=collection_ensure module=adapter status=ok adapter={NAME} collection={collection}");
        Ok(())
    }

    fn query_records(&self, sql: &str, bind: Vec<SqlValue>) -> RepoResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }
}

/// SQLite-backed adapter. Clones share one connection.
#[derive(Clone)]
pub struct SqliteAdapter {
    state: Arc<Mutex<SqliteState>>,
    turn: Arc<Condvar>,
}

impl SqliteAdapter {
    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Self::from_connection(open_db(path)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> RepoResult<Self> {
        Self::from_connection(open_db_in_memory()?)
    }

    /// Wraps an already-migrated connection.
    ///
    /// # Errors
    /// - `Db(UninitializedConnection)` when the connection skipped `open_db`.
    pub fn from_connection(conn: Connection) -> RepoResult<Self> {
        ensure_connection_ready(&conn)?;
        Ok(Self {
            state: Arc::new(Mutex::new(SqliteState {
                conn,
                transaction: TransactionOwner::default(),
                known_collections: HashSet::new(),
            })),
            turn: Arc::new(Condvar::new()),
        })
    }

    /// Collections materialized in this database, sorted by name.
    pub fn collections(&self) -> RepoResult<Vec<String>> {
        let state = self.lock()?;
        let mut stmt = state
            .conn
            .prepare(&format!("SELECT name FROM {COLLECTIONS_TABLE} ORDER BY name ASC;"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Locks the connection, waiting while another thread's transaction is open.
    fn lock(&self) -> RepoResult<MutexGuard<'_, SqliteState>> {
        let state = self
            .state
            .lock()
            .map_err(|_| RepoError::LockPoisoned("sqlite adapter"))?;
        self.turn
            .wait_while(state, |state| !state.transaction.admits_current())
            .map_err(|_| RepoError::LockPoisoned("sqlite adapter"))
    }

    /// Runs `operation` only when the collection table exists; `missing`
    /// otherwise.
    fn with_existing_collection<T>(
        &self,
        collection: &str,
        missing: T,
        operation: impl FnOnce(&SqliteState) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let mut state = self.lock()?;
        if !state.has_collection(collection)? {
            return Ok(missing);
        }
        operation(&state)
    }

    fn with_collection<T>(
        &self,
        collection: &str,
        operation: impl FnOnce(&SqliteState) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let mut state = self.lock()?;
        state.ensure_collection(collection)?;
        operation(&state)
    }

    fn begin(&self, mode: TransactionMode) -> RepoResult<u32> {
        let mut state = self.lock()?;
        let current = state.transaction.depth();
        let statement = if current == 0 {
            format!("BEGIN {};", mode_sql(mode))
        } else {
            format!("SAVEPOINT {};", savepoint_name(current))
        };
        state.conn.execute_batch(&statement)?;
        Ok(state.transaction.enter())
    }

    /// Commits or rolls back the unit opened at `depth`, then releases the
    /// adapter to waiting threads once the outermost unit is closed.
    fn finish(&self, depth: u32, commit: bool) -> RepoResult<()> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let outcome = if commit {
            commit_unit(&mut state, depth)
        } else {
            rollback(&mut state, depth);
            Ok(())
        };
        if state.transaction.leave() {
            self.turn.notify_all();
        }
        outcome
    }
}

impl Adapter for SqliteAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn create(&self, collection: &str, record: Record) -> RepoResult<Record> {
        let data = serde_json::to_string(&record.fields)?;
        let id = self.with_collection(collection, |state| {
            state.conn.execute(
                &format!("INSERT INTO \"{collection}\" (data) VALUES (?1);"),
                [data],
            )?;
            Ok(state.conn.last_insert_rowid())
        })?;
        debug!("event=adapter_create module=adapter status=ok adapter={NAME} collection={collection} id={id}");
        Ok(Record::new(Some(id), record.fields))
    }

    fn update(&self, collection: &str, record: Record) -> RepoResult<Record> {
        let id = record.id.ok_or_else(|| RepoError::NonPersistedEntity {
            collection: collection.to_string(),
        })?;
        let data = serde_json::to_string(&record.fields)?;
        let changed = self.with_existing_collection(collection, 0, |state| {
            Ok(state.conn.execute(
                &format!("UPDATE \"{collection}\" SET data = ?1 WHERE id = ?2;"),
                params![data, id],
            )?)
        })?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                collection: collection.to_string(),
                id,
            });
        }
        Ok(record)
    }

    fn delete(&self, collection: &str, id: EntityId) -> RepoResult<()> {
        let changed = self.with_existing_collection(collection, 0, |state| {
            Ok(state
                .conn
                .execute(&format!("DELETE FROM \"{collection}\" WHERE id = ?1;"), [id])?)
        })?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                collection: collection.to_string(),
                id,
            });
        }
        Ok(())
    }

    fn find(&self, collection: &str, id: EntityId) -> RepoResult<Option<Record>> {
        self.with_existing_collection(collection, None, |state| {
            let records = state.query_records(
                &format!("SELECT id, data FROM \"{collection}\" WHERE id = ?1;"),
                vec![SqlValue::Integer(id)],
            )?;
            Ok(records.into_iter().next())
        })
    }

    fn all(&self, collection: &str) -> RepoResult<Vec<Record>> {
        self.with_existing_collection(collection, Vec::new(), |state| {
            state.query_records(
                &format!("SELECT id, data FROM \"{collection}\" ORDER BY id ASC;"),
                Vec::new(),
            )
        })
    }

    fn first(&self, collection: &str) -> RepoResult<Option<Record>> {
        self.with_existing_collection(collection, None, |state| {
            let records = state.query_records(
                &format!("SELECT id, data FROM \"{collection}\" ORDER BY id ASC LIMIT 1;"),
                Vec::new(),
            )?;
            Ok(records.into_iter().next())
        })
    }

    fn last(&self, collection: &str) -> RepoResult<Option<Record>> {
        self.with_existing_collection(collection, None, |state| {
            let records = state.query_records(
                &format!("SELECT id, data FROM \"{collection}\" ORDER BY id DESC LIMIT 1;"),
                Vec::new(),
            )?;
            Ok(records.into_iter().next())
        })
    }

    fn clear(&self, collection: &str) -> RepoResult<()> {
        self.with_existing_collection(collection, (), |state| {
            state
                .conn
                .execute(&format!("DELETE FROM \"{collection}\";"), [])?;
            Ok(())
        })
    }

    fn transaction(
        &self,
        options: &TransactionOptions,
        block: TransactionBlock<'_>,
    ) -> RepoResult<()> {
        let depth = self.begin(options.mode)?;
        let mut guard = RollbackOnDrop {
            adapter: self,
            depth,
            armed: true,
        };

        let outcome = block();
        guard.armed = false;
        match outcome {
            Ok(()) => {
                self.finish(depth, true)?;
                debug!("event=transaction module=adapter status=ok adapter={NAME} depth={depth}");
                Ok(())
            }
            Err(err) => {
                self.finish(depth, false)?;
                warn!(
                    "event=transaction module=adapter status=rolled_back adapter={NAME} depth={depth} error_code={}",
                    err.code()
                );
                Err(err)
            }
        }
    }

    fn query(&self, collection: &str) -> RepoResult<Arc<dyn QuerySource>> {
        validate_collection(collection)?;
        Ok(Arc::new(self.clone()))
    }

    fn execute(&self, statement: &str) -> RepoResult<()> {
        let mut state = self.lock()?;
        // Raw DDL may drop or rename tables behind the cache.
        state.known_collections.clear();
        state
            .conn
            .execute_batch(statement)
            .map_err(|err| RepoError::InvalidCommand {
                statement: statement.to_string(),
                message: err.to_string(),
            })
    }

    fn fetch(&self, statement: &str) -> RepoResult<Vec<RawRow>> {
        let state = self.lock()?;
        let invalid = |err: rusqlite::Error| RepoError::invalid_query(statement, err);

        let mut stmt = state.conn.prepare(statement).map_err(invalid)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut rows = stmt.query([]).map_err(invalid)?;

        let mut fetched = Vec::new();
        while let Some(row) = rows.next().map_err(invalid)? {
            let mut raw = RawRow::new();
            for (index, column) in columns.iter().enumerate() {
                raw.insert(column.clone(), sql_to_json(row.get_ref(index)?));
            }
            fetched.push(raw);
        }
        Ok(fetched)
    }
}

impl QuerySource for SqliteAdapter {
    fn adapter_name(&self) -> &'static str {
        NAME
    }

    fn select(&self, collection: &str, plan: &QueryPlan) -> RepoResult<Vec<Record>> {
        let mut compiled = CompiledSql::default();
        compiled.sql.push_str("SELECT id, data");
        compiled.push_from_clause(collection, plan);
        self.with_existing_collection(collection, Vec::new(), |state| {
            state.query_records(&compiled.sql, compiled.bind)
        })
    }

    fn count(&self, collection: &str, plan: &QueryPlan) -> RepoResult<u64> {
        let mut compiled = CompiledSql::default();
        compiled.sql.push_str("SELECT COUNT(*) FROM (SELECT id");
        compiled.push_from_clause(collection, plan);
        compiled.sql.push(')');
        self.with_existing_collection(collection, 0, |state| {
            let count = state.conn.query_row(
                &compiled.sql,
                params_from_iter(compiled.bind),
                |row| row.get::<_, i64>(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    fn aggregate(
        &self,
        collection: &str,
        plan: &QueryPlan,
        function: Aggregate,
        field: &str,
    ) -> RepoResult<Option<f64>> {
        let mut compiled = CompiledSql::default();
        compiled.sql.push_str(&format!("SELECT {}(v) FROM (SELECT ", function.as_sql()));
        let expr = compiled.field_expr(field);
        compiled.sql.push_str(&expr);
        compiled.sql.push_str(" AS v");
        compiled.push_from_clause(collection, plan);
        compiled.sql.push(')');

        let statement = compiled.sql.clone();
        let value = self.with_existing_collection(collection, SqlValue::Null, |state| {
            Ok(state.conn.query_row(
                &compiled.sql,
                params_from_iter(compiled.bind),
                |row| row.get::<_, SqlValue>(0),
            )?)
        })?;

        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(number) => Ok(Some(number as f64)),
            SqlValue::Real(number) => Ok(Some(number)),
            SqlValue::Text(_) | SqlValue::Blob(_) => Err(RepoError::invalid_query(
                statement,
                format!("{}({field}) produced a non-numeric value", function.as_sql()),
            )),
        }
    }
}

/// Closes the unit with a rollback if the block unwound past `transaction`.
struct RollbackOnDrop<'a> {
    adapter: &'a SqliteAdapter,
    depth: u32,
    armed: bool,
}

impl Drop for RollbackOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.adapter.finish(self.depth, false);
        }
    }
}

/// SQL text plus positional bind values, appended in textual order.
#[derive(Debug, Default)]
struct CompiledSql {
    sql: String,
    bind: Vec<SqlValue>,
}

impl CompiledSql {
    fn push_from_clause(&mut self, collection: &str, plan: &QueryPlan) {
        self.sql.push_str(&format!(" FROM \"{collection}\" WHERE "));
        let filter = self.condition(&plan.filter);
        self.sql.push_str(&filter);

        self.sql.push_str(" ORDER BY ");
        for sort in &plan.order {
            let expr = self.field_expr(&sort.field);
            self.sql
                .push_str(&format!("{expr} {}, ", sort.direction.as_sql()));
        }
        self.sql.push_str("id ASC LIMIT ? OFFSET ?");
        let limit = plan
            .limit
            .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        self.bind.push(SqlValue::Integer(limit));
        self.bind
            .push(SqlValue::Integer(i64::try_from(plan.offset).unwrap_or(i64::MAX)));
    }

    fn condition(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::All => "1".to_string(),
            Condition::Compare { field, op, value } => {
                let expr = self.field_expr(field);
                self.bind.push(json_to_sql(value));
                format!("{expr} {} ?", op.as_sql())
            }
            Condition::In { field, values } => {
                if values.is_empty() {
                    return "0".to_string();
                }
                let expr = self.field_expr(field);
                let placeholders = vec!["?"; values.len()].join(", ");
                self.bind.extend(values.iter().map(json_to_sql));
                format!("{expr} IN ({placeholders})")
            }
            Condition::IsNull(field) => {
                let expr = self.field_expr(field);
                format!("{expr} IS NULL")
            }
            Condition::Not(inner) => format!("NOT ({})", self.condition(inner)),
            Condition::And(left, right) => {
                let left = self.condition(left);
                let right = self.condition(right);
                format!("({left}) AND ({right})")
            }
            Condition::Or(left, right) => {
                let left = self.condition(left);
                let right = self.condition(right);
                format!("({left}) OR ({right})")
            }
        }
    }

    fn field_expr(&mut self, field: &str) -> String {
        if field == ID_FIELD {
            return "id".to_string();
        }
        self.bind.push(SqlValue::Text(format!("$.{field}")));
        "json_extract(data, ?)".to_string()
    }
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<Record> {
    let id: EntityId = row.get("id")?;
    let data: String = row.get("data")?;
    match serde_json::from_str::<Value>(&data)? {
        Value::Object(fields) => Ok(Record::new(Some(id), fields)),
        _ => Err(RepoError::InvalidData(format!(
            "row {id} does not hold a JSON object"
        ))),
    }
}

fn commit_unit(state: &mut SqliteState, depth: u32) -> RepoResult<()> {
    let statement = if depth == 1 {
        "COMMIT;".to_string()
    } else {
        format!("RELEASE {};", savepoint_name(depth - 1))
    };
    if let Err(err) = state.conn.execute_batch(&statement) {
        error!(
            "event=transaction module=adapter status=error adapter={NAME} depth={depth} error_code=commit_failed error={err}"
        );
        rollback(state, depth);
        return Err(err.into());
    }
    Ok(())
}

fn rollback(state: &mut SqliteState, depth: u32) {
    let statement = if depth == 1 {
        "ROLLBACK;".to_string()
    } else {
        let savepoint = savepoint_name(depth - 1);
        format!("ROLLBACK TO {savepoint}; RELEASE {savepoint};")
    };
    // Tables created inside the unit are gone after rollback.
    state.known_collections.clear();
    if let Err(err) = state.conn.execute_batch(&statement) {
        error!(
            "event=transaction module=adapter status=error adapter={NAME} depth={depth} error_code=rollback_failed error={err}"
        );
    }
}

fn mode_sql(mode: TransactionMode) -> &'static str {
    match mode {
        TransactionMode::Deferred => "DEFERRED",
        TransactionMode::Immediate => "IMMEDIATE",
        TransactionMode::Exclusive => "EXCLUSIVE",
    }
}

fn savepoint_name(level: u32) -> String {
    format!("stowage_sp_{level}")
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => SqlValue::Real(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(integer) => Value::from(integer),
        ValueRef::Real(real) => Value::from(real),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::{CompiledSql, SqliteAdapter};
    use crate::adapter::Adapter;
    use crate::model::record::Record;
    use crate::query::condition::{CompareOp, Condition};
    use crate::query::{QueryPlan, SortDirection, SortField};
    use rusqlite::types::Value as SqlValue;
    use std::sync::Arc;

    #[test]
    fn compiles_filters_orders_and_paging_into_bound_sql() {
        let plan = QueryPlan {
            filter: Condition::and(
                Arc::new(Condition::compare("author.name", CompareOp::Eq, "Le Guin")),
                Condition::not(Arc::new(Condition::IsNull("pages".to_string()))),
            ),
            order: vec![SortField {
                field: "pages".to_string(),
                direction: SortDirection::Desc,
            }],
            limit: Some(5),
            offset: 2,
        };

        let mut compiled = CompiledSql::default();
        compiled.sql.push_str("SELECT id, data");
        compiled.push_from_clause("books", &plan);

        assert_eq!(
            compiled.sql,
            "SELECT id, data FROM \"books\" WHERE (json_extract(data, ?) = ?) AND \
             (NOT (json_extract(data, ?) IS NULL)) ORDER BY json_extract(data, ?) DESC, \
             id ASC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            compiled.bind,
            vec![
                SqlValue::Text("$.author.name".to_string()),
                SqlValue::Text("Le Guin".to_string()),
                SqlValue::Text("$.pages".to_string()),
                SqlValue::Text("$.pages".to_string()),
                SqlValue::Integer(5),
                SqlValue::Integer(2),
            ]
        );
    }

    #[test]
    fn identity_field_maps_to_primary_key_column() {
        let mut compiled = CompiledSql::default();
        let sql = compiled.condition(&Condition::compare("id", CompareOp::Gt, 3));
        assert_eq!(sql, "id > ?");
        assert_eq!(compiled.bind, vec![SqlValue::Integer(3)]);
    }

    #[test]
    fn collections_are_registered_on_first_write_only() {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        assert!(adapter.collections().unwrap().is_empty());

        assert!(adapter.all("books").unwrap().is_empty());
        assert!(adapter.find("books", 1).unwrap().is_none());
        adapter.clear("authors").unwrap();
        assert!(adapter.delete("authors", 1).is_err());
        assert!(adapter.collections().unwrap().is_empty());

        adapter.create("books", Record::default()).unwrap();
        adapter.create("authors", Record::default()).unwrap();
        assert_eq!(adapter.collections().unwrap(), vec!["authors", "books"]);
    }
}
