use sqlparser::ast::{
    ColumnDef, ColumnOption, Expr, GroupByExpr, Ident, ObjectName, ObjectType, Query, Select,
    SelectItem, SetExpr, Statement, TableConstraint, TableFactor, TableWithJoins,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::engine::{
    execute_select_scan, row_id, Column, Engine, Predicate, Row, TableSchema, Value, ID_FIELD,
};
use crate::error::{DbError, DbResult};

mod expr;

pub use expr::{eval_expr, where_predicate};
use expr::{default_text, resolve_default};

/// Generic tabular outcome of one statement, already rendered to text.
///
/// `status` is the PostgreSQL command tag (`SELECT 2`, `INSERT 0 1`, ...);
/// an empty status marks a blank query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub rows_affected: u64,
    pub last_id: Option<String>,
    pub status: String,
}

impl QueryResult {
    /// Result of a blank statement.
    pub fn empty() -> Self {
        Self::default()
    }

    fn command(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn is_empty_query(&self) -> bool {
        self.status.is_empty()
    }
}

/// Runs one SQL statement on the blocking pool.
///
/// Storage work is synchronous file I/O under `parking_lot` locks, so it is
/// kept off the async worker threads.
pub async fn plan_and_exec(engine: Arc<Engine>, sql: &str) -> DbResult<QueryResult> {
    let sql = sql.to_string();
    tokio::task::spawn_blocking(move || execute(&engine, &sql))
        .await
        .map_err(|e| DbError::Internal(e.to_string()))?
}

/// Parses and executes one SQL statement.
///
/// ## Supported SQL
/// - `CREATE TABLE name (col type [PRIMARY KEY] [NOT NULL] [UNIQUE] [DEFAULT x], ...)`
/// - `DROP TABLE [IF EXISTS] name, ...`
/// - `SELECT {* | col, ...} FROM table [WHERE cond]`
/// - `INSERT INTO table [(col, ...)] VALUES (...), ...`
/// - `UPDATE table SET col = val, ... [WHERE cond]`
/// - `DELETE FROM table [WHERE cond]`
///
/// `cond` is any AND/OR combination of `col = literal` and `col <> literal`.
///
/// ## Example
/// ```rust
/// use jsonl_pg::{engine::Engine, sql::execute};
///
/// let dir = tempfile::tempdir().unwrap();
/// let engine = Engine::open(dir.path()).unwrap();
/// execute(&engine, "CREATE TABLE t (id TEXT PRIMARY KEY, v TEXT)").unwrap();
/// execute(&engine, "INSERT INTO t (id, v) VALUES ('a', 'x');").unwrap();
/// let res = execute(&engine, "SELECT v FROM t WHERE id = 'a'").unwrap();
/// assert_eq!(res.rows, vec![vec![Some("x".to_string())]]);
/// assert_eq!(res.status, "SELECT 1");
/// ```
pub fn execute(engine: &Engine, sql: &str) -> DbResult<QueryResult> {
    let sql = sql.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        return Ok(QueryResult::empty());
    }

    let mut ast = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| DbError::Parse(e.to_string()))?;
    if ast.len() != 1 {
        return Err(DbError::Unsupported(
            "only one statement at a time is supported".into(),
        ));
    }
    let stmt = ast.remove(0);
    debug!(%stmt, "executing");

    match stmt {
        // CREATE TABLE foo (id TEXT PRIMARY KEY, name TEXT NOT NULL);
        Statement::CreateTable {
            name,
            columns,
            constraints,
            if_not_exists,
            ..
        } => {
            let schema = table_schema(object_name(&name), &columns, &constraints)?;
            match engine.create_table(schema) {
                Err(e) if if_not_exists && e.is_already_exists() => {}
                other => other?,
            }
            Ok(QueryResult::command("CREATE TABLE"))
        }

        Statement::Drop {
            object_type,
            if_exists,
            names,
            ..
        } => {
            if object_type != ObjectType::Table {
                return Err(DbError::Unsupported(format!("DROP {object_type}")));
            }
            for name in &names {
                match engine.drop_table(&object_name(name)) {
                    Err(DbError::NotFound(_)) if if_exists => {}
                    other => other?,
                }
            }
            Ok(QueryResult::command("DROP TABLE"))
        }

        Statement::Query(query) => select(engine, &query),

        // INSERT INTO foo (id, name) VALUES ('a', 'Ada'), ('b', 'Linus');
        Statement::Insert {
            table_name,
            columns,
            source,
            ..
        } => {
            let source = source.ok_or_else(|| {
                DbError::Unsupported("INSERT requires a VALUES list".into())
            })?;
            insert(engine, &object_name(&table_name), &columns, &source)
        }

        Statement::Update {
            table,
            assignments,
            from,
            selection,
            ..
        } => {
            if from.is_some() {
                return Err(DbError::Unsupported("UPDATE ... FROM".into()));
            }
            let tname = single_table(std::slice::from_ref(&table), "UPDATE")?;
            let mut fields = BTreeMap::new();
            for a in &assignments {
                let col = a
                    .id
                    .last()
                    .map(|id| id.value.clone())
                    .ok_or_else(|| DbError::Unsupported("empty SET target".into()))?;
                fields.insert(col, Value::from(eval_expr(&a.value)));
            }
            update(engine, &tname, fields, selection.as_ref())
        }

        // DELETE FROM foo WHERE ...
        Statement::Delete {
            from, selection, ..
        } => {
            let tname = single_table(&from, "DELETE")?;
            delete(engine, &tname, selection.as_ref())
        }

        other => Err(DbError::Unsupported(format!(
            "statement not supported: {}",
            statement_keyword(&other)
        ))),
    }
}

fn statement_keyword(stmt: &Statement) -> String {
    stmt.to_string()
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|id| id.value.clone())
        .unwrap_or_default()
}

fn single_table(from: &[TableWithJoins], what: &str) -> DbResult<String> {
    if from.len() != 1 || !from[0].joins.is_empty() {
        return Err(DbError::Unsupported(format!(
            "{what} supports exactly one table"
        )));
    }
    match &from[0].relation {
        TableFactor::Table { name, .. } => Ok(object_name(name)),
        other => Err(DbError::Unsupported(format!(
            "{what} target not supported: {other}"
        ))),
    }
}

fn table_schema(
    name: String,
    defs: &[ColumnDef],
    constraints: &[TableConstraint],
) -> DbResult<TableSchema> {
    let mut columns: Vec<Column> = Vec::with_capacity(defs.len());
    for def in defs {
        if columns.iter().any(|c| c.name == def.name.value) {
            return Err(DbError::Unsupported(format!(
                "column \"{}\" specified more than once",
                def.name.value
            )));
        }
        let mut col = Column::new(def.name.value.clone(), def.data_type.to_string().to_lowercase());
        for opt in &def.options {
            match &opt.option {
                ColumnOption::NotNull => col.not_null = true,
                ColumnOption::Unique { is_primary, .. } => {
                    if *is_primary {
                        col = col.primary_key();
                    } else {
                        col = col.unique();
                    }
                }
                ColumnOption::Default(expr) => col.default = default_text(expr),
                _ => {}
            }
        }
        columns.push(col);
    }

    for constraint in constraints {
        if let TableConstraint::Unique {
            columns: names,
            is_primary,
            ..
        } = constraint
        {
            for ident in names {
                let col = columns
                    .iter_mut()
                    .find(|c| c.name == ident.value)
                    .ok_or_else(|| DbError::UnknownColumn {
                        table: name.clone(),
                        column: ident.value.clone(),
                    })?;
                if *is_primary {
                    col.primary_key = true;
                    col.not_null = true;
                } else {
                    col.unique = true;
                }
            }
        }
    }

    Ok(TableSchema::new(name, columns))
}

fn select(engine: &Engine, query: &Query) -> DbResult<QueryResult> {
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        _ => return Err(DbError::Unsupported("only plain SELECT is supported".into())),
    };
    reject_unsupported_clauses(query, select)?;
    let tname = single_table(&select.from, "SELECT")?;
    let schema = engine.catalog().get_table(&tname)?;

    // (source field, output name)
    let mut cols: Vec<(String, String)> = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                cols.extend(schema.columns.iter().map(|c| (c.name.clone(), c.name.clone())));
            }
            SelectItem::UnnamedExpr(e) => {
                let c = projected_column(&schema, e)?;
                cols.push((c.clone(), c));
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                let c = projected_column(&schema, expr)?;
                cols.push((c, alias.value.clone()));
            }
        }
    }

    let pred: Option<Predicate> = select.selection.as_ref().map(where_predicate);
    let sources: Vec<String> = cols.iter().map(|(src, _)| src.clone()).collect();
    let rows = execute_select_scan(engine.rows(), &tname, pred.as_ref(), &sources)?;

    let n = rows.len();
    Ok(QueryResult {
        columns: cols.into_iter().map(|(_, out)| out).collect(),
        rows,
        rows_affected: n as u64,
        last_id: None,
        status: format!("SELECT {n}"),
    })
}

/// Clauses that would change which rows come back are refused rather than
/// ignored. Only WHERE has a permissive fallback.
fn reject_unsupported_clauses(query: &Query, select: &Select) -> DbResult<()> {
    let clause = if query.with.is_some() {
        Some("WITH")
    } else if !query.order_by.is_empty() {
        Some("ORDER BY")
    } else if query.limit.is_some() || !query.limit_by.is_empty() || query.fetch.is_some() {
        Some("LIMIT")
    } else if query.offset.is_some() {
        Some("OFFSET")
    } else if select.distinct.is_some() {
        Some("DISTINCT")
    } else if !matches!(&select.group_by, GroupByExpr::Expressions(e) if e.is_empty()) {
        Some("GROUP BY")
    } else if select.having.is_some() {
        Some("HAVING")
    } else {
        None
    };
    match clause {
        Some(c) => Err(DbError::Unsupported(format!("SELECT with {c}"))),
        None => Ok(()),
    }
}

fn projected_column(schema: &TableSchema, expr: &Expr) -> DbResult<String> {
    let name = match expr {
        Expr::Identifier(id) => id.value.clone(),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|id| id.value.clone())
            .unwrap_or_default(),
        other => {
            return Err(DbError::Unsupported(format!(
                "only column references can be selected, got {other}"
            )))
        }
    };
    if name != ID_FIELD && !schema.has_column(&name) {
        return Err(DbError::UnknownColumn {
            table: schema.name.clone(),
            column: name,
        });
    }
    Ok(name)
}

fn insert(engine: &Engine, table: &str, columns: &[Ident], source: &Query) -> DbResult<QueryResult> {
    let values = match source.body.as_ref() {
        SetExpr::Values(values) => values,
        _ => return Err(DbError::Unsupported("INSERT supports VALUES only".into())),
    };
    let schema = engine.catalog().get_table(table)?;
    let targets: Vec<String> = if columns.is_empty() {
        schema.column_names()
    } else {
        columns.iter().map(|c| c.value.clone()).collect()
    };

    let mut inserted = 0u64;
    let mut last_id = None;
    for tuple in &values.rows {
        if tuple.len() != targets.len() {
            return Err(DbError::ValueCountMismatch {
                expected: targets.len(),
                found: tuple.len(),
            });
        }
        let mut row: Row = targets
            .iter()
            .zip(tuple)
            .map(|(col, e)| (col.clone(), Value::from(eval_expr(e))))
            .collect();
        for col in &schema.columns {
            if let Some(default) = &col.default {
                if !row.contains_key(&col.name) {
                    row.insert(col.name.clone(), Value::Text(resolve_default(default)));
                }
            }
        }
        last_id = Some(engine.rows().insert(table, row)?);
        inserted += 1;
    }

    Ok(QueryResult {
        rows_affected: inserted,
        last_id,
        status: format!("INSERT 0 {inserted}"),
        ..QueryResult::default()
    })
}

/// Rows of `table` that have an id and satisfy `selection`.
fn matching_ids(engine: &Engine, table: &str, selection: Option<&Expr>) -> DbResult<Vec<String>> {
    let pred = selection.map(where_predicate);
    Ok(engine
        .rows()
        .scan(table)?
        .iter()
        .filter(|row| pred.as_ref().map_or(true, |p| p.matches(row)))
        .filter_map(row_id)
        .collect())
}

// One atomic rewrite per matching row. A failure part way leaves the rows
// handled so far updated.
fn update(
    engine: &Engine,
    table: &str,
    fields: BTreeMap<String, Value>,
    selection: Option<&Expr>,
) -> DbResult<QueryResult> {
    let schema = engine.catalog().get_table(table)?;
    if fields.contains_key(ID_FIELD) {
        return Err(DbError::ImmutableColumn {
            table: table.to_string(),
            column: ID_FIELD.to_string(),
        });
    }
    schema.check_columns(fields.keys())?;

    let mut n = 0u64;
    for id in matching_ids(engine, table, selection)? {
        engine.rows().update(table, &id, fields.clone())?;
        n += 1;
    }
    Ok(QueryResult {
        rows_affected: n,
        status: format!("UPDATE {n}"),
        ..QueryResult::default()
    })
}

fn delete(engine: &Engine, table: &str, selection: Option<&Expr>) -> DbResult<QueryResult> {
    let mut n = 0u64;
    for id in matching_ids(engine, table, selection)? {
        engine.rows().delete(table, &id)?;
        n += 1;
    }
    Ok(QueryResult {
        rows_affected: n,
        status: format!("DELETE {n}"),
        ..QueryResult::default()
    })
}
