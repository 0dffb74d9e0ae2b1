pub mod aggregate;
pub mod eval;
pub mod row;

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::catalog::{Catalog, ColumnDef, CATALOG_PREFIX, DELETED_SENTINEL};
use crate::error::{SiltError, SiltResult};
use crate::execution::aggregate::{apply_aggregates, has_aggregates};
use crate::execution::eval::eval_predicate;
use crate::execution::row::{decode_row, serialize_row, Row, FIELD_SEPARATOR};
use crate::plan::{PhysicalPlan, Planner};
use crate::sql::ast::{Expr, SelectItem, SelectStmt, Statement, TableRef};
use crate::storage::StorageEngine;
use crate::utils::scalar::Value;

/// Result of a single statement: mutations and DDL answer with a
/// confirmation message, queries with rows in select-list order.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Message(String),
    Rows(Vec<Vec<Value>>),
}

impl StatementResult {
    pub fn expect_rows(self) -> Vec<Vec<Value>> {
        match self {
            StatementResult::Rows(rows) => rows,
            StatementResult::Message(msg) => panic!("expected rows, got message '{msg}'"),
        }
    }
}

/// Allocator for row-key suffixes: the current microsecond clock, bumped
/// past the previous id whenever two inserts land in the same microsecond.
#[derive(Debug, Default)]
pub struct RowIdAllocator {
    last: AtomicU64,
}

impl RowIdAllocator {
    pub fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        self.last
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .map(|last| now.max(last + 1))
            .unwrap_or(now)
    }
}

/// Statement executor over catalog + transactional engine.
pub struct ExecutionEngine<'a> {
    pub catalog: &'a Catalog,
    pub engine: &'a Arc<StorageEngine>,
    pub row_ids: &'a RowIdAllocator,
}

impl<'a> ExecutionEngine<'a> {
    pub fn execute(&self, statement: &Statement) -> SiltResult<StatementResult> {
        match statement {
            Statement::CreateTable { table, columns } => {
                self.check_user_table_name(table)?;
                self.catalog.create_table(table, columns)?;
                Ok(StatementResult::Message(format!("Table '{table}' created")))
            }
            Statement::DropTable { table } => {
                self.catalog.drop_table(table)?;
                Ok(StatementResult::Message(format!("Table '{table}' dropped")))
            }
            Statement::AlterTableAddColumn { table, column } => {
                self.catalog.add_column(table, column)?;
                Ok(StatementResult::Message(format!(
                    "Column '{}' added to table '{table}'",
                    column.name
                )))
            }
            Statement::CreateIndex {
                index,
                table,
                column,
            } => {
                self.catalog.create_index(index, table, column)?;
                Ok(StatementResult::Message(format!(
                    "Index '{index}' created on {table}({column})"
                )))
            }
            Statement::DropIndex { index } => {
                self.catalog.drop_index(index)?;
                Ok(StatementResult::Message(format!("Index '{index}' dropped")))
            }
            Statement::Insert { table, values } => self.execute_insert(table, values),
            Statement::Select(select) => {
                Ok(StatementResult::Rows(self.execute_select(select)?))
            }
            Statement::Update {
                table,
                assignments,
                predicate,
            } => self.execute_update(table, assignments, predicate.as_ref()),
            Statement::Delete { table, predicate } => {
                self.execute_delete(table, predicate.as_ref())
            }
            Statement::Explain(select) => {
                let plan = self.planner().plan(select)?;
                let mut text = plan.format();
                text.push_str(&format!(
                    "Estimated cost: {:.1}\nEstimated rows: {}",
                    plan.cost(),
                    plan.rows()
                ));
                Ok(StatementResult::Message(text))
            }
        }
    }

    fn execute_insert(&self, table: &str, values: &[Value]) -> SiltResult<StatementResult> {
        let schema = self.catalog.columns(table)?;
        if values.len() != schema.len() {
            return Err(SiltError::Schema(format!(
                "column count mismatch: expected {}, got {}",
                schema.len(),
                values.len()
            )));
        }

        let mut coerced = Vec::with_capacity(values.len());
        for (value, col) in values.iter().zip(schema.iter()) {
            let value = col.data_type.coerce(value)?;
            if let Value::Text(text) = &value {
                // The row encoding has no escaping for its separator.
                if text.contains(FIELD_SEPARATOR) {
                    return Err(SiltError::Type(format!(
                        "TEXT value for column '{}' must not contain '{}'",
                        col.name, FIELD_SEPARATOR
                    )));
                }
            }
            coerced.push(value);
        }

        let row_id = self.row_ids.next();
        let key = format!("{table}:{row_id:018}");
        self.engine
            .insert(key.as_bytes(), serialize_row(&coerced).as_bytes())?;

        let stats = self.catalog.stats(table)?;
        self.catalog.update_stats(table, stats.row_count + 1)?;
        Ok(StatementResult::Message(format!(
            "Inserted 1 row into '{table}'"
        )))
    }

    fn execute_select(&self, select: &SelectStmt) -> SiltResult<Vec<Vec<Value>>> {
        let plan = self.planner().plan(select)?;
        let mut rows = self.scan_for_plan(&select.from, &plan)?;

        // Nested-loop inner joins, folded left to right.
        let left_ref = select.from.reference().to_string();
        for join in &select.joins {
            let right_rows = self.scan_table(&join.table)?;
            let right_ref = join.table.reference();
            let mut joined = vec![];
            for left_row in &rows {
                for (_, right_row) in &right_rows {
                    let merged = Row::merge(left_row, right_row);
                    let matched = eval_predicate(&join.on, &|name: &str| {
                        merged.resolve_on(name, &left_ref, right_ref)
                    })?;
                    if matched {
                        joined.push(merged);
                    }
                }
            }
            rows = joined;
        }

        if let Some(predicate) = &select.predicate {
            let mut filtered = Vec::with_capacity(rows.len());
            for row in rows {
                if eval_predicate(predicate, &|name: &str| row.resolve_strict(name))? {
                    filtered.push(row);
                }
            }
            rows = filtered;
        }

        if !select.group_by.is_empty() || has_aggregates(&select.projection) {
            return self.finish_aggregate_query(select, &rows);
        }

        if let Some(order_by) = &select.order_by {
            sort_rows(&mut rows, order_by)?;
        }
        if let Some(limit) = select.limit {
            rows.truncate(limit);
        }

        self.project(select, &rows)
    }

    fn finish_aggregate_query(
        &self,
        select: &SelectStmt,
        rows: &[Row],
    ) -> SiltResult<Vec<Vec<Value>>> {
        let mut output = apply_aggregates(rows, &select.projection, &select.group_by)?;

        if let Some(order_by) = &select.order_by {
            // Grouped output can only be ordered by a select-list column.
            let position = select
                .projection
                .iter()
                .position(|item| matches!(item, SelectItem::Column(name) if name == order_by))
                .ok_or_else(|| {
                    SiltError::Schema(format!(
                        "ORDER BY column '{order_by}' is not in the select list of a grouped query"
                    ))
                })?;
            output.sort_by(|a, b| compare_for_sort(&a[position], &b[position]));
        }
        if let Some(limit) = select.limit {
            output.truncate(limit);
        }
        Ok(output)
    }

    fn execute_update(
        &self,
        table: &str,
        assignments: &[(String, Value)],
        predicate: Option<&Expr>,
    ) -> SiltResult<StatementResult> {
        let schema = self.catalog.columns(table)?;
        let mut resolved_assignments = Vec::with_capacity(assignments.len());
        for (column, value) in assignments {
            let ordinal = schema
                .iter()
                .position(|c| &c.name == column)
                .ok_or_else(|| {
                    SiltError::Schema(format!("unknown column '{column}' in table '{table}'"))
                })?;
            resolved_assignments.push((ordinal, schema[ordinal].data_type.coerce(value)?));
        }

        let mut updated = 0usize;
        for (key, values) in self.scan_table_values(table, &schema)? {
            let row = Row::from_values(&schema, &values, table, table);
            let matched = match predicate {
                Some(predicate) => {
                    eval_predicate(predicate, &|name: &str| row.resolve_strict(name))?
                }
                None => true,
            };
            if !matched {
                continue;
            }

            let mut new_values = values;
            for (ordinal, value) in &resolved_assignments {
                new_values[*ordinal] = value.clone();
            }
            self.engine
                .update(key.as_bytes(), serialize_row(&new_values).as_bytes())?;
            updated += 1;
        }
        debug!("updated {updated} row(s) in '{table}'");
        Ok(StatementResult::Message(format!("Updated {updated} row(s)")))
    }

    fn execute_delete(
        &self,
        table: &str,
        predicate: Option<&Expr>,
    ) -> SiltResult<StatementResult> {
        let schema = self.catalog.columns(table)?;
        let mut deleted = 0usize;
        for (key, values) in self.scan_table_values(table, &schema)? {
            let row = Row::from_values(&schema, &values, table, table);
            let matched = match predicate {
                Some(predicate) => {
                    eval_predicate(predicate, &|name: &str| row.resolve_strict(name))?
                }
                None => true,
            };
            if matched {
                // Soft delete: the row stays, its payload becomes the
                // sentinel every scan skips.
                self.engine
                    .update(key.as_bytes(), DELETED_SENTINEL.as_bytes())?;
                deleted += 1;
            }
        }

        let stats = self.catalog.stats(table)?;
        self.catalog
            .update_stats(table, stats.row_count.saturating_sub(deleted as u64))?;
        Ok(StatementResult::Message(format!("Deleted {deleted} row(s)")))
    }

    /// Materialize the FROM relation through the planner's access path. An
    /// index scan applies its predicate while scanning; secondary indexes
    /// are metadata-only, so both paths read the table's key range.
    fn scan_for_plan(&self, from: &TableRef, plan: &PhysicalPlan) -> SiltResult<Vec<Row>> {
        let rows = self.scan_table(from)?;
        let mut out = Vec::with_capacity(rows.len());
        match plan.access_path() {
            PhysicalPlan::IndexScan { predicate, .. } => {
                for (_, row) in rows {
                    if eval_predicate(predicate, &|name: &str| row.resolve_strict(name))? {
                        out.push(row);
                    }
                }
            }
            _ => out.extend(rows.into_iter().map(|(_, row)| row)),
        }
        Ok(out)
    }

    fn scan_table(&self, table_ref: &TableRef) -> SiltResult<Vec<(String, Row)>> {
        let schema = self.catalog.columns(&table_ref.table)?;
        let rows = self.scan_table_values(&table_ref.table, &schema)?;
        Ok(rows
            .into_iter()
            .map(|(key, values)| {
                let row = Row::from_values(
                    &schema,
                    &values,
                    &table_ref.table,
                    table_ref.reference(),
                );
                (key, row)
            })
            .collect())
    }

    /// Raw table scan: live rows only, decoded per the schema.
    fn scan_table_values(
        &self,
        table: &str,
        schema: &[ColumnDef],
    ) -> SiltResult<Vec<(String, Vec<Value>)>> {
        let start = format!("{table}:");
        let end = format!("{table}:~");
        let mut rows = vec![];
        for (key, value) in self.engine.range_scan(start.as_bytes(), end.as_bytes())? {
            let key = String::from_utf8_lossy(&key).into_owned();
            if key.starts_with(CATALOG_PREFIX) {
                continue;
            }
            let value = String::from_utf8_lossy(&value).into_owned();
            if value == DELETED_SENTINEL {
                continue;
            }
            rows.push((key, decode_row(schema, &value)));
        }
        Ok(rows)
    }

    fn project(&self, select: &SelectStmt, rows: &[Row]) -> SiltResult<Vec<Vec<Value>>> {
        let from_schema = self.catalog.columns(&select.from.table)?;

        let mut output = Vec::with_capacity(rows.len());
        for row in rows {
            let mut out_row = vec![];
            for item in &select.projection {
                match item {
                    SelectItem::Wildcard => {
                        // `*` expands to the FROM table's columns in
                        // ordinal order.
                        for col in &from_schema {
                            out_row
                                .push(row.get_for_wildcard(select.from.reference(), &col.name));
                        }
                    }
                    SelectItem::Column(name) => out_row.push(row.resolve_strict(name)?),
                    SelectItem::Aggregate(call) => {
                        return Err(SiltError::Internal(format!(
                            "aggregate {call} outside aggregation path"
                        )))
                    }
                }
            }
            output.push(out_row);
        }
        Ok(output)
    }

    fn planner(&self) -> Planner<'_> {
        Planner {
            catalog: self.catalog,
            engine: self.engine,
        }
    }

    fn check_user_table_name(&self, table: &str) -> SiltResult<()> {
        if table.starts_with("__") {
            return Err(SiltError::Schema(format!(
                "table name '{table}' uses a reserved prefix"
            )));
        }
        Ok(())
    }
}

fn sort_rows(rows: &mut [Row], order_by: &str) -> SiltResult<()> {
    // Resolve the sort key once per row up front so resolution errors
    // surface instead of being swallowed inside the comparator.
    let mut keyed: Vec<(Value, Row)> = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        keyed.push((row.resolve_strict(order_by)?, row.clone()));
    }
    keyed.sort_by(|a, b| compare_for_sort(&a.0, &b.0));
    for (slot, (_, row)) in rows.iter_mut().zip(keyed) {
        *slot = row;
    }
    Ok(())
}

/// Total order for sorting: nulls last, incomparable pairs fall back to
/// their string renderings.
fn compare_for_sort(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a
            .compare(b)
            .unwrap_or_else(|| a.to_string().cmp(&b.to_string())),
    }
}
