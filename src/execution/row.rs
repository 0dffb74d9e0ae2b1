use std::collections::{HashMap, HashSet};

use crate::catalog::ColumnDef;
use crate::error::{SiltError, SiltResult};
use crate::utils::scalar::Value;

/// Field separator of the on-disk row encoding. Reserved: it may not
/// appear inside TEXT values.
pub const FIELD_SEPARATOR: char = '|';

/// Serialize a row in column-ordinal order.
pub fn serialize_row(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

/// Decode a stored row into one value per schema column. Missing trailing
/// fields read as null; surplus fields are dropped.
pub fn decode_row(schema: &[ColumnDef], raw: &str) -> Vec<Value> {
    let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
    schema
        .iter()
        .enumerate()
        .map(|(i, col)| match fields.get(i) {
            Some(field) => col.data_type.decode_field(field),
            None => Value::Null,
        })
        .collect()
}

/// Name-addressable view of one (possibly joined) row.
///
/// Every column is reachable under its table-qualified name and its alias-
/// qualified name; unqualified names resolve to the leftmost relation when
/// relations collide, and the collision is remembered so that strict
/// resolution can reject the reference instead.
#[derive(Debug, Clone)]
pub struct Row {
    entries: HashMap<String, Value>,
    ambiguous: HashSet<String>,
    /// Unqualified column names contributed by this row's base relation(s).
    base_columns: Vec<String>,
}

impl Row {
    pub fn from_values(
        schema: &[ColumnDef],
        values: &[Value],
        table: &str,
        reference: &str,
    ) -> Self {
        let mut entries = HashMap::new();
        let mut base_columns = Vec::with_capacity(schema.len());
        for (col, value) in schema.iter().zip(values.iter()) {
            entries.insert(col.name.clone(), value.clone());
            entries.insert(format!("{table}.{}", col.name), value.clone());
            if reference != table {
                entries.insert(format!("{reference}.{}", col.name), value.clone());
            }
            base_columns.push(col.name.clone());
        }
        Row {
            entries,
            ambiguous: HashSet::new(),
            base_columns,
        }
    }

    /// Merge for a nested-loop join step. Qualified names from both sides
    /// survive untouched; an unqualified name present on both sides keeps
    /// the left value and is marked ambiguous.
    pub fn merge(left: &Row, right: &Row) -> Row {
        let mut entries = left.entries.clone();
        let mut ambiguous = left.ambiguous.clone();

        for (key, value) in &right.entries {
            if key.contains('.') {
                entries.insert(key.clone(), value.clone());
            }
        }
        for column in &right.base_columns {
            if left.entries.contains_key(column) || ambiguous.contains(column) {
                ambiguous.insert(column.clone());
            } else if let Some(value) = right.entries.get(column) {
                entries.insert(column.clone(), value.clone());
            }
        }

        let mut base_columns = left.base_columns.clone();
        base_columns.extend(right.base_columns.iter().cloned());
        Row {
            entries,
            ambiguous,
            base_columns,
        }
    }

    /// Strict resolution used by WHERE, projection, and ORDER BY: an
    /// unqualified reference that collides across joined tables is an
    /// error naming the column.
    pub fn resolve_strict(&self, name: &str) -> SiltResult<Value> {
        if name.contains('.') {
            return self
                .entries
                .get(name)
                .cloned()
                .ok_or_else(|| SiltError::Schema(format!("unknown column '{name}'")));
        }
        if self.ambiguous.contains(name) {
            return Err(SiltError::Schema(format!(
                "ambiguous column reference '{name}'"
            )));
        }
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| SiltError::Schema(format!("unknown column '{name}'")))
    }

    /// Resolution rule for JOIN ON conditions: the exact key first, then
    /// the left relation's qualification, then the right's.
    pub fn resolve_on(&self, name: &str, left_ref: &str, right_ref: &str) -> SiltResult<Value> {
        if name.contains('.') {
            return self
                .entries
                .get(name)
                .cloned()
                .ok_or_else(|| SiltError::Schema(format!("unknown column '{name}'")));
        }
        if let Some(value) = self.entries.get(name) {
            return Ok(value.clone());
        }
        for candidate in [format!("{left_ref}.{name}"), format!("{right_ref}.{name}")] {
            if let Some(value) = self.entries.get(&candidate) {
                return Ok(value.clone());
            }
        }
        Err(SiltError::Schema(format!(
            "unknown column '{name}' in join condition"
        )))
    }

    /// Lookup for wildcard projection: the owning relation's qualified
    /// name first, the bare name as fallback.
    pub fn get_for_wildcard(&self, reference: &str, column: &str) -> Value {
        self.entries
            .get(&format!("{reference}.{column}"))
            .or_else(|| self.entries.get(column))
            .cloned()
            .unwrap_or(Value::Null)
    }
}
