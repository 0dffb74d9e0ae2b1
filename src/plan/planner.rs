use std::sync::Arc;

use log::debug;

use crate::catalog::{Catalog, CATALOG_PREFIX, DELETED_SENTINEL};
use crate::error::SiltResult;
use crate::sql::ast::{BinaryExpr, BinaryOp, Expr, SelectItem, SelectStmt};
use crate::storage::StorageEngine;

// Cost model, in arbitrary comparable units.
const COST_TABLE_SCAN_PER_ROW: f64 = 1.0;
const COST_INDEX_SEEK: f64 = 10.0;
const COST_INDEX_SCAN_PER_ROW: f64 = 0.5;
const COST_FILTER_PER_ROW: f64 = 0.1;
const COST_SORT_PER_ROW: f64 = 2.0;

const SELECTIVITY_EQ: f64 = 0.01;
const SELECTIVITY_NEQ: f64 = 0.99;
const SELECTIVITY_RANGE: f64 = 0.33;
const SELECTIVITY_DEFAULT: f64 = 0.1;

/// Physical plan tree for a SELECT. Every node carries its estimated cost
/// and output cardinality.
#[derive(Debug, Clone)]
pub enum PhysicalPlan {
    TableScan {
        table: String,
        cost: f64,
        rows: u64,
    },
    IndexScan {
        table: String,
        index: String,
        column: String,
        predicate: Expr,
        cost: f64,
        rows: u64,
    },
    Filter {
        child: Box<PhysicalPlan>,
        predicate: Expr,
        selectivity: f64,
        cost: f64,
        rows: u64,
    },
    Sort {
        child: Box<PhysicalPlan>,
        column: String,
        cost: f64,
        rows: u64,
    },
    Limit {
        child: Box<PhysicalPlan>,
        limit: usize,
        cost: f64,
        rows: u64,
    },
    Project {
        child: Box<PhysicalPlan>,
        columns: Vec<SelectItem>,
        cost: f64,
        rows: u64,
    },
}

impl PhysicalPlan {
    pub fn cost(&self) -> f64 {
        match self {
            PhysicalPlan::TableScan { cost, .. }
            | PhysicalPlan::IndexScan { cost, .. }
            | PhysicalPlan::Filter { cost, .. }
            | PhysicalPlan::Sort { cost, .. }
            | PhysicalPlan::Limit { cost, .. }
            | PhysicalPlan::Project { cost, .. } => *cost,
        }
    }

    pub fn rows(&self) -> u64 {
        match self {
            PhysicalPlan::TableScan { rows, .. }
            | PhysicalPlan::IndexScan { rows, .. }
            | PhysicalPlan::Filter { rows, .. }
            | PhysicalPlan::Sort { rows, .. }
            | PhysicalPlan::Limit { rows, .. }
            | PhysicalPlan::Project { rows, .. } => *rows,
        }
    }

    /// The access-path node at the bottom of the tree.
    pub fn access_path(&self) -> &PhysicalPlan {
        match self {
            PhysicalPlan::Filter { child, .. }
            | PhysicalPlan::Sort { child, .. }
            | PhysicalPlan::Limit { child, .. }
            | PhysicalPlan::Project { child, .. } => child.access_path(),
            scan => scan,
        }
    }

    /// Indented textual rendering used by EXPLAIN.
    pub fn format(&self) -> String {
        let mut out = String::new();
        self.format_into(&mut out, 0);
        out
    }

    fn format_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        match self {
            PhysicalPlan::TableScan { table, cost, rows } => {
                out.push_str(&format!(
                    "{indent}TableScan({table}) [cost={cost:.1}, rows={rows}]\n"
                ));
            }
            PhysicalPlan::IndexScan {
                table,
                index,
                predicate,
                cost,
                rows,
                ..
            } => {
                out.push_str(&format!(
                    "{indent}IndexScan({table}, {index}) WHERE {predicate} [cost={cost:.1}, rows={rows}]\n"
                ));
            }
            PhysicalPlan::Filter {
                child,
                predicate,
                selectivity,
                cost,
                rows,
            } => {
                out.push_str(&format!(
                    "{indent}Filter({predicate}) [selectivity={selectivity:.2}, cost={cost:.1}, rows={rows}]\n"
                ));
                child.format_into(out, depth + 1);
            }
            PhysicalPlan::Sort {
                child,
                column,
                cost,
                rows,
            } => {
                out.push_str(&format!(
                    "{indent}Sort({column}) [cost={cost:.1}, rows={rows}]\n"
                ));
                child.format_into(out, depth + 1);
            }
            PhysicalPlan::Limit {
                child,
                limit,
                cost,
                rows,
            } => {
                out.push_str(&format!(
                    "{indent}Limit({limit}) [cost={cost:.1}, rows={rows}]\n"
                ));
                child.format_into(out, depth + 1);
            }
            PhysicalPlan::Project {
                child,
                columns,
                cost,
                rows,
            } => {
                let cols = columns
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!(
                    "{indent}Project({cols}) [cost={cost:.1}, rows={rows}]\n"
                ));
                child.format_into(out, depth + 1);
            }
        }
    }
}

/// Cost-based access-method selection for SELECT statements.
///
/// For each AND-connected conjunct of the WHERE clause that compares an
/// indexed column to a literal, an index-seek alternative is costed against
/// the full scan; the cheapest access path wins. Conjuncts not covered by
/// the chosen index remain as a residual filter.
pub struct Planner<'a> {
    pub catalog: &'a Catalog,
    pub engine: &'a Arc<StorageEngine>,
}

impl<'a> Planner<'a> {
    pub fn plan(&self, select: &SelectStmt) -> SiltResult<PhysicalPlan> {
        let table = select.from.table.as_str();
        let total_rows = self.table_row_estimate(table)?;

        let conjuncts = select
            .predicate
            .as_ref()
            .map(collect_conjuncts)
            .unwrap_or_default();
        let (mut plan, covered) = self.choose_access_method(select, table, total_rows, &conjuncts);

        // Residual predicates the access path did not absorb.
        let residual = rebuild_conjunction(
            conjuncts
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != covered)
                .map(|(_, e)| (*e).clone())
                .collect(),
        );
        if let Some(predicate) = residual {
            let selectivity = estimate_selectivity(&predicate);
            let rows = ((plan.rows() as f64 * selectivity) as u64).max(1);
            let cost = plan.cost() + plan.rows() as f64 * COST_FILTER_PER_ROW;
            plan = PhysicalPlan::Filter {
                child: Box::new(plan),
                predicate,
                selectivity,
                cost,
                rows,
            };
        }

        if let Some(column) = &select.order_by {
            let cost = plan.cost() + plan.rows() as f64 * COST_SORT_PER_ROW;
            let rows = plan.rows();
            plan = PhysicalPlan::Sort {
                child: Box::new(plan),
                column: column.clone(),
                cost,
                rows,
            };
        }

        if let Some(limit) = select.limit {
            let rows = plan.rows().min(limit as u64);
            let cost = plan.cost() * (rows as f64 / (plan.rows().max(1) as f64));
            plan = PhysicalPlan::Limit {
                child: Box::new(plan),
                limit,
                cost,
                rows,
            };
        }

        let cost = plan.cost();
        let rows = plan.rows();
        let plan = PhysicalPlan::Project {
            child: Box::new(plan),
            columns: select.projection.clone(),
            cost,
            rows,
        };
        debug!("physical plan:\n{}", plan.format());
        Ok(plan)
    }

    /// Table scan unless some conjunct has a strictly cheaper index seek.
    /// Returns the scan node and the index of the covered conjunct, if any.
    fn choose_access_method(
        &self,
        select: &SelectStmt,
        table: &str,
        total_rows: u64,
        conjuncts: &[&Expr],
    ) -> (PhysicalPlan, Option<usize>) {
        let table_scan = PhysicalPlan::TableScan {
            table: table.to_string(),
            cost: total_rows as f64 * COST_TABLE_SCAN_PER_ROW,
            rows: total_rows,
        };

        // Joined queries keep the plain scan: a conjunct may reference a
        // joined relation's column, which an early index probe of the FROM
        // table could not resolve.
        if !select.joins.is_empty() {
            return (table_scan, None);
        }
        let indexes = match self.catalog.indexes(Some(table)) {
            Ok(indexes) if !indexes.is_empty() => indexes,
            _ => return (table_scan, None),
        };

        let mut best: Option<(usize, PhysicalPlan)> = None;
        for (i, conjunct) in conjuncts.iter().enumerate() {
            let Some((column, selectivity)) = indexable_predicate(conjunct, select) else {
                continue;
            };
            let Some(index) = indexes.iter().find(|ix| ix.column == column) else {
                continue;
            };
            let matched = ((total_rows as f64 * selectivity).ceil() as u64).max(1);
            let cost = COST_INDEX_SEEK + matched as f64 * COST_INDEX_SCAN_PER_ROW;
            if cost < best.as_ref().map(|(_, p)| p.cost()).unwrap_or(f64::MAX) {
                best = Some((
                    i,
                    PhysicalPlan::IndexScan {
                        table: table.to_string(),
                        index: index.name.clone(),
                        column,
                        predicate: (*conjunct).clone(),
                        cost,
                        rows: matched,
                    },
                ));
            }
        }

        match best {
            Some((covered, index_scan)) if index_scan.cost() < table_scan.cost() => {
                (index_scan, Some(covered))
            }
            _ => (table_scan, None),
        }
    }

    /// Row-count estimate for a table, back-filled by counting when the
    /// catalog has no statistics yet.
    fn table_row_estimate(&self, table: &str) -> SiltResult<u64> {
        let stats = self.catalog.stats(table)?;
        if stats.row_count > 0 {
            return Ok(stats.row_count);
        }
        let start = format!("{table}:");
        let end = format!("{table}:~");
        let counted = self
            .engine
            .range_scan(start.as_bytes(), end.as_bytes())?
            .iter()
            .filter(|(key, value)| {
                value.as_slice() != DELETED_SENTINEL.as_bytes()
                    && !key.starts_with(CATALOG_PREFIX.as_bytes())
            })
            .count() as u64;
        if counted > 0 {
            self.catalog.update_stats(table, counted)?;
        }
        Ok(counted)
    }
}

/// Flatten the AND-tree of a predicate into its conjuncts. An OR anywhere
/// above keeps the whole subtree as a single conjunct.
fn collect_conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary(b) if b.op == BinaryOp::And => {
            let mut conjuncts = collect_conjuncts(&b.left);
            conjuncts.extend(collect_conjuncts(&b.right));
            conjuncts
        }
        other => vec![other],
    }
}

fn rebuild_conjunction(mut conjuncts: Vec<Expr>) -> Option<Expr> {
    let first = match conjuncts.is_empty() {
        true => return None,
        false => conjuncts.remove(0),
    };
    Some(conjuncts.into_iter().fold(first, |acc, next| {
        Expr::Binary(Box::new(BinaryExpr {
            left: acc,
            op: BinaryOp::And,
            right: next,
        }))
    }))
}

/// A conjunct usable for an index seek: `<column> <op> <literal>` (either
/// side order) with an equality or range operator. Returns the unqualified
/// column name and the predicate's selectivity.
fn indexable_predicate(expr: &Expr, select: &SelectStmt) -> Option<(String, f64)> {
    let Expr::Binary(b) = expr else {
        return None;
    };
    let selectivity = match b.op {
        BinaryOp::Eq => SELECTIVITY_EQ,
        BinaryOp::Gt | BinaryOp::Lt | BinaryOp::GtEq | BinaryOp::LtEq => SELECTIVITY_RANGE,
        _ => return None,
    };
    let column = match (&b.left, &b.right) {
        (Expr::Column(col), Expr::Literal(_)) => col,
        (Expr::Literal(_), Expr::Column(col)) => col,
        _ => return None,
    };
    let column = match column.split_once('.') {
        None => column.clone(),
        Some((qualifier, col))
            if qualifier == select.from.table || qualifier == select.from.reference() =>
        {
            col.to_string()
        }
        Some(_) => return None,
    };
    Some((column, selectivity))
}

pub fn estimate_selectivity(expr: &Expr) -> f64 {
    match expr {
        Expr::Binary(b) => match b.op {
            BinaryOp::Eq => SELECTIVITY_EQ,
            BinaryOp::NotEq => SELECTIVITY_NEQ,
            BinaryOp::Gt | BinaryOp::Lt | BinaryOp::GtEq | BinaryOp::LtEq => SELECTIVITY_RANGE,
            BinaryOp::And => {
                estimate_selectivity(&b.left) * estimate_selectivity(&b.right)
            }
            BinaryOp::Or => {
                (estimate_selectivity(&b.left) + estimate_selectivity(&b.right)).min(1.0)
            }
        },
        _ => SELECTIVITY_DEFAULT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ast::Statement;
    use crate::sql::parse_sql;

    fn predicate_of(sql: &str) -> Expr {
        match parse_sql(sql).unwrap() {
            Statement::Select(select) => select.predicate.unwrap(),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn selectivity_heuristics() {
        assert_eq!(
            estimate_selectivity(&predicate_of("SELECT * FROM t WHERE a = 1")),
            0.01
        );
        assert_eq!(
            estimate_selectivity(&predicate_of("SELECT * FROM t WHERE a > 1")),
            0.33
        );
        let and = estimate_selectivity(&predicate_of("SELECT * FROM t WHERE a = 1 AND b > 2"));
        assert!((and - 0.01 * 0.33).abs() < 1e-9);
        let or = estimate_selectivity(&predicate_of("SELECT * FROM t WHERE a != 1 OR b != 2"));
        assert_eq!(or, 1.0);
    }

    #[test]
    fn conjuncts_stop_at_or() {
        let and_pred = predicate_of("SELECT * FROM t WHERE a = 1 AND b = 2 AND c = 3");
        assert_eq!(collect_conjuncts(&and_pred).len(), 3);
        let or_pred = predicate_of("SELECT * FROM t WHERE a = 1 OR b = 2");
        assert_eq!(collect_conjuncts(&or_pred).len(), 1);
    }
}
