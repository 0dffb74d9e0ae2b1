use std::cmp::Ordering;

use crate::error::SiltResult;
use crate::sql::ast::{BinaryOp, Expr};
use crate::utils::scalar::Value;

/// Column resolution strategy, supplied by the caller: strict resolution
/// for WHERE/projection, the left-then-right rule for JOIN ON conditions.
pub type ColumnResolver<'a> = dyn Fn(&str) -> SiltResult<Value> + 'a;

/// Evaluate a predicate to a boolean. AND returns false on the first false
/// child, OR returns true on the first true child.
pub fn eval_predicate(expr: &Expr, resolve: &ColumnResolver) -> SiltResult<bool> {
    match expr {
        Expr::Binary(b) => match b.op {
            BinaryOp::And => Ok(eval_predicate(&b.left, resolve)? && eval_predicate(&b.right, resolve)?),
            BinaryOp::Or => Ok(eval_predicate(&b.left, resolve)? || eval_predicate(&b.right, resolve)?),
            op => {
                let left = eval_operand(&b.left, resolve)?;
                let right = eval_operand(&b.right, resolve)?;
                Ok(compare_matches(op, left.compare(&right)))
            }
        },
        Expr::Column(name) => Ok(resolve(name)?.is_truthy()),
        Expr::Literal(value) => Ok(value.is_truthy()),
    }
}

fn eval_operand(expr: &Expr, resolve: &ColumnResolver) -> SiltResult<Value> {
    match expr {
        Expr::Column(name) => resolve(name),
        Expr::Literal(value) => Ok(value.clone()),
        // A nested comparison used as an operand collapses to 0/1.
        Expr::Binary(_) => Ok(Value::Int(eval_predicate(expr, resolve)? as i32)),
    }
}

fn compare_matches(op: BinaryOp, ordering: Option<Ordering>) -> bool {
    let Some(ordering) = ordering else {
        // One side null: every comparison is unknown, treated as false.
        return false;
    };
    match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::NotEq => ordering != Ordering::Equal,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::GtEq => ordering != Ordering::Less,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::And | BinaryOp::Or => unreachable!("logical ops handled above"),
    }
}
