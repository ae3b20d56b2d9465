//! Expression evaluation for VALUES / SET / DEFAULT and WHERE conversion.

use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value as SqlValue};

use crate::engine::{
    id::{generate_id, is_id_function},
    Predicate,
};

/// Text of a literal expression.
///
/// `Some(Some(text))` for string, number and boolean literals, `Some(None)`
/// for `NULL`, and `None` when `expr` is not a literal at all.
pub fn literal_text(expr: &Expr) -> Option<Option<String>> {
    match expr {
        Expr::Value(v) => match v {
            SqlValue::Number(n, _) => Some(Some(n.to_string())),
            SqlValue::SingleQuotedString(s)
            | SqlValue::DoubleQuotedString(s)
            | SqlValue::EscapedStringLiteral(s)
            | SqlValue::NationalStringLiteral(s) => Some(Some(s.clone())),
            SqlValue::DollarQuotedString(d) => Some(Some(d.value.clone())),
            SqlValue::Boolean(b) => Some(Some(b.to_string())),
            SqlValue::Null => Some(None),
            _ => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match expr.as_ref() {
            Expr::Value(SqlValue::Number(n, _)) => Some(Some(format!("-{n}"))),
            _ => None,
        },
        Expr::Nested(inner) => literal_text(inner),
        _ => None,
    }
}

/// Name of an id generator called with no arguments, e.g. `gen_random_uuid()`.
pub fn id_function_call(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Function(f) if f.args.is_empty() => {
            let name = f.name.to_string();
            is_id_function(&name).then(|| name.to_lowercase())
        }
        _ => None,
    }
}

/// Evaluates a VALUES / SET expression to its text.
///
/// Literals give their text, `NULL` gives no value, an id generator call gives
/// a fresh id. Every other expression also gives no value rather than an
/// error.
pub fn eval_expr(expr: &Expr) -> Option<String> {
    if let Some(lit) = literal_text(expr) {
        return lit;
    }
    id_function_call(expr).map(|_| generate_id())
}

/// Column DEFAULT as stored in the schema record: literal text, or the call
/// text of an id generator.
pub fn default_text(expr: &Expr) -> Option<String> {
    if let Some(lit) = literal_text(expr) {
        return lit;
    }
    if let Some(name) = id_function_call(expr) {
        return Some(format!("{name}()"));
    }
    Some(expr.to_string())
}

/// Resolves a stored DEFAULT to the value an INSERT should use.
pub fn resolve_default(default: &str) -> String {
    match default.strip_suffix("()") {
        Some(name) if is_id_function(name) => generate_id(),
        _ => default.to_string(),
    }
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(id) => Some(id.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|id| id.value.clone()),
        Expr::Nested(inner) => column_name(inner),
        _ => None,
    }
}

/// Converts a WHERE expression into a [`Predicate`].
///
/// Understood shapes: `col = lit`, `col <> lit` (either operand order),
/// parentheses and AND/OR. Anything else becomes [`Predicate::Always`], so an
/// unsupported condition lets every row through instead of failing.
pub fn where_predicate(expr: &Expr) -> Predicate {
    match expr {
        Expr::Nested(inner) => where_predicate(inner),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Predicate::And(
                Box::new(where_predicate(left)),
                Box::new(where_predicate(right)),
            ),
            BinaryOperator::Or => Predicate::Or(
                Box::new(where_predicate(left)),
                Box::new(where_predicate(right)),
            ),
            BinaryOperator::Eq | BinaryOperator::NotEq => {
                let pair = match (column_name(left), literal_text(right)) {
                    (Some(col), Some(lit)) => Some((col, lit)),
                    _ => match (literal_text(left), column_name(right)) {
                        (Some(lit), Some(col)) => Some((col, lit)),
                        _ => None,
                    },
                };
                match (pair, op) {
                    (Some((col, lit)), BinaryOperator::Eq) => Predicate::Eq(col, lit),
                    (Some((col, lit)), _) => Predicate::NotEq(col, lit),
                    (None, _) => Predicate::Always,
                }
            }
            _ => Predicate::Always,
        },
        _ => Predicate::Always,
    }
}
