use crate::engine::{Row, RowStore, Value};
use crate::error::DbResult;

/// WHERE clause condition evaluated against one row.
///
/// Comparisons are textual: both the stored value and the literal are
/// rendered to text before comparing. A comparison where either side is
/// null or missing never matches.
///
/// `Always` stands in for any predicate shape the SQL layer does not
/// understand, which lets every row through.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Eq(String, Option<String>),
    NotEq(String, Option<String>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Always,
}

impl Predicate {
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::Eq(col, lit) => compare(row, col, lit).unwrap_or(false),
            Predicate::NotEq(col, lit) => compare(row, col, lit).map_or(false, |eq| !eq),
            Predicate::And(l, r) => l.matches(row) && r.matches(row),
            Predicate::Or(l, r) => l.matches(row) || r.matches(row),
            Predicate::Always => true,
        }
    }
}

/// `Some(equal)` when both sides have a value, `None` otherwise.
fn compare(row: &Row, col: &str, lit: &Option<String>) -> Option<bool> {
    let stored = row.get(col).and_then(Value::to_text)?;
    let lit = lit.as_deref()?;
    Some(stored == lit)
}

/// Full scan of `table` with optional filtering and projection.
///
/// ```text
/// row file → scan → WHERE filter → projection → text tuples
/// ```
///
/// Each output tuple holds the text form of `cols` in order; missing or null
/// fields come back as `None`.
pub fn execute_select_scan(
    store: &RowStore,
    table: &str,
    pred: Option<&Predicate>,
    cols: &[String],
) -> DbResult<Vec<Vec<Option<String>>>> {
    let rows = store.scan(table)?;
    Ok(rows
        .iter()
        .filter(|row| pred.map_or(true, |p| p.matches(row)))
        .map(|row| project(row, cols))
        .collect())
}

fn project(row: &Row, cols: &[String]) -> Vec<Option<String>> {
    cols.iter()
        .map(|c| row.get(c).and_then(Value::to_text))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn eq(c: &str, v: &str) -> Predicate {
        Predicate::Eq(c.into(), Some(v.into()))
    }

    #[test]
    fn equality_is_textual() {
        let r = row(&[("id", Value::from("a")), ("n", Value::from(5i64))]);
        assert!(eq("id", "a").matches(&r));
        assert!(eq("n", "5").matches(&r));
        assert!(!eq("n", "5.0").matches(&r));
        assert!(Predicate::NotEq("id".into(), Some("b".into())).matches(&r));
        assert!(!Predicate::NotEq("id".into(), Some("a".into())).matches(&r));
    }

    #[test]
    fn null_sides_never_match() {
        let r = row(&[("id", Value::from("a")), ("x", Value::Null)]);
        assert!(!eq("x", "a").matches(&r));
        assert!(!eq("missing", "a").matches(&r));
        assert!(!Predicate::NotEq("x".into(), Some("a".into())).matches(&r));
        assert!(!Predicate::Eq("id".into(), None).matches(&r));
    }

    #[test]
    fn boolean_composition() {
        let r = row(&[("a", Value::from("1")), ("b", Value::from("2"))]);
        let and = Predicate::And(Box::new(eq("a", "1")), Box::new(eq("b", "3")));
        let or = Predicate::Or(Box::new(eq("a", "1")), Box::new(eq("b", "3")));
        assert!(!and.matches(&r));
        assert!(or.matches(&r));
        assert!(Predicate::Always.matches(&r));
    }

    #[test]
    fn projection_keeps_order_and_nulls() {
        let r = row(&[("a", Value::from("1")), ("c", Value::Null)]);
        let cols = vec!["c".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(project(&r, &cols), vec![None, None, Some("1".to_string())]);
    }
}
