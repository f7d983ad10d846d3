//! Conjunctive predicate evaluation shared by scan, join, and delete.

use std::cmp::Ordering;
use corvus_common::meta::get_col;
use corvus_common::{ColMeta, CorvusError, Result, Value};
use corvus_storage::compare_col;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompOp {
    /// Applies the operator to the sign of a comparison.
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Ne => ord != Ordering::Equal,
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Le => ord != Ordering::Greater,
            CompOp::Ge => ord != Ordering::Less,
        }
    }
}

/// A possibly table-qualified column reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ColRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColRef {
    /// Unqualified column reference.
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    /// Table-qualified column reference.
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

/// Right-hand side of a condition: a literal or another column.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Col(ColRef),
}

/// One `lhs OP rhs` term of a conjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub lhs: ColRef,
    pub op: CompOp,
    pub rhs: Operand,
}

impl Condition {
    /// Builds a `col OP literal` condition.
    pub fn with_value(lhs: ColRef, op: CompOp, value: Value) -> Self {
        Self {
            lhs,
            op,
            rhs: Operand::Value(value),
        }
    }

    /// Builds a `col OP col` condition.
    pub fn with_col(lhs: ColRef, op: CompOp, rhs: ColRef) -> Self {
        Self {
            lhs,
            op,
            rhs: Operand::Col(rhs),
        }
    }
}

/// Evaluates a conjunction against one tuple.
///
/// Each term compares a column slice against a typed literal or another
/// column of the same tuple, using the single-column comparator the index
/// uses. Any failing term short-circuits to false.
pub fn eval_conditions(conds: &[Condition], cols: &[ColMeta], tuple: &[u8]) -> Result<bool> {
    for cond in conds {
        let l_col = get_col(cols, cond.lhs.table.as_deref(), &cond.lhs.column)?;
        let l_slice = &tuple[l_col.offset..l_col.offset + l_col.len];

        let ord = match &cond.rhs {
            Operand::Value(value) => {
                if value.col_type() != l_col.col_type {
                    return Err(CorvusError::IncompatibleType {
                        expected: l_col.col_type.to_string(),
                        actual: value.col_type().to_string(),
                    });
                }
                let r_bytes = value.to_bytes(l_col.len);
                compare_col(l_slice, &r_bytes, l_col.col_type)
            }
            Operand::Col(col_ref) => {
                let r_col = get_col(cols, col_ref.table.as_deref(), &col_ref.column)?;
                if r_col.col_type != l_col.col_type {
                    return Err(CorvusError::IncompatibleType {
                        expected: l_col.col_type.to_string(),
                        actual: r_col.col_type.to_string(),
                    });
                }
                let r_slice = &tuple[r_col.offset..r_col.offset + r_col.len];
                compare_col(l_slice, r_slice, l_col.col_type)
            }
        };

        if !cond.op.matches(ord) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvus_common::ColType;

    fn cols() -> Vec<ColMeta> {
        vec![
            ColMeta {
                tab_name: "t".into(),
                name: "a".into(),
                col_type: ColType::Int,
                len: 4,
                offset: 0,
            },
            ColMeta {
                tab_name: "t".into(),
                name: "b".into(),
                col_type: ColType::Int,
                len: 4,
                offset: 4,
            },
        ]
    }

    fn tuple(a: i32, b: i32) -> Vec<u8> {
        let mut buf = a.to_le_bytes().to_vec();
        buf.extend_from_slice(&b.to_le_bytes());
        buf
    }

    #[test]
    fn test_comp_op_matches() {
        assert!(CompOp::Eq.matches(Ordering::Equal));
        assert!(!CompOp::Eq.matches(Ordering::Less));
        assert!(CompOp::Ne.matches(Ordering::Greater));
        assert!(CompOp::Lt.matches(Ordering::Less));
        assert!(CompOp::Le.matches(Ordering::Equal));
        assert!(CompOp::Ge.matches(Ordering::Greater));
        assert!(!CompOp::Gt.matches(Ordering::Equal));
    }

    #[test]
    fn test_empty_conjunction_is_true() {
        assert!(eval_conditions(&[], &cols(), &tuple(1, 2)).unwrap());
    }

    #[test]
    fn test_col_vs_value() {
        let conds = vec![Condition::with_value(
            ColRef::new("a"),
            CompOp::Eq,
            Value::Int(5),
        )];
        assert!(eval_conditions(&conds, &cols(), &tuple(5, 0)).unwrap());
        assert!(!eval_conditions(&conds, &cols(), &tuple(6, 0)).unwrap());
    }

    #[test]
    fn test_col_vs_col() {
        let conds = vec![Condition::with_col(
            ColRef::new("a"),
            CompOp::Lt,
            ColRef::new("b"),
        )];
        assert!(eval_conditions(&conds, &cols(), &tuple(1, 2)).unwrap());
        assert!(!eval_conditions(&conds, &cols(), &tuple(2, 2)).unwrap());
    }

    #[test]
    fn test_conjunction_short_circuits() {
        let conds = vec![
            Condition::with_value(ColRef::new("a"), CompOp::Gt, Value::Int(0)),
            Condition::with_value(ColRef::new("b"), CompOp::Eq, Value::Int(9)),
        ];
        assert!(eval_conditions(&conds, &cols(), &tuple(1, 9)).unwrap());
        assert!(!eval_conditions(&conds, &cols(), &tuple(1, 8)).unwrap());
        assert!(!eval_conditions(&conds, &cols(), &tuple(0, 9)).unwrap());
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let conds = vec![Condition::with_value(
            ColRef::new("a"),
            CompOp::Eq,
            Value::Str("x".into()),
        )];
        assert!(matches!(
            eval_conditions(&conds, &cols(), &tuple(1, 2)),
            Err(CorvusError::IncompatibleType { .. })
        ));
    }

    #[test]
    fn test_unknown_column_is_error() {
        let conds = vec![Condition::with_value(
            ColRef::new("zz"),
            CompOp::Eq,
            Value::Int(1),
        )];
        assert!(matches!(
            eval_conditions(&conds, &cols(), &tuple(1, 2)),
            Err(CorvusError::ColumnNotFound(_))
        ));
    }
}
