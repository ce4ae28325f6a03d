use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Possible data types for values in a tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Eq for DataValue {}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // type discriminant first to avoid collisions between types
        match self {
            DataValue::Null => 0.hash(state),
            DataValue::Integer(i) => {
                1.hash(state);
                i.hash(state);
            }
            DataValue::Float(f) => {
                2.hash(state);
                f.to_bits().hash(state);
            }
            DataValue::Text(s) => {
                3.hash(state);
                s.hash(state);
            }
            DataValue::Boolean(b) => {
                4.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "NULL"),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Text(s) => write!(f, "{}", s),
            DataValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl DataValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            DataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

fn type_rank(value: &DataValue) -> u8 {
    match value {
        DataValue::Null => 0,
        DataValue::Boolean(_) => 1,
        DataValue::Integer(_) => 2,
        DataValue::Float(_) => 2, // numeric values compare across types
        DataValue::Text(_) => 3,
    }
}

/// Total ordering over values for sorting and joins. NULL sorts first;
/// integers and floats compare numerically; values of different
/// non-comparable types order by type.
pub fn compare_values(a: &DataValue, b: &DataValue) -> Ordering {
    match (a, b) {
        (DataValue::Null, DataValue::Null) => Ordering::Equal,
        (DataValue::Null, _) => Ordering::Less,
        (_, DataValue::Null) => Ordering::Greater,
        (DataValue::Integer(x), DataValue::Integer(y)) => x.cmp(y),
        (DataValue::Float(x), DataValue::Float(y)) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (DataValue::Integer(x), DataValue::Float(y)) => {
            (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (DataValue::Float(x), DataValue::Integer(y)) => {
            x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
        }
        (DataValue::Text(x), DataValue::Text(y)) => x.cmp(y),
        (DataValue::Boolean(x), DataValue::Boolean(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_cross_type_comparison() {
        assert_eq!(
            compare_values(&DataValue::Integer(2), &DataValue::Float(2.5)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&DataValue::Float(3.0), &DataValue::Integer(3)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(
            compare_values(&DataValue::Null, &DataValue::Integer(-100)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&DataValue::Text("a".into()), &DataValue::Null),
            Ordering::Greater
        );
    }

    #[test]
    fn test_text_ordering() {
        assert_eq!(
            compare_values(&DataValue::Text("apple".into()), &DataValue::Text("banana".into())),
            Ordering::Less
        );
    }
}
