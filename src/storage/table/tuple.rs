use serde::{Deserialize, Serialize};

use crate::catalog::value::DataValue;

/// A row of typed values, stored in table pages as a bincode-encoded record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<DataValue>,
}

impl Tuple {
    pub fn new(values: Vec<DataValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[DataValue] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&DataValue> {
        self.values.get(index)
    }

    pub fn into_values(self) -> Vec<DataValue> {
        self.values
    }

    /// Concatenate two tuples (join output).
    pub fn combine(&self, other: &Tuple) -> Tuple {
        let mut values = self.values.clone();
        values.extend(other.values.iter().cloned());
        Tuple::new(values)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&self.values)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        Ok(Self {
            values: bincode::deserialize(bytes)?,
        })
    }
}
