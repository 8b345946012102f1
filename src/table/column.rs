use anyhow::Context;
use arrow_array::Array;
use arrow_array::ArrayRef;
use arrow_array::Float64Array;
use arrow_array::Int64Array;
use arrow_array::StringArray;
use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::types::Float64Type;
use arrow_array::types::Int32Type;
use arrow_array::types::Int64Type;
use arrow_schema::DataType;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;

/// Physical type of a stored column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    Float64,
    Int64,
    Utf8,
}

impl From<Kind> for DataType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Float64 => DataType::Float64,
            Kind::Int64 => DataType::Int64,
            Kind::Utf8 => DataType::Utf8,
        }
    }
}

impl TryFrom<&DataType> for Kind {
    type Error = anyhow::Error;
    fn try_from(dtype: &DataType) -> Result<Self, Self::Error> {
        match dtype {
            DataType::Float64 | DataType::Float32 => Ok(Self::Float64),
            DataType::Int64 | DataType::Int32 => Ok(Self::Int64),
            DataType::Utf8 | DataType::LargeUtf8 => Ok(Self::Utf8),
            other => Err(anyhow::anyhow!("unsupported column type {}", other)),
        }
    }
}

/// Owned column values. Nulls are not representable.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Text(Vec<String>),
}

impl Column {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Float(_) => Kind::Float64,
            Self::Int(_) => Kind::Int64,
            Self::Text(_) => Kind::Utf8,
        }
    }
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn empty(kind: Kind) -> Self {
        match kind {
            Kind::Float64 => Self::Float(Vec::new()),
            Kind::Int64 => Self::Int(Vec::new()),
            Kind::Utf8 => Self::Text(Vec::new()),
        }
    }

    /// Gather rows by position.
    pub fn take(&self, indices: &[usize]) -> Self {
        match self {
            Self::Float(v) => Self::Float(indices.iter().map(|&i| v[i]).collect()),
            Self::Int(v) => Self::Int(indices.iter().map(|&i| v[i]).collect()),
            Self::Text(v) => Self::Text(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    /// Split at `at`, keeping the head and returning the tail.
    pub fn split_off(&mut self, at: usize) -> Self {
        match self {
            Self::Float(v) => Self::Float(v.split_off(at)),
            Self::Int(v) => Self::Int(v.split_off(at)),
            Self::Text(v) => Self::Text(v.split_off(at)),
        }
    }

    pub fn extend(&mut self, other: Self) -> anyhow::Result<()> {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => Ok(a.extend(b)),
            (Self::Int(a), Self::Int(b)) => Ok(a.extend(b)),
            (Self::Text(a), Self::Text(b)) => Ok(a.extend(b)),
            (a, b) => Err(anyhow::anyhow!(
                "cannot append {:?} values to {:?} column",
                b.kind(),
                a.kind()
            )),
        }
    }

    /// Numeric values narrowed to f32, or None for text columns.
    pub fn floats(&self) -> Option<Vec<f32>> {
        match self {
            Self::Float(v) => Some(v.iter().map(|&x| x as f32).collect()),
            Self::Int(v) => Some(v.iter().map(|&x| x as f32).collect()),
            Self::Text(_) => None,
        }
    }

    pub fn ints(&self) -> Option<&[i64]> {
        match self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&Column> for ArrayRef {
    fn from(column: &Column) -> Self {
        match column {
            Column::Float(v) => Arc::new(Float64Array::from(v.clone())),
            Column::Int(v) => Arc::new(Int64Array::from(v.clone())),
            Column::Text(v) => Arc::new(StringArray::from(v.clone())),
        }
    }
}

impl TryFrom<&ArrayRef> for Column {
    type Error = anyhow::Error;
    fn try_from(array: &ArrayRef) -> Result<Self, Self::Error> {
        anyhow::ensure!(array.null_count() == 0, "column contains nulls");
        match array.data_type() {
            DataType::Float64 => Ok(Self::Float(
                array.as_primitive::<Float64Type>().values().to_vec(),
            )),
            DataType::Float32 => Ok(Self::Float(
                array
                    .as_primitive::<Float32Type>()
                    .values()
                    .iter()
                    .map(|&x| x as f64)
                    .collect(),
            )),
            DataType::Int64 => Ok(Self::Int(
                array.as_primitive::<Int64Type>().values().to_vec(),
            )),
            DataType::Int32 => Ok(Self::Int(
                array
                    .as_primitive::<Int32Type>()
                    .values()
                    .iter()
                    .map(|&x| x as i64)
                    .collect(),
            )),
            DataType::Utf8 => Ok(Self::Text(
                array
                    .as_string::<i32>()
                    .iter()
                    .map(|s| s.unwrap_or_default().to_string())
                    .collect(),
            )),
            other => Err(anyhow::anyhow!("unsupported column type {}", other))
                .context("decoding arrow array"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathers() {
        let c = Column::Int(vec![10, 20, 30, 40]);
        assert_eq!(c.take(&[3, 0]), Column::Int(vec![40, 10]));
    }

    #[test]
    fn splits() {
        let mut c = Column::Text(vec!["a".into(), "b".into(), "c".into()]);
        let tail = c.split_off(1);
        assert_eq!(c.len(), 1);
        assert_eq!(tail, Column::Text(vec!["b".into(), "c".into()]));
    }

    #[test]
    fn mismatched() {
        let mut c = Column::Int(vec![1]);
        assert!(c.extend(Column::Float(vec![1.])).is_err());
        assert!(c.extend(Column::Int(vec![2])).is_ok());
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn narrows() {
        assert_eq!(Column::Int(vec![1, 2]).floats(), Some(vec![1., 2.]));
        assert_eq!(Column::Text(vec![]).floats(), None);
    }

    #[test]
    fn arrow() {
        let c = Column::Float(vec![0.5, 1.5]);
        let array = ArrayRef::from(&c);
        assert_eq!(Column::try_from(&array).unwrap(), c);
    }
}
