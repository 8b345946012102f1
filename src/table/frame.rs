use super::*;
use anyhow::Context;
use arrow_array::ArrayRef;
use arrow_array::RecordBatch;
use arrow_schema::Field;
use arrow_schema::Schema;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;

/// Name and type of one column, as recorded in the commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub kind: Kind,
}

/// In-memory columnar rows with named, equally long columns.
/// Column order is insertion order and is preserved through every operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Frame {
    /// Zero-row frame with the given columns.
    pub fn empty(schema: &[FieldMeta]) -> Self {
        Self {
            names: schema.iter().map(|f| f.name.clone()).collect(),
            columns: schema.iter().map(|f| Column::empty(f.kind)).collect(),
        }
    }
    pub fn names(&self) -> &[String] {
        &self.names
    }
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }
    pub fn rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }
    pub fn schema(&self) -> Vec<FieldMeta> {
        self.columns()
            .map(|(name, column)| FieldMeta {
                name: name.to_string(),
                kind: column.kind(),
            })
            .collect()
    }

    /// Append a column. Lengths must agree and names must be unique.
    pub fn with(mut self, name: &str, column: Column) -> anyhow::Result<Self> {
        anyhow::ensure!(
            self.column(name).is_none(),
            "duplicate column {}",
            name
        );
        anyhow::ensure!(
            self.columns.is_empty() || column.len() == self.rows(),
            "column {} has {} rows, frame has {}",
            name,
            column.len(),
            self.rows()
        );
        self.names.push(name.to_string());
        self.columns.push(column);
        Ok(self)
    }

    /// Fail on the first missing column.
    pub fn require<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> anyhow::Result<()> {
        names
            .into_iter()
            .find(|name| self.column(name).is_none())
            .map_or(Ok(()), |name| {
                Err(anyhow::anyhow!("missing required column {}", name))
            })
    }

    /// Remove the named columns, ignoring names that are absent.
    pub fn drop(self, names: &[&str]) -> Self {
        let (names, columns) = self
            .names
            .into_iter()
            .zip(self.columns)
            .filter(|(name, _)| !names.contains(&name.as_str()))
            .unzip();
        Self { names, columns }
    }

    /// Keep only the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> anyhow::Result<Self> {
        names.iter().try_fold(Self::default(), |frame, name| {
            let column = self
                .column(name)
                .with_context(|| format!("missing column {}", name))?;
            frame.with(name, column.clone())
        })
    }

    /// Gather rows by position across every column.
    pub fn take(&self, indices: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
        }
    }

    /// Split at row `at`, keeping the head and returning the tail.
    pub fn split_off(&mut self, at: usize) -> Self {
        Self {
            names: self.names.clone(),
            columns: self.columns.iter_mut().map(|c| c.split_off(at)).collect(),
        }
    }

    /// Append rows of a frame with the same column names.
    pub fn extend(&mut self, other: Self) -> anyhow::Result<()> {
        if self.names.is_empty() {
            *self = other;
            return Ok(());
        }
        anyhow::ensure!(self.names == other.names, "frames disagree on columns");
        self.columns
            .iter_mut()
            .zip(other.columns)
            .try_for_each(|(a, b)| a.extend(b))
    }

    pub fn arrow_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(
            self.columns()
                .map(|(name, column)| Field::new(name, column.kind().into(), false))
                .collect::<Vec<_>>(),
        ))
    }
}

impl TryFrom<&Frame> for RecordBatch {
    type Error = anyhow::Error;
    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        let arrays = frame.columns.iter().map(ArrayRef::from).collect();
        Ok(RecordBatch::try_new(frame.arrow_schema(), arrays)?)
    }
}

impl TryFrom<&RecordBatch> for Frame {
    type Error = anyhow::Error;
    fn try_from(batch: &RecordBatch) -> Result<Self, Self::Error> {
        batch
            .schema()
            .fields()
            .iter()
            .zip(batch.columns())
            .try_fold(Self::default(), |frame, (field, array)| {
                let column = Column::try_from(array)
                    .with_context(|| format!("decoding column {}", field.name()))?;
                frame.with(field.name(), column)
            })
    }
}
