use crate::RowId;
use crate::table::Frame;
use anyhow::Context;

/// Rows of one read, keyed by id, with numeric fields in configured order.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    ids: Vec<RowId>,
    fields: Vec<(String, Vec<f32>)>,
}

impl Batch {
    pub fn new(ids: Vec<RowId>, fields: Vec<(String, Vec<f32>)>) -> anyhow::Result<Self> {
        fields
            .iter()
            .find(|(_, values)| values.len() != ids.len())
            .map_or(Ok(()), |(name, values)| {
                Err(anyhow::anyhow!(
                    "field {} has {} values for {} ids",
                    name,
                    values.len(),
                    ids.len()
                ))
            })?;
        Ok(Self { ids, fields })
    }

    /// Project a scanned frame onto `id_field` and `fields`.
    pub fn from_frame(frame: &Frame, id_field: &str, fields: &[String]) -> anyhow::Result<Self> {
        let ids = frame
            .column(id_field)
            .with_context(|| format!("batch has no id field {}", id_field))?
            .ints()
            .with_context(|| format!("id field {} is not an integer column", id_field))?
            .to_vec();
        let fields = fields
            .iter()
            .map(|name| {
                frame
                    .column(name)
                    .with_context(|| format!("batch has no field {}", name))?
                    .floats()
                    .with_context(|| format!("field {} is not numeric", name))
                    .map(|values| (name.clone(), values))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Self::new(ids, fields)
    }

    pub fn ids(&self) -> &[RowId] {
        &self.ids
    }
    pub fn len(&self) -> usize {
        self.ids.len()
    }
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
    pub fn fields(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.fields
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }
    pub fn field(&self, name: &str) -> Option<&[f32]> {
        self.fields()
            .find(|(n, _)| *n == name)
            .map(|(_, values)| values)
    }
}
