use super::*;
use crate::Version;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Table property recording whether deletion vectors may be written.
/// Readers of this format never apply deletion vectors, so it is always "false".
pub const DELETION_VECTORS: &str = "enableDeletionVectors";

/// Kind of change a commit made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Overwrite,
}

/// One entry of the append-only commit log.
/// The latest commit fully describes the visible table: a reader never
/// needs to replay history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub version: Version,
    pub timestamp: u64,
    pub operation: Operation,
    pub schema: Vec<FieldMeta>,
    pub files: Vec<String>,
    pub rows: usize,
    pub properties: BTreeMap<String, String>,
}

impl Commit {
    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.schema.iter().find(|f| f.name == name)
    }
    pub fn deletion_vectors(&self) -> bool {
        self.properties
            .get(DELETION_VECTORS)
            .map_or(false, |v| v == "true")
    }
}

impl std::fmt::Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<12}{:<12}{:<16}{}",
            format!("v{}", self.version),
            format!("{:?}", self.operation),
            format!("{} rows", self.rows),
            self.schema
                .iter()
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        )
    }
}
