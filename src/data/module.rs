use super::*;
use crate::table::Scan;
use crate::table::Table;
use crate::*;
use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;

/// A numeric column read into every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
}

impl From<&str> for FieldSpec {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Train/validation/test loaders over a pair of table paths.
///
/// Validation reads the test table, the same as [`DataModule::test_dataloader`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataModule {
    pub train_path: String,
    pub test_path: String,
    pub id_field: String,
    pub fields: Vec<FieldSpec>,
    pub batch_size: usize,
}

impl DataModule {
    pub fn new(train_path: &str, test_path: &str, fields: &[String]) -> Self {
        Self {
            train_path: train_path.to_string(),
            test_path: test_path.to_string(),
            id_field: ID_FIELD.to_string(),
            fields: fields.iter().map(|f| FieldSpec::from(f.as_str())).collect(),
            batch_size: BATCH_SIZE,
        }
    }
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn dataloader(&self, path: &str) -> Loader {
        Loader {
            table: Table::at(path),
            id_field: self.id_field.clone(),
            fields: self.fields.iter().map(|f| f.name.clone()).collect(),
            batch_size: self.batch_size,
            rank: 0,
            world: 1,
        }
    }
    pub fn train_dataloader(&self) -> Loader {
        self.dataloader(&self.train_path)
    }
    pub fn val_dataloader(&self) -> Loader {
        self.dataloader(&self.test_path)
    }
    pub fn test_dataloader(&self) -> Loader {
        self.dataloader(&self.test_path)
    }
}

/// Restartable batch source over one table. Every iteration reopens the
/// table and streams it; nothing is cached between iterations.
#[derive(Debug, Clone)]
pub struct Loader {
    table: Table,
    id_field: String,
    fields: Vec<String>,
    batch_size: usize,
    rank: usize,
    world: usize,
}

impl Loader {
    /// Restrict to every `world`-th batch starting at `rank`.
    pub fn shard(mut self, rank: usize, world: usize) -> Self {
        assert!(rank < world, "rank {} outside world of {}", rank, world);
        self.rank = rank;
        self.world = world;
        self
    }
    pub fn table(&self) -> &Table {
        &self.table
    }
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
    /// Rows visible to this shard, from the commit log alone.
    pub fn rows(&self) -> anyhow::Result<usize> {
        let total = self.table.latest()?.rows;
        let batches = total.div_ceil(self.batch_size);
        Ok((0..batches)
            .filter(|b| b % self.world == self.rank)
            .map(|b| (total - b * self.batch_size).min(self.batch_size))
            .sum())
    }
    pub fn iter(&self) -> Batches {
        Batches {
            loader: self.clone(),
            scan: None,
            index: 0,
            failed: false,
        }
    }
}

impl<'a> IntoIterator for &'a Loader {
    type Item = anyhow::Result<Batch>;
    type IntoIter = Batches;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass over a [`Loader`]. The table is opened on the first pull.
pub struct Batches {
    loader: Loader,
    scan: Option<Scan>,
    index: usize,
    failed: bool,
}

impl Batches {
    fn open(&mut self) -> anyhow::Result<&mut Scan> {
        if self.scan.is_none() {
            let columns = std::iter::once(self.loader.id_field.clone())
                .chain(self.loader.fields.iter().cloned())
                .collect::<Vec<_>>();
            self.scan = Some(self.loader.table.scan(&columns, self.loader.batch_size)?);
        }
        self.scan.as_mut().context("table scan unavailable")
    }
}

impl Iterator for Batches {
    type Item = anyhow::Result<Batch>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let (rank, world) = (self.loader.rank, self.loader.world);
        loop {
            let frame = match self.open() {
                Err(e) => Err(e),
                Ok(scan) => scan.next()?,
            };
            let index = self.index;
            self.index += 1;
            match frame {
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                Ok(_) if index % world != rank => continue,
                Ok(frame) => {
                    return Some(Batch::from_frame(
                        &frame,
                        &self.loader.id_field,
                        &self.loader.fields,
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;
    use crate::table::Frame;
    use crate::table::WriteOptions;

    fn module(dir: &std::path::Path, rows: i64) -> DataModule {
        let frame = Frame::default()
            .with("temperature", Column::Float((0..rows).map(|i| i as f64).collect()))
            .unwrap()
            .with("defect", Column::Int((0..rows).map(|i| i % 2).collect()))
            .unwrap()
            .with("id", Column::Int((1..=rows).collect()))
            .unwrap();
        let train = dir.join("train");
        let test = dir.join("test");
        Table::at(&train).overwrite(&frame, WriteOptions::default()).unwrap();
        Table::at(&test).overwrite(&frame.take(&[0, 1, 2]), WriteOptions::default()).unwrap();
        DataModule::new(
            train.to_str().unwrap(),
            test.to_str().unwrap(),
            &["temperature".into(), "defect".into()],
        )
        .with_batch_size(4)
    }

    #[test]
    fn batches() {
        let dir = tempfile::tempdir().unwrap();
        let data = module(dir.path(), 10);
        let batches = data
            .train_dataloader()
            .iter()
            .collect::<anyhow::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        for batch in batches.iter() {
            assert_eq!(batch.names().collect::<Vec<_>>(), vec!["temperature", "defect"]);
            assert_eq!(batch.ids().len(), batch.len());
        }
    }

    #[test]
    fn restartable() {
        let dir = tempfile::tempdir().unwrap();
        let loader = module(dir.path(), 6).train_dataloader();
        let first = loader.iter().count();
        let second = (&loader).into_iter().count();
        assert_eq!((first, second), (2, 2));
    }

    #[test]
    fn aliases_validation() {
        let dir = tempfile::tempdir().unwrap();
        let data = module(dir.path(), 10);
        assert_eq!(data.val_dataloader().table(), data.test_dataloader().table());
        assert_eq!(data.val_dataloader().rows().unwrap(), 3);
    }

    #[test]
    fn shards() {
        let dir = tempfile::tempdir().unwrap();
        let data = module(dir.path(), 10);
        let ids = |rank| {
            data.train_dataloader()
                .shard(rank, 2)
                .iter()
                .map(|b| b.unwrap().ids().to_vec())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(0), vec![vec![1, 2, 3, 4], vec![9, 10]]);
        assert_eq!(ids(1), vec![vec![5, 6, 7, 8]]);
        assert_eq!(data.train_dataloader().shard(0, 2).rows().unwrap(), 6);
        assert_eq!(data.train_dataloader().shard(1, 2).rows().unwrap(), 4);
    }

    #[test]
    fn missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataModule::new(
            dir.path().join("a").to_str().unwrap(),
            dir.path().join("b").to_str().unwrap(),
            &["x".into()],
        );
        let mut batches = data.train_dataloader().iter();
        assert!(batches.next().unwrap().is_err());
        assert!(batches.next().is_none());
    }

    #[test]
    fn missing_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = module(dir.path(), 4);
        data.fields.push(FieldSpec::from("humidity"));
        assert!(data.train_dataloader().iter().next().unwrap().is_err());
    }
}
