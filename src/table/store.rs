use super::*;
use crate::Version;
use anyhow::Context;
use arrow_array::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReader;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

/// Directory holding one JSON commit per version.
const LOG_DIR: &str = "_log";

/// Options applied to a single write.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Allow deletion vectors. This format has none, so only `false` is accepted.
    pub deletion_vectors: bool,
}

/// A versioned table rooted at a directory:
/// parquet data files next to an append-only `_log/` of JSON commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    path: PathBuf,
}

impl Table {
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn exists(&self) -> bool {
        self.versions().map_or(false, |v| !v.is_empty())
    }

    /// Committed versions in ascending order. Empty if the table was never written.
    pub fn versions(&self) -> anyhow::Result<Vec<Version>> {
        let log = self.path.join(LOG_DIR);
        if !log.exists() {
            return Ok(Vec::new());
        }
        let mut versions = std::fs::read_dir(&log)
            .with_context(|| format!("listing {}", log.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map_or(false, |e| e == "json"))
            .filter_map(|path| path.file_stem()?.to_str()?.parse::<Version>().ok())
            .collect::<Vec<_>>();
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn commit(&self, version: Version) -> anyhow::Result<Commit> {
        let path = self.entry(version);
        let file = File::open(&path)
            .with_context(|| format!("table {} has no version {}", self.path.display(), version))?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("parsing commit {}", path.display()))
    }

    pub fn latest(&self) -> anyhow::Result<Commit> {
        self.versions()?
            .last()
            .copied()
            .with_context(|| format!("table {} does not exist", self.path.display()))
            .and_then(|v| self.commit(v))
    }

    pub fn history(&self) -> anyhow::Result<Vec<Commit>> {
        self.versions()?
            .into_iter()
            .map(|v| self.commit(v))
            .collect()
    }

    /// Replace the visible contents of the table with `frame` as a new version.
    /// Older versions stay readable through [`Table::read_version`].
    pub fn overwrite(&self, frame: &Frame, options: WriteOptions) -> anyhow::Result<Commit> {
        anyhow::ensure!(
            !options.deletion_vectors,
            "table {} cannot be written with deletion vectors",
            self.path.display()
        );
        anyhow::ensure!(!frame.names().is_empty(), "cannot write a frame without columns");
        std::fs::create_dir_all(self.path.join(LOG_DIR))
            .with_context(|| format!("creating table {}", self.path.display()))?;
        let version = self.versions()?.last().map_or(0, |v| v + 1);
        let name = format!("part-{:05}-{}.parquet", version, uuid::Uuid::now_v7().simple());
        self.flush(&name, frame)?;
        let commit = Commit {
            version,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            operation: if version == 0 {
                Operation::Create
            } else {
                Operation::Overwrite
            },
            schema: frame.schema(),
            files: vec![name],
            rows: frame.rows(),
            properties: BTreeMap::from([(
                DELETION_VECTORS.to_string(),
                options.deletion_vectors.to_string(),
            )]),
        };
        let path = self.entry(version);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("version {} of {} already committed", version, self.path.display()))?;
        serde_json::to_writer_pretty(file, &commit)
            .with_context(|| format!("writing commit {}", path.display()))?;
        log::debug!("{:<32}{}", self.path.display(), commit);
        Ok(commit)
    }

    /// Read the latest version in full.
    pub fn read(&self) -> anyhow::Result<Frame> {
        self.materialize(&self.latest()?)
    }

    /// Read a historical version in full.
    pub fn read_version(&self, version: Version) -> anyhow::Result<Frame> {
        self.materialize(&self.commit(version)?)
    }

    /// Stream the latest version as frames of exactly `batch_size` rows
    /// (the last one may be shorter), projected onto `columns` in that order.
    pub fn scan(&self, columns: &[String], batch_size: usize) -> anyhow::Result<Scan> {
        anyhow::ensure!(batch_size > 0, "batch size must be positive");
        let commit = self.latest()?;
        columns
            .iter()
            .find(|c| commit.field(c).is_none())
            .map_or(Ok(()), |c| {
                Err(anyhow::anyhow!(
                    "table {} has no column {}",
                    self.path.display(),
                    c
                ))
            })?;
        Ok(Scan {
            files: commit
                .files
                .iter()
                .map(|f| self.path.join(f))
                .collect::<Vec<_>>()
                .into_iter(),
            columns: columns.to_vec(),
            batch_size,
            reader: None,
            pending: Frame::default(),
        })
    }
}

impl Table {
    fn entry(&self, version: Version) -> PathBuf {
        self.path.join(LOG_DIR).join(format!("{:020}.json", version))
    }

    fn flush(&self, name: &str, frame: &Frame) -> anyhow::Result<()> {
        let path = self.path.join(name);
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let batch = RecordBatch::try_from(frame)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    fn materialize(&self, commit: &Commit) -> anyhow::Result<Frame> {
        let names = commit.schema.iter().map(|f| f.name.clone()).collect::<Vec<_>>();
        let mut frame = Frame::empty(&commit.schema);
        for file in commit.files.iter() {
            let reader = open(&self.path.join(file), &names, crate::BATCH_SIZE)?;
            for batch in reader {
                frame.extend(Frame::try_from(&batch?)?.select(&names)?)?;
            }
        }
        Ok(frame)
    }
}

fn open(path: &Path, columns: &[String], batch_size: usize) -> anyhow::Result<ParquetRecordBatchReader> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet footer of {}", path.display()))?;
    let indices = columns
        .iter()
        .map(|c| {
            builder
                .schema()
                .index_of(c)
                .with_context(|| format!("{} has no column {}", path.display(), c))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
    Ok(builder
        .with_projection(mask)
        .with_batch_size(batch_size)
        .build()?)
}

/// Lazy, fixed-size batch stream over the data files of one commit.
pub struct Scan {
    files: std::vec::IntoIter<PathBuf>,
    columns: Vec<String>,
    batch_size: usize,
    reader: Option<ParquetRecordBatchReader>,
    pending: Frame,
}

impl Scan {
    fn pull(&mut self) -> anyhow::Result<Option<Frame>> {
        loop {
            if let Some(reader) = self.reader.as_mut() {
                match reader.next() {
                    Some(batch) => return Ok(Some(Frame::try_from(&batch?)?.select(&self.columns)?)),
                    None => self.reader = None,
                }
            }
            match self.files.next() {
                Some(path) => self.reader = Some(open(&path, &self.columns, self.batch_size)?),
                None => return Ok(None),
            }
        }
    }
}

impl Iterator for Scan {
    type Item = anyhow::Result<Frame>;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pending.rows() >= self.batch_size {
                let tail = self.pending.split_off(self.batch_size);
                return Some(Ok(std::mem::replace(&mut self.pending, tail)));
            }
            match self.pull() {
                Ok(Some(frame)) => {
                    if let Err(e) = self.pending.extend(frame) {
                        return Some(Err(e));
                    }
                }
                Ok(None) if self.pending.is_empty() => return None,
                Ok(None) => return Some(Ok(std::mem::take(&mut self.pending))),
                Err(e) => {
                    self.files = Vec::new().into_iter();
                    self.reader = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: i64) -> Frame {
        Frame::default()
            .with("id", Column::Int((1..=n).collect()))
            .unwrap()
            .with("x", Column::Float((0..n).map(|i| i as f64 / 10.).collect()))
            .unwrap()
            .with("tag", Column::Text((0..n).map(|i| format!("t{}", i)).collect()))
            .unwrap()
    }

    #[test]
    fn missing() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::at(dir.path().join("nope"));
        assert!(!table.exists());
        assert!(table.read().is_err());
        assert!(table.versions().unwrap().is_empty());
    }

    #[test]
    fn overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::at(dir.path().join("t"));
        let v0 = table.overwrite(&frame(5), WriteOptions::default()).unwrap();
        let v1 = table.overwrite(&frame(3), WriteOptions::default()).unwrap();
        assert_eq!((v0.version, v0.operation), (0, Operation::Create));
        assert_eq!((v1.version, v1.operation), (1, Operation::Overwrite));
        assert!(!v1.deletion_vectors());
        assert_eq!(table.read().unwrap(), frame(3));
        assert_eq!(table.read_version(0).unwrap(), frame(5));
        assert_eq!(table.history().unwrap().len(), 2);
    }

    #[test]
    fn rejects_deletion_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::at(dir.path().join("t"));
        let options = WriteOptions {
            deletion_vectors: true,
        };
        assert!(table.overwrite(&frame(2), options).is_err());
        assert!(!table.exists());
    }

    #[test]
    fn empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::at(dir.path().join("t"));
        table.overwrite(&frame(0), WriteOptions::default()).unwrap();
        let read = table.read().unwrap();
        assert_eq!(read.rows(), 0);
        assert_eq!(read.names().len(), 3);
    }

    #[test]
    fn scans() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::at(dir.path().join("t"));
        table.overwrite(&frame(10), WriteOptions::default()).unwrap();
        let columns = vec!["x".to_string(), "id".to_string()];
        let batches = table
            .scan(&columns, 4)
            .unwrap()
            .collect::<anyhow::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(
            batches.iter().map(Frame::rows).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert!(batches.iter().all(|b| b.names() == columns.as_slice()));
        let ids = batches
            .iter()
            .flat_map(|b| b.column("id").unwrap().ints().unwrap().to_vec())
            .collect::<Vec<_>>();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn scan_unknown_column() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::at(dir.path().join("t"));
        table.overwrite(&frame(2), WriteOptions::default()).unwrap();
        assert!(table.scan(&["y".to_string()], 4).is_err());
    }
}
