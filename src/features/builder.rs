use crate::config::Config;
use crate::table::*;
use crate::*;
use anyhow::Context;
use rayon::prelude::*;

/// Outcome of one feature build.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    /// Every column of the written tables except the id, label included.
    pub columns: Vec<String>,
    pub train: Commit,
    pub test: Commit,
}

impl Features {
    /// Width of the feature vector: every training column but the label.
    pub fn input_size(&self) -> usize {
        self.columns.len().saturating_sub(1)
    }
}

/// Turns a bronze table into temporally split train and test tables.
pub struct FeatureBuilder {
    source: Table,
    train: Table,
    test: Table,
    fraction: f64,
}

impl From<&Config> for FeatureBuilder {
    fn from(config: &Config) -> Self {
        Self::new(
            Table::at(&config.bronze_table),
            Table::at(&config.train_table),
            Table::at(&config.test_table),
        )
    }
}

impl FeatureBuilder {
    pub fn new(source: Table, train: Table, test: Table) -> Self {
        Self {
            source,
            train,
            test,
            fraction: TRAIN_FRACTION,
        }
    }

    /// Read the source, split it and overwrite both destinations.
    /// A failure between the two writes leaves the train table already replaced.
    pub fn build(&self) -> anyhow::Result<Features> {
        let bronze = self
            .source
            .read()
            .with_context(|| format!("reading source {}", self.source.path().display()))?;
        log::info!("{:<32}{:<32}", "read source rows", bronze.rows());
        let training = Self::prepare(bronze)?;
        let columns = training
            .names()
            .iter()
            .filter(|n| n.as_str() != ID_FIELD)
            .cloned()
            .collect::<Vec<_>>();
        let (train, test) = Self::split(&training, self.fraction);
        let options = WriteOptions::default();
        let train = self
            .train
            .overwrite(&train, options)
            .with_context(|| format!("writing {}", self.train.path().display()))?;
        let test = self
            .test
            .overwrite(&test, options)
            .with_context(|| format!("writing {}", self.test.path().display()))?;
        log::info!("{:<32}{:<32}", "wrote train rows", train.rows);
        log::info!("{:<32}{:<32}", "wrote test rows", test.rows);
        Ok(Features {
            columns,
            train,
            test,
        })
    }

    /// Check required columns, order rows by timestamp (stable),
    /// drop categorical columns and append a 1-based sequential id.
    pub fn prepare(bronze: Frame) -> anyhow::Result<Frame> {
        bronze
            .require(CATEGORICAL_COLUMNS.iter().copied().chain([TARGET_COLUMN]))
            .context("source table is missing required columns")?;
        let order = bronze
            .column(TIMESTAMP_COLUMN)
            .map(Self::chronological)
            .context("source table has no timestamp")?;
        let ids = (1..=order.len() as RowId).collect::<Vec<_>>();
        bronze
            .take(&order)
            .drop(&CATEGORICAL_COLUMNS)
            .with(ID_FIELD, Column::Int(ids))
    }

    /// Row positions sorted by timestamp. Ties keep source order.
    fn chronological(timestamps: &Column) -> Vec<usize> {
        let mut order = (0..timestamps.len()).collect::<Vec<_>>();
        match timestamps {
            Column::Int(t) => order.par_sort_by_key(|&i| t[i]),
            Column::Float(t) => order.par_sort_by(|&a, &b| t[a].total_cmp(&t[b])),
            Column::Text(t) => order.par_sort_by(|&a, &b| t[a].cmp(&t[b])),
        }
        order
    }

    /// Leading `fraction` of rows (by id) for training, the rest for testing.
    pub fn split(training: &Frame, fraction: f64) -> (Frame, Frame) {
        let n = training.rows();
        let cut = ((n as f64 * fraction) as usize).min(n);
        let head = (0..cut).collect::<Vec<_>>();
        let tail = (cut..n).collect::<Vec<_>>();
        (training.take(&head), training.take(&tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bronze(timestamps: Vec<i64>) -> Frame {
        let n = timestamps.len();
        let text = |p: &str| Column::Text((0..n).map(|i| format!("{}{}", p, i)).collect());
        Frame::default()
            .with("device_id", text("d"))
            .unwrap()
            .with("trip_id", text("t"))
            .unwrap()
            .with("timestamp", Column::Int(timestamps))
            .unwrap()
            .with("factory_id", text("f"))
            .unwrap()
            .with("model_id", text("m"))
            .unwrap()
            .with("airflow_rate", Column::Float((0..n).map(|i| i as f64).collect()))
            .unwrap()
            .with("defect", Column::Int((0..n).map(|i| (i % 2) as i64).collect()))
            .unwrap()
    }

    #[test]
    fn prepares() {
        let frame = FeatureBuilder::prepare(bronze(vec![30, 10, 20, 10])).unwrap();
        assert_eq!(
            frame.names(),
            &["airflow_rate".to_string(), "defect".to_string(), "id".to_string()]
        );
        assert_eq!(
            frame.column("id").unwrap(),
            &Column::Int(vec![1, 2, 3, 4])
        );
        // stable: the two rows at t=10 keep their source order (1 then 3)
        assert_eq!(
            frame.column("airflow_rate").unwrap(),
            &Column::Float(vec![1., 3., 2., 0.])
        );
    }

    #[test]
    fn requires_columns() {
        let frame = bronze(vec![1, 2]).drop(&["factory_id"]);
        let err = FeatureBuilder::prepare(frame).unwrap_err();
        assert!(format!("{:#}", err).contains("factory_id"));
        let frame = bronze(vec![1, 2]).drop(&["defect"]);
        assert!(FeatureBuilder::prepare(frame).is_err());
    }

    #[test]
    fn splits() {
        for n in [0usize, 1, 3, 10, 97] {
            let frame = FeatureBuilder::prepare(bronze((0..n as i64).rev().collect())).unwrap();
            let (train, test) = FeatureBuilder::split(&frame, TRAIN_FRACTION);
            assert_eq!(train.rows() + test.rows(), n);
            assert_eq!(train.rows(), (n as f64 * 0.7) as usize);
            let a = train.column("id").unwrap().ints().unwrap();
            let b = test.column("id").unwrap().ints().unwrap();
            assert!(a.windows(2).all(|w| w[1] == w[0] + 1));
            assert!(b.windows(2).all(|w| w[1] == w[0] + 1));
            assert!(a.iter().all(|i| b.iter().all(|j| i < j)));
        }
    }

    #[test]
    fn builds() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::catalog(dir.path(), "default");
        Table::at(&config.bronze_table)
            .overwrite(&bronze((0..20).rev().collect()), WriteOptions::default())
            .unwrap();
        let features = FeatureBuilder::from(&config).build().unwrap();
        assert_eq!(features.columns, vec!["airflow_rate", "defect"]);
        assert_eq!(features.input_size(), 1);
        assert_eq!((features.train.rows, features.test.rows), (14, 6));
        let test = Table::at(&config.test_table).read().unwrap();
        assert_eq!(
            test.column("id").unwrap(),
            &Column::Int((15..=20).collect())
        );
        // rebuilding overwrites rather than appends
        let again = FeatureBuilder::from(&config).build().unwrap();
        assert_eq!(again.train.version, 1);
        assert_eq!(Table::at(&config.train_table).read().unwrap().rows(), 14);
    }

    #[test]
    fn missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::catalog(dir.path(), "default");
        assert!(FeatureBuilder::from(&config).build().is_err());
        assert!(!Table::at(&config.train_table).exists());
    }
}
