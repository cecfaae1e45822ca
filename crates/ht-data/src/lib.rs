pub mod loaders;

pub use loaders::*;

use std::path::{Path, PathBuf};

use ht_types::{DataError, DataSplit, HtResult};

/// File stem of the training table inside the data directory.
pub const TRAIN_STEM: &str = "train";
/// File stem of the validation table inside the data directory.
pub const VALID_STEM: &str = "val";

/// Loads the already-prepared train/validation split from a directory.
///
/// The directory holds `train.parquet` (or `train.csv`) and `val.parquet`
/// (or `val.csv`). Parquet wins when both formats are present.
#[derive(Debug, Clone)]
pub struct SplitLoader {
    pub data_path: PathBuf,
    pub target: Option<String>,
}

impl SplitLoader {
    pub fn new<P: AsRef<Path>>(data_path: P) -> Self {
        Self {
            data_path: data_path.as_ref().to_path_buf(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }

    fn resolve(&self, stem: &str) -> HtResult<PathBuf> {
        [DataFormat::Parquet, DataFormat::Csv]
            .iter()
            .map(|format| self.data_path.join(format!("{}.{}", stem, format.extension())))
            .find(|path| path.exists())
            .ok_or_else(|| {
                DataError::SourceNotFound(format!(
                    "{}/{}.{{parquet,csv}}",
                    self.data_path.display(),
                    stem
                ))
                .into()
            })
    }

    pub fn load(&self) -> HtResult<DataSplit> {
        let loader = TableLoader::new();
        let target = self.target.as_deref();

        let train = loader.load(self.resolve(TRAIN_STEM)?)?.into_dataset(target)?;
        let valid = loader.load(self.resolve(VALID_STEM)?)?.into_dataset(target)?;

        tracing::info!(
            "Loaded split: {} training rows, {} validation rows, {} features",
            train.n_samples(),
            valid.n_samples(),
            train.n_features()
        );
        DataSplit::new(train, valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_parquet(path: &Path, x: Vec<f64>, y: Vec<f64>) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Float64, false),
            Field::new("y", DataType::Float64, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Float64Array::from(x)),
            Arc::new(Float64Array::from(y)),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
        let mut writer = ArrowWriter::try_new(fs::File::create(path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn loads_csv_split() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("train.csv"), "x,y\n1,2\n2,4\n3,6\n").unwrap();
        fs::write(dir.path().join("val.csv"), "x,y\n4,8\n").unwrap();

        let split = SplitLoader::new(dir.path()).load().unwrap();
        assert_eq!(split.train.n_samples(), 3);
        assert_eq!(split.valid.n_samples(), 1);
        assert_eq!(split.valid.targets.to_vec(), vec![8.0]);
    }

    #[test]
    fn missing_validation_file_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("train.csv"), "x,y\n1,2\n").unwrap();

        let err = SplitLoader::new(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains("val."));
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("train.csv"), "a,y\n1,2\n").unwrap();
        fs::write(dir.path().join("val.csv"), "b,y\n1,2\n").unwrap();

        assert!(SplitLoader::new(dir.path()).load().is_err());
    }

    #[test]
    fn parquet_wins_over_csv() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("train.csv"), "x,y\n1,2\n").unwrap();
        fs::write(dir.path().join("val.csv"), "x,y\n4,8\n").unwrap();
        write_parquet(&dir.path().join("train.parquet"), vec![1.0, 2.0], vec![-1.0, -2.0]);

        let split = SplitLoader::new(dir.path()).load().unwrap();
        assert_eq!(split.train.targets.to_vec(), vec![-1.0, -2.0]);
        assert_eq!(split.valid.targets.to_vec(), vec![8.0]);
    }

    #[test]
    fn corrupt_parquet_is_not_skipped_for_csv() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("train.parquet"), b"not a parquet file").unwrap();
        fs::write(dir.path().join("train.csv"), "x,y\n1,2\n").unwrap();
        fs::write(dir.path().join("val.csv"), "x,y\n4,8\n").unwrap();

        let err = SplitLoader::new(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains("Parquet"), "unexpected error: {err}");
    }
}
