use std::fs;
use std::path::Path;

use arrow::array::{Array, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use ht_types::{DataError, Dataset, HtResult};
use ndarray::{Array1, Array2};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

/// Supported on-disk table formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Parquet,
}

impl DataFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Parquet => "parquet",
        }
    }

    /// Detect file format from extension
    pub fn detect<P: AsRef<Path>>(file_path: P) -> Option<DataFormat> {
        let extension = file_path.as_ref().extension()?.to_str()?;
        match extension.to_lowercase().as_str() {
            "csv" => Some(DataFormat::Csv),
            "parquet" => Some(DataFormat::Parquet),
            _ => None,
        }
    }
}

/// A fully numeric table read from disk, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl NumericTable {
    /// Split the table into features and the named target column.
    ///
    /// When `target` is `None` the last column is the target.
    pub fn into_dataset(self, target: Option<&str>) -> HtResult<Dataset> {
        if self.columns.len() < 2 {
            return Err(DataError::InvalidFormat {
                message: format!(
                    "need at least one feature and one target column, got {}",
                    self.columns.len()
                ),
            }
            .into());
        }

        let target_idx = match target {
            Some(name) => self
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| DataError::ColumnNotFound {
                    column: name.to_string(),
                })?,
            None => self.columns.len() - 1,
        };

        let feature_names: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != target_idx)
            .map(|(_, c)| c.clone())
            .collect();
        let target_name = self.columns[target_idx].clone();

        let n_rows = self.rows.len();
        let n_features = feature_names.len();
        let mut flat = Vec::with_capacity(n_rows * n_features);
        let mut targets = Vec::with_capacity(n_rows);
        for row in &self.rows {
            for (i, value) in row.iter().enumerate() {
                if i == target_idx {
                    targets.push(*value);
                } else {
                    flat.push(*value);
                }
            }
        }

        let features = Array2::from_shape_vec((n_rows, n_features), flat).map_err(|e| {
            DataError::InvalidFormat {
                message: e.to_string(),
            }
        })?;

        Dataset::new(feature_names, target_name, features, Array1::from_vec(targets))
    }
}

/// Loader for the prepared numeric tables.
#[derive(Debug, Default)]
pub struct TableLoader;

impl TableLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load<P: AsRef<Path>>(&self, file_path: P) -> HtResult<NumericTable> {
        let path = file_path.as_ref();
        match DataFormat::detect(path) {
            Some(DataFormat::Csv) => self.load_csv_file(path),
            Some(DataFormat::Parquet) => self.load_parquet_file(path),
            None => Err(DataError::InvalidFormat {
                message: format!("unsupported file extension: {}", path.display()),
            }
            .into()),
        }
    }

    /// Load a CSV file with a header row; every cell must parse as a number.
    pub fn load_csv_file<P: AsRef<Path>>(&self, file_path: P) -> HtResult<NumericTable> {
        let path = file_path.as_ref();
        tracing::info!("Loading CSV data from: {}", path.display());

        if !path.exists() {
            return Err(DataError::SourceNotFound(path.display().to_string()).into());
        }

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to open CSV file {}: {}", path.display(), e),
            })?;

        let columns: Vec<String> = rdr
            .headers()
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read CSV headers: {}", e),
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (line_num, result) in rdr.records().enumerate() {
            let line = line_num + 2;
            let record = result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read CSV record at line {}: {}", line, e),
            })?;

            if record.len() != columns.len() {
                return Err(DataError::ParseError {
                    message: format!(
                        "line {} has {} fields, expected {}",
                        line,
                        record.len(),
                        columns.len()
                    ),
                }
                .into());
            }

            let row = record
                .iter()
                .zip(&columns)
                .map(|(field, column)| {
                    field.trim().parse::<f64>().map_err(|_| DataError::ParseError {
                        message: format!("line {}: column {} is not numeric: {:?}", line, column, field),
                    })
                })
                .collect::<Result<Vec<f64>, DataError>>()?;
            rows.push(row);
        }

        tracing::info!("Loaded {} rows from CSV file: {}", rows.len(), path.display());
        Ok(NumericTable { columns, rows })
    }

    /// Load a Parquet file; numeric columns of any width are widened to f64.
    pub fn load_parquet_file<P: AsRef<Path>>(&self, file_path: P) -> HtResult<NumericTable> {
        let path = file_path.as_ref();
        tracing::info!("Loading Parquet data from: {}", path.display());

        if !path.exists() {
            return Err(DataError::SourceNotFound(path.display().to_string()).into());
        }

        let file = fs::File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            DataError::LoadingFailed {
                message: format!("Failed to create Parquet reader for {}: {}", path.display(), e),
            }
        })?;
        let columns: Vec<String> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        let reader = builder.build().map_err(|e| DataError::LoadingFailed {
            message: format!("Failed to build Parquet reader: {}", e),
        })?;

        let mut rows = Vec::new();
        for batch_result in reader {
            let batch = batch_result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read Parquet batch: {}", e),
            })?;
            Self::append_batch_rows(&batch, &columns, &mut rows)?;
        }

        tracing::info!("Loaded {} rows from Parquet file: {}", rows.len(), path.display());
        Ok(NumericTable { columns, rows })
    }

    fn append_batch_rows(
        batch: &RecordBatch,
        columns: &[String],
        rows: &mut Vec<Vec<f64>>,
    ) -> HtResult<()> {
        let mut numeric = Vec::with_capacity(batch.num_columns());
        for (idx, column) in batch.columns().iter().enumerate() {
            let widened = cast(column.as_ref(), &DataType::Float64).map_err(|e| DataError::InvalidFormat {
                message: format!("column {} is not numeric: {}", columns[idx], e),
            })?;
            let values = widened
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| DataError::InvalidFormat {
                    message: format!("column {} did not widen to f64", columns[idx]),
                })?
                .clone();
            if values.null_count() > 0 {
                return Err(DataError::InvalidFormat {
                    message: format!("column {} contains nulls", columns[idx]),
                }
                .into());
            }
            numeric.push(values);
        }

        for row_idx in 0..batch.num_rows() {
            rows.push(numeric.iter().map(|col| col.value(row_idx)).collect());
        }
        Ok(())
    }
}
