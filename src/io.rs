use csv::ReaderBuilder;
use ndarray::Array2;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row};
use std::fs::File;
use std::path::Path;

use crate::error::{DitherError, Result};
use crate::geom::{DataMatrix, PointSet};

/// Loads numeric tables from CSV or Parquet into a [`DataMatrix`].
pub struct DataLoader;

impl DataLoader {
    /// Load a CSV file with a header row and numeric columns.
    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<DataMatrix> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut width = None;
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let row = record
                .iter()
                .map(|field| field.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()?;
            match width {
                Some(expected) if expected != row.len() => {
                    return Err(DitherError::InvalidData(format!(
                        "record {line} has {} columns, expected {expected}",
                        row.len()
                    )));
                }
                Some(_) => {}
                None => width = Some(row.len()),
            }
            rows.push(row);
        }
        to_matrix(rows, width.unwrap_or(0))
    }

    /// Load a Parquet file whose columns are all integers or floats.
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<DataMatrix> {
        let reader = SerializedFileReader::new(File::open(path)?)?;
        let rows = reader
            .get_row_iter(None)?
            .collect::<std::result::Result<Vec<Row>, _>>()?;
        let width = rows.first().map_or(0, Row::len);

        let mut values = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(DitherError::InvalidData(format!(
                    "row {i} has {} columns, expected {width}",
                    row.len()
                )));
            }
            let parsed = row
                .get_column_iter()
                .enumerate()
                .map(|(j, (_, field))| field_value(j, field))
                .collect::<Result<Vec<_>>>()?;
            values.push(parsed);
        }
        to_matrix(values, width)
    }

    /// Load `path` as a point set, picking the reader from the extension
    /// (`.parquet`/`.pq`, anything else is CSV).
    pub fn load_points<P: AsRef<Path>>(path: P) -> Result<PointSet> {
        let path = path.as_ref();
        let matrix = match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("parquet" | "pq") => Self::load_parquet(path)?,
            _ => Self::load_csv(path)?,
        };
        Ok(PointSet::from_matrix(&matrix))
    }
}

fn field_value(column: usize, field: &Field) -> Result<f64> {
    let value = match field {
        Field::Double(v) => *v,
        Field::Float(v) => f64::from(*v),
        Field::Int(v) => f64::from(*v),
        Field::Long(v) => *v as f64,
        Field::Short(v) => f64::from(*v),
        Field::Byte(v) => f64::from(*v),
        Field::UInt(v) => f64::from(*v),
        Field::ULong(v) => *v as f64,
        Field::UShort(v) => f64::from(*v),
        Field::UByte(v) => f64::from(*v),
        Field::Null => {
            return Err(DitherError::InvalidData(format!(
                "column {column} contains NULL"
            )))
        }
        other => {
            return Err(DitherError::InvalidData(format!(
                "column {column} holds a non-numeric value: {other:?}"
            )))
        }
    };
    Ok(value)
}

fn to_matrix(rows: Vec<Vec<f64>>, width: usize) -> Result<DataMatrix> {
    let n = rows.len();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n, width), flat).map_err(|err| {
        DitherError::InvalidData(format!("cannot shape {n}x{width} matrix: {err}"))
    })
}
