use crate::utils::error::{AddonsError, Result};
use std::io::{Read, Write};
use std::str::FromStr;

/// Nx3 array of x, y, z coordinates. Row order is significant and is kept by
/// every transform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Points {
    rows: Vec<[f64; 3]>,
}

impl Points {
    pub fn new(rows: Vec<[f64; 3]>) -> Self {
        Self { rows }
    }

    /// Build from loosely shaped rows, rejecting anything that is not Nx3.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self> {
        rows.iter()
            .enumerate()
            .map(|(i, row)| match row.as_ref() {
                [x, y, z] => Ok([*x, *y, *z]),
                other => Err(AddonsError::ShapeError {
                    row: i,
                    got: other.len(),
                }),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[[f64; 3]] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<[f64; 3]> {
        self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f64; 3]> {
        self.rows.iter()
    }

    pub fn map_rows(mut self, f: impl Fn([f64; 3]) -> [f64; 3]) -> Self {
        for row in &mut self.rows {
            *row = f(*row);
        }
        self
    }

    pub fn offset(self, by: [f64; 3]) -> Self {
        self.map_rows(|p| [p[0] + by[0], p[1] + by[1], p[2] + by[2]])
    }

    pub fn scale(self, by: [f64; 3]) -> Self {
        self.map_rows(|p| [p[0] * by[0], p[1] * by[1], p[2] * by[2]])
    }

    pub fn scale_all(self, by: f64) -> Self {
        self.scale([by, by, by])
    }

    /// Max absolute difference between corresponding coordinates.
    pub fn max_abs_diff(&self, other: &Points) -> Option<f64> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.rows
                .iter()
                .zip(&other.rows)
                .flat_map(|(a, b)| (0..3).map(move |i| (a[i] - b[i]).abs()))
                .fold(0.0, f64::max),
        )
    }

    /// Read `x,y,z` rows. A non-numeric first row is treated as a header.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        for (i, record) in csv_reader.records().enumerate() {
            let record = record?;
            let parsed: std::result::Result<Vec<f64>, _> =
                record.iter().map(str::parse::<f64>).collect();
            match parsed {
                Ok(values) => rows.push(values),
                Err(_) if i == 0 => continue,
                Err(e) => {
                    return Err(AddonsError::validation(format!(
                        "row {} is not numeric: {}",
                        i, e
                    )))
                }
            }
        }
        Self::from_rows(&rows)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["x", "y", "z"])?;
        for p in &self.rows {
            csv_writer.write_record(p.iter().map(f64::to_string))?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

impl From<Vec<[f64; 3]>> for Points {
    fn from(rows: Vec<[f64; 3]>) -> Self {
        Self::new(rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    #[default]
    Nanometers,
    Microns,
}

impl Units {
    pub fn nanometers_per_unit(&self) -> f64 {
        match self {
            Self::Nanometers => 1.0,
            Self::Microns => 1000.0,
        }
    }
}

impl FromStr for Units {
    type Err = AddonsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nm" | "nanometers" | "nanometres" => Ok(Self::Nanometers),
            "um" | "µm" | "micron" | "microns" => Ok(Self::Microns),
            other => Err(AddonsError::UnitError {
                message: format!("unknown unit '{}', expected nm or microns", other),
            }),
        }
    }
}

impl std::fmt::Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nanometers => write!(f, "nm"),
            Self::Microns => write!(f, "microns"),
        }
    }
}

/// Points declared as nanometres but all below 1000 are almost certainly microns.
pub fn check_declared_units(points: &Points, declared: Units) -> Result<()> {
    if declared == Units::Nanometers
        && !points.is_empty()
        && points.iter().all(|p| p.iter().all(|v| *v < 1000.0))
    {
        return Err(AddonsError::UnitError {
            message: "points were declared as nm but every coordinate is below 1000; \
                      they look like microns"
                .to_string(),
        });
    }
    Ok(())
}
