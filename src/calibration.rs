// Force/torque calibration
//
// The transducer maker supplies a 6x6 matrix mapping the six bias-corrected
// gauge voltages to Fx, Fy, Fz, Tx, Ty, Tz.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis};
use serde::Serialize;
use tracing::info;

/// Number of calibrated axes
pub const AXES: usize = 6;

pub const AXIS_LABELS: [&str; AXES] = ["Fx", "Fy", "Fz", "Tx", "Ty", "Tz"];

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("Failed to read calibration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Calibration line {line}: '{token}' is not a number")]
    Parse { line: usize, token: String },

    #[error("Calibration matrix must be 6x6, got {rows}x{cols}")]
    Dimensions { rows: usize, cols: usize },

    #[error("Calibration expects {expected} channels, got {actual}")]
    ChannelCount { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, CalibrationError>;

/// One calibrated force/torque reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ForceTorque {
    pub fx: f64,
    pub fy: f64,
    pub fz: f64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
}

impl ForceTorque {
    pub fn as_array(&self) -> [f64; AXES] {
        [self.fx, self.fy, self.fz, self.tx, self.ty, self.tz]
    }
}

impl From<[f64; AXES]> for ForceTorque {
    fn from(v: [f64; AXES]) -> Self {
        Self {
            fx: v[0],
            fy: v[1],
            fz: v[2],
            tx: v[3],
            ty: v[4],
            tz: v[5],
        }
    }
}

/// Calibration matrix, constant for a run
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    matrix: Array2<f64>,
}

impl Calibration {
    pub fn new(matrix: Array2<f64>) -> Result<Self> {
        let (rows, cols) = matrix.dim();
        if rows != AXES || cols != AXES {
            return Err(CalibrationError::Dimensions { rows, cols });
        }
        Ok(Self { matrix })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let calibration = Self::parse(&text)?;
        info!("Loaded calibration matrix from {}", path.display());
        Ok(calibration)
    }

    /// Whitespace-separated rows. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rows: Vec<Vec<f64>> = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let content = line.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let row = content
                .split_whitespace()
                .map(|token| {
                    token.parse::<f64>().map_err(|_| CalibrationError::Parse {
                        line: n + 1,
                        token: token.to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }

        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            let widest = rows.iter().map(Vec::len).max().unwrap_or(0);
            return Err(CalibrationError::Dimensions {
                rows: rows.len(),
                cols: widest,
            });
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let matrix = Array2::from_shape_vec((rows.len(), cols), flat).map_err(|_| {
            CalibrationError::Dimensions {
                rows: rows.len(),
                cols,
            }
        })?;
        Self::new(matrix)
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Number of input channels the matrix expects
    pub fn channels(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn check_channels(&self, actual: usize) -> Result<()> {
        if actual != self.channels() {
            return Err(CalibrationError::ChannelCount {
                expected: self.channels(),
                actual,
            });
        }
        Ok(())
    }

    /// `M x (raw - bias)` for a single reading
    pub fn apply(&self, raw: &Array1<f64>, bias: &Array1<f64>) -> Result<ForceTorque> {
        self.check_channels(raw.len())?;
        self.check_channels(bias.len())?;
        let out = self.matrix.dot(&(raw - bias));
        Ok(ForceTorque::from([out[0], out[1], out[2], out[3], out[4], out[5]]))
    }

    /// `M x (raw - bias)` for every column of `raw` (channels x readings)
    pub fn apply_batch(&self, raw: &Array2<f64>, bias: &Array1<f64>) -> Result<Array2<f64>> {
        self.check_channels(raw.nrows())?;
        self.check_channels(bias.len())?;
        let corrected = raw - &bias.view().insert_axis(Axis(1));
        Ok(self.matrix.dot(&corrected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    // Matrix supplied with transducer FT21484
    const FT21484: &str = "\
-0.25125 -0.06105 1.17338 -13.52482 -0.47675 14.42734
-1.00959 16.23421 0.48377 -7.75925 0.49090 -8.31992
25.07049 -0.43117 25.14917 -0.09450 25.11196 -0.27838
-0.01317 0.19581 -0.72139 -0.09435 0.72986 -0.10509
0.83684 -0.00962 -0.43756 0.16328 -0.41280 -0.17187
0.02547 -0.43748 0.03185 -0.41796 0.02164 -0.44538
";

    #[test]
    fn test_parse_matrix() {
        let cal = Calibration::parse(FT21484).unwrap();
        assert_eq!(cal.matrix().dim(), (6, 6));
        assert_eq!(cal.matrix()[[2, 0]], 25.07049);
        assert_eq!(cal.matrix()[[5, 5]], -0.44538);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let text = format!("# FT21484\n\n{}\n", FT21484);
        assert!(Calibration::parse(&text).is_ok());
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(matches!(
            Calibration::parse("1 2 3\n4 5 6\n"),
            Err(CalibrationError::Dimensions { rows: 2, cols: 3 })
        ));
        let ragged = FT21484.replacen("-0.25125 ", "", 1);
        assert!(matches!(
            Calibration::parse(&ragged),
            Err(CalibrationError::Dimensions { .. })
        ));
        assert!(matches!(
            Calibration::parse("1 2 x"),
            Err(CalibrationError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_self_bias_cancels() {
        let cal = Calibration::parse(FT21484).unwrap();
        for bias in [
            array![0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            array![0.12, -0.03, 1.5, -2.25, 0.7, 3.3],
            array![-5.0, 5.0, -5.0, 5.0, -5.0, 5.0],
        ] {
            let ft = cal.apply(&bias, &bias).unwrap();
            assert_eq!(ft, ForceTorque::default());
        }
    }

    #[test]
    fn test_identity_passes_through_correction() {
        let cal = Calibration::new(Array2::eye(6)).unwrap();
        let raw = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let bias = Array1::from_elem(6, 0.5);
        let ft = cal.apply(&raw, &bias).unwrap();
        assert_eq!(ft.as_array(), [0.5, 1.5, 2.5, 3.5, 4.5, 5.5]);
    }

    #[test]
    fn test_batch_matches_single() {
        let cal = Calibration::parse(FT21484).unwrap();
        let bias = array![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let raw = array![
            [1.0, 0.1, -0.4],
            [2.0, 0.2, 0.0],
            [0.5, 0.3, 0.9],
            [-1.0, 0.4, 0.2],
            [0.0, 0.5, 1.1],
            [0.25, 0.6, -0.7]
        ];
        let batch = cal.apply_batch(&raw, &bias).unwrap();
        assert_eq!(batch.dim(), (6, 3));
        for (col, reading) in raw.columns().into_iter().enumerate() {
            let single = cal.apply(&reading.to_owned(), &bias).unwrap().as_array();
            for axis in 0..AXES {
                assert!((batch[[axis, col]] - single[axis]).abs() < 1e-12);
            }
        }
        // Second column is the bias itself
        assert!(batch.column(1).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_channel_count_mismatch() {
        let cal = Calibration::new(Array2::eye(6)).unwrap();
        let raw = Array1::zeros(12);
        assert!(matches!(
            cal.apply(&raw, &raw),
            Err(CalibrationError::ChannelCount { expected: 6, actual: 12 })
        ));
    }
}
