// Run output table
//
// Layout, 8 columns wide:
//   Data Collection Duration (s): | <duration>
//   Force Sensor Sample rate (Hz): | <rate>
//   Sample No. | Fx | Fy | Fz | Tx | Ty | Tz | Motor Pos (mm)
//   one row per step

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::calibration::AXIS_LABELS;
use crate::records::StepRecord;

pub const COLUMNS: usize = 8;
pub const SAMPLE_LABEL: &str = "Sample No.";
pub const POSITION_LABEL: &str = "Motor Pos (mm)";
pub const DURATION_LABEL: &str = "Data Collection Duration (s):";
pub const RATE_LABEL: &str = "Force Sensor Sample rate (Hz):";

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write output: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything written to the output file for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunTable {
    pub duration_s: f64,
    pub sample_rate_hz: f64,
    pub records: Vec<StepRecord>,
}

fn padded(mut row: Vec<String>) -> Vec<String> {
    row.resize(COLUMNS, String::new());
    row
}

impl RunTable {
    /// Header rows followed by one row per record
    pub fn rows(&self) -> Vec<Vec<String>> {
        let mut rows = Vec::with_capacity(self.records.len() + 3);
        rows.push(padded(vec![DURATION_LABEL.to_string(), self.duration_s.to_string()]));
        rows.push(padded(vec![RATE_LABEL.to_string(), self.sample_rate_hz.to_string()]));

        let mut labels = vec![SAMPLE_LABEL.to_string()];
        labels.extend(AXIS_LABELS.iter().map(|l| l.to_string()));
        labels.push(POSITION_LABEL.to_string());
        rows.push(labels);

        for record in &self.records {
            let mut row = vec![record.index.to_string()];
            row.extend(record.force.as_array().iter().map(|v| v.to_string()));
            row.push(record.displacement_mm.to_string());
            rows.push(row);
        }
        rows
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), OutputError> {
        let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        for row in self.rows() {
            csv.write_record(&row)?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Write to `path`, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<(), OutputError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| OutputError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let file = std::fs::File::create(path)?;
        self.write_to(file)?;
        info!("Saved {} steps to {}", self.records.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::ForceTorque;

    fn table(n: usize) -> RunTable {
        RunTable {
            duration_s: 1.0,
            sample_rate_hz: 1000.0,
            records: (1..=n)
                .map(|i| StepRecord {
                    index: i,
                    commanded_counts: i as i32 * 29_696,
                    displacement_mm: 2.0 * i as f64,
                    force: ForceTorque::from([i as f64, 0.0, -1.5, 0.0, 0.25, 0.0]),
                })
                .collect(),
        }
    }

    #[test]
    fn test_layout() {
        let rows = table(3).rows();
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|r| r.len() == COLUMNS));
        assert_eq!(rows[0][0], DURATION_LABEL);
        assert_eq!(rows[0][1], "1");
        assert_eq!(rows[1][1], "1000");
        assert_eq!(
            rows[2],
            vec!["Sample No.", "Fx", "Fy", "Fz", "Tx", "Ty", "Tz", "Motor Pos (mm)"]
        );
        assert_eq!(rows[5], vec!["3", "3", "0", "-1.5", "0", "0.25", "0", "6"]);
    }

    #[test]
    fn test_csv_text() {
        let mut out = Vec::new();
        table(1).write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Data Collection Duration (s):,1,,,,,,");
        assert_eq!(lines[3], "1,1,0,-1.5,0,0.25,0,2");
    }

    #[test]
    fn test_save_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Force Data").join("run.csv");
        table(2).save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 5);
    }
}
