use nalgebra::{DMatrix, Vector2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of columns in the numeric trajectory table:
/// `frame, time, pos_x, pos_y, err_x, err_y`.
pub const TRAJECTORY_COLUMNS: usize = 6;

#[derive(Debug, Error, PartialEq)]
pub enum TrajectoryError {
    #[error("Trajectory contains no samples")]
    Empty,

    #[error("Expected {expected} columns but found {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("Non-finite value in row {row}")]
    NonFinite { row: usize },

    #[error("Negative localization error in row {row}")]
    NegativeError { row: usize },

    #[error("Invalid frame index in row {row}")]
    InvalidFrame { row: usize },

    #[error("Row {row} is not sorted by time")]
    Unsorted { row: usize },
}

/// A single localized observation of a particle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Frame index in the source movie.
    pub frame: u32,
    /// Acquisition time of the frame.
    pub time: f64,
    /// Localized position.
    pub position: Vector2<f64>,
    /// Localization error (one standard deviation per axis).
    pub error: Vector2<f64>,
}

impl TrackPoint {
    pub fn new(frame: u32, time: f64, position: Vector2<f64>, error: Vector2<f64>) -> Self {
        Self {
            frame,
            time,
            position,
            error,
        }
    }
}

/// An immutable, validated particle trajectory sorted by time.
///
/// Frames may skip indices, but samples are always in ascending time order
/// and every value is finite with non-negative localization error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    points: Vec<TrackPoint>,
}

impl Trajectory {
    pub fn new(points: Vec<TrackPoint>) -> Result<Self, TrajectoryError> {
        if points.is_empty() {
            return Err(TrajectoryError::Empty);
        }

        for (row, p) in points.iter().enumerate() {
            let finite = p.time.is_finite()
                && p.position.iter().all(|v| v.is_finite())
                && p.error.iter().all(|v| v.is_finite());
            if !finite {
                return Err(TrajectoryError::NonFinite { row });
            }
            if p.error.iter().any(|&e| e < 0.0) {
                return Err(TrajectoryError::NegativeError { row });
            }
            if row > 0 && p.time < points[row - 1].time {
                return Err(TrajectoryError::Unsorted { row });
            }
        }

        Ok(Self { points })
    }

    /// Builds a trajectory from a numeric table with one row per sample and
    /// the column order `frame, time, pos_x, pos_y, err_x, err_y`.
    pub fn from_matrix(table: &DMatrix<f64>) -> Result<Self, TrajectoryError> {
        if table.ncols() != TRAJECTORY_COLUMNS {
            return Err(TrajectoryError::ColumnCount {
                expected: TRAJECTORY_COLUMNS,
                found: table.ncols(),
            });
        }

        let points = table
            .row_iter()
            .enumerate()
            .map(|(row, r)| {
                let frame = r[0];
                if !frame.is_finite() || frame < 0.0 || frame.fract() != 0.0 || frame > u32::MAX as f64 {
                    return Err(TrajectoryError::InvalidFrame { row });
                }
                Ok(TrackPoint::new(
                    frame as u32,
                    r[1],
                    Vector2::new(r[2], r[3]),
                    Vector2::new(r[4], r[5]),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(points)
    }

    /// Inverse of [`Trajectory::from_matrix`].
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.points.len(), TRAJECTORY_COLUMNS, |i, j| {
            let p = &self.points[i];
            match j {
                0 => p.frame as f64,
                1 => p.time,
                2 => p.position.x,
                3 => p.position.y,
                4 => p.error.x,
                _ => p.error.y,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn frames(&self) -> impl Iterator<Item = u32> + '_ {
        self.points.iter().map(|p| p.frame)
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.time)
    }

    pub fn start_time(&self) -> f64 {
        self.points[0].time
    }
}

impl<'de> Deserialize<'de> for Trajectory {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            points: Vec<TrackPoint>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Trajectory::new(raw.points).map_err(serde::de::Error::custom)
    }
}
