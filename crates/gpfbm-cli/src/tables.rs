use crate::error::{CliError, Result};
use gpfbm::core::models::trajectory::{TrackPoint, Trajectory};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One CSV row: `frame,time,pos_x,pos_y,err_x,err_y`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct TrajectoryRow {
    frame: u32,
    time: f64,
    pos_x: f64,
    pos_y: f64,
    err_x: f64,
    err_y: f64,
}

impl From<TrajectoryRow> for TrackPoint {
    fn from(row: TrajectoryRow) -> Self {
        TrackPoint::new(
            row.frame,
            row.time,
            Vector2::new(row.pos_x, row.pos_y),
            Vector2::new(row.err_x, row.err_y),
        )
    }
}

impl From<&TrackPoint> for TrajectoryRow {
    fn from(p: &TrackPoint) -> Self {
        Self {
            frame: p.frame,
            time: p.time,
            pos_x: p.position.x,
            pos_y: p.position.y,
            err_x: p.error.x,
            err_y: p.error.y,
        }
    }
}

fn parsing_error(path: &Path, source: impl Into<anyhow::Error>) -> CliError {
    CliError::FileParsing {
        path: path.to_path_buf(),
        source: source.into(),
    }
}

pub fn read_trajectory(path: &Path) -> Result<Trajectory> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)
        .map_err(|e| parsing_error(path, e))?;

    let points = reader
        .deserialize::<TrajectoryRow>()
        .map(|row| row.map(TrackPoint::from).map_err(|e| parsing_error(path, e)))
        .collect::<Result<Vec<_>>>()?;

    Trajectory::new(points).map_err(|e| parsing_error(path, e))
}

pub fn write_trajectory(path: &Path, trajectory: &Trajectory) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| parsing_error(path, e))?;
    for point in trajectory.points() {
        writer
            .serialize(TrajectoryRow::from(point))
            .map_err(|e| parsing_error(path, e))?;
    }
    writer.flush()?;
    Ok(())
}
