use nalgebra::DMatrix;
use serde::Serialize;
use std::cmp::Ordering;

/// Summary of one column of posterior samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub mean: f64,
    pub std_dev: f64,
    /// 2.5% quantile.
    pub lower: f64,
    /// 97.5% quantile.
    pub upper: f64,
}

/// Normalized frequency histogram of one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub centers: Vec<f64>,
    /// Fraction of samples per bin; sums to one.
    pub frequency: Vec<f64>,
}

fn sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Linear-interpolation quantile of already sorted data.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - lo as f64;
            sorted[lo] + frac * (sorted[hi] - sorted[lo])
        }
    }
}

pub fn summarize_column(values: impl Iterator<Item = f64>) -> ColumnSummary {
    let data = sorted(values);
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let var = if data.len() > 1 {
        data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    ColumnSummary {
        mean,
        std_dev: var.sqrt(),
        lower: quantile(&data, 0.025),
        upper: quantile(&data, 0.975),
    }
}

/// Per-column summaries of a `samples × parameters` matrix.
pub fn summarize(samples: &DMatrix<f64>) -> Vec<ColumnSummary> {
    samples
        .column_iter()
        .map(|c| summarize_column(c.iter().copied()))
        .collect()
}

/// Histogram with Sturges' bin count, `1 + ⌈log₂ n⌉`.
pub fn histogram(values: impl Iterator<Item = f64>) -> Histogram {
    let data: Vec<f64> = values.collect();
    if data.is_empty() {
        return Histogram {
            centers: Vec::new(),
            frequency: Vec::new(),
        };
    }

    let bins = 1 + (data.len() as f64).log2().ceil() as usize;
    let (min, max) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let width = (max - min) / bins as f64;

    let mut counts = vec![0usize; bins];
    for &v in &data {
        let idx = if width > 0.0 {
            (((v - min) / width) as usize).min(bins - 1)
        } else {
            0
        };
        counts[idx] += 1;
    }

    let total = data.len() as f64;
    Histogram {
        centers: (0..bins).map(|i| min + (i as f64 + 0.5) * width).collect(),
        frequency: counts.into_iter().map(|c| c as f64 / total).collect(),
    }
}

pub fn histograms(samples: &DMatrix<f64>) -> Vec<Histogram> {
    samples
        .column_iter()
        .map(|c| histogram(c.iter().copied()))
        .collect()
}
