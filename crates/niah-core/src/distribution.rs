//! Grid axes: context lengths and needle depths.
//!
//! Rounding follows round-half-to-even so that generated grids match the
//! points produced by earlier numpy-based runs and resume cleanly.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthSpacing {
    #[default]
    Linear,
    Sigmoid,
}

impl fmt::Display for DepthSpacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Sigmoid => write!(f, "sigmoid"),
        }
    }
}

impl std::str::FromStr for DepthSpacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "sigmoid" | "logistic" => Ok(Self::Sigmoid),
            _ => Err(format!(
                "invalid depth spacing: {s} (expected 'linear' or 'sigmoid')"
            )),
        }
    }
}

/// `num` evenly spaced values over `[start, stop]`, both ends included.
fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut values: Vec<f64> = (0..num).map(|i| start + step * i as f64).collect();
            values[num - 1] = stop;
            values
        }
    }
}

/// Evenly spaced token targets between `min` and `max` inclusive.
pub fn context_lengths(min: usize, max: usize, num: usize) -> Vec<usize> {
    linspace(min as f64, max as f64, num)
        .into_iter()
        .map(|v| v.round_ties_even() as usize)
        .collect()
}

/// Depth percentages between `min` and `max`.
///
/// Linear spacing yields whole percentages. Sigmoid spacing maps each
/// linear point through [`logistic`], which clusters depths around the
/// middle of the document and keeps exact 0 and 100 endpoints.
pub fn depth_percents(min: f64, max: f64, num: usize, spacing: DepthSpacing) -> Vec<f64> {
    let points = linspace(min, max, num);
    match spacing {
        DepthSpacing::Linear => points.into_iter().map(f64::round_ties_even).collect(),
        DepthSpacing::Sigmoid => points.into_iter().map(logistic).collect(),
    }
}

/// Logistic curve centered on 50 with slope 0.1, rounded to 3 decimals.
pub fn logistic(x: f64) -> f64 {
    const L: f64 = 100.0;
    const X0: f64 = 50.0;
    const K: f64 = 0.1;

    if x == 0.0 {
        return 0.0;
    }
    if x == 100.0 {
        return 100.0;
    }
    let y = L / (1.0 + (-K * (x - X0)).exp());
    (y * 1000.0).round_ties_even() / 1000.0
}
