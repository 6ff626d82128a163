//! Depth x length score table for finished runs.

use std::collections::BTreeMap;

use niah_core::ResultRecord;

/// Keep only the records of one results version.
pub fn of_version(mut records: Vec<ResultRecord>, version: u32) -> Vec<ResultRecord> {
    records.retain(|r| r.version == version);
    records
}

/// Average score per (depth, length) cell.
#[derive(Debug, Default)]
pub struct ScoreGrid {
    pub lengths: Vec<usize>,
    pub depths: Vec<f64>,
    cells: BTreeMap<(u64, usize), (u32, usize)>,
}

// Depths are keyed by their scaled integer value so the map stays ordered.
fn depth_key(depth: f64) -> u64 {
    (depth * 1000.0).round().max(0.0) as u64
}

impl ScoreGrid {
    pub fn from_records(records: &[ResultRecord]) -> Self {
        let mut grid = Self::default();
        for r in records {
            let cell = grid
                .cells
                .entry((depth_key(r.depth_percent), r.context_length))
                .or_insert((0, 0));
            cell.0 += u32::from(r.score);
            cell.1 += 1;
            if !grid.lengths.contains(&r.context_length) {
                grid.lengths.push(r.context_length);
            }
            if !grid.depths.iter().any(|&d| depth_key(d) == depth_key(r.depth_percent)) {
                grid.depths.push(r.depth_percent);
            }
        }
        grid.lengths.sort_unstable();
        grid.depths.sort_by(|a, b| a.total_cmp(b));
        grid
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, context_length: usize, depth_percent: f64) -> Option<f64> {
        self.cells
            .get(&(depth_key(depth_percent), context_length))
            .map(|&(sum, n)| f64::from(sum) / n as f64)
    }

    /// Mean over every stored trial.
    pub fn mean(&self) -> Option<f64> {
        let (sum, n) = self
            .cells
            .values()
            .fold((0u32, 0usize), |(s, c), &(sum, n)| (s + sum, c + n));
        (n > 0).then(|| f64::from(sum) / n as f64)
    }

    pub fn trials(&self) -> usize {
        self.cells.values().map(|&(_, n)| n).sum()
    }

    pub fn render(&self) -> String {
        let mut out = format!("{:>8}", "depth%");
        for len in &self.lengths {
            out.push_str(&format!(" {len:>7}"));
        }
        out.push('\n');
        for &depth in &self.depths {
            out.push_str(&format!("{depth:>8.1}"));
            for &len in &self.lengths {
                match self.get(len, depth) {
                    Some(score) => out.push_str(&format!(" {score:>7.1}")),
                    None => out.push_str(&format!(" {:>7}", "-")),
                }
            }
            out.push('\n');
        }
        if let Some(mean) = self.mean() {
            out.push_str(&format!(
                "\nmean score: {mean:.2} / 10 over {} trials\n",
                self.trials()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(len: usize, depth: f64, score: u8) -> ResultRecord {
        versioned(len, depth, score, 1)
    }

    fn versioned(len: usize, depth: f64, score: u8, version: u32) -> ResultRecord {
        ResultRecord {
            model: "m".into(),
            context_length: len,
            depth_percent: depth,
            version,
            needle: "n".into(),
            model_response: "r".into(),
            score,
            test_duration_seconds: 1.0,
            test_timestamp_utc: "2024-01-01 00:00:00+0000".into(),
        }
    }

    #[test]
    fn test_grid_axes_sorted() {
        let grid = ScoreGrid::from_records(&[
            record(2000, 50.0, 10),
            record(1000, 0.0, 4),
            record(1000, 50.0, 6),
        ]);
        assert_eq!(grid.lengths, vec![1000, 2000]);
        assert_eq!(grid.depths, vec![0.0, 50.0]);
        assert_eq!(grid.get(1000, 0.0), Some(4.0));
        assert_eq!(grid.get(2000, 0.0), None);
    }

    #[test]
    fn test_duplicate_records_average_in_cell() {
        let grid = ScoreGrid::from_records(&[record(1000, 50.0, 10), record(1000, 50.0, 5)]);
        assert_eq!(grid.get(1000, 50.0), Some(7.5));
        assert_eq!(grid.trials(), 2);
    }

    #[test]
    fn test_versions_kept_apart() {
        let records = vec![
            versioned(1000, 50.0, 10, 1),
            versioned(1000, 50.0, 0, 2),
            versioned(2000, 50.0, 4, 2),
        ];
        let v1 = ScoreGrid::from_records(&of_version(records.clone(), 1));
        assert_eq!(v1.get(1000, 50.0), Some(10.0));
        assert_eq!(v1.trials(), 1);

        let v2 = ScoreGrid::from_records(&of_version(records, 2));
        assert_eq!(v2.get(1000, 50.0), Some(0.0));
        assert_eq!(v2.mean(), Some(2.0));
    }

    #[test]
    fn test_mean_and_render() {
        let grid = ScoreGrid::from_records(&[record(1000, 0.0, 10), record(2000, 0.0, 0)]);
        assert_eq!(grid.mean(), Some(5.0));
        let table = grid.render();
        assert!(table.contains("1000"));
        assert!(table.contains("mean score: 5.00 / 10 over 2 trials"));
    }

    #[test]
    fn test_empty() {
        let grid = ScoreGrid::from_records(&[]);
        assert!(grid.is_empty());
        assert_eq!(grid.mean(), None);
    }
}
