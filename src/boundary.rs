//! Offline decision-boundary search
//!
//! Given a recorded session with `std` (sdNN) and `real_state` columns, the
//! optimizer tries every midpoint between adjacent sorted sdNN values as a
//! threshold and keeps the one whose binarization scores the highest mutual
//! information.

use std::collections::HashMap;
use std::hash::Hash;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PulseError;

/// Cells treated as missing values
const MISSING_MARKERS: &[&str] = &["", "nan", "NaN", "NAN", "NA", "N/A", "NULL", "null", "-nan"];

/// What each candidate binarization is scored against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTarget {
    /// The sdNN sequence itself, each distinct value a label
    #[default]
    Std,
    /// The annotated `real_state` column
    RealState,
}

/// Outcome of a boundary search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryResult {
    /// Best midpoint, `None` when no candidate scored above zero
    pub best_threshold: Option<f64>,
    pub best_score: f64,
    /// sdNN values in file order
    pub std_values: Vec<f64>,
    pub sorted_std_values: Vec<f64>,
    /// `0..n`, the x axis for plotting `std_values`
    pub index_sequence: Vec<usize>,
    pub midpoints: Vec<f64>,
    /// Score of each midpoint, same order as `midpoints`
    pub scores: Vec<f64>,
    pub target: ScoreTarget,
}

/// Mutual-information threshold search
pub struct BoundaryOptimizer;

impl BoundaryOptimizer {
    /// Read the `std` and `real_state` columns of a CSV file
    pub fn load_csv(path: &Path) -> Result<(Vec<f64>, Vec<f64>), PulseError> {
        let file = std::fs::File::open(path)?;
        Self::read_columns(file)
    }

    /// Read the `std` and `real_state` columns, dropping rows where either is missing
    pub fn read_columns<R: Read>(reader: R) -> Result<(Vec<f64>, Vec<f64>), PulseError> {
        let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = csv.headers()?.clone();

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| PulseError::MissingColumn(name.to_string()))
        };
        let std_col = column("std")?;
        let state_col = column("real_state")?;

        let mut std = Vec::new();
        let mut state = Vec::new();
        let mut skipped = 0usize;

        for (row, record) in csv.records().enumerate() {
            let record = record?;
            let std_value = parse_cell(record.get(std_col), "std", row)?;
            let state_value = parse_cell(record.get(state_col), "real_state", row)?;

            match (std_value, state_value) {
                (Some(s), Some(r)) => {
                    std.push(s);
                    state.push(r);
                }
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            log::debug!("Dropped {} row(s) with missing std or real_state", skipped);
        }

        Ok((std, state))
    }

    /// Search the best threshold for `std`.
    ///
    /// `real_state` must be as long as `std`; it only affects the score when
    /// `target` is [`ScoreTarget::RealState`].
    pub fn optimize(
        std: &[f64],
        real_state: &[f64],
        target: ScoreTarget,
    ) -> Result<BoundaryResult, PulseError> {
        if std.len() != real_state.len() {
            return Err(PulseError::ParseError(format!(
                "std has {} values but real_state has {}",
                std.len(),
                real_state.len()
            )));
        }

        let mut sorted_std_values = std.to_vec();
        sorted_std_values.sort_by(f64::total_cmp);

        let midpoints: Vec<f64> = sorted_std_values
            .windows(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect();

        let reference: Vec<u64> = match target {
            ScoreTarget::Std => std.iter().map(|&v| label(v)).collect(),
            ScoreTarget::RealState => real_state.iter().map(|&v| label(v)).collect(),
        };

        let mut best_threshold = None;
        let mut best_score = 0.0;
        let mut scores = Vec::with_capacity(midpoints.len());

        for &midpoint in &midpoints {
            let split: Vec<u8> = std.iter().map(|&v| u8::from(v > midpoint)).collect();
            let score = mutual_info_score(&reference, &split);
            scores.push(score);

            // Strict comparison: ties keep the earliest midpoint
            if score > best_score {
                best_score = score;
                best_threshold = Some(midpoint);
            }
        }

        match best_threshold {
            Some(t) => log::info!("Best decision boundary {:.3} (MI {:.4})", t, best_score),
            None => log::info!("No decision boundary improves on zero mutual information"),
        }

        Ok(BoundaryResult {
            best_threshold,
            best_score,
            std_values: std.to_vec(),
            sorted_std_values,
            index_sequence: (0..std.len()).collect(),
            midpoints,
            scores,
            target,
        })
    }

    /// Load a recorded file and search its boundary
    pub fn run(path: &Path, target: ScoreTarget) -> Result<BoundaryResult, PulseError> {
        let (std, real_state) = Self::load_csv(path)?;
        log::info!("Searching decision boundary over {} rows of {}", std.len(), path.display());
        Self::optimize(&std, &real_state, target)
    }

    /// [`BoundaryOptimizer::run`] on the blocking thread pool
    pub async fn run_in_background(
        path: PathBuf,
        target: ScoreTarget,
    ) -> Result<BoundaryResult, PulseError> {
        tokio::task::spawn_blocking(move || Self::run(&path, target))
            .await
            .map_err(|e| PulseError::TaskFailed(e.to_string()))?
    }
}

/// Mutual information (natural log) between two labelings of the same samples,
/// computed from their contingency table.
pub fn mutual_info_score<A, B>(labels_a: &[A], labels_b: &[B]) -> f64
where
    A: Eq + Hash + Copy,
    B: Eq + Hash + Copy,
{
    let n = labels_a.len().min(labels_b.len());
    if n == 0 {
        return 0.0;
    }

    let mut joint: HashMap<(A, B), usize> = HashMap::new();
    let mut count_a: HashMap<A, usize> = HashMap::new();
    let mut count_b: HashMap<B, usize> = HashMap::new();

    for (&a, &b) in labels_a.iter().zip(labels_b) {
        *joint.entry((a, b)).or_default() += 1;
        *count_a.entry(a).or_default() += 1;
        *count_b.entry(b).or_default() += 1;
    }

    if count_a.len() == 1 || count_b.len() == 1 {
        return 0.0;
    }

    let n = n as f64;
    let mut terms: Vec<f64> = joint
        .iter()
        .map(|((a, b), &nij)| {
            let nij = nij as f64;
            let ai = count_a[a] as f64;
            let bj = count_b[b] as f64;
            (nij / n) * ((nij * n) / (ai * bj)).ln()
        })
        .collect();

    // Sum in value order: tables that differ only by a relabeling score bit-identically
    terms.sort_by(f64::total_cmp);
    let mi: f64 = terms.iter().sum();

    mi.max(0.0)
}

/// Discrete label for a float value; `-0.0` and `0.0` share a label
fn label(value: f64) -> u64 {
    if value == 0.0 {
        0f64.to_bits()
    } else {
        value.to_bits()
    }
}

fn parse_cell(cell: Option<&str>, column: &str, row: usize) -> Result<Option<f64>, PulseError> {
    let cell = cell.unwrap_or("").trim();
    if MISSING_MARKERS.contains(&cell) {
        return Ok(None);
    }
    let value: f64 = cell.parse().map_err(|_| {
        PulseError::ParseError(format!("{} value {:?} on data row {}", column, cell, row + 1))
    })?;
    Ok(if value.is_nan() { None } else { Some(value) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LN_2: f64 = std::f64::consts::LN_2;

    #[test]
    fn test_mutual_info_score() {
        assert!((mutual_info_score(&[0, 0, 1, 1], &[0, 0, 1, 1]) - LN_2).abs() < 1e-12);
        assert!((mutual_info_score(&[0, 0, 1, 1], &[1, 1, 0, 0]) - LN_2).abs() < 1e-12);
        assert!(mutual_info_score(&[0, 1, 0, 1], &[0, 0, 1, 1]).abs() < 1e-12);
        assert_eq!(mutual_info_score(&[5, 5, 5], &[0, 1, 0]), 0.0);
        assert_eq!(mutual_info_score::<u8, u8>(&[], &[]), 0.0);
    }

    #[test]
    fn test_four_distinct_values() {
        let result =
            BoundaryOptimizer::optimize(&[1.0, 2.0, 3.0, 4.0], &[0.0; 4], ScoreTarget::Std).unwrap();

        assert_eq!(result.midpoints, vec![1.5, 2.5, 3.5]);
        assert_eq!(result.best_threshold, Some(2.5));
        assert!((result.best_score - LN_2).abs() < 1e-12);
        assert_eq!(result.index_sequence, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_binarizes_in_file_order() {
        let std = [4.0, 1.0, 3.0, 2.0];
        let result = BoundaryOptimizer::optimize(&std, &[0.0; 4], ScoreTarget::Std).unwrap();

        assert_eq!(result.std_values, std.to_vec());
        assert_eq!(result.sorted_std_values, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(result.best_threshold, Some(2.5));
    }

    #[test]
    fn test_ties_keep_earliest_midpoint() {
        let result =
            BoundaryOptimizer::optimize(&[1.0, 1.0, 2.0, 2.0], &[0.0; 4], ScoreTarget::Std).unwrap();

        assert_eq!(result.midpoints, vec![1.0, 1.5, 2.0]);
        assert!((result.scores[0] - result.scores[1]).abs() < 1e-12);
        assert_eq!(result.best_threshold, Some(1.0));
    }

    #[test]
    fn test_odd_length_ties_pick_lower_median() {
        for n in [7usize, 11, 21, 101] {
            let std: Vec<f64> = (1..=n).map(|i| i as f64 * 1.1).collect();
            let zeros = vec![0.0; n];
            let lower_median = (n - 1) / 2 - 1;

            for _ in 0..200 {
                let result = BoundaryOptimizer::optimize(&std, &zeros, ScoreTarget::Std).unwrap();
                assert_eq!(result.best_threshold, Some(result.midpoints[lower_median]));
                assert_eq!(
                    result.scores[lower_median].to_bits(),
                    result.scores[lower_median + 1].to_bits()
                );
            }
        }
    }

    #[test]
    fn test_no_threshold_when_nothing_scores() {
        let constant = BoundaryOptimizer::optimize(&[3.0, 3.0, 3.0], &[0.0; 3], ScoreTarget::Std).unwrap();
        assert_eq!(constant.best_threshold, None);
        assert_eq!(constant.best_score, 0.0);

        let single = BoundaryOptimizer::optimize(&[7.0], &[1.0], ScoreTarget::Std).unwrap();
        assert!(single.midpoints.is_empty());
        assert_eq!(single.best_threshold, None);
    }

    #[test]
    fn test_real_state_target() {
        let std = [10.0, 20.0, 30.0, 40.0, 50.0];
        let state = [0.0, 0.0, 0.0, 1.0, 1.0];

        let result = BoundaryOptimizer::optimize(&std, &state, ScoreTarget::RealState).unwrap();
        assert_eq!(result.best_threshold, Some(35.0));
        assert_eq!(result.target, ScoreTarget::RealState);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        let result = BoundaryOptimizer::optimize(&[1.0, 2.0], &[0.0], ScoreTarget::Std);
        assert!(matches!(result, Err(PulseError::ParseError(_))));
    }

    #[test]
    fn test_read_columns_drops_missing_rows() {
        let data = "time,heart rate,rr interval,std,state,real_state\n\
                    0,60,1000,,0,0\n\
                    1,61,990,7.07,0,0\n\
                    2,62,970,NaN,0,1\n\
                    3,63,950,21.5,0,NA\n\
                    4,64,940,25.1,1,1\n";

        let (std, state) = BoundaryOptimizer::read_columns(data.as_bytes()).unwrap();

        assert_eq!(std, vec![7.07, 25.1]);
        assert_eq!(state, vec![0.0, 1.0]);
    }

    #[test]
    fn test_read_columns_requires_both_columns() {
        let data = "time,std\n0,1.0\n";
        let err = BoundaryOptimizer::read_columns(data.as_bytes()).unwrap_err();
        assert!(matches!(err, PulseError::MissingColumn(ref c) if c == "real_state"));
    }

    #[test]
    fn test_read_columns_rejects_garbage() {
        let data = "std,real_state\nabc,0\n";
        assert!(matches!(
            BoundaryOptimizer::read_columns(data.as_bytes()),
            Err(PulseError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_run_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.csv");
        std::fs::write(&path, "std,real_state\n1,0\n2,0\n3,1\n4,1\n").unwrap();

        let result = BoundaryOptimizer::run_in_background(path, ScoreTarget::Std).await.unwrap();
        assert_eq!(result.best_threshold, Some(2.5));

        let missing = BoundaryOptimizer::run_in_background(dir.path().join("absent.csv"), ScoreTarget::Std).await;
        assert!(matches!(missing, Err(PulseError::Io(_))));
    }
}
