//! Measurement requests: the tasks agents bid on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mas_core::{DomainBody, MasError, MasResult, MessageBody, RequestId, Vec2};

/// One subtask: a main measurement plus the measurements that must be taken
/// by cooperating agents for full credit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementGroup {
    pub main: String,
    pub dependents: Vec<String>,
}

/// A request for coordinated measurements of one ground position.
///
/// `dependency_matrix[i][j]` relates subtasks `i` and `j`: `1` means `i`
/// needs `j` performed by a coalition partner, `0` means independent, `-1`
/// means mutually exclusive.  `time_dependency_matrix[i][j]` bounds
/// `|t_img_i − t_img_j|` for coupled subtasks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRequest {
    pub id: RequestId,
    pub pos: Vec2,
    /// All instruments the request wants pointed at `pos`.
    pub required_measurements: Vec<String>,
    pub measurement_groups: Vec<MeasurementGroup>,
    pub dependency_matrix: Vec<Vec<i8>>,
    pub time_dependency_matrix: Vec<Vec<f64>>,
    pub t_start: f64,
    pub t_end: f64,
    pub duration: f64,
    pub utility_max: f64,
}

impl MeasurementRequest {
    /// A request whose subtasks are one independent measurement each.
    pub fn independent(
        pos: Vec2,
        measurements: Vec<String>,
        t_start: f64,
        t_end: f64,
        duration: f64,
        utility_max: f64,
    ) -> Self {
        let n = measurements.len();
        Self {
            id: RequestId::generate(),
            pos,
            measurement_groups: measurements
                .iter()
                .map(|m| MeasurementGroup { main: m.clone(), dependents: Vec::new() })
                .collect(),
            required_measurements: measurements,
            dependency_matrix: vec![vec![0; n]; n],
            time_dependency_matrix: vec![vec![0.0; n]; n],
            t_start,
            t_end,
            duration,
            utility_max,
        }
    }

    /// Replace the dependency structure (matrices must match the group
    /// count; validated by [`MeasurementRequest::validate`]).
    pub fn with_matrices(
        mut self,
        dependency_matrix: Vec<Vec<i8>>,
        time_dependency_matrix: Vec<Vec<f64>>,
    ) -> Self {
        self.dependency_matrix = dependency_matrix;
        self.time_dependency_matrix = time_dependency_matrix;
        self
    }

    /// Number of subtasks.
    pub fn subtask_count(&self) -> usize {
        self.measurement_groups.len()
    }

    /// Latest time the measurement can still start.
    #[inline]
    pub fn latest_start(&self) -> f64 {
        self.t_end - self.duration
    }

    /// Structural invariants: square matrices of the subtask count, zero
    /// diagonal, and a feasible time window.
    pub fn validate(&self) -> MasResult<()> {
        let n = self.subtask_count();
        for (label, square) in [
            ("dependency_matrix", self.dependency_matrix.len() == n
                && self.dependency_matrix.iter().all(|row| row.len() == n)),
            ("time_dependency_matrix", self.time_dependency_matrix.len() == n
                && self.time_dependency_matrix.iter().all(|row| row.len() == n)),
        ] {
            if !square {
                return Err(MasError::Config(format!(
                    "request {}: {label} must be {n}×{n}",
                    self.id
                )));
            }
        }
        if self.dependency_matrix.iter().enumerate().any(|(i, row)| row[i] != 0) {
            return Err(MasError::Config(format!(
                "request {}: dependency matrix diagonal must be zero",
                self.id
            )));
        }
        if self.latest_start() < self.t_start {
            return Err(MasError::Config(format!(
                "request {}: window [{}, {}] cannot fit duration {}",
                self.id, self.t_start, self.t_end, self.duration
            )));
        }
        Ok(())
    }
}

impl DomainBody for MeasurementRequest {
    fn wrap(value: Value) -> MessageBody {
        MessageBody::MeasurementRequest(value)
    }

    fn peel(body: &MessageBody) -> Option<&Value> {
        match body {
            MessageBody::MeasurementRequest(value) => Some(value),
            _ => None,
        }
    }
}
