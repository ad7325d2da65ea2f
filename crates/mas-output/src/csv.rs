//! CSV output backend.

use std::fs::File;
use std::path::Path;

use csv::Writer;

use crate::row::{PlanHistoryRow, StateRow};
use crate::writer::RowWriter;
use crate::OutputResult;

// ── states.csv ────────────────────────────────────────────────────────────────

/// Writes an element's `states.csv`.
pub struct StateCsvWriter {
    writer: Writer<File>,
    finished: bool,
}

impl StateCsvWriter {
    /// Open (or create) `states.csv` in `dir` and write the header row.
    pub fn create(dir: &Path) -> OutputResult<Self> {
        let mut writer = Writer::from_path(dir.join("states.csv"))?;
        writer.write_record(["t", "x_pos", "y_pos", "x_vel", "y_vel", "status"])?;
        Ok(Self { writer, finished: false })
    }
}

impl RowWriter<StateRow> for StateCsvWriter {
    fn write(&mut self, row: &StateRow) -> OutputResult<()> {
        self.writer.write_record(&[
            row.t.to_string(),
            row.x_pos.to_string(),
            row.y_pos.to_string(),
            row.x_vel.to_string(),
            row.y_vel.to_string(),
            row.status.to_string(),
        ])?;
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.writer.flush()?;
        Ok(())
    }
}

// ── planner_history.csv ───────────────────────────────────────────────────────

/// Writes an element's `planner_history.csv`.
pub struct PlanHistoryCsvWriter {
    writer: Writer<File>,
    finished: bool,
}

impl PlanHistoryCsvWriter {
    /// Open (or create) `planner_history.csv` in `dir` and write the header
    /// row.
    pub fn create(dir: &Path) -> OutputResult<Self> {
        let mut writer = Writer::from_path(dir.join("planner_history.csv"))?;
        writer.write_record([
            "plan_index",
            "t",
            "request_id",
            "subtask_index",
            "t_img",
            "u_exp",
        ])?;
        Ok(Self { writer, finished: false })
    }
}

impl RowWriter<PlanHistoryRow> for PlanHistoryCsvWriter {
    fn write(&mut self, row: &PlanHistoryRow) -> OutputResult<()> {
        self.writer.write_record(&[
            row.plan_index.to_string(),
            row.t.to_string(),
            row.request_id.short(),
            row.subtask_index.to_string(),
            row.t_img.to_string(),
            row.u_exp.to_string(),
        ])?;
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.writer.flush()?;
        Ok(())
    }
}
