//! Unit tests for the CSV backends.

use mas_core::RequestId;

use crate::{
    element_dir, reset_results_root, PlanHistoryCsvWriter, PlanHistoryRow, RowWriter,
    StateCsvWriter, StateRow,
};

#[test]
fn state_csv_layout() {
    let root = tempfile::tempdir().unwrap();
    let dir = element_dir(root.path(), "AGENT_0").unwrap();

    let mut writer = StateCsvWriter::create(&dir).unwrap();
    writer
        .write(&StateRow {
            t: 1.5,
            x_pos: 2.0,
            y_pos: 3.0,
            x_vel: 0.0,
            y_vel: -1.0,
            status: "TRAVELING",
        })
        .unwrap();
    writer.finish().unwrap();
    writer.finish().unwrap(); // idempotent

    let contents = std::fs::read_to_string(dir.join("states.csv")).unwrap();
    let mut lines = contents.lines();
    assert_eq!(lines.next().unwrap(), "t,x_pos,y_pos,x_vel,y_vel,status");
    assert_eq!(lines.next().unwrap(), "1.5,2,3,0,-1,TRAVELING");
}

#[test]
fn plan_history_csv_layout() {
    let root = tempfile::tempdir().unwrap();
    let dir = element_dir(root.path(), "AGENT_1").unwrap();
    let request_id = RequestId::generate();

    let mut writer = PlanHistoryCsvWriter::create(&dir).unwrap();
    writer
        .write(&PlanHistoryRow {
            plan_index: 0,
            t: 2.0,
            request_id,
            subtask_index: 1,
            t_img: 4.5,
            u_exp: 9.25,
        })
        .unwrap();
    writer.finish().unwrap();

    let contents = std::fs::read_to_string(dir.join("planner_history.csv")).unwrap();
    let mut lines = contents.lines();
    assert_eq!(lines.next().unwrap(), "plan_index,t,request_id,subtask_index,t_img,u_exp");
    assert_eq!(
        lines.next().unwrap(),
        format!("0,2,{},1,4.5,9.25", request_id.short())
    );
}

#[test]
fn reset_clears_previous_run() {
    let root = tempfile::tempdir().unwrap();
    let scenario = root.path().join("scenario");
    std::fs::create_dir_all(scenario.join("stale_element")).unwrap();

    reset_results_root(&scenario).unwrap();
    assert!(scenario.exists());
    assert!(!scenario.join("stale_element").exists());
}
