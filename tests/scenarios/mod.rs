//! Scenario test modules

mod failure_handling;
mod result_loading;
mod stage_progression;
mod workflow_status;
