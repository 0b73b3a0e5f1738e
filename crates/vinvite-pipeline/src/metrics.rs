//! Metric names for the image pipeline.

pub mod names {
    pub const RUNS_TOTAL: &str = "vinvite_pipeline_runs_total";
    pub const STAGE_ATTEMPTS_TOTAL: &str = "vinvite_pipeline_stage_attempts_total";
    pub const STAGE_FAILURES_TOTAL: &str = "vinvite_pipeline_stage_failures_total";
    pub const STAGE_DURATION_SECONDS: &str = "vinvite_pipeline_stage_duration_seconds";
}
