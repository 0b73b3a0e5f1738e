//! Metric names for the session.

pub mod names {
    pub const SUBMISSIONS_TOTAL: &str = "vinvite_session_submissions_total";
    pub const GENERATION_DURATION_SECONDS: &str = "vinvite_session_generation_duration_seconds";
}
