//! Metric names and labels recorded by dump runs.
//!
//! Only the `metrics` facade is used here, installing a recorder is up to the binary.

/// Label for the job name.
pub const JOB_LABEL: &str = "job";

/// Label for the error kind of a failed run.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Counter of rows written into staging buffers.
pub const DUMP_ROWS_STAGED_TOTAL: &str = "dump_rows_staged_total";

/// Counter of runs that merged and deleted their counter data.
pub const DUMP_RUNS_COMPLETED_TOTAL: &str = "dump_runs_completed_total";

/// Counter of runs that returned an error.
pub const DUMP_RUNS_FAILED_TOTAL: &str = "dump_runs_failed_total";

/// Histogram of run durations in seconds.
pub const DUMP_RUN_DURATION_SECONDS: &str = "dump_run_duration_seconds";
