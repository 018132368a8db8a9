pub const RUN_STARTS: &str = "weather_jobs_run_starts";
pub const RUN_ENDS: &str = "weather_jobs_run_ends";
pub const RUN_TIME: &str = "weather_jobs_run_time_ms";
pub const BRAND_RUNS: &str = "weather_jobs_brand_runs";
pub const ROWS_WRITTEN: &str = "weather_jobs_rows_written";
pub const ROWS_DELETED: &str = "weather_jobs_rows_deleted";
pub const ROWS_SKIPPED: &str = "weather_jobs_rows_skipped";
