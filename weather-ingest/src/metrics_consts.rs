pub const MESSAGES_RECEIVED: &str = "weather_ingest_messages_received";
pub const EMPTY_MESSAGES: &str = "weather_ingest_empty_messages";
pub const MESSAGE_PARSE_ERROR: &str = "weather_ingest_message_parse_error";
pub const MESSAGES_INVALID: &str = "weather_ingest_messages_invalid";
pub const MESSAGES_ACKED: &str = "weather_ingest_messages_acked";
pub const MESSAGES_NACKED: &str = "weather_ingest_messages_nacked";
pub const SETTLE_FAILED: &str = "weather_ingest_settle_failed";
pub const RECORDS_WRITTEN: &str = "weather_ingest_records_written";
pub const RECORD_WRITE_FAILED: &str = "weather_ingest_record_write_failed";
pub const BATCH_SIZE: &str = "weather_ingest_batch_size";
pub const BATCH_FLUSH_TIME: &str = "weather_ingest_batch_flush_time_ms";
pub const FLUSH_TRIGGER: &str = "weather_ingest_flush_trigger";
pub const COMMIT_FAILED: &str = "weather_ingest_commit_failed";
pub const ANALYTICAL_INSERT_FAILED: &str = "weather_ingest_analytical_insert_failed";
pub const ANALYTICAL_ROWS_WRITTEN: &str = "weather_ingest_analytical_rows_written";
pub const MESSAGES_UNCHANGED: &str = "weather_ingest_messages_unchanged";
