pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod jobs;
pub mod metrics_consts;
pub mod rollup;
pub mod runner;
pub mod similarity;
pub mod window;
