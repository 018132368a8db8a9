pub mod accumulator;
pub mod app_context;
pub mod committer;
pub mod config;
pub mod detect;
pub mod enrich;
pub mod kinds;
pub mod message;
pub mod metrics_consts;
pub mod store;

#[cfg(test)]
pub(crate) mod test_utils;
