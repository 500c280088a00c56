//! Integration tests for the gamiforge generation backend

mod batch_runner;
mod dispatcher_caps;
mod generation_flows;
mod image_provider;
mod ledger_store;
mod pipeline_dependencies;
pub mod test_utils;
