//! Integration test modules

mod engine_flow;
mod file_store;
mod http_transport;
