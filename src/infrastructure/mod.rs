pub mod config;
pub mod error;
pub mod record_store_client;
pub mod storage;
pub mod timing_cache;
