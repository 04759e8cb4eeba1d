pub mod bootstrap;
pub mod commands;
pub mod timing_sync;
