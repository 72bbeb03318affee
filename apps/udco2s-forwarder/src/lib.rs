pub mod agent;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod flusher;
pub mod http;
pub mod lock;
pub mod metric;
pub mod parser;
pub mod sample;
pub mod serial;
pub mod sink;
pub mod stats;
