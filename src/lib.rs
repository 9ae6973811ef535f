pub mod app;
pub mod channel;
pub mod checksum;
pub mod config;
pub mod container;
pub mod error;
pub mod format;
pub mod geometry;
pub mod hcs;
pub mod import;
pub mod index_queue;
pub mod loader;
pub mod metadata;
pub mod output;
pub mod parameter;
pub mod storage;
