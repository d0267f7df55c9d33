pub mod audit;
pub mod batch;
pub mod collector;
pub mod committer;
pub mod config;
pub mod failures;
pub mod files;
pub mod handlers;
pub mod lock;
pub mod mover;
pub mod paths;
pub mod processor;
pub mod projects;
pub mod request;
pub mod request_store;
pub mod spool;
pub mod state;
pub mod util;
pub mod warn;
pub mod watcher;
