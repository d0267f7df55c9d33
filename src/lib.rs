pub mod cli;
pub mod commands;
pub mod env_loader;
pub mod error;
pub mod fold;

include!(concat!(env!("OUT_DIR"), "/timefold_env_allowlist.rs"));
