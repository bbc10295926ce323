pub mod backoff;
pub mod cooldown;
pub mod engine;
pub mod local_watcher;
pub mod pass;
pub mod paths;
pub mod remote;
pub mod scanner;
pub mod transfer;
