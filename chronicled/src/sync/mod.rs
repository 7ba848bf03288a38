pub mod conflict;
pub mod debounce;
pub mod digest;
pub mod direction;
pub mod disk_remote;
pub mod engine;
pub mod local_watcher;
pub mod paths;
pub mod remote;
pub mod state;
pub mod tracked;
pub mod transfer;
