pub mod daemon;
pub mod dbus_api;
pub mod ids;
pub mod logging;
pub mod orchestrator;
pub mod storage;
pub mod sync;
