pub const DBUS_NAME_SYNC: &str = "org.logsync.Sync1";
pub const DBUS_INTERFACE_SYNC: &str = "org.logsync.Sync1";
pub const DBUS_OBJECT_PATH_SYNC: &str = "/org/logsync/Sync1";

pub const DBUS_ERROR_NOT_CONNECTED: &str = "org.logsync.Sync1.Error.NotConnected";
pub const DBUS_ERROR_WRONG_DIRECTORY: &str = "org.logsync.Sync1.Error.WrongDirectory";
pub const DBUS_ERROR_FAILED: &str = "org.logsync.Sync1.Error.Failed";
