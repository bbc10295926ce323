use std::path::{Component, Path, PathBuf};

pub const DEFAULT_LOG_EXTENSION: &str = "slopes";
pub const DEFAULT_LOG_DIR_NAME: &str = "GPSLogs";

/// Which files under the connected folder count as activity logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileRules {
    extension: String,
    directory_name: String,
}

impl Default for LogFileRules {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_EXTENSION, DEFAULT_LOG_DIR_NAME)
    }
}

impl LogFileRules {
    pub fn new(extension: impl Into<String>, directory_name: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            extension: extension.trim_start_matches('.').to_string(),
            directory_name: directory_name.into(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn directory_name(&self) -> &str {
        &self.directory_name
    }

    pub fn has_log_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == self.extension)
    }

    /// True when some directory component of `path` is the log directory.
    pub fn is_under_log_dir(&self, path: &Path) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        parent.components().any(|component| match component {
            Component::Normal(part) => part
                .to_str()
                .is_some_and(|part| part.eq_ignore_ascii_case(&self.directory_name)),
            _ => false,
        })
    }

    pub fn is_eligible(&self, path: &Path) -> bool {
        self.has_log_extension(path) && self.is_under_log_dir(path)
    }

    /// Maps the folder the user picked to the log directory inside it. Picking
    /// the log directory itself is accepted too.
    pub fn log_directory_for(&self, picked: &Path) -> PathBuf {
        let picked_is_log_dir = picked
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.eq_ignore_ascii_case(&self.directory_name));
        if picked_is_log_dir {
            picked.to_path_buf()
        } else {
            picked.join(&self.directory_name)
        }
    }

    /// Human-readable label for a log file name.
    ///
    /// Recorded logs are named like `Slopes - Mount%Hood.slopes`; the label is
    /// the part after the first `-` with `%` shown as spaces.
    pub fn file_label(&self, file_name: &str) -> String {
        let name = file_name.replace('%', " ");
        let suffix = format!(".{}", self.extension);
        if let (Some(dash), Some(end)) = (name.find('-'), name.find(&suffix))
            && dash < end
        {
            let label = name[dash + 1..end].trim();
            if !label.is_empty() {
                return label.to_string();
            }
        }
        name.strip_suffix(&suffix).unwrap_or(&name).trim().to_string()
    }
}
