use std::path::{Path, PathBuf};

use anyhow::Context;
use logsyncd::daemon::{DaemonConfig, DaemonRuntime};
use logsyncd::ids::{DBUS_INTERFACE_SYNC, DBUS_NAME_SYNC, DBUS_OBJECT_PATH_SYNC};
use logsyncd::logging::init_logging;
use logsyncd::orchestrator::save_log_folder;
use logsyncd::storage::BookmarkStore;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run,
    Connect(PathBuf),
    Disconnect,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--connect" => {
                let dir = args.next().context("--connect requires a directory")?;
                mode = CliMode::Connect(PathBuf::from(dir));
            }
            "--disconnect" => mode = CliMode::Disconnect,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

/// Asks a running daemon to perform `method`. Fails when no daemon owns the
/// bus name.
async fn call_daemon<B>(method: &str, body: &B) -> zbus::Result<()>
where
    B: serde::Serialize + zbus::zvariant::DynamicType,
{
    let connection = zbus::Connection::session().await?;
    connection
        .call_method(
            Some(DBUS_NAME_SYNC),
            DBUS_OBJECT_PATH_SYNC,
            Some(DBUS_INTERFACE_SYNC),
            method,
            body,
        )
        .await?;
    Ok(())
}

async fn connect(config: &DaemonConfig, picked: &Path) -> anyhow::Result<()> {
    let picked = std::path::absolute(picked)
        .with_context(|| format!("invalid folder {}", picked.display()))?;
    let picked_str = picked.to_string_lossy().to_string();
    match call_daemon("Connect", &(picked_str.as_str(),)).await {
        Ok(()) => {
            tracing::info!(path = %picked.display(), "folder connected through running daemon");
            return Ok(());
        }
        Err(err) => {
            tracing::debug!(error = %err, "daemon not reachable, saving bookmark directly")
        }
    }
    let store = config.open_store()?;
    let log_dir = save_log_folder(&store, &config.rules(), &picked)?;
    tracing::info!(path = %log_dir.display(), "folder connected");
    Ok(())
}

async fn disconnect(config: &DaemonConfig) -> anyhow::Result<()> {
    match call_daemon("Disconnect", &()).await {
        Ok(()) => {
            tracing::info!("folder disconnected through running daemon");
            return Ok(());
        }
        Err(err) => {
            tracing::debug!(error = %err, "daemon not reachable, clearing bookmarks directly")
        }
    }
    config.open_store()?.clear_all()?;
    tracing::info!("saved bookmarks removed");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: logsyncd [--connect <dir> | --disconnect]");
        println!("  --connect <dir>  Connect the log folder inside <dir> and exit");
        println!("  --disconnect     Forget the connected folder and exit");
        return Ok(());
    }

    let config = DaemonConfig::from_env()?;
    match mode {
        CliMode::Connect(dir) => connect(&config, &dir).await,
        CliMode::Disconnect => disconnect(&config).await,
        CliMode::Run | CliMode::Help => {
            let daemon = DaemonRuntime::bootstrap(config).await?;
            daemon.run().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(args(&["logsyncd"])).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_connect() {
        let mode = parse_cli_mode(args(&["logsyncd", "--connect", "/media/watch"])).unwrap();
        assert_eq!(mode, CliMode::Connect(PathBuf::from("/media/watch")));
    }

    #[test]
    fn parse_cli_mode_requires_connect_directory() {
        assert!(parse_cli_mode(args(&["logsyncd", "--connect"])).is_err());
    }

    #[test]
    fn parse_cli_mode_supports_disconnect_and_help() {
        assert_eq!(
            parse_cli_mode(args(&["logsyncd", "--disconnect"])).unwrap(),
            CliMode::Disconnect
        );
        assert_eq!(
            parse_cli_mode(args(&["logsyncd", "-h"])).unwrap(),
            CliMode::Help
        );
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_flags() {
        assert!(parse_cli_mode(args(&["logsyncd", "--logout"])).is_err());
    }
}
