use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Debug, Clone)]
pub struct Config {
    pub extension_dir: PathBuf,
    pub workspace: PathBuf,
    pub settings: Option<PathBuf>,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Build one file, wait for the server to report, then exit.
    Build { file: PathBuf, wait: Duration },
    /// Read editor events from stdin until `quit` or EOF.
    Session,
}

#[derive(Parser, Debug)]
#[command(name = "volt-client")]
#[command(about = "Run the Volt language server (VlsController) from the command line", long_about = None)]
pub struct Cli {
    /// Directory holding VlsController [default: directory of this binary]
    #[arg(long)]
    extension_dir: Option<PathBuf>,
    /// Workspace root [default: current directory]
    #[arg(long)]
    workspace: Option<PathBuf>,
    /// JSON settings file; the "volt" section is sent to the server
    #[arg(long)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the server to build FILE
    Build {
        file: PathBuf,
        /// Milliseconds to wait for diagnostics before shutting down
        #[arg(long, default_value_t = 2000)]
        wait_ms: u64,
    },
    /// Interactive session driven by stdin
    Session,
}

impl Cli {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn into_config(self) -> Config {
        Config {
            extension_dir: self.extension_dir.unwrap_or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|exe| exe.parent().map(Path::to_path_buf))
                    .unwrap_or_else(|| PathBuf::from("."))
            }),
            workspace: self.workspace.unwrap_or_else(|| {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            }),
            settings: self.settings,
            mode: match self.command {
                Command::Build { file, wait_ms } => Mode::Build {
                    file,
                    wait: Duration::from_millis(wait_ms),
                },
                Command::Session => Mode::Session,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_arguments() {
        let cli = Cli::try_parse_from([
            "volt-client",
            "--extension-dir",
            "/opt/volt",
            "--settings",
            "settings.json",
            "build",
            "src/main.volt",
            "--wait-ms",
            "500",
        ])
        .unwrap();
        let config = cli.into_config();

        assert_eq!(config.extension_dir, PathBuf::from("/opt/volt"));
        assert_eq!(config.settings, Some(PathBuf::from("settings.json")));
        assert_eq!(
            config.mode,
            Mode::Build {
                file: PathBuf::from("src/main.volt"),
                wait: Duration::from_millis(500),
            }
        );
    }

    #[test]
    fn test_defaults() {
        let config = Cli::try_parse_from(["volt-client", "session"])
            .unwrap()
            .into_config();
        assert_eq!(config.mode, Mode::Session);
        assert_eq!(config.workspace, std::env::current_dir().unwrap());
        assert!(config.settings.is_none());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["volt-client"]).is_err());
    }
}
