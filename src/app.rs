use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use lsp_types::DiagnosticSeverity;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;

use crate::cli::{Config, Mode};
use crate::extension::{self, BUILD_ACTIVE_FILE_COMMAND};
use crate::host::{ExtensionContext, FileChangeKind, Host, Workspace};

pub async fn run(config: Config) -> anyhow::Result<()> {
    let host = Host::new(Workspace::new(Some(config.workspace.clone())));
    if let Some(settings) = &config.settings {
        host.workspace
            .load_settings(settings)
            .await
            .with_context(|| format!("loading settings from {}", settings.display()))?;
    }

    let mut context = ExtensionContext::new(config.extension_dir.clone());
    extension::activate(&mut context, &host).await?;

    let result = match &config.mode {
        Mode::Build { file, wait } => build(&host, file, *wait).await,
        Mode::Session => session(&host).await,
    };

    extension::deactivate();
    context.dispose().await;
    print_diagnostics(&host);

    result
}

async fn build(host: &Host, file: &Path, wait: Duration) -> anyhow::Result<()> {
    let document = host.workspace.open_text_document(file).await?;
    println!("Building {}", document.file_name.display());
    host.window.show_text_document(document);
    host.commands.execute_command(BUILD_ACTIVE_FILE_COMMAND)?;

    // The build request is fire-and-forget; give the server time to publish.
    sleep(wait).await;
    Ok(())
}

async fn session(host: &Host) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match SessionCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("Error: {e}");
                continue;
            }
        };
        if command == SessionCommand::Quit {
            break;
        }
        // Failures are reported and the session carries on, like an editor would.
        if let Err(e) = apply(host, command).await {
            eprintln!("Error: {e:#}");
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionCommand {
    Open(PathBuf),
    Close(PathBuf),
    Focus(PathBuf),
    Blur,
    FileEvent(PathBuf, FileChangeKind),
    Run(String),
    Problems,
    Quit,
}

impl SessionCommand {
    /// `Ok(None)` for blank lines and `#` comments.
    fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let path = || -> anyhow::Result<PathBuf> {
            if rest.is_empty() {
                Err(anyhow!("'{verb}' needs a path"))
            } else {
                Ok(PathBuf::from(rest))
            }
        };

        let command = match verb {
            "open" => SessionCommand::Open(path()?),
            "close" => SessionCommand::Close(path()?),
            "focus" => SessionCommand::Focus(path()?),
            "blur" => SessionCommand::Blur,
            "created" => SessionCommand::FileEvent(path()?, FileChangeKind::Created),
            "changed" => SessionCommand::FileEvent(path()?, FileChangeKind::Changed),
            "deleted" => SessionCommand::FileEvent(path()?, FileChangeKind::Deleted),
            "run" if !rest.is_empty() => SessionCommand::Run(rest.to_string()),
            "run" => bail!("'run' needs a command id"),
            "problems" => SessionCommand::Problems,
            "quit" | "exit" => SessionCommand::Quit,
            other => bail!("unknown session command '{other}'"),
        };
        Ok(Some(command))
    }
}

async fn apply(host: &Host, command: SessionCommand) -> anyhow::Result<()> {
    match command {
        SessionCommand::Open(path) => {
            host.workspace.open_text_document(&path).await?;
        }
        SessionCommand::Close(path) => {
            if host.workspace.close_text_document_at(&path)?.is_none() {
                bail!("{} is not open", path.display());
            }
        }
        SessionCommand::Focus(path) => {
            let document = host.workspace.open_text_document(&path).await?;
            host.window.show_text_document(document);
        }
        SessionCommand::Blur => host.window.clear_active_editor(),
        SessionCommand::FileEvent(path, kind) => {
            host.workspace
                .notify_file_event(std::path::absolute(&path)?, kind);
        }
        SessionCommand::Run(id) => host.commands.execute_command(&id)?,
        SessionCommand::Problems => print_diagnostics(host),
        SessionCommand::Quit => {}
    }
    Ok(())
}

fn print_diagnostics(host: &Host) {
    for (uri, diagnostics) in host.diagnostics.entries() {
        let file = uri
            .to_file_path()
            .map_or_else(|()| uri.to_string(), |path| path.display().to_string());
        for diagnostic in diagnostics {
            let severity = match diagnostic.severity {
                Some(DiagnosticSeverity::ERROR) => "error",
                Some(DiagnosticSeverity::WARNING) => "warning",
                Some(DiagnosticSeverity::INFORMATION) => "info",
                Some(DiagnosticSeverity::HINT) => "hint",
                _ => "note",
            };
            println!(
                "{}:{}:{}: {}: {}",
                file,
                diagnostic.range.start.line + 1,
                diagnostic.range.start.character + 1,
                severity,
                diagnostic.message
            );
        }
    }
}
