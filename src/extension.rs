//! Volt extension entry points: start the VlsController language server and
//! expose the build command.

use std::path::Path;

use serde_json::json;

use crate::error::Error;
use crate::host::{Disposable, DocumentFilter, ExtensionContext, Host};
use crate::lsp::protocol::execute_command_params;
use crate::lsp::{ClientOptions, LanguageClient, ServerOptions, SynchronizeOptions};

pub const SERVER_EXECUTABLE: &str = "VlsController";
pub const CLIENT_NAME: &str = "Volt Language Server";
pub const LANGUAGE_ID: &str = "volt";
pub const CONFIGURATION_SECTION: &str = "volt";
pub const WATCH_PATTERN: &str = "**/*.volt";

pub const BUILD_ACTIVE_FILE_COMMAND: &str = "vls.buildActiveFile";
pub const BUILD_PROJECT_COMMAND: &str = "vls.buildProject";
pub const EXECUTE_COMMAND_METHOD: &str = "workspace/executeCommand";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Other
        }
    }
}

pub fn executable_name(platform: Platform) -> String {
    match platform {
        Platform::Windows => format!("{SERVER_EXECUTABLE}.exe"),
        Platform::Other => SERVER_EXECUTABLE.to_string(),
    }
}

/// The server binary ships next to the extension; no arguments.
pub fn server_options(context: &ExtensionContext, platform: Platform) -> ServerOptions {
    ServerOptions::executable(context.as_absolute_path(executable_name(platform)))
}

pub fn document_selector() -> Vec<DocumentFilter> {
    vec![DocumentFilter::new("file", LANGUAGE_ID)]
}

/// Params for the `vls.buildProject` server command. The server gets the
/// path verbatim, so it must be UTF-8.
pub fn build_project_params(file: &Path) -> Result<lsp_types::ExecuteCommandParams, Error> {
    let fs_path = file
        .to_str()
        .ok_or_else(|| Error::NonUtf8Path(file.to_path_buf()))?;
    Ok(execute_command_params(
        BUILD_PROJECT_COMMAND,
        vec![json!({ "fsPath": fs_path })],
    ))
}

pub async fn activate(context: &mut ExtensionContext, host: &Host) -> anyhow::Result<()> {
    let server = server_options(context, Platform::current());
    activate_with_server(context, host, server).await
}

/// Activation against an explicit server. Registers exactly two
/// subscriptions: the running client and the build command. On failure
/// nothing stays registered and the server is not left running.
pub async fn activate_with_server(
    context: &mut ExtensionContext,
    host: &Host,
    server: ServerOptions,
) -> anyhow::Result<()> {
    let client_options = ClientOptions {
        document_selector: document_selector(),
        synchronize: SynchronizeOptions {
            configuration_section: Some(CONFIGURATION_SECTION.to_string()),
            file_events: Some(host.workspace.create_file_system_watcher(WATCH_PATTERN)?),
        },
    };

    let client = LanguageClient::new(CLIENT_NAME, server, client_options);

    // Claim the command id before the server is started.
    let window = host.window.clone();
    let handler_client = client.clone();
    let mut command_disposable = host
        .commands
        .register_command(BUILD_ACTIVE_FILE_COMMAND, move || {
            let editor = window.active_text_editor().ok_or(Error::NoActiveEditor)?;
            let params = build_project_params(&editor.document.file_name)?;
            // The reply is not awaited.
            handler_client.send_request(EXECUTE_COMMAND_METHOD, params)?;
            Ok(())
        })?;

    let client_disposable = match client.start(host).await {
        Ok(disposable) => disposable,
        Err(e) => {
            command_disposable.dispose().await;
            return Err(e);
        }
    };

    context.subscriptions.push(client_disposable);
    context.subscriptions.push(command_disposable);
    Ok(())
}

/// Nothing to do; subscriptions are released by the host.
pub fn deactivate() {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TextDocument;
    use crate::lsp::testing::{self, methods};
    use lsp_types::Url;
    use std::path::PathBuf;

    #[test]
    fn test_executable_name_per_platform() {
        assert_eq!(executable_name(Platform::Windows), "VlsController.exe");
        assert_eq!(executable_name(Platform::Other), "VlsController");
    }

    #[test]
    fn test_server_resolved_in_extension_dir() {
        let context = ExtensionContext::new("/opt/volt");
        match server_options(&context, Platform::Other) {
            ServerOptions::Executable { command, args } => {
                assert_eq!(command, PathBuf::from("/opt/volt/VlsController"));
                assert!(args.is_empty());
            }
            ServerOptions::Transport(_) => panic!("expected an executable"),
        }
    }

    #[test]
    fn test_selector_only_matches_volt_files() {
        let selector = document_selector();
        let volt = TextDocument::new(Url::parse("file:///w/a.volt").unwrap(), "volt", "");
        let rust = TextDocument::new(Url::parse("file:///w/a.rs").unwrap(), "rust", "");
        let untitled = TextDocument::new(Url::parse("untitled:Untitled-1").unwrap(), "volt", "");

        assert!(crate::host::selector_matches(&selector, &volt));
        assert!(!crate::host::selector_matches(&selector, &rust));
        assert!(!crate::host::selector_matches(&selector, &untitled));
    }

    #[tokio::test]
    async fn test_activate_registers_two_subscriptions() {
        let host = Host::default();
        let mut context = ExtensionContext::new("/opt/volt");
        let (transport, _server) = testing::connect();

        activate_with_server(&mut context, &host, ServerOptions::Transport(transport))
            .await
            .unwrap();

        assert_eq!(context.subscriptions.len(), 2);
        assert!(host.commands.contains(BUILD_ACTIVE_FILE_COMMAND));

        deactivate();
        context.dispose().await;
        assert!(context.subscriptions.is_empty());
        assert!(!host.commands.contains(BUILD_ACTIVE_FILE_COMMAND));
    }

    #[tokio::test]
    async fn test_build_command_sends_one_execute_command() {
        let host = Host::default();
        let mut context = ExtensionContext::new("/opt/volt");
        let (transport, mut server) = testing::connect();
        activate_with_server(&mut context, &host, ServerOptions::Transport(transport))
            .await
            .unwrap();

        let document = TextDocument::new(Url::parse("file:///a/b/c.volt").unwrap(), "volt", "");
        host.window.show_text_document(document);
        host.commands
            .execute_command(BUILD_ACTIVE_FILE_COMMAND)
            .unwrap();

        let request = server.expect_method(EXECUTE_COMMAND_METHOD).await;
        assert_eq!(
            request["params"],
            json!({"command": "vls.buildProject", "arguments": [{"fsPath": "/a/b/c.volt"}]})
        );

        context.dispose().await;
        let rest = server.drain().await;
        assert!(!methods(&rest).contains(&EXECUTE_COMMAND_METHOD));
    }

    #[tokio::test]
    async fn test_build_command_without_active_editor_fails() {
        let host = Host::default();
        let mut context = ExtensionContext::new("/opt/volt");
        let (transport, server) = testing::connect();
        activate_with_server(&mut context, &host, ServerOptions::Transport(transport))
            .await
            .unwrap();

        let result = host.commands.execute_command(BUILD_ACTIVE_FILE_COMMAND);
        assert!(matches!(result, Err(Error::NoActiveEditor)));

        context.dispose().await;
        let sent = server.drain().await;
        assert!(!methods(&sent).contains(&EXECUTE_COMMAND_METHOD));
    }

    #[tokio::test]
    async fn test_taken_command_id_fails_before_server_starts() {
        let host = Host::default();
        let _taken = host
            .commands
            .register_command(BUILD_ACTIVE_FILE_COMMAND, || Ok(()))
            .unwrap();
        let mut context = ExtensionContext::new("/opt/volt");
        let (transport, server) = testing::connect();

        let err = activate_with_server(&mut context, &host, ServerOptions::Transport(transport))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CommandAlreadyRegistered(_))
        ));
        assert!(context.subscriptions.is_empty());

        // The server was never contacted, so there is nothing to shut down.
        assert!(server.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_context_releases_subscriptions() {
        let host = Host::default();
        let mut context = ExtensionContext::new("/opt/volt");
        let (transport, server) = testing::connect();
        activate_with_server(&mut context, &host, ServerOptions::Transport(transport))
            .await
            .unwrap();

        drop(context);
        assert!(!host.commands.contains(BUILD_ACTIVE_FILE_COMMAND));

        let sent = server.drain().await;
        let sent = methods(&sent);
        assert_eq!(sent.last(), Some(&"exit"));
        assert!(!sent.contains(&"shutdown"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new(OsStr::from_bytes(b"/w/bad\xff.volt"));
        assert!(matches!(
            build_project_params(path),
            Err(Error::NonUtf8Path(rejected)) if rejected == path
        ));
        assert!(build_project_params(Path::new("/w/ok.volt")).is_ok());
    }

    #[tokio::test]
    async fn test_activation_fails_when_server_missing() {
        let host = Host::default();
        let mut context = ExtensionContext::new("/nonexistent/extension");

        assert!(activate(&mut context, &host).await.is_err());
        assert!(context.subscriptions.is_empty());
        assert!(!host.commands.contains(BUILD_ACTIVE_FILE_COMMAND));
    }

    #[test]
    fn test_deactivate_without_activation() {
        deactivate();
    }
}
