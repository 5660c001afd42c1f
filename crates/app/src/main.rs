use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use lawgpt::logging;
use lawgpt::session::ChatSession;
use lawgpt::settings::SettingsStore;
use lawgpt::terminal::Terminal;
use lawgpt_backend::create_backend;
use lawgpt_chat::ChatStore;
use lawgpt_storage::{FileKeyValueStore, HistoryStore};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> ExitCode {
    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    logging::init(&settings.log_level);
    tracing::info!(
        config = ?settings_store.config_path(),
        endpoint = %settings.endpoint,
        "starting lawgpt"
    );

    let backend = match create_backend(settings.backend_config()) {
        Ok(backend) => backend,
        Err(error) => {
            tracing::error!(error = %error, "failed to create backend client");
            return ExitCode::FAILURE;
        }
    };

    let data_dir = settings
        .data_dir
        .clone()
        .unwrap_or_else(FileKeyValueStore::default_data_dir);
    let history = HistoryStore::new(Arc::new(FileKeyValueStore::new(data_dir)));
    let session = ChatSession::new(ChatStore::default(), backend, history);

    let export_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let archive_after_days = settings.archive_after_days;
    let mut terminal = Terminal::new(session, settings_store, tokio::io::stdout(), export_dir);

    let result = match terminal.start(archive_after_days).await {
        Ok(()) => terminal.run(BufReader::new(tokio::io::stdin())).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "terminal session ended with an error");
            ExitCode::FAILURE
        }
    }
}
