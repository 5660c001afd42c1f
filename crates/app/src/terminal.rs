use std::path::PathBuf;

use lawgpt_backend::{SendOutcome, create_backend};
use lawgpt_chat::{ChatState, Message, MessageId};
use lawgpt_storage::{ChatHistoryEntry, HistoryFilter};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::session::{ChatSession, SessionSend};
use crate::settings::{AppSettings, SettingsStore};

const PROMPT: &str = "> ";
const ANSWER_HEADER: &str = "\nLaw GPT: ";

const HELP_TEXT: &str = "\
Type a legal question and press enter. Commands:
  /new          save the current conversation and start over
  /save         save the current conversation to history
  /history [q]  list saved conversations, optionally matching q
  /archived [q] list conversations including archived ones
  /load N       load conversation N from the last listing
  /star N       star or unstar conversation N
  /pin N        pin or unpin conversation N
  /rename N T   rename conversation N to T
  /rate N R     rate conversation N from 1 to 5
  /duplicate N  copy conversation N
  /delete N     delete conversation N
  /clear        delete every saved conversation
  /export N     write conversation N as a text file
  /endpoint [U] show the backend URL, or switch to and save U
  /status       check the backend connection
  /help         show this help
  /quit         exit
";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TerminalError {
    #[snafu(display("failed to read terminal input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write terminal output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type TerminalResult<T> = Result<T, TerminalError>;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Query(String),
    New,
    Save,
    History {
        query: Option<String>,
        include_archived: bool,
    },
    Load(usize),
    Star(usize),
    Pin(usize),
    Rename(usize, String),
    Rate(usize, u8),
    Duplicate(usize),
    Delete(usize),
    Clear,
    Export(usize),
    Endpoint(Option<String>),
    Status,
    Help,
    Quit,
    Empty,
    /// Unknown command or bad argument, with the message to show.
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Query(line.to_string());
        };

        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };

        match name {
            "new" => Self::New,
            "save" => Self::Save,
            "history" => match argument.strip_prefix("--archived") {
                Some(rest) => Self::history(rest, true),
                None => Self::history(argument, false),
            },
            "archived" => Self::history(argument, true),
            "load" => Self::indexed(name, argument, Self::Load),
            "star" => Self::indexed(name, argument, Self::Star),
            "pin" => Self::indexed(name, argument, Self::Pin),
            "rename" => Self::rename(argument),
            "rate" => Self::rate(argument),
            "duplicate" => Self::indexed(name, argument, Self::Duplicate),
            "delete" => Self::indexed(name, argument, Self::Delete),
            "clear" => Self::Clear,
            "export" => Self::indexed(name, argument, Self::Export),
            "endpoint" => Self::endpoint(argument),
            "status" => Self::Status,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => Self::Invalid(format!("unknown command /{other}; try /help")),
        }
    }

    fn indexed(name: &str, argument: &str, build: fn(usize) -> Self) -> Self {
        match parse_index(argument) {
            Some(index) => build(index),
            None => Self::Invalid(format!("usage: /{name} N (N from /history)")),
        }
    }

    fn history(query: &str, include_archived: bool) -> Self {
        let query = query.trim();
        Self::History {
            query: (!query.is_empty()).then(|| query.to_string()),
            include_archived,
        }
    }

    fn rename(argument: &str) -> Self {
        let parsed = argument
            .split_once(char::is_whitespace)
            .and_then(|(index, name)| {
                let name = name.trim();
                Some((parse_index(index)?, name)).filter(|_| !name.is_empty())
            });
        match parsed {
            Some((index, name)) => Self::Rename(index, name.to_string()),
            None => Self::Invalid("usage: /rename N new name".to_string()),
        }
    }

    fn rate(argument: &str) -> Self {
        let parsed = argument.split_once(char::is_whitespace).and_then(|(index, rating)| {
            Some((parse_index(index)?, rating.trim().parse::<u8>().ok()?))
        });
        match parsed {
            Some((index, rating)) if (1..=5).contains(&rating) => Self::Rate(index, rating),
            _ => Self::Invalid("usage: /rate N R (R from 1 to 5)".to_string()),
        }
    }

    fn endpoint(argument: &str) -> Self {
        if argument.is_empty() {
            Self::Endpoint(None)
        } else if argument.starts_with("http://") || argument.starts_with("https://") {
            Self::Endpoint(Some(argument.to_string()))
        } else {
            Self::Invalid("usage: /endpoint http://host:port".to_string())
        }
    }
}

fn parse_index(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|index| *index > 0)
}

/// Tracks how much of the in-flight answer has reached the screen.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    message_id: Option<MessageId>,
    printed: String,
}

impl StreamPrinter {
    /// New text of the loading answer since the last call, if any.
    pub fn delta(&mut self, state: &ChatState) -> Option<String> {
        let message = match &self.message_id {
            Some(id) => state.message(id)?,
            None => {
                let message = state.messages.iter().rev().find(|message| message.is_loading())?;
                self.message_id = Some(message.id.clone());
                message
            }
        };
        if !message.is_loading() {
            return None;
        }

        let fresh = message.content.strip_prefix(self.printed.as_str())?;
        if fresh.is_empty() {
            return None;
        }
        let fresh = fresh.to_string();
        self.printed.push_str(&fresh);
        Some(fresh)
    }

    /// Remaining text once the answer settled. Streamed text that the final
    /// content no longer extends is followed by the final content on a new line.
    pub fn finish(&mut self, message: &Message) -> String {
        let remaining = if self.printed.is_empty() {
            message.content.clone()
        } else {
            match message.content.strip_prefix(self.printed.as_str()) {
                Some(rest) => rest.to_string(),
                None => format!("\n{}", message.content),
            }
        };
        self.printed = message.content.clone();
        remaining
    }
}

/// Line-oriented front end over a [`ChatSession`].
pub struct Terminal<W> {
    session: ChatSession,
    settings: SettingsStore,
    output: W,
    export_dir: PathBuf,
}

impl<W> Terminal<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        session: ChatSession,
        settings: SettingsStore,
        output: W,
        export_dir: PathBuf,
    ) -> Self {
        Self {
            session,
            settings,
            output,
            export_dir,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Checks the backend, restores the auto-saved conversation and archives
    /// stale history.
    pub async fn start(&mut self, archive_after_days: u64) -> TerminalResult<()> {
        let status = self.session.check_connection().await;
        let banner = format!(
            "Law GPT legal assistant ({} is {status}). Type /help for commands.\n",
            self.session.endpoint()
        );
        self.emit(&banner).await?;

        if archive_after_days > 0 {
            match self.session.archive_older_than(archive_after_days) {
                Ok(0) => {}
                Ok(archived) => {
                    tracing::info!(archived, "archived stale conversations at startup")
                }
                Err(error) => tracing::warn!(error = %error, "startup archiving failed"),
            }
        }

        match self.session.restore_auto_save() {
            Ok(true) => {
                let count = self.session.store().snapshot().messages.len();
                self.emit(&format!("Restored previous conversation ({count} messages).\n"))
                    .await?;
            }
            Ok(false) => {}
            Err(error) => tracing::warn!(error = %error, "could not restore auto-saved conversation"),
        }

        Ok(())
    }

    /// Reads commands until `/quit` or end of input.
    pub async fn run<R>(&mut self, input: R) -> TerminalResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            self.emit(PROMPT).await?;
            let Some(line) = lines.next_line().await.context(ReadInputSnafu {
                stage: "read-command-line",
            })?
            else {
                break;
            };

            let command = Command::parse(&line);
            tracing::debug!(command = ?command, "terminal command");
            if command == Command::Quit {
                break;
            }
            self.execute(command).await?;
        }

        self.emit("\n").await
    }

    async fn execute(&mut self, command: Command) -> TerminalResult<()> {
        match command {
            Command::Query(query) => self.ask(&query).await,
            Command::New => {
                let text = match self.session.new_chat() {
                    Ok(Some(saved)) => format!("Saved \"{}\". Started a new chat.\n", saved.name),
                    Ok(None) => "Started a new chat.\n".to_string(),
                    Err(error) => format!("Could not start a new chat: {error}\n"),
                };
                self.emit(&text).await
            }
            Command::Save => {
                let text = match self.session.save() {
                    Ok(saved) => format!("Chat saved as \"{}\".\n", saved.name),
                    Err(error) => format!("Could not save: {error}\n"),
                };
                self.emit(&text).await
            }
            Command::History {
                query,
                include_archived,
            } => {
                let mut filter = match query {
                    Some(query) => HistoryFilter::default().with_query(query),
                    None => HistoryFilter::default(),
                };
                if include_archived {
                    filter = filter.including_archived();
                }
                let text = match self.session.history(&filter) {
                    Ok(entries) => render_history(&entries),
                    Err(error) => format!("Could not read history: {error}\n"),
                };
                self.emit(&text).await
            }
            Command::Load(index) => {
                let text = match self.session.load(index) {
                    Ok(entry) => render_transcript(&entry),
                    Err(error) => format!("{error}\n"),
                };
                self.emit(&text).await
            }
            Command::Star(index) => {
                let text = match self.session.toggle_star(index) {
                    Ok(entry) if entry.is_starred => format!("Starred \"{}\".\n", entry.name),
                    Ok(entry) => format!("Unstarred \"{}\".\n", entry.name),
                    Err(error) => format!("{error}\n"),
                };
                self.emit(&text).await
            }
            Command::Pin(index) => {
                let text = match self.session.toggle_pin(index) {
                    Ok(entry) if entry.is_pinned => format!("Pinned \"{}\".\n", entry.name),
                    Ok(entry) => format!("Unpinned \"{}\".\n", entry.name),
                    Err(error) => format!("{error}\n"),
                };
                self.emit(&text).await
            }
            Command::Rename(index, name) => {
                let text = match self.session.rename(index, &name) {
                    Ok(entry) => format!("Renamed to \"{}\".\n", entry.name),
                    Err(error) => format!("{error}\n"),
                };
                self.emit(&text).await
            }
            Command::Rate(index, rating) => {
                let text = match self.session.rate(index, rating) {
                    Ok(entry) => format!("Rated \"{}\" {rating}/5.\n", entry.name),
                    Err(error) => format!("{error}\n"),
                };
                self.emit(&text).await
            }
            Command::Duplicate(index) => {
                let text = match self.session.duplicate(index) {
                    Ok(copy) => format!(
                        "Chat duplicated as \"{}\". Run /history to list again.\n",
                        copy.name
                    ),
                    Err(error) => format!("{error}\n"),
                };
                self.emit(&text).await
            }
            Command::Clear => {
                let text = match self.session.clear_history() {
                    Ok(()) => "Cleared all saved conversations.\n".to_string(),
                    Err(error) => format!("Could not clear history: {error}\n"),
                };
                self.emit(&text).await
            }
            Command::Endpoint(None) => {
                let text = format!("Backend endpoint: {}\n", self.session.endpoint());
                self.emit(&text).await
            }
            Command::Endpoint(Some(endpoint)) => {
                let text = self.switch_endpoint(&endpoint).await;
                self.emit(&text).await
            }
            Command::Delete(index) => {
                let text = match self.session.delete(index) {
                    Ok(_) => "Deleted. Run /history to list again.\n".to_string(),
                    Err(error) => format!("{error}\n"),
                };
                self.emit(&text).await
            }
            Command::Export(index) => {
                let text = match self.session.export(index, &self.export_dir) {
                    Ok(path) => format!("Exported to {}.\n", path.display()),
                    Err(error) => format!("{error}\n"),
                };
                self.emit(&text).await
            }
            Command::Status => {
                let status = self.session.check_connection().await;
                let text = format!("{}: {status}\n", self.session.endpoint());
                self.emit(&text).await
            }
            Command::Help => self.emit(HELP_TEXT).await,
            Command::Invalid(message) => self.emit(&format!("{message}\n")).await,
            Command::Quit | Command::Empty => Ok(()),
        }
    }

    /// Saves the new endpoint, rebuilds the backend and checks it.
    async fn switch_endpoint(&mut self, endpoint: &str) -> String {
        let next = AppSettings {
            endpoint: endpoint.to_string(),
            ..(*self.settings.settings()).clone()
        };
        let backend = match create_backend(next.clone().normalized().backend_config()) {
            Ok(backend) => backend,
            Err(error) => return format!("Could not use {endpoint}: {error}\n"),
        };
        if let Err(error) = self.settings.update(next) {
            return format!("Could not save settings: {error}\n");
        }

        self.session.set_backend(backend);
        let status = self.session.check_connection().await;
        format!("Endpoint set to {} ({status}).\n", self.session.endpoint())
    }

    /// Sends one query and prints the answer as it grows.
    async fn ask(&mut self, query: &str) -> TerminalResult<()> {
        let mut receiver = self.session.store().subscribe();
        receiver.borrow_and_update();
        let mut printer = StreamPrinter::default();

        self.output
            .write_all(ANSWER_HEADER.as_bytes())
            .await
            .context(WriteOutputSnafu {
                stage: "write-answer-header",
            })?;

        let outcome = {
            let send = self.session.send(query);
            tokio::pin!(send);
            loop {
                tokio::select! {
                    outcome = &mut send => break outcome,
                    changed = receiver.changed() => {
                        if changed.is_err() {
                            break (&mut send).await;
                        }
                        let state = receiver.borrow_and_update().clone();
                        if let Some(fresh) = printer.delta(&state) {
                            write_flushed(&mut self.output, &fresh, "write-answer-delta").await?;
                        }
                    }
                }
            }
        };

        let tail = match &outcome {
            SessionSend::Busy => "Still answering the previous question.\n".to_string(),
            SessionSend::Completed(outcome) => {
                let state = self.session.store().snapshot();
                let message = outcome.message_id().and_then(|id| state.message(id));
                let mut tail = message
                    .map(|message| format!("{}\n{}", printer.finish(message), render_sources(message)))
                    .unwrap_or_default();
                if let SendOutcome::Fallback { error, .. } = outcome {
                    tail.push_str(&format!("(offline: {error})\n"));
                }
                tail
            }
        };
        self.emit(&tail).await
    }

    async fn emit(&mut self, text: &str) -> TerminalResult<()> {
        write_flushed(&mut self.output, text, "write-terminal-output").await
    }
}

async fn write_flushed<W>(output: &mut W, text: &str, stage: &'static str) -> TerminalResult<()>
where
    W: AsyncWrite + Unpin,
{
    output
        .write_all(text.as_bytes())
        .await
        .context(WriteOutputSnafu { stage })?;
    output.flush().await.context(WriteOutputSnafu { stage })
}

fn render_sources(message: &Message) -> String {
    match &message.sources {
        Some(sources) if !sources.is_empty() => format!("Sources: {}\n", sources.join(", ")),
        _ => String::new(),
    }
}

fn render_history(entries: &[ChatHistoryEntry]) -> String {
    if entries.is_empty() {
        return "No saved conversations.\n".to_string();
    }

    entries
        .iter()
        .enumerate()
        .map(|(position, entry)| {
            let mut marks = String::new();
            if entry.is_pinned {
                marks.push_str("[pinned] ");
            }
            if entry.is_starred {
                marks.push_str("[starred] ");
            }
            format!(
                "{:>2}. {marks}{} ({} messages, {} min, {})\n    {}\n",
                position + 1,
                entry.name,
                entry.message_count,
                entry.duration,
                entry.metadata.complexity.as_str(),
                entry.preview.first_question
            )
        })
        .collect()
}

fn render_transcript(entry: &ChatHistoryEntry) -> String {
    let mut text = format!("Loaded \"{}\".\n", entry.name);
    for message in &entry.messages {
        text.push_str(&format!(
            "\n{}: {}\n{}",
            message.role.as_str(),
            message.content,
            render_sources(message)
        ));
    }
    text
}
