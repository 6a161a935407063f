//! CLI entry point for toolflow.

mod cli;

use async_trait::async_trait;
use clap::Parser;
use cli::{Args, ChatArgs, Command};
use serde_json::{Map, Value};
use std::future::Future;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toolflow::api::ApiClient;
use toolflow::chat::{
    ApprovalPolicy, Approver, ChatBot, ChatEvent, ChatEventEnvelope, ChatOptions, ChatRuntime,
    ChatSession, ConfirmationRequest, FileSessionStore, SessionPersistence, SessionState,
    SessionSummary, TurnOutcome,
};
use toolflow::config::{
    default_global_config_path, initialize_config_at, load_config_with_source, Config,
    ConfigInitResult,
};
use toolflow::error::{ChatError, ToolError};
use toolflow::prompt::{render_system_prompt, SystemPromptParams};
use toolflow::render::Renderer;
use toolflow::tools::builtin::register_builtins;
use toolflow::tools::{ToolExecutor, ToolRegistry};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Owner recorded on sessions created from the terminal.
const CLI_OWNER: &str = "toolflow-cli";

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();
    let renderer = Renderer::new(!args.no_color);
    if let Err(msg) = run(args, renderer).await {
        renderer.error(&msg);
        std::process::exit(1);
    }
}

/// `TOOLFLOW_LOG` wins over `RUST_LOG`; default is warnings only.
fn init_tracing() {
    let filter = std::env::var("TOOLFLOW_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args, renderer: Renderer) -> Result<(), String> {
    let command = args
        .command
        .unwrap_or_else(|| Command::Chat(ChatArgs::default()));
    if let Command::Init { force } = command {
        return init_config(&renderer, force);
    }

    let (mut config, source) =
        load_config_with_source(args.config.as_deref()).map_err(|e| e.to_string())?;
    debug!(?source, "configuration loaded");

    match command {
        Command::Chat(chat) => {
            if let Some(model) = &chat.model {
                config.api.model = model.clone();
            }
            run_chat(&renderer, &config, chat).await
        }
        Command::Run { file } => run_script(&renderer, &config, &file).await,
        Command::Check { file, name } => check_tool(&renderer, &config, &file, name.as_deref()),
        Command::Tools => {
            render_tools(&renderer, &build_registry(&config)?);
            Ok(())
        }
        Command::Sessions => {
            let store = open_store(&config)?;
            let sessions = store.list().await.map_err(|e| e.to_string())?;
            render_sessions(&renderer, &sessions);
            Ok(())
        }
        Command::Init { .. } => Ok(()),
    }
}

fn init_config(renderer: &Renderer, force: bool) -> Result<(), String> {
    let path = default_global_config_path()
        .ok_or_else(|| "could not determine the user config directory".to_string())?;
    let result = initialize_config_at(&path, force).map_err(|e| e.to_string())?;
    let (label, path) = match result {
        ConfigInitResult::Created { path } => ("created", path),
        ConfigInitResult::AlreadyInitialized { path } => ("already exists (use --force)", path),
        ConfigInitResult::Overwritten { path } => ("overwritten", path),
    };
    renderer.field(label, &path.display().to_string());
    Ok(())
}

fn build_registry(config: &Config) -> Result<ToolRegistry, String> {
    let registry = ToolRegistry::new();
    register_builtins(&registry, &config.builtin_options()).map_err(|e| e.to_string())?;
    Ok(registry)
}

fn open_store(config: &Config) -> Result<FileSessionStore, String> {
    let dir = config.sessions.dir();
    FileSessionStore::open(&dir)
        .map_err(|e| format!("failed to open session store {}: {e}", dir.display()))
}

// ---------------------------------------------------------------------------
// chat
// ---------------------------------------------------------------------------

async fn run_chat(renderer: &Renderer, config: &Config, args: ChatArgs) -> Result<(), String> {
    let registry = build_registry(config)?;
    let store = Arc::new(open_store(config)?);
    let client = ApiClient::new(&config.api).map_err(|e| e.to_string())?;
    let runtime = ChatRuntime {
        service: Arc::new(client),
        executor: ToolExecutor::new(registry.clone()),
        store: store.clone(),
        approver: Arc::new(TerminalApprover { renderer: *renderer }),
        policy: ApprovalPolicy::from(&config.approval),
        options: ChatOptions::from_config(config),
    };

    let mut bot = match &args.session {
        Some(id) => ChatBot::open(runtime, id, CLI_OWNER)
            .await
            .map_err(|e| e.to_string())?,
        None => {
            let id = store.allocate_id().map_err(|e| e.to_string())?;
            let names = registry.names();
            let system_prompt = render_system_prompt(SystemPromptParams {
                enabled_tools: names.iter().map(String::as_str).collect(),
                custom_instructions: Some(config.agent.system_prompt.as_str()),
            });
            ChatBot::new(runtime, ChatSession::new(id, CLI_OWNER, &system_prompt))
        }
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    bot.set_event_sink(Some(tx));
    renderer.header(&config.api.model, &bot.session().id);
    info!(session = %bot.session().id, "chat started");

    if bot.session().is_interrupted() {
        if args.resume {
            turn(renderer, &mut bot, &mut rx, TurnKind::Resume, config.api.stream).await;
        } else {
            renderer.warn("this session has an interrupted turn; /resume or /discard it");
        }
    }

    if let Some(prompt) = args.prompt {
        let ok = turn(renderer, &mut bot, &mut rx, TurnKind::Send(prompt), config.api.stream).await;
        bot.reset();
        return if ok { Ok(()) } else { Err("turn did not complete".into()) };
    }

    loop {
        renderer.prompt();
        let Some(line) = read_stdin_line().await else {
            break;
        };
        let input = line.trim();
        let kind = match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/resume" => TurnKind::Resume,
            "/regenerate" => TurnKind::Regenerate,
            "/discard" => {
                match bot.discard_pending().await {
                    Ok(()) => renderer.detail("interrupted turn discarded"),
                    Err(e) => renderer.warn(&e.to_string()),
                }
                continue;
            }
            text => TurnKind::Send(text.to_string()),
        };
        turn(renderer, &mut bot, &mut rx, kind, config.api.stream).await;
    }
    bot.reset();
    Ok(())
}

enum TurnKind {
    Send(String),
    Resume,
    Regenerate,
}

/// Run one turn with Ctrl-C wired to its cancellation token. Returns true
/// when the turn settled.
async fn turn(
    renderer: &Renderer,
    bot: &mut ChatBot,
    rx: &mut mpsc::UnboundedReceiver<ChatEventEnvelope>,
    kind: TurnKind,
    streaming: bool,
) -> bool {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut view = EventView::new(*renderer);
    let result = match kind {
        TurnKind::Send(text) => drive(bot.send(&text, &cancel), rx, &mut view).await,
        TurnKind::Resume => drive(bot.resume(&cancel), rx, &mut view).await,
        TurnKind::Regenerate => drive(bot.regenerate(&cancel), rx, &mut view).await,
    };
    interrupt.abort();
    view.finish_line();

    match result {
        Ok(TurnOutcome::Settled { reply }) => {
            if !streaming {
                if let Some(reply) = reply {
                    renderer.assistant_message(&reply);
                }
            }
            true
        }
        Ok(TurnOutcome::Interrupted {
            completed_calls,
            outstanding_calls,
        }) => {
            renderer.warn(&format!(
                "turn interrupted ({completed_calls} tool calls done, {outstanding_calls} outstanding); /resume to continue"
            ));
            false
        }
        Err(err) => {
            renderer.error(&err.to_string());
            if bot.state() == SessionState::Interrupted {
                renderer.detail("session saved as interrupted; /resume to retry");
            }
            false
        }
    }
}

/// Poll the turn while rendering its events in order.
async fn drive<F>(
    turn: F,
    rx: &mut mpsc::UnboundedReceiver<ChatEventEnvelope>,
    view: &mut EventView,
) -> Result<TurnOutcome, ChatError>
where
    F: Future<Output = Result<TurnOutcome, ChatError>>,
{
    tokio::pin!(turn);
    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            Some(envelope) = rx.recv() => view.render(&envelope.event),
        }
    };
    while let Ok(envelope) = rx.try_recv() {
        view.render(&envelope.event);
    }
    result
}

struct EventView {
    renderer: Renderer,
    mid_line: bool,
}

impl EventView {
    fn new(renderer: Renderer) -> Self {
        Self {
            renderer,
            mid_line: false,
        }
    }

    fn render(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::ContentDelta { text } => {
                self.renderer.assistant_delta(text);
                self.mid_line = !text.ends_with('\n');
            }
            ChatEvent::ToolCallStarted { name, arguments, .. } => {
                self.finish_line();
                self.renderer.tool_call(name, arguments);
            }
            ChatEvent::ToolCallFinished {
                success, output, ..
            } => self.renderer.tool_result(*success, output),
            ChatEvent::ConfirmationRequested { .. } => self.finish_line(),
            ChatEvent::PersistFailed { error, .. } => {
                self.finish_line();
                self.renderer.warn(&format!("session not saved: {error}"));
            }
            ChatEvent::StateChanged { state, .. } => debug!(?state, "session state"),
            ChatEvent::Persisted { .. } => {}
        }
    }

    fn finish_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

/// Asks on the terminal. End of input means nobody can answer.
struct TerminalApprover {
    renderer: Renderer,
}

#[async_trait]
impl Approver for TerminalApprover {
    async fn approve(&self, request: &ConfirmationRequest) -> Result<bool, ChatError> {
        loop {
            self.renderer.approval_prompt(
                &request.call.function.name,
                &request.permissions.to_string(),
                &request.call.function.arguments,
            );
            let Some(line) = read_stdin_line().await else {
                return Err(ChatError::ConfirmationUnavailable(
                    "stdin closed".to_string(),
                ));
            };
            match parse_approval_decision(&line) {
                Some(decision) => return Ok(decision),
                None => self.renderer.warn("please answer y or n"),
            }
        }
    }
}

fn parse_approval_decision(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "" | "n" | "no" => Some(false),
        _ => None,
    }
}

/// One line from stdin; `None` on EOF or read failure.
async fn read_stdin_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    })
    .await
    .ok()
    .flatten()
}

// ---------------------------------------------------------------------------
// scripts and listings
// ---------------------------------------------------------------------------

async fn run_script(renderer: &Renderer, config: &Config, file: &Path) -> Result<(), String> {
    let source = std::fs::read_to_string(file)
        .map_err(|e| format!("failed to read {}: {e}", file.display()))?;
    let registry = build_registry(config)?;
    if !registry.contains("execute_code") {
        return Err("scripting is disabled (tools.scripting_enabled = false)".into());
    }
    let executor = ToolExecutor::new(registry);
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let mut args = Map::new();
    args.insert("code".into(), Value::String(source));
    let result = executor.run("execute_code", &args, &cancel).await;
    interrupt.abort();
    match result {
        Ok(Value::String(output)) => {
            renderer.assistant_message(&output);
            Ok(())
        }
        Ok(other) => {
            renderer.assistant_message(&other.to_string());
            Ok(())
        }
        Err(err) => Err(describe_tool_error(&err)),
    }
}

fn check_tool(
    renderer: &Renderer,
    config: &Config,
    file: &Path,
    name: Option<&str>,
) -> Result<(), String> {
    let source = std::fs::read_to_string(file)
        .map_err(|e| format!("failed to read {}: {e}", file.display()))?;
    let name = match name {
        Some(name) => name.to_string(),
        None => file
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| "cannot derive a tool name from the file name; pass --name".to_string())?
            .to_string(),
    };
    let tool = config
        .compiler()
        .compile_tool(&name, &source)
        .map_err(|e| describe_tool_error(&e))?;
    let descriptor = tool.descriptor();
    renderer.section(&descriptor.name);
    renderer.field("description", &descriptor.description);
    renderer.field("permissions", &descriptor.permissions.to_string());
    for param in &descriptor.params {
        let requirement = if param.required { "required" } else { "optional" };
        renderer.field(&format!("param {}", param.name), requirement);
    }
    for dependency in &descriptor.dependencies {
        renderer.field("depends on", dependency);
    }
    Ok(())
}

fn describe_tool_error(err: &ToolError) -> String {
    match err {
        ToolError::Compilation { diagnostics } => {
            format!("compilation failed:\n  {}", diagnostics.join("\n  "))
        }
        other => other.to_string(),
    }
}

fn render_tools(renderer: &Renderer, registry: &ToolRegistry) {
    renderer.section("tools");
    for descriptor in registry.list_by_capability(|_| true) {
        renderer.field(
            &format!("{} [{}]", descriptor.name, descriptor.permissions),
            descriptor.description.lines().next().unwrap_or_default(),
        );
    }
}

fn render_sessions(renderer: &Renderer, sessions: &[SessionSummary]) {
    renderer.section("sessions");
    if sessions.is_empty() {
        renderer.field("saved", "none");
        return;
    }
    for session in sessions {
        let mut line = format!(
            "{} (last used {} ago)",
            if session.title.is_empty() { "untitled" } else { session.title.as_str() },
            format_elapsed_since_epoch_millis(session.updated_at_millis)
        );
        if session.interrupted {
            line.push_str(" [interrupted]");
        }
        renderer.field(&session.id, &line);
    }
}

fn format_elapsed_since_epoch_millis(ts: u64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    format_elapsed(Duration::from_millis(now.saturating_sub(ts)))
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_approval_decision_supports_yes_no_and_default_deny() {
        assert_eq!(parse_approval_decision("y"), Some(true));
        assert_eq!(parse_approval_decision(" YES \n"), Some(true));
        assert_eq!(parse_approval_decision(""), Some(false));
        assert_eq!(parse_approval_decision("no"), Some(false));
        assert_eq!(parse_approval_decision("maybe"), None);
    }

    #[test]
    fn format_elapsed_uses_coarse_units() {
        assert_eq!(format_elapsed(Duration::from_secs(5)), "5s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m");
        assert_eq!(format_elapsed(Duration::from_secs(7200)), "2h");
        assert_eq!(format_elapsed(Duration::from_secs(200_000)), "2d");
    }

    #[test]
    fn compilation_errors_list_one_diagnostic_per_line() {
        let err = ToolError::Compilation {
            diagnostics: vec!["line 1, col 1: a".into(), "line 2, col 4: b".into()],
        };
        assert_eq!(
            describe_tool_error(&err),
            "compilation failed:\n  line 1, col 1: a\n  line 2, col 4: b"
        );
    }
}
