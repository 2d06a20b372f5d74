use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

use agent_tools::{ApprovalPolicy, FsBoundary, FsMode, NullToolLogger, PtyManager, ToolRouter};
use lincona::config::{ReasoningEffort, ResolvedConfig, Verbosity};
use lincona::driver::{ConversationDriver, SharedApprovalPrompt};
use lincona::shutdown::{install_signal_hooks, InterruptState, ShutdownCoordinator};
use responses_api::{HttpTransport, ResponsesApiConfig, ResponsesClient};
use session_store::{delete_session, iter_events, list_sessions, sessions_dir, LogLevel};

const USAGE: &str = "Usage:\n  lincona [options] [chat]\n  lincona [options] tool <name> --json <payload>\n  lincona sessions list\n  lincona sessions show <session-id>\n  lincona sessions rm <session-id>\n  lincona config path\n  lincona config print\n\nOptions:\n  --model <id>             Override the default model id\n  --reasoning <level>      none | minimal | low | medium | high\n  --fs-mode <mode>         restricted | unrestricted\n  --approval <policy>      never | on-request | always\n  --log-level <level>      debug | info | warning | error\n  --base-url <url>         Responses endpoint base URL\n  --data-root <path>       Override the data root (default ~/.lincona)\n  --debug[=LOGFILE]        Verbose diagnostics (default lincona-debug.log)";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Chat,
    Tool { name: String, json_payload: String },
    Sessions(SessionsAction),
    Config(ConfigAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionsAction {
    List,
    Show(String),
    Rm(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigAction {
    Path,
    Print,
}

#[derive(Debug, Default)]
struct Invocation {
    command: Option<Command>,
    model: Option<String>,
    reasoning: Option<ReasoningEffort>,
    fs_mode: Option<FsMode>,
    approval: Option<ApprovalPolicy>,
    log_level: Option<LogLevel>,
    base_url: Option<String>,
    data_root: Option<String>,
    debug_log: Option<String>,
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    std::process::exit(run(args));
}

fn run(args: Vec<String>) -> i32 {
    let invocation = match parse_invocation(args) {
        Ok(invocation) => invocation,
        Err(message) => {
            eprintln!("{message}\n{USAGE}");
            return 2;
        }
    };

    if let Some(debug_log) = &invocation.debug_log {
        if let Err(message) = init_debug_logging(debug_log) {
            eprintln!("{message}");
            return 2;
        }
    }

    let config = resolve_config(&invocation);
    match invocation.command.clone().unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config),
        Command::Tool { name, json_payload } => run_tool(&config, &name, &json_payload),
        Command::Sessions(action) => run_sessions(&config, &action),
        Command::Config(action) => run_config(&config, &action),
    }
}

fn parse_invocation(args: Vec<String>) -> Result<Invocation, String> {
    let mut invocation = Invocation::default();
    let mut args = args.into_iter().peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--model" => invocation.model = Some(required_value(&mut args, "--model")?),
            "--reasoning" => {
                let value = required_value(&mut args, "--reasoning")?;
                invocation.reasoning = Some(
                    ReasoningEffort::parse(&value)
                        .ok_or_else(|| format!("invalid reasoning level: {value}"))?,
                );
            }
            "--fs-mode" => {
                let value = required_value(&mut args, "--fs-mode")?;
                invocation.fs_mode =
                    Some(FsMode::parse(&value).ok_or_else(|| format!("invalid fs mode: {value}"))?);
            }
            "--approval" => {
                let value = required_value(&mut args, "--approval")?;
                invocation.approval = Some(
                    ApprovalPolicy::parse(&value)
                        .ok_or_else(|| format!("invalid approval policy: {value}"))?,
                );
            }
            "--log-level" => {
                let value = required_value(&mut args, "--log-level")?;
                invocation.log_level = Some(
                    LogLevel::parse(&value).ok_or_else(|| format!("invalid log level: {value}"))?,
                );
            }
            "--base-url" => invocation.base_url = Some(required_value(&mut args, "--base-url")?),
            "--data-root" => invocation.data_root = Some(required_value(&mut args, "--data-root")?),
            "--debug" => invocation.debug_log = Some("lincona-debug.log".to_string()),
            debug_with_file if debug_with_file.starts_with("--debug=") => {
                let file = debug_with_file.trim_start_matches("--debug=");
                if file.is_empty() {
                    return Err("--debug= requires a file name".to_string());
                }
                invocation.debug_log = Some(file.to_string());
            }
            "chat" => set_command(&mut invocation, Command::Chat)?,
            "tool" => {
                let name = args.next().ok_or("tool requires a tool name")?;
                let mut json_payload = None;
                while let Some(flag) = args.next() {
                    match flag.as_str() {
                        "--json" => json_payload = Some(required_value(&mut args, "--json")?),
                        unknown => return Err(format!("unknown tool argument: {unknown}")),
                    }
                }
                set_command(
                    &mut invocation,
                    Command::Tool {
                        name,
                        json_payload: json_payload.unwrap_or_else(|| "{}".to_string()),
                    },
                )?;
            }
            "sessions" => {
                let action = match args.next().as_deref() {
                    Some("list") => SessionsAction::List,
                    Some("show") => {
                        SessionsAction::Show(args.next().ok_or("sessions show requires a session id")?)
                    }
                    Some("rm") => {
                        SessionsAction::Rm(args.next().ok_or("sessions rm requires a session id")?)
                    }
                    other => {
                        return Err(format!(
                            "sessions requires list, show, or rm (got {})",
                            other.unwrap_or("nothing")
                        ));
                    }
                };
                set_command(&mut invocation, Command::Sessions(action))?;
            }
            "config" => {
                let action = match args.next().as_deref() {
                    Some("path") => ConfigAction::Path,
                    Some("print") => ConfigAction::Print,
                    other => {
                        return Err(format!(
                            "config requires path or print (got {})",
                            other.unwrap_or("nothing")
                        ));
                    }
                };
                set_command(&mut invocation, Command::Config(action))?;
            }
            unknown => return Err(format!("unknown argument: {unknown}")),
        }
    }

    Ok(invocation)
}

fn required_value(
    args: &mut std::iter::Peekable<std::vec::IntoIter<String>>,
    flag: &str,
) -> Result<String, String> {
    args.next().ok_or_else(|| format!("missing value for {flag}"))
}

fn set_command(invocation: &mut Invocation, command: Command) -> Result<(), String> {
    if invocation.command.is_some() {
        return Err("only one subcommand may be given".to_string());
    }
    invocation.command = Some(command);
    Ok(())
}

/// Thin shim: the configuration front-end proper is out of scope, so the
/// resolved values come from environment variables plus CLI overrides.
fn resolve_config(invocation: &Invocation) -> ResolvedConfig {
    let api_key = std::env::var("LINCONA_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .unwrap_or_default();

    let mut config = ResolvedConfig::new(api_key);
    if let Some(model) = &invocation.model {
        config = config.with_model(model.clone());
    }
    if let Ok(models) = std::env::var("LINCONA_MODELS") {
        let allowed: Vec<String> = models
            .split(',')
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        if !allowed.is_empty() {
            config = config.with_allowed_models(allowed);
        }
    }
    if let Some(reasoning) = invocation.reasoning {
        config.reasoning_effort = reasoning;
    }
    if let Ok(verbosity) = std::env::var("LINCONA_VERBOSITY") {
        if let Some(verbosity) = Verbosity::parse(&verbosity) {
            config.verbosity = verbosity;
        }
    }
    if let Some(fs_mode) = invocation.fs_mode {
        config.fs_mode = fs_mode;
    }
    if let Some(approval) = invocation.approval {
        config.approval_policy = approval;
    }
    if let Some(log_level) = invocation.log_level {
        config.log_level = log_level;
    }
    if let Some(base_url) = &invocation.base_url {
        config = config.with_base_url(base_url.clone());
    }
    if let Some(data_root) = &invocation.data_root {
        config = config.with_data_root(data_root.clone());
    }
    config
}

fn init_debug_logging(path: &str) -> Result<(), String> {
    let file = std::fs::File::create(path)
        .map_err(|error| format!("cannot open debug log {path}: {error}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn run_chat(config: ResolvedConfig) -> i32 {
    if config.api_key.trim().is_empty() {
        eprintln!("no API key: set LINCONA_API_KEY or OPENAI_API_KEY");
        return 2;
    }

    let transport = match HttpTransport::new(
        ResponsesApiConfig::new(config.api_key.clone())
            .with_base_url(config.base_url.clone())
            .with_timeout(config.request_timeout),
    ) {
        Ok(transport) => transport,
        Err(error) => {
            eprintln!("cannot initialize transport: {error}");
            return 2;
        }
    };
    let client = ResponsesClient::new(Arc::new(transport))
        .with_default_model(config.model.clone())
        .with_default_reasoning_effort(config.reasoning_effort.as_str())
        .with_default_verbosity(config.verbosity.as_str());

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let interrupts = Arc::new(InterruptState::new());
    if let Err(error) = install_signal_hooks(Arc::clone(&shutdown), Arc::clone(&interrupts)) {
        eprintln!("cannot install signal handlers: {error}");
        return 1;
    }

    let prompt: SharedApprovalPrompt = Arc::new(Mutex::new(
        |tool_name: &str, _args: &serde_json::Value| -> bool {
            eprint!("Allow tool '{tool_name}'? [y/N] ");
            let _ = std::io::stderr().flush();
            let mut answer = String::new();
            if std::io::stdin().lock().read_line(&mut answer).is_err() {
                return false;
            }
            matches!(answer.trim(), "y" | "Y" | "yes")
        },
    ));

    let mut driver = match ConversationDriver::new(
        config,
        client,
        Arc::clone(&shutdown),
        Arc::clone(&interrupts),
        Some(prompt),
    ) {
        Ok(driver) => driver,
        Err(error) => {
            eprintln!("startup failed: {error}");
            shutdown.run();
            return 1;
        }
    };

    println!(
        "Session: {} | model={} fs_mode={}",
        driver.state().session_id,
        driver.state().model,
        driver.state().fs_mode.as_str()
    );

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        // An interrupt delivered at the prompt only clears pending intent.
        interrupts.clear();

        match driver.handle_line(&line) {
            Ok(lincona::driver::TurnControl::Continue) => {}
            Ok(lincona::driver::TurnControl::Quit) => break,
            Err(fatal) => {
                driver.record_fatal(&fatal);
                eprintln!("fatal: {fatal} (details: {})", driver.log_path().display());
                shutdown.run();
                return 1;
            }
        }
    }

    shutdown.run();
    0
}

fn run_tool(config: &ResolvedConfig, name: &str, json_payload: &str) -> i32 {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(error) => {
            eprintln!("cannot resolve working directory: {error}");
            return 1;
        }
    };
    let boundary = match FsBoundary::new(config.fs_mode, cwd) {
        Ok(boundary) => boundary,
        Err(error) => {
            eprintln!("cannot build boundary: {error}");
            return 1;
        }
    };

    let pty = Arc::new(PtyManager::new());
    let mut router = ToolRouter::new(Arc::new(boundary), Arc::clone(&pty), config.approval_policy);
    let outcome = router.dispatch(name, json_payload, &mut NullToolLogger);
    pty.close_all();

    match serde_json::to_string_pretty(&outcome) {
        Ok(rendered) => println!("{rendered}"),
        Err(error) => {
            eprintln!("cannot render tool outcome: {error}");
            return 1;
        }
    }
    i32::from(!outcome.success)
}

fn run_sessions(config: &ResolvedConfig, action: &SessionsAction) -> i32 {
    let dir = sessions_dir(&config.data_root);
    match action {
        SessionsAction::List => match list_sessions(&dir) {
            Ok(sessions) => {
                for info in sessions {
                    println!(
                        "{} {}B {}",
                        info.session_id,
                        info.size_bytes,
                        info.path.display()
                    );
                }
                0
            }
            Err(error) => {
                eprintln!("error: {error}");
                1
            }
        },
        SessionsAction::Show(session_id) => {
            let path = dir.join(format!("{session_id}.jsonl"));
            let events = match iter_events(&path) {
                Ok(events) => events,
                Err(error) => {
                    eprintln!("error: {error}");
                    return 1;
                }
            };
            for event in events {
                match event.and_then(|event| {
                    serde_json::to_string(&event).map_err(|source| {
                        session_store::SessionStoreError::json_serialize(&path, source)
                    })
                }) {
                    Ok(line) => println!("{line}"),
                    Err(error) => {
                        eprintln!("error: {error}");
                        return 1;
                    }
                }
            }
            0
        }
        SessionsAction::Rm(session_id) => match delete_session(session_id, &dir) {
            Ok(()) => 0,
            Err(error) => {
                eprintln!("error: {error}");
                1
            }
        },
    }
}

fn run_config(config: &ResolvedConfig, action: &ConfigAction) -> i32 {
    match action {
        ConfigAction::Path => {
            println!("{}", config.data_root.join("config.toml").display());
            0
        }
        ConfigAction::Print => {
            println!("{config:#?}");
            0
        }
    }
}
