use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use tokio_util::sync::CancellationToken;

use clubbot::config::{CompletionBackend, Settings};
use clubbot::logging::init_logging;
use clubbot::services::{claude, completion, telegram};
use clubbot::utils::format::normalize_empty_lines;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!("clubbot {} - Conversational Telegram bot for community clubs", VERSION);
    println!();
    println!("USAGE:");
    println!("    clubbot [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help              Print help information");
    println!("    -v, --version           Print version information");
    println!("    --token <TOKEN>         Telegram bot token (overrides TELEGRAM_BOT_TOKEN)");
    println!("    --config <PATH>         Settings file (default: ~/.clubbot/settings.json)");
    println!("    --prompt <TEXT>         Send prompt to the completion backend and print the response");
}

fn print_version() {
    println!("clubbot {}", VERSION);
}

#[derive(Default)]
struct Args {
    token: Option<String>,
    config: Option<PathBuf>,
    prompt: Option<String>,
}

enum Command {
    Help,
    Version,
    Run(Args),
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut parsed = Args::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "--token" => {
                parsed.token = Some(iter.next().ok_or("--token requires a value")?.clone());
            }
            "--config" => {
                parsed.config = Some(PathBuf::from(iter.next().ok_or("--config requires a path")?));
            }
            "--prompt" => {
                parsed.prompt = Some(iter.next().ok_or("--prompt requires a text argument")?.clone());
            }
            other => return Err(format!("Unknown option: {other}")),
        }
    }
    Ok(Command::Run(parsed))
}

fn check_backend(settings: &Settings) -> Result<(), String> {
    if settings.completion.backend == CompletionBackend::ClaudeCli && !claude::is_claude_available() {
        return Err("Claude CLI is not available. Please install Claude CLI: https://claude.ai/cli".to_string());
    }
    Ok(())
}

async fn handle_prompt(settings: &Settings, prompt: &str) -> Result<(), String> {
    check_backend(settings)?;
    let backend = completion::from_settings(&settings.completion).map_err(|e| e.to_string())?;
    let answer = backend
        .complete(CancellationToken::new(), prompt)
        .await
        .map_err(|e| e.to_string())?;
    println!("{}", normalize_empty_lines(&answer));
    Ok(())
}

async fn run(args: Args) -> Result<(), String> {
    let settings = Settings::load(args.config.as_deref()).map_err(|e| e.to_string())?;
    init_logging(&settings.log_level, &settings.log_format);

    if let Some(prompt) = args.prompt {
        return handle_prompt(&settings, &prompt).await;
    }

    let token = settings
        .resolve_token(args.token.as_deref())
        .map_err(|e| e.to_string())?;
    check_backend(&settings)?;
    let backend = completion::from_settings(&settings.completion).map_err(|e| e.to_string())?;
    telegram::run_bot(&token, &settings, backend).await;
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&args) {
        Ok(Command::Help) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Version) => {
            print_version();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Run(args)) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Use --help for usage information");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
