use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

use tether::{Kind, Ref, SessionConfig, Value, Vm};

/// Tables nested deeper than this print as their address in JSON output.
const JSON_DEPTH_LIMIT: usize = 16;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Run Lua 5.4 scripts through the tether embedding layer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Lua source file and print what it returns
    Run {
        /// The source file to run
        file: Option<PathBuf>,

        /// Arguments to pass to the script (as the `arg` table)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        script_args: Vec<String>,

        /// Execute code directly from command line
        #[arg(short = 'c', long)]
        code: Option<String>,

        /// Do not load the standard libraries
        #[arg(long)]
        no_std: bool,

        /// Stack slots to reserve when the session opens
        #[arg(long)]
        stack: Option<i32>,

        /// Session configuration file (TOML, or JSON with a .json extension)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Print returned values as a JSON array
        #[arg(long)]
        json: bool,

        /// Execution timeout in seconds (0 = no timeout)
        #[arg(long, default_value = "0")]
        timeout: u64,
    },
    /// Compile a Lua source file without running it
    Check {
        /// The source file to check
        file: PathBuf,
    },
}

enum Source {
    Code(String),
    File(PathBuf),
}

impl Source {
    fn name(&self) -> String {
        match self {
            Source::Code(_) => "<code>".to_string(),
            Source::File(path) => path.to_string_lossy().to_string(),
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            script_args,
            code,
            no_std,
            stack,
            config,
            json,
            timeout,
        } => {
            let session = match session_config(config, no_std, stack) {
                Ok(session) => session,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let source = match (code, file) {
                (Some(code), _) => Source::Code(code),
                (None, Some(path)) => Source::File(path),
                (None, None) => {
                    eprintln!("error: no file specified");
                    eprintln!("usage: tether run <file> or tether run -c <code>");
                    return ExitCode::FAILURE;
                }
            };

            let run_result = if timeout > 0 {
                // The session is created on the worker; handles never cross threads.
                match with_deadline(Duration::from_secs(timeout), move || {
                    run(&source, &session, script_args, json)
                }) {
                    Some(result) => result,
                    None => {
                        eprintln!("error: execution timed out after {} seconds", timeout);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                run(&source, &session, script_args, json)
            };

            if let Err(e) = run_result {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Check { file } => {
            let mut vm = Vm::new();
            if let Err(e) = vm.open(false, tether::config::DEFAULT_STACK_RESERVE) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
            if let Err(e) = vm.load_file(&file) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
            println!("Syntax check passed.");
        }
    }

    ExitCode::SUCCESS
}

/// Run `job` on a worker thread, giving up after `limit`.
///
/// The worker is left running on timeout; the process exits right after.
fn with_deadline<F>(limit: Duration, job: F) -> Option<Result<(), String>>
where
    F: FnOnce() -> Result<(), String> + Send + 'static,
{
    let (done, finished) = mpsc::channel();
    let worker = thread::spawn(move || {
        let outcome = job();
        let _ = done.send(());
        outcome
    });
    finished.recv_timeout(limit).ok()?;
    Some(
        worker
            .join()
            .unwrap_or_else(|_| Err("script thread panicked".to_string())),
    )
}

fn session_config(
    path: Option<PathBuf>,
    no_std: bool,
    stack: Option<i32>,
) -> Result<SessionConfig, String> {
    let mut config = match path {
        Some(path) => SessionConfig::load(&path).map_err(|e| e.to_string())?,
        None => SessionConfig::default(),
    };
    if no_std {
        config.std_libs = false;
        config.package_path = None;
    }
    if let Some(stack) = stack {
        config.stack_reserve = stack;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn run(
    source: &Source,
    config: &SessionConfig,
    script_args: Vec<String>,
    json: bool,
) -> Result<(), String> {
    let vm = Vm::with_config(config).map_err(|e| e.to_string())?;

    let arg = vm.create_table(script_args.len(), 1, Some("arg"));
    arg.set_raw(&0, source.name().as_str());
    for (i, value) in script_args.iter().enumerate() {
        arg.set_raw(&(i + 1), value.as_str());
    }

    let results = match source {
        Source::Code(code) => vm.execute_string(code, None),
        Source::File(path) => vm.execute_file(path, None),
    }
    .map_err(|e| e.to_string())?;

    if json {
        let values: Vec<serde_json::Value> =
            results.iter().map(|r| to_json(r, JSON_DEPTH_LIMIT)).collect();
        let text = serde_json::to_string_pretty(&values).map_err(|e| e.to_string())?;
        println!("{}", text);
    } else {
        for result in &results {
            println!("{}", result);
        }
    }
    Ok(())
}

/// JSON rendering of a returned value.
///
/// Sequences become arrays, other tables objects with stringified keys.
/// Values JSON cannot express print as their `tostring`-like form.
fn to_json(value: &Ref, depth: usize) -> serde_json::Value {
    use serde_json::Value as Json;

    match value.kind() {
        Kind::None | Kind::Nil => Json::Null,
        Kind::Table if depth > 0 => {
            let len = value.len();
            let pairs: Vec<(Ref, Ref)> = value.iter().collect();
            if len > 0 && pairs.len() == len {
                Json::Array(
                    (1..=len)
                        .map(|i| to_json(&value.get_raw_ref(&i), depth - 1))
                        .collect(),
                )
            } else {
                let object = pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), to_json(v, depth - 1)))
                    .collect();
                Json::Object(object)
            }
        }
        _ => match value.as_::<Value>() {
            Some(Value::Bool(b)) => Json::Bool(b),
            Some(Value::Integer(n)) => Json::from(n),
            Some(Value::Number(n)) => serde_json::Number::from_f64(n)
                .map(Json::Number)
                .unwrap_or_else(|| Json::String(n.to_string())),
            Some(Value::String(bytes)) => Json::String(String::from_utf8_lossy(&bytes).into_owned()),
            _ => Json::String(value.to_string()),
        },
    }
}
