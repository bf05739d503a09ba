//! procquery core CLI
//!
//! The entry point for pq-core, answering two questions about a process:
//! - Does it have a live child? (`children`)
//! - What is its working directory? (`cwd`)
//!
//! Plus the plumbing they are built on (`relations`, `capabilities`).

use clap::{Args, Parser, Subcommand};
use pq_common::{OutputFormat, ProcessId, QueryError, QueryResult};
use pq_core::collect::RelationSource;
use pq_core::config::QueryConfig;
use pq_core::exit_codes::ExitCode;
use pq_core::log_event;
use pq_core::logging::{
    event_names, generate_run_id, get_host_id, init_logging, level_for_verbosity, LogConfig,
    LogContext, LogFormat, Stage,
};
use pq_core::query::{CwdStrategy, Introspector, SubprocessStrategy};
use std::fmt::Display;
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;

/// procquery - subprocess detection and working-directory resolution
#[derive(Parser)]
#[command(name = "pq-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Per-diagnostic timeout (milliseconds)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Log line format on stderr
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether a process has at least one live child
    Children(ChildrenArgs),

    /// Report a process's working directory
    Cwd(CwdArgs),

    /// List parent relations of every live process
    Relations(RelationsArgs),

    /// Show detected backends and effective configuration
    Capabilities,

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct ChildrenArgs {
    /// Process id to inspect
    pid: ProcessId,

    /// Use exactly this strategy instead of the platform order
    #[arg(long, conflicts_with = "all")]
    strategy: Option<SubprocessStrategy>,

    /// Run every strategy and report each answer
    #[arg(long)]
    all: bool,
}

#[derive(Args, Debug)]
struct CwdArgs {
    /// Process id to inspect
    pid: ProcessId,

    /// Use exactly this strategy instead of the platform order
    #[arg(long, conflicts_with = "all")]
    strategy: Option<CwdStrategy>,

    /// Run every strategy and report each answer
    #[arg(long)]
    all: bool,
}

#[derive(Args, Debug)]
struct RelationsArgs {
    /// Enumeration backend
    #[arg(long, default_value = "ps")]
    source: RelationSource,

    /// Only list children of this process
    #[arg(long)]
    parent: Option<ProcessId>,
}

// ============================================================================
// Main entry point
// ============================================================================

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Ok
            };
            let _ = e.print();
            std::process::exit(code.as_i32());
        }
    };

    let cli_level = if cli.global.quiet {
        Some(LevelFilter::ERROR)
    } else {
        level_for_verbosity(cli.global.verbose)
    };
    let log_config = LogConfig::from_env(cli_level, cli.global.log_format);
    init_logging(&log_config);

    let ctx = LogContext::new(generate_run_id(), get_host_id());
    let root = tracing::info_span!("pq", run_id = %ctx.run_id, host_id = %ctx.host_id);
    let _root = root.enter();

    log_event!(
        ctx,
        INFO,
        event_names::RUN_STARTED,
        Stage::Init,
        "starting pq-core"
    );

    let exit_code = match load_config(&cli.global, &ctx) {
        Ok(config) => match cli.command {
            Commands::Children(args) => run_children(&cli.global, &ctx, config, &args),
            Commands::Cwd(args) => run_cwd(&cli.global, &ctx, config, &args),
            Commands::Relations(args) => run_relations(&cli.global, &ctx, config, &args),
            Commands::Capabilities => run_capabilities(&cli.global, config),
            Commands::Version => {
                print_version(&cli.global);
                ExitCode::Ok
            }
        },
        Err(code) => code,
    };

    log_event!(
        ctx,
        INFO,
        event_names::RUN_FINISHED,
        Stage::Init,
        "pq-core finished",
        exit_code = exit_code.as_i32()
    );

    std::process::exit(exit_code.as_i32());
}

fn load_config(global: &GlobalOpts, ctx: &LogContext) -> Result<QueryConfig, ExitCode> {
    let mut config = match QueryConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log_event!(
                ctx,
                ERROR,
                event_names::CONFIG_ERROR,
                Stage::Init,
                "invalid environment",
                error = e.to_string()
            );
            eprintln!("pq-core: {}", e);
            return Err(ExitCode::ArgsError);
        }
    };

    if let Some(ms) = global.timeout_ms {
        if ms == 0 {
            eprintln!("pq-core: --timeout-ms must be greater than zero");
            return Err(ExitCode::ArgsError);
        }
        config = config.with_tool_timeout(Duration::from_millis(ms));
    }

    log_event!(
        ctx,
        DEBUG,
        event_names::CONFIG_LOADED,
        Stage::Init,
        "configuration loaded",
        tool_timeout_ms = config.tool_timeout.as_millis() as u64,
        proc_root = config.proc_root.display().to_string()
    );
    Ok(config)
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_children(
    global: &GlobalOpts,
    ctx: &LogContext,
    config: QueryConfig,
    args: &ChildrenArgs,
) -> ExitCode {
    let intro = Introspector::new(config);

    if args.all {
        let report = intro.has_subprocesses_all(args.pid);
        return output_report(global, "children", args.pid, &report, |answer| {
            if *answer {
                ExitCode::Ok
            } else {
                ExitCode::False
            }
        });
    }

    let result = match args.strategy {
        Some(strategy) => intro.has_subprocesses_via(strategy, args.pid),
        None => intro.has_subprocesses(args.pid),
    };
    let strategy = args.strategy.map(|s| s.to_string());

    match result {
        Ok(answer) => {
            log_event!(
                ctx,
                INFO,
                event_names::QUERY_FINISHED,
                Stage::Detect,
                "subprocess query answered",
                pid = args.pid.get(),
                has_subprocesses = answer
            );
            match global.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "command": "children",
                    "pid": args.pid,
                    "strategy": strategy.as_deref().unwrap_or("auto"),
                    "has_subprocesses": answer,
                    "generated_at": chrono::Utc::now().to_rfc3339(),
                })),
                OutputFormat::Summary => println!(
                    "{}: {}",
                    args.pid,
                    if answer { "has children" } else { "no children" }
                ),
            }
            if answer {
                ExitCode::Ok
            } else {
                ExitCode::False
            }
        }
        Err(e) => output_query_error(global, ctx, Stage::Detect, "children", args.pid, &e),
    }
}

fn run_cwd(global: &GlobalOpts, ctx: &LogContext, config: QueryConfig, args: &CwdArgs) -> ExitCode {
    let intro = Introspector::new(config);

    if args.all {
        let report = intro.working_directory_all(args.pid);
        return output_report(global, "cwd", args.pid, &report, |_| ExitCode::Ok);
    }

    let strategy = args.strategy.unwrap_or(CwdStrategy::Generic);
    let strategy_name = match strategy {
        CwdStrategy::Generic => "auto",
        other => other.as_str(),
    };
    match intro.working_directory_via(strategy, args.pid) {
        Ok(path) => {
            log_event!(
                ctx,
                INFO,
                event_names::QUERY_FINISHED,
                Stage::Resolve,
                "working directory resolved",
                pid = args.pid.get(),
                cwd = path.display().to_string()
            );
            match global.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "command": "cwd",
                    "pid": args.pid,
                    "strategy": strategy_name,
                    "cwd": path,
                    "generated_at": chrono::Utc::now().to_rfc3339(),
                })),
                OutputFormat::Summary => println!("{}", path.display()),
            }
            ExitCode::Ok
        }
        Err(e) => output_query_error(global, ctx, Stage::Resolve, "cwd", args.pid, &e),
    }
}

fn run_relations(
    global: &GlobalOpts,
    ctx: &LogContext,
    config: QueryConfig,
    args: &RelationsArgs,
) -> ExitCode {
    let intro = Introspector::new(config);

    let table = match intro.list_relations(args.source) {
        Ok(table) => table,
        Err(e) => {
            log_event!(
                ctx,
                WARN,
                event_names::QUERY_FAILED,
                Stage::Enumerate,
                "enumeration failed",
                source = args.source.as_str(),
                error = e.to_string()
            );
            emit_error(global, "relations", None, &e);
            return ExitCode::from(&e);
        }
    };

    match args.parent {
        Some(parent) => {
            let children = table.children_of(parent);
            match global.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "command": "relations",
                    "source": args.source,
                    "parent": parent,
                    "parent_found": table.contains(parent),
                    "children": children,
                    "generated_at": chrono::Utc::now().to_rfc3339(),
                })),
                OutputFormat::Summary => println!(
                    "{} children of {} ({} processes seen via {})",
                    children.len(),
                    parent,
                    table.len(),
                    args.source
                ),
            }
        }
        None => match global.format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "command": "relations",
                "source": args.source,
                "count": table.len(),
                "relations": table.iter().collect::<Vec<_>>(),
                "generated_at": chrono::Utc::now().to_rfc3339(),
            })),
            OutputFormat::Summary => {
                println!("{} processes seen via {}", table.len(), args.source)
            }
        },
    }
    ExitCode::Ok
}

fn run_capabilities(global: &GlobalOpts, config: QueryConfig) -> ExitCode {
    let intro = Introspector::new(config);
    let caps = intro.capabilities();

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "command": "capabilities",
            "capabilities": caps,
            "config": intro.config(),
            "subprocess_order": SubprocessStrategy::platform_order(),
            "cwd_order": CwdStrategy::platform_order(),
        })),
        OutputFormat::Summary => println!("{}", caps.summary()),
    }
    ExitCode::Ok
}

fn print_version(global: &GlobalOpts) {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "pq_core_version": env!("CARGO_PKG_VERSION"),
            "rust_version": env!("CARGO_PKG_RUST_VERSION"),
        })),
        OutputFormat::Summary => println!("pq-core {}", env!("CARGO_PKG_VERSION")),
    }
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("pq-core: failed to encode output: {}", e),
    }
}

fn output_query_error(
    global: &GlobalOpts,
    ctx: &LogContext,
    stage: Stage,
    command: &str,
    pid: ProcessId,
    error: &QueryError,
) -> ExitCode {
    log_event!(
        ctx,
        WARN,
        event_names::QUERY_FAILED,
        stage,
        "query failed",
        pid = pid.get(),
        kind = error.kind().to_string(),
        error = error.to_string()
    );
    emit_error(global, command, Some(pid), error);
    ExitCode::from(error)
}

fn emit_error(global: &GlobalOpts, command: &str, pid: Option<ProcessId>, error: &QueryError) {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "command": command,
            "pid": pid,
            "status": "error",
            "error": error.to_json(),
            "generated_at": chrono::Utc::now().to_rfc3339(),
        })),
        OutputFormat::Summary => eprintln!("pq-core {}: {}", command, error),
    }
}

/// Print a side-by-side strategy report and pick the exit code.
///
/// Successful answers must agree; disagreement is reported as an internal
/// error. With no successful answer the last failure decides the code.
fn output_report<S, T>(
    global: &GlobalOpts,
    command: &str,
    pid: ProcessId,
    report: &[(S, QueryResult<T>)],
    answer_code: impl Fn(&T) -> ExitCode,
) -> ExitCode
where
    S: Display,
    T: serde::Serialize + PartialEq,
{
    let answers: Vec<&T> = report.iter().filter_map(|(_, r)| r.as_ref().ok()).collect();
    let agree = answers.windows(2).all(|w| w[0] == w[1]);

    match global.format {
        OutputFormat::Json => {
            let results: Vec<serde_json::Value> = report
                .iter()
                .map(|(strategy, result)| match result {
                    Ok(value) => serde_json::json!({
                        "strategy": strategy.to_string(),
                        "status": "ok",
                        "value": value,
                    }),
                    Err(e) => serde_json::json!({
                        "strategy": strategy.to_string(),
                        "status": "error",
                        "error": e.to_json(),
                    }),
                })
                .collect();
            print_json(&serde_json::json!({
                "command": command,
                "pid": pid,
                "results": results,
                "agree": agree,
                "generated_at": chrono::Utc::now().to_rfc3339(),
            }));
        }
        OutputFormat::Summary => {
            for (strategy, result) in report {
                match result {
                    Ok(value) => println!(
                        "{:<14} {}",
                        strategy.to_string(),
                        serde_json::to_string(value).unwrap_or_default()
                    ),
                    Err(e) => println!("{:<14} error: {}", strategy.to_string(), e),
                }
            }
        }
    }

    match answers.first() {
        Some(_) if !agree => ExitCode::InternalError,
        Some(first) => answer_code(*first),
        None => report
            .last()
            .and_then(|(_, r)| r.as_ref().err())
            .map(ExitCode::from)
            .unwrap_or(ExitCode::CapabilityError),
    }
}
