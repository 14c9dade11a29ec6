use clap::{Parser, Subcommand};
use std::env;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use funckit_core::settings::{default_settings_path, load_settings};
use funckit_core::{CoreToolsManager, VERSION};

mod commands;

/// Manage local Azure Functions Core Tools installations
#[derive(Parser, Debug)]
#[command(
    name = "funckit",
    about = "Manage local Azure Functions Core Tools installations",
    version,
    long_about = "funckit resolves Azure Functions Core Tools releases from the public \
                  release feed, downloads the artifact matching the current platform, \
                  and keeps per-version installations under a local download root."
)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug output")]
    verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Ensure Core Tools for a runtime version are available, downloading on a miss")]
    Get(commands::GetArgs),

    #[command(about = "List locally installed Core Tools versions and release tags")]
    List,

    #[command(about = "Update every locally managed version to its current release")]
    Update,

    #[command(about = "Remove broken and stale release folders")]
    Prune(commands::PruneArgs),
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("funckit v{} starting", VERSION);

    let settings = load_settings(&default_settings_path());
    let manager = CoreToolsManager::new(settings);

    let exit_code = match &args.command {
        Commands::Get(get_args) => commands::handle_get(&manager, get_args).await,
        Commands::List => commands::handle_list(&manager),
        Commands::Update => commands::handle_update(&manager).await,
        Commands::Prune(prune_args) => commands::handle_prune(&manager, prune_args),
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let mut filter = EnvFilter::from_default_env();

    if env::var("RUST_LOG").is_err() {
        filter = filter
            .add_directive(level.into())
            .add_directive("hyper=warn".parse().expect("static directive"))
            .add_directive("reqwest=warn".parse().expect("static directive"));
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}
