use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use indicatif::{MultiProgress, ProgressDrawTarget};
use miette::IntoDiagnostic;
use once_cell::sync::Lazy;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

mod commands;
mod reporter;
mod writer;

/// Returns a global instance of [`indicatif::MultiProgress`].
///
/// Logging is routed through this instance so log lines do not tear up pending progress bars.
pub fn global_multi_progress() -> MultiProgress {
    static GLOBAL_MP: Lazy<MultiProgress> = Lazy::new(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(20));
        mp
    });
    GLOBAL_MP.clone()
}

/// Create, extract, list and verify tar backup archives
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Write files and directories to a new archive and print its digest
    Create(commands::create::Opt),
    /// Recreate the contents of an archive in a directory
    Extract(commands::extract::Opt),
    /// Print the entries of an archive
    List(commands::list::Opt),
    /// Check an archive against a previously printed digest
    Verify(commands::verify::Opt),
}

/// Entry point of the `stash` cli.
fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // The verbosity flags set the default level, `RUST_LOG` can still override it.
    let env_filter = EnvFilter::builder()
        .with_default_directive(cli.verbose.tracing_level_filter().into())
        .from_env()
        .into_diagnostic()?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer::IndicatifWriter::new(global_multi_progress()))
        .without_time()
        .finish()
        .try_init()
        .into_diagnostic()?;

    match cli.command {
        Commands::Create(opt) => commands::create::create(opt),
        Commands::Extract(opt) => commands::extract::extract(opt),
        Commands::List(opt) => commands::list::list(opt),
        Commands::Verify(opt) => commands::verify::verify(opt),
    }
}
