use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use sysup_session::{Action, CleanScope, CommandReplay, DownloadRequest, SessionError};

#[derive(Parser, Debug)]
#[command(name = "sysup", version)]
#[command(about = "Prepare system for upgrade", long_about = None)]
#[command(after_help = "Use 'sysup <ACTION> --help' for more info.")]
pub(crate) struct Cli {
    /// Print more info
    #[arg(short, long, global = true, conflicts_with = "debug")]
    pub(crate) verbose: bool,
    /// Print lots of debugging info
    #[arg(short, long, global = true)]
    pub(crate) debug: bool,
    /// Where to write detailed logs
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) log: Option<PathBuf>,
    /// Configuration file (default: /etc/sysup/sysup.toml, or $SYSUP_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Commands {
    /// Show upgrade status
    Status,
    /// Download data for upgrade
    Download {
        /// Version to upgrade to (a number or "rawhide")
        version: String,
        /// Download directory
        #[arg(long, value_name = "DIR")]
        datadir: Option<PathBuf>,
        /// Install packages from the new release even if they are older
        #[arg(long)]
        distro_sync: bool,
        /// Disable GPG signature checking (not recommended!)
        #[arg(long)]
        nogpgcheck: bool,
        /// Extra item to be installed during upgrade
        #[arg(long = "add-install", value_name = "PKG-PATTERN|@GROUP-ID")]
        add_install: Vec<String>,
    },
    /// Resume or retry download
    #[command(visible_aliases = ["retry", "refresh"])]
    Resume,
    /// Cancel download
    Cancel {
        /// Keep all downloaded data
        #[arg(long)]
        no_clean: bool,
    },
    /// Reboot and start upgrade
    Reboot,
    /// Clean up data
    Clean {
        /// What to clean up
        #[arg(value_enum)]
        what: CleanTarget,
    },
    #[command(name = "system-upgrade", hide = true)]
    SystemUpgrade {
        #[arg(long)]
        testing: bool,
        #[arg(long)]
        reboot: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CleanTarget {
    Packages,
    Metadata,
    Misc,
    All,
}

impl From<CleanTarget> for CleanScope {
    fn from(target: CleanTarget) -> Self {
        match target {
            CleanTarget::Packages => Self::Packages,
            CleanTarget::Metadata => Self::Metadata,
            CleanTarget::Misc => Self::Misc,
            CleanTarget::All => Self::All,
        }
    }
}

/// The invocation without the program name, as stored for later replay.
/// Paths may hold any bytes, but the stored command line must be text.
pub(crate) fn utf8_argv(
    args: impl IntoIterator<Item = OsString>,
) -> Result<Vec<String>, SessionError> {
    args.into_iter()
        .map(|arg| {
            arg.into_string()
                .map_err(|_| SessionError::usage("arguments must be valid UTF-8"))
        })
        .collect()
}

/// Maps a parsed command to a session action. `argv` is the invocation
/// without the program name; downloads keep it for later replay.
pub(crate) fn action_from_command(command: Commands, argv: Vec<String>) -> Action {
    match command {
        Commands::Status => Action::Status,
        Commands::Download {
            version,
            datadir,
            distro_sync,
            nogpgcheck,
            add_install,
        } => Action::Download {
            request: DownloadRequest {
                releasever: version,
                datadir,
                distro_sync,
                nogpgcheck,
                add_install,
            },
            argv,
        },
        Commands::Resume => Action::Resume,
        Commands::Cancel { no_clean } => Action::Cancel {
            keep_data: no_clean,
        },
        Commands::Reboot => Action::Reboot,
        Commands::Clean { what } => Action::Clean(what.into()),
        Commands::SystemUpgrade { testing, reboot } => Action::SystemUpgrade { testing, reboot },
    }
}

/// Re-parses a stored command line with the same grammar it was typed in.
pub(crate) struct ClapReplay;

impl CommandReplay for ClapReplay {
    fn parse_download(&self, argv: &[String]) -> Result<DownloadRequest, SessionError> {
        let words = std::iter::once("sysup").chain(argv.iter().map(String::as_str));
        let cli = Cli::try_parse_from(words).map_err(|err| {
            SessionError::usage(format!("stored command line no longer parses: {err}"))
        })?;
        match action_from_command(cli.command, argv.to_vec()) {
            Action::Download { request, .. } => Ok(request),
            other => Err(SessionError::usage(format!(
                "stored command line is not a download: {}",
                other.kind()
            ))),
        }
    }
}
