use std::ffi::OsString;
use std::path::PathBuf;

use sysup_lock::OsExclusionLock;
use sysup_session::{
    Action, Collaborators, Coordinator, InterruptFlag, SessionError, SystemdBootPreparer,
    UpgradeLayout,
};
use tracing::{debug, info, warn};

use crate::cli::{action_from_command, utf8_argv, ClapReplay, Cli, Commands};
use crate::config::{load_config, resolve_config_source, SysupConfig, CONFIG_ENV};
use crate::helper::HelperPackageManager;
use crate::logging::{console_level, init_logging, LogOptions};
use crate::render::{current_output_style, TerminalReporter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs one invocation and returns the process exit status.
pub(crate) fn run_cli(cli: Cli, args: Vec<OsString>) -> i32 {
    let reporter = TerminalReporter::new(current_output_style());

    let argv = match utf8_argv(args) {
        Ok(argv) => argv,
        Err(err) => {
            reporter.print_error(&err.to_string());
            return err.exit_code();
        }
    };

    let env_config = std::env::var(CONFIG_ENV).ok();
    let source = resolve_config_source(cli.config.as_deref(), env_config.as_deref());
    let config = match load_config(&source) {
        Ok(config) => config,
        Err(err) => {
            reporter.print_error(&format!("{err:#}"));
            return 2;
        }
    };

    // Before logging: only root can open the log file.
    if let Err(err) = check_privileges(&cli.command, &config, running_as_root()) {
        reporter.print_error(&err.to_string());
        return err.exit_code();
    }

    let is_status = matches!(cli.command, Commands::Status);
    let log_options = LogOptions {
        console: console_level(cli.verbose, cli.debug),
        file: (!is_status).then(|| log_file(&cli, &config)),
    };
    if let Err(err) = init_logging(&log_options) {
        reporter.print_error(&format!("{err:#}"));
        return 2;
    }

    info!("sysup {VERSION} starting");
    debug!(?argv, config = %source.path.display(), root = %config.root.display(), "invocation");

    let result = run_command(cli.command, argv, &config, &reporter);
    let code = match &result {
        Ok(()) => 0,
        Err(err) => {
            info!(error = %err, "command failed");
            reporter.print_error(&err.to_string());
            err.exit_code()
        }
    };
    info!("sysup {VERSION} exiting {}", exit_label(&result));
    code
}

fn log_file(cli: &Cli, config: &SysupConfig) -> PathBuf {
    cli.log.clone().unwrap_or_else(|| config.log_file.clone())
}

pub(crate) fn exit_label(result: &Result<(), SessionError>) -> &'static str {
    match result {
        Ok(()) => "cleanly",
        Err(SessionError::Interrupted) => "on keyboard interrupt",
        Err(SessionError::Usage(_)) => "with error: usage",
        Err(SessionError::StateConflict { .. }) => "with error: state conflict",
        Err(SessionError::AlreadyRunning { .. }) => "with error: already running",
        Err(SessionError::Collaborator(_)) => "with error: package manager",
        Err(SessionError::Store(_) | SessionError::Fatal(_)) => "with unhandled error",
    }
}

/// Every command but `status` changes system state and needs root, unless
/// the config turns the check off.
pub(crate) fn check_privileges(
    command: &Commands,
    config: &SysupConfig,
    is_root: bool,
) -> Result<(), SessionError> {
    if matches!(command, Commands::Status) || !config.require_root || is_root {
        return Ok(());
    }
    Err(SessionError::usage("you must be root to do this."))
}

fn run_command(
    command: Commands,
    argv: Vec<String>,
    config: &SysupConfig,
    reporter: &TerminalReporter,
) -> Result<(), SessionError> {
    let layout = UpgradeLayout::new(&config.root);
    let is_status = matches!(command, Commands::Status);

    let interrupt = InterruptFlag::new();
    if !is_status {
        let flag = interrupt.clone();
        if let Err(err) = ctrlc::set_handler(move || flag.raise()) {
            warn!("failed to install interrupt handler: {err}");
        }
    }

    let mut packages =
        HelperPackageManager::new(config.helper.program.clone(), config.helper.args.clone());
    debug!(helper = %packages.program().display(), "package helper");
    let mut boot = SystemdBootPreparer::new(layout.clone(), config.reboot_command.clone());
    let mut coordinator = Coordinator::new(
        layout,
        Collaborators {
            locks: &OsExclusionLock,
            packages: &mut packages,
            boot: &mut boot,
            reporter,
            replay: &ClapReplay,
            interrupt,
        },
    );

    let action = action_from_command(command, argv);
    let result = match action {
        Action::Status => Ok(()),
        action => coordinator.run(action),
    };

    match coordinator.status() {
        Ok(status) => println!("{status}"),
        Err(err) => warn!("failed to read upgrade status: {err}"),
    }
    result
}

#[cfg(unix)]
fn running_as_root() -> bool {
    effective_uid() == 0
}

#[cfg(unix)]
fn effective_uid() -> libc::uid_t {
    // SAFETY: geteuid takes no arguments, touches no memory and cannot fail.
    unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    true
}
