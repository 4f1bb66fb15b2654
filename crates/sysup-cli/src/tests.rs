use crate::cli::{action_from_command, utf8_argv, ClapReplay, CleanTarget, Cli, Commands};
use crate::config::{
    load_config, parse_config, resolve_config_source, ConfigSource, SysupConfig,
    DEFAULT_CONFIG_PATH,
};
use crate::dispatch::{check_privileges, exit_label};
use crate::helper::{
    classify_failure, parse_event_line, HelperEvent, HelperOutcome, HelperPackageManager,
    EXIT_REPO_UNAVAILABLE,
};
use crate::logging::console_level;
use crate::render::{
    render_progress_line, render_status_line, resolve_output_style, OutputStyle,
};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::cell::RefCell;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use sysup_session::{
    Action, CleanScope, CollaboratorError, CommandReplay, DownloadRequest, PackageManager,
    Reporter, ResolvedPackage, SessionError, SetupOptions, SyncMode,
};
use tracing_subscriber::filter::LevelFilter;

fn parse(words: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("sysup").chain(words.iter().copied()))
        .expect("must parse")
}

fn argv(words: &[&str]) -> Vec<String> {
    words.iter().map(|word| word.to_string()).collect()
}

#[test]
fn download_parses_all_flags() {
    let cli = parse(&[
        "download",
        "23",
        "--datadir",
        "/srv/upgrade",
        "--distro-sync",
        "--nogpgcheck",
        "--add-install",
        "vim",
        "--add-install",
        "@development-tools",
    ]);
    assert_eq!(
        cli.command,
        Commands::Download {
            version: "23".to_string(),
            datadir: Some(PathBuf::from("/srv/upgrade")),
            distro_sync: true,
            nogpgcheck: true,
            add_install: argv(&["vim", "@development-tools"]),
        }
    );
}

#[test]
fn download_requires_version() {
    let err = Cli::try_parse_from(["sysup", "download"]).expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
}

#[test]
fn resume_accepts_retry_and_refresh_aliases() {
    for word in ["resume", "retry", "refresh"] {
        assert_eq!(parse(&[word]).command, Commands::Resume, "{word}");
    }
}

#[test]
fn clean_accepts_each_scope() {
    assert_eq!(
        parse(&["clean", "packages"]).command,
        Commands::Clean {
            what: CleanTarget::Packages
        }
    );
    assert_eq!(
        parse(&["clean", "all"]).command,
        Commands::Clean {
            what: CleanTarget::All
        }
    );
    assert_eq!(CleanScope::from(CleanTarget::Metadata), CleanScope::Metadata);
    assert_eq!(CleanScope::from(CleanTarget::Misc), CleanScope::Misc);
}

#[test]
fn clean_rejects_unknown_scope() {
    let err = Cli::try_parse_from(["sysup", "clean", "everything"]).expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

#[test]
fn system_upgrade_parses_but_is_hidden_from_help() {
    assert_eq!(
        parse(&["system-upgrade", "--testing", "--reboot"]).command,
        Commands::SystemUpgrade {
            testing: true,
            reboot: true
        }
    );
    let help = Cli::command().render_help().to_string();
    assert!(!help.contains("system-upgrade"), "{help}");
    assert!(help.contains("download"));
}

#[test]
fn verbose_and_debug_conflict() {
    let err = Cli::try_parse_from(["sysup", "-v", "-d", "status"]).expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
}

#[test]
fn global_flags_are_accepted_after_the_command() {
    let cli = parse(&["status", "--log", "/tmp/sysup.log", "-v"]);
    assert!(cli.verbose);
    assert_eq!(cli.log.as_deref(), Some(Path::new("/tmp/sysup.log")));
    assert_eq!(cli.command, Commands::Status);
}

#[test]
fn commands_map_to_session_actions() {
    assert_eq!(
        action_from_command(Commands::Cancel { no_clean: true }, Vec::new()),
        Action::Cancel { keep_data: true }
    );
    assert_eq!(
        action_from_command(
            Commands::Clean {
                what: CleanTarget::Metadata
            },
            Vec::new()
        ),
        Action::Clean(CleanScope::Metadata)
    );
    let words = argv(&["download", "23"]);
    let action = action_from_command(parse(&["download", "23"]).command, words.clone());
    assert_eq!(
        action,
        Action::Download {
            request: DownloadRequest {
                releasever: "23".to_string(),
                ..DownloadRequest::default()
            },
            argv: words,
        }
    );
}

#[test]
fn replay_parses_stored_download_with_global_flags() {
    let stored = argv(&[
        "--log",
        "/tmp/sysup.log",
        "download",
        "rawhide",
        "--distro-sync",
        "--add-install",
        "vim",
    ]);
    let request = ClapReplay.parse_download(&stored).expect("must replay");
    assert_eq!(request.releasever, "rawhide");
    assert_eq!(request.sync_mode(), SyncMode::DistroSync);
    assert_eq!(request.add_install, argv(&["vim"]));
}

#[test]
fn replay_rejects_stored_non_download_command() {
    let err = ClapReplay
        .parse_download(&argv(&["reboot"]))
        .expect_err("must reject");
    assert!(matches!(err, SessionError::Usage(_)), "{err:?}");
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn replay_rejects_unparseable_command_line() {
    let err = ClapReplay
        .parse_download(&argv(&["download", "23", "--bogus"]))
        .expect_err("must reject");
    assert!(err.to_string().contains("no longer parses"), "{err}");
}

#[test]
fn utf8_argv_keeps_text_arguments_in_order() {
    let args = ["--log", "/tmp/sysup.log", "download", "23"]
        .into_iter()
        .map(OsString::from);
    assert_eq!(
        utf8_argv(args).expect("text arguments must convert"),
        argv(&["--log", "/tmp/sysup.log", "download", "23"])
    );
}

#[cfg(unix)]
#[test]
fn non_utf8_argument_is_a_usage_error() {
    use std::os::unix::ffi::OsStringExt;

    let datadir = OsString::from_vec(b"/tmp/\xff".to_vec());
    let args = vec![
        OsString::from("download"),
        OsString::from("99"),
        OsString::from("--datadir"),
        datadir,
    ];

    // clap takes the path as-is, so the command line parses.
    let words = std::iter::once(OsString::from("sysup")).chain(args.clone());
    let cli = Cli::try_parse_from(words).expect("clap must accept a non-UTF-8 path");
    assert!(matches!(cli.command, Commands::Download { .. }));

    let err = utf8_argv(args).expect_err("must reject non-UTF-8 argv");
    assert!(matches!(err, SessionError::Usage(_)), "{err:?}");
    assert_eq!(err.to_string(), "arguments must be valid UTF-8");
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn privilege_check_exempts_status_and_honours_config() {
    let config = SysupConfig::default();
    let download = parse(&["download", "23"]).command;

    let err = check_privileges(&download, &config, false).expect_err("non-root must fail");
    assert_eq!(err.to_string(), "you must be root to do this.");
    assert_eq!(err.exit_code(), 2);

    check_privileges(&download, &config, true).expect("root may download");
    check_privileges(&Commands::Status, &config, false).expect("anyone may ask for status");

    let relaxed = SysupConfig {
        require_root: false,
        ..SysupConfig::default()
    };
    check_privileges(&Commands::Reboot, &relaxed, false).expect("check disabled by config");
}

#[test]
fn empty_config_yields_defaults() {
    let config = parse_config("").expect("must parse");
    assert_eq!(config, SysupConfig::default());
    assert_eq!(config.root, PathBuf::from("/"));
    assert_eq!(config.log_file, PathBuf::from("/var/log/sysup.log"));
    assert!(config.require_root);
    assert_eq!(config.reboot_command, argv(&["systemctl", "reboot"]));
}

#[test]
fn config_reads_every_key() {
    let config = parse_config(
        r#"
root = "/mnt/sysimage"
log_file = "/tmp/sysup.log"
require_root = false
reboot_command = ["true"]

[helper]
program = "/usr/bin/python3"
args = ["/usr/libexec/sysup/dnf-helper.py"]
"#,
    )
    .expect("must parse");
    assert_eq!(config.root, PathBuf::from("/mnt/sysimage"));
    assert_eq!(config.log_file, PathBuf::from("/tmp/sysup.log"));
    assert!(!config.require_root);
    assert_eq!(config.reboot_command, argv(&["true"]));
    assert_eq!(config.helper.program, PathBuf::from("/usr/bin/python3"));
    assert_eq!(config.helper.args, argv(&["/usr/libexec/sysup/dnf-helper.py"]));
}

#[test]
fn config_rejects_unknown_keys() {
    let err = parse_config("rooot = \"/\"\n").expect_err("must reject");
    assert!(format!("{err:#}").contains("rooot"), "{err:#}");

    let err = parse_config("[helper]\nprogramme = \"x\"\n").expect_err("must reject");
    assert!(format!("{err:#}").contains("programme"), "{err:#}");
}

#[test]
fn config_rejects_relative_root() {
    let err = parse_config("root = \"sysimage\"\n").expect_err("must reject");
    assert!(err.to_string().contains("absolute"), "{err}");
}

#[test]
fn config_source_prefers_flag_then_environment() {
    let source = resolve_config_source(Some(Path::new("/a.toml")), Some("/b.toml"));
    assert_eq!(
        source,
        ConfigSource {
            path: PathBuf::from("/a.toml"),
            explicit: true
        }
    );

    let source = resolve_config_source(None, Some("/b.toml"));
    assert_eq!(source.path, PathBuf::from("/b.toml"));
    assert!(source.explicit);

    let source = resolve_config_source(None, Some(""));
    assert_eq!(source.path, PathBuf::from(DEFAULT_CONFIG_PATH));
    assert!(!source.explicit);
}

#[test]
fn missing_default_config_yields_defaults_but_missing_named_config_fails() {
    let dir = test_dir("config");
    let missing = dir.join("sysup.toml");

    let implicit = ConfigSource {
        path: missing.clone(),
        explicit: false,
    };
    assert_eq!(
        load_config(&implicit).expect("defaults"),
        SysupConfig::default()
    );

    let explicit = ConfigSource {
        path: missing.clone(),
        explicit: true,
    };
    let err = load_config(&explicit).expect_err("must fail");
    assert!(format!("{err:#}").contains("failed to read config"), "{err:#}");

    std::fs::write(&missing, "require_root = false\n").expect("must write config");
    assert!(!load_config(&explicit).expect("must load").require_root);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn console_level_follows_verbosity_flags() {
    assert_eq!(console_level(false, false), LevelFilter::WARN);
    assert_eq!(console_level(true, false), LevelFilter::INFO);
    assert_eq!(console_level(false, true), LevelFilter::DEBUG);
}

#[test]
fn resolve_output_style_uses_rich_only_for_tty_stdout() {
    assert_eq!(resolve_output_style(true), OutputStyle::Rich);
    assert_eq!(resolve_output_style(false), OutputStyle::Plain);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "step", "looking for upgrades..."),
        "looking for upgrades..."
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "step", "starting download..."),
        "[..] starting download..."
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "err", "download incomplete"),
        "[ERR] download incomplete"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "no repos"),
        "[WARN] no repos"
    );
}

#[test]
fn render_progress_line_bounds_percent() {
    let line = render_progress_line("download", 5, 4, None);
    assert!(line.contains("100%"), "{line}");
    assert!(line.contains("5/4"), "{line}");

    let line = render_progress_line("download", 1, 4, None);
    assert!(line.contains(" 25%"), "{line}");
}

#[test]
fn helper_event_lines_decode() {
    assert_eq!(
        parse_event_line(r#"{"progress":{"label":"download","current":3,"total":9}}"#),
        Some(HelperEvent::Progress {
            label: "download".to_string(),
            current: 3,
            total: 9
        })
    );
    assert_eq!(
        parse_event_line(r#"  {"message":"setting up repos"}  "#),
        Some(HelperEvent::Message("setting up repos".to_string()))
    );
    assert_eq!(
        parse_event_line(r#"{"result":["fedora","updates"]}"#),
        Some(HelperEvent::Result(serde_json::json!(["fedora", "updates"])))
    );
    assert_eq!(
        parse_event_line(r#"{"error":"no such repo"}"#),
        Some(HelperEvent::Error("no such repo".to_string()))
    );
    assert_eq!(parse_event_line("Last metadata expiration check: 0:01:02"), None);
    assert_eq!(parse_event_line(r#"{"unknown":1}"#), None);
}

#[test]
fn helper_failures_map_to_collaborator_errors() {
    let unavailable = HelperOutcome {
        code: Some(EXIT_REPO_UNAVAILABLE),
        result: None,
        errors: vec!["cannot download repomd.xml".to_string()],
    };
    assert!(matches!(
        classify_failure("refresh", &unavailable),
        CollaboratorError::RepoUnavailable(detail) if detail == "cannot download repomd.xml"
    ));
    assert!(matches!(
        classify_failure("setup", &unavailable),
        CollaboratorError::Helper(_)
    ));

    let failed = HelperOutcome {
        code: Some(1),
        ..HelperOutcome::default()
    };
    assert!(matches!(
        classify_failure("download", &failed),
        CollaboratorError::Download(detail) if detail == "helper exited with status 1"
    ));
    assert!(matches!(
        classify_failure("transaction", &failed),
        CollaboratorError::Transaction(_)
    ));
    assert!(matches!(
        classify_failure("refresh", &failed),
        CollaboratorError::Helper(_)
    ));
}

#[test]
fn exit_labels_name_the_failure() {
    assert_eq!(exit_label(&Ok(())), "cleanly");
    assert_eq!(
    exit_label(&Err(SessionError::Interrupted)),
    "on keyboard interrupt"
);
assert_eq!(
    exit_label(&Err(SessionError::Fatal(anyhow::anyhow!("disk on fire")))),
    "with unhandled error"
);
    assert_eq!(
        exit_label(&Err(SessionError::AlreadyRunning { pid: Some(7) })),
        "already running"
    );
}

#[derive(Default)]
struct RecordingReporter {
    lines: RefCell<Vec<String>>,
}

impl Reporter for RecordingReporter {
    fn message(&self, text: &str) {
        self.lines.borrow_mut().push(format!("message {text}"));
    }

    fn progress(&self, label: &str, current: u64, total: u64) {
        self.lines
            .borrow_mut()
            .push(format!("progress {label} {current}/{total}"));
    }
}

const FAKE_HELPER: &str = r#"
echo "$*" >> "$SYSUP_TEST_DIR/calls.log"
case "$1" in
  setup)
    echo '{"message":"preparing repos"}'
    echo '{"result":"/var/cache/sysup/23"}'
    ;;
  refresh)
    echo '{"error":"cannot download repomd.xml"}'
    exit 75
    ;;
  resolve)
    echo 'resolving dependencies'
    echo '{"result":[{"local_path":"/data/a.rpm","size_bytes":100}]}'
    ;;
  download)
    cat > "$SYSUP_TEST_DIR/download.json"
    echo '{"progress":{"label":"download","current":1,"total":2}}'
    echo '{"progress":{"label":"download","current":2,"total":2}}'
    ;;
  test-transaction)
    echo '{"error":"conflicting requests"}'
    exit 1
    ;;
  *)
    exit 3
    ;;
esac
"#;

fn fake_helper(dir: &Path) -> HelperPackageManager {
    let script = dir.join("helper.sh");
    let body = FAKE_HELPER.replace("$SYSUP_TEST_DIR", &dir.display().to_string());
    std::fs::write(&script, body).expect("must write helper script");
    HelperPackageManager::new("/bin/sh", vec![script.display().to_string()])
}

#[cfg(unix)]
#[test]
fn helper_runs_each_step_with_session_arguments() {
    let dir = test_dir("helper");
    let mut helper = fake_helper(&dir);
    let reporter = RecordingReporter::default();
    let datadir = dir.join("packages");

    let cachedir = helper
        .setup(&SetupOptions {
            releasever: "23",
            datadir: &datadir,
            nogpgcheck: true,
            cache_only: false,
        })
        .expect("setup must succeed");
    assert_eq!(cachedir, PathBuf::from("/var/cache/sysup/23"));

    let packages = helper
        .resolve(SyncMode::DistroSync, &argv(&["vim"]))
        .expect("resolve must succeed");
    assert_eq!(
        packages,
        vec![ResolvedPackage {
            local_path: PathBuf::from("/data/a.rpm"),
            size_bytes: 100
        }]
    );

    helper
        .download(&packages, &reporter)
        .expect("download must succeed");
    let sent: Vec<ResolvedPackage> = serde_json::from_str(
        &std::fs::read_to_string(dir.join("download.json")).expect("must read stdin copy"),
    )
    .expect("must decode stdin copy");
    assert_eq!(sent, packages);
    assert_eq!(
        reporter.lines.borrow().as_slice(),
        ["progress download 1/2", "progress download 2/2"]
    );

    let calls = std::fs::read_to_string(dir.join("calls.log")).expect("must read calls");
    let datadir_text = datadir.display().to_string();
    let lines = calls.lines().collect::<Vec<_>>();
    assert_eq!(
        lines[0],
        format!("setup --releasever 23 --datadir {datadir_text} --nogpgcheck")
    );
    assert_eq!(
        lines[1],
        format!(
            "resolve --releasever 23 --datadir {datadir_text} --nogpgcheck --distro-sync --add-install vim"
        )
    );
    assert!(lines[2].starts_with("download --releasever 23"), "{}", lines[2]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[cfg(unix)]
#[test]
fn helper_refresh_exit_75_is_repo_unavailable() {
    let dir = test_dir("helper-refresh");
    let mut helper = fake_helper(&dir);
    helper
        .setup(&SetupOptions {
            releasever: "23",
            datadir: &dir,
            nogpgcheck: false,
            cache_only: true,
        })
        .expect("setup must succeed");

    let err = helper.refresh_metadata().expect_err("refresh must fail");
    assert!(
        matches!(&err, CollaboratorError::RepoUnavailable(detail) if detail == "cannot download repomd.xml"),
        "{err:?}"
    );

    let calls = std::fs::read_to_string(dir.join("calls.log")).expect("must read calls");
    assert!(calls.lines().all(|line| line.ends_with("--cacheonly")), "{calls}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[cfg(unix)]
#[test]
fn helper_test_transaction_failure_is_transaction_error() {
    let dir = test_dir("helper-transaction");
    let mut helper = fake_helper(&dir);
    let reporter = RecordingReporter::default();
    helper
        .setup(&SetupOptions {
            releasever: "23",
            datadir: &dir,
            nogpgcheck: false,
            cache_only: false,
        })
        .expect("setup must succeed");

    let err = helper
        .test_transaction(&reporter)
        .expect_err("transaction test must fail");
    assert!(
        matches!(&err, CollaboratorError::Transaction(detail) if detail == "conflicting requests"),
        "{err:?}"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn helper_refuses_steps_before_setup() {
    let mut helper = HelperPackageManager::new("/nonexistent/helper", Vec::new());
    let err = helper.refresh_metadata().expect_err("must refuse");
    assert!(err.to_string().contains("before setup"), "{err}");
}

#[test]
fn helper_that_cannot_start_is_helper_error() {
    let dir = test_dir("helper-missing");
    let mut helper = HelperPackageManager::new(dir.join("missing-helper"), Vec::new());
    let err = helper
        .setup(&SetupOptions {
            releasever: "23",
            datadir: &dir,
            nogpgcheck: false,
            cache_only: false,
        })
        .expect_err("must fail");
    assert!(matches!(err, CollaboratorError::Helper(_)), "{err:?}");
    assert!(err.to_string().contains("failed to start package helper"), "{err}");

    let _ = std::fs::remove_dir_all(&dir);
}

fn test_dir(label: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!(
        "sysup-cli-{label}-{}-{nanos}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).expect("must create test dir");
    dir
}
