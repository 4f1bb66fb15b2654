use super::*;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_lock_path() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "sysup-lock-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    path.join("run").join("sysup.pid")
}

fn cleanup(path: &Path) {
    if let Some(root) = path.parent().and_then(Path::parent) {
        let _ = fs::remove_dir_all(root);
    }
}

#[test]
fn pid_lock_records_holder_pid() {
    let path = test_lock_path();
    let lock = PidLock::acquire(&path).expect("must acquire");

    assert_eq!(lock.pid(), std::process::id());
    let written = fs::read_to_string(&path).expect("must read pid file");
    assert_eq!(written, format!("{}\n", std::process::id()));
    assert_eq!(read_holder_pid(&path), Some(std::process::id()));

    lock.release().expect("must release");
    cleanup(&path);
}

#[test]
fn second_acquire_reports_running_holder() {
    let path = test_lock_path();
    let first = PidLock::acquire(&path).expect("must acquire");

    let err = PidLock::acquire(&path).expect_err("second acquire must fail");
    match err {
        LockError::AlreadyRunning { pid } => assert_eq!(pid, Some(std::process::id())),
        other => panic!("unexpected error: {other}"),
    }

    first.release().expect("must release");
    cleanup(&path);
}

#[test]
fn release_removes_pid_file_and_allows_reacquire() {
    let path = test_lock_path();
    let lock = PidLock::acquire(&path).expect("must acquire");
    lock.release().expect("must release");
    assert!(!path.exists());

    let again = PidLock::acquire(&path).expect("must reacquire");
    drop(again);
    assert!(!path.exists(), "drop must release like release()");
    cleanup(&path);
}

#[test]
fn stale_pid_file_does_not_block() {
    let path = test_lock_path();
    fs::create_dir_all(path.parent().expect("parent")).expect("must create dir");
    fs::write(&path, "99999\n").expect("must write stale pid");

    let lock = PidLock::acquire(&path).expect("stale file must not block");
    assert_eq!(read_holder_pid(&path), Some(std::process::id()));

    lock.release().expect("must release");
    cleanup(&path);
}

#[test]
fn crashed_holder_leaves_file_but_frees_lock() {
    let path = test_lock_path();
    fs::create_dir_all(path.parent().expect("parent")).expect("must create dir");

    // Locking and closing without unlinking is what a killed process leaves.
    let mut crashed = FileLock::open(
        &path,
        Access::ReadWrite,
        LockMode::Exclusive,
        LockWait::NonBlock,
    )
    .expect("must lock");
    crashed
        .file_mut()
        .write_all(b"4242\n")
        .expect("must write pid");
    drop(crashed);
    assert!(path.exists());

    let lock = PidLock::acquire(&path).expect("must acquire after crash");
    assert_eq!(read_holder_pid(&path), Some(std::process::id()));
    lock.release().expect("must release");
    cleanup(&path);
}

#[test]
fn racing_acquires_have_exactly_one_winner() {
    let path = test_lock_path();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                PidLock::acquire(&path)
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread must finish"))
        .collect();

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    for result in &results {
        if let Err(err) = result {
            match err {
                LockError::AlreadyRunning { pid } => {
                    assert_eq!(*pid, Some(std::process::id()));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    drop(results);
    cleanup(&path);
}

const CHILD_LOCK_PATH_ENV: &str = "SYSUP_LOCK_TEST_CHILD_PATH";
const CHILD_HOLDER_TEST: &str = "tests::child_process_holds_pid_lock";

/// Does nothing unless re-executed by
/// `lock_held_by_another_process_reports_that_process`: then it takes the pid
/// lock, announces its pid and waits to be killed.
#[test]
fn child_process_holds_pid_lock() {
    let Some(path) = std::env::var_os(CHILD_LOCK_PATH_ENV) else {
        return;
    };
    let lock = PidLock::acquire(PathBuf::from(path)).expect("child must acquire");
    println!("holder-pid={}", lock.pid());
    std::io::stdout().flush().expect("must flush");
    thread::sleep(Duration::from_secs(60));
    drop(lock);
}

#[cfg(unix)]
struct KillOnDrop(Child);

#[cfg(unix)]
impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[cfg(unix)]
fn spawn_lock_holder(path: &Path) -> (KillOnDrop, u32) {
    let exe = std::env::current_exe().expect("must locate test binary");
    let mut child = Command::new(exe)
        .args([CHILD_HOLDER_TEST, "--exact", "--nocapture", "--quiet", "--test-threads", "1"])
        .env(CHILD_LOCK_PATH_ENV, path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("must spawn lock holder");
    let stdout = child.stdout.take().expect("child stdout");
    let guard = KillOnDrop(child);

    let pid = BufReader::new(stdout)
        .lines()
        .map(|line| line.expect("must read child output"))
        .find_map(|line| {
            line.strip_prefix("holder-pid=")
                .map(|pid| pid.trim().parse::<u32>().expect("child pid must parse"))
        })
        .expect("child must report its pid");
    (guard, pid)
}

#[cfg(unix)]
#[test]
fn lock_held_by_another_process_reports_that_process() {
    let path = test_lock_path();
    let (mut holder, holder_pid) = spawn_lock_holder(&path);
    assert_eq!(holder_pid, holder.0.id());
    assert_ne!(holder_pid, std::process::id());

    match PidLock::acquire(&path) {
        Err(LockError::AlreadyRunning { pid }) => assert_eq!(pid, Some(holder_pid)),
        Ok(_) => panic!("lock held by pid {holder_pid} must not be acquired"),
        Err(other) => panic!("unexpected error: {other}"),
    }

    // SIGKILL: the holder gets no chance to unlink its pid file.
    holder.0.kill().expect("must kill holder");
    holder.0.wait().expect("must reap holder");
    assert!(path.exists(), "killed holder leaves its pid file behind");
    assert_eq!(read_holder_pid(&path), Some(holder_pid));

    let lock = PidLock::acquire(&path).expect("must acquire after holder died");
    assert_eq!(read_holder_pid(&path), Some(std::process::id()));
    lock.release().expect("must release");
    cleanup(&path);
}

#[test]
fn loser_waits_briefly_for_winner_pid() {
    let path = test_lock_path();
    fs::create_dir_all(path.parent().expect("parent")).expect("must create dir");

    // Locked but not yet written: the gap between the winner's lock and its
    // pid write.
    let winner = FileLock::open(
        &path,
        Access::ReadWrite,
        LockMode::Exclusive,
        LockWait::NonBlock,
    )
    .expect("must lock");
    let writer_path = path.clone();
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        fs::write(&writer_path, "4242\n").expect("must write pid");
    });

    match PidLock::acquire(&path) {
        Err(LockError::AlreadyRunning { pid }) => assert_eq!(pid, Some(4242)),
        Ok(_) => panic!("held lock must not be acquired"),
        Err(other) => panic!("unexpected error: {other}"),
    }

    writer.join().expect("writer must finish");
    drop(winner);
    cleanup(&path);
}

#[test]
fn loser_reports_unknown_holder_when_pid_never_appears() {
    let path = test_lock_path();
    fs::create_dir_all(path.parent().expect("parent")).expect("must create dir");
    let winner = FileLock::open(
        &path,
        Access::ReadWrite,
        LockMode::Exclusive,
        LockWait::NonBlock,
    )
    .expect("must lock");

    match PidLock::acquire(&path) {
        Err(LockError::AlreadyRunning { pid }) => assert_eq!(pid, None),
        Ok(_) => panic!("held lock must not be acquired"),
        Err(other) => panic!("unexpected error: {other}"),
    }

    drop(winner);
    cleanup(&path);
}

#[test]
fn shared_locks_coexist_and_exclude_writers() {
    let path = test_lock_path();
    fs::create_dir_all(path.parent().expect("parent")).expect("must create dir");

    let first = FileLock::open(&path, Access::ReadWrite, LockMode::Shared, LockWait::NonBlock)
        .expect("first shared");
    let second = FileLock::open(&path, Access::ReadOnly, LockMode::Shared, LockWait::NonBlock)
        .expect("second shared");
    assert_eq!(second.mode(), LockMode::Shared);

    let err = FileLock::open(
        &path,
        Access::ReadWrite,
        LockMode::Exclusive,
        LockWait::NonBlock,
    )
    .expect_err("exclusive must be busy");
    assert!(matches!(err, LockError::LockBusy { .. }));

    drop(first);
    drop(second);
    let exclusive = FileLock::open(
        &path,
        Access::ReadWrite,
        LockMode::Exclusive,
        LockWait::NonBlock,
    )
    .expect("exclusive after readers left");

    let err = FileLock::open(&path, Access::ReadOnly, LockMode::Shared, LockWait::NonBlock)
        .expect_err("shared must be busy");
    assert!(matches!(err, LockError::LockBusy { .. }));

    exclusive.unlock().expect("must unlock");
    cleanup(&path);
}

#[test]
fn exclusive_lock_needs_writable_handle() {
    let path = test_lock_path();
    fs::create_dir_all(path.parent().expect("parent")).expect("must create dir");
    fs::write(&path, "").expect("must create file");

    let err = FileLock::open(
        &path,
        Access::ReadOnly,
        LockMode::Exclusive,
        LockWait::NonBlock,
    )
    .expect_err("must reject");
    assert!(matches!(err, LockError::ReadOnly { .. }));

    cleanup(&path);
}

#[test]
fn blocking_lock_waits_for_release() {
    let path = test_lock_path();
    fs::create_dir_all(path.parent().expect("parent")).expect("must create dir");

    let held = FileLock::open(
        &path,
        Access::ReadWrite,
        LockMode::Exclusive,
        LockWait::NonBlock,
    )
    .expect("must lock");

    let (sender, receiver) = mpsc::channel();
    let waiter_path = path.clone();
    let waiter = thread::spawn(move || {
        let lock = FileLock::open(
            &waiter_path,
            Access::ReadWrite,
            LockMode::Exclusive,
            LockWait::Block,
        );
        sender.send(lock.is_ok()).expect("must report");
    });

    assert!(
        receiver.recv_timeout(Duration::from_millis(200)).is_err(),
        "waiter must still be blocked"
    );
    held.unlock().expect("must unlock");
    assert!(receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("waiter must wake up"));

    waiter.join().expect("waiter must finish");
    cleanup(&path);
}

#[cfg(target_os = "linux")]
#[test]
fn lock_handle_is_close_on_exec() {
    use std::os::fd::AsRawFd;

    const O_CLOEXEC: u32 = 0o2_000_000;

    let path = test_lock_path();
    fs::create_dir_all(path.parent().expect("parent")).expect("must create dir");
    let lock = FileLock::open(
        &path,
        Access::ReadWrite,
        LockMode::Exclusive,
        LockWait::NonBlock,
    )
    .expect("must lock");

    let fdinfo = fs::read_to_string(format!("/proc/self/fdinfo/{}", lock.file().as_raw_fd()))
        .expect("must read fdinfo");
    let flags = fdinfo
        .lines()
        .find_map(|line| line.strip_prefix("flags:"))
        .map(|value| u32::from_str_radix(value.trim(), 8).expect("octal flags"))
        .expect("flags line");
    assert_ne!(flags & O_CLOEXEC, 0);

    drop(lock);
    cleanup(&path);
}

#[test]
fn with_exclusive_releases_on_error() {
    let table = MemoryLockTable::new();
    let locks = table.process(100);
    let path = Path::new("/run/sysup.pid");

    let result: Result<(), LockError> = with_exclusive(&locks, path, |held| {
        assert_eq!(held.holder_pid(), 100);
        assert!(table.is_held(path));
        Err(LockError::LockBusy {
            path: path.to_path_buf(),
        })
    });
    assert!(result.is_err());
    assert!(!table.is_held(path));
    assert_eq!(table.recorded_pid(path), None);
}

#[test]
fn with_exclusive_releases_on_panic() {
    let table = MemoryLockTable::new();
    let locks = table.process(100);
    let path = Path::new("/run/sysup.pid");

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _: Result<(), LockError> = with_exclusive(&locks, path, |_| panic!("boom"));
    }));
    assert!(outcome.is_err());
    assert!(!table.is_held(path));
}

#[test]
fn memory_table_blocks_live_holders_only() {
    let table = MemoryLockTable::new();
    let path = Path::new("/run/sysup.pid");

    let first = table.process(100).acquire(path).expect("must acquire");
    let err = table
        .process(200)
        .acquire(path)
        .expect_err("must conflict");
    assert!(matches!(err, LockError::AlreadyRunning { pid: Some(100) }));

    table.crash(100);
    assert!(!table.is_held(path));
    assert_eq!(table.recorded_pid(path), Some(100));

    let second = table.process(200).acquire(path).expect("must acquire after crash");
    assert_eq!(table.recorded_pid(path), Some(200));

    // The dead process's handle going away must not free the new holder.
    drop(first);
    assert!(table.is_held(path));

    second.release().expect("must release");
    assert!(!table.is_held(path));
}

#[test]
fn os_exclusion_lock_uses_pid_files() {
    let path = test_lock_path();
    let held = OsExclusionLock.acquire(&path).expect("must acquire");
    assert_eq!(held.holder_pid(), std::process::id());
    assert_eq!(held.path(), path.as_path());

    let err = OsExclusionLock.acquire(&path).expect_err("must conflict");
    assert!(matches!(err, LockError::AlreadyRunning { .. }));

    held.release().expect("must release");
    assert!(!path.exists());
    cleanup(&path);
}
