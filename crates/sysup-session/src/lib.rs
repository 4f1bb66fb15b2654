mod boot;
mod cleanup;
mod collab;
mod coordinator;
mod error;
mod layout;
mod machine;
mod mounts;
mod os_release;
mod packagelist;
mod summary;
mod validate;

pub use boot::SystemdBootPreparer;
pub use cleanup::{remove_path, CleanScope, Cleaner, CleanupReport, Removal, RemovalOutcome};
pub use collab::{
    BootPreparer, CollaboratorError, CommandReplay, DownloadRequest, InterruptFlag,
    PackageManager, Reporter, ResolvedPackage, SetupOptions, SyncMode,
};
pub use coordinator::{Collaborators, Coordinator};
pub use error::SessionError;
pub use layout::UpgradeLayout;
pub use machine::{plan, Action, ActionKind, Plan, SessionState};
pub use mounts::{
    find_mountpoint, mount_unit_name, parse_mountinfo, read_mountinfo, render_mount_unit,
    systemd_mount_escape, MountEntry,
};
pub use os_release::OsRelease;
pub use packagelist::{
    local_size, package_list_path, prune_datadir, read_package_list, write_package_list,
    PACKAGE_LIST_NAME,
};
pub use summary::{format_size, summarize, PROGRAM};
pub use validate::{validate_releasever, validate_request};
