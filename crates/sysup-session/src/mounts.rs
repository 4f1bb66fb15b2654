use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const NETWORK_FILESYSTEMS: &[&str] = &[
    "nfs", "nfs4", "cifs", "smbfs", "smb3", "ncpfs", "ncp", "9p", "afs", "ceph", "coda",
    "glusterfs", "gfs", "gfs2", "ocfs2", "lustre", "pvfs2", "fuse.sshfs", "fuse.glusterfs",
];

const PSEUDO_FILESYSTEMS: &[&str] = &[
    "proc", "sysfs", "tmpfs", "devtmpfs", "devpts", "ramfs", "cgroup", "cgroup2", "securityfs",
    "debugfs", "tracefs", "configfs", "autofs", "mqueue", "hugetlbfs", "pstore", "bpf",
    "fusectl", "binfmt_misc", "efivarfs", "rpc_pipefs", "nsfs", "selinuxfs",
];

/// One line of `/proc/self/mountinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub source: String,
    pub fstype: String,
    pub options: String,
}

impl MountEntry {
    pub fn is_network(&self) -> bool {
        NETWORK_FILESYSTEMS.contains(&self.fstype.as_str())
    }

    pub fn is_pseudo(&self) -> bool {
        PSEUDO_FILESYSTEMS.contains(&self.fstype.as_str())
    }
}

pub fn read_mountinfo(path: &Path) -> Result<Vec<MountEntry>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read mount table: {}", path.display()))?;
    Ok(parse_mountinfo(&raw))
}

/// Parses mountinfo text, skipping malformed lines.
pub fn parse_mountinfo(raw: &str) -> Vec<MountEntry> {
    raw.lines().filter_map(parse_mountinfo_line).collect()
}

fn parse_mountinfo_line(line: &str) -> Option<MountEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let separator = fields.iter().position(|field| *field == "-")?;
    if separator < 6 || fields.len() < separator + 3 {
        return None;
    }

    Some(MountEntry {
        mount_point: PathBuf::from(unescape_octal(fields[4])),
        options: fields[5].to_string(),
        fstype: fields[separator + 1].to_string(),
        source: unescape_octal(fields[separator + 2]),
    })
}

/// Undoes the kernel's `\ooo` escaping of spaces, tabs and backslashes.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 3 < bytes.len() {
            let digits = &bytes[index + 1..index + 4];
            if digits.iter().all(|digit| (b'0'..=b'7').contains(digit)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, digit| acc * 8 + u32::from(digit - b'0'));
                out.push(value as u8);
                index += 4;
                continue;
            }
        }
        out.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// The mount holding `path`: the entry with the longest mount point that is
/// a prefix of it. Later entries win ties, matching overmounts.
pub fn find_mountpoint<'a>(mounts: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    let mut best: Option<&MountEntry> = None;
    for entry in mounts {
        if !path.starts_with(&entry.mount_point) {
            continue;
        }
        let depth = entry.mount_point.components().count();
        if best.map_or(true, |current| depth >= current.mount_point.components().count()) {
            best = Some(entry);
        }
    }
    best
}

/// Escapes a mount point into a systemd unit name stem, the way
/// `systemd-escape --path` does.
pub fn systemd_mount_escape(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim_matches('/');
    let mut name = String::new();
    for byte in trimmed.bytes() {
        match byte {
            b'/' => name.push('-'),
            b'.' if !name.is_empty() => name.push('.'),
            b if b.is_ascii_alphanumeric() || b == b':' || b == b'_' => name.push(b as char),
            b => {
                let _ = write!(name, "\\x{b:02x}");
            }
        }
    }
    if name.is_empty() {
        name.push('-');
    }
    name
}

pub fn mount_unit_name(entry: &MountEntry) -> String {
    format!("{}.mount", systemd_mount_escape(&entry.mount_point))
}

pub fn render_mount_unit(entry: &MountEntry) -> String {
    format!(
        "# This unit was generated by sysup.\n\
         [Unit]\n\
         Before=system-update.target\n\
         \n\
         [Mount]\n\
         What={}\n\
         Where={}\n\
         Type={}\n\
         Options={}\n",
        entry.source,
        entry.mount_point.display(),
        entry.fstype,
        entry.options
    )
}
