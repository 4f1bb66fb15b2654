use sysup_store::SessionRecord;

use crate::SessionState;

pub const PROGRAM: &str = "sysup";

/// Human-readable status for `state`. `local_bytes` is how much of the
/// download is already on disk, if known.
pub fn summarize(state: SessionState, record: &SessionRecord, local_bytes: Option<u64>) -> String {
    let target = record.upgrade_target.as_deref().unwrap_or("<unknown>");

    let lines = match state {
        SessionState::Idle => vec!["No upgrade in progress.".to_string()],
        SessionState::DownloadInProgress => {
            let headline = match (local_bytes, record.size_total) {
                (Some(local), Some(total)) if local > 0 && total > 0 => format!(
                    "Download of {target} is {:.1}% complete ({}/{})",
                    100.0 * local as f64 / total as f64,
                    format_size(local),
                    format_size(total)
                ),
                _ => format!("Upgrade to {target} in progress."),
            };
            vec![
                headline,
                format!("Use '{PROGRAM} resume' to resume downloading."),
                format!("Use '{PROGRAM} cancel' to cancel the upgrade."),
            ]
        }
        SessionState::ReadyForUpgrade => vec![
            format!("Ready for upgrade to {target}."),
            format!("Use '{PROGRAM} reboot' to start the upgrade."),
            format!("Use '{PROGRAM} refresh' to check for new updates."),
            format!("Use '{PROGRAM} cancel' to cancel the upgrade."),
        ],
        SessionState::Upgrading => vec![format!("Upgrading to {target}.")],
    };
    lines.join("\n")
}

/// Binary-prefixed size with one decimal, e.g. `1.5 M`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["", "k", "M", "G", "T", "P"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
