//! Safety gate: risk classification, snapshotting, whitelist and blacklist
//! enforcement.
//!
//! The regex sets below are a direct port of the prototype's risk
//! classifier (`omega_safety.py`): HIGH checked before MEDIUM, both
//! case-insensitive and word-boundary-aware, everything else LOW.

use crate::errors::{Result, SafetyError};
use crate::store::Risk;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static HIGH_RISK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\brm\s+-rf",
        r"(?i)\breboot\b",
        r"(?i)\bshutdown\b",
        r"(?i)\bformat\b",
        r"(?i)\bmkfs\b",
        r">\s*/dev/",
        r"(?i)\bdd\b.*of=",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static high-risk pattern must compile"))
    .collect()
});

static MEDIUM_RISK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\brm\s+",
        r"(?i)\bmv\s+",
        r"(?i)\bsystemctl\s+stop",
        r"(?i)\bkill\s+-9",
        r"(?i)\bapt\s+remove",
        r"(?i)\bpip\s+uninstall",
        r"\$\(",
        r"`",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static medium-risk pattern must compile"))
    .collect()
});

/// Orthogonal from the risk classifier: any match here zeros the command
/// argument at dispatch time rather than changing the risk tier.
static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\brm\s+",
        r"(?i)\bmv\s+",
        r">",
        r"(?i)\bchmod\b",
        r"(?i)\bchown\b",
        r"(?i)\bsudo\b",
        r"(?i)\bapt\s+",
        r"(?i)\bpip\s+install\b",
        r"(?i)\bpython\s+-m\s+pip\b",
        r"(?i)\bwget\b",
        r"(?i)\bcurl\b",
        r"(?i)\bkill\s+",
        r"\$\(",
        r"`",
        r">\s*/dev/",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static sensitive pattern must compile"))
    .collect()
});

pub const SAFE_TOOLS: &[&str] = &[
    "physical",
    "existence",
    "stats",
    "see_active",
    "see_tree",
    "see_raw",
    "proc_list",
    "net",
    "gui_speak",
    "ls",
    "gpu",
    "power",
    "startup",
    "shell",
    "service",
    "gui_click",
    "gui_type",
    "gui_scroll",
];

/// Classifies a command's risk by syntactic pattern match. Pure, idempotent,
/// deterministic.
pub fn classify_risk(command: &str) -> Risk {
    if HIGH_RISK_PATTERNS.iter().any(|re| re.is_match(command)) {
        return Risk::High;
    }
    if MEDIUM_RISK_PATTERNS.iter().any(|re| re.is_match(command)) {
        return Risk::Medium;
    }
    Risk::Low
}

/// Returns `cmd` unchanged unless it matches a sensitive pattern, in which
/// case the argument is scrubbed to an empty string rather than the whole
/// action being dropped.
pub fn scrub_sensitive(cmd: &str) -> String {
    if SENSITIVE_PATTERNS.iter().any(|re| re.is_match(cmd)) {
        String::new()
    } else {
        cmd.to_string()
    }
}

pub fn is_whitelisted(tool: &str) -> bool {
    SAFE_TOOLS.contains(&tool)
}

pub fn check_whitelist(tool: &str) -> Result<()> {
    if is_whitelisted(tool) {
        Ok(())
    } else {
        Err(SafetyError::NotWhitelisted {
            tool: tool.to_string(),
        }
        .into())
    }
}

/// Creates a timestamped backup of `path` under `backup_dir`. Returns `None`
/// for a non-existent path; otherwise the new backup path.
pub fn snapshot(path: &Path, backup_dir: &Path) -> Result<Option<std::path::PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    std::fs::create_dir_all(backup_dir).map_err(|e| SafetyError::SnapshotFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup_path = backup_dir.join(format!("{basename}_{timestamp}"));

    if path.is_dir() {
        copy_dir_recursive(path, &backup_path).map_err(|e| SafetyError::SnapshotFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    } else {
        std::fs::copy(path, &backup_path).map_err(|e| SafetyError::SnapshotFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    }
    Ok(Some(backup_path))
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let dst_path = dst.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_path)?;
        } else {
            std::fs::copy(entry.path(), &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Risk;

    #[test]
    fn high_risk_beats_medium() {
        assert_eq!(classify_risk("rm -rf /tmp/foo"), Risk::High);
        assert_eq!(classify_risk("sudo reboot now"), Risk::High);
        assert_eq!(classify_risk("dd if=/dev/zero of=/dev/sda"), Risk::High);
    }

    #[test]
    fn medium_risk_examples() {
        assert_eq!(classify_risk("rm file.txt"), Risk::Medium);
        assert_eq!(classify_risk("kill -9 1234"), Risk::Medium);
        assert_eq!(classify_risk("echo $(whoami)"), Risk::Medium);
    }

    #[test]
    fn low_risk_default() {
        assert_eq!(classify_risk("ls -la"), Risk::Low);
        assert_eq!(classify_risk("echo hello"), Risk::Low);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify_risk("RM -RF /tmp"), Risk::High);
    }

    #[test]
    fn scrub_zeros_sensitive_commands() {
        assert_eq!(scrub_sensitive("rm -rf /tmp/foo"), "");
        assert_eq!(scrub_sensitive("sudo apt remove pkg"), "");
    }

    #[test]
    fn scrub_preserves_safe_commands() {
        assert_eq!(scrub_sensitive("ls -la"), "ls -la");
    }

    #[test]
    fn whitelist_rejects_unknown_tool() {
        assert!(check_whitelist("wizard").is_err());
        assert!(check_whitelist("ls").is_ok());
    }

    #[test]
    fn snapshot_of_missing_path_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let backups = dir.path().join("backups");
        assert_eq!(snapshot(&missing, &backups).unwrap(), None);
    }

    #[test]
    fn snapshot_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("foo.txt");
        std::fs::write(&file, b"hello").unwrap();
        let backups = dir.path().join("backups");
        let result = snapshot(&file, &backups).unwrap();
        assert!(result.is_some());
        let backup_path = result.unwrap();
        assert!(backup_path.exists());
        assert_eq!(std::fs::read(backup_path).unwrap(), b"hello");
    }
}
