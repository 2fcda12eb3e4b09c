// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Hook discovery from a directory tree.

use crate::error::DiscoveryError;
use crate::metadata::{HookMetadata, MetadataInference};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const HOOK_EXTENSIONS: &[&str] = &["sh", "py", "js"];

/// A hook file found on disk whose metadata could be inferred.
#[derive(Debug, Clone)]
pub struct DiscoveredHook {
    /// Path relative to the discovery root, `/`-separated.
    pub identity: String,
    pub path: PathBuf,
    pub metadata: HookMetadata,
}

#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub hooks: Vec<DiscoveredHook>,
    /// Hook files that could not be bound to any event.
    pub skipped: Vec<String>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

fn is_hook_file(path: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => HOOK_EXTENSIONS.contains(&ext),
        None => is_executable(path),
    }
}

/// Identity of `path` relative to `root`, `/`-separated on every platform.
pub fn hook_identity(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Scan `root` for hook files and infer metadata for each.
///
/// Hidden files and directories are skipped. Files whose metadata cannot be
/// inferred are reported in [`DiscoveryReport::skipped`]; unreadable entries
/// are logged and skipped without failing the scan.
pub fn discover_hooks(
    root: &Path,
    inference: &dyn MetadataInference,
) -> Result<DiscoveryReport, DiscoveryError> {
    if !root.exists() {
        return Err(DiscoveryError::RootNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
    }

    let mut report = DiscoveryReport::default();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable entry during hook discovery");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_hook_file(entry.path()) {
            continue;
        }
        let Some(identity) = hook_identity(root, entry.path()) else {
            continue;
        };

        match inference.infer(&identity) {
            Some(metadata) => {
                tracing::debug!(
                    hook_id = %identity,
                    event = %metadata.event,
                    priority = ?metadata.priority,
                    "Discovered hook"
                );
                report.hooks.push(DiscoveredHook {
                    identity,
                    path: entry.into_path(),
                    metadata,
                });
            }
            None => {
                tracing::info!(hook_id = %identity, "Hook matches no event, not scheduling it");
                report.skipped.push(identity);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HookEvent;
    use crate::metadata::FilenameInference;
    use std::fs;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn test_discovers_nested_hooks_with_relative_identity() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "pre_tool_check.sh");
        touch(dir.path(), "security/pre_tool_guard.py");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "helper.sh");

        let report = discover_hooks(dir.path(), &FilenameInference).unwrap();
        let ids: Vec<_> = report.hooks.iter().map(|h| h.identity.as_str()).collect();
        assert_eq!(ids, vec!["pre_tool_check.sh", "security/pre_tool_guard.py"]);
        assert_eq!(report.skipped, vec!["helper.sh"]);
        assert!(report
            .hooks
            .iter()
            .all(|h| h.metadata.event == HookEvent::PreToolUse));
    }

    #[test]
    fn test_hidden_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".hidden/pre_tool_check.sh");
        touch(dir.path(), ".pre_tool_secret.sh");
        touch(dir.path(), "stop_summary.sh");

        let report = discover_hooks(dir.path(), &FilenameInference).unwrap();
        assert_eq!(report.hooks.len(), 1);
        assert_eq!(report.hooks[0].identity, "stop_summary.sh");
    }

    #[cfg(unix)]
    #[test]
    fn test_extensionless_requires_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "pre_tool_plain");
        touch(dir.path(), "pre_tool_exec");
        let exec = dir.path().join("pre_tool_exec");
        fs::set_permissions(&exec, fs::Permissions::from_mode(0o755)).unwrap();

        let report = discover_hooks(dir.path(), &FilenameInference).unwrap();
        let ids: Vec<_> = report.hooks.iter().map(|h| h.identity.as_str()).collect();
        assert_eq!(ids, vec!["pre_tool_exec"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            discover_hooks(&missing, &FilenameInference),
            Err(DiscoveryError::RootNotFound(_))
        ));
    }
}
