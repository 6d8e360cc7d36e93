//! XDG desktop entry parsing

use std::path::Path;

use tally_host_api::{HostError, HostResult, InstalledProgram, InventorySource};
use tracing::debug;

/// Read every `*.desktop` file in `dir`.
///
/// An unreadable directory fails the source; an unreadable file is skipped.
pub(crate) fn read_desktop_dir(
    source: &InventorySource,
    dir: &Path,
) -> HostResult<Vec<InstalledProgram>> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| HostError::source_unavailable(source, e.to_string()))?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "desktop"))
        .collect();
    paths.sort();

    let mut programs = Vec::new();
    for path in paths {
        match std::fs::read_to_string(&path) {
            Ok(content) => programs.extend(parse_desktop_entry(&content)),
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable desktop file"),
        }
    }

    Ok(programs)
}

/// Parse the `[Desktop Entry]` group of a desktop file.
///
/// Returns `None` for non-applications and entries hidden from menus.
pub fn parse_desktop_entry(content: &str) -> Option<InstalledProgram> {
    let mut in_entry = false;
    let mut name = None;
    let mut kind = None;
    let mut path = None;
    let mut hidden = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            in_entry = line == "[Desktop Entry]";
            continue;
        }
        if !in_entry {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match (key.trim(), value.trim()) {
            ("Name", v) => name = Some(v),
            ("Type", v) => kind = Some(v),
            ("Path", v) if !v.is_empty() => path = Some(v),
            ("NoDisplay" | "Hidden", "true") => hidden = true,
            _ => {}
        }
    }

    if hidden || kind != Some("Application") {
        return None;
    }

    let program = InstalledProgram::named(name.filter(|n| !n.is_empty())?);
    Some(match path {
        Some(path) => program.with_install_location(path),
        None => program,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_entry() {
        let content = "\
[Desktop Entry]
Type=Application
Name=Firefox
Name[de]=Firefox Webbrowser
Exec=firefox %u
Path=/opt/firefox

[Desktop Action new-window]
Name=New Window
";
        let program = parse_desktop_entry(content).unwrap();
        assert_eq!(program.name.as_str(), "Firefox");
        assert_eq!(program.install_location.as_deref(), Some("/opt/firefox"));
        assert!(program.version.is_none());
    }

    #[test]
    fn hidden_and_links_are_skipped() {
        let hidden = "[Desktop Entry]\nType=Application\nName=Helper\nNoDisplay=true\n";
        let link = "[Desktop Entry]\nType=Link\nName=Docs\nURL=https://example.com\n";

        assert!(parse_desktop_entry(hidden).is_none());
        assert!(parse_desktop_entry(link).is_none());
    }

    #[test]
    fn directory_read_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.desktop"),
            "[Desktop Entry]\nType=Application\nName=Beta\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.desktop"),
            "[Desktop Entry]\nType=Application\nName=Alpha\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README"), "not a desktop file").unwrap();

        let source = InventorySource::new("test");
        let programs = read_desktop_dir(&source, dir.path()).unwrap();

        let names: Vec<_> = programs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
    }

    #[test]
    fn missing_directory_fails_source() {
        let source = InventorySource::new("desktop:/nonexistent");
        let result = read_desktop_dir(&source, Path::new("/nonexistent/tally-test"));
        assert!(matches!(result, Err(HostError::SourceUnavailable { .. })));
    }
}
