//! dpkg status database parsing

use tally_host_api::InstalledProgram;

/// Parse `/var/lib/dpkg/status` into installed packages.
///
/// Only stanzas whose `Status` ends in `installed` are returned; removed or
/// half-configured packages are skipped.
pub fn parse_dpkg_status(content: &str) -> Vec<InstalledProgram> {
    content
        .split("\n\n")
        .filter_map(parse_stanza)
        .collect()
}

fn parse_stanza(stanza: &str) -> Option<InstalledProgram> {
    let mut package = None;
    let mut status = None;
    let mut version = None;
    let mut maintainer = None;

    for line in stanza.lines() {
        // Continuation of a multi-line field (e.g. Description)
        if line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match field {
            "Package" => package = Some(value),
            "Status" => status = Some(value),
            "Version" => version = Some(value),
            "Maintainer" => maintainer = Some(value),
            _ => {}
        }
    }

    let installed = status
        .and_then(|s| s.split_whitespace().last())
        .is_some_and(|state| state == "installed");
    if !installed {
        return None;
    }

    let mut program = InstalledProgram::named(package.filter(|p| !p.is_empty())?);
    if let Some(version) = version {
        program = program.with_version(version);
    }
    if let Some(maintainer) = maintainer {
        program = program.with_publisher(maintainer);
    }
    Some(program)
}
