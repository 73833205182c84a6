//! Idempotent edits of line-oriented configuration files.
//!
//! Every function takes the current file contents and returns `Some(new)`
//! only when a change is needed, so callers can report "already satisfied"
//! without writing. All edits are pure: no I/O, no side effects.

/// Number of lines equal to `line`, ignoring surrounding whitespace.
pub fn count_line(contents: &str, line: &str) -> usize {
    let wanted = line.trim();
    contents.lines().filter(|l| l.trim() == wanted).count()
}

/// Ensure `line` appears exactly once.
///
/// Duplicates beyond the first occurrence are removed; a missing line is
/// appended at the end.
pub fn ensure_line(contents: &str, line: &str) -> Option<String> {
    match count_line(contents, line) {
        1 => None,
        0 => {
            let mut out = contents.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(line.trim());
            out.push('\n');
            Some(out)
        }
        _ => Some(keep_first(contents, |l| l.trim() == line.trim())),
    }
}

/// Ensure `line` appears exactly once, before the script's final `exit 0`.
///
/// Used for `/etc/rc.local`, where anything after `exit 0` never runs.
/// An empty file gets a minimal script skeleton.
pub fn ensure_before_exit(contents: &str, line: &str) -> Option<String> {
    let wanted = line.trim();
    let exit_idx = last_exit_index(contents);

    if count_line(contents, wanted) == 1 {
        let line_idx = contents.lines().position(|l| l.trim() == wanted);
        match (line_idx, exit_idx) {
            (Some(l), Some(e)) if l < e => return None,
            (Some(_), None) => return None,
            _ => {}
        }
    }

    if contents.trim().is_empty() {
        return Some(format!("#!/bin/sh -e\n\n{}\n\nexit 0\n", wanted));
    }

    let kept: Vec<&str> = contents.lines().filter(|l| l.trim() != wanted).collect();
    let mut lines: Vec<String> = kept.iter().map(|l| (*l).to_string()).collect();
    match lines.iter().rposition(|l| is_exit_zero(l)) {
        Some(idx) => lines.insert(idx, wanted.to_string()),
        None => {
            lines.push(wanted.to_string());
            lines.push("exit 0".to_string());
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    Some(out)
}

/// Number of `KEY=` assignments for `key`.
pub fn count_assignments(contents: &str, key: &str) -> usize {
    contents
        .lines()
        .filter(|l| assignment_value(l, key).is_some())
        .count()
}

/// Value of the first `KEY=` assignment, with surrounding quotes removed.
pub fn assignment(contents: &str, key: &str) -> Option<String> {
    contents.lines().find_map(|l| assignment_value(l, key))
}

/// Ensure exactly one `KEY="value"` line exists.
///
/// The first existing assignment is rewritten in place; any further
/// assignments of the same key are dropped.
pub fn set_assignment(contents: &str, key: &str, value: &str) -> Option<String> {
    let count = count_assignments(contents, key);
    if count == 1 && assignment(contents, key).as_deref() == Some(value) {
        return None;
    }

    let rendered = format!("{}=\"{}\"", key, value);
    if count == 0 {
        let mut out = contents.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&rendered);
        out.push('\n');
        return Some(out);
    }

    let mut seen = false;
    let mut lines = Vec::new();
    for l in contents.lines() {
        if assignment_value(l, key).is_some() {
            if !seen {
                lines.push(rendered.clone());
                seen = true;
            }
        } else {
            lines.push(l.to_string());
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    Some(out)
}

/// Text that identifies an apt repository inside sources lists.
///
/// `ppa:owner/name` is published under `…/owner/name/ubuntu`; any other
/// repository string is matched by its URL token, or verbatim.
pub fn repository_marker(repository: &str) -> String {
    if let Some(ppa) = repository.strip_prefix("ppa:") {
        return format!("/{}/ubuntu", ppa.trim_matches('/'));
    }
    repository
        .split_whitespace()
        .find(|token| token.contains("://"))
        .unwrap_or(repository)
        .trim_end_matches('/')
        .to_string()
}

fn keep_first(contents: &str, matches: impl Fn(&str) -> bool) -> String {
    let mut seen = false;
    let mut lines = Vec::new();
    for l in contents.lines() {
        if matches(l) {
            if seen {
                continue;
            }
            seen = true;
        }
        lines.push(l);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn is_exit_zero(line: &str) -> bool {
    let t = line.trim();
    t == "exit 0" || t.starts_with("exit 0 ") || t.starts_with("exit 0;")
}

fn last_exit_index(contents: &str) -> Option<usize> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, l)| is_exit_zero(l))
        .map(|(i, _)| i)
        .last()
}

fn assignment_value(line: &str, key: &str) -> Option<String> {
    let rest = line.trim_start().strip_prefix(key)?;
    let raw = rest.strip_prefix('=')?.trim();
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(raw);
    Some(unquoted.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: &str = "server ntp.ubuntu.com iburst";

    #[test]
    fn test_ensure_line_appends_missing() {
        let out = ensure_line("pool 2.ubuntu.pool.ntp.org\n", SERVER).unwrap();
        assert_eq!(out, "pool 2.ubuntu.pool.ntp.org\nserver ntp.ubuntu.com iburst\n");
    }

    #[test]
    fn test_ensure_line_handles_missing_trailing_newline() {
        let out = ensure_line("driftfile /var/lib/chrony/drift", SERVER).unwrap();
        assert_eq!(out, "driftfile /var/lib/chrony/drift\nserver ntp.ubuntu.com iburst\n");
    }

    #[test]
    fn test_ensure_line_is_noop_when_present_once() {
        assert!(ensure_line("server ntp.ubuntu.com iburst\n", SERVER).is_none());
        assert!(ensure_line("  server ntp.ubuntu.com iburst  \n", SERVER).is_none());
    }

    #[test]
    fn test_ensure_line_collapses_duplicates() {
        let input = "server ntp.ubuntu.com iburst\nmakestep 1 3\nserver ntp.ubuntu.com iburst\n";
        let out = ensure_line(input, SERVER).unwrap();
        assert_eq!(count_line(&out, SERVER), 1);
        assert!(out.contains("makestep 1 3"));
        assert!(ensure_line(&out, SERVER).is_none());
    }

    #[test]
    fn test_ensure_before_exit_inserts_above_exit() {
        let rc = "#!/bin/sh -e\n# rc.local\n\nexit 0\n";
        let out = ensure_before_exit(rc, "numlockx on").unwrap();
        assert_eq!(out, "#!/bin/sh -e\n# rc.local\n\nnumlockx on\nexit 0\n");
        assert!(ensure_before_exit(&out, "numlockx on").is_none());
    }

    #[test]
    fn test_ensure_before_exit_moves_line_after_exit() {
        let rc = "#!/bin/sh -e\nexit 0\nnumlockx on\n";
        let out = ensure_before_exit(rc, "numlockx on").unwrap();
        assert_eq!(out, "#!/bin/sh -e\nnumlockx on\nexit 0\n");
    }

    #[test]
    fn test_ensure_before_exit_creates_skeleton() {
        let out = ensure_before_exit("", "numlockx on").unwrap();
        assert!(out.starts_with("#!/bin/sh -e"));
        assert!(out.trim_end().ends_with("exit 0"));
        assert_eq!(count_line(&out, "numlockx on"), 1);
    }

    #[test]
    fn test_ensure_before_exit_without_exit_line() {
        let out = ensure_before_exit("#!/bin/sh\necho hi\n", "numlockx on").unwrap();
        assert_eq!(out, "#!/bin/sh\necho hi\nnumlockx on\nexit 0\n");
    }

    #[test]
    fn test_set_assignment_appends() {
        let env = "PATH=\"/usr/local/sbin:/usr/bin\"\n";
        let out = set_assignment(env, "JAVA_HOME", "/usr/lib/jvm/java-8-openjdk-amd64").unwrap();
        assert!(out.ends_with("JAVA_HOME=\"/usr/lib/jvm/java-8-openjdk-amd64\"\n"));
        assert_eq!(count_assignments(&out, "JAVA_HOME"), 1);
    }

    #[test]
    fn test_set_assignment_noop_for_same_value_any_quoting() {
        assert!(set_assignment("JAVA_HOME=/opt/jdk\n", "JAVA_HOME", "/opt/jdk").is_none());
        assert!(set_assignment("JAVA_HOME='/opt/jdk'\n", "JAVA_HOME", "/opt/jdk").is_none());
    }

    #[test]
    fn test_set_assignment_dedupes_and_rewrites() {
        let env = "JAVA_HOME=/old\nPATH=/bin\nJAVA_HOME=\"/new\"\n";
        let out = set_assignment(env, "JAVA_HOME", "/new").unwrap();
        assert_eq!(out, "JAVA_HOME=\"/new\"\nPATH=/bin\n");
    }

    #[test]
    fn test_assignment_does_not_match_prefix_keys() {
        assert_eq!(count_assignments("JAVA_HOME_OLD=/x\n", "JAVA_HOME"), 0);
        assert_eq!(assignment("JAVA_HOME_OLD=/x\n", "JAVA_HOME"), None);
    }

    #[test]
    fn test_repository_marker() {
        assert_eq!(repository_marker("ppa:ubuntugis/ppa"), "/ubuntugis/ppa/ubuntu");
        assert_eq!(repository_marker("ppa:x2go/stable"), "/x2go/stable/ubuntu");
        assert_eq!(
            repository_marker("deb http://example.org/apt/ focal main"),
            "http://example.org/apt"
        );
    }
}
