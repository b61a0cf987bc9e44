//! Changeset extraction from markdown changelogs.
//!
//! A changelog is a sequence of headed sections, one per version:
//!
//! ```markdown
//! ## 1.2.0
//!
//! Fixed bug X.
//!
//! ## 1.1.0
//! ...
//! ```
//!
//! [`find_changeset`] locates the section whose heading names a version and
//! returns its heading text and trimmed body. Both ATX (`## 1.2.0`) and
//! setext (`1.2.0` underlined with `---` or `===`) headings are recognised.
//! A missing section is `None`, not an error: plenty of versions ship
//! without notes.

use std::io;

use camino::Utf8Path;
use serde::Serialize;
use tracing::debug;

/// Release notes for a single version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Changeset {
    /// Heading text, e.g. `1.2.0` or `1.2.0 (2024-05-01)`.
    pub name: String,
    /// Section body without surrounding blank lines.
    pub body: String,
}

#[derive(Debug)]
struct Heading<'a> {
    level: usize,
    text: &'a str,
    /// Index of the heading's first line.
    start: usize,
    /// Index of the first body line.
    body_start: usize,
}

/// Find the changelog section for `tag_or_version`.
///
/// `tag_prefix` is stripped from the requested tag and from heading tokens
/// before comparison, as is a leading `v` in front of a digit.
pub fn find_changeset(
    markdown: &str,
    tag_or_version: &str,
    tag_prefix: Option<&str>,
) -> Option<Changeset> {
    let wanted = normalize_version(tag_or_version, tag_prefix);
    if wanted.is_empty() {
        return None;
    }

    let lines: Vec<&str> = markdown.lines().collect();
    let headings = scan_headings(&lines);

    let (index, heading) = headings
        .iter()
        .enumerate()
        .find(|(_, h)| heading_names_version(h.text, &wanted, tag_prefix))?;

    let end = headings[index + 1..]
        .iter()
        .find(|next| next.level <= heading.level)
        .map_or(lines.len(), |next| next.start);

    let body = trim_blank_lines(&lines[heading.body_start..end]);
    debug!(version = %wanted, heading = heading.text, "changeset found");

    Some(Changeset {
        name: heading.text.to_string(),
        body,
    })
}

/// Read a changelog file and extract the section for `tag_or_version`.
///
/// A missing file yields `Ok(None)`.
pub async fn read_changeset(
    path: &Utf8Path,
    tag_or_version: &str,
    tag_prefix: Option<&str>,
) -> io::Result<Option<Changeset>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(find_changeset(&text, tag_or_version, tag_prefix)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(%path, "changelog not found");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Strip the configured tag prefix and a leading `v` from a version string.
pub fn normalize_version<'a>(tag: &'a str, tag_prefix: Option<&str>) -> &'a str {
    let tag = tag.trim();
    let tag = tag_prefix
        .filter(|p| !p.is_empty())
        .and_then(|p| tag.strip_prefix(p))
        .unwrap_or(tag);
    match tag.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => tag,
    }
}

fn heading_names_version(text: &str, wanted: &str, tag_prefix: Option<&str>) -> bool {
    if text == wanted {
        return true;
    }
    text.split_whitespace().next().is_some_and(|token| {
        let token = token.trim_start_matches('[').trim_end_matches(']');
        normalize_version(token, tag_prefix) == wanted
    })
}

fn scan_headings<'a>(lines: &[&'a str]) -> Vec<Heading<'a>> {
    let mut headings = Vec::new();
    let mut in_fence = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            i += 1;
            continue;
        }
        if in_fence {
            i += 1;
            continue;
        }

        if let Some((level, text)) = parse_atx(line) {
            headings.push(Heading {
                level,
                text,
                start: i,
                body_start: i + 1,
            });
            i += 1;
            continue;
        }

        if !trimmed.is_empty()
            && let Some(next) = lines.get(i + 1)
            && let Some(level) = setext_level(next)
        {
            headings.push(Heading {
                level,
                text: line.trim(),
                start: i,
                body_start: i + 2,
            });
            i += 2;
            continue;
        }

        i += 1;
    }

    headings
}

/// Parse `## Heading ##` style lines into (level, text).
fn parse_atx(line: &str) -> Option<(usize, &str)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    let text = after.trim().trim_end_matches('#').trim_end();
    Some((level, text))
}

fn setext_level(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c == '=') {
        Some(1)
    } else if trimmed.chars().all(|c| c == '-') {
        Some(2)
    } else {
        None
    }
}

fn trim_blank_lines(lines: &[&str]) -> String {
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANGELOG: &str = "# Changelog\n\n## 1.2.0\n\nFixed bug X.\n\n## 1.1.0\n\n- Added Y\n- Added Z\n";

    #[test]
    fn finds_section_for_version() {
        let changeset = find_changeset(CHANGELOG, "1.2.0", None).unwrap();
        assert_eq!(changeset.name, "1.2.0");
        assert_eq!(changeset.body, "Fixed bug X.");
    }

    #[test]
    fn missing_version_is_none() {
        assert!(find_changeset(CHANGELOG, "9.9.9", None).is_none());
    }

    #[test]
    fn last_section_runs_to_end_of_document() {
        let changeset = find_changeset(CHANGELOG, "1.1.0", None).unwrap();
        assert_eq!(changeset.body, "- Added Y\n- Added Z");
    }

    #[test]
    fn accepts_v_prefixed_tags() {
        let changeset = find_changeset(CHANGELOG, "v1.2.0", None).unwrap();
        assert_eq!(changeset.name, "1.2.0");
    }

    #[test]
    fn strips_configured_prefix() {
        let text = "## release-2.0.0\n\nBig one.\n";
        let changeset = find_changeset(text, "release-2.0.0", Some("release-")).unwrap();
        assert_eq!(changeset.body, "Big one.");
        let changeset = find_changeset(text, "2.0.0", Some("release-")).unwrap();
        assert_eq!(changeset.name, "release-2.0.0");
    }

    #[test]
    fn heading_with_date_suffix_matches() {
        let text = "## [1.3.0] - 2024-05-01\n\nStuff.\n\n## [1.2.0]\n";
        let changeset = find_changeset(text, "1.3.0", None).unwrap();
        assert_eq!(changeset.name, "[1.3.0] - 2024-05-01");
        assert_eq!(changeset.body, "Stuff.");
    }

    #[test]
    fn does_not_match_version_prefixes() {
        let text = "## 1.2.10\n\nNope.\n";
        assert!(find_changeset(text, "1.2.1", None).is_none());
    }

    #[test]
    fn setext_headings() {
        let text = "1.0.1\n-----\n\nPatch.\n\n1.0.0\n-----\n\nInitial.\n";
        let changeset = find_changeset(text, "1.0.1", None).unwrap();
        assert_eq!(changeset.name, "1.0.1");
        assert_eq!(changeset.body, "Patch.");
    }

    #[test]
    fn subsections_stay_in_body() {
        let text = "## 2.0.0\n\n### Features\n\n- A\n\n### Fixes\n\n- B\n\n## 1.0.0\n";
        let changeset = find_changeset(text, "2.0.0", None).unwrap();
        assert_eq!(changeset.body, "### Features\n\n- A\n\n### Fixes\n\n- B");
    }

    #[test]
    fn headings_inside_code_fences_are_ignored() {
        let text = "## 1.0.0\n\n```\n## 0.9.0\n```\n\nDone.\n";
        let changeset = find_changeset(text, "1.0.0", None).unwrap();
        assert_eq!(changeset.body, "```\n## 0.9.0\n```\n\nDone.");
        assert!(find_changeset(text, "0.9.0", None).is_none());
    }

    #[test]
    fn empty_section_has_empty_body() {
        let text = "## 1.0.0\n\n## 0.9.0\n\nOld.\n";
        let changeset = find_changeset(text, "1.0.0", None).unwrap();
        assert_eq!(changeset.body, "");
    }

    #[test]
    fn normalize_version_variants() {
        assert_eq!(normalize_version("v1.0.0", None), "1.0.0");
        assert_eq!(normalize_version("1.0.0", None), "1.0.0");
        assert_eq!(normalize_version("version", None), "version");
        assert_eq!(normalize_version("pkg@1.0.0", Some("pkg@")), "1.0.0");
    }

    #[tokio::test]
    async fn read_changeset_missing_file_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = camino::Utf8PathBuf::try_from(tmp.path().join("CHANGELOG.md")).unwrap();
        assert_eq!(read_changeset(&path, "1.0.0", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_changeset_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = camino::Utf8PathBuf::try_from(tmp.path().join("CHANGELOG.md")).unwrap();
        std::fs::write(&path, CHANGELOG).unwrap();
        let changeset = read_changeset(&path, "1.2.0", None).await.unwrap().unwrap();
        assert_eq!(changeset.body, "Fixed bug X.");
    }
}
