//! Resolution of require, helper and spec file lists from glob patterns.
use regex::Regex;
use std::{
    collections::HashSet,
    path::{MAIN_SEPARATOR, Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// Prefix that turns a pattern into an exclusion.
pub const NEGATION_MARKER: char = '!';

#[derive(Error, Debug)]
pub enum GlobError {
    #[error("Invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Expands glob patterns into paths.
///
/// Implementations return each path at most once, always use `/` as separator, and drop
/// every path matched by a pattern starting with [`NEGATION_MARKER`].
pub trait GlobMatcher: Send + Sync {
    fn glob(&self, patterns: &[String]) -> Result<Vec<String>, GlobError>;
}

/// [`GlobMatcher`] over the filesystem, with relative patterns resolved against `root`.
///
/// Supports `*`, `?`, `**`, `[...]` classes and `{a,b}` alternatives.
#[derive(Debug, Clone)]
pub struct FsGlobMatcher {
    root: PathBuf,
}

impl FsGlobMatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn expand(&self, pattern: &str) -> Result<Vec<String>, GlobError> {
        let regex = glob_to_regex(pattern)?;
        let base = static_prefix(pattern);
        let base_dir = self.root.join(&base);
        if !has_wildcards(pattern) {
            return Ok(if base_dir.is_file() {
                vec![pattern.to_string()]
            } else {
                Vec::new()
            });
        }
        if !base_dir.is_dir() {
            return Ok(Vec::new());
        }

        let absolute = Path::new(pattern).is_absolute();
        let mut matches = Vec::new();
        for entry in WalkDir::new(&base_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = if absolute {
                entry.path().to_path_buf()
            } else {
                match entry.path().strip_prefix(&self.root) {
                    Ok(relative) => relative.to_path_buf(),
                    Err(_) => continue,
                }
            };
            let candidate = to_slash(&path);
            if regex.is_match(&candidate) {
                matches.push(candidate);
            }
        }
        Ok(matches)
    }
}

impl GlobMatcher for FsGlobMatcher {
    #[instrument(skip(self))]
    fn glob(&self, patterns: &[String]) -> Result<Vec<String>, GlobError> {
        let mut seen = HashSet::new();
        let mut included = Vec::new();
        let mut excluded = Vec::new();

        for pattern in patterns {
            if let Some(negated) = pattern.strip_prefix(NEGATION_MARKER) {
                excluded.push(glob_to_regex(negated)?);
                continue;
            }
            for path in self.expand(pattern)? {
                if seen.insert(path.clone()) {
                    included.push(path);
                }
            }
        }

        included.retain(|path| !excluded.iter().any(|regex| regex.is_match(path)));
        debug!(count = included.len(), "Expanded glob patterns");
        Ok(included)
    }
}

fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Leading path segments without wildcards, the directory a walk can start from.
fn static_prefix(pattern: &str) -> String {
    let segments: Vec<&str> = pattern.split('/').collect();
    let mut prefix = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        if has_wildcards(segment) {
            break;
        }
        // The last segment is a file name, not a directory, unless the pattern has no
        // wildcards at all.
        if i == segments.len() - 1 && has_wildcards(pattern) {
            break;
        }
        prefix.push(*segment);
    }
    let joined = prefix.join("/");
    if joined.is_empty() && pattern.starts_with('/') {
        "/".to_string()
    } else {
        joined
    }
}

/// Segment that does not start with a dot, possibly empty.
const ANY_SEGMENT: &str = "(?:[^/.][^/]*)?";
/// Non-empty segment that does not start with a dot.
const NON_DOT_SEGMENT: &str = "[^/.][^/]*";

/// Index of the `}` closing the brace at `open`, if any.
fn closing_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Compiles a `/`-separated glob into an anchored regex.
///
/// Wildcards never match a path segment starting with `.`; such segments must be spelled
/// out in the pattern. Braces nest.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, GlobError> {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    // Stack of closing-brace positions for the alternations currently open.
    let mut alternations: Vec<usize> = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        let at_segment_start = i == 0 || chars[i - 1] == '/';
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if at_segment_start && chars.get(i + 2) == Some(&'/') {
                    out.push_str(&format!("(?:{NON_DOT_SEGMENT}/)*"));
                    i += 3;
                    continue;
                }
                if at_segment_start && i + 2 == chars.len() {
                    out.push_str(&format!("(?:{NON_DOT_SEGMENT}(?:/{NON_DOT_SEGMENT})*)?"));
                    i += 2;
                    continue;
                }
                // `**` inside a segment acts like `*`.
                out.push_str(if at_segment_start { ANY_SEGMENT } else { "[^/]*" });
                i += 2;
                continue;
            }
            '*' if at_segment_start => {
                // An empty match must not let a literal dot start the segment.
                if chars.get(i + 1) == Some(&'.') {
                    out.push_str(NON_DOT_SEGMENT);
                } else {
                    out.push_str(ANY_SEGMENT);
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' if at_segment_start => out.push_str("[^/.]"),
            '?' => out.push_str("[^/]"),
            '[' => match chars[i..].iter().position(|&ch| ch == ']') {
                Some(end) if end > 1 => {
                    let class: String = chars[i + 1..i + end].iter().collect();
                    let class = class
                        .strip_prefix('!')
                        .map_or(class.clone(), |rest| format!("^{rest}"));
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                    i += end + 1;
                    continue;
                }
                _ => out.push_str(r"\["),
            },
            '{' => match closing_brace(&chars, i) {
                Some(close) => {
                    alternations.push(close);
                    out.push_str("(?:");
                }
                None => out.push_str(r"\{"),
            },
            '}' if alternations.last() == Some(&i) => {
                alternations.pop();
                out.push(')');
            }
            ',' if !alternations.is_empty() => out.push('|'),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    Regex::new(&out).map_err(|source| GlobError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// `path` with the platform separator, the form previously stored entries may use.
fn os_normalize(path: &str) -> String {
    path.replace('/', &MAIN_SEPARATOR.to_string())
}

/// Prepares a user pattern for the matcher, keeping a leading negation marker.
///
/// Relative patterns are joined with `spec_dir`, separators become `/` and a leading
/// `./` is dropped.
pub fn normalize_pattern(pattern: &str, spec_dir: &str) -> String {
    let (negated, rest) = match pattern.strip_prefix(NEGATION_MARKER) {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };

    let mut normalized = rest.replace('\\', "/");
    let is_absolute = normalized.starts_with('/') || Path::new(rest).is_absolute();
    let spec_dir = spec_dir.replace('\\', "/");
    let spec_dir = spec_dir.trim_start_matches("./").trim_end_matches('/');
    if !is_absolute && !spec_dir.is_empty() {
        normalized = format!("{spec_dir}/{}", normalized.trim_start_matches("./"));
    }
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }

    if negated {
        format!("{NEGATION_MARKER}{normalized}")
    } else {
        normalized
    }
}

/// The three ordered file lists of a run.
#[derive(Debug, Clone)]
pub struct FileSet {
    requires: Vec<String>,
    helpers: Vec<String>,
    specs: Vec<String>,
    dependency_dir: String,
}

impl Default for FileSet {
    fn default() -> Self {
        Self::new("vendor")
    }
}

impl FileSet {
    /// `dependency_dir` names the directory installed dependencies live in; specs found
    /// under it are never collected.
    pub fn new(dependency_dir: &str) -> Self {
        Self {
            requires: Vec::new(),
            helpers: Vec::new(),
            specs: Vec::new(),
            dependency_dir: dependency_dir.to_string(),
        }
    }

    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    pub fn helpers(&self) -> &[String] {
        &self.helpers
    }

    pub fn specs(&self) -> &[String] {
        &self.specs
    }

    /// Appends module specifiers as given, without expansion.
    pub fn add_requires(&mut self, requires: &[String]) {
        self.requires.extend(requires.iter().cloned());
    }

    pub fn add_helper_files(
        &mut self,
        matcher: &dyn GlobMatcher,
        patterns: &[String],
    ) -> Result<(), GlobError> {
        if patterns.is_empty() {
            return Ok(());
        }
        for file in matcher.glob(patterns)? {
            push_unique(&mut self.helpers, file);
        }
        Ok(())
    }

    pub fn add_spec_files(
        &mut self,
        matcher: &dyn GlobMatcher,
        patterns: &[String],
    ) -> Result<(), GlobError> {
        if patterns.is_empty() {
            return Ok(());
        }
        for file in matcher.glob(patterns)? {
            if self.in_dependency_dir(&file) {
                debug!(file, "Skipping spec inside dependency directory");
                continue;
            }
            push_unique(&mut self.specs, file);
        }
        Ok(())
    }

    /// Appends a single spec path as given.
    pub fn add_spec_file(&mut self, path: &str) {
        self.specs.push(path.to_string());
    }

    pub fn clear_specs(&mut self) {
        self.specs.clear();
    }

    fn in_dependency_dir(&self, file: &str) -> bool {
        file.split(['/', '\\'])
            .any(|component| component == self.dependency_dir)
    }
}

fn push_unique(list: &mut Vec<String>, file: String) {
    let normalized = os_normalize(&file);
    if !list.iter().any(|existing| *existing == file || *existing == normalized) {
        list.push(file);
    }
}
