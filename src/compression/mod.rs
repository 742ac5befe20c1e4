//! Compression policy: path rules deciding which entries are candidates,
//! plus the LZSS codec used for `Cprs` payloads.

pub mod lzss;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path::{normalize_for_matching, normalize_path};
use crate::types::{MatcherOptions, PackOptions};

/// Whether a matching rule includes or excludes a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Include,
    Exclude,
}

/// One ordered compression path rule. The last matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressRule {
    pub action: RuleAction,
    /// Glob pattern: `*`, `**`, directory-only (`dir/`), and root-anchored
    /// (`/dir/*.ext`) forms are supported. Patterns without a separator
    /// match at any depth.
    pub pattern: String,
}

impl CompressRule {
    /// Build an include rule.
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            action: RuleAction::Include,
            pattern: pattern.into(),
        }
    }

    /// Build an exclude rule.
    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            action: RuleAction::Exclude,
            pattern: pattern.into(),
        }
    }
}

/// Compiled ordered rule list for compression candidate selection.
pub(crate) struct CompressMatcher {
    rules: Vec<(RuleAction, GlobMatcher)>,
    default_include: bool,
}

impl CompressMatcher {
    /// Compile rules; returns `None` when no usable rules remain, which
    /// disables compression entirely.
    pub(crate) fn new(rules: &[CompressRule], opts: MatcherOptions) -> Result<Option<Self>> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let pattern = normalize_for_matching(&rule.pattern);
            if pattern.is_empty() {
                continue;
            }

            let glob = GlobBuilder::new(&expand_pattern(&pattern))
                .case_insensitive(opts.case_insensitive)
                .literal_separator(true)
                .build()?;
            compiled.push((rule.action, glob.compile_matcher()));
        }

        if compiled.is_empty() {
            return Ok(None);
        }

        Ok(Some(Self {
            rules: compiled,
            default_include: opts.default_include,
        }))
    }

    /// Whether `path` is included by the rule list.
    pub(crate) fn matches(&self, path: &str) -> bool {
        let candidate = normalize_path(path);
        if candidate.is_empty() {
            return false;
        }

        let mut included = self.default_include;
        for (action, glob) in &self.rules {
            if glob.is_match(candidate.as_str()) {
                included = *action == RuleAction::Include;
            }
        }

        included
    }
}

/// Rewrite a rule pattern into globset form.
///
/// Leading `/` anchors at the archive root; a pattern containing `/`
/// elsewhere is root-anchored too (gitignore convention); anything else
/// matches at any depth. A trailing `/` selects the whole subtree.
fn expand_pattern(pattern: &str) -> String {
    let anchored = pattern.starts_with('/');
    let mut pattern = pattern.strip_prefix('/').unwrap_or(pattern).to_string();

    // A separator anywhere except the trailing position anchors the rule.
    let anchored_by_slash = pattern.trim_end_matches('/').contains('/');

    if pattern.ends_with('/') {
        pattern.push_str("**");
    }

    if !anchored && !anchored_by_slash {
        pattern.insert_str(0, "**/");
    }

    pattern
}

/// Whether a payload of `size` bytes fits the compression boundaries.
pub(crate) fn should_compress_by_size(opts: &PackOptions, size: u32) -> bool {
    size >= opts.min_compress_size && size <= opts.max_compress_size
}

/// Whether `path` and `size` pass the full compression policy.
pub(crate) fn should_compress(
    opts: &PackOptions,
    matcher: Option<&CompressMatcher>,
    path: &str,
    size: u32,
) -> bool {
    if !should_compress_by_size(opts, size) {
        return false;
    }

    matcher.is_some_and(|m| m.matches(path))
}
