//! File effects against the target workspace (`write_file`, `patch_file`).
//!
//! Every target path is confined to the workspace root: it must be relative,
//! non-empty and contain no `..` or root components, and it may not reach
//! outside the root through a symlinked directory. Violations are
//! `EffectFailure`, as is any I/O or patch mismatch.

use crate::core::error::MissionctlError;
use crate::core::store::write_atomic;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub file: String,
    pub bytes: usize,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    pub file: String,
    pub bytes: usize,
    pub hunks_applied: usize,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    /// Relative prefixes no effect may touch (the control directory).
    protected: Vec<PathBuf>,
}

fn effect_err(msg: impl Into<String>) -> MissionctlError {
    MissionctlError::EffectFailure(msg.into())
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            protected: Vec::new(),
        }
    }

    pub fn with_protected(mut self, rel: impl Into<PathBuf>) -> Self {
        self.protected.push(rel.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for `rel`, or `EffectFailure` if it would leave the root.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, MissionctlError> {
        if rel.trim().is_empty() {
            return Err(effect_err("target path is empty"));
        }
        let rel_path = Path::new(rel);
        let mut clean = PathBuf::new();
        for component in rel_path.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(effect_err(format!(
                        "target path '{}' escapes the workspace ('..' component)",
                        rel
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(effect_err(format!(
                        "target path '{}' must be relative to the workspace",
                        rel
                    )));
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(effect_err(format!("target path '{}' names no file", rel)));
        }
        if self.protected.iter().any(|p| clean.starts_with(p)) {
            return Err(effect_err(format!(
                "target path '{}' is inside a protected directory",
                rel
            )));
        }
        let target = self.root.join(&clean);
        self.check_no_symlink_escape(&target, rel)?;
        Ok(target)
    }

    fn check_no_symlink_escape(&self, target: &Path, rel: &str) -> Result<(), MissionctlError> {
        let Ok(root) = self.root.canonicalize() else {
            // Root does not exist yet; nothing inside it can be a symlink.
            return Ok(());
        };
        let mut probe = target.parent();
        while let Some(dir) = probe {
            if let Ok(real) = dir.canonicalize() {
                if !real.starts_with(&root) {
                    return Err(effect_err(format!(
                        "target path '{}' resolves outside the workspace",
                        rel
                    )));
                }
                return Ok(());
            }
            probe = dir.parent();
        }
        Ok(())
    }

    pub fn write_file(&self, rel: &str, content: &str) -> Result<WriteOutcome, MissionctlError> {
        let target = self.resolve(rel)?;
        let created = !target.exists();
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| effect_err(format!("cannot create directory for '{}': {}", rel, e)))?;
        }
        write_atomic(&target, content.as_bytes())
            .map_err(|e| effect_err(format!("cannot write '{}': {}", rel, e)))?;
        Ok(WriteOutcome {
            file: rel.to_string(),
            bytes: content.len(),
            created,
        })
    }

    pub fn patch_file(&self, rel: &str, patch: &str) -> Result<PatchOutcome, MissionctlError> {
        let target = self.resolve(rel)?;
        let original = fs::read_to_string(&target)
            .map_err(|e| effect_err(format!("cannot read '{}' for patching: {}", rel, e)))?;
        let (patched, hunks_applied) = apply_unified_diff(&original, patch).map_err(|reason| {
            effect_err(format!("patch for '{}' does not apply: {}", rel, reason))
        })?;
        write_atomic(&target, patched.as_bytes())
            .map_err(|e| effect_err(format!("cannot write '{}': {}", rel, e)))?;
        Ok(PatchOutcome {
            file: rel.to_string(),
            bytes: patched.len(),
            hunks_applied,
        })
    }

    /// `patch_file` for a resumed job: a file that already holds the patch's
    /// post-image counts as patched and is left untouched.
    pub fn reapply_patch(&self, rel: &str, patch: &str) -> Result<PatchOutcome, MissionctlError> {
        let target = self.resolve(rel)?;
        let current = fs::read_to_string(&target)
            .map_err(|e| effect_err(format!("cannot read '{}' for patching: {}", rel, e)))?;
        match patch_is_applied(&current, patch) {
            Some(hunks_applied) => {
                tracing::info!(file = rel, "patch already applied; leaving file as is");
                Ok(PatchOutcome {
                    file: rel.to_string(),
                    bytes: current.len(),
                    hunks_applied,
                })
            }
            None => self.patch_file(rel, patch),
        }
    }
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    old_len: usize,
    new_start: usize,
    new_len: usize,
    lines: Vec<(char, String)>,
}

fn parse_range(raw: &str) -> Option<(usize, usize)> {
    match raw.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((raw.parse().ok()?, 1)),
    }
}

/// `@@ -a,b +c,d @@ ...`
fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let body = line.strip_prefix("@@ ")?;
    let (ranges, _) = body.split_once(" @@")?;
    let (old, new) = ranges.split_once(' ')?;
    let (old_start, old_len) = parse_range(old.strip_prefix('-')?)?;
    let (new_start, new_len) = parse_range(new.strip_prefix('+')?)?;
    Some((old_start, old_len, new_start, new_len))
}

fn parse_hunks(patch: &str) -> Result<Vec<Hunk>, String> {
    let mut hunks: Vec<Hunk> = Vec::new();
    for line in patch.lines() {
        if line.starts_with("@@") {
            let (old_start, old_len, new_start, new_len) = parse_hunk_header(line)
                .ok_or_else(|| format!("malformed hunk header '{}'", line))?;
            hunks.push(Hunk {
                old_start,
                old_len,
                new_start,
                new_len,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            // File headers (`diff`, `index`, `---`, `+++`) before the first hunk.
            continue;
        };
        if line.starts_with('\\') {
            continue;
        }
        let mut chars = line.chars();
        match chars.next() {
            Some(tag @ (' ' | '-' | '+')) => hunk.lines.push((tag, chars.as_str().to_string())),
            None => hunk.lines.push((' ', String::new())),
            Some(_) => return Err(format!("unexpected line in hunk: '{}'", line)),
        }
    }
    if hunks.is_empty() {
        return Err("no hunks found".to_string());
    }
    for (i, hunk) in hunks.iter().enumerate() {
        let old = hunk.lines.iter().filter(|(t, _)| *t != '+').count();
        let new = hunk.lines.iter().filter(|(t, _)| *t != '-').count();
        if old != hunk.old_len || new != hunk.new_len {
            return Err(format!(
                "hunk {} header expects -{}/+{} lines, body has -{}/+{}",
                i + 1,
                hunk.old_len,
                hunk.new_len,
                old,
                new
            ));
        }
    }
    Ok(hunks)
}

/// Apply unified-diff hunks to `original`. Hunks must be in order and match
/// exactly at their stated positions. Returns the new text and hunk count.
pub fn apply_unified_diff(original: &str, patch: &str) -> Result<(String, usize), String> {
    apply_hunks(original, &parse_hunks(patch)?)
}

/// `Some(hunk count)` when `current` already holds the post-image of `patch`
/// at the positions its hunk headers name, i.e. the reversed patch applies.
pub fn patch_is_applied(current: &str, patch: &str) -> Option<usize> {
    let reversed: Vec<Hunk> = parse_hunks(patch)
        .ok()?
        .into_iter()
        .map(|h| Hunk {
            old_start: h.new_start,
            old_len: h.new_len,
            new_start: h.old_start,
            new_len: h.old_len,
            lines: h
                .lines
                .into_iter()
                .map(|(tag, text)| match tag {
                    '+' => ('-', text),
                    '-' => ('+', text),
                    _ => (tag, text),
                })
                .collect(),
        })
        .collect();
    apply_hunks(current, &reversed).ok().map(|(_, n)| n)
}

fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<(String, usize), String> {
    let trailing_newline = original.is_empty() || original.ends_with('\n');
    let mut source: Vec<&str> = original.split('\n').collect();
    if trailing_newline {
        source.pop();
    }

    let mut out: Vec<String> = Vec::with_capacity(source.len());
    let mut cursor = 0usize;
    for (i, hunk) in hunks.iter().enumerate() {
        // A zero-length old range names the line *after* which to insert.
        let start = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if start < cursor || start > source.len() {
            return Err(format!(
                "hunk {} starts at line {} which is out of order or past the end",
                i + 1,
                hunk.old_start
            ));
        }
        out.extend(source[cursor..start].iter().map(|l| l.to_string()));
        let mut pos = start;
        for (tag, text) in &hunk.lines {
            match tag {
                '+' => out.push(text.clone()),
                _ => {
                    let found = source.get(pos).ok_or_else(|| {
                        format!("hunk {} runs past the end of the file", i + 1)
                    })?;
                    if *found != text.as_str() {
                        return Err(format!(
                            "hunk {} mismatch at line {}: expected '{}', found '{}'",
                            i + 1,
                            pos + 1,
                            text,
                            found
                        ));
                    }
                    if *tag == ' ' {
                        out.push(text.clone());
                    }
                    pos += 1;
                }
            }
        }
        cursor = pos;
    }
    out.extend(source[cursor..].iter().map(|l| l.to_string()));

    let mut text = out.join("\n");
    if trailing_newline && !out.is_empty() {
        text.push('\n');
    }
    Ok((text, hunks.len()))
}
