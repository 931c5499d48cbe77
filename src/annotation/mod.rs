//! Annotation engine (`-- @aul:k[=v]` directives).
//!
//! An annotation line is an SQL line comment beginning with `-- @aul:`
//! followed by either `key` (boolean flag) or `key=value`. A run of
//! contiguous annotation lines forms a block; blocks are broken by a blank
//! line but not by ordinary `-- ` comments. The block binds to the first
//! non-blank, non-comment statement that follows it.

mod duration;
mod set;

pub use set::{AnnotationSet, ValidationWarning};

use duration::parse_duration;

const PREFIX: &str = "-- @aul:";

/// One parsed annotation block together with the byte offset (into the
/// original source) of the statement it binds to.
#[derive(Debug, Clone)]
pub struct AnnotationBlock {
    pub set: AnnotationSet,
    pub statement_offset: usize,
}

/// Parse a single annotation line's payload (everything after `-- @aul:`)
/// into a `(key, value)` pair. A bare `key` with no `=` is a boolean flag,
/// represented as an empty value per the data model ("an empty value means
/// 'flag present'").
fn parse_line(payload: &str) -> Option<(String, String)> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    match payload.split_once('=') {
        Some((k, v)) => Some((k.trim().to_string(), v.trim().to_string())),
        None => Some((payload.to_string(), String::new())),
    }
}

/// Scan `source` for every annotation block and the statement it binds
/// to. A statement boundary is the first line, after the block, that is
/// neither blank nor an ordinary `-- ` comment.
pub fn extract_annotations(source: &str) -> Vec<AnnotationBlock> {
    let mut blocks = Vec::new();
    let mut offset = 0usize;
    let lines: Vec<(&str, usize)> = {
        let mut v = Vec::new();
        let mut pos = 0usize;
        for line in source.split_inclusive('\n') {
            let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
            v.push((trimmed, pos));
            pos += line.len();
        }
        v
    };
    let _ = offset;

    let mut i = 0;
    while i < lines.len() {
        let (line, _line_off) = lines[i];
        let trimmed = line.trim_start();
        if let Some(payload) = trimmed.strip_prefix(PREFIX) {
            let mut pairs = Vec::new();
            if let Some(kv) = parse_line(payload) {
                pairs.push(kv);
            }
            let mut j = i + 1;
            while j < lines.len() {
                let (next_line, _) = lines[j];
                let next_trimmed = next_line.trim_start();
                if let Some(next_payload) = next_trimmed.strip_prefix(PREFIX) {
                    if let Some(kv) = parse_line(next_payload) {
                        pairs.push(kv);
                    }
                    j += 1;
                } else {
                    break;
                }
            }
            // Find the bound statement: first line after the block that is
            // neither blank nor a plain `-- ` comment. Blank lines and
            // plain comments are skipped but a blank line still only
            // *breaks the block*, it doesn't prevent binding to whatever
            // statement follows once scanning resumes.
            let mut k = j;
            let mut stmt_offset = None;
            while k < lines.len() {
                let (candidate, candidate_off) = lines[k];
                let candidate_trimmed = candidate.trim();
                if candidate_trimmed.is_empty() {
                    k += 1;
                    continue;
                }
                if candidate_trimmed.starts_with("--") {
                    k += 1;
                    continue;
                }
                stmt_offset = Some(candidate_off);
                break;
            }
            let (set, warnings) = AnnotationSet::from_pairs(pairs);
            for w in warnings {
                log::warn!("annotation validation: {w}");
            }
            blocks.push(AnnotationBlock {
                set,
                statement_offset: stmt_offset.unwrap_or(source.len()),
            });
            i = j;
        } else {
            i += 1;
        }
    }
    blocks
}

/// Parse one contiguous block of annotation-comment lines (already
/// isolated by the caller) into an [`AnnotationSet`].
pub fn parse_block(lines: &[&str]) -> AnnotationSet {
    let mut pairs = Vec::new();
    for line in lines {
        let trimmed = line.trim_start();
        if let Some(payload) = trimmed.strip_prefix(PREFIX) {
            if let Some(kv) = parse_line(payload) {
                pairs.push(kv);
            }
        }
    }
    AnnotationSet::from_pairs(pairs).0
}

pub(crate) use duration::format_duration;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_flag_binds_to_next_statement() {
        let src = "-- @aul:isolated\nCREATE TABLE t (id INT);\n";
        let blocks = extract_annotations(src);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].set.get_bool("isolated"));
        assert_eq!(&src[blocks[0].statement_offset..][..6], "CREATE");
    }

    #[test]
    fn blank_line_breaks_block_but_ordinary_comment_does_not() {
        let src = "-- @aul:jit-threshold=5\n-- a plain remark\n-- @aul:no-jit\n\nSELECT 1;\n";
        let blocks = extract_annotations(src);
        // Blank line breaks the block after `no-jit`, so we get one block
        // containing both directives (the plain comment doesn't break it).
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].set.get_int("jit-threshold", 0), 5);
        assert!(blocks[0].set.get_bool("no-jit"));
    }

    #[test]
    fn duration_round_trips() {
        let mut pairs = Vec::new();
        pairs.push(("timeout".to_string(), "2m30s".to_string()));
        let (set, _) = AnnotationSet::from_pairs(pairs);
        assert_eq!(
            set.get_duration("timeout", std::time::Duration::ZERO),
            std::time::Duration::from_secs(150)
        );
    }
}
