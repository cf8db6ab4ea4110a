//! Deterministic text rules applied to engine output before it is written.
//!
//! ## Reference rewriting
//!
//! The engine emits placeholder image references shaped like
//! `![](_page_<N>_Picture_<M>.<ext>)`: an empty caption and the engine's
//! internal image identifier where a path belongs. Those identifiers are not
//! paths, so the document is born with broken links. [`rewrite_image_references`]
//! substitutes the real relative path for every identifier that was extracted
//! and a same-shaped fallback path for every one that was not, so no bare
//! placeholder ever survives into the output.
//!
//! The pattern anchors on the identifier shape (leading `_page_`), which a
//! rewritten path (`images/_page_...`) no longer has directly after the
//! opening parenthesis. Running the rule twice is therefore a no-op, and the
//! substitution is position-independent: plain pattern replacement over the
//! whole document.
//!
//! ## Contents formatting
//!
//! Engines tend to flatten a book's table of contents into long lines with
//! several `[title](#anchor)` links each. [`format_contents_sections`] splits
//! those one link per line, but only between a `Contents` heading and the
//! next heading, so link-dense prose elsewhere is untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

// ── Rule 1: Rewrite placeholder image references ─────────────────────────────

static RE_IMAGE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[\]\((_page_\d+_Picture_\d+\.\w+)\)").unwrap());

/// Rewrite every placeholder reference to a relative path.
///
/// `resolved` maps extracted identifiers to their relative paths
/// (`images/<id>`); identifiers missing from it get the fallback
/// `<fallback_dir>/<id>`. References with a non-empty caption or a shape the
/// engine never produces are left alone.
pub fn rewrite_image_references(
    input: &str,
    resolved: &HashMap<String, String>,
    fallback_dir: &str,
) -> String {
    RE_IMAGE_PLACEHOLDER
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let id = &caps[1];
            match resolved.get(id) {
                Some(path) => format!("![]({path})"),
                None => format!("![]({fallback_dir}/{id})"),
            }
        })
        .to_string()
}

// ── Rule 2: One link per line inside a Contents section ──────────────────────

static RE_CONTENTS_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^#{1,6}\s+contents\s*$").unwrap());

static RE_ANCHOR_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]\(#[^)]*\)").unwrap());

/// Split multi-link lines under a `Contents` heading one link per line.
///
/// Scope runs from a heading whose text is exactly `Contents` (any depth,
/// case-insensitive) to the next heading. Lines carrying zero or one anchor
/// link pass through unchanged; lines carrying several are replaced by their
/// links, one per line, dropping the leftover separator whitespace.
pub fn format_contents_sections(input: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_contents = false;

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            in_contents = RE_CONTENTS_HEADING.is_match(line.trim());
            out.push(line.to_string());
            continue;
        }
        if in_contents {
            let links: Vec<&str> = RE_ANCHOR_LINK.find_iter(line).map(|m| m.as_str()).collect();
            if links.len() > 1 {
                out.extend(links.into_iter().map(String::from));
                continue;
            }
        }
        out.push(line.to_string());
    }

    let mut result = out.join("\n");
    if input.ends_with('\n') {
        result.push('\n');
    }
    result
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_rewrite_extracted_reference() {
        let map = resolved(&[("_page_2_Picture_0.png", "images/_page_2_Picture_0.png")]);
        let input = "Before\n![](_page_2_Picture_0.png)\nAfter";
        assert_eq!(
            rewrite_image_references(input, &map, "images"),
            "Before\n![](images/_page_2_Picture_0.png)\nAfter"
        );
    }

    #[test]
    fn test_rewrite_unextracted_gets_fallback() {
        let input = "![](_page_9_Picture_3.jpeg)";
        assert_eq!(
            rewrite_image_references(input, &HashMap::new(), "images"),
            "![](images/_page_9_Picture_3.jpeg)"
        );
    }

    #[test]
    fn test_rewrite_mixes_resolved_and_fallback() {
        let map = resolved(&[("_page_0_Picture_0.png", "images/_page_0_Picture_0.png")]);
        let input = "![](_page_0_Picture_0.png) text ![](_page_0_Picture_1.png)";
        let result = rewrite_image_references(input, &map, "images");
        assert_eq!(
            result,
            "![](images/_page_0_Picture_0.png) text ![](images/_page_0_Picture_1.png)"
        );
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let map = resolved(&[("_page_2_Picture_0.png", "images/_page_2_Picture_0.png")]);
        let input = "![](_page_2_Picture_0.png) and ![](_page_5_Picture_1.png)";
        let once = rewrite_image_references(input, &map, "images");
        let twice = rewrite_image_references(&once, &map, "images");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rewrite_leaves_other_references_alone() {
        let input = "![](photo.png) ![cover](_page_1_Picture_2.png) ![](notes.txt)";
        assert_eq!(
            rewrite_image_references(input, &HashMap::new(), "images"),
            input
        );
    }

    #[test]
    fn test_contents_multi_link_lines_split() {
        let input = "# Contents\n\n[1. The Key](#page-9-0) [2. What is Culture?](#page-0-0) [3. Improving](#page-3-1)\n";
        let result = format_contents_sections(input);
        let links: Vec<&str> = result
            .lines()
            .filter(|l| l.starts_with('['))
            .collect();
        assert_eq!(
            links,
            vec![
                "[1. The Key](#page-9-0)",
                "[2. What is Culture?](#page-0-0)",
                "[3. Improving](#page-3-1)",
            ]
        );
        assert!(result.ends_with('\n'));
    }

    #[test]
    fn test_contents_scope_ends_at_next_heading() {
        let input = "# Contents\n[a](#1) [b](#2)\n# Chapter One\nsee [x](#3) and [y](#4) inline";
        let result = format_contents_sections(input);
        assert!(result.contains("[a](#1)\n[b](#2)"));
        assert!(
            result.contains("see [x](#3) and [y](#4) inline"),
            "prose after the section must be untouched, got: {result}"
        );
    }

    #[test]
    fn test_contents_single_link_lines_pass_through() {
        let input = "## Contents\n[Only entry](#page-1-0)\nplain line";
        assert_eq!(format_contents_sections(input), input);
    }

    #[test]
    fn test_no_contents_heading_means_no_change() {
        let input = "# Index\n[a](#1) [b](#2) [c](#3)";
        assert_eq!(format_contents_sections(input), input);
    }

    #[test]
    fn test_contents_heading_match_is_exact() {
        // "Contents of the box" is a different heading, not a TOC.
        let input = "# Contents of the box\n[a](#1) [b](#2)";
        assert_eq!(format_contents_sections(input), input);
    }
}
