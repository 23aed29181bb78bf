//! Table-of-contents detection

use regex::Regex;
use std::sync::LazyLock;

/// Minimum number of non-empty lines before a document can be a listing
const MIN_LINES: usize = 3;

/// Share of non-empty lines that must look like chapter headings
const HEADING_SHARE: f64 = 0.8;

static HEADING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^\s*(
            第\s*[0-9零一二三四五六七八九十百千万两]+\s*[章节回卷集部篇]
          | (chapter|ch\.?|part|volume|vol\.?)\s*[0-9ivxlc]+\b
          | [0-9]+\s*[.、:：)\]]
          | 序章 | 楔子 | 尾声 | 后记 | 番外 | 目录 | 前言
        )",
    )
    .ok()
});

/// Whether `content` consists almost entirely of chapter headings
///
/// At least 80% of at least three non-empty lines must start like a heading
/// (`第十二章`, `Chapter 3`, `12.`, `序章`, ...).
pub fn looks_like_listing(content: &str) -> bool {
    let Some(heading) = HEADING.as_ref() else {
        return false;
    };

    let lines: Vec<&str> = content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.len() < MIN_LINES {
        return false;
    }

    let headings = lines.iter().filter(|l| heading.is_match(l)).count();
    headings as f64 / lines.len() as f64 >= HEADING_SHARE
}
