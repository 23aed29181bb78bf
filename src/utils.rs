//! Small helpers shared by the store, the pool and the dispatcher

use chrono::{DateTime, Local};

/// Number of leading characters kept visible by [`mask_secret`]
const VISIBLE_PREFIX: usize = 6;

/// Mask a secret for logs and `Debug` output
///
/// Keeps the first few characters and replaces the rest with `***`. Short
/// secrets are fully masked.
///
/// # Examples
///
/// ```
/// use condense_dispatch::utils::mask_secret;
///
/// assert_eq!(mask_secret("sk-1234567890"), "sk-123***");
/// assert_eq!(mask_secret("short"), "***");
/// ```
pub fn mask_secret(secret: &str) -> String {
    let total = secret.chars().count();
    if total <= VISIBLE_PREFIX + 2 {
        return "***".to_string();
    }
    let prefix: String = secret.chars().take(VISIBLE_PREFIX).collect();
    format!("{prefix}***")
}

/// Length of `text` in Unicode scalar values
///
/// All size thresholds are measured in characters, not bytes, so CJK text is
/// judged the same way as ASCII.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Whether a remote result carries usable text
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// Body persisted for an item whose remote attempts all failed
///
/// The heading contains `失败`, which the default quality policy treats as an
/// error marker, so the item is picked up again on the next run.
pub fn failure_placeholder(name: &str, reason: &str, at: DateTime<Local>) -> String {
    format!(
        "# 处理失败: {name}\n\n原因: {reason}\n时间: {}\n",
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityPolicy;
    use chrono::TimeZone;

    #[test]
    fn masks_long_and_short_secrets() {
        assert_eq!(mask_secret("AIzaSyABCDEFGHIJK"), "AIzaSy***");
        assert_eq!(mask_secret("12345678"), "***");
        assert_eq!(mask_secret(""), "***");
    }

    #[test]
    fn char_len_counts_cjk_as_single_characters() {
        assert_eq!(char_len("错误：超时"), 5);
        assert_eq!(char_len("abc"), 3);
    }

    #[test]
    fn blank_detection_ignores_whitespace() {
        assert!(is_blank("  \n\t"));
        assert!(!is_blank(" x "));
    }

    #[test]
    fn placeholder_is_rejected_by_default_policy() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let body = failure_placeholder("chapter_01.txt", "credentials exhausted", at);

        assert!(body.contains("chapter_01.txt"));
        assert!(body.contains("credentials exhausted"));
        assert!(body.contains("2024-05-01 12:30:00"));
        assert!(!QualityPolicy::default().accepts(&body));
    }
}
