//! Speech Text Sanitizer
//!
//! Model output is written for screens; the avatar reads it aloud. Before any
//! delta reaches the speech path it is run through [`sanitize`], which removes
//! everything a text-to-speech voice would stumble over:
//!
//! 1. Pictographs, dingbats and variation selectors
//! 2. Lightweight markup (`**bold**`, `_em_`, `~~strike~~`, `` `code` ``);
//!    fenced code blocks are dropped together with their content
//! 3. Any character outside the speakable whitelist (CJK ideographs, ASCII
//!    letters and digits, whitespace, sentence punctuation, brackets and
//!    arithmetic signs)
//! 4. Redundant whitespace
//!
//! The function is total and idempotent.

use std::sync::OnceLock;

use regex::Regex;

/// Code point ranges stripped before markup handling
const PICTOGRAPHIC_RANGES: &[(u32, u32)] = &[
    (0x1F600, 0x1F64F), // emoticons
    (0x1F300, 0x1F5FF), // symbols and pictographs
    (0x1F680, 0x1F6FF), // transport and map
    (0x1F700, 0x1F77F), // alchemical
    (0x1F780, 0x1F7FF), // geometric shapes extended
    (0x1F800, 0x1F8FF), // supplemental arrows
    (0x1F900, 0x1F9FF), // supplemental symbols and pictographs
    (0x1FA00, 0x1FA6F), // chess
    (0x1FA70, 0x1FAFF), // symbols and pictographs extended-a
    (0x2600, 0x26FF),   // misc symbols
    (0x2700, 0x27BF),   // dingbats
    (0xFE00, 0xFE0F),   // variation selectors
    (0x1F018, 0x1F0F5), // playing cards
    (0x1F200, 0x1F2FF), // enclosed ideographic supplement
];

/// Punctuation that survives the whitelist pass
const SPEAKABLE_PUNCTUATION: &str = "，。！？、；：\"'“”‘’（）《》-+=/()[]{}<>";

/// Markup patterns in application order. Fenced blocks go first so their
/// backticks are not consumed by the inline-code rule.
const MARKUP_RULES: &[(&str, &str)] = &[
    (r"(?s)```.*?```", ""),
    (r"\*\*(.+?)\*\*", "$1"),
    (r"\*(.+?)\*", "$1"),
    (r"__(.+?)__", "$1"),
    (r"_(.+?)_", "$1"),
    (r"~~(.+?)~~", "$1"),
    (r"`(.+?)`", "$1"),
];

fn markup_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        MARKUP_RULES
            .iter()
            .map(|(pattern, replacement)| {
                // Patterns are compile-time constants covered by the tests below
                let regex = Regex::new(pattern).expect("markup pattern is valid");
                (regex, *replacement)
            })
            .collect()
    })
}

fn is_pictographic(c: char) -> bool {
    let cp = u32::from(c);
    PICTOGRAPHIC_RANGES
        .iter()
        .any(|&(lo, hi)| (lo..=hi).contains(&cp))
}

fn is_speakable(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fa5}')
        || c.is_ascii_alphanumeric()
        || c.is_whitespace()
        || SPEAKABLE_PUNCTUATION.contains(c)
}

/// Clean a fragment of model output so it can be spoken
#[must_use]
pub fn sanitize(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut text: String = raw.chars().filter(|c| !is_pictographic(*c)).collect();

    for (pattern, replacement) in markup_rules() {
        if pattern.is_match(&text) {
            text = pattern.replace_all(&text, *replacement).into_owned();
        }
    }

    let speakable: String = text.chars().filter(|c| is_speakable(*c)).collect();
    speakable.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_markup_rules_compile() {
        assert_eq!(markup_rules().len(), MARKUP_RULES.len());
    }

    #[test]
    fn test_strips_bold_and_emoji() {
        assert_eq!(sanitize("这是**重点**😀内容"), "这是重点内容");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("   \n\t "), "");
    }

    #[test]
    fn test_inline_markup_keeps_inner_text() {
        assert_eq!(sanitize("*斜体* __粗体__ _强调_ ~~删除~~ `code`"), "斜体 粗体 强调 删除 code");
    }

    #[test]
    fn test_fenced_block_removed_with_content() {
        let raw = "先看代码```rust\nfn main() {}\n```然后讲解";
        assert_eq!(sanitize(raw), "先看代码然后讲解");
    }

    #[test]
    fn test_whitelist_keeps_math_and_chinese_punctuation() {
        assert_eq!(sanitize("（a+b）=c，对吗？"), "（a+b）=c，对吗？");
        assert_eq!(sanitize("x<y 且 [1/2]"), "x<y 且 [1/2]");
    }

    #[test]
    fn test_whitelist_drops_other_symbols() {
        // ASCII sentence punctuation is outside the whitelist
        assert_eq!(sanitize("1+1=?"), "1+1=");
        assert_eq!(sanitize("# 标题 & 说明 @ 100%"), "标题 说明 100");
    }

    #[test]
    fn test_symbols_and_variation_selectors() {
        assert_eq!(sanitize("好的☀\u{FE0F}开始✅"), "好的开始");
        assert_eq!(sanitize("🚀起飞🃏"), "起飞");
    }

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(sanitize("  第一步 \n\n  第二步\t第三步  "), "第一步 第二步 第三步");
    }

    proptest! {
        #[test]
        fn test_sanitize_is_idempotent(raw in "\\PC*") {
            let once = sanitize(&raw);
            prop_assert_eq!(sanitize(&once), once);
        }

        #[test]
        fn test_sanitize_is_idempotent_on_markup(raw in "[a-z一二三*_~`# 😀\n]{0,40}") {
            let once = sanitize(&raw);
            prop_assert_eq!(sanitize(&once), once);
        }
    }
}
