//! Word counting for mixed CJK and Latin prose.
//!
//! Each CJK ideograph counts as one word, each run of ASCII letters as one
//! word and each digit as one word. Punctuation and whitespace are ignored.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CJK: Regex =
        Regex::new(r"[\x{3400}-\x{4DBF}\x{4E00}-\x{9FFF}\x{F900}-\x{FAFF}]").expect("valid regex");
    static ref LATIN_WORD: Regex = Regex::new(r"[a-zA-Z]+").expect("valid regex");
    static ref DIGIT: Regex = Regex::new(r"[0-9\x{FF10}-\x{FF19}]").expect("valid regex");
}

/// Breakdown of a word count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WordCount {
    pub total: usize,
    pub cjk: usize,
    pub latin_words: usize,
    pub digits: usize,
    /// Raw character count, punctuation included.
    pub characters: usize,
}

/// Count words in story text.
pub fn count_words(text: &str) -> usize {
    count_words_detail(text).total
}

pub fn count_words_detail(text: &str) -> WordCount {
    let cjk = CJK.find_iter(text).count();
    let latin_words = LATIN_WORD.find_iter(text).count();
    let digits = DIGIT.find_iter(text).count();
    WordCount {
        total: cjk + latin_words + digits,
        cjk,
        latin_words,
        digits,
        characters: text.chars().count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_mixed_text() {
        // 4 ideographs, 2 latin words, 3 digits
        let detail = count_words_detail("沈焱笙说 hello world 123！");
        assert_eq!(detail.cjk, 4);
        assert_eq!(detail.latin_words, 2);
        assert_eq!(detail.digits, 3);
        assert_eq!(detail.total, 9);
    }

    #[test]
    fn test_fullwidth_digits_and_punctuation() {
        assert_eq!(count_words("１２，。！"), 2);
        assert_eq!(count_words(""), 0);
    }
}
