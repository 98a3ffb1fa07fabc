use once_cell::sync::Lazy;
use regex::Regex;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalizes a paper title for equality matching
///
/// Normalization rules:
/// 1. Lowercase
/// 2. Remove every character that is neither a word character nor whitespace
/// 3. Collapse whitespace runs into one space and trim
///
/// # Examples
///
/// ```
/// use sharebib_crawl::dedup::normalize_title;
///
/// assert_eq!(
///     normalize_title("  BERT: Pre-training of Deep\tTransformers "),
///     "bert pretraining of deep transformers"
/// );
/// ```
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}
