use regex::Regex;

/// A single keyword term, matched against lowercased text
///
/// Two kinds of terms are supported:
/// 1. Plain: "neural" matches any text containing "neural"
/// 2. Wildcard: "trans*er" matches any text containing "trans", then any
///    run of characters, then "er" ("transformer", "transfer")
///
/// Every other character is literal, including regex metacharacters.
#[derive(Debug, Clone)]
pub enum TermMatcher {
    Substring(String),
    Wildcard(Regex),
}

impl TermMatcher {
    /// Compiles a term; the term is lowercased first
    ///
    /// # Examples
    ///
    /// ```
    /// use sharebib_crawl::filter::TermMatcher;
    ///
    /// let term = TermMatcher::new("GPT-*").unwrap();
    /// assert!(term.matches("scaling gpt-4 to new tasks"));
    /// assert!(!term.matches("scaling gpt to new tasks"));
    /// ```
    pub fn new(term: &str) -> Result<Self, regex::Error> {
        let term = term.to_lowercase();
        if term.contains('*') {
            let pattern = regex::escape(&term).replace(r"\*", ".*");
            Ok(Self::Wildcard(Regex::new(&pattern)?))
        } else {
            Ok(Self::Substring(term))
        }
    }

    /// Checks the term against already lowercased text
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Substring(term) => text.contains(term.as_str()),
            Self::Wildcard(re) => re.is_match(text),
        }
    }
}
