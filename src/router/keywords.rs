use regex::Regex;

/// Matches one keyword phrase on word boundaries.
///
/// Hyphens are word characters inside a token, so `utility trailer` does not
/// match inside `non-utility trailer`. Between the words of a phrase a hyphen
/// is accepted as a separator, so `dump trailer` matches `dump-trailer`.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    phrase: String,
    re: Regex,
}

impl PhraseMatcher {
    /// `None` for a phrase with no usable tokens.
    pub fn new(phrase: &str) -> Option<Self> {
        let phrase = phrase.trim().to_lowercase();
        let tokens: Vec<String> = phrase
            .split(|c: char| c.is_whitespace() || c == '-')
            .filter(|t| !t.is_empty())
            .map(regex::escape)
            .collect();
        if tokens.is_empty() {
            return None;
        }
        let pattern = format!(r"(?:^|[^\w\-]){}(?:$|[^\w\-])", tokens.join(r"[\s\-]+"));
        let re = Regex::new(&pattern).ok()?;
        Some(Self { phrase, re })
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// `text` must already be lowercase.
    pub fn is_match(&self, text: &str) -> bool {
        self.re.is_match(text)
    }
}

/// Compile a keyword list, silently skipping blank phrases.
pub fn compile(phrases: &[String]) -> Vec<PhraseMatcher> {
    phrases.iter().filter_map(|p| PhraseMatcher::new(p)).collect()
}

/// Phrases from `matchers` found in `text`, in list order.
pub fn matches(matchers: &[PhraseMatcher], text: &str) -> Vec<String> {
    matchers
        .iter()
        .filter(|m| m.is_match(text))
        .map(|m| m.phrase().to_string())
        .collect()
}
