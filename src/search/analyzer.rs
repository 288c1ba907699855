//! Text analysis shared by indexing and query translation

use once_cell::sync::Lazy;
use tantivy::tokenizer::{
    Language, LowerCaser, RegexTokenizer, RemoveLongFilter, SimpleTokenizer, Stemmer,
    StopWordFilter, TextAnalyzer, TokenStream,
};
use tantivy::Index;
use tracing::warn;

/// Name under which the analyzer is registered on every entity index
pub const ENTITY_TEXT_TOKENIZER: &str = "entity_text";

/// Tokens longer than this (in bytes) are dropped
const MAX_TOKEN_LENGTH: usize = 255;

/// Each Han ideograph is a token of its own; other scripts split on non-word characters
const TOKEN_PATTERN: &str = r"\p{Han}|[^\p{Han}\W]+";

static SUPPLEMENTARY_STOP_WORDS: Lazy<Vec<String>> = Lazy::new(|| {
    [
        include_str!("../../resources/stopwords/snowball_english.txt"),
        include_str!("../../resources/stopwords/chinese.txt"),
    ]
    .iter()
    .flat_map(|list| list.lines())
    .map(str::trim)
    .filter(|word| !word.is_empty())
    .map(str::to_lowercase)
    .collect()
});

static ENTITY_TEXT_ANALYZER: Lazy<TextAnalyzer> = Lazy::new(build_entity_text_analyzer);

fn stop_words(language: Language) -> StopWordFilter {
    StopWordFilter::new(language).unwrap_or_else(|| StopWordFilter::remove(Vec::<String>::new()))
}

fn build_entity_text_analyzer() -> TextAnalyzer {
    let builder = match RegexTokenizer::new(TOKEN_PATTERN) {
        Ok(tokenizer) => TextAnalyzer::builder(tokenizer).dynamic(),
        Err(e) => {
            warn!(error = %e, "Invalid token pattern, using the simple tokenizer");
            TextAnalyzer::builder(SimpleTokenizer::default()).dynamic()
        }
    };
    builder
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LENGTH))
        .filter(LowerCaser)
        .filter(stop_words(Language::English))
        .filter(stop_words(Language::French))
        .filter(stop_words(Language::German))
        .filter(stop_words(Language::Dutch))
        .filter(stop_words(Language::Italian))
        .filter(stop_words(Language::Danish))
        .filter(stop_words(Language::Finnish))
        .filter(stop_words(Language::Hungarian))
        .filter(stop_words(Language::Norwegian))
        .filter(stop_words(Language::Portuguese))
        .filter(stop_words(Language::Russian))
        .filter(stop_words(Language::Spanish))
        .filter(stop_words(Language::Swedish))
        .filter(StopWordFilter::remove(SUPPLEMENTARY_STOP_WORDS.clone()))
        .filter(Stemmer::new(Language::English))
        .build()
}

/// A fresh handle on the entity text analyzer
pub fn entity_text_analyzer() -> TextAnalyzer {
    ENTITY_TEXT_ANALYZER.clone()
}

/// Register the analyzer on `index` under [`ENTITY_TEXT_TOKENIZER`]
pub fn register_analyzer(index: &Index) {
    index
        .tokenizers()
        .register(ENTITY_TEXT_TOKENIZER, entity_text_analyzer());
}

/// Terms the analyzer produces for `text`, in order
pub fn analyze(text: &str) -> Vec<String> {
    analyze_with_positions(text)
        .into_iter()
        .map(|(_, term)| term)
        .collect()
}

/// Terms with their token positions; removed stop words leave position gaps
pub fn analyze_with_positions(text: &str) -> Vec<(usize, String)> {
    let mut analyzer = entity_text_analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut terms = Vec::new();
    while stream.advance() {
        let token = stream.token();
        terms.push((token.position, token.text.clone()));
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_stems() {
        assert_eq!(analyze("Crashing Servers"), vec!["crash", "server"]);
    }

    #[test]
    fn test_removes_multilingual_stop_words() {
        assert!(analyze("the und les").is_empty());
        assert_eq!(analyze("the database"), vec!["databas"]);
    }

    #[test]
    fn test_supplementary_lists() {
        assert!(analyze("ourselves").is_empty());
        assert!(analyze("的").is_empty());
    }

    #[test]
    fn test_han_characters_are_separate_tokens() {
        assert_eq!(analyze("这是我的问题"), vec!["问", "题"]);
        assert_eq!(analyze("登录bug 的"), vec!["登", "录", "bug"]);
    }

    #[test]
    fn test_splits_on_punctuation() {
        assert_eq!(analyze("parser.rs: panic!"), vec!["parser", "rs", "panic"]);
    }

    #[test]
    fn test_positions_keep_stop_word_gaps() {
        let terms = analyze_with_positions("fix the parser");
        assert_eq!(terms, vec![(0, "fix".to_string()), (2, "parser".to_string())]);
    }

    #[test]
    fn test_drops_overlong_tokens() {
        let long = "x".repeat(MAX_TOKEN_LENGTH + 1);
        assert!(analyze(&long).is_empty());
    }
}
