//! Phrase-table model.
//!
//! A package may ship `lexicon.tsv`: one `source<TAB>target` entry per line,
//! `#` starts a comment. Translation replaces the longest known phrase at
//! each position, matching case-insensitively, and keeps unknown words and
//! all punctuation and spacing as they were.

use super::Model;
use crate::error::TranslateError;
use async_trait::async_trait;
use std::collections::HashMap;

pub const LEXICON_FILE: &str = "lexicon.tsv";

#[derive(Debug)]
pub struct LexiconModel {
    entries: HashMap<String, String>,
    longest_phrase: usize,
}

impl LexiconModel {
    pub fn parse(contents: &str) -> Result<Self, TranslateError> {
        let mut entries = HashMap::new();
        let mut longest_phrase = 0;

        for (number, line) in contents.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let (source, target) = line.split_once('\t').ok_or_else(|| {
                TranslateError::ModelLoadFailed(format!(
                    "{} line {}: expected source<TAB>target",
                    LEXICON_FILE,
                    number + 1
                ))
            })?;

            let key = normalize(source);
            if key.is_empty() {
                continue;
            }
            longest_phrase = longest_phrase.max(key.split(' ').count());
            entries.insert(key, target.trim().to_string());
        }

        if entries.is_empty() {
            return Err(TranslateError::ModelLoadFailed(format!(
                "{} has no entries",
                LEXICON_FILE
            )));
        }

        Ok(Self {
            entries,
            longest_phrase,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn apply(&self, text: &str) -> String {
        let tokens = tokenize(text);
        let mut out = String::with_capacity(text.len());
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            if !token.is_word {
                out.push_str(token.text);
                i += 1;
                continue;
            }

            match self.longest_match(&tokens, i) {
                Some((translation, consumed)) => {
                    out.push_str(&match_case(token.text, translation));
                    i += consumed;
                }
                None => {
                    out.push_str(token.text);
                    i += 1;
                }
            }
        }

        out
    }

    /// Longest phrase starting at word token `start`, as (translation,
    /// tokens consumed). Words in a phrase may only be separated by spaces.
    fn longest_match(&self, tokens: &[Token<'_>], start: usize) -> Option<(&str, usize)> {
        let mut words: Vec<&str> = Vec::new();
        let mut best = None;
        let mut i = start;

        while i < tokens.len() && words.len() < self.longest_phrase {
            if !tokens[i].is_word {
                break;
            }
            words.push(tokens[i].text);

            let key = words.join(" ").to_lowercase();
            if let Some(translation) = self.entries.get(&key) {
                best = Some((translation.as_str(), i - start + 1));
            }

            match tokens.get(i + 1) {
                Some(sep) if !sep.is_word && sep.text.chars().all(char::is_whitespace) => i += 2,
                _ => break,
            }
        }

        best
    }
}

#[async_trait]
impl Model for LexiconModel {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        Ok(self.apply(text))
    }
}

struct Token<'a> {
    text: &'a str,
    is_word: bool,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '\''
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut current: Option<bool> = None;

    for (idx, c) in text.char_indices() {
        let word = is_word_char(c);
        match current {
            Some(kind) if kind == word => {}
            Some(kind) => {
                tokens.push(Token {
                    text: &text[start..idx],
                    is_word: kind,
                });
                start = idx;
                current = Some(word);
            }
            None => current = Some(word),
        }
    }

    if let Some(kind) = current {
        tokens.push(Token {
            text: &text[start..],
            is_word: kind,
        });
    }

    tokens
}

fn normalize(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Capitalize the translation when the source word starts uppercase.
fn match_case(source: &str, translation: &str) -> String {
    let source_upper = source.chars().next().map(char::is_uppercase).unwrap_or(false);
    if !source_upper {
        return translation.to_string();
    }

    let mut chars = translation.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
