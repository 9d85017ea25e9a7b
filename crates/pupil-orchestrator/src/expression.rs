//! Expression labels derived from the student's reply.
//!
//! The label drives the avatar shown next to the dialogue. It is a cheap,
//! explainable keyword signal rather than sentiment analysis: rules are
//! checked in a fixed order and the first match wins.
//!
//! 1. question mark or "what do you mean" phrase → [`Expression::Thinking`]
//! 2. "I understand" / "I see" phrase → [`Expression::Happy`]
//! 3. "difficult" / "I don't know" phrase → [`Expression::Sad`]
//! 4. anything else → [`Expression::Normal`]

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::ExpressionConfig;
use crate::error::{PupilError, Result};

/// Coarse emotional/comprehension label for a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    /// The student is puzzling something out or asking.
    Thinking,
    /// The student understood.
    Happy,
    /// The student is struggling.
    Sad,
    /// No signal.
    #[default]
    Normal,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Thinking => "thinking",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Normal => "normal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
struct Rule {
    expression: Expression,
    pattern: Regex,
}

/// Ordered keyword rules mapping reply text to an [`Expression`].
#[derive(Debug, Clone)]
pub struct ExpressionClassifier {
    rules: Vec<Rule>,
}

impl ExpressionClassifier {
    /// Compiles the keyword lists into matchers.
    ///
    /// Keywords are literal text matched case-insensitively anywhere in the
    /// reply. An empty list disables its rule.
    ///
    /// # Errors
    ///
    /// Returns `PupilError::ConfigValidationError` if a list is too large to
    /// compile.
    pub fn from_config(config: &ExpressionConfig) -> Result<Self> {
        let lists = [
            (Expression::Thinking, &config.thinking),
            (Expression::Happy, &config.happy),
            (Expression::Sad, &config.sad),
        ];

        let mut rules = Vec::with_capacity(lists.len());
        for (expression, keywords) in lists {
            if let Some(pattern) = compile_keywords(expression, keywords)? {
                rules.push(Rule {
                    expression,
                    pattern,
                });
            }
        }

        Ok(Self { rules })
    }

    /// Returns the label of the first rule matching `text`.
    #[must_use]
    pub fn classify(&self, text: &str) -> Expression {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(text))
            .map_or(Expression::Normal, |rule| rule.expression)
    }
}

impl Default for ExpressionClassifier {
    fn default() -> Self {
        // Escaped literals always compile at the default list sizes.
        Self::from_config(&ExpressionConfig::default()).unwrap_or(Self { rules: Vec::new() })
    }
}

fn compile_keywords(expression: Expression, keywords: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = keywords
        .iter()
        .filter(|k| !k.is_empty())
        .map(|k| bounded_literal(k))
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }

    RegexBuilder::new(&alternatives.join("|"))
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| {
            PupilError::config_validation(
                format!("expressions.{expression} keywords cannot be compiled: {e}"),
                format!("Shorten the expressions.{expression} list in your pupil.json"),
            )
        })
}

/// Escapes `keyword` and anchors each ASCII word edge with `\b`.
///
/// English phrases must not match inside longer words ("i see" in "I seem").
/// Japanese text and punctuation have no word spacing and stay unbounded.
fn bounded_literal(keyword: &str) -> String {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut pattern = String::with_capacity(keyword.len() + 8);
    if keyword.chars().next().is_some_and(is_word) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(keyword));
    if keyword.chars().last().is_some_and(is_word) {
        pattern.push_str(r"\b");
    }
    pattern
}
