use std::borrow::Cow;

use thiserror::Error;

const SAFE_PUNCTUATION: &str = "_@%+=:,./-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellSplitError {
    #[error("unterminated single quote")]
    UnterminatedSingleQuote,
    #[error("unterminated double quote")]
    UnterminatedDoubleQuote,
    #[error("trailing backslash")]
    TrailingBackslash,
}

/// Quotes one word so a POSIX shell reads it back unchanged.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let is_bare = !word.is_empty()
        && word
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || SAFE_PUNCTUATION.contains(ch));
    if is_bare {
        return Cow::Borrowed(word);
    }

    Cow::Owned(format!("'{}'", word.replace('\'', "'\"'\"'")))
}

pub fn shell_join<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter()
        .map(|word| shell_quote(word.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits `raw` into words using POSIX shell quoting rules.
///
/// Understands single quotes, double quotes (where `\` escapes `\`, `"`,
/// `$`, backtick and newline) and backslash escapes outside quotes.
/// Comments and expansions are not interpreted.
pub fn shell_split(raw: &str) -> Result<Vec<String>, ShellSplitError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(quoted) => word.push(quoted),
                        None => return Err(ShellSplitError::UnterminatedSingleQuote),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('\\' | '"' | '$' | '`')) => word.push(escaped),
                            Some('\n') => {}
                            Some(other) => {
                                word.push('\\');
                                word.push(other);
                            }
                            None => return Err(ShellSplitError::UnterminatedDoubleQuote),
                        },
                        Some(quoted) => word.push(quoted),
                        None => return Err(ShellSplitError::UnterminatedDoubleQuote),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(escaped) => {
                    in_word = true;
                    word.push(escaped);
                }
                None => return Err(ShellSplitError::TrailingBackslash),
            },
            other => {
                in_word = true;
                word.push(other);
            }
        }
    }

    if in_word {
        words.push(word);
    }
    Ok(words)
}
