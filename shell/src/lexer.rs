//! Lexical analysis (tokenization) of a single command line.
//!
//! Words are separated by runs of spaces and tabs. Quote runs (`'...'` or
//! `"..."`) are glued into the surrounding word with the quotes removed, so
//! `"arg two"` is one word. Operators are only recognized when unquoted and
//! at the start of a word; everywhere else the characters are literal.

use std::fmt;

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A word with quotes already stripped.
    Word(String),
    /// The pipe operator, a standalone `|`.
    Pipe,
    /// A standalone `&`.
    Background,
    /// Input redirection, `<`.
    RedirectIn,
    /// Output redirection, `>`.
    RedirectOut,
    /// Appending output redirection, `>>`.
    RedirectAppend,
}

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexingError {
    /// A closing quote was not found. Carries the opening quote character.
    UnfinishedQuote(char),
}

impl fmt::Display for LexingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexingError::UnfinishedQuote(q) => write!(f, "unterminated quote `{}`", q),
        }
    }
}

impl std::error::Error for LexingError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    // set once a word has begun, so that `""` still yields an (empty) word
    in_word: bool,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
            in_word: false,
        }
    }

    /// Runs the state machine over the whole input.
    fn make_tokens(&mut self) -> Result<Vec<Token>, LexingError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch, &mut out),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingSingleQuote => self.handle_quote(ch, '\''),
                LexingState::ReadingDoubleQuote => self.handle_quote(ch, '"'),
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote => return Err(LexingError::UnfinishedQuote('\'')),
            LexingState::ReadingDoubleQuote => return Err(LexingError::UnfinishedQuote('"')),
            _ => {}
        }

        self.finish_word(&mut out);
        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    /// True when the next character ends the current token.
    fn at_boundary(&self) -> bool {
        matches!(self.peek_char(), None | Some(' ') | Some('\t'))
    }

    fn handle_start(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            ' ' | '\t' => {}
            '|' if self.at_boundary() => out.push(Token::Pipe),
            '&' if self.at_boundary() => out.push(Token::Background),
            '<' => out.push(Token::RedirectIn),
            '>' => {
                if self.peek_char() == Some('>') {
                    self.read_char();
                    out.push(Token::RedirectAppend);
                } else {
                    out.push(Token::RedirectOut);
                }
            }
            '\'' => {
                self.in_word = true;
                self.state = LexingState::ReadingSingleQuote;
            }
            '"' => {
                self.in_word = true;
                self.state = LexingState::ReadingDoubleQuote;
            }
            c => {
                self.in_word = true;
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            ' ' | '\t' => {
                self.finish_word(out);
                self.state = LexingState::Start;
            }
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            c => self.buffer.push(c),
        }
    }

    fn handle_quote(&mut self, ch: char, quote: char) {
        if ch == quote {
            self.state = LexingState::ReadingWord;
        } else {
            self.buffer.push(ch);
        }
    }

    fn finish_word(&mut self, out: &mut Vec<Token>) {
        if self.in_word {
            out.push(Token::Word(std::mem::take(&mut self.buffer)));
            self.in_word = false;
        }
    }
}

/// Splits a command line into tokens.
///
/// Returns `LexingError::UnfinishedQuote` when a quote is left open.
pub fn split_into_tokens(line: &str) -> Result<Vec<Token>, LexingError> {
    let mut lexer = LexingFSM::new(line);
    lexer.make_tokens()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn test_splits_on_runs_of_whitespace() {
        let tokens = split_into_tokens("ls  -l \t /tmp").unwrap();
        assert_eq!(tokens, vec![word("ls"), word("-l"), word("/tmp")]);
    }

    #[test]
    fn test_quotes_keep_inner_whitespace() {
        let tokens = split_into_tokens("cmd arg1 \"arg two\" 'x  y'").unwrap();
        assert_eq!(
            tokens,
            vec![word("cmd"), word("arg1"), word("arg two"), word("x  y")]
        );
    }

    #[test]
    fn test_empty_quotes_yield_empty_word() {
        let tokens = split_into_tokens("echo \"\" end").unwrap();
        assert_eq!(tokens, vec![word("echo"), word(""), word("end")]);
    }

    #[test]
    fn test_quote_glued_to_word() {
        let tokens = split_into_tokens("--name=\"a b\"c").unwrap();
        assert_eq!(tokens, vec![word("--name=a bc")]);
    }

    #[test]
    fn test_unterminated_quote_is_error() {
        assert_eq!(
            split_into_tokens("echo \"oops"),
            Err(LexingError::UnfinishedQuote('"'))
        );
        assert_eq!(
            split_into_tokens("echo 'oops"),
            Err(LexingError::UnfinishedQuote('\''))
        );
    }

    #[test]
    fn test_operators() {
        let tokens = split_into_tokens("cat <in | sort > out >>log &").unwrap();
        assert_eq!(
            tokens,
            vec![
                word("cat"),
                Token::RedirectIn,
                word("in"),
                Token::Pipe,
                word("sort"),
                Token::RedirectOut,
                word("out"),
                Token::RedirectAppend,
                word("log"),
                Token::Background,
            ]
        );
    }

    #[test]
    fn test_operator_chars_inside_words_are_literal() {
        let tokens = split_into_tokens("echo a|b c>d '|' x&y |z").unwrap();
        assert_eq!(
            tokens,
            vec![
                word("echo"),
                word("a|b"),
                word("c>d"),
                word("|"),
                word("x&y"),
                word("|z"),
            ]
        );
    }

    #[test]
    fn test_quoted_redirect_target() {
        let tokens = split_into_tokens(">\"my file\"").unwrap();
        assert_eq!(tokens, vec![Token::RedirectOut, word("my file")]);
    }
}
