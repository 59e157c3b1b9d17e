use crate::lexer::{self, LexingError, Token};
use std::fmt;

/// How an output redirection opens its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// `>`: create the file or truncate it.
    Truncate,
    /// `>>`: create the file or append to it.
    Append,
}

/// Target of a `>` or `>>` redirection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRedirect {
    pub path: String,
    pub mode: RedirectMode,
}

/// One program invocation within a [`Pipeline`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    /// Program name. Empty only for the no-op produced by an empty line.
    pub program: String,
    /// Arguments, not including the program name.
    pub arguments: Vec<String>,
    /// Source file for `<`.
    pub redirect_in: Option<String>,
    /// Target file for `>` or `>>`.
    pub redirect_out: Option<OutputRedirect>,
}

/// An ordered, non-empty chain of stages connected by pipes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    /// The line ended with `&`.
    pub background: bool,
    /// The line ended with `?` (tab was pressed).
    pub autocomplete_requested: bool,
}

impl Pipeline {
    /// True for the single empty stage produced by a blank line.
    pub fn is_noop(&self) -> bool {
        match self.stages.as_slice() {
            [stage] => {
                stage.program.is_empty()
                    && stage.arguments.is_empty()
                    && stage.redirect_in.is_none()
                    && stage.redirect_out.is_none()
            }
            _ => false,
        }
    }
}

/// Errors that abort a line before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsingError {
    /// The tokenizer rejected the line.
    Lexing(LexingError),
    /// A redirection operator was not followed by a file name.
    MissingRedirectTarget(&'static str),
    /// A `|` with no command on one side, or a stage made only of redirections.
    EmptyStage,
}

impl From<LexingError> for ParsingError {
    fn from(e: LexingError) -> Self {
        ParsingError::Lexing(e)
    }
}

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsingError::Lexing(e) => write!(f, "{}", e),
            ParsingError::MissingRedirectTarget(op) => {
                write!(f, "missing file name after `{}`", op)
            }
            ParsingError::EmptyStage => write!(f, "missing command around `|`"),
        }
    }
}

impl std::error::Error for ParsingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParsingError::Lexing(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Default)]
struct StageBuilder {
    program: Option<String>,
    arguments: Vec<String>,
    redirect_in: Option<String>,
    redirect_out: Option<OutputRedirect>,
}

impl StageBuilder {
    fn push_word(&mut self, word: String) {
        if self.program.is_none() {
            self.program = Some(word);
        } else {
            self.arguments.push(word);
        }
    }

    fn is_blank(&self) -> bool {
        self.program.is_none() && self.redirect_in.is_none() && self.redirect_out.is_none()
    }

    fn build(self) -> Result<Stage, ParsingError> {
        let program = self.program.ok_or(ParsingError::EmptyStage)?;
        Ok(Stage {
            program,
            arguments: self.arguments,
            redirect_in: self.redirect_in,
            redirect_out: self.redirect_out,
        })
    }
}

fn expect_target(
    tokens: &mut impl Iterator<Item = Token>,
    op: &'static str,
) -> Result<String, ParsingError> {
    match tokens.next() {
        Some(Token::Word(target)) => Ok(target),
        _ => Err(ParsingError::MissingRedirectTarget(op)),
    }
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Parses one input line into a [`Pipeline`].
///
/// Trailing `?` marks an autocomplete request and trailing `&` a background
/// pipeline; both are stripped before tokenizing. The stages are built in a
/// single forward scan over the tokens.
pub fn parse(line: &str) -> Result<Pipeline, ParsingError> {
    let trimmed = line.trim_matches(is_blank);

    let (body, background, autocomplete_requested) = if let Some(rest) = trimmed.strip_suffix('?')
    {
        (rest, false, true)
    } else if let Some(rest) = trimmed.strip_suffix('&') {
        (rest, true, false)
    } else {
        (trimmed, false, false)
    };

    let mut tokens = lexer::split_into_tokens(body)?.into_iter();
    let mut stages = Vec::new();
    let mut current = StageBuilder::default();

    while let Some(token) = tokens.next() {
        match token {
            Token::Word(word) => current.push_word(word),
            Token::Pipe => {
                let stage = std::mem::take(&mut current).build()?;
                stages.push(stage);
            }
            Token::Background => {
                tracing::warn!("ignoring `&` in the middle of the line");
            }
            Token::RedirectIn => {
                current.redirect_in = Some(expect_target(&mut tokens, "<")?);
            }
            Token::RedirectOut => {
                current.redirect_out = Some(OutputRedirect {
                    path: expect_target(&mut tokens, ">")?,
                    mode: RedirectMode::Truncate,
                });
            }
            Token::RedirectAppend => {
                current.redirect_out = Some(OutputRedirect {
                    path: expect_target(&mut tokens, ">>")?,
                    mode: RedirectMode::Append,
                });
            }
        }
    }

    if stages.is_empty() && current.is_blank() {
        stages.push(Stage::default());
    } else {
        stages.push(current.build()?);
    }

    Ok(Pipeline {
        stages,
        background,
        autocomplete_requested,
    })
}

fn write_word(f: &mut fmt::Formatter<'_>, word: &str) -> fmt::Result {
    let needs_quotes = word.is_empty()
        || word
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '\'' | '"' | '|' | '&' | '<' | '>' | '?'));
    if !needs_quotes {
        return write!(f, "{}", word);
    }
    if !word.contains('\'') {
        return write!(f, "'{}'", word);
    }
    if !word.contains('"') {
        return write!(f, "\"{}\"", word);
    }

    // both quote kinds: single quotes go in double-quoted runs, the rest in
    // single-quoted runs, all glued into one word
    let mut rest = word;
    while !rest.is_empty() {
        let end = if rest.starts_with('\'') {
            rest.find(|c| c != '\'')
        } else {
            rest.find('\'')
        }
        .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        if run.starts_with('\'') {
            write!(f, "\"{}\"", run)?;
        } else {
            write!(f, "'{}'", run)?;
        }
        rest = tail;
    }
    Ok(())
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_word(f, &self.program)?;
        for arg in &self.arguments {
            write!(f, " ")?;
            write_word(f, arg)?;
        }
        if let Some(path) = &self.redirect_in {
            write!(f, " < ")?;
            write_word(f, path)?;
        }
        if let Some(out) = &self.redirect_out {
            match out.mode {
                RedirectMode::Truncate => write!(f, " > ")?,
                RedirectMode::Append => write!(f, " >> ")?,
            }
            write_word(f, &out.path)?;
        }
        Ok(())
    }
}

/// Renders the pipeline back as a normalized command line.
impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", stage)?;
        }
        if self.background {
            write!(f, " &")?;
        }
        Ok(())
    }
}
