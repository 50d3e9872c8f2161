//! Command-line parser: one input line in, a list of fully built jobs out.
//!
//! Grammar, loosely:
//!
//! ```text
//! line     := job ( ('&' | ';') job )* ('&' | ';')?
//! job      := stage ( '|' stage )*
//! stage    := ( word | redirect )+
//! redirect := ('<' | '>' | '2>') word
//! ```
//!
//! Redirects belong to the whole job: `<` feeds the first stage, `>` takes
//! the last stage's output and `2>` takes every stage's errors. `#` at the
//! start of a word comments out the rest of the line. Single quotes are
//! literal; inside double quotes a backslash escapes `"` and `\`.

use std::iter::Peekable;
use std::path::PathBuf;
use std::str::CharIndices;

use dsh_kernel::{Job, JobError, Process};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error: empty command in pipeline")]
    EmptyStage,

    #[error("syntax error: `{0}` needs a file name")]
    MissingRedirectTarget(&'static str),

    #[error("syntax error: `{0}` given twice")]
    DuplicateRedirect(&'static str),

    #[error("syntax error near unexpected token `{0}`")]
    UnexpectedToken(&'static str),

    #[error("syntax error: unterminated {0} quote")]
    UnterminatedQuote(char),

    #[error(transparent)]
    Job(#[from] JobError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Pipe,
    Input,
    Output,
    ErrOutput,
    Background,
    Separator,
}

impl Token {
    fn symbol(&self) -> &'static str {
        match self {
            Token::Word(_) => "word",
            Token::Pipe => "|",
            Token::Input => "<",
            Token::Output => ">",
            Token::ErrOutput => "2>",
            Token::Background => "&",
            Token::Separator => ";",
        }
    }
}

/// A token and its byte range in the line.
#[derive(Debug)]
struct Spanned {
    token: Token,
    start: usize,
    end: usize,
}

/// Parse one line into jobs, in the order they should run.
///
/// Blank lines and comment-only lines produce no jobs. A rejected line
/// produces no jobs at all, even if an earlier part of it was well formed.
pub fn parse_line(line: &str) -> Result<Vec<Job>, ParseError> {
    let mut jobs = Vec::new();
    let mut current = JobBuilder::default();

    for Spanned { token, start, end } in tokenize(line)? {
        if !matches!(token, Token::Background | Token::Separator) {
            current.touch(start, end);
        }
        match token {
            Token::Word(word) => current.word(word)?,
            Token::Pipe => current.pipe()?,
            Token::Input | Token::Output | Token::ErrOutput => current.redirect(token)?,
            Token::Background | Token::Separator => {
                let background = token == Token::Background;
                if current.is_empty() {
                    return Err(ParseError::UnexpectedToken(token.symbol()));
                }
                jobs.push(std::mem::take(&mut current).finish(line, background)?);
            }
        }
    }
    if !current.is_empty() {
        jobs.push(current.finish(line, false)?);
    }
    Ok(jobs)
}

#[derive(Debug, Default)]
struct JobBuilder {
    stages: Vec<Vec<String>>,
    stage: Vec<String>,
    pending: Option<Token>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    /// Byte range of the job's text in the line.
    span: Option<(usize, usize)>,
}

impl JobBuilder {
    fn is_empty(&self) -> bool {
        self.span.is_none()
    }

    fn touch(&mut self, start: usize, end: usize) {
        let from = self.span.map_or(start, |(from, _)| from);
        self.span = Some((from, end));
    }

    fn word(&mut self, word: String) -> Result<(), ParseError> {
        let Some(redirect) = self.pending.take() else {
            self.stage.push(word);
            return Ok(());
        };
        let slot = match redirect {
            Token::Input => &mut self.stdin,
            Token::Output => &mut self.stdout,
            _ => &mut self.stderr,
        };
        if slot.is_some() {
            return Err(ParseError::DuplicateRedirect(redirect.symbol()));
        }
        *slot = Some(PathBuf::from(word));
        Ok(())
    }

    fn redirect(&mut self, token: Token) -> Result<(), ParseError> {
        self.check_no_pending()?;
        self.pending = Some(token);
        Ok(())
    }

    fn pipe(&mut self) -> Result<(), ParseError> {
        self.check_no_pending()?;
        if self.stage.is_empty() {
            return Err(ParseError::EmptyStage);
        }
        self.stages.push(std::mem::take(&mut self.stage));
        Ok(())
    }

    fn check_no_pending(&self) -> Result<(), ParseError> {
        match &self.pending {
            Some(redirect) => Err(ParseError::MissingRedirectTarget(redirect.symbol())),
            None => Ok(()),
        }
    }

    fn finish(mut self, line: &str, background: bool) -> Result<Job, ParseError> {
        self.check_no_pending()?;
        if self.stage.is_empty() {
            return Err(ParseError::EmptyStage);
        }
        self.stages.push(self.stage);

        let command = self
            .span
            .map(|(start, end)| line[start..end].to_string())
            .unwrap_or_default();
        let processes = self.stages.into_iter().map(Process::new).collect();
        let mut job = Job::new(command, processes)?.in_background(background);
        job.stdin = self.stdin;
        job.stdout = self.stdout;
        job.stderr = self.stderr;
        Ok(job)
    }
}

fn tokenize(line: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        let operator = match c {
            _ if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '#' => break,
            '|' => Some((Token::Pipe, 1)),
            '<' => Some((Token::Input, 1)),
            '>' => Some((Token::Output, 1)),
            '&' => Some((Token::Background, 1)),
            ';' => Some((Token::Separator, 1)),
            '2' if line[start..].starts_with("2>") => Some((Token::ErrOutput, 2)),
            _ => None,
        };

        match operator {
            Some((token, len)) => {
                for _ in 0..len {
                    chars.next();
                }
                tokens.push(Spanned {
                    token,
                    start,
                    end: start + len,
                });
            }
            None => {
                let word = read_word(&mut chars)?;
                let end = chars.peek().map_or(line.len(), |&(i, _)| i);
                tokens.push(Spanned {
                    token: Token::Word(word),
                    start,
                    end,
                });
            }
        }
    }
    Ok(tokens)
}

fn is_operator(c: char) -> bool {
    matches!(c, '|' | '<' | '>' | '&' | ';')
}

fn read_word(chars: &mut Peekable<CharIndices<'_>>) -> Result<String, ParseError> {
    let mut word = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_whitespace() || is_operator(c) {
            break;
        }
        chars.next();
        match c {
            '\'' => loop {
                match chars.next() {
                    Some((_, '\'')) => break,
                    Some((_, c)) => word.push(c),
                    None => return Err(ParseError::UnterminatedQuote('\'')),
                }
            },
            '"' => loop {
                match chars.next() {
                    Some((_, '"')) => break,
                    Some((_, '\\')) => match chars.next() {
                        Some((_, c @ ('"' | '\\'))) => word.push(c),
                        Some((_, c)) => {
                            word.push('\\');
                            word.push(c);
                        }
                        None => return Err(ParseError::UnterminatedQuote('"')),
                    },
                    Some((_, c)) => word.push(c),
                    None => return Err(ParseError::UnterminatedQuote('"')),
                }
            },
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    word.push(escaped);
                }
            }
            c => word.push(c),
        }
    }
    Ok(word)
}
