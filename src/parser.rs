use crate::ast::{Pipeline, Stage, Terminator};
use crate::error::{CommandLineError, ShellError};
use crate::redirect::extract_redirections_indexed;

/// States for the tokenizer state machine.
enum State {
    /// Between tokens — whitespace is skipped, operators are recognized.
    Normal,
    /// Building an unquoted word — whitespace or an operator ends it.
    InWord,
    /// Inside double quotes — whitespace and operators are preserved.
    InDoubleQuote,
    /// Inside single quotes — everything is literal.
    InSingleQuote,
}

enum RawToken {
    /// `raw` carries the original quoting: it begins with `"` if any
    /// part of the token was quoted, matching ast.rs's `Stage::raw_argv`
    /// convention.
    Word { value: String, raw: String },
    Op(Terminator),
}

/// Tokenizes one line into words and sequencing operators.
///
/// Handles unquoted words split by whitespace, double/single-quoted
/// strings, backslash escapes, and `|`/`|&`/`&`/`&&`/`;` as standalone
/// operator tokens — even mid-word, the way every reference shell in
/// the pack treats an unquoted `|` as ending the current argument.
fn tokenize(input: &str) -> Result<Vec<RawToken>, CommandLineError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut was_quoted = false;
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    macro_rules! flush_word {
        () => {
            if !current.is_empty() || was_quoted {
                let raw = if was_quoted {
                    format!("\"{current}")
                } else {
                    current.clone()
                };
                tokens.push(RawToken::Word { value: std::mem::take(&mut current), raw });
                was_quoted = false;
            }
        };
    }

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            (State::Normal, ' ' | '\t') => {}
            (State::Normal, '"') => {
                was_quoted = true;
                state = State::InDoubleQuote;
            }
            (State::Normal, '\'') => {
                was_quoted = true;
                state = State::InSingleQuote;
            }
            (State::Normal, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                state = State::InWord;
            }
            (State::Normal, '|') => {
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(RawToken::Op(Terminator::PipeBoth));
                } else {
                    tokens.push(RawToken::Op(Terminator::Pipe));
                }
            }
            (State::Normal, '&') => {
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(RawToken::Op(Terminator::And));
                } else {
                    tokens.push(RawToken::Op(Terminator::Background));
                }
            }
            (State::Normal, ';') => tokens.push(RawToken::Op(Terminator::Sequence)),
            (State::Normal, c) => {
                current.push(c);
                state = State::InWord;
            }

            (State::InWord, ' ' | '\t') => {
                flush_word!();
                state = State::Normal;
            }
            (State::InWord, '"') => {
                was_quoted = true;
                state = State::InDoubleQuote;
            }
            (State::InWord, '\'') => {
                was_quoted = true;
                state = State::InSingleQuote;
            }
            (State::InWord, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (State::InWord, '|') => {
                flush_word!();
                state = State::Normal;
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(RawToken::Op(Terminator::PipeBoth));
                } else {
                    tokens.push(RawToken::Op(Terminator::Pipe));
                }
            }
            (State::InWord, '&') => {
                flush_word!();
                state = State::Normal;
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(RawToken::Op(Terminator::And));
                } else {
                    tokens.push(RawToken::Op(Terminator::Background));
                }
            }
            (State::InWord, ';') => {
                flush_word!();
                state = State::Normal;
                tokens.push(RawToken::Op(Terminator::Sequence));
            }
            (State::InWord, c) => current.push(c),

            (State::InDoubleQuote, '"') => state = State::InWord,
            (State::InDoubleQuote, '\\') => match chars.peek() {
                Some(&'"' | &'\\' | &'$' | &'`') => current.push(chars.next().unwrap()),
                _ => current.push('\\'),
            },
            (State::InDoubleQuote, c) => current.push(c),

            (State::InSingleQuote, '\'') => state = State::InWord,
            (State::InSingleQuote, c) => current.push(c),
        }
    }

    if matches!(state, State::InDoubleQuote | State::InSingleQuote) {
        return Err(CommandLineError("unterminated quote".into()));
    }

    flush_word!();
    Ok(tokens)
}

struct RawStage {
    values: Vec<String>,
    raws: Vec<String>,
    term: Terminator,
}

fn split_stages(tokens: Vec<RawToken>) -> Vec<RawStage> {
    let mut stages = Vec::new();
    let mut values = Vec::new();
    let mut raws = Vec::new();
    // Tracks whether the most recently pushed RawStage was cut short by a
    // `|`/`|&` operator, so a line ending in one of those (but not in
    // `&`/`&&`/`||`/`;`) still surfaces as a dangling-empty-stage below.
    let mut last_op_starts_pipe = false;

    for token in tokens {
        match token {
            RawToken::Word { value, raw } => {
                values.push(value);
                raws.push(raw);
            }
            RawToken::Op(term) => {
                stages.push(RawStage { values: std::mem::take(&mut values), raws: std::mem::take(&mut raws), term });
                last_op_starts_pipe = term.starts_pipe();
            }
        }
    }

    // Only a real trailing stage (or a stage left empty by a dangling
    // `|`/`|&`) gets appended here; `echo hi;`, `echo hi &&`, etc. simply
    // end the line — spec.md §4.A only requires a following stage for
    // pipe-type terminators.
    if !values.is_empty() || last_op_starts_pipe {
        stages.push(RawStage { values, raws, term: Terminator::End });
    }

    stages
}

/// Parses one line of input into an ordered list of [`Pipeline`]s.
///
/// A blank (or all-whitespace) line parses to an empty list. Any other
/// syntax error — an unterminated quote, a malformed redirection, or a
/// `|`/`|&` followed by an empty stage — is returned as
/// `ShellError::Parse`.
pub fn parse(input: &str) -> Result<Vec<Pipeline>, ShellError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let raw_stages = split_stages(tokens);

    let mut stages = Vec::with_capacity(raw_stages.len());
    for raw in raw_stages {
        if raw.values.is_empty() {
            return Err(ShellError::Parse("The syntax of the command is incorrect.".into()));
        }

        let (kept, redirects) = extract_redirections_indexed(&raw.values)
            .map_err(ShellError::Parse)?;
        let argv: Vec<String> = kept.iter().map(|&i| raw.values[i].clone()).collect();
        let raw_argv: Vec<String> = kept.iter().map(|&i| raw.raws[i].clone()).collect();

        if argv.is_empty() {
            return Err(ShellError::Parse("The syntax of the command is incorrect.".into()));
        }

        stages.push(Stage { argv, raw_argv, redirects, term: raw.term });
    }

    let mut pipelines = Vec::new();
    let mut current = Vec::new();
    for stage in stages {
        let starts_pipe = stage.term.starts_pipe();
        current.push(stage);
        if !starts_pipe {
            pipelines.push(Pipeline { stages: std::mem::take(&mut current) });
        }
    }
    if !current.is_empty() {
        pipelines.push(Pipeline { stages: current });
    }

    Ok(pipelines)
}
