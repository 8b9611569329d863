//! AT command-line tokenizer.
//!
//! Grammar, after the mandatory `AT` prefix:
//!
//! ```text
//! AT                      → empty (always OK)
//! AT<name>                → query form (bare)
//! AT<name>?               → query form
//! AT<name>=a,b,"c,d",e    → set form, comma-separated arguments,
//!                           one level of double-quote stripping
//! ```
//!
//! A quoted token is taken verbatim between the quotes and may contain
//! commas; characters between a closing quote and the next comma are
//! discarded.

/// Maximum number of `=`-form arguments.
pub const MAX_ARGS: usize = 10;

pub type Args<'a> = heapless::Vec<&'a str, MAX_ARGS>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// Bare `AT` with nothing following.
    Empty,
    /// `AT<name>` or `AT<name>?`.
    Query { name: &'a str },
    /// `AT<name>=<args>`.
    Set { name: &'a str, args: Args<'a> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Line does not begin with `AT`.
    BadPrefix,
    /// More than [`MAX_ARGS`] arguments.
    TooManyArgs,
}

pub fn parse(line: &str) -> Result<Request<'_>, ParseError> {
    let body = line.strip_prefix("AT").ok_or(ParseError::BadPrefix)?;
    if body.is_empty() {
        return Ok(Request::Empty);
    }

    for (i, c) in body.char_indices() {
        match c {
            '=' => {
                let name = &body[..i];
                let args = tokenize(&body[i + 1..])?;
                return Ok(Request::Set { name, args });
            }
            '?' => {
                return Ok(Request::Query { name: &body[..i] });
            }
            _ => {}
        }
    }
    Ok(Request::Query { name: body })
}

fn tokenize(mut rest: &str) -> Result<Args<'_>, ParseError> {
    let mut args = Args::new();
    while !rest.is_empty() {
        let token;
        if let Some(inner) = rest.strip_prefix('"') {
            // Quoted token: verbatim up to the closing quote (or to the
            // end of the line if unterminated).
            match inner.find('"') {
                Some(end) => {
                    token = &inner[..end];
                    rest = &inner[end + 1..];
                }
                None => {
                    token = inner;
                    rest = "";
                }
            }
            // Skip to the next separator.
            match rest.find(',') {
                Some(comma) => rest = &rest[comma + 1..],
                None => rest = "",
            }
        } else {
            match rest.find(',') {
                Some(comma) => {
                    token = &rest[..comma];
                    rest = &rest[comma + 1..];
                }
                None => {
                    token = rest;
                    rest = "";
                }
            }
        }
        args.push(token).map_err(|_| ParseError::TooManyArgs)?;
    }
    Ok(args)
}
