#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the delay-table console.
//!
//! The lexer uses `regal` to produce a bounded token stream and the parser
//! composes `winnow` combinators over those tokens, so a whole command line is
//! handled without allocation.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use super::catalog::{self, CommandTag};
use crate::clock::Micros;
use crate::schedule::{CHANNEL_COUNT, OutputPattern, index_for_label};

/// Maximum number of tokens produced per console line.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds recognized by the console grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Fractional literal such as `37.5`.
    #[regex(r"[0-9]+\.[0-9]+", priority = 3)]
    Decimal,
    /// Binary channel pattern such as `0b10110`.
    #[regex(r"0[bB][01]+", priority = 3)]
    Bits,
    /// Unsuffixed integer literal.
    #[regex(r"[0-9]+")]
    Integer,
    /// Keyword or entry label (case-insensitive match performed later).
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Bounded token buffer.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

/// Lexer errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    /// Underlying lexer reported an unrecoverable error.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

/// Grammar errors emitted by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    UnknownCommand {
        name: &'a str,
    },
    InvalidNumber {
        span: Range<usize>,
    },
    InvalidPattern {
        lexeme: &'a str,
    },
    InvalidLabel {
        lexeme: &'a str,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl<'a> fmt::Display for GrammarErrorKind<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarErrorKind::UnknownCommand { name } => {
                write!(f, "unknown command `{name}` (try `help`)")
            }
            GrammarErrorKind::InvalidNumber { span } => {
                write!(f, "invalid number at {span:?}")
            }
            GrammarErrorKind::InvalidPattern { lexeme } => write!(
                f,
                "invalid pattern `{lexeme}`: use 0-31 or up to {CHANNEL_COUNT} binary digits"
            ),
            GrammarErrorKind::InvalidLabel { lexeme } => {
                write!(f, "invalid entry label `{lexeme}`")
            }
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
        }
    }
}

/// Wrapper type enabling a consistent error surface for consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl<'a> fmt::Display for GrammarError<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: Some(tok.kind),
                    span: tok.span.clone(),
                },
                None => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn with_kind(kind: GrammarErrorKind<'a>) -> Self {
        GrammarError { kind }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl<'a> fmt::Display for ParseError<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq)]
pub enum Command<'a> {
    List,
    Insert(InsertCommand),
    Remove(RemoveTarget),
    Save,
    Load,
    Status,
    Help(HelpCommand<'a>),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InsertCommand {
    pub micros: Micros,
    pub pattern: Option<OutputPattern>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveTarget {
    All,
    Entry(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

/// Tokenize the provided line.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let token = Token {
            kind: record.token,
            lexeme: &line[span.clone()],
            span,
        };
        push_token(&mut buffer, token)?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let token = Token {
            kind: TokenKind::Error,
            lexeme: partial.fragment,
            span: start..start + partial.fragment.len(),
        };
        push_token(&mut buffer, token)?;
    }

    Ok(buffer)
}

fn push_token<'a>(buffer: &mut TokenBuffer<'a>, token: Token<'a>) -> Result<(), LexError> {
    buffer.push(token).map_err(|_| LexError::TooManyTokens {
        processed: MAX_TOKENS + 1,
    })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a console command from the provided line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::with_kind(
            GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        )));
    }

    let mut input = tokens.as_slice();
    let command = match command().parse_next(&mut input) {
        Ok(command) => command,
        Err(ErrMode::Backtrack(err)) | Err(ErrMode::Cut(err)) => {
            return Err(ParseError::Grammar(err));
        }
        Err(ErrMode::Incomplete(_)) => {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "token",
                input.first(),
            )));
        }
    };

    while let Some((token, remaining)) = input.split_first() {
        if token.kind == TokenKind::Eol {
            input = remaining;
        } else {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "end of command",
                Some(token),
            )));
        }
    }

    Ok(command)
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let keyword = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;
        let Some(spec) = catalog::find(keyword.lexeme) else {
            return Err(ErrMode::Cut(GrammarError::with_kind(
                GrammarErrorKind::UnknownCommand {
                    name: keyword.lexeme,
                },
            )));
        };

        match spec.tag {
            CommandTag::List => Ok(Command::List),
            CommandTag::Save => Ok(Command::Save),
            CommandTag::Load => Ok(Command::Load),
            CommandTag::Status => Ok(Command::Status),
            CommandTag::Insert => insert_args().parse_next(input).map(Command::Insert),
            CommandTag::Remove => remove_args().parse_next(input).map(Command::Remove),
            CommandTag::Help => {
                let topic = optional_kind(TokenKind::Ident).parse_next(input)?;
                Ok(Command::Help(HelpCommand {
                    topic: topic.map(|token| token.lexeme),
                }))
            }
        }
    }
}

fn insert_args<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, InsertCommand, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let micros = match input.split_first() {
            Some((token, rest)) if matches!(token.kind, TokenKind::Integer | TokenKind::Decimal) => {
                *input = rest;
                token
                    .lexeme
                    .parse::<Micros>()
                    .map_err(|_| {
                        ErrMode::Cut(GrammarError::with_kind(GrammarErrorKind::InvalidNumber {
                            span: token.span.clone(),
                        }))
                    })?
            }
            other => {
                return Err(ErrMode::Cut(GrammarError::unexpected(
                    "delay in microseconds",
                    other.map(|(token, _)| token),
                )));
            }
        };

        let pattern = match input.split_first() {
            Some((token, rest)) if matches!(token.kind, TokenKind::Integer | TokenKind::Bits) => {
                *input = rest;
                Some(parse_pattern(token).map_err(ErrMode::Cut)?)
            }
            _ => None,
        };

        Ok(InsertCommand { micros, pattern })
    }
}

fn remove_args<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, RemoveTarget, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let Some(token) = optional_kind(TokenKind::Ident).parse_next(input)? else {
            return Ok(RemoveTarget::All);
        };
        parse_label(&token)
            .map(RemoveTarget::Entry)
            .map_err(ErrMode::Cut)
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

fn optional_kind<'src, 'slice>(
    kind: TokenKind,
) -> impl Parser<Input<'src, 'slice>, Option<Token<'src>>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(Some(token.clone()))
        }
        _ => Ok(None),
    }
}

fn parse_pattern<'a>(token: &Token<'a>) -> Result<OutputPattern, GrammarError<'a>> {
    let invalid = || {
        GrammarError::with_kind(GrammarErrorKind::InvalidPattern {
            lexeme: token.lexeme,
        })
    };

    let channels = match token.kind {
        TokenKind::Bits => {
            let digits = &token.lexeme[2..];
            if digits.len() > usize::from(CHANNEL_COUNT) {
                return Err(invalid());
            }
            u8::from_str_radix(digits, 2).map_err(|_| invalid())?
        }
        _ => token.lexeme.parse::<u8>().map_err(|_| invalid())?,
    };

    if channels >= 1 << CHANNEL_COUNT {
        return Err(invalid());
    }
    Ok(OutputPattern::from_channels(channels))
}

fn parse_label<'a>(token: &Token<'a>) -> Result<usize, GrammarError<'a>> {
    let mut chars = token.lexeme.chars();
    let index = match (chars.next(), chars.next()) {
        (Some(label), None) => index_for_label(label),
        _ => None,
    };
    index.ok_or(GrammarError::with_kind(GrammarErrorKind::InvalidLabel {
        lexeme: token.lexeme,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    fn grammar_error(input: &str) -> GrammarErrorKind<'_> {
        match parse(input) {
            Err(ParseError::Grammar(err)) => err.kind,
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_ok("list"), Command::List);
        assert_eq!(parse_ok("save\r\n"), Command::Save);
        assert_eq!(parse_ok("LOAD"), Command::Load);
        assert_eq!(parse_ok("status"), Command::Status);
    }

    #[test]
    fn parses_insert_without_pattern() {
        assert_eq!(
            parse_ok("insert 37.5"),
            Command::Insert(InsertCommand {
                micros: 37.5,
                pattern: None,
            })
        );
    }

    #[test]
    fn parses_insert_with_decimal_pattern() {
        assert_eq!(
            parse_ok("insert 10 22"),
            Command::Insert(InsertCommand {
                micros: 10.0,
                pattern: Some(OutputPattern::from_channels(0b1_0110)),
            })
        );
    }

    #[test]
    fn parses_insert_with_bit_pattern() {
        assert_eq!(
            parse_ok("insert 120 0b101"),
            Command::Insert(InsertCommand {
                micros: 120.0,
                pattern: Some(OutputPattern::from_channels(0b0_0101)),
            })
        );
    }

    #[test]
    fn rejects_out_of_range_patterns() {
        assert!(matches!(
            grammar_error("insert 10 32"),
            GrammarErrorKind::InvalidPattern { lexeme: "32" }
        ));
        assert!(matches!(
            grammar_error("insert 10 0b111111"),
            GrammarErrorKind::InvalidPattern { .. }
        ));
    }

    #[test]
    fn insert_requires_delay() {
        assert!(matches!(
            grammar_error("insert"),
            GrammarErrorKind::UnexpectedEnd { .. }
        ));
        assert!(matches!(
            grammar_error("insert A"),
            GrammarErrorKind::UnexpectedToken {
                found: Some(TokenKind::Ident),
                ..
            }
        ));
    }

    #[test]
    fn parses_remove_variants() {
        assert_eq!(parse_ok("remove"), Command::Remove(RemoveTarget::All));
        assert_eq!(parse_ok("remove b"), Command::Remove(RemoveTarget::Entry(1)));
        assert!(matches!(
            grammar_error("remove AB"),
            GrammarErrorKind::InvalidLabel { lexeme: "AB" }
        ));
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(
            parse_ok("help insert"),
            Command::Help(HelpCommand {
                topic: Some("insert"),
            })
        );
        assert_eq!(parse_ok("help"), Command::Help(HelpCommand { topic: None }));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(matches!(
            grammar_error("reboot now"),
            GrammarErrorKind::UnknownCommand { name: "reboot" }
        ));
    }

    #[test]
    fn rejects_trailing_arguments() {
        assert!(matches!(
            grammar_error("list 4"),
            GrammarErrorKind::UnexpectedToken { expected: "end of command", .. }
        ));
    }

    #[test]
    fn rejects_invalid_token() {
        assert!(matches!(
            grammar_error("insert 10$"),
            GrammarErrorKind::InvalidToken { lexeme: "$", .. }
        ));
    }

    #[test]
    fn lexer_prefers_bits_over_integer() {
        let tokens = lex("0b110 7 2.5").expect("lexing should succeed");
        let kinds: HeaplessVec<TokenKind, 4> = tokens.iter().map(|token| token.kind).collect();
        assert_eq!(
            kinds.as_slice(),
            &[TokenKind::Bits, TokenKind::Integer, TokenKind::Decimal]
        );
    }
}
