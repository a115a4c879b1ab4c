//! Resumable tokenizer for the expression syntax.
//!
//! The lexer is an explicit state machine rather than a combinator grammar
//! because expression source may arrive in arbitrary chunks: a token split
//! across a chunk boundary is held as partial state and completed when the
//! next chunk arrives. Input bytes are scanned exactly once.
//!
//! One-token lookahead pairs (`|` vs `||`, `&` vs `&&`, `=` vs `==` vs `=>`,
//! `.` vs `.*` vs `.**`, integer vs float) are resolved inside the state
//! machine, suspending when the deciding character has not arrived yet.
//!
//! Text literals lex into format runs: `FormatOpen`, interleaved
//! `FormatText`/`EmbedOpen ... EmbedClose` runs, `FormatClose`. A literal
//! with no embedded expression collapses to a single `Str` token.

use std::fmt;

use super::{ExprError, ExprErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    True,
    False,
    Str(String),
    Ident(String),

    FormatOpen,
    FormatText(String),
    EmbedOpen,
    EmbedClose,
    FormatClose,

    Dollar,
    Percent,
    Dot,
    DotStar,
    DotStarStar,
    Colon,
    ColonColon,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Question,

    OrOr,
    AndAnd,
    Pipe,
    Amp,
    Caret,
    Tilde,
    Bang,
    Lt,
    Le,
    EqEq,
    Ne,
    Ge,
    Gt,
    Plus,
    Minus,
    Star,
    Slash,

    // lexed for lookahead completeness, rejected by the grammar
    Assign,
    FatArrow,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(value) => write!(f, "{}", value),
            Token::Float(value) => write!(f, "{:?}", value),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Str(text) => write!(f, "\"{}\"", text),
            Token::Ident(name) => write!(f, "{}", name),
            Token::FormatOpen | Token::FormatClose => write!(f, "\""),
            Token::FormatText(text) => write!(f, "{}", text),
            Token::EmbedOpen => write!(f, "{{"),
            Token::EmbedClose => write!(f, "}}"),
            Token::Dollar => write!(f, "$"),
            Token::Percent => write!(f, "%"),
            Token::Dot => write!(f, "."),
            Token::DotStar => write!(f, ".*"),
            Token::DotStarStar => write!(f, ".**"),
            Token::Colon => write!(f, ":"),
            Token::ColonColon => write!(f, "::"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Question => write!(f, "?"),
            Token::OrOr => write!(f, "||"),
            Token::AndAnd => write!(f, "&&"),
            Token::Pipe => write!(f, "|"),
            Token::Amp => write!(f, "&"),
            Token::Caret => write!(f, "^"),
            Token::Tilde => write!(f, "~"),
            Token::Bang => write!(f, "!"),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::EqEq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Ge => write!(f, ">="),
            Token::Gt => write!(f, ">"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Assign => write!(f, "="),
            Token::FatArrow => write!(f, "=>"),
        }
    }
}

/// A token together with the byte offset it started at.
pub type Spanned = (Token, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    Dot,
    DotStar,
    Colon,
    Pipe,
    Amp,
    Eq,
    Bang,
    Lt,
    Gt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Esc {
    None,
    Slash,
    Unicode(String),
}

#[derive(Debug, Clone, PartialEq)]
enum LexState {
    Idle,
    Ident {
        text: String,
        start: usize,
    },
    Number {
        text: String,
        start: usize,
        int_only: bool,
        has_dot: bool,
        has_exp: bool,
    },
    /// Saw `.` immediately after digits; a following digit continues a
    /// float, anything else terminates the integer and replays the dot.
    NumberDot {
        text: String,
        start: usize,
    },
    Text {
        acc: String,
        start: usize,
        esc: Esc,
    },
    Pending(PendingOp, usize),
}

/// Nested lexing contexts: expression source, a text literal, or an
/// embedded expression inside a text literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Expr,
    Text { opened: bool },
    Embed,
}

#[derive(Debug)]
pub struct Lexer {
    state: LexState,
    modes: Vec<Mode>,
    pos: usize,
    /// True when the last emitted token was `.`; digits after a selector
    /// dot lex in integer-only mode so `%.0.1` is two index hops, not a
    /// float.
    after_dot: bool,
}

impl Default for Lexer {
    fn default() -> Self {
        Lexer::new()
    }
}

impl Lexer {
    pub fn new() -> Self {
        Lexer {
            state: LexState::Idle,
            modes: vec![Mode::Expr],
            pos: 0,
            after_dot: false,
        }
    }

    /// Byte offset of the next unread input character.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Consumes one chunk of input, appending completed tokens to `out`.
    /// Partial tokens are retained and completed by later chunks.
    pub fn feed(&mut self, chunk: &str, out: &mut Vec<Spanned>) -> Result<(), ExprError> {
        for c in chunk.chars() {
            self.accept(c, out)?;
            self.pos += c.len_utf8();
        }
        Ok(())
    }

    /// Flushes any partial token at end of input.
    pub fn finish(&mut self, out: &mut Vec<Spanned>) -> Result<(), ExprError> {
        match std::mem::replace(&mut self.state, LexState::Idle) {
            LexState::Idle => {}
            LexState::Ident { text, start } => self.emit(ident_token(text), start, out),
            LexState::Number {
                text,
                start,
                has_dot,
                has_exp,
                ..
            } => {
                let token = number_token(&text, has_dot || has_exp, start)?;
                self.emit(token, start, out);
            }
            LexState::NumberDot { text, start } => {
                let token = number_token(&text, false, start)?;
                self.emit(token, start, out);
                self.emit(Token::Dot, self.pos, out);
            }
            LexState::Text { start, .. } => {
                return Err(ExprError::new(ExprErrorKind::UnterminatedText, start));
            }
            LexState::Pending(op, start) => {
                let token = resolve_pending(op);
                self.emit(token, start, out);
            }
        }
        match self.modes.as_slice() {
            [Mode::Expr] => Ok(()),
            [.., Mode::Text { .. }] => {
                Err(ExprError::new(ExprErrorKind::UnterminatedText, self.pos))
            }
            _ => Err(ExprError::new(ExprErrorKind::UnexpectedEnd, self.pos)),
        }
    }

    fn emit(&mut self, token: Token, start: usize, out: &mut Vec<Spanned>) {
        self.after_dot = matches!(token, Token::Dot);
        out.push((token, start));
    }

    fn mode(&self) -> Mode {
        *self.modes.last().unwrap_or(&Mode::Expr)
    }

    fn accept(&mut self, c: char, out: &mut Vec<Spanned>) -> Result<(), ExprError> {
        match std::mem::replace(&mut self.state, LexState::Idle) {
            LexState::Idle => self.accept_idle(c, out),
            LexState::Ident { mut text, start } => {
                if c.is_ascii_alphanumeric() || c == '_' {
                    text.push(c);
                    self.state = LexState::Ident { text, start };
                    Ok(())
                } else {
                    self.emit(ident_token(text), start, out);
                    self.accept(c, out)
                }
            }
            LexState::Number {
                mut text,
                start,
                int_only,
                has_dot,
                has_exp,
            } => {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.state = LexState::Number {
                        text,
                        start,
                        int_only,
                        has_dot,
                        has_exp,
                    };
                    Ok(())
                } else if c == '.' && !int_only && !has_dot && !has_exp {
                    self.state = LexState::NumberDot { text, start };
                    Ok(())
                } else if (c == 'e' || c == 'E') && !int_only && !has_exp {
                    text.push(c);
                    self.state = LexState::Number {
                        text,
                        start,
                        int_only,
                        has_dot,
                        has_exp: true,
                    };
                    Ok(())
                } else if (c == '+' || c == '-')
                    && has_exp
                    && matches!(text.chars().last(), Some('e') | Some('E'))
                {
                    text.push(c);
                    self.state = LexState::Number {
                        text,
                        start,
                        int_only,
                        has_dot,
                        has_exp,
                    };
                    Ok(())
                } else {
                    let token = number_token(&text, has_dot || has_exp, start)?;
                    self.emit(token, start, out);
                    self.accept(c, out)
                }
            }
            LexState::NumberDot { mut text, start } => {
                if c.is_ascii_digit() {
                    text.push('.');
                    text.push(c);
                    self.state = LexState::Number {
                        text,
                        start,
                        int_only: false,
                        has_dot: true,
                        has_exp: false,
                    };
                    Ok(())
                } else {
                    let token = number_token(&text, false, start)?;
                    self.emit(token, start, out);
                    // replay the held dot, then the current character
                    self.state = LexState::Pending(PendingOp::Dot, self.pos);
                    self.accept(c, out)
                }
            }
            LexState::Text { acc, start, esc } => self.accept_text(c, acc, start, esc, out),
            LexState::Pending(op, start) => self.accept_pending(op, start, c, out),
        }
    }

    fn accept_idle(&mut self, c: char, out: &mut Vec<Spanned>) -> Result<(), ExprError> {
        let at = self.pos;
        match c {
            _ if c.is_whitespace() => Ok(()),
            '"' => {
                self.modes.push(Mode::Text { opened: false });
                self.state = LexState::Text {
                    acc: String::new(),
                    start: at,
                    esc: Esc::None,
                };
                Ok(())
            }
            '}' => match self.mode() {
                Mode::Embed => {
                    self.modes.pop();
                    self.emit(Token::EmbedClose, at, out);
                    self.state = LexState::Text {
                        acc: String::new(),
                        start: at,
                        esc: Esc::None,
                    };
                    Ok(())
                }
                _ => Err(ExprError::new(ExprErrorKind::UnexpectedChar(c), at)),
            },
            c if c.is_ascii_alphabetic() || c == '_' => {
                self.state = LexState::Ident {
                    text: c.to_string(),
                    start: at,
                };
                Ok(())
            }
            c if c.is_ascii_digit() => {
                self.state = LexState::Number {
                    text: c.to_string(),
                    start: at,
                    int_only: self.after_dot,
                    has_dot: false,
                    has_exp: false,
                };
                Ok(())
            }
            '.' => {
                self.state = LexState::Pending(PendingOp::Dot, at);
                Ok(())
            }
            ':' => {
                self.state = LexState::Pending(PendingOp::Colon, at);
                Ok(())
            }
            '|' => {
                self.state = LexState::Pending(PendingOp::Pipe, at);
                Ok(())
            }
            '&' => {
                self.state = LexState::Pending(PendingOp::Amp, at);
                Ok(())
            }
            '=' => {
                self.state = LexState::Pending(PendingOp::Eq, at);
                Ok(())
            }
            '!' => {
                self.state = LexState::Pending(PendingOp::Bang, at);
                Ok(())
            }
            '<' => {
                self.state = LexState::Pending(PendingOp::Lt, at);
                Ok(())
            }
            '>' => {
                self.state = LexState::Pending(PendingOp::Gt, at);
                Ok(())
            }
            '$' => {
                self.emit(Token::Dollar, at, out);
                Ok(())
            }
            '%' => {
                self.emit(Token::Percent, at, out);
                Ok(())
            }
            '[' => {
                self.emit(Token::LBracket, at, out);
                Ok(())
            }
            ']' => {
                self.emit(Token::RBracket, at, out);
                Ok(())
            }
            '(' => {
                self.emit(Token::LParen, at, out);
                Ok(())
            }
            ')' => {
                self.emit(Token::RParen, at, out);
                Ok(())
            }
            ',' => {
                self.emit(Token::Comma, at, out);
                Ok(())
            }
            '?' => {
                self.emit(Token::Question, at, out);
                Ok(())
            }
            '^' => {
                self.emit(Token::Caret, at, out);
                Ok(())
            }
            '~' => {
                self.emit(Token::Tilde, at, out);
                Ok(())
            }
            '+' => {
                self.emit(Token::Plus, at, out);
                Ok(())
            }
            '-' => {
                self.emit(Token::Minus, at, out);
                Ok(())
            }
            '*' => {
                self.emit(Token::Star, at, out);
                Ok(())
            }
            '/' => {
                self.emit(Token::Slash, at, out);
                Ok(())
            }
            other => Err(ExprError::new(ExprErrorKind::UnexpectedChar(other), at)),
        }
    }

    fn accept_pending(
        &mut self,
        op: PendingOp,
        start: usize,
        c: char,
        out: &mut Vec<Spanned>,
    ) -> Result<(), ExprError> {
        let resolved = match (op, c) {
            (PendingOp::Dot, '*') => {
                self.state = LexState::Pending(PendingOp::DotStar, start);
                return Ok(());
            }
            (PendingOp::DotStar, '*') => Some(Token::DotStarStar),
            (PendingOp::Colon, ':') => Some(Token::ColonColon),
            (PendingOp::Pipe, '|') => Some(Token::OrOr),
            (PendingOp::Amp, '&') => Some(Token::AndAnd),
            (PendingOp::Eq, '=') => Some(Token::EqEq),
            (PendingOp::Eq, '>') => Some(Token::FatArrow),
            (PendingOp::Bang, '=') => Some(Token::Ne),
            (PendingOp::Lt, '=') => Some(Token::Le),
            (PendingOp::Gt, '=') => Some(Token::Ge),
            _ => None,
        };
        match resolved {
            Some(token) => {
                self.emit(token, start, out);
                Ok(())
            }
            None => {
                let token = resolve_pending(op);
                self.emit(token, start, out);
                self.accept(c, out)
            }
        }
    }

    fn accept_text(
        &mut self,
        c: char,
        mut acc: String,
        start: usize,
        esc: Esc,
        out: &mut Vec<Spanned>,
    ) -> Result<(), ExprError> {
        let at = self.pos;
        match esc {
            Esc::Slash => {
                let mapped = match c {
                    'n' => Some('\n'),
                    't' => Some('\t'),
                    'r' => Some('\r'),
                    '"' => Some('"'),
                    '\\' => Some('\\'),
                    '{' => Some('{'),
                    '}' => Some('}'),
                    'u' => None,
                    _ => return Err(ExprError::new(ExprErrorKind::BadEscape, at)),
                };
                match mapped {
                    Some(mapped) => {
                        acc.push(mapped);
                        self.state = LexState::Text {
                            acc,
                            start,
                            esc: Esc::None,
                        };
                    }
                    None => {
                        self.state = LexState::Text {
                            acc,
                            start,
                            esc: Esc::Unicode(String::new()),
                        };
                    }
                }
                Ok(())
            }
            Esc::Unicode(mut digits) => {
                if !c.is_ascii_hexdigit() {
                    return Err(ExprError::new(ExprErrorKind::BadEscape, at));
                }
                digits.push(c);
                if digits.len() == 4 {
                    let code = u32::from_str_radix(&digits, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| ExprError::new(ExprErrorKind::BadEscape, at))?;
                    acc.push(code);
                    self.state = LexState::Text {
                        acc,
                        start,
                        esc: Esc::None,
                    };
                } else {
                    self.state = LexState::Text {
                        acc,
                        start,
                        esc: Esc::Unicode(digits),
                    };
                }
                Ok(())
            }
            Esc::None => match c {
                '\\' => {
                    self.state = LexState::Text {
                        acc,
                        start,
                        esc: Esc::Slash,
                    };
                    Ok(())
                }
                '"' => {
                    let opened = match self.modes.pop() {
                        Some(Mode::Text { opened }) => opened,
                        _ => return Err(ExprError::new(ExprErrorKind::UnterminatedText, at)),
                    };
                    if opened {
                        if !acc.is_empty() {
                            self.emit(Token::FormatText(acc), start, out);
                        }
                        self.emit(Token::FormatClose, at, out);
                    } else {
                        self.emit(Token::Str(acc), start, out);
                    }
                    Ok(())
                }
                '{' => {
                    let first = match self.modes.last_mut() {
                        Some(Mode::Text { opened }) => {
                            let first = !*opened;
                            *opened = true;
                            first
                        }
                        _ => return Err(ExprError::new(ExprErrorKind::UnterminatedText, at)),
                    };
                    if first {
                        self.emit(Token::FormatOpen, start, out);
                    }
                    if !acc.is_empty() {
                        self.emit(Token::FormatText(acc), start, out);
                    }
                    self.emit(Token::EmbedOpen, at, out);
                    self.modes.push(Mode::Embed);
                    Ok(())
                }
                '}' => Err(ExprError::new(ExprErrorKind::UnexpectedChar('}'), at)),
                other => {
                    acc.push(other);
                    self.state = LexState::Text {
                        acc,
                        start,
                        esc: Esc::None,
                    };
                    Ok(())
                }
            },
        }
    }
}

fn resolve_pending(op: PendingOp) -> Token {
    match op {
        PendingOp::Dot => Token::Dot,
        PendingOp::DotStar => Token::DotStar,
        PendingOp::Colon => Token::Colon,
        PendingOp::Pipe => Token::Pipe,
        PendingOp::Amp => Token::Amp,
        PendingOp::Eq => Token::Assign,
        PendingOp::Bang => Token::Bang,
        PendingOp::Lt => Token::Lt,
        PendingOp::Gt => Token::Gt,
    }
}

fn ident_token(text: String) -> Token {
    match text.as_str() {
        "true" => Token::True,
        "false" => Token::False,
        _ => Token::Ident(text),
    }
}

fn number_token(text: &str, float: bool, start: usize) -> Result<Token, ExprError> {
    if float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| ExprError::new(ExprErrorKind::UnexpectedToken(text.to_string()), start))
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| ExprError::new(ExprErrorKind::NumberOverflow, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new();
        let mut out = Vec::new();
        lexer.feed(source, &mut out).unwrap();
        lexer.finish(&mut out).unwrap();
        out.into_iter().map(|(token, _)| token).collect()
    }

    fn lex_chunked(chunks: &[&str]) -> Vec<Token> {
        let mut lexer = Lexer::new();
        let mut out = Vec::new();
        for chunk in chunks {
            lexer.feed(chunk, &mut out).unwrap();
        }
        lexer.finish(&mut out).unwrap();
        out.into_iter().map(|(token, _)| token).collect()
    }

    #[test]
    fn lookahead_pairs() {
        assert_eq!(lex("| ||"), vec![Token::Pipe, Token::OrOr]);
        assert_eq!(lex("& &&"), vec![Token::Amp, Token::AndAnd]);
        assert_eq!(
            lex("= == =>"),
            vec![Token::Assign, Token::EqEq, Token::FatArrow]
        );
        assert_eq!(
            lex(". .* .**"),
            vec![Token::Dot, Token::DotStar, Token::DotStarStar]
        );
    }

    #[test]
    fn tokens_survive_chunk_splits() {
        let whole = lex("%.rate >= 12.5 && $max");
        for split in 1.."%.rate >= 12.5 && $max".len() {
            let source = "%.rate >= 12.5 && $max";
            let parts = [&source[..split], &source[split..]];
            assert_eq!(lex_chunked(&parts), whole, "split at {}", split);
        }
    }

    #[test]
    fn digits_after_selector_dot_stay_integral() {
        assert_eq!(
            lex("%.0.1"),
            vec![
                Token::Percent,
                Token::Dot,
                Token::Int(0),
                Token::Dot,
                Token::Int(1)
            ]
        );
        assert_eq!(lex("0.1"), vec![Token::Float(0.1)]);
    }

    #[test]
    fn integer_overflow_is_a_hard_error() {
        let mut lexer = Lexer::new();
        let mut out = Vec::new();
        lexer.feed("9223372036854775808", &mut out).unwrap();
        let err = lexer.finish(&mut out).unwrap_err();
        assert_eq!(err.kind, ExprErrorKind::NumberOverflow);
        assert_eq!(err.at, 0);
    }

    #[test]
    fn plain_text_collapses_to_str() {
        assert_eq!(lex("\"plain\""), vec![Token::Str("plain".to_string())]);
    }

    #[test]
    fn template_lexes_into_format_runs() {
        assert_eq!(
            lex("\"a{%.x}b\""),
            vec![
                Token::FormatOpen,
                Token::FormatText("a".to_string()),
                Token::EmbedOpen,
                Token::Percent,
                Token::Dot,
                Token::Ident("x".to_string()),
                Token::EmbedClose,
                Token::FormatText("b".to_string()),
                Token::FormatClose,
            ]
        );
    }

    #[test]
    fn escapes_decode() {
        assert_eq!(
            lex("\"\\{\\}\\n\\u0001\""),
            vec![Token::Str("{}\n\u{1}".to_string())]
        );
    }

    #[test]
    fn unterminated_text_reported_at_finish() {
        let mut lexer = Lexer::new();
        let mut out = Vec::new();
        lexer.feed("\"dangling", &mut out).unwrap();
        let err = lexer.finish(&mut out).unwrap_err();
        assert_eq!(err.kind, ExprErrorKind::UnterminatedText);
    }
}
