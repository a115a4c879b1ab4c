//! Recursive-descent precedence parser over the buffered token sequence,
//! one function per precedence tier, plus the incremental [`ExprParser`]
//! driver that owns the resumable lexer.

use std::sync::Arc;

use super::lexer::{Lexer, Spanned, Token};
use super::{BinaryOp, Expr, ExprError, ExprErrorKind, FormatPart, UnaryOp};
use crate::term::Term;

/// Outcome of feeding a chunk to an [`ExprParser`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParseStep {
    /// More input may arrive; state is retained, no bytes are rescanned.
    Incomplete,
    /// A complete expression (only produced by [`ExprParser::finish`]).
    Complete(Expr),
}

/// Parses a complete expression source in one call.
pub fn parse_expr(source: &str) -> Result<Expr, ExprError> {
    let mut parser = ExprParser::new();
    parser.feed(source)?;
    parser.finish()
}

/// Incremental parse driver. Bytes are lexed exactly once as they arrive;
/// the token buffer is what a suspended parse resumes from.
#[derive(Debug, Default)]
pub struct ExprParser {
    lexer: Lexer,
    tokens: Vec<Spanned>,
}

impl ExprParser {
    pub fn new() -> Self {
        ExprParser {
            lexer: Lexer::new(),
            tokens: Vec::new(),
        }
    }

    /// Lexes `chunk` into the token buffer and checks for definite syntax
    /// errors. Running out of tokens mid-construct is not an error here —
    /// the next chunk may complete it.
    pub fn feed(&mut self, chunk: &str) -> Result<ParseStep, ExprError> {
        self.lexer.feed(chunk, &mut self.tokens)?;
        let mut cursor = TokenCursor::new(&self.tokens, self.lexer.pos(), false);
        match parse_cond(&mut cursor) {
            Ok(_) => {
                // a deliberate parser stop with tokens left over can never
                // be extended into a valid expression by more input
                if let Some((token, at)) = cursor.remainder() {
                    return Err(ExprError::new(
                        ExprErrorKind::TrailingInput(token.to_string()),
                        at,
                    ));
                }
                Ok(ParseStep::Incomplete)
            }
            Err(err) if err.is_unexpected_end() => Ok(ParseStep::Incomplete),
            Err(err) => Err(err),
        }
    }

    /// Ends the input and demands a complete expression.
    pub fn finish(mut self) -> Result<Expr, ExprError> {
        self.lexer.finish(&mut self.tokens)?;
        let mut cursor = TokenCursor::new(&self.tokens, self.lexer.pos(), true);
        let expr = parse_cond(&mut cursor)?;
        if let Some((token, at)) = cursor.remainder() {
            return Err(ExprError::new(
                ExprErrorKind::TrailingInput(token.to_string()),
                at,
            ));
        }
        Ok(expr)
    }
}

struct TokenCursor<'a> {
    tokens: &'a [Spanned],
    index: usize,
    end_pos: usize,
    /// True once input is finished: running off the token buffer is then a
    /// definite error, not a suspension point.
    is_final: bool,
}

impl<'a> TokenCursor<'a> {
    fn new(tokens: &'a [Spanned], end_pos: usize, is_final: bool) -> Self {
        TokenCursor {
            tokens,
            index: 0,
            end_pos,
            is_final,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.index).map(|(token, _)| token)
    }

    fn pos(&self) -> usize {
        self.tokens
            .get(self.index)
            .map(|(_, at)| *at)
            .unwrap_or(self.end_pos)
    }

    fn advance(&mut self) -> Result<&'a Token, ExprError> {
        match self.tokens.get(self.index) {
            Some((token, _)) => {
                self.index += 1;
                Ok(token)
            }
            None => Err(self.end_of_input()),
        }
    }

    fn consume(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.peek() {
            Some(token) if token == expected => {
                self.index += 1;
                Ok(())
            }
            Some(token) => Err(self.unexpected(token)),
            None => Err(self.end_of_input()),
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn remainder(&self) -> Option<(&'a Token, usize)> {
        self.tokens
            .get(self.index)
            .map(|(token, at)| (token, *at))
    }

    fn end_of_input(&self) -> ExprError {
        ExprError::new(ExprErrorKind::UnexpectedEnd, self.end_pos)
    }

    fn unexpected(&self, token: &Token) -> ExprError {
        ExprError::new(ExprErrorKind::UnexpectedToken(token.to_string()), self.pos())
    }
}

fn parse_cond(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let cond = parse_or(cursor)?;
    if cursor.eat(&Token::Question) {
        let then = parse_cond(cursor)?;
        cursor.consume(&Token::Colon)?;
        let other = parse_cond(cursor)?;
        Ok(Expr::Cond(Arc::new(cond), Arc::new(then), Arc::new(other)))
    } else {
        Ok(cond)
    }
}

fn parse_or(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let mut expr = parse_and(cursor)?;
    while cursor.eat(&Token::OrOr) {
        let rhs = parse_and(cursor)?;
        expr = Expr::Binary(BinaryOp::Or, Arc::new(expr), Arc::new(rhs));
    }
    Ok(expr)
}

fn parse_and(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let mut expr = parse_bit_or(cursor)?;
    while cursor.eat(&Token::AndAnd) {
        let rhs = parse_bit_or(cursor)?;
        expr = Expr::Binary(BinaryOp::And, Arc::new(expr), Arc::new(rhs));
    }
    Ok(expr)
}

fn parse_bit_or(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let mut expr = parse_bit_xor(cursor)?;
    while cursor.eat(&Token::Pipe) {
        let rhs = parse_bit_xor(cursor)?;
        expr = Expr::Binary(BinaryOp::BitOr, Arc::new(expr), Arc::new(rhs));
    }
    Ok(expr)
}

fn parse_bit_xor(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let mut expr = parse_bit_and(cursor)?;
    while cursor.eat(&Token::Caret) {
        let rhs = parse_bit_and(cursor)?;
        expr = Expr::Binary(BinaryOp::BitXor, Arc::new(expr), Arc::new(rhs));
    }
    Ok(expr)
}

fn parse_bit_and(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let mut expr = parse_comparison(cursor)?;
    while cursor.eat(&Token::Amp) {
        let rhs = parse_comparison(cursor)?;
        expr = Expr::Binary(BinaryOp::BitAnd, Arc::new(expr), Arc::new(rhs));
    }
    Ok(expr)
}

/// Comparisons are non-associative: at most one per (un-parenthesized)
/// operand pair.
fn parse_comparison(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let lhs = parse_additive(cursor)?;
    let op = match cursor.peek() {
        Some(Token::Lt) => BinaryOp::Lt,
        Some(Token::Le) => BinaryOp::Le,
        Some(Token::EqEq) => BinaryOp::Eq,
        Some(Token::Ne) => BinaryOp::Ne,
        Some(Token::Ge) => BinaryOp::Ge,
        Some(Token::Gt) => BinaryOp::Gt,
        _ => return Ok(lhs),
    };
    cursor.advance()?;
    let rhs = parse_additive(cursor)?;
    Ok(Expr::Binary(op, Arc::new(lhs), Arc::new(rhs)))
}

fn parse_additive(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let mut expr = parse_multiplicative(cursor)?;
    loop {
        let op = match cursor.peek() {
            Some(Token::Plus) => BinaryOp::Add,
            Some(Token::Minus) => BinaryOp::Sub,
            _ => return Ok(expr),
        };
        cursor.advance()?;
        let rhs = parse_multiplicative(cursor)?;
        expr = Expr::Binary(op, Arc::new(expr), Arc::new(rhs));
    }
}

fn parse_multiplicative(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let mut expr = parse_unary(cursor)?;
    loop {
        // `%` is the context sigil in operand position and the remainder
        // operator in operator position; position disambiguates
        let op = match cursor.peek() {
            Some(Token::Star) => BinaryOp::Mul,
            Some(Token::Slash) => BinaryOp::Div,
            Some(Token::Percent) => BinaryOp::Rem,
            _ => return Ok(expr),
        };
        cursor.advance()?;
        let rhs = parse_unary(cursor)?;
        expr = Expr::Binary(op, Arc::new(expr), Arc::new(rhs));
    }
}

fn parse_unary(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let op = match cursor.peek() {
        Some(Token::Minus) => Some(UnaryOp::Neg),
        Some(Token::Plus) => Some(UnaryOp::Pos),
        Some(Token::Bang) => Some(UnaryOp::Not),
        Some(Token::Tilde) => Some(UnaryOp::BitNot),
        _ => None,
    };
    match op {
        Some(op) => {
            cursor.advance()?;
            let operand = parse_unary(cursor)?;
            Ok(Expr::Unary(op, Arc::new(operand)))
        }
        None => parse_selector(cursor),
    }
}

fn parse_selector(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let mut expr = parse_primary(cursor)?;
    loop {
        match cursor.peek() {
            Some(Token::Dot) => {
                cursor.advance()?;
                let key = match cursor.advance()? {
                    Token::Ident(name) => Expr::Literal(Term::Text(name.clone())),
                    Token::Int(index) => Expr::Literal(Term::Int(*index)),
                    other => return Err(cursor.unexpected(other)),
                };
                expr = Expr::Child(Arc::new(expr), Arc::new(key));
            }
            Some(Token::DotStar) => {
                cursor.advance()?;
                expr = Expr::Children(Arc::new(expr));
            }
            Some(Token::DotStarStar) => {
                cursor.advance()?;
                expr = Expr::Descendants(Arc::new(expr));
            }
            Some(Token::ColonColon) => {
                cursor.advance()?;
                let name = match cursor.advance()? {
                    Token::Ident(name) => name.clone(),
                    other => return Err(cursor.unexpected(other)),
                };
                expr = Expr::Member(Arc::new(expr), name);
            }
            Some(Token::LBracket) => {
                cursor.advance()?;
                if cursor.eat(&Token::Question) {
                    let predicate = parse_cond(cursor)?;
                    cursor.consume(&Token::RBracket)?;
                    expr = Expr::Filter(Arc::new(expr), Arc::new(predicate));
                } else {
                    let key = parse_cond(cursor)?;
                    cursor.consume(&Token::RBracket)?;
                    expr = Expr::Child(Arc::new(expr), Arc::new(key));
                }
            }
            Some(Token::LParen) => {
                cursor.advance()?;
                let mut args = Vec::new();
                if !cursor.eat(&Token::RParen) {
                    loop {
                        args.push(Arc::new(parse_cond(cursor)?));
                        if cursor.eat(&Token::Comma) {
                            continue;
                        }
                        cursor.consume(&Token::RParen)?;
                        break;
                    }
                }
                expr = Expr::Invoke(Arc::new(expr), args);
            }
            _ => return Ok(expr),
        }
    }
}

fn parse_primary(cursor: &mut TokenCursor) -> Result<Expr, ExprError> {
    let at = cursor.pos();
    match cursor.advance()? {
        Token::Int(value) => Ok(Expr::Literal(Term::Int(*value))),
        Token::Float(value) => Ok(Expr::Literal(Term::Float(*value))),
        Token::True => Ok(Expr::Literal(Term::Bool(true))),
        Token::False => Ok(Expr::Literal(Term::Bool(false))),
        Token::Str(text) => Ok(Expr::Literal(Term::Text(text.clone()))),
        Token::Percent => Ok(Expr::ContextScope),
        Token::Dollar => Ok(Expr::GlobalScope),
        Token::Ident(name) => {
            // bare identifiers only name invoke targets; with no token after
            // it yet, a `(` may still arrive in a later chunk
            match cursor.peek() {
                Some(Token::LParen) => Ok(Expr::Literal(Term::Text(name.clone()))),
                Some(_) => Err(ExprError::new(
                    ExprErrorKind::UnexpectedToken(name.clone()),
                    at,
                )),
                None if cursor.is_final => Err(ExprError::new(
                    ExprErrorKind::UnexpectedToken(name.clone()),
                    at,
                )),
                None => Err(cursor.end_of_input()),
            }
        }
        Token::LParen => {
            if cursor.eat(&Token::RParen) {
                return Ok(Expr::Literal(Term::Extant));
            }
            let inner = parse_cond(cursor)?;
            cursor.consume(&Token::RParen)?;
            Ok(inner)
        }
        Token::FormatOpen => {
            let mut parts = Vec::new();
            loop {
                match cursor.advance()? {
                    Token::FormatText(text) => parts.push(FormatPart::Text(text.clone())),
                    Token::EmbedOpen => {
                        let embed = parse_cond(cursor)?;
                        cursor.consume(&Token::EmbedClose)?;
                        parts.push(FormatPart::Embed(Arc::new(embed)));
                    }
                    Token::FormatClose => break,
                    other => return Err(cursor.unexpected(other)),
                }
            }
            Ok(Expr::Format(parts))
        }
        other => Err(ExprError::new(
            ExprErrorKind::UnexpectedToken(other.to_string()),
            at,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(scope: Expr, key: Term) -> Expr {
        Expr::Child(Arc::new(scope), Arc::new(Expr::Literal(key)))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse_expr("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Arc::new(Expr::Literal(Term::Int(1))),
                Arc::new(Expr::Binary(
                    BinaryOp::Mul,
                    Arc::new(Expr::Literal(Term::Int(2))),
                    Arc::new(Expr::Literal(Term::Int(3))),
                )),
            )
        );
    }

    #[test]
    fn comparison_sits_below_additive() {
        let expr = parse_expr("1 + 2 < 3 * 4").unwrap();
        match expr {
            Expr::Binary(BinaryOp::Lt, lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Binary(BinaryOp::Add, _, _)));
                assert!(matches!(*rhs, Expr::Binary(BinaryOp::Mul, _, _)));
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn selector_chain() {
        let expr = parse_expr("%.items.0::unit").unwrap();
        assert_eq!(
            expr,
            Expr::Member(
                Arc::new(child(
                    child(Expr::ContextScope, Term::from("items")),
                    Term::Int(0)
                )),
                "unit".to_string(),
            )
        );
    }

    #[test]
    fn filter_vs_bracket_child() {
        assert!(matches!(parse_expr("%[0]").unwrap(), Expr::Child(_, _)));
        assert!(matches!(
            parse_expr("%[? %.x > 1]").unwrap(),
            Expr::Filter(_, _)
        ));
    }

    #[test]
    fn invoke_with_args() {
        let expr = parse_expr("min(%.a, 2)").unwrap();
        match expr {
            Expr::Invoke(func, args) => {
                assert_eq!(*func, Expr::Literal(Term::from("min")));
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn conditional_is_right_associative() {
        let expr = parse_expr("%.a ? 1 : %.b ? 2 : 3").unwrap();
        match expr {
            Expr::Cond(_, _, other) => assert!(matches!(*other, Expr::Cond(_, _, _))),
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn bare_identifier_is_rejected() {
        let err = parse_expr("orphan").unwrap_err();
        assert_eq!(
            err.kind,
            ExprErrorKind::UnexpectedToken("orphan".to_string())
        );
    }

    #[test]
    fn reserved_tokens_are_rejected() {
        assert!(parse_expr("1 = 2").is_err());
        assert!(parse_expr("1 => 2").is_err());
    }

    #[test]
    fn incremental_parse_suspends_and_resumes() {
        let mut parser = ExprParser::new();
        assert_eq!(parser.feed("1 + ").unwrap(), ParseStep::Incomplete);
        assert_eq!(parser.feed("2 * ").unwrap(), ParseStep::Incomplete);
        assert_eq!(parser.feed("3").unwrap(), ParseStep::Incomplete);
        let expr = parser.finish().unwrap();
        assert_eq!(expr, parse_expr("1 + 2 * 3").unwrap());
    }

    #[test]
    fn incremental_parse_splits_inside_tokens() {
        let source = "%.gauge[? %.value >= 12.5] || false";
        let whole = parse_expr(source).unwrap();
        for split in 1..source.len() {
            let mut parser = ExprParser::new();
            parser.feed(&source[..split]).unwrap();
            parser.feed(&source[split..]).unwrap();
            assert_eq!(parser.finish().unwrap(), whole, "split at {}", split);
        }
    }

    #[test]
    fn trailing_garbage_is_definite() {
        let mut parser = ExprParser::new();
        let err = parser.feed("1 2").unwrap_err();
        assert!(matches!(err.kind, ExprErrorKind::TrailingInput(_)));
    }

    #[test]
    fn empty_parens_are_extant() {
        assert_eq!(parse_expr("()").unwrap(), Expr::Literal(Term::Extant));
    }
}
