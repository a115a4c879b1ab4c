//! Precedence-aware rendering of expression trees back to source.
//!
//! [`ExprWriter`] is a resumable stack machine: each `produce` call emits up
//! to a caller-chosen byte budget and suspends mid-text when the budget runs
//! out, resuming exactly where it stopped. [`render`] drives it to
//! completion in one call.

use std::sync::Arc;

use super::{is_identifier, Expr, FormatPart};
use crate::term::Term;

/// Outcome of one `produce` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    /// Output budget exhausted; call `produce` again to continue.
    Full,
    /// The whole expression has been written.
    Done,
}

enum WriteFrame {
    Text(String, usize),
    Node(Arc<Expr>, u8),
}

pub struct ExprWriter {
    stack: Vec<WriteFrame>,
}

/// Renders `expr` to source in one call.
pub fn render(expr: &Expr) -> String {
    let mut out = String::new();
    let mut writer = ExprWriter::new(expr);
    while writer.produce(&mut out, usize::MAX) == WriteStep::Full {}
    out
}

impl ExprWriter {
    pub fn new(expr: &Expr) -> Self {
        ExprWriter {
            stack: vec![WriteFrame::Node(Arc::new(expr.clone()), 0)],
        }
    }

    /// Appends at most `limit` bytes of rendered source to `out` (always at
    /// least one character per call, so tiny budgets still make progress).
    pub fn produce(&mut self, out: &mut String, limit: usize) -> WriteStep {
        let mut written = 0usize;
        while let Some(frame) = self.stack.pop() {
            match frame {
                WriteFrame::Text(text, offset) => {
                    let mut offset = offset;
                    for c in text[offset..].chars() {
                        if written > 0 && written + c.len_utf8() > limit {
                            self.stack.push(WriteFrame::Text(text, offset));
                            return WriteStep::Full;
                        }
                        out.push(c);
                        written += c.len_utf8();
                        offset += c.len_utf8();
                    }
                }
                WriteFrame::Node(expr, ctx) => self.expand(&expr, ctx),
            }
            if written >= limit && !self.stack.is_empty() {
                return WriteStep::Full;
            }
        }
        WriteStep::Done
    }

    fn push_frames(&mut self, frames: Vec<WriteFrame>) {
        for frame in frames.into_iter().rev() {
            self.stack.push(frame);
        }
    }

    fn expand(&mut self, expr: &Expr, ctx: u8) {
        let prec = expr.precedence();
        let parens = prec < ctx;
        let mut frames = Vec::new();
        if parens {
            frames.push(text("("));
        }
        match expr {
            Expr::Literal(term) => frames.push(text(literal_source(term))),
            Expr::ContextScope => frames.push(text("%")),
            Expr::GlobalScope => frames.push(text("$")),
            Expr::Unary(op, operand) => {
                frames.push(text(op.token()));
                frames.push(node(operand, 10));
            }
            Expr::Binary(op, lhs, rhs) => {
                let p = op.precedence();
                // comparisons always re-parenthesize their comparison
                // operands; everything else is left-associative
                let lhs_ctx = if p == 0 { 1 } else { p };
                frames.push(node(lhs, lhs_ctx));
                frames.push(text(format!(" {} ", op.token())));
                frames.push(node(rhs, p + 1));
            }
            Expr::Cond(cond, then, other) => {
                frames.push(node(cond, 3));
                frames.push(text(" ? "));
                frames.push(node(then, 0));
                frames.push(text(" : "));
                frames.push(node(other, 0));
            }
            Expr::Child(scope, key) => {
                frames.push(node(scope, 11));
                match &**key {
                    Expr::Literal(Term::Int(index)) if *index >= 0 => {
                        frames.push(text(format!(".{}", index)));
                    }
                    Expr::Literal(Term::Text(name)) if is_identifier(name) => {
                        frames.push(text(format!(".{}", name)));
                    }
                    _ => {
                        frames.push(text("["));
                        frames.push(node(key, 0));
                        frames.push(text("]"));
                    }
                }
            }
            Expr::Children(scope) => {
                frames.push(node(scope, 11));
                frames.push(text(".*"));
            }
            Expr::Descendants(scope) => {
                frames.push(node(scope, 11));
                frames.push(text(".**"));
            }
            Expr::Member(scope, name) => {
                frames.push(node(scope, 11));
                frames.push(text(format!("::{}", name)));
            }
            Expr::Filter(scope, predicate) => {
                frames.push(node(scope, 11));
                frames.push(text("[? "));
                frames.push(node(predicate, 0));
                frames.push(text("]"));
            }
            Expr::Invoke(func, args) => {
                match &**func {
                    Expr::Literal(Term::Text(name)) if is_identifier(name) => {
                        frames.push(text(name.clone()));
                    }
                    _ => frames.push(node(func, 11)),
                }
                frames.push(text("("));
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        frames.push(text(", "));
                    }
                    frames.push(node(arg, 0));
                }
                frames.push(text(")"));
            }
            Expr::Format(parts) => {
                frames.push(text("\""));
                for part in parts {
                    match part {
                        FormatPart::Text(part) => frames.push(text(escape_text(part))),
                        FormatPart::Embed(embed) => {
                            frames.push(text("{"));
                            frames.push(node(embed, 0));
                            frames.push(text("}"));
                        }
                    }
                }
                frames.push(text("\""));
            }
        }
        if parens {
            frames.push(text(")"));
        }
        self.push_frames(frames);
    }
}

fn text(text: impl Into<String>) -> WriteFrame {
    WriteFrame::Text(text.into(), 0)
}

fn node(expr: &Arc<Expr>, ctx: u8) -> WriteFrame {
    WriteFrame::Node(expr.clone(), ctx)
}

fn literal_source(term: &Term) -> String {
    match term {
        Term::Extant => "()".to_string(),
        Term::Bool(value) => value.to_string(),
        Term::Int(value) => value.to_string(),
        // Debug keeps the decimal point so floats re-parse as floats
        Term::Float(value) => format!("{:?}", value),
        Term::Text(value) => format!("\"{}\"", escape_text(value)),
        // records have no source literal form; rendering one is lossy
        Term::Record(_) => format!("\"{}\"", escape_text(&term.to_string())),
    }
}

/// Escapes text for inclusion in a quoted literal so that output re-parses
/// to an equal tree.
pub(crate) fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::parse_expr;
    use super::*;

    fn round_trip(source: &str) -> String {
        let expr = parse_expr(source).unwrap();
        let rendered = render(&expr);
        let reparsed = parse_expr(&rendered).unwrap();
        assert_eq!(reparsed, expr, "render of {:?} was {:?}", source, rendered);
        rendered
    }

    #[test]
    fn precedence_round_trip() {
        assert_eq!(round_trip("1 + 2 * 3"), "1 + 2 * 3");
        assert_eq!(round_trip("(1 + 2) * 3"), "(1 + 2) * 3");
        round_trip("1 - (2 - 3)");
        round_trip("%.a || %.b && %.c");
        round_trip("(1 < 2) == true");
        round_trip("-(1 + 2)");
        round_trip("%.a ? 1 : %.b ? 2 : 3");
        round_trip("(%.a ? 1 : 2) ? 3 : 4");
        round_trip("min(%.a, %.b + 1)");
        round_trip("%[? %.x >= 2].*");
        round_trip("(1 + 2).value");
        round_trip("%.0.1::unit");
        round_trip("~%.mask & 255");
    }

    #[test]
    fn child_sugar_forms() {
        assert_eq!(round_trip("%.name"), "%.name");
        assert_eq!(round_trip("%.0"), "%.0");
        assert_eq!(round_trip("%[\"odd key\"]"), "%[\"odd key\"]");
        assert_eq!(round_trip("%[-1]"), "%[-1]");
    }

    #[test]
    fn format_escape_round_trip() {
        let source = "\"\\{\\}\\n\\u0001{%.x}tail\"";
        let expr = parse_expr(source).unwrap();
        let rendered = render(&expr);
        assert_eq!(parse_expr(&rendered).unwrap(), expr);
        assert!(rendered.contains("\\u0001"));
        assert!(rendered.contains("\\{"));
        assert!(rendered.contains("\\n"));
    }

    #[test]
    fn resumable_writer_respects_budget() {
        let expr = parse_expr("%.alpha + %.beta * (%.gamma - 1)").unwrap();
        let full = render(&expr);
        for limit in 1..8 {
            let mut writer = ExprWriter::new(&expr);
            let mut out = String::new();
            let mut steps = 0;
            while writer.produce(&mut out, limit) == WriteStep::Full {
                steps += 1;
                assert!(steps < 10_000, "writer failed to make progress");
            }
            assert_eq!(out, full, "budget {}", limit);
        }
    }
}
