//! Linker script expression evaluation.
//!
//! An operator-precedence parser for the arithmetic expressions that
//! appear on the right-hand side of assignments inside `SECTIONS`
//! (e.g. `. = ALIGN(0x1000) + 0x100`). Each expression is evaluated by
//! a fresh `ExprParser` over its token run and the current location
//! counter. Errors are reported to the diagnostic sink and evaluation
//! yields 0 so later expressions can still be checked.

use crate::arch::Architecture;
use crate::diag::Diagnostics;
use crate::tokenizer::TokenStream;
use crate::utils::{align_up, parse_int};

/// Evaluate a token run against the current location counter.
pub fn eval_expr<A: Architecture>(
    tokens: &[String],
    dot: u64,
    arch: &A,
    diag: &mut Diagnostics,
) -> u64 {
    ExprParser {
        tokens: TokenStream::new(tokens.to_vec()),
        dot,
        page_size: arch.page_size(),
        diag,
    }
    .run()
}

fn precedence(op: &str) -> i32 {
    match op {
        "*" | "/" => 4,
        "+" | "-" => 3,
        "<" | ">" | ">=" | "<=" | "==" | "!=" => 2,
        "&" => 1,
        _ => -1,
    }
}

struct ExprParser<'a> {
    tokens: TokenStream,
    dot: u64,
    page_size: u64,
    diag: &'a mut Diagnostics,
}

impl ExprParser<'_> {
    fn run(&mut self) -> u64 {
        let value = self.parse_expr();
        if !self.tokens.at_eof() && !self.tokens.failed() {
            let msg = format!("stray token: {}", self.tokens.peek());
            self.tokens.set_error(self.diag, msg);
        }
        value
    }

    fn parse_expr(&mut self) -> u64 {
        let lhs = self.parse_primary();
        self.parse_expr1(lhs, 0)
    }

    /// Precedence-climbing loop. Assumes the remaining stream starts
    /// with an operator.
    fn parse_expr1(&mut self, mut lhs: u64, min_prec: i32) -> u64 {
        while !self.tokens.at_eof() && !self.tokens.failed() {
            let op1 = self.tokens.peek().to_string();
            if op1 == "?" {
                return self.parse_ternary(lhs);
            }
            let prec1 = precedence(&op1);
            if prec1 < min_prec {
                return lhs;
            }
            self.tokens.next(self.diag);
            let mut rhs = self.parse_primary();

            // Reduce the right side first while the upcoming operator
            // binds tighter, e.g. the `3 * 4` in `2 + 3 * 4`.
            while !self.tokens.at_eof() {
                let prec2 = precedence(self.tokens.peek());
                if prec2 <= prec1 {
                    break;
                }
                rhs = self.parse_expr1(rhs, prec2);
            }

            lhs = self.apply(&op1, lhs, rhs);
        }
        lhs
    }

    /// An integer literal, `.`, a parenthesized expression, or one of
    /// the builtin functions (`ALIGN`, `CONSTANT`, `DATA_SEGMENT_*`).
    fn parse_primary(&mut self) -> u64 {
        let tok = self.tokens.next(self.diag);
        match tok.as_str() {
            "." => self.dot,
            "(" => {
                let value = self.parse_expr();
                self.tokens.expect(")", self.diag);
                value
            }
            "ALIGN" => {
                self.tokens.expect("(", self.diag);
                let value = self.parse_expr();
                self.tokens.expect(")", self.diag);
                align_up(self.dot, value)
            }
            "CONSTANT" => {
                self.tokens.expect("(", self.diag);
                let name = self.tokens.next(self.diag);
                self.tokens.expect(")", self.diag);
                self.constant_value(&name)
            }
            // Only the single-strategy form is computed: align to the
            // first argument and keep Dot's offset within it. The second
            // argument (the page-count optimization) is parsed and
            // discarded.
            "DATA_SEGMENT_ALIGN" => {
                self.tokens.expect("(", self.diag);
                let max_page = self.parse_expr();
                self.tokens.expect(",", self.diag);
                self.parse_expr();
                self.tokens.expect(")", self.diag);
                align_up(self.dot, max_page) + (self.dot & max_page.wrapping_sub(1))
            }
            "DATA_SEGMENT_END" => {
                self.tokens.expect("(", self.diag);
                self.tokens.expect(".", self.diag);
                self.tokens.expect(")", self.diag);
                self.dot
            }
            _ => match parse_int(&tok) {
                Some(value) => value,
                None => {
                    let msg = format!("malformed number: {tok}");
                    self.tokens.set_error(self.diag, msg);
                    0
                }
            },
        }
    }

    /// `cond ? a : b`. Both branches are parsed; the condition picks
    /// the result.
    fn parse_ternary(&mut self, cond: u64) -> u64 {
        self.tokens.next(self.diag);
        let v = self.parse_expr();
        self.tokens.expect(":", self.diag);
        let w = self.parse_expr();
        if cond != 0 {
            v
        } else {
            w
        }
    }

    fn constant_value(&mut self, name: &str) -> u64 {
        match name {
            "COMMONPAGESIZE" | "MAXPAGESIZE" => self.page_size,
            _ => {
                self.diag.error(format!("unknown constant: {name}"));
                0
            }
        }
    }

    fn apply(&mut self, op: &str, l: u64, r: u64) -> u64 {
        match op {
            "*" => l.wrapping_mul(r),
            "/" => {
                if r == 0 {
                    self.diag.error("division by zero");
                    return 0;
                }
                l / r
            }
            "+" => l.wrapping_add(r),
            "-" => l.wrapping_sub(r),
            "<" => (l < r) as u64,
            ">" => (l > r) as u64,
            ">=" => (l >= r) as u64,
            "<=" => (l <= r) as u64,
            "==" => (l == r) as u64,
            "!=" => (l != r) as u64,
            "&" => l & r,
            _ => unreachable!("operator {op} has no precedence"),
        }
    }
}
