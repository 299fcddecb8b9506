//! Calculated field formulas
//!
//! Formulas are small arithmetic expressions over row fields, e.g.
//! `(customer_charge - carrier_pay) / customer_charge`. They are tokenized,
//! parsed by recursive descent into an [`Expr`], and evaluated against one
//! row at a time. Nothing outside `+ - * / ( )`, numbers and bare field
//! identifiers is accepted.
//!
//! Grammar:
//!   expr    --> term ( ("+" | "-") term )*
//!   term    --> unary ( ("*" | "/") unary )*
//!   unary   --> ("-" | "+") unary | primary
//!   primary --> NUMBER | IDENT | "(" expr ")"
//!
//! Every division is zero-guarded: a zero denominator makes the whole
//! formula evaluate to `None` rather than infinity.

use serde_json::{Number, Value};
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;
use tracing::warn;

use super::aggregate::numeric;
use super::definition::CalculatedField;
use super::Row;

/// Longest formula accepted, in bytes.
pub const MAX_FORMULA_LENGTH: usize = 4096;

/// Deepest nesting of parentheses and unary signs accepted by the parser.
pub const MAX_FORMULA_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: &'static str, found: String },
    #[error("formula is empty")]
    Empty,
    #[error("formula is longer than {} bytes", MAX_FORMULA_LENGTH)]
    TooLong,
    #[error("formula nests deeper than {} levels", MAX_FORMULA_DEPTH)]
    TooDeep,
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Ident(name) => write!(f, "identifier '{name}'"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::End => f.write_str("end of formula"),
        }
    }
}

struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            pos: 0,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.input.next();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn tokenize(mut self) -> Result<Vec<Token>, FormulaError> {
        let mut tokens = Vec::new();
        loop {
            while self.input.peek().is_some_and(|c| c.is_whitespace()) {
                self.bump();
            }
            let pos = self.pos;
            let token = match self.bump() {
                None => {
                    tokens.push(Token::End);
                    return Ok(tokens);
                }
                Some('+') => Token::Plus,
                Some('-') => Token::Minus,
                Some('*') => Token::Star,
                Some('/') => Token::Slash,
                Some('(') => Token::LParen,
                Some(')') => Token::RParen,
                Some(ch) if ch.is_ascii_digit() || ch == '.' => self.read_number(ch)?,
                Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => self.read_ident(ch),
                Some(ch) => return Err(FormulaError::UnexpectedChar { ch, pos }),
            };
            tokens.push(token);
        }
    }

    fn read_number(&mut self, first: char) -> Result<Token, FormulaError> {
        let mut text = String::from(first);
        while let Some(&ch) = self.input.peek() {
            if ch.is_ascii_digit() || ch == '.' {
                text.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| FormulaError::InvalidNumber(text))
    }

    fn read_ident(&mut self, first: char) -> Token {
        let mut name = String::from(first);
        while let Some(&ch) = self.input.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                name.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        Token::Ident(name)
    }
}

// ============================================================================
// AST + Parser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Field(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    // `tokens` always ends with `Token::End`; reading past it keeps returning End.
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn enter_scope(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_FORMULA_DEPTH {
            return Err(FormulaError::TooDeep);
        }
        Ok(())
    }

    fn exit_scope(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        let negate = match self.peek() {
            Token::Minus => true,
            Token::Plus => false,
            _ => return self.primary(),
        };
        self.advance();
        self.enter_scope()?;
        let operand = self.unary()?;
        self.exit_scope();
        Ok(if negate {
            Expr::Neg(Box::new(operand))
        } else {
            operand
        })
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Ident(name) => Ok(Expr::Field(name)),
            Token::LParen => {
                self.enter_scope()?;
                let inner = self.expr()?;
                self.exit_scope();
                match self.advance() {
                    Token::RParen => Ok(inner),
                    other => Err(FormulaError::UnexpectedToken {
                        expected: "')'",
                        found: other.to_string(),
                    }),
                }
            }
            other => Err(FormulaError::UnexpectedToken {
                expected: "a number, field or '('",
                found: other.to_string(),
            }),
        }
    }
}

/// Parse a formula string into an expression tree.
pub fn parse(formula: &str) -> Result<Expr, FormulaError> {
    if formula.len() > MAX_FORMULA_LENGTH {
        return Err(FormulaError::TooLong);
    }
    let tokens = Lexer::new(formula).tokenize()?;
    if tokens.len() == 1 {
        return Err(FormulaError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    match parser.advance() {
        Token::End => Ok(expr),
        other => Err(FormulaError::UnexpectedToken {
            expected: "an operator or end of formula",
            found: other.to_string(),
        }),
    }
}

impl Expr {
    /// Evaluate with `lookup` resolving field names (missing fields should
    /// resolve to 0). Returns `None` on a zero denominator or a non-finite
    /// result.
    pub fn eval(&self, lookup: &dyn Fn(&str) -> f64) -> Option<f64> {
        let value = self.eval_inner(lookup)?;
        value.is_finite().then_some(value)
    }

    fn eval_inner(&self, lookup: &dyn Fn(&str) -> f64) -> Option<f64> {
        match self {
            Expr::Number(n) => Some(*n),
            Expr::Field(name) => Some(lookup(name)),
            Expr::Neg(inner) => inner.eval_inner(lookup).map(|v| -v),
            Expr::Binary { op, lhs, rhs } => {
                let l = lhs.eval_inner(lookup)?;
                let r = rhs.eval_inner(lookup)?;
                match op {
                    BinaryOp::Add => Some(l + r),
                    BinaryOp::Sub => Some(l - r),
                    BinaryOp::Mul => Some(l * r),
                    BinaryOp::Div if r == 0.0 => None,
                    BinaryOp::Div => Some(l / r),
                }
            }
        }
    }

    /// Field names referenced by the expression, in first-use order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Field(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Neg(inner) => inner.collect_fields(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_fields(out);
                rhs.collect_fields(out);
            }
        }
    }
}

// ============================================================================
// Row application
// ============================================================================

/// Calculated fields parsed once per report, applied to every row.
#[derive(Debug, Clone, Default)]
pub struct CalculatedFields {
    fields: Vec<(String, Option<Expr>)>,
}

impl CalculatedFields {
    /// Formulas that fail to parse are kept and always produce `null`.
    pub fn compile(defs: &[CalculatedField]) -> Self {
        let fields = defs
            .iter()
            .map(|def| {
                let expr = match parse(&def.formula) {
                    Ok(expr) => Some(expr),
                    Err(e) => {
                        warn!(field = %def.name, formula = %def.formula, "calculated field will be null: {}", e);
                        None
                    }
                };
                (def.name.clone(), expr)
            })
            .collect();
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Expr>)> {
        self.fields.iter().map(|(n, e)| (n.as_str(), e.as_ref()))
    }

    /// Adds one derived field per formula. Later formulas may reference
    /// earlier derived fields.
    pub fn apply(&self, row: &mut Row) {
        for (name, expr) in &self.fields {
            let value = expr
                .as_ref()
                .and_then(|e| e.eval(&|field: &str| row.get(field).and_then(numeric).unwrap_or(0.0)))
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null);
            row.insert(name.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn eval(formula: &str, value: Value) -> Option<f64> {
        let r = row(value);
        parse(formula)
            .unwrap()
            .eval(&|f: &str| r.get(f).and_then(numeric).unwrap_or(0.0))
    }

    #[test]
    fn respects_precedence_and_parentheses() {
        assert_eq!(eval("1 + 2 * 3", json!({})), Some(7.0));
        assert_eq!(eval("(1 + 2) * 3", json!({})), Some(9.0));
        assert_eq!(eval("10 - 4 - 3", json!({})), Some(3.0));
        assert_eq!(eval("-2 * -3", json!({})), Some(6.0));
        assert_eq!(eval("12 / 4 / 3", json!({})), Some(1.0));
    }

    #[test]
    fn resolves_fields_and_coerces_missing_to_zero() {
        let v = json!({ "customer_charge": 1500, "carrier_pay": "1200.5", "weight": null });
        assert_eq!(eval("customer_charge - carrier_pay", v.clone()), Some(299.5));
        assert_eq!(eval("weight + fuel_surcharge + 1", v), Some(1.0));
    }

    #[test]
    fn zero_denominator_yields_none() {
        let v = json!({ "margin": 100, "customer_charge": 0 });
        assert_eq!(eval("margin / customer_charge", v.clone()), None);
        assert_eq!(eval("margin / missing_field * 100", v.clone()), None);
        assert_eq!(eval("1 + margin / (customer_charge * 2)", v), None);
    }

    #[test]
    fn rejects_anything_but_arithmetic() {
        assert!(parse("process.exit(1)").is_err());
        assert!(matches!(
            parse("a % b"),
            Err(FormulaError::UnexpectedChar { ch: '%', pos: 2 })
        ));
        assert!(parse("a; b").is_err());
        assert!(parse("a ** b").is_err());
        assert!(parse("1.2.3").is_err());
        assert!(parse("(a + b").is_err());
        assert!(parse("a b").is_err());
        assert_eq!(parse("   "), Err(FormulaError::Empty));
    }

    #[test]
    fn lists_referenced_fields_once() {
        let expr = parse("(a - b) / a + c").unwrap();
        assert_eq!(expr.fields(), vec!["a", "b", "c"]);
    }

    #[test]
    fn apply_chains_formulas_and_writes_null_on_failure() {
        let fields = CalculatedFields::compile(&[
            CalculatedField {
                name: "margin".into(),
                formula: "customer_charge - carrier_pay".into(),
            },
            CalculatedField {
                name: "margin_pct".into(),
                formula: "margin / customer_charge * 100".into(),
            },
            CalculatedField {
                name: "broken".into(),
                formula: "margin +".into(),
            },
        ]);

        let mut r = row(json!({ "customer_charge": 200, "carrier_pay": 150 }));
        fields.apply(&mut r);
        assert_eq!(r["margin"], json!(50.0));
        assert_eq!(r["margin_pct"], json!(25.0));
        assert_eq!(r["broken"], Value::Null);

        let mut zero = row(json!({ "customer_charge": 0, "carrier_pay": 0 }));
        fields.apply(&mut zero);
        assert_eq!(zero["margin"], json!(0.0));
        assert_eq!(zero["margin_pct"], Value::Null);
    }

    #[test]
    fn deeply_nested_formulas_are_rejected_not_evaluated() {
        let nested = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(parse(&nested).is_err());

        let deep = format!("{}1{}", "(".repeat(MAX_FORMULA_DEPTH + 1), ")".repeat(MAX_FORMULA_DEPTH + 1));
        assert_eq!(parse(&deep), Err(FormulaError::TooDeep));
        assert_eq!(parse(&format!("{}x", "-".repeat(MAX_FORMULA_DEPTH + 1))), Err(FormulaError::TooDeep));

        let shallow = format!("{}2{}", "(".repeat(MAX_FORMULA_DEPTH), ")".repeat(MAX_FORMULA_DEPTH));
        assert!(parse(&shallow).is_ok());

        let fields = CalculatedFields::compile(&[
            CalculatedField {
                name: "nested".into(),
                formula: nested,
            },
            CalculatedField {
                name: "chain".into(),
                formula: vec!["miles"; 5_000].join(" + "),
            },
        ]);
        let mut r = row(json!({ "miles": 10 }));
        fields.apply(&mut r);
        assert_eq!(r["nested"], Value::Null);
        assert_eq!(r["chain"], Value::Null);
    }
}
