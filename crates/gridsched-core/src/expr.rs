//! Price expression evaluation.
//!
//! MINPRICE and MAXPRICE values are small arithmetic expressions. Three
//! evaluation paths are tried in order:
//!
//! 1. A bare literal matching `^[0-9.]+$` is converted directly.
//! 2. Plain arithmetic matching `^[0-9.()+*/-]+$` goes through the simple
//!    evaluator, which accepts only numbers, `+ - * / ** //` and parentheses.
//! 3. Anything else is evaluated in math mode: names are resolved from the
//!    caller's bindings first, then from the math constants and functions.
//!
//! Evaluation never panics. Failures surface as [`ExprError`] from
//! [`PriceEvaluator::eval`], or as [`Price::Illegal`] from
//! [`PriceEvaluator::eval_price`].

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, error};

/// Sentinel reported for prices that failed to evaluate.
pub const ILLEGAL_PRICE: f64 = -42.0;

/// Variable bindings available to an expression.
pub type Bindings = HashMap<String, f64>;

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected token at offset {0}")]
    UnexpectedToken(usize),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("invalid number literal {0:?}")]
    BadNumber(String),

    #[error("name {0:?} is not allowed in simple arithmetic")]
    NameNotAllowed(String),

    #[error("unknown name {0:?}")]
    UnknownName(String),

    #[error("function {name} called with {got} argument(s)")]
    Arity { name: String, got: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NotFinite,

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type ExprResult<T> = Result<T, ExprError>;

/// Outcome of a price evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Price {
    /// A non-negative price.
    Value(f64),
    /// The expression could not be evaluated.
    Illegal,
}

impl Price {
    /// Numeric form, using [`ILLEGAL_PRICE`] for failures.
    pub fn as_f64(self) -> f64 {
        match self {
            Price::Value(v) => v,
            Price::Illegal => ILLEGAL_PRICE,
        }
    }

    pub fn is_illegal(self) -> bool {
        matches!(self, Price::Illegal)
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Price::Value(v) => Some(v),
            Price::Illegal => None,
        }
    }
}

/// Evaluator holding the pre-compiled fast-path patterns.
#[derive(Debug, Clone)]
pub struct PriceEvaluator {
    float_re: Regex,
    simple_re: Regex,
}

impl PriceEvaluator {
    pub fn new() -> ExprResult<Self> {
        Ok(Self {
            float_re: Regex::new(r"^[0-9.]+$")?,
            simple_re: Regex::new(r"^[0-9.()+*/-]+$")?,
        })
    }

    /// Evaluate `expr` with the given bindings.
    pub fn eval(&self, expr: &str, bindings: &Bindings) -> ExprResult<f64> {
        let value = if self.float_re.is_match(expr) {
            expr.parse::<f64>()
                .map_err(|_| ExprError::BadNumber(expr.to_string()))?
        } else if self.simple_re.is_match(expr) {
            Parser::new(expr, Mode::Simple, bindings)?.parse()?
        } else {
            Parser::new(expr, Mode::Math, bindings)?.parse()?
        };
        if !value.is_finite() {
            return Err(ExprError::NotFinite);
        }
        Ok(value)
    }

    /// Evaluate a price expression. Negative results clamp to zero and
    /// failures map to [`Price::Illegal`].
    pub fn eval_price(&self, expr: &str, bindings: &Bindings) -> Price {
        match self.eval(expr, bindings) {
            Ok(v) if v < 0.0 => {
                debug!(%expr, value = v, "negative price treated as zero");
                Price::Value(0.0)
            }
            Ok(v) => Price::Value(v),
            Err(e) => {
                error!(%expr, error = %e, "illegal price expression");
                Price::Illegal
            }
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Name(String),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    FloorDiv,
    LParen,
    RParen,
    Comma,
}

fn tokenize(src: &str) -> ExprResult<Vec<(Token, usize)>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent suffix, only when digits follow.
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::BadNumber(text.clone()))?;
                tokens.push((Token::Num(value), start));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push((Token::Name(name), start));
                continue;
            }
            '+' => tokens.push((Token::Plus, start)),
            '-' => tokens.push((Token::Minus, start)),
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 1;
                tokens.push((Token::Pow, start));
            }
            '*' => tokens.push((Token::Star, start)),
            '/' if chars.get(i + 1) == Some(&'/') => {
                i += 1;
                tokens.push((Token::FloorDiv, start));
            }
            '/' => tokens.push((Token::Slash, start)),
            '(' => tokens.push((Token::LParen, start)),
            ')' => tokens.push((Token::RParen, start)),
            ',' => tokens.push((Token::Comma, start)),
            other => return Err(ExprError::UnexpectedChar(other, start)),
        }
        i += 1;
    }

    Ok(tokens)
}

// ── Recursive-descent evaluator ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Simple,
    Math,
}

struct Parser<'a> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    mode: Mode,
    bindings: &'a Bindings,
}

impl<'a> Parser<'a> {
    fn new(src: &str, mode: Mode, bindings: &'a Bindings) -> ExprResult<Self> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        Ok(Self {
            tokens,
            pos: 0,
            mode,
            bindings,
        })
    }

    fn parse(mut self) -> ExprResult<f64> {
        let value = self.expr()?;
        match self.tokens.get(self.pos) {
            None => Ok(value),
            Some((_, offset)) => Err(ExprError::UnexpectedToken(*offset)),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> ExprResult<(Token, usize)> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, want: Token) -> ExprResult<()> {
        let (tok, offset) = self.next()?;
        if tok == want {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken(offset))
        }
    }

    fn expr(&mut self) -> ExprResult<f64> {
        let mut acc = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    acc += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    acc -= self.term()?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn term(&mut self) -> ExprResult<f64> {
        let mut acc = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    acc *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    acc /= rhs;
                }
                Some(Token::FloorDiv) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    acc = (acc / rhs).floor();
                }
                _ => return Ok(acc),
            }
        }
    }

    fn unary(&mut self) -> ExprResult<f64> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // `**` binds tighter than a unary minus on its left and is right-associative.
    fn power(&mut self) -> ExprResult<f64> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Pow) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> ExprResult<f64> {
        let (tok, offset) = self.next()?;
        match tok {
            Token::Num(v) => Ok(v),
            Token::LParen => {
                let v = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(v)
            }
            Token::Name(name) => {
                if self.mode == Mode::Simple {
                    return Err(ExprError::NameNotAllowed(name));
                }
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    return call(&name, &args);
                }
                if let Some(v) = self.bindings.get(&name) {
                    return Ok(*v);
                }
                match name.as_str() {
                    "pi" => Ok(std::f64::consts::PI),
                    "e" => Ok(std::f64::consts::E),
                    _ => Err(ExprError::UnknownName(name)),
                }
            }
            _ => Err(ExprError::UnexpectedToken(offset)),
        }
    }

    fn arguments(&mut self) -> ExprResult<Vec<f64>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            let (tok, offset) = self.next()?;
            match tok {
                Token::Comma => continue,
                Token::RParen => return Ok(args),
                _ => return Err(ExprError::UnexpectedToken(offset)),
            }
        }
    }
}

fn call(name: &str, args: &[f64]) -> ExprResult<f64> {
    let arity = |n: usize| -> ExprResult<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(ExprError::Arity {
                name: name.to_string(),
                got: args.len(),
            })
        }
    };

    match name {
        "sin" => arity(1).map(|_| args[0].sin()),
        "cos" => arity(1).map(|_| args[0].cos()),
        "exp" => arity(1).map(|_| args[0].exp()),
        "ceil" => arity(1).map(|_| args[0].ceil()),
        "floor" => arity(1).map(|_| args[0].floor()),
        "fabs" | "abs" => arity(1).map(|_| args[0].abs()),
        "sqrt" => arity(1).map(|_| args[0].sqrt()),
        "log10" => arity(1).map(|_| args[0].log10()),
        "log" => match args {
            [x] => Ok(x.ln()),
            [x, base] => Ok(x.ln() / base.ln()),
            _ => Err(ExprError::Arity {
                name: name.to_string(),
                got: args.len(),
            }),
        },
        "round" => match args {
            [x] => Ok(x.round()),
            [x, digits] => {
                let scale = 10f64.powi(*digits as i32);
                Ok((x * scale).round() / scale)
            }
            _ => Err(ExprError::Arity {
                name: name.to_string(),
                got: args.len(),
            }),
        },
        "fmod" => {
            arity(2)?;
            if args[1] == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            Ok(args[0] % args[1])
        }
        "pow" => arity(2).map(|_| args[0].powf(args[1])),
        "min" | "max" => {
            if args.is_empty() {
                return Err(ExprError::Arity {
                    name: name.to_string(),
                    got: 0,
                });
            }
            let fold = if name == "min" { f64::min } else { f64::max };
            Ok(args[1..].iter().copied().fold(args[0], fold))
        }
        // No sequence literals, so the arguments are the sequence.
        "sum" => Ok(args.iter().sum()),
        "cmp" => {
            arity(2)?;
            Ok(match args[0].partial_cmp(&args[1]) {
                Some(std::cmp::Ordering::Less) => -1.0,
                Some(std::cmp::Ordering::Greater) => 1.0,
                _ => 0.0,
            })
        }
        _ => Err(ExprError::UnknownName(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> ExprResult<f64> {
        PriceEvaluator::new().unwrap().eval(expr, &Bindings::new())
    }

    fn price(expr: &str, bindings: &[(&str, f64)]) -> Price {
        let map: Bindings = bindings
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        PriceEvaluator::new().unwrap().eval_price(expr, &map)
    }

    #[test]
    fn literal_fast_path() {
        assert_eq!(eval("42").unwrap(), 42.0);
        assert_eq!(eval("0.5").unwrap(), 0.5);
        assert!(matches!(eval("1.2.3"), Err(ExprError::BadNumber(_))));
    }

    #[test]
    fn simple_arithmetic_precedence() {
        assert_eq!(eval("1+2*3").unwrap(), 7.0);
        assert_eq!(eval("(1+2)*3").unwrap(), 9.0);
        assert_eq!(eval("7/2").unwrap(), 3.5);
        assert_eq!(eval("7//2").unwrap(), 3.0);
        assert_eq!(eval("-2**2").unwrap(), -4.0);
        assert_eq!(eval("2**3**2").unwrap(), 512.0);
        assert_eq!(eval("10-4-3").unwrap(), 3.0);
    }

    #[test]
    fn division_by_zero_fails() {
        assert!(matches!(eval("1/0"), Err(ExprError::DivisionByZero)));
    }

    #[test]
    fn malformed_expressions_fail() {
        assert!(eval("(1+2").is_err());
        assert!(eval("1+").is_err());
        assert!(eval("").is_err());
        assert!(matches!(eval("2 $ 3"), Err(ExprError::UnexpectedChar('$', 2))));
    }

    #[test]
    fn bindings_resolve_in_math_mode() {
        let p = price("10 + hour * 2", &[("hour", 3.0)]);
        assert_eq!(p, Price::Value(16.0));
    }

    #[test]
    fn runtime_env_names_with_dots() {
        let p = price("5 + 10*POVRAY3.6", &[("POVRAY3.6", 1.0)]);
        assert_eq!(p, Price::Value(15.0));
    }

    #[test]
    fn math_functions() {
        assert_eq!(eval("max(1, 5, 3)").unwrap(), 5.0);
        assert_eq!(eval("min(4, 2)").unwrap(), 2.0);
        assert_eq!(eval("floor(2.7)").unwrap(), 2.0);
        assert_eq!(eval("exp(0)").unwrap(), 1.0);
        assert_eq!(eval("pow(2, 10)").unwrap(), 1024.0);
        assert!((eval("log(e)").unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sum_and_cmp() {
        assert_eq!(eval("sum(1, 2, 3.5)").unwrap(), 6.5);
        assert_eq!(eval("sum()").unwrap(), 0.0);
        assert_eq!(eval("cmp(1, 2)").unwrap(), -1.0);
        assert_eq!(eval("cmp(3, 3)").unwrap(), 0.0);
        assert_eq!(eval("10 + 5 * cmp(7, 2)").unwrap(), 15.0);
        assert!(matches!(eval("cmp(1)"), Err(ExprError::Arity { .. })));
    }

    #[test]
    fn exec_delay_maxprice() {
        let p = price("100 - exec_delay / 60", &[("exec_delay", 600.0)]);
        assert_eq!(p, Price::Value(90.0));
    }

    #[test]
    fn unknown_name_is_illegal() {
        assert_eq!(price("foo * 2", &[]), Price::Illegal);
        assert_eq!(price("foo * 2", &[]).as_f64(), ILLEGAL_PRICE);
    }

    #[test]
    fn negative_result_clamps_to_zero() {
        assert_eq!(price("1-5", &[]), Price::Value(0.0));
    }

    #[test]
    fn overflow_is_illegal() {
        assert_eq!(price("exp(100000)", &[]), Price::Illegal);
    }

    #[test]
    fn names_rejected_in_simple_mode() {
        let bindings = Bindings::new();
        let parser = Parser::new("1+x", Mode::Simple, &bindings).unwrap();
        assert!(matches!(parser.parse(), Err(ExprError::NameNotAllowed(_))));
    }

    #[test]
    fn wrong_arity_fails() {
        assert!(matches!(eval("sqrt(1, 2)"), Err(ExprError::Arity { .. })));
    }
}
