//! Formula-driven hyperparameters.
//!
//! Several knobs (sampling deviation, reinforcement rule, dissipation rate, split
//! probability, layer preference) are configured as arithmetic formulas over a
//! fixed set of live [`Variable`]s. Formulas are parsed once into [`Expr`] trees
//! and validated against the variables each [`FormulaId`] binds, so a typo in a
//! variable name fails at startup instead of in the sampling loop.
//!
//! Grammar (usual precedence, `^` binds tighter than unary minus and is right
//! associative):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | power
//! power   := primary ('^' unary)?
//! primary := number | variable | function '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FormulaConfig;
use crate::error::ConfigError;

/// A live quantity a formula may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variable {
    /// Pheromone strength of the entry being sampled or reinforced, in `[0, 1]`.
    Strength,
    /// Number of alternative decisions at the sampled position.
    Decisions,
    /// Current number of population members.
    PopulationSize,
    /// Number of population members that observed the sampled position.
    Observed,
    /// Standard deviation of the observed values at the sampled position.
    Deviation,
    /// Layer index of the neuron (or source neuron) involved.
    Layer,
    /// Number of layers in the network.
    Depth,
    /// A fresh uniform draw in `[0, 1)`.
    Random,
    /// Iteration counter of the owning colony or population.
    Iteration,
}

impl Variable {
    /// Every variable, in binding-slot order.
    pub const ALL: [Self; 9] = [
        Self::Strength,
        Self::Decisions,
        Self::PopulationSize,
        Self::Observed,
        Self::Deviation,
        Self::Layer,
        Self::Depth,
        Self::Random,
        Self::Iteration,
    ];

    /// Name used in formula text.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Strength => "strength",
            Self::Decisions => "decisions",
            Self::PopulationSize => "population_size",
            Self::Observed => "observed",
            Self::Deviation => "deviation",
            Self::Layer => "layer",
            Self::Depth => "depth",
            Self::Random => "random",
            Self::Iteration => "iteration",
        }
    }

    /// Look a variable up by its formula name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }

    #[inline]
    const fn slot(self) -> usize {
        self as usize
    }
}

/// Values bound to variables for one evaluation. Unset variables read as `0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bindings {
    values: [f64; Variable::ALL.len()],
}

impl Bindings {
    /// Empty bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style bind.
    #[must_use]
    pub fn with(mut self, variable: Variable, value: f64) -> Self {
        self.set(variable, value);
        self
    }

    /// Bind `variable` to `value`.
    pub fn set(&mut self, variable: Variable, value: f64) {
        self.values[variable.slot()] = value;
    }

    /// Current value of `variable`.
    #[must_use]
    pub fn get(&self, variable: Variable) -> f64 {
        self.values[variable.slot()]
    }
}

/// Errors raised while parsing or validating a formula.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// A character that starts no token.
    #[error("unexpected character `{found}` at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },
    /// The formula ended mid-expression.
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    /// A token in a position the grammar does not allow.
    #[error("unexpected `{found}` at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },
    /// A numeric literal that does not parse.
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    /// An identifier that is not a known variable.
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    /// An identifier followed by `(` that is not a known function.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    /// A function called with the wrong number of arguments.
    #[error("`{function}` takes {expected} argument(s), got {got}")]
    Arity {
        function: &'static str,
        expected: usize,
        got: usize,
    },
    /// A known variable that this formula slot does not bind.
    #[error("variable `{0}` is not available in this formula")]
    UnboundVariable(&'static str),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sqrt,
    Exp,
    Ln,
    Abs,
    Min,
    Max,
    Pow,
    Clamp,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sqrt" => Self::Sqrt,
            "exp" => Self::Exp,
            "ln" => Self::Ln,
            "abs" => Self::Abs,
            "min" => Self::Min,
            "max" => Self::Max,
            "pow" => Self::Pow,
            "clamp" => Self::Clamp,
            _ => return None,
        })
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Abs => "abs",
            Self::Min => "min",
            Self::Max => "max",
            Self::Pow => "pow",
            Self::Clamp => "clamp",
        }
    }

    const fn arity(self) -> usize {
        match self {
            Self::Sqrt | Self::Exp | Self::Ln | Self::Abs => 1,
            Self::Min | Self::Max | Self::Pow => 2,
            Self::Clamp => 3,
        }
    }
}

/// A parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(Variable),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Parse formula text.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpressionError`] on malformed input, unknown identifiers or
    /// wrong function arity.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(expr),
            Some((token, offset)) => Err(ExpressionError::UnexpectedToken {
                found: token.to_string(),
                offset: *offset,
            }),
        }
    }

    /// Evaluate against `bindings`.
    #[must_use]
    pub fn eval(&self, bindings: &Bindings) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Variable(v) => bindings.get(*v),
            Self::Negate(inner) => -inner.eval(bindings),
            Self::Binary { op, lhs, rhs } => {
                let (a, b) = (lhs.eval(bindings), rhs.eval(bindings));
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Pow => a.powf(b),
                }
            }
            Self::Call { function, args } => {
                let arg = |i: usize| args[i].eval(bindings);
                match function {
                    Function::Sqrt => arg(0).sqrt(),
                    Function::Exp => arg(0).exp(),
                    Function::Ln => arg(0).ln(),
                    Function::Abs => arg(0).abs(),
                    Function::Min => arg(0).min(arg(1)),
                    Function::Max => arg(0).max(arg(1)),
                    Function::Pow => arg(0).powf(arg(1)),
                    Function::Clamp => {
                        let (x, lo, hi) = (arg(0), arg(1), arg(2));
                        x.max(lo).min(hi)
                    }
                }
            }
        }
    }

    /// Whether `variable` appears anywhere in the tree.
    #[must_use]
    pub fn references(&self, variable: Variable) -> bool {
        match self {
            Self::Number(_) => false,
            Self::Variable(v) => *v == variable,
            Self::Negate(inner) => inner.references(variable),
            Self::Binary { lhs, rhs, .. } => lhs.references(variable) || rhs.references(variable),
            Self::Call { args, .. } => args.iter().any(|a| a.references(variable)),
        }
    }

    /// Variables referenced by the tree, each once, in [`Variable::ALL`] order.
    #[must_use]
    pub fn variables(&self) -> Vec<Variable> {
        Variable::ALL
            .into_iter()
            .filter(|v| self.references(*v))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Ident(s) => f.write_str(s),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::Caret => f.write_str("^"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::Comma => f.write_str(","),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push((token, offset));
            i += 1;
            continue;
        }

        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            // Exponent: 1e-3, 2.5E+4
            if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                let mut j = i + 1;
                if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].1.is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| ExpressionError::InvalidNumber(text.clone()))?;
            tokens.push((Token::Number(value), offset));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
            tokens.push((Token::Ident(text), offset));
        } else {
            return Err(ExpressionError::UnexpectedChar { found: c, offset });
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Result<(Token, usize), ExpressionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExpressionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        let (token, offset) = self.next()?;
        if &token == expected {
            Ok(())
        } else {
            Err(ExpressionError::UnexpectedToken {
                found: token.to_string(),
                offset,
            })
        }
    }

    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let (token, offset) = self.next()?;
        match token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let function = Function::from_name(&name)
                        .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        args.push(self.expr()?);
                        while self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                            args.push(self.expr()?);
                        }
                    }
                    self.expect(&Token::RParen)?;
                    if args.len() != function.arity() {
                        return Err(ExpressionError::Arity {
                            function: function.name(),
                            expected: function.arity(),
                            got: args.len(),
                        });
                    }
                    Ok(Expr::Call { function, args })
                } else {
                    Variable::from_name(&name)
                        .map(Expr::Variable)
                        .ok_or(ExpressionError::UnknownVariable(name))
                }
            }
            other => Err(ExpressionError::UnexpectedToken {
                found: other.to_string(),
                offset,
            }),
        }
    }
}

/// The formula slots the engine evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormulaId {
    /// Standard deviation when sampling from a dissipative pheromone entry.
    Deviation,
    /// New strength of a reinforced entry.
    Update,
    /// Fraction of strength lost per decay step.
    Dissipation,
    /// Standard deviation when sampling from population statistics.
    PopulationDeviation,
    /// Probability that a growth step splits a connection.
    SplitProbability,
    /// Relative preference for growing at a given layer.
    LayerSelection,
}

impl FormulaId {
    /// Every formula slot, in storage order.
    pub const ALL: [Self; 6] = [
        Self::Deviation,
        Self::Update,
        Self::Dissipation,
        Self::PopulationDeviation,
        Self::SplitProbability,
        Self::LayerSelection,
    ];

    /// Configuration key of the slot.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Deviation => "deviation",
            Self::Update => "update",
            Self::Dissipation => "dissipation",
            Self::PopulationDeviation => "population_deviation",
            Self::SplitProbability => "split_probability",
            Self::LayerSelection => "layer_selection",
        }
    }

    /// Variables bound when this slot is evaluated.
    #[must_use]
    pub const fn allowed(self) -> &'static [Variable] {
        use Variable::*;
        match self {
            Self::Deviation => &[Strength, Decisions, Layer, Depth, Random, Iteration],
            Self::Update => &[Strength, Random],
            Self::Dissipation => &[Depth, Random, Iteration],
            Self::PopulationDeviation => {
                &[Deviation, Observed, PopulationSize, Layer, Depth, Random]
            }
            Self::SplitProbability => &[Depth, Random, Iteration],
            Self::LayerSelection => &[Layer, Depth, Random],
        }
    }

    fn source(self, config: &FormulaConfig) -> &str {
        match self {
            Self::Deviation => &config.deviation,
            Self::Update => &config.update,
            Self::Dissipation => &config.dissipation,
            Self::PopulationDeviation => &config.population_deviation,
            Self::SplitProbability => &config.split_probability,
            Self::LayerSelection => &config.layer_selection,
        }
    }
}

/// The compiled set of configured formulas.
#[derive(Debug, Clone)]
pub struct Formulas {
    exprs: Vec<Expr>,
}

impl Formulas {
    /// Parse and validate every formula in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Formula`] naming the first slot that fails to parse
    /// or that references a variable its slot does not bind.
    pub fn compile(config: &FormulaConfig) -> Result<Self, ConfigError> {
        let mut exprs = Vec::with_capacity(FormulaId::ALL.len());
        for id in FormulaId::ALL {
            let wrap = |source| ConfigError::Formula {
                formula: id.name(),
                source,
            };
            let expr = Expr::parse(id.source(config)).map_err(wrap)?;
            if let Some(unbound) = expr
                .variables()
                .into_iter()
                .find(|v| !id.allowed().contains(v))
            {
                return Err(wrap(ExpressionError::UnboundVariable(unbound.name())));
            }
            exprs.push(expr);
        }
        Ok(Self { exprs })
    }

    /// The compiled tree of a slot.
    #[must_use]
    pub fn expr(&self, id: FormulaId) -> &Expr {
        &self.exprs[id as usize]
    }

    /// Evaluate a slot. Returns `None` when the result is not finite.
    #[must_use]
    pub fn evaluate(&self, id: FormulaId, bindings: &Bindings) -> Option<f64> {
        let value = self.expr(id).eval(bindings);
        value.is_finite().then_some(value)
    }

    /// Evaluate a slot, drawing `random` from `rng` if the formula uses it.
    pub fn evaluate_with<R: Rng>(
        &self,
        id: FormulaId,
        mut bindings: Bindings,
        rng: &mut R,
    ) -> Option<f64> {
        if self.expr(id).references(Variable::Random) {
            bindings.set(Variable::Random, rng.random::<f64>());
        }
        self.evaluate(id, &bindings)
    }
}
