use std::fmt;

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Span;

/// A name. Generally columns, macro variables and functions.
pub type Ident = String;

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub item: Item,
    #[serde(skip)]
    pub span: Option<Span>,
}

/// The closed set of rule constructs.
#[derive(Debug, EnumAsInner, PartialEq, Clone, Serialize, Deserialize)]
pub enum Item {
    /// `dN` — one level of the domain name, starting at the TLD.
    DomainLevel(u32),
    /// `lN` — the character length of one domain level.
    DomainLevelLength(u32),
    Ident(Ident),
    Integer(i64),
    Float(f64),
    /// Single-quoted literal; the quotes are part of the payload.
    String(String),
    Boolean(bool),
    Interval(Interval),
    FuncCall(FuncCall),
    InExpr(InExpr),
    CountExpr(CountExpr),
    ForExpr(ForExpr),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    /// `{p, …}` — the conjunction of predicates forming one layer.
    PredicateSet(Vec<Node>),
    /// `{…},{…},…` — layers, innermost first.
    PredicateList(Vec<Node>),
}

/// A time span, normalised to whole hours plus 0..60 minutes.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct Interval {
    pub hours: i64,
    pub minutes: i64,
}

impl Interval {
    /// Normalise a raw hour/minute reading; fractional parts carry over
    /// (`1.5h` ≡ `1h 30m`), sub-second remainders are truncated.
    pub fn new(hours: f64, minutes: f64) -> Self {
        let total = (hours * 3600.0 + minutes * 60.0) as i64;
        Interval {
            hours: total / 3600,
            minutes: (total / 60) % 60,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FuncCall {
    pub name: Ident,
    pub args: Vec<Node>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InExpr {
    pub left: Box<Node>,
    pub items: Enumeration,
}

/// A partitioned, optionally windowed count of a boolean predicate.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CountExpr {
    pub group: Vec<Ident>,
    pub window: Option<Interval>,
    pub pred: Box<Node>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ForExpr {
    pub var: Ident,
    pub items: Enumeration,
    pub body: Box<Node>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinOp,
    pub left: Box<Node>,
    pub right: Box<Node>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnOp,
    pub expr: Box<Node>,
}

#[derive(Debug, Display, EnumString, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum BinOp {
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    Div,
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "=")]
    Eq,
    #[strum(to_string = "!=")]
    Ne,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Ge,
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Le,
    #[strum(to_string = "and")]
    And,
    #[strum(to_string = "or")]
    Or,
}

#[derive(Debug, Display, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum UnOp {
    #[strum(to_string = "-")]
    Neg,
    #[strum(to_string = "not")]
    Not,
}

/// A compile-time enumeration; iterable while visiting, emitted element-wise.
#[derive(Debug, EnumAsInner, PartialEq, Clone, Serialize, Deserialize)]
pub enum Enumeration {
    /// `a, ..., b` — an inclusive integer range.
    Range { start: i64, end: i64 },
    /// Two or more quoted string literals.
    Strings(Vec<String>),
    /// Two or more numeric literals.
    Numbers(Vec<Number>),
}

impl Enumeration {
    /// The elements in source order, each in its SQL spelling. Strings keep
    /// their quotes; an empty range yields no elements.
    pub fn items(&self) -> Vec<String> {
        match self {
            Enumeration::Range { start, end } => (*start..=*end).map(|i| i.to_string()).collect(),
            Enumeration::Strings(items) => items.clone(),
            Enumeration::Numbers(items) => items.iter().map(Number::to_string).collect(),
        }
    }
}

#[derive(Debug, EnumAsInner, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(v) => write!(f, "{v}"),
            // An integral float keeps its decimal point (`2.0`, not `2`).
            Number::Float(v) if v.fract() == 0.0 => write!(f, "{v:.1}"),
            Number::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<Item> for Node {
    fn from(item: Item) -> Self {
        Node { item, span: None }
    }
}

impl Node {
    pub fn new(item: Item, span: Span) -> Self {
        Node {
            item,
            span: Some(span),
        }
    }
}
