//! This module contains the parser, which is responsible for converting the
//! pest parse tree into AST nodes. Operator chains arrive as flat pair lists
//! and are folded left-associatively here; precedence itself is already
//! settled by the grammar's rule layering.
use anyhow::{anyhow, bail, Result};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::ast::*;
use crate::error::{Error, Reason, Span};

#[derive(Parser)]
#[grammar = "linnea.pest"]
struct LinneaParser;

pub type PestError = pest::error::Error<Rule>;
pub type PestRule = Rule;

/// Build an AST from rule source text.
pub fn parse(source: &str) -> Result<Node> {
    let program = LinneaParser::parse(Rule::program, source)?
        .next()
        .ok_or_else(|| anyhow!("expected a program"))?;
    let list = program
        .into_inner()
        .find(|pair| pair.as_rule() == Rule::predicate_list)
        .ok_or_else(|| anyhow!("expected a predicate list"))?;
    node_of_pair(list)
}

/// Parse a string starting from any grammar rule. Unlike [parse], pest does
/// not anchor sub-rules at end-of-input, so leftovers are rejected here.
/// Used by tests.
#[cfg(test)]
pub(crate) fn node_of_string(source: &str, rule: Rule) -> Result<Node> {
    let pair = LinneaParser::parse(rule, source)?
        .next()
        .ok_or_else(|| anyhow!("`{source}` produced no parse tree"))?;
    let rest = &source[pair.as_span().end()..];
    if !rest.trim().is_empty() {
        bail!("`{rest}` left over after parsing `{source}`");
    }
    node_of_pair(pair)
}

fn node_of_pair(pair: Pair<Rule>) -> Result<Node> {
    let span = span_of(&pair);
    let item = match pair.as_rule() {
        Rule::predicate_list => Item::PredicateList(nodes_of_pairs(pair)?),
        Rule::predicate_set => Item::PredicateSet(nodes_of_pairs(pair)?),
        Rule::expression => {
            let inner = only_pair(pair)?;
            return node_of_pair(inner);
        }
        Rule::or_expr | Rule::and_expr | Rule::rel_expr | Rule::add_expr | Rule::mul_expr => {
            return fold_binary(pair)
        }
        Rule::not_expr | Rule::sign_expr => return fold_unary(pair),
        Rule::function_call => {
            let mut inner = pair.into_inner();
            let name = only_str(inner.next())?;
            let args = inner.map(node_of_pair).collect::<Result<Vec<_>>>()?;
            Item::FuncCall(FuncCall { name, args })
        }
        Rule::count_expr => {
            let mut group = Vec::new();
            let mut window = None;
            let mut pred = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::identifier => group.push(p.as_str().to_string()),
                    Rule::time_interval => window = Some(interval_of_pair(p)?),
                    Rule::expression => pred = Some(node_of_pair(p)?),
                    _ => unreachable!("count over {p:?}"),
                }
            }
            let pred = pred.ok_or_else(|| anyhow!("count without a predicate"))?;
            Item::CountExpr(CountExpr {
                group,
                window,
                pred: Box::new(pred),
            })
        }
        Rule::for_expr => {
            let mut inner = pair.into_inner();
            let var = only_str(inner.next())?;
            let items = enumeration_of_pair(inner.next())?;
            let body = node_of_pair(inner.next().ok_or_else(|| anyhow!("for without a body"))?)?;
            Item::ForExpr(ForExpr {
                var,
                items,
                body: Box::new(body),
            })
        }
        Rule::in_expr => {
            let mut inner = pair.into_inner();
            let left = node_of_pair(
                inner
                    .next()
                    .ok_or_else(|| anyhow!("`in` without a left-hand side"))?,
            )?;
            let items = enumeration_of_pair(inner.next())?;
            Item::InExpr(InExpr {
                left: Box::new(left),
                items,
            })
        }
        Rule::domain_level => Item::DomainLevel(level_of_pair(&pair)?),
        Rule::domain_level_length => Item::DomainLevelLength(level_of_pair(&pair)?),
        Rule::boolean => Item::Boolean(pair.as_str() == "true"),
        Rule::identifier => Item::Ident(pair.as_str().to_string()),
        Rule::time_interval => Item::Interval(interval_of_pair(pair)?),
        Rule::string => Item::String(pair.as_str().to_string()),
        Rule::integer => Item::Integer(pair.as_str().parse()?),
        Rule::float => Item::Float(pair.as_str().parse()?),
        _ => bail!("unexpected {:?} `{}`", pair.as_rule(), pair.as_str()),
    };
    Ok(Node::new(item, span))
}

fn nodes_of_pairs(pair: Pair<Rule>) -> Result<Vec<Node>> {
    pair.into_inner().map(node_of_pair).collect()
}

/// Fold `operand (op operand)*` pairs into left-nested binary nodes. A single
/// operand passes through without a wrapping node.
fn fold_binary(pair: Pair<Rule>) -> Result<Node> {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();
    let mut node = node_of_pair(
        inner
            .next()
            .ok_or_else(|| anyhow!("operator without operands"))?,
    )?;
    while let Some(op) = inner.next() {
        let right = node_of_pair(
            inner
                .next()
                .ok_or_else(|| anyhow!("`{}` without a right operand", op.as_str()))?,
        )?;
        let op = op
            .as_str()
            .parse::<BinOp>()
            .map_err(|_| anyhow!("unknown operator `{}`", op.as_str()))?;
        node = Node::new(
            Item::Binary(BinaryExpr {
                op,
                left: Box::new(node),
                right: Box::new(right),
            }),
            span,
        );
    }
    Ok(node)
}

fn fold_unary(pair: Pair<Rule>) -> Result<Node> {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| anyhow!("expected an expression"))?;
    let op = match first.as_rule() {
        Rule::not_op => UnOp::Not,
        Rule::neg_op => UnOp::Neg,
        _ => return node_of_pair(first),
    };
    let expr = node_of_pair(
        inner
            .next()
            .ok_or_else(|| anyhow!("`{op}` without an operand"))?,
    )?;
    Ok(Node::new(
        Item::Unary(UnaryExpr {
            op,
            expr: Box::new(expr),
        }),
        span,
    ))
}

/// The digits of a `d`/`l` accessor; anything above level 9 is rejected.
fn level_of_pair(pair: &Pair<Rule>) -> Result<u32> {
    let digits = &pair.as_str()[1..];
    match digits.parse::<u32>() {
        Ok(level) if level <= 9 => Ok(level),
        _ => Err(Error::new(Reason::OutOfRange {
            found: format!("domain level {digits}"),
            bounds: "0-9".to_string(),
        })
        .with_span(Some(span_of(pair)))
        .into()),
    }
}

fn enumeration_of_pair(pair: Option<Pair<Rule>>) -> Result<Enumeration> {
    let pair = pair.ok_or_else(|| anyhow!("expected an enumeration"))?;
    Ok(match pair.as_rule() {
        Rule::num_range => {
            let mut bounds = pair.into_inner();
            let start = int_bound_of_pair(bounds.next())?;
            let end = int_bound_of_pair(bounds.next())?;
            Enumeration::Range { start, end }
        }
        Rule::string_list => Enumeration::Strings(
            pair.into_inner()
                .map(|p| p.as_str().to_string())
                .collect::<Vec<_>>(),
        ),
        Rule::number_list => Enumeration::Numbers(
            pair.into_inner()
                .map(|p| number_of_pair(&p))
                .collect::<Result<Vec<_>>>()?,
        ),
        _ => bail!("expected an enumeration, got {:?}", pair.as_rule()),
    })
}

fn number_of_pair(pair: &Pair<Rule>) -> Result<Number> {
    Ok(match pair.as_rule() {
        Rule::integer => Number::Integer(pair.as_str().parse()?),
        Rule::float => Number::Float(pair.as_str().parse()?),
        rule => bail!("expected a number, got {rule:?}"),
    })
}

fn int_bound_of_pair(pair: Option<Pair<Rule>>) -> Result<i64> {
    let pair = pair.ok_or_else(|| anyhow!("expected a range bound"))?;
    match number_of_pair(&pair)? {
        Number::Integer(value) => Ok(value),
        Number::Float(_) => Err(Error::new(Reason::Expected {
            who: None,
            expected: "an integer range bound".to_string(),
            found: pair.as_str().to_string(),
        })
        .with_span(Some(span_of(&pair)))
        .into()),
    }
}

fn interval_of_pair(pair: Pair<Rule>) -> Result<Interval> {
    let mut hours = 0.0;
    let mut minutes = 0.0;
    let mut pending = 0.0;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::integer | Rule::float => pending = p.as_str().parse()?,
            Rule::hour_unit => hours = pending,
            Rule::minute_unit => minutes = pending,
            _ => unreachable!("interval over {p:?}"),
        }
    }
    Ok(Interval::new(hours, minutes))
}

fn only_pair(pair: Pair<Rule>) -> Result<Pair<Rule>> {
    pair.into_inner()
        .next()
        .ok_or_else(|| anyhow!("expected an inner expression"))
}

fn only_str(pair: Option<Pair<Rule>>) -> Result<String> {
    Ok(pair
        .ok_or_else(|| anyhow!("expected an identifier"))?
        .as_str()
        .to_string())
}

fn span_of(pair: &Pair<Rule>) -> Span {
    let span = pair.as_span();
    Span {
        start: span.start(),
        end: span.end(),
    }
}

#[cfg(test)]
mod test {
    use insta::assert_yaml_snapshot;

    use super::*;

    #[test]
    fn test_parse_literals() -> Result<()> {
        assert_yaml_snapshot!(node_of_string("d0", Rule::expression)?, @r###"
        ---
        DomainLevel: 0
        "###);
        assert_yaml_snapshot!(node_of_string("l3", Rule::expression)?, @r###"
        ---
        DomainLevelLength: 3
        "###);
        assert_yaml_snapshot!(node_of_string("'com'", Rule::expression)?, @r###"
        ---
        String: "'com'"
        "###);
        assert_yaml_snapshot!(node_of_string("100.10", Rule::expression)?, @r###"
        ---
        Float: 100.1
        "###);
        assert_yaml_snapshot!(node_of_string("true", Rule::expression)?, @r###"
        ---
        Boolean: true
        "###);
        Ok(())
    }

    #[test]
    fn test_parse_operators() -> Result<()> {
        assert_yaml_snapshot!(node_of_string("10+11", Rule::expression)?, @r###"
        ---
        Binary:
          op: Add
          left:
            Integer: 10
          right:
            Integer: 11
        "###);
        // Left-associative: `9/11/2` nests as `(9/11)/2`.
        assert_yaml_snapshot!(node_of_string("9/11/2", Rule::expression)?, @r###"
        ---
        Binary:
          op: Div
          left:
            Binary:
              op: Div
              left:
                Integer: 9
              right:
                Integer: 11
          right:
            Integer: 2
        "###);
        assert_yaml_snapshot!(node_of_string("-id", Rule::expression)?, @r###"
        ---
        Unary:
          op: Neg
          expr:
            Ident: id
        "###);
        assert_yaml_snapshot!(
            node_of_string("not d0 = 'com' and l1 > 5", Rule::expression)?, @r###"
        ---
        Binary:
          op: And
          left:
            Unary:
              op: Not
              expr:
                Binary:
                  op: Eq
                  left:
                    DomainLevel: 0
                  right:
                    String: "'com'"
          right:
            Binary:
              op: Gt
              left:
                DomainLevelLength: 1
              right:
                Integer: 5
        "###);
        Ok(())
    }

    #[test]
    fn test_parse_intervals() -> Result<()> {
        assert_yaml_snapshot!(node_of_string("5h 130m", Rule::expression)?, @r###"
        ---
        Interval:
          hours: 7
          minutes: 10
        "###);
        assert_yaml_snapshot!(node_of_string("60m", Rule::expression)?, @r###"
        ---
        Interval:
          hours: 1
          minutes: 0
        "###);
        assert_yaml_snapshot!(node_of_string("1.5h", Rule::expression)?, @r###"
        ---
        Interval:
          hours: 1
          minutes: 30
        "###);
        Ok(())
    }

    #[test]
    fn test_parse_enumerations() -> Result<()> {
        assert_yaml_snapshot!(node_of_string("ex in 1,2,3", Rule::expression)?, @r###"
        ---
        InExpr:
          left:
            Ident: ex
          items:
            Numbers:
              - Integer: 1
              - Integer: 2
              - Integer: 3
        "###);
        assert_yaml_snapshot!(node_of_string("i in 5,...,12", Rule::expression)?, @r###"
        ---
        InExpr:
          left:
            Ident: i
          items:
            Range:
              start: 5
              end: 12
        "###);
        assert_yaml_snapshot!(node_of_string("d0 in 'com','biz'", Rule::expression)?, @r###"
        ---
        InExpr:
          left:
            DomainLevel: 0
          items:
            Strings:
              - "'com'"
              - "'biz'"
        "###);

        // Singleton lists are not enumerations.
        assert!(node_of_string("d0 in 'com'", Rule::expression).is_err());
        // Range bounds must be integers.
        assert!(node_of_string("i in 1.5,...,3", Rule::expression).is_err());
        Ok(())
    }

    #[test]
    fn test_parse_count_expr() -> Result<()> {
        assert_yaml_snapshot!(node_of_string("[dst,d1|l1 = 5]", Rule::expression)?, @r###"
        ---
        CountExpr:
          group:
            - dst
            - d1
          window: ~
          pred:
            Binary:
              op: Eq
              left:
                DomainLevelLength: 1
              right:
                Integer: 5
        "###);
        assert_yaml_snapshot!(node_of_string("[dst:1h|true]", Rule::expression)?, @r###"
        ---
        CountExpr:
          group:
            - dst
          window:
            hours: 1
            minutes: 0
          pred:
            Boolean: true
        "###);
        Ok(())
    }

    #[test]
    fn test_parse_for_expr() -> Result<()> {
        assert_yaml_snapshot!(
            node_of_string("|suf in 'com','biz','net': suf|", Rule::expression)?, @r###"
        ---
        ForExpr:
          var: suf
          items:
            Strings:
              - "'com'"
              - "'biz'"
              - "'net'"
          body:
            Ident: suf
        "###);
        Ok(())
    }

    #[test]
    fn test_parse_nested_count_and_for() -> Result<()> {
        // A for-expression inside a count body; the inner `|…|` must not
        // close the count.
        let node = node_of_string(
            "[dst| |suffix in 'com','net': [dst,d1|d0=suffix]>=1| >= 2 ]",
            Rule::expression,
        )?;
        let count = node.item.as_count_expr().unwrap();
        let pred = count.pred.item.as_binary().unwrap();
        assert_eq!(pred.op, BinOp::Ge);
        assert!(matches!(pred.left.item, Item::ForExpr(_)));
        Ok(())
    }

    #[test]
    fn test_parse_predicate_list() -> Result<()> {
        assert_yaml_snapshot!(parse("{true},{d0 = 'com', l1 >= 5}")?, @r###"
        ---
        PredicateList:
          - PredicateSet:
              - Boolean: true
          - PredicateSet:
              - Binary:
                  op: Eq
                  left:
                    DomainLevel: 0
                  right:
                    String: "'com'"
              - Binary:
                  op: Ge
                  left:
                    DomainLevelLength: 1
                  right:
                    Integer: 5
        "###);
        Ok(())
    }

    #[test]
    fn test_parse_function_call() -> Result<()> {
        assert_yaml_snapshot!(
            node_of_string(r"match(domain, '^[a-z]{4,12}\.com$')", Rule::expression)?, @r###"
        ---
        FuncCall:
          name: match
          args:
            - Ident: domain
            - String: "'^[a-z]{4,12}\\.com$'"
        "###);
        Ok(())
    }

    #[test]
    fn test_domain_level_range() {
        let error = node_of_string("d11", Rule::expression).unwrap_err();
        let error = error.downcast_ref::<Error>().unwrap();
        assert!(matches!(error.reason, Reason::OutOfRange { .. }));

        assert!(node_of_string("l10", Rule::expression).is_err());
        assert!(node_of_string("d9", Rule::expression).is_ok());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("{d0 = 'com'").is_err());
        assert!(parse("d0 = 'com'").is_err());
        assert!(parse("{?}").is_err());
        assert!(parse("{[dst|true}").is_err());
    }
}
