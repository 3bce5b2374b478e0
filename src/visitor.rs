//! A single exhaustive dispatch over the AST. Visits append SQL text into
//! the context's current buffer. A count-expression leaves only its fresh
//! alias behind in the current item; the aggregate itself is planted into a
//! deeper sublayer's `select` buffer so the enclosing layer can carry it.
use anyhow::Result;

use crate::ast::*;
use crate::context::{Context, Mode, TemplatePart};
use crate::error::{Error, Reason, Span};

pub fn visit(node: &Node, ctx: &mut Context) -> Result<()> {
    match &node.item {
        Item::DomainLevel(level) => {
            ctx.used_columns.insert(format!("d{level}"));
            ctx.emit(format!("d{level}"));
        }
        Item::DomainLevelLength(level) => {
            ctx.used_columns.insert(format!("d{level}"));
            ctx.emit(format!("LENGTH(d{level})"));
        }
        Item::Ident(id) => {
            let column = ctx.lookup(id);
            ctx.emit(column);
        }
        Item::Integer(value) => ctx.emit(value.to_string()),
        Item::Float(value) => ctx.emit(Number::Float(*value).to_string()),
        Item::String(literal) => ctx.emit(literal.clone()),
        Item::Boolean(value) => ctx.emit(value.to_string()),
        Item::Interval(interval) => ctx.emit(sql_of_interval(interval)),
        Item::FuncCall(call) => visit_func_call(call, node.span, ctx)?,
        Item::InExpr(expr) => {
            ctx.emit("(");
            visit(&expr.left, ctx)?;
            ctx.emit(" IN (");
            ctx.emit(expr.items.items().join(","));
            ctx.emit("))");
        }
        Item::CountExpr(expr) => visit_count(expr, ctx)?,
        Item::ForExpr(expr) => visit_for(expr, ctx)?,
        Item::Binary(expr) => {
            visit(&expr.left, ctx)?;
            ctx.emit(format!(" {} ", expr.op.to_string().to_uppercase()));
            visit(&expr.right, ctx)?;
        }
        Item::Unary(expr) => {
            ctx.emit(format!("{} ", expr.op));
            visit(&expr.expr, ctx)?;
        }
        Item::PredicateSet(preds) => {
            for pred in preds {
                ctx.new_predicate();
                visit(pred, ctx)?;
            }
        }
        Item::PredicateList(sets) => {
            for set in sets {
                ctx.new_layer();
                visit(set, ctx)?;
            }
        }
    }
    Ok(())
}

fn visit_func_call(call: &FuncCall, span: Option<Span>, ctx: &mut Context) -> Result<()> {
    let template = ctx
        .function_template(&call.name)
        .ok_or_else(|| {
            Error::new(Reason::NotFound {
                name: call.name.clone(),
                namespace: "function".to_string(),
            })
            .with_span(span)
        })?
        .clone();
    for part in &template {
        match part {
            TemplatePart::Text(text) => ctx.emit(text.clone()),
            TemplatePart::Param(index) => {
                let arg = call.args.get(*index).ok_or_else(|| {
                    Error::new(Reason::Expected {
                        who: Some(call.name.clone()),
                        expected: format!("at least {} arguments", index + 1),
                        found: call.args.len().to_string(),
                    })
                    .with_span(span)
                })?;
                visit(arg, ctx)?;
            }
        }
    }
    Ok(())
}

/// Emit the alias, then plant `COUNT(pred OR NULL) OVER(…) AS alias` into
/// the select buffer of the next-deeper sublayer. Mode and sublayer position
/// are restored before returning, so nested counts compose.
fn visit_count(expr: &CountExpr, ctx: &mut Context) -> Result<()> {
    let name = ctx.generate_name();
    ctx.emit(name.clone());

    ctx.down();
    ctx.push_mode(Mode::Select);
    ctx.new_selected();
    ctx.emit("COUNT(");
    visit(&expr.pred, ctx)?;
    ctx.emit(" OR NULL) OVER(PARTITION BY ");
    for (i, id) in expr.group.iter().enumerate() {
        if i > 0 {
            ctx.emit(",");
        }
        let column = ctx.lookup(id);
        ctx.emit(column);
    }
    if let Some(window) = &expr.window {
        ctx.emit(" ORDER BY timestamp RANGE BETWEEN ");
        ctx.emit(sql_of_interval(window));
        ctx.emit(" PRECEDING AND ");
        ctx.emit(sql_of_interval(window));
        ctx.emit(" FOLLOWING");
    }
    ctx.emit(") AS ");
    ctx.emit(name);
    ctx.up()?;
    ctx.pop_mode();
    Ok(())
}

/// Unroll the body once per enumeration element, binding the loop variable
/// as a textual macro, and sum the arms as CASE expressions.
fn visit_for(expr: &ForExpr, ctx: &mut Context) -> Result<()> {
    ctx.emit("(");
    for (i, item) in expr.items.items().into_iter().enumerate() {
        if i > 0 {
            ctx.emit("+");
        }
        ctx.define(&expr.var, item);
        ctx.emit("(CASE WHEN (");
        visit(&expr.body, ctx)?;
        ctx.emit(") THEN 1 ELSE 0 END)");
    }
    ctx.undefine(&expr.var);
    ctx.emit(")");
    Ok(())
}

fn sql_of_interval(interval: &Interval) -> String {
    format!(
        "INTERVAL '{} hour {} minute'",
        interval.hours, interval.minutes
    )
}
