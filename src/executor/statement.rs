//! Translation of compiled queries into sea-query statements.

use crate::config::JoinKind;
use crate::grammar::Grammar;
use crate::model::{Registry, Relationship, ResourceModel};
use crate::query::{FilterClause, Operator, ParsedQuery, Predicate, SortDirective};
use sea_orm::DbErr;
use sea_orm::sea_query::{
    Alias, BinOper, Condition, Expr, Func, Order, Query, SelectStatement, SimpleExpr,
    SubQueryStatement,
};

/// Table alias used inside relation subqueries, so self-referencing
/// relations do not collide with the outer table
const RELATED_ALIAS: &str = "related";

fn column(table: &str, name: &str) -> Expr {
    Expr::col((Alias::new(table), Alias::new(name)))
}

/// Case-insensitive `LIKE`; both sides are upper-cased by the database so
/// they fold the same way, and the column is cast to text so non-string
/// columns can be matched too
// TODO: MySQL has no TEXT cast target; use CHAR when the backend is MySQL.
fn like(table: &str, name: &str, pattern: &str, negated: bool, escape: char) -> SimpleExpr {
    let haystack = SimpleExpr::FunctionCall(Func::upper(
        column(table, name).cast_as(Alias::new("TEXT")),
    ));
    let needle = SimpleExpr::Binary(
        Box::new(SimpleExpr::FunctionCall(Func::upper(Expr::val(pattern)))),
        BinOper::Escape,
        Box::new(SimpleExpr::Constant(escape.to_string().into())),
    );
    let op = if negated {
        BinOper::NotLike
    } else {
        BinOper::Like
    };
    Expr::expr(haystack).binary(op, needle)
}

/// One OR-ed alternative of a filter clause
fn predicate(table: &str, name: &str, predicate: &Predicate, escape: char) -> Condition {
    let col = column(table, name);
    let expr = match predicate {
        Predicate::Compare(op, value) => {
            let value = value.clone();
            match op {
                Operator::Ne => col.ne(value),
                Operator::Gt => col.gt(value),
                Operator::Ge => col.gte(value),
                Operator::Lt => col.lt(value),
                Operator::Le => col.lte(value),
                _ => col.eq(value),
            }
        }
        Predicate::Like { pattern, negated } => like(table, name, pattern, *negated, escape),
        Predicate::In { values, negated: false } => col.is_in(values.iter().cloned()),
        Predicate::In { values, negated: true } => col.is_not_in(values.iter().cloned()),
        Predicate::Null { negated: false } => col.is_null(),
        Predicate::Null { negated: true } => col.is_not_null(),
        Predicate::Range {
            low,
            high,
            negated: false,
        } => col.between(low.clone(), high.clone()),
        Predicate::Range {
            low,
            high,
            negated: true,
        } => {
            return Condition::any()
                .add(col.lt(low.clone()))
                .add(column(table, name).gt(high.clone()));
        }
    };
    Condition::all().add(expr)
}

fn alternatives(table: &str, clause: &FilterClause, escape: char) -> Condition {
    clause
        .alternatives
        .iter()
        .fold(Condition::any(), |cond, alt| {
            cond.add(predicate(table, &clause.field, alt, escape))
        })
}

/// `root.local IN (SELECT related.remote FROM target related WHERE …)`
fn related_subquery(
    root: &ResourceModel,
    relation: &Relationship,
    target: &ResourceModel,
    condition: Option<Condition>,
) -> SimpleExpr {
    let mut inner = Query::select();
    inner
        .column((Alias::new(RELATED_ALIAS), Alias::new(&relation.remote_key)))
        .from_as(Alias::new(target.table()), Alias::new(RELATED_ALIAS));
    if let Some(condition) = condition {
        inner.cond_where(condition);
    }
    column(root.table(), &relation.local_key).in_subquery(inner.to_owned())
}

/// Resolve a relation name to the relation and its target model
pub(crate) fn relation_target<'a>(
    registry: &'a Registry,
    model: &'a ResourceModel,
    name: &str,
) -> Result<(&'a Relationship, &'a ResourceModel), DbErr> {
    let relation = model
        .related(name)
        .ok_or_else(|| DbErr::Custom(format!("{} has no relation '{name}'", model.name())))?;
    let target = registry
        .get(&relation.target)
        .ok_or_else(|| DbErr::Custom(format!("unknown model '{}'", relation.target)))?;
    Ok((relation, target))
}

/// WHERE clause shared by the count and the page select
pub(crate) fn condition(
    registry: &Registry,
    model: &ResourceModel,
    query: &ParsedQuery,
    join: JoinKind,
    grammar: &Grammar,
) -> Result<Condition, DbErr> {
    let mut cond = Condition::all();

    for clause in &query.filters {
        match &clause.relation {
            None => cond = cond.add(alternatives(model.table(), clause, grammar.escape)),
            Some(name) => {
                let (relation, target) = relation_target(registry, model, name)?;
                let inner = alternatives(RELATED_ALIAS, clause, grammar.escape);
                cond = cond.add(related_subquery(model, relation, target, Some(inner)));
            }
        }
    }

    if let Some(term) = &query.search {
        let pattern = format!("%{}%", grammar.escape_like(term));
        let search = model.searchable().iter().fold(Condition::any(), |any, field| {
            any.add(like(model.table(), field, &pattern, false, grammar.escape))
        });
        if !search.is_empty() {
            cond = cond.add(search);
        }
    }

    if join == JoinKind::Inner {
        for load in &query.related {
            let (relation, target) = relation_target(registry, model, &load.relation)?;
            cond = cond.add(related_subquery(model, relation, target, None));
        }
    }

    Ok(cond)
}

/// Apply ORDER BY, always finishing with the primary key so pages are stable
pub(crate) fn order(
    select: &mut SelectStatement,
    registry: &Registry,
    model: &ResourceModel,
    orders: &[SortDirective],
) -> Result<(), DbErr> {
    let pk = &model.primary_key_field().name;
    for directive in orders {
        let direction = if directive.descending {
            Order::Desc
        } else {
            Order::Asc
        };
        match &directive.relation {
            None => {
                select.order_by((Alias::new(model.table()), Alias::new(&directive.field)), direction);
            }
            Some(name) => {
                let (relation, target) = relation_target(registry, model, name)?;
                let field = column(RELATED_ALIAS, &directive.field);
                let aggregate = if directive.descending {
                    Func::max(field)
                } else {
                    Func::min(field)
                };
                let inner = Query::select()
                    .expr(aggregate)
                    .from_as(Alias::new(target.table()), Alias::new(RELATED_ALIAS))
                    .and_where(
                        column(RELATED_ALIAS, &relation.remote_key)
                            .equals((Alias::new(model.table()), Alias::new(&relation.local_key))),
                    )
                    .to_owned();
                select.order_by_expr(
                    SimpleExpr::SubQuery(None, Box::new(SubQueryStatement::SelectStatement(inner))),
                    direction,
                );
            }
        }
    }
    if !orders
        .iter()
        .any(|o| o.relation.is_none() && &o.field == pk)
    {
        select.order_by((Alias::new(model.table()), Alias::new(pk)), Order::Asc);
    }
    Ok(())
}
