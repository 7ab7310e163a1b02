use super::{FilterClause, ParsedQuery, Predicate, RelatedLoad, SortDirective};
use super::Operator;
use crate::grammar::{Arguments, Grammar};
use crate::model::value::coerce_str;
use crate::model::{Field, FieldKind, Registry, ResourceModel};

/// Compiles query strings and FETCH payloads against one resource
#[derive(Debug, Clone)]
pub struct Qs2Sqla<'a> {
    pub(crate) registry: &'a Registry,
    pub(crate) model: &'a ResourceModel,
    pub(crate) grammar: Grammar,
    pub(crate) arguments: Arguments,
}

impl<'a> Qs2Sqla<'a> {
    #[must_use]
    pub fn new(registry: &'a Registry, model: &'a ResourceModel) -> Self {
        Self {
            registry,
            model,
            grammar: Grammar::default(),
            arguments: Arguments::default(),
        }
    }

    #[must_use]
    pub fn with_grammar(mut self, grammar: Grammar, arguments: Arguments) -> Self {
        self.grammar = grammar;
        self.arguments = arguments;
        self
    }

    /// Resolve `field` or `Relation.field`
    pub(crate) fn resolve_field(&self, name: &str) -> Option<(Option<String>, &'a Field)> {
        if let Some(field) = self.model.column(name) {
            return Some((None, field));
        }
        let (relation, field) = name.split_once('.')?;
        let relation = self.model.related(relation)?;
        let target = self.registry.get(&relation.target)?;
        target
            .column(field)
            .map(|field| (Some(relation.name.clone()), field))
    }

    /// Compile a query-string multimap.
    ///
    /// Keys may repeat; every value of a column key becomes one alternative
    /// of that column's clause. Unknown keys, unknown sort/field names and
    /// values that do not parse or do not fit the column type all end up in
    /// the returned invalid list.
    #[must_use]
    pub fn parse(&self, args: &[(String, String)]) -> (ParsedQuery, Vec<String>) {
        let mut query = ParsedQuery::default();
        let mut invalid = Vec::new();
        let mut grouped: Vec<(&str, Vec<&str>)> = Vec::new();

        for (key, value) in args {
            let key = key.as_str();
            if self.arguments.is_scalar(key) {
                continue;
            }
            if key == self.arguments.sort {
                self.parse_sort(value, &mut query, &mut invalid);
            } else if key == self.arguments.fields {
                for item in self.grammar.split(value) {
                    if self.model.column(item).is_some() {
                        query.fields.push(item.to_string());
                    } else {
                        invalid.push(item.to_string());
                    }
                }
            } else if let Some((_, values)) = grouped.iter_mut().find(|(k, _)| *k == key) {
                values.push(value);
            } else {
                grouped.push((key, vec![value]));
            }
        }

        for (key, values) in grouped {
            let Some((relation, field)) = self.resolve_field(key) else {
                invalid.push(key.to_string());
                continue;
            };
            let mut alternatives = Vec::with_capacity(values.len());
            for value in values {
                match self.parse_value(field.kind, value) {
                    Some(predicate) => alternatives.push(predicate),
                    None => invalid.push(format!("{key}={value}")),
                }
            }
            if !alternatives.is_empty() {
                query.filters.push(FilterClause {
                    relation,
                    field: field.name.clone(),
                    alternatives,
                });
            }
        }

        self.parse_expansion(args, &mut query, &mut invalid);

        if !invalid.is_empty() {
            tracing::debug!(resource = %self.model.name(), ?invalid, "Rejected query tokens");
        }
        (query, invalid)
    }

    fn parse_sort(&self, value: &str, query: &mut ParsedQuery, invalid: &mut Vec<String>) {
        for item in self.grammar.split(value) {
            let (descending, name) = match item.strip_prefix(self.grammar.reverse) {
                Some(name) => (true, name),
                None => (false, item),
            };
            match self.resolve_field(name) {
                Some((relation, field)) => query.orders.push(SortDirective {
                    relation,
                    field: field.name.clone(),
                    descending,
                }),
                None => invalid.push(item.to_string()),
            }
        }
    }

    /// `_related`/`_extended` and `_search`
    fn parse_expansion(
        &self,
        args: &[(String, String)],
        query: &mut ParsedQuery,
        invalid: &mut Vec<String>,
    ) {
        let related = args
            .iter()
            .find(|(k, _)| k == self.arguments.related || k == self.arguments.extended);
        if let Some((_, value)) = related {
            let names = self.grammar.split(value);
            if names.is_empty() || names == ["*"] {
                query.related = self
                    .model
                    .relations()
                    .iter()
                    .map(|r| RelatedLoad {
                        relation: r.name.clone(),
                        columns: None,
                    })
                    .collect();
            } else {
                for name in names {
                    match self.model.related(name) {
                        Some(relation) => query.related.push(RelatedLoad {
                            relation: relation.name.clone(),
                            columns: None,
                        }),
                        None => invalid.push(name.to_string()),
                    }
                }
            }
        }

        if let Some((_, term)) = args.iter().find(|(k, _)| k == self.arguments.search) {
            let term = term.trim();
            if !term.is_empty() {
                query.search = Some(term.to_string());
            }
        }
    }

    /// Translate one filter value; `None` marks it invalid.
    ///
    /// Priority: comparison prefixes, then (not-)like, then ranges, then
    /// list membership with its single-value equality/null forms.
    pub(crate) fn parse_value(&self, kind: FieldKind, raw: &str) -> Option<Predicate> {
        let g = &self.grammar;
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        for (prefix, op) in [
            (g.gte, Operator::Ge),
            (g.gt, Operator::Gt),
            (g.lte, Operator::Le),
            (g.lt, Operator::Lt),
        ] {
            if let Some(rest) = raw.strip_prefix(prefix) {
                return coerce_str(kind, rest).map(|v| Predicate::Compare(op, v));
            }
        }

        if let Some(pattern) = raw.strip_prefix(g.not_like) {
            return Some(Predicate::Like {
                pattern: pattern.to_string(),
                negated: true,
            });
        }
        if let Some(pattern) = raw.strip_prefix(g.like) {
            return Some(Predicate::Like {
                pattern: pattern.to_string(),
                negated: false,
            });
        }

        if let Some(body) = raw.strip_suffix(g.range_end) {
            let range = body
                .strip_prefix(g.not_range_start)
                .map(|inner| (inner, true))
                .or_else(|| body.strip_prefix(g.range_start).map(|inner| (inner, false)));
            if let Some((inner, negated)) = range {
                let parts = g.split(inner);
                let [low, high] = parts.as_slice() else {
                    return None;
                };
                return Some(Predicate::Range {
                    low: coerce_str(kind, low)?,
                    high: coerce_str(kind, high)?,
                    negated,
                });
            }
        }

        let items = g.split(raw);
        let (first, rest) = items.split_first()?;
        let (negated, first) = match first.strip_prefix(g.negate) {
            Some(stripped) => (true, stripped),
            None => (false, *first),
        };
        let (escaped, first) = match first.strip_prefix(g.escape) {
            Some(stripped) => (true, stripped),
            None => (false, first),
        };

        if rest.is_empty() {
            if !escaped && first.eq_ignore_ascii_case(g.null) {
                return Some(Predicate::Null { negated });
            }
            let op = if negated { Operator::Ne } else { Operator::Eq };
            return coerce_str(kind, first).map(|v| Predicate::Compare(op, v));
        }

        let values = std::iter::once(first)
            .chain(rest.iter().copied())
            .map(|item| coerce_str(kind, item))
            .collect::<Option<Vec<_>>>()?;
        Some(Predicate::In { values, negated })
    }
}
