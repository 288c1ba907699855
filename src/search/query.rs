//! Translation of Lucene-style query strings into tantivy queries
//!
//! Supported syntax: bare terms, `"quoted phrases"`, `field:value`,
//! `( groups )`, `AND`/`&&`, `OR`/`||`, `NOT`/`!`/`-`, `+`, boosts (`^2`),
//! `*:*`, wildcards with `*` and `?` (leading wildcards included) and ranges
//! `[a TO b]` / `{a TO b}`.
//!
//! Ranges are always inclusive integer ranges; `*` leaves a side open. On
//! text or keyword fields they match nothing, as do clauses on fields the
//! index does not have. Every translated query only matches entity documents.

use crate::search::analyzer::{analyze_with_positions, ENTITY_TEXT_TOKENIZER};
use crate::search::document::{
    is_reserved, CoreFields, DocKind, FIELD_ENTITY_ID, FIELD_PROJECT_ID,
};
use crate::search::error::{SearchError, SearchResult};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use std::collections::HashMap;
use std::ops::Bound;
use std::str::FromStr;
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, ConstScoreQuery, EmptyQuery, Occur, PhraseQuery, Query,
    RangeQuery, RegexQuery, TermQuery,
};
use tantivy::schema::{Field, FieldType, IndexRecordOption, Schema};
use tantivy::Term;

#[derive(Parser)]
#[grammar = "search/query.pest"]
struct LuceneQueryParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    Text,
    Keyword,
    U64,
    I64,
}

impl FieldClass {
    fn is_numeric(self) -> bool {
        matches!(self, FieldClass::U64 | FieldClass::I64)
    }
}

#[derive(Debug, Clone)]
struct QueryField {
    field: Field,
    name: String,
    class: FieldClass,
}

#[derive(Debug, Clone, Copy)]
enum Leaf {
    Term,
    Phrase,
    Wildcard,
}

type Clause = (Occur, Box<dyn Query>);

/// Turns query strings into tantivy queries against one entity index schema
#[derive(Debug, Clone)]
pub struct QueryTranslator {
    fields: HashMap<String, QueryField>,
    default_fields: Vec<QueryField>,
    core: CoreFields,
}

impl QueryTranslator {
    /// Build a translator for `schema`.
    ///
    /// Unqualified terms search `default_fields`, or every analyzed text
    /// field when empty.
    pub fn new(schema: &Schema, default_fields: &[String]) -> SearchResult<Self> {
        let core = CoreFields::resolve(schema)?;
        let mut fields = HashMap::new();
        let mut text_fields = Vec::new();

        for (field, entry) in schema.fields() {
            let name = entry.name();
            if is_reserved(name) && name != FIELD_ENTITY_ID && name != FIELD_PROJECT_ID {
                continue;
            }
            let class = match entry.field_type() {
                FieldType::Str(options) => match options.get_indexing_options() {
                    Some(indexing) if indexing.tokenizer() == ENTITY_TEXT_TOKENIZER => {
                        FieldClass::Text
                    }
                    Some(_) => FieldClass::Keyword,
                    None => continue,
                },
                FieldType::U64(options) if options.is_indexed() => FieldClass::U64,
                FieldType::I64(options) if options.is_indexed() => FieldClass::I64,
                _ => continue,
            };
            let query_field = QueryField {
                field,
                name: name.to_string(),
                class,
            };
            if class == FieldClass::Text {
                text_fields.push(query_field.clone());
            }
            fields.insert(name.to_string(), query_field);
        }

        let default_fields = if default_fields.is_empty() {
            text_fields
        } else {
            default_fields
                .iter()
                .map(|name| match fields.get(name) {
                    Some(field) if !field.class.is_numeric() => Ok(field.clone()),
                    _ => Err(SearchError::InvalidConfiguration(format!(
                        "'{}' cannot be a default query field",
                        name
                    ))),
                })
                .collect::<SearchResult<Vec<_>>>()?
        };

        Ok(Self {
            fields,
            default_fields,
            core,
        })
    }

    /// Check that `query` parses and its numbers are integers
    pub fn validate(&self, query: &str) -> SearchResult<()> {
        self.translate(query).map(|_| ())
    }

    pub fn translate(&self, query: &str) -> SearchResult<Box<dyn Query>> {
        let mut pairs = LuceneQueryParser::parse(Rule::query, query).map_err(|e| {
            SearchError::InvalidQuery(format!("Failed to parse query '{}': {}", query, e))
        })?;
        let root = pairs
            .next()
            .and_then(|pair| pair.into_inner().next())
            .ok_or_else(|| SearchError::InvalidQuery("Query is empty".to_string()))?;

        let matched = match self.disjunction(root, None)? {
            Some(matched) => matched,
            // Nothing but stop words
            None => return Ok(Box::new(EmptyQuery)),
        };

        let entities_only: Box<dyn Query> = Box::new(ConstScoreQuery::new(
            Box::new(TermQuery::new(
                self.core.kind_term(DocKind::Entity),
                IndexRecordOption::Basic,
            )),
            0.0,
        ));
        Ok(Box::new(BooleanQuery::new(vec![
            (Occur::Must, matched),
            (Occur::Must, entities_only),
        ])))
    }

    fn disjunction(
        &self,
        pair: Pair<'_, Rule>,
        target: Option<&QueryField>,
    ) -> SearchResult<Option<Box<dyn Query>>> {
        let mut clauses = Vec::new();
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::conjunction {
                if let Some(clause) = self.conjunction(inner, target)? {
                    clauses.push(clause);
                }
            }
        }
        Ok(combine(clauses))
    }

    fn conjunction(
        &self,
        pair: Pair<'_, Rule>,
        target: Option<&QueryField>,
    ) -> SearchResult<Option<Clause>> {
        let mut clauses = Vec::new();
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::clause {
                if let Some(clause) = self.clause(inner, target)? {
                    clauses.push(clause);
                }
            }
        }

        if clauses.len() <= 1 {
            return Ok(clauses.pop());
        }
        let required = clauses
            .into_iter()
            .map(|(occur, query)| match occur {
                Occur::MustNot => (Occur::MustNot, query),
                _ => (Occur::Must, query),
            })
            .collect();
        Ok(combine(required).map(|query| (Occur::Should, query)))
    }

    fn clause(
        &self,
        pair: Pair<'_, Rule>,
        target: Option<&QueryField>,
    ) -> SearchResult<Option<Clause>> {
        let mut occur = Occur::Should;
        let mut boost = None;
        let mut query = None;

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::must => occur = Occur::Must,
                Rule::must_not => occur = Occur::MustNot,
                Rule::boost => {
                    let value = inner
                        .into_inner()
                        .next()
                        .map(|value| value.as_str())
                        .unwrap_or("1");
                    let value = value.parse::<f32>().map_err(|e| {
                        SearchError::InvalidQuery(format!("Invalid boost '{}': {}", value, e))
                    })?;
                    boost = Some(value);
                }
                _ => query = self.primary(inner, target)?,
            }
        }

        Ok(query.map(|query| {
            let query = match boost {
                Some(boost) => Box::new(BoostQuery::new(query, boost)) as Box<dyn Query>,
                None => query,
            };
            (occur, query)
        }))
    }

    fn primary(
        &self,
        pair: Pair<'_, Rule>,
        target: Option<&QueryField>,
    ) -> SearchResult<Option<Box<dyn Query>>> {
        match pair.as_rule() {
            Rule::group => match pair.into_inner().next() {
                Some(disjunction) => self.disjunction(disjunction, target),
                None => Ok(None),
            },
            Rule::match_all => Ok(Some(Box::new(AllQuery))),
            Rule::field_query => self.field_query(pair),
            Rule::phrase => {
                let text = pair
                    .into_inner()
                    .next()
                    .map(|text| text.as_str())
                    .unwrap_or("");
                self.leaf(target, Leaf::Phrase, &unescape(text))
            }
            Rule::wildcard => self.leaf(target, Leaf::Wildcard, pair.as_str()),
            Rule::term => self.leaf(target, Leaf::Term, &unescape(pair.as_str())),
            rule => Err(SearchError::InvalidQuery(format!(
                "Unexpected query element {:?}",
                rule
            ))),
        }
    }

    fn field_query(&self, pair: Pair<'_, Rule>) -> SearchResult<Option<Box<dyn Query>>> {
        let mut inner = pair.into_inner();
        let name = inner.next().map(|name| name.as_str()).unwrap_or("");
        let value = inner.next().ok_or_else(|| {
            SearchError::InvalidQuery(format!("Missing value for field '{}'", name))
        })?;
        let is_range = value.as_rule() == Rule::range;

        match self.fields.get(name) {
            Some(field) if is_range => self.range(value, field).map(Some),
            Some(field) => self.primary(value, Some(field)),
            // Unknown fields hold no terms
            None => {
                if is_range {
                    check_integer_range(value, name)?;
                }
                Ok(Some(Box::new(EmptyQuery)))
            }
        }
    }

    fn range(&self, pair: Pair<'_, Rule>, field: &QueryField) -> SearchResult<Box<dyn Query>> {
        let (lower, upper) = range_bounds(pair, &field.name)?;
        match field.class {
            FieldClass::U64 => Ok(Box::new(RangeQuery::new_u64_bounds(
                field.name.clone(),
                parse_bound::<u64>(lower, &field.name)?,
                parse_bound::<u64>(upper, &field.name)?,
            ))),
            FieldClass::I64 => Ok(Box::new(RangeQuery::new_i64_bounds(
                field.name.clone(),
                parse_bound::<i64>(lower, &field.name)?,
                parse_bound::<i64>(upper, &field.name)?,
            ))),
            // No numeric values are indexed in text or keyword fields
            FieldClass::Text | FieldClass::Keyword => {
                check_integer_bound(lower, &field.name)?;
                check_integer_bound(upper, &field.name)?;
                Ok(Box::new(EmptyQuery))
            }
        }
    }

    fn leaf(
        &self,
        target: Option<&QueryField>,
        leaf: Leaf,
        text: &str,
    ) -> SearchResult<Option<Box<dyn Query>>> {
        if let Some(field) = target {
            return field_leaf(field, leaf, text);
        }
        if self.default_fields.is_empty() {
            return Err(SearchError::InvalidQuery(format!(
                "'{}' names no field and there are no default query fields",
                text
            )));
        }

        let mut clauses = Vec::new();
        for field in &self.default_fields {
            if let Some(query) = field_leaf(field, leaf, text)? {
                clauses.push((Occur::Should, query));
            }
        }
        Ok(match clauses.len() {
            0 | 1 => clauses.pop().map(|(_, query)| query),
            _ => Some(Box::new(BooleanQuery::new(clauses))),
        })
    }
}

fn combine(mut clauses: Vec<Clause>) -> Option<Box<dyn Query>> {
    if clauses.is_empty() {
        return None;
    }
    if clauses.len() == 1 && clauses[0].0 != Occur::MustNot {
        return clauses.pop().map(|(_, query)| query);
    }
    if clauses.iter().all(|(occur, _)| *occur == Occur::MustNot) {
        clauses.push((Occur::Must, Box::new(AllQuery)));
    }
    Some(Box::new(BooleanQuery::new(clauses)))
}

fn field_leaf(field: &QueryField, leaf: Leaf, text: &str) -> SearchResult<Option<Box<dyn Query>>> {
    if let Leaf::Wildcard = leaf {
        return wildcard(field, text).map(Some);
    }

    match field.class {
        FieldClass::Text => {
            let mut terms: Vec<(usize, Term)> = analyze_with_positions(text)
                .into_iter()
                .map(|(position, token)| (position, Term::from_field_text(field.field, &token)))
                .collect();
            match (terms.len(), leaf) {
                (0, _) => Ok(None),
                (1, _) => Ok(terms.pop().map(|(_, term)| text_term(term))),
                (_, Leaf::Phrase) => Ok(Some(Box::new(PhraseQuery::new_with_offset(terms)))),
                _ => Ok(Some(Box::new(BooleanQuery::new(
                    terms
                        .into_iter()
                        .map(|(_, term)| (Occur::Should, text_term(term)))
                        .collect(),
                )))),
            }
        }
        FieldClass::Keyword => Ok(Some(Box::new(TermQuery::new(
            Term::from_field_text(field.field, text),
            IndexRecordOption::Basic,
        )))),
        FieldClass::U64 => {
            let value = parse_number::<u64>(text, &field.name)?;
            Ok(Some(Box::new(TermQuery::new(
                Term::from_field_u64(field.field, value),
                IndexRecordOption::Basic,
            ))))
        }
        FieldClass::I64 => {
            let value = parse_number::<i64>(text, &field.name)?;
            Ok(Some(Box::new(TermQuery::new(
                Term::from_field_i64(field.field, value),
                IndexRecordOption::Basic,
            ))))
        }
    }
}

fn text_term(term: Term) -> Box<dyn Query> {
    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs))
}

fn wildcard(field: &QueryField, pattern: &str) -> SearchResult<Box<dyn Query>> {
    match field.class {
        FieldClass::U64 if pattern == "*" => Ok(Box::new(RangeQuery::new_u64_bounds(
            field.name.clone(),
            Bound::Unbounded,
            Bound::Unbounded,
        ))),
        FieldClass::I64 if pattern == "*" => Ok(Box::new(RangeQuery::new_i64_bounds(
            field.name.clone(),
            Bound::Unbounded,
            Bound::Unbounded,
        ))),
        FieldClass::U64 | FieldClass::I64 => Err(SearchError::InvalidQuery(format!(
            "Wildcards are not supported on numeric field '{}'",
            field.name
        ))),
        FieldClass::Text | FieldClass::Keyword => {
            let pattern = if field.class == FieldClass::Text {
                pattern.to_lowercase()
            } else {
                pattern.to_string()
            };
            let regex = wildcard_to_regex(&pattern);
            let query = RegexQuery::from_pattern(&regex, field.field).map_err(|e| {
                SearchError::InvalidQuery(format!("Invalid wildcard '{}': {}", pattern, e))
            })?;
            Ok(Box::new(query))
        }
    }
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    push_literal(&mut regex, escaped);
                }
            }
            c => push_literal(&mut regex, c),
        }
    }
    regex
}

fn push_literal(regex: &mut String, c: char) {
    if "\\.+*?()|[]{}^$".contains(c) {
        regex.push('\\');
    }
    regex.push(c);
}

fn unescape(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                unescaped.push(escaped);
            }
        } else {
            unescaped.push(c);
        }
    }
    unescaped
}

fn range_bounds<'i>(pair: Pair<'i, Rule>, name: &str) -> SearchResult<(&'i str, &'i str)> {
    let bounds: Vec<&str> = pair
        .into_inner()
        .filter(|inner| inner.as_rule() == Rule::bound)
        .map(|inner| inner.as_str())
        .collect();
    match bounds.as_slice() {
        [lower, upper] => Ok((*lower, *upper)),
        _ => Err(SearchError::InvalidQuery(format!(
            "Malformed range on field '{}'",
            name
        ))),
    }
}

fn check_integer_range(pair: Pair<'_, Rule>, name: &str) -> SearchResult<()> {
    let (lower, upper) = range_bounds(pair, name)?;
    check_integer_bound(lower, name)?;
    check_integer_bound(upper, name)
}

fn check_integer_bound(text: &str, name: &str) -> SearchResult<()> {
    if text == "*" {
        return Ok(());
    }
    parse_number::<i64>(text, name)
        .map(|_| ())
        .or_else(|_| parse_number::<u64>(text, name).map(|_| ()))
}

fn parse_number<T: FromStr>(text: &str, name: &str) -> SearchResult<T> {
    text.trim().parse::<T>().map_err(|_| {
        SearchError::InvalidQuery(format!(
            "'{}' is not a valid integer for field '{}'",
            text, name
        ))
    })
}

fn parse_bound<T: FromStr>(text: &str, name: &str) -> SearchResult<Bound<T>> {
    if text == "*" {
        Ok(Bound::Unbounded)
    } else {
        parse_number(text, name).map(Bound::Included)
    }
}
