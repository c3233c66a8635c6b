use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value as Json;

use crate::map::SourceFeature;
use crate::tile::{Feature, GeomType, Value};

pub trait FilterSubject {
    fn property(&self, name: &str) -> Option<&Value>;
    fn geometry_type(&self) -> GeomType;
}

impl FilterSubject for Feature {
    fn property(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }

    fn geometry_type(&self) -> GeomType {
        self.geom_type()
    }
}

impl FilterSubject for SourceFeature {
    fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    fn geometry_type(&self) -> GeomType {
        self.geom_type()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub zoom: f64,
    pub variables: &'a BTreeMap<String, Value>,
}

impl<'a> FilterContext<'a> {
    pub fn new(zoom: f64, variables: &'a BTreeMap<String, Value>) -> Self {
        FilterContext { zoom, variables }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    True,
    False,
    Unknown,
}

impl FilterResult {
    fn from_bool(value: bool) -> Self {
        if value {
            FilterResult::True
        } else {
            FilterResult::False
        }
    }

    fn negate(self) -> Self {
        match self {
            FilterResult::True => FilterResult::False,
            FilterResult::False => FilterResult::True,
            FilterResult::Unknown => FilterResult::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
enum FilterValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl FilterValue {
    fn equals(&self, other: &FilterValue) -> bool {
        match (self, other) {
            (FilterValue::String(a), FilterValue::String(b)) => a == b,
            (FilterValue::Number(a), FilterValue::Number(b)) => (*a - *b).abs() < f64::EPSILON,
            (FilterValue::Bool(a), FilterValue::Bool(b)) => a == b,
            _ => false,
        }
    }

    fn from_value(value: &Value) -> FilterValue {
        match value {
            Value::String(text) => FilterValue::String(text.clone()),
            Value::Bool(val) => FilterValue::Bool(*val),
            other => FilterValue::Number(other.as_f64().unwrap_or(f64::NAN)),
        }
    }

    fn from_json(value: &Json) -> Option<FilterValue> {
        if let Some(text) = value.as_str() {
            return Some(FilterValue::String(text.to_string()));
        }
        if let Some(number) = value.as_f64() {
            return Some(FilterValue::Number(number));
        }
        value.as_bool().map(FilterValue::Bool)
    }
}

#[derive(Debug, Clone)]
enum FilterKey {
    Property(String),
    Type,
    Zoom,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(FilterValue),
    Get(String),
    Var(String),
    Zoom,
    Type,
    Coalesce(Vec<Expr>),
    Match {
        input: Box<Expr>,
        cases: Vec<(FilterValue, Expr)>,
        fallback: Box<Expr>,
    },
    Case {
        branches: Vec<(Node, Expr)>,
        fallback: Box<Expr>,
    },
}

#[derive(Debug, Clone)]
enum Node {
    Eq(Expr, Expr),
    Neq(Expr, Expr),
    In(FilterKey, Vec<FilterValue>),
    NotIn(FilterKey, Vec<FilterValue>),
    Has(FilterKey),
    NotHas(FilterKey),
    All(Vec<Node>),
    Any(Vec<Node>),
    None(Vec<Node>),
    Not(Box<Node>),
    Unknown,
}

/// A parsed filter expression. Anything the parser does not understand
/// evaluates to [`FilterResult::Unknown`], which never matches.
#[derive(Clone)]
pub struct Filter {
    root: Node,
    source: Json,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self.source)
    }
}

impl Filter {
    pub fn parse(value: &Json) -> Filter {
        Filter {
            root: parse_filter(value).unwrap_or(Node::Unknown),
            source: value.clone(),
        }
    }

    pub fn source(&self) -> &Json {
        &self.source
    }

    pub fn evaluate<S: FilterSubject + ?Sized>(
        &self,
        subject: &S,
        ctx: &FilterContext<'_>,
    ) -> FilterResult {
        self.root.evaluate(subject, ctx)
    }

    pub fn matches<S: FilterSubject + ?Sized>(&self, subject: &S, ctx: &FilterContext<'_>) -> bool {
        self.evaluate(subject, ctx) == FilterResult::True
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Json::deserialize(deserializer)?;
        Ok(Filter::parse(&value))
    }
}

fn combine<S: FilterSubject + ?Sized>(
    filters: &[Node],
    subject: &S,
    ctx: &FilterContext<'_>,
    short_circuit: FilterResult,
    on_short: FilterResult,
    otherwise: FilterResult,
) -> FilterResult {
    let mut saw_unknown = false;
    for filter in filters {
        match filter.evaluate(subject, ctx) {
            FilterResult::Unknown => saw_unknown = true,
            result if result == short_circuit => return on_short,
            _ => {}
        }
    }
    if saw_unknown {
        FilterResult::Unknown
    } else {
        otherwise
    }
}

impl Node {
    fn evaluate<S: FilterSubject + ?Sized>(&self, subject: &S, ctx: &FilterContext<'_>) -> FilterResult {
        match self {
            Node::Eq(left, right) => {
                match (eval_expr(left, subject, ctx), eval_expr(right, subject, ctx)) {
                    (Some(actual), Some(expected)) => {
                        FilterResult::from_bool(actual.equals(&expected))
                    }
                    _ => FilterResult::Unknown,
                }
            }
            Node::Neq(left, right) => {
                match (eval_expr(left, subject, ctx), eval_expr(right, subject, ctx)) {
                    (Some(actual), Some(expected)) => {
                        FilterResult::from_bool(!actual.equals(&expected))
                    }
                    _ => FilterResult::Unknown,
                }
            }
            Node::In(key, values) => match value_by_key(subject, key, ctx) {
                Some(actual) => FilterResult::from_bool(values.iter().any(|v| actual.equals(v))),
                None => FilterResult::Unknown,
            },
            Node::NotIn(key, values) => match value_by_key(subject, key, ctx) {
                Some(actual) => FilterResult::from_bool(!values.iter().any(|v| actual.equals(v))),
                None => FilterResult::Unknown,
            },
            Node::Has(key) => FilterResult::from_bool(has_key(subject, key)),
            Node::NotHas(key) => FilterResult::from_bool(!has_key(subject, key)),
            Node::All(filters) => combine(
                filters,
                subject,
                ctx,
                FilterResult::False,
                FilterResult::False,
                FilterResult::True,
            ),
            Node::Any(filters) => combine(
                filters,
                subject,
                ctx,
                FilterResult::True,
                FilterResult::True,
                FilterResult::False,
            ),
            Node::None(filters) => combine(
                filters,
                subject,
                ctx,
                FilterResult::True,
                FilterResult::False,
                FilterResult::True,
            ),
            Node::Not(filter) => filter.evaluate(subject, ctx).negate(),
            Node::Unknown => FilterResult::Unknown,
        }
    }
}

fn has_key<S: FilterSubject + ?Sized>(subject: &S, key: &FilterKey) -> bool {
    match key {
        FilterKey::Type | FilterKey::Zoom => true,
        FilterKey::Property(name) => subject.property(name).is_some(),
    }
}

fn value_by_key<S: FilterSubject + ?Sized>(
    subject: &S,
    key: &FilterKey,
    ctx: &FilterContext<'_>,
) -> Option<FilterValue> {
    match key {
        FilterKey::Type => Some(FilterValue::String(
            subject.geometry_type().filter_name().to_string(),
        )),
        FilterKey::Zoom => Some(FilterValue::Number(ctx.zoom)),
        FilterKey::Property(name) => subject.property(name).map(FilterValue::from_value),
    }
}

fn eval_expr<S: FilterSubject + ?Sized>(
    expr: &Expr,
    subject: &S,
    ctx: &FilterContext<'_>,
) -> Option<FilterValue> {
    match expr {
        Expr::Literal(value) => Some(value.clone()),
        Expr::Get(name) => subject.property(name).map(FilterValue::from_value),
        Expr::Var(name) => ctx.variables.get(name).map(FilterValue::from_value),
        Expr::Zoom => Some(FilterValue::Number(ctx.zoom)),
        Expr::Type => Some(FilterValue::String(
            subject.geometry_type().filter_name().to_string(),
        )),
        Expr::Coalesce(items) => items.iter().find_map(|item| eval_expr(item, subject, ctx)),
        Expr::Match {
            input,
            cases,
            fallback,
        } => {
            let input_value = eval_expr(input, subject, ctx)?;
            for (match_value, output) in cases {
                if input_value.equals(match_value) {
                    return eval_expr(output, subject, ctx);
                }
            }
            eval_expr(fallback, subject, ctx)
        }
        Expr::Case { branches, fallback } => {
            for (condition, output) in branches {
                match condition.evaluate(subject, ctx) {
                    FilterResult::True => return eval_expr(output, subject, ctx),
                    FilterResult::False => {}
                    FilterResult::Unknown => return None,
                }
            }
            eval_expr(fallback, subject, ctx)
        }
    }
}

fn parse_filter(value: &Json) -> Option<Node> {
    if let Some(boolean) = value.as_bool() {
        // Literal `true`/`false` filters are accepted as constant rules.
        return Some(if boolean {
            Node::All(Vec::new())
        } else {
            Node::Any(Vec::new())
        });
    }
    let array = value.as_array()?;
    let op = array.first()?.as_str()?;
    match op {
        "!" => {
            let inner = array
                .get(1)
                .and_then(parse_filter)
                .unwrap_or(Node::Unknown);
            Some(Node::Not(Box::new(inner)))
        }
        "==" | "!=" => {
            if array.len() < 3 {
                return Some(Node::Unknown);
            }
            let left = parse_filter_lhs(&array[1])?;
            let right = parse_expr(&array[2])?;
            if op == "==" {
                Some(Node::Eq(left, right))
            } else {
                Some(Node::Neq(left, right))
            }
        }
        "in" | "!in" => {
            if array.len() < 3 {
                return Some(Node::Unknown);
            }
            let key = parse_filter_key(&array[1])?;
            let items = match array[2].as_array() {
                Some(list) => list.as_slice(),
                None => &array[2..],
            };
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match FilterValue::from_json(item) {
                    Some(value) => values.push(value),
                    None => return Some(Node::Unknown),
                }
            }
            if op == "in" {
                Some(Node::In(key, values))
            } else {
                Some(Node::NotIn(key, values))
            }
        }
        "has" | "!has" => {
            let Some(key) = array.get(1).and_then(parse_filter_key) else {
                return Some(Node::Unknown);
            };
            if op == "has" {
                Some(Node::Has(key))
            } else {
                Some(Node::NotHas(key))
            }
        }
        "all" | "any" | "none" => {
            let filters = array[1..]
                .iter()
                .map(|item| parse_filter(item).unwrap_or(Node::Unknown))
                .collect();
            match op {
                "all" => Some(Node::All(filters)),
                "any" => Some(Node::Any(filters)),
                _ => Some(Node::None(filters)),
            }
        }
        _ => Some(Node::Unknown),
    }
}

fn parse_expr(value: &Json) -> Option<Expr> {
    if let Some(literal) = FilterValue::from_json(value) {
        return Some(Expr::Literal(literal));
    }
    let array = value.as_array()?;
    let op = array.first()?.as_str()?;
    match op {
        "get" => Some(Expr::Get(array.get(1)?.as_str()?.to_string())),
        "var" => Some(Expr::Var(array.get(1)?.as_str()?.to_string())),
        "zoom" => Some(Expr::Zoom),
        "geometry-type" => Some(Expr::Type),
        "coalesce" => {
            let items = array[1..]
                .iter()
                .map(parse_expr)
                .collect::<Option<Vec<_>>>()?;
            if items.is_empty() {
                None
            } else {
                Some(Expr::Coalesce(items))
            }
        }
        "match" => {
            if array.len() < 4 {
                return None;
            }
            let input = parse_expr(&array[1])?;
            let mut cases = Vec::new();
            let mut idx = 2;
            while idx + 1 < array.len() - 1 {
                let match_value = FilterValue::from_json(&array[idx])?;
                let output = parse_expr(&array[idx + 1])?;
                cases.push((match_value, output));
                idx += 2;
            }
            let fallback = parse_expr(array.last()?)?;
            Some(Expr::Match {
                input: Box::new(input),
                cases,
                fallback: Box::new(fallback),
            })
        }
        "case" => {
            if array.len() < 4 {
                return None;
            }
            let mut branches = Vec::new();
            let mut idx = 1;
            while idx + 1 < array.len() - 1 {
                let condition = parse_filter(&array[idx]).unwrap_or(Node::Unknown);
                let output = parse_expr(&array[idx + 1])?;
                branches.push((condition, output));
                idx += 2;
            }
            let fallback = parse_expr(array.last()?)?;
            Some(Expr::Case {
                branches,
                fallback: Box::new(fallback),
            })
        }
        _ => None,
    }
}

fn parse_filter_key(value: &Json) -> Option<FilterKey> {
    if let Some(name) = value.as_str() {
        return Some(match name {
            "$type" | "geometry-type" => FilterKey::Type,
            "zoom" => FilterKey::Zoom,
            _ => FilterKey::Property(name.to_string()),
        });
    }
    let array = value.as_array()?;
    match array.first()?.as_str()? {
        "get" => Some(FilterKey::Property(array.get(1)?.as_str()?.to_string())),
        "zoom" => Some(FilterKey::Zoom),
        "geometry-type" => Some(FilterKey::Type),
        _ => None,
    }
}

fn parse_filter_lhs(value: &Json) -> Option<Expr> {
    if value.is_array() {
        if let Some(expr) = parse_expr(value) {
            return Some(expr);
        }
    }
    Some(match parse_filter_key(value)? {
        FilterKey::Property(name) => Expr::Get(name),
        FilterKey::Zoom => Expr::Zoom,
        FilterKey::Type => Expr::Type,
    })
}
