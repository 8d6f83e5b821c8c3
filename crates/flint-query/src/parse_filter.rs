use bson::{Bson, Document};

use crate::expression::Expression;

/// Parse error for filter documents.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParseError(pub String);

impl std::fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "filter parse error: {}", self.0)
    }
}

impl std::error::Error for FilterParseError {}

/// Parse a BSON filter document into an `Expression` tree.
///
/// Follows the operator-document query dialect:
/// - the top-level document is an implicit AND of all entries
/// - `{ "field": value }` is implicit `$eq`
/// - `{ "field": { "$gt": v } }` uses operator sub-documents
/// - `{ "$or": [...] }` / `{ "$and": [...] }` for explicit logical ops
pub fn parse_filter(doc: &Document) -> Result<Expression, FilterParseError> {
    let mut children = Vec::new();

    for (key, value) in doc {
        match key.as_str() {
            "$and" => children.push(parse_logical_array(value, Expression::And)?),
            "$or" => children.push(parse_logical_array(value, Expression::Or)?),
            k if k.starts_with('$') => {
                return Err(FilterParseError(format!("unknown top-level operator: {k}")));
            }
            field => children.push(parse_field_condition(field, value)?),
        }
    }

    if children.is_empty() {
        return Err(FilterParseError("empty filter document".into()));
    }

    if children.len() == 1 {
        Ok(children.pop().unwrap())
    } else {
        Ok(Expression::And(children))
    }
}

/// Parse a `$and` or `$or` array value into a logical expression.
fn parse_logical_array(
    value: &Bson,
    make: fn(Vec<Expression>) -> Expression,
) -> Result<Expression, FilterParseError> {
    let arr = match value {
        Bson::Array(a) => a,
        _ => return Err(FilterParseError("$and/$or value must be an array".into())),
    };

    let mut children = Vec::new();
    for elem in arr {
        match elem {
            Bson::Document(sub) => children.push(parse_filter(sub)?),
            _ => {
                return Err(FilterParseError(
                    "$and/$or array elements must be documents".into(),
                ));
            }
        }
    }

    if children.is_empty() {
        return Err(FilterParseError("$and/$or array must not be empty".into()));
    }

    Ok(make(children))
}

/// Parse a field condition: either implicit $eq or an operator
/// sub-document.
fn parse_field_condition(field: &str, value: &Bson) -> Result<Expression, FilterParseError> {
    if let Bson::Document(sub) = value {
        if sub.keys().next().is_some_and(|k| k.starts_with('$')) {
            return parse_operator_doc(field, sub);
        }
    }
    Ok(Expression::Eq(field.to_string(), value.clone()))
}

/// Parse an operator sub-document like `{ "$gt": 21, "$lte": 100 }`.
fn parse_operator_doc(field: &str, doc: &Document) -> Result<Expression, FilterParseError> {
    let mut conditions = Vec::new();

    for (op, value) in doc {
        let field = field.to_string();
        let value = value.clone();
        let expr = match op.as_str() {
            "$eq" => Expression::Eq(field, value),
            "$ne" => Expression::Ne(field, value),
            "$gt" => Expression::Gt(field, value),
            "$gte" => Expression::Gte(field, value),
            "$lt" => Expression::Lt(field, value),
            "$lte" => Expression::Lte(field, value),
            k => return Err(FilterParseError(format!("unknown field operator: {k}"))),
        };
        conditions.push(expr);
    }

    match conditions.len() {
        0 => Err(FilterParseError("empty operator document".into())),
        1 => Ok(conditions.pop().unwrap()),
        _ => Ok(Expression::And(conditions)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn bare_field_implicit_eq() {
        let expr = parse_filter(&doc! { "status": "active" }).unwrap();
        assert_eq!(
            expr,
            Expression::Eq("status".into(), Bson::String("active".into()))
        );
    }

    #[test]
    fn multiple_bare_fields_become_and() {
        let expr = parse_filter(&doc! { "status": "active", "age": 30 }).unwrap();
        match expr {
            Expression::And(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(&children[0], Expression::Eq(f, _) if f == "status"));
                assert!(matches!(&children[1], Expression::Eq(f, _) if f == "age"));
            }
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn operator_doc_gte() {
        let expr = parse_filter(&doc! { "age": { "$gte": 21 } }).unwrap();
        assert_eq!(expr, Expression::Gte("age".into(), Bson::Int32(21)));
    }

    #[test]
    fn ne_operator() {
        let expr = parse_filter(&doc! { "status": { "$ne": "active" } }).unwrap();
        assert_eq!(
            expr,
            Expression::Ne("status".into(), Bson::String("active".into()))
        );
    }

    #[test]
    fn eq_null_is_representable() {
        let expr = parse_filter(&doc! { "f": { "$eq": null } }).unwrap();
        assert_eq!(expr, Expression::Eq("f".into(), Bson::Null));
    }

    #[test]
    fn multiple_operators_same_field_flatten_to_and() {
        let expr = parse_filter(&doc! { "score": { "$gt": 50, "$lte": 100 } }).unwrap();
        match expr {
            Expression::And(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(&children[0], Expression::Gt(..)));
                assert!(matches!(&children[1], Expression::Lte(..)));
            }
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn explicit_or() {
        let expr =
            parse_filter(&doc! { "$or": [{ "a": 1 }, { "b": 2 }] }).unwrap();
        match expr {
            Expression::Or(children) => assert_eq!(children.len(), 2),
            _ => panic!("expected Or"),
        }
    }

    #[test]
    fn nested_or_containing_and() {
        let expr = parse_filter(&doc! {
            "$or": [
                { "status": "active" },
                { "$and": [{ "score": { "$gt": 90 } }, { "verified": true }] }
            ]
        })
        .unwrap();
        match expr {
            Expression::Or(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(&children[0], Expression::Eq(..)));
                assert!(matches!(&children[1], Expression::And(..)));
            }
            _ => panic!("expected Or"),
        }
    }

    #[test]
    fn unknown_operators_error() {
        assert!(parse_filter(&doc! { "$nor": [{ "a": 1 }] }).is_err());
        assert!(parse_filter(&doc! { "age": { "$between": 10 } }).is_err());
    }

    #[test]
    fn empty_doc_errors() {
        assert!(parse_filter(&doc! {}).is_err());
    }

    #[test]
    fn embedded_doc_without_operators_is_eq_value() {
        let expr = parse_filter(&doc! { "address": { "city": "Austin" } }).unwrap();
        assert!(matches!(expr, Expression::Eq(f, _) if f == "address"));
    }
}
