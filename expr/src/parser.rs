use crate::ast::{self, BinaryOperator, Conversion, Expr, Lambda, Literal, Method, UnaryOperator};
use crate::error::ParseError;
use crate::grammar::{self, ExprParser, Rule};
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use tracing::trace;

/// Parse a computed expression. The input must be a lambda, e.g. `p => p.pets.count()`.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> { Ok(Expr::Lambda(parse_lambda(input)?)) }

/// Parse a lambda and return it unwrapped
pub fn parse_lambda(input: &str) -> Result<Lambda, ParseError> {
    let pairs = ExprParser::parse(Rule::Expression, input)?;
    let lambda = first_pair(pairs)?;
    trace!("parsed lambda {:?}", lambda.as_str());
    parse_lambda_pair(lambda)
}

/// Parse an expression body that is not wrapped in a lambda, e.g. `a.count() + 1`
pub fn parse_standalone(input: &str) -> Result<Expr, ParseError> {
    let pairs = ExprParser::parse(Rule::Standalone, input)?;
    parse_pair(first_pair(pairs)?)
}

// Entry rules are silent, so the first pair is the payload; EOI is skipped.
fn first_pair(pairs: Pairs<Rule>) -> Result<Pair<Rule>, ParseError> {
    pairs.into_iter().find(|pair| pair.as_rule() != Rule::EOI).ok_or(ParseError::EmptyExpression)
}

fn parse_lambda_pair(pair: Pair<Rule>) -> Result<Lambda, ParseError> {
    if pair.as_rule() != Rule::Lambda {
        return Err(ParseError::UnexpectedRule { expected: "Lambda", got: pair.as_rule() });
    }
    let mut inner = pair.into_inner();
    let params = inner.next().ok_or(ParseError::MissingOperand("lambda parameter"))?;
    let params = params.into_inner().map(|p| p.as_str().to_string()).collect();
    let body = parse_pair(inner.next().ok_or(ParseError::MissingOperand("lambda body"))?)?;
    Ok(Lambda { params, body: Box::new(body) })
}

fn parse_pair(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::Expr => parse_conditional(pair),
        Rule::Coalesce | Rule::Disjunction | Rule::Conjunction | Rule::Comparison | Rule::Sum | Rule::Product => {
            parse_binary_chain(pair)
        }
        Rule::Prefix => parse_prefix(pair),
        Rule::Postfix => parse_postfix(pair),
        Rule::Lambda => Ok(Expr::Lambda(parse_lambda_pair(pair)?)),
        Rule::List => Ok(Expr::List(pair.into_inner().map(parse_pair).collect::<Result<_, _>>()?)),
        Rule::FunctionCall => parse_function_call(pair),
        Rule::Identifier => Ok(Expr::Parameter(pair.as_str().to_string())),
        Rule::Null | Rule::Boolean | Rule::Float | Rule::Integer | Rule::StringLiteral => Ok(Expr::Literal(parse_literal(pair)?)),
        rule => Err(ParseError::UnexpectedRule { expected: "expression", got: rule }),
    }
}

fn parse_conditional(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let test = parse_pair(inner.next().ok_or(ParseError::EmptyExpression)?)?;
    match (inner.next(), inner.next()) {
        (None, _) => Ok(test),
        (Some(if_true), Some(if_false)) => Ok(Expr::conditional(test, parse_pair(if_true)?, parse_pair(if_false)?)),
        (Some(_), None) => Err(ParseError::MissingOperand("conditional else")),
    }
}

/// Left-associative operator chains: `operand (op operand)*`
fn parse_binary_chain(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut result = parse_pair(inner.next().ok_or(ParseError::MissingOperand("left"))?)?;
    while let Some(op) = inner.next() {
        let operator =
            BinaryOperator::from_symbol(op.as_str()).ok_or(ParseError::UnexpectedRule { expected: "binary operator", got: op.as_rule() })?;
        let right = parse_pair(inner.next().ok_or(ParseError::MissingOperand("right"))?)?;
        result = result.binary(operator, right);
    }
    Ok(result)
}

fn parse_prefix(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut operators = Vec::new();
    let mut operand = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::PrefixOp if inner.as_str() == "!" => operators.push(UnaryOperator::Not),
            Rule::PrefixOp => operators.push(UnaryOperator::Negate),
            _ => operand = Some(parse_pair(inner)?),
        }
    }
    let mut expr = operand.ok_or(ParseError::MissingOperand("prefix"))?;
    for operator in operators.into_iter().rev() {
        expr = match (operator, expr) {
            // fold negative number literals so that `-1` round-trips through Display
            (UnaryOperator::Negate, Expr::Literal(Literal::Integer(i))) => Expr::Literal(Literal::Integer(-i)),
            (UnaryOperator::Negate, Expr::Literal(Literal::Float(x))) => Expr::Literal(Literal::Float(-x)),
            (operator, operand) => Expr::Unary { operator, operand: Box::new(operand) },
        };
    }
    Ok(expr)
}

fn parse_postfix(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut expr = parse_pair(inner.next().ok_or(ParseError::EmptyExpression)?)?;
    for suffix in inner {
        expr = match suffix.as_rule() {
            Rule::MemberAccess => {
                let name = suffix.into_inner().next().ok_or(ParseError::MissingOperand("member name"))?;
                expr.member(name.as_str())
            }
            Rule::MethodCall => {
                let mut parts = suffix.into_inner();
                let name = parts.next().ok_or(ParseError::MissingOperand("method name"))?.as_str();
                let method = Method::from_name(name).ok_or_else(|| ParseError::UnknownMethod(name.to_string()))?;
                let args = match parts.next() {
                    Some(args) => parse_arguments(args)?,
                    None => Vec::new(),
                };
                expr.call(method, args)
            }
            rule => return Err(ParseError::UnexpectedRule { expected: "member access or method call", got: rule }),
        };
    }
    Ok(expr)
}

fn parse_arguments(pair: Pair<Rule>) -> Result<Vec<Expr>, ParseError> {
    if pair.as_rule() != Rule::Arguments {
        return Err(ParseError::UnexpectedRule { expected: "Arguments", got: pair.as_rule() });
    }
    pair.into_inner().map(parse_pair).collect()
}

/// `tracked(x)`, `untracked(x)` and the conversions `int(x)`, `float(x)`, `string(x)`, `bool(x)`
fn parse_function_call(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut parts = pair.into_inner();
    let name = parts.next().ok_or(ParseError::MissingOperand("function name"))?.as_str().to_string();
    let mut args = match parts.next() {
        Some(args) => parse_arguments(args)?,
        None => Vec::new(),
    };
    if args.len() != 1 {
        return Err(ParseError::Arity { function: name, expected: 1, got: args.len() });
    }
    let operand = Box::new(args.remove(0));
    match name.as_str() {
        "tracked" => Ok(Expr::TrackChanges { operand, tracked: true }),
        "untracked" => Ok(Expr::TrackChanges { operand, tracked: false }),
        other => match Conversion::from_name(other) {
            Some(to) => Ok(Expr::Convert { operand, to }),
            None => Err(ParseError::UnknownFunction(name)),
        },
    }
}

fn parse_literal(pair: Pair<grammar::Rule>) -> Result<ast::Literal, ParseError> {
    let text = pair.as_str();
    match pair.as_rule() {
        Rule::Null => Ok(Literal::Null),
        Rule::Boolean => Ok(Literal::Boolean(text == "true")),
        Rule::Integer => text.parse::<i64>().map(Literal::Integer).map_err(|e| ParseError::InvalidLiteral(format!("{}: {}", text, e))),
        Rule::Float => text.parse::<f64>().map(Literal::Float).map_err(|e| ParseError::InvalidLiteral(format!("{}: {}", text, e))),
        Rule::StringLiteral => {
            // an empty quoted section still yields an (empty) inner pair
            let content = pair.into_inner().next().map(|inner| inner.as_str().to_string()).unwrap_or_default();
            Ok(Literal::String(content))
        }
        rule => Err(ParseError::UnexpectedRule { expected: "literal", got: rule }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_count() {
        let expr = parse_expression("p => p.pets.count()").unwrap();
        assert_eq!(expr, Expr::lambda(["p"], Expr::parameter("p").member("pets").call(Method::Count, vec![])));
    }

    #[test]
    fn test_parse_filtered_count() {
        let expr = parse_expression("p => p.pets.where(x => x.kind == 'Cat').count()").unwrap();
        let predicate = Expr::lambda(["x"], Expr::parameter("x").member("kind").equal(Expr::literal("Cat")));
        assert_eq!(
            expr,
            Expr::lambda(["p"], Expr::parameter("p").member("pets").call(Method::Where, vec![predicate]).call(Method::Count, vec![]))
        );
    }

    #[test]
    fn test_operator_precedence() {
        let expr = parse_standalone("a + b * c == d && !e").unwrap();
        let a = || Expr::parameter("a");
        let product = Expr::parameter("b").binary(BinaryOperator::Multiply, Expr::parameter("c"));
        let sum = a().binary(BinaryOperator::Add, product);
        let expected = sum.equal(Expr::parameter("d")).and(Expr::parameter("e").not());
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_left_associative_subtraction() {
        let expr = parse_standalone("a - b - c").unwrap();
        assert_eq!(expr.to_string(), "((a - b) - c)");
    }

    #[test]
    fn test_conditional_and_coalesce() {
        let expr = parse_standalone("a.owner ?? b ? 1 : -2.5").unwrap();
        let test = Expr::parameter("a").member("owner").binary(BinaryOperator::Coalesce, Expr::parameter("b"));
        assert_eq!(expr, Expr::conditional(test, Expr::literal(1i64), Expr::literal(-2.5)));
    }

    #[test]
    fn test_functions() {
        let expr = parse_standalone("untracked(p.pets).count() + int(p.age)").unwrap();
        assert_eq!(expr.to_string(), "(untracked(p.pets).count() + int(p.age))");
        assert!(matches!(parse_standalone("tracked(a, b)"), Err(ParseError::Arity { expected: 1, got: 2, .. })));
        assert!(matches!(parse_standalone("frobnicate(a)"), Err(ParseError::UnknownFunction(_))));
    }

    #[test]
    fn test_unknown_method() {
        assert!(matches!(parse_expression("p => p.pets.frobnicate()"), Err(ParseError::UnknownMethod(name)) if name == "frobnicate"));
    }

    #[test]
    fn test_multi_parameter_lambda() {
        let lambda = parse_lambda("(stored, computed) => stored == computed").unwrap();
        assert_eq!(lambda.params, vec!["stored".to_string(), "computed".to_string()]);
    }

    #[test]
    fn test_list_and_group_by() {
        let expr = parse_expression("p => [p.a, p.b].concat(p.pets.group_by(x => x.kind).select(g => g.key))").unwrap();
        assert_eq!(expr.to_string(), "p => [p.a, p.b].concat(p.pets.group_by(x => x.kind).select(g => g.key))");
    }

    #[test]
    fn test_display_round_trip() {
        for source in [
            "p => p.pets.where(x => (x.kind == 'Cat')).count()",
            "p => (p.a ? p.b : null)",
            "p => -(p.total)",
            "p => p.friends.select_many(f => f.pets).distinct().count()",
            "p => (p.name ?? \"it's\")",
            "(a, b) => (a == b)",
        ] {
            let expr = parse_expression(source).unwrap();
            assert_eq!(expr.to_string(), source);
            assert_eq!(parse_expression(&expr.to_string()).unwrap(), expr);
        }
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(parse_expression("p => p.pets.count("), Err(ParseError::SyntaxError(_))));
    }
}
