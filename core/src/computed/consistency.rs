use rollup_expr::{Expr, Lambda, Method};

use super::ConsistencyReport;
use crate::analysis::CompiledExpression;
use crate::cache::NavigationCache;
use crate::entity::{Entity, ValueSide};
use crate::error::{ConfigurationError, EvaluationError};
use crate::eval::Evaluator;
use crate::input::MutationInput;
use crate::value::Value;

const ENTITY: &str = "__e";
const STORED: &str = "__s";
const COMPUTED: &str = "__c";

/// The body of `expression` (a one-parameter lambda) rewritten over the `__e` parameter, without
/// change tracking markers
fn computed_body(expression: &Expr) -> Result<Expr, ConfigurationError> {
    let Some(Lambda { params, body }) = expression.as_lambda() else {
        return Err(ConfigurationError::Unsupported(format!("expected a lambda, found {}", expression)));
    };
    let [param] = params.as_slice() else {
        return Err(ConfigurationError::Unsupported(format!("expected a one-parameter lambda, found {}", expression)));
    };
    Ok(body.without_change_tracking().substitute(param, &Expr::parameter(ENTITY)))
}

/// `__e => __e.member == body`, or the `(stored, computed) => bool` comparer applied to both
pub(super) fn property_predicate(expression: &Expr, member: &str, comparer: Option<&Expr>) -> Result<Expr, ConfigurationError> {
    let computed = computed_body(expression)?;
    let stored = Expr::parameter(ENTITY).member(member);
    let compared = match comparer {
        None => stored.equal(computed),
        Some(comparer) => match comparer.as_lambda() {
            Some(Lambda { params, body }) if params.len() == 2 => body.substitute(&params[0], &stored).substitute(&params[1], &computed),
            _ => return Err(ConfigurationError::Unsupported(format!("a comparer takes (stored, computed), found {}", comparer))),
        },
    };
    Ok(Expr::lambda([ENTITY], compared))
}

/// Same cardinality and every stored entity matched by a computed one, matching on `fields` (or on
/// identity without fields)
pub(super) fn collection_predicate(expression: &Expr, navigation: &str, fields: &[String]) -> Result<Expr, ConfigurationError> {
    let computed = computed_body(expression)?;
    let stored = Expr::parameter(ENTITY).member(navigation);
    let matches = fields
        .iter()
        .map(|field| Expr::parameter(STORED).member(field.as_str()).equal(Expr::parameter(COMPUTED).member(field.as_str())))
        .reduce(Expr::and)
        .unwrap_or_else(|| Expr::parameter(STORED).equal(Expr::parameter(COMPUTED)));

    let same_count = stored.clone().call(Method::Count, vec![]).equal(computed.clone().call(Method::ToSet, vec![]).call(Method::Count, vec![]));
    let all_matched = stored.call(
        Method::All,
        vec![Expr::lambda([STORED], computed.call(Method::Any, vec![Expr::lambda([COMPUTED], matches)]))],
    );
    Ok(Expr::lambda([ENTITY], same_count.and(all_matched)))
}

/// `__e => __e.navigation == body` for reference navigations
pub(super) fn reference_predicate(expression: &Expr, navigation: &str) -> Result<Expr, ConfigurationError> {
    let computed = computed_body(expression)?;
    Ok(Expr::lambda([ENTITY], Expr::parameter(ENTITY).member(navigation).equal(computed)))
}

pub(super) async fn check(predicate: &CompiledExpression, input: &dyn MutationInput, entities: &[Entity]) -> Result<ConsistencyReport, EvaluationError> {
    let cache = NavigationCache::new();
    let evaluator = Evaluator::new(predicate, input, &cache, ValueSide::Current);
    let mut report = ConsistencyReport::default();
    for entity in entities {
        if !input.state(*entity).exists_on(ValueSide::Current) || !evaluator.passes_filter(*entity).await? {
            continue;
        }
        report.checked += 1;
        if evaluator.value(*entity).await? != Value::Bool(true) {
            report.inconsistent.push(*entity);
        }
    }
    Ok(report)
}
