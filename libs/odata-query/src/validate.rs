//! Limits and model capability checks, run after binding and before any
//! execution.

use odata_edm::AnnotationTerm;
use tracing::debug;

use crate::bind::BoundQuery;
use crate::bind::bound::{Bound, BoundKind, BoundOrderBy, Expansion, Projection};
use crate::error::ValidationError;
use crate::settings::{ArithmeticOperator, LogicalOperator, QueryOption, ValidationSettings};
use crate::syntax::ast::{BinaryOp, UnaryOp};

/// Reject raw query text longer than the configured maximum. Runs before parsing.
///
/// # Errors
/// Returns [`ValidationError::QueryTooLong`].
pub fn check_query_length(raw: &str, settings: &ValidationSettings) -> Result<(), ValidationError> {
    match settings.max_query_length {
        Some(max) if raw.len() > max => Err(ValidationError::QueryTooLong {
            length: raw.len(),
            max,
        }),
        _ => Ok(()),
    }
}

/// Validate a bound query.
///
/// # Errors
/// Returns the first [`ValidationError`] found.
pub fn validate(query: &BoundQuery, settings: &ValidationSettings) -> Result<(), ValidationError> {
    for option in &query.present {
        if !settings.allowed_query_options.allows(option) {
            return Err(ValidationError::OptionNotAllowed(option.name().to_owned()));
        }
    }

    let set_annotations = query
        .entity_set
        .as_deref()
        .and_then(|s| query.schema.model().entity_set(s))
        .map(|s| &s.annotations);
    let set_max_top = set_annotations.and_then(|a| a.count(AnnotationTerm::MaxTop));
    check_top(query.top, min_limit(settings.max_top, set_max_top))?;
    if let (Some(value), Some(max)) = (query.skip, settings.max_skip)
        && value > max
    {
        return Err(ValidationError::SkipExceeded { value, max });
    }
    if query.count && set_annotations.is_some_and(|a| a.flag(AnnotationTerm::NotCountable)) {
        return Err(ValidationError::NotCountable(
            query.entity_set.as_deref().unwrap_or_default().to_owned(),
        ));
    }

    for e in query.expressions() {
        check_expression(e, settings)?;
    }
    if let Some(filter) = &query.filter {
        check_filter(filter, settings)?;
    }
    check_orderby(&query.orderby, settings)?;

    if let Some(max) = settings.max_expansion_depth {
        let depth = query.projection.expansion_depth();
        if depth > max {
            return Err(ValidationError::ExpansionDepthExceeded { depth, max });
        }
    }
    check_projection(&query.projection, settings)?;
    debug!(result_type = %query.result_type, "query validated");
    Ok(())
}

fn min_limit(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn check_top(top: Option<usize>, max: Option<usize>) -> Result<(), ValidationError> {
    match (top, max) {
        (Some(value), Some(max)) if value > max => Err(ValidationError::TopExceeded { value, max }),
        _ => Ok(()),
    }
}

fn logical(op: BinaryOp) -> Option<LogicalOperator> {
    Some(match op {
        BinaryOp::And => LogicalOperator::And,
        BinaryOp::Or => LogicalOperator::Or,
        BinaryOp::Eq => LogicalOperator::Eq,
        BinaryOp::Ne => LogicalOperator::Ne,
        BinaryOp::Gt => LogicalOperator::Gt,
        BinaryOp::Ge => LogicalOperator::Ge,
        BinaryOp::Lt => LogicalOperator::Lt,
        BinaryOp::Le => LogicalOperator::Le,
        BinaryOp::Has => LogicalOperator::Has,
        _ => return None,
    })
}

fn arithmetic(op: BinaryOp) -> Option<ArithmeticOperator> {
    Some(match op {
        BinaryOp::Add => ArithmeticOperator::Add,
        BinaryOp::Sub => ArithmeticOperator::Sub,
        BinaryOp::Mul => ArithmeticOperator::Mul,
        BinaryOp::Div | BinaryOp::DivBy => ArithmeticOperator::Div,
        BinaryOp::Mod => ArithmeticOperator::Mod,
        _ => return None,
    })
}

fn function_allowed(settings: &ValidationSettings, name: &str) -> bool {
    settings.allowed_functions.allows(name)
        || settings.allowed_functions.allows(name.to_ascii_lowercase().as_str())
}

/// Operators, functions and `$count` capability over one expression tree.
fn check_expression(e: &Bound, settings: &ValidationSettings) -> Result<(), ValidationError> {
    let mut result = Ok(());
    e.walk(&mut |node| {
        if result.is_err() {
            return;
        }
        result = match &node.kind {
            BoundKind::Binary { op, .. } => {
                if let Some(l) = logical(*op)
                    && !settings.allowed_logical_operators.allows(&l)
                {
                    Err(ValidationError::OperatorNotAllowed(op.keyword().to_owned()))
                } else if let Some(a) = arithmetic(*op)
                    && !settings.allowed_arithmetic_operators.allows(&a)
                {
                    Err(ValidationError::OperatorNotAllowed(op.keyword().to_owned()))
                } else {
                    Ok(())
                }
            }
            BoundKind::Unary { op: UnaryOp::Not, .. }
                if !settings.allowed_logical_operators.allows(&LogicalOperator::Not) =>
            {
                Err(ValidationError::OperatorNotAllowed("not".to_owned()))
            }
            BoundKind::Unary {
                op: UnaryOp::Negate,
                ..
            } if !settings
                .allowed_arithmetic_operators
                .allows(&ArithmeticOperator::Negate) =>
            {
                Err(ValidationError::OperatorNotAllowed("-".to_owned()))
            }
            BoundKind::In { .. } if !settings.allowed_logical_operators.allows(&LogicalOperator::In) => {
                Err(ValidationError::OperatorNotAllowed("in".to_owned()))
            }
            BoundKind::Call { function, .. } if !function_allowed(settings, function.name()) => {
                Err(ValidationError::FunctionNotAllowed(function.name().to_owned()))
            }
            BoundKind::IsOf { .. } if !function_allowed(settings, "isof") => {
                Err(ValidationError::FunctionNotAllowed("isof".to_owned()))
            }
            BoundKind::Cast { .. } if !function_allowed(settings, "cast") => {
                Err(ValidationError::FunctionNotAllowed("cast".to_owned()))
            }
            BoundKind::Count {
                property: Some(p),
                path,
                ..
            } if p.has(AnnotationTerm::NotCountable) => Err(ValidationError::NotCountable(path.clone())),
            _ => Ok(()),
        };
    });
    result
}

/// Node count, lambda depth and `NotFilterable`.
fn check_filter(filter: &Bound, settings: &ValidationSettings) -> Result<(), ValidationError> {
    if let Some(max) = settings.max_node_count {
        let count = filter.node_count();
        if count > max {
            return Err(ValidationError::NodeCountExceeded { count, max });
        }
    }
    if let Some(max) = settings.max_any_all_depth {
        let depth = filter.lambda_depth();
        if depth > max {
            return Err(ValidationError::AnyAllDepthExceeded { depth, max });
        }
    }
    check_property_flag(filter, AnnotationTerm::NotFilterable, ValidationError::NotFilterable)
}

fn check_orderby(orderby: &[BoundOrderBy], settings: &ValidationSettings) -> Result<(), ValidationError> {
    if let Some(max) = settings.max_order_by_nodes
        && orderby.len() > max
    {
        return Err(ValidationError::OrderByTooManyClauses {
            count: orderby.len(),
            max,
        });
    }
    for item in orderby {
        check_property_flag(&item.expr, AnnotationTerm::NotSortable, ValidationError::NotSortable)?;
    }
    Ok(())
}

fn check_property_flag(
    e: &Bound,
    term: AnnotationTerm,
    error: fn(String) -> ValidationError,
) -> Result<(), ValidationError> {
    let mut offending = None;
    e.walk(&mut |node| {
        if offending.is_none()
            && let BoundKind::Property { property, path, .. } = &node.kind
            && property.has(term)
        {
            offending = Some(path.clone());
        }
    });
    offending.map_or(Ok(()), |path| Err(error(path)))
}

fn check_projection(projection: &Projection, settings: &ValidationSettings) -> Result<(), ValidationError> {
    for selected in &projection.properties {
        if !selected.auto
            && let Some(p) = &selected.property
            && p.has(AnnotationTerm::NotSelectable)
        {
            return Err(ValidationError::NotSelectable(selected.name.to_string()));
        }
        if let Some(nested) = &selected.nested {
            check_projection(nested, settings)?;
        }
    }
    for expansion in &projection.expansions {
        check_expansion(expansion, settings)?;
    }
    Ok(())
}

fn check_expansion(expansion: &Expansion, settings: &ValidationSettings) -> Result<(), ValidationError> {
    let property = &expansion.property;
    if !expansion.auto && property.has(AnnotationTerm::NotExpandable) {
        return Err(ValidationError::NotExpandable(expansion.path.clone()));
    }
    if expansion.filter.is_some() && !settings.allowed_query_options.allows(&QueryOption::Filter) {
        return Err(ValidationError::OptionNotAllowed(QueryOption::Filter.name().to_owned()));
    }
    if !expansion.orderby.is_empty() && !settings.allowed_query_options.allows(&QueryOption::OrderBy) {
        return Err(ValidationError::OptionNotAllowed(QueryOption::OrderBy.name().to_owned()));
    }
    let max_top = min_limit(
        settings.max_top,
        property.annotations.count(AnnotationTerm::MaxTop),
    );
    check_top(expansion.top, max_top)?;
    if let (Some(value), Some(max)) = (expansion.skip, settings.max_skip)
        && value > max
    {
        return Err(ValidationError::SkipExceeded { value, max });
    }
    if expansion.count && property.has(AnnotationTerm::NotCountable) {
        return Err(ValidationError::NotCountable(expansion.path.clone()));
    }
    if let Some(filter) = &expansion.filter {
        check_expression(filter, settings)?;
        check_filter(filter, settings)?;
    }
    for item in &expansion.orderby {
        check_expression(&item.expr, settings)?;
    }
    check_orderby(&expansion.orderby, settings)?;
    check_projection(&expansion.projection, settings)
}
