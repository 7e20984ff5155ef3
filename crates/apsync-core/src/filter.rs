//! Structured row-filter expressions.
//!
//! A filter Access Provider carries either a tree of comparisons and boolean
//! aggregates, or a legacy templated string. The tree is walked with an
//! [`ExpressionVisitor`], which folds each node into an output value.

use serde::{Deserialize, Serialize};

/// A node of a filter expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterExpression {
    Literal(Literal),
    Reference(Reference),
    Comparison(Box<Comparison>),
    Aggregator(Aggregator),
    Not(Box<FilterExpression>),
}

/// A literal operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Kind of entity a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceEntityType {
    /// Fully qualified data object id, e.g. `DB.SCHEMA.TABLE.COLUMN`.
    DataObjectById,
    /// Bare column name.
    ColumnReferenceByName,
}

/// A reference operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub entity_type: ReferenceEntityType,
    pub entity_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::Equal => "=",
            ComparisonOperator::NotEqual => "!=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessThanOrEqual => "<=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterThanOrEqual => ">=",
        }
    }
}

/// Binary comparison between two operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub operator: ComparisonOperator,
    pub left_operand: FilterExpression,
    pub right_operand: FilterExpression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregatorOperator {
    And,
    Or,
}

/// N-ary boolean aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregator {
    pub operator: AggregatorOperator,
    pub operands: Vec<FilterExpression>,
}

/// Folds a [`FilterExpression`] bottom-up.
pub trait ExpressionVisitor {
    type Output;
    type Error;

    fn visit_literal(&mut self, literal: &Literal) -> Result<Self::Output, Self::Error>;

    fn visit_reference(&mut self, reference: &Reference) -> Result<Self::Output, Self::Error>;

    fn visit_comparison(
        &mut self,
        operator: ComparisonOperator,
        left: Self::Output,
        right: Self::Output,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_aggregator(
        &mut self,
        operator: AggregatorOperator,
        operands: Vec<Self::Output>,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_not(&mut self, operand: Self::Output) -> Result<Self::Output, Self::Error>;
}

impl FilterExpression {
    pub fn accept<V: ExpressionVisitor>(&self, visitor: &mut V) -> Result<V::Output, V::Error> {
        match self {
            FilterExpression::Literal(literal) => visitor.visit_literal(literal),
            FilterExpression::Reference(reference) => visitor.visit_reference(reference),
            FilterExpression::Comparison(comparison) => {
                let left = comparison.left_operand.accept(visitor)?;
                let right = comparison.right_operand.accept(visitor)?;
                visitor.visit_comparison(comparison.operator, left, right)
            }
            FilterExpression::Aggregator(aggregator) => {
                let operands = aggregator
                    .operands
                    .iter()
                    .map(|operand| operand.accept(visitor))
                    .collect::<Result<Vec<_>, _>>()?;
                visitor.visit_aggregator(aggregator.operator, operands)
            }
            FilterExpression::Not(operand) => {
                let inner = operand.accept(visitor)?;
                visitor.visit_not(inner)
            }
        }
    }

    pub fn literal(literal: Literal) -> Self {
        FilterExpression::Literal(literal)
    }

    pub fn column(entity_type: ReferenceEntityType, entity_id: impl Into<String>) -> Self {
        FilterExpression::Reference(Reference {
            entity_type,
            entity_id: entity_id.into(),
        })
    }

    pub fn compare(operator: ComparisonOperator, left: Self, right: Self) -> Self {
        FilterExpression::Comparison(Box::new(Comparison {
            operator,
            left_operand: left,
            right_operand: right,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_tree() {
        let json = r#"{
            "aggregator": {
                "operator": "and",
                "operands": [
                    {"comparison": {
                        "operator": "greaterThanOrEqual",
                        "leftOperand": {"literal": 100},
                        "rightOperand": {"reference": {"entityType": "dataObjectById", "entityId": "DB.S.T.amount"}}
                    }},
                    {"not": {"literal": false}}
                ]
            }
        }"#;

        let expr: FilterExpression = serde_json::from_str(json).unwrap();
        let FilterExpression::Aggregator(aggregator) = expr else {
            panic!("expected aggregator");
        };
        assert_eq!(aggregator.operator, AggregatorOperator::And);
        assert_eq!(aggregator.operands.len(), 2);
        assert!(matches!(
            &aggregator.operands[0],
            FilterExpression::Comparison(c) if c.left_operand == FilterExpression::Literal(Literal::Int(100))
        ));
    }
}
