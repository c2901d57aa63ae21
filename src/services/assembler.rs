use crate::error::TranslationError;
use crate::models::{
    quote_identifier, AggregateFunction, ColumnInfo, ColumnType, ConditionValue, Connector, Literal, Operator,
    ParsedIntent, SchemaContext,
};
use crate::validation::SqlValidator;

/// Check that `operator` and `value` make sense for `column`.
///
/// Ordering comparisons need a numeric or date column (dates compare
/// lexically), LIKE needs a text-like column, and a word cannot be compared
/// against a numeric column. Column-to-column comparisons need matching types.
pub fn check_operator(
    column: &ColumnInfo,
    operator: Operator,
    value: &ConditionValue,
    schema: &SchemaContext,
) -> Result<(), TranslationError> {
    let column_type = column.inferred_type;
    let mismatch = || TranslationError::TypeMismatch {
        column: column.name.clone(),
        column_type,
        operator,
    };

    if operator.is_ordering() && !column_type.is_orderable() {
        return Err(mismatch());
    }
    if operator == Operator::Like && matches!(column_type, ColumnType::Numeric | ColumnType::Date) {
        return Err(mismatch());
    }

    for literal in value.literals() {
        match literal {
            Literal::Text(_) if column_type == ColumnType::Numeric => return Err(mismatch()),
            Literal::Column(other) => {
                let other_type = schema.column_type(other).ok_or_else(|| {
                    TranslationError::Assembly(format!(
                        "column '{}' is not in table '{}'",
                        other, schema.table_name
                    ))
                })?;
                let comparable = other_type == column_type
                    || (column_type.is_dimension()
                        && other_type.is_dimension()
                        && column_type != ColumnType::Date
                        && other_type != ColumnType::Date);
                if !comparable || operator == Operator::Like {
                    return Err(mismatch());
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Turns a ParsedIntent into one SELECT statement
pub struct SqlAssembler {
    default_limit: u64,
}

impl SqlAssembler {
    pub fn new(default_limit: u64) -> Self {
        Self { default_limit }
    }

    pub fn default_limit(&self) -> u64 {
        self.default_limit
    }

    pub fn assemble(&self, intent: &ParsedIntent, schema: &SchemaContext) -> Result<String, TranslationError> {
        self.validate(intent, schema)?;

        let grouped = !intent.group_by.is_empty() || intent.aggregation.is_some();

        // SELECT
        let mut select: Vec<String> = intent.group_by.iter().map(|c| quote_identifier(c)).collect();
        if let Some(aggregation) = &intent.aggregation {
            select.push(aggregation.to_sql());
        }
        if !grouped {
            for column in &intent.projection {
                let quoted = quote_identifier(column);
                if !select.contains(&quoted) {
                    select.push(quoted);
                }
            }
        }
        let select_list = if select.is_empty() {
            "*".to_string()
        } else {
            select.join(", ")
        };

        let mut sql = format!(
            "SELECT {} FROM {}",
            select_list,
            quote_identifier(&schema.table_name)
        );

        // WHERE, combined strictly left to right
        if let Some(where_clause) = where_clause(intent) {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }

        if !intent.group_by.is_empty() {
            let columns: Vec<String> = intent.group_by.iter().map(|c| quote_identifier(c)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&columns.join(", "));
        }

        if let Some(order) = &intent.order_by {
            let target = match &intent.aggregation {
                Some(aggregation) if aggregation.covers(&order.column) => aggregation.alias(),
                _ => order.column.clone(),
            };
            sql.push_str(&format!(
                " ORDER BY {} {}",
                quote_identifier(&target),
                order.direction.as_sql()
            ));
        }

        let limit = match intent.limit {
            Some(limit) => Some(limit),
            None if !grouped => Some(self.default_limit),
            None => None,
        };
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        SqlValidator::validate_select_only(&sql)
            .map_err(|e| TranslationError::Assembly(e.to_string()))?;

        tracing::debug!("Assembled SQL: {}", sql);
        Ok(sql)
    }

    fn validate(&self, intent: &ParsedIntent, schema: &SchemaContext) -> Result<(), TranslationError> {
        // Ordering may name the aggregate's alias ("record_count") rather than a column
        let order_alias = intent
            .order_by
            .as_ref()
            .filter(|o| {
                intent
                    .aggregation
                    .as_ref()
                    .map(|a| a.alias().eq_ignore_ascii_case(&o.column))
                    .unwrap_or(false)
            })
            .map(|o| o.column.as_str());

        for column in intent.referenced_columns() {
            if Some(column) == order_alias {
                continue;
            }
            if !schema.has_column(column) {
                return Err(TranslationError::Assembly(format!(
                    "column '{}' is not in table '{}'",
                    column, schema.table_name
                )));
            }
        }

        for condition in &intent.conditions {
            if let Some(column) = schema.column(&condition.column) {
                check_operator(column, condition.operator, &condition.value, schema)
                    .map_err(|e| TranslationError::Assembly(e.to_string()))?;
            }
        }

        if let Some(aggregation) = &intent.aggregation {
            match &aggregation.target_column {
                Some(target) => {
                    let numeric = schema.column_type(target) == Some(ColumnType::Numeric);
                    if aggregation.function.requires_numeric() && !numeric {
                        return Err(TranslationError::Assembly(format!(
                            "{} needs a numeric column, '{}' is not numeric",
                            aggregation.function.as_sql(),
                            target
                        )));
                    }
                }
                None if aggregation.function != AggregateFunction::Count => {
                    return Err(TranslationError::Assembly(format!(
                        "{} requested with no column to aggregate",
                        aggregation.function.as_sql()
                    )));
                }
                None => {}
            }
        }

        if let Some(order) = &intent.order_by {
            let grouped = !intent.group_by.is_empty() || intent.aggregation.is_some();
            let in_groups = intent.group_by.iter().any(|g| g.eq_ignore_ascii_case(&order.column));
            let aggregated = intent
                .aggregation
                .as_ref()
                .map(|a| a.covers(&order.column))
                .unwrap_or(false);
            if grouped && !in_groups && !aggregated {
                return Err(TranslationError::Assembly(format!(
                    "cannot order grouped rows by '{}'",
                    order.column
                )));
            }
        }

        Ok(())
    }
}

fn where_clause(intent: &ParsedIntent) -> Option<String> {
    let mut conditions = intent.conditions.iter();
    let first = conditions.next()?;
    let mut clause = first.to_sql();
    let mut current: Option<Connector> = None;

    for condition in conditions {
        let connector = condition.connector;
        if current.is_some() && current != Some(connector) {
            clause = format!("({})", clause);
        }
        clause = format!("{} {} {}", clause, connector.as_sql(), condition.to_sql());
        current = Some(connector);
    }

    Some(clause)
}
