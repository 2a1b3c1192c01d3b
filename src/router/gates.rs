use crate::router::RouterInput;
use crate::types::{GateField, GateOperator, GateValue, HardGate};

/// Typed view of one input field. The set of fields is closed; see
/// `GateField`.
enum FieldValue<'a> {
    Text(Option<String>),
    Number(Option<f64>),
    Bool(bool),
    List(&'a [String]),
}

fn field_value<'a>(input: &'a RouterInput, field: GateField) -> FieldValue<'a> {
    let text = |s: Option<&str>| FieldValue::Text(s.map(|s| s.trim().to_lowercase()));
    match field {
        GateField::Source => text(Some(&input.source)),
        GateField::Title => text(Some(&input.title)),
        GateField::Description => text(input.description.as_deref()),
        GateField::Price => FieldValue::Number(input.price),
        GateField::PriceKind => text(Some(input.price_kind.as_str())),
        GateField::PriceVerified => FieldValue::Bool(input.price_verified),
        GateField::LotStatus => text(Some(input.lot_status.as_str())),
        GateField::Location => text(input.location.as_deref()),
        GateField::SourceCategories => FieldValue::List(&input.source_categories),
        GateField::SourceTags => FieldValue::List(&input.source_tags),
    }
}

/// True when the gate's predicate holds for `input`. A missing field value
/// never fires a gate.
pub fn fires(gate: &HardGate, input: &RouterInput) -> bool {
    use GateOperator::*;

    match (field_value(input, gate.field), &gate.value) {
        (FieldValue::Number(Some(n)), GateValue::Number(v)) => match gate.operator {
            Gt => n > *v,
            Lt => n < *v,
            Gte => n >= *v,
            Lte => n <= *v,
            Equals => (n - v).abs() < f64::EPSILON,
            _ => false,
        },
        (FieldValue::Number(Some(n)), GateValue::List(items)) if gate.operator == In => {
            items.iter().any(|i| i.parse::<f64>().is_ok_and(|x| (x - n).abs() < f64::EPSILON))
        }
        (FieldValue::Bool(b), GateValue::Bool(v)) if gate.operator == Equals => b == *v,
        (FieldValue::Text(Some(t)), GateValue::Text(v)) => match gate.operator {
            Equals => t == *v,
            Contains => t.contains(v.as_str()),
            _ => false,
        },
        (FieldValue::Text(Some(t)), GateValue::List(items)) if gate.operator == In => items.contains(&t),
        (FieldValue::List(values), GateValue::Text(v)) => {
            let mut lowered = values.iter().map(|s| s.trim().to_lowercase());
            match gate.operator {
                Equals => lowered.any(|s| s == *v),
                Contains => lowered.any(|s| s.contains(v.as_str())),
                _ => false,
            }
        }
        (FieldValue::List(values), GateValue::List(items)) if gate.operator == In => values
            .iter()
            .any(|s| items.contains(&s.trim().to_lowercase())),
        _ => false,
    }
}
