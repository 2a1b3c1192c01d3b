//! Category rules as stored in the config table, converted into typed
//! `CategoryDefinition`s. All format quirks of the stored rows are handled
//! here and nowhere else.

use serde::Deserialize;
use tracing::warn;

use crate::db::models::CategoryRow;
use crate::error::{AppError, Result};
use crate::types::{CategoryDefinition, GateAction, GateField, GateOperator, GateValue, HardGate};

/// Keyword lists were historically stored either as a JSON array
/// (`["dump trailer","utility trailer"]`) or as comma/newline separated text.
/// Both become one lowercase, de-duplicated list in stored order.
pub fn parse_keyword_list(raw: Option<&str>) -> std::result::Result<Vec<String>, String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };

    let items: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str::<Vec<String>>(raw).map_err(|e| format!("keyword JSON: {e}"))?
    } else {
        raw.split([',', '\n']).map(str::to_string).collect()
    };

    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let kw = item.trim().to_lowercase();
        if !kw.is_empty() && !out.contains(&kw) {
            out.push(kw);
        }
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct StoredGate {
    field: String,
    operator: String,
    value: serde_json::Value,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Clone, Copy)]
enum FieldKind {
    Text,
    Number,
    Bool,
    List,
}

fn field_kind(field: GateField) -> FieldKind {
    match field {
        GateField::Price => FieldKind::Number,
        GateField::PriceVerified => FieldKind::Bool,
        GateField::SourceCategories | GateField::SourceTags => FieldKind::List,
        GateField::Source
        | GateField::Title
        | GateField::Description
        | GateField::PriceKind
        | GateField::LotStatus
        | GateField::Location => FieldKind::Text,
    }
}

fn string_array(v: &serde_json::Value) -> Option<Vec<String>> {
    v.as_array()?
        .iter()
        .map(|x| x.as_str().map(|s| s.trim().to_lowercase()))
        .collect()
}

/// Check that the operator makes sense for the field and coerce the value
/// into its typed form.
fn typed_value(field: GateField, op: GateOperator, v: &serde_json::Value) -> std::result::Result<GateValue, String> {
    use FieldKind::*;
    use GateOperator::*;

    let bad = || {
        format!(
            "operator '{}' with value {v} is not valid for field '{}'",
            op.as_str(),
            field.as_str()
        )
    };

    match (field_kind(field), op) {
        (Number, Gt | Lt | Gte | Lte | Equals) => v.as_f64().map(GateValue::Number).ok_or_else(bad),
        (Number, In) => v
            .as_array()
            .and_then(|a| a.iter().map(|x| x.as_f64().map(|n| n.to_string())).collect::<Option<Vec<_>>>())
            .map(GateValue::List)
            .ok_or_else(bad),
        (Bool, Equals) => v.as_bool().map(GateValue::Bool).ok_or_else(bad),
        (Text | List, Equals | Contains) => v
            .as_str()
            .map(|s| GateValue::Text(s.trim().to_lowercase()))
            .ok_or_else(bad),
        (Text | List, In) => string_array(v).map(GateValue::List).ok_or_else(bad),
        _ => Err(bad()),
    }
}

/// Parse the stored JSON gate list. Unknown fields or operators are errors,
/// never silently ignored.
pub fn parse_hard_gates(raw: Option<&str>) -> std::result::Result<Vec<HardGate>, String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };
    let stored: Vec<StoredGate> = serde_json::from_str(raw).map_err(|e| format!("hard gate JSON: {e}"))?;

    stored
        .into_iter()
        .map(|g| {
            let field = GateField::parse(g.field.trim())
                .ok_or_else(|| format!("unknown hard gate field '{}'", g.field))?;
            let operator = GateOperator::parse(g.operator.trim().to_lowercase().as_str())
                .ok_or_else(|| format!("unknown hard gate operator '{}'", g.operator))?;
            let action = match g.action.as_deref().map(|a| a.trim().to_lowercase()).as_deref() {
                None | Some("reject") => GateAction::Reject,
                Some("flag") => GateAction::Flag,
                Some(other) => return Err(format!("unknown hard gate action '{other}'")),
            };
            let value = typed_value(field, operator, &g.value)?;
            Ok(HardGate { field, operator, value, action })
        })
        .collect()
}

impl TryFrom<CategoryRow> for CategoryDefinition {
    type Error = AppError;

    fn try_from(row: CategoryRow) -> Result<Self> {
        let invalid = |reason: String| AppError::InvalidCategory { category: row.id.clone(), reason };

        let positive_keywords = parse_keyword_list(row.positive_keywords.as_deref()).map_err(invalid)?;
        let negative_keywords = parse_keyword_list(row.negative_keywords.as_deref()).map_err(invalid)?;
        let hard_gates = parse_hard_gates(row.hard_gates.as_deref()).map_err(invalid)?;
        if !(0..=100).contains(&row.min_score) {
            return Err(invalid(format!("min_score {} outside 0-100", row.min_score)));
        }

        Ok(CategoryDefinition {
            id: row.id.clone(),
            name: row.name.clone(),
            enabled: row.enabled != 0,
            min_score: row.min_score,
            requires_snapshot: row.requires_snapshot != 0,
            positive_keywords,
            negative_keywords,
            hard_gates,
        })
    }
}

/// Convert stored rows, dropping (and reporting) the ones that fail
/// validation so one bad row cannot disable every category.
pub fn from_rows(rows: Vec<CategoryRow>) -> (Vec<CategoryDefinition>, Vec<String>) {
    let mut categories = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();
    for row in rows {
        match CategoryDefinition::try_from(row) {
            Ok(c) => categories.push(c),
            Err(e) => {
                warn!(error = %e, "Skipping invalid category");
                errors.push(e.to_string());
            }
        }
    }
    (categories, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, positive: &str, gates: Option<&str>) -> CategoryRow {
        CategoryRow {
            id: id.to_string(),
            name: id.to_string(),
            enabled: 1,
            min_score: 70,
            requires_snapshot: 1,
            positive_keywords: Some(positive.to_string()),
            negative_keywords: None,
            hard_gates: gates.map(str::to_string),
        }
    }

    #[test]
    fn keyword_list_accepts_json_and_csv() {
        let json = parse_keyword_list(Some(r#"["Dump Trailer", "utility trailer", "dump trailer"]"#)).unwrap();
        assert_eq!(json, vec!["dump trailer", "utility trailer"]);

        let csv = parse_keyword_list(Some(" Dump Trailer ,utility trailer\ncargo trailer,, ")).unwrap();
        assert_eq!(csv, vec!["dump trailer", "utility trailer", "cargo trailer"]);

        assert!(parse_keyword_list(None).unwrap().is_empty());
        assert!(parse_keyword_list(Some("[not json")).is_err());
    }

    #[test]
    fn hard_gates_are_typed() {
        let gates = parse_hard_gates(Some(
            r#"[
                {"field": "price", "operator": "gt", "value": 2500, "action": "reject"},
                {"field": "lot_status", "operator": "in", "value": ["closed", "unknown"], "action": "flag"},
                {"field": "location", "operator": "contains", "value": "Alaska"}
            ]"#,
        ))
        .unwrap();
        assert_eq!(gates.len(), 3);
        assert_eq!(gates[0].value, GateValue::Number(2500.0));
        assert_eq!(gates[1].action, GateAction::Flag);
        assert_eq!(gates[2].value, GateValue::Text("alaska".into()));
        assert_eq!(gates[2].action, GateAction::Reject);
    }

    #[test]
    fn unknown_gate_field_is_a_config_error() {
        let err = parse_hard_gates(Some(r#"[{"field": "mileage", "operator": "lt", "value": 1}]"#)).unwrap_err();
        assert!(err.contains("mileage"), "got: {err}");
    }

    #[test]
    fn operator_must_fit_field_type() {
        assert!(parse_hard_gates(Some(r#"[{"field": "title", "operator": "gt", "value": 3}]"#)).is_err());
        assert!(parse_hard_gates(Some(r#"[{"field": "price", "operator": "lt", "value": "cheap"}]"#)).is_err());
    }

    #[test]
    fn invalid_rows_are_dropped_not_fatal() {
        let rows = vec![
            row("TRAILERS", "utility trailer", None),
            row("BROKEN", "x", Some(r#"[{"field": "nope", "operator": "eq", "value": 1}]"#)),
        ];
        let (cats, errors) = from_rows(rows);
        assert_eq!(cats.len(), 1);
        assert_eq!(cats[0].id, "TRAILERS");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("BROKEN"));
    }
}
