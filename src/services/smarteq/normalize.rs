//! Map vehicle status documents onto attribute groups
use chrono::Utc;
use serde_json::Value;
use smarteq_common::{
    Attribute, AttributeGroup, AttributeValue, GroupKind, RetrievalStatus, UpdateKind, Vehicle,
};
use tracing::error;

/// Keys that may hold the value of a field, in order of preference.
const VALUE_KEYS: [&str; 4] = ["value", "int_value", "double_value", "bool_value"];

/// Keys that may hold the unit of a field, in order of preference.
const UNIT_KEYS: [&str; 7] = [
    "distance_unit",
    "ratio_unit",
    "clock_hour_unit",
    "gas_consumption_unit",
    "pressure_unit",
    "electricity_consumption_unit",
    "combustion_consumption_unit",
];

/// What to do with fields missing from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Missing fields are marked as not received.
    Replace,

    /// Missing fields keep their previous value.
    Merge,
}

impl From<MergeMode> for UpdateKind {
    fn from(mode: MergeMode) -> Self {
        match mode {
            MergeMode::Replace => Self::Full,
            MergeMode::Merge => Self::Partial,
        }
    }
}

/// What happened to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    /// The document was applied.
    Updated,

    /// There was no document, every field is marked as failed.
    FetchFailed,

    /// The document had no status data, every field is marked as not received.
    Malformed,
}

fn store(group: &mut AttributeGroup, field: &str, attribute: Attribute) {
    if let Err(err) = group.set(field, attribute) {
        error!("Cannot store attribute: {err}");
    }
}

fn fill(group: &mut AttributeGroup, attribute: &Attribute) {
    for field in group.kind().fields() {
        store(group, field, attribute.clone());
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn timestamp(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Parse one field of the `status.data` object.
#[must_use]
pub fn parse_attribute(raw: &Value) -> Attribute {
    // A key that is present with a null value still wins.
    let value = VALUE_KEYS
        .iter()
        .find_map(|key| raw.get(key))
        .map_or(AttributeValue::Int(-1), AttributeValue::from_json);

    let retrieval_status = raw
        .get("status")
        .map_or(RetrievalStatus::Valid, RetrievalStatus::from_json);

    let unit = UNIT_KEYS
        .iter()
        .filter_map(|key| raw.get(key))
        .find_map(text);

    Attribute {
        value,
        retrieval_status,
        timestamp: Some(timestamp(raw.get("timestamp"))),
        distance_unit: raw.get("distance_unit").and_then(text),
        display_value: raw.get("display_value").and_then(text),
        unit,
    }
}

/// Apply a vehicle status document to one group.
///
/// `None` means the document could not be fetched.
pub fn apply_group(
    group: &mut AttributeGroup,
    document: Option<&Value>,
    mode: MergeMode,
) -> GroupOutcome {
    let Some(document) = document else {
        fill(group, &Attribute::fetch_failed());
        return GroupOutcome::FetchFailed;
    };

    let Some(data) = document
        .get("status")
        .and_then(|status| status.get("data"))
        .and_then(Value::as_object)
    else {
        if !group.kind().fields().is_empty() {
            error!("Vehicle document has no status data for {}", group.kind());
        }
        fill(group, &Attribute::not_received());
        return GroupOutcome::Malformed;
    };

    for field in group.kind().fields() {
        match (data.get(*field), mode) {
            (Some(raw), _) => store(group, field, parse_attribute(raw)),
            (None, MergeMode::Replace) => store(group, field, Attribute::not_received()),
            (None, MergeMode::Merge) => {}
        }
    }

    GroupOutcome::Updated
}

/// Apply a vehicle status document to every group of a vehicle.
///
/// Only an applied document counts as a received message.
pub fn normalize_vehicle(
    vehicle: &mut Vehicle,
    document: Option<&Value>,
    mode: MergeMode,
) -> GroupOutcome {
    let mut outcome = GroupOutcome::Updated;
    for kind in GroupKind::ALL {
        outcome = apply_group(vehicle.group_mut(kind), document, mode);
    }

    if outcome == GroupOutcome::Updated {
        vehicle.mark_message_received(Utc::now(), mode.into());
    }
    outcome
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn document(data: Value) -> Value {
        json!({ "status": { "data": data } })
    }

    fn electric() -> AttributeGroup {
        AttributeGroup::new(GroupKind::Electric)
    }

    #[test]
    fn test_missing_field_replace() {
        let mut group = electric();
        let doc = document(json!({ "soc": { "value": 80, "timestamp": 1_700_000_000 } }));

        let outcome = apply_group(&mut group, Some(&doc), MergeMode::Replace);

        assert_eq!(outcome, GroupOutcome::Updated);
        let soc = group.get("soc").unwrap();
        assert_eq!(soc.value, AttributeValue::Int(80));
        assert_eq!(soc.retrieval_status, RetrievalStatus::Valid);
        assert_eq!(soc.timestamp, Some(1_700_000_000));

        let range = group.get("rangeelectric").unwrap();
        assert_eq!(range, &Attribute::not_received());
        assert_eq!(range.value, AttributeValue::Int(0));
        assert_eq!(range.retrieval_status, RetrievalStatus::Code(4));
        assert_eq!(range.timestamp, Some(0));
    }

    #[test]
    fn test_missing_field_merge() {
        let mut group = electric();
        let first = document(json!({
            "soc": { "value": 80 },
            "rangeelectric": { "int_value": 120, "distance_unit": "KILOMETERS" },
        }));
        apply_group(&mut group, Some(&first), MergeMode::Replace);
        let before = group.get("rangeelectric").unwrap().clone();

        let second = document(json!({ "soc": { "value": 79 } }));
        apply_group(&mut group, Some(&second), MergeMode::Merge);

        assert_eq!(group.get("rangeelectric").unwrap(), &before);
        assert_eq!(group.get("soc").unwrap().value, AttributeValue::Int(79));
    }

    #[test]
    fn test_fetch_failed() {
        let mut group = electric();
        let outcome = apply_group(&mut group, None, MergeMode::Replace);

        assert_eq!(outcome, GroupOutcome::FetchFailed);
        assert_eq!(group.len(), GroupKind::Electric.fields().len());
        for (_, attribute) in group.iter() {
            assert_eq!(attribute.value, AttributeValue::Int(-1));
            assert_eq!(attribute.retrieval_status, RetrievalStatus::Code(-1));
            assert_eq!(attribute.timestamp, None);
        }
    }

    #[rstest]
    #[case(json!({}))]
    #[case(json!({ "status": {} }))]
    #[case(json!({ "status": { "data": [1, 2] } }))]
    #[case(json!("garbage"))]
    fn test_malformed_document(#[case] doc: Value) {
        for mode in [MergeMode::Replace, MergeMode::Merge] {
            let mut group = electric();
            let outcome = apply_group(&mut group, Some(&doc), mode);
            assert_eq!(outcome, GroupOutcome::Malformed);
            assert_eq!(group.get("soc").unwrap(), &Attribute::not_received());
        }
    }

    #[rstest]
    #[case(json!({ "ratio_unit": "x", "pressure_unit": "y" }), Some("x"))]
    #[case(json!({ "pressure_unit": "y", "distance_unit": "KM" }), Some("KM"))]
    #[case(json!({ "combustion_consumption_unit": "L_PER_100KM" }), Some("L_PER_100KM"))]
    #[case(json!({ "value": 1 }), None)]
    fn test_unit_priority(#[case] raw: Value, #[case] expected: Option<&str>) {
        assert_eq!(parse_attribute(&raw).unit.as_deref(), expected);
    }

    #[rstest]
    #[case(json!({ "value": "ACTIVE", "int_value": 1 }), AttributeValue::Text("ACTIVE".into()))]
    #[case(json!({ "int_value": 3, "double_value": 3.5 }), AttributeValue::Int(3))]
    #[case(json!({ "double_value": 3.5 }), AttributeValue::Float(3.5))]
    #[case(json!({ "bool_value": false }), AttributeValue::Bool(false))]
    #[case(json!({ "value": null, "int_value": 1 }), AttributeValue::Null)]
    #[case(json!({ "status": "VALID" }), AttributeValue::Int(-1))]
    fn test_value_fallback(#[case] raw: Value, #[case] expected: AttributeValue) {
        assert_eq!(parse_attribute(&raw).value, expected);
    }

    #[rstest]
    #[case(json!({ "timestamp": 1_600_000_000 }), 1_600_000_000)]
    #[case(json!({ "timestamp": "1600000000" }), 1_600_000_000)]
    #[case(json!({ "timestamp": "yesterday" }), 0)]
    #[case(json!({}), 0)]
    fn test_timestamp(#[case] raw: Value, #[case] expected: i64) {
        assert_eq!(parse_attribute(&raw).timestamp, Some(expected));
    }

    #[test]
    fn test_status_and_metadata() {
        let attribute = parse_attribute(&json!({
            "value": 250,
            "status": 0,
            "distance_unit": "KILOMETERS",
            "display_value": "250 km",
        }));
        assert_eq!(attribute.retrieval_status, RetrievalStatus::Code(0));
        assert!(attribute.retrieval_status.is_valid());
        assert_eq!(attribute.distance_unit.as_deref(), Some("KILOMETERS"));
        assert_eq!(attribute.display_value.as_deref(), Some("250 km"));
        assert_eq!(attribute.unit.as_deref(), Some("KILOMETERS"));

        let attribute = parse_attribute(&json!({ "value": 1, "status": "NOT_RECEIVED" }));
        assert_eq!(attribute.retrieval_status, RetrievalStatus::NotReceived);
    }

    #[test]
    fn test_normalize_vehicle() {
        let mut vehicle = Vehicle::new("fin", None);
        let doc = document(json!({
            "odo": { "int_value": 12_345, "distance_unit": "KILOMETERS" },
            "tirewarningsrdk": { "value": "0" },
        }));

        let outcome = normalize_vehicle(&mut vehicle, Some(&doc), MergeMode::Replace);

        assert_eq!(outcome, GroupOutcome::Updated);
        assert_eq!(vehicle.messages_received().full, 1);
        assert!(vehicle.last_message_received().is_some());
        let odo = vehicle.group(GroupKind::Odometer).get("odo").unwrap();
        assert_eq!(odo.value, AttributeValue::Int(12_345));
        let soc = vehicle.group(GroupKind::Electric).get("soc").unwrap();
        assert_eq!(soc, &Attribute::not_received());
        assert!(vehicle.group(GroupKind::Doors).is_empty());

        let outcome = normalize_vehicle(&mut vehicle, None, MergeMode::Replace);
        assert_eq!(outcome, GroupOutcome::FetchFailed);
        assert_eq!(vehicle.messages_received().full, 1);
        let odo = vehicle.group(GroupKind::Odometer).get("odo").unwrap();
        assert_eq!(odo, &Attribute::fetch_failed());
    }
}
