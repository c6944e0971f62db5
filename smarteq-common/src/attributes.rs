//! Vehicle attributes and the fixed attribute groups they live in
use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// A scalar value as reported by the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value
    Null,

    /// A boolean value
    Bool(bool),

    /// An integer value
    Int(i64),

    /// A floating point value
    Float(f64),

    /// A text value
    Text(String),
}

impl AttributeValue {
    /// Convert a JSON value into an attribute value.
    ///
    /// Arrays and objects are not scalars, they are kept as their JSON text.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map_or_else(|| n.as_f64().map_or(Self::Null, Self::Float), Self::Int),
            Value::String(s) => Self::Text(s.clone()),
            other @ (Value::Array(_) | Value::Object(_)) => Self::Text(other.to_string()),
        }
    }

    /// Is this the null value?
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Is the value of an attribute trustworthy?
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalStatus {
    /// The value was received and is valid.
    Valid,

    /// The vehicle has not reported this value.
    NotReceived,

    /// The vendor reported an error code for this value.
    Error(String),

    /// A numeric status code.
    Code(i64),
}

impl RetrievalStatus {
    /// The vehicle document could not be fetched at all.
    pub const FETCH_FAILED: Self = Self::Code(-1);

    /// The field was missing from the vehicle document.
    pub const MISSING: Self = Self::Code(4);

    /// Parse the `status` field of a vendor attribute.
    ///
    /// Anything that is neither a string nor an integer is unknown and maps to [`Self::MISSING`].
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => match s.as_str() {
                "VALID" => Self::Valid,
                "NOT_RECEIVED" => Self::NotReceived,
                other => Self::Error(other.to_string()),
            },
            Value::Number(n) => n.as_i64().map_or(Self::MISSING, Self::Code),
            _ => Self::MISSING,
        }
    }

    /// Can the value be trusted?
    ///
    /// The vendor uses both `VALID` and the numeric code 0 for valid values.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid | Self::Code(0))
    }
}

impl fmt::Display for RetrievalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "VALID"),
            Self::NotReceived => write!(f, "NOT_RECEIVED"),
            Self::Error(code) => write!(f, "{code}"),
            Self::Code(code) => write!(f, "{code}"),
        }
    }
}

impl Serialize for RetrievalStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Code(code) => serializer.serialize_i64(*code),
            other => serializer.collect_str(other),
        }
    }
}

/// One value of a vehicle, with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    /// The value
    pub value: AttributeValue,

    /// Can the value be trusted?
    pub retrieval_status: RetrievalStatus,

    /// Unix time in seconds the vehicle reported the value, if known.
    pub timestamp: Option<i64>,

    /// The distance unit reported with the value.
    pub distance_unit: Option<String>,

    /// The value formatted by the vendor.
    pub display_value: Option<String>,

    /// The unit of the value.
    pub unit: Option<String>,
}

impl Attribute {
    /// Create an attribute without unit metadata.
    #[must_use]
    pub fn new(
        value: impl Into<AttributeValue>,
        retrieval_status: RetrievalStatus,
        timestamp: Option<i64>,
    ) -> Self {
        Self {
            value: value.into(),
            retrieval_status,
            timestamp,
            distance_unit: None,
            display_value: None,
            unit: None,
        }
    }

    /// The placeholder used when the vehicle document could not be fetched.
    #[must_use]
    pub fn fetch_failed() -> Self {
        Self::new(-1, RetrievalStatus::FETCH_FAILED, None)
    }

    /// The placeholder used when a field is missing from the vehicle document.
    #[must_use]
    pub fn not_received() -> Self {
        Self::new(0, RetrievalStatus::MISSING, Some(0))
    }

    /// The timestamp as a date time.
    ///
    /// Zero means the vehicle never sent one.
    #[must_use]
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .filter(|ts| *ts > 0)
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

/// Error looking up an attribute by name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// There is no group with this name.
    #[error("Unknown attribute group: {0}")]
    UnknownGroup(String),

    /// The group does not contain this field.
    #[error("Unknown attribute {field} in group {group}")]
    UnknownField {
        /// The group that was searched
        group: GroupKind,
        /// The field that was requested
        field: String,
    },

    /// The key is not of the form `<group>.<field>`.
    #[error("Invalid attribute key {0}, expected <group>.<field>")]
    InvalidKey(String),
}

/// The attribute groups of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKind {
    /// Odometer and eco score
    Odometer,
    /// Battery and charging
    Electric,
    /// Tire pressure warnings
    Tires,
    /// Doors
    Doors,
    /// Windows
    Windows,
    /// Position of the vehicle
    Location,
    /// Auxiliary heating
    Auxheat,
    /// Preconditioning
    Precond,
    /// Features the vehicle supports
    Features,
    /// Generic binary sensors
    BinarySensors,
    /// Car alarm
    CarAlarm,
    /// Remote start
    RemoteStart,
}

const ODOMETER_FIELDS: &[&str] = &[
    "odo",
    "ecoscoretotal",
    "ecoScoreFluentDriving",
    "ecoScoreSpeed",
    "serviceintervaldays",
    "serviceintervaldistance",
];

const ELECTRIC_FIELDS: &[&str] = &[
    "rangeelectric",
    "electricconsumptionstart",
    "soc",
    "chargingactive",
    "chargingstatus",
    "precondNow",
];

const TIRE_FIELDS: &[&str] = &["tirewarningsrdk"];

impl GroupKind {
    /// Number of attribute groups.
    pub const COUNT: usize = 12;

    /// All attribute groups, in a stable order.
    pub const ALL: [GroupKind; Self::COUNT] = [
        Self::Odometer,
        Self::Electric,
        Self::Tires,
        Self::Doors,
        Self::Windows,
        Self::Location,
        Self::Auxheat,
        Self::Precond,
        Self::Features,
        Self::BinarySensors,
        Self::CarAlarm,
        Self::RemoteStart,
    ];

    /// The name of the group.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Odometer => "odometer",
            Self::Electric => "electric",
            Self::Tires => "tires",
            Self::Doors => "doors",
            Self::Windows => "windows",
            Self::Location => "location",
            Self::Auxheat => "auxheat",
            Self::Precond => "precond",
            Self::Features => "features",
            Self::BinarySensors => "binary_sensors",
            Self::CarAlarm => "car_alarm",
            Self::RemoteStart => "remote_start",
        }
    }

    /// The fields this group may contain.
    #[must_use]
    pub const fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Odometer => ODOMETER_FIELDS,
            Self::Electric => ELECTRIC_FIELDS,
            Self::Tires => TIRE_FIELDS,
            Self::Doors
            | Self::Windows
            | Self::Location
            | Self::Auxheat
            | Self::Precond
            | Self::Features
            | Self::BinarySensors
            | Self::CarAlarm
            | Self::RemoteStart => &[],
        }
    }

    /// Find a field of this group by name.
    ///
    /// # Errors
    ///
    /// Returns `LookupError::UnknownField` if the group does not contain this field.
    pub fn field(self, name: &str) -> Result<&'static str, LookupError> {
        self.fields()
            .iter()
            .copied()
            .find(|field| *field == name)
            .ok_or_else(|| LookupError::UnknownField {
                group: self,
                field: name.to_string(),
            })
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for GroupKind {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| LookupError::UnknownGroup(s.to_string()))
    }
}

/// The attributes of one group, keyed by field name.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeGroup {
    kind: GroupKind,
    attributes: BTreeMap<&'static str, Attribute>,
}

impl AttributeGroup {
    /// Create an empty group.
    #[must_use]
    pub const fn new(kind: GroupKind) -> Self {
        Self {
            kind,
            attributes: BTreeMap::new(),
        }
    }

    /// Which group is this?
    #[must_use]
    pub const fn kind(&self) -> GroupKind {
        self.kind
    }

    /// Get an attribute by field name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Attribute> {
        self.attributes.get(field)
    }

    /// Set an attribute.
    ///
    /// # Errors
    ///
    /// Returns `LookupError::UnknownField` if the field is not allowed in this group.
    pub fn set(&mut self, field: &str, attribute: Attribute) -> Result<(), LookupError> {
        let field = self.kind.field(field)?;
        self.attributes.insert(field, attribute);
        Ok(())
    }

    /// Iterate over the attributes that have been set.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Attribute)> {
        self.attributes.iter().map(|(field, attr)| (*field, attr))
    }

    /// Number of attributes that have been set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Have no attributes been set?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// A validated reference to one attribute of a vehicle.
///
/// Written as `<group>.<field>`, e.g. `electric.soc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct AttributeKey {
    group: GroupKind,
    field: &'static str,
}

impl AttributeKey {
    /// Create a key for a field of a group.
    ///
    /// # Errors
    ///
    /// Returns `LookupError::UnknownField` if the group does not contain this field.
    pub fn new(group: GroupKind, field: &str) -> Result<Self, LookupError> {
        let field = group.field(field)?;
        Ok(Self { group, field })
    }

    /// Create a key from a group name and a field name.
    ///
    /// # Errors
    ///
    /// Returns an error if the group or the field is unknown.
    pub fn parse(group: &str, field: &str) -> Result<Self, LookupError> {
        Self::new(group.parse()?, field)
    }

    /// The group.
    #[must_use]
    pub const fn group(self) -> GroupKind {
        self.group
    }

    /// The field.
    #[must_use]
    pub const fn field(self) -> &'static str {
        self.field
    }

}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.field)
    }
}

impl FromStr for AttributeKey {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, field) = s
            .split_once('.')
            .ok_or_else(|| LookupError::InvalidKey(s.to_string()))?;
        Self::parse(group, field)
    }
}

impl<'de> Deserialize<'de> for AttributeKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(de::Error::custom)
    }
}

impl From<AttributeKey> for String {
    fn from(key: AttributeKey) -> Self {
        key.to_string()
    }
}

pub(crate) fn empty_groups() -> [AttributeGroup; GroupKind::COUNT] {
    GroupKind::ALL.map(AttributeGroup::new)
}

pub(crate) const fn group_index(kind: GroupKind) -> usize {
    kind.index()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_group_names_round_trip() {
        for kind in GroupKind::ALL {
            assert_eq!(kind.name().parse::<GroupKind>().unwrap(), kind);
        }
        assert_eq!(GroupKind::ALL[group_index(GroupKind::RemoteStart)], GroupKind::RemoteStart);
    }

    #[test]
    fn test_attribute_key_parse() {
        let key: AttributeKey = "electric.soc".parse().unwrap();
        assert_eq!(key.group(), GroupKind::Electric);
        assert_eq!(key.field(), "soc");
        assert_eq!(key.to_string(), "electric.soc");

        let key = AttributeKey::parse("odometer", "ecoScoreSpeed").unwrap();
        assert_eq!(key.group(), GroupKind::Odometer);
    }

    #[rstest]
    #[case("electric", "nope", LookupError::UnknownField { group: GroupKind::Electric, field: "nope".into() })]
    #[case("engine", "soc", LookupError::UnknownGroup("engine".into()))]
    #[case("doors", "soc", LookupError::UnknownField { group: GroupKind::Doors, field: "soc".into() })]
    fn test_attribute_key_rejects_unknown(
        #[case] group: &str,
        #[case] field: &str,
        #[case] expected: LookupError,
    ) {
        assert_eq!(AttributeKey::parse(group, field).unwrap_err(), expected);
    }

    #[test]
    fn test_attribute_key_deserialize_validates() {
        let keys: Vec<AttributeKey> =
            serde_json::from_value(json!(["electric.soc", "tires.tirewarningsrdk"])).unwrap();
        assert_eq!(keys.len(), 2);

        let err = serde_json::from_value::<AttributeKey>(json!("electric")).unwrap_err();
        assert!(err.to_string().contains("expected <group>.<field>"));
    }

    #[derive(Deserialize)]
    struct Sensors {
        sensors: Vec<AttributeKey>,
    }

    #[test]
    fn test_attribute_key_from_borrowed_input() {
        let input = String::from(r#"{"sensors": ["odometer.odo", "electric.soc"]}"#);
        let parsed: Sensors = serde_json::from_str(&input).unwrap();
        drop(input);

        assert_eq!(
            parsed.sensors,
            vec![
                AttributeKey::new(GroupKind::Odometer, "odo").unwrap(),
                AttributeKey::new(GroupKind::Electric, "soc").unwrap(),
            ]
        );
        assert_eq!(
            serde_json::to_value(parsed.sensors[1]).unwrap(),
            json!("electric.soc")
        );
    }

    #[test]
    fn test_group_set_only_allows_known_fields() {
        let mut group = AttributeGroup::new(GroupKind::Tires);
        group
            .set("tirewarningsrdk", Attribute::new(1, RetrievalStatus::Valid, Some(5)))
            .unwrap();
        assert_eq!(group.len(), 1);
        assert!(group.set("soc", Attribute::not_received()).is_err());
        assert_eq!(group.len(), 1);
    }

    #[rstest]
    #[case(json!("VALID"), RetrievalStatus::Valid)]
    #[case(json!("NOT_RECEIVED"), RetrievalStatus::NotReceived)]
    #[case(json!("INVALID"), RetrievalStatus::Error("INVALID".into()))]
    #[case(json!(0), RetrievalStatus::Code(0))]
    #[case(json!(null), RetrievalStatus::MISSING)]
    fn test_retrieval_status_from_json(#[case] value: Value, #[case] expected: RetrievalStatus) {
        assert_eq!(RetrievalStatus::from_json(&value), expected);
    }

    #[test]
    fn test_retrieval_status_serialize() {
        assert_eq!(serde_json::to_value(RetrievalStatus::Valid).unwrap(), json!("VALID"));
        assert_eq!(serde_json::to_value(RetrievalStatus::FETCH_FAILED).unwrap(), json!(-1));
        assert!(RetrievalStatus::Code(0).is_valid());
        assert!(!RetrievalStatus::MISSING.is_valid());
    }

    #[rstest]
    #[case(json!(12), AttributeValue::Int(12))]
    #[case(json!(12.5), AttributeValue::Float(12.5))]
    #[case(json!(true), AttributeValue::Bool(true))]
    #[case(json!("ACTIVE"), AttributeValue::Text("ACTIVE".into()))]
    #[case(json!(null), AttributeValue::Null)]
    fn test_attribute_value_from_json(#[case] value: Value, #[case] expected: AttributeValue) {
        assert_eq!(AttributeValue::from_json(&value), expected);
    }

    #[test]
    fn test_timestamp_utc() {
        assert_eq!(Attribute::not_received().timestamp_utc(), None);
        assert_eq!(Attribute::fetch_failed().timestamp_utc(), None);
        let attr = Attribute::new(1, RetrievalStatus::Valid, Some(1_700_000_000));
        assert_eq!(attr.timestamp_utc().unwrap().timestamp(), 1_700_000_000);
    }
}
