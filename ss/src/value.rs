//! Nested state values with numeric-aware keys
//!
//! Simulation snapshots are nested maps whose keys are timestep labels
//! (`1.0`), integers, or names. JSON only has string keys: serializing a map
//! renders every key through `Display`, and deserializing yields text keys
//! only. [`crate::codec::restore_numeric_keys`] repairs that erosion where it
//! matters.

use indexmap::IndexMap;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Key of a [`StateMap`]
///
/// Numeric keys compare numerically across variants, so `Int(1)` and
/// `Float(1.0)` address the same entry and hash alike.
#[derive(Debug, Clone)]
pub enum StateKey {
    Int(i64),
    Float(f64),
    Text(String),
}

impl StateKey {
    /// Parse text the way step labels are written: text containing `.` as a
    /// float, anything else as an integer.
    pub fn parse_numeric(text: &str) -> Option<StateKey> {
        if text.contains('.') {
            text.parse::<f64>().ok().map(StateKey::Float)
        } else {
            text.parse::<i64>().ok().map(StateKey::Int)
        }
    }

    /// True when the key is a number, or text that parses as one
    pub fn is_step_label(&self) -> bool {
        match self {
            StateKey::Int(_) | StateKey::Float(_) => true,
            StateKey::Text(text) => StateKey::parse_numeric(text).is_some(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateKey::Int(i) => Some(*i as f64),
            StateKey::Float(x) => Some(*x),
            StateKey::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateKey::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// What a key compares and hashes by
#[derive(PartialEq, Eq, Hash)]
enum KeyIdentity<'a> {
    Int(i64),
    FloatBits(u64),
    Text(&'a str),
}

impl StateKey {
    fn identity(&self) -> KeyIdentity<'_> {
        match self {
            StateKey::Int(i) => KeyIdentity::Int(*i),
            // Integral floats in i64 range share the identity of the integer
            StateKey::Float(x) if x.fract() == 0.0 && *x >= i64::MIN as f64 && *x < i64::MAX as f64 => {
                KeyIdentity::Int(*x as i64)
            }
            StateKey::Float(x) if x.is_nan() => KeyIdentity::FloatBits(f64::NAN.to_bits()),
            StateKey::Float(x) => KeyIdentity::FloatBits(x.to_bits()),
            StateKey::Text(text) => KeyIdentity::Text(text),
        }
    }
}

impl PartialEq for StateKey {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for StateKey {}

impl Hash for StateKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::Int(i) => write!(f, "{}", i),
            StateKey::Float(x) => f.write_str(&format_float(*x)),
            StateKey::Text(text) => f.write_str(text),
        }
    }
}

/// Render a float with at least one decimal digit for whole numbers (`3.0`)
pub(crate) fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

impl From<&str> for StateKey {
    fn from(text: &str) -> Self {
        StateKey::Text(text.to_string())
    }
}

impl From<String> for StateKey {
    fn from(text: String) -> Self {
        StateKey::Text(text)
    }
}

impl From<&StateKey> for StateKey {
    fn from(key: &StateKey) -> Self {
        key.clone()
    }
}

impl From<i32> for StateKey {
    fn from(i: i32) -> Self {
        StateKey::Int(i64::from(i))
    }
}

impl From<i64> for StateKey {
    fn from(i: i64) -> Self {
        StateKey::Int(i)
    }
}

impl From<f64> for StateKey {
    fn from(x: f64) -> Self {
        StateKey::Float(x)
    }
}

/// A node of a simulation state snapshot
#[derive(Debug, Clone, Default)]
pub enum StateValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<StateValue>),
    Map(StateMap),
}

impl StateValue {
    /// Short name of the variant, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            StateValue::Null => "null",
            StateValue::Bool(_) => "bool",
            StateValue::Int(_) => "int",
            StateValue::Float(_) => "float",
            StateValue::Text(_) => "text",
            StateValue::List(_) => "list",
            StateValue::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    pub fn as_map(&self) -> Option<&StateMap> {
        match self {
            StateValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut StateMap> {
        match self {
            StateValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<StateMap> {
        match self {
            StateValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StateValue]> {
        match self {
            StateValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Int(i) => Some(*i as f64),
            StateValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for StateValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StateValue::Null, StateValue::Null) => true,
            (StateValue::Bool(a), StateValue::Bool(b)) => a == b,
            (StateValue::Int(a), StateValue::Int(b)) => a == b,
            (StateValue::Int(_) | StateValue::Float(_), StateValue::Int(_) | StateValue::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (StateValue::Text(a), StateValue::Text(b)) => a == b,
            (StateValue::List(a), StateValue::List(b)) => a == b,
            (StateValue::Map(a), StateValue::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for StateValue {
    fn from(b: bool) -> Self {
        StateValue::Bool(b)
    }
}

impl From<i32> for StateValue {
    fn from(i: i32) -> Self {
        StateValue::Int(i64::from(i))
    }
}

impl From<i64> for StateValue {
    fn from(i: i64) -> Self {
        StateValue::Int(i)
    }
}

impl From<f64> for StateValue {
    fn from(x: f64) -> Self {
        StateValue::Float(x)
    }
}

impl From<&str> for StateValue {
    fn from(text: &str) -> Self {
        StateValue::Text(text.to_string())
    }
}

impl From<String> for StateValue {
    fn from(text: String) -> Self {
        StateValue::Text(text)
    }
}

impl From<StateMap> for StateValue {
    fn from(map: StateMap) -> Self {
        StateValue::Map(map)
    }
}

impl<T: Into<StateValue>> From<Vec<T>> for StateValue {
    fn from(items: Vec<T>) -> Self {
        StateValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Insertion-ordered map from [`StateKey`] to [`StateValue`]
///
/// Order matters: step-indexed logs are compressed in the order their steps
/// were recorded. Equality ignores order.
#[derive(Debug, Clone, Default)]
pub struct StateMap {
    entries: IndexMap<StateKey, StateValue>,
}

impl StateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: impl Into<StateKey>) -> Option<&StateValue> {
        self.entries.get(&key.into())
    }

    pub fn get_mut(&mut self, key: impl Into<StateKey>) -> Option<&mut StateValue> {
        self.entries.get_mut(&key.into())
    }

    pub fn contains_key(&self, key: impl Into<StateKey>) -> bool {
        self.entries.contains_key(&key.into())
    }

    /// Insert or replace; a replaced entry keeps its position
    pub fn insert(&mut self, key: impl Into<StateKey>, value: impl Into<StateValue>) -> Option<StateValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Remove an entry, keeping the order of the rest
    pub fn remove(&mut self, key: impl Into<StateKey>) -> Option<StateValue> {
        self.entries.shift_remove(&key.into())
    }

    pub fn first(&self) -> Option<(&StateKey, &StateValue)> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &StateValue)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&StateKey, &mut StateValue)> {
        self.entries.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &StateValue> {
        self.entries.values()
    }

    /// Nested map under `key`, created empty when missing.
    /// A non-map value stored under `key` is replaced.
    pub fn entry_map(&mut self, key: impl Into<StateKey>) -> &mut StateMap {
        let slot = self.entries.entry(key.into()).or_insert_with(|| StateValue::Map(StateMap::new()));
        if !matches!(slot, StateValue::Map(_)) {
            *slot = StateValue::Map(StateMap::new());
        }
        match slot {
            StateValue::Map(map) => map,
            _ => unreachable!("slot holds a map"),
        }
    }

    /// Nested list under `key`, created empty when missing.
    /// A non-list value stored under `key` is replaced.
    pub fn entry_list(&mut self, key: impl Into<StateKey>) -> &mut Vec<StateValue> {
        let slot = self.entries.entry(key.into()).or_insert_with(|| StateValue::List(Vec::new()));
        if !matches!(slot, StateValue::List(_)) {
            *slot = StateValue::List(Vec::new());
        }
        match slot {
            StateValue::List(items) => items,
            _ => unreachable!("slot holds a list"),
        }
    }
}

impl PartialEq for StateMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.entries.get(k) == Some(v))
    }
}

impl<K: Into<StateKey>, V: Into<StateValue>> FromIterator<(K, V)> for StateMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl IntoIterator for StateMap {
    type Item = (StateKey, StateValue);
    type IntoIter = indexmap::map::IntoIter<StateKey, StateValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Build a [`StateMap`] from `key => value` pairs
///
/// ```
/// use simstate::state_map;
///
/// let log = state_map! { 1.0 => state_map! { "m" => 10.0 } };
/// assert_eq!(log.len(), 1);
/// ```
#[macro_export]
macro_rules! state_map {
    () => {
        $crate::StateMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::StateMap::new();
        $( map.insert($key, $value); )+
        map
    }};
}

impl Serialize for StateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StateValue::Null => serializer.serialize_unit(),
            StateValue::Bool(b) => serializer.serialize_bool(*b),
            StateValue::Int(i) => serializer.serialize_i64(*i),
            StateValue::Float(x) => serializer.serialize_f64(*x),
            StateValue::Text(text) => serializer.serialize_str(text),
            StateValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            StateValue::Map(map) => map.serialize(serializer),
        }
    }
}

impl Serialize for StateMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            out.serialize_entry(&key.to_string(), value)?;
        }
        out.end()
    }
}

struct StateValueVisitor;

impl<'de> Visitor<'de> for StateValueVisitor {
    type Value = StateValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<StateValue, E> {
        Ok(StateValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<StateValue, E> {
        Ok(StateValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<StateValue, E> {
        Ok(i64::try_from(v)
            .map(StateValue::Int)
            .unwrap_or(StateValue::Float(v as f64)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<StateValue, E> {
        Ok(StateValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<StateValue, E> {
        Ok(StateValue::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<StateValue, E> {
        Ok(StateValue::Text(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<StateValue, E> {
        Ok(StateValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<StateValue, E> {
        Ok(StateValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<StateValue, D::Error> {
        StateValue::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<StateValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(StateValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<StateValue, A::Error> {
        // A repeated key keeps its first position and its last value
        let mut map = StateMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, StateValue>()? {
            map.insert(key, value);
        }
        Ok(StateValue::Map(map))
    }
}

impl<'de> Deserialize<'de> for StateValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StateValueVisitor)
    }
}

impl<'de> Deserialize<'de> for StateMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match StateValue::deserialize(deserializer)? {
            StateValue::Map(map) => Ok(map),
            other => Err(de::Error::invalid_type(
                de::Unexpected::Other(other.kind()),
                &"a map",
            )),
        }
    }
}
