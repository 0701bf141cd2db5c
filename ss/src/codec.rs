//! Step-indexed log compression
//!
//! The simulation engine records settings and results once per timestep:
//!
//! ```text
//! settings: step -> manager -> scenario -> value_type -> constant -> value
//! results:  step -> manager -> scenario -> constant -> value
//! ```
//!
//! The compact form pushes the step axis innermost as a dense list, so
//! manager, scenario and constant names are stored once instead of per step:
//!
//! ```text
//! settings: manager -> scenario -> value_type -> constant -> [value, ...]
//! results:  manager -> scenario -> constant -> [value, ...]
//! ```
//!
//! Decompression relabels steps by list position (`1.0, 2.0, ...`). Original
//! step values such as `0.5, 1.5, 2.5` are not recoverable; only the values
//! and their relative order survive.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::value::{StateKey, StateMap, StateValue};

/// Reserved state key holding the per-log [`LogFormat`] of a stored payload
pub const FORMAT_TAG_KEY: &str = "_log_format";

/// State key of the settings log
pub const SETTINGS_LOG: &str = "settings_log";

/// State key of the results log
pub const RESULTS_LOG: &str = "results_log";

/// State key of the scenario cache
pub const SCENARIO_CACHE: &str = "scenario_cache";

/// Deepest nesting the compact-shape heuristic will follow
const MAX_LOG_DEPTH: usize = 5;

/// Errors from reshaping a log that does not have the expected shape
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("expected a map at {path}, found {found}")]
    NotAMap { path: String, found: &'static str },

    #[error("expected a list at {path}, found {found}")]
    NotAList { path: String, found: &'static str },

    #[error("unknown log format: {0}")]
    UnknownFormat(String),
}

/// Shape of a settings or results log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Step-indexed, as produced by the simulation engine
    Expanded,
    /// Column-oriented, step axis innermost
    Compact,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Expanded => "expanded",
            LogFormat::Compact => "compact",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expanded" => Ok(LogFormat::Expanded),
            "compact" => Ok(LogFormat::Compact),
            other => Err(CodecError::UnknownFormat(other.to_string())),
        }
    }
}

/// The two logs a simulation state carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Settings,
    Results,
}

impl LogKind {
    pub const ALL: [LogKind; 2] = [LogKind::Settings, LogKind::Results];

    /// Key of this log inside a state map
    pub fn field(&self) -> &'static str {
        match self {
            LogKind::Settings => SETTINGS_LOG,
            LogKind::Results => RESULTS_LOG,
        }
    }

    pub fn compress(&self, expanded: &StateMap) -> Result<StateMap, CodecError> {
        match self {
            LogKind::Settings => compress_settings(expanded),
            LogKind::Results => compress_results(expanded),
        }
    }

    pub fn decompress(&self, compact: &StateMap) -> Result<StateMap, CodecError> {
        match self {
            LogKind::Settings => decompress_settings(compact),
            LogKind::Results => decompress_results(compact),
        }
    }
}

fn path_of(keys: &[&StateKey]) -> String {
    keys.iter().map(|k| k.to_string()).collect::<Vec<_>>().join("/")
}

fn expect_map<'a>(value: &'a StateValue, path: &[&StateKey]) -> Result<&'a StateMap, CodecError> {
    value.as_map().ok_or_else(|| CodecError::NotAMap {
        path: path_of(path),
        found: value.kind(),
    })
}

fn expect_list<'a>(value: &'a StateValue, path: &[&StateKey]) -> Result<&'a [StateValue], CodecError> {
    value.as_list().ok_or_else(|| CodecError::NotAList {
        path: path_of(path),
        found: value.kind(),
    })
}

/// Compress `step -> manager -> scenario -> value_type -> constant -> value`
/// into `manager -> scenario -> value_type -> constant -> [values]`.
///
/// List order follows the iteration order of the steps.
pub fn compress_settings(expanded: &StateMap) -> Result<StateMap, CodecError> {
    let mut compact = StateMap::new();
    for (step, managers) in expanded.iter() {
        for (manager, scenarios) in expect_map(managers, &[step])?.iter() {
            let manager_out = compact.entry_map(manager);
            for (scenario, value_types) in expect_map(scenarios, &[step, manager])?.iter() {
                let scenario_out = manager_out.entry_map(scenario);
                for (value_type, constants) in expect_map(value_types, &[step, manager, scenario])?.iter() {
                    let constants_out = scenario_out.entry_map(value_type);
                    for (constant, value) in expect_map(constants, &[step, manager, scenario, value_type])?.iter() {
                        constants_out.entry_list(constant).push(value.clone());
                    }
                }
            }
        }
    }
    Ok(compact)
}

/// Compress `step -> manager -> scenario -> constant -> value`
/// into `manager -> scenario -> constant -> [values]`.
pub fn compress_results(expanded: &StateMap) -> Result<StateMap, CodecError> {
    let mut compact = StateMap::new();
    for (step, managers) in expanded.iter() {
        for (manager, scenarios) in expect_map(managers, &[step])?.iter() {
            let manager_out = compact.entry_map(manager);
            for (scenario, constants) in expect_map(scenarios, &[step, manager])?.iter() {
                let scenario_out = manager_out.entry_map(scenario);
                for (constant, value) in expect_map(constants, &[step, manager, scenario])?.iter() {
                    scenario_out.entry_list(constant).push(value.clone());
                }
            }
        }
    }
    Ok(compact)
}

/// Inverse of [`compress_settings`], with steps relabelled `1.0..=n.0`
pub fn decompress_settings(compact: &StateMap) -> Result<StateMap, CodecError> {
    let mut steps: Vec<StateMap> = Vec::new();
    for (manager, scenarios) in compact.iter() {
        for (scenario, value_types) in expect_map(scenarios, &[manager])?.iter() {
            for (value_type, constants) in expect_map(value_types, &[manager, scenario])?.iter() {
                for (constant, values) in expect_map(constants, &[manager, scenario, value_type])?.iter() {
                    let values = expect_list(values, &[manager, scenario, value_type, constant])?;
                    grow(&mut steps, values.len());
                    for (step, value) in steps.iter_mut().zip(values) {
                        step.entry_map(manager)
                            .entry_map(scenario)
                            .entry_map(value_type)
                            .insert(constant, value.clone());
                    }
                }
            }
        }
    }
    Ok(label_steps(steps))
}

/// Inverse of [`compress_results`], with steps relabelled `1.0..=n.0`
pub fn decompress_results(compact: &StateMap) -> Result<StateMap, CodecError> {
    let mut steps: Vec<StateMap> = Vec::new();
    for (manager, scenarios) in compact.iter() {
        for (scenario, constants) in expect_map(scenarios, &[manager])?.iter() {
            for (constant, values) in expect_map(constants, &[manager, scenario])?.iter() {
                let values = expect_list(values, &[manager, scenario, constant])?;
                grow(&mut steps, values.len());
                for (step, value) in steps.iter_mut().zip(values) {
                    step.entry_map(manager)
                        .entry_map(scenario)
                        .insert(constant, value.clone());
                }
            }
        }
    }
    Ok(label_steps(steps))
}

fn grow(steps: &mut Vec<StateMap>, len: usize) {
    if steps.len() < len {
        steps.resize_with(len, StateMap::new);
    }
}

/// Key step maps by one-based position: `1.0, 2.0, ...`
fn label_steps(steps: Vec<StateMap>) -> StateMap {
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| (StateKey::Float((i + 1) as f64), StateValue::Map(step)))
        .collect()
}

/// Guess whether a settings or results log is already compact.
///
/// A log is compact when its first key is not a step label and following the
/// first entries down through nested maps ends at a list. Payloads written
/// with a [`FORMAT_TAG_KEY`] do not need this; it covers untagged records and
/// caller payloads that may already have been compacted.
pub fn is_already_compact(log: &StateMap) -> bool {
    let Some((first_key, first_value)) = log.first() else {
        return false;
    };
    if first_key.is_step_label() {
        return false;
    }
    matches!(first_leaf(first_value), Some(StateValue::List(_)))
}

/// Classify a log with [`is_already_compact`]
pub fn detect_format(log: &StateMap) -> LogFormat {
    if is_already_compact(log) {
        LogFormat::Compact
    } else {
        LogFormat::Expanded
    }
}

fn first_leaf(value: &StateValue) -> Option<&StateValue> {
    let mut current = value;
    for _ in 0..MAX_LOG_DEPTH {
        match current {
            StateValue::Map(map) => current = map.first()?.1,
            leaf => return Some(leaf),
        }
    }
    None
}

/// Compress a flat time series `step -> {key: value}` into `key -> [values]`.
/// Step entries that are not maps are skipped.
pub fn compress_series(data: &StateMap) -> StateMap {
    let mut compact = StateMap::new();
    for step_data in data.values() {
        let Some(step_data) = step_data.as_map() else {
            continue;
        };
        for (key, value) in step_data.iter() {
            compact.entry_list(key).push(value.clone());
        }
    }
    compact
}

/// Inverse of [`compress_series`].
///
/// The step count is the longest list. Non-list entries are repeated at every
/// step; shorter lists are absent from the steps past their end.
pub fn decompress_series(compact: &StateMap) -> StateMap {
    let step_count = compact
        .values()
        .map(|v| v.as_list().map_or(1, <[StateValue]>::len))
        .max()
        .unwrap_or(0);

    let steps = (0..step_count)
        .map(|i| {
            let mut step = StateMap::new();
            for (key, values) in compact.iter() {
                match values {
                    StateValue::List(items) => {
                        if let Some(value) = items.get(i) {
                            step.insert(key, value.clone());
                        }
                    }
                    scalar => {
                        step.insert(key, scalar.clone());
                    }
                }
            }
            step
        })
        .collect();
    label_steps(steps)
}

/// True when any entry of a flat series is a list
pub fn is_compact_series(data: &StateMap) -> bool {
    data.values().any(|v| matches!(v, StateValue::List(_)))
}

/// Turn text keys that look numeric back into numbers, recursively through
/// nested maps. Keys containing `.` become floats, other numeric text becomes
/// integers, everything else stays text. Lists and scalars are untouched.
pub fn restore_numeric_keys(map: StateMap) -> StateMap {
    map.into_iter()
        .map(|(key, value)| {
            let key = match key {
                StateKey::Text(text) => StateKey::parse_numeric(&text).unwrap_or(StateKey::Text(text)),
                numeric => numeric,
            };
            let value = match value {
                StateValue::Map(inner) => StateValue::Map(restore_numeric_keys(inner)),
                other => other,
            };
            (key, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_map;

    fn results_log() -> StateMap {
        state_map! {
            1.0 => state_map! { "m" => state_map! { "s" => state_map! { "c" => 10.0 } } },
            2.0 => state_map! { "m" => state_map! { "s" => state_map! { "c" => 20.0 } } },
        }
    }

    fn settings_log() -> StateMap {
        state_map! {
            1.0 => state_map! { "m" => state_map! { "s" => state_map! {
                "constants" => state_map! { "rate" => 0.1, "size" => 3 },
            } } },
            2.0 => state_map! { "m" => state_map! { "s" => state_map! {
                "constants" => state_map! { "rate" => 0.2, "size" => 4 },
            } } },
        }
    }

    #[test]
    fn test_compress_results_concrete() {
        let compact = compress_results(&results_log()).unwrap();
        assert_eq!(
            compact,
            state_map! { "m" => state_map! { "s" => state_map! { "c" => vec![10.0, 20.0] } } }
        );
    }

    #[test]
    fn test_decompress_results_concrete() {
        let compact = state_map! { "m" => state_map! { "s" => state_map! { "c" => vec![10.0, 20.0] } } };
        assert_eq!(decompress_results(&compact).unwrap(), results_log());
    }

    #[test]
    fn test_settings_round_trip() {
        let compact = compress_settings(&settings_log()).unwrap();
        assert_eq!(
            compact,
            state_map! { "m" => state_map! { "s" => state_map! {
                "constants" => state_map! { "rate" => vec![0.1, 0.2], "size" => vec![3, 4] },
            } } }
        );
        assert_eq!(decompress_settings(&compact).unwrap(), settings_log());
    }

    #[test]
    fn test_decompress_relabels_steps() {
        let expanded = state_map! {
            0.5 => state_map! { "m" => state_map! { "s" => state_map! { "c" => 1 } } },
            1.5 => state_map! { "m" => state_map! { "s" => state_map! { "c" => 2 } } },
            2.5 => state_map! { "m" => state_map! { "s" => state_map! { "c" => 3 } } },
        };
        let restored = decompress_results(&compress_results(&expanded).unwrap()).unwrap();
        let keys: Vec<String> = restored.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["1.0", "2.0", "3.0"]);
        assert_eq!(
            restored.get(3.0),
            Some(&StateValue::from(state_map! { "m" => state_map! { "s" => state_map! { "c" => 3 } } }))
        );
    }

    #[test]
    fn test_decompress_uneven_lengths() {
        let compact = state_map! { "m" => state_map! { "s" => state_map! {
            "a" => vec![1, 2],
            "b" => vec![5, 6, 7],
        } } };
        let expanded = decompress_results(&compact).unwrap();
        assert_eq!(expanded.len(), 3);
        assert_eq!(
            expanded.get(3.0),
            Some(&StateValue::from(state_map! { "m" => state_map! { "s" => state_map! { "b" => 7 } } }))
        );
    }

    #[test]
    fn test_compress_rejects_wrong_shape() {
        let bad = state_map! { 1.0 => state_map! { "m" => 5 } };
        let err = compress_results(&bad).unwrap_err();
        assert_eq!(
            err,
            CodecError::NotAMap {
                path: "1.0/m".to_string(),
                found: "int"
            }
        );
    }

    #[test]
    fn test_decompress_rejects_scalar_leaf() {
        let bad = state_map! { "m" => state_map! { "s" => state_map! { "c" => 1.0 } } };
        assert!(matches!(decompress_results(&bad), Err(CodecError::NotAList { .. })));
    }

    #[test]
    fn test_is_already_compact() {
        let expanded = results_log();
        let compact = compress_results(&expanded).unwrap();
        assert!(!is_already_compact(&expanded));
        assert!(is_already_compact(&compact));
        assert!(is_already_compact(&compress_settings(&settings_log()).unwrap()));
        assert!(!is_already_compact(&StateMap::new()));
    }

    #[test]
    fn test_is_already_compact_with_eroded_step_keys() {
        let eroded: StateMap = serde_json::from_str(&serde_json::to_string(&results_log()).unwrap()).unwrap();
        assert!(!is_already_compact(&eroded));
    }

    #[test]
    fn test_single_step_expanded_log_is_not_compact() {
        let expanded = state_map! { 1.0 => state_map! { "m" => state_map! { "s" => state_map! { "c" => 1.0 } } } };
        assert_eq!(detect_format(&expanded), LogFormat::Expanded);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!(LogFormat::Expanded.to_string(), "expanded");
        assert!("columnar".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_series_round_trip() {
        let series = state_map! {
            1.0 => state_map! { "x" => 1, "y" => 10 },
            2.0 => state_map! { "x" => 2, "y" => 20 },
        };
        let compact = compress_series(&series);
        assert_eq!(compact, state_map! { "x" => vec![1, 2], "y" => vec![10, 20] });
        assert!(is_compact_series(&compact));
        assert!(!is_compact_series(&series));
        assert_eq!(decompress_series(&compact), series);
    }

    #[test]
    fn test_decompress_series_broadcasts_scalars() {
        let compact = state_map! { "x" => vec![1, 2, 3], "unit" => "kg" };
        let expanded = decompress_series(&compact);
        assert_eq!(expanded.len(), 3);
        assert_eq!(
            expanded.get(2.0),
            Some(&StateValue::from(state_map! { "x" => 2, "unit" => "kg" }))
        );
    }

    #[test]
    fn test_compress_series_skips_non_map_steps() {
        let series = state_map! { 1.0 => state_map! { "x" => 1 }, 2.0 => 7 };
        assert_eq!(compress_series(&series), state_map! { "x" => vec![1] });
    }

    #[test]
    fn test_restore_numeric_keys() {
        let eroded = state_map! { "1.0" => state_map! { "2" => 5 } };
        let restored = restore_numeric_keys(eroded);
        assert_eq!(restored, state_map! { 1.0 => state_map! { 2 => 5 } });
        assert!(matches!(restored.first(), Some((StateKey::Float(_), _))));
    }

    #[test]
    fn test_restore_numeric_keys_leaves_names() {
        let eroded = state_map! {
            "scenario_manager_1" => state_map! { "2.5" => vec![StateValue::from(state_map! { "3" => 1 })] },
        };
        let restored = restore_numeric_keys(eroded);
        assert_eq!(
            restored,
            state_map! {
                "scenario_manager_1" => state_map! { 2.5 => vec![StateValue::from(state_map! { "3" => 1 })] },
            }
        );
    }
}
