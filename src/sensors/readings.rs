use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Latest value per sensor field, published by the bridge and served by the dashboard
///
/// Last writer wins per key. Values are stored as given: non-finite numbers
/// are not rejected and come out of `to_json` as `null`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Readings {
    values: BTreeMap<String, f64>,
}

impl Readings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sensor_data(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn remove(&mut self, key: &str) -> Option<f64> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Compact JSON object, e.g. `{"hum":55.0,"temp":21.5}`
    pub fn to_json(&self) -> String {
        // A map of string keys to f64 cannot fail to serialize
        serde_json::to_string(&self.values).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Readings handle shared between the loop, producers and HTTP handlers
pub type SharedReadings = Arc<Mutex<Readings>>;

pub fn shared() -> SharedReadings {
    Arc::new(Mutex::new(Readings::new()))
}

/// Snapshot as JSON; a poisoned lock still yields the last written values
pub fn snapshot_json(readings: &SharedReadings) -> String {
    match readings.lock() {
        Ok(guard) => guard.to_json(),
        Err(poisoned) => poisoned.into_inner().to_json(),
    }
}

/// Write one value into the shared tree
pub fn set_sensor_data(readings: &SharedReadings, key: &str, value: f64) {
    match readings.lock() {
        Ok(mut guard) => guard.set_sensor_data(key, value),
        Err(poisoned) => poisoned.into_inner().set_sensor_data(key, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_trip_reproduces_pairs() {
        let mut readings = Readings::new();
        readings.set_sensor_data("temp", 21.5);
        readings.set_sensor_data("hum", 55.0);

        let parsed = Readings::from_json(&readings.to_json()).unwrap();
        assert_eq!(parsed.get("temp"), Some(21.5));
        assert_eq!(parsed.get("hum"), Some(55.0));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_last_writer_wins() {
        let mut readings = Readings::new();
        readings.set_sensor_data("temp", 20.0);
        readings.set_sensor_data("temp", 22.25);
        assert_eq!(readings.get("temp"), Some(22.25));
        assert_eq!(readings.len(), 1);
    }

    #[test]
    fn test_empty_tree_is_empty_object() {
        assert_eq!(Readings::new().to_json(), "{}");
    }

    #[test]
    fn test_non_finite_values_pass_through_as_null() {
        let mut readings = Readings::new();
        readings.set_sensor_data("bad", f64::NAN);
        readings.set_sensor_data("ok", 1.0);
        let json = readings.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["bad"].is_null());
        assert_eq!(value["ok"], 1.0);
    }

    #[test]
    fn test_shared_helpers() {
        let readings = shared();
        set_sensor_data(&readings, "speed", 3.5);
        assert_eq!(snapshot_json(&readings), r#"{"speed":3.5}"#);
    }

    proptest! {
        #[test]
        fn prop_finite_readings_round_trip(
            entries in proptest::collection::btree_map("[a-z_]{1,12}", -1.0e9f64..1.0e9f64, 0..16)
        ) {
            let mut readings = Readings::new();
            for (key, value) in &entries {
                readings.set_sensor_data(key, *value);
            }
            let parsed = Readings::from_json(&readings.to_json()).unwrap();
            prop_assert_eq!(parsed, readings);
        }
    }
}
