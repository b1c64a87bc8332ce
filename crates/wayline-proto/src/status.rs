use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::geo::Location;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneType {
    pub manufacturer: String,
    pub model: String,
}

/// Vehicle snapshot sent for `all_statuses` (every field) and heartbeats (a subset).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_location: Option<Location>,
    /// Order of the last completed waypoint, -1 when none.
    pub waypoint_order: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_signal: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,

    // all_statuses only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_height: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drone_type: Option<DroneType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation_state: Option<String>,
}

/// `DDMMYYYYHHMMSS` followed by milliseconds.
pub fn timestamp(now: OffsetDateTime) -> String {
    let fmt = format_description!("[day][month][year][hour][minute][second][subsecond digits:3]");
    now.format(&fmt).unwrap_or_default()
}

/// Wrap status fields with the common `message_type`/`timestamp`/`heartbeat` keys.
pub fn status_payload(fields: Value, heartbeat: bool, now: OffsetDateTime) -> Vec<u8> {
    let mut obj = match fields {
        Value::Object(m) => m,
        other => {
            let mut m = Map::new();
            m.insert("value".into(), other);
            m
        }
    };
    obj.insert("message_type".into(), Value::String("status".into()));
    obj.insert("timestamp".into(), Value::String(timestamp(now)));
    obj.insert("heartbeat".into(), Value::Bool(heartbeat));
    Value::Object(obj).to_string().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn timestamp_layout() {
        let t = datetime!(2024-03-07 09:05:01.042 UTC);
        assert_eq!(timestamp(t), "07032024090501042");
    }

    #[test]
    fn payload_carries_common_keys() {
        let t = datetime!(2024-03-07 09:05:01 UTC);
        let raw = status_payload(json!({"battery_level": 87}), true, t);
        let v: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(v["battery_level"], 87);
        assert_eq!(v["message_type"], "status");
        assert_eq!(v["heartbeat"], true);
        assert_eq!(v["timestamp"], "07032024090501000");
    }

    #[test]
    fn heartbeat_report_skips_unset_fields() {
        let r = StatusReport { waypoint_order: -1, height: Some(4.0), ..Default::default() };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v, json!({"waypoint_order": -1, "height": 4.0}));
    }
}
