use anyhow::Result;
use serde_json::Value;

use wayline_nav::NavigationHandle;
use wayline_proto::{Location, MessageType, ProtocolError, RequestEnvelope, WayPoint};

use super::{lenient_f64, lenient_i64};
use crate::frame::Reply;

pub fn handle(nav: &NavigationHandle, env: &RequestEnvelope) -> Result<Reply> {
    let tag = env
        .message
        .tag()
        .ok_or_else(|| ProtocolError::InvalidBody("navigation message must be a string".into()))?;
    match tag {
        "start" => nav.start()?,
        "stop" => nav.stop()?,
        "path" => {
            let raw: Vec<Value> = env.field("waypoints")?;
            let path = raw.iter().map(parse_waypoint).collect::<Result<Vec<_>, _>>()?;
            nav.path(path)?;
        }
        "rth" => nav.rth()?,
        "emergency" => nav.emergency()?,
        other => {
            return Err(ProtocolError::UnknownMessage {
                kind: MessageType::Navigation,
                message: other.to_string(),
            }
            .into())
        }
    }
    Ok(Reply::Ack)
}

fn parse_waypoint(v: &Value) -> Result<WayPoint, ProtocolError> {
    let bad = |what: &str| ProtocolError::InvalidBody(format!("waypoint {}: {}", what, v));
    let loc = v.get("location").ok_or_else(|| bad("missing location"))?;
    let latitude = loc.get("latitude").and_then(lenient_f64).ok_or_else(|| bad("bad latitude"))?;
    let longitude = loc.get("longitude").and_then(lenient_f64).ok_or_else(|| bad("bad longitude"))?;
    let order = v
        .get("order")
        .and_then(lenient_i64)
        .and_then(|o| i32::try_from(o).ok())
        .ok_or_else(|| bad("bad order"))?;
    Ok(WayPoint::new(Location::new(latitude, longitude), order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn waypoint_accepts_string_coordinates() {
        let wp = parse_waypoint(&json!({"location": {"latitude": "51.5", "longitude": 3.25}, "order": 2})).unwrap();
        assert_eq!(wp, WayPoint::new(Location::new(51.5, 3.25), 2));
    }

    #[test]
    fn waypoint_without_order_is_invalid() {
        let err = parse_waypoint(&json!({"location": {"latitude": 1.0, "longitude": 2.0}})).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidBody(_)));
    }
}
