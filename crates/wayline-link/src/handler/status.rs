use anyhow::Result;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{debug, warn};

use wayline_cam::command::id;
use wayline_fc::Telemetry;
use wayline_nav::NavigationHandle;
use wayline_proto::status::{status_payload, StatusReport};
use wayline_proto::{MessageType, ProtocolError, RequestEnvelope};

use crate::frame::Reply;

/// Reported as `waypoint_order` until a waypoint has been reached.
const NONE_REACHED: i32 = -1;

pub fn handle(nav: &NavigationHandle, env: &RequestEnvelope, now: OffsetDateTime) -> Result<Reply> {
    if let Some(tag) = env.message.tag() {
        let (report, heartbeat) = match tag {
            "all_statuses" => (full_report(nav), false),
            "heartbeat" => (heartbeat_report(nav), true),
            other => {
                return Err(ProtocolError::UnknownMessage {
                    kind: MessageType::Status,
                    message: other.to_string(),
                }
                .into())
            }
        };
        let fields = serde_json::to_value(report)?;
        return Ok(Reply::Status(status_payload(fields, heartbeat, now)));
    }

    let requests = env.message.requests().unwrap_or_default();
    for req in requests {
        if req.key == "waypoint_order" {
            debug!("status: ignoring obsolete waypoint_order request");
            continue;
        }
        let value = keyed(nav, &req.key)?;
        let mut fields = serde_json::Map::new();
        fields.insert(req.key.clone(), value);
        return Ok(Reply::Status(status_payload(Value::Object(fields), false, now)));
    }
    Err(ProtocolError::InvalidBody("no status key requested".into()).into())
}

/// Yaw in radians, -pi..pi, as the workstation expects.
fn orientation(t: &Telemetry) -> f32 {
    let deg = if t.heading_deg > 180.0 { t.heading_deg - 360.0 } else { t.heading_deg };
    deg.to_radians()
}

fn gps_signal(t: &Telemetry) -> i32 {
    t.satellites.map(i32::from).unwrap_or(-1)
}

fn waypoint_order(nav: &NavigationHandle) -> i32 {
    nav.queue().last_order().unwrap_or(NONE_REACHED)
}

fn heartbeat_report(nav: &NavigationHandle) -> StatusReport {
    let t = nav.vehicle().telemetry();
    StatusReport {
        current_location: t.location,
        waypoint_order: waypoint_order(nav),
        battery_level: t.battery,
        gps_signal: Some(gps_signal(&t)),
        orientation: Some(orientation(&t)),
        height: Some(t.altitude_m as f32),
        ..Default::default()
    }
}

fn full_report(nav: &NavigationHandle) -> StatusReport {
    let t = nav.vehicle().telemetry();
    let p = nav.vehicle().params().get();
    StatusReport {
        speed: Some(t.ground_speed_mps),
        selected_speed: Some(p.speed_mps),
        selected_height: Some(p.height_m),
        drone_type: Some(nav.vehicle().drone_type()),
        navigation_state: Some(nav.state().as_str().to_string()),
        ..heartbeat_report(nav)
    }
}

fn keyed(nav: &NavigationHandle, key: &str) -> Result<Value> {
    let vehicle = nav.vehicle();
    let t = vehicle.telemetry();
    Ok(match key {
        "battery_level" => json!(t.battery),
        "gps_signal" => json!(gps_signal(&t)),
        "current_location" => json!(t.location),
        "drone_type" => json!(vehicle.drone_type()),
        "next_waypoint" => {
            let next = nav
                .queue()
                .peek()
                .ok_or_else(|| ProtocolError::InvalidBody("no waypoint queued".into()))?;
            json!(next)
        }
        "next_waypoints" => json!(nav.queue().snapshot()),
        "speed" => json!(t.ground_speed_mps),
        "selected_speed" => json!(vehicle.params().get().speed_mps),
        "height" => json!(t.altitude_m as f32),
        "selected_height" => json!(vehicle.params().get().height_m),
        "orientation" => json!(orientation(&t)),
        "camera_angle" => json!(vehicle.params().get().camera_angle_deg),
        "fps" | "resolution" => {
            // answer from tracked state; the refresh lands for the next query
            if let Err(e) = vehicle.camera().request(id::VIDEO_SETTINGS) {
                warn!("status: camera refresh failed: {:#}", e);
            }
            let cam = vehicle.camera().state();
            if key == "fps" {
                json!(cam.video_fps.unwrap_or(0))
            } else {
                json!(cam.video_resolution.unwrap_or(0))
            }
        }
        other => {
            return Err(ProtocolError::UnknownMessage {
                kind: MessageType::Status,
                message: other.to_string(),
            }
            .into())
        }
    })
}
