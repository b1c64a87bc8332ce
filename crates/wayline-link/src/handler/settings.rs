use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::info;

use wayline_cam::command::{fps_code, resolution_code};
use wayline_fc::ParamStore;
use wayline_nav::NavigationHandle;
use wayline_proto::{KeyValue, MessageType, ProtocolError, RequestEnvelope};

use super::{lenient_f64, lenient_i64};
use crate::frame::Reply;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Setting {
    Speed(f32),
    Height(f32),
    DistanceThreshold(f32),
    CameraAngle(f32),
    Fps(u32),
    Resolution(u32),
}

impl Setting {
    fn parse(kv: &KeyValue) -> Result<Self, ProtocolError> {
        let value = kv.value.as_ref().unwrap_or(&Value::Null);
        let num = || {
            lenient_f64(value)
                .map(|v| v as f32)
                .ok_or_else(|| ProtocolError::InvalidBody(format!("setting `{}` needs a number, got {}", kv.key, value)))
        };
        let count = || {
            lenient_i64(value)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| ProtocolError::InvalidBody(format!("setting `{}` needs a whole number, got {}", kv.key, value)))
        };
        Ok(match kv.key.as_str() {
            "speed" => Setting::Speed(num()?),
            "height" => Setting::Height(num()?),
            "distance_threshold" => Setting::DistanceThreshold(num()?),
            "camera_angle" => Setting::CameraAngle(num()?),
            "fps" => Setting::Fps(count()?),
            "resolution" => Setting::Resolution(count()?),
            other => {
                return Err(ProtocolError::UnknownMessage {
                    kind: MessageType::Settings,
                    message: other.to_string(),
                })
            }
        })
    }

    /// Range and code-table checks. Nothing is changed.
    fn validate(&self) -> Result<()> {
        match *self {
            Setting::Speed(v) => ParamStore::check_speed(v),
            Setting::Height(v) => ParamStore::check_height(v),
            Setting::DistanceThreshold(v) => ParamStore::check_distance_threshold(v),
            Setting::CameraAngle(v) => ParamStore::check_camera_angle(v),
            Setting::Fps(v) => {
                fps_code(v)?;
                Ok(())
            }
            Setting::Resolution(v) => {
                resolution_code(v)?;
                Ok(())
            }
        }
    }

    fn apply(self, nav: &NavigationHandle) -> Result<()> {
        let vehicle = nav.vehicle();
        let params = vehicle.params();
        match self {
            Setting::Speed(v) => params.set_speed(v),
            Setting::Height(v) => params.set_height(v),
            Setting::DistanceThreshold(v) => params.set_distance_threshold(v),
            Setting::CameraAngle(v) => vehicle.point_camera(v),
            Setting::Fps(v) => vehicle.camera().set_fps(v),
            Setting::Resolution(v) => vehicle.camera().set_resolution(v),
        }
    }
}

pub fn handle(nav: &NavigationHandle, env: &RequestEnvelope) -> Result<Reply> {
    if let Some(tag) = env.message.tag() {
        if tag != "workstation_config" {
            return Err(ProtocolError::UnknownMessage {
                kind: MessageType::Settings,
                message: tag.to_string(),
            }
            .into());
        }
        let (host, port) = workstation(&env.body)?;
        info!("settings: heartbeats go to {}:{}", host, port);
        return Ok(Reply::StartHeartbeat { host, port: port.to_string() });
    }

    let requests = env.message.requests().unwrap_or_default();
    if requests.is_empty() {
        return Err(ProtocolError::InvalidBody("no settings given".into()).into());
    }
    // every key must parse and be in range before any of them is applied
    let settings = requests.iter().map(Setting::parse).collect::<Result<Vec<_>, _>>()?;
    for s in &settings {
        s.validate().with_context(|| format!("invalid {:?}", s))?;
    }
    for s in settings {
        info!("settings: {:?}", s);
        s.apply(nav).with_context(|| format!("apply {:?}", s))?;
    }
    Ok(Reply::Ack)
}

/// `ip_address`/`port` from the `configuration` object, or the top level.
fn workstation(body: &Map<String, Value>) -> Result<(String, u16), ProtocolError> {
    let cfg = match body.get("configuration") {
        Some(Value::Object(c)) => c,
        Some(_) => return Err(ProtocolError::InvalidBody("`configuration` must be an object".into())),
        None => body,
    };
    let host = cfg
        .get("ip_address")
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())
        .ok_or(ProtocolError::MissingField("ip_address"))?;
    let port = cfg.get("port").ok_or(ProtocolError::MissingField("port"))?;
    let port = lenient_i64(port)
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p != 0)
        .ok_or_else(|| ProtocolError::InvalidBody(format!("bad port {}", port)))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn workstation_from_nested_or_top_level() {
        let nested = obj(json!({"configuration": {"ip_address": "192.168.1.5", "port": "4000"}}));
        assert_eq!(workstation(&nested).unwrap(), ("192.168.1.5".to_string(), 4000));
        let flat = obj(json!({"ip_address": "10.1.1.1", "port": 5001}));
        assert_eq!(workstation(&flat).unwrap(), ("10.1.1.1".to_string(), 5001));
        let bad = obj(json!({"ip_address": "10.1.1.1", "port": 70000}));
        assert!(workstation(&bad).is_err());
    }

    #[test]
    fn settings_parse_before_apply() {
        let kv = |k: &str, v: Value| KeyValue { key: k.into(), value: Some(v) };
        assert_eq!(Setting::parse(&kv("speed", json!("7.5"))).unwrap(), Setting::Speed(7.5));
        assert_eq!(Setting::parse(&kv("fps", json!(60))).unwrap(), Setting::Fps(60));
        assert!(matches!(
            Setting::parse(&kv("warp", json!(9))),
            Err(ProtocolError::UnknownMessage { .. })
        ));
        assert!(matches!(Setting::parse(&kv("height", json!("high"))), Err(ProtocolError::InvalidBody(_))));
    }

    #[test]
    fn validate_checks_ranges_and_camera_tables() {
        assert!(Setting::Speed(7.0).validate().is_ok());
        assert!(Setting::Height(500.0).validate().is_err());
        assert!(Setting::DistanceThreshold(0.0).validate().is_err());
        assert!(Setting::CameraAngle(15.0).validate().is_err());
        assert!(Setting::Fps(60).validate().is_ok());
        assert!(Setting::Fps(61).validate().is_err());
        assert!(Setting::Resolution(1080).validate().is_ok());
        assert!(Setting::Resolution(1081).validate().is_err());
    }
}
