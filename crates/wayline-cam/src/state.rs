use serde::Serialize;
use tracing::debug;

use crate::command::{fps_value, id, resolution_px, CameraResponse, CommandKind};

/// Bit in the video settings flags byte selecting PAL output.
const FLAG_TV_MODE_PAL: u8 = 0x01;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CameraState {
    pub capture_mode: u8,
    pub battery: u8,
    pub model: u8,
    pub video_resolution: Option<u32>,
    pub video_fps: Option<u32>,
    pub field_of_view: u8,
    pub pal: bool,
    pub low_light: bool,
    pub protune: bool,
}

impl CameraState {
    /// Fold a successful get response into the state. Returns true if anything changed.
    pub fn apply(&mut self, resp: &CameraResponse) -> bool {
        if resp.kind != CommandKind::Get || !resp.success {
            return false;
        }
        let before = self.clone();
        let v = resp.value;
        match resp.id {
            id::CAPTURE_MODE => self.capture_mode = v[0],
            id::BATTERY => self.battery = v[0],
            id::MODEL => self.model = v[0],
            id::VIDEO_SETTINGS => {
                self.video_resolution = resolution_px(v[0]);
                self.video_fps = fps_value(v[1]);
                self.field_of_view = v[2];
                self.pal = v[3] & FLAG_TV_MODE_PAL != 0;
            }
            id::LOW_LIGHT => self.low_light = v[0] != 0,
            id::PROTUNE => self.protune = v[0] != 0,
            other => {
                debug!("cam: ignoring get response for command {}", other);
            }
        }
        let changed = *self != before;
        if changed {
            debug!("cam: state changed {:?}", self);
        }
        changed
    }
}
