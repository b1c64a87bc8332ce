use thiserror::Error;

/// Camera command ids as carried on the gimbal link.
pub mod id {
    pub const POWER: u16 = 0;
    pub const CAPTURE_MODE: u16 = 1;
    pub const SHUTTER: u16 = 2;
    pub const BATTERY: u16 = 3;
    pub const MODEL: u16 = 4;
    pub const VIDEO_SETTINGS: u16 = 5;
    pub const LOW_LIGHT: u16 = 6;
    pub const PHOTO_RESOLUTION: u16 = 7;
    pub const PHOTO_BURST_RATE: u16 = 8;
    pub const PROTUNE: u16 = 9;
    pub const PROTUNE_WHITE_BALANCE: u16 = 10;
    pub const PROTUNE_COLOUR: u16 = 11;
    pub const PROTUNE_GAIN: u16 = 12;
    pub const PROTUNE_SHARPNESS: u16 = 13;
    pub const PROTUNE_EXPOSURE: u16 = 14;
    pub const TIME: u16 = 15;
    pub const CHARGING: u16 = 16;

    pub const COUNT: usize = 17;
}

const GETTABLE: &[u16] = &[
    id::POWER, id::CAPTURE_MODE, id::BATTERY, id::MODEL, id::VIDEO_SETTINGS, id::LOW_LIGHT,
    id::PHOTO_RESOLUTION, id::PHOTO_BURST_RATE, id::PROTUNE, id::PROTUNE_WHITE_BALANCE,
    id::PROTUNE_COLOUR, id::PROTUNE_GAIN, id::PROTUNE_SHARPNESS, id::PROTUNE_EXPOSURE,
    id::TIME, id::CHARGING,
];

const SETTABLE: &[u16] = &[
    id::POWER, id::CAPTURE_MODE, id::SHUTTER, id::VIDEO_SETTINGS, id::LOW_LIGHT,
    id::PHOTO_RESOLUTION, id::PHOTO_BURST_RATE, id::PROTUNE, id::PROTUNE_WHITE_BALANCE,
    id::PROTUNE_COLOUR, id::PROTUNE_GAIN, id::PROTUNE_SHARPNESS, id::PROTUNE_EXPOSURE,
    id::TIME, id::CHARGING,
];

// Settings the camera does not announce on its own; a set is followed by a get.
const REQUERY: &[u16] = &[
    id::VIDEO_SETTINGS, id::LOW_LIGHT, id::PHOTO_RESOLUTION, id::PHOTO_BURST_RATE, id::PROTUNE,
    id::PROTUNE_WHITE_BALANCE, id::PROTUNE_COLOUR, id::PROTUNE_GAIN, id::PROTUNE_SHARPNESS,
    id::PROTUNE_EXPOSURE,
];

/// Video resolution codes (lines of vertical resolution).
const RESOLUTIONS: &[(u8, u32)] = &[(0, 480), (1, 720), (2, 960), (3, 1080), (4, 1440)];

const FRAME_RATES: &[(u8, u32)] = &[
    (0, 12), (1, 15), (2, 24), (3, 25), (4, 30), (5, 48), (6, 50), (7, 60),
    (8, 80), (9, 90), (10, 100), (11, 120), (12, 240),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("camera command {0} cannot be read")]
    NotGettable(u16),
    #[error("camera command {0} cannot be written")]
    NotSettable(u16),
    #[error("unsupported video resolution {0}p")]
    UnsupportedResolution(u32),
    #[error("unsupported frame rate {0} fps")]
    UnsupportedFps(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Get,
    Set,
}

/// One request to the camera. Immutable once queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralCommand {
    pub kind: CommandKind,
    pub id: u16,
    pub payload: [u8; 4],
}

impl PeripheralCommand {
    pub fn get(id: u16) -> Result<Self, CommandError> {
        if !GETTABLE.contains(&id) {
            return Err(CommandError::NotGettable(id));
        }
        Ok(Self { kind: CommandKind::Get, id, payload: [0; 4] })
    }

    pub fn set(id: u16, payload: [u8; 4]) -> Result<Self, CommandError> {
        if !SETTABLE.contains(&id) {
            return Err(CommandError::NotSettable(id));
        }
        Ok(Self { kind: CommandKind::Set, id, payload })
    }

    pub fn needs_requery(&self) -> bool {
        self.kind == CommandKind::Set && REQUERY.contains(&self.id)
    }
}

/// Asynchronous answer from the camera to a previously transmitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraResponse {
    pub kind: CommandKind,
    pub id: u16,
    pub success: bool,
    pub value: [u8; 4],
}

pub fn resolution_code(px: u32) -> Result<u8, CommandError> {
    RESOLUTIONS.iter().find(|(_, p)| *p == px).map(|(c, _)| *c).ok_or(CommandError::UnsupportedResolution(px))
}

pub fn resolution_px(code: u8) -> Option<u32> {
    RESOLUTIONS.iter().find(|(c, _)| *c == code).map(|(_, p)| *p)
}

pub fn fps_code(fps: u32) -> Result<u8, CommandError> {
    FRAME_RATES.iter().find(|(_, f)| *f == fps).map(|(c, _)| *c).ok_or(CommandError::UnsupportedFps(fps))
}

pub fn fps_value(code: u8) -> Option<u32> {
    FRAME_RATES.iter().find(|(c, _)| *c == code).map(|(_, f)| *f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutter_is_write_only_and_battery_read_only() {
        assert_eq!(PeripheralCommand::get(id::SHUTTER), Err(CommandError::NotGettable(id::SHUTTER)));
        assert_eq!(PeripheralCommand::set(id::BATTERY, [1, 0, 0, 0]), Err(CommandError::NotSettable(id::BATTERY)));
        assert!(PeripheralCommand::get(id::BATTERY).is_ok());
        assert!(PeripheralCommand::get(99).is_err());
    }

    #[test]
    fn requery_only_for_silent_settings() {
        assert!(PeripheralCommand::set(id::VIDEO_SETTINGS, [3, 4, 0, 0]).unwrap().needs_requery());
        assert!(!PeripheralCommand::set(id::SHUTTER, [1, 0, 0, 0]).unwrap().needs_requery());
        assert!(!PeripheralCommand::get(id::VIDEO_SETTINGS).unwrap().needs_requery());
    }

    #[test]
    fn video_tables() {
        assert_eq!(resolution_code(1080), Ok(3));
        assert_eq!(resolution_px(3), Some(1080));
        assert_eq!(fps_code(30), Ok(4));
        assert_eq!(fps_value(12), Some(240));
        assert_eq!(fps_code(29), Err(CommandError::UnsupportedFps(29)));
    }
}
