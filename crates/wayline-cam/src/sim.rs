use anyhow::Result;
use tracing::debug;

use crate::command::{id, CameraResponse, CommandKind, PeripheralCommand};
use crate::serializer::{PeripheralLink, ResponseSender};

/// In-process camera that answers every command through the response channel.
pub struct SimCameraLink {
    responder: ResponseSender,
    registers: [[u8; 4]; id::COUNT],
}

impl SimCameraLink {
    pub fn new(responder: ResponseSender) -> Self {
        let mut registers = [[0u8; 4]; id::COUNT];
        registers[id::POWER as usize] = [1, 0, 0, 0];
        registers[id::BATTERY as usize] = [100, 0, 0, 0];
        registers[id::MODEL as usize] = [1, 0, 0, 0];
        // 1080p, 30 fps, wide
        registers[id::VIDEO_SETTINGS as usize] = [3, 4, 0, 0];
        Self { responder, registers }
    }
}

impl PeripheralLink for SimCameraLink {
    fn transmit(&mut self, cmd: &PeripheralCommand) -> Result<()> {
        let slot = self
            .registers
            .get_mut(cmd.id as usize)
            .ok_or_else(|| anyhow::anyhow!("sim camera has no register {}", cmd.id))?;
        let value = match cmd.kind {
            CommandKind::Get => *slot,
            CommandKind::Set => {
                *slot = cmd.payload;
                [0; 4]
            }
        };
        debug!("sim cam: {:?} {} -> {:?}", cmd.kind, cmd.id, value);
        self.responder.send(CameraResponse { kind: cmd.kind, id: cmd.id, success: true, value });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{CameraBus, DEFAULT_BUSY_TIMEOUT};
    use std::time::Duration;

    #[tokio::test]
    async fn resolution_change_is_reflected_in_state() {
        let bus = CameraBus::new();
        let link = SimCameraLink::new(bus.responder());
        let (cam, _task) = bus.start(link, DEFAULT_BUSY_TIMEOUT);
        let mut watch = cam.subscribe();

        cam.set_resolution(720).unwrap();
        tokio::time::timeout(Duration::from_secs(2), watch.changed()).await.unwrap().unwrap();

        let st = cam.state();
        assert_eq!(st.video_resolution, Some(720));
        assert_eq!(st.video_fps, Some(30));
    }
}
