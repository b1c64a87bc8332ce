/// Status codes written back to the workstation, each as a big-endian u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageCode {
    Ack = 200,
    StatusResponse = 300,
    HeartbeatRequest = 400,
    StartHeartbeat = 404,
    Err = 500,
}

impl MessageCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.as_u32().to_be_bytes()
    }
}

impl TryFrom<u32> for MessageCode {
    type Error = u32;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            200 => Ok(Self::Ack),
            300 => Ok(Self::StatusResponse),
            400 => Ok(Self::HeartbeatRequest),
            404 => Ok(Self::StartHeartbeat),
            500 => Ok(Self::Err),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_values() {
        assert_eq!(MessageCode::Ack.to_be_bytes(), [0, 0, 0, 200]);
        assert_eq!(MessageCode::Err.as_u32(), 500);
        assert_eq!(MessageCode::try_from(404), Ok(MessageCode::StartHeartbeat));
        assert_eq!(MessageCode::try_from(201), Err(201));
    }
}
