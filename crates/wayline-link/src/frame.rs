//! Wire framing: `u32` big-endian length + payload for requests, `u32`
//! big-endian status codes (optionally followed by framed payloads) for replies.

use anyhow::{bail, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use wayline_proto::{MessageCode, ProtocolError};

/// Outcome of one request, as written back on the same connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Status(Vec<u8>),
    StartHeartbeat { host: String, port: String },
    Err,
}

impl Reply {
    pub fn code(&self) -> MessageCode {
        match self {
            Reply::Ack => MessageCode::Ack,
            Reply::Status(_) => MessageCode::StatusResponse,
            Reply::StartHeartbeat { .. } => MessageCode::StartHeartbeat,
            Reply::Err => MessageCode::Err,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u32(self.code().as_u32());
        match self {
            Reply::Status(payload) => put_framed(&mut buf, payload),
            Reply::StartHeartbeat { host, port } => {
                put_framed(&mut buf, host.as_bytes());
                put_framed(&mut buf, port.as_bytes());
                buf.put_u32(MessageCode::Ack.as_u32());
            }
            Reply::Ack | Reply::Err => {}
        }
        buf.freeze()
    }
}

fn put_framed(buf: &mut BytesMut, payload: &[u8]) {
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R, max: usize) -> Result<Bytes> {
    let len = r.read_u32().await.context("read frame length")? as usize;
    if len > max {
        return Err(ProtocolError::FrameTooLarge { len, max }.into());
    }
    let mut buf = BytesMut::zeroed(len);
    r.read_exact(&mut buf).await.context("read frame body")?;
    Ok(buf.freeze())
}

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> Result<()> {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    put_framed(&mut buf, payload);
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

pub async fn write_reply<W: AsyncWrite + Unpin>(w: &mut W, reply: &Reply) -> Result<()> {
    w.write_all(&reply.encode()).await?;
    w.flush().await?;
    Ok(())
}

/// Client side of `write_reply`.
pub async fn read_reply<R: AsyncRead + Unpin>(r: &mut R, max: usize) -> Result<Reply> {
    let raw = r.read_u32().await.context("read response code")?;
    let code = MessageCode::try_from(raw).map_err(|c| anyhow::anyhow!("unknown response code {}", c))?;
    Ok(match code {
        MessageCode::Ack => Reply::Ack,
        MessageCode::Err => Reply::Err,
        MessageCode::StatusResponse => Reply::Status(read_frame(r, max).await?.to_vec()),
        MessageCode::StartHeartbeat => {
            let host = String::from_utf8(read_frame(r, max).await?.to_vec()).context("host is not utf-8")?;
            let port = String::from_utf8(read_frame(r, max).await?.to_vec()).context("port is not utf-8")?;
            let ack = r.read_u32().await.context("read trailing ack")?;
            if ack != MessageCode::Ack.as_u32() {
                bail!("expected ACK after START_HEARTBEAT, got {}", ack);
            }
            Reply::StartHeartbeat { host, port }
        }
        MessageCode::HeartbeatRequest => bail!("unexpected HEARTBEAT_REQUEST in reply position"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_heartbeat_layout() {
        let raw = Reply::StartHeartbeat { host: "10.0.0.2".into(), port: "5000".into() }.encode();
        let mut want = Vec::new();
        want.extend_from_slice(&404u32.to_be_bytes());
        want.extend_from_slice(&8u32.to_be_bytes());
        want.extend_from_slice(b"10.0.0.2");
        want.extend_from_slice(&4u32.to_be_bytes());
        want.extend_from_slice(b"5000");
        want.extend_from_slice(&200u32.to_be_bytes());
        assert_eq!(&raw[..], &want[..]);
    }

    #[tokio::test]
    async fn status_reply_reads_back() {
        let reply = Reply::Status(br#"{"heartbeat":true}"#.to_vec());
        let mut cursor = std::io::Cursor::new(reply.encode().to_vec());
        assert_eq!(read_reply(&mut cursor, 1024).await.unwrap(), reply);
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let mut raw = 10_000u32.to_be_bytes().to_vec();
        raw.extend_from_slice(&[0u8; 16]);
        let err = read_frame(&mut std::io::Cursor::new(raw), 1024).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::FrameTooLarge { len: 10_000, max: 1024 })
        ));
    }
}
