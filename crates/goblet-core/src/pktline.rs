// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Git pkt-line framing: the wire format underlying Smart-HTTP v2.
//!
//! A pkt-line is a 4-hex-digit length header (counting itself) followed by
//! `length - 4` bytes of payload. Three lengths are reserved as sentinels
//! rather than data: `0000` (flush), `0001` (delim), `0002` (response-end).

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload bytes in a single data pkt-line.
pub const MAX_PKT_PAYLOAD: usize = 65516;
/// Maximum total declared length of a pkt-line, header included.
pub const MAX_PKT_LEN: usize = MAX_PKT_PAYLOAD + 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error("pkt-line stream truncated mid-frame")]
    Truncated,
    #[error("pkt-line length header {0:?} is not valid 4-digit hex")]
    BadLength(String),
    #[error("pkt-line declared length {0} exceeds maximum of {MAX_PKT_LEN}")]
    Oversize(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Flush,
    Delim,
    ResponseEnd,
}

/// A single decoded pkt-line. `bytes` is empty for the three sentinel kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub bytes: Bytes,
}

impl Frame {
    pub fn data(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Data,
            bytes: bytes.into(),
        }
    }

    pub fn flush() -> Self {
        Self {
            kind: FrameKind::Flush,
            bytes: Bytes::new(),
        }
    }

    pub fn delim() -> Self {
        Self {
            kind: FrameKind::Delim,
            bytes: Bytes::new(),
        }
    }

    pub fn response_end() -> Self {
        Self {
            kind: FrameKind::ResponseEnd,
            bytes: Bytes::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.kind != FrameKind::Data
    }

    /// Encode this frame as it appears on the wire.
    pub fn encode(&self) -> Bytes {
        match self.kind {
            FrameKind::Flush => Bytes::from_static(b"0000"),
            FrameKind::Delim => Bytes::from_static(b"0001"),
            FrameKind::ResponseEnd => Bytes::from_static(b"0002"),
            FrameKind::Data => {
                let mut buf = Vec::with_capacity(4 + self.bytes.len());
                buf.extend_from_slice(format!("{:04x}", self.bytes.len() + 4).as_bytes());
                buf.extend_from_slice(&self.bytes);
                Bytes::from(buf)
            }
        }
    }
}

/// Read exactly one pkt-line frame from `r`.
pub async fn read_frame<R>(r: &mut R) -> Result<Frame, Error>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; 4];
    r.read_exact(&mut hdr).await.map_err(|_| Error::Truncated)?;

    let hdr_str = std::str::from_utf8(&hdr)
        .map_err(|_| Error::BadLength(String::from_utf8_lossy(&hdr).into_owned()))?;
    let len = usize::from_str_radix(hdr_str, 16)
        .map_err(|_| Error::BadLength(hdr_str.to_string()))?;

    match len {
        0 => Ok(Frame::flush()),
        1 => Ok(Frame::delim()),
        2 => Ok(Frame::response_end()),
        3 => Err(Error::BadLength(hdr_str.to_string())),
        len if len > MAX_PKT_LEN => Err(Error::Oversize(len)),
        len => {
            let mut payload = vec![0u8; len - 4];
            r.read_exact(&mut payload)
                .await
                .map_err(|_| Error::Truncated)?;
            Ok(Frame::data(payload))
        }
    }
}

/// Write one pkt-line frame to `w`.
pub async fn write_frame<W>(w: &mut W, frame: &Frame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&frame.encode()).await
}

/// Read frames until (and including) one whose kind is `until`.
pub async fn scan_until<R>(r: &mut R, until: FrameKind) -> Result<Vec<Frame>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut frames = Vec::new();
    loop {
        let frame = read_frame(r).await?;
        let stop = frame.kind == until;
        frames.push(frame);
        if stop {
            break;
        }
    }
    Ok(frames)
}

/// Protocol v2 commands this server understands. Anything else is passed
/// through to upstream verbatim and never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    LsRefs,
    Fetch,
}

impl Command {
    /// Parse the `command=<name>\n` line that opens a v2 request.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let s = std::str::from_utf8(payload).ok()?.trim_end_matches('\n');
        match s.strip_prefix("command=")? {
            "ls-refs" => Some(Command::LsRefs),
            "fetch" => Some(Command::Fetch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::LsRefs => "ls-refs",
            Command::Fetch => "fetch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    async fn round_trip(frame: Frame) -> Frame {
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();
        let mut cursor = Cursor::new(buf);
        read_frame(&mut cursor).await.unwrap()
    }

    #[tokio::test]
    async fn flush_round_trips() {
        assert_eq!(round_trip(Frame::flush()).await, Frame::flush());
    }

    #[tokio::test]
    async fn delim_round_trips() {
        assert_eq!(round_trip(Frame::delim()).await, Frame::delim());
    }

    #[tokio::test]
    async fn response_end_round_trips() {
        assert_eq!(round_trip(Frame::response_end()).await, Frame::response_end());
    }

    #[tokio::test]
    async fn data_round_trips() {
        let frame = Frame::data(&b"command=ls-refs\n"[..]);
        assert_eq!(round_trip(frame.clone()).await, frame);
    }

    #[tokio::test]
    async fn empty_data_frame_round_trips() {
        // length 4, zero-byte payload: distinct from flush (length 0).
        let frame = Frame::data(&b""[..]);
        let encoded = frame.encode();
        assert_eq!(&encoded[..], b"0004");
        assert_eq!(round_trip(frame.clone()).await, frame);
    }

    #[tokio::test]
    async fn truncated_header_is_fatal() {
        let mut cursor = Cursor::new(vec![0x30, 0x30]); // only 2 bytes
        assert!(matches!(read_frame(&mut cursor).await, Err(Error::Truncated)));
    }

    #[tokio::test]
    async fn truncated_payload_is_fatal() {
        // declares 10 bytes of payload but only provides 2
        let mut cursor = Cursor::new(b"000eab".to_vec());
        assert!(matches!(read_frame(&mut cursor).await, Err(Error::Truncated)));
    }

    #[tokio::test]
    async fn non_hex_length_is_fatal() {
        let mut cursor = Cursor::new(b"zzzz".to_vec());
        assert!(matches!(read_frame(&mut cursor).await, Err(Error::BadLength(_))));
    }

    #[tokio::test]
    async fn oversize_length_is_fatal() {
        // 0xffff = 65535 > MAX_PKT_LEN (65520)
        let mut cursor = Cursor::new(b"ffff".to_vec());
        assert!(matches!(read_frame(&mut cursor).await, Err(Error::Oversize(_))));
    }

    #[tokio::test]
    async fn scan_until_flush_collects_data_then_stops() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::data(&b"want aaaa\n"[..])).await.unwrap();
        write_frame(&mut buf, &Frame::data(&b"want bbbb\n"[..])).await.unwrap();
        write_frame(&mut buf, &Frame::flush()).await.unwrap();
        write_frame(&mut buf, &Frame::data(&b"trailing, not read\n"[..])).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let frames = scan_until(&mut cursor, FrameKind::Flush).await.unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].kind, FrameKind::Flush);
    }

    #[test]
    fn classifies_known_commands() {
        assert_eq!(Command::parse(b"command=ls-refs\n"), Some(Command::LsRefs));
        assert_eq!(Command::parse(b"command=fetch\n"), Some(Command::Fetch));
        assert_eq!(Command::parse(b"command=receive-pack\n"), None);
        assert_eq!(Command::parse(b"not a command"), None);
    }

    proptest! {
        #[test]
        fn data_frame_round_trips_for_arbitrary_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..4096)
        ) {
            let frame = Frame::data(payload);
            let rt = futures::executor::block_on(round_trip(frame.clone()));
            prop_assert_eq!(rt, frame);
        }
    }
}
