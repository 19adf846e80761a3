//! The framed call/response codec, independent of what carries the bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroizing;

/// Version byte every frame starts with.  A mismatch is fatal to the call.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum accepted helper frame body; attestation bundles can be large but
/// nothing legitimate approaches this.
pub const MAX_HELPER_FRAME: usize = 1024 * 1024;

/// Operation codes.
pub mod op {
    /// Reserved: error response, body is a `u32` cause.
    pub const ERROR: u32 = 0;
    pub const SIGN: u32 = 1;
    pub const ENROLL: u32 = 2;
    pub const LOAD_RESIDENT_KEYS: u32 = 3;
    pub const LOAD_MODULE: u32 = 4;
    pub const UNLOAD_MODULE: u32 = 5;
}

/// Error causes carried by an [`op::ERROR`] response.
pub mod cause {
    pub const UNSPECIFIED: u32 = 1;
    pub const WRONG_PIN: u32 = 2;
    pub const PIN_REQUIRED: u32 = 3;
    pub const DENIED: u32 = 4;
    pub const NOT_FOUND: u32 = 5;
}

/// Failures of one delegated call.  Always local to the call; the helper is
/// reaped and the pending request fails without touching any other state.
#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    #[error("helper i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("helper closed the channel before responding")]
    Closed,

    #[error("helper frame of {len} bytes exceeds maximum of {max}")]
    Oversize { len: usize, max: usize },

    #[error("helper speaks protocol version {got}, expected {want}")]
    Version { got: u8, want: u8 },

    /// The helper answered with the reserved error operation.
    #[error("helper reported error cause {0}")]
    Remote(u32),

    #[error("helper exited with {0}")]
    Exit(std::process::ExitStatus),

    #[error("malformed helper response")]
    Malformed,
}

impl HelperError {
    /// True for the one remote outcome the dispatcher may retry (once,
    /// after re-prompting for the PIN).
    pub fn is_wrong_pin(&self) -> bool {
        matches!(self, Self::Remote(c) if *c == cause::WRONG_PIN)
    }
}

/// One request/response channel over a byte-stream pair.
///
/// Generic over the transports so tests can drive it with
/// [`tokio::io::duplex`] while production wraps a child process's stdio.
pub struct HelperChannel<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> HelperChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Send one request and block until exactly one full response frame
    /// arrives.  Returns the response `(operation, body)`; an error
    /// response is converted to [`HelperError::Remote`].
    ///
    /// The outgoing frame buffer is zeroized after the write — request
    /// bodies may carry a decrypted PIN, and this endpoint is the only
    /// place that ever holds it.
    pub async fn call(&mut self, operation: u32, body: &[u8]) -> Result<(u32, Vec<u8>), HelperError> {
        let body_len = 1 + 4 + body.len();
        if body_len > MAX_HELPER_FRAME {
            return Err(HelperError::Oversize {
                len: body_len,
                max: MAX_HELPER_FRAME,
            });
        }

        let mut frame = Zeroizing::new(Vec::with_capacity(4 + body_len));
        frame.extend_from_slice(&(body_len as u32).to_be_bytes());
        frame.push(PROTOCOL_VERSION);
        frame.extend_from_slice(&operation.to_be_bytes());
        frame.extend_from_slice(body);
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        drop(frame);

        let mut len_buf = [0u8; 4];
        read_exact_or_closed(&mut self.reader, &mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len < 5 {
            return Err(HelperError::Malformed);
        }
        if len > MAX_HELPER_FRAME {
            return Err(HelperError::Oversize {
                len,
                max: MAX_HELPER_FRAME,
            });
        }

        let mut resp = vec![0u8; len];
        read_exact_or_closed(&mut self.reader, &mut resp).await?;
        let version = resp[0];
        if version != PROTOCOL_VERSION {
            return Err(HelperError::Version {
                got: version,
                want: PROTOCOL_VERSION,
            });
        }
        let resp_op = u32::from_be_bytes([resp[1], resp[2], resp[3], resp[4]]);
        let payload = resp[5..].to_vec();

        if resp_op == op::ERROR {
            if payload.len() != 4 {
                return Err(HelperError::Malformed);
            }
            let cause = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            return Err(HelperError::Remote(cause));
        }
        Ok((resp_op, payload))
    }
}

async fn read_exact_or_closed<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), HelperError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(HelperError::Closed),
        Err(e) => Err(e.into()),
    }
}

/// Encode a well-formed response frame.  Used by tests (and by helper
/// implementations sharing this crate) to speak the channel's own dialect.
pub fn encode_response(operation: u32, body: &[u8]) -> Vec<u8> {
    let body_len = 1 + 4 + body.len();
    let mut out = Vec::with_capacity(4 + body_len);
    out.extend_from_slice(&(body_len as u32).to_be_bytes());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&operation.to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Encode an error response with the given cause.
pub fn encode_error(cause_code: u32) -> Vec<u8> {
    encode_response(op::ERROR, &cause_code.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn call_round_trip() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let (r, w) = tokio::io::split(client_side);
        let mut chan = HelperChannel::new(r, w);

        let server = tokio::spawn(async move {
            let mut req = vec![0u8; 4 + 1 + 4 + 5];
            tokio::io::AsyncReadExt::read_exact(&mut server_side, &mut req)
                .await
                .unwrap();
            assert_eq!(req[4], PROTOCOL_VERSION);
            assert_eq!(u32::from_be_bytes([req[5], req[6], req[7], req[8]]), op::SIGN);
            assert_eq!(&req[9..], b"hello");
            server_side
                .write_all(&encode_response(op::SIGN, b"sig"))
                .await
                .unwrap();
        });

        let (resp_op, body) = chan.call(op::SIGN, b"hello").await.unwrap();
        assert_eq!(resp_op, op::SIGN);
        assert_eq!(body, b"sig");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn error_response_becomes_remote_error() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let (r, w) = tokio::io::split(client_side);
        let mut chan = HelperChannel::new(r, w);

        tokio::spawn(async move {
            let mut sink = vec![0u8; 64];
            let _ = tokio::io::AsyncReadExt::read(&mut server_side, &mut sink).await;
            server_side
                .write_all(&encode_error(cause::WRONG_PIN))
                .await
                .unwrap();
        });

        let err = chan.call(op::SIGN, b"x").await.unwrap_err();
        assert!(err.is_wrong_pin());
    }

    #[tokio::test]
    async fn early_close_is_reported_as_closed() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let (r, w) = tokio::io::split(client_side);
        let mut chan = HelperChannel::new(r, w);
        drop(server_side);
        assert!(matches!(
            chan.call(op::SIGN, b"x").await,
            Err(HelperError::Closed) | Err(HelperError::Io(_))
        ));
    }

    #[tokio::test]
    async fn version_mismatch_is_fatal_to_the_call() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let (r, w) = tokio::io::split(client_side);
        let mut chan = HelperChannel::new(r, w);

        tokio::spawn(async move {
            let mut sink = vec![0u8; 64];
            let _ = tokio::io::AsyncReadExt::read(&mut server_side, &mut sink).await;
            let mut bad = encode_response(op::SIGN, b"sig");
            bad[4] = PROTOCOL_VERSION + 1;
            server_side.write_all(&bad).await.unwrap();
        });

        assert!(matches!(
            chan.call(op::SIGN, b"x").await,
            Err(HelperError::Version { .. })
        ));
    }

    #[tokio::test]
    async fn oversized_response_rejected() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let (r, w) = tokio::io::split(client_side);
        let mut chan = HelperChannel::new(r, w);

        tokio::spawn(async move {
            let mut sink = vec![0u8; 64];
            let _ = tokio::io::AsyncReadExt::read(&mut server_side, &mut sink).await;
            let len = (MAX_HELPER_FRAME + 1) as u32;
            server_side.write_all(&len.to_be_bytes()).await.unwrap();
        });

        assert!(matches!(
            chan.call(op::SIGN, b"x").await,
            Err(HelperError::Oversize { .. })
        ));
    }
}
