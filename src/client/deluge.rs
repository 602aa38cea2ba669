//! Deluge daemon RPC backend.
//!
//! The daemon speaks a framed protocol over TLS. Every frame is:
//!
//! ```txt
//! <'D'><body length as u32 big endian><zlib compressed rencode body>
//! ```
//!
//! A request is a list of `[id, method, args, kwargs]` calls. Answers are
//! lists tagged with the message type: `[1, id, value]` for a result,
//! `[2, id, exception, message, traceback]` for an error and
//! `[3, event, args]` for events, which we ignore.
use std::io::{self, Read, Write};

use async_trait::async_trait;
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::rencode::{self, Value};
use super::{remote_parent, Adapter, InjectRequest, Result};
use crate::conf::{ClientConf, ClientKind};
use crate::error::client::ClientError;

const DEFAULT_PORT: u16 = 58846;
const PROTOCOL_VERSION: u8 = b'D';
const HEADER_LEN: usize = 5;
/// Frames beyond this size are refused rather than buffered.
const MAX_FRAME_LEN: usize = 64 * crate::MIB as usize;
/// Sent with the login, the daemon refuses clients older than 2.0.
const CLIENT_VERSION: &str = "2.0.4";

const RPC_RESPONSE: i64 = 1;
const RPC_ERROR: i64 = 2;
const RPC_EVENT: i64 = 3;

pub struct DelugeCodec;

impl Encoder<Value> for DelugeCodec {
    type Error = io::Error;

    fn encode(&mut self, value: Value, buf: &mut BytesMut) -> io::Result<()> {
        let mut raw = BytesMut::new();
        rencode::encode(&value, &mut raw);
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(&raw)?;
        let body = zlib.finish()?;

        let len = u32::try_from(body.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "deluge frame too large"))?;
        buf.reserve(HEADER_LEN + body.len());
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u32(len);
        buf.extend_from_slice(&body);
        Ok(())
    }
}

impl Decoder for DelugeCodec {
    type Item = Value;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Value>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        if buf[0] != PROTOCOL_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported deluge protocol version {}", buf[0]),
            ));
        }
        // peek at the length, the body may not be here yet
        let body_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if body_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("deluge frame of {body_len} bytes exceeds limit"),
            ));
        }
        if buf.len() < HEADER_LEN + body_len {
            buf.reserve(HEADER_LEN + body_len - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let body = buf.split_to(body_len);
        let mut raw = Vec::new();
        ZlibDecoder::new(&body[..]).read_to_end(&mut raw)?;
        rencode::decode(&raw).map(Some)
    }
}

/// One authenticated conversation with the daemon.
struct Session<S> {
    framed: Framed<S, DelugeCodec>,
    next_id: i64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, DelugeCodec),
            next_id: 0,
        }
    }

    async fn call(&mut self, method: &str, args: Vec<Value>, kwargs: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        log::trace!("Deluge call {} #{}", method, id);
        let request = Value::List(vec![Value::List(vec![
            Value::Int(id),
            Value::str(method),
            Value::List(args),
            kwargs,
        ])]);
        self.framed.send(request).await?;

        while let Some(message) = self.framed.next().await {
            let message = message?;
            let parts = message
                .as_list()
                .ok_or_else(|| ClientError::Protocol("deluge message is not a list".into()))?;
            match parts.first().and_then(Value::as_int) {
                Some(RPC_EVENT) => {
                    log::trace!("Ignoring deluge event {:?}", parts.get(1));
                }
                Some(RPC_RESPONSE) if parts.get(1).and_then(Value::as_int) == Some(id) => {
                    return Ok(parts.get(2).cloned().unwrap_or(Value::None));
                }
                Some(RPC_ERROR) if parts.get(1).and_then(Value::as_int) == Some(id) => {
                    return Err(rpc_error(parts));
                }
                _ => log::debug!("Ignoring unexpected deluge message {:?}", parts.first()),
            }
        }
        Err(ClientError::Unreachable(
            "deluge daemon closed the connection".into(),
        ))
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.call(
            "daemon.login",
            vec![Value::str(username), Value::str(password)],
            Value::dict([("client_version", Value::str(CLIENT_VERSION))]),
        )
        .await
        .map_err(|e| {
            if matches!(e, ClientError::AuthRejected) {
                log::error!("Incorrect Deluge login credentials");
            }
            e
        })?;
        Ok(())
    }
}

fn rpc_error(parts: &[Value]) -> ClientError {
    let kind = parts.get(2).and_then(Value::as_str).unwrap_or("Error");
    let message = parts.get(3).and_then(Value::as_str).unwrap_or_default();
    if kind == "BadLoginError" {
        ClientError::AuthRejected
    } else {
        ClientError::Rpc(format!("{kind}: {message}"))
    }
}

pub struct Deluge {
    conf: ClientConf,
}

impl Deluge {
    pub fn new(conf: ClientConf) -> Self {
        Self { conf }
    }

    /// The daemon's host and port. The url may be a bare host or carry a
    /// scheme.
    fn address(&self) -> Result<(String, u16)> {
        let raw = self.conf.url.trim();
        let raw = if raw.is_empty() { "127.0.0.1" } else { raw };
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("tcp://{raw}")
        };
        let url = url::Url::parse(&with_scheme)
            .map_err(|e| ClientError::Protocol(format!("invalid deluge address {raw}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| ClientError::Protocol(format!("no host in deluge address {raw}")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = self.conf.port.or(url.port()).unwrap_or(DEFAULT_PORT);
        Ok((host, port))
    }

    async fn connect(&self) -> Result<tokio_native_tls::TlsStream<TcpStream>> {
        let (host, port) = self.address()?;
        let timeout = self.conf.request_timeout();
        let tcp = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| ClientError::Unreachable(format!("connecting to {host}:{port} timed out")))?
            .map_err(|e| ClientError::Unreachable(format!("{host}:{port}: {e}")))?;

        // the daemon generates a self signed certificate on first start
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        let tls = tokio_native_tls::TlsConnector::from(tls);
        Ok(tls.connect(&host, tcp).await?)
    }

    async fn add_over<S>(&self, stream: S, req: &InjectRequest<'_>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = Session::new(stream);
        session
            .login(&self.conf.username, &self.conf.password)
            .await?;

        let download_location = remote_parent(req.seed_path, req.paths);
        let file_name = req
            .metafile_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.torrent".to_string());
        let metafile = base64::engine::general_purpose::STANDARD.encode(req.metafile);
        log::info!("Adding {} to Deluge at {}", file_name, download_location);

        let added = session
            .call(
                "core.add_torrent_file",
                vec![
                    Value::str(&file_name),
                    Value::str(&metafile),
                    Value::dict([
                        ("download_location", Value::str(&download_location)),
                        ("seed_mode", Value::Bool(true)),
                    ]),
                ],
                Value::Dict(Vec::new()),
            )
            .await?;
        match added.as_str() {
            Some(id) => log::debug!("Deluge added torrent {}", id),
            None => log::warn!("Deluge did not report a torrent id for {}", file_name),
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for Deluge {
    fn kind(&self) -> ClientKind {
        ClientKind::Deluge
    }

    async fn inject(&self, req: &InjectRequest<'_>) -> Result<()> {
        let stream = self.connect().await?;
        self.add_over(stream, req).await
    }
}
