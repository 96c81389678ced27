//! Messages exchanged between workers and a Strata storage node, and the
//! framing that carries them over TCP.
//!
//! Every frame is a 4-byte little-endian payload length followed by the
//! `bincode` encoding of one [`StorageRequest`] or [`StorageResponse`].

use serde::{Deserialize, Serialize};

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageRequest {
    Handshake {
        worker_id: u32,
    },
    CreateFile {
        query_id: u32,
        name: String,
        tag: String,
    },
    TruncateFile {
        query_id: u32,
        name: String,
        tag: String,
        new_size_bytes: i32,
    },
    WriteBlock {
        query_id: u32,
        name: String,
        tag: String,
        block: u32,
        data: Vec<u8>,
    },
    ReadBlock {
        query_id: u32,
        name: String,
        tag: String,
        block: u32,
    },
    TagFile {
        query_id: u32,
        src_name: String,
        src_tag: String,
        dst_name: String,
        dst_tag: String,
    },
    TagCommit {
        query_id: u32,
        name: String,
        tag: String,
    },
}

impl StorageRequest {
    /// Query id for logging; the handshake carries the worker id instead.
    pub fn query_id(&self) -> u32 {
        match self {
            StorageRequest::Handshake { worker_id } => *worker_id,
            StorageRequest::CreateFile { query_id, .. }
            | StorageRequest::TruncateFile { query_id, .. }
            | StorageRequest::WriteBlock { query_id, .. }
            | StorageRequest::ReadBlock { query_id, .. }
            | StorageRequest::TagFile { query_id, .. }
            | StorageRequest::TagCommit { query_id, .. } => *query_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StorageRequest::Handshake { .. } => "HANDSHAKE",
            StorageRequest::CreateFile { .. } => "CREATE_FILE",
            StorageRequest::TruncateFile { .. } => "TRUNCATE_FILE",
            StorageRequest::WriteBlock { .. } => "WRITE_BLOCK",
            StorageRequest::ReadBlock { .. } => "READ_BLOCK",
            StorageRequest::TagFile { .. } => "TAG_FILE",
            StorageRequest::TagCommit { .. } => "TAG_COMMIT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageResponse {
    HandshakeAck { block_size: u32 },
    /// `0` on success, a negative status code otherwise.
    Status { status: i8 },
    /// `data` is empty unless `status` is `0`.
    BlockData { status: i8, data: Vec<u8> },
}

impl StorageResponse {
    pub fn status(&self) -> i8 {
        match self {
            StorageResponse::HandshakeAck { .. } => 0,
            StorageResponse::Status { status } | StorageResponse::BlockData { status, .. } => {
                *status
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("Frame of {len} bytes exceeds limit of {}", MAX_FRAME_LEN)]
    FrameTooLarge { len: usize },
}

/// Length-prefixed frame codec over any tokio stream
#[cfg(feature = "tokio")]
pub mod frame {
    use super::*;
    use serde::de::DeserializeOwned;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), IpcError>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let bytes = bincode::serialize(message)?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(IpcError::FrameTooLarge { len: bytes.len() });
        }
        writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame. `Ok(None)` when the peer closed the connection cleanly
    /// between frames.
    pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, IpcError>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(IpcError::FrameTooLarge { len });
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        Ok(Some(bincode::deserialize(&buf)?))
    }
}

/// IPC Client for talking to a storage node
#[cfg(feature = "tokio")]
pub mod client {
    use super::*;
    use tokio::net::{TcpStream, ToSocketAddrs};

    pub struct StorageClient {
        stream: TcpStream,
    }

    impl StorageClient {
        pub async fn connect(addr: impl ToSocketAddrs) -> anyhow::Result<Self> {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(Self { stream })
        }

        /// Send a request and receive response
        pub async fn send(&mut self, request: &StorageRequest) -> anyhow::Result<StorageResponse> {
            frame::write_frame(&mut self.stream, request).await?;
            match frame::read_frame(&mut self.stream).await? {
                Some(response) => Ok(response),
                None => anyhow::bail!("Storage node closed the connection"),
            }
        }

        /// Register as a worker; returns the node's block size.
        pub async fn handshake(&mut self, worker_id: u32) -> anyhow::Result<u32> {
            match self.send(&StorageRequest::Handshake { worker_id }).await? {
                StorageResponse::HandshakeAck { block_size } => Ok(block_size),
                other => anyhow::bail!("Unexpected handshake response: {:?}", other),
            }
        }

        /// Send a request answered by a bare status code.
        pub async fn status(&mut self, request: &StorageRequest) -> anyhow::Result<i8> {
            match self.send(request).await? {
                StorageResponse::Status { status } => Ok(status),
                other => anyhow::bail!("Unexpected response to {}: {:?}", request.kind(), other),
            }
        }

        pub async fn read_block(
            &mut self,
            query_id: u32,
            name: &str,
            tag: &str,
            block: u32,
        ) -> anyhow::Result<(i8, Vec<u8>)> {
            let request = StorageRequest::ReadBlock {
                query_id,
                name: name.to_string(),
                tag: tag.to_string(),
                block,
            };
            match self.send(&request).await? {
                StorageResponse::BlockData { status, data } => Ok((status, data)),
                other => anyhow::bail!("Unexpected response to READ_BLOCK: {:?}", other),
            }
        }
    }
}
