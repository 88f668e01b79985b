use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientToServer {
    Hello { name: String },
    Chat { text: String },
    Who,
    Leave,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToClient {
    Welcome { name: String },
    Roster { participants: Vec<String> },
    Chat { sender: String, text: String },
    Error { message: String },
}

impl ServerToClient {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Read the next JSON line, skipping blank ones. `None` on EOF.
pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        if let Some(parsed) = decode_message(&line)? {
            return Ok(Some(parsed));
        }
    }
}

/// Decode one line of the protocol. Blank lines decode to `None`.
pub fn decode_message<T>(line: &str) -> io::Result<Option<T>>
where
    T: DeserializeOwned,
{
    let trimmed = line.trim_end_matches(LINE_ENDINGS);
    if trimmed.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(trimmed).map(Some).map_err(to_io_error)
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    // One line per message, flushed so a peer sees it before the next read.
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
