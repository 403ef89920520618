//! Lockstep echo handler for the tokio backend.

use crate::error::ConnectionError;
use crate::runtime::buffer::ChatMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, trace};

/// Echo every chunk read from `stream` back to it until EOF or an I/O error.
///
/// A chunk is whatever one read returns, at most `MAX_LENGTH` bytes. The
/// next read starts only after the whole chunk has been written back.
pub async fn handle_connection<S>(mut stream: S, log_messages: bool) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut message = ChatMessage::new();

    loop {
        let n = stream
            .read(message.read_buf())
            .await
            .map_err(ConnectionError::Read)?;
        if n == 0 {
            trace!("Connection closed by client");
            return Ok(());
        }

        message.set_len(n);
        if log_messages {
            info!("Received: {}", message.text());
        }

        stream
            .write_all(message.as_bytes())
            .await
            .map_err(ConnectionError::Write)?;
        message.clear();
    }
}
