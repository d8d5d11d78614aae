// src/transport/stdio.rs
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::protocol::{JsonRpcResponse, Message, PARSE_ERROR};

// Single duplex channel with the parent process: newline-framed JSON-RPC on
// stdin/stdout. Lifetime is bound to the parent; we exit on EOF or Ctrl-C.
pub async fn run_stdio_server(dispatcher: Arc<Dispatcher>) -> Result<()> {
    info!("stdio transport listening");
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve_pipe(dispatcher, stdin, stdout).await
}

// The actual read/dispatch/write loop, generic over the pipe ends so it can
// be driven by an in-memory duplex in tests. One sequential loop, so replies
// come back in strict arrival order.
async fn serve_pipe<R, W>(dispatcher: Arc<Dispatcher>, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            read = reader.read_line(&mut line) => read.context("failed to read frame")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, closing stdio transport");
                break;
            }
        };
        if bytes_read == 0 {
            // EOF: the parent closed our stdin, time to go.
            info!("input closed, shutting down");
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match Message::decode(line.trim()) {
            Ok(message) => dispatcher.dispatch(message).await,
            Err(e) => {
                warn!(error = %e, "undecodable frame");
                Some(JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ))
            }
        };

        // Notifications produce no reply.
        if let Some(response) = response {
            let mut frame = serde_json::to_string(&response)?;
            frame.push('\n');
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await?; // ensure the parent sees the frame now
            debug!(bytes = frame.len(), "response written");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MatlabEngine;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(Arc::new(MatlabEngine::new(
            "/nonexistent/matlab-binary",
        ))))
    }

    // Wire serve_pipe to an in-memory duplex and hand back the client ends.
    fn start() -> (
        WriteHalf<DuplexStream>,
        BufReader<ReadHalf<DuplexStream>>,
        JoinHandle<Result<()>>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let handle = tokio::spawn(serve_pipe(
            dispatcher(),
            BufReader::new(server_read),
            server_write,
        ));
        let (client_read, client_write) = tokio::io::split(client);
        (client_write, BufReader::new(client_read), handle)
    }

    async fn read_reply(rx: &mut BufReader<ReadHalf<DuplexStream>>) -> Value {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), rx.read_line(&mut line))
            .await
            .expect("timed out waiting for a reply")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn undecodable_frame_is_parse_error_with_null_id() {
        let (mut tx, mut rx, _handle) = start();

        tx.write_all(b"this is not a frame\n").await.unwrap();

        let reply = read_reply(&mut rx).await;
        assert_eq!(reply["error"]["code"], json!(PARSE_ERROR));
        assert!(reply["id"].is_null());
    }

    #[tokio::test]
    async fn notification_produces_no_frame() {
        let (mut tx, mut rx, _handle) = start();

        // A notification followed by a request: the first frame written back
        // must answer the request, proving the notification stayed silent.
        tx.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n")
            .await
            .unwrap();
        tx.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"tools/list\"}\n")
            .await
            .unwrap();

        let reply = read_reply(&mut rx).await;
        assert_eq!(reply["id"], json!(7));
        assert_eq!(reply["result"]["tools"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn replies_come_back_in_arrival_order() {
        let (mut tx, mut rx, _handle) = start();

        for id in 1..=3 {
            let frame = format!("{{\"jsonrpc\":\"2.0\",\"id\":{id},\"method\":\"tools/list\"}}\n");
            tx.write_all(frame.as_bytes()).await.unwrap();
        }

        for id in 1..=3 {
            assert_eq!(read_reply(&mut rx).await["id"], json!(id));
        }
    }

    #[tokio::test]
    async fn eof_shuts_the_loop_down_cleanly() {
        let (tx, rx, handle) = start();

        // Closing the client write end is the parent going away.
        drop(tx);
        drop(rx);

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop must exit on EOF")
            .unwrap();
        assert!(result.is_ok());
    }
}
