//! Per-connection session loop. Each accepted connection gets one task;
//! the task owns that connection's open transaction, if any, and rolls it
//! back on any exit path -- EOF, protocol error, or idle timeout.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use vellum_core::txn::Transaction;
use vellum_core::Engine;

use crate::{command, protocol};

pub async fn handle(engine: Arc<Engine>, stream: TcpStream, idle_timeout: Duration) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into());
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    if let Err(e) = run(&engine, reader, writer, idle_timeout).await {
        log::warn!("connection {peer} closed with error: {e}");
    } else {
        log::debug!("connection {peer} closed");
    }
}

async fn run<R, W>(engine: &Engine, mut reader: R, mut writer: W, idle_timeout: Duration) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut txn: Option<Transaction> = None;

    loop {
        let next_frame = protocol::read_frame(&mut reader);
        let request = if idle_timeout.is_zero() {
            next_frame.await?
        } else {
            match tokio::time::timeout(idle_timeout, next_frame).await {
                Ok(result) => result?,
                Err(_elapsed) => {
                    log::info!("connection idle for {idle_timeout:?}, closing");
                    None
                }
            }
        };

        let Some(request) = request else {
            // EOF or idle timeout: drop any open transaction, then exit.
            txn.take();
            return Ok(());
        };

        let response = command::dispatch(engine, &mut txn, request).await;
        protocol::write_frame(&mut writer, &response).await?;
    }
}
