//! Synchronous wire client: `[4-byte little-endian length][UTF-8 JSON
//! payload]`, the same framing `vellum-server::protocol` speaks. The CLI
//! is a single-threaded REPL issuing one request at a time, so there is
//! no need for the async machinery the server uses to frame it.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub fn connect(addr: &str, connect_timeout: Duration) -> Result<Self> {
        let sockaddr = addr
            .parse()
            .or_else(|_| {
                use std::net::ToSocketAddrs;
                addr.to_socket_addrs()?
                    .next()
                    .ok_or_else(|| anyhow!("could not resolve {addr}"))
            })
            .with_context(|| format!("resolving {addr}"))?;
        let stream = TcpStream::connect_timeout(&sockaddr, connect_timeout)
            .with_context(|| format!("connecting to {addr}"))?;
        stream.set_nodelay(true)?;
        Ok(Client { stream })
    }

    pub fn call(&mut self, req: &Value) -> Result<Value> {
        self.write_frame(req)?;
        self.read_frame()?.ok_or_else(|| anyhow!("server closed the connection"))
    }

    fn write_frame(&mut self, value: &Value) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        let len = payload.len() as u32;
        self.stream.write_all(&len.to_le_bytes())?;
        self.stream.write_all(&payload)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Value>> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            return Err(anyhow!("server sent an oversized frame ({len} bytes)"));
        }
        let mut payload = vec![0u8; len as usize];
        self.stream.read_exact(&mut payload)?;
        Ok(Some(serde_json::from_slice(&payload)?))
    }
}
