//! Test harness: a server on an ephemeral port and a bare HTTP/1.1 client.

#![allow(dead_code)]

use std::net::SocketAddr;

use rainbow::{Error, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct Running {
    pub addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), Error>>,
}

impl Running {
    /// Fires the stop signal without waiting for the drain.
    pub fn signal(self) -> JoinHandle<Result<(), Error>> {
        let _ = self.stop.send(());
        self.handle
    }

    pub async fn stop(self) -> Result<(), Error> {
        self.signal().await.expect("server task panicked")
    }
}

/// Starts `server` on `127.0.0.1:0`. The `Server` must have been built with
/// that address.
pub async fn spawn(server: Server) -> Running {
    let listening = server.listen().await.expect("bind");
    let addr = listening.local_addr().expect("local addr");
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(listening.serve(async move {
        let _ = stopped.await;
    }));
    Running { addr, stop, handle }
}

#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub async fn get(addr: SocketAddr, path: &str) -> Reply {
    send(addr, "GET", path, &[], "").await
}

pub async fn post(addr: SocketAddr, path: &str, body: &str) -> Reply {
    send(addr, "POST", path, &[("content-type", "application/json")], body).await
}

/// One request on a fresh connection with `connection: close`, read to EOF.
pub async fn send(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> Reply {
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    let mut raw = format!(
        "{method} {path} HTTP/1.1\r\nhost: {addr}\r\nconnection: close\r\ncontent-length: {}\r\n",
        body.len()
    );
    for (name, value) in headers {
        raw.push_str(&format!("{name}: {value}\r\n"));
    }
    raw.push_str("\r\n");
    raw.push_str(body);
    stream.write_all(raw.as_bytes()).await.expect("write request");

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.expect("read response");
    parse(&String::from_utf8(buf).expect("utf-8 response"))
}

fn parse(raw: &str) -> Reply {
    let (head, body) = raw.split_once("\r\n\r\n").expect("complete response head");
    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|l| l.split(' ').nth(1))
        .and_then(|s| s.parse().ok())
        .expect("status line");
    let headers = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect();
    Reply { status, headers, body: body.to_owned() }
}
