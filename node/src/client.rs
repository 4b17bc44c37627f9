//! Bare-bones HTTP/1.1 client used by `nexus-node status`.
//!
//! The node only ever talks to another node's `/bridge` endpoint over plain
//! HTTP on a trusted network, so a raw `TcpStream` is enough and keeps
//! `reqwest` out of the dependency tree.

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use nexus_bridge::config::HEADER_BRIDGE_TOKEN;

/// Where a running node's action endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    host: String,
    port: u16,
    path: String,
}

impl NodeEndpoint {
    /// Parses a base URL such as `http://127.0.0.1:8740` and points it at
    /// the `/bridge` action endpoint underneath any path prefix.
    pub fn from_base_url(base: &str) -> Result<Self> {
        let rest = base
            .strip_prefix("http://")
            .ok_or_else(|| anyhow!("only plain http:// URLs are supported: {}", base))?;

        let (authority, prefix) = match rest.find('/') {
            Some(i) => (&rest[..i], rest[i..].trim_end_matches('/')),
            None => (rest, ""),
        };
        if authority.is_empty() {
            bail!("missing host in URL: {}", base);
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("bad port in URL: {}", base))?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), 80),
        };

        Ok(Self {
            host,
            port,
            path: format!("{}/bridge", prefix),
        })
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Renders a `POST` of `body` as a complete HTTP/1.1 request carrying
    /// the bridge token.
    fn post_request(&self, body: &str, token: &str) -> String {
        format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\n{}: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.path,
            self.host,
            HEADER_BRIDGE_TOKEN,
            token,
            body.len(),
            body,
        )
    }

    /// Posts a JSON body and returns the response body.
    ///
    /// A non-2xx status is an error carrying the body the node sent back.
    pub async fn post_json(&self, body: &str, token: &str) -> Result<String> {
        let addr = self.address();
        let mut stream = tokio::net::TcpStream::connect(&addr)
            .await
            .with_context(|| format!("failed to connect to {}", addr))?;

        stream.write_all(self.post_request(body, token).as_bytes()).await?;
        stream.shutdown().await?;

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        let (status, body) = split_response(&String::from_utf8_lossy(&buf))?;
        if !(200..300).contains(&status) {
            bail!("node answered {}: {}", status, body);
        }
        Ok(body)
    }
}

/// Splits a raw response into its status code and body.
fn split_response(raw: &str) -> Result<(u16, String)> {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| anyhow!("malformed HTTP status line"))?;
    Ok((status, body.to_string()))
}
