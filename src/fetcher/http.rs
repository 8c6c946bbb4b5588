use anyhow::Result;
use reqwest::header::{HeaderMap, HeaderValue, HOST, ORIGIN, REFERER};
use reqwest::Client;
use tracing::debug;

use crate::config::SessionConfig;

static USER_AGENT: &str = "tileset-mirror/0.1";

/// Source of asset bytes. A non-success response is an error.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &SessionConfig) -> Result<HttpTransport> {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_str(&config.origin)?);
        headers.insert(HOST, HeaderValue::from_str(&config.host)?);
        headers.insert(REFERER, HeaderValue::from_str(&config.referer)?);

        // `accept-encoding: gzip, deflate` is added by reqwest itself so that it also decodes the body
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .gzip(true)
            .deflate(true);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(HttpTransport {
            client: builder.build()?,
        })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let res = self.client.get(url).send().await?.error_for_status()?;
        debug!(url, status = %res.status(), "received response");
        Ok(res.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionOverrides, DEFAULT_ORIGIN, DEFAULT_REFERER};
    use crate::fetcher::{Fetcher, RetryPolicy};
    use crate::tileset::DownloadTask;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers `GET /ok` with a 4 byte body and anything else with 404, keeping every request head.
    async fn start_server() -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let heads = Arc::new(Mutex::new(vec![]));
        let recorded = heads.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![];
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|window| window == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let head = String::from_utf8_lossy(&buf).into_owned();
                let response = if head.starts_with("GET /ok ") {
                    "HTTP/1.1 200 OK\r\ncontent-length: 4\r\nconnection: close\r\n\r\nb3dm"
                } else {
                    "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                };
                recorded.lock().unwrap().push(head);
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (addr, heads)
    }

    fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
        head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case(name) {
                Some(value.trim())
            } else {
                None
            }
        })
    }

    fn transport(addr: SocketAddr) -> HttpTransport {
        let config = SessionConfig::new(SessionOverrides {
            base_url: Some(format!("http://{}", addr)),
            output_root: Some(PathBuf::from("out")),
            host: Some("data1.mars3d.cn".to_string()),
            ..Default::default()
        })
        .unwrap();
        HttpTransport::new(&config).unwrap()
    }

    #[tokio::test]
    async fn sends_the_fixed_header_set() {
        let (addr, heads) = start_server().await;
        let body = transport(addr)
            .get(&format!("http://{}/ok", addr))
            .await
            .unwrap();
        assert_eq!(body, b"b3dm");

        let heads = heads.lock().unwrap();
        assert_eq!(heads.len(), 1);
        let head = &heads[0];
        assert_eq!(header(head, "origin"), Some(DEFAULT_ORIGIN));
        assert_eq!(header(head, "host"), Some("data1.mars3d.cn"));
        assert_eq!(header(head, "referer"), Some(DEFAULT_REFERER));
        assert_eq!(header(head, "accept-encoding"), Some("gzip, deflate"));
    }

    #[tokio::test]
    async fn error_status_is_a_failed_request() {
        let (addr, heads) = start_server().await;
        let result = transport(addr)
            .get(&format!("http://{}/missing.b3dm", addr))
            .await;
        assert!(result.is_err());
        assert_eq!(heads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn error_status_is_retried_and_writes_nothing() {
        let (addr, heads) = start_server().await;
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.b3dm");
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let mut fetcher = Fetcher::new(transport(addr), &format!("http://{}", addr), retry);

        let result = fetcher
            .fetch(&DownloadTask {
                reference: "missing.b3dm".to_string(),
                local_path: path.clone(),
                parent_folder: String::new(),
            })
            .await;
        assert!(result.is_err());
        assert_eq!(heads.lock().unwrap().len(), 3);
        assert!(!path.exists());
    }
}
