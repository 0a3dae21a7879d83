//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use caching_proxy::{ProxyConfig, ProxyServer, Shutdown};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A fake origin server that records what it receives.
pub struct MockOrigin {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockOrigin {
    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Raw request heads received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Absolute URL for `path` on this origin.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a programmable origin. `respond` gets the socket after the request
/// head has been read and is responsible for writing (and closing).
pub async fn start_origin<F, Fut>(respond: F) -> MockOrigin
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    {
        let connections = connections.clone();
        let requests = requests.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((mut socket, _)) => {
                        connections.fetch_add(1, Ordering::SeqCst);
                        let requests = requests.clone();
                        let respond = respond.clone();
                        tokio::spawn(async move {
                            let head = read_request_head(&mut socket).await;
                            requests.lock().unwrap().push(head);
                            respond(socket).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });
    }

    MockOrigin {
        addr,
        connections,
        requests,
    }
}

/// Start an origin that answers every request with `response` and closes.
pub async fn start_fixed_origin(response: &'static [u8]) -> MockOrigin {
    start_origin(move |mut socket| async move {
        let _ = socket.write_all(response).await;
        let _ = socket.shutdown().await;
    })
    .await
}

async fn read_request_head(socket: &mut TcpStream) -> String {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                received.extend_from_slice(&buf[..n]);
                if received.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&received).into_owned()
}

/// A running proxy with its own scratch cache root. Stops on drop.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub cache_root: PathBuf,
    shutdown: Shutdown,
    _dir: TempDir,
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a proxy on an ephemeral port. `configure` can adjust the defaults.
pub async fn start_proxy(configure: impl FnOnce(&mut ProxyConfig)) -> TestProxy {
    let dir = TempDir::new().unwrap();
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.cache.root = dir.path().join("cache");
    config.origin.connect_timeout_secs = 2;
    config.origin.read_timeout_secs = 5;
    config.timeouts.client_read_secs = 5;
    configure(&mut config);

    let server = ProxyServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(shutdown.subscribe()));

    TestProxy {
        addr,
        cache_root: config.cache.root.clone(),
        shutdown,
        _dir: dir,
    }
}

/// Send raw bytes to the proxy and read everything until it closes.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    };
    tokio::time::timeout(Duration::from_secs(30), exchange)
        .await
        .expect("proxy did not close the connection")
}

/// Every regular file under `root` (empty if `root` does not exist).
pub fn cache_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}
