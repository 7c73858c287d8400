//! A tiny S3-compatible HTTP server for tests.
//!
//! It understands path-style `HEAD`, `GET`, and `PUT` object requests, keeps objects in memory,
//! and records every request it receives. Authentication is not checked.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use url::Url;

/// A request as received by a test server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Returns the value of the first header named `key`, compared case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }
}

/// Reads one HTTP/1.1 request with an optional `Content-Length` delimited body.
pub fn read_request<R: BufRead>(reader: &mut R) -> io::Result<RecordedRequest> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.trim_end().splitn(3, ' ');
    let (Some(method), Some(target), Some(_version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed request line: {request_line:?}"),
        ));
    };
    let (method, target) = (method.to_string(), target.to_string());

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.trim().is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed header"))?;
        headers.push((key.to_string(), value.trim().to_string()));
    }

    let mut request = RecordedRequest {
        method,
        target,
        headers,
        body: Vec::new(),
    };
    if let Some(length) = request.header("Content-Length") {
        let length: u64 = length
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid Content-Length"))?;
        reader.take(length).read_to_end(&mut request.body)?;
    }
    Ok(request)
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct ServerState {
    objects: HashMap<String, StoredObject>,
    requests: Vec<RecordedRequest>,
    forced_status: Option<u16>,
}

/// A fake S3 endpoint listening on a random local port until dropped.
pub struct FakeS3Server {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

const STORED_HEADERS: &[&str] = &[
    "content-type",
    "content-disposition",
    "x-amz-acl",
    "x-amz-meta-last-modified",
    "x-amz-meta-written-at",
];

impl FakeS3Server {
    pub fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState::default()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let join_handle = {
            let state = state.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                for stream in listener.incoming() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Ok(stream) = stream {
                        let state = state.clone();
                        thread::spawn(move || {
                            let _ = Self::handle(stream, &state);
                        });
                    }
                }
            })
        };
        Ok(Self {
            addr,
            state,
            shutdown,
            join_handle: Some(join_handle),
        })
    }

    pub fn endpoint(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).expect("valid URL")
    }

    /// Makes every following request fail with `status` until reset with `None`.
    pub fn force_status(&self, status: Option<u16>) {
        self.state.lock().unwrap().forced_status = status;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Returns the object stored under `path`, e.g. `/bucket/object`.
    pub fn object(&self, path: &str) -> Option<StoredObject> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    fn handle(stream: TcpStream, state: &Mutex<ServerState>) -> io::Result<()> {
        let mut reader = BufReader::new(stream);
        let request = read_request(&mut reader)?;
        let mut stream = reader.into_inner();

        let mut state = state.lock().unwrap();
        state.requests.push(request.clone());
        let path = request
            .target
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();

        if let Some(status) = state.forced_status {
            return write!(
                stream,
                "HTTP/1.1 {status} Forced\r\nContent-Length: 0\r\n\r\n"
            );
        }

        match request.method.as_str() {
            "PUT" => {
                let headers = request
                    .headers
                    .iter()
                    .filter(|(key, _)| STORED_HEADERS.contains(&key.to_ascii_lowercase().as_str()))
                    .cloned()
                    .collect();
                state.objects.insert(
                    path,
                    StoredObject {
                        body: request.body,
                        headers,
                        last_modified: Utc::now(),
                    },
                );
                write!(stream, "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            }
            "HEAD" | "GET" => match state.objects.get(&path) {
                Some(object) => {
                    write!(stream, "HTTP/1.1 200 OK\r\n")?;
                    write!(stream, "Content-Length: {}\r\n", object.body.len())?;
                    write!(
                        stream,
                        "Last-Modified: {}\r\n",
                        object.last_modified.format("%a, %d %b %Y %H:%M:%S GMT")
                    )?;
                    for (key, value) in &object.headers {
                        write!(stream, "{key}: {value}\r\n")?;
                    }
                    write!(stream, "\r\n")?;
                    if request.method == "GET" {
                        stream.write_all(&object.body)?;
                    }
                    Ok(())
                }
                None if request.method == "HEAD" => {
                    write!(stream, "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                }
                None => {
                    let body = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                        <Error><Code>NoSuchKey</Code>\
                        <Message>The specified key does not exist.</Message></Error>";
                    write!(
                        stream,
                        "HTTP/1.1 404 Not Found\r\nContent-Type: application/xml\r\n\
                        Content-Length: {}\r\n\r\n{body}",
                        body.len()
                    )
                }
            },
            _ => write!(
                stream,
                "HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n"
            ),
        }
    }
}

impl Drop for FakeS3Server {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake up the accept loop so it notices the shutdown flag.
        let _ = TcpStream::connect(self.addr);
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.join();
        }
    }
}
