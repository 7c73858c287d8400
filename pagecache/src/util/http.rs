//! A small blocking HTTP/1.1 client.
//!
//! Every request opens its own connection (`Connection: close`), which keeps the client free of
//! pooling state and makes it safe to share between threads. Requests and responses are modelled
//! as type states so that headers, body, and response can only be handled in the right order.

pub mod error;

use error::HttpClientError;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned, crypto};
use rustls_platform_verifier::BuilderVerifierExt;
use std::fmt::{Display, Formatter};
use std::io;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const CRLF: &[u8] = b"\r\n";
const HTTP_VERSION: &str = "HTTP/1.1";

pub type Result<T> = std::result::Result<T, HttpClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait State {}
pub struct AwaitingRequestHeaders;
pub struct AwaitingRequestBody;
pub struct ReadResponseStatus;
pub struct ReadResponseHeaders;
pub struct ReadResponseBody;
impl State for AwaitingRequestHeaders {}
impl State for AwaitingRequestBody {}
impl State for ReadResponseStatus {}
impl State for ReadResponseHeaders {}
impl State for ReadResponseBody {}

#[derive(Clone)]
pub struct HttpClient {
    tls_client_config: Arc<ClientConfig>,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl HttpClient {
    pub fn new(tls_client_config: Arc<ClientConfig>) -> Self {
        Self {
            tls_client_config,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    /// Creates a client that verifies server certificates with the platform's trust store.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> std::result::Result<Self, rustls::Error> {
        Ok(Self::new(Arc::new(
            ClientConfig::builder_with_provider(Arc::new(crypto::aws_lc_rs::default_provider()))
                .with_safe_default_protocol_versions()?
                .with_platform_verifier()
                .with_no_client_auth(),
        )))
    }

    /// Sets the timeout for establishing connections and the timeout for individual reads and
    /// writes on established connections. `None` or a zero duration means blocking indefinitely.
    pub fn with_timeouts(
        mut self,
        connect_timeout: Option<Duration>,
        io_timeout: Option<Duration>,
    ) -> Self {
        self.connect_timeout = connect_timeout.filter(|timeout| !timeout.is_zero());
        self.io_timeout = io_timeout.filter(|timeout| !timeout.is_zero());
        self
    }

    pub fn request(&self, method: Method, url: &Url) -> Result<HttpRequest<AwaitingRequestHeaders>> {
        let mut stream = self.connect(url)?;
        stream.write_all(method.as_str().as_bytes())?;
        stream.write_all(b" ")?;
        stream.write_all(url.path().as_bytes())?;
        if let Some(query) = url.query() {
            stream.write_all(b"?")?;
            stream.write_all(query.as_bytes())?;
        }
        stream.write_all(b" ")?;
        stream.write_all(HTTP_VERSION.as_bytes())?;
        stream.write_all(CRLF)?;

        let mut request = HttpRequest {
            stream,
            expects_body: method != Method::Head,
            body_bytes_remaining: 0,
            _state: PhantomData,
        };
        request.header("Host", &host_header(url)?)?;
        request.header("Connection", "close")?;
        request.header(
            "User-Agent",
            concat!("pagecache/", env!("CARGO_PKG_VERSION")),
        )?;
        Ok(request)
    }

    fn connect(&self, url: &Url) -> Result<Box<dyn WriteThenRead + Send>> {
        let use_tls = match url.scheme() {
            "http" => false,
            "https" => true,
            scheme => return Err(HttpClientError::InvalidScheme(scheme.into())),
        };
        if !url.username().is_empty() || url.password().is_some() {
            return Err(HttpClientError::UnsupportedFeature(
                "username/password in URL",
            ));
        }
        let host = url.host_str().ok_or(HttpClientError::MissingHost)?;
        let port = url
            .port_or_known_default()
            .ok_or(HttpClientError::MissingHost)?;
        let stream = self.open_tcp(host.trim_start_matches('[').trim_end_matches(']'), port)?;
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        if use_tls {
            let connection = ClientConnection::new(
                self.tls_client_config.clone(),
                ServerName::try_from(host.to_string())?,
            )?;
            Ok(Box::new(BufWriter::new(StreamOwned::new(connection, stream))))
        } else {
            Ok(Box::new(BufWriter::new(stream)))
        }
    }

    fn open_tcp(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let Some(timeout) = self.connect_timeout else {
            return TcpStream::connect((host, port));
        };
        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{host} did not resolve to any address"),
            )
        }))
    }
}

/// Value of the `Host` header for requests to `url`. The port is only included if it is not the
/// scheme's default.
pub fn host_header(url: &Url) -> Result<String> {
    let host = url.host_str().ok_or(HttpClientError::MissingHost)?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

trait WriteThenRead: Write {
    fn into_reader(self: Box<Self>) -> io::Result<Box<dyn BufRead + Send>>;
}

impl WriteThenRead for BufWriter<TcpStream> {
    fn into_reader(self: Box<Self>) -> io::Result<Box<dyn BufRead + Send>> {
        Ok(Box::new(BufReader::new(self.into_inner()?)))
    }
}

impl WriteThenRead for BufWriter<StreamOwned<ClientConnection, TcpStream>> {
    fn into_reader(self: Box<Self>) -> io::Result<Box<dyn BufRead + Send>> {
        Ok(Box::new(self.into_inner()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpStatus {
    code: u16,
    reason: String,
}

impl HttpStatus {
    fn parse(status_line: &str) -> Result<HttpStatus> {
        let rest = status_line
            .strip_prefix("HTTP/1.1 ")
            .or_else(|| status_line.strip_prefix("HTTP/1.0 "))
            .ok_or_else(|| HttpClientError::invalid_data("unsupported HTTP version"))?;
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        if code.len() != 3 || !code.bytes().all(|c| c.is_ascii_digit()) {
            return Err(HttpClientError::invalid_data("invalid HTTP status code"));
        }
        Ok(HttpStatus {
            code: code
                .parse()
                .map_err(|_| HttpClientError::invalid_data("invalid HTTP status code"))?,
            reason: reason.trim_end().to_string(),
        })
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    fn allows_body(&self) -> bool {
        !(100..200).contains(&self.code) && self.code != 204 && self.code != 304
    }
}

impl Display for HttpStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

pub struct HttpRequest<S: State> {
    stream: Box<dyn WriteThenRead + Send>,
    expects_body: bool,
    body_bytes_remaining: u64,
    _state: PhantomData<S>,
}

impl HttpRequest<AwaitingRequestHeaders> {
    pub fn header(&mut self, key: &str, value: &str) -> Result<()> {
        if value.contains(['\r', '\n']) || key.contains(['\r', '\n', ':']) {
            return Err(HttpClientError::IoError(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid header: {key}"),
            )));
        }
        self.stream.write_all(key.as_bytes())?;
        self.stream.write_all(b": ")?;
        self.stream.write_all(value.as_bytes())?;
        self.stream.write_all(CRLF)?;
        Ok(())
    }

    pub fn no_body(mut self) -> Result<HttpResponse<ReadResponseStatus>> {
        self.stream.write_all(CRLF)?;
        Ok(HttpResponse::new(
            self.stream.into_reader()?,
            self.expects_body,
        ))
    }

    /// Finishes the headers with a `Content-Length` of `size`. Exactly `size` bytes must be
    /// written before the response can be read.
    pub fn body_with_size(mut self, size: u64) -> Result<HttpRequest<AwaitingRequestBody>> {
        self.header("Content-Length", &size.to_string())?;
        self.stream.write_all(CRLF)?;
        Ok(HttpRequest {
            stream: self.stream,
            expects_body: self.expects_body,
            body_bytes_remaining: size,
            _state: PhantomData,
        })
    }
}

impl Write for HttpRequest<AwaitingRequestBody> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() as u64 > self.body_bytes_remaining {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "request body exceeds declared Content-Length",
            ));
        }
        let n = self.stream.write(buf)?;
        self.body_bytes_remaining -= n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl HttpRequest<AwaitingRequestBody> {
    pub fn body_bytes_remaining(&self) -> u64 {
        self.body_bytes_remaining
    }

    pub fn response(self) -> Result<HttpResponse<ReadResponseStatus>> {
        if self.body_bytes_remaining != 0 {
            return Err(HttpClientError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "request body shorter than declared Content-Length",
            )));
        }
        Ok(HttpResponse::new(
            self.stream.into_reader()?,
            self.expects_body,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    key: String,
    value: String,
}

impl Header {
    fn parse(header_line: &str) -> Result<Header> {
        let (key, value) = header_line.split_once(':').ok_or_else(|| {
            HttpClientError::invalid_data("malformed header: missing colon separator")
        })?;
        Ok(Header {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Response headers in the order they were received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    /// Returns the value of the first header named `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|header| header.key().eq_ignore_ascii_case(key))
            .map(Header::value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy)]
enum BodyFraming {
    Empty,
    FixedSize,
    Chunked,
    UntilClose,
}

pub struct HttpResponse<S: State> {
    reader: Box<dyn BufRead + Send>,
    expects_body: bool,
    status_allows_body: bool,
    content_length: Option<u64>,
    chunked: bool,
    headers_exhausted: bool,
    framing: BodyFraming,
    bytes_remaining: u64,
    is_eof: bool,
    _state: PhantomData<S>,
}

impl<S: State> HttpResponse<S> {
    fn into_state<T: State>(self) -> HttpResponse<T> {
        HttpResponse {
            reader: self.reader,
            expects_body: self.expects_body,
            status_allows_body: self.status_allows_body,
            content_length: self.content_length,
            chunked: self.chunked,
            headers_exhausted: self.headers_exhausted,
            framing: self.framing,
            bytes_remaining: self.bytes_remaining,
            is_eof: self.is_eof,
            _state: PhantomData,
        }
    }
}

impl HttpResponse<ReadResponseStatus> {
    fn new(reader: Box<dyn BufRead + Send>, expects_body: bool) -> Self {
        Self {
            reader,
            expects_body,
            status_allows_body: true,
            content_length: None,
            chunked: false,
            headers_exhausted: false,
            framing: BodyFraming::Empty,
            bytes_remaining: 0,
            is_eof: false,
            _state: PhantomData,
        }
    }

    pub fn read_status(mut self) -> Result<(HttpStatus, HttpResponse<ReadResponseHeaders>)> {
        let mut status_line = String::new();
        if self.reader.read_line(&mut status_line)? == 0 {
            return Err(HttpClientError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response status",
            )));
        }
        let status = HttpStatus::parse(status_line.trim_end())?;
        self.status_allows_body = status.allows_body();
        Ok((status, self.into_state()))
    }
}

impl HttpResponse<ReadResponseHeaders> {
    pub fn read_next_header(&mut self) -> Result<Option<Header>> {
        if self.headers_exhausted {
            return Ok(None);
        }
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 || !line.ends_with('\n') {
            return Err(HttpClientError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before end of response headers",
            )));
        }
        if line.trim().is_empty() {
            self.headers_exhausted = true;
            return Ok(None);
        }
        let header = Header::parse(&line)?;
        if header.key().eq_ignore_ascii_case("Transfer-Encoding") {
            if header.value().eq_ignore_ascii_case("chunked") {
                self.chunked = true;
            } else {
                return Err(HttpClientError::UnsupportedFeature("transfer encoding"));
            }
        } else if header.key().eq_ignore_ascii_case("Content-Length") {
            self.content_length = Some(header.value().parse().map_err(|_| {
                HttpClientError::invalid_data("invalid Content-Length header value")
            })?);
        }
        Ok(Some(header))
    }

    /// Reads all remaining headers and positions the response at the start of the body.
    pub fn read_headers(mut self) -> Result<(Headers, HttpResponse<ReadResponseBody>)> {
        let mut headers = Vec::new();
        while let Some(header) = self.read_next_header()? {
            headers.push(header);
        }
        Ok((Headers(headers), self.read_body()?))
    }

    /// Skips any remaining headers and positions the response at the start of the body.
    pub fn read_body(mut self) -> Result<HttpResponse<ReadResponseBody>> {
        while self.read_next_header()?.is_some() {}
        self.framing = if !self.expects_body || !self.status_allows_body {
            BodyFraming::Empty
        } else if self.chunked {
            BodyFraming::Chunked
        } else if let Some(size) = self.content_length {
            self.bytes_remaining = size;
            BodyFraming::FixedSize
        } else {
            BodyFraming::UntilClose
        };
        self.is_eof = match self.framing {
            BodyFraming::Empty => true,
            BodyFraming::FixedSize => self.bytes_remaining == 0,
            BodyFraming::Chunked | BodyFraming::UntilClose => false,
        };
        Ok(self.into_state())
    }
}

impl HttpResponse<ReadResponseBody> {
    /// Returns the `Content-Length` announced by the response, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn read_chunk_size(&mut self) -> io::Result<u64> {
        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        let size = line.trim().split(';').next().unwrap_or_default().trim();
        u64::from_str_radix(size, 16).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid chunk size: {size}"),
            )
        })
    }

    fn skip_trailers(&mut self) -> io::Result<()> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
                return Ok(());
            }
        }
    }

    fn read_limited(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let max_n = buf.len().min(usize::try_from(self.bytes_remaining).unwrap_or(usize::MAX));
        let n = self.reader.read(&mut buf[..max_n])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before end of response body",
            ));
        }
        self.bytes_remaining -= n as u64;
        Ok(n)
    }
}

impl Read for HttpResponse<ReadResponseBody> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_eof || buf.is_empty() {
            return Ok(0);
        }
        match self.framing {
            BodyFraming::Empty => Ok(0),
            BodyFraming::UntilClose => {
                let n = self.reader.read(buf)?;
                self.is_eof = n == 0;
                Ok(n)
            }
            BodyFraming::FixedSize => {
                let n = self.read_limited(buf)?;
                self.is_eof = self.bytes_remaining == 0;
                Ok(n)
            }
            BodyFraming::Chunked => {
                if self.bytes_remaining == 0 {
                    self.bytes_remaining = self.read_chunk_size()?;
                    if self.bytes_remaining == 0 {
                        self.skip_trailers()?;
                        self.is_eof = true;
                        return Ok(0);
                    }
                }
                let n = self.read_limited(buf)?;
                if self.bytes_remaining == 0 {
                    let mut crlf = [0u8; 2];
                    self.reader.read_exact(&mut crlf)?;
                }
                Ok(n)
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::test_util::fake_s3::{RecordedRequest, read_request};
    use std::net::{SocketAddr, TcpListener};
    use std::thread;
    use std::thread::JoinHandle;

    pub const EMPTY_RESPONSE: &str = "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n";

    /// Accepts a single connection, records the request, and replies with a canned response.
    pub struct TestServer {
        join_handle: JoinHandle<io::Result<RecordedRequest>>,
        addr: SocketAddr,
        base_url: Url,
    }

    impl TestServer {
        pub fn start(response: impl Into<Vec<u8>>) -> io::Result<Self> {
            let response = response.into();
            let listener = TcpListener::bind("127.0.0.1:0")?;
            let addr = listener.local_addr()?;
            let base_url = Url::parse(&format!("http://{addr}")).unwrap();
            let join_handle = thread::spawn(move || {
                let (stream, _) = listener.accept()?;
                let mut reader = BufReader::new(stream);
                let request = read_request(&mut reader)?;
                reader.into_inner().write_all(&response)?;
                Ok(request)
            });
            Ok(Self {
                join_handle,
                addr,
                base_url,
            })
        }

        pub fn request(self) -> io::Result<RecordedRequest> {
            self.join_handle.join().unwrap()
        }

        pub fn addr(&self) -> SocketAddr {
            self.addr
        }

        pub fn base_url(&self) -> &Url {
            &self.base_url
        }
    }

    #[test]
    fn test_get_request_without_body() -> Result<()> {
        let test_server = TestServer::start(EMPTY_RESPONSE)?;
        let addr = test_server.addr();
        let url = test_server.base_url().join("path?query=foo#fragment").unwrap();
        let response = HttpClient::default()?
            .request(Method::Get, &url)?
            .no_body()?;

        let request = test_server.request()?;
        assert_eq!(request.method, "GET");
        assert_eq!(request.target, "/path?query=foo");
        assert_eq!(
            request.headers,
            vec![
                ("Host".to_string(), addr.to_string()),
                ("Connection".to_string(), "close".to_string()),
                (
                    "User-Agent".to_string(),
                    format!("pagecache/{}", env!("CARGO_PKG_VERSION"))
                ),
            ]
        );

        let (status, response) = response.read_status()?;
        assert_eq!(status.code(), 204);
        assert_eq!(status.reason(), "No Content");
        let (headers, mut body) = response.read_headers()?;
        assert_eq!(headers.get("content-length"), Some("0"));
        let mut buf = String::new();
        body.read_to_string(&mut buf)?;
        assert!(buf.is_empty());
        Ok(())
    }

    #[test]
    fn test_put_with_fixed_size_body() -> Result<()> {
        let test_server = TestServer::start(EMPTY_RESPONSE)?;
        let url = test_server.base_url().join("bucket/object").unwrap();
        let body = b"{\"hello\": \"world\"}\r\n";
        let mut request = HttpClient::default()?.request(Method::Put, &url)?;
        request.header("Content-Type", "application/json")?;
        let mut request = request.body_with_size(body.len() as u64)?;
        request.write_all(&body[..5])?;
        request.write_all(&body[5..])?;
        let (status, _) = request.response()?.read_status()?;

        let recorded = test_server.request()?;
        assert_eq!(recorded.method, "PUT");
        assert_eq!(recorded.header("content-type"), Some("application/json"));
        assert_eq!(
            recorded.header("content-length"),
            Some(body.len().to_string().as_str())
        );
        assert_eq!(recorded.body, body);
        assert!(status.is_success());
        Ok(())
    }

    #[test]
    fn test_rejects_body_longer_than_declared() -> Result<()> {
        let test_server = TestServer::start(EMPTY_RESPONSE)?;
        let url = test_server.base_url().join("path").unwrap();
        let mut request = HttpClient::default()?
            .request(Method::Put, &url)?
            .body_with_size(3)?;
        let err = request.write_all(b"four").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        Ok(())
    }

    #[test]
    fn test_rejects_body_shorter_than_declared() -> Result<()> {
        let test_server = TestServer::start(EMPTY_RESPONSE)?;
        let url = test_server.base_url().join("path").unwrap();
        let mut request = HttpClient::default()?
            .request(Method::Put, &url)?
            .body_with_size(8)?;
        request.write_all(b"four")?;
        assert!(request.response().is_err());
        Ok(())
    }

    #[test]
    fn test_rejects_header_values_with_line_breaks() -> Result<()> {
        let test_server = TestServer::start(EMPTY_RESPONSE)?;
        let url = test_server.base_url().join("path").unwrap();
        let mut request = HttpClient::default()?.request(Method::Get, &url)?;
        assert!(request.header("X-Injected", "a\r\nb: c").is_err());
        Ok(())
    }

    #[test]
    fn test_response_body_with_content_length() -> Result<()> {
        let test_server = TestServer::start(
            "\
            HTTP/1.1 200 OK\r\n\
            Content-Length: 8\r\n\
            \r\n\
            Hello!\r\n",
        )?;
        let url = test_server.base_url().join("path").unwrap();
        let response = HttpClient::default()?
            .request(Method::Get, &url)?
            .no_body()?;

        let (status, response) = response.read_status()?;
        assert_eq!(status.code(), 200);
        let mut body = response.read_body()?;
        assert_eq!(body.content_length(), Some(8));
        let mut buf = String::new();
        body.read_to_string(&mut buf)?;
        assert_eq!(&buf, "Hello!\r\n");
        Ok(())
    }

    #[test]
    fn test_response_body_with_chunked_transfer_encoding() -> Result<()> {
        let test_server = TestServer::start(
            "\
            HTTP/1.1 200 OK\r\n\
            Transfer-Encoding: chunked\r\n\
            \r\n\
            a\r\nHello, wor\r\n\
            5;ext=1\r\nld!\r\n\r\n\
            0\r\n\
            X-Trailer: ignored\r\n\r\n",
        )?;
        let url = test_server.base_url().join("path").unwrap();
        let response = HttpClient::default()?
            .request(Method::Get, &url)?
            .no_body()?;

        let (_, response) = response.read_status()?;
        let mut buf = String::new();
        response.read_body()?.read_to_string(&mut buf)?;
        assert_eq!(&buf, "Hello, world!\r\n");
        Ok(())
    }

    #[test]
    fn test_response_body_delimited_by_connection_close() -> Result<()> {
        let test_server = TestServer::start("HTTP/1.1 200 OK\r\n\r\nuntil the end")?;
        let url = test_server.base_url().join("path").unwrap();
        let (_, response) = HttpClient::default()?
            .request(Method::Get, &url)?
            .no_body()?
            .read_status()?;
        let mut buf = String::new();
        response.read_body()?.read_to_string(&mut buf)?;
        assert_eq!(&buf, "until the end");
        Ok(())
    }

    #[test]
    fn test_head_response_has_no_body_despite_content_length() -> Result<()> {
        let test_server = TestServer::start("HTTP/1.1 200 OK\r\nContent-Length: 1024\r\n\r\n")?;
        let url = test_server.base_url().join("path").unwrap();
        let (status, response) = HttpClient::default()?
            .request(Method::Head, &url)?
            .no_body()?
            .read_status()?;
        assert_eq!(test_server.request()?.method, "HEAD");
        assert!(status.is_success());
        let (headers, mut body) = response.read_headers()?;
        assert_eq!(headers.get("Content-Length"), Some("1024"));
        let mut buf = Vec::new();
        body.read_to_end(&mut buf)?;
        assert!(buf.is_empty());
        Ok(())
    }

    #[test]
    fn test_truncated_body_is_an_error() -> Result<()> {
        let test_server = TestServer::start("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort")?;
        let url = test_server.base_url().join("path").unwrap();
        let (_, response) = HttpClient::default()?
            .request(Method::Get, &url)?
            .no_body()?
            .read_status()?;
        let mut buf = Vec::new();
        let err = response.read_body()?.read_to_end(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        Ok(())
    }

    #[test]
    fn test_headers_cut_off_by_connection_close_are_an_error() -> Result<()> {
        for response in [
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n",
            "HTTP/1.1 200 OK\r\nContent-Len",
        ] {
            let test_server = TestServer::start(response)?;
            let url = test_server.base_url().join("path").unwrap();
            let (_, response) = HttpClient::default()?
                .request(Method::Head, &url)?
                .no_body()?
                .read_status()?;
            match response.read_headers() {
                Err(HttpClientError::IoError(err)) => {
                    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof)
                }
                Err(err) => panic!("unexpected error: {err}"),
                Ok(_) => panic!("truncated headers were accepted"),
            }
        }
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let url = Url::parse("ftp://example.com/file").unwrap();
        assert!(matches!(
            HttpClient::default().unwrap().request(Method::Get, &url),
            Err(HttpClientError::InvalidScheme(scheme)) if scheme == "ftp"
        ));
    }

    #[test]
    fn test_parses_status_lines() {
        let status = HttpStatus::parse("HTTP/1.1 404 Not Found").unwrap();
        assert_eq!(status.code(), 404);
        assert_eq!(status.reason(), "Not Found");
        assert!(!status.is_success());
        assert!(HttpStatus::parse("HTTP/1.0 200").unwrap().is_success());
        assert!(HttpStatus::parse("HTTP/2 200 OK").is_err());
        assert!(HttpStatus::parse("HTTP/1.1 2x0 OK").is_err());
    }

    #[test]
    fn test_host_header_includes_non_default_port() {
        assert_eq!(
            host_header(&Url::parse("http://localhost:9000/x").unwrap()).unwrap(),
            "localhost:9000"
        );
        assert_eq!(
            host_header(&Url::parse("https://s3.amazonaws.com/x").unwrap()).unwrap(),
            "s3.amazonaws.com"
        );
    }
}
