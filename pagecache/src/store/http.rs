//! An object store client speaking the S3 REST API over HTTP.

pub mod signing;

use super::{ObjectAttributes, ObjectMeta, ObjectStore, ObjectStoreError, Result};
use crate::config::ObjectStoreConfig;
use crate::util::close::Close;
use crate::util::encoding::uri_encode;
use crate::util::http::{
    AwaitingRequestBody, AwaitingRequestHeaders, Headers, HttpClient, HttpRequest, HttpResponse, Method,
    ReadResponseBody, ReadResponseStatus, host_header,
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Deserialize;
use signing::{Credentials, EMPTY_PAYLOAD_SHA256, Signer, UNSIGNED_PAYLOAD, sha256_hex};
use std::io;
use std::io::{Read, Write};
use tracing::debug;
use url::Url;

const MAX_ERROR_BODY_SIZE: u64 = 64 * 1024;

/// Header under which the writer's modification time is kept as user metadata.
pub const LAST_MODIFIED_META_HEADER: &str = "x-amz-meta-last-modified";

/// Header under which the time of the write is kept as user metadata, with nanosecond precision.
pub const WRITTEN_AT_META_HEADER: &str = "x-amz-meta-written-at";

/// An S3-compatible object store addressed with path-style URLs, `<endpoint>/<bucket>/<object>`.
///
/// Requests are signed with AWS Signature Version 4 if credentials are configured, and sent
/// anonymously otherwise.
pub struct HttpObjectStore {
    client: HttpClient,
    endpoint: Url,
    bucket: String,
    region: String,
    credentials: Option<Credentials>,
}

impl HttpObjectStore {
    pub fn new(client: HttpClient, endpoint: Url, bucket: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ObjectStoreError::InvalidConfig(format!(
                "endpoint must be an http or https URL, got {endpoint}"
            )));
        }
        if endpoint.query().is_some() {
            return Err(ObjectStoreError::InvalidConfig(
                "endpoint must not contain a query".to_string(),
            ));
        }
        if bucket.is_empty() {
            return Err(ObjectStoreError::InvalidConfig(
                "bucket name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            client,
            endpoint,
            bucket,
            region: "us-east-1".to_string(),
            credentials: None,
        })
    }

    /// Creates a client from configuration, verifying TLS certificates against the platform's
    /// trust store.
    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self> {
        let client = HttpClient::default()
            .map_err(|err| ObjectStoreError::Http(err.into()))?
            .with_timeouts(config.connect_timeout, config.io_timeout);
        let mut store = Self::new(client, config.endpoint.clone(), &config.bucket)?
            .with_region(&config.region);
        if let Some(credentials) = &config.credentials {
            store = store.with_credentials(credentials.clone());
        }
        Ok(store)
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, name: &str) -> Url {
        let mut url = self.endpoint.clone();
        let path = format!(
            "{}/{}/{}",
            self.endpoint.path().trim_end_matches('/'),
            uri_encode(&self.bucket),
            uri_encode(name)
        );
        url.set_path(&path);
        url.set_fragment(None);
        url
    }

    fn request(
        &self,
        method: Method,
        name: &str,
        mut headers: Vec<(String, String)>,
        payload_hash: &str,
    ) -> Result<HttpRequestWithUrl> {
        let url = self.object_url(name);
        if let Some(credentials) = &self.credentials {
            Signer {
                credentials,
                region: &self.region,
                now: Utc::now(),
            }
            .sign(
                method.as_str(),
                &url,
                &host_header(&url)?,
                &mut headers,
                payload_hash,
            );
        }
        debug!(%method, %url, "object store request");
        let mut request = self.client.request(method, &url)?;
        for (key, value) in &headers {
            request.header(key, value)?;
        }
        Ok(HttpRequestWithUrl { request, url })
    }

    fn put_headers(attributes: &ObjectAttributes) -> Vec<(String, String)> {
        vec![
            ("Content-Type".into(), attributes.content_type.clone()),
            (
                "Content-Disposition".into(),
                attributes.content_disposition.clone(),
            ),
            ("x-amz-acl".into(), attributes.acl.as_str().into()),
            (
                LAST_MODIFIED_META_HEADER.into(),
                attributes
                    .last_modified
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            (
                WRITTEN_AT_META_HEADER.into(),
                attributes
                    .written_at
                    .to_rfc3339_opts(SecondsFormat::Nanos, true),
            ),
        ]
    }
}

struct HttpRequestWithUrl {
    request: HttpRequest<AwaitingRequestHeaders>,
    url: Url,
}

fn read_response(
    response: HttpResponse<ReadResponseStatus>,
) -> Result<(Headers, HttpResponse<ReadResponseBody>)> {
    let (status, response) = response.read_status()?;
    let (headers, mut body) = response.read_headers()?;
    debug!(status = status.code(), "object store response");
    if status.code() == 404 {
        return Err(ObjectStoreError::NotFound);
    }
    if !status.is_success() {
        let mut text = String::new();
        // The error document is informational only; an unreadable body keeps the status.
        let _ = body
            .by_ref()
            .take(MAX_ERROR_BODY_SIZE)
            .read_to_string(&mut text);
        return Err(ObjectStoreError::Status {
            status: status.code(),
            code: error_code(&text),
        });
    }
    Ok((headers, body))
}

/// The parts of an S3 XML error document that are of interest.
#[derive(Debug, Deserialize)]
struct ErrorDocument {
    #[serde(rename = "Code")]
    code: Option<String>,
}

/// Extracts the `<Code>` element of an S3 XML error document.
fn error_code(document: &str) -> Option<String> {
    quick_xml::de::from_str::<ErrorDocument>(document)
        .ok()?
        .code
        .map(|code| code.trim().to_string())
        .filter(|code| !code.is_empty())
}

fn object_meta(headers: &Headers) -> ObjectMeta {
    ObjectMeta {
        content_length: headers
            .get("Content-Length")
            .and_then(|value| value.parse().ok()),
        content_type: headers.get("Content-Type").map(str::to_string),
        content_disposition: headers.get("Content-Disposition").map(str::to_string),
        // HTTP dates have whole-second resolution. Reporting the end of the second keeps the
        // time from preceding the write.
        last_modified: headers
            .get("Last-Modified")
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|date| {
                date.with_timezone(&Utc) + TimeDelta::seconds(1) - TimeDelta::nanoseconds(1)
            }),
        written_at: headers
            .get(WRITTEN_AT_META_HEADER)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|date| date.with_timezone(&Utc)),
    }
}

impl ObjectStore for HttpObjectStore {
    type Reader = HttpResponse<ReadResponseBody>;
    type Upload = HttpUpload;

    fn head_object(&self, name: &str) -> Result<ObjectMeta> {
        let HttpRequestWithUrl { request, .. } =
            self.request(Method::Head, name, vec![], EMPTY_PAYLOAD_SHA256)?;
        let (headers, _) = read_response(request.no_body()?)?;
        Ok(object_meta(&headers))
    }

    fn get_object(&self, name: &str) -> Result<(ObjectMeta, Self::Reader)> {
        let HttpRequestWithUrl { request, .. } =
            self.request(Method::Get, name, vec![], EMPTY_PAYLOAD_SHA256)?;
        let (headers, body) = read_response(request.no_body()?)?;
        Ok((object_meta(&headers), body))
    }

    fn put_object(&self, name: &str, body: Bytes, attributes: &ObjectAttributes) -> Result<()> {
        let HttpRequestWithUrl { request, url } = self.request(
            Method::Put,
            name,
            Self::put_headers(attributes),
            &sha256_hex(&body),
        )?;
        let mut request = request.body_with_size(body.len() as u64)?;
        request.write_all(&body)?;
        read_response(request.response()?)?;
        debug!(%url, size = body.len(), "stored object");
        Ok(())
    }

    fn start_upload(&self, name: &str, attributes: &ObjectAttributes) -> Result<Self::Upload> {
        let HttpRequestWithUrl { request, url } = self.request(
            Method::Put,
            name,
            Self::put_headers(attributes),
            UNSIGNED_PAYLOAD,
        )?;
        Ok(HttpUpload {
            request: request.body_with_size(attributes.content_length)?,
            url,
        })
    }
}

/// A streaming `PUT` of an object with a known size.
///
/// Dropping the upload without closing it tears down the connection mid-body, so the store
/// discards the partial object.
pub struct HttpUpload {
    request: HttpRequest<AwaitingRequestBody>,
    url: Url,
}

impl Write for HttpUpload {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.request.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.request.flush()
    }
}

impl Close for HttpUpload {
    fn close(self) -> io::Result<()> {
        let response = self
            .request
            .response()
            .map_err(|err| io::Error::other(ObjectStoreError::from(err)))?;
        read_response(response).map_err(io::Error::other)?;
        debug!(url = %self.url, "completed streaming upload");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CannedAcl;
    use crate::test_util::fake_s3::FakeS3Server;
    use crate::util::http::tests::TestServer;
    use chrono::{TimeZone, Timelike};

    fn attributes(content_length: u64) -> ObjectAttributes {
        ObjectAttributes {
            content_type: "application/pdf".to_string(),
            content_length,
            content_disposition: "inline; filename=\"report.pdf\"".to_string(),
            last_modified: Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap(),
            written_at: Utc
                .with_ymd_and_hms(2024, 6, 1, 8, 30, 5)
                .unwrap()
                .with_nanosecond(123_456_789)
                .unwrap(),
            acl: CannedAcl::Private,
        }
    }

    fn store_for(endpoint: &Url) -> HttpObjectStore {
        HttpObjectStore::new(HttpClient::default().unwrap(), endpoint.clone(), "bucket").unwrap()
    }

    #[test]
    fn test_rejects_unusable_configuration() {
        let client = HttpClient::default().unwrap();
        let ftp = Url::parse("ftp://example.com").unwrap();
        assert!(HttpObjectStore::new(client.clone(), ftp, "bucket").is_err());
        let http = Url::parse("http://example.com").unwrap();
        assert!(HttpObjectStore::new(client, http, "").is_err());
    }

    #[test]
    fn test_object_url_is_path_style_and_encoded() {
        let store = store_for(&Url::parse("http://localhost:9000/prefix/").unwrap());
        assert_eq!(
            store.object_url("doc 1/page?2").as_str(),
            "http://localhost:9000/prefix/bucket/doc%201%2Fpage%3F2"
        );
    }

    #[test]
    fn test_head_object_sends_request_and_parses_meta() {
        let test_server = TestServer::start(
            "HTTP/1.1 200 OK\r\n\
            Content-Length: 1024\r\n\
            Content-Type: application/pdf\r\n\
            Last-Modified: Sat, 01 Jun 2024 08:30:00 GMT\r\n\
            x-amz-meta-written-at: 2024-06-01T08:29:59.123456789Z\r\n\r\n",
        )
        .unwrap();
        let store = store_for(test_server.base_url());

        let meta = store.head_object("doc1").unwrap();
        assert_eq!(
            meta,
            ObjectMeta {
                content_length: Some(1024),
                content_type: Some("application/pdf".to_string()),
                content_disposition: None,
                last_modified: Some(
                    Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0)
                        .unwrap()
                        .with_nanosecond(999_999_999)
                        .unwrap()
                ),
                written_at: Some(
                    Utc.with_ymd_and_hms(2024, 6, 1, 8, 29, 59)
                        .unwrap()
                        .with_nanosecond(123_456_789)
                        .unwrap()
                ),
            }
        );
        let request = test_server.request().unwrap();
        assert_eq!(request.method, "HEAD");
        assert_eq!(request.target, "/bucket/doc1");
        assert_eq!(request.header("Authorization"), None);
    }

    #[test]
    fn test_head_object_maps_404_to_not_found() {
        let test_server =
            TestServer::start("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").unwrap();
        let store = store_for(test_server.base_url());
        assert!(matches!(
            store.head_object("doc1"),
            Err(ObjectStoreError::NotFound)
        ));
    }

    #[test]
    fn test_error_status_carries_s3_error_code() {
        let body = "<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>";
        let test_server = TestServer::start(format!(
            "HTTP/1.1 403 Forbidden\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ))
        .unwrap();
        let store = store_for(test_server.base_url());
        match store.get_object("doc1") {
            Err(ObjectStoreError::Status { status, code }) => {
                assert_eq!(status, 403);
                assert_eq!(code.as_deref(), Some("AccessDenied"));
            }
            _ => panic!("expected status error"),
        }
    }

    #[test]
    fn test_truncated_head_response_is_an_error() {
        let test_server = TestServer::start("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n").unwrap();
        let store = store_for(test_server.base_url());
        assert!(matches!(
            store.head_object("doc1"),
            Err(ObjectStoreError::Http(_))
        ));
    }

    #[test]
    fn test_put_object_sends_attributes_and_body() {
        let test_server = TestServer::start(crate::util::http::tests::EMPTY_RESPONSE).unwrap();
        let store = store_for(test_server.base_url());
        store
            .put_object("doc1", Bytes::from_static(b"%PDF-1.7"), &attributes(8))
            .unwrap();

        let request = test_server.request().unwrap();
        assert_eq!(request.method, "PUT");
        assert_eq!(request.target, "/bucket/doc1");
        assert_eq!(request.header("Content-Type"), Some("application/pdf"));
        assert_eq!(request.header("Content-Length"), Some("8"));
        assert_eq!(
            request.header("Content-Disposition"),
            Some("inline; filename=\"report.pdf\"")
        );
        assert_eq!(request.header("x-amz-acl"), Some("private"));
        assert_eq!(
            request.header(LAST_MODIFIED_META_HEADER),
            Some("2024-06-01T08:30:00.000Z")
        );
        assert_eq!(
            request.header(WRITTEN_AT_META_HEADER),
            Some("2024-06-01T08:30:05.123456789Z")
        );
        assert_eq!(request.body, b"%PDF-1.7");
    }

    #[test]
    fn test_signed_requests_carry_authorization() {
        let test_server = TestServer::start(crate::util::http::tests::EMPTY_RESPONSE).unwrap();
        let store = store_for(test_server.base_url())
            .with_region("eu-west-1")
            .with_credentials(Credentials::new("AKID", "secret"));
        store
            .put_object("doc1", Bytes::from_static(b"data"), &attributes(4))
            .unwrap();

        let request = test_server.request().unwrap();
        let authorization = request.header("Authorization").unwrap();
        assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
        assert!(authorization.contains("/eu-west-1/s3/aws4_request"));
        assert_eq!(
            request.header("x-amz-content-sha256"),
            Some(sha256_hex(b"data").as_str())
        );
    }

    #[test]
    fn test_streaming_upload_is_unsigned_payload_with_declared_length() {
        let test_server = TestServer::start(crate::util::http::tests::EMPTY_RESPONSE).unwrap();
        let store =
            store_for(test_server.base_url()).with_credentials(Credentials::new("AKID", "secret"));
        let mut upload = store.start_upload("doc1", &attributes(11)).unwrap();
        upload.write_all(b"hello ").unwrap();
        upload.write_all(b"world").unwrap();
        upload.close().unwrap();

        let request = test_server.request().unwrap();
        assert_eq!(request.header("Content-Length"), Some("11"));
        assert_eq!(request.header("x-amz-content-sha256"), Some(UNSIGNED_PAYLOAD));
        assert_eq!(request.body, b"hello world");
    }

    #[test]
    fn test_roundtrip_against_fake_s3() {
        let server = FakeS3Server::start().unwrap();
        let store = store_for(&server.endpoint());
        assert!(matches!(
            store.head_object("doc1"),
            Err(ObjectStoreError::NotFound)
        ));
        assert!(matches!(
            store.get_object("doc1"),
            Err(ObjectStoreError::NotFound)
        ));

        store
            .put_object("doc1", Bytes::from_static(b"%PDF-1.7"), &attributes(8))
            .unwrap();

        let (meta, mut reader) = store.get_object("doc1").unwrap();
        let mut body = Vec::new();
        reader.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"%PDF-1.7");
        assert_eq!(meta.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(meta.content_length, Some(8));
        assert!(meta.last_modified.is_some());
        assert_eq!(meta.written_at, Some(attributes(8).written_at));
        assert_eq!(
            server.object("/bucket/doc1").unwrap().body,
            b"%PDF-1.7".to_vec()
        );
    }

    #[test]
    fn test_error_code_extraction() {
        assert_eq!(
            error_code("<Error><Code> NoSuchBucket </Code></Error>").as_deref(),
            Some("NoSuchBucket")
        );
        assert_eq!(
            error_code(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
                <Error><Code>NoSuchBucket</Code><Message>The bucket does not exist</Message>\
                <BucketName>pages</BucketName></Error>"
            )
            .as_deref(),
            Some("NoSuchBucket")
        );
        assert_eq!(error_code("<Error><Message>no code</Message></Error>"), None);
        assert_eq!(error_code("not xml"), None);
        assert_eq!(error_code("<Code></Code>"), None);
        assert_eq!(error_code(""), None);
    }
}
