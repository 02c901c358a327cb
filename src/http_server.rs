// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! HTTP binding of the SOS service
//!
//! Lightweight HTTP/1.1 server built on tokio. GET requests carry KVP
//! parameters; POST requests carry a JSON request document, or raw
//! InsertResult values with the KVP parameters in the query string.
//! Faults are returned as JSON exception reports.
//!
//! Each connection is served on a blocking thread so GetResult can write and
//! flush records straight to the socket while the provider produces them.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use soshub::config::HttpServerConfig;
//! use soshub::http_server::HttpServer;
//! use soshub::modules::LocalModuleRegistry;
//! use soshub::{SosService, SosServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> soshub::Result<()> {
//!     let modules = Arc::new(LocalModuleRegistry::in_memory());
//!     let service = Arc::new(SosService::new(SosServiceConfig::default(), modules));
//!     service.start();
//!     HttpServer::new(HttpServerConfig::default(), service).run().await
//! }
//! ```

use serde_json::json;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::config::HttpServerConfig;
use crate::error::{exception_code, Result, SosError};
use crate::service::{SosRequest, SosService};
use crate::streaming::ResponseSink;

/// Largest accepted request head
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Parsed HTTP/1.1 request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Raw query string, still percent-encoded
    pub query: String,
    /// Header names lowercased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// HTTP server exposing one SOS service
pub struct HttpServer {
    config: HttpServerConfig,
    service: Arc<SosService>,
    endpoint: String,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, service: Arc<SosService>) -> Self {
        let endpoint = service.config().endpoint;
        Self {
            config,
            service,
            endpoint,
        }
    }

    /// Run the HTTP server (blocks until shutdown)
    #[cfg(feature = "cli")]
    pub async fn run(&self) -> Result<()> {
        use tokio::net::TcpListener;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| SosError::Configuration(format!("Failed to bind to {}: {}", addr, e)))?;
        log::info!("SOS endpoint listening on http://{}{}", addr, self.endpoint);

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("Accept error: {}", e);
                    continue;
                }
            };

            let service = self.service.clone();
            let config = self.config.clone();
            let endpoint = self.endpoint.clone();
            tokio::task::spawn_blocking(move || {
                let stream = match stream.into_std().and_then(|s| s.set_nonblocking(false).map(|_| s)) {
                    Ok(s) => s,
                    Err(e) => {
                        log::warn!("Cannot serve connection from {}: {}", peer_addr, e);
                        return;
                    }
                };
                let mut reader = &stream;
                let status = handle_connection(&service, &endpoint, &config, &mut reader, &stream);
                log::debug!("Connection from {} answered with {}", peer_addr, status);
            });
        }
    }

    /// Run the HTTP server (stub when cli feature is not enabled)
    #[cfg(not(feature = "cli"))]
    pub async fn run(&self) -> Result<()> {
        Err(SosError::Configuration(
            "HTTP server requires the 'cli' feature (for tokio)".into(),
        ))
    }
}

/// Serve one request read from `reader`, answering on `writer`
///
/// Returns the HTTP status sent.
pub fn handle_connection<R: Read, W: Write>(
    service: &SosService,
    endpoint: &str,
    config: &HttpServerConfig,
    reader: &mut R,
    writer: W,
) -> u16 {
    let mut sink = HttpResponseSink::new(writer);
    let request = match parse_http_request(reader, config.max_body_size) {
        Ok(request) => request,
        Err(e) => return sink.send_error(&e),
    };
    if config.request_logging {
        log::info!("{} {}?{}", request.method, request.path, request.query);
    }

    if request.path.trim_end_matches('/') != endpoint.trim_end_matches('/') {
        let body = exception_body(
            exception_code::NO_APPLICABLE_CODE,
            None,
            &format!("No service at {}", request.path),
        );
        return sink.send_json(404, &body);
    }

    let decoded = match request.method.as_str() {
        "GET" => SosRequest::from_kvp(&request.query, None),
        "POST" if has_kvp_request(&request.query) => SosRequest::from_kvp(&request.query, Some(&request.body)),
        "POST" => SosRequest::from_json(&request.body),
        other => {
            let body = exception_body(
                exception_code::NO_APPLICABLE_CODE,
                None,
                &format!("Method {} is not allowed", other),
            );
            return sink.send_json(405, &body);
        }
    };

    match decoded.and_then(|r| service.handle(r, &mut sink)) {
        Ok(response) if response.is_streamed() => sink.finish(),
        Ok(response) => match serde_json::to_value(&response) {
            Ok(body) => sink.send_json(200, &body),
            Err(e) => sink.send_error(&SosError::from(e)),
        },
        Err(e) if sink.headers_sent() => {
            // client already has a 200 and part of the stream
            log::warn!("Result stream aborted: {}", e);
            200
        }
        Err(e) => sink.send_error(&e),
    }
}

fn has_kvp_request(query: &str) -> bool {
    url::form_urlencoded::parse(query.as_bytes()).any(|(k, _)| k.eq_ignore_ascii_case("request"))
}

/// Read and parse one HTTP/1.1 request including its body
pub fn parse_http_request<R: Read>(reader: &mut R, max_body_size: usize) -> Result<HttpRequest> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEADER_SIZE {
            return Err(SosError::Parse("Request headers too large".into()));
        }
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Err(SosError::Parse("Connection closed before end of headers".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(SosError::Parse(format!("Malformed request line: {}", request_line)));
    }

    let method = parts[0].to_uppercase();
    let (path, query) = match parts[1].split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (parts[1].to_string(), String::new()),
    };

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let length = match headers.get("content-length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| SosError::Parse(format!("Invalid Content-Length: {}", v)))?,
        None => 0,
    };
    if length > max_body_size {
        return Err(SosError::Parse(format!(
            "Request body of {} bytes exceeds the {} byte limit",
            length, max_body_size
        )));
    }
    let mut body = buf.split_off(header_end + 4);
    if body.len() < length {
        let mut rest = vec![0u8; length - body.len()];
        reader.read_exact(&mut rest)?;
        body.extend_from_slice(&rest);
    }
    body.truncate(length);

    Ok(HttpRequest {
        method,
        path,
        query,
        headers,
        body,
    })
}

/// Response writer sending the status line lazily
///
/// Streamed bodies get a 200 head on the first write and are delimited by
/// closing the connection.
pub struct HttpResponseSink<W: Write> {
    out: W,
    content_type: String,
    headers_sent: bool,
}

impl<W: Write> HttpResponseSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            content_type: "application/octet-stream".into(),
            headers_sent: false,
        }
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    fn write_head(&mut self, status: u16, content_type: &str, length: Option<usize>) -> io::Result<()> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\n",
            status,
            status_text(status),
            content_type
        );
        if let Some(length) = length {
            head.push_str(&format!("Content-Length: {}\r\n", length));
        }
        head.push_str("Connection: close\r\n\r\n");
        self.headers_sent = true;
        self.out.write_all(head.as_bytes())
    }

    fn write_body(&mut self, status: u16, content_type: &str, body: &[u8]) -> io::Result<()> {
        self.write_head(status, content_type, Some(body.len()))?;
        self.out.write_all(body)?;
        self.out.flush()
    }

    /// Complete a streamed response, sending an empty 200 if nothing was written
    pub fn finish(&mut self) -> u16 {
        let result = if self.headers_sent {
            self.out.flush()
        } else {
            let content_type = self.content_type.clone();
            self.write_body(200, &content_type, &[])
        };
        if let Err(e) = result {
            log::debug!("Could not complete response: {}", e);
        }
        200
    }

    pub fn send_json(&mut self, status: u16, body: &serde_json::Value) -> u16 {
        if let Err(e) = self.write_body(status, "application/json", body.to_string().as_bytes()) {
            log::debug!("Could not send response: {}", e);
        }
        status
    }

    pub fn send_error(&mut self, error: &SosError) -> u16 {
        let body = match error {
            SosError::Validation(report) => json!({
                "exceptions": report
                    .violations()
                    .iter()
                    .map(|v| json!({
                        "code": v.kind.code(),
                        "locator": v.locator,
                        "value": v.value,
                        "message": v.to_string(),
                    }))
                    .collect::<Vec<_>>()
            }),
            other => exception_body(other.exception_code(), other.locator(), &other.to_string()),
        };
        self.send_json(error.http_status(), &body)
    }
}

impl<W: Write> Write for HttpResponseSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.headers_sent {
            let content_type = self.content_type.clone();
            self.write_head(200, &content_type, None)?;
        }
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl<W: Write> ResponseSink for HttpResponseSink<W> {
    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = content_type.to_string();
    }
}

fn exception_body(code: &str, locator: Option<&str>, message: &str) -> serde_json::Value {
    json!({
        "exceptions": [{
            "code": code,
            "locator": locator,
            "message": message,
        }]
    })
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SosServiceConfig;
    use crate::model::ProcedureDescription;
    use crate::modules::LocalModuleRegistry;
    use crate::swe::{DataComponent, DataEncoding};
    use std::io::Cursor;

    fn service(transactional: bool) -> SosService {
        let config = SosServiceConfig {
            enable_transactional: transactional,
            ..Default::default()
        };
        let service = SosService::new(config, Arc::new(LocalModuleRegistry::in_memory()));
        service.start();
        service
    }

    fn exchange(service: &SosService, raw: &[u8]) -> (u16, String) {
        let mut out = Vec::new();
        let status = handle_connection(
            service,
            "/sos",
            &HttpServerConfig::default(),
            &mut Cursor::new(raw.to_vec()),
            &mut out,
        );
        (status, String::from_utf8_lossy(&out).into_owned())
    }

    fn post_json(service: &SosService, request: &SosRequest) -> (u16, String) {
        let body = serde_json::to_vec(request).unwrap();
        let mut raw = format!(
            "POST /sos HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        raw.extend_from_slice(&body);
        exchange(service, &raw)
    }

    #[test]
    fn test_parse_http_request() {
        let raw = "GET /sos?service=SOS&request=GetCapabilities HTTP/1.1\r\n\
                   Host: localhost:8181\r\n\
                   Accept: application/json\r\n\
                   \r\n";
        let req = parse_http_request(&mut Cursor::new(raw), 1024).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/sos");
        assert_eq!(req.query, "service=SOS&request=GetCapabilities");
        assert_eq!(req.header("Host"), Some("localhost:8181"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_http_request_body() {
        let raw = "POST /sos HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let req = parse_http_request(&mut Cursor::new(raw), 1024).unwrap();
        assert_eq!(req.method, "POST");
        assert!(req.query.is_empty());
        assert_eq!(req.body, b"hello");

        let err = parse_http_request(&mut Cursor::new(raw), 4).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_truncated_request() {
        assert!(parse_http_request(&mut Cursor::new("GET /sos HTTP/1.1\r\n"), 1024).is_err());
    }

    #[test]
    fn test_config_default() {
        let config = HttpServerConfig::default();
        assert_eq!(config.port, 8181);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.request_logging);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(404), "Not Found");
        assert_eq!(status_text(501), "Not Implemented");
    }

    #[test]
    fn test_get_capabilities() {
        let service = service(false);
        let (status, response) = exchange(
            &service,
            b"GET /sos?service=SOS&version=2.0.0&request=GetCapabilities HTTP/1.1\r\n\r\n",
        );
        assert_eq!(status, 200);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("\"response\":\"Capabilities\""));
    }

    #[test]
    fn test_unknown_path() {
        let service = service(false);
        let (status, response) = exchange(&service, b"GET /wms?request=GetCapabilities HTTP/1.1\r\n\r\n");
        assert_eq!(status, 404);
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
    }

    #[test]
    fn test_exception_report() {
        let service = service(false);
        let (status, response) = exchange(
            &service,
            b"GET /sos?request=DescribeSensor&procedure=urn:none&procedureDescriptionFormat=pdf HTTP/1.1\r\n\r\n",
        );
        assert_eq!(status, 400);
        let body = &response[response.find("\r\n\r\n").unwrap() + 4..];
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["exceptions"].as_array().unwrap().len(), 2);
        assert_eq!(json["exceptions"][0]["code"], "InvalidParameterValue");
    }

    #[test]
    fn test_transactional_disabled() {
        let service = service(false);
        let (status, response) = post_json(
            &service,
            &SosRequest::DeleteSensor {
                procedure: "urn:test:sensor:001".into(),
            },
        );
        assert_eq!(status, 501);
        assert!(response.contains("OperationNotSupported"));
    }

    #[test]
    fn test_insert_and_stream_results() {
        let service = service(true);
        let (status, _) = post_json(
            &service,
            &SosRequest::InsertSensor {
                procedure_description: ProcedureDescription::new("urn:test:sensor:001", "Test"),
                procedure_description_format: None,
            },
        );
        assert_eq!(status, 200);

        let structure = DataComponent::record(
            "weather",
            vec![
                DataComponent::time("time"),
                DataComponent::quantity("temp", "urn:ogc:def:property:Temperature", "Cel"),
            ],
        );
        let (status, response) = post_json(
            &service,
            &SosRequest::InsertResultTemplate {
                offering: "urn:test:sensor:001-sos".into(),
                result_structure: structure,
                result_encoding: DataEncoding::text(),
            },
        );
        assert_eq!(status, 200);
        assert!(response.contains("urn:test:sensor:001-weather"));

        let values = "2010-06-01T00:00:00Z,20.5\n2010-06-01T00:01:00Z,21.0\n";
        let raw = format!(
            "POST /sos?service=SOS&request=InsertResult&template=urn:test:sensor:001-weather HTTP/1.1\r\n\
             Content-Length: {}\r\n\r\n{}",
            values.len(),
            values
        );
        let (status, response) = exchange(&service, raw.as_bytes());
        assert_eq!(status, 200);
        assert!(response.contains("\"count\":2"));

        let (status, response) = exchange(
            &service,
            b"GET /sos?service=SOS&request=GetResult&offering=urn:test:sensor:001-sos HTTP/1.1\r\n\r\n",
        );
        assert_eq!(status, 200);
        assert!(response.contains("Content-Type: text/plain"));
        assert!(!response.contains("Content-Length"));
        let body = &response[response.find("\r\n\r\n").unwrap() + 4..];
        assert_eq!(body.lines().count(), 2);
    }
}
