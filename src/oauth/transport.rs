//! The injected HTTP transport seam.
//!
//! The engine never speaks HTTP itself; callers hand it a [`Transport`]
//! implementation. A transport-level failure is an absent response, distinct
//! from a non-2xx status (which is a successful transport result the caller
//! inspects).

use std::fmt;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Post,
    Put,
    Get,
    Patch,
    Delete,
}

impl Method {
    /// Canonical upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Get => "GET",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully assembled outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    /// `"Key: Value"` lines, in send order.
    pub headers: Vec<String>,
    pub body: Option<String>,
}

/// A completed transport exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
    pub content_type: String,
}

/// The perform-request capability consumed by the pipeline.
///
/// Returns `None` on a transport-level error (connection refused, DNS
/// failure, ...). HTTP error statuses are returned as `Some`.
pub trait Transport: Send + Sync + 'static {
    fn perform(&self, request: &TransportRequest) -> Option<Response>;
}

impl<F> Transport for F
where
    F: Fn(&TransportRequest) -> Option<Response> + Send + Sync + 'static,
{
    fn perform(&self, request: &TransportRequest) -> Option<Response> {
        self(request)
    }
}
