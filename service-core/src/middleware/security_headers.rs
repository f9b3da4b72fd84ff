use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

/// API responses carry tokens and identity data.
const API_HEADERS: &[(&str, &str)] = &[
    ("content-security-policy", "default-src 'none'; frame-ancestors 'none'"),
    ("x-frame-options", "DENY"),
    ("cache-control", "no-store"),
];

/// Swagger UI needs inline assets from its own origin.
const DOCS_HEADERS: &[(&str, &str)] = &[
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self' 'unsafe-inline'; \
         style-src 'self' 'unsafe-inline'; img-src 'self' data:; connect-src 'self'",
    ),
    ("x-frame-options", "SAMEORIGIN"),
];

const COMMON_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains",
    ),
    ("referrer-policy", "no-referrer"),
];

fn is_docs_path(path: &str) -> bool {
    path.starts_with("/docs") || path == "/.well-known/openapi.json"
}

fn apply(headers: &mut HeaderMap, policy: &[(&'static str, &'static str)]) {
    for &(name, value) in policy {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
}

pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let docs = is_docs_path(req.uri().path());

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    apply(headers, COMMON_HEADERS);
    apply(headers, if docs { DOCS_HEADERS } else { API_HEADERS });

    response
}
