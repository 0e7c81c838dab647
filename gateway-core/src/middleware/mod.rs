//! HTTP-layer middleware: admin JWT auth, request tracking, security headers.
//!
//! The agent capability token codec lives in [`crate::token`], not here —
//! this module only covers concerns that sit on the tower/axum request path.

pub mod jwt;
pub mod request_tracking;
pub mod security_headers;

pub use jwt::{Claims, JwtAuth};
pub use request_tracking::{
    request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
    RequestTrackingConfig, PROPAGATE_HEADERS, SENSITIVE_HEADERS,
};
pub use security_headers::apply_security_headers;
