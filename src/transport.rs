//! Traits the throttler needs from the host's request and response types.
//!
//! The throttler never sends anything itself. Requests only have to expose the
//! address they are aimed at, and responses (or errors) only have to expose a
//! status code so overload can be recognised.

use std::borrow::Cow;
use std::convert::Infallible;

/// Status code a remote peer uses to report that it is rate limiting us.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// An outgoing request that rules can be matched against.
pub trait Target {
    /// The address the request is sent to, usually its full URL.
    fn target(&self) -> Cow<'_, str>;
}

impl Target for String {
    fn target(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }
}

impl Target for &'static str {
    fn target(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl Target for http::Uri {
    fn target(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }
}

impl<T: Target> Target for std::sync::Arc<T> {
    fn target(&self) -> Cow<'_, str> {
        (**self).target()
    }
}

/// Anything produced by a transport that may carry a status code.
pub trait ResponseStatus {
    /// The status code, if the outcome has one.
    fn status(&self) -> Option<u16>;

    /// Whether the remote reported "too many requests".
    fn is_overloaded(&self) -> bool {
        self.status() == Some(TOO_MANY_REQUESTS)
    }
}

impl ResponseStatus for http::StatusCode {
    fn status(&self) -> Option<u16> {
        Some(self.as_u16())
    }
}

impl<B> ResponseStatus for http::Response<B> {
    fn status(&self) -> Option<u16> {
        Some(http::Response::status(self).as_u16())
    }
}

impl ResponseStatus for Infallible {
    fn status(&self) -> Option<u16> {
        match *self {}
    }
}

impl<T: ResponseStatus, E: ResponseStatus> ResponseStatus for Result<T, E> {
    fn status(&self) -> Option<u16> {
        match self {
            Ok(response) => response.status(),
            Err(error) => error.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_target() {
        let url = "https://api.example.com/v1/items".to_string();
        assert_eq!(url.target(), "https://api.example.com/v1/items");
    }

    #[test]
    fn test_uri_target() {
        let uri: http::Uri = "https://api.example.com/v1/items?page=2".parse().unwrap();
        assert_eq!(uri.target(), "https://api.example.com/v1/items?page=2");
    }

    #[test]
    fn test_http_response_status() {
        let response = http::Response::builder()
            .status(http::StatusCode::TOO_MANY_REQUESTS)
            .body(())
            .unwrap();
        assert_eq!(ResponseStatus::status(&response), Some(429));
        assert!(response.is_overloaded());

        let ok = http::Response::new(());
        assert!(!ok.is_overloaded());
    }

    #[test]
    fn test_result_status() {
        let outcome: Result<http::StatusCode, http::StatusCode> =
            Err(http::StatusCode::TOO_MANY_REQUESTS);
        assert!(outcome.is_overloaded());

        let outcome: Result<http::StatusCode, Infallible> = Ok(http::StatusCode::OK);
        assert_eq!(outcome.status(), Some(200));
    }
}
