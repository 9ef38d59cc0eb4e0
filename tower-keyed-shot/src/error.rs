use keyed_shot::LimitError;

/// Errors produced by the keyed rate limiting middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShotError {
    /// The request was rejected because its key is over quota.
    ///
    /// The duration indicates when the client should retry.
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header.
    #[error("Rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// The duration to wait before retrying.
        retry_after: std::time::Duration,
    },

    /// The limiter could not reach a decision.
    ///
    /// Only produced when the layer fails closed, which is the default.
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Rate limit unavailable: {0}")]
    Store(#[from] LimitError),
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ShotError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, msg, headers) = match self {
            Self::RateLimited { retry_after } => {
                // Round up so clients never retry early.
                let secs = retry_after
                    .as_secs()
                    .saturating_add(u64::from(retry_after.subsec_nanos() > 0))
                    .max(1);
                let val = axum::http::HeaderValue::from(secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    self.to_string(),
                    Some((axum::http::header::RETRY_AFTER, val)),
                )
            }
            Self::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string(), None),
        };

        let mut response = (status, msg).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

#[cfg(all(test, feature = "axum"))]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum::http::header::RETRY_AFTER;
    use axum::response::IntoResponse;

    use super::*;

    fn retry_after_header(retry_after: Duration) -> String {
        let response = ShotError::RateLimited { retry_after }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        response.headers()[RETRY_AFTER]
            .to_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(retry_after_header(Duration::from_millis(1200)), "2");
        assert_eq!(retry_after_header(Duration::from_secs(3)), "3");
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        assert_eq!(retry_after_header(Duration::ZERO), "1");
        assert_eq!(retry_after_header(Duration::from_millis(1)), "1");
    }

    #[test]
    fn store_failures_are_unavailable() {
        let err = ShotError::Store(LimitError::StoreUnavailable("down".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }
}
