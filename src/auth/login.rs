// Token acquisition over the wire

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::error::{AuthError, TransportError};
use crate::http_client::HttpTransport;

use super::clock::Clock;
use super::types::{AuthRequest, Credential};

/// POST the credentials and turn the response into a `Credential`
pub async fn request_token(
    transport: &HttpTransport,
    url: &str,
    request: &AuthRequest,
    clock: &dyn Clock,
    default_lifetime: Duration,
) -> Result<Credential, AuthError> {
    tracing::debug!(url = %url, username = %request.username, "Sending login request");

    let response = transport.post_json(url, request).await?;

    let body = response.text().await.map_err(|e| {
        AuthError::ServiceUnavailable(TransportError::ConnectionFailed(format!(
            "Failed to read login response body: {}",
            e
        )))
    })?;

    parse_login_response(&body, clock.now(), default_lifetime)
}

/// Validate the login response body.
///
/// Expected shape: `{"success": true, "token": "...", "errorCode": 0, "errorMessage": null}`,
/// optionally with `expiresIn` (seconds) or `expiresAt`/`expiration` (RFC 3339). Without
/// either, `default_lifetime` applies.
pub fn parse_login_response(
    body: &str,
    issued_at: DateTime<Utc>,
    default_lifetime: Duration,
) -> Result<Credential, AuthError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| AuthError::MalformedResponse(format!("Response is not JSON: {}", e)))?;

    let obj = value
        .as_object()
        .ok_or_else(|| AuthError::MalformedResponse("Response is not a JSON object".to_string()))?;

    match present(obj.get("success")) {
        None => {}
        Some(Value::Bool(true)) => {}
        Some(Value::Bool(false)) => {
            let message = obj
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            let message = match obj.get("errorCode").and_then(Value::as_i64) {
                Some(code) => format!("{} (errorCode: {})", message, code),
                None => message.to_string(),
            };
            return Err(AuthError::InvalidCredentials { message });
        }
        Some(other) => {
            return Err(AuthError::MalformedResponse(format!(
                "success is not a boolean: {}",
                other
            )));
        }
    }

    let token = obj
        .get("token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AuthError::MalformedResponse("Response does not contain token".to_string())
        })?;

    let lifetime = parse_lifetime(obj, issued_at)?.unwrap_or(default_lifetime);
    if lifetime <= Duration::zero() {
        return Err(AuthError::MalformedResponse(format!(
            "Token lifetime must be positive, got {}s",
            lifetime.num_seconds()
        )));
    }

    Credential::new(token, issued_at, lifetime).ok_or_else(|| {
        AuthError::MalformedResponse(format!(
            "Token lifetime out of range: {}s",
            lifetime.num_seconds()
        ))
    })
}

/// Lifetime declared by the server, if any
fn parse_lifetime(
    obj: &serde_json::Map<String, Value>,
    issued_at: DateTime<Utc>,
) -> Result<Option<Duration>, AuthError> {
    if let Some(v) = present(obj.get("expiresIn")) {
        let secs = v.as_i64().ok_or_else(|| {
            AuthError::MalformedResponse(format!("expiresIn is not an integer: {}", v))
        })?;
        let lifetime = Duration::try_seconds(secs).ok_or_else(|| {
            AuthError::MalformedResponse(format!("expiresIn out of range: {}", secs))
        })?;
        return Ok(Some(lifetime));
    }

    if let Some(v) = present(obj.get("expiresAt")).or_else(|| present(obj.get("expiration"))) {
        let raw = v.as_str().ok_or_else(|| {
            AuthError::MalformedResponse(format!("Expiry is not a string: {}", v))
        })?;
        let expires_at = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| AuthError::MalformedResponse(format!("Invalid expiry '{}': {}", raw, e)))?
            .with_timezone(&Utc);
        return Ok(Some(expires_at - issued_at));
    }

    Ok(None)
}

/// Treat explicit `null` the same as a missing field
fn present(v: Option<&Value>) -> Option<&Value> {
    v.filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthFailureReason;
    use chrono::TimeZone;

    fn issued() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 12, 10, 30, 0).unwrap()
    }

    fn parse(body: &str) -> Result<Credential, AuthError> {
        parse_login_response(body, issued(), Duration::seconds(3600))
    }

    #[test]
    fn test_success_uses_default_lifetime() {
        let cred = parse(r#"{"token":"abc","success":true,"errorCode":0,"errorMessage":null}"#)
            .unwrap();
        assert_eq!(cred.token(), "abc");
        assert_eq!(cred.issued_at(), issued());
        assert_eq!(cred.lifetime(), Duration::seconds(3600));
    }

    #[test]
    fn test_expires_in_seconds() {
        let cred = parse(r#"{"token":"abc","success":true,"expiresIn":3480}"#).unwrap();
        assert_eq!(cred.lifetime(), Duration::minutes(58));
    }

    #[test]
    fn test_expiry_timestamp() {
        let cred = parse(r#"{"token":"abc","expiresAt":"2025-01-12T11:28:00Z"}"#).unwrap();
        assert_eq!(cred.lifetime(), Duration::minutes(58));

        let cred = parse(r#"{"token":"abc","expiration":"2025-01-12T11:28:00+00:00"}"#).unwrap();
        assert_eq!(cred.expires_at(), issued() + Duration::minutes(58));
    }

    #[test]
    fn test_null_fields_fall_back_to_default() {
        let cred = parse(r#"{"token":"abc","success":null,"expiresIn":null}"#).unwrap();
        assert_eq!(cred.lifetime(), Duration::seconds(3600));
    }

    #[test]
    fn test_unsuccessful_response_is_invalid_credentials() {
        let err = parse(
            r#"{"token":null,"success":false,"errorCode":3,"errorMessage":"Invalid API key"}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            AuthError::InvalidCredentials {
                message: "Invalid API key (errorCode: 3)".to_string()
            }
        );

        let err = parse(r#"{"success":false}"#).unwrap_err();
        assert_eq!(err.reason(), AuthFailureReason::InvalidCredentials);
    }

    #[test]
    fn test_malformed_responses() {
        let cases = [
            "not json",
            "[1, 2, 3]",
            r#"{"success":true}"#,
            r#"{"success":true,"token":""}"#,
            r#"{"success":true,"token":42}"#,
            r#"{"success":"yes","token":"abc"}"#,
            r#"{"token":"abc","expiresIn":"soon"}"#,
            r#"{"token":"abc","expiresIn":0}"#,
            r#"{"token":"abc","expiresIn":-60}"#,
            r#"{"token":"abc","expiresAt":"yesterday"}"#,
            r#"{"token":"abc","expiresAt":"2025-01-12T10:00:00Z"}"#,
        ];

        for body in cases {
            let err = parse(body).unwrap_err();
            assert_eq!(
                err.reason(),
                AuthFailureReason::MalformedResponse,
                "body {} gave {:?}",
                body,
                err
            );
        }
    }

    #[test]
    fn test_out_of_range_lifetime_is_malformed() {
        let cases = [
            r#"{"token":"abc","success":true,"expiresIn":9000000000000000}"#,
            r#"{"token":"abc","success":true,"expiresIn":9223372036854775807}"#,
        ];

        for body in cases {
            let err = parse(body).unwrap_err();
            assert_eq!(
                err.reason(),
                AuthFailureReason::MalformedResponse,
                "body {} gave {:?}",
                body,
                err
            );
        }
    }
}
