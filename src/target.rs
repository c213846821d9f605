use std::fmt;

use thiserror::Error;
use url::Url;

/// Reasons a user-supplied URL is rejected before any request is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("The URL {input:?} is invalid: missing scheme")]
    MissingScheme { input: String },
    #[error("The URL {input:?} is invalid: missing host")]
    MissingHost { input: String },
    #[error("The URL {input:?} is invalid: {detail}")]
    Unparseable { input: String, detail: String },
    #[error("The URL {input:?} is invalid: unsupported scheme {scheme:?}, use http or https")]
    UnsupportedScheme { input: String, scheme: String },
}

/// A URL that passed validation.
///
/// The input is kept verbatim next to the parsed form so log records carry
/// exactly what the user typed, which is also what `history` matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    raw: String,
    url: Url,
}

impl Target {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses and checks a target URL.
///
/// # Errors
///
/// Returns a [`ValidationError`] naming the first missing or malformed part.
pub fn validate(input: &str) -> Result<Target, ValidationError> {
    let url = Url::parse(input).map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => ValidationError::MissingScheme {
            input: input.to_string(),
        },
        url::ParseError::EmptyHost => ValidationError::MissingHost {
            input: input.to_string(),
        },
        other => ValidationError::Unparseable {
            input: input.to_string(),
            detail: other.to_string(),
        },
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ValidationError::UnsupportedScheme {
            input: input.to_string(),
            scheme: url.scheme().to_string(),
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::MissingHost {
            input: input.to_string(),
        });
    }

    Ok(Target {
        raw: input.to_string(),
        url,
    })
}

/// Validates every input, stopping at the first bad one.
///
/// # Errors
///
/// Returns the [`ValidationError`] of the first invalid input.
pub fn validate_all<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<Target>, ValidationError> {
    inputs.iter().map(|s| validate(s.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_url_is_missing_scheme() {
        assert!(matches!(
            validate(""),
            Err(ValidationError::MissingScheme { .. })
        ));
    }

    #[test]
    fn test_url_without_colon_is_missing_scheme() {
        assert!(matches!(
            validate("http//googl"),
            Err(ValidationError::MissingScheme { .. })
        ));
    }

    #[test]
    fn test_url_without_host() {
        assert_eq!(
            validate("http://"),
            Err(ValidationError::MissingHost {
                input: "http://".to_string()
            })
        );
    }

    #[test]
    fn test_accepts_common_shapes() {
        for input in [
            "http://www.google.com",
            "https://www.google.com",
            "http://192.168.0.1",
            "http://[::1]:8080/status",
            "http://localhost:8080",
            "http://example.com/path?name=val#anchor",
        ] {
            let target = validate(input).unwrap_or_else(|e| panic!("{input}: {e}"));
            assert_eq!(target.as_str(), input);
        }
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        assert!(matches!(
            validate("ftp://example.com"),
            Err(ValidationError::UnsupportedScheme { scheme, .. }) if scheme == "ftp"
        ));
    }

    #[test]
    fn test_bad_port_is_unparseable() {
        assert!(matches!(
            validate("http://example.com:99999"),
            Err(ValidationError::Unparseable { .. })
        ));
    }

    #[test]
    fn test_validate_all_stops_at_first_error() {
        let err = validate_all(&["http://a.example", "http://", ""]).unwrap_err();
        assert!(matches!(err, ValidationError::MissingHost { .. }));
    }
}
