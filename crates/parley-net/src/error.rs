/// Construction-time failures for the network clients.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Parse a base URL that path segments can be appended to.
pub(crate) fn parse_base(raw: &str) -> Result<url::Url, NetError> {
    let url = url::Url::parse(raw).map_err(|e| NetError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(NetError::InvalidUrl {
            url: raw.to_string(),
            reason: "cannot be a base URL".into(),
        });
    }
    Ok(url)
}

/// Append path segments to `base`, keeping any path the base already has.
pub(crate) fn with_segments(base: &url::Url, segments: &[&str]) -> url::Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_to_bare_host() {
        let base = parse_base("http://localhost:8000").unwrap();
        assert_eq!(with_segments(&base, &["users", ""]).as_str(), "http://localhost:8000/users/");
    }

    #[test]
    fn appends_to_base_with_path() {
        let base = parse_base("http://chat.example/api/").unwrap();
        assert_eq!(
            with_segments(&base, &["messages", "1", "2"]).as_str(),
            "http://chat.example/api/messages/1/2"
        );
    }

    #[test]
    fn rejects_non_base_url() {
        assert!(parse_base("mailto:someone@example.com").is_err());
        assert!(parse_base("not a url").is_err());
    }
}
