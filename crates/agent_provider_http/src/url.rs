use agent_provider::ProviderError;
use url::Url;

/// Validates a configured base URL and strips trailing slashes.
///
/// Blank input selects `default`; a bare `host:port` gets an `http://` scheme.
pub fn normalize_base_url(input: Option<&str>, default: &str) -> Result<String, ProviderError> {
    let base = input
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default);

    let with_scheme = if base.contains("://") {
        base.to_string()
    } else {
        format!("http://{base}")
    };

    let parsed = Url::parse(&with_scheme)
        .map_err(|error| ProviderError::new(format!("invalid base URL '{base}': {error}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ProviderError::new(format!(
            "invalid base URL '{base}': scheme must be http or https"
        )));
    }

    Ok(with_scheme.trim_end_matches('/').to_string())
}
