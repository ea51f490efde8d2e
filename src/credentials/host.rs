//! Host extraction from remote URLs
//!
//! Understands the scp-like SSH form (`git@github.com:owner/repo.git`) and
//! URL forms (`https://user@host:443/path`, `ssh://git@host/path`).

/// Extract the lowercased host of a remote URL, `None` when it cannot be parsed
pub fn host_from_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() || url.chars().any(char::is_whitespace) {
        return None;
    }

    let authority = match url.split_once("://") {
        Some((scheme, rest)) => {
            if scheme.is_empty() || !scheme.chars().all(is_scheme_char) {
                return None;
            }
            rest.split(['/', '?', '#']).next()?
        }
        None => {
            // scp-like syntax: [user@]host:path, the host part has no slash
            let (authority, path) = url.split_once(':')?;
            if authority.contains('/') || path.is_empty() {
                return None;
            }
            authority
        }
    };

    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = strip_port(host_port)?;

    if host.is_empty() || !host.chars().all(is_host_char) {
        return None;
    }

    Some(host.to_lowercase())
}

fn strip_port(host_port: &str) -> Option<&str> {
    if let Some(rest) = host_port.strip_prefix('[') {
        // IPv6 literal
        return rest.split_once(']').map(|(host, _)| host);
    }
    match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => Some(host),
        Some(_) => None,
        None => Some(host_port),
    }
}

fn is_scheme_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | ':')
}
