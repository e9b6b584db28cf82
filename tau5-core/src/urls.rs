use url::Url;

pub const APP_PATH: &str = "/app";
pub const DASHBOARD_PATH: &str = "/dev/dashboard";
pub const CONSOLE_PATH: &str = "/dev/console";

/// Build `http://localhost:<port><path>?token=<token>`.
pub fn backend_url(port: u16, path: &str, token: &str) -> String {
    // The token is hex so no escaping is needed, but let `url` do it anyway
    // in case a caller hands us something else.
    match Url::parse(&format!("http://localhost:{}", port)) {
        Ok(mut url) => {
            url.set_path(path);
            url.query_pairs_mut().append_pair("token", token);
            url.to_string()
        }
        Err(_) => format!("http://localhost:{}{}?token={}", port, path, token),
    }
}

pub fn app_url(port: u16, token: &str) -> String {
    backend_url(port, APP_PATH, token)
}

pub fn dashboard_url(port: u16, token: &str) -> String {
    backend_url(port, DASHBOARD_PATH, token)
}

pub fn console_url(port: u16, token: &str) -> String {
    backend_url(port, CONSOLE_PATH, token)
}

/// Whether `url` is the live app page for this port and token: same origin,
/// path `/app` and the `token` query parameter equal to `token`.
pub fn is_app_page(url: &str, port: u16, token: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if parsed.scheme() != "http" {
        return false;
    }
    let host_ok = matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1"));
    if !host_ok || parsed.port_or_known_default() != Some(port) {
        return false;
    }
    if parsed.path().trim_end_matches('/') != APP_PATH {
        return false;
    }
    token_of(&parsed).as_deref() == Some(token)
}

fn token_of(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_token_bound_urls() {
        assert_eq!(app_url(4000, "T1"), "http://localhost:4000/app?token=T1");
        assert_eq!(
            dashboard_url(4000, "T1"),
            "http://localhost:4000/dev/dashboard?token=T1"
        );
        assert_eq!(
            console_url(4000, "T1"),
            "http://localhost:4000/dev/console?token=T1"
        );
    }

    #[test]
    fn app_page_requires_matching_token_and_path() {
        let url = app_url(4000, "abc");
        assert!(is_app_page(&url, 4000, "abc"));
        assert!(is_app_page("http://127.0.0.1:4000/app/?token=abc", 4000, "abc"));
        assert!(!is_app_page(&url, 4000, "other"));
        assert!(!is_app_page(&url, 4001, "abc"));
        assert!(!is_app_page("http://localhost:4000/?token=abc", 4000, "abc"));
        assert!(!is_app_page("http://example.com:4000/app?token=abc", 4000, "abc"));
        assert!(!is_app_page("about:blank", 4000, "abc"));
        assert!(!is_app_page("tau5://splash/", 4000, "abc"));
    }
}
