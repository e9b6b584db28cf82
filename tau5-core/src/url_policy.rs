use serde_json::json;
use url::Url;

/// What kind of load a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    MainFrame,
    SubFrame,
    Subresource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
    /// Block in the embedded view and hand the URL to the OS browser.
    OpenExternal,
}

/// Request filter for every embedded web view.
///
/// Loopback hosts, host-less URLs and `devtools:` are always allowed.
/// Everything else is blocked; http(s) navigations are forwarded to the
/// default browser instead. `remote_access` lifts the restriction in dev
/// mode only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlPolicy {
    pub dev: bool,
    pub remote_access: bool,
}

impl UrlPolicy {
    pub fn new(dev: bool, remote_access: bool) -> Self {
        UrlPolicy { dev, remote_access }
    }

    fn unrestricted(&self) -> bool {
        self.dev && self.remote_access
    }

    pub fn decide(&self, url: &str, kind: RequestKind) -> Decision {
        if self.unrestricted() {
            return Decision::Allow;
        }

        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => {
                log::debug!("Blocking unparsable request URL: {}", url);
                return Decision::Block;
            }
        };

        let scheme = parsed.scheme();
        if scheme == "devtools" {
            return Decision::Allow;
        }
        match parsed.host_str() {
            None | Some("") | Some("localhost") | Some("127.0.0.1") => return Decision::Allow,
            _ => {}
        }

        let navigation = matches!(kind, RequestKind::MainFrame | RequestKind::SubFrame);
        if navigation && (scheme == "http" || scheme == "https") {
            log::info!("Opening external URL in browser: {}", url);
            return Decision::OpenExternal;
        }

        log::debug!("Blocking external request: {} ({:?})", url, kind);
        Decision::Block
    }

    /// WebKit content-blocker rules enforcing the same policy for
    /// subresources, which never reach the navigation callback.
    ///
    /// Returns `None` when nothing needs to be blocked.
    pub fn content_blocker_rules(&self) -> Option<String> {
        if self.unrestricted() {
            return None;
        }
        // The content-blocker regex dialect has no alternation, so every
        // allowed prefix gets its own rule.
        let allowed = [
            "^https?://localhost[:/]",
            "^https?://127\\.0\\.0\\.1[:/]",
            "^wss?://localhost[:/]",
            "^wss?://127\\.0\\.0\\.1[:/]",
            "^about:",
            "^data:",
            "^blob:",
            "^file:",
            "^devtools:",
            "^tau5:",
        ];
        let mut rules = vec![json!({
            "trigger": { "url-filter": ".*" },
            "action": { "type": "block" }
        })];
        rules.extend(allowed.iter().map(|filter| {
            json!({
                "trigger": { "url-filter": filter },
                "action": { "type": "ignore-previous-rules" }
            })
        }));
        serde_json::to_string(&rules).ok()
    }
}
