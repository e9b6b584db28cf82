//! WebKit web views for the app page and the debug pane.
//!
//! Every view gets the same URL policy: navigation decisions go through
//! [`UrlPolicy::decide`] and subresources are held back by a compiled
//! content-blocker filter built from the same rules. Nothing is loaded into
//! a view until its filter is installed.

use std::cell::{Cell, RefCell};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::rc::Rc;

use gtk4::gio;
use gtk4::prelude::*;
use webkit6::prelude::*;

use tau5_core::url_policy::{Decision, RequestKind, UrlPolicy};
use tau5_core::util::escape_for_js_literal;
use tau5_web::protocol::{PageEvent, ShellCommand, RECEIVE_FUNCTION};
use tau5_web::splash::{SPLASH_HTML, SPLASH_URI};
use tau5_web::MESSAGE_HANDLER;

const FILTER_PREFIX: &str = "tau5-url-policy";

/// Holds back loads until the content filter is in place. Only the most
/// recent request is kept; it runs as soon as the gate opens.
#[derive(Default)]
pub struct LoadGate {
    open: Cell<bool>,
    pending: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl LoadGate {
    pub fn run(&self, load: impl FnOnce() + 'static) {
        if self.open.get() {
            load();
        } else {
            *self.pending.borrow_mut() = Some(Box::new(load));
        }
    }

    pub fn open(&self) {
        if self.open.replace(true) {
            return;
        }
        let pending = self.pending.borrow_mut().take();
        if let Some(load) = pending {
            load();
        }
    }
}

/// A web view whose loads wait for its content filter.
#[derive(Clone)]
pub struct FilteredWebView {
    view: webkit6::WebView,
    gate: Rc<LoadGate>,
}

impl FilteredWebView {
    pub fn widget(&self) -> &webkit6::WebView {
        &self.view
    }

    pub fn load_uri(&self, url: &str) {
        let view = self.view.clone();
        let url = url.to_string();
        self.gate.run(move || view.load_uri(&url));
    }

    pub fn load_html(&self, html: &'static str, base_uri: &'static str) {
        let view = self.view.clone();
        self.gate.run(move || view.load_html(html, Some(base_uri)));
    }
}

/// Compiled filters are cached on disk, keyed by their rules.
fn filter_id(rules: &str) -> String {
    let mut hasher = DefaultHasher::new();
    rules.hash(&mut hasher);
    format!("{}-{:016x}", FILTER_PREFIX, hasher.finish())
}

/// Create a web view with the URL policy and content filter installed.
pub fn build_webview(policy: UrlPolicy, developer_extras: bool) -> FilteredWebView {
    let user_content_manager = webkit6::UserContentManager::new();
    let webview = webkit6::WebView::builder()
        .user_content_manager(&user_content_manager)
        .hexpand(true)
        .vexpand(true)
        .build();

    webview.set_background_color(&gtk4::gdk::RGBA::new(0.0, 0.0, 0.0, 1.0));

    if let Some(wk_settings) = webkit6::prelude::WebViewExt::settings(&webview) {
        wk_settings.set_enable_javascript(true);
        wk_settings.set_enable_webgl(true);
        wk_settings.set_enable_developer_extras(developer_extras);
        wk_settings.set_javascript_can_access_clipboard(true);
        // The splash is local content; it must not reach remote URLs.
        wk_settings.set_allow_file_access_from_file_urls(false);
        wk_settings.set_allow_universal_access_from_file_urls(false);
    }

    install_navigation_policy(&webview, policy);
    let gate = Rc::new(LoadGate::default());
    install_content_filter(&user_content_manager, policy, gate.clone());
    FilteredWebView {
        view: webview,
        gate,
    }
}

fn install_navigation_policy(webview: &webkit6::WebView, policy: UrlPolicy) {
    webview.connect_decide_policy(move |_wv, decision, decision_type| {
        let kind = match decision_type {
            webkit6::PolicyDecisionType::NavigationAction => RequestKind::MainFrame,
            webkit6::PolicyDecisionType::NewWindowAction => RequestKind::SubFrame,
            _ => return false,
        };
        let Some(nav) = decision.downcast_ref::<webkit6::NavigationPolicyDecision>() else {
            return false;
        };
        let uri = nav
            .navigation_action()
            .and_then(|mut action| action.request())
            .and_then(|request| request.uri())
            .map(|u| u.to_string())
            .unwrap_or_default();

        match policy.decide(&uri, kind) {
            Decision::Allow => false,
            Decision::Block => {
                log::warn!("Blocked navigation to {}", uri);
                decision.ignore();
                true
            }
            Decision::OpenExternal => {
                decision.ignore();
                if let Err(e) = open::that_detached(&uri) {
                    log::warn!("Failed to open {} in the browser: {}", uri, e);
                }
                true
            }
        }
    });
}

/// Install the compiled filter, reusing a cached one when the rules are
/// unchanged, then open `gate`.
fn install_content_filter(ucm: &webkit6::UserContentManager, policy: UrlPolicy, gate: Rc<LoadGate>) {
    let Some(rules) = policy.content_blocker_rules() else {
        gate.open();
        return;
    };
    let Some(store_dir) = dirs::cache_dir().map(|d| d.join("tau5").join("content-filters")) else {
        log::warn!("No cache directory; subresource blocking disabled");
        gate.open();
        return;
    };
    if let Err(e) = std::fs::create_dir_all(&store_dir) {
        log::warn!("Failed to create {}: {}", store_dir.display(), e);
        gate.open();
        return;
    }
    let store = webkit6::UserContentFilterStore::new(&store_dir.to_string_lossy());
    let id = filter_id(&rules);
    let bytes = gtk4::glib::Bytes::from_owned(rules.into_bytes());
    let ucm = ucm.clone();
    let (lookup, lookup_id) = (store.clone(), id.clone());
    lookup.load(&lookup_id, None::<&gio::Cancellable>, move |cached| {
        if let Ok(filter) = cached {
            log::debug!("Using cached content filter {}", id);
            ucm.add_filter(&filter);
            gate.open();
            return;
        }
        store.save(&id, &bytes, None::<&gio::Cancellable>, move |result| {
            match result {
                Ok(filter) => ucm.add_filter(&filter),
                Err(e) => log::error!("Failed to compile content filter: {}", e),
            }
            gate.open();
        });
    });
}

/// Ask where to save downloads instead of writing them silently.
pub fn install_download_handler(webview: &webkit6::WebView, parent: &impl IsA<gtk4::Window>) {
    let Some(session) = webview.network_session() else {
        return;
    };
    let parent = parent.clone().upcast::<gtk4::Window>();
    session.connect_download_started(move |_session, download| {
        let parent = parent.clone();
        download.connect_decide_destination(move |download, suggested| {
            let dialog = gtk4::FileDialog::builder()
                .title("Save Download")
                .initial_name(suggested)
                .modal(true)
                .build();
            let download = download.clone();
            dialog.save(Some(&parent), None::<&gio::Cancellable>, move |result| {
                match result.ok().and_then(|file| file.path()) {
                    Some(path) => {
                        log::info!("Saving download to {}", path.display());
                        download.set_destination(&path.to_string_lossy());
                    }
                    None => download.cancel(),
                }
            });
            true
        });
    });
}

/// Outcome of a top-level load in the app view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub url: String,
    pub ok: bool,
}

/// The main web view: splash first, then the token-bound app page.
pub struct PhxWebView {
    view: FilteredWebView,
}

impl PhxWebView {
    pub fn new<L, M>(policy: UrlPolicy, developer_extras: bool, on_load: L, on_message: M) -> Rc<Self>
    where
        L: Fn(LoadReport) + 'static,
        M: Fn(PageEvent) + 'static,
    {
        let view = build_webview(policy, developer_extras);
        let webview = view.widget();
        let on_load = Rc::new(on_load);

        // load-failed is always followed by load-changed(Finished); only the
        // failure is reported.
        let failed = Rc::new(Cell::new(false));
        {
            let failed = failed.clone();
            let on_load = on_load.clone();
            webview.connect_load_failed(move |_wv, _event, failing_uri, error| {
                if error.matches(webkit6::NetworkError::Cancelled) {
                    log::debug!("Load of {} superseded", failing_uri);
                    failed.set(true);
                    return false;
                }
                log::warn!("Failed to load {}: {}", failing_uri, error);
                failed.set(true);
                on_load(LoadReport {
                    url: failing_uri.to_string(),
                    ok: false,
                });
                // Suppress WebKit's own error page; the shell reports it.
                true
            });
        }
        {
            let failed = failed.clone();
            webview.connect_load_changed(move |wv, event| match event {
                webkit6::LoadEvent::Started => failed.set(false),
                webkit6::LoadEvent::Finished => {
                    if failed.replace(false) {
                        return;
                    }
                    let url = wv.uri().map(|u| u.to_string()).unwrap_or_default();
                    log::debug!("Loaded {}", url);
                    on_load(LoadReport { url, ok: true });
                }
                _ => {}
            });
        }

        if let Some(ucm) = webview.user_content_manager() {
            ucm.register_script_message_handler(MESSAGE_HANDLER, None);
            ucm.connect_script_message_received(Some(MESSAGE_HANDLER), move |_ucm, value| {
                let json = value.to_str().to_string();
                match PageEvent::parse(&json) {
                    Ok(event) => on_message(event),
                    Err(e) => log::warn!("{} (json: {})", e, json),
                }
            });
        }

        Rc::new(PhxWebView { view })
    }

    pub fn widget(&self) -> &webkit6::WebView {
        self.view.widget()
    }

    pub fn show_splash(&self) {
        self.view.load_html(SPLASH_HTML, SPLASH_URI);
    }

    pub fn load_url(&self, url: &str) {
        log::info!("Loading {}", redact_token(url));
        self.view.load_uri(url);
    }

    pub fn send_command(&self, cmd: &ShellCommand) {
        let json = match serde_json::to_string(cmd) {
            Ok(j) => j,
            Err(e) => {
                log::error!("Failed to serialize ShellCommand: {}", e);
                return;
            }
        };
        let script = format!(
            "window.{f} && window.{f}('{}')",
            escape_for_js_literal(&json),
            f = RECEIVE_FUNCTION
        );
        self.widget().evaluate_javascript(
            &script,
            None,
            None,
            None::<&gio::Cancellable>,
            |_| {},
        );
    }
}

/// Replace the token value in a URL for logging.
pub fn redact_token(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.query_pairs().any(|(k, _)| k == "token") => {
            let pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| {
                    let v = if k == "token" { "redacted".to_string() } else { v.into_owned() };
                    (k.into_owned(), v)
                })
                .collect();
            parsed.query_pairs_mut().clear().extend_pairs(pairs);
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_only_the_token() {
        let redacted = redact_token("http://localhost:4000/app?token=secret&x=1");
        assert!(!redacted.contains("secret"));
        assert!(redacted.contains("x=1"));
        assert_eq!(redact_token("tau5://splash/"), "tau5://splash/");
    }

    #[test]
    fn gate_holds_the_latest_load_until_opened() {
        let gate = LoadGate::default();
        let loaded = Rc::new(RefCell::new(Vec::new()));
        for url in ["splash", "app"] {
            let loaded = loaded.clone();
            gate.run(move || loaded.borrow_mut().push(url));
        }
        assert!(loaded.borrow().is_empty());

        gate.open();
        assert_eq!(*loaded.borrow(), vec!["app"]);

        let after = loaded.clone();
        gate.run(move || after.borrow_mut().push("reload"));
        gate.open();
        assert_eq!(*loaded.borrow(), vec!["app", "reload"]);
    }

    #[test]
    fn filter_id_follows_the_rules() {
        assert_eq!(filter_id("[1]"), filter_id("[1]"));
        assert_ne!(filter_id("[1]"), filter_id("[2]"));
        assert!(filter_id("[]").starts_with(FILTER_PREFIX));
    }
}
