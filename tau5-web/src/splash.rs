/// Offline boot splash. Renders a WebGL field behind the logo and falls back
/// to a static page when WebGL is unavailable.
pub const SPLASH_HTML: &str = include_str!("../assets/splash.html");

/// Base URI the splash is loaded under. Not a real origin; it only gives
/// the page a stable, non-backend URL for load bookkeeping.
pub const SPLASH_URI: &str = "tau5://splash/";

pub fn is_splash_uri(uri: &str) -> bool {
    uri.starts_with(SPLASH_URI)
}
