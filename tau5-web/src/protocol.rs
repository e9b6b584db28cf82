use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Commands: shell → page (sent via evaluate_javascript)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ShellCommand {
    /// Dim the splash visuals; 0.0 is full brightness, 1.0 is black.
    SetFade { value: f64 },
    /// Status text under the splash logo.
    SetStatus { text: String },
}

// ---------------------------------------------------------------------------
// Events: page → shell (sent via window.webkit.messageHandlers.tau5)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageEvent {
    /// The splash finished initialising; `webgl` is false when it fell back
    /// to the static rendering.
    SplashReady { webgl: bool },
    SplashError { message: String },
}

impl PageEvent {
    pub fn parse(json: &str) -> Result<PageEvent, String> {
        serde_json::from_str(json).map_err(|e| format!("Invalid page message: {}", e))
    }
}

/// JS entry point the splash exposes for [`ShellCommand`]s.
pub const RECEIVE_FUNCTION: &str = "tau5ReceiveCommand";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_splash_beacons() {
        assert_eq!(
            PageEvent::parse(r#"{"type":"SplashReady","webgl":false}"#).unwrap(),
            PageEvent::SplashReady { webgl: false }
        );
        assert!(PageEvent::parse(r#"{"type":"Nope"}"#).is_err());
    }

    #[test]
    fn commands_are_tagged() {
        let json = serde_json::to_string(&ShellCommand::SetFade { value: 0.5 }).unwrap();
        assert_eq!(json, r#"{"type":"SetFade","value":0.5}"#);
    }
}
