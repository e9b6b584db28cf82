use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::time::Duration;

use base64::Engine;
use rand::RngCore;

use crate::error::ShellError;

/// Number of random bytes in a session token (256 bits).
const TOKEN_BYTES: usize = 32;
const SECRET_KEY_BASE_BYTES: usize = 64;

/// Mint a fresh session token: 256 random bits, hex encoded so it can be
/// placed in a query string without escaping.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Phoenix `SECRET_KEY_BASE`: base64 of 64 random bytes.
pub fn generate_secret_key_base() -> String {
    let mut bytes = [0u8; SECRET_KEY_BASE_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Ask the OS for a free TCP port on the loopback interface by binding
/// port 0 and immediately releasing it.
pub fn pick_free_port() -> Result<u16, ShellError> {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| ShellError::InvalidPort(format!("Failed to allocate a local port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| ShellError::InvalidPort(format!("Failed to read allocated port: {}", e)))?
        .port();
    drop(listener);
    if port == 0 {
        return Err(ShellError::InvalidPort("OS returned port 0".to_string()));
    }
    Ok(port)
}

/// Resolve the configured port: 0 picks a free one, anything else is used
/// as given.
pub fn resolve_port(requested: u16) -> Result<u16, ShellError> {
    if requested == 0 {
        pick_free_port()
    } else {
        Ok(requested)
    }
}

pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// Poll until `port` can be bound again or the attempts run out.
pub async fn wait_for_port_release(port: u16, attempts: u32, interval: Duration) -> bool {
    for attempt in 0..attempts {
        if is_port_available(port) {
            return true;
        }
        log::debug!(
            "Port {} still in use, waiting (attempt {}/{})",
            port,
            attempt + 1,
            attempts
        );
        tokio::time::sleep(interval).await;
    }
    is_port_available(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_long_url_safe_and_distinct() {
        let tokens: HashSet<String> = (0..64).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 64);
        for token in &tokens {
            assert_eq!(token.len(), TOKEN_BYTES * 2);
            assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn secret_key_base_decodes_to_64_bytes() {
        let secret = generate_secret_key_base();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(secret)
            .unwrap();
        assert_eq!(decoded.len(), SECRET_KEY_BASE_BYTES);
    }

    #[test]
    fn free_port_is_bindable() {
        let port = pick_free_port().unwrap();
        assert_ne!(port, 0);
        assert!(is_port_available(port));
        assert_eq!(resolve_port(4321).unwrap(), 4321);
    }

    #[tokio::test]
    async fn held_port_is_reported_busy() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_available(port));
        assert!(!wait_for_port_release(port, 2, Duration::from_millis(10)).await);
        drop(listener);
        assert!(wait_for_port_release(port, 2, Duration::from_millis(10)).await);
    }
}
