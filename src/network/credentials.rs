use anyhow::{anyhow, Result};
use url::form_urlencoded;

use crate::error::StoreError;
use crate::platform::CredentialStore;

/// NVS namespace holding the station credentials
pub const CREDENTIALS_NAMESPACE: &str = "wifi";
pub const SSID_KEY: &str = "ssid";
pub const PASSWORD_KEY: &str = "password";

const MAX_SSID_LEN: usize = 32;
const MAX_PASSWORD_LEN: usize = 63;

#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// An empty SSID means the node was never provisioned
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }
}

// Keep the password out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field(
                "password",
                &if self.password.is_empty() { "<empty>" } else { "<set>" },
            )
            .finish()
    }
}

/// Read the stored credentials; missing keys read as empty strings
pub fn load(store: &dyn CredentialStore) -> Result<Credentials, StoreError> {
    let ssid = store.get(SSID_KEY)?.unwrap_or_default();
    let password = store.get(PASSWORD_KEY)?.unwrap_or_default();
    Ok(Credentials { ssid, password })
}

/// Persist credentials, optionally wiping the namespace first so no stale key
/// from an older configuration survives a partial write
pub fn save(
    store: &mut dyn CredentialStore,
    credentials: &Credentials,
    clear_first: bool,
) -> Result<(), StoreError> {
    if clear_first {
        store.clear()?;
    }
    store.put(SSID_KEY, &credentials.ssid)?;
    store.put(PASSWORD_KEY, &credentials.password)?;
    Ok(())
}

pub fn validate_ssid(ssid: &str) -> Result<()> {
    if ssid.is_empty() {
        return Err(anyhow!("WiFi SSID cannot be empty"));
    }
    if ssid.len() > MAX_SSID_LEN {
        return Err(anyhow!("WiFi SSID must be 32 characters or less"));
    }
    if ssid.chars().any(|c| c.is_control()) {
        return Err(anyhow!("WiFi SSID cannot contain control characters"));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(anyhow!("WiFi password must be 63 characters or less"));
    }
    Ok(())
}

/// Parse the `application/x-www-form-urlencoded` body of `POST /connect`
pub fn parse_connect_form(body: &str) -> Result<Credentials> {
    let body = body.trim();
    if has_malformed_escape(body) {
        return Err(anyhow!("Malformed percent escape in form body"));
    }

    let mut ssid = None;
    let mut password = None;
    for (name, value) in form_urlencoded::parse(body.as_bytes()) {
        match name.as_ref() {
            "ssid" => ssid = Some(value.into_owned()),
            "password" => password = Some(value.into_owned()),
            _ => {}
        }
    }

    let ssid = ssid.ok_or_else(|| anyhow!("Missing ssid field"))?;
    let password = password.unwrap_or_default();
    validate_ssid(&ssid)?;
    validate_password(&password)?;

    Ok(Credentials { ssid, password })
}

// The decoder passes bad escapes through literally; a form from the setup
// page never contains one
fn has_malformed_escape(body: &str) -> bool {
    let bytes = body.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'%'
            && !matches!(
                bytes.get(i + 1..i + 3),
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit()
            )
    })
}

/// Plain-text reply to a successful `POST /connect`
///
/// `setup_address` is the node's address on its own access point. The
/// address it gets on the joined network is not known yet when this is sent.
pub fn connect_response(setup_address: std::net::Ipv4Addr) -> String {
    format!(
        "Credentials saved. Setup access point {} is closing while the node joins the network; \
         its new address will be printed on the console.",
        setup_address
    )
}

pub const PROVISIONING_FORM_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Node setup</title>
    <style>
        body { font-family: Arial, sans-serif; max-width: 420px; margin: 40px auto; background: #1a1a1a; color: #fff; }
        form { background: #2a2a2a; padding: 24px; border-radius: 8px; }
        input { width: 100%; padding: 8px; margin: 8px 0 16px; box-sizing: border-box; }
        button { background: #4CAF50; color: #fff; border: none; padding: 10px 24px; border-radius: 5px; }
    </style>
</head>
<body>
    <h1>Network setup</h1>
    <form method="POST" action="/connect">
        <label for="ssid">SSID</label>
        <input id="ssid" name="ssid" maxlength="32" required>
        <label for="password">Password</label>
        <input id="password" name="password" type="password" maxlength="63">
        <button type="submit">Connect</button>
    </form>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MemoryStore;
    use proptest::prelude::*;

    #[test]
    fn test_parse_connect_form() {
        let creds = parse_connect_form("ssid=home&password=secret").unwrap();
        assert_eq!(creds, Credentials::new("home", "secret"));
    }

    #[test]
    fn test_parse_connect_form_decodes_escapes() {
        let creds = parse_connect_form("password=p%40ss+word&ssid=My+Net%21").unwrap();
        assert_eq!(creds.ssid, "My Net!");
        assert_eq!(creds.password, "p@ss word");
    }

    #[test]
    fn test_parse_connect_form_rejects_bad_input() {
        assert!(parse_connect_form("password=secret").is_err());
        assert!(parse_connect_form("ssid=&password=secret").is_err());
        assert!(parse_connect_form("ssid=%zz").is_err());
        assert!(parse_connect_form("ssid=home%4").is_err());
        assert!(parse_connect_form(&format!("ssid={}", "a".repeat(33))).is_err());
    }

    #[test]
    fn test_parse_connect_form_rejects_signed_escape() {
        assert!(parse_connect_form("ssid=home&password=%+5").is_err());
        assert!(parse_connect_form("ssid=home&password=%-5").is_err());
    }

    #[test]
    fn test_connect_response_names_the_setup_address() {
        let reply = connect_response(std::net::Ipv4Addr::new(192, 168, 4, 1));
        assert!(reply.starts_with("Credentials saved."));
        assert!(reply.contains("Setup access point 192.168.4.1 is closing"));
    }

    #[test]
    fn test_open_network_has_empty_password() {
        let creds = parse_connect_form("ssid=cafe").unwrap();
        assert!(creds.password.is_empty());
    }

    #[test]
    fn test_validate_ssid() {
        assert!(validate_ssid("MyNetwork").is_ok());
        assert!(validate_ssid("").is_err());
        assert!(validate_ssid("Network\0").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let text = format!("{:?}", Credentials::new("home", "secret"));
        assert!(text.contains("home"));
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_save_with_clear_drops_stale_keys() {
        let mut store = MemoryStore::new();
        store.put("legacy_key", "old").unwrap();
        save(&mut store, &Credentials::new("home", "secret"), true).unwrap();

        assert_eq!(store.get("legacy_key").unwrap(), None);
        assert_eq!(load(&store).unwrap(), Credentials::new("home", "secret"));
    }

    #[test]
    fn test_additive_save_keeps_other_keys() {
        let mut store = MemoryStore::new();
        store.put("legacy_key", "old").unwrap();
        save(&mut store, &Credentials::new("home", "secret"), false).unwrap();
        assert_eq!(store.get("legacy_key").unwrap().as_deref(), Some("old"));
    }

    #[test]
    fn test_load_from_empty_store_is_unconfigured() {
        let store = MemoryStore::new();
        assert!(!load(&store).unwrap().is_configured());
    }

    proptest! {
        #[test]
        fn prop_encoded_form_round_trips(ssid in "[ -~]{1,32}", password in "[ -~]{0,63}") {
            let body = format!("ssid={}&password={}", encode(&ssid), encode(&password));
            let creds = parse_connect_form(&body).unwrap();
            prop_assert_eq!(creds.ssid, ssid);
            prop_assert_eq!(creds.password, password);
        }
    }

    fn encode(value: &str) -> String {
        form_urlencoded::byte_serialize(value.as_bytes()).collect()
    }
}
