//! Socket-backed [`AdminClient`] implementation.
//!
//! Each query opens one short-lived connection to the admin daemon's local
//! socket, sends a single `method+arg source name dest\0` request and reads
//! the full response. Queries only happen on cache misses in the registries,
//! so the per-call connection cost is irrelevant here; live state arrives
//! through the event stream, never through polling these methods.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use crate::admin::{AdminClient, DomainInfo, PowerState, VmKind};
use crate::error::MenuError;

pub const DEFAULT_SOCKET: &str = "/var/run/qubesd.sock";

pub struct SocketAdmin {
    socket_path: String,
    local_name: String,
}

impl SocketAdmin {
    pub fn new(socket_path: impl Into<String>) -> Self {
        SocketAdmin {
            socket_path: socket_path.into(),
            local_name: "dom0".to_string(),
        }
    }

    fn call(&self, method: &str, dest: &str, arg: &str) -> Result<Vec<u8>, MenuError> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        let header = format!("{method}+{arg} dom0 name {dest}\0");
        stream.write_all(header.as_bytes())?;
        stream.shutdown(std::net::Shutdown::Write)?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        split_response(&response)
    }
}

/// Split a daemon response into its payload, mapping error responses onto
/// [`MenuError::Admin`]. Success is `0\0payload`, failure `2\0exc-type\0...`.
fn split_response(response: &[u8]) -> Result<Vec<u8>, MenuError> {
    match response {
        [b'0', 0, payload @ ..] => Ok(payload.to_vec()),
        [b'2', 0, rest @ ..] => {
            let exc_type = rest
                .split(|&b| b == 0)
                .next()
                .map(|t| String::from_utf8_lossy(t).into_owned())
                .unwrap_or_default();
            Err(MenuError::Admin(exc_type))
        }
        _ => Err(MenuError::Parse("malformed daemon response".to_string())),
    }
}

fn is_not_found(err: &MenuError) -> bool {
    matches!(
        err,
        MenuError::Admin(name)
            if name.contains("NoSuchProperty")
                || name.contains("FeatureNotFound")
                || name.contains("NoSuchDomain")
                || name.contains("KeyError")
    )
}

/// One line of an `admin.vm.List` response: `name class=AppVM state=Running`.
fn parse_list_line(line: &str) -> Option<(String, VmKind, PowerState)> {
    let mut parts = line.split_whitespace();
    let name = parts.next()?.to_string();
    let mut klass = VmKind::Other;
    let mut state = PowerState::Halted;
    for part in parts {
        if let Some(v) = part.strip_prefix("class=") {
            klass = VmKind::from_wire(v);
        } else if let Some(v) = part.strip_prefix("state=") {
            state = PowerState::from_wire(v);
        }
    }
    Some((name, klass, state))
}

/// A `property.Get` response: `default=True type=str value with spaces`.
fn parse_property_value(payload: &str) -> Option<String> {
    let mut parts = payload.splitn(3, ' ');
    parts.next()?.strip_prefix("default=")?;
    parts.next()?.strip_prefix("type=")?;
    Some(parts.next().unwrap_or("").to_string())
}

impl SocketAdmin {
    fn property(&self, dest: &str, name: &str) -> Result<Option<String>, MenuError> {
        match self.call("admin.vm.property.Get", dest, name) {
            Ok(payload) => {
                let text = String::from_utf8_lossy(&payload).into_owned();
                Ok(parse_property_value(&text))
            }
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn list_entry(&self, dest: &str) -> Result<Option<(String, VmKind, PowerState)>, MenuError> {
        match self.call("admin.vm.List", dest, "") {
            Ok(payload) => {
                let text = String::from_utf8_lossy(&payload).into_owned();
                Ok(text.lines().next().and_then(parse_list_line))
            }
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl AdminClient for SocketAdmin {
    fn local_name(&self) -> String {
        self.local_name.clone()
    }

    fn domain_names(&self) -> Result<Vec<String>, MenuError> {
        let payload = self.call("admin.vm.List", "dom0", "")?;
        let text = String::from_utf8_lossy(&payload).into_owned();
        Ok(text
            .lines()
            .filter_map(parse_list_line)
            .map(|(name, _, _)| name)
            .collect())
    }

    fn domain_info(&self, name: &str) -> Result<Option<DomainInfo>, MenuError> {
        let Some((name, klass, _)) = self.list_entry(name)? else {
            return Ok(None);
        };
        let icon = self
            .property(&name, "icon")?
            .unwrap_or_else(|| "appvm-black".to_string());
        let template = self.property(&name, "template")?.filter(|t| !t.is_empty());
        let template_for_dispvms = self
            .property(&name, "template_for_dispvms")?
            .map(|v| v == "True")
            .unwrap_or(false);
        Ok(Some(DomainInfo {
            name,
            klass,
            icon,
            template,
            template_for_dispvms,
        }))
    }

    fn power_state(&self, name: &str) -> Result<PowerState, MenuError> {
        Ok(self
            .list_entry(name)?
            .map(|(_, _, state)| state)
            .unwrap_or(PowerState::Halted))
    }

    fn is_networked(&self, name: &str) -> Result<bool, MenuError> {
        Ok(self
            .property(name, "netvm")?
            .map(|v| !v.is_empty())
            .unwrap_or(false))
    }

    fn feature(&self, name: &str, feature: &str) -> Result<Option<String>, MenuError> {
        match self.call("admin.vm.feature.Get", name, feature) {
            Ok(payload) => Ok(Some(String::from_utf8_lossy(&payload).into_owned())),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_success_and_error_responses() {
        assert_eq!(split_response(b"0\0hello").unwrap(), b"hello");
        let err = split_response(b"2\0QubesFeatureNotFoundError\0\0tb\0").unwrap_err();
        assert!(is_not_found(&err));
        assert!(split_response(b"?").is_err());
    }

    #[test]
    fn parses_list_lines() {
        let (name, klass, state) = parse_list_line("work class=AppVM state=Running").unwrap();
        assert_eq!(name, "work");
        assert_eq!(klass, VmKind::AppVM);
        assert_eq!(state, PowerState::Running);
        assert!(parse_list_line("").is_none());
    }

    #[test]
    fn parses_property_values_with_spaces() {
        assert_eq!(
            parse_property_value("default=False type=str sys-firewall").as_deref(),
            Some("sys-firewall")
        );
        assert_eq!(
            parse_property_value("default=True type=str a b c").as_deref(),
            Some("a b c")
        );
        assert_eq!(parse_property_value("default=True type=str").as_deref(), Some(""));
        assert_eq!(parse_property_value("bogus"), None);
    }
}
