//! Administrative event stream: wire decoding and the closed event enum.
//!
//! Events arrive as NUL-framed records. Each frame starts with a `1` marker
//! field, then the subject (the VM the event concerns, or empty for
//! connection-level events), the event name, any number of key/value pairs,
//! and a trailing empty field:
//!
//! ```text
//! 1 \0 subject \0 event-name \0 (key \0 value \0)* \0
//! ```
//!
//! The string event names are matched exactly once, here, and turned into
//! [`AdminEvent`] variants; everything downstream works on the enum.

use std::collections::VecDeque;

use log::warn;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

use crate::admin::PowerState;
use crate::constants;
use crate::error::MenuError;

/// One decoded wire frame, before event-name interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub subject: String,
    pub event: String,
    pub fields: Vec<(String, String)>,
}

impl RawEvent {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Incremental frame decoder. Feed it raw bytes as they arrive; complete
/// frames become available through [`EventDecoder::pop`].
#[derive(Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    ready: VecDeque<RawEvent>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        while let Some(end) = find_frame_end(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..end + 2).collect();
            match parse_frame(&frame[..frame.len() - 2]) {
                Some(event) => self.ready.push_back(event),
                None => warn!("discarding malformed event frame"),
            }
        }
    }

    pub fn pop(&mut self) -> Option<RawEvent> {
        self.ready.pop_front()
    }
}

/// Position of the frame terminator (`\0\0`), if a complete frame is buffered.
fn find_frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == [0, 0])
}

fn parse_frame(frame: &[u8]) -> Option<RawEvent> {
    let mut fields = frame.split(|&b| b == 0);
    let marker = fields.next()?;
    if marker != b"1" {
        return None;
    }
    let subject = String::from_utf8_lossy(fields.next()?).into_owned();
    let event = String::from_utf8_lossy(fields.next()?).into_owned();
    let mut kwargs = Vec::new();
    loop {
        let Some(key) = fields.next() else { break };
        let Some(value) = fields.next() else { break };
        kwargs.push((
            String::from_utf8_lossy(key).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
    }
    Some(RawEvent {
        subject,
        event,
        fields: kwargs,
    })
}

/// Domain lifecycle transitions, one per documented power-state event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    PreStart,
    Start,
    StartFailed,
    Paused,
    Unpaused,
    Shutdown,
    PreShutdown,
    ShutdownFailed,
}

impl LifecycleEvent {
    /// The power state a VM ends up in after this event, regardless of the
    /// state it was in before.
    pub fn target_state(&self) -> PowerState {
        match self {
            LifecycleEvent::PreStart => PowerState::Transient,
            LifecycleEvent::Start => PowerState::Running,
            LifecycleEvent::StartFailed => PowerState::Halted,
            LifecycleEvent::Paused => PowerState::Paused,
            LifecycleEvent::Unpaused => PowerState::Running,
            LifecycleEvent::Shutdown => PowerState::Halted,
            LifecycleEvent::PreShutdown => PowerState::Transient,
            LifecycleEvent::ShutdownFailed => PowerState::Running,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "domain-pre-start" => Some(LifecycleEvent::PreStart),
            "domain-start" => Some(LifecycleEvent::Start),
            "domain-start-failed" => Some(LifecycleEvent::StartFailed),
            "domain-paused" => Some(LifecycleEvent::Paused),
            "domain-unpaused" => Some(LifecycleEvent::Unpaused),
            "domain-shutdown" => Some(LifecycleEvent::Shutdown),
            "domain-pre-shutdown" => Some(LifecycleEvent::PreShutdown),
            "domain-shutdown-failed" => Some(LifecycleEvent::ShutdownFailed),
            _ => None,
        }
    }
}

/// VM properties the menu projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmProperty {
    Netvm,
    Label,
    TemplateForDispvms,
}

impl VmProperty {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "netvm" => Some(VmProperty::Netvm),
            "label" => Some(VmProperty::Label),
            "template_for_dispvms" => Some(VmProperty::TemplateForDispvms),
            _ => None,
        }
    }
}

/// VM features the menu projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmFeature {
    ServiceVm,
    Internal,
    DispvmMenu,
    Favorites,
}

impl VmFeature {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            constants::SERVICEVM_FEATURE => Some(VmFeature::ServiceVm),
            constants::INTERNAL_FEATURE => Some(VmFeature::Internal),
            constants::DISPVM_MENU_FEATURE => Some(VmFeature::DispvmMenu),
            constants::FAVORITES_FEATURE => Some(VmFeature::Favorites),
            _ => None,
        }
    }
}

/// Every administrative event the menu reacts to, decoded from the wire
/// form exactly once. Events outside this set decode to [`AdminEvent::Other`]
/// and are dropped by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminEvent {
    Lifecycle {
        vm: String,
        event: LifecycleEvent,
    },
    DomainAdd {
        vm: String,
    },
    DomainDelete {
        vm: String,
    },
    PropertySet {
        vm: String,
        property: VmProperty,
        newvalue: String,
    },
    FeatureSet {
        vm: String,
        feature: VmFeature,
        value: String,
        oldvalue: Option<String>,
    },
    FeatureDelete {
        vm: String,
        feature: VmFeature,
    },
    Other {
        subject: String,
        event: String,
    },
}

impl AdminEvent {
    pub fn decode(raw: RawEvent) -> AdminEvent {
        if let Some(event) = LifecycleEvent::from_name(&raw.event) {
            return AdminEvent::Lifecycle {
                vm: raw.subject,
                event,
            };
        }
        match raw.event.as_str() {
            // domain-add and domain-delete are submitted by the collection
            // itself; the affected VM travels in the "vm" field.
            "domain-add" => {
                if let Some(vm) = raw.field("vm") {
                    return AdminEvent::DomainAdd { vm: vm.to_string() };
                }
            }
            "domain-delete" => {
                if let Some(vm) = raw.field("vm") {
                    return AdminEvent::DomainDelete { vm: vm.to_string() };
                }
            }
            _ => {}
        }
        if let Some(name) = raw.event.strip_prefix("property-set:") {
            if let Some(property) = VmProperty::from_name(name) {
                let newvalue = raw.field("newvalue").unwrap_or_default().to_string();
                return AdminEvent::PropertySet {
                    vm: raw.subject,
                    property,
                    newvalue,
                };
            }
        }
        if let Some(name) = raw.event.strip_prefix("domain-feature-set:") {
            if let Some(feature) = VmFeature::from_name(name) {
                let value = raw.field("value").unwrap_or_default().to_string();
                let oldvalue = raw.field("oldvalue").map(str::to_string);
                return AdminEvent::FeatureSet {
                    vm: raw.subject,
                    feature,
                    value,
                    oldvalue,
                };
            }
        }
        if let Some(name) = raw.event.strip_prefix("domain-feature-delete:") {
            if let Some(feature) = VmFeature::from_name(name) {
                return AdminEvent::FeatureDelete {
                    vm: raw.subject,
                    feature,
                };
            }
        }
        AdminEvent::Other {
            subject: raw.subject,
            event: raw.event,
        }
    }
}

/// Async reader over the admin event socket.
pub struct EventStream {
    stream: UnixStream,
    decoder: EventDecoder,
}

impl EventStream {
    /// Connect to the admin daemon and subscribe to the event stream.
    /// Failure here is the one fatal startup path; there is no retry.
    pub async fn connect(socket_path: &str) -> Result<Self, MenuError> {
        use tokio::io::AsyncWriteExt;

        let mut stream = UnixStream::connect(socket_path).await?;
        stream
            .write_all(b"admin.Events+ dom0 name dom0\0")
            .await?;
        let mut status = [0u8; 2];
        stream.read_exact(&mut status).await?;
        if status != *b"0\0" {
            return Err(MenuError::Admin(format!(
                "event subscription refused (status byte {})",
                status[0] as char
            )));
        }
        Ok(EventStream {
            stream,
            decoder: EventDecoder::new(),
        })
    }

    /// Next decoded frame, or `None` once the daemon closes the stream.
    pub async fn next_event(&mut self) -> Result<Option<RawEvent>, MenuError> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(event) = self.decoder.pop() {
                return Ok(Some(event));
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.push(&buf[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(parts: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in parts {
            out.extend_from_slice(p.as_bytes());
            out.push(0);
        }
        out.push(0);
        out
    }

    #[test]
    fn decodes_single_frame() {
        let mut dec = EventDecoder::new();
        dec.push(&frame(&["1", "work", "domain-start"]));
        let ev = dec.pop().unwrap();
        assert_eq!(ev.subject, "work");
        assert_eq!(ev.event, "domain-start");
        assert!(ev.fields.is_empty());
        assert!(dec.pop().is_none());
    }

    #[test]
    fn decodes_frame_split_across_reads() {
        let bytes = frame(&["1", "work", "domain-paused"]);
        let mut dec = EventDecoder::new();
        dec.push(&bytes[..5]);
        assert!(dec.pop().is_none());
        dec.push(&bytes[5..]);
        assert_eq!(dec.pop().unwrap().event, "domain-paused");
    }

    #[test]
    fn decodes_multiple_frames_from_one_read() {
        let mut bytes = frame(&["1", "a", "domain-start"]);
        bytes.extend(frame(&["1", "b", "domain-shutdown"]));
        let mut dec = EventDecoder::new();
        dec.push(&bytes);
        assert_eq!(dec.pop().unwrap().subject, "a");
        assert_eq!(dec.pop().unwrap().subject, "b");
        assert!(dec.pop().is_none());
    }

    #[test]
    fn keyword_fields_are_paired() {
        let mut dec = EventDecoder::new();
        dec.push(&frame(&[
            "1",
            "work",
            "domain-feature-set:menu-favorites",
            "feature",
            "menu-favorites",
            "value",
            "a b",
            "oldvalue",
            "a",
        ]));
        let ev = dec.pop().unwrap();
        assert_eq!(ev.field("value"), Some("a b"));
        assert_eq!(ev.field("oldvalue"), Some("a"));
        assert_eq!(ev.field("missing"), None);
    }

    #[test]
    fn bad_marker_is_discarded() {
        let mut dec = EventDecoder::new();
        dec.push(&frame(&["2", "work", "domain-start"]));
        assert!(dec.pop().is_none());
        dec.push(&frame(&["1", "work", "domain-start"]));
        assert!(dec.pop().is_some());
    }

    #[test]
    fn lifecycle_events_map_to_documented_states() {
        let table = [
            ("domain-pre-start", PowerState::Transient),
            ("domain-start", PowerState::Running),
            ("domain-start-failed", PowerState::Halted),
            ("domain-paused", PowerState::Paused),
            ("domain-unpaused", PowerState::Running),
            ("domain-shutdown", PowerState::Halted),
            ("domain-pre-shutdown", PowerState::Transient),
            ("domain-shutdown-failed", PowerState::Running),
        ];
        for (name, expected) in table {
            let ev = LifecycleEvent::from_name(name).unwrap();
            assert_eq!(ev.target_state(), expected, "{name}");
        }
    }

    #[test]
    fn decode_routes_domain_add_by_field() {
        let raw = RawEvent {
            subject: "dom0".into(),
            event: "domain-add".into(),
            fields: vec![("vm".into(), "new-vm".into())],
        };
        assert_eq!(
            AdminEvent::decode(raw),
            AdminEvent::DomainAdd { vm: "new-vm".into() }
        );
    }

    #[test]
    fn decode_routes_property_and_feature_events() {
        let raw = RawEvent {
            subject: "work".into(),
            event: "property-set:netvm".into(),
            fields: vec![("newvalue".into(), "sys-firewall".into())],
        };
        assert_eq!(
            AdminEvent::decode(raw),
            AdminEvent::PropertySet {
                vm: "work".into(),
                property: VmProperty::Netvm,
                newvalue: "sys-firewall".into(),
            }
        );

        let raw = RawEvent {
            subject: "work".into(),
            event: "domain-feature-delete:servicevm".into(),
            fields: vec![("feature".into(), "servicevm".into())],
        };
        assert_eq!(
            AdminEvent::decode(raw),
            AdminEvent::FeatureDelete {
                vm: "work".into(),
                feature: VmFeature::ServiceVm,
            }
        );
    }

    #[test]
    fn unhandled_events_decode_to_other() {
        let raw = RawEvent {
            subject: "".into(),
            event: "connection-established".into(),
            fields: vec![],
        };
        match AdminEvent::decode(raw) {
            AdminEvent::Other { event, .. } => {
                assert_eq!(event, "connection-established")
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
