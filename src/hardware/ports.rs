use crate::error::{PlayerError, Result};
use crate::hardware::mock::{list_virtual_ports, NullSink};
use crate::hardware::serial_midi::{list_serial_ports, SerialMidiSink};
use crate::hardware::sink::{shared, PortInfo, PortType, SharedSink};
use tracing::info;

/// All output ports currently available
pub fn list_ports(include_virtual: bool) -> Vec<PortInfo> {
    let mut ports = list_serial_ports();
    if include_virtual {
        ports.extend(list_virtual_ports());
    }
    ports
}

/// Pick the port called `name`, or the first one when no name is given
///
/// An empty port list is [`PlayerError::NoTransports`]; a name that matches
/// nothing is [`PlayerError::InvalidTransport`].
pub fn select_port<'a>(ports: &'a [PortInfo], name: Option<&str>) -> Result<&'a PortInfo> {
    let first = ports.first().ok_or(PlayerError::NoTransports)?;

    match name {
        Some(name) => ports
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| PlayerError::InvalidTransport(name.to_string())),
        None => {
            info!("No output named, defaulting to {}", first.name);
            Ok(first)
        }
    }
}

/// Open the sink behind a port
pub fn open_sink(port: &PortInfo, baud_rate: u32) -> Result<SharedSink> {
    match port.port_type {
        PortType::Serial => Ok(shared(SerialMidiSink::open(&port.name, baud_rate)?)),
        PortType::Virtual => Ok(shared(NullSink::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            port_type: PortType::Serial,
            description: None,
        }
    }

    #[test]
    fn test_no_ports() {
        assert!(matches!(select_port(&[], None), Err(PlayerError::NoTransports)));
        assert!(matches!(select_port(&[], Some("/dev/ttyUSB0")), Err(PlayerError::NoTransports)));
    }

    #[test]
    fn test_named_port() {
        let ports = vec![port("/dev/ttyUSB0"), port("/dev/ttyAMA0")];
        assert_eq!(select_port(&ports, Some("/dev/ttyAMA0")).unwrap().name, "/dev/ttyAMA0");
        match select_port(&ports, Some("/dev/ttyS9")) {
            Err(PlayerError::InvalidTransport(name)) => assert_eq!(name, "/dev/ttyS9"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_default_is_first() {
        let ports = vec![port("/dev/ttyUSB0"), port("/dev/ttyAMA0")];
        assert_eq!(select_port(&ports, None).unwrap().name, "/dev/ttyUSB0");
    }

    #[tokio::test]
    async fn test_virtual_port_opens_null_sink() {
        let ports = list_virtual_ports();
        let sink = open_sink(&ports[0], 31_250).unwrap();
        let mut sink = sink.lock().await;
        assert_eq!(sink.name(), "null");
        sink.send(&[0x90, 60, 1]).await.unwrap();
    }
}
