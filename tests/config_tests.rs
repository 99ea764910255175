//! Integration tests for Figment configuration loading

use nikon_rfa::config::{FlowControl, Parity, RfaConfig};
use nikon_rfa::transport::PortSelector;
use nikon_rfa::RfaError;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_from_file() {
    let file = write_config(
        r#"
[connection]
port = "/dev/ttyUSB3"
timeout_ms = 500

[serial]
baud_rate = 19200
parity = "even"
flow_control = "hardware"
"#,
    );

    let config = RfaConfig::load_from(file.path()).unwrap();
    assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB3"));
    assert_eq!(config.connection.timeout_ms, 500);
    assert_eq!(config.connection.terminator, b'\r');
    assert_eq!(config.serial.baud_rate, 19200);
    assert_eq!(config.serial.data_bits, 8);
    assert_eq!(config.serial.parity, Parity::Even);
    assert_eq!(config.serial.flow_control, FlowControl::Hardware);
}

#[test]
#[serial]
fn test_usb_ids_from_file() {
    let file = write_config(
        r#"
[connection]
vendor_id = 6790
product_id = 29987
"#,
    );

    let config = RfaConfig::load_from(file.path()).unwrap();
    assert_eq!(
        config.connection.selector().unwrap(),
        PortSelector::UsbId {
            vendor_id: 6790,
            product_id: 29987
        }
    );
}

#[test]
#[serial]
fn test_missing_connection_is_rejected() {
    let file = write_config("[serial]\nbaud_rate = 9600\n");
    assert!(matches!(
        RfaConfig::load_from(file.path()),
        Err(RfaError::Configuration(_))
    ));
}

#[test]
#[serial]
fn test_bad_value_type_is_load_error() {
    let file = write_config("[serial]\nparity = \"sideways\"\n");
    assert!(matches!(
        RfaConfig::load_from(file.path()),
        Err(RfaError::ConfigLoad(_))
    ));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
[connection]
port = "/dev/ttyUSB0"
timeout_ms = 2000
"#,
    );

    std::env::set_var("RFA_CONNECTION__PORT", "/dev/ttyACM1");
    std::env::set_var("RFA_CONNECTION__TIMEOUT_MS", "250");
    let result = RfaConfig::load_from(file.path());
    std::env::remove_var("RFA_CONNECTION__PORT");
    std::env::remove_var("RFA_CONNECTION__TIMEOUT_MS");

    let config = result.unwrap();
    assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyACM1"));
    assert_eq!(config.connection.timeout_ms, 250);
}

#[test]
#[serial]
fn test_shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/rfa.toml");
    let config = RfaConfig::load_from(path).unwrap();
    assert_eq!(config.connection.vendor_id, Some(6790));
    assert_eq!(config.serial.baud_rate, 9600);
}
