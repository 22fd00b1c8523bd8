//! USB transport over a CCID-class reader.
//!
//! Resolves the smart-card interface (class 0x0B) and its bulk endpoint
//! pair on an injected or discovered USB device, claims the interface,
//! and drives the card through [`CcidTransceiver`].

use std::sync::Arc;
use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};

use crate::adapters::ccid::descriptor::CcidDescription;
use crate::adapters::ccid::transceiver::{BulkTransfer, CcidTransceiver};
use crate::adapters::transport::Transport;
use crate::infra::config::TokenConfig;
use crate::infra::error::{TokenError, TokenResult};

/// USB class code for smart-card (CCID) interfaces.
const CLASS_SMART_CARD: u8 = 0x0B;

/// Resolved CCID interface topology on one device.
#[derive(Debug, Clone)]
struct CcidInterface {
    interface_number: u8,
    endpoint_in: u8,
    endpoint_out: u8,
    max_packet_out: usize,
    description: CcidDescription,
}

/// Shared-handle wrapper giving the transceiver bulk access while the
/// transport keeps the handle for interface management.
#[derive(Clone)]
struct UsbBulkDevice {
    handle: Arc<DeviceHandle<Context>>,
}

impl BulkTransfer for UsbBulkDevice {
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> TokenResult<usize> {
        Ok(self.handle.write_bulk(endpoint, data, timeout)?)
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> TokenResult<usize> {
        Ok(self.handle.read_bulk(endpoint, buf, timeout)?)
    }
}

/// Transport over a USB CCID reader.
///
/// Lives for the duration of one physical connection; a detached device
/// requires a fresh instance.
pub struct UsbTransport {
    handle: Arc<DeviceHandle<Context>>,
    interface: CcidInterface,
    transceiver: Option<CcidTransceiver<UsbBulkDevice>>,
    interface_claimed: bool,
    atr: Vec<u8>,
    transfer_timeout: Duration,
    power_timeout: Duration,
}

impl UsbTransport {
    /// Wrap an already-opened device handle supplied by the platform
    /// layer.
    ///
    /// # Errors
    ///
    /// Fails when the device carries no CCID-class interface with a bulk
    /// endpoint pair.
    pub fn new(handle: DeviceHandle<Context>) -> TokenResult<Self> {
        let interface = resolve_ccid_interface(&handle.device())?;
        Ok(Self {
            handle: Arc::new(handle),
            interface,
            transceiver: None,
            interface_claimed: false,
            atr: Vec::new(),
            transfer_timeout: Duration::from_secs(TokenConfig::default().usb_timeout_seconds),
            power_timeout: Duration::from_secs(TokenConfig::default().power_on_timeout_seconds),
        })
    }

    /// Open the first USB device exposing a CCID interface.
    ///
    /// # Errors
    ///
    /// Returns error if no reader is present or USB enumeration fails.
    pub fn open_first() -> TokenResult<Self> {
        let context = Context::new()
            .map_err(|e| TokenError::UsbError(format!("failed to create USB context: {e}")))?;

        let devices = context
            .devices()
            .map_err(|e| TokenError::UsbError(format!("failed to enumerate USB devices: {e}")))?;

        for device in devices.iter() {
            if resolve_ccid_interface(&device).is_err() {
                continue;
            }

            let descriptor = device.device_descriptor().map_err(|e| {
                TokenError::UsbError(format!("failed to read device descriptor: {e}"))
            })?;
            log::debug!(
                "found CCID reader: VID={:04x} PID={:04x}",
                descriptor.vendor_id(),
                descriptor.product_id()
            );

            let handle = device
                .open()
                .map_err(|e| TokenError::UsbError(format!("failed to open USB device: {e}")))?;
            return Self::new(handle);
        }

        Err(TokenError::UsbError(
            "no USB smart-card reader found".to_string(),
        ))
    }

    /// Apply configured timeouts before connecting.
    pub fn with_config(mut self, config: &TokenConfig) -> Self {
        self.transfer_timeout = Duration::from_secs(config.usb_timeout_seconds);
        self.power_timeout = Duration::from_secs(config.power_on_timeout_seconds);
        self
    }

    /// The ATR returned at power-on. Empty before `connect`.
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }
}

impl Transport for UsbTransport {
    fn connect(&mut self) -> TokenResult<()> {
        let interface_number = self.interface.interface_number;

        #[cfg(target_os = "linux")]
        {
            if self
                .handle
                .kernel_driver_active(interface_number)
                .unwrap_or(false)
            {
                self.handle
                    .detach_kernel_driver(interface_number)
                    .map_err(|e| {
                        TokenError::UsbError(format!("failed to detach kernel driver: {e}"))
                    })?;
            }
        }

        self.handle.claim_interface(interface_number).map_err(|e| {
            TokenError::UsbError(format!("failed to claim USB interface: {e}"))
        })?;
        self.interface_claimed = true;

        let mut transceiver = CcidTransceiver::new(
            UsbBulkDevice {
                handle: Arc::clone(&self.handle),
            },
            self.interface.endpoint_in,
            self.interface.endpoint_out,
            self.interface.max_packet_out,
            self.interface.description.clone(),
        )
        .with_timeouts(self.transfer_timeout, self.power_timeout);

        self.atr = transceiver.icc_power_on()?;
        self.transceiver = Some(transceiver);

        log::info!(
            "USB transport connected, interface {interface_number}, ATR {} bytes",
            self.atr.len()
        );
        Ok(())
    }

    fn send_and_receive(&mut self, data: &[u8]) -> TokenResult<Vec<u8>> {
        let transceiver = self
            .transceiver
            .as_mut()
            .ok_or_else(|| TokenError::IoError("USB transport is not connected".to_string()))?;

        let block = transceiver.send_xfr_block(data)?;
        Ok(block.data)
    }

    fn release(&mut self) {
        if let Some(mut transceiver) = self.transceiver.take() {
            let _ = transceiver.icc_power_off();
        }
        if self.interface_claimed {
            let _ = self.handle.release_interface(self.interface.interface_number);
            self.interface_claimed = false;
        }
        self.atr.clear();
    }

    fn is_connected(&self) -> bool {
        self.transceiver.is_some()
    }

    fn allow_persistent_connection(&self) -> bool {
        true
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.release();
    }
}

/// Locate the smart-card interface and its bulk endpoints.
fn resolve_ccid_interface(device: &Device<Context>) -> TokenResult<CcidInterface> {
    let config = device.active_config_descriptor().map_err(|e| {
        TokenError::UsbError(format!("failed to read config descriptor: {e}"))
    })?;

    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            if descriptor.class_code() != CLASS_SMART_CARD {
                continue;
            }

            let mut endpoint_in = None;
            let mut endpoint_out = None;
            let mut max_packet_out = 64usize;

            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() == rusb::TransferType::Bulk {
                    if endpoint.direction() == rusb::Direction::In {
                        endpoint_in = Some(endpoint.address());
                    } else {
                        endpoint_out = Some(endpoint.address());
                        max_packet_out = endpoint.max_packet_size() as usize;
                    }
                }
            }

            if let (Some(endpoint_in), Some(endpoint_out)) = (endpoint_in, endpoint_out) {
                let description = CcidDescription::from_extra_descriptors(descriptor.extra())
                    .unwrap_or_else(|| {
                        log::warn!("reader has no parseable CCID descriptor, using defaults");
                        CcidDescription::permissive_default()
                    });

                log::debug!(
                    "CCID interface {}: IN=0x{endpoint_in:02x} OUT=0x{endpoint_out:02x} maxPacket={max_packet_out}",
                    descriptor.interface_number()
                );

                return Ok(CcidInterface {
                    interface_number: descriptor.interface_number(),
                    endpoint_in,
                    endpoint_out,
                    max_packet_out,
                    description,
                });
            }
        }
    }

    Err(TokenError::UsbError(
        "device has no CCID interface with bulk endpoints".to_string(),
    ))
}
