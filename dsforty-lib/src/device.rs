use crate::channel::{DeviceChannel, ResetFuture};
use crate::constants::{ENDPOINT_IN, ENDPOINT_OUT, IN_BUF_SIZE, PID, VID};
use crate::error::{Error, TransportError, describe_reply};
use async_trait::async_trait;
use bytes::Bytes;
use nusb::{Device, Interface, transfer::RequestBuffer};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Default timeout for a single bulk transfer. Generous because the scanner
/// only answers an `IMG` request once the chunk has been digitised.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How to find and talk to the scanner on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub configuration: u8,
    pub endpoint_out: u8,
    pub endpoint_in: u8,
    pub read_buffer_size: usize,
    pub timeout: Duration,
    pub reset_before_claim: bool,
}

impl DeviceConfig {
    /// The Epson DS-40 on its vendor bulk interface.
    pub fn ds40() -> Self {
        Self {
            vendor_id: VID,
            product_id: PID,
            interface: 0,
            configuration: 1,
            endpoint_out: ENDPOINT_OUT,
            endpoint_in: ENDPOINT_IN,
            read_buffer_size: IN_BUF_SIZE,
            timeout: DEFAULT_TIMEOUT,
            reset_before_claim: false,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::ds40()
    }
}

/// A scanner found on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerInfo {
    pub bus: u8,
    pub address: u8,
    pub product: Option<String>,
    pub serial: Option<String>,
}

/// List every attached device matching `config`'s VID/PID.
pub fn list_scanners(config: &DeviceConfig) -> Result<Vec<ScannerInfo>, Error> {
    let scanners = nusb::list_devices()?
        .filter(|d| d.vendor_id() == config.vendor_id && d.product_id() == config.product_id)
        .map(|d| ScannerInfo {
            bus: d.bus_number(),
            address: d.device_address(),
            product: d.product_string().map(str::to_owned),
            serial: d.serial_number().map(str::to_owned),
        })
        .collect();
    Ok(scanners)
}

/// Bulk-endpoint connection to a DS-40.
pub struct UsbChannel {
    device: Device,
    interface: Option<Interface>,
    config: DeviceConfig,
}

impl UsbChannel {
    /// Find the first matching scanner, select its configuration and claim the interface.
    pub async fn open(config: &DeviceConfig) -> Result<Self, Error> {
        info!("Searching for Epson DS-40...");
        let device_info = nusb::list_devices()?
            .find(|d| d.vendor_id() == config.vendor_id && d.product_id() == config.product_id)
            .ok_or(Error::DeviceNotFound)?;

        info!(
            "Found device on bus {} addr {}",
            device_info.bus_number(),
            device_info.device_address()
        );

        let device = device_info.open()?;
        if config.reset_before_claim {
            info!("Performing USB device reset...");
            device.reset()?;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        device.set_configuration(config.configuration)?;
        let interface = device.detach_and_claim_interface(config.interface)?;
        info!("Interface claimed successfully.");

        Ok(Self {
            device,
            interface: Some(interface),
            config: *config,
        })
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface.as_ref().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl DeviceChannel for UsbChannel {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        debug!(len = data.len(), bytes = %describe_reply(data), "USB Write");
        let transfer = self.interface()?.bulk_out(self.config.endpoint_out, data.to_vec());
        let completion = timeout(self.config.timeout, transfer)
            .await
            .map_err(|_| TransportError::Timeout(self.config.timeout))?;
        completion.into_result()?;
        Ok(())
    }

    async fn read(&mut self) -> Result<Bytes, TransportError> {
        let transfer = self
            .interface()?
            .bulk_in(self.config.endpoint_in, RequestBuffer::new(self.config.read_buffer_size));
        let completion = timeout(self.config.timeout, transfer)
            .await
            .map_err(|_| TransportError::Timeout(self.config.timeout))?;
        let data = completion.into_result()?;
        debug!(len = data.len(), bytes = %describe_reply(&data), "USB Read");
        Ok(Bytes::from(data))
    }

    async fn reset(&mut self) -> Result<(), TransportError> {
        self.detached_reset().await
    }

    fn detached_reset(&self) -> ResetFuture {
        let device = self.device.clone();
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || device.reset()).await {
                Ok(result) => result.map_err(TransportError::Usb),
                // Surface a panic on the awaiting task instead of turning it into an error.
                Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
                Err(_) => Err(TransportError::Closed),
            }
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.interface.take().is_some() {
            info!("Released DS-40 interface.");
        }
        Ok(())
    }
}
