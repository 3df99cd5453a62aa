// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2022-2023 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Mikaela Szekely <mikaela.szekely@qyriad.me>
// SPDX-FileContributor: Modified by Rachel Mant <git@dragonmux.network>
use std::thread;
use std::cell::{RefCell, Ref};
use std::time::{Duration, Instant};
use std::fmt::{self, Display, Formatter};

use log::{trace, debug, info, warn, error};
use nusb::DeviceInfo;
use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient};

use crate::error::{Error, ErrorKind};
use crate::usb::{DfuFunctionalDescriptor, InterfaceClass, InterfaceSubClass, GenericDescriptorRef, DfuRequest};
use crate::usb::{Vid, Pid, PortId, DfuOperatingMode};
use crate::serial::bmd_rsp::BmdRspInterface;
use crate::serial::interface::ProbeInterface;

/// Semantically represents a Black Magic Probe USB device.
#[derive(Debug)]
pub struct BmpDevice
{
    device_info: DeviceInfo,
    handle: RefCell<Option<nusb::Device>>,

    /// The operating mode (application or DFU) the BMP is currently in.
    mode: DfuOperatingMode,

    /// The platform this BMP is running on.
    platform: BmpPlatform,
}

impl PartialEq for BmpDevice
{
    fn eq(&self, other: &Self) -> bool
    {
        self.device_info.bus_number() == other.device_info.bus_number() &&
            self.device_info.device_address() == other.device_info.device_address()
    }
}
impl Eq for BmpDevice {}

impl BmpDevice
{
    pub fn from_usb_device(device_info: DeviceInfo) -> Result<Self, Error>
    {
        let (vid, pid) = (Vid(device_info.vendor_id()), Pid(device_info.product_id()));
        let (platform, mode) = BmpPlatform::from_vid_pid(vid, pid).ok_or_else(|| {
            warn!("Device passed to BmpDevice::from_usb_device() does not seem to be a BMP device!");
            warn!("The logic for finding this device is probably incorrect!");
            ErrorKind::DeviceNotFound.error()
        })?;

        Ok(Self {
            device_info,
            mode,
            platform,
            handle: RefCell::new(None),
        })
    }

    /// Get the [`nusb::DeviceInfo`] associated with the connected Black Magic Probe.
    pub fn device_info(&self) -> &DeviceInfo
    {
        &self.device_info
    }

    /// Get an open [`nusb::Device`] handle for the connected Black Magic Probe, opening and
    /// caching it on first use.
    pub fn handle(&self) -> Result<Ref<nusb::Device>, Error>
    {
        if self.handle.borrow().is_none() {
            let device = self.device_info.open().map_err(std::io::Error::other)?;
            *self.handle.borrow_mut() = Some(device);
        }

        let handle = self.handle.borrow();
        Ok(Ref::map(handle, |h| h.as_ref().expect("Unreachable: self.handle is None")))
    }

    pub fn operating_mode(&self) -> DfuOperatingMode
    {
        self.mode
    }

    pub fn platform(&self) -> BmpPlatform
    {
        self.platform
    }

    /// Returns the serial number string for this device, as reported by the OS at enumeration
    /// time (no additional USB IO is required to retrieve it).
    pub fn serial_number(&self) -> Result<&str, Error>
    {
        self.device_info.serial_number().ok_or_else(|| {
            ErrorKind::DeviceSeemsInvalid(String::from("no serial number string descriptor")).error()
        })
    }

    /// Returns this device's location on the host's USB topology.
    pub fn port(&self) -> PortId
    {
        PortId::new(&self.device_info)
    }

    /// Return a string suitable for display to the user.
    pub fn display(&self) -> Result<String, Error>
    {
        let product_string = self.device_info.product_string().ok_or_else(|| {
            ErrorKind::DeviceSeemsInvalid(String::from("no product string descriptor")).error()
        })?;

        let serial = self.serial_number()?;

        Ok(format!("{}\n  Serial: {}\n  Port:  {}", product_string, serial, self.port()))
    }

    /// Parses this device's USB product string into a structured firmware identity, per the
    /// `Black Magic Probe [(variant)] [version]` convention used by BMD firmware builds.
    pub fn firmware_identity(&self) -> color_eyre::Result<crate::probe_identity::ProbeIdentity>
    {
        let product_string = self.device_info.product_string().ok_or_else(|| {
            color_eyre::eyre::eyre!("Device has no product string descriptor")
        })?;

        crate::probe_identity::ProbeIdentity::try_from(product_string)
    }

    /// Opens the remote serial protocol interface for this probe's GDB serial port.
    pub fn bmd_serial_interface(self) -> color_eyre::Result<BmdRspInterface>
    {
        ProbeInterface::from_device(self)?.bmd_interface()
    }

    /// Find and return the DFU functional descriptor and its interface number for the connected Black Magic Probe device.
    ///
    /// This does not execute any requests to the device, and only uses information already
    /// available from the OS-cached configuration descriptor.
    pub fn dfu_descriptors(&self) -> Result<(u8, DfuFunctionalDescriptor), Error>
    {
        let handle = self.handle()?;
        let configuration = handle.active_configuration().map_err(std::io::Error::other)?;

        let dfu_interface = configuration
            .interface_alt_settings()
            .find(|alt| {
                alt.class() == InterfaceClass::APPLICATION_SPECIFIC.0 &&
                    alt.subclass() == InterfaceSubClass::DFU.0
            })
            .ok_or_else(|| ErrorKind::DeviceSeemsInvalid(String::from("no DFU interfaces")).error())?;

        let interface_number = dfu_interface.interface_number();

        // Get the data for all the "extra" descriptors that follow the interface descriptor.
        let extra_bytes: Vec<u8> = dfu_interface.descriptors().flat_map(|d| d.as_bytes().to_vec()).collect();
        let extra_descriptors: Vec<_> = GenericDescriptorRef::multiple_from_bytes(&extra_bytes);

        let dfu_func_desc_bytes: &[u8; DfuFunctionalDescriptor::LENGTH as usize] = extra_descriptors
            .into_iter()
            .find(|descriptor| descriptor.descriptor_type() == DfuFunctionalDescriptor::TYPE)
            .expect("DFU interface does not have a DFU functional descriptor! This shouldn't be possible!")
            .raw[0..DfuFunctionalDescriptor::LENGTH as usize]
            .try_into()
            .unwrap();

        let dfu_func_desc = DfuFunctionalDescriptor::copy_from_bytes(dfu_func_desc_bytes)
            .map_err(|source| {
                ErrorKind::DeviceSeemsInvalid(String::from("DFU functional descriptor"))
                    .error_from(source)
            })?;

        Ok((interface_number, dfu_func_desc))
    }

    /// Requests the device to leave DFU mode, using the DefuSe extensions.
    fn leave_dfu_mode(&self) -> Result<(), Error>
    {
        debug!("Attempting to leave DFU mode...");
        let (iface_number, _func_desc) = self.dfu_descriptors()?;
        let interface = self.handle()?.claim_interface(iface_number).map_err(std::io::Error::other)?;

        // Perform the zero-length DFU_DNLOAD request.
        interface.control_out_blocking(
            ControlOut {
                control_type: ControlType::Class,
                recipient: Recipient::Interface,
                request: DfuRequest::Dnload as u8,
                value: 0,
                index: iface_number as u16,
                data: &[],
            },
            Duration::from_secs(2),
        ).map_err(std::io::Error::other)?;

        // Then perform a DFU_GETSTATUS request to complete the leave "request".
        let mut buf = [0u8; 6];
        interface.control_in_blocking(
            ControlIn {
                control_type: ControlType::Class,
                recipient: Recipient::Interface,
                request: DfuRequest::GetStatus as u8,
                value: 0,
                index: iface_number as u16,
                length: buf.len() as u16,
            },
            &mut buf,
            Duration::from_secs(2),
        ).map_err(std::io::Error::other)?;

        trace!("Device status after zero-length DNLOAD is 0x{:02x}", buf[0]);
        info!("DFU_GETSTATUS request completed. Device should now re-enumerate into runtime mode.");

        Ok(())
    }

    /// Performs a DFU_DETACH request to enter DFU mode.
    fn enter_dfu_mode(&self) -> Result<(), Error>
    {
        let (iface_number, func_desc) = self.dfu_descriptors()?;
        let interface = self.handle()?.claim_interface(iface_number).map_err(std::io::Error::other)?;

        interface.control_out_blocking(
            ControlOut {
                control_type: ControlType::Class,
                recipient: Recipient::Interface,
                request: DfuRequest::Detach as u8,
                value: func_desc.wDetachTimeOut,
                index: iface_number as u16,
                data: &[],
            },
            Duration::from_secs(1),
        ).map_err(std::io::Error::other)?;

        info!("DFU_DETACH request completed. Device should now re-enumerate into DFU mode.");

        Ok(())
    }

    /// Requests the Black Magic Probe device to detach, switching from DFU mode to runtime mode or vice versa.
    /// You probably want [`detach_and_enumerate`] or [`detach_and_destroy`].
    ///
    /// This function does not re-enumerate the device and re-initialize this structure, and thus after
    /// calling this function, this [`BmpDevice`] instance will not be in a correct state
    /// if the device successfully detached.
    fn request_detach(&self) -> Result<(), Error>
    {
        use DfuOperatingMode::*;
        match self.mode {
            Runtime => self.enter_dfu_mode(),
            FirmwareUpgrade => self.leave_dfu_mode(),
        }
    }

    /// Requests the Black Magic Probe to detach, and re-initializes this struct with the new
    /// device.
    pub fn detach_and_enumerate(&mut self) -> Result<(), Error>
    {
        // Save the port for finding the device again after.
        let port = self.port();

        self.request_detach()?;

        // Now drop the handle so the OS doesn't hold the device open underneath us.
        drop(self.handle.take());

        // TODO: make this sleep() timeout configurable?
        thread::sleep(Duration::from_millis(500));

        // Now try to find the device again on that same port.
        let dev = wait_for_probe_reboot(&port, Duration::from_secs(5), "reboot")?;

        // If we've made it here, then we have successfully re-found the device.
        // Re-initialize this structure from the new data.
        *self = dev;

        Ok(())
    }

    /// Detach the Black Magic Probe device, consuming the structure.
    ///
    /// Currently there is not a way to recover this instance if this function errors.
    /// You'll just have to create another one.
    pub fn detach_and_destroy(self) -> Result<(), Error>
    {
        self.request_detach()
    }
}

impl Display for BmpDevice
{
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error>
    {
        let display_str = match self.display() {
            Ok(s) => s,
            Err(e) => {
                // Display impls are only supposed to propagate formatter IO errors, e.g.
                // from the write!() call below, not internal errors.
                // https://doc.rust-lang.org/stable/std/fmt/index.html#formatting-traits.
                error!("Error formatting BlackMagicProbeDevice: {}", e);
                String::from("Unknown Black Magic Probe (error occurred fetching device details)")
            }
        };

        write!(f, "{}", display_str)?;

        Ok(())
    }
}

/// Waits for a Black Magic Probe to reboot, erroring after a timeout.
///
/// This function takes a port path to attempt to keep track of a single physical device
/// across USB resets.
///
/// This would take a serial number, but serial numbers can actually change between firmware
/// versions, and thus also between application and bootloader mode, so serial number is not a
/// reliable way to keep track of a single device across USB resets.
pub fn wait_for_probe_reboot(port: &PortId, timeout: Duration, operation: &str) -> Result<BmpDevice, Error>
{
    use crate::bmp_matcher::BmpMatcher;

    let silence_timeout = timeout / 2;

    let matcher = BmpMatcher::new_with_port(port.clone());

    let start = Instant::now();

    let mut dev = matcher.find_matching_probes().pop_single_silent();

    while let Err(ErrorKind::DeviceNotFound) = &dev {

        trace!("Waiting for probe reboot: {} ms", Instant::now().duration_since(start).as_millis());

        // If it's been more than the timeout length, error out.
        if Instant::now().duration_since(start) > timeout {
            error!("Timed-out waiting for Black Magic Probe to re-enumerate!");
            return Err(ErrorKind::DeviceReboot.error());
        }

        // Wait 200 milliseconds between checks. Hardware is a bottleneck and we
        // don't need to peg the CPU waiting for it to come back up.
        thread::sleep(Duration::from_millis(200));

        // If we've been trying for over half the full timeout, start logging warnings.
        dev = if Instant::now().duration_since(start) > silence_timeout {
            matcher.find_matching_probes().pop_single(operation).map_err(ErrorKind::error)
        } else {
            matcher.find_matching_probes().pop_single_silent()
        };
    }

    dev.map_err(ErrorKind::error)
}


/// Represents the firmware in use on a device that's supported.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BmpPlatform
{
    /// Probes using the in-repo bootloader
    BlackMagicDebug,
    /// Probes using dragonBoot as an alternative bootloader
    DragonBoot,
    /// Probes using the STM32 built-in DFU bootloader
    STM32DeviceDFU,
}

impl BmpPlatform
{
    pub const BMD_RUNTIME_VID_PID: (Vid, Pid) = (Vid(0x1d50), Pid(0x6018));
    pub const BMD_DFU_VID_PID:     (Vid, Pid) = (Vid(0x1d50), Pid(0x6017));
    pub const DRAGON_BOOT_VID_PID: (Vid, Pid) = (Vid(0x1209), Pid(0xbadb));
    pub const STM32_DFU_VID_PID:   (Vid, Pid) = (Vid(0x0483), Pid(0xdf11));

    pub const fn from_vid_pid(vid: Vid, pid: Pid) -> Option<(Self, DfuOperatingMode)>
    {
        use BmpPlatform::*;
        use DfuOperatingMode::*;

        match (vid, pid) {
            Self::BMD_RUNTIME_VID_PID => Some((BlackMagicDebug, Runtime)),
            Self::BMD_DFU_VID_PID => Some((BlackMagicDebug, FirmwareUpgrade)),
            Self::DRAGON_BOOT_VID_PID => Some((DragonBoot, FirmwareUpgrade)),
            Self::STM32_DFU_VID_PID => Some((STM32DeviceDFU, FirmwareUpgrade)),
            _ => None,
        }
    }

    #[allow(dead_code)]
    pub const fn runtime_ids(self) -> (Vid, Pid)
    {
        Self::BMD_RUNTIME_VID_PID
    }

    #[allow(dead_code)]
    pub const fn dfu_ids(self) -> (Vid, Pid)
    {
        use BmpPlatform::*;

        match self {
            BlackMagicDebug => Self::BMD_DFU_VID_PID,
            DragonBoot => Self::DRAGON_BOOT_VID_PID,
            STM32DeviceDFU => Self::STM32_DFU_VID_PID,
        }
    }

    #[allow(dead_code)]
    pub const fn ids_for_mode(self, mode: DfuOperatingMode) -> (Vid, Pid)
    {
        use DfuOperatingMode::*;

        match mode {
            Runtime => self.runtime_ids(),
            FirmwareUpgrade => self.dfu_ids(),
        }
    }
}

/// Defaults to [`BmpPlatform::BlackMagicDebug`].
impl Default for BmpPlatform
{
    /// Defaults to [`BmpPlatform::BlackMagicDebug`].
    fn default() -> Self
    {
        BmpPlatform::BlackMagicDebug
    }
}
