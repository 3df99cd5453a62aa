// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::eyre::{Report, Result, eyre};
use log::{debug, warn};

use crate::serial::bmd_rsp::BmdRspInterface;
use crate::serial::remote::adi::{self, AdiV5AccessPort, AdiV5DebugPort};
use crate::serial::remote::protocol_v3::RemoteV3;
use crate::serial::remote::riscv_debug::{RiscvDebugVersion, RiscvDmi};
use crate::serial::remote::{
	Acceleration, Align, BmdAdiV5Protocol, BmdJtagProtocol, BmdRemoteProtocol, BmdRiscvProtocol, BmdSwdProtocol,
	JtagDev, REMOTE_MAX_MSG_SIZE, REMOTE_RESP_NOTSUP, REMOTE_RESP_OK, REMOTE_WRITE_OVERHEAD_V4_ADIV5,
	REMOTE_WRITE_OVERHEAD_V4_ADIV6, RemoteError, TargetAddr64, TargetArchitecture, TargetFamily, check_response,
	decode_response, hexify, unhexify,
};

pub struct RemoteV4
{
	/// We're a superset of the v3 protocol, this is an instance of that version of the protocol so we
	/// can access the unchanged machinary from it such as the SWD and JTAG low-level protocol components.
	/// This version of the protocol defines new high-level protocol components and support commands only.
	inner_protocol: RemoteV3,
	/// Bitmask of the accelerations supported by this probe
	accelerations: Acceleration,
}

pub struct RemoteV4ADIv5
{
	interface: Arc<Mutex<BmdRspInterface>>,
}

pub struct RemoteV4ADIv6
{
	interface: Arc<Mutex<BmdRspInterface>>,
}

pub struct RemoteV4RiscvJtag
{
	interface: Arc<Mutex<BmdRspInterface>>,
}

/// This command asks the probe what high-level protocol accelerations it supports
const REMOTE_HL_ACCEL: &str = "!HA#";
/// This command asks the probe what target architectures the firmware build supports
const REMOTE_HL_ARCHS: &str = "!Ha#";
/// This command asks the probe what target families the firmware build supports
const REMOTE_HL_FAMILIES: &str = "!HF#";
/// Selects the SWD protocol version to run the multidrop line reset/select sequence with
const REMOTE_SWD_VERSION: &str = "AV";
/// Performs a DPv2+ SWD multidrop TARGETSEL write ahead of DP init
const REMOTE_SWD_TARGETSEL: &str = "AT";

const REMOTE_ADIV5_RAW_ACCESS: &str = "Al";
const REMOTE_ADIV5_DP_READ: &str = "Ad";
const REMOTE_ADIV5_AP_READ: &str = "Aa";
const REMOTE_ADIV5_AP_WRITE: &str = "AA";
const REMOTE_ADIV5_MEM_READ: &str = "Am";
const REMOTE_ADIV5_MEM_WRITE: &str = "AM";

const REMOTE_ADIV6_RAW_ACCESS: &str = "Bl";
const REMOTE_ADIV6_DP_READ: &str = "Bd";
const REMOTE_ADIV6_AP_READ: &str = "Ba";
const REMOTE_ADIV6_AP_WRITE: &str = "BA";
const REMOTE_ADIV6_MEM_READ: &str = "Bm";
const REMOTE_ADIV6_MEM_WRITE: &str = "BM";

const REMOTE_RISCV_DMI_READ: &str = "Dr";
const REMOTE_RISCV_DMI_WRITE: &str = "Dw";

impl TryFrom<Arc<Mutex<BmdRspInterface>>> for RemoteV4
{
	type Error = Report;

	fn try_from(interface: Arc<Mutex<BmdRspInterface>>) -> Result<Self>
	{
		Self::new(interface)
	}
}

impl RemoteV4
{
	pub(crate) fn new(interface: Arc<Mutex<BmdRspInterface>>) -> Result<Self>
	{
		// Before we can create an instance of the remote protocol structure, we first need to ask
		// the probe about supported accelerations as this determines the results of asking for the
		// high-level accelerations below. Start by firing off the request to the probe
		let mut iface = interface.lock().unwrap();
		iface.buffer_write(REMOTE_HL_ACCEL)?;
		// Read back the result and relinquish our comms lock so structure creation can work
		let buffer = iface.buffer_read()?;
		drop(iface);
		// Check for communication failures
		if buffer.is_empty() || buffer.as_bytes()[0] != REMOTE_RESP_OK {
			return Err(eyre!(
				"Error talking with probe, expected OK response to supported accelerations query, got {:?}",
				buffer
			));
		}
		// Decode the response and translate the supported accelerations bitmask to our internal
		// enumeration of accelerations
		let accelerations = Acceleration::from(decode_response(&buffer[1..], 8));
		debug!("Probe supports the following accelerations: {}", accelerations);

		Ok(Self {
			inner_protocol: RemoteV3::new(interface),
			accelerations,
		})
	}

	pub(crate) fn interface(&self) -> MutexGuard<'_, BmdRspInterface>
	{
		self.inner_protocol.interface()
	}

	pub(crate) fn clone_interface(&self) -> Arc<Mutex<BmdRspInterface>>
	{
		self.inner_protocol.clone_interface()
	}

	/// Runs the DPv2+ SWD multidrop select sequence (spec.md §4.3.6): select the SWD protocol
	/// version to use for the line reset, then write TARGETSEL so the correct drop on the bus
	/// answers. Must be completed before any DP register access is attempted against `targetsel`.
	pub fn swd_multidrop_select(&self, version: u8, targetsel: u32) -> Result<()>
	{
		self.interface().buffer_write(&format!("!{REMOTE_SWD_VERSION}{version:02x}#"))?;
		let buffer = self.interface().buffer_read()?;
		if buffer.is_empty() || buffer.as_bytes()[0] != REMOTE_RESP_OK {
			return Err(eyre!("SWD multidrop version select failed"));
		}

		self.interface().buffer_write(&format!("!{REMOTE_SWD_TARGETSEL}{targetsel:08x}#"))?;
		let buffer = self.interface().buffer_read()?;
		if buffer.is_empty() || buffer.as_bytes()[0] != REMOTE_RESP_OK {
			return Err(eyre!("SWD multidrop TARGETSEL select failed"));
		}
		Ok(())
	}
}

impl BmdRemoteProtocol for RemoteV4
{
	fn jtag_init(&self) -> Result<Box<dyn BmdJtagProtocol>>
	{
		self.inner_protocol.jtag_init()
	}

	fn swd_init(&self) -> Result<Box<dyn BmdSwdProtocol>>
	{
		self.inner_protocol.swd_init()
	}

	fn adiv5_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		if self.accelerations.contains(Acceleration::ADIv5) {
			Some(Arc::new(RemoteV4ADIv5::from(self.clone_interface())))
		} else {
			None
		}
	}

	fn adiv6_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		if self.accelerations.contains(Acceleration::ADIv6) {
			Some(Arc::new(RemoteV4ADIv6::from(self.clone_interface())))
		} else {
			None
		}
	}

	fn riscv_jtag_init(&self) -> Option<Arc<dyn BmdRiscvProtocol>>
	{
		if self.accelerations.contains(Acceleration::RiscV) {
			Some(Arc::new(RemoteV4RiscvJtag::from(self.clone_interface())))
		} else {
			None
		}
	}

	fn add_jtag_dev(&self, dev_index: u32, jtag_dev: &JtagDev)
	{
		self.inner_protocol.add_jtag_dev(dev_index, jtag_dev);
	}

	fn get_comms_frequency(&self) -> u32
	{
		self.inner_protocol.get_comms_frequency()
	}

	fn set_comms_frequency(&self, freq: u32) -> bool
	{
		self.inner_protocol.set_comms_frequency(freq)
	}

	fn target_clk_output_enable(&self, enable: bool)
	{
		self.inner_protocol.target_clk_output_enable(enable);
	}

	fn supported_architectures(&self) -> Result<Option<TargetArchitecture>>
	{
		// Send the request to the probe
		self.interface().buffer_write(REMOTE_HL_ARCHS)?;
		let buffer = self.interface().buffer_read()?;
		// Check too see if that failed for some reason
		if buffer.is_empty() || (buffer.as_bytes()[0] != REMOTE_RESP_OK && buffer.as_bytes()[0] != REMOTE_RESP_NOTSUP) {
			let message = if buffer.len() > 1 {
				&buffer[1..]
			} else {
				"unknown"
			};
			Err(eyre!("Supported architectures request failed, error {}", message))
		} else if buffer.as_bytes()[0] == REMOTE_RESP_NOTSUP {
			// If we get here, the probe talks v4 but doesn't know this command - meaning pre-v2.0.0 firmware
			// but post-v1.10.2. Ask the user to upgrade off development firmware onto the release or later.
			warn!("Please upgrade your firmware to allow checking supported target architectures to work properly");
			Ok(None)
		} else {
			// We got a good response, decode it and turn the value into a bitfield return
			let architectures = decode_response(&buffer[1..], 8);
			Ok(Some(architectures.into()))
		}
	}

	fn supported_families(&self) -> Result<Option<TargetFamily>>
	{
		// Send the request to the probe
		self.interface().buffer_write(REMOTE_HL_FAMILIES)?;
		let buffer = self.interface().buffer_read()?;
		// Check too see if that failed for some reason
		if buffer.is_empty() || (buffer.as_bytes()[0] != REMOTE_RESP_OK && buffer.as_bytes()[0] != REMOTE_RESP_NOTSUP) {
			let message = if buffer.len() > 1 {
				&buffer[1..]
			} else {
				"unknown"
			};
			Err(eyre!("Supported architectures request failed, error {}", message))
		} else if buffer.as_bytes()[0] == REMOTE_RESP_NOTSUP {
			// If we get here, the probe talks v4 but doesn't know this command - meaning pre-v2.0.0 firmware
			// but post-v1.10.2. Ask the user to upgrade off development firmware onto the release or later.
			warn!("Please upgrade your firmware to allow checking supported target families to work properly");
			Ok(None)
		} else {
			// We got a good response, decode it and turn the value into a bitfield return
			let families = decode_response(&buffer[1..], 8);
			Ok(Some(families.into()))
		}
	}

	fn get_target_power_state(&self) -> Result<bool>
	{
		self.inner_protocol.get_target_power_state()
	}
}

impl From<Arc<Mutex<BmdRspInterface>>> for RemoteV4ADIv5
{
	fn from(interface: Arc<Mutex<BmdRspInterface>>) -> Self
	{
		Self {
			interface,
		}
	}
}

impl RemoteV4ADIv5
{
	fn interface(&self) -> MutexGuard<'_, BmdRspInterface>
	{
		self.interface.lock().unwrap()
	}
}

/// v4's ADIv5 accelerator is otherwise identical to v3's. TARGETSEL for a DPv2+ multidrop SWD
/// bus is established once, out-of-band, via [RemoteV4::swd_multidrop_select] before DP init
/// (spec.md §4.3.6) — it is not threaded through every access here.
impl BmdAdiV5Protocol for RemoteV4ADIv5
{
	fn raw_access(&self, dp: &AdiV5DebugPort, rnw: u8, addr: u16, value: u32) -> Result<u32, RemoteError>
	{
		self.interface()
			.buffer_write(&format!(
				"!{REMOTE_ADIV5_RAW_ACCESS}{:02x}{rnw:02x}{addr:04x}{value:08x}#",
				dp.dev_index()
			))
			.map_err(|_| RemoteError::Communication)?;
		let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
		let payload = check_response(&buffer)?;
		Ok(decode_response(payload, 8) as u32)
	}

	fn dp_read(&self, dp: &AdiV5DebugPort, addr: u16) -> Result<u32, RemoteError>
	{
		self.interface()
			.buffer_write(&format!("!{REMOTE_ADIV5_DP_READ}{:02x}{addr:04x}#", dp.dev_index()))
			.map_err(|_| RemoteError::Communication)?;
		let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
		let payload = check_response(&buffer)?;
		Ok(decode_response(payload, 8) as u32)
	}

	fn ap_read(&self, ap: &AdiV5AccessPort, addr: u16) -> Result<u32, RemoteError>
	{
		self.interface()
			.buffer_write(&format!(
				"!{REMOTE_ADIV5_AP_READ}{:02x}{:02x}{addr:04x}#",
				ap.dp().dev_index(),
				ap.index()
			))
			.map_err(|_| RemoteError::Communication)?;
		let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
		let payload = check_response(&buffer)?;
		Ok(decode_response(payload, 8) as u32)
	}

	fn ap_write(&self, ap: &AdiV5AccessPort, addr: u16, value: u32) -> Result<(), RemoteError>
	{
		self.interface()
			.buffer_write(&format!(
				"!{REMOTE_ADIV5_AP_WRITE}{:02x}{:02x}{addr:04x}{value:08x}#",
				ap.dp().dev_index(),
				ap.index()
			))
			.map_err(|_| RemoteError::Communication)?;
		let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
		check_response(&buffer).map(|_| ())
	}

	fn mem_read(&self, ap: &AdiV5AccessPort, dest: &mut [u8], src: TargetAddr64) -> Result<(), RemoteError>
	{
		let block_size = adi::read_block_size(REMOTE_MAX_MSG_SIZE).max(1);
		let mut offset = 0;
		while offset < dest.len() {
			let count = block_size.min(dest.len() - offset);
			self.interface()
				.buffer_write(&format!(
					"!{REMOTE_ADIV5_MEM_READ}{:02x}{:02x}{:08x}{:016x}{count:08x}#",
					ap.dp().dev_index(),
					ap.index(),
					ap.csw(),
					src + offset as u64,
				))
				.map_err(|_| RemoteError::Communication)?;
			let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
			let payload = check_response(&buffer)?;
			let bytes = unhexify(payload);
			if bytes.len() < count {
				return Err(RemoteError::Communication);
			}
			dest[offset..offset + count].copy_from_slice(&bytes[..count]);
			offset += count;
		}
		Ok(())
	}

	fn mem_write(&self, ap: &AdiV5AccessPort, dest: TargetAddr64, src: &[u8], align: Align) -> Result<(), RemoteError>
	{
		let block_size =
			adi::write_block_size(REMOTE_MAX_MSG_SIZE, REMOTE_WRITE_OVERHEAD_V4_ADIV5, align).max(align.bytes());
		let mut offset = 0;
		while offset < src.len() {
			let count = block_size.min(src.len() - offset);
			let chunk = &src[offset..offset + count];
			self.interface()
				.buffer_write(&format!(
					"!{REMOTE_ADIV5_MEM_WRITE}{:02x}{:02x}{:08x}{:02x}{:016x}{count:08x}{}#",
					ap.dp().dev_index(),
					ap.index(),
					ap.csw(),
					align as u8,
					dest + offset as u64,
					hexify(chunk),
				))
				.map_err(|_| RemoteError::Communication)?;
			let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
			check_response(&buffer)?;
			offset += count;
		}
		Ok(())
	}
}

impl From<Arc<Mutex<BmdRspInterface>>> for RemoteV4ADIv6
{
	fn from(interface: Arc<Mutex<BmdRspInterface>>) -> Self
	{
		Self {
			interface,
		}
	}
}

impl RemoteV4ADIv6
{
	fn interface(&self) -> MutexGuard<'_, BmdRspInterface>
	{
		self.interface.lock().unwrap()
	}
}

/// ADIv6 replaces the 8-bit AP index with a full 64-bit AP base address on the DP resource bus
/// (spec.md §3), so every request here carries `ap.base()` in full instead of `ap.index()`.
impl BmdAdiV5Protocol for RemoteV4ADIv6
{
	fn raw_access(&self, dp: &AdiV5DebugPort, rnw: u8, addr: u16, value: u32) -> Result<u32, RemoteError>
	{
		self.interface()
			.buffer_write(&format!(
				"!{REMOTE_ADIV6_RAW_ACCESS}{:02x}{rnw:02x}{addr:04x}{value:08x}#",
				dp.dev_index()
			))
			.map_err(|_| RemoteError::Communication)?;
		let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
		let payload = check_response(&buffer)?;
		Ok(decode_response(payload, 8) as u32)
	}

	fn dp_read(&self, dp: &AdiV5DebugPort, addr: u16) -> Result<u32, RemoteError>
	{
		self.interface()
			.buffer_write(&format!("!{REMOTE_ADIV6_DP_READ}{:02x}{addr:04x}#", dp.dev_index()))
			.map_err(|_| RemoteError::Communication)?;
		let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
		let payload = check_response(&buffer)?;
		Ok(decode_response(payload, 8) as u32)
	}

	fn ap_read(&self, ap: &AdiV5AccessPort, addr: u16) -> Result<u32, RemoteError>
	{
		self.interface()
			.buffer_write(&format!(
				"!{REMOTE_ADIV6_AP_READ}{:02x}{:016x}{addr:04x}#",
				ap.dp().dev_index(),
				ap.base()
			))
			.map_err(|_| RemoteError::Communication)?;
		let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
		let payload = check_response(&buffer)?;
		Ok(decode_response(payload, 8) as u32)
	}

	fn ap_write(&self, ap: &AdiV5AccessPort, addr: u16, value: u32) -> Result<(), RemoteError>
	{
		self.interface()
			.buffer_write(&format!(
				"!{REMOTE_ADIV6_AP_WRITE}{:02x}{:016x}{addr:04x}{value:08x}#",
				ap.dp().dev_index(),
				ap.base()
			))
			.map_err(|_| RemoteError::Communication)?;
		let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
		check_response(&buffer).map(|_| ())
	}

	fn mem_read(&self, ap: &AdiV5AccessPort, dest: &mut [u8], src: TargetAddr64) -> Result<(), RemoteError>
	{
		let block_size = adi::read_block_size(REMOTE_MAX_MSG_SIZE).max(1);
		let mut offset = 0;
		while offset < dest.len() {
			let count = block_size.min(dest.len() - offset);
			self.interface()
				.buffer_write(&format!(
					"!{REMOTE_ADIV6_MEM_READ}{:02x}{:016x}{:08x}{:016x}{count:08x}#",
					ap.dp().dev_index(),
					ap.base(),
					ap.csw(),
					src + offset as u64,
				))
				.map_err(|_| RemoteError::Communication)?;
			let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
			let payload = check_response(&buffer)?;
			let bytes = unhexify(payload);
			if bytes.len() < count {
				return Err(RemoteError::Communication);
			}
			dest[offset..offset + count].copy_from_slice(&bytes[..count]);
			offset += count;
		}
		Ok(())
	}

	fn mem_write(&self, ap: &AdiV5AccessPort, dest: TargetAddr64, src: &[u8], align: Align) -> Result<(), RemoteError>
	{
		let block_size =
			adi::write_block_size(REMOTE_MAX_MSG_SIZE, REMOTE_WRITE_OVERHEAD_V4_ADIV6, align).max(align.bytes());
		let mut offset = 0;
		while offset < src.len() {
			let count = block_size.min(src.len() - offset);
			let chunk = &src[offset..offset + count];
			self.interface()
				.buffer_write(&format!(
					"!{REMOTE_ADIV6_MEM_WRITE}{:02x}{:016x}{:08x}{:02x}{:016x}{count:08x}{}#",
					ap.dp().dev_index(),
					ap.base(),
					ap.csw(),
					align as u8,
					dest + offset as u64,
					hexify(chunk),
				))
				.map_err(|_| RemoteError::Communication)?;
			let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
			check_response(&buffer)?;
			offset += count;
		}
		Ok(())
	}
}

impl From<Arc<Mutex<BmdRspInterface>>> for RemoteV4RiscvJtag
{
	fn from(interface: Arc<Mutex<BmdRspInterface>>) -> Self
	{
		Self {
			interface,
		}
	}
}

impl RemoteV4RiscvJtag
{
	fn interface(&self) -> MutexGuard<'_, BmdRspInterface>
	{
		self.interface.lock().unwrap()
	}
}

impl BmdRiscvProtocol for RemoteV4RiscvJtag
{
	fn dmi_read(&self, dmi: &RiscvDmi, address: u32) -> Result<Option<u32>, RemoteError>
	{
		self.interface()
			.buffer_write(&format!(
				"!{REMOTE_RISCV_DMI_READ}{:04x}{:02x}{:02x}{:02x}{:02x}{address:08x}#",
				dmi.designer_code(),
				dmi.version() as u8,
				dmi.dev_index(),
				dmi.idle_cycles(),
				dmi.address_width(),
			))
			.map_err(|_| RemoteError::Communication)?;
		let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
		if buffer.is_empty() {
			return Err(RemoteError::Communication);
		}
		if buffer.as_bytes()[0] == REMOTE_RESP_NOTSUP {
			return Ok(None);
		}
		let payload = check_response(&buffer)?;
		Ok(Some(decode_response(payload, 8) as u32))
	}

	fn dmi_write(&self, dmi: &RiscvDmi, address: u32, value: u32) -> Result<bool, RemoteError>
	{
		self.interface()
			.buffer_write(&format!(
				"!{REMOTE_RISCV_DMI_WRITE}{:04x}{:02x}{:02x}{:02x}{:02x}{address:08x}{value:08x}#",
				dmi.designer_code(),
				dmi.version() as u8,
				dmi.dev_index(),
				dmi.idle_cycles(),
				dmi.address_width(),
			))
			.map_err(|_| RemoteError::Communication)?;
		let buffer = self.interface().buffer_read().map_err(|_| RemoteError::Communication)?;
		if buffer.is_empty() {
			return Err(RemoteError::Communication);
		}
		if buffer.as_bytes()[0] == REMOTE_RESP_NOTSUP {
			return Ok(false);
		}
		check_response(&buffer)?;
		Ok(true)
	}
}

impl Display for Acceleration
{
	fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
	{
		let mut accelerations = Vec::with_capacity(4);
		if self.contains(Self::ADIv5) {
			accelerations.push("ADIv5");
		}
		if self.contains(Self::ADIv6) {
			accelerations.push("ADIv6");
		}
		if self.contains(Self::RiscV) {
			accelerations.push("RISC-V");
		}
		if self.contains(Self::CortexAR) {
			accelerations.push("Cortex-A/R");
		}
		write!(fmt, "{}", accelerations.join(", "))
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn swd_version_select_request_is_well_formed()
	{
		let request = format!("!{REMOTE_SWD_VERSION}{:02x}#", 2u8);
		assert_eq!(request, "!AV02#");
	}

	#[test]
	fn swd_targetsel_request_is_well_formed()
	{
		let request = format!("!{REMOTE_SWD_TARGETSEL}{:08x}#", 0x0121_0927u32);
		assert_eq!(request, "!AT01210927#");
	}

	#[test]
	fn dmi_read_request_is_well_formed()
	{
		let request = format!(
			"!{REMOTE_RISCV_DMI_READ}{:04x}{:02x}{:02x}{:02x}{:02x}{:08x}#",
			0x0001u16, RiscvDebugVersion::V0_13 as u8, 0u8, 5u8, 32u8, 0x10u32
		);
		assert_eq!(request, "!Dr00010300052000000010#");
	}
}
