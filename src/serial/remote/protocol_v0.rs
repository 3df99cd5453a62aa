// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::eyre::{Result, eyre};
use log::{debug, warn};

use crate::serial::bmd_rsp::BmdRspInterface;
use crate::serial::remote::adi::{AdiV5AccessPort, AdiV5DebugPort};
use crate::serial::remote::{
	Align, BmdAdiV5Protocol, BmdJtagProtocol, BmdRemoteProtocol, BmdRiscvProtocol, BmdSwdProtocol, JtagDev,
	REMOTE_RESP_ERR, RemoteError, TargetAddr64, TargetArchitecture, TargetFamily, check_response, decode_response,
	hexify, unhexify,
};

pub struct RemoteV0
{
	interface: Arc<Mutex<BmdRspInterface>>,
}

pub struct RemoteV0Plus(RemoteV0);

pub struct RemoteV0JTAG
{
	interface: Arc<Mutex<BmdRspInterface>>,
}

pub struct RemoteV0SWD
{
	interface: Arc<Mutex<BmdRspInterface>>,
}

pub struct RemoteV0ADIv5
{
	#[allow(unused)]
	interface: Arc<Mutex<BmdRspInterface>>,
}

const REMOTE_SWD_INIT: &str = "!SS#";
const REMOTE_JTAG_INIT: &str = "!JS#";

/// Older firmware (v0/v1) can only drive 32-64 TAP cycles per call; newer firmware relaxes
/// this but the host keeps chunking at this size regardless so the same code path works
/// against every firmware revision (spec.md §4.3.5's "compatibility policy, not an inherent
/// limit of the wire format").
const JTAG_SEQ_MAX_CYCLES: usize = 64;

const REMOTE_SWD_SEQ_IN: &str = "Ss";
const REMOTE_SWD_SEQ_IN_PAR: &str = "Sp";
const REMOTE_SWD_SEQ_OUT: &str = "So";
const REMOTE_SWD_SEQ_OUT_PAR: &str = "Sk";

const REMOTE_JTAG_RESET: &str = "Jr";
const REMOTE_JTAG_NEXT: &str = "Jn";
const REMOTE_JTAG_TMS_SEQ: &str = "Jt";
const REMOTE_JTAG_TDITDO_SEQ: &str = "Jx";
const REMOTE_JTAG_TDI_SEQ: &str = "Jd";

impl From<Arc<Mutex<BmdRspInterface>>> for RemoteV0
{
	fn from(interface: Arc<Mutex<BmdRspInterface>>) -> Self
	{
		warn!(
			"Probe firmware does not support the newer JTAG commands, ADIv5 acceleration, ADIv6 acceleration or \
			 RISC-V JTAG acceleration, please update it"
		);
		Self::new(interface)
	}
}

impl RemoteV0
{
	pub(crate) fn new(interface: Arc<Mutex<BmdRspInterface>>) -> Self
	{
		Self {
			interface,
		}
	}

	pub(crate) fn interface(&self) -> MutexGuard<'_, BmdRspInterface>
	{
		self.interface.lock().unwrap()
	}

	pub(crate) fn clone_interface(&self) -> Arc<Mutex<BmdRspInterface>>
	{
		self.interface.clone()
	}
}

impl BmdRemoteProtocol for RemoteV0
{
	fn jtag_init(&self) -> Result<Box<dyn BmdJtagProtocol>>
	{
		// Try to have the probe initialise JTAG comms to any connected targets
		debug!("Remote JTAG init");
		self.interface().buffer_write(REMOTE_JTAG_INIT)?;
		let buffer = self.interface().buffer_read()?;
		// If that failed for some reason, report it and abort
		if buffer.is_empty() || buffer.as_bytes()[0] == REMOTE_RESP_ERR {
			let message = if buffer.len() > 1 {
				&buffer[1..]
			} else {
				"unknown"
			};
			Err(eyre!("Remote JTAG init failed, error {}", message))
		} else {
			// Otherwise, return the v0 JTAG protocol implementation
			Ok(Box::new(RemoteV0JTAG::from(self.clone_interface())))
		}
	}

	fn swd_init(&self) -> Result<Box<dyn BmdSwdProtocol>>
	{
		debug!("Remote SWD init");
		self.interface().buffer_write(REMOTE_SWD_INIT)?;
		let buffer = self.interface().buffer_read()?;
		// If that failed for some reason, report it and abort
		if buffer.is_empty() || buffer.as_bytes()[0] == REMOTE_RESP_ERR {
			let message = if buffer.len() > 1 {
				&buffer[1..]
			} else {
				"unknown"
			};
			Err(eyre!("Remote SWD init failed, error {}", message))
		} else {
			// Otherwise, return the v0 SWD protocol implementation
			Ok(Box::new(RemoteV0SWD::from(self.clone_interface())))
		}
	}

	fn adiv5_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		warn!("Falling back to non-accelerated probe interface");
		warn!("Please update your probe's firmware for a substantial speed increase");
		None
	}

	fn adiv6_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		warn!("Falling back to non-accelerated probe interface");
		warn!("Please update your probe's firmware for a substantial speed increase");
		None
	}

	fn riscv_jtag_init(&self) -> Option<Arc<dyn BmdRiscvProtocol>>
	{
		warn!("Falling back to non-accelerated probe interface");
		warn!("Please update your probe's firmware for a substantial speed increase");
		None
	}

	/// This is intentionally a no-op on this version of the protocol as the probe has no idea what to do
	/// with the information this would provide. Protocol v1 introduces this machinary
	fn add_jtag_dev(&self, _dev_index: u32, _jtag_dev: &JtagDev) {}

	fn get_comms_frequency(&self) -> u32
	{
		u32::MAX
	}

	fn set_comms_frequency(&self, _freq: u32) -> bool
	{
		false
	}

	fn target_clk_output_enable(&self, _enable: bool)
	{
		//
	}

	fn supported_architectures(&self) -> Result<Option<TargetArchitecture>>
	{
		Ok(None)
	}

	fn supported_families(&self) -> Result<Option<TargetFamily>>
	{
		Ok(None)
	}

	fn get_target_power_state(&self) -> Result<bool>
	{
		Err(eyre!("Not supported"))
	}
}

impl From<Arc<Mutex<BmdRspInterface>>> for RemoteV0Plus
{
	fn from(interface: Arc<Mutex<BmdRspInterface>>) -> Self
	{
		warn!(
			"Probe firmware does not support the newer JTAG commands, ADIv6 acceleration or RISC-V JTAG acceleration, \
			 please update it"
		);
		Self(RemoteV0::new(interface))
	}
}

impl RemoteV0Plus
{
	pub(crate) fn clone_interface(&self) -> Arc<Mutex<BmdRspInterface>>
	{
		self.0.clone_interface()
	}
}

impl BmdRemoteProtocol for RemoteV0Plus
{
	fn jtag_init(&self) -> Result<Box<dyn BmdJtagProtocol>>
	{
		self.0.jtag_init()
	}

	fn swd_init(&self) -> Result<Box<dyn BmdSwdProtocol>>
	{
		self.0.swd_init()
	}

	fn adiv5_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		Some(Arc::new(RemoteV0ADIv5::from(self.clone_interface())))
	}

	fn adiv6_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		self.0.adiv6_init()
	}

	fn riscv_jtag_init(&self) -> Option<Arc<dyn BmdRiscvProtocol>>
	{
		self.0.riscv_jtag_init()
	}

	fn add_jtag_dev(&self, dev_index: u32, jtag_dev: &JtagDev)
	{
		self.0.add_jtag_dev(dev_index, jtag_dev);
	}

	fn get_comms_frequency(&self) -> u32
	{
		self.0.get_comms_frequency()
	}

	fn set_comms_frequency(&self, freq: u32) -> bool
	{
		self.0.set_comms_frequency(freq)
	}

	fn target_clk_output_enable(&self, enable: bool)
	{
		self.0.target_clk_output_enable(enable);
	}

	fn supported_architectures(&self) -> Result<Option<TargetArchitecture>>
	{
		self.0.supported_architectures()
	}

	fn supported_families(&self) -> Result<Option<TargetFamily>>
	{
		self.0.supported_families()
	}

	fn get_target_power_state(&self) -> Result<bool>
	{
		self.0.get_target_power_state()
	}
}

impl From<Arc<Mutex<BmdRspInterface>>> for RemoteV0JTAG
{
	fn from(interface: Arc<Mutex<BmdRspInterface>>) -> Self
	{
		Self {
			interface,
		}
	}
}

impl RemoteV0JTAG
{
	pub(crate) fn interface(&self) -> MutexGuard<'_, BmdRspInterface>
	{
		self.interface.lock().unwrap()
	}
}

impl BmdJtagProtocol for RemoteV0JTAG
{
	fn tap_reset(&self) -> Result<()>
	{
		self.interface().buffer_write(&format!("!{REMOTE_JTAG_RESET}#"))?;
		let buffer = self.interface().buffer_read()?;
		check_response(&buffer).map(|_| ()).map_err(|err| eyre!("JTAG reset failed: {err}"))
	}

	fn tap_next(&self, tms: bool, tdi: bool) -> Result<bool>
	{
		self.interface()
			.buffer_write(&format!("!{REMOTE_JTAG_NEXT}{}{}#", u8::from(tms), u8::from(tdi)))?;
		let buffer = self.interface().buffer_read()?;
		let payload =
			check_response(&buffer).map_err(|err| eyre!("JTAG tap_next failed: {err}"))?;
		Ok(payload.as_bytes().first() == Some(&b'1'))
	}

	fn tap_tms_seq(&self, tms_states: u32, clock_cycles: usize) -> Result<()>
	{
		self.interface()
			.buffer_write(&format!("!{REMOTE_JTAG_TMS_SEQ}{clock_cycles:02x}{tms_states:08x}#"))?;
		let buffer = self.interface().buffer_read()?;
		check_response(&buffer).map(|_| ()).map_err(|err| eyre!("JTAG TMS sequence failed: {err}"))
	}

	fn tap_tdi_tdo_seq(
		&self,
		mut data_out: Option<&mut [u8]>,
		final_tms: bool,
		data_in: Option<&[u8]>,
		clock_cycles: usize,
	) -> Result<()>
	{
		let mut cycles_done = 0;
		while cycles_done < clock_cycles {
			let chunk = (clock_cycles - cycles_done).min(JTAG_SEQ_MAX_CYCLES);
			let bytes = chunk.div_ceil(8);
			let is_final_chunk = cycles_done + chunk == clock_cycles;
			let tms = is_final_chunk && final_tms;

			let in_hex = match data_in {
				Some(data) => hexify(&data[cycles_done / 8..cycles_done / 8 + bytes]),
				None => String::new(),
			};
			self.interface()
				.buffer_write(&format!("!{REMOTE_JTAG_TDITDO_SEQ}{}{chunk:02x}{in_hex}#", u8::from(tms)))?;
			let buffer = self.interface().buffer_read()?;
			let payload =
				check_response(&buffer).map_err(|err| eyre!("JTAG TDI/TDO sequence failed: {err}"))?;

			if let Some(ref mut out) = data_out {
				let returned = unhexify(payload);
				out[cycles_done / 8..cycles_done / 8 + returned.len()].copy_from_slice(&returned);
			}

			cycles_done += chunk;
		}
		Ok(())
	}

	fn tap_tdi_seq(&self, final_tms: bool, data_in: &[u8], clock_cycles: usize) -> Result<()>
	{
		let mut cycles_done = 0;
		while cycles_done < clock_cycles {
			let chunk = (clock_cycles - cycles_done).min(JTAG_SEQ_MAX_CYCLES);
			let bytes = chunk.div_ceil(8);
			let is_final_chunk = cycles_done + chunk == clock_cycles;
			let tms = is_final_chunk && final_tms;

			let in_hex = hexify(&data_in[cycles_done / 8..cycles_done / 8 + bytes]);
			self.interface()
				.buffer_write(&format!("!{REMOTE_JTAG_TDI_SEQ}{}{chunk:02x}{in_hex}#", u8::from(tms)))?;
			let buffer = self.interface().buffer_read()?;
			check_response(&buffer).map_err(|err| eyre!("JTAG TDI sequence failed: {err}"))?;

			cycles_done += chunk;
		}
		Ok(())
	}

	/// v0 firmware lacks the dedicated bulk-cycle command, so idle clocking is emulated with
	/// repeated `tap_next` calls (spec.md §4.3.5: v2 adds the real accelerator).
	fn tap_cycle(&self, tms: bool, tdi: bool, clock_cycles: usize) -> Result<()>
	{
		for _ in 0..clock_cycles {
			self.tap_next(tms, tdi)?;
		}
		Ok(())
	}
}

impl From<Arc<Mutex<BmdRspInterface>>> for RemoteV0SWD
{
	fn from(interface: Arc<Mutex<BmdRspInterface>>) -> Self
	{
		Self {
			interface,
		}
	}
}

impl RemoteV0SWD
{
	pub(crate) fn interface(&self) -> MutexGuard<'_, BmdRspInterface>
	{
		self.interface.lock().unwrap()
	}
}

impl BmdSwdProtocol for RemoteV0SWD
{
	fn seq_in(&self, clock_cycles: usize) -> Result<u32>
	{
		self.interface().buffer_write(&format!("!{REMOTE_SWD_SEQ_IN}{clock_cycles:02x}#"))?;
		let buffer = self.interface().buffer_read()?;
		let payload = check_response(&buffer).map_err(|err| eyre!("SWD seq_in failed: {err}"))?;
		Ok(decode_response(payload, 8) as u32)
	}

	fn seq_in_parity(&self, clock_cycles: usize) -> Result<Option<u32>>
	{
		self.interface()
			.buffer_write(&format!("!{REMOTE_SWD_SEQ_IN_PAR}{clock_cycles:02x}#"))?;
		let buffer = self.interface().buffer_read()?;
		let payload = check_response(&buffer).map_err(|err| eyre!("SWD seq_in_parity failed: {err}"))?;
		if payload.len() < 9 {
			return Err(eyre!("SWD seq_in_parity response too short"));
		}
		let value = decode_response(&payload[..8], 8) as u32;
		let parity_ok = payload.as_bytes()[8] == b'1';
		Ok(parity_ok.then_some(value))
	}

	fn seq_out(&self, value: u32, clock_cycles: usize) -> Result<()>
	{
		self.interface()
			.buffer_write(&format!("!{REMOTE_SWD_SEQ_OUT}{clock_cycles:02x}{value:08x}#"))?;
		let buffer = self.interface().buffer_read()?;
		check_response(&buffer).map(|_| ()).map_err(|err| eyre!("SWD seq_out failed: {err}"))
	}

	fn seq_out_parity(&self, value: u32, clock_cycles: usize) -> Result<()>
	{
		self.interface()
			.buffer_write(&format!("!{REMOTE_SWD_SEQ_OUT_PAR}{clock_cycles:02x}{value:08x}#"))?;
		let buffer = self.interface().buffer_read()?;
		check_response(&buffer).map(|_| ()).map_err(|err| eyre!("SWD seq_out_parity failed: {err}"))
	}
}

impl From<Arc<Mutex<BmdRspInterface>>> for RemoteV0ADIv5
{
	fn from(interface: Arc<Mutex<BmdRspInterface>>) -> Self
	{
		Self {
			interface,
		}
	}
}

/// Present only because older trees wired [RemoteV0Plus] to hand one of these back; no firmware
/// tier actually advertises ADIv5 acceleration without also answering the v1+ high-level check
/// (spec.md §4.3.2), so every operation here reports [RemoteError::NotSupported].
impl BmdAdiV5Protocol for RemoteV0ADIv5
{
	fn raw_access(&self, _dp: &AdiV5DebugPort, _rnw: u8, _addr: u16, _value: u32) -> Result<u32, RemoteError>
	{
		Err(RemoteError::NotSupported)
	}

	fn dp_read(&self, _dp: &AdiV5DebugPort, _addr: u16) -> Result<u32, RemoteError>
	{
		Err(RemoteError::NotSupported)
	}

	fn ap_read(&self, _ap: &AdiV5AccessPort, _addr: u16) -> Result<u32, RemoteError>
	{
		Err(RemoteError::NotSupported)
	}

	fn ap_write(&self, _ap: &AdiV5AccessPort, _addr: u16, _value: u32) -> Result<(), RemoteError>
	{
		Err(RemoteError::NotSupported)
	}

	fn mem_read(&self, _ap: &AdiV5AccessPort, _dest: &mut [u8], _src: TargetAddr64) -> Result<(), RemoteError>
	{
		Err(RemoteError::NotSupported)
	}

	fn mem_write(&self, _ap: &AdiV5AccessPort, _dest: TargetAddr64, _src: &[u8], _align: Align) -> Result<(), RemoteError>
	{
		Err(RemoteError::NotSupported)
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn tap_next_request_is_well_formed()
	{
		let request = format!("!{REMOTE_JTAG_NEXT}{}{}#", u8::from(true), u8::from(false));
		assert_eq!(request, "!Jn10#");
	}

	#[test]
	fn jtag_seq_chunking_respects_firmware_limit()
	{
		let clock_cycles = 200usize;
		let mut cycles_done = 0;
		let mut chunks = Vec::new();
		while cycles_done < clock_cycles {
			let chunk = (clock_cycles - cycles_done).min(JTAG_SEQ_MAX_CYCLES);
			chunks.push(chunk);
			cycles_done += chunk;
		}
		assert!(chunks.iter().all(|&c| c <= JTAG_SEQ_MAX_CYCLES));
		assert_eq!(chunks.iter().sum::<usize>(), clock_cycles);
	}
}
