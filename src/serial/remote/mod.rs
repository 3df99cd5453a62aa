// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

pub mod adi;
pub mod protocol_v0;
pub mod protocol_v1;
pub mod protocol_v2;
pub mod protocol_v3;
pub mod protocol_v4;
pub mod riscv_debug;

use std::sync::{Arc, Mutex};

use bitmask_enum::bitmask;
use color_eyre::eyre::Result;
use log::{debug, warn};

use crate::serial::bmd_rsp::BmdRspInterface;
use crate::serial::remote::adi::{AdiV5AccessPort, AdiV5DebugPort};
use crate::serial::remote::protocol_v0::RemoteV0;
use crate::serial::remote::protocol_v1::RemoteV1;
use crate::serial::remote::protocol_v2::RemoteV2;
use crate::serial::remote::protocol_v3::RemoteV3;
use crate::serial::remote::protocol_v4::RemoteV4;
use crate::serial::remote::riscv_debug::RiscvDmi;

/// This is the max possible size of a remote protocol packet which a hard limitation of the
/// firmware on the probe - 1KiB is all the buffer that could be spared (v3+; v0 firmware is
/// limited to 256 bytes, see [REMOTE_MAX_MSG_SIZE_V0]).
pub const REMOTE_MAX_MSG_SIZE: usize = 1024;
/// Frame size bound for firmware that only speaks protocol v0/v1.
pub const REMOTE_MAX_MSG_SIZE_V0: usize = 256;

/// Start of message marker for the protocol
pub const REMOTE_SOM: u8 = b'!';
/// End of message marker for the protocol
pub const REMOTE_EOM: u8 = b'#';
/// Response marker for the protocol
pub const REMOTE_RESP: u8 = b'&';

/// Probe response was okay and the data returned is valid
pub const REMOTE_RESP_OK: u8 = b'K';
/// Probe found an error with a request parameter
pub const REMOTE_RESP_PARERR: u8 = b'P';
/// Probe encountered an error executing the request
pub const REMOTE_RESP_ERR: u8 = b'E';
/// Probe does not support the request made
pub const REMOTE_RESP_NOTSUP: u8 = b'N';

/// Error kind carried inside an `E` response, decoded from the low byte of the hex payload
const REMOTE_ERR_FAULT: u64 = 3;
const REMOTE_ERR_EXCEPTION: u64 = 4;

/// Request overhead (bytes) baked into the bulk-write block size calculation for each
/// accelerated memory write shape (see spec.md §4.2).
pub const REMOTE_WRITE_OVERHEAD_V3_ADIV5: usize = 34;
pub const REMOTE_WRITE_OVERHEAD_V4_ADIV5: usize = 34;
pub const REMOTE_WRITE_OVERHEAD_V4_ADIV6: usize = 57;
/// Fixed response overhead (status byte + trailing `#` + the NUL the reader writes) budgeted
/// against the wire buffer for a bulk read.
pub const REMOTE_READ_OVERHEAD: usize = 3;

/// A 64-bit target memory address, used throughout the ADIv6 and bulk memory surface.
pub type TargetAddr64 = u64;
/// A 32-bit target memory address, used by the ADIv5 single-DP-resource-bus surface.
pub type TargetAddr32 = u32;

/// Access widths for a target-memory transfer. Mirrors the CSW `SIZE` field semantics and also
/// governs the packetization of bulk writes over the wire (spec.md §3, §4.2).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Align
{
	Byte = 0,
	Half = 1,
	Word = 2,
	DWord = 3,
}

impl Align
{
	/// The number of bytes a single cycle at this alignment moves.
	pub fn bytes(self) -> usize
	{
		1usize << (self as u8)
	}
}

/// Errors the ADIv5 access layer's fault-propagation contract (spec.md §4.2, §7) can surface.
/// `Fault` and `Exception` carry the raw 32-bit payload the probe reported upstream of the
/// status byte.
#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum RemoteError
{
	#[error("target raised a fault (sticky-err 0x{0:08x})")]
	Fault(u32),
	#[error("target raised an exception (code 0x{0:08x})")]
	Exception(u32),
	#[error("communication failure talking to the probe")]
	Communication,
	#[error("probe does not support this request")]
	NotSupported,
	#[error("probe reported a parameter error")]
	ParameterError,
}

/// Types implementing this trait implement the common portion of the BMD remote protocol
/// (this includes things like comms initialisation, and clock frequency control), plus the
/// per-version accelerator init functions that hand back the high-level protocol surfaces.
pub trait BmdRemoteProtocol
{
	// Comms protocol initialisation functions
	fn swd_init(&self) -> Result<Box<dyn BmdSwdProtocol>>;
	fn jtag_init(&self) -> Result<Box<dyn BmdJtagProtocol>>;
	// Higher level protocol initialisation functions
	fn adiv5_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>;
	fn adiv6_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>;
	fn riscv_jtag_init(&self) -> Option<Arc<dyn BmdRiscvProtocol>>;

	// Probe operation control functions
	fn add_jtag_dev(&self, dev_index: u32, jtag_dev: &JtagDev);
	fn get_comms_frequency(&self) -> u32;
	fn set_comms_frequency(&self, freq: u32) -> bool;
	fn target_clk_output_enable(&self, enable: bool);

	fn supported_architectures(&self) -> Result<Option<TargetArchitecture>>;
	fn supported_families(&self) -> Result<Option<TargetFamily>>;
	fn get_target_power_state(&self) -> Result<bool>;
}

/// Bit-level SWD primitives (spec.md §4.3.5), present on every protocol version.
pub trait BmdSwdProtocol: Send + Sync
{
	fn seq_in(&self, clock_cycles: usize) -> Result<u32>;
	fn seq_in_parity(&self, clock_cycles: usize) -> Result<Option<u32>>;
	fn seq_out(&self, value: u32, clock_cycles: usize) -> Result<()>;
	fn seq_out_parity(&self, value: u32, clock_cycles: usize) -> Result<()>;
}

/// Bit-level JTAG primitives (spec.md §4.3.5).
pub trait BmdJtagProtocol: Send + Sync
{
	fn tap_reset(&self) -> Result<()>;
	fn tap_next(&self, tms: bool, tdi: bool) -> Result<bool>;
	fn tap_tms_seq(&self, tms_states: u32, clock_cycles: usize) -> Result<()>;
	fn tap_tdi_tdo_seq(
		&self,
		data_out: Option<&mut [u8]>,
		final_tms: bool,
		data_in: Option<&[u8]>,
		clock_cycles: usize,
	) -> Result<()>;
	fn tap_tdi_seq(&self, final_tms: bool, data_in: &[u8], clock_cycles: usize) -> Result<()>;
	/// v2+ only; v0/v1 firmware lacks this primitive and callers should fall back to
	/// repeated `tap_next` calls.
	fn tap_cycle(&self, tms: bool, tdi: bool, clock_cycles: usize) -> Result<()>;
}

/// The ADIv5/ADIv6 access surface (spec.md §4.2). Implementations own the fault-propagation
/// contract: any wire-level `E`/`P`/`N` response is translated to a [RemoteError] rather than
/// silently swallowed, with `Fault` additionally latched onto the owning [AdiV5DebugPort].
pub trait BmdAdiV5Protocol: Send + Sync
{
	fn raw_access(&self, dp: &AdiV5DebugPort, rnw: u8, addr: u16, value: u32) -> Result<u32, RemoteError>;
	fn dp_read(&self, dp: &AdiV5DebugPort, addr: u16) -> Result<u32, RemoteError>;
	fn ap_read(&self, ap: &AdiV5AccessPort, addr: u16) -> Result<u32, RemoteError>;
	fn ap_write(&self, ap: &AdiV5AccessPort, addr: u16, value: u32) -> Result<(), RemoteError>;
	fn mem_read(&self, ap: &AdiV5AccessPort, dest: &mut [u8], src: TargetAddr64) -> Result<(), RemoteError>;
	fn mem_write(
		&self,
		ap: &AdiV5AccessPort,
		dest: TargetAddr64,
		src: &[u8],
		align: Align,
	) -> Result<(), RemoteError>;
}

/// RISC-V Debug Module Interface accelerator surface (spec.md §4.3.7).
pub trait BmdRiscvProtocol: Send + Sync
{
	fn dmi_read(&self, dmi: &RiscvDmi, address: u32) -> Result<Option<u32>, RemoteError>;
	fn dmi_write(&self, dmi: &RiscvDmi, address: u32, value: u32) -> Result<bool, RemoteError>;
}

/// Structure representing a device on the JTAG scan chain (spec.md §3 "JTAG device record").
#[derive(Debug, Clone, Copy)]
pub struct JtagDev
{
	pub idcode: u32,
	pub current_ir: u32,

	pub dr_prescan: u8,
	pub dr_postscan: u8,

	pub ir_len: u8,
	pub ir_prescan: u8,
	pub ir_postscan: u8,
}

/// Acceleration bitmap negotiated on v4+ probes via `!HA#` (spec.md §3).
#[bitmask(u64)]
#[bitmask_config(vec_debug)]
pub enum Acceleration
{
	ADIv5,
	CortexAR,
	RiscV,
	ADIv6,
}

/// Architecture bitmap negotiated on v4+ probes via `!Ha#` (spec.md §3).
#[bitmask(u64)]
#[bitmask_config(vec_debug)]
pub enum TargetArchitecture
{
	CortexM,
	CortexAR,
	RiscV32,
	RiscV64,
}

/// Target family bitmap negotiated on v4+ probes via `!HF#` (spec.md §3).
#[bitmask(u64)]
#[bitmask_config(vec_debug)]
pub enum TargetFamily
{
	STM32,
	NXPKinetis,
	RP,
	SAM,
	LPC,
}

/// Decode up to `digits` hex nibbles from the front of `response` into a `u64`, matching the
/// probe's lowercase, fixed-width hex encoding. Clamps `digits` to what's actually present
/// rather than panicking on a short/malformed response.
pub fn decode_response(response: &str, digits: usize) -> u64
{
	let digits = digits.min(response.len());

	let mut value = 0;
	for byte in response[..digits].chars() {
		value <<= 4;
		value |= byte.to_digit(16).unwrap_or(0) as u64;
	}
	value
}

/// Hex-encode `data` into lowercase ASCII nibbles, matching the wire format everywhere the
/// remote protocol carries binary payloads.
pub fn hexify(data: &[u8]) -> String
{
	let mut out = String::with_capacity(data.len() * 2);
	for byte in data {
		out.push_str(&format!("{byte:02x}"));
	}
	out
}

/// Inverse of [hexify]. Ignores a trailing odd nibble (callers are expected to only ever see
/// even-length hex runs per spec.md §8's round-trip invariant).
pub fn unhexify(hex: &str) -> Vec<u8>
{
	let bytes = hex.as_bytes();
	let mut out = Vec::with_capacity(bytes.len() / 2);
	let mut chunks = bytes.chunks_exact(2);
	for chunk in &mut chunks {
		let hi = (chunk[0] as char).to_digit(16).unwrap_or(0) as u8;
		let lo = (chunk[1] as char).to_digit(16).unwrap_or(0) as u8;
		out.push((hi << 4) | lo);
	}
	out
}

/// Translate a raw wire response into the fault-propagation contract of spec.md §4.2:
/// - empty response: communication failure
/// - `E<hex>`: low byte selects [RemoteError::Fault] (upper bytes latched by the caller) or
///   [RemoteError::Exception]; anything else is logged as unexpected and folded into `Fault`
/// - `P`: parameter error, logged as a firmware-bug diagnostic
/// - `N`: not supported
/// - `K`: success, payload is everything after the status byte
pub(crate) fn check_response(response: &str) -> Result<&str, RemoteError>
{
	if response.is_empty() {
		return Err(RemoteError::Communication);
	}

	let status = response.as_bytes()[0];
	let payload = &response[1..];

	match status {
		REMOTE_RESP_OK => Ok(payload),
		REMOTE_RESP_ERR => {
			let bytes = unhexify(payload);
			let kind = bytes.first().copied().unwrap_or(0) as u64;
			let upper = bytes[1..]
				.iter()
				.enumerate()
				.fold(0u32, |value, (index, &byte)| value | ((byte as u32) << (8 * index)));
			if kind == REMOTE_ERR_FAULT {
				Err(RemoteError::Fault(upper))
			} else if kind == REMOTE_ERR_EXCEPTION {
				Err(RemoteError::Exception(upper))
			} else {
				warn!("Unexpected error kind {kind} in remote protocol response");
				Err(RemoteError::Fault(upper))
			}
		},
		REMOTE_RESP_PARERR => {
			warn!("Probe firmware reported a parameter error: {payload}");
			Err(RemoteError::ParameterError)
		},
		REMOTE_RESP_NOTSUP => {
			debug!("Probe does not support this request");
			Err(RemoteError::NotSupported)
		},
		_ => {
			warn!("Unrecognised remote protocol status byte {status:#04x}");
			Err(RemoteError::Communication)
		},
	}
}

/// Negotiate the remote protocol version against an already-opened probe connection and
/// return the function-table implementation to use for the rest of the session
/// (spec.md §4.3.2). The returned value is final for the session; callers must not attempt to
/// re-negotiate without tearing down and recreating the interface.
pub fn negotiate(interface: Arc<Mutex<BmdRspInterface>>) -> Result<Box<dyn BmdRemoteProtocol>>
{
	const REMOTE_HIGH_LEVEL_CHECK: &str = "!HC#";

	let mut iface = interface.lock().unwrap();
	iface.buffer_write(REMOTE_HIGH_LEVEL_CHECK)?;
	let buffer = iface.buffer_read()?;
	drop(iface);

	let version = if buffer.is_empty() || buffer.as_bytes()[0] != REMOTE_RESP_OK {
		None
	} else {
		Some(decode_response(&buffer[1..], 2))
	};

	Ok(match version {
		None | Some(0) => {
			if version.is_none() {
				warn!("Probe did not answer high-level protocol check, falling back to v0");
			}
			Box::new(RemoteV0::from(interface))
		},
		Some(1) => Box::new(RemoteV1::from(interface)),
		Some(2) => Box::new(RemoteV2::from(interface)),
		Some(3) => Box::new(RemoteV3::from(interface)),
		Some(_v4_plus) => Box::new(RemoteV4::new(interface)?),
	})
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn error_response_decodes_the_fault_payload_little_endian()
	{
		// kind byte 0x03 = FAULT, remaining byte 0xfa is the fault code (spec.md §4.2).
		match check_response("E03fa") {
			Err(RemoteError::Fault(0xfa)) => {},
			other => panic!("expected Fault(0xfa), got {other:?}"),
		}
	}

	#[test]
	fn error_response_decodes_the_exception_payload_little_endian()
	{
		match check_response("E0412") {
			Err(RemoteError::Exception(0x12)) => {},
			other => panic!("expected Exception(0x12), got {other:?}"),
		}
	}
}
