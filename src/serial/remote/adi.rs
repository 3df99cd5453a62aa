// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::cell::Cell;
use std::sync::Arc;

use log::error;

use crate::serial::remote::{Align, BmdAdiV5Protocol, RemoteError, TargetAddr64};

/// The ADIv5 debug port associated with a JTAG TAP or a SWD interface drop of an ARM debug
/// based device.
pub struct AdiV5DebugPort
{
	/// The index of the device on the JTAG chain or DP index on SWD
	dev_index: u8,
	/// Sticky fault latch, set whenever an operation against this DP or one of its APs
	/// observes [RemoteError::Fault]. Cleared only by a caller explicitly consulting and
	/// resetting it, matching ADIv5's sticky-err semantics.
	fault: Cell<u32>,
	/// Bitfield of the DP's quirks such as if it's a minimal DP or has the duped AP bug
	quirks: u8,
	/// DP version
	version: u8,

	/// DPv2+ specific target selection value
	targetsel: u32,

	/// DP designer (not impplementer!)
	designer_code: u16,
	/// DP partno
	partno: u16,

	/// TARGETID designer, present on DPv2+
	target_designer_code: u16,
	/// TARGETID partno, present on DPv2+
	target_partno: u16,

	/// DPv3+ bus address width
	address_width: u8,

	/// The remote protocol implementation to talk to the DP against
	remote: Arc<dyn BmdAdiV5Protocol>,
}

impl AdiV5DebugPort
{
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		dev_index: u8,
		quirks: u8,
		version: u8,
		targetsel: u32,
		designer_code: u16,
		partno: u16,
		target_designer_code: u16,
		target_partno: u16,
		address_width: u8,
		remote: Arc<dyn BmdAdiV5Protocol>,
	) -> Self
	{
		Self {
			dev_index,
			fault: Cell::new(0),
			quirks,
			version,
			targetsel,
			designer_code,
			partno,
			target_designer_code,
			target_partno,
			address_width,
			remote,
		}
	}

	pub fn dev_index(&self) -> u8
	{
		self.dev_index
	}

	pub fn quirks(&self) -> u8
	{
		self.quirks
	}

	pub fn version(&self) -> u8
	{
		self.version
	}

	pub fn targetsel(&self) -> u32
	{
		self.targetsel
	}

	pub fn designer_code(&self) -> u16
	{
		self.designer_code
	}

	pub fn partno(&self) -> u16
	{
		self.partno
	}

	pub fn target_designer_code(&self) -> u16
	{
		self.target_designer_code
	}

	pub fn target_partno(&self) -> u16
	{
		self.target_partno
	}

	pub fn address_width(&self) -> u8
	{
		self.address_width
	}

	/// Read the sticky fault latch. The next GDB command that examines this after a suspect
	/// batch is expected to report sticky-err to the frontend.
	pub fn fault(&self) -> u32
	{
		self.fault.get()
	}

	pub fn clear_fault(&self)
	{
		self.fault.set(0);
	}

	fn latch_fault(&self, code: u32)
	{
		self.fault.set(code);
	}

	/// `dp_read(dp, address) -> u32`. A [RemoteError::Fault] is latched onto this DP and still
	/// surfaced as `Err` so the caller decides whether a single fault is terminal for the batch
	/// it's part of; a [RemoteError::Exception] always propagates.
	pub fn dp_read(&self, address: u16) -> Result<u32, RemoteError>
	{
		let result = self.remote.dp_read(self, address);
		if let Err(RemoteError::Fault(code)) = result {
			self.latch_fault(code);
		}
		result
	}

	/// `raw_access(dp, read_not_write, address, value) -> u32` — a single posted DP/AP cycle.
	pub fn raw_access(&self, read_not_write: bool, address: u16, value: u32) -> Result<u32, RemoteError>
	{
		let rnw = u8::from(read_not_write);
		let result = self.remote.raw_access(self, rnw, address, value);
		if let Err(RemoteError::Fault(code)) = result {
			self.latch_fault(code);
		}
		result
	}
}

/// An ADIv5 access port associated with an ADIv5 debug port on a device.
pub struct AdiV5AccessPort
{
	/// The debug port this AP is asociated with
	dp: Arc<AdiV5DebugPort>,
	/// The AP's index on the DP
	index: u8,
	/// Flags associated with this AP such as whether the AP has system memory attached,
	/// or is 64-bit instead of (the default of) 32-bit
	flags: u8,

	/// The value read out from the ID register for this AP
	idr: u32,
	/// The base address of the ROM tables associated with this AP
	base: TargetAddr64,
	/// The Control and Status Word value associated with accessing this AP
	csw: Cell<u32>,
	/// A copy of any attached Cortex-M core's DEMCR value when we first see the core
	cortexm_demcr: Cell<u32>,

	/// AP designer code
	designer_code: u16,
	/// AP partno
	partno: u16,
}

impl AdiV5AccessPort
{
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		dp: Arc<AdiV5DebugPort>,
		index: u8,
		flags: u8,
		idr: u32,
		base: TargetAddr64,
		csw: u32,
		designer_code: u16,
		partno: u16,
	) -> Self
	{
		Self {
			dp,
			index,
			flags,
			idr,
			base,
			csw: Cell::new(csw),
			cortexm_demcr: Cell::new(0),
			designer_code,
			partno,
		}
	}

	pub fn dp(&self) -> &AdiV5DebugPort
	{
		&self.dp
	}

	pub fn index(&self) -> u8
	{
		self.index
	}

	pub fn flags(&self) -> u8
	{
		self.flags
	}

	pub fn idr(&self) -> u32
	{
		self.idr
	}

	pub fn base(&self) -> TargetAddr64
	{
		self.base
	}

	pub fn csw(&self) -> u32
	{
		self.csw.get()
	}

	pub fn set_csw(&self, csw: u32)
	{
		self.csw.set(csw);
	}

	pub fn cortexm_demcr(&self) -> u32
	{
		self.cortexm_demcr.get()
	}

	pub fn set_cortexm_demcr(&self, demcr: u32)
	{
		self.cortexm_demcr.set(demcr);
	}

	pub fn designer_code(&self) -> u16
	{
		self.designer_code
	}

	pub fn partno(&self) -> u16
	{
		self.partno
	}

	/// `ap_read(ap, address) -> u32`.
	pub fn read(&self, address: u16) -> Result<u32, RemoteError>
	{
		let result = self.dp.remote.ap_read(self, address);
		if let Err(RemoteError::Fault(code)) = result {
			self.dp.latch_fault(code);
		}
		result
	}

	/// `ap_write(ap, address, value) -> ()`.
	pub fn write(&self, address: u16, value: u32) -> Result<(), RemoteError>
	{
		let result = self.dp.remote.ap_write(self, address, value);
		if let Err(RemoteError::Fault(code)) = result {
			self.dp.latch_fault(code);
		}
		result
	}

	/// `mem_read(ap, destination, source, length) -> ()` — bulk read with implicit
	/// CSW-controlled width. Packetization is left to the bound remote-protocol
	/// implementation, which knows the wire buffer capacity for its version; this method just
	/// owns the fault contract: on any per-block failure, log the offset and abort (partial
	/// data in `destination` is undefined past that point).
	pub fn mem_read(&self, destination: &mut [u8], source: TargetAddr64) -> Result<(), RemoteError>
	{
		if destination.is_empty() {
			return Ok(());
		}

		match self.dp.remote.mem_read(self, destination, source) {
			Ok(()) => Ok(()),
			Err(RemoteError::Fault(code)) => {
				self.dp.latch_fault(code);
				error!("Fault during bulk memory read from 0x{source:016x}");
				Err(RemoteError::Fault(code))
			},
			Err(other) => {
				error!("Bulk memory read from 0x{source:016x} aborted: {other}");
				Err(other)
			},
		}
	}

	/// `mem_write(ap, destination, source, length, alignment) -> ()` — bulk write; alignment
	/// governs both per-cycle width and wire packetization.
	pub fn mem_write(&self, destination: TargetAddr64, source: &[u8], align: Align) -> Result<(), RemoteError>
	{
		if source.is_empty() {
			return Ok(());
		}

		match self.dp.remote.mem_write(self, destination, source, align) {
			Ok(()) => Ok(()),
			Err(RemoteError::Fault(code)) => {
				self.dp.latch_fault(code);
				error!("Fault during bulk memory write to 0x{destination:016x}");
				Err(RemoteError::Fault(code))
			},
			Err(other) => {
				error!("Bulk memory write to 0x{destination:016x} aborted: {other}");
				Err(other)
			},
		}
	}
}

/// Compute the block size (in payload bytes) for a single accelerated bulk-read request given
/// the wire buffer capacity `wire_cap`: each byte hex-encodes to two ASCII nibbles, and there
/// are [super::REMOTE_READ_OVERHEAD] bytes of fixed response overhead.
pub fn read_block_size(wire_cap: usize) -> usize
{
	(wire_cap.saturating_sub(super::REMOTE_READ_OVERHEAD)) / 2
}

/// Compute the block size (in payload bytes) for a single accelerated bulk-write request,
/// rounding down to a multiple of the access width so every emitted cycle stays aligned to the
/// target AP's TAR-autoincrement semantics.
pub fn write_block_size(wire_cap: usize, overhead: usize, align: Align) -> usize
{
	let raw = (wire_cap.saturating_sub(overhead)) / 2;
	let width = align.bytes();
	(raw / width) * width
}

#[cfg(test)]
mod tests
{
	use super::*;
	use crate::serial::remote::{REMOTE_WRITE_OVERHEAD_V3_ADIV5, REMOTE_WRITE_OVERHEAD_V4_ADIV6};

	#[test]
	fn read_block_size_fits_wire_cap()
	{
		let block = read_block_size(1024);
		assert_eq!(block, (1024 - 3) / 2);
	}

	#[test]
	fn write_block_size_is_alignment_multiple()
	{
		for align in [Align::Byte, Align::Half, Align::Word, Align::DWord] {
			let block = write_block_size(1024, REMOTE_WRITE_OVERHEAD_V3_ADIV5, align);
			assert_eq!(block % align.bytes(), 0);
			assert!(block * 2 + REMOTE_WRITE_OVERHEAD_V3_ADIV5 <= 1024);
		}
	}

	#[test]
	fn write_block_size_handles_small_wire_cap()
	{
		// A buffer too small to even fit the ADIv6 header overhead should saturate to zero
		// rather than underflow.
		let block = write_block_size(32, REMOTE_WRITE_OVERHEAD_V4_ADIV6, Align::Word);
		assert_eq!(block, 0);
	}
}
