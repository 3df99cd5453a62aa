// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

/// A version-agnostic Debug Module Interface on a RISC-V device
pub struct RiscvDmi
{
	/// DMI designer code
	designer_code: u16,
	/// Versioon of the spec this DMI implements
	version: RiscvDebugVersion,

	/// The index of this DMI on the JTAG chain if JTAG
	dev_index: u8,
	/// The number of bus idle cycles this DMI needs to complete transactions
	idle_cycles: u8,
	/// The address width of the DMI bus this DMI connects us to
	address_width: u8,
	/// Whether a fault has occured on the bus, and which one
	fault: u8,
}

/// RISC-V Debug spec versions that we know about
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum RiscvDebugVersion
{
	Unknown,
	Unimplemented,
	V0_11,
	V0_13,
	V1_0,
}

impl RiscvDmi
{
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		designer_code: u16,
		version: RiscvDebugVersion,
		dev_index: u8,
		idle_cycles: u8,
		address_width: u8,
	) -> Self
	{
		Self {
			designer_code,
			version,
			dev_index,
			idle_cycles,
			address_width,
			fault: 0,
		}
	}

	pub fn designer_code(&self) -> u16
	{
		self.designer_code
	}

	pub fn version(&self) -> RiscvDebugVersion
	{
		self.version
	}

	pub fn dev_index(&self) -> u8
	{
		self.dev_index
	}

	pub fn idle_cycles(&self) -> u8
	{
		self.idle_cycles
	}

	pub fn address_width(&self) -> u8
	{
		self.address_width
	}

	pub fn fault(&self) -> u8
	{
		self.fault
	}

	pub fn set_fault(&mut self, fault: u8)
	{
		self.fault = fault;
	}
}
