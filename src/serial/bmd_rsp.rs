// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use color_eyre::eyre::{Result, eyre};

use crate::serial::remote::{
	BmdRemoteProtocol, REMOTE_EOM, REMOTE_MAX_MSG_SIZE, REMOTE_RESP, REMOTE_SOM, negotiate,
};

pub struct BmdRspInterface
{
	handle: File,
	protocol_version: u64,
}

const REMOTE_START: &str = "+#!GA#";
/// How many consecutive zero-byte reads (each bounded by the port's VTIME) we tolerate before
/// giving up on a response, per spec.md §4.4's negative-sentinel timeout behaviour.
const REMOTE_READ_STALLS: u32 = 20;

impl BmdRspInterface
{
	pub fn from_path(serial_port: &Path) -> Result<Self>
	{
		// Get the serial interface to the probe open
		let handle = File::options().read(true).write(true).open(serial_port)?;

		// Construct an interface object
		let mut result = Self {
			handle,
			// Provide a dummy protocol version for the moment
			protocol_version: u64::MAX,
		};

		// Call the OS-specific handle configuration function to ready
		// the interface handle for use with the remote serial protocol
		result.init_handle()?;

		// Start remote protocol communications with the probe
		result.buffer_write(REMOTE_START)?;

		// Now the object is ready to go, return it to the caller
		Ok(result)
	}

	pub fn protocol_version(&self) -> u64
	{
		self.protocol_version
	}

	pub fn set_protocol_version(&mut self, version: u64)
	{
		self.protocol_version = version;
	}

	/// Negotiate the remote protocol version (spec.md §4.3.2) against this already-opened
	/// interface and hand back the version-appropriate implementation. Consumes `self` since the
	/// negotiated protocol takes shared ownership of the interface for the rest of the session.
	pub fn remote(self) -> Result<Box<dyn BmdRemoteProtocol>>
	{
		negotiate(Arc::new(Mutex::new(self)))
	}

	pub(crate) fn buffer_write(&mut self, message: &str) -> Result<()>
	{
		Ok(self.handle.write_all(message.as_bytes())?)
	}

	/// Reads one framed remote response off the wire: bytes are discarded until the start marker
	/// `&` is seen, then accumulated until the terminating `#`, per spec.md §4.4. Returns the
	/// payload between the two markers (leading status byte plus any hex digits), with neither
	/// marker included.
	pub(crate) fn buffer_read(&mut self) -> Result<String>
	{
		let mut byte = [0u8; 1];

		let mut stalls = 0;
		loop {
			let read = self.handle.read(&mut byte)?;
			if read == 0 {
				stalls += 1;
				if stalls >= REMOTE_READ_STALLS {
					return Err(eyre!("Timed out waiting for response start marker"));
				}
				continue;
			}
			if byte[0] == REMOTE_SOM {
				return Err(eyre!("Unexpected start-of-message marker while awaiting a response"));
			}
			if byte[0] == REMOTE_RESP {
				break;
			}
		}

		let mut response = String::with_capacity(REMOTE_MAX_MSG_SIZE);
		let mut stalls = 0;
		loop {
			let read = self.handle.read(&mut byte)?;
			if read == 0 {
				stalls += 1;
				if stalls >= REMOTE_READ_STALLS {
					return Err(eyre!("Timed out waiting for response end marker"));
				}
				continue;
			}
			stalls = 0;
			if byte[0] == REMOTE_EOM {
				return Ok(response);
			}
			response.push(byte[0] as char);
			if response.len() >= REMOTE_MAX_MSG_SIZE {
				return Err(eyre!("Response exceeded maximum message size"));
			}
		}
	}
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
impl BmdRspInterface
{
	fn init_handle(&self) -> Result<()>
	{
		use std::os::fd::AsRawFd;

		#[cfg(any(target_os = "linux", target_os = "android"))]
		use termios::os::linux::CRTSCTS;
		#[cfg(target_os = "macos")]
		use termios::os::macos::CRTSCTS;
		use termios::*;

		// Extract the current termios config for the handle
		let fd = self.handle.as_raw_fd();
		let mut attrs = Termios::from_fd(fd)?;

		// Reconfigure the attributes for 8-bit characters, no CTS/RTS hardware control flow,
		// w/ no model control signalling
		attrs.c_cflag &= !(CSIZE | CSTOPB);
		attrs.c_cflag |= CS8 | CLOCAL | CREAD | CRTSCTS;
		// Disable break character handling and turn off XON/XOFF based control flow
		attrs.c_iflag &= !(IGNBRK | IXON | IXOFF | IXANY);
		// Disable all signaling, echo, remapping and delays
		attrs.c_lflag = 0;
		attrs.c_oflag = 0;
		// Make reads not block, and set 0.5s for read timeout
		attrs.c_cc[VMIN] = 0;
		attrs.c_cc[VTIME] = 5;

		// Reconfigure the handle with the new termios config
		tcsetattr(fd, TCSANOW, &attrs)?;

		// Let the caller know that we successfully got done
		Ok(())
	}
}

#[cfg(target_os = "windows")]
impl BmdRspInterface {}
