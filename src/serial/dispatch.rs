// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! The GDB command dispatcher seam: the boundary between the packet transport
//! (`gdb_transport`) and whatever actually understands the RSP command set. This crate does not
//! implement a GDB stub - that is explicitly out of scope - but the seam and a no-op
//! implementation live here so the transport can be driven end-to-end.

/// A GDB packet answered by the dispatcher at this seam, given the raw payload of a `$...#cc`
/// packet (checksum and framing already stripped by the transport). Implementations return the
/// payload to frame back as the reply, without the `$`/`#`/checksum wrapper.
pub trait GdbDispatcher
{
	fn dispatch(&mut self, packet: &[u8]) -> Vec<u8>;
}

/// Answers just enough of the RSP command set to prove a GDB session live: `qSupported`, `?`
/// and `QStartNoAckMode`. Everything else gets the empty reply, which per the RSP spec means
/// "unsupported" and is always a legal response.
#[derive(Debug, Default)]
pub struct NullDispatcher;

impl GdbDispatcher for NullDispatcher
{
	fn dispatch(&mut self, packet: &[u8]) -> Vec<u8>
	{
		if packet.starts_with(b"qSupported") {
			b"PacketSize=1000;QStartNoAckMode+".to_vec()
		} else if packet == b"?" {
			// No actual target is attached behind this dispatcher - report "no process".
			b"W00".to_vec()
		} else if packet == b"QStartNoAckMode" {
			b"OK".to_vec()
		} else {
			Vec::new()
		}
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn q_supported_advertises_noack_mode()
	{
		let mut dispatcher = NullDispatcher;
		let reply = dispatcher.dispatch(b"qSupported:multiprocess+;swbreak+");
		assert_eq!(reply, b"PacketSize=1000;QStartNoAckMode+");
	}

	#[test]
	fn start_noack_mode_is_acknowledged()
	{
		let mut dispatcher = NullDispatcher;
		assert_eq!(dispatcher.dispatch(b"QStartNoAckMode"), b"OK");
	}

	#[test]
	fn unknown_packet_gets_empty_reply()
	{
		let mut dispatcher = NullDispatcher;
		assert_eq!(dispatcher.dispatch(b"vMustReplyEmpty"), b"");
	}
}
