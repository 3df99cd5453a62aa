// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Byte-oriented GDB Remote Serial Protocol framing (spec.md §4.1), with an interleaved
//! remote-control capture mode (spec.md §4.5) so a single TCP connection can carry both GDB
//! traffic and in-band probe-control packets.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use color_eyre::eyre::{Result, eyre};

const GDB_MAX_PACKET_SIZE: usize = 4096;
const GDB_ACK_TIMEOUT: Duration = Duration::from_secs(2);
const GDB_PUT_PACKET_RETRIES: usize = 3;

const GDB_START: u8 = b'$';
const GDB_END: u8 = b'#';
const GDB_ESCAPE: u8 = b'}';
const GDB_ESCAPE_XOR: u8 = 0x20;
const GDB_NOTIFICATION: u8 = b'%';
const REMOTE_START: u8 = b'!';
const REMOTE_END: u8 = b'#';
const EOT: u8 = 0x04;
const ACK: u8 = b'+';
const NACK: u8 = b'-';

/// A captured remote-control packet, handed to whatever processes `!...#` frames interleaved
/// with GDB traffic (spec.md §4.5). The transport itself only frames these; it does not
/// interpret them.
pub struct RemoteControlPacket
{
	pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State
{
	Idle,
	GdbCapture,
	GdbEscape,
	ChecksumUpper,
	ChecksumLower,
	RemoteCapture,
}

/// Frames, escapes, checksums, acknowledges and retransmits GDB RSP packets on a bidirectional
/// byte stream, generically over `Read + Write` so the state machine is unit-testable against an
/// in-memory mock instead of a real TCP socket.
pub struct GdbPacketTransport<S>
{
	stream: S,
	noack: bool,
}

impl<S> GdbPacketTransport<S>
where
	S: Read + Write,
{
	pub fn new(stream: S) -> Self
	{
		Self {
			stream,
			noack: false,
		}
	}

	pub fn noack_mode(&self) -> bool
	{
		self.noack
	}

	/// `set_noack_mode(enable)` — disabling an active NoAck session emits one final `+` to the
	/// frontend, matching the invariant in spec.md §3.
	pub fn set_noack_mode(&mut self, enable: bool) -> Result<()>
	{
		if self.noack && !enable {
			self.stream.write_all(&[ACK])?;
		}
		self.noack = enable;
		Ok(())
	}

	fn read_byte(&mut self) -> Result<u8>
	{
		let mut byte = [0u8; 1];
		self.stream.read_exact(&mut byte)?;
		Ok(byte[0])
	}

	/// `get_packet(out_buffer) -> size`. Runs the byte-by-byte state machine from spec.md §4.1
	/// until either a complete, checksum-accepted GDB packet is captured (returned as `Ok(Some)`),
	/// a remote-control packet is captured (returned as `Ok(None)` with the packet pushed via
	/// `remote_sink`), or an EOT byte signals connection close (`Ok(Some(vec![0x04]))`).
	pub fn get_packet(&mut self, remote_sink: &mut dyn FnMut(RemoteControlPacket)) -> Result<Vec<u8>>
	{
		let mut state = State::Idle;
		let mut payload = Vec::with_capacity(GDB_MAX_PACKET_SIZE);
		let mut checksum: u8 = 0;
		let mut checksum_high = 0u8;

		loop {
			let byte = self.read_byte()?;

			match state {
				State::Idle => match byte {
					GDB_START => {
						payload.clear();
						checksum = 0;
						state = State::GdbCapture;
					},
					REMOTE_START => {
						payload.clear();
						state = State::RemoteCapture;
					},
					EOT => return Ok(vec![EOT]),
					_ => {},
				},
				State::GdbCapture => match byte {
					GDB_START => {
						payload.clear();
						checksum = 0;
					},
					GDB_END => state = State::ChecksumUpper,
					GDB_ESCAPE => {
						checksum = checksum.wrapping_add(byte);
						state = State::GdbEscape;
					},
					_ => {
						checksum = checksum.wrapping_add(byte);
						if payload.len() >= GDB_MAX_PACKET_SIZE {
							state = State::Idle;
							payload.clear();
						} else {
							payload.push(byte);
						}
					},
				},
				State::GdbEscape => {
					checksum = checksum.wrapping_add(byte);
					payload.push(byte ^ GDB_ESCAPE_XOR);
					state = State::GdbCapture;
				},
				State::ChecksumUpper => match hex_nibble(byte) {
					Some(nibble) => {
						checksum_high = nibble;
						state = State::ChecksumLower;
					},
					None => state = State::Idle,
				},
				State::ChecksumLower => {
					match hex_nibble(byte) {
						Some(nibble) => {
							let received = (checksum_high << 4) | nibble;
							if self.noack || received == checksum {
								if !self.noack {
									self.stream.write_all(&[ACK])?;
								}
								return Ok(payload);
							} else {
								self.stream.write_all(&[NACK])?;
							}
						},
						None => {},
					}
					state = State::Idle;
				},
				State::RemoteCapture => match byte {
					GDB_START => {
						payload.clear();
						checksum = 0;
						state = State::GdbCapture;
					},
					REMOTE_START => {
						payload.clear();
					},
					REMOTE_END => {
						remote_sink(RemoteControlPacket {
							payload: std::mem::take(&mut payload),
						});
						state = State::Idle;
					},
					_ => {
						if payload.len() >= GDB_MAX_PACKET_SIZE {
							state = State::Idle;
							payload.clear();
						} else {
							payload.push(byte);
						}
					},
				},
			}
		}
	}

	/// `put_packet(preamble, data, hexify)`. Sends `$` + preamble + (hex-encoded if requested)
	/// data + `#` + checksum, retrying on NACK/timeout up to [GDB_PUT_PACKET_RETRIES] times unless
	/// NoAck mode is active.
	pub fn put_packet(&mut self, preamble: &[u8], data: &[u8], hexify: bool) -> Result<()>
	{
		let mut body = Vec::with_capacity(preamble.len() + data.len() * 2);
		body.extend_from_slice(preamble);
		if hexify {
			for byte in data {
				body.extend_from_slice(format!("{byte:02x}").as_bytes());
			}
		} else {
			body.extend_from_slice(data);
		}

		let mut frame = Vec::with_capacity(body.len() * 2 + 4);
		let mut checksum: u8 = 0;
		frame.push(GDB_START);
		for &byte in &body {
			if byte == GDB_START || byte == GDB_END || byte == GDB_ESCAPE {
				checksum = checksum.wrapping_add(GDB_ESCAPE);
				frame.push(GDB_ESCAPE);
				checksum = checksum.wrapping_add(byte ^ GDB_ESCAPE_XOR);
				frame.push(byte ^ GDB_ESCAPE_XOR);
			} else {
				checksum = checksum.wrapping_add(byte);
				frame.push(byte);
			}
		}
		frame.push(GDB_END);
		frame.extend_from_slice(format!("{checksum:02x}").as_bytes());

		if self.noack {
			self.stream.write_all(&frame)?;
			return Ok(());
		}

		for attempt in 0..GDB_PUT_PACKET_RETRIES {
			self.stream.write_all(&frame)?;
			match self.wait_for_ack() {
				Ok(true) => return Ok(()),
				Ok(false) => continue,
				Err(error) if attempt + 1 == GDB_PUT_PACKET_RETRIES => return Err(error),
				Err(_) => continue,
			}
		}
		Err(eyre!("GDB frontend did not acknowledge packet after {GDB_PUT_PACKET_RETRIES} attempts"))
	}

	/// `put_notification(data)` — sends `%` + escaped data + `#` + checksum with no ACK wait,
	/// regardless of NoAck mode.
	pub fn put_notification(&mut self, data: &[u8]) -> Result<()>
	{
		let mut frame = Vec::with_capacity(data.len() * 2 + 4);
		let mut checksum: u8 = 0;
		frame.push(GDB_NOTIFICATION);
		for &byte in data {
			if byte == GDB_START || byte == GDB_END || byte == GDB_ESCAPE {
				checksum = checksum.wrapping_add(GDB_ESCAPE);
				frame.push(GDB_ESCAPE);
				checksum = checksum.wrapping_add(byte ^ GDB_ESCAPE_XOR);
				frame.push(byte ^ GDB_ESCAPE_XOR);
			} else {
				checksum = checksum.wrapping_add(byte);
				frame.push(byte);
			}
		}
		frame.push(GDB_END);
		frame.extend_from_slice(format!("{checksum:02x}").as_bytes());
		self.stream.write_all(&frame)?;
		Ok(())
	}

	fn wait_for_ack(&mut self) -> Result<bool>
	{
		let deadline = Instant::now() + GDB_ACK_TIMEOUT;
		loop {
			let byte = self.read_byte()?;
			match byte {
				ACK => return Ok(true),
				NACK => return Ok(false),
				_ => {
					if Instant::now() >= deadline {
						return Ok(false);
					}
				},
			}
		}
	}
}

fn hex_nibble(byte: u8) -> Option<u8>
{
	(byte as char).to_digit(16).map(|value| value as u8)
}

#[cfg(test)]
mod tests
{
	use std::collections::VecDeque;
	use std::io;

	use super::*;

	/// A tiny in-memory duplex stream standing in for a TCP socket in unit tests.
	struct MockStream
	{
		inbound: VecDeque<u8>,
		outbound: Vec<u8>,
	}

	impl MockStream
	{
		fn new(inbound: &[u8]) -> Self
		{
			Self {
				inbound: inbound.iter().copied().collect(),
				outbound: Vec::new(),
			}
		}
	}

	impl Read for MockStream
	{
		fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>
		{
			if self.inbound.is_empty() {
				return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "mock stream exhausted"));
			}
			let mut count = 0;
			for slot in buf.iter_mut() {
				if let Some(byte) = self.inbound.pop_front() {
					*slot = byte;
					count += 1;
				} else {
					break;
				}
			}
			Ok(count)
		}
	}

	impl Write for MockStream
	{
		fn write(&mut self, buf: &[u8]) -> io::Result<usize>
		{
			self.outbound.extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> io::Result<()>
		{
			Ok(())
		}
	}

	#[test]
	fn simple_packet_is_captured_and_acked()
	{
		// "$qSupported#37" - checksum of "qSupported" is 0x37
		let stream = MockStream::new(b"$qSupported#37");
		let mut transport = GdbPacketTransport::new(stream);
		let mut captured = None;
		let packet = transport.get_packet(&mut |remote| captured = Some(remote)).unwrap();
		assert_eq!(packet, b"qSupported");
		assert!(captured.is_none());
		assert_eq!(transport.stream.outbound, vec![ACK]);
	}

	#[test]
	fn bad_checksum_is_nacked_and_retried()
	{
		let stream = MockStream::new(b"$x#00$x#78");
		let mut transport = GdbPacketTransport::new(stream);
		let packet = transport.get_packet(&mut |_| {}).unwrap();
		assert_eq!(packet, b"x");
		assert_eq!(transport.stream.outbound, vec![NACK, ACK]);
	}

	#[test]
	fn escaped_byte_is_unescaped_and_counted_in_checksum()
	{
		// '}' (0x7d) escapes the following byte; 0x03 XOR 0x20 = 0x23 ('#')
		// checksum = '}' (0x7d) + 0x03 = 0x80
		let mut stream_bytes = Vec::new();
		stream_bytes.extend_from_slice(b"$");
		stream_bytes.push(GDB_ESCAPE);
		stream_bytes.push(0x03);
		stream_bytes.extend_from_slice(b"#80");
		let stream = MockStream::new(&stream_bytes);
		let mut transport = GdbPacketTransport::new(stream);
		let packet = transport.get_packet(&mut |_| {}).unwrap();
		assert_eq!(packet, vec![GDB_END]);
	}

	#[test]
	fn eot_byte_closes_the_connection()
	{
		let stream = MockStream::new(&[EOT]);
		let mut transport = GdbPacketTransport::new(stream);
		let packet = transport.get_packet(&mut |_| {}).unwrap();
		assert_eq!(packet, vec![EOT]);
	}

	#[test]
	fn remote_control_packet_is_captured_without_touching_gdb_payload()
	{
		let stream = MockStream::new(b"!GA#$qSupported#37");
		let mut transport = GdbPacketTransport::new(stream);
		let mut captured = None;
		let packet = transport.get_packet(&mut |remote| captured = Some(remote)).unwrap();
		assert_eq!(packet, b"qSupported");
		assert_eq!(captured.unwrap().payload, b"GA");
	}

	#[test]
	fn noack_mode_skips_checksum_verification_and_ack()
	{
		let stream = MockStream::new(b"$y#ff");
		let mut transport = GdbPacketTransport::new(stream);
		transport.set_noack_mode(true).unwrap();
		let packet = transport.get_packet(&mut |_| {}).unwrap();
		assert_eq!(packet, b"y");
		assert!(transport.stream.outbound.is_empty());
	}

	#[test]
	fn disabling_noack_mode_emits_a_final_ack()
	{
		let stream = MockStream::new(b"");
		let mut transport = GdbPacketTransport::new(stream);
		transport.set_noack_mode(true).unwrap();
		transport.set_noack_mode(false).unwrap();
		assert_eq!(transport.stream.outbound, vec![ACK]);
	}
}
