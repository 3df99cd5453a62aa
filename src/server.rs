// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! The GDB↔probe TCP bridge (spec.md §2, §6). Binds a single-connection TCP listener, resolves
//! a probe via [BmpMatcher], opens its serial interfaces and negotiates the remote protocol, then
//! pumps GDB packets through a [GdbDispatcher] for as long as the frontend stays connected.

use std::net::{TcpListener, TcpStream};

use color_eyre::eyre::{Context, Result, eyre};
use log::{info, warn};

use crate::bmp_matcher::BmpMatcher;
use crate::serial::dispatch::{GdbDispatcher, NullDispatcher};
use crate::serial::gdb_transport::GdbPacketTransport;

/// Fallback ports tried, in order, after `port` if the preferred one is already bound
/// (spec.md §6).
const PORT_FALLBACKS: [u16; 4] = [2001, 2002, 2003, 2004];

/// Bind the GDB frontend listener, preferring `port` and falling back through
/// [PORT_FALLBACKS] if it's already in use.
fn bind_listener(port: u16) -> Result<TcpListener>
{
	if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
		return Ok(listener);
	}

	for &fallback in &PORT_FALLBACKS {
		if let Ok(listener) = TcpListener::bind(("127.0.0.1", fallback)) {
			warn!("Port {port} is in use, listening on {fallback} instead");
			return Ok(listener);
		}
	}

	Err(eyre!(
		"Could not bind to port {port} or any of its fallbacks {PORT_FALLBACKS:?} - are they all in use?"
	))
}

/// Run the GDB server: bind the listener, then serially accept and service one GDB connection
/// at a time (spec.md §6 - only one connection is ever live) until the process is asked to stop.
///
/// Each accepted connection gets its own probe resolution and remote-protocol negotiation, so a
/// probe can be unplugged and replugged between GDB sessions without restarting the server.
pub fn run(matcher: &BmpMatcher, port: u16) -> Result<()>
{
	let listener = bind_listener(port).wrap_err("starting GDB server")?;
	info!("Listening for GDB connections on {}", listener.local_addr()?);

	loop {
		let (stream, peer) = listener.accept().wrap_err("accepting GDB connection")?;
		info!("GDB frontend connected from {peer}");

		if let Err(error) = serve_connection(matcher, stream) {
			warn!("GDB session ended with an error: {error:#}");
		} else {
			info!("GDB frontend disconnected");
		}
	}
}

/// Service a single GDB TCP connection end to end: resolve the probe, open its GDB serial
/// interface, negotiate the remote protocol, then pump packets until EOT or a transport error.
fn serve_connection(matcher: &BmpMatcher, stream: TcpStream) -> Result<()>
{
	stream.set_nodelay(true)?;

	let probe = matcher
		.clone()
		.find_matching_probes()
		.pop_single("start GDB server")
		.map_err(|kind| kind.error())?;

	let interface = probe.bmd_serial_interface().wrap_err("opening probe's GDB serial interface")?;
	let _remote = interface.remote().wrap_err("negotiating remote protocol with probe")?;

	let mut transport = GdbPacketTransport::new(stream);
	let mut dispatcher = NullDispatcher;

	loop {
		let packet = transport.get_packet(&mut |remote_packet| {
			// No remote-control processor is wired up yet; log and drop (spec.md §4.5).
			warn!("Ignoring {}-byte interleaved remote-control packet", remote_packet.payload.len());
		})?;

		if packet == [0x04] {
			return Ok(());
		}

		let reply = dispatcher.dispatch(&packet);
		if packet == b"QStartNoAckMode" {
			transport.set_noack_mode(true)?;
		}
		transport.put_packet(b"", &reply, false)?;
	}
}
