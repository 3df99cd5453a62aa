// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! The Black Magic Debug remote serial protocol stack: GDB packet framing, the versioned
//! remote control protocol, and the ADIv5/ADIv6 access layer built on top of it.

pub mod bmd_rsp;
pub mod dispatch;
pub mod gdb_rsp;
pub mod gdb_transport;
pub mod interface;
pub mod remote;
