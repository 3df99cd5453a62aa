// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2022-2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Mikaela Szekely <mikaela.szekely@qyriad.me>
// SPDX-FileContributor: Written by Piotr Esden-Tempski <piotr@esden.net>
// SPDX-FileContributor: Modified by Rachel Mant <git@dragonmux.network>

pub mod bmp;
pub mod bmp_matcher;
pub mod error;
pub mod serial;
pub mod server;
pub mod usb;
pub mod probe_identity;

/// Device-selection arguments common to every subcommand that needs to pick out one connected
/// probe, implemented by the CLI's argument struct so [bmp_matcher::BmpMatcher::from_params] can
/// stay generic over whatever parses the command line.
pub trait BmpParams
{
	fn index(&self) -> Option<usize>;
	fn serial_number(&self) -> Option<&str>;
}
