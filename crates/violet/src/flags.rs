use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Behaviour switches for routes and redirects, stored as a bare integer in
/// the database and in API bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(u64);

impl Flags {
	/// Prefix match: the source path is a mount point, not an exact match.
	pub const PRE: Flags = Flags(1 << 0);
	/// The destination path is absolute; the matched request suffix is not
	/// appended.
	pub const ABS: Flags = Flags(1 << 1);
	/// Wrap the exchange with permissive CORS headers.
	pub const CORS: Flags = Flags(1 << 2);
	/// Outbound scheme is https.
	pub const SECURE_MODE: Flags = Flags(1 << 3);
	/// Outbound Host is the inbound Host.
	pub const FORWARD_HOST: Flags = Flags(1 << 4);
	/// Append the inbound remote IP to X-Forwarded-For.
	pub const FORWARD_ADDR: Flags = Flags(1 << 5);
	/// Use the insecure outbound transport.
	pub const IGNORE_CERT: Flags = Flags(1 << 6);
	/// Allow the websocket upgrade path.
	pub const WEBSOCKET: Flags = Flags(1 << 7);

	const ROUTE_MASK: Flags = Flags(
		Self::PRE.0
			| Self::ABS.0
			| Self::CORS.0
			| Self::SECURE_MODE.0
			| Self::FORWARD_HOST.0
			| Self::FORWARD_ADDR.0
			| Self::IGNORE_CERT.0
			| Self::WEBSOCKET.0,
	);
	const REDIRECT_MASK: Flags = Flags(Self::PRE.0 | Self::ABS.0);

	pub const fn empty() -> Flags {
		Flags(0)
	}

	pub const fn from_bits(bits: u64) -> Flags {
		Flags(bits)
	}

	pub const fn bits(self) -> u64 {
		self.0
	}

	pub const fn has(self, flag: Flags) -> bool {
		self.0 & flag.0 != 0
	}

	/// Keep only the bits legal on a route.
	pub const fn normalise_route(self) -> Flags {
		Flags(self.0 & Self::ROUTE_MASK.0)
	}

	/// Keep only the bits legal on a redirect.
	pub const fn normalise_redirect(self) -> Flags {
		Flags(self.0 & Self::REDIRECT_MASK.0)
	}
}

impl BitOr for Flags {
	type Output = Flags;

	fn bitor(self, rhs: Flags) -> Flags {
		Flags(self.0 | rhs.0)
	}
}
