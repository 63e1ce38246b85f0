//! Link identifiers.
//!
//! Every link gets a random 40 bit ID when it is created. The ID never changes
//! and is independent of the link's name, so it keeps identifying the same row
//! even if the name is later reused by another link after a delete.
//!
//! The string form is 8 characters long: one decimal digit followed by 7
//! characters from a 38-character alphabet without lookalikes
//! (`6789BCDFGHJKLMNPQRTWXbcdfghjkmnpqrtwxz`).

use std::{
	fmt::{Debug, Display, Formatter, Result as FmtResult},
	str::FromStr,
};

use serde::{Deserialize, Serialize};

/// The error returned by fallible conversions into an [`Id`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
	/// The value does not fit into 40 bits
	#[error("value is too large")]
	TooLarge,
	/// The string is not exactly [`Id::CHARS`] characters long
	#[error("id has the wrong length")]
	Length,
	/// The string contains a character outside of the id alphabet
	#[error("id is in an invalid format")]
	InvalidFormat,
}

/// Alphabet of the last 7 characters of an ID's string form
const ALPHABET: &[u8; 38] = b"6789BCDFGHJKLMNPQRTWXbcdfghjkmnpqrtwxz";

/// A link's unique, immutable identifier
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id(u64);

impl Id {
	/// Number of characters in the string form of an ID
	pub const CHARS: usize = 8;
	/// Largest numeric value of an ID
	pub const MAX: u64 = (1 << 40) - 1;

	/// Generate a new random ID
	#[must_use]
	pub fn new() -> Self {
		Self(rand::random::<u64>() & Self::MAX)
	}

	/// Check whether a string is the string form of a valid ID
	#[must_use]
	pub fn is_valid(id: &str) -> bool {
		Self::from_str(id).is_ok()
	}

	/// The numeric value of this ID
	#[must_use]
	pub const fn to_u64(self) -> u64 {
		self.0
	}
}

impl Default for Id {
	fn default() -> Self {
		Self::new()
	}
}

impl Debug for Id {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		fmt.debug_tuple("Id").field(&self.to_string()).finish()
	}
}

impl Display for Id {
	#[allow(clippy::cast_possible_truncation)]
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		let mut buf = [0u8; Self::CHARS];
		let mut num = self.0;

		for c in buf.iter_mut().skip(1).rev() {
			*c = ALPHABET[(num % 38) as usize];
			num /= 38;
		}

		// 38^7 * 10 > 2^40, so the leading digit is always in range
		buf[0] = b'0' + (num % 10) as u8;

		fmt.write_str(std::str::from_utf8(&buf).map_err(|_| std::fmt::Error)?)
	}
}

impl TryFrom<u64> for Id {
	type Error = ConversionError;

	fn try_from(num: u64) -> Result<Self, Self::Error> {
		if num > Self::MAX {
			Err(ConversionError::TooLarge)
		} else {
			Ok(Self(num))
		}
	}
}

impl FromStr for Id {
	type Err = ConversionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = s.as_bytes();
		if bytes.len() != Self::CHARS {
			return Err(ConversionError::Length);
		}

		let mut num = match bytes[0] {
			d @ b'0'..=b'9' => u64::from(d - b'0'),
			_ => return Err(ConversionError::InvalidFormat),
		};

		for b in &bytes[1..] {
			let digit = ALPHABET
				.iter()
				.position(|a| a == b)
				.ok_or(ConversionError::InvalidFormat)?;
			num = num * 38 + digit as u64;
		}

		Self::try_from(num)
	}
}

impl TryFrom<String> for Id {
	type Error = ConversionError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		s.parse()
	}
}

impl TryFrom<&str> for Id {
	type Error = ConversionError;

	fn try_from(s: &str) -> Result<Self, Self::Error> {
		s.parse()
	}
}

impl From<Id> for String {
	fn from(id: Id) -> Self {
		id.to_string()
	}
}
