//!
//! Shared helpers: the millisecond clock, uniform random sampling, the
//! day-granular backoff used for every "wait N days" computation, and the
//! decimal continuation-stamp arithmetic used by paginated feeds.

use chrono::Utc;
use rand::RngCore;
use thiserror::Error;

/// One day in milliseconds.
pub const DAY_MS: u64 = 86_400_000;

/// Raised when a requested random range needs more than 53 bits of entropy.
#[derive(Debug, Error)]
#[error("cannot generate numbers larger than 53 bits (range {0})")]
pub struct EntropyError(pub u64);

/// Current time as epoch milliseconds.
pub fn now_ms() -> u64 {
	Utc::now().timestamp_millis() as u64
}

/// Uniform random integer in `[min, max)`.
///
/// Samples whole bytes, masks down to the bits the range needs, and rejects
/// values past the range, so the distribution stays uniform. Ranges wider
/// than 53 bits are refused.
pub fn random_int(min: u64, max: u64) -> Result<u64, EntropyError> {
	assert!(max > min, "random_int requires max > min");
	let range = max - min;

	let bits_needed = 64 - (range - 1).leading_zeros();
	if bits_needed > 53 {
		return Err(EntropyError(range));
	}
	let bytes_needed = bits_needed.div_ceil(8) as usize;
	let mask = if bits_needed == 0 {
		0
	} else {
		(1u64 << bits_needed) - 1
	};

	let mut rng = rand::rng();
	loop {
		let mut buf = [0u8; 8];
		rng.fill_bytes(&mut buf[8 - bytes_needed..]);
		let rval = u64::from_be_bytes(buf) & mask;
		if rval < range {
			return Ok(min + rval);
		}
	}
}

/// Milliseconds to wait for a period of `days` days.
///
/// Every periodic computation in the client goes through this function; in
/// debug mode the period collapses to a fixed short interval so full cycles
/// can be exercised quickly.
pub fn backoff_ms(days: u32, debug: bool) -> u64 {
	if debug {
		1_000
	} else {
		u64::from(days) * DAY_MS
	}
}

/// Increment an opaque decimal timestamp string by one.
///
/// Continuation stamps are lexically ordered decimal strings, not numeric
/// types, so the increment is done digit-wise with carry propagation. A
/// non-decimal stamp is returned unchanged.
pub fn increment_timestamp(stamp: &str) -> String {
	if stamp.is_empty() || !stamp.bytes().all(|b| b.is_ascii_digit()) {
		return stamp.to_string();
	}

	let mut digits: Vec<u8> = stamp.bytes().collect();
	for digit in digits.iter_mut().rev() {
		if *digit == b'9' {
			*digit = b'0';
		} else {
			*digit += 1;
			return String::from_utf8(digits).expect("decimal digits are valid UTF-8");
		}
	}
	let mut carried = String::with_capacity(digits.len() + 1);
	carried.push('1');
	carried.push_str(&String::from_utf8(digits).expect("decimal digits are valid UTF-8"));
	carried
}
