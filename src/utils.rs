//! Identifier helpers

use crate::error::DispatchError;
use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32, e.g. "ride_1..."
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String, DispatchError> {
    let hrp = bech32::Hrp::parse(hrp).map_err(|e| DispatchError::Identifier(e.to_string()))?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| DispatchError::Identifier(e.to_string()))?;
    Ok(encode)
}

/// Round a currency amount to whole cents.
pub fn to_cents(amount: f64) -> u64 {
    (amount * 100.0).round().max(0.0) as u64
}
