//! Receiving and contract address validation.

use alloy_primitives::Address;
use std::str::FromStr;

use crate::error::TokenError;

/// Version byte of TRON mainnet addresses.
const TRON_PREFIX: u8 = 0x41;

/// Validates a base58check TRON address (`T...`).
///
/// # Errors
///
/// [`TokenError::InvalidAddress`] for bad checksums, lengths, or prefixes.
pub fn validate_tron(address: &str) -> Result<String, TokenError> {
    let address = address.trim();
    let invalid = |reason: String| TokenError::InvalidAddress {
        network: "trc20",
        address: address.to_owned(),
        reason,
    };
    let bytes = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| invalid(e.to_string()))?;
    if bytes.len() != 21 {
        return Err(invalid(format!("{} bytes", bytes.len())));
    }
    if bytes[0] != TRON_PREFIX {
        return Err(invalid(format!("prefix {:#04x}", bytes[0])));
    }
    Ok(address.to_owned())
}

/// Validates a hex Ethereum address and returns its checksummed form.
///
/// Mixed-case input must carry a valid EIP-55 checksum; all-lowercase or
/// all-uppercase input is accepted as is.
///
/// # Errors
///
/// [`TokenError::InvalidAddress`] for malformed hex or a wrong checksum.
pub fn validate_ethereum(address: &str) -> Result<String, TokenError> {
    let address = address.trim();
    let invalid = |reason: String| TokenError::InvalidAddress {
        network: "erc20",
        address: address.to_owned(),
        reason,
    };
    let parsed = Address::from_str(address).map_err(|e| invalid(e.to_string()))?;
    let checksummed = parsed.to_checksum(None);
    let digits = address.trim_start_matches("0x");
    let mixed = digits.chars().any(|c| c.is_ascii_lowercase()) && digits.chars().any(|c| c.is_ascii_uppercase());
    if mixed && checksummed != address {
        return Err(invalid("checksum mismatch".to_owned()));
    }
    Ok(checksummed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tron_addresses() {
        assert!(validate_tron("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").is_ok());
        assert!(validate_tron(" TA4Y62o6YC2Zsck9rZVGTvqW1AQ7X9zTnj ").is_ok());
        assert!(validate_tron("TA4Y62o6YC2Zsck9rZVGTvqW1AQ7X9zTnk").is_err());
        assert!(validate_tron("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045").is_err());
    }

    #[test]
    fn ethereum_addresses() {
        let usdt = "0xdAC17F958D2ee523a2206206994597C13D831ec7";
        assert_eq!(validate_ethereum(usdt).unwrap(), usdt);
        assert_eq!(validate_ethereum(&usdt.to_ascii_lowercase()).unwrap(), usdt);
        assert!(validate_ethereum("0xdac17F958D2ee523a2206206994597C13D831ec7").is_err());
        assert!(validate_ethereum("0x1234").is_err());
    }
}
