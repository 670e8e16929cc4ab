//! HD receive-address derivation and allocation.
//!
//! Addresses are native segwit (`p2wpkh`) at `<account xpub>/0/<index>`.
//! SLIP-132 prefixes (`ypub`, `zpub`, `upub`, `vpub`) are accepted and
//! re-encoded with the plain `xpub`/`tpub` version bytes before parsing.

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::secp256k1::{Secp256k1, VerifyOnly};
use bitcoin::{Address, Network, NetworkKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::BitcoinError;
use crate::explorer::AddressActivity;

const XPUB: [u8; 4] = [0x04, 0x88, 0xb2, 0x1e];
const YPUB: [u8; 4] = [0x04, 0x9d, 0x7c, 0xb2];
const ZPUB: [u8; 4] = [0x04, 0xb2, 0x47, 0x46];
const TPUB: [u8; 4] = [0x04, 0x35, 0x87, 0xcf];
const UPUB: [u8; 4] = [0x04, 0x4a, 0x52, 0x62];
const VPUB: [u8; 4] = [0x04, 0x5f, 0x1c, 0xf6];

/// Serialized length of an extended key, without checksum.
const EXTENDED_KEY_LEN: usize = 78;

/// Re-encodes a SLIP-132 extended public key with standard version bytes.
fn normalize_xpub(raw: &str) -> Result<String, BitcoinError> {
    let mut data = bs58::decode(raw.trim())
        .with_check(None)
        .into_vec()
        .map_err(|e| BitcoinError::InvalidXpub(e.to_string()))?;
    if data.len() != EXTENDED_KEY_LEN {
        return Err(BitcoinError::InvalidXpub(format!("{} bytes", data.len())));
    }
    let version: [u8; 4] = [data[0], data[1], data[2], data[3]];
    let standard = match version {
        XPUB | YPUB | ZPUB => XPUB,
        TPUB | UPUB | VPUB => TPUB,
        other => {
            return Err(BitcoinError::InvalidXpub(format!(
                "unsupported version {}",
                hex_version(other)
            )));
        }
    };
    data[..4].copy_from_slice(&standard);
    Ok(bs58::encode(data).with_check().into_string())
}

fn hex_version(version: [u8; 4]) -> String {
    version.iter().map(|b| format!("{b:02x}")).collect()
}

/// Derives receive addresses from an account-level extended public key.
#[derive(Debug, Clone)]
pub struct AddressDeriver {
    xpub: Xpub,
    network: Network,
    secp: Secp256k1<VerifyOnly>,
}

impl AddressDeriver {
    /// Parses `xpub` and checks it belongs to `network`.
    ///
    /// # Errors
    ///
    /// [`BitcoinError::InvalidXpub`] for undecodable keys,
    /// [`BitcoinError::InvalidNetwork`] when the key is for another network.
    pub fn new(xpub: &str, network: &str) -> Result<Self, BitcoinError> {
        let network =
            Network::from_str(network.trim()).map_err(|_| BitcoinError::InvalidNetwork(network.to_owned()))?;
        let xpub = Xpub::from_str(&normalize_xpub(xpub)?).map_err(|e| BitcoinError::InvalidXpub(e.to_string()))?;
        if xpub.network != NetworkKind::from(network) {
            return Err(BitcoinError::InvalidNetwork(format!(
                "extended key does not belong to {network}"
            )));
        }
        Ok(Self {
            xpub,
            network,
            secp: Secp256k1::verification_only(),
        })
    }

    /// Network addresses are encoded for.
    #[must_use]
    pub const fn network(&self) -> Network {
        self.network
    }

    /// The receive address at `index`.
    ///
    /// # Errors
    ///
    /// [`BitcoinError::Derivation`] for hardened indexes.
    pub fn derive(&self, index: u32) -> Result<String, BitcoinError> {
        let path = [ChildNumber::from_normal_idx(0)?, ChildNumber::from_normal_idx(index)?];
        let child = self.xpub.derive_pub(&self.secp, &path)?;
        Ok(Address::p2wpkh(&child.to_pub(), self.network).to_string())
    }
}

/// Hands out receive addresses so that no two live assignments share one.
///
/// The cursor only moves past addresses the explorer reports as funded, so
/// an address that was handed out and never paid is offered again once its
/// lease is released.
pub struct AddressAllocator {
    deriver: AddressDeriver,
    activity: Arc<dyn AddressActivity>,
    gap_limit: u32,
    cursor: tokio::sync::Mutex<u32>,
    leases: Mutex<HashMap<String, u32>>,
}

impl Debug for AddressAllocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressAllocator")
            .field("network", &self.deriver.network())
            .field("gap_limit", &self.gap_limit)
            .field("leases", &self.leases.lock().len())
            .finish_non_exhaustive()
    }
}

impl AddressAllocator {
    /// Creates an allocator starting at index 0.
    #[must_use]
    pub fn new(deriver: AddressDeriver, activity: Arc<dyn AddressActivity>, gap_limit: u32) -> Self {
        Self {
            deriver,
            activity,
            gap_limit: gap_limit.max(1),
            cursor: tokio::sync::Mutex::new(0),
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Leases the first address at or after the cursor that is neither
    /// leased nor funded.
    ///
    /// # Errors
    ///
    /// [`BitcoinError::GapLimit`] when `gap_limit` consecutive addresses are
    /// all taken, or any explorer failure.
    pub async fn allocate(&self) -> Result<(u32, String), BitcoinError> {
        let mut cursor = self.cursor.lock().await;
        let mut index = *cursor;
        let mut contiguous = true;

        while index.saturating_sub(*cursor) < self.gap_limit {
            let address = self.deriver.derive(index)?;
            if self.leases.lock().contains_key(&address) {
                contiguous = false;
            } else if self.activity.has_received(&address).await? {
                if contiguous {
                    *cursor = index.saturating_add(1);
                    tracing::debug!(cursor = *cursor, %address, "derivation cursor advanced past funded address");
                }
            } else {
                self.leases.lock().insert(address.clone(), index);
                tracing::info!(index, %address, "leased bitcoin address");
                return Ok((index, address));
            }
            index = index
                .checked_add(1)
                .ok_or(BitcoinError::GapLimit(self.gap_limit))?;
        }

        tracing::warn!(cursor = *cursor, gap_limit = self.gap_limit, "no free bitcoin address within gap limit");
        Err(BitcoinError::GapLimit(self.gap_limit))
    }

    /// Returns `address` to the pool. Idempotent.
    pub fn release(&self, address: &str) -> bool {
        let released = self.leases.lock().remove(address).is_some();
        if released {
            tracing::debug!(%address, "released bitcoin address");
        }
        released
    }

    /// Number of leased addresses.
    #[must_use]
    pub fn leased(&self) -> usize {
        self.leases.lock().len()
    }

    /// First index that has not been observed funded.
    pub async fn cursor(&self) -> u32 {
        *self.cursor.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    const ZPUB_VECTOR: &str = "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs";
    const ADDR_0: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
    const ADDR_1: &str = "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g";

    #[derive(Default)]
    struct FundedSet {
        funded: Mutex<HashSet<String>>,
        broken: bool,
    }

    #[async_trait]
    impl AddressActivity for FundedSet {
        async fn has_received(&self, address: &str) -> Result<bool, BitcoinError> {
            if self.broken {
                return Err(BitcoinError::InvalidTip("explorer down".to_owned()));
            }
            Ok(self.funded.lock().contains(address))
        }
    }

    fn allocator(activity: Arc<FundedSet>, gap_limit: u32) -> AddressAllocator {
        let deriver = AddressDeriver::new(ZPUB_VECTOR, "bitcoin").unwrap();
        AddressAllocator::new(deriver, activity, gap_limit)
    }

    #[test]
    fn derives_bip84_receive_addresses() {
        let deriver = AddressDeriver::new(ZPUB_VECTOR, "bitcoin").unwrap();
        assert_eq!(deriver.derive(0).unwrap(), ADDR_0);
        assert_eq!(deriver.derive(1).unwrap(), ADDR_1);
    }

    #[test]
    fn rejects_bad_keys_and_wrong_network() {
        assert!(matches!(
            AddressDeriver::new("zpub-not-a-key", "bitcoin"),
            Err(BitcoinError::InvalidXpub(_))
        ));
        assert!(matches!(
            AddressDeriver::new(ZPUB_VECTOR, "testnet"),
            Err(BitcoinError::InvalidNetwork(_))
        ));
        assert!(matches!(
            AddressDeriver::new(ZPUB_VECTOR, "mainnet-ish"),
            Err(BitcoinError::InvalidNetwork(_))
        ));
    }

    #[tokio::test]
    async fn leased_addresses_are_never_handed_out_twice() {
        let allocator = allocator(Arc::new(FundedSet::default()), 50);
        let (first, a) = allocator.allocate().await.unwrap();
        let (second, b) = allocator.allocate().await.unwrap();
        assert_eq!((first, a.as_str()), (0, ADDR_0));
        assert_eq!((second, b.as_str()), (1, ADDR_1));

        assert!(allocator.release(&a));
        assert!(!allocator.release(&a));
        let (again, c) = allocator.allocate().await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(c, ADDR_0);
        assert_eq!(allocator.cursor().await, 0);
    }

    #[tokio::test]
    async fn cursor_advances_only_past_funded_addresses() {
        let activity = Arc::new(FundedSet::default());
        activity.funded.lock().insert(ADDR_0.to_owned());
        let allocator = allocator(Arc::clone(&activity), 50);

        let (index, address) = allocator.allocate().await.unwrap();
        assert_eq!(index, 1);
        assert_eq!(address, ADDR_1);
        assert_eq!(allocator.cursor().await, 1);

        // Index 1 is leased, not funded: the cursor stays put.
        let (index, _) = allocator.allocate().await.unwrap();
        assert_eq!(index, 2);
        assert_eq!(allocator.cursor().await, 1);
    }

    #[tokio::test]
    async fn gap_limit_bounds_the_scan() {
        let allocator = allocator(Arc::new(FundedSet::default()), 2);
        allocator.allocate().await.unwrap();
        allocator.allocate().await.unwrap();
        assert!(matches!(
            allocator.allocate().await,
            Err(BitcoinError::GapLimit(2))
        ));
        assert_eq!(allocator.leased(), 2);
    }

    #[tokio::test]
    async fn explorer_failure_leases_nothing() {
        let activity = Arc::new(FundedSet {
            broken: true,
            ..FundedSet::default()
        });
        let allocator = allocator(activity, 50);
        assert!(allocator.allocate().await.is_err());
        assert_eq!(allocator.leased(), 0);
    }
}
