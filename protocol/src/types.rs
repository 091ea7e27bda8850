//! # Identifiers
//!
//! Strongly-typed identifiers used across the engine. Addresses and asset
//! symbols are validated on construction (and on deserialization), so any
//! `Address` or `AssetId` that reaches the engine is already well-formed.
//! Vault and proposal identifiers are random UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::{MAX_ADDRESS_LENGTH, MAX_ASSET_LENGTH};
use crate::error::VaultError;

/// Returns `true` if `s` is non-empty, at most `max` bytes and free of
/// whitespace and control characters.
fn is_valid_token(s: &str, max: usize) -> bool {
    !s.is_empty() && s.len() <= max && !s.chars().any(|c| c.is_whitespace() || c.is_control())
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// An account address: a vault owner, a transfer recipient, or a depositor.
///
/// The engine treats addresses as opaque strings. Key management and
/// signature verification happen upstream of the engine; by the time a
/// call arrives here, the caller's address has already been authenticated.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parses and validates an address.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidAddress`] if the input is empty, longer
    /// than [`MAX_ADDRESS_LENGTH`], or contains whitespace.
    pub fn new(s: impl Into<String>) -> Result<Self, VaultError> {
        let s = s.into();
        if !is_valid_token(&s, MAX_ADDRESS_LENGTH) {
            return Err(VaultError::InvalidAddress(s));
        }
        Ok(Self(s))
    }

    /// Returns the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = VaultError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl FromStr for Address {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// AssetId
// ---------------------------------------------------------------------------

/// The symbol of an asset held by a vault (e.g. `SUI`, `USDC`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    /// Parses and validates an asset symbol.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidAsset`] if the symbol is empty, longer
    /// than [`MAX_ASSET_LENGTH`], or contains whitespace.
    pub fn new(s: impl Into<String>) -> Result<Self, VaultError> {
        let s = s.into();
        if !is_valid_token(&s, MAX_ASSET_LENGTH) {
            return Err(VaultError::InvalidAsset(s));
        }
        Ok(Self(s))
    }

    /// Returns the symbol as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AssetId {
    type Error = VaultError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<AssetId> for String {
    fn from(a: AssetId) -> Self {
        a.0
    }
}

impl FromStr for AssetId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// VaultId / ProposalId
// ---------------------------------------------------------------------------

/// Unique identifier of a vault.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultId(Uuid);

impl VaultId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the big-endian byte form, used as the sled key.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl FromStr for VaultId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultId({})", self.0.hyphenated())
    }
}

/// Unique identifier of a proposal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(Uuid);

impl ProposalId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the big-endian byte form, used as the sled key.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl FromStr for ProposalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProposalId({})", self.0.hyphenated())
    }
}
