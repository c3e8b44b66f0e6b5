//! Transfer types and the allowed-types bitmap

use serde::{Deserialize, Serialize};

use crate::{CordonTypeError, Result};

/// Highest transfer type value the bitmap can represent.
pub const MAX_TRANSFER_TYPE: u8 = 7;

/// A transfer type, identified by its bit position in the allowed-types bitmap.
///
/// The first three positions are named; the remaining positions up to
/// [`MAX_TRANSFER_TYPE`] are reserved for future policy classes and are valid
/// to register today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferType(pub u8);

impl TransferType {
    /// Direct payment to an external recipient
    pub const PAYMENT: TransferType = TransferType(0);
    /// Transfer between sub-accounts of the same avatar
    pub const TRANSFER: TransferType = TransferType(1);
    /// Interbank settlement transfer
    pub const INTERBANK: TransferType = TransferType(2);

    /// Whether this type fits in the bitmap.
    pub fn is_valid(&self) -> bool {
        self.0 <= MAX_TRANSFER_TYPE
    }

    /// The bit this type occupies in the bitmap.
    pub fn bit(&self) -> u8 {
        1 << self.0
    }
}

impl std::fmt::Display for TransferType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            TransferType::PAYMENT => write!(f, "payment"),
            TransferType::TRANSFER => write!(f, "transfer"),
            TransferType::INTERBANK => write!(f, "interbank"),
            TransferType(t) => write!(f, "type-{}", t),
        }
    }
}

/// Bitmap of transfer types a sub-account may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeBitmap(pub u8);

impl TypeBitmap {
    /// Build a bitmap from a list of types.
    ///
    /// Fails with [`CordonTypeError::InvalidTransferType`] if any type exceeds
    /// [`MAX_TRANSFER_TYPE`]. An empty list yields an empty bitmap, which
    /// allows nothing.
    pub fn from_types(types: &[TransferType]) -> Result<Self> {
        let mut bitmap = 0u8;
        for t in types {
            if !t.is_valid() {
                return Err(CordonTypeError::InvalidTransferType { transfer_type: t.0 });
            }
            bitmap |= t.bit();
        }
        Ok(Self(bitmap))
    }

    /// Whether the bitmap allows a transfer type.
    pub fn allows(&self, t: TransferType) -> bool {
        t.is_valid() && self.0 & t.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}
