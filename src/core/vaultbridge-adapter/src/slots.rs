//! Key slots reserved by the adapter.

use vaultbridge_device::KeySlot;

/// Key group owned by the adapter.
pub const ADAPTER_GROUP_ID: u8 = 0xBB;

/// Slot holding the cached AES key.
pub const SYMMETRIC_KEY_SLOT: KeySlot = KeySlot::new(ADAPTER_GROUP_ID, 0x01);

/// Slot holding the transient public key of a single operation.
pub const EPHEMERAL_KEY_SLOT: KeySlot = KeySlot::new(ADAPTER_GROUP_ID, 0x03);
