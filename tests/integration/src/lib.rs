//! Integration tests for Vaultbridge.
//!
//! These tests drive the adapter through the dispatcher, exactly as a host
//! would, against the software co-processor and check the results against
//! reference implementations and the device command journal.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use anyhow::{Context, Result};
use sha2::{Digest, Sha256, Sha384, Sha512};

use vaultbridge_adapter::{
    dispatch, AdapterConfig, CipherRequest, CipherType, Command, DigestRequest, HashType,
    Operation, OperationContext, PublicKeyRequest, PublicKeyType, RsaOperation,
};
use vaultbridge_device::{SoftCoprocessor, AES_BLOCK_SIZE};

// ============================================================================
// Reference
// ============================================================================

/// Digest size of an offloaded hash.
pub fn digest_size(hash: HashType) -> usize {
    hash.offloaded().map_or(0, |algorithm| algorithm.digest_size())
}

/// Digest computed on the host for comparison.
pub fn reference_digest(hash: HashType, data: &[u8]) -> Vec<u8> {
    match hash {
        HashType::Sha256 => Sha256::digest(data).to_vec(),
        HashType::Sha384 => Sha384::digest(data).to_vec(),
        HashType::Sha512 => Sha512::digest(data).to_vec(),
        other => panic!("no reference for {other:?}"),
    }
}

/// Splits `data` at the given offsets (clamped and sorted).
pub fn split_at_offsets<'a>(data: &'a [u8], offsets: &[usize]) -> Vec<&'a [u8]> {
    let mut cuts: Vec<usize> = offsets.iter().map(|&o| o.min(data.len())).collect();
    cuts.sort_unstable();

    let mut chunks = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        chunks.push(&data[start..cut]);
        start = cut;
    }
    chunks.push(&data[start..]);
    chunks
}

// ============================================================================
// Harness
// ============================================================================

/// A registered adapter over a fresh software co-processor.
pub struct Harness {
    pub ctx: OperationContext<SoftCoprocessor>,
}

impl Harness {
    /// Registers an adapter with the default configuration.
    pub fn new() -> Result<Self> {
        let mut ctx = OperationContext::new(SoftCoprocessor::new(), AdapterConfig::default());
        dispatch(&mut ctx, Operation::Command(Command::Register))
            .context("Failed to register adapter")?;
        ctx.device_mut().clear_journal();
        Ok(Self { ctx })
    }

    pub fn device(&self) -> &SoftCoprocessor {
        self.ctx.device()
    }

    pub fn device_mut(&mut self) -> &mut SoftCoprocessor {
        self.ctx.device_mut()
    }

    /// One hash update.
    pub fn update(&mut self, hash: HashType, data: &[u8]) -> Result<()> {
        dispatch(
            &mut self.ctx,
            Operation::Digest(DigestRequest {
                hash,
                input: Some(data),
                output: None,
                is_independent_copy: false,
            }),
        )?;
        Ok(())
    }

    /// Hash finalize, as the original state or as an independent copy.
    pub fn finalize(&mut self, hash: HashType, is_independent_copy: bool) -> Result<Vec<u8>> {
        let mut out = vec![0u8; digest_size(hash)];
        dispatch(
            &mut self.ctx,
            Operation::Digest(DigestRequest {
                hash,
                input: None,
                output: Some(out.as_mut_slice()),
                is_independent_copy,
            }),
        )?;
        Ok(out)
    }

    /// Updates with every chunk, then finalizes.
    pub fn digest_chunks(&mut self, hash: HashType, chunks: &[&[u8]]) -> Result<Vec<u8>> {
        for chunk in chunks {
            self.update(hash, chunk)?;
        }
        self.finalize(hash, false)
    }

    /// One AES-CBC call.
    pub fn cbc(
        &mut self,
        key: &[u8],
        chaining_value: &mut [u8; AES_BLOCK_SIZE],
        input: &[u8],
        encrypt: bool,
    ) -> Result<Vec<u8>> {
        let mut output = vec![0u8; input.len()];
        dispatch(
            &mut self.ctx,
            Operation::Cipher(CipherRequest {
                cipher: CipherType::AesCbc,
                key,
                chaining_value,
                input,
                output: &mut output,
                encrypt,
            }),
        )?;
        Ok(output)
    }

    /// One raw RSA public encrypt.
    pub fn rsa_public(&mut self, modulus: &[u8], exponent: &[u8], input: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; modulus.len()];
        let mut written = 0usize;
        dispatch(
            &mut self.ctx,
            Operation::PublicKey(PublicKeyRequest {
                algorithm: PublicKeyType::Rsa(RsaOperation::PublicEncrypt),
                modulus,
                exponent,
                input,
                output: &mut output,
                output_len: &mut written,
            }),
        )?;
        output.truncate(written);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rsa::BigUint;
    use vaultbridge_adapter::{AdapterError, MessageBuffer, EPHEMERAL_KEY_SLOT};
    use vaultbridge_device::{CommandKind, CommandRecord, DeviceError};

    fn offloaded_hash() -> impl Strategy<Value = HashType> {
        prop_oneof![
            Just(HashType::Sha256),
            Just(HashType::Sha384),
            Just(HashType::Sha512),
        ]
    }

    fn test_modulus() -> Vec<u8> {
        let mut n: Vec<u8> = (0..128u32).map(|i| (i * 29 + 101) as u8).collect();
        n[0] |= 0x80;
        n[127] |= 0x01;
        n
    }

    /// Injected fault for the ephemeral slot property.
    #[derive(Debug, Clone, Copy)]
    enum Fault {
        None,
        Provision,
        Transform,
        Release,
    }

    proptest! {
        /// Any chunking of a message digests to the same value as the whole.
        #[test]
        fn prop_chunking_invariance(
            hash in offloaded_hash(),
            message in prop::collection::vec(any::<u8>(), 0..2048),
            offsets in prop::collection::vec(0..2048usize, 0..8),
        ) {
            let mut harness = Harness::new().unwrap();
            let chunks = split_at_offsets(&message, &offsets);

            let digest = harness.digest_chunks(hash, &chunks).unwrap();

            prop_assert_eq!(digest, reference_digest(hash, &message));
            prop_assert_eq!(harness.device().count(CommandKind::Digest), 1);
        }

        /// Switching algorithms discards what the previous one buffered.
        #[test]
        fn prop_algorithm_switch_isolation(
            first in offloaded_hash(),
            second in offloaded_hash(),
            stale in prop::collection::vec(any::<u8>(), 1..256),
            message in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            prop_assume!(first != second);
            let mut harness = Harness::new().unwrap();

            harness.update(first, &stale).unwrap();
            harness.update(second, &message).unwrap();
            let digest = harness.finalize(second, false).unwrap();

            prop_assert_eq!(digest, reference_digest(second, &message));
        }

        /// Finalizing a copy neither consumes nor disturbs the original.
        #[test]
        fn prop_copy_independence(
            hash in offloaded_hash(),
            prefix in prop::collection::vec(any::<u8>(), 0..512),
            suffix in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let mut harness = Harness::new().unwrap();

            harness.update(hash, &prefix).unwrap();
            let copy = harness.finalize(hash, true).unwrap();
            prop_assert_eq!(copy, reference_digest(hash, &prefix));

            harness.update(hash, &suffix).unwrap();
            let original = harness.finalize(hash, false).unwrap();

            let mut whole = prefix.clone();
            whole.extend_from_slice(&suffix);
            prop_assert_eq!(original, reference_digest(hash, &whole));
            prop_assert!(harness.ctx.message_buffer().is_none());
        }

        /// A key is provisioned once per change, never for a repeat.
        #[test]
        fn prop_key_cache_idempotence(
            sequence in prop::collection::vec(0..3u8, 1..24),
        ) {
            let mut harness = Harness::new().unwrap();
            let mut chain = [0u8; AES_BLOCK_SIZE];

            let mut expected_provisions = 0;
            let mut previous = None;
            for &index in &sequence {
                if previous != Some(index) {
                    expected_provisions += 1;
                }
                previous = Some(index);

                let key = [index.wrapping_add(1); 16];
                harness.cbc(&key, &mut chain, &[index; 16], true).unwrap();
            }

            prop_assert_eq!(
                harness.device().count(CommandKind::ProvisionKey),
                expected_provisions
            );
            prop_assert_eq!(harness.device().count(CommandKind::Cipher), sequence.len());
        }

        /// Splitting a CBC stream at block boundaries does not change it.
        #[test]
        fn prop_cbc_chaining_across_calls(
            key in prop::array::uniform16(any::<u8>()),
            iv in prop::array::uniform16(any::<u8>()),
            blocks in prop::collection::vec(prop::array::uniform16(any::<u8>()), 1..16),
            offsets in prop::collection::vec(0..16usize, 0..4),
        ) {
            let plaintext: Vec<u8> = blocks.concat();
            let block_offsets: Vec<usize> = offsets.iter().map(|o| o * AES_BLOCK_SIZE).collect();
            let mut harness = Harness::new().unwrap();

            let mut one_shot_chain = iv;
            let one_shot = harness.cbc(&key, &mut one_shot_chain, &plaintext, true).unwrap();

            let mut chain = iv;
            let mut ciphertext = Vec::new();
            for chunk in split_at_offsets(&plaintext, &block_offsets) {
                ciphertext.extend(harness.cbc(&key, &mut chain, chunk, true).unwrap());
            }
            prop_assert_eq!(&ciphertext, &one_shot);
            prop_assert_eq!(chain, one_shot_chain);

            let mut chain = iv;
            let mut recovered = Vec::new();
            for chunk in split_at_offsets(&ciphertext, &block_offsets) {
                recovered.extend(harness.cbc(&key, &mut chain, chunk, false).unwrap());
            }
            prop_assert_eq!(recovered, plaintext);
            prop_assert_eq!(harness.device().count(CommandKind::ProvisionKey), 1);
        }

        /// The ephemeral slot is empty after every operation, whatever fails.
        #[test]
        fn prop_ephemeral_slot_cleanup(
            fault in prop_oneof![
                Just(Fault::None),
                Just(Fault::Provision),
                Just(Fault::Transform),
                Just(Fault::Release),
            ],
            input in prop::collection::vec(any::<u8>(), 1..64),
        ) {
            let modulus = test_modulus();
            let mut harness = Harness::new().unwrap();
            match fault {
                Fault::None => {}
                Fault::Provision => harness.device_mut().fail_next(CommandKind::ProvisionKey),
                Fault::Transform => {
                    harness.device_mut().fail_next(CommandKind::PublicKeyTransform)
                }
                Fault::Release => harness.device_mut().fail_always(CommandKind::DeleteKey),
            }

            let result = harness.rsa_public(&modulus, &[0x01, 0x00, 0x01], &input);
            harness.device_mut().clear_faults();

            let journal: Vec<CommandRecord> = harness.device().journal().to_vec();
            let provision_at = journal
                .iter()
                .position(|r| r.kind == CommandKind::ProvisionKey)
                .unwrap();
            let deletes_after = journal[provision_at + 1..]
                .iter()
                .filter(|r| r.kind == CommandKind::DeleteKey && r.slot == Some(EPHEMERAL_KEY_SLOT))
                .count();
            prop_assert_eq!(deletes_after, 1);
            prop_assert_eq!(journal.last().map(|r| r.kind), Some(CommandKind::DeleteKey));

            match fault {
                Fault::None | Fault::Release => {
                    let output = result.unwrap();
                    let expected = BigUint::from_bytes_be(&input)
                        .modpow(&BigUint::from(65537u32), &BigUint::from_bytes_be(&modulus));
                    prop_assert_eq!(BigUint::from_bytes_be(&output), expected);
                }
                Fault::Provision | Fault::Transform => prop_assert!(result.is_err()),
            }
            if !matches!(fault, Fault::Release) {
                prop_assert!(!harness.device().slot_occupied(EPHEMERAL_KEY_SLOT));
            }
        }
    }

    #[test]
    fn test_empty_message_digest() {
        for hash in [HashType::Sha256, HashType::Sha384, HashType::Sha512] {
            let mut fresh = Harness::new().unwrap();
            let without_update = fresh.finalize(hash, false).unwrap();

            let mut harness = Harness::new().unwrap();
            harness.update(hash, &[]).unwrap();
            assert!(harness
                .ctx
                .message_buffer()
                .is_some_and(MessageBuffer::is_empty));
            let with_empty_update = harness.finalize(hash, false).unwrap();

            assert_eq!(without_update, with_empty_update);
            assert_eq!(without_update, reference_digest(hash, b""));
        }
    }

    #[test]
    fn test_snapshot_survives_original_finalize() {
        let mut harness = Harness::new().unwrap();
        harness.update(HashType::Sha384, b"shared prefix").unwrap();

        let snapshot = harness.ctx.message_buffer().unwrap().snapshot();
        harness.update(HashType::Sha384, b", then more").unwrap();
        harness.finalize(HashType::Sha384, false).unwrap();

        assert!(harness.ctx.message_buffer().is_none());
        assert!(matches!(snapshot, MessageBuffer::Snapshot(_)));
        assert_eq!(snapshot.as_bytes(), b"shared prefix");
    }

    #[test]
    fn test_many_chunk_updates_through_dispatch() {
        let message: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        let mut harness = Harness::new().unwrap();

        for chunk in message.chunks(4096) {
            harness.update(HashType::Sha256, chunk).unwrap();
        }
        assert_eq!(harness.ctx.buffered_len(), message.len());

        let digest = harness.finalize(HashType::Sha256, false).unwrap();
        assert_eq!(digest, reference_digest(HashType::Sha256, &message));
    }

    #[test]
    fn test_hardware_error_surfaces_through_dispatch() {
        let mut harness = Harness::new().unwrap();
        harness.device_mut().fail_next(CommandKind::Digest);

        harness.update(HashType::Sha256, b"abc").unwrap();
        let err = harness.finalize(HashType::Sha256, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AdapterError>(),
            Some(AdapterError::Hardware(DeviceError::Status { .. }))
        ));

        let digest = harness.finalize(HashType::Sha256, false).unwrap();
        assert_eq!(digest, reference_digest(HashType::Sha256, b"abc"));
    }

    #[test]
    fn test_cbc_known_answer_through_dispatch() {
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let mut chain: [u8; 16] = hex::decode("000102030405060708090a0b0c0d0e0f")
            .unwrap()
            .try_into()
            .unwrap();
        let plaintext = hex::decode(
            "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51",
        )
        .unwrap();

        let mut harness = Harness::new().unwrap();
        let ciphertext = harness.cbc(&key, &mut chain, &plaintext, true).unwrap();

        assert_eq!(
            hex::encode(ciphertext),
            "7649abac8119b246cee98e9b12e9197d5086cb9b507219ee95db113a917678b2"
        );
        assert_eq!(hex::encode(chain), "5086cb9b507219ee95db113a917678b2");
    }

    #[test]
    fn test_contexts_are_isolated() {
        let mut a = Harness::new().unwrap();
        let mut b = Harness::new().unwrap();

        a.update(HashType::Sha256, b"only in a").unwrap();
        let digest_b = b.finalize(HashType::Sha256, false).unwrap();
        assert_eq!(digest_b, reference_digest(HashType::Sha256, b""));

        let digest_a = a.finalize(HashType::Sha256, false).unwrap();
        assert_eq!(digest_a, reference_digest(HashType::Sha256, b"only in a"));
    }

    #[test]
    fn test_unregister_wipes_state() {
        let mut harness = Harness::new().unwrap();
        let mut chain = [0u8; 16];
        harness.update(HashType::Sha512, b"pending").unwrap();
        harness.cbc(&[4u8; 16], &mut chain, &[0u8; 16], true).unwrap();

        dispatch(&mut harness.ctx, Operation::Command(Command::Unregister)).unwrap();
        assert!(harness.ctx.message_buffer().is_none());
        assert!(!harness.ctx.has_cached_key());

        let err = harness.finalize(HashType::Sha512, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AdapterError>(),
            Some(AdapterError::NotInitialized)
        ));
    }
}
