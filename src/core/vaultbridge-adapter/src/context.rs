//! Operation context shared by the adapters.

use std::fmt::Write as _;
use std::time::Instant;

use tracing::{debug, info, warn};

use vaultbridge_device::{
    ChipInfo, ChipState, Coprocessor, DeviceError, DigestAlgorithm, KeySlot, Role,
};

use crate::auth;
use crate::cipher::CachedKey;
use crate::config::AdapterConfig;
use crate::error::AdapterError;
use crate::hash::{HashAccumulator, MessageBuffer};

/// Persistent adapter state for one co-processor.
///
/// Holds at most one buffered hash message and at most one cached symmetric
/// key. Exclusively owned by one adapter instance; every operation takes
/// `&mut self`, so calls against one context are serialized by construction.
pub struct OperationContext<D: Coprocessor> {
    pub(crate) device: D,
    config: AdapterConfig,
    use_count: u32,
    chip: Option<ChipInfo>,
    pub(crate) hash: Option<HashAccumulator>,
    pub(crate) cached_key: Option<CachedKey>,
}

impl<D: Coprocessor> OperationContext<D> {
    /// Creates an uninitialized context owning `device`.
    pub fn new(device: D, config: AdapterConfig) -> Self {
        Self {
            device,
            config,
            use_count: 0,
            chip: None,
            hash: None,
            cached_key: None,
        }
    }

    /// Sets up the device, or bumps the use count if already set up.
    ///
    /// Opens the channel, drops any stale session, checks the chip is usable
    /// and authenticates as configured. Any failure leaves the context
    /// uninitialized and the channel closed.
    pub fn init(&mut self) -> Result<(), AdapterError> {
        if self.use_count > 0 {
            self.use_count += 1;
            debug!(use_count = self.use_count, "Adapter already initialized");
            return Ok(());
        }

        let params = self.config.comms_params();
        timed("open", || self.device.open(&params))?;

        match self.bring_up() {
            Ok(chip) => {
                info!(
                    serial = %hex::encode_upper(chip.serial),
                    firmware = %chip.firmware,
                    "Adapter initialized"
                );
                self.chip = Some(chip);
                self.use_count = 1;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Adapter initialization failed");
                self.close_device();
                Err(e)
            }
        }
    }

    fn bring_up(&mut self) -> Result<ChipInfo, AdapterError> {
        if let Err(e) = timed("end_authentication", || self.device.end_authentication()) {
            debug!(error = %e, "No session to cancel");
        }

        let chip = timed("get_info", || self.device.info())?;
        if chip.state == ChipState::Terminated {
            return Err(DeviceError::InvalidState("chip is terminated".into()).into());
        }
        if chip.role != Role::Everyone {
            return Err(DeviceError::InvalidState(format!(
                "session still open with role {:?}",
                chip.role
            ))
            .into());
        }

        auth::authenticate(&mut self.device, &self.config.auth, &chip)?;
        Ok(chip)
    }

    /// Releases one use; the last release wipes state and closes the device.
    pub fn cleanup(&mut self) {
        match self.use_count {
            0 => {}
            1 => {
                self.use_count = 0;
                self.hash = None;
                self.cached_key = None;
                self.chip = None;
                self.close_device();
                info!("Adapter cleaned up");
            }
            _ => {
                self.use_count -= 1;
                debug!(use_count = self.use_count, "Adapter use released");
            }
        }
    }

    fn close_device(&mut self) {
        if let Err(e) = timed("close", || self.device.close()) {
            warn!(error = %e, "Failed to close device");
        }
    }

    /// Fails with `NotInitialized` unless [`init`](Self::init) succeeded.
    pub fn ensure_initialized(&self) -> Result<(), AdapterError> {
        if self.use_count == 0 {
            return Err(AdapterError::NotInitialized);
        }
        Ok(())
    }

    /// Whether the context is set up.
    pub fn is_initialized(&self) -> bool {
        self.use_count > 0
    }

    /// Number of outstanding [`init`](Self::init) calls.
    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    /// Chip identity recorded at init.
    pub fn chip_info(&self) -> Option<&ChipInfo> {
        self.chip.as_ref()
    }

    /// Algorithm of the buffered message, if any.
    pub fn hash_algorithm(&self) -> Option<DigestAlgorithm> {
        self.hash.as_ref().map(|acc| acc.algorithm)
    }

    /// Buffered message, if any.
    pub fn message_buffer(&self) -> Option<&MessageBuffer> {
        self.hash.as_ref().map(|acc| &acc.buffer)
    }

    /// Number of buffered message bytes.
    pub fn buffered_len(&self) -> usize {
        self.hash.as_ref().map_or(0, |acc| acc.buffer.len())
    }

    /// Whether a symmetric key is cached.
    pub fn has_cached_key(&self) -> bool {
        self.cached_key.is_some()
    }

    /// Borrows the device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutably borrows the device.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Renders the chip information, one `KEY:value` per line.
    pub fn info_text(&mut self) -> Result<String, AdapterError> {
        self.ensure_initialized()?;
        let chip = timed("get_info", || self.device.info())?;

        let mut text = String::new();
        let _ = writeln!(text, "VERSION:{}", chip.firmware);
        let _ = writeln!(text, "SERIAL:{}", hex::encode_upper(chip.serial));
        let _ = writeln!(text, "STATE:{:02X}", chip.state.code());
        let _ = writeln!(text, "MODE:{:02X}", chip.mode);
        let _ = writeln!(text, "ROLE:{:02X}", chip.role.code());
        let _ = writeln!(text, "SELFTEST:{:02X}", chip.self_tests);
        let _ = writeln!(text, "SPACE:{}", chip.free_space);

        self.chip = Some(chip);
        Ok(text)
    }

    /// Runs the device self test.
    pub fn self_test(&mut self) -> Result<(), AdapterError> {
        self.ensure_initialized()?;
        timed("self_test", || self.device.self_test())?;
        info!("Device self test passed");
        Ok(())
    }
}

/// Runs one command exchange and logs how long it took.
pub(crate) fn timed<T>(
    command: &'static str,
    exchange: impl FnOnce() -> Result<T, DeviceError>,
) -> Result<T, DeviceError> {
    let start = Instant::now();
    let result = exchange();
    let elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
    debug!(
        command = command,
        elapsed_us = elapsed_us,
        ok = result.is_ok(),
        "Command exchange"
    );
    result
}

/// Deletes `slot` before provisioning it; an empty slot is expected.
pub(crate) fn discard_key<D: Coprocessor>(device: &mut D, slot: KeySlot) {
    if let Err(e) = timed("delete_key", || device.delete_key(slot)) {
        debug!(slot = %slot, error = %e, "Pre-provision delete ignored");
    }
}

/// Deletes a slot that must not outlive the current operation.
pub(crate) fn release_slot<D: Coprocessor>(device: &mut D, slot: KeySlot) {
    if let Err(e) = timed("delete_key", || device.delete_key(slot)) {
        warn!(slot = %slot, error = %e, "Failed to release key slot");
    }
}
