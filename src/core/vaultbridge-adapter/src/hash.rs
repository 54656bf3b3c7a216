//! Message-buffering hash adapter.
//!
//! The co-processor only digests a complete message in one command, so
//! update calls append to a buffer held by the context and finalize issues
//! the single digest command over everything buffered.
//!
//! - A different algorithm discards whatever was buffered
//! - Finalize on an original releases the buffer
//! - Finalize on an independent copy reads the buffer and keeps it

use tracing::debug;
use zeroize::Zeroizing;

use vaultbridge_device::{Coprocessor, DeviceError, DigestAlgorithm};

use crate::context::{timed, OperationContext};
use crate::error::AdapterError;

/// Bytes buffered for one digest.
pub enum MessageBuffer {
    /// Growable buffer owned by the context.
    Owned(Zeroizing<Vec<u8>>),
    /// Read-only copy taken for an independent hash state.
    Snapshot(Zeroizing<Vec<u8>>),
}

impl MessageBuffer {
    fn empty() -> Self {
        Self::Owned(Zeroizing::new(Vec::new()))
    }

    /// Buffered bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Owned(bytes) | Self::Snapshot(bytes) => bytes.as_slice(),
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes an independent read-only copy.
    pub fn snapshot(&self) -> Self {
        Self::Snapshot(Zeroizing::new(self.as_bytes().to_vec()))
    }

    /// Appends `data`, in place when the current allocation has room.
    ///
    /// On failure the buffer is left as it was.
    fn append(&mut self, data: &[u8]) -> Result<(), AdapterError> {
        let Self::Owned(current) = self else {
            return Err(AdapterError::InvalidInput(
                "snapshot buffers are read-only".into(),
            ));
        };

        let total = current
            .len()
            .checked_add(data.len())
            .ok_or(AdapterError::OutOfMemory)?;
        reserve_total(current, total)?;
        current.extend_from_slice(data);
        Ok(())
    }
}

/// Makes room for `total` bytes in `current`.
///
/// Growth moves to a new allocation of at least twice the old capacity; the
/// old one is wiped when it is replaced. On failure `current` is untouched.
fn reserve_total(current: &mut Zeroizing<Vec<u8>>, total: usize) -> Result<(), AdapterError> {
    if total <= current.capacity() {
        return Ok(());
    }

    let target = total.max(current.capacity().saturating_mul(2));
    let mut grown = Vec::new();
    grown
        .try_reserve_exact(target)
        .map_err(|_| AdapterError::OutOfMemory)?;
    grown.extend_from_slice(current.as_slice());

    *current = Zeroizing::new(grown);
    Ok(())
}

impl std::fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Owned(_) => "Owned",
            Self::Snapshot(_) => "Snapshot",
        };
        f.debug_struct(kind)
            .field("len", &self.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Buffered message and the algorithm it is destined for.
pub(crate) struct HashAccumulator {
    pub(crate) algorithm: DigestAlgorithm,
    pub(crate) buffer: MessageBuffer,
}

/// Returns the accumulator for `algorithm`, discarding one for another algorithm.
fn select(
    slot: &mut Option<HashAccumulator>,
    algorithm: DigestAlgorithm,
) -> &mut HashAccumulator {
    if let Some(previous) = slot.as_ref().filter(|acc| acc.algorithm != algorithm) {
        debug!(
            from = %previous.algorithm,
            to = %algorithm,
            discarded = previous.buffer.len(),
            "Hash algorithm changed"
        );
        *slot = None;
    }
    slot.get_or_insert_with(|| HashAccumulator {
        algorithm,
        buffer: MessageBuffer::empty(),
    })
}

/// Buffers `data` for a later [`finalize`].
pub fn update<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    algorithm: DigestAlgorithm,
    data: Option<&[u8]>,
) -> Result<(), AdapterError> {
    ctx.ensure_initialized()?;
    let acc = select(&mut ctx.hash, algorithm);

    match data {
        Some(data) if !data.is_empty() => acc.buffer.append(data),
        _ => Ok(()),
    }
}

/// Digests the buffered message with one command and writes it to `out`.
///
/// An original state releases its buffer afterwards; an independent copy
/// keeps it so the original can continue.
pub fn finalize<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    algorithm: DigestAlgorithm,
    out: &mut [u8],
    is_independent_copy: bool,
) -> Result<(), AdapterError> {
    ctx.ensure_initialized()?;
    let size = algorithm.digest_size();
    if out.len() < size {
        return Err(AdapterError::InvalidInput(format!(
            "digest output needs {size} bytes, got {}",
            out.len()
        )));
    }

    let acc = select(&mut ctx.hash, algorithm);
    let device = &mut ctx.device;
    let digest = timed("digest", || device.run_digest(algorithm, acc.buffer.as_bytes()))?;

    if digest.len() != size {
        return Err(DeviceError::MalformedResponse(format!(
            "{algorithm} digest of {} bytes",
            digest.len()
        ))
        .into());
    }
    out[..size].copy_from_slice(&digest);

    if !is_independent_copy {
        ctx.hash = None;
    }
    Ok(())
}

/// Runs [`update`] when `data` is present, then [`finalize`] when `out` is.
pub fn process<D: Coprocessor>(
    ctx: &mut OperationContext<D>,
    algorithm: DigestAlgorithm,
    data: Option<&[u8]>,
    out: Option<&mut [u8]>,
    is_independent_copy: bool,
) -> Result<(), AdapterError> {
    if data.is_some() {
        update(ctx, algorithm, data)?;
    }
    if let Some(out) = out {
        finalize(ctx, algorithm, out, is_independent_copy)?;
    }
    Ok(())
}
