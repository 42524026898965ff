// Live-ingest patch sessions.
//
// A session owns a background worker that drains a bounded byte queue fed
// by the caller, runs the patch engine against the source region and a
// staged destination image, and reports its outcome through a single-fire
// completion channel. The producer context and the worker share nothing but
// the queue; the session state machine (`Created → Running → Completed |
// Failed → Finalized`) is driven solely by the worker's outcome.
//
// Finalize commits the staged image and selects it as next-active only on
// success; on any failure the destination-write handle is discarded and the
// previously selected image keeps running.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::PatchError;
use crate::flash::{BankInput, BankOutput, ImageBank, ImageWriter, Region};
use crate::hdiff::{HdiffEngine, PatchEngine};
use crate::stream::QueueSource;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Tunables for a live-ingest session.
#[derive(Debug, Clone)]
pub struct OtaOptions {
    /// Approximate bound on bytes buffered between producer and worker.
    pub queue_bytes: usize,
    /// How long the worker waits for queue data before failing the whole
    /// session with `Starved`. This caps how long a stalled source can hold
    /// the destination region half-written.
    pub read_timeout: Duration,
}

impl Default for OtaOptions {
    fn default() -> Self {
        Self {
            queue_bytes: 2048,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Producer chunks are split to this size before enqueueing so the queue
/// bound tracks bytes rather than message counts.
const QUEUE_CHUNK: usize = 512;

// ---------------------------------------------------------------------------
// OtaSession
// ---------------------------------------------------------------------------

type WorkerVerdict<W> = Result<W, PatchError>;

/// A running live-ingest patch application.
///
/// Create with [`OtaSession::begin`], feed compressed diff bytes with
/// [`write`](OtaSession::write) as they arrive, then call
/// [`finalize`](OtaSession::finalize) once the full diff has been enqueued.
pub struct OtaSession<B: ImageBank> {
    bank: B,
    tx: Option<SyncSender<Vec<u8>>>,
    done: Option<Receiver<WorkerVerdict<B::Writer>>>,
    worker: Option<JoinHandle<()>>,
    outcome: Option<Result<(), PatchError>>,
}

impl<B: ImageBank> OtaSession<B> {
    /// Start a session with the default engine and options. The new image's
    /// size is unknown up front (it is determined by the diff).
    pub fn begin<R>(src: R, bank: B, diff_size: u64) -> Result<Self, PatchError>
    where
        R: Region + Send + 'static,
    {
        Self::begin_with(
            src,
            bank,
            None,
            diff_size,
            HdiffEngine::default(),
            OtaOptions::default(),
        )
    }

    /// Start a session, choosing the engine, the expected image size, and
    /// the queue tuning.
    ///
    /// Opening the destination-write handle invalidates any previously
    /// staged update on the bank (first-writer-wins).
    pub fn begin_with<R, E>(
        src: R,
        mut bank: B,
        image_size: Option<u64>,
        diff_size: u64,
        engine: E,
        options: OtaOptions,
    ) -> Result<Self, PatchError>
    where
        R: Region + Send + 'static,
        E: PatchEngine + Send + 'static,
    {
        let writer = bank.begin(image_size)?;

        let depth = (options.queue_bytes / QUEUE_CHUNK).max(1);
        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(depth);
        let (done_tx, done_rx) = mpsc::sync_channel::<WorkerVerdict<B::Writer>>(1);
        let timeout = options.read_timeout;

        debug!(
            "patch session starting: diff_size={diff_size}, queue={}B, timeout={timeout:?}",
            options.queue_bytes
        );

        let worker = thread::Builder::new()
            .name("oxipatch-ota".into())
            .spawn(move || {
                let mut old = BankInput::new(src);
                let mut queue = QueueSource::new(rx, diff_size, timeout);
                let mut out = BankOutput::new(writer);

                let verdict = match engine.apply(&mut old, &mut out, &mut queue) {
                    Ok(()) => Ok(out.into_inner()),
                    Err(e) => {
                        error!("patch worker failed: {e}");
                        // `out` still holds the write handle; dropping it at
                        // the end of this scope discards the staged image.
                        Err(e)
                    }
                };
                // A missing receiver means the session was dropped
                // mid-flight; the writer is discarded either way.
                let _ = done_tx.send(verdict);
            })?;

        Ok(Self {
            bank,
            tx: Some(tx),
            done: Some(done_rx),
            worker: Some(worker),
            outcome: None,
        })
    }

    /// Enqueue more compressed diff bytes. Chunks of any size are accepted;
    /// the call blocks until the bytes fit in the queue and fails with
    /// `SessionClosed` once the session has already completed or failed.
    pub fn write(&self, data: &[u8]) -> Result<(), PatchError> {
        let tx = self.tx.as_ref().ok_or(PatchError::SessionClosed)?;
        for chunk in data.chunks(QUEUE_CHUNK) {
            tx.send(chunk.to_vec())
                .map_err(|_| PatchError::SessionClosed)?;
        }
        Ok(())
    }

    /// Wait for the worker to finish, then commit and select the new image
    /// on success or discard it on failure. Tears down the worker, the
    /// queue, and the completion signal in either case.
    ///
    /// Calling `finalize` again is a no-op that returns the first outcome.
    pub fn finalize(&mut self) -> Result<(), PatchError> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        // No more producer data; a worker still waiting on the queue sees a
        // disconnect instead of idling out its timeout.
        self.tx = None;

        let verdict = match self.done.take() {
            Some(rx) => rx.recv().unwrap_or(Err(PatchError::SessionClosed)),
            None => Err(PatchError::SessionClosed),
        };
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }

        let outcome = verdict.and_then(|writer| {
            writer.commit()?;
            self.bank.select_next()?;
            info!("update staged and selected; reboot to activate");
            Ok(())
        });
        self.outcome = Some(outcome.clone());
        outcome
    }
}

impl<B: ImageBank> Drop for OtaSession<B> {
    fn drop(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        if self.worker.is_none() {
            return;
        }
        warn!("patch session dropped mid-flight; stopping worker");
        // Disconnect the queue so the worker fails its next read, then wait
        // for it to exit before the staged write handle is released.
        self.tx = None;
        if let Some(rx) = self.done.take() {
            // The writer (if the worker succeeded) is dropped uncommitted.
            let _ = rx.recv();
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{MemBank, MemRegion};
    use crate::hdiff::varint;

    /// Cover-free container carrying `new` as literal data.
    fn literal_diff(old_len: usize, new: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(crate::hdiff::MAGIC);
        out.extend_from_slice(b"zlib\0");
        let mut ctrl = Vec::new();
        if !new.is_empty() {
            varint::encode_packed(&mut ctrl, new.len() as u64 - 1, 0, 2);
        }
        for v in [
            new.len() as u64,
            old_len as u64,
            0,
            0,
            0,
            ctrl.len() as u64,
            0,
            0,
            0,
            new.len() as u64,
            0,
        ] {
            varint::encode_packed(&mut out, v, 0, 0);
        }
        out.extend_from_slice(&ctrl);
        out.extend_from_slice(new);
        out
    }

    #[test]
    fn session_applies_and_selects() {
        let old = b"running image".to_vec();
        let new = b"replacement image, somewhat longer".to_vec();
        let diff = literal_diff(old.len(), &new);

        let bank = MemBank::new(256);
        let mut session =
            OtaSession::begin(MemRegion::from(old), bank.clone(), diff.len() as u64).unwrap();

        // Feed in deliberately awkward chunk sizes.
        for chunk in diff.chunks(5) {
            session.write(chunk).unwrap();
        }
        session.finalize().unwrap();

        assert_eq!(bank.committed_image().unwrap(), new);
        assert!(bank.is_selected());
    }

    #[test]
    fn starved_session_fails_within_timeout() {
        let old = b"old".to_vec();
        let new = b"new image data".to_vec();
        let diff = literal_diff(old.len(), &new);

        let bank = MemBank::new(256);
        let mut session = OtaSession::begin_with(
            MemRegion::from(old),
            bank.clone(),
            None,
            diff.len() as u64,
            HdiffEngine::default(),
            OtaOptions {
                read_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        )
        .unwrap();

        // Only half the diff ever arrives; the producer side stays attached.
        session.write(&diff[..diff.len() / 2]).unwrap();

        // Give the worker time to drain the queue and hit its read timeout.
        std::thread::sleep(Duration::from_millis(200));

        let err = session.finalize().unwrap_err();
        assert!(matches!(err, PatchError::Starved(_)));
        assert!(bank.committed_image().is_none());
        assert!(!bank.is_selected());
    }

    #[test]
    fn double_finalize_returns_first_outcome() {
        let old = b"ab".to_vec();
        let new = b"cd".to_vec();
        let diff = literal_diff(old.len(), &new);

        let bank = MemBank::new(64);
        let mut session =
            OtaSession::begin(MemRegion::from(old), bank.clone(), diff.len() as u64).unwrap();
        session.write(&diff).unwrap();

        assert!(session.finalize().is_ok());
        assert!(session.finalize().is_ok());
        assert_eq!(bank.committed_image().unwrap(), new);
    }

    #[test]
    fn write_after_failure_is_session_closed() {
        let bank = MemBank::new(64);
        // Garbage diff: the worker fails parsing almost immediately.
        let mut session =
            OtaSession::begin(MemRegion::from(b"old".to_vec()), bank.clone(), 64).unwrap();
        session.write(b"not a diff container at all, truly").unwrap();

        assert!(session.finalize().is_err());
        let err = session.write(b"more").unwrap_err();
        assert!(matches!(err, PatchError::SessionClosed));
        assert!(!bank.is_selected());
    }

    #[test]
    fn drop_mid_flight_discards_staged_image() {
        let old = b"old".to_vec();
        let diff = literal_diff(old.len(), b"something new");

        let bank = MemBank::new(64);
        let session =
            OtaSession::begin(MemRegion::from(old), bank.clone(), diff.len() as u64).unwrap();
        // Feed part of the diff, then walk away.
        session.write(&diff[..8]).unwrap();
        drop(session);

        assert!(bank.committed_image().is_none());
        assert!(!bank.is_selected());
    }

    #[test]
    fn destination_write_failure_never_selects() {
        let old = b"old".to_vec();
        let new = vec![0xA5u8; 128];
        let diff = literal_diff(old.len(), &new);

        // Bank too small for the new image.
        let bank = MemBank::new(16);
        let mut session =
            OtaSession::begin(MemRegion::from(old), bank.clone(), diff.len() as u64).unwrap();
        let _ = session.write(&diff);

        let err = session.finalize().unwrap_err();
        assert!(matches!(err, PatchError::OutOfBounds { .. }));
        assert!(bank.committed_image().is_none());
        assert!(!bank.is_selected());
    }
}
