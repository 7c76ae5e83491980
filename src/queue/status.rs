//! The persistent ring descriptor shared by every process touching the
//! queue.
//!
//! The `status` file holds `head` and `tail` as little-endian `u64`s at
//! offset 0, padded to 4096 bytes. The open tickets are the half-open range
//! `[head, tail)` modulo 2^64; `head == tail` reads as empty, which is why
//! the allocator refuses the increment that would produce it (one slot is
//! deliberately never used). Every access takes an exclusive advisory lock
//! on the whole file — safe across unrelated processes, released by the
//! kernel if the holder dies — and every mutation is flushed to storage
//! before the lock is dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;

use super::{QueueError, Ticket};

/// Name of the status file inside the queue directory.
pub const STATUS_FILE: &str = "status";

/// Fixed size of the status file.
const STATUS_SIZE: usize = 4096;

/// Length of the counter record at the head of the file.
const RECORD_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record {
    head: u64,
    tail: u64,
}

impl Record {
    fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut head = [0u8; 8];
        let mut tail = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        tail.copy_from_slice(&bytes[8..]);
        Self {
            head: u64::from_le_bytes(head),
            tail: u64::from_le_bytes(tail),
        }
    }

    fn encode(self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[..8].copy_from_slice(&self.head.to_le_bytes());
        bytes[8..].copy_from_slice(&self.tail.to_le_bytes());
        bytes
    }
}

/// Handle on the queue's status file.
pub struct QueueStatus {
    file: File,
}

impl QueueStatus {
    /// Open the status file inside `dir`, creating it as 4096 zero bytes if
    /// absent. Creation is exclusive; losing the creation race to another
    /// process just retries the plain open.
    ///
    /// # Errors
    ///
    /// Any I/O failure here is fatal for the caller: without the status file
    /// no process may touch the queue.
    pub fn open(dir: &Path) -> Result<Self, QueueError> {
        let path = dir.join(STATUS_FILE);
        loop {
            match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => return Ok(Self { file }),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }

            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    if let Err(err) = file
                        .write_all(&[0u8; STATUS_SIZE])
                        .and_then(|()| file.sync_all())
                    {
                        let _ = std::fs::remove_file(&path);
                        return Err(err.into());
                    }
                    return Ok(Self { file });
                }
                // A concurrent creator won the race; go open its file.
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Allocate the next ticket: `tail` is handed out and incremented
    /// (wrapping). Fails with [`QueueError::Full`] — leaving both counters
    /// untouched — when the increment would make `head == tail`.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] on ring exhaustion, [`QueueError::Lock`] or I/O
    /// errors on status-file trouble.
    pub fn allocate(&self) -> Result<Ticket, QueueError> {
        self.with_lock(|record| {
            let id = record.tail;
            let tail = id.wrapping_add(1);
            if tail == record.head {
                return Err(QueueError::Full);
            }
            record.tail = tail;
            Ok(Ticket::new(id))
        })
    }

    /// Read both counters under the lock (a torn read of the 128-bit pair is
    /// otherwise possible).
    ///
    /// # Errors
    ///
    /// [`QueueError::Lock`] or I/O errors.
    pub fn snapshot(&self) -> Result<(u64, u64), QueueError> {
        self.with_lock(|record| Ok((record.head, record.tail)))
    }

    /// Persist a new `head`, flushing before the lock is released.
    ///
    /// # Errors
    ///
    /// [`QueueError::Lock`] or I/O errors.
    pub fn advance_head(&self, head: u64) -> Result<(), QueueError> {
        self.with_lock(|record| {
            record.head = head;
            Ok(())
        })
    }

    /// Persist a new `head` and return the current `tail`, in one lock
    /// acquisition. The scheduler uses this at the end of every pass.
    ///
    /// # Errors
    ///
    /// [`QueueError::Lock`] or I/O errors.
    pub fn commit_head(&self, head: u64) -> Result<u64, QueueError> {
        self.with_lock(|record| {
            record.head = head;
            Ok(record.tail)
        })
    }

    #[cfg(test)]
    pub(crate) fn reset(&self, head: u64, tail: u64) -> Result<(), QueueError> {
        self.with_lock(|record| {
            record.head = head;
            record.tail = tail;
            Ok(())
        })
    }

    fn with_lock<T>(
        &self,
        mutate: impl FnOnce(&mut Record) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        self.file.lock_exclusive().map_err(QueueError::Lock)?;

        let result = (|| -> Result<T, QueueError> {
            let mut record = self.read_record()?;
            let before = record;
            let value = mutate(&mut record)?;
            if record != before {
                self.write_record(record)?;
                self.file.sync_data()?;
            }
            Ok(value)
        })();

        let unlocked = FileExt::unlock(&self.file);
        let value = result?;
        unlocked.map_err(QueueError::Lock)?;
        Ok(value)
    }

    fn read_record(&self) -> Result<Record, QueueError> {
        let mut file = &self.file;
        let mut bytes = [0u8; RECORD_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut bytes).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                QueueError::CorruptStatus("status record truncated".into())
            } else {
                QueueError::Io(err)
            }
        })?;
        Ok(Record::decode(&bytes))
    }

    fn write_record(&self, record: Record) -> Result<(), QueueError> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&record.encode())?;
        Ok(())
    }
}

/// Number of open tickets for a `(head, tail)` snapshot, modulo 2^64.
#[must_use]
pub const fn pending(head: u64, tail: u64) -> u64 {
    tail.wrapping_sub(head)
}
