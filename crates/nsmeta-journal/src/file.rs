//! Cyclic journal file
//!
//! A fixed-capacity ring of records behind a 4 KiB header:
//! ```text
//! +--------+----------+------------------------------------+
//! | "GfMj" | version  | zero padding up to 4096 bytes      |
//! +--------+----------+------------------------------------+
//! | record | record | ...   writer ->  | older lap | zeros |
//! +--------------------------------------------------------+
//! ```
//!
//! One writer appends records; when a record does not fit before the end
//! of the ring the remainder is zero-filled and the writer restarts at the
//! header boundary with its lap counter incremented. Readers are cursors
//! with their own lap counters. The main reader blocks the writer: the
//! writer never overwrites bytes at or beyond its committed position.
//! Readers attached for replication fan-out never block the writer and
//! are invalidated instead.
//!
//! All cursor state sits behind one mutex. Record bytes are read outside
//! it once the position has been copied.

use crate::ops::{JournalOp, OperationTag};
use crate::reader::{JournalReader, ReadOutcome, ReaderId};
use crate::record::{
    RECORD_CRC_SIZE, RECORD_HEADER_SIZE, RECORD_PAYLOAD_MAX, RawRecords, RecordHeader,
    encode_record, record_len, split_record,
};
use crate::scan::{ScanFor, ScanResult, find_rw_pos};
use bytes::Bytes;
use nsmeta_common::config::{JOURNAL_HEADER_SIZE, JOURNAL_MIN_SIZE, JournalConfig};
use nsmeta_common::{Error, Result, Seqnum};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Journal file magic
pub const JOURNAL_MAGIC: [u8; 4] = *b"GfMj";

/// Current on-disk format version
pub const JOURNAL_VERSION: u32 = 1;

/// Shared handle to an open journal
pub type JournalHandle = Arc<JournalFile>;

const ZERO_FILL_CHUNK: usize = 64 * 1024;

/// Unlocked scans tried before `add_reader` scans under the state lock
const ADD_READER_SCAN_ATTEMPTS: usize = 3;

#[derive(Debug)]
struct WriterCursor {
    pos: u64,
    lap: u64,
    last_seqnum: Seqnum,
}

#[derive(Debug)]
struct ReaderCursor {
    read_pos: u64,
    read_lap: u64,
    committed_pos: u64,
    committed_lap: u64,
    /// Main reader: the writer waits for it instead of overrunning it
    block_writer: bool,
    /// Overrun by the writer; every later read fails
    invalid: bool,
    expired: bool,
    drain: bool,
    /// Blocked in a read waiting for the writer
    waiting: bool,
}

impl ReaderCursor {
    const fn new(pos: u64, lap: u64, block_writer: bool) -> Self {
        Self {
            read_pos: pos,
            read_lap: lap,
            committed_pos: pos,
            committed_lap: lap,
            block_writer,
            invalid: false,
            expired: false,
            drain: false,
            waiting: false,
        }
    }

    /// Whether appending `rec_len` bytes at the writer position would
    /// overwrite data this reader has not committed.
    const fn writer_must_wait(&self, wpos: u64, wlap: u64, rec_len: u64, max_size: u64) -> bool {
        let (rpos, rlap) = (self.committed_pos, self.committed_lap);
        if wpos == rpos {
            wlap > rlap
        } else if wpos < rpos {
            wpos + rec_len > rpos
        } else {
            rpos < rec_len + JOURNAL_HEADER_SIZE && wpos + rec_len > max_size
        }
    }

    /// Whether this reader survives the writer appending `rec_len` bytes
    const fn survives_write(&self, wpos: u64, wlap: u64, rec_len: u64, max_size: u64) -> bool {
        let (rpos, rlap) = (self.committed_pos, self.committed_lap);
        if wlap == rlap {
            !(rpos > wpos || (wpos + rec_len > max_size && rec_len + JOURNAL_HEADER_SIZE > rpos))
        } else if wlap == rlap + 1 {
            rpos >= wpos + rec_len
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct JournalState {
    writer: WriterCursor,
    /// End of the data of the lap before the writer's
    tail: u64,
    readers: HashMap<ReaderId, ReaderCursor>,
    next_reader_id: ReaderId,
    closed: bool,
}

/// Summary of a verbatim batch append
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawWriteSummary {
    pub first_seqnum: Seqnum,
    pub last_seqnum: Seqnum,
    pub records: usize,
    /// BEGIN count minus END count in the batch
    pub nest_delta: i64,
}

/// A record copied out of the ring without decoding its payload
#[derive(Clone, Debug)]
pub struct RawRecord {
    pub header: RecordHeader,
    pub bytes: Bytes,
}

/// Cyclic journal file
pub struct JournalFile {
    path: PathBuf,
    file: File,
    max_size: u64,
    sync_on_write: bool,
    write_wait_timeout: Duration,
    state: Mutex<JournalState>,
    /// Signalled after every append and on close
    nonempty: Condvar,
    /// Signalled after every commit, reader detach and on close
    nonfull: Condvar,
}

impl std::fmt::Debug for JournalFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalFile")
            .field("path", &self.path)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl JournalFile {
    /// Open or create the journal at `path` and position the main reader
    /// at the first transaction following `db_seqnum`.
    pub fn open(
        path: impl AsRef<Path>,
        config: &JournalConfig,
        db_seqnum: Seqnum,
    ) -> Result<(JournalHandle, JournalReader)> {
        let path = path.as_ref().to_path_buf();
        let max_size = config.max_size;
        if max_size < JOURNAL_MIN_SIZE {
            return Err(Error::invalid_argument(format!(
                "journal max_size {max_size} is below the minimum {JOURNAL_MIN_SIZE}"
            )));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!(
                    "failed to create journal directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                Error::Storage(format!("failed to open journal {}: {}", path.display(), e))
            })?;

        let mut file_len = file.metadata()?.len();
        if file_len > max_size {
            return Err(Error::invalid_argument(format!(
                "journal {} is {} bytes, larger than max_size {}",
                path.display(),
                file_len,
                max_size
            )));
        }
        if file_len < JOURNAL_HEADER_SIZE {
            if file_len > 0 {
                warn!(
                    "Journal {} is shorter than its header ({} bytes), recreating",
                    path.display(),
                    file_len
                );
            }
            file.set_len(0)?;
            write_file_header(&file)?;
            file_len = JOURNAL_HEADER_SIZE;
        }

        #[allow(clippy::cast_possible_truncation)]
        let mut data = vec![0u8; file_len as usize];
        file.read_exact_at(&mut data, 0)?;
        check_file_header(&data)?;

        let scan = find_rw_pos(&data, db_seqnum, ScanFor::Writer);
        drop(data);

        info!(
            "Opened journal {}: max_size={} db_seqnum={} last_seqnum={} read_pos={} write_pos={}",
            path.display(),
            max_size,
            db_seqnum,
            scan.max_seqnum,
            scan.read_pos,
            scan.write_pos
        );

        let mut readers = HashMap::new();
        readers.insert(0, ReaderCursor::new(scan.read_pos, scan.read_lap, true));

        let journal = Arc::new(Self {
            path,
            file,
            max_size,
            sync_on_write: config.sync_on_write,
            write_wait_timeout: config.write_wait_timeout,
            state: Mutex::new(JournalState {
                writer: WriterCursor {
                    pos: scan.write_pos,
                    lap: scan.write_lap,
                    last_seqnum: scan.max_seqnum.max(db_seqnum),
                },
                tail: scan.tail,
                readers,
                next_reader_id: 1,
                closed: false,
            }),
            nonempty: Condvar::new(),
            nonfull: Condvar::new(),
        });
        let reader = JournalReader::new(Arc::clone(&journal), 0);
        Ok((journal, reader))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Highest seqnum known to the writer
    #[must_use]
    pub fn last_seqnum(&self) -> Seqnum {
        self.state.lock().writer.last_seqnum
    }

    /// Writer offset and lap
    #[must_use]
    pub fn writer_position(&self) -> (u64, u64) {
        let st = self.state.lock();
        (st.writer.pos, st.writer.lap)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn check_record_len(&self, rec_len: u64) -> Result<()> {
        if rec_len + JOURNAL_HEADER_SIZE > self.max_size
            || rec_len > (RECORD_HEADER_SIZE + RECORD_PAYLOAD_MAX + RECORD_CRC_SIZE) as u64
        {
            return Err(Error::invalid_argument(format!(
                "record of {} bytes can never fit in a journal of {} bytes",
                rec_len, self.max_size
            )));
        }
        Ok(())
    }

    /// Append one record.
    ///
    /// The record length comes from a size-probe pass and is checked
    /// against the ring before anything is encoded.
    pub fn write(&self, seqnum: Seqnum, op: &JournalOp) -> Result<()> {
        let rec_len = record_len(op) as u64;
        self.check_record_len(rec_len)?;
        let bytes = encode_record(seqnum, op);

        let mut st = self.state.lock();
        if seqnum <= st.writer.last_seqnum {
            return Err(Error::Sequencing {
                expected: st.writer.last_seqnum + 1,
                actual: seqnum,
            });
        }
        let pos = self.append_locked(&mut st, &bytes)?;
        st.writer.last_seqnum = seqnum;
        drop(st);

        debug!(
            "journal write: seqnum={} ope={} pos={} len={}",
            seqnum,
            op.tag(),
            pos,
            rec_len
        );
        Ok(())
    }

    /// Append already-serialized records verbatim.
    ///
    /// Every record is CRC-checked before the first byte is written. The
    /// records are appended one at a time; `summary` describes the ones
    /// that landed, also when a later record fails.
    pub fn write_raw(&self, batch: &[u8], summary: &mut RawWriteSummary) -> Result<()> {
        let records = RawRecords::new(batch).collect::<Result<Vec<_>>>()?;
        for (header, bytes) in &records {
            header.op_tag()?;
            self.check_record_len(bytes.len() as u64)?;
        }

        let mut st = self.state.lock();
        for (header, bytes) in records {
            if header.seqnum <= st.writer.last_seqnum {
                return Err(Error::Sequencing {
                    expected: st.writer.last_seqnum + 1,
                    actual: header.seqnum,
                });
            }
            self.append_locked(&mut st, bytes)?;
            st.writer.last_seqnum = header.seqnum;

            match OperationTag::from_u16(header.tag) {
                Some(OperationTag::Begin) => summary.nest_delta += 1,
                Some(OperationTag::End) => summary.nest_delta -= 1,
                _ => {}
            }
            if summary.records == 0 {
                summary.first_seqnum = header.seqnum;
            }
            summary.last_seqnum = header.seqnum;
            summary.records += 1;
        }
        drop(st);

        if summary.records > 0 {
            debug!(
                "journal write_raw: seqnum={}..{} records={}",
                summary.first_seqnum, summary.last_seqnum, summary.records
            );
        }
        Ok(())
    }

    /// Block until `len` bytes can be appended without overrunning the
    /// main reader, for at most the write wait timeout. Nothing is written
    /// and no fan-out reader is expired.
    pub fn wait_for_room(&self, len: u64) -> Result<()> {
        if len + JOURNAL_HEADER_SIZE > self.max_size {
            return Err(Error::JournalFull {
                required: len,
                max_size: self.max_size,
            });
        }
        let mut st = self.state.lock();
        self.wait_room_locked(&mut st, len, false)
    }

    /// Wait until the main reader leaves room for `rec_len` bytes at the
    /// writer position. With `expire_fanout`, fan-out readers the append
    /// would overrun are invalidated.
    fn wait_room_locked(
        &self,
        st: &mut MutexGuard<'_, JournalState>,
        rec_len: u64,
        expire_fanout: bool,
    ) -> Result<()> {
        let deadline = Instant::now() + self.write_wait_timeout;

        loop {
            if st.closed {
                return Err(Error::Closed);
            }
            let (wpos, wlap) = (st.writer.pos, st.writer.lap);
            let mut blocked: Option<bool> = None;
            for (id, r) in &mut st.readers {
                if r.block_writer {
                    if r.writer_must_wait(wpos, wlap, rec_len, self.max_size) {
                        blocked = Some(blocked.unwrap_or(false) || r.waiting);
                    }
                } else if expire_fanout
                    && !r.invalid
                    && !r.survives_write(wpos, wlap, rec_len, self.max_size)
                {
                    r.invalid = true;
                    r.expired = true;
                    info!(
                        "Journal reader {} expired: writer pos={} lap={}, reader pos={} lap={}",
                        id, wpos, wlap, r.committed_pos, r.committed_lap
                    );
                }
            }

            match blocked {
                None => return Ok(()),
                // the main reader is waiting for data that can only come
                // after this write
                Some(true) => {
                    warn!(
                        "Journal full while its reader waits for data: record len={} max_size={}",
                        rec_len, self.max_size
                    );
                    return Err(Error::JournalFull {
                        required: rec_len,
                        max_size: self.max_size,
                    });
                }
                Some(false) => {
                    if Instant::now() >= deadline {
                        warn!(
                            "Journal full after waiting {:?}: record len={} max_size={}",
                            self.write_wait_timeout, rec_len, self.max_size
                        );
                        return Err(Error::JournalFull {
                            required: rec_len,
                            max_size: self.max_size,
                        });
                    }
                    self.nonfull.wait_until(st, deadline);
                }
            }
        }
    }

    /// Wait for room, rewind if needed and write `bytes` at the writer
    /// position. Returns the offset written.
    fn append_locked(&self, st: &mut MutexGuard<'_, JournalState>, bytes: &[u8]) -> Result<u64> {
        let rec_len = bytes.len() as u64;
        self.wait_room_locked(st, rec_len, true)?;

        if st.writer.pos + rec_len > self.max_size {
            self.zero_fill(st.writer.pos)?;
            st.tail = st.writer.pos;
            st.writer.pos = JOURNAL_HEADER_SIZE;
            st.writer.lap += 1;
            info!(
                "Journal writer rewound: tail={} lap={}",
                st.tail, st.writer.lap
            );
        }

        let pos = st.writer.pos;
        self.file.write_all_at(bytes, pos)?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        st.writer.pos += rec_len;
        st.tail = st.tail.max(st.writer.pos);
        self.nonempty.notify_all();
        Ok(pos)
    }

    fn zero_fill(&self, from: u64) -> Result<()> {
        let zeros = [0u8; ZERO_FILL_CHUNK];
        let mut pos = from;
        while pos < self.max_size {
            #[allow(clippy::cast_possible_truncation)]
            let n = (self.max_size - pos).min(ZERO_FILL_CHUNK as u64) as usize;
            self.file.write_all_at(&zeros[..n], pos)?;
            pos += n as u64;
        }
        Ok(())
    }

    /// Read the whole ring and locate the transaction following
    /// `after_seqnum` for a writer at `pos`/`lap`.
    fn scan_for_reader(&self, after_seqnum: Seqnum, pos: u64, lap: u64) -> Result<ScanResult> {
        let file_len = self.file.metadata()?.len().min(self.max_size);
        #[allow(clippy::cast_possible_truncation)]
        let mut data = vec![0u8; file_len as usize];
        self.file.read_exact_at(&mut data, 0)?;
        Ok(find_rw_pos(&data, after_seqnum, ScanFor::Reader { pos, lap }))
    }

    /// Attach a fan-out reader positioned at the transaction following
    /// `after_seqnum`.
    ///
    /// The ring is scanned without the state lock. Every append moves the
    /// writer cursor, so a scan is kept only if the cursor did not move
    /// while it ran.
    pub fn add_reader(self: &Arc<Self>, after_seqnum: Seqnum) -> Result<JournalReader> {
        let mut attempt = 0;
        let (mut st, scan) = loop {
            attempt += 1;
            let (pos, lap) = {
                let st = self.state.lock();
                if st.closed {
                    return Err(Error::Closed);
                }
                (st.writer.pos, st.writer.lap)
            };
            let scan = self.scan_for_reader(after_seqnum, pos, lap)?;

            let st = self.state.lock();
            if st.closed {
                return Err(Error::Closed);
            }
            if (st.writer.pos, st.writer.lap) == (pos, lap) {
                break (st, scan);
            }
            if attempt == ADD_READER_SCAN_ATTEMPTS {
                debug!(
                    "add_reader: writer kept moving, scanning under lock after_seqnum={}",
                    after_seqnum
                );
                let (pos, lap) = (st.writer.pos, st.writer.lap);
                let scan = self.scan_for_reader(after_seqnum, pos, lap)?;
                break (st, scan);
            }
            debug!(
                "add_reader: writer moved from pos={} lap={} during scan, rescanning",
                pos, lap
            );
        };

        if scan.expired {
            info!(
                "Journal reader request expired: after_seqnum={} last_seqnum={}",
                after_seqnum, scan.max_seqnum
            );
            return Err(Error::expired(format!(
                "seqnum {} is no longer in the journal",
                after_seqnum + 1
            )));
        }

        let id = st.next_reader_id;
        st.next_reader_id += 1;
        st.readers
            .insert(id, ReaderCursor::new(scan.read_pos, scan.read_lap, false));
        info!(
            "Attached journal reader {}: after_seqnum={} pos={} lap={}",
            id, after_seqnum, scan.read_pos, scan.read_lap
        );
        drop(st);
        Ok(JournalReader::new(Arc::clone(self), id))
    }

    pub(crate) fn detach_reader(&self, id: ReaderId) {
        let mut st = self.state.lock();
        if st.readers.remove(&id).is_some() {
            debug!("Detached journal reader {}", id);
        }
        self.nonfull.notify_all();
    }

    /// Copy out the next record for reader `id`, waiting up to `timeout`
    /// (forever if `None`) when it has caught up with the writer.
    pub(crate) fn read_raw(
        &self,
        id: ReaderId,
        timeout: Option<Duration>,
    ) -> Result<ReadOutcome<RawRecord>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = self.state.lock();

        let pos = loop {
            let (wpos, wlap, tail, closed) = (st.writer.pos, st.writer.lap, st.tail, st.closed);
            let r = reader_mut(&mut st, id)?;
            if r.invalid {
                return Err(Error::expired(format!(
                    "journal reader {id} was overrun by the writer"
                )));
            }
            if r.read_lap != wlap && r.read_pos >= tail {
                r.read_pos = JOURNAL_HEADER_SIZE;
                r.read_lap += 1;
            }
            if r.read_pos != wpos || r.read_lap != wlap {
                break r.read_pos;
            }

            if closed {
                return Ok(ReadOutcome::Closed);
            }
            if r.drain {
                r.drain = false;
                return Ok(ReadOutcome::Drained);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(ReadOutcome::Eof);
            }

            r.waiting = true;
            match deadline {
                Some(d) => {
                    self.nonempty.wait_until(&mut st, d);
                }
                None => self.nonempty.wait(&mut st),
            }
            if let Some(r) = st.readers.get_mut(&id) {
                r.waiting = false;
            }
        };
        drop(st);

        let result = self.read_record_at(pos);

        let mut st = self.state.lock();
        let r = reader_mut(&mut st, id)?;
        if r.invalid {
            return Err(Error::expired(format!(
                "journal reader {id} was overrun by the writer"
            )));
        }
        let record = result?;
        r.read_pos = pos + record.bytes.len() as u64;
        Ok(ReadOutcome::Record(record))
    }

    fn read_record_at(&self, pos: u64) -> Result<RawRecord> {
        let mut hdr = [0u8; RECORD_HEADER_SIZE];
        self.file.read_exact_at(&mut hdr, pos)?;
        let header =
            RecordHeader::parse(&hdr).ok_or_else(|| Error::corrupt(pos, "invalid record magic"))?;
        if header.payload_len as usize > RECORD_PAYLOAD_MAX
            || pos + header.record_len() as u64 > self.max_size
        {
            return Err(Error::corrupt(
                pos,
                format!("invalid record length {}", header.payload_len),
            ));
        }

        let mut buf = vec![0u8; header.record_len()];
        buf[..RECORD_HEADER_SIZE].copy_from_slice(&hdr);
        self.file
            .read_exact_at(&mut buf[RECORD_HEADER_SIZE..], pos + RECORD_HEADER_SIZE as u64)?;
        split_record(&header, &buf, pos)?;
        Ok(RawRecord {
            header,
            bytes: Bytes::from(buf),
        })
    }

    /// Make everything reader `id` has read reclaimable
    pub(crate) fn commit(&self, id: ReaderId) {
        let mut st = self.state.lock();
        if let Some(r) = st.readers.get_mut(&id) {
            r.committed_pos = r.read_pos;
            r.committed_lap = r.read_lap;
        }
        self.nonfull.notify_all();
    }

    pub(crate) fn reader_status(&self, id: ReaderId) -> (bool, bool) {
        let st = self.state.lock();
        st.readers
            .get(&id)
            .map_or((false, false), |r| (!r.invalid, r.expired))
    }

    /// Block until the main reader has committed everything written
    pub fn wait_until_empty(&self) -> Result<()> {
        let mut st = self.state.lock();
        loop {
            if st.closed {
                return Err(Error::Closed);
            }
            let (wpos, wlap) = (st.writer.pos, st.writer.lap);
            let caught_up = st.readers.values().filter(|r| r.block_writer).all(|r| {
                r.committed_pos == wpos && r.committed_lap == wlap
            });
            if caught_up {
                return Ok(());
            }
            self.nonfull.wait(&mut st);
        }
    }

    /// Block until some valid reader has unread records. Returns `false`
    /// on timeout or close.
    pub fn wait_until_readable(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        loop {
            if st.closed {
                return false;
            }
            let (wpos, wlap) = (st.writer.pos, st.writer.lap);
            if st
                .readers
                .values()
                .any(|r| !r.invalid && (r.read_pos != wpos || r.read_lap != wlap))
            {
                return true;
            }
            if self.nonempty.wait_until(&mut st, deadline).timed_out() {
                return false;
            }
        }
    }

    /// Wake the main reader with [`ReadOutcome::Drained`] the next time it
    /// has nothing to read.
    pub fn drain_reader(&self) {
        let mut st = self.state.lock();
        for r in st.readers.values_mut().filter(|r| r.block_writer) {
            r.drain = true;
        }
        self.nonempty.notify_all();
    }

    /// Wake every blocked reader with [`ReadOutcome::Closed`]; later writes
    /// fail with [`Error::Closed`].
    pub fn close(&self) {
        let mut st = self.state.lock();
        if !st.closed {
            st.closed = true;
            info!("Closed journal {}", self.path.display());
        }
        self.nonempty.notify_all();
        self.nonfull.notify_all();
    }
}

fn reader_mut<'a>(st: &'a mut JournalState, id: ReaderId) -> Result<&'a mut ReaderCursor> {
    st.readers
        .get_mut(&id)
        .ok_or_else(|| Error::internal(format!("journal reader {id} is not attached")))
}

fn write_file_header(file: &File) -> Result<()> {
    #[allow(clippy::cast_possible_truncation)]
    let mut header = vec![0u8; JOURNAL_HEADER_SIZE as usize];
    header[0..4].copy_from_slice(&JOURNAL_MAGIC);
    header[4..8].copy_from_slice(&JOURNAL_VERSION.to_be_bytes());
    file.write_all_at(&header, 0)?;
    file.sync_data()?;
    Ok(())
}

fn check_file_header(data: &[u8]) -> Result<()> {
    if data[0..4] != JOURNAL_MAGIC {
        return Err(Error::corrupt(0, "invalid journal magic"));
    }
    let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
    if version != JOURNAL_VERSION {
        return Err(Error::corrupt(
            4,
            format!("unsupported journal version {version}"),
        ));
    }
    Ok(())
}
