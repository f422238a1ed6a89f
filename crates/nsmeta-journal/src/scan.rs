//! Open-time position scan
//!
//! Walks every structurally valid record in the ring, resynchronizing one
//! byte at a time after a bad magic, length or CRC, and derives where the
//! writer continues and where a reader interested in records after a given
//! sequence number has to start.

use crate::ops::OperationTag;
use crate::record::{RECORD_CRC_SIZE, RECORD_HEADER_SIZE, RecordHeader, split_record};
use nsmeta_common::Seqnum;
use nsmeta_common::config::JOURNAL_HEADER_SIZE;
use tracing::debug;

/// Lap assigned to the writer when a journal is opened
pub const JOURNAL_INITIAL_WLAP: u64 = 1;

/// Who the positions are computed for
#[derive(Clone, Copy, Debug)]
pub(crate) enum ScanFor {
    /// Opening the journal: writer and main reader
    Writer,
    /// Attaching a reader while a writer is live at `pos`/`lap`
    Reader { pos: u64, lap: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ScanResult {
    pub read_pos: u64,
    pub read_lap: u64,
    pub write_pos: u64,
    pub write_lap: u64,
    /// End of the last valid record in the file
    pub tail: u64,
    /// Highest seqnum closing a complete transaction at or after `db_seqnum`
    pub max_seqnum: Seqnum,
    /// The records following `db_seqnum` are no longer in the ring
    pub expired: bool,
}

#[derive(Clone, Copy, Default)]
struct Mark {
    pos: u64,
    seqnum: Seqnum,
}

/// Scan `data` (the whole journal file) for positions following `db_seqnum`.
pub(crate) fn find_rw_pos(data: &[u8], db_seqnum: Seqnum, scan_for: ScanFor) -> ScanResult {
    let header = JOURNAL_HEADER_SIZE as usize;
    let file_len = data.len();

    let mut pos = header;
    let mut tail = JOURNAL_HEADER_SIZE;
    let mut first_seqnum: Option<Seqnum> = None;
    let mut last_seqnum: Seqnum = 0;
    let mut incomplete = false;

    let mut begin = Mark::default();
    let mut first_begin: Option<Mark> = None;
    let mut first_end: Option<Mark> = None;
    let mut last_end_pos = 0u64;

    let mut max_seqnum: Seqnum = 0;
    let mut max_next_pos = JOURNAL_HEADER_SIZE;
    let mut min_seqnum = Seqnum::MAX;
    let mut min_pos = JOURNAL_HEADER_SIZE;

    while pos + RECORD_HEADER_SIZE + RECORD_CRC_SIZE <= file_len {
        let rest = &data[pos..];
        let Some(hdr) = RecordHeader::parse(rest) else {
            pos += 1;
            continue;
        };
        let len = match split_record(&hdr, rest, pos as u64) {
            Ok((_, len)) => len,
            Err(_) => {
                pos += 1;
                continue;
            }
        };
        let rec_pos = pos as u64;
        let next_pos = (pos + len) as u64;
        let seq = hdr.seqnum;

        if first_seqnum.is_none() {
            first_seqnum = Some(seq);
        }
        if last_seqnum != 0 && seq <= last_seqnum {
            // older lap: ignore until the next BEGIN
            incomplete = true;
        }

        match OperationTag::from_u16(hdr.tag) {
            Some(OperationTag::Begin) => {
                begin = Mark {
                    pos: rec_pos,
                    seqnum: seq,
                };
                first_begin.get_or_insert(begin);
                incomplete = false;
                if matches!(scan_for, ScanFor::Reader { .. })
                    && db_seqnum < seq
                    && min_seqnum > seq
                {
                    min_seqnum = seq;
                    min_pos = rec_pos;
                }
            }
            Some(OperationTag::End) if !incomplete => {
                first_end.get_or_insert(Mark {
                    pos: rec_pos,
                    seqnum: seq,
                });
                last_end_pos = rec_pos;
                if max_seqnum < seq && db_seqnum <= seq {
                    max_seqnum = seq;
                    max_next_pos = next_pos;
                }
                if db_seqnum < begin.seqnum && min_seqnum > begin.seqnum {
                    min_seqnum = begin.seqnum;
                    min_pos = begin.pos;
                }
            }
            _ => {}
        }

        last_seqnum = seq;
        tail = next_pos;
        pos += len;
    }

    // a transaction whose BEGIN sits at the end of the previous lap and
    // whose END was written after the rewind
    if let (Some(first_seq), Some(fb), Some(fe)) = (first_seqnum, first_begin, first_end) {
        if first_seq == last_seqnum + 1
            && db_seqnum < begin.seqnum
            && begin.seqnum < fe.seqnum
            && begin.seqnum < min_seqnum
            && fe.pos < fb.pos
            && last_end_pos < begin.pos
            && !incomplete
        {
            min_seqnum = begin.seqnum;
            min_pos = begin.pos;
        }
    }

    let (wpos, wlap) = match scan_for {
        ScanFor::Writer => (max_next_pos, JOURNAL_INITIAL_WLAP),
        ScanFor::Reader { pos, lap } => (pos, lap),
    };

    let expired = matches!(scan_for, ScanFor::Reader { .. })
        && db_seqnum != max_seqnum
        && db_seqnum != 0
        && max_seqnum != 0
        && (min_seqnum == Seqnum::MAX || db_seqnum + 1 < min_seqnum || max_seqnum < db_seqnum);

    let (read_pos, read_lap) = if min_seqnum == Seqnum::MAX {
        (wpos, wlap)
    } else if min_pos < wpos {
        (min_pos, wlap)
    } else {
        (min_pos, wlap.saturating_sub(1))
    };

    debug!(
        "journal scan: db_seqnum={} min={}@{} max={}@{} tail={} read={}/{} write={}/{}",
        db_seqnum, min_seqnum, min_pos, max_seqnum, max_next_pos, tail, read_pos, read_lap, wpos,
        wlap
    );

    ScanResult {
        read_pos,
        read_lap,
        write_pos: wpos,
        write_lap: wlap,
        tail,
        max_seqnum,
        expired,
    }
}
