//! Packet capture to pcap files.
//!
//! Frames are captured into a bounded channel and written by a dedicated
//! thread, so the dispatcher never blocks on disk. When the channel is full
//! the frame is dropped and counted. Two link types are supported: plain
//! `DLT_IEEE802_15_4_NOFCS` and `DLT_IEEE802_15_4_TAP`, the latter
//! prefixing each frame with TLVs carrying FCS presence, RSSI, and the
//! channel assignment.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use otsim_common::SimTime;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Pcap file magic, microsecond timestamps.
const PCAP_MAGIC: u32 = 0xA1B2_C3D4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
/// IEEE 802.15.4 without FCS.
const LINKTYPE_IEEE802_15_4_NOFCS: u32 = 195;
/// IEEE 802.15.4 TAP (per-frame metadata TLVs).
const LINKTYPE_IEEE802_15_4_TAP: u32 = 283;

/// Bounded depth of the capture channel.
const CAPTURE_QUEUE_DEPTH: usize = 100_000;

/// Which capture format to write, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcapMode {
    /// No capture.
    #[default]
    Off,
    /// Plain frames, FCS stripped.
    NoFcs,
    /// TAP format with RSSI and channel TLVs.
    Tap,
}

/// One captured frame.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Virtual capture time.
    pub timestamp: SimTime,
    /// Channel the frame went out on.
    pub channel: u8,
    /// RSSI stamped on the frame, dBm.
    pub rssi_dbm: i8,
    /// The PSDU bytes (including the trailing FCS).
    pub psdu: Vec<u8>,
}

/// Handle the dispatcher holds; capture is a non-blocking send.
pub struct PcapHandle {
    tx: Option<Sender<CapturedFrame>>,
    dropped: Arc<AtomicU64>,
    writer: Option<JoinHandle<io::Result<u64>>>,
}

impl PcapHandle {
    /// Open `path` and start the writer thread.
    pub fn start(path: &Path, mode: PcapMode) -> io::Result<PcapHandle> {
        assert_ne!(mode, PcapMode::Off, "no pcap handle for mode off");
        let file = File::create(path)?;
        let (tx, rx) = bounded(CAPTURE_QUEUE_DEPTH);
        let dropped = Arc::new(AtomicU64::new(0));
        let writer = thread::Builder::new()
            .name("pcap-writer".to_string())
            .spawn(move || writer_main(file, mode, rx))
            .expect("failed to spawn pcap writer thread");
        Ok(PcapHandle {
            tx: Some(tx),
            dropped,
            writer: Some(writer),
        })
    }

    /// Queue a frame for capture. Never blocks; a full queue drops the
    /// frame and counts it.
    pub fn capture(&self, frame: CapturedFrame) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!(otsim_metrics::metric_defs::PCAP_DROPPED.name).increment(1);
                if dropped == 1 {
                    warn!("pcap queue full, dropping frames");
                }
            }
        }
    }

    /// Frames dropped because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Flush and close the file. Returns the number of frames written.
    pub fn close(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        drop(self.tx.take());
        if let Some(writer) = self.writer.take() {
            match writer.join() {
                Ok(Ok(frames)) => return frames,
                Ok(Err(e)) => error!("pcap writer failed: {e}"),
                Err(_) => error!("pcap writer panicked"),
            }
        }
        0
    }
}

impl Drop for PcapHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn writer_main(file: File, mode: PcapMode, rx: Receiver<CapturedFrame>) -> io::Result<u64> {
    let mut out = BufWriter::new(file);
    write_file_header(&mut out, mode)?;
    let mut frames = 0u64;
    while let Ok(frame) = rx.recv() {
        write_frame(&mut out, mode, &frame)?;
        frames += 1;
        metrics::counter!(otsim_metrics::metric_defs::PCAP_FRAMES.name).increment(1);
    }
    out.flush()?;
    Ok(frames)
}

fn write_file_header(out: &mut impl Write, mode: PcapMode) -> io::Result<()> {
    let linktype = match mode {
        PcapMode::NoFcs => LINKTYPE_IEEE802_15_4_NOFCS,
        PcapMode::Tap => LINKTYPE_IEEE802_15_4_TAP,
        PcapMode::Off => unreachable!("writer never starts in mode off"),
    };
    out.write_all(&PCAP_MAGIC.to_le_bytes())?;
    out.write_all(&PCAP_VERSION_MAJOR.to_le_bytes())?;
    out.write_all(&PCAP_VERSION_MINOR.to_le_bytes())?;
    out.write_all(&0i32.to_le_bytes())?; // thiszone
    out.write_all(&0u32.to_le_bytes())?; // sigfigs
    out.write_all(&u32::MAX.to_le_bytes())?; // snaplen
    out.write_all(&linktype.to_le_bytes())?;
    Ok(())
}

fn write_frame(out: &mut impl Write, mode: PcapMode, frame: &CapturedFrame) -> io::Result<()> {
    let payload = match mode {
        PcapMode::NoFcs => {
            // Strip the 2-byte FCS; the linktype promises its absence.
            let end = frame.psdu.len().saturating_sub(2);
            frame.psdu[..end].to_vec()
        }
        PcapMode::Tap => tap_frame(frame),
        PcapMode::Off => unreachable!("writer never starts in mode off"),
    };

    let us = frame.timestamp.as_micros();
    out.write_all(&((us / 1_000_000) as u32).to_le_bytes())?; // sec
    out.write_all(&((us % 1_000_000) as u32).to_le_bytes())?; // usec
    out.write_all(&(payload.len() as u32).to_le_bytes())?; // incl_len
    out.write_all(&(payload.len() as u32).to_le_bytes())?; // orig_len
    out.write_all(&payload)?;
    Ok(())
}

/// Build the TAP header + TLVs + PSDU for one frame.
///
/// TLV layout per the 802.15.4 TAP spec: FCS type (0 = none), RSSI as
/// float32 dBm, and the channel assignment (channel number + page 0). Every
/// TLV value is padded to a 4-byte boundary.
fn tap_frame(frame: &CapturedFrame) -> Vec<u8> {
    const TLV_FCS_TYPE: u16 = 0;
    const TLV_RSSI: u16 = 1;
    const TLV_CHANNEL_ASSIGNMENT: u16 = 3;

    let mut tlvs = Vec::new();
    push_tlv(&mut tlvs, TLV_FCS_TYPE, &[0u8]); // FCS not present
    push_tlv(&mut tlvs, TLV_RSSI, &(frame.rssi_dbm as f32).to_le_bytes());
    let mut chan = Vec::with_capacity(3);
    chan.extend_from_slice(&u16::from(frame.channel).to_le_bytes());
    chan.push(0); // page
    push_tlv(&mut tlvs, TLV_CHANNEL_ASSIGNMENT, &chan);

    let psdu_end = frame.psdu.len().saturating_sub(2);
    let mut out = Vec::with_capacity(4 + tlvs.len() + psdu_end);
    out.push(0); // version
    out.push(0); // reserved
    out.extend_from_slice(&((4 + tlvs.len()) as u16).to_le_bytes()); // header length
    out.extend_from_slice(&tlvs);
    out.extend_from_slice(&frame.psdu[..psdu_end]);
    out
}

fn push_tlv(buf: &mut Vec<u8>, tlv_type: u16, value: &[u8]) {
    buf.extend_from_slice(&tlv_type.to_le_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
    buf.extend_from_slice(value);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}
