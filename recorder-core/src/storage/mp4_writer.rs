//! Progressive MP4 (ISO-BMFF) container writer.
//!
//! File layout:
//! - `ftyp`
//! - `mdat` with a 64-bit size, samples appended as they arrive
//! - `moov` written on `stop`, one `trak` per declared track
//!
//! H.264 samples arrive in Annex-B form and are rewritten to 4-byte
//! length-prefixed NAL units; the SPS/PPS from the track format become the
//! `avcC` record. AAC tracks carry their AudioSpecificConfig in `esds`.

use std::fs::File;
use std::io::{self, BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::models::error::RecorderError;
use crate::models::media::{EncodedSample, TrackFormat};
use crate::traits::container::ContainerWriter;

const MOVIE_TIMESCALE: u32 = 1000;
const VIDEO_TIMESCALE: u32 = 90_000;
const AAC_FRAME_SAMPLES: u32 = 1024;

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

struct SampleInfo {
    offset: u64,
    size: u32,
    pts_us: i64,
    key_frame: bool,
}

struct Track {
    format: TrackFormat,
    timescale: u32,
    /// `avcC` payload for video tracks.
    avc_config: Option<Vec<u8>>,
    samples: Vec<SampleInfo>,
}

impl Track {
    /// Per-sample durations in track timescale units. The last sample
    /// repeats the previous delta, or a nominal frame length.
    fn durations(&self) -> Vec<u32> {
        let ticks: Vec<u64> = self
            .samples
            .iter()
            .map(|s| us_to_ticks(s.pts_us - self.samples[0].pts_us, self.timescale))
            .collect();

        let mut durations: Vec<u32> = ticks
            .windows(2)
            .map(|w| w[1].saturating_sub(w[0]) as u32)
            .collect();

        let last = durations.last().copied().unwrap_or_else(|| self.nominal_duration());
        if !self.samples.is_empty() {
            durations.push(last);
        }
        durations
    }

    fn nominal_duration(&self) -> u32 {
        match &self.format {
            TrackFormat::Audio { .. } => AAC_FRAME_SAMPLES,
            TrackFormat::Video { frame_rate, .. } => VIDEO_TIMESCALE / (*frame_rate).max(1),
        }
    }
}

fn us_to_ticks(us: i64, timescale: u32) -> u64 {
    (us.max(0) as u128 * timescale as u128 / 1_000_000) as u64
}

/// Writes an MP4 file at a fixed path. The file is created by `start`.
pub struct Mp4Writer {
    path: PathBuf,
    tracks: Vec<Track>,
    file: Option<BufWriter<File>>,
    mdat_start: u64,
    position: u64,
    finished: bool,
}

impl Mp4Writer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tracks: Vec::new(),
            file: None,
            mdat_start: 0,
            position: 0,
            finished: false,
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn sample_count(&self) -> usize {
        self.tracks.iter().map(|t| t.samples.len()).sum()
    }
}

impl ContainerWriter for Mp4Writer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, RecorderError> {
        if self.file.is_some() || self.finished {
            return Err(RecorderError::MuxerSequence("track added after start".into()));
        }

        let (timescale, avc_config) = match format {
            TrackFormat::Audio { sample_rate, .. } => (*sample_rate, None),
            TrackFormat::Video { codec_config, .. } => (VIDEO_TIMESCALE, Some(build_avcc(codec_config)?)),
        };
        if timescale == 0 {
            return Err(RecorderError::FormatNegotiationFailed("zero sample rate".into()));
        }

        self.tracks.push(Track {
            format: format.clone(),
            timescale,
            avc_config,
            samples: Vec::new(),
        });
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), RecorderError> {
        if self.file.is_some() || self.finished {
            return Err(RecorderError::MuxerSequence("container started twice".into()));
        }
        if self.tracks.is_empty() {
            return Err(RecorderError::MuxerSequence("container started without tracks".into()));
        }

        let file = File::create(&self.path).map_err(|e| RecorderError::io("failed to create mp4", e))?;
        let mut w = BufWriter::new(file);

        let mut header = Vec::with_capacity(48);
        let mdat_start = write_file_header(&mut header).map_err(|e| RecorderError::io("failed to build mp4 header", e))?;
        w.write_all(&header).map_err(|e| RecorderError::io("failed to write mp4 header", e))?;

        self.mdat_start = mdat_start;
        self.position = header.len() as u64;
        self.file = Some(w);
        log::info!("Started mp4 container {} with {} track(s)", self.path.display(), self.tracks.len());
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), RecorderError> {
        let Some(w) = self.file.as_mut() else {
            return Err(RecorderError::MuxerSequence("sample written before start".into()));
        };
        let Some(t) = self.tracks.get_mut(track) else {
            return Err(RecorderError::MuxerSequence(format!("unknown track index {}", track)));
        };
        if sample.data.is_empty() {
            return Ok(());
        }

        let payload = match t.format {
            TrackFormat::Video { .. } => annexb_to_length_prefixed(&sample.data),
            TrackFormat::Audio { .. } => sample.data.clone(),
        };

        w.write_all(&payload).map_err(|e| RecorderError::io("failed to write sample", e))?;
        t.samples.push(SampleInfo {
            offset: self.position,
            size: payload.len() as u32,
            pts_us: sample.pts_us,
            key_frame: sample.flags.key_frame,
        });
        self.position += payload.len() as u64;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RecorderError> {
        let Some(mut w) = self.file.take() else {
            return Err(RecorderError::MuxerSequence("container stopped before start".into()));
        };
        self.finished = true;

        if self.sample_count() == 0 {
            return Err(RecorderError::MuxerSequence("container stopped with no samples written".into()));
        }

        let moov = build_moov(&self.tracks).map_err(|e| RecorderError::io("failed to build moov", e))?;
        w.write_all(&moov).map_err(|e| RecorderError::io("failed to write moov", e))?;

        let mdat_size = self.position - self.mdat_start;
        w.seek(SeekFrom::Start(self.mdat_start + 8))
            .and_then(|_| write_u64(&mut w, mdat_size))
            .map_err(|e| RecorderError::io("failed to patch mdat size", e))?;

        let file = w
            .into_inner()
            .map_err(|e| RecorderError::io("failed to flush mp4", e.into_error()))?;
        file.sync_all().map_err(|e| RecorderError::io("failed to sync mp4", e))?;

        log::info!(
            "Finalized mp4 {} ({} samples, {} bytes of media)",
            self.path.display(),
            self.sample_count(),
            mdat_size
        );
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// H.264 helpers
// ---------------------------------------------------------------------------

/// Split an Annex-B stream into NAL unit payloads (start codes removed).
fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else if i + 4 <= data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 0 && data[i + 3] == 1 {
            starts.push((i, i + 4));
            i += 4;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (n, &(_, payload_start)) in starts.iter().enumerate() {
        let end = starts.get(n + 1).map(|&(code_start, _)| code_start).unwrap_or(data.len());
        if payload_start < end {
            nals.push(&data[payload_start..end]);
        }
    }
    nals
}

/// Rewrite Annex-B to 4-byte length prefixes. Input without start codes is
/// assumed to be length-prefixed already and passed through.
fn annexb_to_length_prefixed(data: &[u8]) -> Vec<u8> {
    let nals = split_annexb(data);
    if nals.is_empty() {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len() + nals.len());
    for nal in nals {
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// Build an `AVCDecoderConfigurationRecord` from Annex-B SPS + PPS.
fn build_avcc(codec_config: &[u8]) -> Result<Vec<u8>, RecorderError> {
    let nals = split_annexb(codec_config);
    let sps = nals.iter().find(|n| n[0] & 0x1f == 7);
    let pps = nals.iter().find(|n| n[0] & 0x1f == 8);
    let (Some(sps), Some(pps)) = (sps, pps) else {
        return Err(RecorderError::FormatNegotiationFailed(
            "video codec config lacks SPS/PPS".into(),
        ));
    };
    if sps.len() < 4 {
        return Err(RecorderError::FormatNegotiationFailed("truncated SPS".into()));
    }

    let mut avcc = Vec::with_capacity(11 + sps.len() + pps.len());
    avcc.push(1); // configurationVersion
    avcc.push(sps[1]); // AVCProfileIndication
    avcc.push(sps[2]); // profile_compatibility
    avcc.push(sps[3]); // AVCLevelIndication
    avcc.push(0xff); // lengthSizeMinusOne = 3
    avcc.push(0xe1); // numOfSequenceParameterSets = 1
    avcc.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    avcc.extend_from_slice(sps);
    avcc.push(1); // numOfPictureParameterSets
    avcc.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    avcc.extend_from_slice(pps);
    Ok(avcc)
}

// ---------------------------------------------------------------------------
// Box writing
// ---------------------------------------------------------------------------

fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

fn write_zeros<W: Write>(w: &mut W, count: usize) -> io::Result<()> {
    w.write_all(&vec![0u8; count])
}

fn write_box_header<W: Write>(w: &mut W, box_type: &[u8; 4], size: u32) -> io::Result<()> {
    write_u32(w, size)?;
    w.write_all(box_type)
}

fn write_full_box_header<W: Write>(
    w: &mut W,
    box_type: &[u8; 4],
    size: u32,
    version: u8,
    flags: u32,
) -> io::Result<()> {
    write_box_header(w, box_type, size)?;
    write_u32(w, ((version as u32) << 24) | (flags & 0x00ff_ffff))
}

/// Write a placeholder box header and return its start position.
fn box_start<W: Write + Seek>(w: &mut W, box_type: &[u8; 4]) -> io::Result<u64> {
    let pos = w.stream_position()?;
    write_box_header(w, box_type, 0)?;
    Ok(pos)
}

fn full_box_start<W: Write + Seek>(w: &mut W, box_type: &[u8; 4], version: u8, flags: u32) -> io::Result<u64> {
    let pos = w.stream_position()?;
    write_full_box_header(w, box_type, 0, version, flags)?;
    Ok(pos)
}

/// Patch the size of the box starting at `start` to end at the current position.
fn box_end<W: Write + Seek>(w: &mut W, start: u64) -> io::Result<()> {
    let end = w.stream_position()?;
    let size = u32::try_from(end - start)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "box larger than 4 GiB"))?;
    w.seek(SeekFrom::Start(start))?;
    write_u32(w, size)?;
    w.seek(SeekFrom::Start(end))?;
    Ok(())
}

fn write_ftyp<W: Write>(w: &mut W) -> io::Result<()> {
    write_box_header(w, b"ftyp", 8 + 4 + 4 + 16)?;
    w.write_all(b"isom")?; // major brand
    write_u32(w, 0x200)?; // minor version
    w.write_all(b"isom")?;
    w.write_all(b"iso2")?;
    w.write_all(b"avc1")?;
    w.write_all(b"mp41")
}

/// `ftyp` followed by a large-size `mdat` header whose size is patched on
/// stop. Returns the offset of the `mdat` box.
fn write_file_header(buf: &mut Vec<u8>) -> io::Result<u64> {
    write_ftyp(buf)?;
    let mdat_start = buf.len() as u64;
    write_u32(buf, 1)?;
    buf.write_all(b"mdat")?;
    write_u64(buf, 0)?;
    Ok(mdat_start)
}

fn build_moov(tracks: &[Track]) -> io::Result<Vec<u8>> {
    let durations: Vec<Vec<u32>> = tracks.iter().map(Track::durations).collect();
    let track_durations: Vec<u64> = durations
        .iter()
        .map(|d| d.iter().map(|&x| x as u64).sum())
        .collect();
    let movie_duration = tracks
        .iter()
        .zip(&track_durations)
        .map(|(t, &d)| d * MOVIE_TIMESCALE as u64 / t.timescale as u64)
        .max()
        .unwrap_or(0);

    let mut w = Cursor::new(Vec::new());
    let moov = box_start(&mut w, b"moov")?;
    write_mvhd(&mut w, movie_duration, tracks.len() as u32 + 1)?;
    for (i, track) in tracks.iter().enumerate() {
        let movie_track_duration = track_durations[i] * MOVIE_TIMESCALE as u64 / track.timescale as u64;
        write_trak(&mut w, i as u32 + 1, track, &durations[i], track_durations[i], movie_track_duration)?;
    }
    box_end(&mut w, moov)?;
    Ok(w.into_inner())
}

fn write_mvhd<W: Write>(w: &mut W, duration: u64, next_track_id: u32) -> io::Result<()> {
    write_full_box_header(w, b"mvhd", 120, 1, 0)?;
    write_u64(w, 0)?; // creation_time
    write_u64(w, 0)?; // modification_time
    write_u32(w, MOVIE_TIMESCALE)?;
    write_u64(w, duration)?;
    write_u32(w, 0x0001_0000)?; // rate 1.0
    write_u16(w, 0x0100)?; // volume 1.0
    write_zeros(w, 10)?;
    for v in UNITY_MATRIX {
        write_u32(w, v)?;
    }
    write_zeros(w, 24)?; // pre_defined
    write_u32(w, next_track_id)
}

fn write_trak<W: Write + Seek>(
    w: &mut W,
    track_id: u32,
    track: &Track,
    durations: &[u32],
    media_duration: u64,
    movie_duration: u64,
) -> io::Result<()> {
    let trak = box_start(w, b"trak")?;
    write_tkhd(w, track_id, track, movie_duration)?;

    let mdia = box_start(w, b"mdia")?;
    write_full_box_header(w, b"mdhd", 44, 1, 0)?;
    write_u64(w, 0)?;
    write_u64(w, 0)?;
    write_u32(w, track.timescale)?;
    write_u64(w, media_duration)?;
    write_u16(w, 0x55c4)?; // language: undetermined
    write_u16(w, 0)?;
    write_hdlr(w, &track.format)?;

    let minf = box_start(w, b"minf")?;
    match track.format {
        TrackFormat::Audio { .. } => {
            write_full_box_header(w, b"smhd", 16, 0, 0)?;
            write_u16(w, 0)?; // balance
            write_u16(w, 0)?;
        }
        TrackFormat::Video { .. } => {
            write_full_box_header(w, b"vmhd", 20, 0, 1)?;
            write_zeros(w, 8)?; // graphicsmode + opcolor
        }
    }
    write_dinf(w)?;
    write_stbl(w, track, durations)?;
    box_end(w, minf)?;

    box_end(w, mdia)?;
    box_end(w, trak)
}

fn write_tkhd<W: Write>(w: &mut W, track_id: u32, track: &Track, duration: u64) -> io::Result<()> {
    // track_enabled | track_in_movie
    write_full_box_header(w, b"tkhd", 104, 1, 0x03)?;
    write_u64(w, 0)?;
    write_u64(w, 0)?;
    write_u32(w, track_id)?;
    write_u32(w, 0)?;
    write_u64(w, duration)?;
    write_zeros(w, 8)?;
    write_u16(w, 0)?; // layer
    write_u16(w, 0)?; // alternate_group
    let (volume, width, height) = match track.format {
        TrackFormat::Audio { .. } => (0x0100, 0, 0),
        TrackFormat::Video { width, height, .. } => (0, width, height),
    };
    write_u16(w, volume)?;
    write_u16(w, 0)?;
    for v in UNITY_MATRIX {
        write_u32(w, v)?;
    }
    write_u32(w, width << 16)?;
    write_u32(w, height << 16)
}

fn write_hdlr<W: Write>(w: &mut W, format: &TrackFormat) -> io::Result<()> {
    let (handler, name): (&[u8; 4], &[u8]) = match format {
        TrackFormat::Audio { .. } => (b"soun", b"SoundHandler\0"),
        TrackFormat::Video { .. } => (b"vide", b"VideoHandler\0"),
    };
    write_full_box_header(w, b"hdlr", 8 + 4 + 4 + 4 + 12 + name.len() as u32, 0, 0)?;
    write_u32(w, 0)?; // pre_defined
    w.write_all(handler)?;
    write_zeros(w, 12)?;
    w.write_all(name)
}

fn write_dinf<W: Write>(w: &mut W) -> io::Result<()> {
    let url_size = 12u32;
    let dref_size = 8 + 4 + 4 + url_size;
    write_box_header(w, b"dinf", 8 + dref_size)?;
    write_full_box_header(w, b"dref", dref_size, 0, 0)?;
    write_u32(w, 1)?;
    // self-contained
    write_full_box_header(w, b"url ", url_size, 0, 0x01)
}

fn write_stbl<W: Write + Seek>(w: &mut W, track: &Track, durations: &[u32]) -> io::Result<()> {
    let stbl = box_start(w, b"stbl")?;
    write_stsd(w, track)?;

    // stts, run-length encoded
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &d in durations {
        match runs.last_mut() {
            Some((count, delta)) if *delta == d => *count += 1,
            _ => runs.push((1, d)),
        }
    }
    write_full_box_header(w, b"stts", 16 + 8 * runs.len() as u32, 0, 0)?;
    write_u32(w, runs.len() as u32)?;
    for (count, delta) in runs {
        write_u32(w, count)?;
        write_u32(w, delta)?;
    }

    // stss only when some samples are not sync samples
    if matches!(track.format, TrackFormat::Video { .. }) && track.samples.iter().any(|s| !s.key_frame) {
        let keys: Vec<u32> = track
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.key_frame)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        write_full_box_header(w, b"stss", 16 + 4 * keys.len() as u32, 0, 0)?;
        write_u32(w, keys.len() as u32)?;
        for k in keys {
            write_u32(w, k)?;
        }
    }

    // one sample per chunk
    write_full_box_header(w, b"stsc", 16 + 12, 0, 0)?;
    write_u32(w, 1)?;
    write_u32(w, 1)?; // first_chunk
    write_u32(w, 1)?; // samples_per_chunk
    write_u32(w, 1)?; // sample_description_index

    write_full_box_header(w, b"stsz", 20 + 4 * track.samples.len() as u32, 0, 0)?;
    write_u32(w, 0)?;
    write_u32(w, track.samples.len() as u32)?;
    for s in &track.samples {
        write_u32(w, s.size)?;
    }

    write_full_box_header(w, b"co64", 16 + 8 * track.samples.len() as u32, 0, 0)?;
    write_u32(w, track.samples.len() as u32)?;
    for s in &track.samples {
        write_u64(w, s.offset)?;
    }

    box_end(w, stbl)
}

fn write_stsd<W: Write + Seek>(w: &mut W, track: &Track) -> io::Result<()> {
    let stsd = full_box_start(w, b"stsd", 0, 0)?;
    write_u32(w, 1)?; // entry_count

    match &track.format {
        TrackFormat::Audio {
            sample_rate,
            channels,
            bitrate,
            codec_config,
            ..
        } => {
            let entry = box_start(w, b"mp4a")?;
            write_zeros(w, 6)?;
            write_u16(w, 1)?; // data_reference_index
            write_zeros(w, 8)?;
            write_u16(w, *channels)?;
            write_u16(w, 16)?; // sample_size
            write_u32(w, 0)?;
            write_u32(w, (*sample_rate).min(0xffff) << 16)?;

            let esds = build_esds_contents(codec_config, *bitrate);
            write_full_box_header(w, b"esds", 12 + esds.len() as u32, 0, 0)?;
            w.write_all(&esds)?;
            box_end(w, entry)?;
        }
        TrackFormat::Video { width, height, .. } => {
            let entry = box_start(w, b"avc1")?;
            write_zeros(w, 6)?;
            write_u16(w, 1)?; // data_reference_index
            write_zeros(w, 16)?; // pre_defined + reserved
            write_u16(w, *width as u16)?;
            write_u16(w, *height as u16)?;
            write_u32(w, 0x0048_0000)?; // 72 dpi
            write_u32(w, 0x0048_0000)?;
            write_u32(w, 0)?;
            write_u16(w, 1)?; // frame_count
            write_zeros(w, 32)?; // compressorname
            write_u16(w, 0x0018)?; // depth
            w.write_all(&(-1i16).to_be_bytes())?;

            let avcc = track.avc_config.as_deref().unwrap_or_default();
            write_box_header(w, b"avcC", 8 + avcc.len() as u32)?;
            w.write_all(avcc)?;
            box_end(w, entry)?;
        }
    }

    box_end(w, stsd)
}

fn build_esds_contents(asc: &[u8], bitrate: u32) -> Vec<u8> {
    let dec_config_len = 13 + 2 + asc.len();
    let sl_config_len = 1;
    let es_desc_len = 3 + (2 + dec_config_len) + (2 + sl_config_len);

    let mut buf = Vec::with_capacity(2 + es_desc_len);
    // ES_Descriptor
    buf.push(0x03);
    buf.push(es_desc_len as u8);
    buf.extend_from_slice(&[0x00, 0x01]); // ES_ID
    buf.push(0x00);

    // DecoderConfigDescriptor
    buf.push(0x04);
    buf.push(dec_config_len as u8);
    buf.push(0x40); // Audio ISO/IEC 14496-3
    buf.push(0x15); // audio stream
    buf.extend_from_slice(&[0x00, 0x00, 0x00]); // bufferSizeDB
    buf.extend_from_slice(&bitrate.to_be_bytes()); // maxBitrate
    buf.extend_from_slice(&bitrate.to_be_bytes()); // avgBitrate

    // DecoderSpecificInfo
    buf.push(0x05);
    buf.push(asc.len() as u8);
    buf.extend_from_slice(asc);

    // SLConfigDescriptor
    buf.push(0x06);
    buf.push(sl_config_len as u8);
    buf.push(0x02);

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::media::SampleFlags;

    const SPS: [u8; 8] = [0x67, 0x42, 0xc0, 0x1f, 0xda, 0x01, 0x40, 0x16];
    const PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

    fn video_format() -> TrackFormat {
        let mut config = vec![0, 0, 0, 1];
        config.extend_from_slice(&SPS);
        config.extend_from_slice(&[0, 0, 0, 1]);
        config.extend_from_slice(&PPS);
        TrackFormat::Video {
            mime: "video/avc".into(),
            width: 720,
            height: 1280,
            frame_rate: 30,
            bitrate: 4_000_000,
            codec_config: config,
        }
    }

    fn audio_format() -> TrackFormat {
        TrackFormat::Audio {
            mime: "audio/mp4a-latm".into(),
            sample_rate: 44_100,
            channels: 1,
            bitrate: 64 * 1024,
            codec_config: vec![0x12, 0x08],
        }
    }

    fn frame(pts_us: i64, key: bool) -> EncodedSample {
        let mut data = vec![0, 0, 0, 1, if key { 0x65 } else { 0x41 }];
        data.extend_from_slice(&[0xaa; 16]);
        EncodedSample::new(pts_us, data, SampleFlags { key_frame: key, ..Default::default() })
    }

    fn find_box(data: &[u8], name: &[u8; 4]) -> Option<usize> {
        data.windows(4).position(|w| w == name)
    }

    #[test]
    fn annexb_is_rewritten_with_length_prefixes() {
        let input = [0, 0, 0, 1, 0x65, 1, 2, 0, 0, 1, 0x41, 3];
        let out = annexb_to_length_prefixed(&input);
        assert_eq!(out, vec![0, 0, 0, 3, 0x65, 1, 2, 0, 0, 0, 2, 0x41, 3]);
    }

    #[test]
    fn length_prefixed_input_passes_through() {
        let input = [0, 0, 0, 2, 0x65, 9];
        assert_eq!(annexb_to_length_prefixed(&input), input.to_vec());
    }

    #[test]
    fn avcc_carries_profile_and_parameter_sets() {
        let TrackFormat::Video { codec_config, .. } = video_format() else { unreachable!() };
        let avcc = build_avcc(&codec_config).unwrap();
        assert_eq!(&avcc[..6], &[1, 0x42, 0xc0, 0x1f, 0xff, 0xe1]);
        assert_eq!(u16::from_be_bytes([avcc[6], avcc[7]]) as usize, SPS.len());
        assert_eq!(&avcc[8..8 + SPS.len()], &SPS);
    }

    #[test]
    fn missing_parameter_sets_are_rejected() {
        let mut writer = Mp4Writer::new("unused.mp4");
        let format = TrackFormat::Video {
            mime: "video/avc".into(),
            width: 640,
            height: 480,
            frame_rate: 30,
            bitrate: 1,
            codec_config: vec![0, 0, 0, 1, 0x68, 1, 2],
        };
        assert!(matches!(
            writer.add_track(&format),
            Err(RecorderError::FormatNegotiationFailed(_))
        ));
    }

    #[test]
    fn writes_playable_two_track_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ScreenRecord.mp4");
        let mut writer = Mp4Writer::new(&path);
        let video = writer.add_track(&video_format()).unwrap();
        let audio = writer.add_track(&audio_format()).unwrap();
        writer.start().unwrap();

        for i in 0..10 {
            writer.write_sample(video, &frame(i * 33_333, i % 5 == 0)).unwrap();
            writer
                .write_sample(audio, &EncodedSample::new(i * 23_219, vec![0x21; 12], SampleFlags::default()))
                .unwrap();
        }
        writer.stop().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[4..8], b"ftyp");
        assert!(find_box(&data, b"moov").is_some());
        assert!(find_box(&data, b"avcC").is_some());
        assert!(find_box(&data, b"esds").is_some());
        assert!(find_box(&data, b"stss").is_some());

        // mdat large size covers header plus payload
        let mdat = find_box(&data, b"mdat").unwrap() - 4;
        assert_eq!(u32::from_be_bytes(data[mdat..mdat + 4].try_into().unwrap()), 1);
        let large = u64::from_be_bytes(data[mdat + 8..mdat + 16].try_into().unwrap());
        let moov = find_box(&data, b"moov").unwrap() - 4;
        assert_eq!(mdat as u64 + large, moov as u64);

        // moov size reaches exactly to end of file
        let moov_size = u32::from_be_bytes(data[moov..moov + 4].try_into().unwrap());
        assert_eq!(moov + moov_size as usize, data.len());
    }

    #[test]
    fn all_key_frames_omit_stss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.mp4");
        let mut writer = Mp4Writer::new(&path);
        let video = writer.add_track(&video_format()).unwrap();
        writer.start().unwrap();
        writer.write_sample(video, &frame(0, true)).unwrap();
        writer.write_sample(video, &frame(33_333, true)).unwrap();
        writer.stop().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert!(find_box(&data, b"stss").is_none());
    }

    #[test]
    fn durations_follow_timestamps() {
        let mut writer = Mp4Writer::new("unused.mp4");
        writer.add_track(&audio_format()).unwrap();
        let track = &mut writer.tracks[0];
        for pts in [1_000_000, 1_100_000, 1_300_000] {
            track.samples.push(SampleInfo { offset: 0, size: 1, pts_us: pts, key_frame: true });
        }
        // 0.1 s and 0.2 s at 44.1 kHz, last repeats the previous delta
        assert_eq!(track.durations(), vec![4410, 8820, 8820]);
    }

    #[test]
    fn stop_without_samples_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::new(dir.path().join("empty.mp4"));
        writer.add_track(&audio_format()).unwrap();
        writer.start().unwrap();
        assert!(matches!(writer.stop(), Err(RecorderError::MuxerSequence(_))));
    }

    #[test]
    fn sequence_violations_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::new(dir.path().join("seq.mp4"));
        assert!(matches!(writer.start(), Err(RecorderError::MuxerSequence(_))));
        writer.add_track(&audio_format()).unwrap();
        assert!(matches!(
            writer.write_sample(0, &EncodedSample::new(0, vec![1], SampleFlags::default())),
            Err(RecorderError::MuxerSequence(_))
        ));
        writer.start().unwrap();
        assert!(matches!(writer.add_track(&audio_format()), Err(RecorderError::MuxerSequence(_))));
        assert!(matches!(writer.start(), Err(RecorderError::MuxerSequence(_))));
    }
}
