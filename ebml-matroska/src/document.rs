// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Records of a Matroska document.
//!
//! Block payloads are kept as opaque bytes. Lacing and codec data are left to the consumer.

use chrono::{DateTime, Utc};

use ebml_core::errors::{decode_error, Result};

use crate::binding::{read_record, ElementSource, Record, Registry, Table};
use crate::schema::ids;

/// The EBML header that starts every document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EbmlHeader {
    pub version: u64,
    pub read_version: u64,
    pub max_id_length: u64,
    pub max_size_length: u64,
    pub doc_type: String,
    pub doc_type_version: u64,
    pub doc_type_read_version: u64,
}

impl Default for EbmlHeader {
    fn default() -> Self {
        EbmlHeader {
            version: 1,
            read_version: 1,
            max_id_length: 4,
            max_size_length: 8,
            doc_type: String::new(),
            doc_type_version: 1,
            doc_type_read_version: 1,
        }
    }
}

impl EbmlHeader {
    pub fn is_webm(&self) -> bool {
        self.doc_type == "webm"
    }

    pub fn is_matroska(&self) -> bool {
        self.doc_type == "matroska"
    }
}

impl Record for EbmlHeader {
    fn table() -> Table<Self> {
        Table::<Self>::builder()
            .unsigned(ids::EBML_VERSION, |h, v| h.version = v)
            .unsigned(ids::EBML_READ_VERSION, |h, v| h.read_version = v)
            .unsigned(ids::EBML_MAX_ID_LENGTH, |h, v| h.max_id_length = v)
            .unsigned(ids::EBML_MAX_SIZE_LENGTH, |h, v| h.max_size_length = v)
            .ascii(ids::DOC_TYPE, |h, v| h.doc_type = v)
            .unsigned(ids::DOC_TYPE_VERSION, |h, v| h.doc_type_version = v)
            .unsigned(ids::DOC_TYPE_READ_VERSION, |h, v| h.doc_type_read_version = v)
            .build()
    }
}

/// The root of a Matroska document.
#[derive(Clone, Debug, Default)]
pub struct Segment {
    pub info: Info,
    pub tracks: Tracks,
    pub clusters: Vec<Cluster>,
}

impl Record for Segment {
    fn table() -> Table<Self> {
        Table::<Self>::builder()
            .master(ids::INFO, |s, v| s.info = v)
            .master(ids::TRACKS, |s, v| s.tracks = v)
            .repeated(ids::CLUSTER, |s, v| s.clusters.push(v))
            .build()
    }
}

/// Global information about a segment.
#[derive(Clone, Debug)]
pub struct Info {
    pub segment_uid: Option<Box<[u8]>>,
    pub segment_filename: Option<String>,
    /// Nanoseconds per timestamp tick.
    pub timestamp_scale: u64,
    /// Duration in timestamp ticks.
    pub duration: Option<f64>,
    pub date_utc: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub muxing_app: String,
    pub writing_app: String,
}

impl Default for Info {
    fn default() -> Self {
        Info {
            segment_uid: None,
            segment_filename: None,
            timestamp_scale: 1_000_000,
            duration: None,
            date_utc: None,
            title: None,
            muxing_app: String::new(),
            writing_app: String::new(),
        }
    }
}

impl Record for Info {
    fn table() -> Table<Self> {
        Table::<Self>::builder()
            .binary(ids::SEGMENT_UUID, |i, v| i.segment_uid = Some(v))
            .utf8(ids::SEGMENT_FILENAME, |i, v| i.segment_filename = Some(v))
            .unsigned(ids::TIMESTAMP_SCALE, |i, v| i.timestamp_scale = v)
            .float(ids::DURATION, |i, v| i.duration = Some(v))
            .date(ids::DATE_UTC, |i, v| i.date_utc = Some(v))
            .utf8(ids::TITLE, |i, v| i.title = Some(v))
            .utf8(ids::MUXING_APP, |i, v| i.muxing_app = v)
            .utf8(ids::WRITING_APP, |i, v| i.writing_app = v)
            .build()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Tracks {
    pub entries: Vec<TrackEntry>,
}

impl Record for Tracks {
    fn table() -> Table<Self> {
        Table::<Self>::builder().repeated(ids::TRACK_ENTRY, |t, v| t.entries.push(v)).build()
    }
}

/// The kind of a track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrackType {
    Video,
    Audio,
    Complex,
    Logo,
    Subtitle,
    Buttons,
    Control,
    Metadata,
    Other(u64),
}

impl From<u64> for TrackType {
    fn from(value: u64) -> Self {
        match value {
            0x01 => TrackType::Video,
            0x02 => TrackType::Audio,
            0x03 => TrackType::Complex,
            0x10 => TrackType::Logo,
            0x11 => TrackType::Subtitle,
            0x12 => TrackType::Buttons,
            0x20 => TrackType::Control,
            0x21 => TrackType::Metadata,
            other => TrackType::Other(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrackEntry {
    pub number: u64,
    pub uid: u64,
    pub track_type: TrackType,
    pub enabled: bool,
    pub default: bool,
    pub lacing: bool,
    /// Nanoseconds per frame.
    pub default_duration: Option<u64>,
    pub name: Option<String>,
    pub language: String,
    pub codec_id: String,
    pub codec_private: Option<Box<[u8]>>,
    pub codec_name: Option<String>,
    pub codec_delay: u64,
    pub seek_pre_roll: u64,
    pub audio: Option<Audio>,
    pub video: Option<Video>,
}

impl Default for TrackEntry {
    fn default() -> Self {
        TrackEntry {
            number: 0,
            uid: 0,
            track_type: TrackType::Other(0),
            enabled: true,
            default: true,
            lacing: true,
            default_duration: None,
            name: None,
            language: "eng".into(),
            codec_id: String::new(),
            codec_private: None,
            codec_name: None,
            codec_delay: 0,
            seek_pre_roll: 0,
            audio: None,
            video: None,
        }
    }
}

impl Record for TrackEntry {
    fn table() -> Table<Self> {
        Table::<Self>::builder()
            .unsigned(ids::TRACK_NUMBER, |t, v| t.number = v)
            .unsigned(ids::TRACK_UID, |t, v| t.uid = v)
            .unsigned(ids::TRACK_TYPE, |t, v| t.track_type = TrackType::from(v))
            .unsigned(ids::FLAG_ENABLED, |t, v| t.enabled = v != 0)
            .unsigned(ids::FLAG_DEFAULT, |t, v| t.default = v != 0)
            .unsigned(ids::FLAG_LACING, |t, v| t.lacing = v != 0)
            .unsigned(ids::DEFAULT_DURATION, |t, v| t.default_duration = Some(v))
            .utf8(ids::NAME, |t, v| t.name = Some(v))
            .ascii(ids::LANGUAGE, |t, v| t.language = v)
            .ascii(ids::CODEC_ID, |t, v| t.codec_id = v)
            .binary(ids::CODEC_PRIVATE, |t, v| t.codec_private = Some(v))
            .utf8(ids::CODEC_NAME, |t, v| t.codec_name = Some(v))
            .unsigned(ids::CODEC_DELAY, |t, v| t.codec_delay = v)
            .unsigned(ids::SEEK_PRE_ROLL, |t, v| t.seek_pre_roll = v)
            .master(ids::AUDIO, |t, v| t.audio = Some(v))
            .master(ids::VIDEO, |t, v| t.video = Some(v))
            .build()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Audio {
    pub sampling_frequency: f64,
    pub output_sampling_frequency: Option<f64>,
    pub channels: u64,
    pub bit_depth: Option<u64>,
}

impl Default for Audio {
    fn default() -> Self {
        Audio {
            sampling_frequency: 8000.0,
            output_sampling_frequency: None,
            channels: 1,
            bit_depth: None,
        }
    }
}

impl Record for Audio {
    fn table() -> Table<Self> {
        Table::<Self>::builder()
            .float(ids::SAMPLING_FREQUENCY, |a, v| a.sampling_frequency = v)
            .float(ids::OUTPUT_SAMPLING_FREQUENCY, |a, v| a.output_sampling_frequency = Some(v))
            .unsigned(ids::CHANNELS, |a, v| a.channels = v)
            .unsigned(ids::BIT_DEPTH, |a, v| a.bit_depth = Some(v))
            .build()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Video {
    pub pixel_width: u64,
    pub pixel_height: u64,
    pub display_width: Option<u64>,
    pub display_height: Option<u64>,
}

impl Record for Video {
    fn table() -> Table<Self> {
        Table::<Self>::builder()
            .unsigned(ids::PIXEL_WIDTH, |v, x| v.pixel_width = x)
            .unsigned(ids::PIXEL_HEIGHT, |v, x| v.pixel_height = x)
            .unsigned(ids::DISPLAY_WIDTH, |v, x| v.display_width = Some(x))
            .unsigned(ids::DISPLAY_HEIGHT, |v, x| v.display_height = Some(x))
            .build()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Cluster {
    /// Timestamp of the cluster in timestamp ticks.
    pub timestamp: u64,
    pub position: Option<u64>,
    pub prev_size: Option<u64>,
    /// Undecoded SimpleBlock payloads, in stream order.
    pub simple_blocks: Vec<Box<[u8]>>,
}

impl Record for Cluster {
    fn table() -> Table<Self> {
        Table::<Self>::builder()
            .unsigned(ids::TIMESTAMP, |c, v| c.timestamp = v)
            .unsigned(ids::POSITION, |c, v| c.position = Some(v))
            .unsigned(ids::PREV_SIZE, |c, v| c.prev_size = Some(v))
            .repeated_binary(ids::SIMPLE_BLOCK, |c, v| c.simple_blocks.push(v))
            .build()
    }
}

/// A fully read Matroska document.
#[derive(Clone, Debug)]
pub struct MatroskaDocument {
    pub header: EbmlHeader,
    pub segment: Segment,
}

impl MatroskaDocument {
    /// Returns a registry holding the table of every record in this module.
    pub fn registry() -> Registry {
        Registry::new()
            .with::<EbmlHeader>()
            .with::<Segment>()
            .with::<Info>()
            .with::<Tracks>()
            .with::<TrackEntry>()
            .with::<Audio>()
            .with::<Video>()
            .with::<Cluster>()
    }

    /// Reads the EBML header and the first segment from the top level of `source`.
    pub fn read(source: &mut dyn ElementSource, registry: &Registry) -> Result<MatroskaDocument> {
        let mut header = None;

        while let Some(element) = source.advance_to_next()? {
            match element.id {
                ids::EBML if header.is_none() => {
                    header = Some(read_record::<EbmlHeader>(registry, source)?);
                }
                ids::SEGMENT => {
                    let header = match header {
                        Some(header) => header,
                        None => return decode_error("mkv: segment before the ebml header"),
                    };

                    let segment = read_record::<Segment>(registry, source)?;
                    return Ok(MatroskaDocument { header, segment });
                }
                id => log::debug!("skipping top-level element {:#x}", id),
            }
        }

        match header {
            Some(_) => decode_error("mkv: missing segment"),
            None => decode_error("mkv: missing ebml header"),
        }
    }
}
