// Symphonia
// Copyright (c) 2019-2024 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Element dictionaries.
//!
//! The reader consults a [`Schema`] for two things only: the advisory check that an element's
//! declared size suits its data type, and recognizing the end of an unknown-size master element
//! when an element that cannot be its descendant appears.

use std::fmt;

use bitflags::bitflags;
use phf::phf_map;

use crate::vint::UNKNOWN_LENGTH;

/// Element IDs used by the Matroska records.
pub mod ids {
    pub const EBML: u32 = 0x1a45dfa3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42f7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42f2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42f3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;
    pub const VOID: u32 = 0xec;
    pub const CRC32: u32 = 0xbf;

    pub const SEGMENT: u32 = 0x18538067;

    pub const SEEK_HEAD: u32 = 0x114d9b74;
    pub const SEEK: u32 = 0x4dbb;
    pub const SEEK_ID: u32 = 0x53ab;
    pub const SEEK_POSITION: u32 = 0x53ac;

    pub const INFO: u32 = 0x1549a966;
    pub const SEGMENT_UUID: u32 = 0x73a4;
    pub const SEGMENT_FILENAME: u32 = 0x7384;
    pub const TIMESTAMP_SCALE: u32 = 0x2ad7b1;
    pub const DURATION: u32 = 0x4489;
    pub const DATE_UTC: u32 = 0x4461;
    pub const TITLE: u32 = 0x7ba9;
    pub const MUXING_APP: u32 = 0x4d80;
    pub const WRITING_APP: u32 = 0x5741;

    pub const CLUSTER: u32 = 0x1f43b675;
    pub const TIMESTAMP: u32 = 0xe7;
    pub const POSITION: u32 = 0xa7;
    pub const PREV_SIZE: u32 = 0xab;
    pub const SIMPLE_BLOCK: u32 = 0xa3;
    pub const BLOCK_GROUP: u32 = 0xa0;
    pub const BLOCK: u32 = 0xa1;
    pub const BLOCK_DURATION: u32 = 0x9b;
    pub const REFERENCE_BLOCK: u32 = 0xfb;
    pub const DISCARD_PADDING: u32 = 0x75a2;

    pub const TRACKS: u32 = 0x1654ae6b;
    pub const TRACK_ENTRY: u32 = 0xae;
    pub const TRACK_NUMBER: u32 = 0xd7;
    pub const TRACK_UID: u32 = 0x73c5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const FLAG_ENABLED: u32 = 0xb9;
    pub const FLAG_DEFAULT: u32 = 0x88;
    pub const FLAG_LACING: u32 = 0x9c;
    pub const DEFAULT_DURATION: u32 = 0x23e383;
    pub const NAME: u32 = 0x536e;
    pub const LANGUAGE: u32 = 0x22b59c;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_PRIVATE: u32 = 0x63a2;
    pub const CODEC_NAME: u32 = 0x258688;
    pub const CODEC_DELAY: u32 = 0x56aa;
    pub const SEEK_PRE_ROLL: u32 = 0x56bb;
    pub const VIDEO: u32 = 0xe0;
    pub const PIXEL_WIDTH: u32 = 0xb0;
    pub const PIXEL_HEIGHT: u32 = 0xba;
    pub const DISPLAY_WIDTH: u32 = 0x54b0;
    pub const DISPLAY_HEIGHT: u32 = 0x54ba;
    pub const AUDIO: u32 = 0xe1;
    pub const SAMPLING_FREQUENCY: u32 = 0xb5;
    pub const OUTPUT_SAMPLING_FREQUENCY: u32 = 0x78b5;
    pub const CHANNELS: u32 = 0x9f;
    pub const BIT_DEPTH: u32 = 0x6264;

    pub const CUES: u32 = 0x1c53bb6b;
    pub const CUE_POINT: u32 = 0xbb;
    pub const CUE_TIME: u32 = 0xb3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xb7;
    pub const CUE_TRACK: u32 = 0xf7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xf1;

    pub const CHAPTERS: u32 = 0x1043a770;
    pub const TAGS: u32 = 0x1254c367;
    pub const ATTACHMENTS: u32 = 0x1941a469;
}

/// The semantic type of an element's payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    Master,
    Unsigned,
    Signed,
    Float,
    Ascii,
    Utf8,
    Date,
    Binary,
}

bitflags! {
    /// Element properties.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ElementFlags: u8 {
        /// The element must be present in its parent.
        const MANDATORY    = 1 << 0;
        /// The element may occur more than once in its parent.
        const MULTIPLE     = 1 << 1;
        /// The element may occur at any level.
        const GLOBAL       = 1 << 2;
        /// The element may be written with an unknown data size.
        const UNKNOWN_SIZE = 1 << 3;
    }
}

const NONE: ElementFlags = ElementFlags::empty();
const MANDATORY: ElementFlags = ElementFlags::MANDATORY;
const MULTIPLE: ElementFlags = ElementFlags::MULTIPLE;
const GLOBAL: ElementFlags = ElementFlags::GLOBAL.union(ElementFlags::MULTIPLE);
const STREAMABLE: ElementFlags = ElementFlags::UNKNOWN_SIZE.union(ElementFlags::MULTIPLE);

/// Static description of one element.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElementInfo {
    pub id: u32,
    pub name: &'static str,
    pub data_type: DataType,
    pub flags: ElementFlags,
    /// Nesting level. Top-level elements are level 0.
    pub level: u8,
    /// The parent element ID, or 0 for top-level and global elements.
    pub parent: u32,
}

impl ElementInfo {
    const fn new(
        id: u32,
        name: &'static str,
        data_type: DataType,
        flags: ElementFlags,
        level: u8,
        parent: u32,
    ) -> Self {
        ElementInfo { id, name, data_type, flags, level, parent }
    }

    pub fn is_global(&self) -> bool {
        self.flags.contains(ElementFlags::GLOBAL)
    }

    /// Returns `true` if an element with this info may appear somewhere below an element at
    /// `level`.
    pub fn may_descend_from(&self, level: u8) -> bool {
        self.is_global() || self.level > level
    }

    /// Checks a declared data size against the bounds of the data type.
    pub fn length_is_valid(&self, length: i64) -> bool {
        if length == UNKNOWN_LENGTH {
            return self.data_type == DataType::Master
                && self.flags.contains(ElementFlags::UNKNOWN_SIZE);
        }

        match self.data_type {
            DataType::Unsigned | DataType::Signed => length <= 8,
            DataType::Float => matches!(length, 0 | 4 | 8),
            DataType::Date => matches!(length, 0 | 8),
            DataType::Master | DataType::Ascii | DataType::Utf8 | DataType::Binary => true,
        }
    }
}

/// An element dictionary.
pub trait Schema: Send + Sync {
    /// A short name for the dictionary, usually the document type.
    fn doc_type(&self) -> &'static str;

    /// Looks up an element.
    fn get(&self, id: u32) -> Option<&ElementInfo>;

    /// Returns the element name for diagnostics.
    fn name_of(&self, id: u32) -> &'static str {
        self.get(id).map_or("unknown", |info| info.name)
    }
}

impl fmt::Debug for dyn Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema({})", self.doc_type())
    }
}

/// The EBML header, global, and principal Matroska elements.
#[derive(Copy, Clone, Debug, Default)]
pub struct MatroskaSchema;

/// The built-in Matroska dictionary.
pub static MATROSKA: MatroskaSchema = MatroskaSchema;

impl Schema for MatroskaSchema {
    fn doc_type(&self) -> &'static str {
        "matroska"
    }

    fn get(&self, id: u32) -> Option<&ElementInfo> {
        MATROSKA_ELEMENTS.get(&id)
    }
}

use DataType::*;

static MATROSKA_ELEMENTS: phf::Map<u32, ElementInfo> = phf_map! {
    // Global
    0xecu32 => ElementInfo::new(0xec, "Void", Binary, GLOBAL, 0, 0),
    0xbfu32 => ElementInfo::new(0xbf, "CRC-32", Binary, GLOBAL, 0, 0),
    // \EBML
    0x1a45dfa3u32 => ElementInfo::new(0x1a45dfa3, "EBML", Master, MANDATORY.union(MULTIPLE), 0, 0),
    0x4286u32 => ElementInfo::new(0x4286, "EBMLVersion", Unsigned, MANDATORY, 1, 0x1a45dfa3),
    0x42f7u32 => ElementInfo::new(0x42f7, "EBMLReadVersion", Unsigned, MANDATORY, 1, 0x1a45dfa3),
    0x42f2u32 => ElementInfo::new(0x42f2, "EBMLMaxIDLength", Unsigned, MANDATORY, 1, 0x1a45dfa3),
    0x42f3u32 => ElementInfo::new(0x42f3, "EBMLMaxSizeLength", Unsigned, MANDATORY, 1, 0x1a45dfa3),
    0x4282u32 => ElementInfo::new(0x4282, "DocType", Ascii, MANDATORY, 1, 0x1a45dfa3),
    0x4287u32 => ElementInfo::new(0x4287, "DocTypeVersion", Unsigned, MANDATORY, 1, 0x1a45dfa3),
    0x4285u32 => ElementInfo::new(0x4285, "DocTypeReadVersion", Unsigned, MANDATORY, 1, 0x1a45dfa3),
    // \Segment
    0x18538067u32 => ElementInfo::new(0x18538067, "Segment", Master, MANDATORY.union(STREAMABLE), 0, 0),
    // \Segment\SeekHead
    0x114d9b74u32 => ElementInfo::new(0x114d9b74, "SeekHead", Master, MULTIPLE, 1, 0x18538067),
    0x4dbbu32 => ElementInfo::new(0x4dbb, "Seek", Master, MULTIPLE, 2, 0x114d9b74),
    0x53abu32 => ElementInfo::new(0x53ab, "SeekID", Binary, MANDATORY, 3, 0x4dbb),
    0x53acu32 => ElementInfo::new(0x53ac, "SeekPosition", Unsigned, MANDATORY, 3, 0x4dbb),
    // \Segment\Info
    0x1549a966u32 => ElementInfo::new(0x1549a966, "Info", Master, MANDATORY, 1, 0x18538067),
    0x73a4u32 => ElementInfo::new(0x73a4, "SegmentUUID", Binary, NONE, 2, 0x1549a966),
    0x7384u32 => ElementInfo::new(0x7384, "SegmentFilename", Utf8, NONE, 2, 0x1549a966),
    0x3cb923u32 => ElementInfo::new(0x3cb923, "PrevUUID", Binary, NONE, 2, 0x1549a966),
    0x3c83abu32 => ElementInfo::new(0x3c83ab, "PrevFilename", Utf8, NONE, 2, 0x1549a966),
    0x3eb923u32 => ElementInfo::new(0x3eb923, "NextUUID", Binary, NONE, 2, 0x1549a966),
    0x3e83bbu32 => ElementInfo::new(0x3e83bb, "NextFilename", Utf8, NONE, 2, 0x1549a966),
    0x2ad7b1u32 => ElementInfo::new(0x2ad7b1, "TimestampScale", Unsigned, MANDATORY, 2, 0x1549a966),
    0x4489u32 => ElementInfo::new(0x4489, "Duration", Float, NONE, 2, 0x1549a966),
    0x4461u32 => ElementInfo::new(0x4461, "DateUTC", Date, NONE, 2, 0x1549a966),
    0x7ba9u32 => ElementInfo::new(0x7ba9, "Title", Utf8, NONE, 2, 0x1549a966),
    0x4d80u32 => ElementInfo::new(0x4d80, "MuxingApp", Utf8, MANDATORY, 2, 0x1549a966),
    0x5741u32 => ElementInfo::new(0x5741, "WritingApp", Utf8, MANDATORY, 2, 0x1549a966),
    // \Segment\Cluster
    0x1f43b675u32 => ElementInfo::new(0x1f43b675, "Cluster", Master, STREAMABLE, 1, 0x18538067),
    0xe7u32 => ElementInfo::new(0xe7, "Timestamp", Unsigned, MANDATORY, 2, 0x1f43b675),
    0xa7u32 => ElementInfo::new(0xa7, "Position", Unsigned, NONE, 2, 0x1f43b675),
    0xabu32 => ElementInfo::new(0xab, "PrevSize", Unsigned, NONE, 2, 0x1f43b675),
    0xa3u32 => ElementInfo::new(0xa3, "SimpleBlock", Binary, MULTIPLE, 2, 0x1f43b675),
    0xa0u32 => ElementInfo::new(0xa0, "BlockGroup", Master, MULTIPLE, 2, 0x1f43b675),
    0xa1u32 => ElementInfo::new(0xa1, "Block", Binary, MANDATORY, 3, 0xa0),
    0x9bu32 => ElementInfo::new(0x9b, "BlockDuration", Unsigned, NONE, 3, 0xa0),
    0xfbu32 => ElementInfo::new(0xfb, "ReferenceBlock", Signed, MULTIPLE, 3, 0xa0),
    0x75a2u32 => ElementInfo::new(0x75a2, "DiscardPadding", Signed, NONE, 3, 0xa0),
    // \Segment\Tracks
    0x1654ae6bu32 => ElementInfo::new(0x1654ae6b, "Tracks", Master, NONE, 1, 0x18538067),
    0xaeu32 => ElementInfo::new(0xae, "TrackEntry", Master, MANDATORY.union(MULTIPLE), 2, 0x1654ae6b),
    0xd7u32 => ElementInfo::new(0xd7, "TrackNumber", Unsigned, MANDATORY, 3, 0xae),
    0x73c5u32 => ElementInfo::new(0x73c5, "TrackUID", Unsigned, MANDATORY, 3, 0xae),
    0x83u32 => ElementInfo::new(0x83, "TrackType", Unsigned, MANDATORY, 3, 0xae),
    0xb9u32 => ElementInfo::new(0xb9, "FlagEnabled", Unsigned, MANDATORY, 3, 0xae),
    0x88u32 => ElementInfo::new(0x88, "FlagDefault", Unsigned, MANDATORY, 3, 0xae),
    0x9cu32 => ElementInfo::new(0x9c, "FlagLacing", Unsigned, MANDATORY, 3, 0xae),
    0x23e383u32 => ElementInfo::new(0x23e383, "DefaultDuration", Unsigned, NONE, 3, 0xae),
    0x536eu32 => ElementInfo::new(0x536e, "Name", Utf8, NONE, 3, 0xae),
    0x22b59cu32 => ElementInfo::new(0x22b59c, "Language", Ascii, NONE, 3, 0xae),
    0x86u32 => ElementInfo::new(0x86, "CodecID", Ascii, MANDATORY, 3, 0xae),
    0x63a2u32 => ElementInfo::new(0x63a2, "CodecPrivate", Binary, NONE, 3, 0xae),
    0x258688u32 => ElementInfo::new(0x258688, "CodecName", Utf8, NONE, 3, 0xae),
    0x56aau32 => ElementInfo::new(0x56aa, "CodecDelay", Unsigned, NONE, 3, 0xae),
    0x56bbu32 => ElementInfo::new(0x56bb, "SeekPreRoll", Unsigned, MANDATORY, 3, 0xae),
    // \Segment\Tracks\TrackEntry\Video
    0xe0u32 => ElementInfo::new(0xe0, "Video", Master, NONE, 3, 0xae),
    0xb0u32 => ElementInfo::new(0xb0, "PixelWidth", Unsigned, MANDATORY, 4, 0xe0),
    0xbau32 => ElementInfo::new(0xba, "PixelHeight", Unsigned, MANDATORY, 4, 0xe0),
    0x54b0u32 => ElementInfo::new(0x54b0, "DisplayWidth", Unsigned, NONE, 4, 0xe0),
    0x54bau32 => ElementInfo::new(0x54ba, "DisplayHeight", Unsigned, NONE, 4, 0xe0),
    // \Segment\Tracks\TrackEntry\Audio
    0xe1u32 => ElementInfo::new(0xe1, "Audio", Master, NONE, 3, 0xae),
    0xb5u32 => ElementInfo::new(0xb5, "SamplingFrequency", Float, MANDATORY, 4, 0xe1),
    0x78b5u32 => ElementInfo::new(0x78b5, "OutputSamplingFrequency", Float, NONE, 4, 0xe1),
    0x9fu32 => ElementInfo::new(0x9f, "Channels", Unsigned, MANDATORY, 4, 0xe1),
    0x6264u32 => ElementInfo::new(0x6264, "BitDepth", Unsigned, NONE, 4, 0xe1),
    // \Segment\Cues
    0x1c53bb6bu32 => ElementInfo::new(0x1c53bb6b, "Cues", Master, NONE, 1, 0x18538067),
    0xbbu32 => ElementInfo::new(0xbb, "CuePoint", Master, MANDATORY.union(MULTIPLE), 2, 0x1c53bb6b),
    0xb3u32 => ElementInfo::new(0xb3, "CueTime", Unsigned, MANDATORY, 3, 0xbb),
    0xb7u32 => ElementInfo::new(0xb7, "CueTrackPositions", Master, MANDATORY.union(MULTIPLE), 3, 0xbb),
    0xf7u32 => ElementInfo::new(0xf7, "CueTrack", Unsigned, MANDATORY, 4, 0xb7),
    0xf1u32 => ElementInfo::new(0xf1, "CueClusterPosition", Unsigned, MANDATORY, 4, 0xb7),
    // Other top-level elements. Their contents are not described.
    0x1043a770u32 => ElementInfo::new(0x1043a770, "Chapters", Master, NONE, 1, 0x18538067),
    0x1254c367u32 => ElementInfo::new(0x1254c367, "Tags", Master, MULTIPLE, 1, 0x18538067),
    0x1941a469u32 => ElementInfo::new(0x1941a469, "Attachments", Master, NONE, 1, 0x18538067),
};
