//! Common types for Sluice
//!
//! This module contains the fundamental format types shared by the ring
//! buffer, the engines and every platform bridge: sample types, channel
//! layouts and the negotiated device format.

use serde::{Deserialize, Serialize};

/// Default frame rate (48kHz - standard professional audio rate)
pub const DEFAULT_FREQUENCY: u32 = 48000;

/// Default number of frames per chunk
pub const DEFAULT_UPDATE_SIZE: u32 = 960;

/// Default total buffer depth in frames (3 chunks)
pub const DEFAULT_BUFFER_SIZE: u32 = 2880;

/// How the bits of a sample are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    SignedInt,
    UnsignedInt,
    Float,
}

/// Sample storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleType {
    Byte,
    UByte,
    #[default]
    Short,
    UShort,
    Int,
    UInt,
    Float,
}

impl SampleType {
    /// All sample types in declaration order
    pub const ALL: [SampleType; 7] = [
        SampleType::Byte,
        SampleType::UByte,
        SampleType::Short,
        SampleType::UShort,
        SampleType::Int,
        SampleType::UInt,
        SampleType::Float,
    ];

    /// Size of one sample in bytes
    pub fn bytes(&self) -> usize {
        match self {
            SampleType::Byte | SampleType::UByte => 1,
            SampleType::Short | SampleType::UShort => 2,
            SampleType::Int | SampleType::UInt | SampleType::Float => 4,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bytes() as u32 * 8
    }

    pub fn representation(&self) -> Representation {
        match self {
            SampleType::Byte | SampleType::Short | SampleType::Int => Representation::SignedInt,
            SampleType::UByte | SampleType::UShort | SampleType::UInt => {
                Representation::UnsignedInt
            }
            SampleType::Float => Representation::Float,
        }
    }

    /// Byte value that encodes silence when a buffer is filled bytewise
    ///
    /// Only unsigned 8-bit audio has a non-zero midpoint that fits in a
    /// single byte.
    pub fn silence(&self) -> u8 {
        match self {
            SampleType::UByte => 0x80,
            _ => 0,
        }
    }

    /// Nearest type a basic (non-extended) PCM descriptor can carry
    ///
    /// Basic descriptors have no representation field, so only unsigned
    /// 8-bit and signed 16/32-bit samples survive unchanged.
    pub fn basic_substitute(&self) -> SampleType {
        match self {
            SampleType::Byte => SampleType::UByte,
            SampleType::UInt => SampleType::Int,
            SampleType::Float | SampleType::UShort => SampleType::Short,
            SampleType::UByte | SampleType::Short | SampleType::Int => *self,
        }
    }

    /// Whether a basic PCM descriptor can express this type as-is
    pub fn is_basic(&self) -> bool {
        self.basic_substitute() == *self
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleType::Byte => "Signed Byte",
            SampleType::UByte => "Unsigned Byte",
            SampleType::Short => "Signed Short",
            SampleType::UShort => "Unsigned Short",
            SampleType::Int => "Signed Int",
            SampleType::UInt => "Unsigned Int",
            SampleType::Float => "Float",
        }
    }

    /// Encode a normalized sample (-1.0..=1.0) into `dest` in native byte order
    ///
    /// `dest` must be exactly `bytes()` long.
    pub fn encode(&self, value: f32, dest: &mut [u8]) {
        let v = value.clamp(-1.0, 1.0);
        match self {
            SampleType::Byte => dest.copy_from_slice(&((v * 127.0) as i8).to_ne_bytes()),
            SampleType::UByte => dest.copy_from_slice(&(((v * 127.0) as i16 + 128) as u8).to_ne_bytes()),
            SampleType::Short => dest.copy_from_slice(&((v * 32767.0) as i16).to_ne_bytes()),
            SampleType::UShort => {
                dest.copy_from_slice(&(((v * 32767.0) as i32 + 32768) as u16).to_ne_bytes())
            }
            SampleType::Int => dest.copy_from_slice(&((v as f64 * 2147483647.0) as i32).to_ne_bytes()),
            SampleType::UInt => dest.copy_from_slice(
                &(((v as f64 * 2147483647.0) as i64 + 2147483648) as u32).to_ne_bytes(),
            ),
            SampleType::Float => dest.copy_from_slice(&v.to_ne_bytes()),
        }
    }

    /// Decode one sample from `src` to the normalized range
    pub fn decode(&self, src: &[u8]) -> f32 {
        match self {
            SampleType::Byte => i8::from_ne_bytes([src[0]]) as f32 / 128.0,
            SampleType::UByte => (src[0] as f32 - 128.0) / 128.0,
            SampleType::Short => i16::from_ne_bytes([src[0], src[1]]) as f32 / 32768.0,
            SampleType::UShort => (u16::from_ne_bytes([src[0], src[1]]) as f32 - 32768.0) / 32768.0,
            SampleType::Int => {
                (i32::from_ne_bytes([src[0], src[1], src[2], src[3]]) as f64 / 2147483648.0) as f32
            }
            SampleType::UInt => {
                ((u32::from_ne_bytes([src[0], src[1], src[2], src[3]]) as f64 - 2147483648.0)
                    / 2147483648.0) as f32
            }
            SampleType::Float => f32::from_ne_bytes([src[0], src[1], src[2], src[3]]),
        }
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Speaker position bits used in channel masks
pub mod speaker {
    pub const FRONT_LEFT: u32 = 0x0000_0001;
    pub const FRONT_RIGHT: u32 = 0x0000_0002;
    pub const FRONT_CENTER: u32 = 0x0000_0004;
    pub const LOW_FREQUENCY: u32 = 0x0000_0008;
    pub const BACK_LEFT: u32 = 0x0000_0010;
    pub const BACK_RIGHT: u32 = 0x0000_0020;
    pub const BACK_CENTER: u32 = 0x0000_0100;
    pub const SIDE_LEFT: u32 = 0x0000_0200;
    pub const SIDE_RIGHT: u32 = 0x0000_0400;
    pub const TOP_FRONT_LEFT: u32 = 0x0000_1000;
    pub const TOP_FRONT_RIGHT: u32 = 0x0000_4000;
    pub const TOP_BACK_LEFT: u32 = 0x0000_8000;
    pub const TOP_BACK_RIGHT: u32 = 0x0002_0000;
}

/// Channel configuration of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
    Quad,
    X51,
    X61,
    X71,
    X714,
    X7144,
    X3D71,
    /// Ambisonic B-format of the given order
    Ambi3D { order: u8 },
}

impl ChannelLayout {
    /// Number of interleaved channels in one frame
    pub fn count(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Quad => 4,
            ChannelLayout::X51 => 6,
            ChannelLayout::X61 => 7,
            ChannelLayout::X71 | ChannelLayout::X3D71 => 8,
            ChannelLayout::X714 => 12,
            ChannelLayout::X7144 => 16,
            ChannelLayout::Ambi3D { order } => {
                let n = *order as usize + 1;
                n * n
            }
        }
    }

    /// Speaker mask for PCM descriptors
    ///
    /// Layouts without a fixed speaker arrangement return 0.
    pub fn speaker_mask(&self) -> u32 {
        use speaker::*;
        match self {
            ChannelLayout::Mono => FRONT_CENTER,
            ChannelLayout::Stereo => FRONT_LEFT | FRONT_RIGHT,
            ChannelLayout::Quad => FRONT_LEFT | FRONT_RIGHT | BACK_LEFT | BACK_RIGHT,
            ChannelLayout::X51 => {
                FRONT_LEFT | FRONT_RIGHT | FRONT_CENTER | LOW_FREQUENCY | SIDE_LEFT | SIDE_RIGHT
            }
            ChannelLayout::X61 => {
                FRONT_LEFT
                    | FRONT_RIGHT
                    | FRONT_CENTER
                    | LOW_FREQUENCY
                    | BACK_CENTER
                    | SIDE_LEFT
                    | SIDE_RIGHT
            }
            ChannelLayout::X71 | ChannelLayout::X3D71 => {
                FRONT_LEFT
                    | FRONT_RIGHT
                    | FRONT_CENTER
                    | LOW_FREQUENCY
                    | BACK_LEFT
                    | BACK_RIGHT
                    | SIDE_LEFT
                    | SIDE_RIGHT
            }
            ChannelLayout::X714 => {
                FRONT_LEFT
                    | FRONT_RIGHT
                    | FRONT_CENTER
                    | LOW_FREQUENCY
                    | BACK_LEFT
                    | BACK_RIGHT
                    | SIDE_LEFT
                    | SIDE_RIGHT
                    | TOP_FRONT_LEFT
                    | TOP_FRONT_RIGHT
                    | TOP_BACK_LEFT
                    | TOP_BACK_RIGHT
            }
            ChannelLayout::X7144 | ChannelLayout::Ambi3D { .. } => 0,
        }
    }
}

/// Format of a device stream
///
/// Requested by the application before configuration and overwritten with
/// the negotiated values once a backend has configured the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFormat {
    pub channels: ChannelLayout,
    pub sample_type: SampleType,
    /// Frames per second
    pub frequency: u32,
    /// Frames per chunk
    pub update_size: u32,
    /// Total buffer depth in frames
    pub buffer_size: u32,
}

impl Default for DeviceFormat {
    fn default() -> Self {
        Self {
            channels: ChannelLayout::default(),
            sample_type: SampleType::default(),
            frequency: DEFAULT_FREQUENCY,
            update_size: DEFAULT_UPDATE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl DeviceFormat {
    pub fn channel_count(&self) -> usize {
        self.channels.count()
    }

    pub fn sample_bytes(&self) -> usize {
        self.sample_type.bytes()
    }

    /// Bytes per frame (one sample for every channel)
    pub fn frame_size(&self) -> usize {
        self.channel_count() * self.sample_bytes()
    }

    /// Bytes per chunk
    pub fn chunk_bytes(&self) -> usize {
        self.update_size as usize * self.frame_size()
    }

    /// Number of chunks that make up the buffer depth
    pub fn chunk_count(&self) -> usize {
        if self.update_size == 0 {
            return 0;
        }
        (self.buffer_size / self.update_size) as usize
    }

    /// Duration of one chunk in milliseconds
    pub fn chunk_ms(&self) -> f32 {
        (self.update_size as f32 / self.frequency as f32) * 1000.0
    }
}
