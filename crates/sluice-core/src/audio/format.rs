//! PCM format descriptors passed to platform stream constructors
//!
//! Platforms accept either an extended descriptor, which states the sample
//! representation explicitly, or a basic one, which only knows unsigned
//! 8-bit and signed 16/32-bit integer samples.

use crate::types::{DeviceFormat, Representation, SampleType};

/// Byte order of the samples in a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }
}

/// Which descriptor flavour a stream is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Extended,
    Basic,
}

/// PCM stream format as handed to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmDescriptor {
    pub kind: DescriptorKind,
    pub channels: u32,
    /// Sample rate in milliHertz
    pub sample_rate_mhz: u32,
    pub bits_per_sample: u32,
    pub container_size: u32,
    pub channel_mask: u32,
    pub endianness: Endianness,
    /// Only present on extended descriptors
    pub representation: Option<Representation>,
}

impl PcmDescriptor {
    /// Extended descriptor carrying the format's representation
    pub fn extended(format: &DeviceFormat) -> Self {
        Self {
            kind: DescriptorKind::Extended,
            representation: Some(format.sample_type.representation()),
            ..Self::basic(format)
        }
    }

    /// Basic descriptor; the sample type is implied by the bit depth
    pub fn basic(format: &DeviceFormat) -> Self {
        let bits = format.sample_type.bits();
        Self {
            kind: DescriptorKind::Basic,
            channels: format.channel_count() as u32,
            sample_rate_mhz: format.frequency.saturating_mul(1000),
            bits_per_sample: bits,
            container_size: bits,
            channel_mask: format.channels.speaker_mask(),
            endianness: Endianness::native(),
            representation: None,
        }
    }

    /// Sample type this descriptor describes, if it maps to one
    pub fn sample_type(&self) -> Option<SampleType> {
        match (self.representation, self.bits_per_sample) {
            (None, 8) => Some(SampleType::UByte),
            (None, 16) => Some(SampleType::Short),
            (None, 32) => Some(SampleType::Int),
            (Some(Representation::SignedInt), 8) => Some(SampleType::Byte),
            (Some(Representation::UnsignedInt), 8) => Some(SampleType::UByte),
            (Some(Representation::SignedInt), 16) => Some(SampleType::Short),
            (Some(Representation::UnsignedInt), 16) => Some(SampleType::UShort),
            (Some(Representation::SignedInt), 32) => Some(SampleType::Int),
            (Some(Representation::UnsignedInt), 32) => Some(SampleType::UInt),
            (Some(Representation::Float), 32) => Some(SampleType::Float),
            _ => None,
        }
    }

    /// Frame rate in Hz
    pub fn frequency(&self) -> u32 {
        self.sample_rate_mhz / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelLayout;

    fn format(sample_type: SampleType) -> DeviceFormat {
        DeviceFormat {
            channels: ChannelLayout::Stereo,
            sample_type,
            frequency: 44100,
            ..DeviceFormat::default()
        }
    }

    #[test]
    fn test_extended_descriptor_keeps_type() {
        for ty in SampleType::ALL {
            let desc = PcmDescriptor::extended(&format(ty));
            assert_eq!(desc.sample_type(), Some(ty));
            assert_eq!(desc.kind, DescriptorKind::Extended);
        }
    }

    #[test]
    fn test_basic_descriptor_implies_type_from_bits() {
        let desc = PcmDescriptor::basic(&format(SampleType::Short));
        assert_eq!(desc.sample_type(), Some(SampleType::Short));
        assert_eq!(desc.representation, None);

        // Float is indistinguishable from Int without a representation
        let desc = PcmDescriptor::basic(&format(SampleType::Float));
        assert_eq!(desc.sample_type(), Some(SampleType::Int));
    }

    #[test]
    fn test_descriptor_fields() {
        let desc = PcmDescriptor::basic(&format(SampleType::Short));
        assert_eq!(desc.channels, 2);
        assert_eq!(desc.sample_rate_mhz, 44_100_000);
        assert_eq!(desc.frequency(), 44100);
        assert_eq!(desc.bits_per_sample, 16);
        assert_eq!(desc.container_size, 16);
        assert_eq!(desc.endianness, Endianness::native());
    }
}
