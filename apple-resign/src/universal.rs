// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Universal (fat) Mach-O containers.

A universal binary is a big-endian header holding an architecture count,
a table of `fat_arch` records, then each architecture's Mach-O image at the
offset its record names. Record alignment is stored as a power of two
exponent; in memory we keep the actual alignment in bytes.

Offsets and sizes of records are recomputed on every write, so images may
change size between reading and writing a container.
*/

use {
    crate::{error::AppleResignError, macho::MachOImage},
    goblin::mach::fat::{FatArch, FAT_MAGIC, SIZEOF_FAT_ARCH, SIZEOF_FAT_HEADER},
    scroll::{IOwrite, Pread, Pwrite},
    std::io::Write,
};

/// Alignment applied to an architecture whose alignment is unspecified.
pub const DEFAULT_ALIGNMENT: u32 = 16384;

/// Describes one architecture slice in a universal binary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ArchitectureDescriptor {
    pub cputype: u32,
    pub cpusubtype: u32,
    /// File offset of the slice, as last read or written.
    pub offset: u32,
    /// Size of the slice, as last read or written.
    pub size: u32,
    /// Alignment of the slice in bytes. 0 means [DEFAULT_ALIGNMENT].
    pub align: u32,
}

impl ArchitectureDescriptor {
    fn effective_alignment(&self) -> u32 {
        if self.align == 0 {
            DEFAULT_ALIGNMENT
        } else {
            self.align
        }
    }

    fn from_fat_arch(arch: &FatArch) -> Result<Self, AppleResignError> {
        let align = 1u32
            .checked_shl(arch.align)
            .ok_or(AppleResignError::OffsetOutOfRange("fat_arch alignment exponent"))?;

        Ok(Self {
            cputype: arch.cputype,
            cpusubtype: arch.cpusubtype,
            offset: arch.offset,
            size: arch.size,
            align,
        })
    }

    fn to_fat_arch(self) -> FatArch {
        FatArch {
            cputype: self.cputype,
            cpusubtype: self.cpusubtype,
            offset: self.offset,
            size: self.size,
            align: self.effective_alignment().trailing_zeros(),
        }
    }
}

/// A universal binary and its parsed architecture slices.
///
/// `descriptors[i]` describes `images[i]`.
#[derive(Clone, Debug, Default)]
pub struct UniversalBinary {
    pub descriptors: Vec<ArchitectureDescriptor>,
    pub images: Vec<MachOImage>,
}

impl UniversalBinary {
    /// Construct a universal binary from images, using the default alignment.
    pub fn from_images(images: Vec<MachOImage>) -> Self {
        let descriptors = images
            .iter()
            .map(|image| ArchitectureDescriptor {
                cputype: image.header.cputype,
                cpusubtype: image.header.cpusubtype,
                offset: 0,
                size: 0,
                align: DEFAULT_ALIGNMENT,
            })
            .collect();

        Self {
            descriptors,
            images,
        }
    }

    /// Parse a universal binary and every architecture slice within it.
    pub fn parse(data: &[u8]) -> Result<Self, AppleResignError> {
        let offset = &mut 0;

        let magic = data.gread_with::<u32>(offset, scroll::BE)?;
        if magic != FAT_MAGIC {
            return Err(AppleResignError::UnsupportedMagic(magic));
        }

        let count = data.gread_with::<u32>(offset, scroll::BE)?;

        let descriptors = (0..count)
            .map(|_| {
                let arch = data.gread_with::<FatArch>(offset, scroll::BE)?;
                ArchitectureDescriptor::from_fat_arch(&arch)
            })
            .collect::<Result<Vec<_>, AppleResignError>>()?;

        let images = descriptors
            .iter()
            .map(|descriptor| {
                let start = descriptor.offset as usize;
                let end = start + descriptor.size as usize;

                MachOImage::parse(data.get(start..end).ok_or(AppleResignError::TruncatedInput)?)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            descriptors,
            images,
        })
    }

    /// Compute the descriptors as they will be written.
    ///
    /// Every slice starts on a multiple of its alignment.
    pub fn layout(&self) -> Result<Vec<ArchitectureDescriptor>, AppleResignError> {
        let mut offset = SIZEOF_FAT_HEADER + self.descriptors.len() * SIZEOF_FAT_ARCH;

        self.descriptors
            .iter()
            .zip(self.images.iter())
            .map(|(descriptor, image)| {
                let align = descriptor.effective_alignment() as usize;
                offset += (align - offset % align) % align;

                let placed = ArchitectureDescriptor {
                    offset: u32::try_from(offset)
                        .map_err(|_| AppleResignError::OffsetOutOfRange("fat_arch offset"))?,
                    size: u32::try_from(image.len())
                        .map_err(|_| AppleResignError::OffsetOutOfRange("fat_arch size"))?,
                    ..*descriptor
                };

                offset += image.len();

                Ok(placed)
            })
            .collect()
    }

    pub fn write_to(&self, dest: &mut impl Write) -> Result<(), AppleResignError> {
        let layout = self.layout()?;

        dest.iowrite_with(FAT_MAGIC, scroll::BE)?;
        dest.iowrite_with(layout.len() as u32, scroll::BE)?;

        for descriptor in &layout {
            let mut buffer = [0u8; SIZEOF_FAT_ARCH];
            buffer.pwrite_with(descriptor.to_fat_arch(), 0, scroll::BE)?;
            dest.write_all(&buffer)?;
        }

        let mut offset = SIZEOF_FAT_HEADER + layout.len() * SIZEOF_FAT_ARCH;

        for (descriptor, image) in layout.iter().zip(self.images.iter()) {
            dest.write_all(&vec![0u8; descriptor.offset as usize - offset])?;
            image.write_to(dest)?;
            offset = descriptor.offset as usize + image.len();
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AppleResignError> {
        let mut res = vec![];
        self.write_to(&mut res)?;

        Ok(res)
    }
}

/// A thin or universal Mach-O file.
#[derive(Clone, Debug)]
pub enum MachOFile {
    Thin(MachOImage),
    Universal(UniversalBinary),
}

impl MachOFile {
    /// Parse a file, detecting whether it is universal from its magic.
    pub fn parse(data: &[u8]) -> Result<Self, AppleResignError> {
        if data.pread_with::<u32>(0, scroll::BE)? == FAT_MAGIC {
            Ok(Self::Universal(UniversalBinary::parse(data)?))
        } else {
            Ok(Self::Thin(MachOImage::parse(data)?))
        }
    }

    /// Images in this file, in architecture table order.
    pub fn images(&self) -> &[MachOImage] {
        match self {
            Self::Thin(image) => std::slice::from_ref(image),
            Self::Universal(binary) => &binary.images,
        }
    }

    pub fn images_mut(&mut self) -> &mut [MachOImage] {
        match self {
            Self::Thin(image) => std::slice::from_mut(image),
            Self::Universal(binary) => &mut binary.images,
        }
    }

    pub fn into_images(self) -> Vec<MachOImage> {
        match self {
            Self::Thin(image) => vec![image],
            Self::Universal(binary) => binary.images,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AppleResignError> {
        match self {
            Self::Thin(image) => image.to_bytes(),
            Self::Universal(binary) => binary.to_bytes(),
        }
    }
}

/// Parse every Mach-O image in a thin or universal file.
pub fn read_macho_images(data: &[u8]) -> Result<Vec<MachOImage>, AppleResignError> {
    Ok(MachOFile::parse(data)?.into_images())
}

/// Serialize images back to a file.
///
/// A single image is written as a thin Mach-O. Multiple images are wrapped
/// in a universal binary using the default alignment.
pub fn pack_macho_images(images: Vec<MachOImage>) -> Result<Vec<u8>, AppleResignError> {
    if images.len() == 1 {
        images[0].to_bytes()
    } else {
        UniversalBinary::from_images(images).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::macho::tests::minimal_executable,
        goblin::mach::{
            cputype::{CPU_TYPE_ARM, CPU_TYPE_X86_64},
            header::{Header, MH_MAGIC},
        },
    };

    fn two_arch_binary() -> UniversalBinary {
        let arm64 = minimal_executable(0x1000, &[]);

        let mut x86_64 = minimal_executable(0x2000, &[]);
        x86_64.header.cputype = CPU_TYPE_X86_64;
        x86_64.header.cpusubtype = 3;

        UniversalBinary::from_images(vec![arm64, x86_64])
    }

    #[test]
    fn layout_alignment() {
        let binary = two_arch_binary();
        let layout = binary.layout().unwrap();

        assert_eq!(layout[0].offset, 0x4000);
        assert_eq!(layout[0].size, 0x1000);
        assert_eq!(layout[1].offset, 0x8000);
        assert_eq!(layout[1].size, 0x2000);

        let data = binary.to_bytes().unwrap();
        assert_eq!(data.len(), 0xa000);
        assert_eq!(&data[0..8], &hex::decode("cafebabe00000002").unwrap()[..]);
        // Alignment is written as its exponent.
        assert_eq!(&data[24..28], &[0, 0, 0, 14]);
    }

    #[test]
    fn parse_roundtrip() {
        let binary = two_arch_binary();
        let data = binary.to_bytes().unwrap();

        let parsed = UniversalBinary::parse(&data).unwrap();
        for (parsed, image) in parsed.images.iter().zip(&binary.images) {
            assert_eq!(parsed.to_bytes().unwrap(), image.to_bytes().unwrap());
        }
        assert_eq!(parsed.descriptors, binary.layout().unwrap());
        assert_eq!(parsed.to_bytes().unwrap(), data);

        // Independent parser agrees on the table.
        let multiarch = goblin::mach::MultiArch::new(&data).unwrap();
        let arches = multiarch.arches().unwrap();
        assert_eq!(arches.len(), 2);
        assert_eq!(arches[1].cputype, CPU_TYPE_X86_64);
        assert_eq!(arches[1].offset, 0x8000);
    }

    #[test]
    fn zero_alignment_uses_default() {
        let mut binary = two_arch_binary();
        binary.descriptors[1].align = 0;
        binary.descriptors[0].align = 4096;

        let layout = binary.layout().unwrap();
        assert_eq!(layout[0].offset, 0x1000);
        assert_eq!(layout[1].offset, 0x4000);
    }

    #[test]
    fn truncated_slice() {
        let data = two_arch_binary().to_bytes().unwrap();

        assert!(matches!(
            UniversalBinary::parse(&data[..0x9000]),
            Err(AppleResignError::TruncatedInput)
        ));
        assert!(matches!(
            UniversalBinary::parse(&data[..30]),
            Err(AppleResignError::TruncatedInput)
        ));
    }

    #[test]
    fn file_detection() {
        let thin = minimal_executable(0x1000, &[]);
        let thin_data = thin.to_bytes().unwrap();

        let file = MachOFile::parse(&thin_data).unwrap();
        assert!(matches!(file, MachOFile::Thin(_)));
        assert_eq!(file.images().len(), 1);
        assert_eq!(file.to_bytes().unwrap(), thin_data);

        let fat_data = two_arch_binary().to_bytes().unwrap();
        let images = read_macho_images(&fat_data).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(pack_macho_images(images).unwrap(), fat_data);

        assert_eq!(
            pack_macho_images(read_macho_images(&thin_data).unwrap()).unwrap(),
            thin_data
        );

        assert!(matches!(
            MachOFile::parse(&hex::decode("7f454c46").unwrap()),
            Err(AppleResignError::UnsupportedMagic(0x7f454c46))
        ));
    }

    #[test]
    fn thirty_two_bit_slice() {
        let header = Header {
            magic: MH_MAGIC,
            cputype: CPU_TYPE_ARM,
            cpusubtype: 9,
            filetype: 2,
            ncmds: 0,
            sizeofcmds: 0,
            flags: 0,
            reserved: 0,
        };
        let arm = MachOImage::new(header, vec![], vec![1, 2, 3, 4]);

        let binary = UniversalBinary::from_images(vec![arm, minimal_executable(0x1000, &[])]);
        let data = binary.to_bytes().unwrap();

        let parsed = UniversalBinary::parse(&data).unwrap();
        assert_eq!(parsed.images[0].len(), 32);
        assert!(!parsed.images[0].is_64());
        assert_eq!(parsed.images[0].data, vec![1, 2, 3, 4]);
    }
}
