// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Single architecture Mach-O images.

A Mach-O image is a header, a table of load commands, and everything that
follows the table. We only model the load commands that resigning has to
touch: segments (to find and resize `__LINKEDIT`) and `LC_CODE_SIGNATURE`
(to find the embedded signature). Every other load command is carried as
opaque bytes so an image can be written back out exactly as it was read.

The header magic is inspected big-endian. The magic values we accept are the
byte-swapped `MH_CIGAM` forms, meaning the rest of the header and every load
command are little-endian. The structures themselves are goblin's, read and
written with scroll.

Data following the load command table is not interpreted. It is held as a
single raw region and the signature data is located inside it by offset.
*/

use {
    crate::error::AppleResignError,
    goblin::{
        container::{Container, Ctx},
        mach::{
            constants::SEG_LINKEDIT,
            header::{
                Header, Header32, Header64, MH_CIGAM, MH_CIGAM_64, MH_MAGIC_64, SIZEOF_HEADER_32,
                SIZEOF_HEADER_64,
            },
            load_command::{
                LinkeditDataCommand, LoadCommandHeader, Section32, Section64, SegmentCommand32,
                SegmentCommand64, LC_CODE_SIGNATURE, LC_SEGMENT, LC_SEGMENT_64,
                SIZEOF_LINKEDIT_DATA_COMMAND, SIZEOF_LOAD_COMMAND, SIZEOF_SECTION_32,
                SIZEOF_SECTION_64, SIZEOF_SEGMENT_COMMAND_32, SIZEOF_SEGMENT_COMMAND_64,
            },
        },
    },
    scroll::{IOwrite, Pread},
    std::io::Write,
};

/// Interpret a fixed 16 byte name field.
///
/// Names are NULL padded when shorter than the field but may fill it entirely.
fn fixed_name(raw: &[u8; 16]) -> Result<&str, AppleResignError> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());

    std::str::from_utf8(&raw[..end]).map_err(|_| AppleResignError::MalformedIdentifier("name"))
}

/// Produce a NULL padded 16 byte name field. Longer names are truncated.
pub fn fixed_name_field(name: &str) -> [u8; 16] {
    let mut field = [0u8; 16];
    let len = name.len().min(16);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);

    field
}

/// Convert a 64-bit value to the 32-bit field width of a 32-bit image.
fn narrow(v: u64, what: &'static str) -> Result<u32, AppleResignError> {
    u32::try_from(v).map_err(|_| AppleResignError::OffsetOutOfRange(what))
}

/// Width independent access to `LC_SEGMENT` and `LC_SEGMENT_64` commands.
pub trait Segment {
    /// The raw 16 byte segment name.
    fn segname(&self) -> &[u8; 16];

    fn file_offset(&self) -> u64;

    fn file_size(&self) -> u64;

    fn vm_size(&self) -> u64;

    /// Set the file size, failing if it doesn't fit the command's field width.
    fn set_file_size(&mut self, size: u64) -> Result<(), AppleResignError>;

    fn set_vm_size(&mut self, size: u64) -> Result<(), AppleResignError>;

    fn segment_name(&self) -> Result<&str, AppleResignError> {
        fixed_name(self.segname())
    }

    /// Resize the segment so its file data ends at `end_offset`.
    fn set_end_offset(&mut self, end_offset: u64) -> Result<(), AppleResignError> {
        let size = end_offset
            .checked_sub(self.file_offset())
            .ok_or(AppleResignError::OffsetOutOfRange(
                "segment end before segment start",
            ))?;

        self.set_file_size(size)
    }
}

impl Segment for SegmentCommand32 {
    fn segname(&self) -> &[u8; 16] {
        &self.segname
    }

    fn file_offset(&self) -> u64 {
        self.fileoff as u64
    }

    fn file_size(&self) -> u64 {
        self.filesize as u64
    }

    fn vm_size(&self) -> u64 {
        self.vmsize as u64
    }

    fn set_file_size(&mut self, size: u64) -> Result<(), AppleResignError> {
        self.filesize = narrow(size, "segment filesize")?;
        Ok(())
    }

    fn set_vm_size(&mut self, size: u64) -> Result<(), AppleResignError> {
        self.vmsize = narrow(size, "segment vmsize")?;
        Ok(())
    }
}

impl Segment for SegmentCommand64 {
    fn segname(&self) -> &[u8; 16] {
        &self.segname
    }

    fn file_offset(&self) -> u64 {
        self.fileoff
    }

    fn file_size(&self) -> u64 {
        self.filesize
    }

    fn vm_size(&self) -> u64 {
        self.vmsize
    }

    fn set_file_size(&mut self, size: u64) -> Result<(), AppleResignError> {
        self.filesize = size;
        Ok(())
    }

    fn set_vm_size(&mut self, size: u64) -> Result<(), AppleResignError> {
        self.vmsize = size;
        Ok(())
    }
}

/// A load command.
///
/// `cmd`, `cmdsize` and `nsects` of the held structures are recomputed when
/// writing.
#[derive(Clone, Debug)]
pub enum LoadCommand {
    /// `LC_SEGMENT` and the sections following it.
    Segment32(SegmentCommand32, Vec<Section32>),
    /// `LC_SEGMENT_64` and the sections following it.
    Segment64(SegmentCommand64, Vec<Section64>),
    CodeSignature(LinkeditDataCommand),
    /// Any command we don't interpret. `payload` excludes `cmd` and `cmdsize`.
    Other { cmd: u32, payload: Vec<u8> },
}

impl LoadCommand {
    /// The `LC_*` kind of this command.
    pub fn cmd(&self) -> u32 {
        match self {
            Self::Segment32(..) => LC_SEGMENT,
            Self::Segment64(..) => LC_SEGMENT_64,
            Self::CodeSignature(_) => LC_CODE_SIGNATURE,
            Self::Other { cmd, .. } => *cmd,
        }
    }

    /// Size of this command on the wire, including `cmd` and `cmdsize`.
    pub fn cmdsize(&self) -> usize {
        match self {
            Self::Segment32(_, sections) => {
                SIZEOF_SEGMENT_COMMAND_32 + sections.len() * SIZEOF_SECTION_32
            }
            Self::Segment64(_, sections) => {
                SIZEOF_SEGMENT_COMMAND_64 + sections.len() * SIZEOF_SECTION_64
            }
            Self::CodeSignature(_) => SIZEOF_LINKEDIT_DATA_COMMAND,
            Self::Other { payload, .. } => SIZEOF_LOAD_COMMAND + payload.len(),
        }
    }

    /// Obtain the segment in this command, if it is a segment command.
    pub fn segment(&self) -> Option<&dyn Segment> {
        match self {
            Self::Segment32(segment, _) => Some(segment as &dyn Segment),
            Self::Segment64(segment, _) => Some(segment as &dyn Segment),
            _ => None,
        }
    }

    pub fn segment_mut(&mut self) -> Option<&mut dyn Segment> {
        match self {
            Self::Segment32(segment, _) => Some(segment as &mut dyn Segment),
            Self::Segment64(segment, _) => Some(segment as &mut dyn Segment),
            _ => None,
        }
    }

    /// Parse a single load command at `offset`, advancing it.
    ///
    /// The bytes consumed by the command's own structure must equal its
    /// declared `cmdsize`.
    pub fn parse(data: &[u8], offset: &mut usize) -> Result<Self, AppleResignError> {
        let start = *offset;
        let header = data.pread_with::<LoadCommandHeader>(start, scroll::LE)?;
        let cmdsize = header.cmdsize as usize;

        let corrupt = |actual: usize| AppleResignError::CorruptLoadCommand {
            cmd: header.cmd,
            declared: cmdsize,
            actual,
        };

        if cmdsize < SIZEOF_LOAD_COMMAND {
            return Err(corrupt(SIZEOF_LOAD_COMMAND));
        }

        let command = match header.cmd {
            LC_SEGMENT => {
                let segment = data.gread_with::<SegmentCommand32>(offset, scroll::LE)?;
                let sections = (0..segment.nsects)
                    .map(|_| data.gread_with::<Section32>(offset, scroll::LE))
                    .collect::<Result<Vec<_>, _>>()?;

                Self::Segment32(segment, sections)
            }
            LC_SEGMENT_64 => {
                let segment = data.gread_with::<SegmentCommand64>(offset, scroll::LE)?;
                let sections = (0..segment.nsects)
                    .map(|_| data.gread_with::<Section64>(offset, scroll::LE))
                    .collect::<Result<Vec<_>, _>>()?;

                Self::Segment64(segment, sections)
            }
            LC_CODE_SIGNATURE => Self::CodeSignature(data.gread_with(offset, scroll::LE)?),
            cmd => {
                *offset += SIZEOF_LOAD_COMMAND;
                let payload = data.gread_with::<&[u8]>(offset, cmdsize - SIZEOF_LOAD_COMMAND)?;

                Self::Other {
                    cmd,
                    payload: payload.to_vec(),
                }
            }
        };

        let consumed = *offset - start;
        if consumed != cmdsize {
            return Err(corrupt(consumed));
        }

        Ok(command)
    }

    pub fn write_to(&self, dest: &mut impl Write) -> Result<(), AppleResignError> {
        let cmdsize = narrow(self.cmdsize() as u64, "load command size")?;

        match self {
            Self::Segment32(segment, sections) => {
                let mut segment = *segment;
                segment.cmd = LC_SEGMENT;
                segment.cmdsize = cmdsize;
                segment.nsects = sections.len() as u32;

                dest.iowrite_with(segment, scroll::LE)?;
                for section in sections {
                    dest.iowrite_with(*section, scroll::LE)?;
                }
            }
            Self::Segment64(segment, sections) => {
                let mut segment = *segment;
                segment.cmd = LC_SEGMENT_64;
                segment.cmdsize = cmdsize;
                segment.nsects = sections.len() as u32;

                dest.iowrite_with(segment, scroll::LE)?;
                for section in sections {
                    dest.iowrite_with(*section, scroll::LE)?;
                }
            }
            Self::CodeSignature(command) => {
                let mut command = *command;
                command.cmd = LC_CODE_SIGNATURE;
                command.cmdsize = cmdsize;

                dest.iowrite_with(command, scroll::LE)?;
            }
            Self::Other { cmd, payload } => {
                dest.iowrite_with(*cmd, scroll::LE)?;
                dest.iowrite_with(cmdsize, scroll::LE)?;
                dest.write_all(payload)?;
            }
        }

        Ok(())
    }
}

/// Find the `__LINKEDIT` segment in a load command table.
pub fn find_linkedit_segment(commands: &[LoadCommand]) -> Option<&dyn Segment> {
    commands
        .iter()
        .filter_map(|command| command.segment())
        .find(|segment| matches!(segment.segment_name(), Ok(SEG_LINKEDIT)))
}

/// Find the `__LINKEDIT` segment in a load command table, mutably.
pub fn find_linkedit_segment_mut(commands: &mut [LoadCommand]) -> Option<&mut dyn Segment> {
    commands
        .iter_mut()
        .filter_map(|command| command.segment_mut())
        .find(|segment| matches!(segment.segment_name(), Ok(SEG_LINKEDIT)))
}

/// Find the first load command of a given `LC_*` kind.
pub fn get_load_command(commands: &[LoadCommand], cmd: u32) -> Option<&LoadCommand> {
    commands.iter().find(|command| command.cmd() == cmd)
}

/// A parsed single architecture Mach-O image.
///
/// `header.magic` holds the magic as read in the image's own byte order, so
/// it is `MH_MAGIC` or `MH_MAGIC_64`.
#[derive(Clone, Debug)]
pub struct MachOImage {
    pub header: Header,
    pub load_commands: Vec<LoadCommand>,
    /// Everything after the load command table.
    pub data: Vec<u8>,
}

impl MachOImage {
    /// Construct an image from parts, deriving the header's command count and size.
    pub fn new(mut header: Header, load_commands: Vec<LoadCommand>, data: Vec<u8>) -> Self {
        header.ncmds = load_commands.len();
        header.sizeofcmds = load_commands.iter().map(|c| c.cmdsize()).sum::<usize>() as u32;

        Self {
            header,
            load_commands,
            data,
        }
    }

    /// Parse an image from bytes.
    pub fn parse(data: &[u8]) -> Result<Self, AppleResignError> {
        let magic = data.pread_with::<u32>(0, scroll::BE)?;

        let header = match magic {
            MH_CIGAM_64 => Header::from(data.pread_with::<Header64>(0, scroll::LE)?),
            MH_CIGAM => Header::from(data.pread_with::<Header32>(0, scroll::LE)?),
            _ => return Err(AppleResignError::UnsupportedMagic(magic)),
        };

        let header_size = if magic == MH_CIGAM_64 {
            SIZEOF_HEADER_64
        } else {
            SIZEOF_HEADER_32
        };
        let mut offset = header_size;

        let load_commands = (0..header.ncmds)
            .map(|_| LoadCommand::parse(data, &mut offset))
            .collect::<Result<Vec<_>, _>>()?;

        let actual = offset - header_size;
        if actual != header.sizeofcmds as usize {
            return Err(AppleResignError::LoadCommandTableMismatch {
                declared: header.sizeofcmds as usize,
                actual,
            });
        }

        Ok(Self {
            header,
            load_commands,
            data: data[offset..].to_vec(),
        })
    }

    /// Whether this is a 64-bit image.
    pub fn is_64(&self) -> bool {
        self.header.magic == MH_MAGIC_64
    }

    fn ctx(&self) -> Ctx {
        Ctx::new(
            if self.is_64() {
                Container::Big
            } else {
                Container::Little
            },
            scroll::LE,
        )
    }

    /// Size of the header in bytes: 28 for 32-bit images and 32 for 64-bit.
    pub fn header_size(&self) -> usize {
        if self.is_64() {
            SIZEOF_HEADER_64
        } else {
            SIZEOF_HEADER_32
        }
    }

    /// Offset of the raw region relative to the start of the image.
    pub fn data_offset(&self) -> usize {
        self.header_size() + self.header.sizeofcmds as usize
    }

    /// Total serialized length.
    pub fn len(&self) -> usize {
        self.header_size()
            + self
                .load_commands
                .iter()
                .map(|command| command.cmdsize())
                .sum::<usize>()
            + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_to(&self, dest: &mut impl Write) -> Result<(), AppleResignError> {
        dest.iowrite_with(self.header, self.ctx())?;

        for command in &self.load_commands {
            command.write_to(dest)?;
        }

        dest.write_all(&self.data)?;

        Ok(())
    }

    /// Serialize this image to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AppleResignError> {
        let mut res = Vec::with_capacity(self.len());
        self.write_to(&mut res)?;

        Ok(res)
    }

    /// Resolve the `LC_CODE_SIGNATURE` load command, if present.
    pub fn code_signature_command(&self) -> Option<&LinkeditDataCommand> {
        self.load_commands.iter().find_map(|command| {
            if let LoadCommand::CodeSignature(command) = command {
                Some(command)
            } else {
                None
            }
        })
    }

    /// Obtain the embedded signature data referenced by `LC_CODE_SIGNATURE`.
    ///
    /// Returns `Ok(None)` if the image has no signature load command.
    pub fn code_signature_data(&self) -> Result<Option<&[u8]>, AppleResignError> {
        let command = match self.code_signature_command() {
            Some(command) => command,
            None => return Ok(None),
        };

        let start = (command.dataoff as usize)
            .checked_sub(self.data_offset())
            .ok_or(AppleResignError::OffsetOutOfRange(
                "signature data starts inside the load command table",
            ))?;
        let end = start + command.datasize as usize;

        Ok(Some(self.data.get(start..end).ok_or(
            AppleResignError::OffsetOutOfRange("signature data extends past end of image"),
        )?))
    }
}
