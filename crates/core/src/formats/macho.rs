use goblin::mach::{self, constants, Mach, MachO};

use crate::config::Architecture;
use crate::error::FormatError;
use crate::formats::{entry_region, malformed, MappedSection, ParsedContainer};
use crate::model::CodeRegion;

fn mach_architecture(bin: &MachO) -> Option<Architecture> {
    match bin.header.cputype() {
        mach::cputype::CPU_TYPE_X86 => Some(Architecture::X86),
        mach::cputype::CPU_TYPE_X86_64 => Some(Architecture::X86_64),
        mach::cputype::CPU_TYPE_ARM => Some(Architecture::Arm),
        mach::cputype::CPU_TYPE_ARM64 => Some(Architecture::Arm64),
        _ => None,
    }
}

fn instruction_sections(bin: &MachO) -> Vec<MappedSection> {
    let code_flags = constants::S_ATTR_PURE_INSTRUCTIONS | constants::S_ATTR_SOME_INSTRUCTIONS;
    bin.segments
        .sections()
        .flatten()
        .filter_map(Result::ok)
        .filter(|(sec, _)| sec.flags & code_flags != 0)
        .map(|(sec, _)| MappedSection { addr: sec.addr, size: sec.size, offset: sec.offset as u64 })
        .collect()
}

pub fn parse(bytes: &[u8]) -> Result<ParsedContainer, FormatError> {
    let bin = match Mach::parse(bytes).map_err(|e| malformed("Mach-O", e))? {
        Mach::Binary(bin) => bin,
        Mach::Fat(_) => {
            return Err(FormatError::Unsupported(
                "fat Mach-O; extract a single architecture first".into(),
            ))
        }
    };
    let sections = instruction_sections(&bin);

    let mut regions: Vec<_> = sections.iter().filter_map(|s| s.region(bytes.len())).collect();

    // LC_MAIN records a file offset; LC_UNIXTHREAD records an address.
    if bin.entry != 0 {
        if bin.old_style_entry {
            regions.extend(entry_region(&sections, bin.entry, None, bytes.len()));
        } else if bin.entry < bytes.len() as u64 {
            regions.push(CodeRegion::function(bin.entry, 0));
        }
    }
    for (_, nlist) in bin.symbols().filter_map(Result::ok) {
        if nlist.is_undefined() || nlist.n_sect == mach::symbols::NO_SECT as usize {
            continue;
        }
        regions.extend(entry_region(&sections, nlist.n_value, None, bytes.len()));
    }

    Ok(ParsedContainer { regions, architecture: mach_architecture(&bin) })
}
