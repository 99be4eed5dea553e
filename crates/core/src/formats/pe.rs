use goblin::pe::{self, section_table, PE};

use crate::config::Architecture;
use crate::error::FormatError;
use crate::formats::{entry_region, malformed, MappedSection, ParsedContainer};

fn pe_architecture(pe: &PE) -> Option<Architecture> {
    match pe.header.coff_header.machine {
        pe::header::COFF_MACHINE_X86 => Some(Architecture::X86),
        pe::header::COFF_MACHINE_X86_64 => Some(Architecture::X86_64),
        pe::header::COFF_MACHINE_ARM => Some(Architecture::Arm),
        pe::header::COFF_MACHINE_ARM64 => Some(Architecture::Arm64),
        _ => None,
    }
}

/// Sections marked executable, addressed by RVA.
fn executable_sections(pe: &PE) -> Vec<MappedSection> {
    pe.sections
        .iter()
        .filter(|sec| sec.characteristics & section_table::IMAGE_SCN_MEM_EXECUTE != 0)
        .map(|sec| {
            let size = if sec.virtual_size == 0 {
                sec.size_of_raw_data
            } else {
                sec.virtual_size.min(sec.size_of_raw_data)
            };
            MappedSection {
                addr: sec.virtual_address as u64,
                size: size as u64,
                offset: sec.pointer_to_raw_data as u64,
            }
        })
        .collect()
}

pub fn parse(bytes: &[u8]) -> Result<ParsedContainer, FormatError> {
    let pe = PE::parse(bytes).map_err(|e| malformed("PE", e))?;
    let sections = executable_sections(&pe);

    let mut regions: Vec<_> = sections.iter().filter_map(|s| s.region(bytes.len())).collect();

    if pe.entry != 0 {
        regions.extend(entry_region(&sections, pe.entry as u64, None, bytes.len()));
    }
    for export in pe.exports.iter().filter(|exp| exp.rva != 0) {
        regions.extend(entry_region(&sections, export.rva as u64, None, bytes.len()));
    }

    Ok(ParsedContainer { regions, architecture: pe_architecture(&pe) })
}
