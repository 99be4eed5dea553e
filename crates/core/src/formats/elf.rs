use goblin::elf::{self, program_header, section_header, Elf};

use crate::config::Architecture;
use crate::error::FormatError;
use crate::formats::{entry_region, malformed, MappedSection, ParsedContainer};

fn elf_architecture(elf: &Elf) -> Option<Architecture> {
    match elf.header.e_machine {
        elf::header::EM_X86_64 => Some(Architecture::X86_64),
        elf::header::EM_386 => Some(Architecture::X86),
        elf::header::EM_AARCH64 => Some(Architecture::Arm64),
        elf::header::EM_ARM => Some(Architecture::Arm),
        _ => None,
    }
}

/// Executable sections keyed by section index, or executable `PT_LOAD`
/// segments (without an index) when the section table is missing.
fn executable_sections(elf: &Elf) -> Vec<(Option<usize>, MappedSection)> {
    let sections: Vec<_> = elf
        .section_headers
        .iter()
        .enumerate()
        .filter(|(_, sh)| sh.is_executable() && sh.sh_type != section_header::SHT_NOBITS)
        .map(|(idx, sh)| {
            let mapped =
                MappedSection { addr: sh.sh_addr, size: sh.sh_size, offset: sh.sh_offset };
            (Some(idx), mapped)
        })
        .collect();
    if !sections.is_empty() {
        return sections;
    }

    elf.program_headers
        .iter()
        .filter(|ph| ph.p_type == program_header::PT_LOAD && ph.is_executable())
        .map(|ph| {
            (None, MappedSection { addr: ph.p_vaddr, size: ph.p_filesz, offset: ph.p_offset })
        })
        .collect()
}

pub fn parse(bytes: &[u8]) -> Result<ParsedContainer, FormatError> {
    let elf = Elf::parse(bytes).map_err(|e| malformed("ELF", e))?;
    let indexed = executable_sections(&elf);
    let sections: Vec<MappedSection> = indexed.iter().map(|(_, sec)| *sec).collect();

    let mut regions: Vec<_> = sections.iter().filter_map(|s| s.region(bytes.len())).collect();

    if elf.entry != 0 {
        regions.extend(entry_region(&sections, elf.entry, None, bytes.len()));
    }
    for sym in elf.syms.iter().chain(elf.dynsyms.iter()) {
        if !sym.is_function() || sym.st_shndx == section_header::SHN_UNDEF as usize {
            continue;
        }
        let size = if sym.st_size > 0 { Some(sym.st_size) } else { None };
        // Relocatable objects give section-relative values, so resolve through
        // the symbol's own section when it is one of ours.
        let own_section = indexed
            .iter()
            .find(|(idx, _)| *idx == Some(sym.st_shndx))
            .map(|(_, sec)| std::slice::from_ref(sec));
        regions.extend(entry_region(
            own_section.unwrap_or(&sections[..]),
            sym.st_value,
            size,
            bytes.len(),
        ));
    }

    Ok(ParsedContainer { regions, architecture: elf_architecture(&elf) })
}
