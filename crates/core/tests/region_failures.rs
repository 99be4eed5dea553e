mod common;

use binlex_core::services::extraction::{EngineState, Extractor};
use binlex_core::services::oracle::{DecodeError, DecodeOracle, Instruction, OracleProvider};
use binlex_core::{Architecture, CodeRegion, ExtractionConfig, Mode, RawSource};

fn extractor<'a>(
    source: &'a RawSource,
    config: ExtractionConfig,
    regions: Vec<CodeRegion>,
) -> Extractor<'a> {
    Extractor::new(source, config, Architecture::X86_64, regions, common::toy()).expect("extractor")
}

#[test]
fn one_malformed_region_is_skipped_and_counted() {
    // Four 2-byte regions; the third starts with an invalid opcode.
    let source = RawSource::from_bytes([0x90, 0xC3, 0x90, 0xC3, 0xFF, 0xFF, 0x90, 0xC3]);
    let regions = (0..4).map(|i| CodeRegion::code(i * 2, 2)).collect();
    let engine = extractor(&source, ExtractionConfig::new(), regions);

    let extraction = engine.get_traits();
    assert_eq!(extraction.records.len(), 3);
    assert_eq!(extraction.skipped_count(), 1);
    assert_eq!(extraction.skipped[0].offset, 4);
    assert!(extraction.skipped[0].reason.contains("0xFF"));
    assert!(!extraction.addresses().contains(&4));
    assert_eq!(engine.state(), EngineState::Done);
}

#[test]
fn decode_failure_mid_region_resyncs_and_is_counted() {
    // nop; ret; <bad>; nop; ret
    let source = RawSource::from_bytes([0x90, 0xC3, 0xFF, 0x90, 0xC3]);
    let engine = extractor(&source, ExtractionConfig::new(), vec![CodeRegion::code(0, 5)]);

    let extraction = engine.get_traits();
    assert_eq!(extraction.addresses().into_iter().collect::<Vec<_>>(), vec![0, 3]);
    assert_eq!(extraction.skipped_count(), 1);
    assert_eq!(extraction.skipped[0].offset, 2);
    assert_eq!(engine.state(), EngineState::Done);
}

#[test]
fn consecutive_bad_bytes_are_one_skipped_region() {
    let source = RawSource::from_bytes([0x90, 0xFF, 0xFF, 0xFF, 0xC3]);
    let extraction =
        extractor(&source, ExtractionConfig::new(), vec![CodeRegion::code(0, 5)]).get_traits();

    let mut records = extraction.records;
    records.sort_by_key(|r| r.address);
    assert_eq!(records.len(), 2);
    // The block cut short by the bad bytes has no successors.
    assert_eq!(records[0].bytes, vec![0x90]);
    assert_eq!(records[0].edges.as_deref(), Some(&[][..]));
    assert_eq!(records[1].address, 4);
    assert_eq!(extraction.skipped.len(), 1);
    assert_eq!(extraction.skipped[0].offset, 1);
}

#[test]
fn trailing_bad_bytes_are_reported() {
    let source = RawSource::from_bytes([0x90, 0xC3, 0xFF, 0xFF]);
    let extraction =
        extractor(&source, ExtractionConfig::new(), vec![CodeRegion::code(0, 4)]).get_traits();
    assert_eq!(extraction.records.len(), 1);
    assert_eq!(extraction.skipped_count(), 1);
    assert_eq!(extraction.skipped[0].offset, 2);
}

#[test]
fn back_edge_into_a_block_splits_it() {
    // 0: nop   1: nop   2: je 1   4: ret
    let source = RawSource::from_bytes([0x90, 0x90, 0x74, 0xFD, 0xC3]);
    let config = ExtractionConfig::new().with_mode(Mode::Function);
    let regions = vec![CodeRegion::code(0, 5), CodeRegion::function(0, 0)];
    let records = extractor(&source, config, regions).get_traits().records;

    assert_eq!(records.len(), 1);
    let function = &records[0];
    // Blocks {0}, {1, 2}, {4}; edges 0->1, 2->1, 2->4.
    assert_eq!(function.blocks, Some(3));
    assert_eq!(function.cyclomatic_complexity, Some(2));
    assert_eq!(function.mnemonics, vec!["nop", "nop", "je", "ret"]);
    assert_eq!(function.bytes.len(), 5);
}

#[test]
fn bad_branch_target_in_function_is_reported() {
    // 0: je 4   2: ret   3: <pad>   4: <bad>
    let source = RawSource::from_bytes([0x74, 0x02, 0xC3, 0x90, 0xFF]);
    let config = ExtractionConfig::new().with_mode(Mode::Function);
    let extraction =
        extractor(&source, config, vec![CodeRegion::code(0, 5), CodeRegion::function(0, 0)])
            .get_traits();

    assert_eq!(extraction.records.len(), 1);
    assert_eq!(extraction.records[0].blocks, Some(2));
    assert_eq!(extraction.skipped_count(), 1);
    assert_eq!(extraction.skipped[0].offset, 4);
}

#[test]
fn function_entries_split_blocks_and_bound_functions() {
    // f0: nop; call f1; ret      f1: nop; je +1; ret; ret
    let bytes = [0x90, 0xE8, 0x01, 0xC3, 0x90, 0x74, 0x01, 0xC3, 0xC3];
    let source = RawSource::from_bytes(bytes);
    let regions = vec![
        CodeRegion::code(0, bytes.len() as u64),
        CodeRegion::function(0, 0),
        CodeRegion::function(4, 0),
    ];

    let blocks = extractor(&source, ExtractionConfig::new(), regions.clone()).get_traits();
    let mut block_addrs: Vec<u64> = blocks.records.iter().map(|r| r.address).collect();
    block_addrs.sort_unstable();
    assert_eq!(block_addrs, vec![0, 3, 4, 7, 8]);

    let config = ExtractionConfig::new().with_mode(Mode::Function);
    let functions = extractor(&source, config, regions).get_traits();
    let mut records = functions.records;
    records.sort_by_key(|r| r.address);
    assert_eq!(records.len(), 2);

    // The call target is its own function, not part of f0.
    assert_eq!(records[0].mnemonics, vec!["nop", "call", "ret"]);
    assert_eq!(records[0].span.map(|s| s.end), Some(4));
    assert_eq!(records[1].blocks, Some(3));
    assert_eq!(records[1].bytes, bytes[4..].to_vec());
    assert_eq!(records[1].cyclomatic_complexity, Some(1));
    assert!(records.len() <= block_addrs.len());
}

#[test]
fn leader_cut_blocks_fall_through_to_next_entry() {
    let source = RawSource::from_bytes([0x90, 0x90, 0xC3]);
    let regions =
        vec![CodeRegion::code(0, 3), CodeRegion::function(0, 0), CodeRegion::function(2, 0)];
    let mut records = extractor(&source, ExtractionConfig::new(), regions).get_traits().records;
    records.sort_by_key(|r| r.address);
    assert_eq!(records[0].edges.as_deref(), Some(&[2][..]));
    assert_eq!(records[1].edges.as_deref(), Some(&[][..]));
}

#[test]
fn trait_set_is_independent_of_thread_count() {
    // 64 regions of "nop; je +0; ret", every eighth one malformed.
    let mut bytes = Vec::new();
    for i in 0..64 {
        if i % 8 == 7 {
            bytes.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00]);
        } else {
            bytes.extend_from_slice(&[0x90, 0x74, 0x00, 0xC3]);
        }
    }
    let source = RawSource::from_bytes(bytes);
    let regions: Vec<CodeRegion> = (0..64).map(|i| CodeRegion::code(i * 4, 4)).collect();

    let baseline = extractor(&source, ExtractionConfig::new(), regions.clone()).get_traits();
    assert_eq!(baseline.skipped_count(), 8);
    assert_eq!(baseline.records.len(), 56 * 2);

    for threads in [2, 4, 8] {
        let config = ExtractionConfig::new().with_threads(threads).unwrap();
        let run = extractor(&source, config, regions.clone()).get_traits();
        assert_eq!(run.addresses(), baseline.addresses(), "threads={threads}");
        assert_eq!(run.skipped_count(), 8);
    }
}

#[test]
fn entries_outside_code_areas_are_ignored() {
    let source = RawSource::from_bytes([0x90, 0xC3, 0x90, 0xC3]);
    let regions = vec![CodeRegion::code(0, 2), CodeRegion::function(2, 0)];
    let config = ExtractionConfig::new().with_mode(Mode::Function);
    let engine = extractor(&source, config, regions);
    assert_eq!(engine.work_units(), 0);
    assert!(engine.get_traits().records.is_empty());
}

/// Decodes like the toy ISA but reports every instruction 0x1000 bytes away.
struct MisplacedOracle;

impl DecodeOracle for MisplacedOracle {
    fn decode(&mut self, code: &[u8], address: u64) -> Result<Instruction, DecodeError> {
        let mut insn = common::ToyOracle.decode(code, address)?;
        insn.address += 0x1000;
        Ok(insn)
    }
}

struct MisplacedProvider;

impl OracleProvider for MisplacedProvider {
    fn oracle(&self) -> Result<Box<dyn DecodeOracle>, DecodeError> {
        Ok(Box::new(MisplacedOracle))
    }

    fn name(&self) -> &'static str {
        "misplaced"
    }
}

#[test]
fn instructions_reported_at_the_wrong_address_are_rejected() {
    let source = RawSource::from_bytes([0x90, 0x90, 0xC3]);
    let engine = Extractor::new(
        &source,
        ExtractionConfig::new(),
        Architecture::X86_64,
        vec![CodeRegion::code(0, 3)],
        Box::new(MisplacedProvider),
    )
    .expect("extractor");

    let extraction = engine.get_traits();
    assert!(extraction.records.is_empty());
    assert_eq!(extraction.skipped_count(), 1);
    assert!(extraction.skipped[0].reason.contains("reported address"));
}
