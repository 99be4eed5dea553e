//! Trait extraction engine shared by every container format.
//!
//! Regions reported by a format parser are normalized into independent work
//! units. A fixed-size rayon pool walks the units, each worker holding its own
//! decode oracle, and sends finished records over a channel; the calling
//! thread drains the channel once the pool is done.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_channel::unbounded;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::config::{Architecture, ExtractionConfig, Mode};
use crate::error::{DisassemblyError, EngineError, FileError, SinkError};
use crate::model::{CodeRegion, Extraction, SkippedRegion, Span, TraitRecord};
use crate::services::oracle::{ControlFlow, DecodeOracle, Instruction, OracleProvider};
use crate::source::ByteSource;
use crate::writer::{TraitWriter, WriteSummary};

/// Lifecycle of an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    Extracting = 1,
    PartiallyFailed = 2,
    Aggregating = 3,
    Done = 4,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Extracting,
            2 => EngineState::PartiallyFailed,
            3 => EngineState::Aggregating,
            4 => EngineState::Done,
            _ => EngineState::Idle,
        }
    }
}

/// Linear-sweep unit for block mode: `[start, end)` inside one code area.
/// `leader_cut` is set when `end` is the next function entry rather than the
/// end of the area, so the last block falls through to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    start: u64,
    end: u64,
    leader_cut: bool,
}

/// Traversal unit for function mode: blocks reachable from `entry` without
/// leaving `[entry, bound)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FunctionUnit {
    entry: u64,
    bound: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkUnit {
    Segment(Segment),
    Function(FunctionUnit),
}

impl WorkUnit {
    fn offset(&self) -> u64 {
        match self {
            WorkUnit::Segment(seg) => seg.start,
            WorkUnit::Function(func) => func.entry,
        }
    }
}

/// Everything one work unit produced. A unit can yield traits and skipped
/// regions at the same time.
#[derive(Default)]
struct UnitOutcome {
    records: Vec<TraitRecord>,
    skipped: Vec<SkippedRegion>,
}

impl UnitOutcome {
    fn skipped(offset: u64, err: &DisassemblyError) -> Self {
        Self { records: Vec::new(), skipped: vec![SkippedRegion::new(offset, err)] }
    }
}

/// Basic block discovered while tracing a function.
struct TracedBlock {
    end: u64,
    insns: Vec<Instruction>,
    successors: Vec<u64>,
}

/// Split the traced block containing `addr` so that `addr` starts its own
/// block. Returns false when no block holds an instruction starting there.
fn split_block(blocks: &mut BTreeMap<u64, TracedBlock>, addr: u64) -> bool {
    let Some((_, block)) = blocks.range_mut(..addr).next_back() else {
        return false;
    };
    if addr >= block.end {
        return false;
    }
    let Some(idx) = block.insns.iter().position(|i| i.address == addr) else {
        return false;
    };
    let tail = TracedBlock {
        end: block.end,
        insns: block.insns.split_off(idx),
        successors: std::mem::replace(&mut block.successors, vec![addr]),
    };
    block.end = addr;
    blocks.insert(addr, tail);
    true
}

/// Resync step after an undecodable byte.
fn instruction_alignment(arch: Architecture) -> u64 {
    match arch {
        Architecture::X86 | Architecture::X86_64 => 1,
        Architecture::Arm | Architecture::Arm64 => 4,
    }
}

/// Successors of a block-ending instruction whose next address is `next`.
fn successors(flow: ControlFlow, next: u64) -> Vec<u64> {
    let mut out = Vec::new();
    match flow {
        ControlFlow::Sequential | ControlFlow::Return => {}
        ControlFlow::Call { .. } => out.push(next),
        ControlFlow::Jump { target, conditional } => {
            out.extend(target);
            if conditional && target != Some(next) {
                out.push(next);
            }
        }
    }
    out
}

/// Clip regions to the source, merge overlapping code areas, and cut them
/// into work units for `mode`.
fn plan_units(regions: &[CodeRegion], source_len: u64, mode: Mode) -> Vec<WorkUnit> {
    let mut areas: Vec<(u64, u64)> = regions
        .iter()
        .filter(|r| !r.is_function_entry)
        .map(|r| (r.start.min(source_len), r.end().min(source_len)))
        .filter(|(start, end)| end > start)
        .collect();
    areas.sort_unstable();

    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(areas.len());
    for (start, end) in areas {
        match merged.last_mut() {
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let area_of = |addr: u64| merged.iter().copied().find(|(s, e)| addr >= *s && addr < *e);

    // Function entries inside a code area; duplicate starts keep the larger size.
    let mut entries: BTreeMap<u64, u64> = BTreeMap::new();
    for region in regions.iter().filter(|r| r.is_function_entry) {
        if area_of(region.start).is_some() {
            let length = entries.entry(region.start).or_insert(0);
            *length = (*length).max(region.length);
        }
    }

    match mode {
        Mode::Block => merged
            .iter()
            .flat_map(|&(start, end)| {
                let mut cuts: Vec<u64> = entries.range(start + 1..end).map(|(k, _)| *k).collect();
                cuts.push(end);
                let mut seg_start = start;
                cuts.into_iter()
                    .map(|cut| {
                        let seg = Segment { start: seg_start, end: cut, leader_cut: cut != end };
                        seg_start = cut;
                        WorkUnit::Segment(seg)
                    })
                    .collect::<Vec<_>>()
            })
            .collect(),
        Mode::Function => entries
            .iter()
            .filter_map(|(&entry, &length)| {
                let (_, area_end) = area_of(entry)?;
                let mut bound = area_end;
                if length > 0 {
                    bound = bound.min(entry.saturating_add(length));
                }
                if let Some((&next, _)) = entries.range(entry + 1..bound).next() {
                    bound = next;
                }
                Some(WorkUnit::Function(FunctionUnit { entry, bound }))
            })
            .collect(),
    }
}

/// Shared disassembly and trait extraction core. Every format variant wraps
/// one of these; it borrows the byte source and owns its configuration.
pub struct Extractor<'a> {
    source: &'a dyn ByteSource,
    config: ExtractionConfig,
    architecture: Architecture,
    regions: Vec<CodeRegion>,
    units: Vec<WorkUnit>,
    provider: Box<dyn OracleProvider>,
    pool: ThreadPool,
    state: AtomicU8,
}

impl<'a> Extractor<'a> {
    pub fn new(
        source: &'a dyn ByteSource,
        config: ExtractionConfig,
        architecture: Architecture,
        regions: Vec<CodeRegion>,
        provider: Box<dyn OracleProvider>,
    ) -> Result<Self, EngineError> {
        if !source.is_valid() {
            return Err(FileError::NotLoaded.into());
        }
        // Fail at construction rather than once per worker.
        provider.oracle().map_err(|e| EngineError::Oracle(e.to_string()))?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads())
            .thread_name(|idx| format!("binlex-worker-{idx}"))
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;

        let units = plan_units(&regions, source.size() as u64, config.mode());
        debug!(
            regions = regions.len(),
            units = units.len(),
            mode = %config.mode(),
            arch = %architecture,
            oracle = provider.name(),
            "Planned extraction"
        );

        Ok(Self {
            source,
            config,
            architecture,
            regions,
            units,
            provider,
            pool,
            state: AtomicU8::new(EngineState::Idle as u8),
        })
    }

    pub fn source(&self) -> &'a dyn ByteSource {
        self.source
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn regions(&self) -> &[CodeRegion] {
        &self.regions
    }

    pub fn work_units(&self) -> usize {
        self.units.len()
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, next: EngineState) {
        let prev = EngineState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        debug!(from = ?prev, to = ?next, "Engine state");
    }

    fn mark_partially_failed(&self) {
        let swapped = self.state.compare_exchange(
            EngineState::Extracting as u8,
            EngineState::PartiallyFailed as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if swapped.is_ok() {
            debug!(from = ?EngineState::Extracting, to = ?EngineState::PartiallyFailed, "Engine state");
        }
    }

    /// Decode every work unit and return all traits. Malformed regions are
    /// skipped and reported in `Extraction::skipped`; they never abort the
    /// run. Record order is unspecified.
    pub fn get_traits(&self) -> Extraction {
        self.transition(EngineState::Extracting);

        let (tx, rx) = unbounded::<UnitOutcome>();
        self.pool.install(|| {
            self.units.par_iter().for_each_init(
                || (tx.clone(), self.provider.oracle()),
                |state, unit| {
                    let (tx, oracle) = state;
                    let outcome = match oracle {
                        Ok(oracle) => self.process(&mut **oracle, unit),
                        Err(e) => UnitOutcome::skipped(
                            unit.offset(),
                            &DisassemblyError::Oracle(e.to_string()),
                        ),
                    };
                    if !outcome.skipped.is_empty() {
                        self.mark_partially_failed();
                    }
                    tx.send(outcome).ok();
                },
            );
        });
        drop(tx);

        self.transition(EngineState::Aggregating);
        let mut extraction = Extraction::default();
        for outcome in rx {
            extraction.records.extend(outcome.records);
            for skipped in outcome.skipped {
                warn!(offset = skipped.offset, reason = %skipped.reason, "Skipped region");
                extraction.skipped.push(skipped);
            }
        }
        self.transition(EngineState::Done);

        info!(
            traits = extraction.records.len(),
            skipped = extraction.skipped.len(),
            mode = %self.config.mode(),
            "Extraction finished"
        );
        extraction
    }

    /// Extract all traits, then serialize them through `writer`. Fails on
    /// the first sink error; records already written stay on the sink.
    pub fn write_traits<W: Write>(
        &self,
        writer: &mut TraitWriter<W>,
    ) -> Result<WriteSummary, SinkError> {
        let extraction = self.get_traits();
        let written = writer.write_all(&extraction.records)?;
        Ok(WriteSummary { written, skipped_regions: extraction.skipped.len() })
    }

    fn process(&self, oracle: &mut dyn DecodeOracle, unit: &WorkUnit) -> UnitOutcome {
        match unit {
            WorkUnit::Segment(seg) => self.sweep_segment(oracle, seg),
            WorkUnit::Function(func) => self.trace_function(oracle, func),
        }
    }

    fn decode_at(
        &self,
        oracle: &mut dyn DecodeOracle,
        pos: u64,
        limit: u64,
    ) -> Result<Instruction, DisassemblyError> {
        let code = &self.source.bytes()[pos as usize..limit as usize];
        let insn = oracle
            .decode(code, pos)
            .map_err(|e| DisassemblyError::Decode { offset: pos, reason: e.to_string() })?;
        if insn.address != pos {
            return Err(DisassemblyError::Decode {
                offset: pos,
                reason: format!("oracle reported address 0x{:X}", insn.address),
            });
        }
        if insn.length == 0 || insn.length as u64 > limit - pos {
            return Err(DisassemblyError::Decode {
                offset: pos,
                reason: format!("oracle reported instruction length {}", insn.length),
            });
        }
        Ok(insn)
    }

    fn block_record(
        &self,
        start: u64,
        end: u64,
        insns: &[Instruction],
        edges: Vec<u64>,
    ) -> TraitRecord {
        TraitRecord::block(
            &self.config,
            self.architecture,
            start,
            self.source.bytes()[start as usize..end as usize].to_vec(),
            insns.iter().map(Instruction::summary).collect(),
            edges,
        )
    }

    fn sweep_segment(&self, oracle: &mut dyn DecodeOracle, seg: &Segment) -> UnitOutcome {
        let mut outcome = UnitOutcome::default();
        let step = instruction_alignment(self.architecture);
        let mut block_start = seg.start;
        let mut insns: Vec<Instruction> = Vec::new();
        let mut pos = seg.start;
        // Start of the current run of undecodable bytes and its first error.
        let mut bad_run: Option<(u64, DisassemblyError)> = None;

        while pos < seg.end {
            let insn = match self.decode_at(oracle, pos, seg.end) {
                Ok(insn) => insn,
                Err(err) => {
                    if !insns.is_empty() {
                        let record = self.block_record(block_start, pos, &insns, Vec::new());
                        outcome.records.push(record);
                        insns.clear();
                    }
                    bad_run.get_or_insert((pos, err));
                    pos = pos.saturating_add(step);
                    block_start = pos;
                    continue;
                }
            };
            if let Some((offset, err)) = bad_run.take() {
                debug!(segment = seg.start, resync = pos, error = %err, "Resynchronized sweep");
                outcome.skipped.push(SkippedRegion::new(offset, &err));
            }
            pos += insn.length as u64;
            let flow = insn.flow;
            insns.push(insn);

            if flow.ends_block() {
                let edges = successors(flow, pos);
                outcome.records.push(self.block_record(block_start, pos, &insns, edges));
                insns.clear();
                block_start = pos;
            }
        }

        if let Some((offset, err)) = bad_run {
            outcome.skipped.push(SkippedRegion::new(offset, &err));
        }
        if !insns.is_empty() {
            let edges = if seg.leader_cut && pos == seg.end { vec![seg.end] } else { Vec::new() };
            outcome.records.push(self.block_record(block_start, pos, &insns, edges));
        }
        outcome
    }

    fn trace_function(&self, oracle: &mut dyn DecodeOracle, func: &FunctionUnit) -> UnitOutcome {
        let in_bounds = |addr: u64| addr >= func.entry && addr < func.bound;
        let mut blocks: BTreeMap<u64, TracedBlock> = BTreeMap::new();
        let mut failures: BTreeMap<u64, DisassemblyError> = BTreeMap::new();
        let mut worklist = vec![func.entry];

        while let Some(start) = worklist.pop() {
            if blocks.contains_key(&start) || !in_bounds(start) {
                continue;
            }
            if split_block(&mut blocks, start) {
                continue;
            }

            let mut insns = Vec::new();
            let mut succ = Vec::new();
            let mut pos = start;
            while pos < func.bound {
                if pos != start && blocks.contains_key(&pos) {
                    succ.push(pos);
                    break;
                }
                let insn = match self.decode_at(oracle, pos, func.bound) {
                    Ok(insn) => insn,
                    Err(err) if pos == func.entry => {
                        return UnitOutcome::skipped(func.entry, &err);
                    }
                    Err(err) => {
                        debug!(function = func.entry, error = %err, "Block truncated");
                        failures.entry(pos).or_insert(err);
                        break;
                    }
                };
                pos += insn.length as u64;
                let flow = insn.flow;
                insns.push(insn);
                if flow.ends_block() {
                    succ = successors(flow, pos).into_iter().filter(|a| in_bounds(*a)).collect();
                    break;
                }
            }

            if insns.is_empty() {
                continue;
            }
            worklist.extend(succ.iter().rev().copied());
            blocks.insert(start, TracedBlock { end: pos, insns, successors: succ });
        }

        let skipped: Vec<SkippedRegion> =
            failures.iter().map(|(&offset, err)| SkippedRegion::new(offset, err)).collect();
        if blocks.is_empty() {
            return UnitOutcome { records: Vec::new(), skipped };
        }

        let edges = blocks
            .values()
            .flat_map(|b| b.successors.iter())
            .filter(|target| blocks.contains_key(*target))
            .count();
        let end = blocks.values().map(|b| b.end).max().unwrap_or(func.entry);

        let mut ranges: Vec<(u64, u64)> = Vec::with_capacity(blocks.len());
        for (&start, block) in &blocks {
            match ranges.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(block.end),
                _ => ranges.push((start, block.end)),
            }
        }
        let source = self.source.bytes();
        let bytes: Vec<u8> = ranges
            .iter()
            .flat_map(|&(s, e)| source[s as usize..e as usize].iter().copied())
            .collect();

        let mut seen = BTreeSet::new();
        let mnemonics: BTreeMap<u64, String> = blocks
            .values()
            .flat_map(|b| b.insns.iter())
            .filter(|i| seen.insert(i.address))
            .map(|i| (i.address, i.summary()))
            .collect();

        let record = TraitRecord::function(
            &self.config,
            self.architecture,
            Span { start: func.entry, end },
            bytes,
            mnemonics.into_values().collect(),
            blocks.len(),
            edges,
        );
        UnitOutcome { records: vec![record], skipped }
    }
}
