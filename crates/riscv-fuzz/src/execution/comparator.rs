//! Trace Comparator: aligns the RTL commit stream with the ISA commit
//! stream emitted by [`super::isa_runner`] and reports the first
//! architecturally observable divergence.

use tracing::warn;

/// One commit record, in the canonical `pc,inst,rd,rd_val` form both
/// runners normalize their logs into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub pc: u64,
    pub inst: u32,
    pub rd: u8,
    pub rd_val: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Divergence {
    pub index: usize,
    pub isa: Option<TraceRecord>,
    pub rtl: Option<TraceRecord>,
}

/// Returns `-1` on mismatch, `0` on match. `toplevel` names the RTL design
/// under test and is carried only for the divergence log line.
pub fn compare(isa_csv: &str, rtl_log: &str, toplevel: &str) -> i32 {
    let isa = parse_trace(isa_csv);
    let rtl = parse_trace(rtl_log);
    match first_divergence(&isa, &rtl) {
        Some(divergence) => {
            warn!(
                toplevel,
                index = divergence.index,
                isa = ?divergence.isa,
                rtl = ?divergence.rtl,
                "trace divergence detected"
            );
            -1
        }
        None => 0,
    }
}

/// Walks both traces in lockstep. Two records match iff `pc` is equal and,
/// when either side wrote a register other than `x0`, both sides wrote the
/// same register with the same value; writes to `x0` are ignored on both
/// sides. Either trace running out before the other is itself a mismatch,
/// reported at the index the shorter trace ended.
pub fn first_divergence(isa: &[TraceRecord], rtl: &[TraceRecord]) -> Option<Divergence> {
    let len = isa.len().max(rtl.len());
    for index in 0..len {
        let a = isa.get(index).copied();
        let b = rtl.get(index).copied();
        match (a, b) {
            (Some(a), Some(b)) if records_match(a, b) => continue,
            _ => return Some(Divergence { index, isa: a, rtl: b }),
        }
    }
    None
}

fn records_match(a: TraceRecord, b: TraceRecord) -> bool {
    if a.pc != b.pc {
        return false;
    }
    match (a.rd, b.rd) {
        (0, 0) => true,
        (0, _) | (_, 0) => false,
        (ar, br) => ar == br && a.rd_val == b.rd_val,
    }
}

/// Parses the canonical `pc,inst,rd,rd_val` CSV, skipping the header row
/// and any line that doesn't parse cleanly (a truncated trailing line from
/// a killed process, say).
fn parse_trace(csv: &str) -> Vec<TraceRecord> {
    csv.lines()
        .filter(|line| !line.starts_with("pc,"))
        .filter_map(parse_record)
        .collect()
}

fn parse_record(line: &str) -> Option<TraceRecord> {
    let mut columns = line.split(',');
    let pc = parse_hex_u64(columns.next()?)?;
    let inst = parse_hex_u32(columns.next()?.trim_matches(|c| c == '(' || c == ')'))?;
    let rd = columns.next()?.strip_prefix('x')?.parse().ok()?;
    let rd_val = parse_hex_u64(columns.next()?)?;
    Some(TraceRecord { pc, inst, rd, rd_val })
}

fn parse_hex_u64(field: &str) -> Option<u64> {
    u64::from_str_radix(field.trim().strip_prefix("0x")?, 16).ok()
}

fn parse_hex_u32(field: &str) -> Option<u32> {
    u32::from_str_radix(field.trim().strip_prefix("0x")?, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "pc,inst,rd,rd_val\n";

    #[test]
    fn identical_traces_match() {
        let csv = format!("{HEADER}0x0000000080000000,(0x00108093),x1,0x0000000000000001\n");
        assert_eq!(compare(&csv, &csv, "rv64_core"), 0);
    }

    #[test]
    fn x0_writes_are_ignored_on_both_sides() {
        let isa = format!("{HEADER}0x0000000080000000,(0x00000013),x0,0x0000000000000000\n");
        let rtl = format!("{HEADER}0x0000000080000000,(0x00000013),x0,0x00000000deadbeef\n");
        assert_eq!(compare(&isa, &rtl, "rv64_core"), 0);
    }

    #[test]
    fn divergent_rd_val_is_a_mismatch() {
        let isa = format!("{HEADER}0x0000000080000004,(0x00108093),x1,0x0000000000000001\n");
        let rtl = format!("{HEADER}0x0000000080000004,(0x00108093),x1,0x0000000000000002\n");
        let divergence = first_divergence(&parse_trace(&isa), &parse_trace(&rtl)).unwrap();
        assert_eq!(divergence.index, 0);
        assert_eq!(compare(&isa, &rtl, "rv64_core"), -1);
    }

    #[test]
    fn rtl_side_write_the_isa_did_not_make_is_a_mismatch() {
        let isa = format!("{HEADER}0x0000000080000004,(0x00000013),x0,0x0000000000000000\n");
        let rtl = format!("{HEADER}0x0000000080000004,(0x00000013),x5,0x0000000000000003\n");
        assert_eq!(compare(&isa, &rtl, "rv64_core"), -1);
    }

    #[test]
    fn early_termination_of_either_side_is_a_mismatch() {
        let isa = format!(
            "{HEADER}0x0000000080000000,(0x00108093),x1,0x1\n0x0000000080000004,(0x00000013),x0,0x0\n"
        );
        let rtl = format!("{HEADER}0x0000000080000000,(0x00108093),x1,0x1\n");
        let divergence = first_divergence(&parse_trace(&isa), &parse_trace(&rtl)).unwrap();
        assert_eq!(divergence.index, 1);
        assert!(divergence.isa.is_some());
        assert!(divergence.rtl.is_none());
    }
}
