//! Symbol table extraction and the required-symbol check §3 places on it.

use std::collections::HashMap;
use std::process::Command;

use anyhow::Context;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("a required symbol is missing: {0}")]
    MissingSymbol(&'static str),
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    addresses: HashMap<String, u64>,
}

impl SymbolTable {
    /// Runs the external symbol dumper (`nm`) over the linked ELF and keeps
    /// only the address/name columns, mirroring the original preprocessor's
    /// two-column extraction (the symbol type column is discarded).
    pub fn from_elf(elf: &std::path::Path) -> anyhow::Result<Self> {
        let output = Command::new("nm").arg(elf).output().context("running nm on linked ELF")?;
        anyhow::ensure!(output.status.success(), "nm exited with {:?}", output.status.code());
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(Self::parse(&text))
    }

    fn parse(nm_output: &str) -> Self {
        let mut addresses = HashMap::new();
        for line in nm_output.lines() {
            let mut columns = line.split_whitespace();
            let Some(addr) = columns.next() else { continue };
            let Some(_symbol_type) = columns.next() else { continue };
            let Some(name) = columns.next() else { continue };
            if let Ok(addr) = u64::from_str_radix(addr, 16) {
                addresses.insert(name.to_owned(), addr);
            }
        }
        Self { addresses }
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.addresses.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.addresses.iter().map(|(name, &addr)| (name.as_str(), addr))
    }

    /// Checks every symbol §3 requires is present: the three segment
    /// markers, `_start`/`_end_main`, the signature bounds, and a
    /// `_random_data{n}`/`_end_data{n}` pair per data section.
    pub fn require_all(&self, n_data_sections: usize) -> Result<(), SymbolError> {
        const REQUIRED: &[&str] = &[
            "_fuzz_prefix",
            "_fuzz_main",
            "_fuzz_suffix",
            "_start",
            "_end_main",
            "begin_signature",
            "end_signature",
        ];
        for name in REQUIRED {
            if !self.addresses.contains_key(*name) {
                return Err(SymbolError::MissingSymbol(name));
            }
        }
        for n in 0..n_data_sections {
            let data_name = format!("_random_data{n}");
            let end_name = format!("_end_data{n}");
            if !self.addresses.contains_key(&data_name) {
                return Err(SymbolError::MissingSymbol(leak(data_name)));
            }
            if !self.addresses.contains_key(&end_name) {
                return Err(SymbolError::MissingSymbol(leak(end_name)));
            }
        }
        Ok(())
    }
}

/// `require_all` reports errors via a `&'static str`; the per-section names
/// are only known at runtime, so they're leaked rather than threaded
/// through a lifetime this error type doesn't carry. Only reachable on the
/// COMPILE_BROKEN path, which aborts the iteration anyway.
fn leak(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_address_and_name_columns() {
        let nm_output = "0000000080000000 T _start\n0000000080001000 D begin_signature\n";
        let table = SymbolTable::parse(nm_output);
        assert_eq!(table.get("_start"), Some(0x80000000));
        assert_eq!(table.get("begin_signature"), Some(0x80001000));
    }

    #[test]
    fn require_all_reports_missing_required_symbol() {
        let table = SymbolTable::parse("0000000080000000 T _start\n");
        assert!(table.require_all(0).is_err());
    }

    #[test]
    fn require_all_checks_every_data_section_pair() {
        let mut nm = String::new();
        for name in ["_fuzz_prefix", "_fuzz_main", "_fuzz_suffix", "_start", "_end_main", "begin_signature", "end_signature"] {
            nm.push_str(&format!("0000000080000000 T {name}\n"));
        }
        nm.push_str("0000000080002000 D _random_data0\n");
        let table = SymbolTable::parse(&nm);
        assert!(table.require_all(1).is_err(), "_end_data0 is missing");
        nm.push_str("0000000080002008 D _end_data0\n");
        let table = SymbolTable::parse(&nm);
        assert!(table.require_all(1).is_ok());
    }
}
