//! Persists confirmed trace divergences. This is the product of the
//! system, not a fuzzer error: every DIVERGENCE gets its own directory
//! under `out/bugs/<iteration>/` holding the SI, both traces, and the
//! symbol table that produced them.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::inputs::SimulationInput;
use crate::symbols::SymbolTable;

pub struct BugRecorder {
    root: PathBuf,
}

impl BugRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn record(
        &self,
        iteration: u64,
        si: &SimulationInput,
        data: &[u64],
        isa_trace: &Path,
        rtl_trace: &Path,
        symbols: &SymbolTable,
    ) -> anyhow::Result<PathBuf> {
        let dir = self.root.join(iteration.to_string());
        std::fs::create_dir_all(&dir).context("creating bug directory")?;

        let si_path = dir.join("si.bin");
        let file = std::fs::File::create(&si_path).context("creating si.bin")?;
        si.save(std::io::BufWriter::new(file), data).context("writing si.bin")?;

        std::fs::copy(isa_trace, dir.join("isa_trace.csv")).context("copying ISA trace")?;
        std::fs::copy(rtl_trace, dir.join("rtl_trace.log")).context("copying RTL trace")?;

        let mut dump = String::new();
        for (name, addr) in symbols.iter() {
            dump.push_str(&format!("{addr:016x} {name}\n"));
        }
        std::fs::write(dir.join("symbols.txt"), dump).context("writing symbols.txt")?;

        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use riscv_fuzz_isa::Template;

    use super::*;

    fn sample_si() -> SimulationInput {
        SimulationInput {
            template: Template::PM,
            data_seed: 0,
            prefix: vec![],
            words: vec![],
            suffix: vec![],
            ints: vec![],
            name_suffix: String::new(),
        }
    }

    #[test]
    fn record_writes_all_four_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let isa_trace = dir.path().join("isa.csv");
        let rtl_trace = dir.path().join("rtl.log");
        std::fs::write(&isa_trace, "pc,inst,rd,rd_val\n").unwrap();
        std::fs::write(&rtl_trace, "pc,inst,rd,rd_val\n").unwrap();

        let recorder = BugRecorder::new(dir.path().join("bugs"));
        let bug_dir = recorder.record(42, &sample_si(), &[1, 2, 3], &isa_trace, &rtl_trace, &SymbolTable::default()).unwrap();

        assert!(bug_dir.join("si.bin").exists());
        assert!(bug_dir.join("isa_trace.csv").exists());
        assert!(bug_dir.join("rtl_trace.log").exists());
        assert!(bug_dir.join("symbols.txt").exists());
        assert_eq!(bug_dir, dir.path().join("bugs").join("42"));
    }
}
