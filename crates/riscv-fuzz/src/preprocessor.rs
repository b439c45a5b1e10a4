//! Turns a populated [`SimulationInput`] into the two Runner inputs: a
//! compiled ELF for the ISA Runner and a memory-image hex file plus symbol
//! table for the RTL Runner.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use libafl_bolts::rands::Rand;
use riscv_fuzz_isa::Template;
use thiserror::Error;

use crate::inputs::SimulationInput;
use crate::symbols::SymbolTable;

/// 1-in-8 probability of prepending an illegal `fnmadd.s` encoding ahead of
/// a real one when emitting the suffix, per the original negative-case
/// injection. Not exposed as configuration (the source doesn't either).
const ILLEGAL_FNMADD_DENOMINATOR: u64 = 8;
const ILLEGAL_FNMADD_WORD: u32 = 0xa106_e5cf;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("simulation input failed a structural invariant: {0}")]
    InvalidInput(String),
    #[error("compiling the generated program failed: {0}")]
    CompileBroken(String),
}

#[derive(Debug, Clone)]
pub struct IsaInput {
    pub elf_path: PathBuf,
    pub isa_interrupt_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RtlInput {
    pub hex_path: PathBuf,
    pub rtl_interrupt_file: Option<PathBuf>,
    pub data: Vec<u64>,
    pub max_cycles: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct PreprocessorOptions {
    pub template_dir: &'static Path,
    pub num_data_sections: usize,
}

/// Compiles one iteration's working directory: assembly source, linked ELF,
/// hex image, symbol table, and (if needed) the RTL/ISA interrupt files.
pub struct Preprocessor {
    options: PreprocessorOptions,
}

impl Preprocessor {
    pub fn new(options: PreprocessorOptions) -> Self {
        Self { options }
    }

    pub fn process<R: Rand>(
        &self,
        rand: &mut R,
        si: &SimulationInput,
        data: &[u64],
        has_interrupt: bool,
        work_dir: &Path,
        run_elf: Option<&Path>,
    ) -> Result<(IsaInput, RtlInput, SymbolTable), PreprocessError> {
        let section_size = self.section_size(data.len())?;

        let assembly = self.build_assembly(rand, si, data, section_size)?;
        let asm_path = work_dir.join("test.S");
        std::fs::write(&asm_path, assembly).map_err(|e| {
            PreprocessError::CompileBroken(format!("writing assembly source: {e}"))
        })?;

        let expanded_ints = expand_ints(si);

        let elf_path = work_dir.join("test.elf");
        if let Some(run_elf) = run_elf {
            std::fs::copy(run_elf, &elf_path)
                .map_err(|e| PreprocessError::CompileBroken(format!("copying run_elf: {e}")))?;
        } else {
            self.compile(&asm_path, &elf_path, si.template, has_interrupt, data)?;
        }

        let symbols = SymbolTable::from_elf(&elf_path)
            .map_err(|e| PreprocessError::CompileBroken(e.to_string()))?;
        symbols
            .require_all(self.options.num_data_sections)
            .map_err(|e| PreprocessError::CompileBroken(e.to_string()))?;

        let hex_path = work_dir.join("test.hex");
        self.elf_to_hex(&elf_path, &hex_path)?;

        let (isa_interrupt_file, rtl_interrupt_file) = if has_interrupt {
            self.write_interrupt_files(work_dir, &symbols, &expanded_ints)?
        } else {
            (None, None)
        };

        let isa_input = IsaInput { elf_path, isa_interrupt_file };
        let rtl_input = RtlInput {
            hex_path,
            rtl_interrupt_file,
            data: data.to_vec(),
            max_cycles: si.template.max_cycles(),
        };
        Ok((isa_input, rtl_input, symbols))
    }

    /// `S = |data| / num_data_sections` must be a power of two and
    /// `num_data_sections` must divide `|data|`.
    fn section_size(&self, data_len: usize) -> Result<usize, PreprocessError> {
        let sections = self.options.num_data_sections;
        if sections == 0 || data_len % sections != 0 {
            return Err(PreprocessError::InvalidInput(format!(
                "{sections} data sections do not divide data length {data_len}"
            )));
        }
        let section_size = data_len / sections;
        if !section_size.is_power_of_two() {
            return Err(PreprocessError::InvalidInput(format!(
                "section size {section_size} is not a power of two"
            )));
        }
        Ok(section_size)
    }

    /// Streams the `rv64-<tag>.S` template line by line, inserting
    /// prefix/main/suffix instructions and data sections immediately after
    /// their marker lines. `_start`, `begin_signature`, `end_signature`,
    /// `tohost`, and the `_end_main`/`_random_data{n}`/`_end_data{n}` labels
    /// all come from the template itself; this only ever appends after a
    /// line it recognizes, never synthesizes a label of its own.
    fn build_assembly<R: Rand>(
        &self,
        rand: &mut R,
        si: &SimulationInput,
        data: &[u64],
        section_size: usize,
    ) -> Result<String, PreprocessError> {
        let template_path = self.options.template_dir.join(format!("rv64-{}.S", si.template.file_tag()));
        let template = std::fs::read_to_string(&template_path).map_err(|e| {
            PreprocessError::CompileBroken(format!("reading template {}: {e}", template_path.display()))
        })?;

        let rendered_suffix = self.render_suffix(rand, si);
        let mut out = String::with_capacity(template.len());
        for line in template.lines() {
            out.push_str(line);
            out.push('\n');

            if line.contains("_fuzz_prefix:") {
                for inst in si.get_prefix() {
                    out.push_str(&inst);
                    out.push('\n');
                }
            }
            if line.contains("_fuzz_main:") {
                for inst in si.get_insts() {
                    out.push_str(&inst);
                    out.push('\n');
                }
            }
            if line.contains("_fuzz_suffix:") {
                for inst in &rendered_suffix {
                    out.push_str(inst);
                    out.push('\n');
                }
            }
            for (n, chunk) in data.chunks(section_size).enumerate() {
                if line.contains(&format!("_random_data{n}")) {
                    for value in chunk {
                        out.push_str(&format!("    .dword {value:#x}\n"));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Renders the suffix segment, injecting the illegal `fnmadd.s`
    /// encoding ahead of any real `fnmadd.s` with probability 1/8.
    fn render_suffix<R: Rand>(&self, rand: &mut R, si: &SimulationInput) -> Vec<String> {
        let mut out = Vec::new();
        for line in si.get_suffix() {
            if line.trim_start().starts_with("fnmadd.s") && rand.below_or_zero(ILLEGAL_FNMADD_DENOMINATOR as usize) == 6 {
                out.push(format!("    .word {ILLEGAL_FNMADD_WORD:#010x}"));
            }
            out.push(line);
        }
        out
    }

    fn compile(
        &self,
        asm_path: &Path,
        elf_path: &Path,
        template: Template,
        has_interrupt: bool,
        data: &[u64],
    ) -> Result<(), PreprocessError> {
        let mut args = vec![
            "-march=rv64g".to_owned(),
            "-mabi=lp64".to_owned(),
            "-static".to_owned(),
            "-mcmodel=medany".to_owned(),
            "-fvisibility=hidden".to_owned(),
            "-nostdlib".to_owned(),
            "-nostartfiles".to_owned(),
            "-I".to_owned(),
            self.options.template_dir.join("include").to_string_lossy().into_owned(),
            "-T".to_owned(),
            self.options.template_dir.join("include/link.ld").to_string_lossy().into_owned(),
        ];
        if template.is_virtual_memory() {
            let entropy = data.first().copied().unwrap_or(0) as u32;
            args.push("-std=gnu99".to_owned());
            args.push("-O2".to_owned());
            args.push(format!("-DENTROPY={entropy:#010x}"));
            args.push(self.options.template_dir.join("vm.c").to_string_lossy().into_owned());
            args.push(self.options.template_dir.join("string.c").to_string_lossy().into_owned());
        }
        if has_interrupt {
            args.push("-DINTERRUPT".to_owned());
        }
        args.push("-o".to_owned());
        args.push(elf_path.to_string_lossy().into_owned());
        args.push(asm_path.to_string_lossy().into_owned());

        // Compiler OOM (SIGKILL, signal 9) is the sole automatic retry.
        for attempt in 0..2 {
            let status = Command::new("riscv64-unknown-elf-gcc")
                .args(&args)
                .status()
                .context("spawning the cross compiler")
                .map_err(|e| PreprocessError::CompileBroken(e.to_string()))?;
            match status.code() {
                Some(0) => return Ok(()),
                None if attempt == 0 => continue, // killed by a signal, assume OOM and retry once
                Some(code) => {
                    return Err(PreprocessError::CompileBroken(format!("compiler exited {code}")));
                }
                None => {
                    return Err(PreprocessError::CompileBroken(
                        "compiler killed by signal twice".to_owned(),
                    ));
                }
            }
        }
        unreachable!("loop always returns")
    }

    fn elf_to_hex(&self, elf_path: &Path, hex_path: &Path) -> Result<(), PreprocessError> {
        let status = Command::new("elf2hex")
            .arg("--bit-width")
            .arg("64")
            .arg("--input")
            .arg(elf_path)
            .arg("--output")
            .arg(hex_path)
            .status()
            .context("spawning elf2hex")
            .map_err(|e| PreprocessError::CompileBroken(e.to_string()))?;
        if !status.success() {
            return Err(PreprocessError::CompileBroken("elf2hex failed".to_owned()));
        }
        Ok(())
    }

    /// Emits the RTL and ISA interrupt files: one `<16-hex PC>:<4-bit
    /// binary cause>` line per nonzero entry in the expanded `ints` vector.
    fn write_interrupt_files(
        &self,
        work_dir: &Path,
        symbols: &SymbolTable,
        expanded_ints: &[u8],
    ) -> Result<(Option<PathBuf>, Option<PathBuf>), PreprocessError> {
        let Some(fuzz_main) = symbols.get("_fuzz_main") else {
            return Err(PreprocessError::CompileBroken("_fuzz_main missing".to_owned()));
        };
        let lines: Vec<String> = expanded_ints
            .iter()
            .enumerate()
            .filter(|(_, &cause)| cause != 0)
            .map(|(k, &cause)| {
                let pc = fuzz_main + 4 * k as u64;
                format!("{pc:016x}:{cause:04b}\n")
            })
            .collect();
        // Boundary (e): an all-zero `ints` produces no file at all, even
        // when `intr` is set.
        if lines.is_empty() {
            return Ok((None, None));
        }
        let contents: String = lines.concat();
        let rtl_path = work_dir.join("rtl_intr.txt");
        let isa_path = work_dir.join("isa_intr.txt");
        std::fs::write(&rtl_path, &contents)
            .map_err(|e| PreprocessError::CompileBroken(format!("writing rtl interrupt file: {e}")))?;
        std::fs::write(&isa_path, &contents)
            .map_err(|e| PreprocessError::CompileBroken(format!("writing isa interrupt file: {e}")))?;
        Ok((Some(isa_path), Some(rtl_path)))
    }
}

/// Aligns `ints[k]` with the k-th emitted MAIN instruction: a `la`
/// (emitting two real instructions) gets a zero inserted right after its
/// entry, per the "LA Expansion" scenario.
pub fn expand_ints(si: &SimulationInput) -> Vec<u8> {
    let mut expanded = Vec::with_capacity(si.ints.len());
    let mut cursor = si.ints.iter().copied();
    for word in &si.words {
        let families = riscv_fuzz_isa::families(riscv_fuzz_isa::Segment::Main);
        let family = families.iter().find(|f| f.id == word.family_id).expect("known family id");
        for template in family.templates {
            let Some(value) = cursor.next() else { break };
            expanded.push(value);
            if template.is_la_macro {
                expanded.push(0);
            }
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::Word;

    fn si_with_la_expansion() -> SimulationInput {
        let families = riscv_fuzz_isa::families(riscv_fuzz_isa::Segment::Main);
        let la_family = families.iter().find(|f| f.templates.iter().any(|t| t.is_la_macro));
        let plain_family = &families[0];
        let mut words = Vec::new();
        let mut ints = Vec::new();
        if let Some(la_family) = la_family {
            words.push(Word {
                family_id: la_family.id,
                segment: riscv_fuzz_isa::Segment::Main,
                operands: la_family.templates.iter().map(|t| vec![crate::word::Operand::Immediate(0); t.operands.len()]).collect(),
            });
            ints.push(1);
        }
        words.push(Word {
            family_id: plain_family.id,
            segment: riscv_fuzz_isa::Segment::Main,
            operands: plain_family
                .templates
                .iter()
                .map(|t| vec![crate::word::Operand::Immediate(0); t.operands.len()])
                .collect(),
        });
        ints.push(2);
        SimulationInput {
            template: Template::PM,
            data_seed: 0,
            prefix: vec![],
            words,
            suffix: vec![],
            ints,
            name_suffix: String::new(),
        }
    }

    #[test]
    fn la_expansion_inserts_a_zero_after_the_la_entry() {
        let si = si_with_la_expansion();
        let expanded = expand_ints(&si);
        assert_eq!(expanded.len(), 3);
        assert_eq!(expanded, vec![1, 0, 2]);
    }

    #[test]
    fn section_size_must_be_a_power_of_two() {
        let preprocessor = Preprocessor::new(PreprocessorOptions {
            template_dir: Path::new("/nonexistent"),
            num_data_sections: 6,
        });
        assert!(preprocessor.section_size(6 * 3).is_err(), "3 is not a power of two");
        assert!(preprocessor.section_size(6 * 4).is_ok());
    }

    #[test]
    fn section_count_must_divide_data_length() {
        let preprocessor = Preprocessor::new(PreprocessorOptions {
            template_dir: Path::new("/nonexistent"),
            num_data_sections: 6,
        });
        assert!(preprocessor.section_size(13).is_err());
    }
}
