mod runner;

use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use capstone::prelude::*;
use clap::{arg, value_parser, ArgGroup, ArgMatches, Command};
use colored::Colorize;
use liballegrex::allegrex::{classify, Instruction, InstructionCount};
use liballegrex::bus::load_elf;
use liballegrex::cpu::REG_V0;
use liballegrex::{Backend, CpuState, FunctionTranslator, Ram, TranslatorConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::runner::{Runner, Stop};

fn parse_address(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", value, e))
}

fn cli() -> Command {
    Command::new("allegrex")
        .version("0.0.1")
        .about("A per-function recompiler for PSP Allegrex code")
        .arg(arg!(--elf <PATH> "ELF executable to load"))
        .arg(arg!(--raw <PATH> "Raw code image").requires("base"))
        .arg(arg!(--base <ADDR> "Load address of the raw image").value_parser(parse_address))
        .arg(arg!(--entry <ADDR> "Entry point override").value_parser(parse_address))
        .arg(
            arg!(--backend <BACKEND> "Execution backend")
                .value_parser(["jit", "threaded"])
                .default_value("jit"),
        )
        .arg(arg!(--"no-opt" "Disable loop folding and inline call dispatch"))
        .arg(arg!(--dump "Log every generated function at debug level"))
        .arg(arg!(--disasm <COUNT> "Disassemble COUNT words at the entry point").value_parser(value_parser!(u32)))
        .arg(arg!(--run "Execute from the entry point"))
        .arg(
            arg!(--"max-steps" <N> "Function entries before execution stops")
                .value_parser(value_parser!(u64))
                .default_value("1000000"),
        )
        .arg(arg!(--stats "Print per-instruction usage counts"))
        .group(ArgGroup::new("image").args(["elf", "raw"]).required(true))
}

fn load_image(arguments: &ArgMatches, ram: &Ram) -> anyhow::Result<u32> {
    if let Some(path) = arguments.get_one::<String>("elf") {
        let image = fs::read(path).with_context(|| format!("failed to read {}", path))?;
        let entry = load_elf(ram, &image).with_context(|| format!("failed to load {}", path))?;
        info!("Loaded ELF {} (entry 0x{:08X})", path, entry);
        return Ok(entry);
    }

    let path = arguments
        .get_one::<String>("raw")
        .ok_or_else(|| anyhow!("no image given"))?;
    let base = *arguments
        .get_one::<u32>("base")
        .ok_or_else(|| anyhow!("--raw needs --base"))?;
    let image = fs::read(path).with_context(|| format!("failed to read {}", path))?;
    if !ram.load(base, &image) {
        bail!(
            "{} ({} bytes) at 0x{:08X} does not fit in RAM 0x{:08X}+0x{:X}",
            path,
            image.len(),
            base,
            ram.base(),
            ram.size()
        );
    }
    info!("Loaded raw image {} at 0x{:08X}", path, base);
    Ok(base)
}

fn disassemble(ram: &Ram, entry: u32, count: u32) -> anyhow::Result<()> {
    let cs = Capstone::new()
        .mips()
        .mode(arch::mips::ArchMode::Mips32)
        .endian(capstone::Endian::Little)
        .detail(false)
        .build()
        .map_err(|e| anyhow!("failed to create disassembler: {}", e))?;

    for index in 0..count {
        let address = entry.wrapping_add(index * 4);
        let bytes = ram.read_bytes(address, 4);
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let kind = classify(Instruction::new(address, word));

        let text = match cs.disasm_count(&bytes, address as u64, 1) {
            Ok(insns) => insns
                .iter()
                .next()
                .map(|insn| {
                    format!(
                        "{:<8} {}",
                        insn.mnemonic().unwrap_or("?"),
                        insn.op_str().unwrap_or("")
                    )
                })
                .unwrap_or_else(|| ".word".to_string()),
            Err(_) => ".word".to_string(),
        };

        println!(
            "{:08X}: {:08X}  {:<32} {}",
            address,
            word,
            text,
            kind.name().dimmed()
        );
    }
    Ok(())
}

fn print_usage(usage: &[InstructionCount]) {
    let total: u64 = usage.iter().map(|c| c.count).sum();
    println!("{}", format!("{:<10} {:>10} {:>8}", "insn", "count", "share").bold());
    for c in usage {
        let share = if total == 0 {
            0.0
        } else {
            c.count as f64 * 100.0 / total as f64
        };
        println!(
            "{} {:>10} {:>7.2}%",
            format!("{:<10}", c.name).cyan(),
            c.count,
            share
        );
    }
    println!("{}", format!("{:<10} {:>10}", "total", total).bold());
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let arguments = cli().get_matches();

    let ram = Arc::new(Ram::user());
    let mut entry = load_image(&arguments, &ram)?;
    if let Some(&address) = arguments.get_one::<u32>("entry") {
        entry = address;
    }

    if let Some(&count) = arguments.get_one::<u32>("disasm") {
        disassemble(&ram, entry, count)?;
    }

    let backend = match arguments.get_one::<String>("backend").map(String::as_str) {
        Some("threaded") => Backend::Threaded,
        _ => Backend::Cranelift,
    };
    let config = TranslatorConfig {
        optimizations: !arguments.get_flag("no-opt"),
        backend,
        dump_functions: arguments.get_flag("dump"),
    };
    let mut translator =
        FunctionTranslator::new(ram.clone(), config).context("failed to create translator")?;

    let usage = if arguments.get_flag("run") {
        let max_steps = *arguments.get_one::<u64>("max-steps").unwrap_or(&1_000_000);
        let runner = Runner::new(translator, max_steps);

        let mut state = CpuState::new(ram.clone());
        state.pc = entry;
        let stop = runner.run(&mut state);

        println!(
            "{} after {} function entries ({} cached): PC=0x{:08X} v0=0x{:08X}",
            match &stop {
                Stop::Returned => "returned".green(),
                Stop::Halted => "halted".yellow(),
                Stop::StepLimit => "step limit".yellow(),
                Stop::Failed(_) => "failed".red(),
            },
            runner.functions_entered(),
            runner.functions_cached(),
            state.pc,
            state.gpr[REG_V0]
        );
        if let Stop::Failed(err) = stop {
            return Err(err).context(format!("execution from 0x{:08X} failed", entry));
        }
        runner.usage()
    } else {
        let function = translator
            .translate(entry)
            .with_context(|| format!("failed to translate 0x{:08X}", entry))?;
        println!(
            "{} function_{:08X}: {} steps, {} ops{}",
            "translated".green(),
            function.address(),
            function.program().steps().len(),
            function.program().op_count(),
            if function.is_native() { ", native" } else { "" }
        );
        print!("{}", function.program());
        translator.usage_snapshot()
    };

    if arguments.get_flag("stats") {
        print_usage(&usage);
    }

    Ok(())
}
