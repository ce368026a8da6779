//! uve-emu: run streaming-unit scenarios

use std::env;
use std::path::Path;

use anyhow::Context;
use uve_emu::config::Config;
use uve_emu::memory::{HostMemory, Recorder};
use uve_emu::scenario::{Report, Scenario, ScenarioRunner};
use uve_emu::streaming::StreamingUnit;

const USAGE: &str = "usage: uve-emu <scenario.toml> [--dump-memory] [--trace]\n       uve-emu --sample-config";

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut dump_memory = false;
    let mut trace = false;
    let mut path = None;

    for arg in &args[1..] {
        match arg.as_str() {
            "--dump-memory" => dump_memory = true,
            "--trace" => trace = true,
            "--sample-config" => {
                print!("{}", Config::sample_config());
                if let Some(user_path) = Config::user_config_path() {
                    eprintln!("# user config location: {}", user_path.display());
                }
                return Ok(());
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                return Ok(());
            }
            flag if flag.starts_with('-') => anyhow::bail!("unknown option {}\n{}", flag, USAGE),
            file => path = Some(file),
        }
    }

    let Some(path) = path else {
        anyhow::bail!("no scenario given\n{}", USAGE);
    };

    let config = Config::get();
    let trace = trace || config.trace_memory();

    println!("Loading: {}", path);
    let scenario = Scenario::from_file(Path::new(path))?;
    if !scenario.description.is_empty() {
        println!("{}", scenario.description);
    }
    println!();

    let mut memory = HostMemory::new();
    scenario.initialise_memory(&mut memory)?;

    let runner = ScenarioRunner::new(config);
    let mut unit = StreamingUnit::new();

    let memory = if trace {
        let mut recorder = Recorder::new(memory);
        let result = runner.run(&scenario, &mut unit, &mut recorder);

        // The log is most useful when the run failed, so print it first
        println!("Memory accesses ({})", recorder.accesses().len());
        println!("=================");
        for access in recorder.accesses() {
            println!("  {}", access);
        }
        println!();

        print_report(&result.context("scenario failed")?);
        recorder.into_inner()
    } else {
        let report = runner.run(&scenario, &mut unit, &mut memory).context("scenario failed")?;
        print_report(&report);
        memory
    };

    if dump_memory {
        dump_regions(&memory, config.hexdump_bytes());
    }

    Ok(())
}

fn print_report(report: &Report) {
    println!("Report ({} bursts)", report.outcomes.len());
    println!("======");
    print!("{}", report);
}

fn dump_regions(memory: &HostMemory, max_bytes: usize) {
    println!();
    println!("Memory");
    println!("======");
    if memory.regions().is_empty() {
        println!("(no named regions)");
    }
    for region in memory.regions() {
        let len = region.size.min(max_bytes);
        println!("{} @ {:#x} ({} bytes)", region.name, region.base_address, region.size);
        print!("{}", memory.hexdump(region.base_address, len));
        if region.size > len {
            println!("... ({} more bytes)", region.size - len);
        }
    }
    println!();
    println!(
        "{} bytes written, {} bytes read, {} pages",
        memory.total_bytes_written(),
        memory.total_bytes_read(),
        memory.allocated_pages()
    );
}
