use std::path::{Path, PathBuf};

use clap::Parser;
use weft_core::WeftError;
use weft_model::Variant;
use weft_runtime::{Engine, EngineOptions};

#[derive(Parser)]
#[command(name = "weft", about = "Weft dataflow engine CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Compile a .wefts text spec into a .weftb binary model
    Compile {
        /// Input spec file
        input: PathBuf,
        /// Output path (defaults to the input with a .weftb extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load a model and run forward passes
    Run {
        /// Model file
        model: PathBuf,
        /// Number of passes to run
        #[arg(long, default_value = "1")]
        passes: usize,
        /// Worker threads (defaults to host parallelism)
        #[arg(long)]
        workers: Option<usize>,
        /// Run on the calling thread instead of the level scheduler
        #[arg(long)]
        sequential: bool,
        /// Streaming input as hex bytes, stamped before each pass
        #[arg(long)]
        input_hex: Option<String>,
        /// Print execution statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a model's header, nodes, and level assignment
    Inspect {
        /// Model file
        model: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile { input, output } => cmd_compile(&input, output),
        Commands::Run { model, passes, workers, sequential, input_hex, json } => {
            cmd_run(&model, passes, workers, sequential, input_hex.as_deref(), json)
        }
        Commands::Inspect { model } => cmd_inspect(&model),
    };

    if let Err(err) = result {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn cmd_compile(input: &Path, output: Option<PathBuf>) -> Result<(), WeftError> {
    let output = output.unwrap_or_else(|| input.with_extension("weftb"));
    weft_compiler::compile(input, &output)?;
    println!("{} -> {}", input.display(), output.display());
    Ok(())
}

fn cmd_run(
    model: &Path,
    passes: usize,
    workers: Option<usize>,
    sequential: bool,
    input_hex: Option<&str>,
    json: bool,
) -> Result<(), WeftError> {
    let mut opts = EngineOptions {
        enable_stats: true,
        streaming: !sequential,
        ..EngineOptions::default()
    };
    if let Some(w) = workers {
        opts.workers = w.max(1);
    }

    let mut engine = Engine::load(model, opts)?;
    let input = input_hex.map(parse_hex).transpose()?;

    let mut output = vec![0u8; 64];
    for _ in 0..passes {
        match &input {
            Some(bytes) => {
                engine.execute_streaming(bytes, &mut output)?;
            }
            None => engine.execute()?,
        }
    }

    let head = engine.node_prev(0);
    let shown = head.len().min(16);
    print!("node 0 output:");
    for byte in &head[..shown] {
        print!(" {:02x}", byte);
    }
    if head.len() > shown {
        print!(" ... ({} bytes)", head.len());
    }
    println!();

    let stats = engine.stats();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats)
                .map_err(|e| WeftError::Io(e.to_string()))?
        );
    } else {
        println!(
            "passes: {}  avg latency: {:?}  arena utilization: {:.1}%",
            stats.total_passes,
            stats.average_latency,
            stats.arena_utilization * 100.0,
        );
        let mut opcodes: Vec<_> = stats.per_opcode_count.iter().collect();
        opcodes.sort();
        for (op, count) in opcodes {
            println!("  opcode {:#04x}: {} invocations", op, count);
        }
        if stats.unknown_opcodes > 0 {
            println!("  unknown opcodes: {}", stats.unknown_opcodes);
        }
    }
    Ok(())
}

fn cmd_inspect(model: &Path) -> Result<(), WeftError> {
    let data = std::fs::read(model)?;
    let variant = weft_model::detect(&data);
    let graph = weft_model::read_with(&data, variant)?;
    let scheduler = weft_runtime::Scheduler::new(&graph)?;

    println!("model: {}", model.display());
    println!(
        "variant: {}",
        match variant {
            Variant::Simple => "simple",
            Variant::Versioned => "versioned",
        }
    );
    println!("nodes: {}  payload: {} bytes", graph.node_count(), graph.payload.len());
    println!("levels: {}", scheduler.groups().len());
    println!();
    println!("{:>5} {:>6} {:>6} {:>6} {:>10} {:>6}  deps", "id", "op", "in", "out", "flags", "level");
    for node in &graph.nodes {
        let deps: Vec<String> = node.dependencies().map(|d| d.to_string()).collect();
        println!(
            "{:>5} {:>#6x} {:>6} {:>6} {:>#10x} {:>6}  [{}]",
            node.id,
            node.opcode,
            node.in_off,
            node.out_off,
            node.flags,
            scheduler.level_of(node.id).unwrap_or(0),
            deps.join(", "),
        );
    }
    Ok(())
}

fn parse_hex(s: &str) -> Result<Vec<u8>, WeftError> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err(WeftError::Io("input hex has odd length".into()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| WeftError::Io(format!("invalid hex byte {:?}", &s[i..i + 2])))
        })
        .collect()
}
