use clap::Parser;
use loop_vectorize::Kernel;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loop-vectorize")]
#[command(about = "Print the IR of an expression kernel before and after loop vectorization")]
#[command(version)]
struct Args {
    /// Expression evaluated per index, `i` is the loop index
    expression: String,

    /// Number of loop iterations and length of every input
    #[arg(short, long, default_value_t = 8)]
    extent: usize,

    /// Vectorization factor of the loop
    #[arg(short = 'f', long, default_value_t = 4)]
    vectorize: usize,

    /// Input array as `name=v0,v1,...`; may be repeated
    #[arg(short, long = "input", value_parser = parse_input)]
    inputs: Vec<(String, Vec<f32>)>,

    /// Interpret the vectorized kernel and print the output array
    #[arg(short, long)]
    run: bool,

    /// Log each rewrite of the pass
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut kernel = Kernel::new(args.expression.clone(), args.extent, args.vectorize)?;

    println!("IR for kernel '{}' before vectorization:", args.expression);
    println!("{}", kernel.ir());

    kernel.vectorize()?;

    println!("IR after vectorization (factor {}):", args.vectorize);
    println!("{}", kernel.ir());

    if args.run {
        // Order the given arrays the way the kernel expects them
        let inputs = kernel
            .inputs()
            .iter()
            .map(|name| {
                args.inputs
                    .iter()
                    .find(|(given, _)| given == name)
                    .map(|(_, values)| values.as_slice())
                    .ok_or_else(|| format!("missing input '{name}'"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let result = kernel.run(&inputs)?;
        println!("out = {:?}", result);
    }

    Ok(())
}

fn parse_input(s: &str) -> Result<(String, Vec<f32>), String> {
    let (name, values) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=v0,v1,..., got '{s}'"))?;
    let values = values
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("'{v}': {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name.trim().to_string(), values))
}
