use clap::{Args, Parser as ClapParser, Subcommand};
use pipeql::cli::{self, CliError, CompileOptions, RunOptions};
use pipeql::output::{JsonPrinter, Style};
use pipeql::Value;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "pipeql")]
#[command(about = "pipeql - compile lookup-path filters into aggregation pipelines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct QueryArgs {
    /// Schema file (JSON array of models)
    #[arg(short, long)]
    schema: PathBuf,

    /// Model to query
    #[arg(short, long)]
    model: String,

    /// Filter, e.g. 'sections__section_number__in = [1, 2]'
    filter: Option<String>,

    /// Lookup paths to return (repeatable)
    #[arg(long = "values")]
    values: Vec<String>,

    /// Ordering paths, '-' prefix for descending (repeatable)
    #[arg(long = "order-by")]
    order_by: Vec<String>,

    #[arg(long)]
    offset: Option<usize>,

    #[arg(long)]
    limit: Option<usize>,

    /// Compiler configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretty-print the output
    #[arg(short, long)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a filter and print the pipeline
    Compile {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Compile a filter and run it against JSON data
    Run {
        #[command(flatten)]
        query: QueryArgs,

        /// Data file: {"collection": [documents...]} (reads from stdin if not provided)
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Check a schema file for definition errors
    CheckSchema {
        /// Schema file (JSON array of models)
        schema: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile { query } => run_compile(query),
        Commands::Run { query, data } => run_run(query, data),
        Commands::CheckSchema { schema } => run_check_schema(schema),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn compile_options(args: &QueryArgs) -> Result<CompileOptions, CliError> {
    Ok(CompileOptions {
        schema: fs::read_to_string(&args.schema)?,
        config: args.config.as_ref().map(fs::read_to_string).transpose()?,
        model: args.model.clone(),
        filter: args.filter.clone(),
        values: args.values.clone(),
        order_by: args.order_by.clone(),
        offset: args.offset,
        limit: args.limit,
    })
}

fn style(args: &QueryArgs) -> Style {
    if args.pretty {
        Style::Pretty
    } else {
        Style::Compact
    }
}

fn run_compile(args: QueryArgs) -> Result<(), CliError> {
    let compiled = cli::execute_compile(&compile_options(&args)?)?;
    println!("{}", JsonPrinter::new(style(&args)).print_query(&compiled));
    Ok(())
}

fn run_run(args: QueryArgs, data: Option<PathBuf>) -> Result<(), CliError> {
    let data = match data {
        Some(path) => Some(fs::read_to_string(path)?),
        None if !atty::is(atty::Stream::Stdin) => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Some(buffer)
        }
        None => None,
    };

    let options = RunOptions {
        compile: compile_options(&args)?,
        data,
    };
    let rows = cli::execute_run(&options)?;
    println!("{}", JsonPrinter::new(style(&args)).print(&Value::Array(rows)));
    Ok(())
}

fn run_check_schema(schema: PathBuf) -> Result<(), CliError> {
    let messages = cli::check_schema(&fs::read_to_string(schema)?)?;
    if messages.is_empty() {
        println!("Schema is valid");
        return Ok(());
    }
    for message in &messages {
        println!("{}", message);
    }
    std::process::exit(1);
}
