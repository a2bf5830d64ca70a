mod backend;
mod cf;
mod error;
mod index;
mod indexing;
mod locks;
mod metadata;
mod store;

use anyhow::Context;
use backend::{open_dataset_with_backend, OpenOptions};
use clap::Parser;
use colored::Colorize;
use metadata::{AttributeValue, Dataset, Variable};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "grib-store")]
#[command(version)]
#[command(about = "Summarize GRIB2 files as NetCDF-style datasets")]
#[command(arg_required_else_help = true)]
struct Args {
    /// Path to the GRIB2 file
    path: PathBuf,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Show coordinate variable data values (like ncdump -c)
    #[arg(short = 'c', long = "coordinate-data")]
    coordinate_data: bool,

    /// Keep only messages matching a GRIB key, formatted as 'key=value'
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    filter: Vec<String>,

    /// Extra GRIB keys to surface as variable attributes
    #[arg(long = "read-key", value_name = "KEY")]
    read_key: Vec<String>,

    /// Backend engine name (probed from the file when omitted)
    #[arg(long, value_name = "NAME")]
    engine: Option<String>,

    /// Keep length-one level axes
    #[arg(long)]
    no_squeeze: bool,

    /// Index cache path template; pass an empty string to disable caching
    #[arg(long, value_name = "TEMPLATE")]
    indexpath: Option<String>,

    /// Variables to exclude from the output
    #[arg(long = "drop-variable", value_name = "NAME")]
    drop_variable: Vec<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);

        // Print the error chain for better context
        for cause in e.chain().skip(1) {
            eprintln!("  Caused by: {}", cause);
        }

        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.no_color {
        colored::control::set_override(false);
    }

    if !args.path.exists() {
        return Err(anyhow::anyhow!(
            "GRIB file '{}' does not exist. Please provide a valid path to a GRIB2 file.",
            args.path.display()
        ));
    }

    if !args.path.is_file() {
        return Err(anyhow::anyhow!(
            "Path '{}' is not a file.",
            args.path.display()
        ));
    }

    let mut options = OpenOptions::new();
    for spec in &args.filter {
        let (key, value) = spec.split_once('=').ok_or_else(|| {
            anyhow::anyhow!("Invalid --filter '{}', expected 'key=value'", spec)
        })?;
        options = options.filter_by_key(key, value);
    }
    for key in &args.read_key {
        options = options.read_key(key);
    }
    for name in &args.drop_variable {
        options = options.drop_variable(name);
    }
    if args.no_squeeze {
        options = options.squeeze(false);
    }
    if let Some(template) = &args.indexpath {
        options = options.indexpath(template);
    }

    let mut dataset = open_dataset_with_backend(&args.path, args.engine.as_deref(), options)
        .with_context(|| format!("Failed to open GRIB file '{}'", args.path.display()))?;

    print_dataset_summary(&dataset, &args)?;
    dataset.close();
    Ok(())
}

/// Prints a `ncdump -h` style header for the dataset.
fn print_dataset_summary(dataset: &Dataset, args: &Args) -> anyhow::Result<()> {
    let name = args
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.path.display().to_string());
    println!("{} {} {{", "grib".blue(), name.bold());

    print_dimensions(dataset);
    print_variables(dataset);
    print_global_attributes(dataset);
    if args.coordinate_data {
        print_coordinate_data(dataset)?;
    }

    println!("}}");
    Ok(())
}

fn print_dimensions(dataset: &Dataset) {
    let dimensions = dataset.dimensions();
    if dimensions.is_empty() {
        return;
    }

    println!("{}", "dimensions:".green());
    for (dim, size) in &dimensions {
        match size {
            None => {
                // Unlimited dimension; show the current length from a
                // variable that uses it.
                let current = dataset
                    .variables
                    .values()
                    .find_map(|v| {
                        v.dimensions
                            .iter()
                            .position(|d| d == dim)
                            .map(|i| v.shape()[i])
                    })
                    .unwrap_or(0);
                println!(
                    "    {} = {} ; {}",
                    dim.cyan(),
                    "UNLIMITED".yellow(),
                    format!("// ({} currently)", current).bright_black()
                );
            }
            Some(size) => {
                println!("    {} = {} ;", dim.cyan(), size.to_string().yellow());
            }
        }
    }
}

fn print_variables(dataset: &Dataset) {
    if dataset.variables.is_empty() {
        return;
    }

    println!("{}", "variables:".green());
    for (name, variable) in &dataset.variables {
        let dims = variable
            .dimensions
            .iter()
            .map(|d| d.cyan().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "    {} {}({}) ;",
            map_dtype_to_netcdf(variable).magenta(),
            name.cyan(),
            dims
        );
        for (key, value) in &variable.attributes {
            println!(
                "        {}:{} = {} ;",
                name.cyan(),
                key.yellow(),
                format_attribute_value(value)
            );
        }
    }
}

fn print_global_attributes(dataset: &Dataset) {
    if dataset.attributes.is_empty() {
        return;
    }

    println!("{}", "// global attributes:".bright_black());
    for (key, value) in &dataset.attributes {
        println!("    :{} = {} ;", key.yellow(), format_attribute_value(value));
    }
}

fn print_coordinate_data(dataset: &Dataset) -> anyhow::Result<()> {
    let coords: Vec<_> = dataset.coords().collect();
    if coords.is_empty() {
        return Ok(());
    }

    println!("{}", "data:".green());
    println!();
    for (name, variable) in coords {
        match variable.values() {
            Ok(data) => {
                let rendered = data
                    .values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(" {} = {} ;", name.cyan(), rendered.yellow());
                println!();
            }
            Err(e) => {
                println!(
                    " {} = {} ;",
                    name.cyan(),
                    format!("<error reading data: {}>", e).red()
                );
                println!();
            }
        }
    }
    Ok(())
}

fn format_attribute_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::String(s) => {
            let escaped = s.replace('\"', "\\\"").replace('\n', "\\n");
            format!("\"{}\"", escaped).red().to_string()
        }
        AttributeValue::Number(n) => n.to_string().yellow().to_string(),
        AttributeValue::Integer(i) => i.to_string().yellow().to_string(),
        AttributeValue::Boolean(b) => b.to_string().magenta().to_string(),
        AttributeValue::Array(arr) => {
            let elements: Vec<String> = arr
                .iter()
                .take(5) // Limit array display
                .map(format_attribute_value)
                .collect();
            if arr.len() > 5 {
                format!("[{}, ...]", elements.join(", "))
            } else {
                format!("[{}]", elements.join(", "))
            }
        }
        AttributeValue::Null => "null".bright_black().to_string(),
    }
}

fn map_dtype_to_netcdf(variable: &Variable) -> &'static str {
    match variable.dtype() {
        indexing::DType::F32 => "float",
        indexing::DType::F64 => "double",
    }
}
