//! cbridge - inspect C types and call native functions from the command line
//!
//! Main CLI entry point.

use anyhow::{bail, Context, Result};
use cbridge::{CType, Ffi, FfiConfig, ForeignValue, HostValue, Primitive};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cbridge")]
#[command(version)]
#[command(about = "C declaration parser and dynamic call dispatcher", long_about = None)]
struct Cli {
    /// Config file (default: cbridge.toml searched upward from the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a function of a shared library
    Call {
        /// Library path or bare name ("m", "c")
        #[arg(long)]
        lib: String,

        /// Declarations, or @FILE to read them from a file
        #[arg(long)]
        cdef: String,

        /// Function to call
        function: String,

        /// Arguments, parsed according to the declared parameter types
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show field offsets of a struct or union
    Layout {
        /// Type to lay out, e.g. "struct stat"
        ty: String,

        /// Header file with the declarations
        #[arg(long)]
        cdef: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the canonical spelling, size and alignment of a type
    Typeof {
        /// Type to inspect, e.g. "unsigned long int *"
        ty: String,

        /// Header file with the declarations
        #[arg(long)]
        cdef: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FfiConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FfiConfig::load_from_cwd().context("Failed to load cbridge.toml")?,
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.logging.level))
        .init();

    let ffi = Ffi::with_config(&config);
    match cli.command {
        Commands::Call {
            lib,
            cdef,
            function,
            args,
        } => cmd_call(&ffi, &lib, &cdef, &function, &args),
        Commands::Layout { ty, cdef, json } => cmd_layout(&ffi, &ty, cdef.as_ref(), json),
        Commands::Typeof { ty, cdef } => cmd_typeof(&ffi, &ty, cdef.as_ref()),
    }
}

fn load_cdef_file(ffi: &Ffi, path: Option<&PathBuf>) -> Result<()> {
    if let Some(path) = path {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        ffi.cdef(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
    }
    Ok(())
}

fn cmd_typeof(ffi: &Ffi, text: &str, cdef: Option<&PathBuf>) -> Result<()> {
    load_cdef_file(ffi, cdef)?;
    let ty = ffi.type_of(text)?;
    println!("{}", ty.c_name());
    match (ty.size(), ty.align()) {
        (Ok(size), Ok(align)) => println!("size: {}  align: {}", size, align),
        (Err(e), _) | (_, Err(e)) => println!("size: unknown ({})", e),
    }
    Ok(())
}

#[derive(Serialize)]
struct LayoutReport {
    ctype: String,
    size: usize,
    align: usize,
    fields: Vec<FieldReport>,
}

#[derive(Serialize)]
struct FieldReport {
    name: String,
    ctype: String,
    offset: usize,
    size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bit_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bit_shift: Option<u32>,
}

fn cmd_layout(ffi: &Ffi, text: &str, cdef: Option<&PathBuf>, json: bool) -> Result<()> {
    load_cdef_file(ffi, cdef)?;
    let ty = ffi.type_of(text)?;
    let layout = ty
        .layout()
        .with_context(|| format!("Cannot lay out '{}'", ty.c_name()))?;

    let report = LayoutReport {
        ctype: ty.c_name().to_string(),
        size: layout.size,
        align: layout.align,
        fields: layout
            .fields()
            .into_iter()
            .map(|f| FieldReport {
                ctype: f.ty.c_name().to_string(),
                size: f.ty.size().ok(),
                bit_width: f.bitfield.map(|b| b.width),
                bit_shift: f.bitfield.map(|b| b.shift),
                name: f.name,
                offset: f.offset,
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}  size: {}  align: {}", report.ctype, report.size, report.align);
    println!("{:>8}  {:<24} {}", "offset", "name", "type");
    for f in &report.fields {
        let bits = match (f.bit_width, f.bit_shift) {
            (Some(w), Some(s)) => format!("  (bits {}..{})", s, s + w),
            _ => String::new(),
        };
        println!("{:>8}  {:<24} {}{}", f.offset, f.name, f.ctype, bits);
    }
    Ok(())
}

fn cmd_call(ffi: &Ffi, lib: &str, cdef: &str, function: &str, args: &[String]) -> Result<()> {
    let text = match cdef.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?,
        None => cdef.to_string(),
    };
    ffi.cdef(&text).context("Failed to parse declarations")?;

    let library = ffi
        .dlopen(lib)
        .with_context(|| format!("Failed to open library '{}'", lib))?;
    let func = library.function(function)?;
    let params = func.signature().function_type().params.clone();

    let values = args
        .iter()
        .enumerate()
        .map(|(i, arg)| match params.get(i) {
            Some(param) => parse_arg(param, arg),
            None => Ok(guess_arg(arg)),
        })
        .collect::<Result<Vec<_>>>()?;

    let result = func
        .call_host(&values)
        .with_context(|| format!("Call to '{}' failed", function))?;
    print_value(&result)
}

/// Parse a command-line argument as a value of `param`.
fn parse_arg(param: &CType, arg: &str) -> Result<HostValue> {
    if param.pointee().is_some_and(|p| p.is_char_like()) {
        return Ok(HostValue::Bytes(arg.as_bytes().to_vec()));
    }
    if param.is_pointer() {
        return Ok(HostValue::Pointer(parse_u64(arg)? as usize));
    }
    if param.is_float() {
        return Ok(HostValue::Float(
            arg.parse().with_context(|| format!("'{}' is not a number", arg))?,
        ));
    }
    if param.scalar_primitive() == Some(Primitive::Bool) {
        return match arg {
            "true" | "1" => Ok(HostValue::Bool(true)),
            "false" | "0" => Ok(HostValue::Bool(false)),
            _ => bail!("'{}' is not a boolean", arg),
        };
    }
    if param.is_integer() {
        return match arg.strip_prefix('-') {
            Some(_) => Ok(HostValue::Int(
                arg.parse().with_context(|| format!("'{}' is not an integer", arg))?,
            )),
            None => Ok(HostValue::UInt(parse_u64(arg)?)),
        };
    }
    bail!("parameters of type '{}' cannot be given on the command line", param.c_name())
}

fn parse_u64(arg: &str) -> Result<u64> {
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => arg.parse(),
    };
    parsed.with_context(|| format!("'{}' is not an integer", arg))
}

/// Variadic extras: integer, then float, else a string.
fn guess_arg(arg: &str) -> HostValue {
    if let Ok(i) = arg.parse::<i64>() {
        HostValue::Int(i)
    } else if let Ok(f) = arg.parse::<f64>() {
        HostValue::Float(f)
    } else {
        HostValue::Bytes(arg.as_bytes().to_vec())
    }
}

fn print_value(value: &ForeignValue) -> Result<()> {
    let ty = value.ctype();
    if ty.is_aggregate() {
        println!("{} {{", ty.c_name());
        for field in ty.layout()?.fields() {
            let shown = match value.field(&field.name).and_then(|v| v.to_host()) {
                Ok(v) => v.to_string(),
                Err(_) => format!("<{}>", field.ty.c_name()),
            };
            println!("    {} = {}", field.name, shown);
        }
        println!("}}");
        return Ok(());
    }
    if ty.pointee().is_some_and(|p| p.is_char_like()) && !value.is_null() {
        // the declaration says this points at a C string
        let text = unsafe { value.read_c_string()? };
        println!("{:?}", String::from_utf8_lossy(&text));
        return Ok(());
    }
    println!("{}", value.to_host()?);
    Ok(())
}
