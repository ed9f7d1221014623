use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use dwarfscope_core::expr::{decode_expression, ExpressionProfile, FormatOptions};
use dwarfscope_core::{
    Architecture, DecodeError, ObjectImage, Result as DecodeResult, RunTimeEndian, ScopeResolver, SignatureReconstructor,
};
use dwarfscope_utils::{debug, info, init_logging_with_config, LogConfig, LogFormat, LogLevel};

mod render;

/// Inspect DWARF locations, call frame information and compact unwind tables.
#[derive(Parser, Debug)]
#[command(name = "dwarfscope")]
#[command(version)]
#[command(about = "Inspect DWARF locations, call frame information and compact unwind tables", long_about = None)]
struct Cli
{
    #[command(flatten)]
    display: DisplayArgs,

    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format: pretty or json (overrides DWARFSCOPE_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct DisplayArgs
{
    /// Register table to use (defaults to the object's architecture, or x86_64)
    #[arg(long, global = true, value_parser = parse_architecture)]
    arch: Option<Architecture>,

    /// Print unsigned operands in hexadecimal
    #[arg(long, global = true, default_value_t = false)]
    hex: bool,

    /// Drop the DW_OP_ prefix from mnemonics
    #[arg(long, global = true, default_value_t = false)]
    no_prefix: bool,

    /// Print DWARF register numbers instead of ABI names
    #[arg(long, global = true, default_value_t = false)]
    raw_registers: bool,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Decode and format a DWARF expression given as hex bytes
    Expr
    {
        /// Expression bytes, e.g. "91 70" or 0x9170
        bytes: String,
        /// DWARF version of the owning unit (1 selects the legacy opcodes)
        #[arg(long, default_value_t = 4)]
        dwarf_version: u16,
        /// Size of DW_OP_addr operands in bytes
        #[arg(long, default_value_t = 8)]
        address_size: u8,
        /// Operands are big-endian
        #[arg(long, default_value_t = false)]
        big_endian: bool,
    },
    /// Print the frame chain and locals visible at an address
    Locals
    {
        file: PathBuf,
        /// Address (hex format: 0x1000 or decimal)
        #[arg(value_parser = render::parse_address)]
        address: u64,
    },
    /// Print the unwind row covering an address
    Cfi
    {
        file: PathBuf,
        #[arg(value_parser = render::parse_address)]
        address: u64,
        /// Also list the FDE's call frame instructions
        #[arg(long, default_value_t = false)]
        instructions: bool,
    },
    /// Dump the __unwind_info table, or look up one address in it
    UnwindInfo
    {
        file: PathBuf,
        /// Link-time address, or an offset from the `__TEXT` segment
        #[arg(value_parser = render::parse_address)]
        address: Option<u64>,
    },
    /// Reconstruct the signature of every function with this name
    Signature
    {
        file: PathBuf,
        /// Plain or qualified name, e.g. bar or Foo::bar
        name: String,
    },
}

fn parse_architecture(name: &str) -> Result<Architecture, String>
{
    Architecture::from_name(name).ok_or_else(|| format!("unknown architecture {name:?}"))
}

impl DisplayArgs
{
    fn options(&self, detected: Architecture) -> FormatOptions
    {
        FormatOptions {
            friendly_names: !self.raw_registers,
            show_prefix: !self.no_prefix,
            hex: self.hex,
            ..FormatOptions::new(self.arch.unwrap_or(detected))
        }
    }
}

fn main()
{
    let cli = Cli::parse();

    let mut config = match LogConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };
    config.level = cli.log_level.or(config.level);
    config.format = cli.log_format.unwrap_or(config.format);
    let _guard = match init_logging_with_config(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {e}");
        // Nothing found is an answer, not a failure of the tool.
        process::exit(if e.is_not_found() { 2 } else { 1 });
    }
}

fn open(file: &Path) -> DecodeResult<ObjectImage>
{
    let image = ObjectImage::open(file)?;
    info!(file = %file.display(), architecture = %image.architecture(), "opened object");
    Ok(image)
}

fn run_command(cli: Cli) -> DecodeResult<()>
{
    let display = cli.display;
    match cli.command {
        Commands::Expr {
            bytes,
            dwarf_version,
            address_size,
            big_endian,
        } => {
            let bytes = render::parse_hex_bytes(&bytes).map_err(DecodeError::Unsupported)?;
            let endian = if big_endian {
                RunTimeEndian::Big
            } else {
                RunTimeEndian::Little
            };
            let profile = ExpressionProfile::new(address_size, endian, dwarf_version);
            debug!(?profile, len = bytes.len(), "decoding expression");
            let ops = decode_expression(&bytes, &profile)?;
            println!("{}", render::expression(&ops, &display.options(Architecture::X86_64)));
            Ok(())
        }
        Commands::Locals { file, address } => {
            let image = open(&file)?;
            let options = display.options(image.architecture());
            let call_frames = image.call_frame_info()?;
            let resolver = ScopeResolver::new(image.debug_info()).with_call_frames(&call_frames);
            let frames = resolver.locals_at(address)?;
            print!("{}", render::frames(&frames, &options));
            Ok(())
        }
        Commands::Cfi {
            file,
            address,
            instructions,
        } => {
            let image = open(&file)?;
            let options = display.options(image.architecture());
            let cfi = image.call_frame_info()?;
            let (cie, fde) = cfi.entries_for_address(address)?;
            let row = cfi.row_for_address(address)?;
            print!("{}", render::unwind_row(cie, fde, &row, &options));
            if instructions {
                let listed = cfi.instructions_for_address(address)?;
                for instruction in &listed.initial {
                    println!("  cie: {instruction}");
                }
                for instruction in &listed.body {
                    println!("  fde: {instruction}");
                }
            }
            Ok(())
        }
        Commands::UnwindInfo { file, address } => {
            let image = open(&file)?;
            let options = display.options(image.architecture());
            let Some(table) = image.compact_unwind()? else {
                println!("{} has no __unwind_info section", file.display());
                return Ok(());
            };
            match address {
                Some(address) => match table.lookup(image.image_relative(address))? {
                    Some(entry) => println!("{}", render::compact_entry(&entry, &options)),
                    None => return Err(DecodeError::NoFrameInfo { pc: address }),
                },
                None => {
                    for record in table.entries()? {
                        match table.decode(&record) {
                            Ok(entry) => println!("{}", render::compact_entry(&entry, &options)),
                            Err(e) => println!(
                                "[{:#x}, {:#x}) {:#010x} <{e}>",
                                record.address, record.end, record.encoding.0
                            ),
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Signature { file, name } => {
            let image = open(&file)?;
            let reconstructor = SignatureReconstructor::new(image.debug_info());
            let functions = reconstructor.functions_named(&name);
            if functions.is_empty() {
                println!("no function named {name}");
                return Ok(());
            }
            for function in functions {
                let signature = reconstructor.reconstruct(function)?;
                println!("{:#x}: {}", function.offset(), signature.with_return_type());
            }
            Ok(())
        }
    }
}
